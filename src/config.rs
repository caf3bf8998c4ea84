use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::GeoAccession;
use crate::error::KiraError;
use crate::quantitation::QuantitationRules;

pub const DEFAULT_CONFIG_FILE: &str = "kira-geo.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub quantitation: QuantitationSection,
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub series: Vec<SeriesEntry>,
}

/// Extra description patterns that mark a column as a measured or derived amount.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct QuantitationSection {
    #[serde(default)]
    pub measured_signal_patterns: Vec<String>,
    #[serde(default)]
    pub derived_signal_patterns: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct IngestSection {
    #[serde(default)]
    pub do_sample_matching: Option<bool>,
    #[serde(default)]
    pub split_by_platform: Option<bool>,
    #[serde(default)]
    pub allow_super_series: Option<bool>,
    #[serde(default)]
    pub allow_sub_series: Option<bool>,
    #[serde(default)]
    pub force_download: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SeriesEntry {
    Shorthand(String),
    Detailed(SeriesEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SeriesEntryObject {
    pub accession: String,
    #[serde(default)]
    pub do_sample_matching: Option<bool>,
    #[serde(default)]
    pub split_by_platform: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub do_sample_matching: bool,
    pub split_by_platform: bool,
    pub allow_super_series: bool,
    pub allow_sub_series: bool,
    pub force_download: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            do_sample_matching: true,
            split_by_platform: false,
            allow_super_series: true,
            allow_sub_series: true,
            force_download: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeriesRequest {
    pub accession: GeoAccession,
    pub options: IngestOptions,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub rules: QuantitationRules,
    pub ingest: IngestOptions,
    pub series: Vec<SeriesRequest>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            rules: QuantitationRules::default(),
            ingest: IngestOptions::default(),
            series: Vec::new(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config at `path`, or `kira-geo.json` in the working directory.
    ///
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(KiraError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let quantitation = &config.quantitation;
        let rules = if quantitation.measured_signal_patterns.is_empty()
            && quantitation.derived_signal_patterns.is_empty()
        {
            QuantitationRules::default()
        } else {
            QuantitationRules::with_extra(
                &quantitation.measured_signal_patterns,
                &quantitation.derived_signal_patterns,
            )?
        };

        let defaults = IngestOptions::default();
        let ingest = IngestOptions {
            do_sample_matching: config
                .ingest
                .do_sample_matching
                .unwrap_or(defaults.do_sample_matching),
            split_by_platform: config
                .ingest
                .split_by_platform
                .unwrap_or(defaults.split_by_platform),
            allow_super_series: config
                .ingest
                .allow_super_series
                .unwrap_or(defaults.allow_super_series),
            allow_sub_series: config
                .ingest
                .allow_sub_series
                .unwrap_or(defaults.allow_sub_series),
            force_download: config
                .ingest
                .force_download
                .unwrap_or(defaults.force_download),
        };

        let series = config
            .series
            .into_iter()
            .map(|entry| -> Result<SeriesRequest, KiraError> {
                match entry {
                    SeriesEntry::Shorthand(value) => Ok(SeriesRequest {
                        accession: value.parse()?,
                        options: ingest,
                    }),
                    SeriesEntry::Detailed(obj) => Ok(SeriesRequest {
                        accession: obj.accession.parse()?,
                        options: IngestOptions {
                            do_sample_matching: obj
                                .do_sample_matching
                                .unwrap_or(ingest.do_sample_matching),
                            split_by_platform: obj
                                .split_by_platform
                                .unwrap_or(ingest.split_by_platform),
                            ..ingest
                        },
                    }),
                }
            })
            .collect::<Result<Vec<_>, KiraError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            rules,
            ingest,
            series,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            series: vec![SeriesEntry::Shorthand("GSE1234".to_string())],
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.series.len(), 1);
        assert_eq!(resolved.series[0].options, IngestOptions::default());
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let config = Config {
            quantitation: QuantitationSection {
                measured_signal_patterns: vec!["(unclosed".to_string()],
                derived_signal_patterns: Vec::new(),
            },
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(KiraError::InvalidPattern { .. })
        );
    }
}
