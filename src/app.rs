use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::{info, warn};

use crate::combiner::DatasetCombiner;
use crate::config::IngestOptions;
use crate::correspondence::SampleCorrespondence;
use crate::domain::{AccessionKind, GeoAccession};
use crate::error::KiraError;
use crate::geo::GeoClient;
use crate::model::{ParseResult, Series};
use crate::ncbi::EntrezClient;
use crate::parser::{CancellationToken, SoftParser};
use crate::quantitation::{ExampleValue, QuantitationGuesser, QuantitationRules, QuantitationType};
use crate::values::QtIndex;

/// How many design elements are scanned for an example value of a column.
const EXAMPLE_SCAN_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Receives a finished series; what it builds from it is up to the implementation.
pub trait Converter {
    type Output;

    fn convert(&mut self, series: &IngestedSeries) -> Result<Self::Output, KiraError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConverter;

impl Converter for NoopConverter {
    type Output = ();

    fn convert(&mut self, _series: &IngestedSeries) -> Result<Self::Output, KiraError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GuessedColumn {
    pub index: QtIndex,
    #[serde(flatten)]
    pub descriptor: QuantitationType,
}

/// A parsed series with its sample correspondence and column descriptors.
#[derive(Debug, Clone)]
pub struct IngestedSeries {
    pub accession: String,
    pub result: ParseResult,
    /// platform -> guessed descriptors, by quantitation-type index.
    pub quantitation_types: IndexMap<String, Vec<GuessedColumn>>,
}

impl IngestedSeries {
    pub fn series(&self) -> Option<&Series> {
        self.result.series.get(&self.accession)
    }

    pub fn correspondence(&self) -> Option<&SampleCorrespondence> {
        self.series()?.correspondence.as_ref()
    }

    /// Drops samples from the series, its subsets, its values and its correspondence.
    pub fn remove_samples(&mut self, accessions: &[String]) {
        let doomed: IndexSet<&str> = accessions.iter().map(String::as_str).collect();
        let Some(series) = self.result.series.get(&self.accession) else {
            return;
        };
        let datasets: Vec<String> = series.datasets.iter().cloned().collect();

        for dataset in datasets.iter().filter_map(|d| self.result.datasets.get(d)) {
            for subset in &dataset.subsets {
                if let Some(subset) = self.result.subsets.get_mut(subset) {
                    subset.samples.retain(|s| !doomed.contains(s.as_str()));
                }
            }
        }

        let samples = &self.result.samples;
        let Some(series) = self.result.series.get_mut(&self.accession) else {
            return;
        };
        series.samples.retain(|s| !doomed.contains(s.as_str()));
        for variable in series.variables.values_mut() {
            variable.samples.retain(|s| !doomed.contains(s.as_str()));
        }
        for replicate in series.replicates.values_mut() {
            replicate.samples.retain(|s| !doomed.contains(s.as_str()));
        }
        if let Some(correspondence) = series.correspondence.as_mut() {
            for sample in &doomed {
                correspondence.remove_sample(sample);
            }
        }
        let remaining: Vec<String> = series.samples.iter().cloned().collect();
        series.values = series.values.subset(&remaining, |sample| {
            samples
                .get(sample)
                .and_then(|record| record.first_platform())
                .map(str::to_string)
        });

        for sample in &doomed {
            info!("Removing {sample} from {}", self.accession);
            self.result.samples.shift_remove(*sample);
        }
    }

    pub fn summary(&self) -> IngestSummary {
        let series = self.series();
        IngestSummary {
            accession: self.accession.clone(),
            title: series.and_then(|s| s.title.clone()),
            platforms: series
                .map(|s| self.result.series_platforms(s))
                .unwrap_or_default(),
            datasets: series
                .map(|s| s.datasets.iter().cloned().collect())
                .unwrap_or_default(),
            sample_count: series.map(|s| s.samples.len()).unwrap_or(0),
            correspondence: self
                .correspondence()
                .map(|c| c.iter().map(|group| group.iter().cloned().collect()).collect())
                .unwrap_or_default(),
            quantitation_types: self.quantitation_types.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub accession: String,
    pub title: Option<String>,
    pub platforms: Vec<String>,
    pub datasets: Vec<String>,
    pub sample_count: usize,
    pub correspondence: Vec<Vec<String>>,
    pub quantitation_types: IndexMap<String, Vec<GuessedColumn>>,
}

pub struct App<G: GeoClient, E: EntrezClient> {
    geo: G,
    entrez: E,
    rules: QuantitationRules,
    token: CancellationToken,
}

impl<G: GeoClient, E: EntrezClient> App<G, E> {
    pub fn new(geo: G, entrez: E) -> Self {
        Self {
            geo,
            entrez,
            rules: QuantitationRules::default(),
            token: CancellationToken::new(),
        }
    }

    pub fn with_rules(mut self, rules: QuantitationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Fetches, parses and resolves every series behind a GSE or GDS accession.
    pub fn ingest(
        &self,
        accession: &GeoAccession,
        options: IngestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<IngestedSeries>, KiraError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {accession}"),
            elapsed: None,
        });

        let series = match accession.kind() {
            AccessionKind::Gse => vec![accession.clone()],
            AccessionKind::Gds => self.entrez.find_gse_for_gds(accession)?,
            AccessionKind::Gpl | AccessionKind::Gsm => {
                return Err(KiraError::NotASeries(accession.to_string()));
            }
        };

        let mut ingested = Vec::with_capacity(series.len());
        for series_accession in &series {
            ingested.push(self.ingest_series(series_accession, options, sink)?);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Done; {} series", ingested.len()),
            elapsed: Some(started.elapsed()),
        });
        Ok(ingested)
    }

    /// Ingests and hands each series to `converter`.
    pub fn ingest_and_convert<C: Converter>(
        &self,
        accession: &GeoAccession,
        options: IngestOptions,
        converter: &mut C,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<(IngestedSeries, C::Output)>, KiraError> {
        let ingested = self.ingest(accession, options, sink)?;
        let mut converted = Vec::with_capacity(ingested.len());
        for series in ingested {
            sink.event(ProgressEvent {
                message: format!("phase=Convert; {}", series.accession),
                elapsed: None,
            });
            let output = converter.convert(&series)?;
            converted.push((series, output));
        }
        Ok(converted)
    }

    /// Fetches and parses only the platform sections of a GPL file.
    pub fn fetch_platform(
        &self,
        accession: &GeoAccession,
        options: IngestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ParseResult, KiraError> {
        if accession.kind() != AccessionKind::Gpl {
            return Err(KiraError::InvalidAccession(format!(
                "{accession} is not a platform accession"
            )));
        }
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {accession}"),
            elapsed: None,
        });
        let path = self.geo.fetch_soft(accession, options.force_download)?;
        self.parse_files(&[path], true, sink)
    }

    fn ingest_series(
        &self,
        accession: &GeoAccession,
        options: IngestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<IngestedSeries, KiraError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {accession}"),
            elapsed: None,
        });
        let datasets = self.entrez.find_gds_for_gse(accession)?;
        let mut files = Vec::with_capacity(datasets.len() + 1);
        for dataset in &datasets {
            files.push(self.geo.fetch_soft(dataset, options.force_download)?);
        }
        files.push(self.geo.fetch_soft(accession, options.force_download)?);

        let result = self.parse_files(&files, false, sink)?;
        let ingested = self.assemble(result, accession.as_str(), options, sink)?;
        sink.event(ProgressEvent {
            message: format!("phase=Ingested; {accession}"),
            elapsed: Some(started.elapsed()),
        });
        Ok(ingested)
    }

    /// Runs one parser over the files in order.
    pub fn parse_files(
        &self,
        files: &[Utf8PathBuf],
        platforms_only: bool,
        sink: &dyn ProgressSink,
    ) -> Result<ParseResult, KiraError> {
        let mut parser = SoftParser::new()
            .with_platforms_only(platforms_only)
            .with_cancellation(self.token.clone());
        for file in files {
            let started = Instant::now();
            sink.event(ProgressEvent {
                message: format!("phase=Parse; {}", file_label(file)),
                elapsed: None,
            });
            parser.parse_path(file.as_std_path())?;
            sink.event(ProgressEvent {
                message: format!("phase=Parsed; {}", file_label(file)),
                elapsed: Some(started.elapsed()),
            });
        }
        Ok(parser.into_result())
    }

    /// Links, checks and resolves one series of an already parsed result.
    pub fn assemble(
        &self,
        mut result: ParseResult,
        series: &str,
        options: IngestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<IngestedSeries, KiraError> {
        sink.event(ProgressEvent {
            message: format!("phase=Link; {series}"),
            elapsed: None,
        });
        result.link_datasets();

        let record = result
            .series
            .get(series)
            .ok_or_else(|| KiraError::NotASeries(series.to_string()))?;
        check_series_allowed(record, options)?;

        collapse_datasets_sharing_platform(&mut result, series);

        sink.event(ProgressEvent {
            message: format!("phase=Correspond; {series}"),
            elapsed: None,
        });
        let combiner =
            DatasetCombiner::new(options.do_sample_matching && !options.split_by_platform);
        let correspondence = combiner.find_gse_correspondence(&mut result, series)?;
        if let Some(record) = result.series.get_mut(series) {
            record.correspondence = Some(correspondence);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Guess; {series}"),
            elapsed: None,
        });
        let quantitation_types = guess_series_columns(&result, series, &self.rules);

        Ok(IngestedSeries {
            accession: series.to_string(),
            result,
            quantitation_types,
        })
    }
}

fn file_label(path: &Utf8Path) -> &str {
    path.file_name().unwrap_or(path.as_str())
}

fn check_series_allowed(series: &Series, options: IngestOptions) -> Result<(), KiraError> {
    if series.is_super_series && !options.allow_super_series {
        return Err(KiraError::SeriesRefused {
            accession: series.accession.clone(),
            reason: "it is a superseries".to_string(),
        });
    }
    if series.is_sub_series && !options.allow_sub_series {
        return Err(KiraError::SeriesRefused {
            accession: series.accession.clone(),
            reason: "it is a subseries".to_string(),
        });
    }
    Ok(())
}

/// Folds datasets of one series that share a platform into the first of them.
fn collapse_datasets_sharing_platform(result: &mut ParseResult, series: &str) {
    let Some(record) = result.series.get(series) else {
        return;
    };
    let mut by_platform: IndexMap<String, Vec<String>> = IndexMap::new();
    for dataset in &record.datasets {
        let Some(platform) = result
            .datasets
            .get(dataset)
            .and_then(|d| d.platform.clone())
        else {
            continue;
        };
        by_platform.entry(platform).or_default().push(dataset.clone());
    }

    for (platform, datasets) in by_platform {
        let Some((keep, collapsed)) = datasets.split_first() else {
            continue;
        };
        if collapsed.is_empty() {
            continue;
        }
        warn!(
            "{} datasets of {series} use {platform}; collapsing them into {keep}",
            datasets.len()
        );

        let mut subsets = Vec::new();
        let mut extra_samples = 0u32;
        for accession in collapsed {
            if let Some(dataset) = result.datasets.shift_remove(accession) {
                subsets.extend(dataset.subsets);
                extra_samples += dataset.sample_count.unwrap_or(0);
            }
            if let Some(record) = result.series.get_mut(series) {
                record.datasets.shift_remove(accession);
            }
        }
        for subset in &subsets {
            if let Some(subset) = result.subsets.get_mut(subset) {
                subset.dataset = Some(keep.clone());
            }
        }
        if let Some(dataset) = result.datasets.get_mut(keep) {
            dataset.subsets.extend(subsets);
            dataset.sample_count = Some(dataset.sample_count.unwrap_or(0) + extra_samples);
            let note = format!(
                "Note: this dataset was collapsed from {} sharing platform {platform}.",
                datasets.join(", ")
            );
            dataset.description = Some(match dataset.description.take() {
                Some(description) if !description.is_empty() => format!("{description} {note}"),
                _ => note,
            });
        }
    }
}

/// Guesses a descriptor for every quantitation type of every platform the series has values for.
fn guess_series_columns(
    result: &ParseResult,
    series: &str,
    rules: &QuantitationRules,
) -> IndexMap<String, Vec<GuessedColumn>> {
    let guesser = QuantitationGuesser::new(rules);
    let mut guessed = IndexMap::new();
    let Some(record) = result.series.get(series) else {
        return guessed;
    };
    let values = &record.values;

    for platform in values.platforms() {
        let design_elements = result
            .platforms
            .get(platform)
            .map(|p| p.design_elements())
            .unwrap_or(&[]);
        let mut columns = Vec::new();
        for index in values.quantitation_types(platform) {
            let Some(name) = values.quantitation_type_names(platform, index).first() else {
                continue;
            };
            let description = record
                .samples
                .iter()
                .filter_map(|sample| result.samples.get(sample))
                .filter(|sample| sample.first_platform() == Some(platform))
                .find_map(|sample| sample.columns.description_of(name));
            let example = design_elements
                .iter()
                .take(EXAMPLE_SCAN_LIMIT)
                .filter_map(|element| values.values(platform, index, element))
                .flat_map(|slots| slots.iter().flatten())
                .find(|value| !value.trim().is_empty())
                .map(|value| ExampleValue::from_raw(value));
            columns.push(GuessedColumn {
                index,
                descriptor: guesser.guess(name, description, example.as_ref()),
            });
        }
        guessed.insert(platform.to_string(), columns);
    }
    guessed
}
