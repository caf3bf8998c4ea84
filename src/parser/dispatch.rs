//! Ordered key tables for `!` lines, one per section.
//!
//! Keys are matched as case-insensitive prefixes of the line and the first match wins, so a key
//! that is a prefix of another (`!Sample_label` / `!Sample_label_protocol`) must come after it.

use once_cell::sync::Lazy;
use tracing::{debug, error, info, warn};

use crate::domain::{LibrarySource, LibraryStrategy, SampleType};
use crate::error::KiraError;
use crate::model::Contact;

use super::session::{ParseSession, Section};

/// One `!Key = Value` line.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyLine<'a> {
    pub(crate) key: &'a str,
    pub(crate) value: Option<&'a str>,
}

impl<'a> KeyLine<'a> {
    pub(crate) fn new(line: &'a str) -> Self {
        match line.split_once('=') {
            Some((key, value)) => Self {
                key: key.trim(),
                value: Some(value.trim()),
            },
            None => Self {
                key: line.trim(),
                value: None,
            },
        }
    }

    fn text(&self) -> Option<String> {
        self.value.map(str::to_string)
    }

    /// Channel number from a `_chN` suffix; 1 when absent.
    fn channel(&self) -> usize {
        let lowered = self.key.to_ascii_lowercase();
        lowered
            .rfind("_ch")
            .and_then(|idx| lowered[idx + 3..].chars().next())
            .and_then(|c| c.to_digit(10))
            .map(|digit| digit as usize)
            .unwrap_or(1)
    }

    /// The number after the last `_` of the key, as in `!Series_variable_2`.
    fn trailing_number(&self) -> Result<u32, KiraError> {
        self.key
            .rsplit('_')
            .next()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| parse_error(format!("expected a trailing number in '{}'", self.key)))
    }

    fn number<T: std::str::FromStr>(&self) -> Result<T, KiraError> {
        let raw = self.value.unwrap_or_default();
        raw.parse()
            .map_err(|_| parse_error(format!("expected a number for {}, got '{raw}'", self.key)))
    }

    fn list(&self) -> Vec<String> {
        self.value
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub(crate) type Handler = fn(&mut ParseSession, &KeyLine<'_>) -> Result<(), KiraError>;

type KeyTable = Vec<(&'static str, Handler)>;

fn key(prefix: &'static str, handler: Handler) -> (&'static str, Handler) {
    (prefix, handler)
}

fn noop(_: &mut ParseSession, _: &KeyLine<'_>) -> Result<(), KiraError> {
    Ok(())
}

/// Parse failure whose line number is filled in by the session.
pub(crate) fn parse_error(message: impl Into<String>) -> KiraError {
    KiraError::Parse {
        line: 0,
        message: message.into(),
    }
}

fn append(target: &mut Option<String>, value: Option<&str>) {
    let Some(value) = value else {
        return;
    };
    match target {
        Some(existing) => {
            existing.push(' ');
            existing.push_str(value);
        }
        None => *target = Some(value.to_string()),
    }
}

fn append_text(target: &mut String, value: Option<&str>) {
    let Some(value) = value else {
        return;
    };
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(value);
}

fn push(target: &mut Vec<String>, value: Option<&str>) {
    if let Some(value) = value {
        target.push(value.to_string());
    }
}

fn set_contact(contact: &mut Contact, line: &KeyLine<'_>) {
    let lowered = line.key.to_ascii_lowercase();
    let field = lowered.split_once("_contact_").map(|(_, field)| field).unwrap_or_default();
    let slot = match field {
        "name" => &mut contact.name,
        "email" => &mut contact.email,
        "institute" => &mut contact.institute,
        "laboratory" => &mut contact.laboratory,
        "department" => &mut contact.department,
        "address" => &mut contact.address,
        "city" => &mut contact.city,
        "state" => &mut contact.state,
        "country" => &mut contact.country,
        "zip/postal_code" => &mut contact.postal_code,
        "phone" => &mut contact.phone,
        "fax" => &mut contact.fax,
        "web_link" => &mut contact.web_link,
        _ => {
            error!("Unknown contact field: {}", line.key);
            return;
        }
    };
    *slot = line.text();
}

static SAMPLE_KEYS: Lazy<KeyTable> = Lazy::new(|| {
    vec![
        key("!sample_table_begin", |s, _| {
            s.begin_sample_table();
            Ok(())
        }),
        key("!sample_table_end", |s, _| s.end_sample_table()),
        key("!sample_title", |s, l| {
            s.sample_mut()?.title = l.text();
            Ok(())
        }),
        key("!sample_geo_accession", |s, l| {
            let accession = l.value.ok_or_else(|| parse_error("sample without accession"))?;
            s.set_current_sample(accession);
            Ok(())
        }),
        key("!sample_status", |s, l| {
            s.sample_mut()?.status = l.text();
            Ok(())
        }),
        key("!sample_submission_date", |s, l| {
            s.sample_mut()?.submission_date = l.text();
            Ok(())
        }),
        key("!sample_channel_count", |s, l| {
            let count: usize = l.number()?;
            s.sample_mut()?.channel_mut(count);
            Ok(())
        }),
        key("!sample_source_name", |s, l| {
            let channel = l.channel();
            s.sample_mut()?.channel_mut(channel).source_name = l.text();
            Ok(())
        }),
        key("!sample_organism", |s, l| {
            let channel = l.channel();
            s.sample_mut()?.channel_mut(channel).organism = l.text();
            Ok(())
        }),
        key("!sample_biomaterial_provider", |s, l| {
            let channel = l.channel();
            s.sample_mut()?.channel_mut(channel).bio_material_provider = l.text();
            Ok(())
        }),
        key("!sample_treatment_protocol", |s, l| {
            let channel = l.channel();
            append(&mut s.sample_mut()?.channel_mut(channel).treatment_protocol, l.value);
            Ok(())
        }),
        key("!sample_molecule", |s, l| {
            let channel = l.channel();
            s.sample_mut()?.channel_mut(channel).molecule = l.text();
            Ok(())
        }),
        key("!sample_growth_protocol", |s, l| {
            let channel = l.channel();
            append(&mut s.sample_mut()?.channel_mut(channel).growth_protocol, l.value);
            Ok(())
        }),
        key("!sample_extract_protocol", |s, l| {
            let channel = l.channel();
            append(&mut s.sample_mut()?.channel_mut(channel).extract_protocol, l.value);
            Ok(())
        }),
        key("!sample_hyb_protocol", |s, l| {
            append(&mut s.sample_mut()?.hyb_protocol, l.value);
            Ok(())
        }),
        key("!sample_scan_protocol", |s, l| {
            append(&mut s.sample_mut()?.scan_protocol, l.value);
            Ok(())
        }),
        key("!sample_data_processing", |s, l| {
            append(&mut s.sample_mut()?.data_processing, l.value);
            Ok(())
        }),
        key("!sample_description", |s, l| {
            append_text(&mut s.sample_mut()?.description, l.value);
            Ok(())
        }),
        key("!sample_label_protocol", |s, l| {
            let channel = l.channel();
            s.sample_mut()?.channel_mut(channel).label_protocol = l.text();
            Ok(())
        }),
        key("!sample_label", |s, l| {
            let channel = l.channel();
            s.sample_mut()?.channel_mut(channel).label = l.text();
            Ok(())
        }),
        key("!sample_characteristics", |s, l| {
            let channel = l.channel();
            push(&mut s.sample_mut()?.channel_mut(channel).characteristics, l.value);
            Ok(())
        }),
        key("!sample_platform_id", |s, l| {
            let platform = l.value.ok_or_else(|| parse_error("platform id without value"))?;
            s.link_sample_platform(platform)
        }),
        key("!sample_contact_", |s, l| {
            set_contact(&mut s.sample_mut()?.contact, l);
            Ok(())
        }),
        key("!sample_series_id", |s, l| {
            let series = l.value.ok_or_else(|| parse_error("series id without value"))?;
            s.link_sample_series(series)
        }),
        key("!sample_supplementary_file", |s, l| {
            push(&mut s.sample_mut()?.supplementary_files, l.value);
            Ok(())
        }),
        key("!sample_last_update_date", |s, l| {
            s.sample_mut()?.last_update_date = l.text();
            Ok(())
        }),
        key("!sample_data_row_count", |s, l| {
            s.sample_mut()?.data_row_count = l.text();
            if l.value == Some("0") {
                warn!("No data for sample {}", s.current_sample().unwrap_or_default());
                s.initialize_quantitation_types()?;
                s.check_data_completeness()?;
            }
            Ok(())
        }),
        key("!sample_type", |s, l| {
            let sample_type: SampleType = l.value.unwrap_or_default().parse()?;
            s.sample_mut()?.sample_type = Some(sample_type);
            Ok(())
        }),
        key("!sample_comment", noop),
        key("!sample_taxid_ch", noop),
        key("!sample_relation", noop),
        key("!sample_instrument_model", noop),
        key("!sample_library_selection", noop),
        key("!sample_library_source", |s, l| {
            let source: LibrarySource = l.value.unwrap_or_default().parse()?;
            s.sample_mut()?.library_source = Some(source);
            Ok(())
        }),
        key("!sample_library_strategy", |s, l| {
            let strategy: LibraryStrategy = l.value.unwrap_or_default().parse()?;
            let sample = s.sample_mut()?;
            sample.library_strategy = Some(strategy);
            sample.might_not_have_data_in_file = true;
            Ok(())
        }),
        key("!sample_anchor", noop),
        key("!sample_tag_length", noop),
        key("!sample_tag_count", noop),
    ]
});

static PLATFORM_KEYS: Lazy<KeyTable> = Lazy::new(|| {
    vec![
        key("!platform_title", |s, l| {
            s.platform_mut()?.title = l.text();
            Ok(())
        }),
        key("!platform_geo_accession", |s, l| {
            let accession = l.value.ok_or_else(|| parse_error("platform without accession"))?;
            s.set_current_platform(accession);
            Ok(())
        }),
        key("!platform_status", |s, l| {
            s.platform_mut()?.status = l.text();
            Ok(())
        }),
        key("!platform_manufacturer", |s, l| {
            s.platform_mut()?.manufacturer = l.text();
            Ok(())
        }),
        key("!platform_manufacture_protocol", |s, l| {
            append(&mut s.platform_mut()?.manufacture_protocol, l.value);
            Ok(())
        }),
        key("!platform_submission_date", |s, l| {
            s.platform_mut()?.submission_date = l.text();
            Ok(())
        }),
        key("!platform_technology", |s, l| {
            s.platform_mut()?.technology = l.text();
            Ok(())
        }),
        key("!platform_distribution", |s, l| {
            s.platform_mut()?.distribution = l.text();
            Ok(())
        }),
        key("!platform_organism", |s, l| {
            if let Some(organism) = l.value {
                s.platform_mut()?.add_organism(organism);
            }
            Ok(())
        }),
        key("!platform_description", |s, l| {
            append_text(&mut s.platform_mut()?.description, l.value);
            Ok(())
        }),
        key("!platform_contact_", |s, l| {
            set_contact(&mut s.platform_mut()?.contact, l);
            Ok(())
        }),
        key("!platform_support", noop),
        key("!platform_coating", noop),
        key("!platform_web_link", |s, l| {
            s.platform_mut()?.web_link = l.text();
            Ok(())
        }),
        key("!platform_sample_id", noop),
        key("!platform_table_begin", |s, _| {
            s.begin_platform_table();
            Ok(())
        }),
        key("!platform_table_end", |s, _| {
            s.end_platform_table();
            Ok(())
        }),
        key("!platform_contributor", noop),
        key("!platform_series_id", noop),
        key("!platform_data_row_count", noop),
        key("!platform_catalog_number", noop),
        key("!platform_last_update_date", |s, l| {
            s.platform_mut()?.last_update_date = l.text();
            Ok(())
        }),
        key("!platform_supplementary_file", |s, l| {
            s.platform_mut()?.supplementary_file = l.text();
            Ok(())
        }),
        key("!platform_pubmed_id", noop),
        key("!platform_relation", noop),
        key("!platform_taxid", noop),
    ]
});

static SERIES_KEYS: Lazy<KeyTable> = Lazy::new(|| {
    vec![
        key("!series_title", |s, l| {
            s.series_mut()?.title = l.text();
            Ok(())
        }),
        key("!series_geo_accession", |s, l| {
            let accession = l.value.ok_or_else(|| parse_error("series without accession"))?;
            s.set_current_series(accession);
            Ok(())
        }),
        key("!series_status", |s, l| {
            s.series_mut()?.status = l.text();
            Ok(())
        }),
        key("!series_submission_date", |s, l| {
            s.series_mut()?.submission_date = l.text();
            Ok(())
        }),
        key("!series_pubmed_id", |s, l| {
            push(&mut s.series_mut()?.pubmed_ids, l.value);
            Ok(())
        }),
        key("!series_overall_design", |s, l| {
            append(&mut s.series_mut()?.overall_design, l.value);
            Ok(())
        }),
        key("!series_relation", |s, l| {
            let lowered = l.value.unwrap_or_default().to_lowercase();
            if lowered.starts_with("superseries") {
                info!(" ** SuperSeries detected **");
                s.series_mut()?.is_super_series = true;
            } else if lowered.starts_with("subseries") {
                info!(" ** Subseries detected **");
                s.series_mut()?.is_sub_series = true;
            }
            Ok(())
        }),
        key("!series_summary", series_summary),
        key("!series_type", |s, l| {
            push(&mut s.series_mut()?.series_types, l.value);
            Ok(())
        }),
        key("!series_contributor", |s, l| {
            let name = l
                .value
                .unwrap_or_default()
                .split(',')
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            s.series_mut()?.contributors.push(name);
            Ok(())
        }),
        key("!series_sample_id", |s, l| {
            let sample = l.value.ok_or_else(|| parse_error("sample id without value"))?;
            s.add_series_sample(sample)
        }),
        key("!series_contact_", |s, l| {
            set_contact(&mut s.series_mut()?.contact, l);
            Ok(())
        }),
        key("!series_platform_id", |s, l| {
            if let Some(platform) = l.value {
                let series = s.series_mut()?;
                if !series.platforms.iter().any(|known| known == platform) {
                    series.platforms.push(platform.to_string());
                }
            }
            Ok(())
        }),
        key("!series_table_begin", |s, _| {
            s.set_series_table(true);
            Ok(())
        }),
        key("!series_table_end", |s, _| {
            s.set_series_table(false);
            Ok(())
        }),
        key("!series_variable_description_", |s, l| {
            let number = l.trailing_number()?;
            s.series_mut()?.variable_mut(number).description = l.text();
            Ok(())
        }),
        key("!series_variable_sample_list_", |s, l| {
            let number = l.trailing_number()?;
            let samples = l.list();
            for sample in &samples {
                s.ensure_sample(sample);
            }
            s.series_mut()?.variable_mut(number).samples.extend(samples);
            Ok(())
        }),
        key("!series_variable_repeats_sample_list_", |s, l| {
            let number = l.trailing_number()?;
            let samples: Vec<String> = l
                .value
                .unwrap_or_default()
                .split([',', ' '])
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();
            for sample in &samples {
                s.ensure_sample(sample);
            }
            s.series_mut()?.replicate_mut(number).samples.extend(samples);
            Ok(())
        }),
        key("!series_variable_repeats_", |s, l| {
            let number = l.trailing_number()?;
            s.series_mut()?.replicate_mut(number).kind = l.text();
            Ok(())
        }),
        key("!series_web_link", noop),
        key("!series_variable_", |s, l| {
            let number = l.trailing_number()?;
            s.series_mut()?.variable_mut(number).kind = l.text();
            Ok(())
        }),
        key("!series_supplementary_file", |s, l| {
            push(&mut s.series_mut()?.supplementary_files, l.value);
            Ok(())
        }),
        key("!series_last_update_date", |s, l| {
            s.series_mut()?.last_update_date = l.text();
            Ok(())
        }),
        key("!series_citation", noop),
        key("!series_platform_taxid", noop),
        key("!series_sample_taxid", noop),
    ]
});

fn series_summary(s: &mut ParseSession, l: &KeyLine<'_>) -> Result<(), KiraError> {
    let value = l.value.unwrap_or_default();
    let lowered = value.to_lowercase();
    let series = s.series_mut()?;
    if lowered.starts_with("this superseries") {
        info!(" ** SuperSeries detected **");
        series.is_super_series = true;
    } else if lowered.starts_with("gse") && series.is_super_series {
        let (subseries, _) = value
            .split_once(':')
            .ok_or_else(|| parse_error(format!("expected a colon in '{value}'")))?;
        series.subseries.push(subseries.trim().to_string());
    } else if lowered.contains("keyword") {
        match value.split_once('=') {
            Some((_, keyword)) => series.keywords.push(keyword.trim().to_string()),
            None => append_text(&mut series.summary, Some(value)),
        }
    } else {
        append_text(&mut series.summary, Some(value));
    }
    Ok(())
}

static DATASET_KEYS: Lazy<KeyTable> = Lazy::new(|| {
    vec![
        key("!dataset_title", |s, l| {
            s.dataset_mut()?.title = l.text();
            Ok(())
        }),
        key("!dataset_description", |s, l| {
            append(&mut s.dataset_mut()?.description, l.value);
            Ok(())
        }),
        key("!dataset_maximum_probes", |s, l| {
            s.dataset_mut()?.maximum_probes = l.text();
            Ok(())
        }),
        key("!dataset_order", |s, l| {
            s.dataset_mut()?.order = l.text();
            Ok(())
        }),
        key("!dataset_organism", |s, l| {
            s.dataset_mut()?.organism = l.text();
            Ok(())
        }),
        key("!dataset_platform_organism", noop),
        key("!dataset_platform_technology_type", |s, l| {
            s.dataset_mut()?.platform_type = l.text();
            Ok(())
        }),
        key("!dataset_platform", |s, l| {
            let platform = l.value.ok_or_else(|| parse_error("dataset platform without value"))?;
            s.link_dataset_platform(platform)
        }),
        key("!dataset_probe_type", |s, l| {
            let dataset = s.dataset_mut()?;
            dataset.probe_type = l.text();
            if dataset.platform_type.is_none() {
                dataset.platform_type = l.text();
            }
            Ok(())
        }),
        key("!dataset_reference_series", |s, l| {
            let series = l.value.ok_or_else(|| parse_error("reference series without value"))?;
            s.link_dataset_series(series)
        }),
        key("!dataset_total_samples", dataset_sample_count),
        key("!dataset_sample_count", dataset_sample_count),
        key("!dataset_update_date", |s, l| {
            s.dataset_mut()?.update_date = l.text();
            Ok(())
        }),
        key("!dataset_value_type", |s, l| {
            s.dataset_mut()?.value_type = l.text();
            Ok(())
        }),
        key("!dataset_completeness", |s, l| {
            s.dataset_mut()?.completeness = l.text();
            Ok(())
        }),
        key("!dataset_experiment_type", |s, l| {
            s.dataset_mut()?.experiment_type = l.text();
            Ok(())
        }),
        key("!dataset_type", |s, l| {
            s.dataset_mut()?.dataset_type = l.text();
            Ok(())
        }),
        key("!dataset_feature_count", |s, l| {
            s.dataset_mut()?.feature_count = l.value.and_then(|raw| raw.parse().ok());
            Ok(())
        }),
        key("!dataset_sample_organism", |s, l| {
            s.dataset_mut()?.sample_organism = l.text();
            Ok(())
        }),
        key("!dataset_sample_type", |s, l| {
            s.dataset_mut()?.sample_type = l.text();
            Ok(())
        }),
        key("!dataset_pubmed_id", |s, l| {
            s.dataset_mut()?.pubmed_id = l.text();
            Ok(())
        }),
        key("!dataset_table_begin", |s, _| {
            s.set_dataset_table(true);
            Ok(())
        }),
        key("!dataset_table_end", |s, _| {
            s.set_dataset_table(false);
            Ok(())
        }),
        key("!dataset_channel_count", |s, l| {
            let count: u32 = l.number()?;
            s.dataset_mut()?.channel_count = Some(count);
            Ok(())
        }),
    ]
});

fn dataset_sample_count(s: &mut ParseSession, l: &KeyLine<'_>) -> Result<(), KiraError> {
    let count: Option<u32> = l.value.and_then(|raw| raw.parse().ok());
    if count.is_none() {
        warn!("Unreadable sample count: {:?}", l.value);
    }
    s.dataset_mut()?.sample_count = count;
    Ok(())
}

static SUBSET_KEYS: Lazy<KeyTable> = Lazy::new(|| {
    vec![
        key("!dataset_title", |s, l| {
            s.subset_mut()?.title = l.text();
            Ok(())
        }),
        key("!subset_dataset_id", |s, l| {
            s.subset_mut()?.dataset = l.text();
            Ok(())
        }),
        key("!subset_description", |s, l| {
            append_text(&mut s.subset_mut()?.description, l.value);
            Ok(())
        }),
        key("!subset_sample_id", |s, l| {
            for sample in l.list() {
                s.ensure_sample(&sample);
                debug!("Adding sample {sample} to subset");
                let subset = s.subset_mut()?;
                if !subset.samples.contains(&sample) {
                    subset.samples.push(sample);
                }
            }
            Ok(())
        }),
        key("!subset_type", |s, l| {
            s.subset_mut()?.subset_type = l.text();
            Ok(())
        }),
    ]
});

fn table_for(section: Section) -> Option<&'static KeyTable> {
    match section {
        Section::Sample => Some(&SAMPLE_KEYS),
        Section::Platform => Some(&PLATFORM_KEYS),
        Section::Series => Some(&SERIES_KEYS),
        Section::Dataset => Some(&DATASET_KEYS),
        Section::Subset => Some(&SUBSET_KEYS),
        Section::Database | Section::None => None,
    }
}

/// Finds the handler for a `!` line in the given section.
pub(crate) fn handler_for(section: Section, line: &str) -> Option<Handler> {
    let table = table_for(section)?;
    let lowered = line.to_ascii_lowercase();
    table
        .iter()
        .find(|(prefix, _)| lowered.starts_with(prefix))
        .map(|(_, handler)| *handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_line_splits_on_first_equals() {
        let line = KeyLine::new("!Sample_characteristics_ch2 = dose = 5 mg");
        assert_eq!(line.key, "!Sample_characteristics_ch2");
        assert_eq!(line.value, Some("dose = 5 mg"));
        assert_eq!(line.channel(), 2);
        assert_eq!(KeyLine::new("!sample_table_begin").value, None);
    }

    #[test]
    fn channel_defaults_to_one() {
        assert_eq!(KeyLine::new("!Sample_organism = Homo sapiens").channel(), 1);
        assert_eq!(KeyLine::new("!Sample_label_chx = Cy5").channel(), 1);
    }

    #[test]
    fn longer_keys_win_over_shared_prefixes() {
        let label = handler_for(Section::Sample, "!Sample_label_ch1 = Cy5").unwrap();
        let protocol = handler_for(Section::Sample, "!Sample_label_protocol_ch1 = kit").unwrap();
        assert_ne!(label as usize, protocol as usize);
        assert!(handler_for(Section::Sample, "!Sample_unheard_of = x").is_none());
        assert!(handler_for(Section::Database, "!Database_name = GEO").is_none());
    }

    #[test]
    fn trailing_variable_number() {
        assert_eq!(KeyLine::new("!Series_variable_12 = age").trailing_number().unwrap(), 12);
        assert!(KeyLine::new("!Series_variable_x = age").trailing_number().is_err());
    }
}
