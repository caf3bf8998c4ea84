use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{IngestSummary, ProgressEvent, ProgressSink};
use crate::model::ParseResult;
use crate::quantitation::QuantitationType;
use crate::store::Metadata;

/// Record counts and accessions of a parse, for the `parse` command.
#[derive(Debug, Clone, Serialize)]
pub struct ParseSummary {
    pub platforms: Vec<String>,
    pub series: Vec<String>,
    pub datasets: Vec<String>,
    pub subsets: usize,
    pub samples: usize,
    pub samples_without_data: Vec<String>,
}

impl ParseSummary {
    pub fn from_result(result: &ParseResult) -> Self {
        Self {
            platforms: result.platforms.keys().cloned().collect(),
            series: result.series.keys().cloned().collect(),
            datasets: result.datasets.keys().cloned().collect(),
            subsets: result.subsets.len(),
            samples: result.samples.len(),
            samples_without_data: result
                .samples
                .values()
                .filter(|sample| sample.might_not_have_data_in_file)
                .map(|sample| sample.accession.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrespondenceReport {
    pub series: String,
    pub groups: Vec<Vec<CorrespondenceMember>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrespondenceMember {
    pub accession: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheListing {
    pub cache_root: String,
    pub entries: Vec<Metadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub cleared: bool,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_parse(summary: &ParseSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_correspondence(reports: &[CorrespondenceReport]) -> io::Result<()> {
        Self::print_json(&reports)
    }

    pub fn print_guess(descriptor: &QuantitationType) -> io::Result<()> {
        Self::print_json(descriptor)
    }

    pub fn print_ingest(summaries: &[IngestSummary]) -> io::Result<()> {
        Self::print_json(&summaries)
    }

    pub fn print_list(listing: &CacheListing) -> io::Result<()> {
        Self::print_json(listing)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Reports progress events through the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}
