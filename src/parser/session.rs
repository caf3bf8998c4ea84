//! State for one pass over a SOFT file.

use std::collections::HashSet;
use std::io::BufRead;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, error, info, warn};

use crate::error::KiraError;
use crate::model::{Dataset, ParseResult, Platform, Sample, Series, Subset};

use super::CancellationToken;
use super::columns::ColumnRouter;
use super::dispatch::{self, KeyLine, parse_error};

const MAX_WARNINGS: usize = 100;
const CANCELLATION_CHECK_INTERVAL: usize = 20_000;

/// The kind of record the current line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Section {
    #[default]
    None,
    Database,
    Sample,
    Platform,
    Series,
    Dataset,
    Subset,
}

pub(crate) struct ParseSession {
    result: ParseResult,
    router: ColumnRouter,
    platforms_only: bool,
    section: Section,
    in_platform_table: bool,
    in_sample_table: bool,
    in_series_table: bool,
    in_dataset_table: bool,
    have_read_platform_header: bool,
    have_read_sample_header: bool,
    current_sample: Option<String>,
    current_platform: Option<String>,
    current_series: Option<String>,
    current_dataset: Option<String>,
    current_subset: Option<String>,
    previous_token_count: Option<usize>,
    warnings: usize,
    processed_design_elements: HashSet<String>,
    line_number: usize,
    parsed_lines: usize,
    platform_lines: usize,
    sample_data_lines: usize,
}

impl ParseSession {
    pub(crate) fn new(result: ParseResult, mut router: ColumnRouter, platforms_only: bool) -> Self {
        router.reset_warnings();
        Self {
            result,
            router,
            platforms_only,
            section: Section::None,
            in_platform_table: false,
            in_sample_table: false,
            in_series_table: false,
            in_dataset_table: false,
            have_read_platform_header: false,
            have_read_sample_header: false,
            current_sample: None,
            current_platform: None,
            current_series: None,
            current_dataset: None,
            current_subset: None,
            previous_token_count: None,
            warnings: 0,
            processed_design_elements: HashSet::new(),
            line_number: 0,
            parsed_lines: 0,
            platform_lines: 0,
            sample_data_lines: 0,
        }
    }

    pub(crate) fn into_parts(self) -> (ParseResult, ColumnRouter) {
        (self.result, self.router)
    }

    /// Reads every line, then tidies up. The reader is dropped on return, cancelled or not.
    pub(crate) fn run<R: BufRead>(
        &mut self,
        mut reader: R,
        token: &CancellationToken,
        progress: &AtomicUsize,
    ) -> Result<(), KiraError> {
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            let read = reader
                .read_until(b'\n', &mut buffer)
                .map_err(|err| KiraError::Io(err.to_string()))?;
            if read == 0 {
                break;
            }
            self.line_number += 1;
            let text = String::from_utf8_lossy(&buffer);
            let line = text.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }

            if let Err(err) = self.parse_line(line) {
                let err = self.locate(err);
                error!("Parsing failed: {err}");
                return Err(err);
            }

            self.parsed_lines += 1;
            progress.store(self.parsed_lines, Ordering::Relaxed);
            if self.parsed_lines % CANCELLATION_CHECK_INTERVAL == 0 && token.is_cancelled() {
                drop(reader);
                error!("Parsing was cancelled after {} lines", self.parsed_lines);
                return Err(KiraError::Cancelled);
            }
        }

        self.tidy_up();
        debug!(
            platform_lines = self.platform_lines,
            sample_data_lines = self.sample_data_lines,
            "parsed {} lines",
            self.parsed_lines
        );
        Ok(())
    }

    fn locate(&self, err: KiraError) -> KiraError {
        match err {
            KiraError::Parse { line: 0, message } => KiraError::Parse {
                line: self.line_number,
                message,
            },
            other => other,
        }
    }

    fn parse_line(&mut self, line: &str) -> Result<(), KiraError> {
        if line.starts_with('^') {
            self.parse_section_header(line)
        } else if line.starts_with('!') {
            self.parse_key_line(line)
        } else if line.starts_with('#') {
            self.parse_column_line(line)
        } else if self.in_platform_table {
            self.parse_platform_data_line(line);
            Ok(())
        } else if self.in_sample_table {
            self.parse_sample_data_line(line)
        } else if self.in_series_table || self.in_dataset_table {
            // these tables repeat the sample data
            Ok(())
        } else {
            Ok(())
        }
    }

    fn parse_section_header(&mut self, line: &str) -> Result<(), KiraError> {
        let lowered = line.to_ascii_lowercase();
        let section = if lowered.starts_with("^database") {
            Section::Database
        } else if lowered.starts_with("^sample") {
            Section::Sample
        } else if lowered.starts_with("^platform") {
            Section::Platform
        } else if lowered.starts_with("^series") {
            Section::Series
        } else if lowered.starts_with("^dataset") {
            Section::Dataset
        } else if lowered.starts_with("^subset") {
            Section::Subset
        } else {
            error!("Unknown section: {line}");
            return Ok(());
        };

        self.section = section;
        if section == Section::Sample {
            self.processed_design_elements.clear();
        }
        if section == Section::Database {
            return Ok(());
        }
        if self.platforms_only && section != Section::Platform {
            return Ok(());
        }

        let accession = KeyLine::new(line)
            .value
            .filter(|value| !value.is_empty())
            .ok_or_else(|| parse_error(format!("section header without accession: '{line}'")))?
            .to_string();

        match section {
            Section::Sample => {
                debug!("Starting new sample {accession}");
                self.set_current_sample(&accession);
            }
            Section::Platform => {
                if !self.result.platforms.contains_key(&accession) {
                    info!("Starting platform {accession}");
                }
                self.set_current_platform(&accession);
            }
            Section::Series => {
                debug!("In series {accession}");
                self.set_current_series(&accession);
            }
            Section::Dataset => {
                debug!("In dataset {accession}");
                self.result.dataset_or_insert(&accession);
                self.current_dataset = Some(accession);
            }
            Section::Subset => {
                let dataset = self
                    .current_dataset
                    .clone()
                    .ok_or_else(|| parse_error(format!("subset {accession} outside a dataset")))?;
                let subset = self.result.subset_or_insert(&accession);
                subset.dataset.get_or_insert_with(|| dataset.clone());
                let owner = self.result.dataset_or_insert(&dataset);
                if !owner.subsets.contains(&accession) {
                    owner.subsets.push(accession.clone());
                }
                debug!("In subset {accession}");
                self.current_subset = Some(accession);
            }
            Section::Database | Section::None => {}
        }
        Ok(())
    }

    fn parse_key_line(&mut self, line: &str) -> Result<(), KiraError> {
        match self.section {
            Section::None => return Err(parse_error(format!("unknown flag outside any section: '{line}'"))),
            Section::Database => return Ok(()),
            Section::Dataset => self.in_dataset_table = true,
            _ => {}
        }
        if self.platforms_only && self.section != Section::Platform {
            return Ok(());
        }

        let key_line = KeyLine::new(line);
        match dispatch::handler_for(self.section, line) {
            Some(handler) => handler(self, &key_line),
            None => {
                error!("Unknown flag in {:?}: {line}", self.section);
                Ok(())
            }
        }
    }

    fn parse_column_line(&mut self, line: &str) -> Result<(), KiraError> {
        let fixed = &line[1..];
        let pair = fixed
            .split_once('=')
            .map(|(name, description)| (name.trim().to_string(), description.trim().to_string()));

        match self.section {
            Section::Subset => Ok(()),
            Section::None | Section::Database => {
                Err(parse_error(format!("column line outside a record: '{line}'")))
            }
            _ if self.platforms_only && self.section != Section::Platform => Ok(()),
            Section::Dataset => {
                let (name, description) = pair.ok_or_else(|| {
                    parse_error(format!("invalid column line in dataset, expected '=': '{line}'"))
                })?;
                self.dataset_mut()?.columns.add(&name, &description);
                if name.starts_with("GSM") {
                    self.ensure_sample(&name);
                    if !description.trim().is_empty() {
                        let title = description
                            .find(':')
                            .and_then(|idx| description.get(idx + 2..))
                            .unwrap_or(&description)
                            .to_string();
                        self.result.sample_or_insert(&name).title_in_dataset = Some(title);
                    }
                }
                Ok(())
            }
            section => {
                let Some((name, description)) = pair else {
                    warn!("Invalid key-value line, expected an '=' somewhere, got: '{line}'");
                    return Ok(());
                };
                let columns = match section {
                    Section::Platform => &mut self.platform_mut()?.columns,
                    Section::Sample => &mut self.sample_mut()?.columns,
                    _ => &mut self.series_mut()?.columns,
                };
                columns.add(&name, &description);
                Ok(())
            }
        }
    }

    fn parse_platform_data_line(&mut self, line: &str) {
        if !self.have_read_platform_header {
            self.have_read_platform_header = true;
            return;
        }
        let Some(accession) = self.current_platform.clone() else {
            return;
        };
        let tokens: Vec<&str> = line.split('\t').collect();
        let platform = self.result.platform_or_insert(&accession);
        let expected = platform.columns.names.len();
        if tokens.len() != expected {
            if self.warnings < MAX_WARNINGS {
                warn!(
                    "Wrong number of tokens in line ({}, expected {expected}), line was '{line}'; possible corrupt file or invalid format?",
                    tokens.len()
                );
                self.note_warning();
            }
            return;
        }
        let platform = self.result.platform_or_insert(&accession);
        for (name, token) in platform.columns.names.iter().zip(tokens) {
            platform
                .column_data
                .entry(name.clone())
                .or_default()
                .push(token.to_string());
        }
        self.platform_lines += 1;
    }

    fn parse_sample_data_line(&mut self, line: &str) -> Result<(), KiraError> {
        if !self.have_read_sample_header {
            self.have_read_sample_header = true;
            self.previous_token_count = None;
            return self.initialize_quantitation_types();
        }

        let Some(sample) = self.current_sample.clone() else {
            return Ok(());
        };
        if !self.result.sample_has_usable_data(&sample) {
            return Ok(());
        }

        let tokens: Vec<&str> = line.split('\t').collect();
        if tokens.len() <= 1 {
            if self.warnings < MAX_WARNINGS {
                error!(
                    "Parse error, sample data line has too few elements ({}), line was '{line}'",
                    tokens.len()
                );
                self.note_warning();
            }
            return Ok(());
        }

        if let Some(previous) = self.previous_token_count {
            if previous != tokens.len() {
                warn!(
                    "Last line had {} quantitation types, this one has {}",
                    previous.saturating_sub(1),
                    tokens.len() - 1
                );
            }
        }
        self.previous_token_count = Some(tokens.len());

        let Some(series) = self.current_series.clone() else {
            return Ok(());
        };
        let Some(platform) = self
            .result
            .samples
            .get(&sample)
            .and_then(|record| record.first_platform())
            .map(str::to_string)
        else {
            return Ok(());
        };
        let Some(series) = self.result.series.get_mut(&series) else {
            return Ok(());
        };

        let design_element = tokens[0];
        for (i, value) in tokens.iter().enumerate().skip(1) {
            let target = self.router.target(i as i32 - 1);
            if !self.router.is_wanted(target) {
                continue;
            }
            series
                .values
                .add_value(&sample, &platform, target, design_element, value);
            self.processed_design_elements.insert(design_element.to_string());
        }
        self.sample_data_lines += 1;
        Ok(())
    }

    fn note_warning(&mut self) {
        self.warnings += 1;
        if self.warnings == MAX_WARNINGS {
            warn!("Further warnings suppressed");
        }
    }

    /// Sets up column routing for the current sample; runs once per sample table.
    pub(crate) fn initialize_quantitation_types(&mut self) -> Result<(), KiraError> {
        let Some(sample_accession) = self.current_sample.clone() else {
            return Err(parse_error("sample table outside a sample"));
        };
        let Some(series_accession) = self.current_series.clone() else {
            debug!("No series is being parsed, data for {sample_accession} will be ignored");
            return Ok(());
        };

        let platform_accession = self.platform_for_sample(&sample_accession, &series_accession)?;

        let ParseResult {
            samples,
            platforms,
            series,
            ..
        } = &mut self.result;
        let sample = samples
            .get_mut(&sample_accession)
            .ok_or_else(|| parse_error(format!("unknown sample {sample_accession}")))?;
        let platform = platforms
            .get_mut(&platform_accession)
            .ok_or_else(|| parse_error(format!("unknown platform {platform_accession}")))?;
        let series = series
            .get_mut(&series_accession)
            .ok_or_else(|| parse_error(format!("unknown series {series_accession}")))?;

        if sample.platforms.len() > 1 {
            warn!("Multiple platforms for {sample_accession}");
        }
        if sample.columns.is_empty() {
            series.values.add_sample(sample, platform);
        }

        let names = sample.columns.names.clone();
        self.router
            .begin_sample(&sample_accession, &platform_accession, &names, &mut series.values)
    }

    /// The sample's first platform. A sample that never named one falls back to the series'
    /// only platform.
    fn platform_for_sample(&mut self, sample: &str, series: &str) -> Result<String, KiraError> {
        if let Some(platform) = self
            .result
            .samples
            .get(sample)
            .and_then(|record| record.first_platform())
        {
            return Ok(platform.to_string());
        }

        let candidates: Vec<String> = match self.result.series.get(series) {
            Some(record) if !record.platforms.is_empty() => record.platforms.clone(),
            _ => self.result.platforms.keys().cloned().collect(),
        };
        match candidates.as_slice() {
            [only] => {
                warn!("Sample {sample} names no platform, assuming {only}");
                let only = only.clone();
                self.result.platform_or_insert(&only);
                self.result.sample_or_insert(sample).add_platform(&only);
                Ok(only)
            }
            _ => Err(parse_error(format!("sample {sample} has no platform"))),
        }
    }

    pub(crate) fn begin_sample_table(&mut self) {
        self.in_sample_table = true;
        self.have_read_sample_header = false;
    }

    pub(crate) fn end_sample_table(&mut self) -> Result<(), KiraError> {
        self.check_data_completeness()?;
        self.in_sample_table = false;
        Ok(())
    }

    pub(crate) fn begin_platform_table(&mut self) {
        self.in_platform_table = true;
        self.have_read_platform_header = false;
    }

    pub(crate) fn end_platform_table(&mut self) {
        self.in_platform_table = false;
    }

    pub(crate) fn set_series_table(&mut self, active: bool) {
        self.in_series_table = active;
    }

    pub(crate) fn set_dataset_table(&mut self, active: bool) {
        self.in_dataset_table = active;
    }

    /// Backfills design elements the sample table skipped, then validates the values store.
    pub(crate) fn check_data_completeness(&mut self) -> Result<(), KiraError> {
        let Some(sample) = self.current_sample.clone() else {
            return Ok(());
        };
        let platform_count = self
            .result
            .samples
            .get(&sample)
            .map(|record| record.platforms.len())
            .unwrap_or(0);
        if platform_count > 1 {
            warn!("Can't check for data completeness when sample uses more than one platform.");
        } else {
            self.add_missing_data(&sample);
        }

        if let Some(series) = self
            .current_series
            .as_ref()
            .and_then(|accession| self.result.series.get_mut(accession))
        {
            series.values.validate()?;
        }
        Ok(())
    }

    fn add_missing_data(&mut self, sample: &str) {
        if !self.result.sample_has_usable_data(sample) {
            info!("Sample {sample} is not expected to have any data");
            return;
        }
        let Some(record) = self.result.samples.get(sample) else {
            return;
        };
        if record.might_not_have_data_in_file {
            info!("Sample {sample} might not have any data, skipping missing data fill-in");
            return;
        }
        let Some(platform) = record.first_platform().map(str::to_string) else {
            return;
        };
        let Some(series) = self.current_series.clone() else {
            return;
        };

        let ParseResult {
            platforms, series: all_series, ..
        } = &mut self.result;
        let (Some(platform_record), Some(series_record)) =
            (platforms.get(&platform), all_series.get_mut(&series))
        else {
            return;
        };

        let indices = series_record.values.quantitation_types(&platform);
        let mut missing = 0usize;
        let mut last_missing = None;
        for element in platform_record.design_elements() {
            if self.processed_design_elements.contains(element) {
                continue;
            }
            missing += 1;
            last_missing = Some(element.as_str());
            for index in &indices {
                series_record
                    .values
                    .add_value(sample, &platform, *index, element, " ");
            }
        }
        if missing > 0 {
            warn!(
                "Added data missing for {missing} probes for sample={sample} on {platform}; last probe with missing data was {}",
                last_missing.unwrap_or_default()
            );
        }
    }

    /// Samples without column names borrow them from the first sample that has some.
    fn tidy_up(&mut self) {
        let Some(representative) = self
            .result
            .samples
            .values()
            .find(|sample| !sample.columns.is_empty())
            .map(|sample| sample.columns.clone())
        else {
            return;
        };
        for sample in self.result.samples.values_mut() {
            if sample.columns.is_empty() {
                sample.columns = representative.clone();
            }
        }
    }

    pub(crate) fn current_sample(&self) -> Option<&str> {
        self.current_sample.as_deref()
    }

    pub(crate) fn set_current_sample(&mut self, accession: &str) {
        self.ensure_sample(accession);
        self.current_sample = Some(accession.to_string());
    }

    pub(crate) fn set_current_platform(&mut self, accession: &str) {
        self.result.platform_or_insert(accession);
        self.current_platform = Some(accession.to_string());
    }

    pub(crate) fn set_current_series(&mut self, accession: &str) {
        self.result.series_or_insert(accession);
        self.current_series = Some(accession.to_string());
    }

    pub(crate) fn ensure_sample(&mut self, accession: &str) {
        if !self.result.samples.contains_key(accession) {
            debug!("Adding new sample {accession}");
            self.result.sample_or_insert(accession);
        }
    }

    pub(crate) fn sample_mut(&mut self) -> Result<&mut Sample, KiraError> {
        let accession = self
            .current_sample
            .as_ref()
            .ok_or_else(|| parse_error("no sample is being parsed"))?;
        self.result
            .samples
            .get_mut(accession)
            .ok_or_else(|| parse_error(format!("unknown sample {accession}")))
    }

    pub(crate) fn platform_mut(&mut self) -> Result<&mut Platform, KiraError> {
        let accession = self
            .current_platform
            .as_ref()
            .ok_or_else(|| parse_error("no platform is being parsed"))?;
        self.result
            .platforms
            .get_mut(accession)
            .ok_or_else(|| parse_error(format!("unknown platform {accession}")))
    }

    pub(crate) fn series_mut(&mut self) -> Result<&mut Series, KiraError> {
        let accession = self
            .current_series
            .as_ref()
            .ok_or_else(|| parse_error("no series is being parsed"))?;
        self.result
            .series
            .get_mut(accession)
            .ok_or_else(|| parse_error(format!("unknown series {accession}")))
    }

    pub(crate) fn dataset_mut(&mut self) -> Result<&mut Dataset, KiraError> {
        let accession = self
            .current_dataset
            .as_ref()
            .ok_or_else(|| parse_error("no dataset is being parsed"))?;
        self.result
            .datasets
            .get_mut(accession)
            .ok_or_else(|| parse_error(format!("unknown dataset {accession}")))
    }

    pub(crate) fn subset_mut(&mut self) -> Result<&mut Subset, KiraError> {
        let accession = self
            .current_subset
            .as_ref()
            .ok_or_else(|| parse_error("no subset is being parsed"))?;
        self.result
            .subsets
            .get_mut(accession)
            .ok_or_else(|| parse_error(format!("unknown subset {accession}")))
    }

    /// `!Sample_platform_id`: links the platform, declaring it if the file has not yet.
    pub(crate) fn link_sample_platform(&mut self, platform: &str) -> Result<(), KiraError> {
        if !self.result.platforms.contains_key(platform) {
            debug!("Platform {platform} referenced before its section");
            self.result.platform_or_insert(platform);
        }
        self.sample_mut()?.add_platform(platform);
        Ok(())
    }

    /// `!Sample_series_id`: the sample joins the series if that series is known.
    pub(crate) fn link_sample_series(&mut self, series: &str) -> Result<(), KiraError> {
        let sample = self.sample_mut()?;
        if !sample.series_appears_in.iter().any(|known| known == series) {
            sample.series_appears_in.push(series.to_string());
        }
        let accession = sample.accession.clone();
        if let Some(record) = self.result.series.get_mut(series) {
            record.add_sample(&accession);
        }
        Ok(())
    }

    pub(crate) fn add_series_sample(&mut self, sample: &str) -> Result<(), KiraError> {
        self.ensure_sample(sample);
        debug!("Adding sample {sample} to series");
        self.series_mut()?.add_sample(sample);
        Ok(())
    }

    pub(crate) fn link_dataset_platform(&mut self, platform: &str) -> Result<(), KiraError> {
        self.result.platform_or_insert(platform);
        self.dataset_mut()?.platform = Some(platform.to_string());
        Ok(())
    }

    /// `!dataset_reference_series`: only series that already have samples are attached.
    pub(crate) fn link_dataset_series(&mut self, series: &str) -> Result<(), KiraError> {
        let dataset = self.dataset_mut()?;
        if !dataset.reference_series.iter().any(|known| known == series) {
            dataset.reference_series.push(series.to_string());
        }
        let has_samples = !self.result.series_or_insert(series).samples.is_empty();
        if has_samples {
            self.dataset_mut()?.add_series(series);
        } else {
            warn!("Empty series {series}");
        }
        Ok(())
    }
}
