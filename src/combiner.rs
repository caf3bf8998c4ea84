//! Lines up samples that hold the same biological material across the datasets (or platforms) of
//! a series, by comparing sample titles.

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::correspondence::SampleCorrespondence;
use crate::error::KiraError;
use crate::model::ParseResult;
use crate::string_distance::{
    common_prefix, common_suffix, edit_distance, prefix_weighted_hamming, suffix_weighted_hamming,
};

/// Normalized title distance above which two samples are never paired.
pub const SIMILARITY_THRESHOLD: f64 = 0.5;

const CHIP_BONUS: f64 = 1.0;

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[()\s\-._]").expect("punctuation pattern is valid"));

/// Chip-name fragments: a title containing the key may carry one of the tokens.
const CHIP_NAMES: &[(&str, &[&str])] = &[
    ("u133", &["u133a", "u133b"]),
    ("u95", &["u95a", "u95b", "u95c", "u95d", "u95e"]),
    ("u74", &["u74a", "u74b", "u74c"]),
    ("v2", &["av2"]),
    (
        "chip",
        &["chip a", "chip b", "chip c", "chipa", "chipb", "chipc"],
    ),
];

/// Per-sample facts gathered before matching, all in insertion order.
#[derive(Debug, Default)]
struct AccessionMaps {
    titles: IndexMap<String, String>,
    groups: IndexMap<String, String>,
    secondary_titles: HashMap<String, String>,
    organisms: HashMap<String, String>,
}

impl AccessionMaps {
    fn fill(&mut self, result: &ParseResult, sample: &str, group: &str) {
        let Some(record) = result.samples.get(sample) else {
            return;
        };
        if let Some(title) = record.title.as_deref().filter(|t| !t.trim().is_empty()) {
            self.titles.insert(sample.to_string(), title.to_string());
        }
        self.groups.insert(sample.to_string(), group.to_string());
        if let Some(secondary) = record.title_in_dataset.as_deref() {
            self.secondary_titles
                .insert(sample.to_string(), secondary.to_string());
        }
        let organism = record
            .first_platform()
            .and_then(|platform| result.platforms.get(platform))
            .and_then(|platform| platform.organisms.first())
            .filter(|organism| !organism.trim().is_empty());
        if let Some(organism) = organism {
            self.organisms.insert(sample.to_string(), organism.clone());
        }
    }

    fn lowered_title(&self, sample: &str) -> Option<String> {
        self.titles.get(sample).map(|t| t.to_lowercase())
    }

    fn lowered_secondary(&self, sample: &str) -> Option<String> {
        self.secondary_titles.get(sample).map(|t| t.to_lowercase())
    }

    fn same_organism(&self, a: &str, b: &str) -> bool {
        self.organisms.get(a) == self.organisms.get(b)
    }

    /// Groups by first appearance, then stable-sorted by ascending sample count.
    fn ordered_groups(&self) -> Vec<String> {
        let mut counts: IndexMap<&str, usize> = IndexMap::new();
        for group in self.groups.values() {
            *counts.entry(group.as_str()).or_default() += 1;
        }
        let mut ordered: Vec<(&str, usize)> = counts.into_iter().collect();
        ordered.sort_by_key(|(_, count)| *count);
        ordered
            .into_iter()
            .map(|(group, _)| group.to_string())
            .collect()
    }
}

/// Matching state shared by every target of one run.
#[derive(Default)]
struct MatchState {
    /// Sample -> groups it already has a partner in.
    locked: HashMap<String, HashSet<String>>,
    /// Samples that are settled for the rest of the run.
    settled: HashSet<String>,
}

impl MatchState {
    fn is_locked(&self, sample: &str, group: &str) -> bool {
        self.locked
            .get(sample)
            .map(|groups| groups.contains(group))
            .unwrap_or(false)
    }

    fn lock(&mut self, sample: &str, group: &str) {
        self.locked
            .entry(sample.to_string())
            .or_default()
            .insert(group.to_string());
    }
}

struct Target<'a> {
    accession: &'a str,
    group: &'a str,
    title: String,
    secondary: Option<String>,
    chip_tokens: HashSet<&'static str>,
}

#[derive(Debug, Clone, Copy)]
struct Affixes<'a> {
    prefix: Option<&'a str>,
    suffix: Option<&'a str>,
}

impl Affixes<'_> {
    fn trim(&self, title: &str) -> String {
        let mut trimmed = title;
        if let Some(prefix) = self.prefix {
            trimmed = trimmed.strip_prefix(prefix).unwrap_or(trimmed);
        }
        if let Some(suffix) = self.suffix {
            trimmed = trimmed.strip_suffix(suffix).unwrap_or(trimmed);
        }
        PUNCTUATION.replace_all(trimmed, "").into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preference {
    New,
    Old,
    Tied,
}

/// Decides between two candidates at the same title distance by their accessions.
fn break_tie(target: &str, old: &str, new: &str) -> Preference {
    let prefix_old = prefix_weighted_hamming(target, old);
    let prefix_new = prefix_weighted_hamming(target, new);
    if prefix_new < prefix_old {
        return Preference::New;
    }
    if prefix_new > prefix_old {
        return Preference::Old;
    }
    let suffix_old = suffix_weighted_hamming(target, old);
    let suffix_new = suffix_weighted_hamming(target, new);
    if suffix_new < suffix_old {
        Preference::New
    } else if suffix_new > suffix_old {
        Preference::Old
    } else {
        Preference::Tied
    }
}

/// Chip tokens (like `u133a`) appearing in a lower-cased title.
fn chip_tokens(title: &str) -> HashSet<&'static str> {
    CHIP_NAMES
        .iter()
        .filter(|(key, _)| title.contains(key))
        .flat_map(|(_, tokens)| tokens.iter().copied())
        .filter(|token| title.contains(token))
        .collect()
}

fn normalize(distance: f64, a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        0.0
    } else {
        distance / longest as f64
    }
}

pub fn meets_threshold(normalized_distance: f64) -> bool {
    normalized_distance <= SIMILARITY_THRESHOLD
}

/// Series samples that took no part in matching still get a group of their own.
fn add_unmatched(correspondence: &mut SampleCorrespondence, samples: &[String]) {
    for sample in samples {
        if !correspondence.contains(sample) {
            debug!("{sample} was not matched, giving it its own group");
            correspondence.add(sample, None);
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetCombiner {
    do_sample_matching: bool,
}

impl Default for DatasetCombiner {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DatasetCombiner {
    pub fn new(do_sample_matching: bool) -> Self {
        Self { do_sample_matching }
    }

    /// Lines up the samples of the given datasets.
    ///
    /// May repair a dataset whose platform no series sample uses, and gives platform-less samples
    /// their dataset's platform.
    pub fn find_gse_correspondence_for_datasets(
        &self,
        result: &mut ParseResult,
        datasets: &[String],
    ) -> Result<SampleCorrespondence, KiraError> {
        if datasets.is_empty() {
            return Err(KiraError::NoDatasets);
        }
        check_platforms_match_series(result, datasets)?;
        let maps = fill_from_datasets(result, datasets);
        self.find_correspondence(&maps, datasets.len())
    }

    /// Lines up the samples of a series, by dataset when it has any, else by platform.
    pub fn find_gse_correspondence(
        &self,
        result: &mut ParseResult,
        series: &str,
    ) -> Result<SampleCorrespondence, KiraError> {
        let Some(record) = result.series.get(series) else {
            return Err(KiraError::Correspondence(format!("unknown series {series}")));
        };
        let datasets: Vec<String> = record.datasets.iter().cloned().collect();
        let samples: Vec<String> = record.samples.iter().cloned().collect();

        if !datasets.is_empty() {
            let covered: HashSet<String> = datasets
                .iter()
                .filter_map(|dataset| result.datasets.get(dataset))
                .flat_map(|dataset| result.dataset_samples(dataset))
                .collect();
            let missed: Vec<&str> = samples
                .iter()
                .filter(|sample| !covered.contains(*sample))
                .map(String::as_str)
                .collect();
            if !missed.is_empty() {
                warn!(
                    "There were one or more samples missing from the datasets: {}",
                    missed.join(" | ")
                );
            }
            let mut correspondence = self.find_gse_correspondence_for_datasets(result, &datasets)?;
            add_unmatched(&mut correspondence, &samples);
            return Ok(correspondence);
        }

        let mut maps = AccessionMaps::default();
        for sample in &samples {
            let platform = result
                .samples
                .get(sample)
                .and_then(|record| record.first_platform())
                .map(str::to_string);
            match platform {
                Some(platform) => maps.fill(result, sample, &platform),
                None => warn!("{sample} has no platform, leaving it out of matching"),
            }
        }
        let platforms: IndexSet<&String> = maps.groups.values().collect();
        let count = platforms.len();
        let mut correspondence = self.find_correspondence(&maps, count)?;
        add_unmatched(&mut correspondence, &samples);
        Ok(correspondence)
    }

    fn find_correspondence(
        &self,
        maps: &AccessionMaps,
        group_count: usize,
    ) -> Result<SampleCorrespondence, KiraError> {
        let mut correspondence = SampleCorrespondence::new();
        correspondence.set_titles(maps.titles.clone());

        if group_count <= 1 || !self.do_sample_matching {
            debug!("Each bioassay will get a distinct biomaterial");
            for sample in maps.groups.keys() {
                correspondence.add(sample, None);
            }
            return Ok(correspondence);
        }

        let prefix = common_prefix(maps.titles.values().map(String::as_str)).map(|p| {
            debug!("Common prefix = {p}");
            p.to_lowercase()
        });
        let suffix = common_suffix(maps.titles.values().map(String::as_str)).map(|s| {
            debug!("Common suffix = {s}");
            s.to_lowercase()
        });
        let affixes = Affixes {
            prefix: prefix.as_deref().filter(|p| !p.is_empty()),
            suffix: suffix.as_deref().filter(|s| !s.is_empty()),
        };

        let mut accessions: Vec<&str> = maps.groups.keys().map(String::as_str).collect();
        accessions.sort_unstable();
        let groups = maps.ordered_groups();
        debug!("{} groups", groups.len());

        let mut state = MatchState::default();
        for group_a in &groups {
            debug!("Finding matches for samples in {group_a}");
            for &accession in &accessions {
                if maps.groups.get(accession) != Some(group_a) {
                    continue;
                }
                if state.settled.contains(accession) {
                    continue;
                }
                let Some(title) = maps.lowered_title(accession) else {
                    continue;
                };
                let target = Target {
                    accession,
                    group: group_a,
                    chip_tokens: chip_tokens(&title),
                    secondary: maps.lowered_secondary(accession),
                    title,
                };
                for group_b in &groups {
                    if group_b == group_a || state.is_locked(accession, group_b) {
                        continue;
                    }
                    self.match_into_group(
                        maps,
                        &accessions,
                        affixes,
                        &target,
                        group_b,
                        &mut state,
                        &mut correspondence,
                    )?;
                }
            }
        }

        // untitled samples never take part in matching but still need a group
        for sample in maps.groups.keys() {
            if !correspondence.contains(sample) {
                correspondence.add(sample, None);
            }
        }

        debug!("{correspondence}");
        Ok(correspondence)
    }

    #[allow(clippy::too_many_arguments)]
    fn match_into_group(
        &self,
        maps: &AccessionMaps,
        accessions: &[&str],
        affixes: Affixes<'_>,
        target: &Target<'_>,
        group_b: &str,
        state: &mut MatchState,
        correspondence: &mut SampleCorrespondence,
    ) -> Result<(), KiraError> {
        let mut best: Option<(&str, f64)> = None;
        let mut tied = false;
        let mut tested = 0usize;

        for &candidate in accessions {
            if state.settled.contains(candidate)
                || maps.groups.get(candidate).map(String::as_str) != Some(group_b)
                || state.is_locked(candidate, target.group)
                || !maps.same_organism(target.accession, candidate)
            {
                continue;
            }
            tested += 1;
            let Some(test_title) = maps.lowered_title(candidate) else {
                continue;
            };
            if target.title.trim().is_empty() || test_title.trim().is_empty() {
                return Err(KiraError::Correspondence(format!(
                    "blank title for {} or {candidate}",
                    target.accession
                )));
            }

            let mut tokens = target.chip_tokens.clone();
            tokens.extend(chip_tokens(&test_title));
            let bonus = if tokens.iter().any(|token| test_title.contains(token)) {
                debug!("{test_title} gets a bonus in matching {}", target.title);
                CHIP_BONUS
            } else {
                0.0
            };

            let trimmed_target = affixes.trim(&target.title);
            let trimmed_test = affixes.trim(&test_title);
            let mut distance = edit_distance(&trimmed_target, &trimmed_test) as f64 - bonus;
            let mut normalized = normalize(distance, &trimmed_target, &trimmed_test);

            if let (Some(target_secondary), Some(test_secondary)) =
                (target.secondary.as_deref(), maps.lowered_secondary(candidate))
            {
                let secondary = edit_distance(target_secondary, &test_secondary) as f64;
                if secondary < distance {
                    distance = secondary;
                    normalized = normalize(distance, target_secondary, &test_secondary);
                }
            }

            if !meets_threshold(normalized) {
                continue;
            }

            match best {
                Some((_, min)) if distance > min => {}
                Some((old, min)) if distance == min => {
                    match break_tie(target.accession, old, candidate) {
                        Preference::New => {
                            debug!("Current best match (tie broken): {candidate} ({group_b}) {test_title}, distance = {distance}");
                            best = Some((candidate, distance));
                            tied = false;
                        }
                        Preference::Old => {}
                        Preference::Tied => tied = true,
                    }
                }
                _ => {
                    debug!("Current best match: {candidate} ({group_b}) {test_title}, distance = {distance}");
                    best = Some((candidate, distance));
                    tied = false;
                }
            }
        }
        debug!("Tested {tested} samples");

        match best {
            Some((hit, distance)) if !tied => {
                debug!(
                    "Match: {} ({}) <-> {hit} ({group_b}), distance {distance}",
                    target.accession, target.group
                );
                correspondence.add(target.accession, Some(hit));
                state.lock(hit, target.group);
                state.lock(target.accession, group_b);
                state.settled.insert(target.accession.to_string());
                state.settled.insert(hit.to_string());
            }
            _ => {
                debug!(
                    "No match found in {group_b} for {} {} ({})",
                    target.accession, target.title, target.group
                );
                correspondence.add(target.accession, None);
                state.settled.insert(target.accession.to_string());
            }
        }
        Ok(())
    }
}

/// Repairs datasets whose platform none of their series samples use.
fn check_platforms_match_series(
    result: &mut ParseResult,
    datasets: &[String],
) -> Result<(), KiraError> {
    for accession in datasets {
        let Some(dataset) = result.datasets.get(accession) else {
            continue;
        };
        if dataset.series.is_empty() {
            continue;
        }
        let platform = dataset.platform.clone();

        let mut found = false;
        let mut seen: IndexSet<String> = IndexSet::new();
        for series in dataset.series.iter().filter_map(|s| result.series.get(s)) {
            for sample in series.samples.iter().filter_map(|s| result.samples.get(s)) {
                if platform
                    .as_ref()
                    .map(|p| sample.platforms.contains(p))
                    .unwrap_or(false)
                {
                    found = true;
                }
                seen.extend(sample.platforms.iter().cloned());
            }
        }
        if found {
            continue;
        }

        match seen.len() {
            1 => {
                let replacement = seen.swap_remove_index(0).unwrap_or_default();
                warn!(
                    "{accession} is associated with wrong platform? {}, switching it to use series platform {replacement}",
                    platform.as_deref().unwrap_or("(none)")
                );
                if let Some(dataset) = result.datasets.get_mut(accession) {
                    dataset.platform = Some(replacement);
                }
            }
            0 => {}
            _ => {
                return Err(KiraError::AmbiguousPlatform {
                    dataset: accession.clone(),
                    platform: platform.unwrap_or_default(),
                });
            }
        }
    }
    Ok(())
}

fn fill_from_datasets(result: &mut ParseResult, datasets: &[String]) -> AccessionMaps {
    let mut maps = AccessionMaps::default();
    for accession in datasets {
        let Some(dataset) = result.datasets.get(accession) else {
            warn!("{accession} was not parsed, skipping it");
            continue;
        };
        let platform = dataset.platform.clone();
        let organism = dataset.organism.clone();
        let samples = result.dataset_samples(dataset);

        if let Some(platform) = platform.as_deref() {
            if let Some(organism) = organism.as_deref() {
                result.platform_or_insert(platform).add_organism(organism);
            }
            for sample in &samples {
                if let Some(record) = result.samples.get_mut(sample) {
                    if record.platforms.is_empty() {
                        record.add_platform(platform);
                    }
                }
            }
        }
        for sample in &samples {
            maps.fill(result, sample, accession);
        }
    }
    maps
}
