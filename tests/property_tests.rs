//! Property-based tests for the sample combiner and its helpers.
//!
//! ```bash
//! PROPTEST_CASES=2000 cargo test --test property_tests
//! ```

use std::collections::HashMap;

use proptest::prelude::*;

use kira_geo_ingest::combiner::DatasetCombiner;
use kira_geo_ingest::correspondence::SampleCorrespondence;
use kira_geo_ingest::model::ParseResult;
use kira_geo_ingest::quantitation::{ExampleValue, QuantitationGuesser};
use kira_geo_ingest::string_distance::{common_prefix, common_suffix, edit_distance};

fn title() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,6}( rep ?[0-9])?",
        "(WT|KO)_[0-9]{1,2}h",
        "(liver|lung|heart) (control|treated)",
        Just(String::new()),
    ]
}

/// Titles for two to four datasets of one to five samples each.
fn dataset_titles() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(prop::collection::vec(title(), 1..=5), 2..=4)
}

/// Titles of series samples that no dataset lists.
fn stray_titles() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(title(), 0..=3)
}

/// Builds series GSE1 on GPL1 and returns it with the dataset index owning each sample.
/// Strays own an index past the last dataset.
fn build(datasets: &[Vec<String>], strays: &[String]) -> (ParseResult, HashMap<String, usize>) {
    let mut result = ParseResult::default();
    result.platform_or_insert("GPL1");
    let mut owners = HashMap::new();
    let mut next = 100;
    for (index, titles) in datasets.iter().enumerate() {
        let dataset = format!("GDS{}", index + 1);
        let subset_accession = format!("{dataset}_1");
        let members: Vec<String> = titles
            .iter()
            .map(|_| {
                next += 1;
                format!("GSM{next}")
            })
            .collect();

        let subset = result.subset_or_insert(&subset_accession);
        subset.dataset = Some(dataset.clone());
        subset.samples = members.clone();

        let record = result.dataset_or_insert(&dataset);
        record.platform = Some("GPL1".to_string());
        record.organism = Some("Homo sapiens".to_string());
        record.subsets.push(subset_accession);
        record.series.push("GSE1".to_string());

        for (accession, title) in members.iter().zip(titles) {
            add_series_sample(&mut result, accession, title, Some("GPL1"));
            owners.insert(accession.clone(), index);
        }
        result.series_or_insert("GSE1").datasets.insert(dataset);
    }
    for (offset, title) in strays.iter().enumerate() {
        let accession = format!("GSM{}", 900 + offset);
        add_series_sample(&mut result, &accession, title, Some("GPL1"));
        owners.insert(accession, datasets.len() + offset);
    }
    (result, owners)
}

fn add_series_sample(result: &mut ParseResult, accession: &str, title: &str, platform: Option<&str>) {
    let sample = result.sample_or_insert(accession);
    if !title.is_empty() {
        sample.title = Some(title.to_string());
    }
    if let Some(platform) = platform {
        sample.add_platform(platform);
    }
    result.series_or_insert("GSE1").add_sample(accession);
}

fn series_samples(result: &ParseResult) -> Vec<String> {
    let mut samples: Vec<String> = result.series["GSE1"].samples.iter().cloned().collect();
    samples.sort();
    samples
}

fn members(correspondence: &SampleCorrespondence) -> Vec<String> {
    let mut seen: Vec<String> = correspondence
        .iter()
        .flat_map(|group| group.iter().cloned())
        .collect();
    seen.sort();
    seen
}

fn correspond(result: &mut ParseResult, matching: bool) -> SampleCorrespondence {
    DatasetCombiner::new(matching)
        .find_gse_correspondence(result, "GSE1")
        .unwrap()
}

proptest! {
    #[test]
    fn every_sample_lands_in_exactly_one_group(
        datasets in dataset_titles(),
        strays in stray_titles(),
    ) {
        let (mut result, _) = build(&datasets, &strays);
        let correspondence = correspond(&mut result, true);
        prop_assert_eq!(members(&correspondence), series_samples(&result));
    }

    #[test]
    fn platform_grouping_covers_every_series_sample(
        samples in prop::collection::vec((title(), prop::option::of(1..=3u8)), 1..8),
    ) {
        let mut result = ParseResult::default();
        for (index, (title, platform)) in samples.iter().enumerate() {
            let platform = (*platform).map(|number| format!("GPL{number}"));
            add_series_sample(&mut result, &format!("GSM{}", index + 1), title, platform.as_deref());
        }
        let correspondence = correspond(&mut result, true);
        prop_assert_eq!(members(&correspondence), series_samples(&result));
    }

    #[test]
    fn groups_never_hold_two_samples_of_one_dataset(
        datasets in dataset_titles(),
        strays in stray_titles(),
    ) {
        let (mut result, owners) = build(&datasets, &strays);
        let correspondence = correspond(&mut result, true);
        for group in correspondence.iter() {
            let mut seen: Vec<usize> = group.iter().map(|accession| owners[accession]).collect();
            seen.sort_unstable();
            seen.dedup();
            prop_assert_eq!(seen.len(), group.len());
        }
    }

    #[test]
    fn correspondence_is_deterministic(datasets in dataset_titles(), strays in stray_titles()) {
        let first = correspond(&mut build(&datasets, &strays).0, true);
        let second = correspond(&mut build(&datasets, &strays).0, true);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn without_matching_every_group_is_a_singleton(
        datasets in dataset_titles(),
        strays in stray_titles(),
    ) {
        let (mut result, _) = build(&datasets, &strays);
        let correspondence = correspond(&mut result, false);
        let accessions = series_samples(&result);
        prop_assert_eq!(correspondence.len(), accessions.len());
        for accession in &accessions {
            prop_assert!(correspondence.corresponding_samples(accession).is_empty());
        }
    }

    #[test]
    fn guessing_is_stable(
        name in "[A-Za-z0-9_ %+-]{0,20}",
        description in prop::option::of("[a-z0-9 ]{0,40}"),
        example in prop::option::of("[0-9.eE+-]{1,8}|[A-Za-z]{1,5}"),
    ) {
        let example = example.as_deref().map(ExampleValue::from_raw);
        let guesser = QuantitationGuesser::default();
        let first = guesser.guess(&name, description.as_deref(), example.as_ref());
        let second = guesser.guess(&name, description.as_deref(), example.as_ref());
        prop_assert_eq!(&first.name, &name);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn edit_distance_is_a_metric(a in "[a-z ]{0,12}", b in "[a-z ]{0,12}") {
        prop_assert_eq!(edit_distance(&a, &a), 0);
        prop_assert_eq!(edit_distance(&a, &b), edit_distance(&b, &a));
        let longer = a.chars().count().max(b.chars().count());
        prop_assert!(edit_distance(&a, &b) <= longer);
    }

    #[test]
    fn common_affixes_bound_every_input(strings in prop::collection::vec("[ab]{0,6}", 1..5)) {
        let prefix = common_prefix(strings.iter().map(String::as_str)).unwrap();
        let suffix = common_suffix(strings.iter().map(String::as_str)).unwrap();
        for s in &strings {
            prop_assert!(s.starts_with(&prefix));
            prop_assert!(s.ends_with(&suffix));
        }
    }
}
