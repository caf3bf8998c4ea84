use assert_matches::assert_matches;

use kira_geo_ingest::combiner::{DatasetCombiner, SIMILARITY_THRESHOLD, meets_threshold};
use kira_geo_ingest::correspondence::SampleCorrespondence;
use kira_geo_ingest::error::KiraError;
use kira_geo_ingest::model::ParseResult;

/// One series on GPL1 whose samples are split over the given datasets.
fn series_with_datasets(datasets: &[(&str, &[(&str, &str)])]) -> ParseResult {
    let mut result = ParseResult::default();
    result.platform_or_insert("GPL1");
    for (dataset, members) in datasets {
        let subset_accession = format!("{dataset}_1");
        let subset = result.subset_or_insert(&subset_accession);
        subset.dataset = Some(dataset.to_string());
        subset.samples = members.iter().map(|(acc, _)| acc.to_string()).collect();

        let record = result.dataset_or_insert(dataset);
        record.platform = Some("GPL1".to_string());
        record.organism = Some("Mus musculus".to_string());
        record.subsets.push(subset_accession);
        record.series.push("GSE1".to_string());

        for (accession, title) in *members {
            let sample = result.sample_or_insert(accession);
            sample.title = Some(title.to_string());
            sample.add_platform("GPL1");
            result.series_or_insert("GSE1").add_sample(accession);
        }
        result
            .series_or_insert("GSE1")
            .datasets
            .insert(dataset.to_string());
    }
    result
}

fn correspond(result: &mut ParseResult, matching: bool) -> SampleCorrespondence {
    DatasetCombiner::new(matching)
        .find_gse_correspondence(result, "GSE1")
        .unwrap()
}

fn assert_partition(correspondence: &SampleCorrespondence, samples: &[&str]) {
    let mut seen: Vec<&str> = correspondence
        .iter()
        .flat_map(|group| group.iter().map(String::as_str))
        .collect();
    seen.sort_unstable();
    let mut expected = samples.to_vec();
    expected.sort_unstable();
    assert_eq!(seen, expected);
}

#[test]
fn replicates_pair_up_across_datasets() {
    let mut result = series_with_datasets(&[
        ("GDS1", &[("GSM1", "liver control rep1"), ("GSM2", "liver treated rep1")]),
        ("GDS2", &[("GSM3", "liver control rep 1"), ("GSM4", "liver treated rep 1")]),
    ]);
    let correspondence = correspond(&mut result, true);

    assert_eq!(correspondence.len(), 2);
    assert_eq!(correspondence.corresponding_samples("GSM1"), vec!["GSM3"]);
    assert_eq!(correspondence.corresponding_samples("GSM4"), vec!["GSM2"]);
    assert_partition(&correspondence, &["GSM1", "GSM2", "GSM3", "GSM4"]);
}

#[test]
fn matching_disabled_keeps_every_sample_alone() {
    let mut result = series_with_datasets(&[
        ("GDS1", &[("GSM1", "liver control rep1"), ("GSM2", "liver treated rep1")]),
        ("GDS2", &[("GSM3", "liver control rep 1"), ("GSM4", "liver treated rep 1")]),
    ]);
    let correspondence = correspond(&mut result, false);

    assert_eq!(correspondence.len(), 4);
    for sample in ["GSM1", "GSM2", "GSM3", "GSM4"] {
        assert!(correspondence.corresponding_samples(sample).is_empty());
    }
}

#[test]
fn half_the_title_length_still_matches() {
    let mut result = series_with_datasets(&[
        ("GDS1", &[("GSM1", "abcd"), ("GSM2", "zzzz9")]),
        ("GDS2", &[("GSM3", "abxy")]),
    ]);
    let correspondence = correspond(&mut result, true);
    assert_eq!(correspondence.corresponding_samples("GSM1"), vec!["GSM3"]);
    assert!(correspondence.corresponding_samples("GSM2").is_empty());

    assert!(meets_threshold(SIMILARITY_THRESHOLD));
}

#[test]
fn more_than_half_different_does_not_match() {
    let mut result = series_with_datasets(&[
        ("GDS1", &[("GSM1", "abcd"), ("GSM2", "zzzz9")]),
        ("GDS2", &[("GSM3", "axyz")]),
    ]);
    let correspondence = correspond(&mut result, true);
    assert_eq!(correspondence.len(), 3);
    assert_partition(&correspondence, &["GSM1", "GSM2", "GSM3"]);
}

#[test]
fn equal_titles_prefer_the_closer_accession() {
    let mut result = series_with_datasets(&[
        ("GDS1", &[("GSM102", "treated x"), ("GSM110", "control y")]),
        ("GDS2", &[("GSM100", "treated x"), ("GSM200", "treated x")]),
    ]);
    let correspondence = correspond(&mut result, true);
    assert_eq!(correspondence.corresponding_samples("GSM102"), vec!["GSM100"]);
    assert!(correspondence.corresponding_samples("GSM200").is_empty());
}

#[test]
fn unbreakable_tie_leaves_the_sample_alone() {
    let mut result = series_with_datasets(&[
        ("GDS1", &[("GSM102", "treated x"), ("GSM110", "control y")]),
        ("GDS2", &[("GSM100", "treated x"), ("GSM105", "treated x")]),
    ]);
    let correspondence = correspond(&mut result, true);
    assert!(correspondence.corresponding_samples("GSM102").is_empty());
    assert_partition(&correspondence, &["GSM100", "GSM102", "GSM105", "GSM110"]);
}

#[test]
fn samples_of_other_organisms_are_not_candidates() {
    let mut result = series_with_datasets(&[
        ("GDS1", &[("GSM1", "liver control rep1"), ("GSM2", "liver treated rep1")]),
        ("GDS2", &[("GSM3", "liver control rep 1"), ("GSM4", "liver treated rep 1")]),
    ]);
    result.platform_or_insert("GPL2").add_organism("Rattus norvegicus");
    result.samples["GSM3"].platforms = vec!["GPL2".to_string()];
    result.samples["GSM4"].platforms = vec!["GPL2".to_string()];
    result.datasets["GDS2"].platform = Some("GPL2".to_string());
    result.datasets["GDS2"].organism = Some("Rattus norvegicus".to_string());

    let correspondence = correspond(&mut result, true);
    assert_eq!(correspondence.len(), 4);
}

#[test]
fn runs_are_deterministic() {
    let datasets: &[(&str, &[(&str, &str)])] = &[
        ("GDS1", &[("GSM1", "WT_0h"), ("GSM2", "WT_6h"), ("GSM3", "KO_0h")]),
        ("GDS2", &[("GSM4", "WT 0 hr"), ("GSM5", "WT 6 hr")]),
        ("GDS3", &[("GSM6", "KO 0 hr")]),
    ];
    let first = correspond(&mut series_with_datasets(datasets), true);
    let second = correspond(&mut series_with_datasets(datasets), true);
    assert_eq!(first, second);
    assert_partition(&first, &["GSM1", "GSM2", "GSM3", "GSM4", "GSM5", "GSM6"]);
}

#[test]
fn untitled_samples_still_get_a_group() {
    let mut result = series_with_datasets(&[
        ("GDS1", &[("GSM1", "WT_0h"), ("GSM2", "")]),
        ("GDS2", &[("GSM3", "WT 0 hr")]),
    ]);
    let correspondence = correspond(&mut result, true);
    assert!(correspondence.contains("GSM2"));
    assert!(correspondence.corresponding_samples("GSM2").is_empty());
    assert_eq!(correspondence.corresponding_samples("GSM1"), vec!["GSM3"]);
}

#[test]
fn series_without_datasets_groups_by_platform() {
    let mut result = ParseResult::default();
    for (accession, title, platform) in [
        ("GSM1", "heart a", "GPL1"),
        ("GSM2", "heart b", "GPL2"),
        ("GSM3", "lung", "GPL1"),
    ] {
        let sample = result.sample_or_insert(accession);
        sample.title = Some(title.to_string());
        sample.add_platform(platform);
        result.series_or_insert("GSE1").add_sample(accession);
    }
    let correspondence = correspond(&mut result, true);
    assert_eq!(correspondence.corresponding_samples("GSM1"), vec!["GSM2"]);
    assert!(correspondence.corresponding_samples("GSM3").is_empty());
}

#[test]
fn explicit_empty_dataset_list_is_rejected() {
    let mut result = ParseResult::default();
    assert_matches!(
        DatasetCombiner::default().find_gse_correspondence_for_datasets(&mut result, &[]),
        Err(KiraError::NoDatasets)
    );
}

#[test]
fn platformless_samples_take_their_datasets_platform() {
    let mut result = series_with_datasets(&[
        ("GDS1", &[("GSM1", "WT_0h")]),
        ("GDS2", &[("GSM2", "WT 0 hr")]),
    ]);
    result.samples["GSM2"].platforms.clear();
    let correspondence = correspond(&mut result, true);

    assert_eq!(result.samples["GSM2"].first_platform(), Some("GPL1"));
    assert_eq!(result.platforms["GPL1"].organisms, vec!["Mus musculus".to_string()]);
    assert_eq!(correspondence.corresponding_samples("GSM1"), vec!["GSM2"]);
}

#[test]
fn series_samples_outside_every_dataset_stand_alone() {
    let mut result = series_with_datasets(&[
        ("GDS1", &[("GSM1", "WT_0h")]),
        ("GDS2", &[("GSM2", "WT 0 hr")]),
    ]);
    result.sample_or_insert("GSM3").title = Some("WT_0h".to_string());
    result.samples["GSM3"].add_platform("GPL1");
    result.series_or_insert("GSE1").add_sample("GSM3");

    let correspondence = correspond(&mut result, true);
    assert_eq!(correspondence.corresponding_samples("GSM1"), vec!["GSM2"]);
    assert!(correspondence.corresponding_samples("GSM3").is_empty());
    assert_partition(&correspondence, &["GSM1", "GSM2", "GSM3"]);
}

#[test]
fn platformless_samples_without_datasets_stand_alone() {
    let mut result = ParseResult::default();
    for (accession, title, platform) in [
        ("GSM1", "heart a", Some("GPL1")),
        ("GSM2", "heart a", None),
        ("GSM3", "heart b", Some("GPL2")),
    ] {
        let sample = result.sample_or_insert(accession);
        sample.title = Some(title.to_string());
        if let Some(platform) = platform {
            sample.add_platform(platform);
        }
        result.series_or_insert("GSE1").add_sample(accession);
    }

    let correspondence = correspond(&mut result, true);
    assert_eq!(correspondence.corresponding_samples("GSM1"), vec!["GSM3"]);
    assert!(correspondence.corresponding_samples("GSM2").is_empty());
    assert_partition(&correspondence, &["GSM1", "GSM2", "GSM3"]);
}
