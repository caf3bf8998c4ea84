use kira_geo_ingest::domain::GeoAccession;
use kira_geo_ingest::ncbi::{parse_gds_summary, parse_gse_summary, parse_search_ids};

const GDS_SUMMARY: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<eSummaryResult>
<DocSum>
    <Id>200002018</Id>
    <Item Name="Accession" Type="String">GSE2018</Item>
    <Item Name="GDS" Type="String">1329;1330</Item>
    <Item Name="entryType" Type="String">GSE</Item>
</DocSum>
<DocSum>
    <Id>507</Id>
    <Item Name="Accession" Type="String">GDS507</Item>
    <Item Name="GDS" Type="String">507</Item>
    <Item Name="GSE" Type="String">2018</Item>
    <Item Name="entryType" Type="String">GDS</Item>
</DocSum>
<DocSum>
    <Id>1329</Id>
    <Item Name="Accession" Type="String">GDS1329</Item>
    <Item Name="GDS" Type="String">1329</Item>
    <Item Name="entryType" Type="String">GDS</Item>
</DocSum>
</eSummaryResult>
"#;

fn accessions(raw: &[&str]) -> Vec<GeoAccession> {
    raw.iter().map(|acc| acc.parse().unwrap()).collect()
}

#[test]
fn only_dataset_entries_contribute_datasets() {
    let datasets = parse_gds_summary(GDS_SUMMARY).unwrap();
    assert_eq!(datasets, accessions(&["GDS507", "GDS1329"]));
}

#[test]
fn series_are_collected_from_items_and_text() {
    let series = parse_gse_summary(GDS_SUMMARY).unwrap();
    assert_eq!(series, accessions(&["GSE2018"]));

    let xml = r#"<DocSum><Item Name="GSE" Type="String">1;22</Item>
        <Item Name="summary" Type="String">Reanalysis of GSE333</Item></DocSum>"#;
    assert_eq!(
        parse_gse_summary(xml).unwrap(),
        accessions(&["GSE1", "GSE22", "GSE333"])
    );
}

#[test]
fn empty_results_are_empty() {
    let xml = "<eSearchResult><Count>0</Count><IdList></IdList></eSearchResult>";
    assert!(parse_search_ids(xml).is_empty());
    assert!(parse_gds_summary(xml).unwrap().is_empty());
    assert!(parse_gse_summary(xml).unwrap().is_empty());
}
