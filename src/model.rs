//! In-memory GEO record graph produced by the SOFT parser.
//!
//! Records refer to each other by accession; [`ParseResult`] owns every record.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::correspondence::SampleCorrespondence;
use crate::domain::{LibrarySource, LibraryStrategy, SampleType};
use crate::values::GeoValues;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Contact {
    pub name: Option<String>,
    pub email: Option<String>,
    pub institute: Option<String>,
    pub laboratory: Option<String>,
    pub department: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub phone: Option<String>,
    pub web_link: Option<String>,
    pub fax: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Channel {
    pub number: usize,
    pub source_name: Option<String>,
    pub organism: Option<String>,
    pub bio_material_provider: Option<String>,
    pub characteristics: Vec<String>,
    pub treatment_protocol: Option<String>,
    pub growth_protocol: Option<String>,
    pub extract_protocol: Option<String>,
    pub molecule: Option<String>,
    pub label: Option<String>,
    pub label_protocol: Option<String>,
}

impl Channel {
    pub fn new(number: usize) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }
}

/// Column vocabulary shared by every record kind that carries a data table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Columns {
    pub names: Vec<String>,
    pub descriptions: Vec<String>,
}

impl Columns {
    pub fn add(&mut self, name: &str, description: &str) {
        self.names.push(name.to_string());
        self.descriptions.push(description.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn description_of(&self, name: &str) -> Option<&str> {
        self.names
            .iter()
            .position(|candidate| candidate == name)
            .and_then(|idx| self.descriptions.get(idx))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Sample {
    pub accession: String,
    pub title: Option<String>,
    /// Title given to the sample by a GDS record, usually more informative than the GSM title.
    pub title_in_dataset: Option<String>,
    pub status: Option<String>,
    pub submission_date: Option<String>,
    pub last_update_date: Option<String>,
    pub channels: Vec<Channel>,
    pub hyb_protocol: Option<String>,
    pub scan_protocol: Option<String>,
    pub data_processing: Option<String>,
    pub description: String,
    pub contact: Contact,
    pub platforms: Vec<String>,
    pub series_appears_in: Vec<String>,
    pub supplementary_files: Vec<String>,
    pub columns: Columns,
    pub sample_type: Option<SampleType>,
    pub library_source: Option<LibrarySource>,
    pub library_strategy: Option<LibraryStrategy>,
    pub data_row_count: Option<String>,
    pub might_not_have_data_in_file: bool,
}

impl Sample {
    pub fn new(accession: &str) -> Self {
        Self {
            accession: accession.to_string(),
            channels: vec![Channel::new(1)],
            ..Self::default()
        }
    }

    /// Channel `number` (1-based), created on demand.
    pub fn channel_mut(&mut self, number: usize) -> &mut Channel {
        let number = number.max(1);
        while self.channels.len() < number {
            let next = self.channels.len() + 1;
            self.channels.push(Channel::new(next));
        }
        &mut self.channels[number - 1]
    }

    pub fn add_platform(&mut self, platform: &str) {
        if !self.platforms.iter().any(|existing| existing == platform) {
            self.platforms.push(platform.to_string());
        }
    }

    pub fn first_platform(&self) -> Option<&str> {
        self.platforms.first().map(String::as_str)
    }

    pub fn organism(&self) -> Option<&str> {
        self.channels
            .iter()
            .find_map(|channel| channel.organism.as_deref())
    }

    /// Whether this kind of sample ever carries expression values in the SOFT file.
    pub fn type_has_data(&self) -> bool {
        !self
            .sample_type
            .map(SampleType::lacks_expression_data)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Platform {
    pub accession: String,
    pub title: Option<String>,
    pub status: Option<String>,
    pub manufacturer: Option<String>,
    pub manufacture_protocol: Option<String>,
    pub submission_date: Option<String>,
    pub last_update_date: Option<String>,
    pub technology: Option<String>,
    pub distribution: Option<String>,
    pub organisms: Vec<String>,
    pub description: String,
    pub web_link: Option<String>,
    pub supplementary_file: Option<String>,
    pub contact: Contact,
    pub columns: Columns,
    #[serde(skip)]
    pub column_data: IndexMap<String, Vec<String>>,
    pub use_data_from_geo: bool,
}

impl Platform {
    pub fn new(accession: &str) -> Self {
        Self {
            accession: accession.to_string(),
            use_data_from_geo: true,
            ..Self::default()
        }
    }

    pub fn add_organism(&mut self, organism: &str) {
        if !self.organisms.iter().any(|existing| existing == organism) {
            self.organisms.push(organism.to_string());
        }
    }

    /// The design-element identifier column: `ID` if declared, else the first column.
    pub fn id_column_name(&self) -> Option<&str> {
        self.columns
            .names
            .iter()
            .find(|name| name.eq_ignore_ascii_case("ID"))
            .or_else(|| self.columns.names.first())
            .map(String::as_str)
    }

    pub fn design_elements(&self) -> &[String] {
        self.id_column_name()
            .and_then(|name| self.column_data.get(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sequence-tag technologies whose values do not come from GEO tables.
    pub fn is_tag_based(&self) -> bool {
        self.technology
            .as_deref()
            .map(|tech| {
                let lowered = tech.to_lowercase();
                lowered.contains("mpss") || lowered.contains("sage")
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Variable {
    pub number: u32,
    pub kind: Option<String>,
    pub description: Option<String>,
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Replication {
    pub number: u32,
    pub kind: Option<String>,
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Series {
    pub accession: String,
    pub title: Option<String>,
    pub status: Option<String>,
    pub submission_date: Option<String>,
    pub last_update_date: Option<String>,
    pub summary: String,
    pub overall_design: Option<String>,
    pub keywords: Vec<String>,
    pub pubmed_ids: Vec<String>,
    pub series_types: Vec<String>,
    pub contributors: Vec<String>,
    pub contact: Contact,
    pub platforms: Vec<String>,
    pub samples: IndexSet<String>,
    pub datasets: IndexSet<String>,
    pub columns: Columns,
    pub variables: IndexMap<u32, Variable>,
    pub replicates: IndexMap<u32, Replication>,
    pub supplementary_files: Vec<String>,
    pub is_super_series: bool,
    pub is_sub_series: bool,
    pub subseries: Vec<String>,
    #[serde(skip)]
    pub values: GeoValues,
    pub correspondence: Option<SampleCorrespondence>,
}

impl Series {
    pub fn new(accession: &str) -> Self {
        Self {
            accession: accession.to_string(),
            ..Self::default()
        }
    }

    pub fn add_sample(&mut self, sample: &str) {
        self.samples.insert(sample.to_string());
    }

    pub fn variable_mut(&mut self, number: u32) -> &mut Variable {
        self.variables.entry(number).or_insert_with(|| Variable {
            number,
            ..Variable::default()
        })
    }

    pub fn replicate_mut(&mut self, number: u32) -> &mut Replication {
        self.replicates.entry(number).or_insert_with(|| Replication {
            number,
            ..Replication::default()
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Dataset {
    pub accession: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub organism: Option<String>,
    pub platform: Option<String>,
    pub platform_type: Option<String>,
    pub probe_type: Option<String>,
    pub feature_count: Option<u32>,
    pub sample_count: Option<u32>,
    pub maximum_probes: Option<String>,
    pub order: Option<String>,
    pub update_date: Option<String>,
    pub value_type: Option<String>,
    pub completeness: Option<String>,
    pub experiment_type: Option<String>,
    pub dataset_type: Option<String>,
    pub sample_organism: Option<String>,
    pub sample_type: Option<String>,
    pub pubmed_id: Option<String>,
    pub channel_count: Option<u32>,
    pub columns: Columns,
    pub subsets: Vec<String>,
    /// Every series the dataset names, whether or not it had samples when named.
    pub reference_series: Vec<String>,
    pub series: Vec<String>,
}

impl Dataset {
    pub fn new(accession: &str) -> Self {
        Self {
            accession: accession.to_string(),
            ..Self::default()
        }
    }

    pub fn add_series(&mut self, series: &str) {
        if !self.series.iter().any(|existing| existing == series) {
            self.series.push(series.to_string());
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Subset {
    pub accession: String,
    pub dataset: Option<String>,
    pub title: Option<String>,
    pub description: String,
    pub subset_type: Option<String>,
    pub samples: Vec<String>,
}

impl Subset {
    pub fn new(accession: &str) -> Self {
        Self {
            accession: accession.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseResult {
    pub datasets: IndexMap<String, Dataset>,
    pub platforms: IndexMap<String, Platform>,
    pub samples: IndexMap<String, Sample>,
    pub series: IndexMap<String, Series>,
    pub subsets: IndexMap<String, Subset>,
}

impl ParseResult {
    pub fn sample_or_insert(&mut self, accession: &str) -> &mut Sample {
        self.samples
            .entry(accession.to_string())
            .or_insert_with(|| Sample::new(accession))
    }

    pub fn platform_or_insert(&mut self, accession: &str) -> &mut Platform {
        self.platforms
            .entry(accession.to_string())
            .or_insert_with(|| Platform::new(accession))
    }

    pub fn series_or_insert(&mut self, accession: &str) -> &mut Series {
        self.series
            .entry(accession.to_string())
            .or_insert_with(|| Series::new(accession))
    }

    pub fn dataset_or_insert(&mut self, accession: &str) -> &mut Dataset {
        self.datasets
            .entry(accession.to_string())
            .or_insert_with(|| Dataset::new(accession))
    }

    pub fn subset_or_insert(&mut self, accession: &str) -> &mut Subset {
        self.subsets
            .entry(accession.to_string())
            .or_insert_with(|| Subset::new(accession))
    }

    /// False for sample types without values, and for samples on a platform that stopped using GEO data.
    pub fn sample_has_usable_data(&self, accession: &str) -> bool {
        let Some(sample) = self.samples.get(accession) else {
            return false;
        };
        if !sample.type_has_data() {
            return false;
        }
        sample.platforms.iter().all(|platform| {
            self.platforms
                .get(platform)
                .map(|p| p.use_data_from_geo)
                .unwrap_or(true)
        })
    }

    /// Platforms used by the samples of a series, in first-use order.
    pub fn series_platforms(&self, series: &Series) -> Vec<String> {
        let mut platforms = IndexSet::new();
        for sample in &series.samples {
            if let Some(record) = self.samples.get(sample) {
                for platform in &record.platforms {
                    platforms.insert(platform.clone());
                }
            }
        }
        platforms.into_iter().collect()
    }

    /// Attaches each dataset to the series it references once those series have samples.
    ///
    /// GDS files are parsed before their GSE family file, so the link cannot always be made while
    /// parsing.
    pub fn link_datasets(&mut self) {
        for dataset in self.datasets.values_mut() {
            for series in &dataset.reference_series {
                let Some(record) = self.series.get_mut(series) else {
                    continue;
                };
                if record.samples.is_empty() {
                    continue;
                }
                if !dataset.series.contains(series) {
                    dataset.series.push(series.clone());
                }
                record.datasets.insert(dataset.accession.clone());
            }
        }
    }

    /// Samples of the dataset: every subset sample, or every series sample when there are no subsets.
    pub fn dataset_samples(&self, dataset: &Dataset) -> Vec<String> {
        let mut samples = IndexSet::new();
        if dataset.subsets.is_empty() {
            for series in &dataset.series {
                if let Some(series) = self.series.get(series) {
                    samples.extend(series.samples.iter().cloned());
                }
            }
        } else {
            for subset in &dataset.subsets {
                if let Some(subset) = self.subsets.get(subset) {
                    samples.extend(subset.samples.iter().cloned());
                }
            }
        }
        samples.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_grow_on_demand() {
        let mut sample = Sample::new("GSM1");
        sample.channel_mut(2).label = Some("Cy5".to_string());
        assert_eq!(sample.channels.len(), 2);
        assert_eq!(sample.channels[1].number, 2);
        assert_eq!(sample.channels[1].label.as_deref(), Some("Cy5"));
    }

    #[test]
    fn id_column_falls_back_to_first() {
        let mut platform = Platform::new("GPL1");
        platform.columns.add("PROBE", "probe name");
        platform.columns.add("SEQ", "sequence");
        assert_eq!(platform.id_column_name(), Some("PROBE"));
        platform.columns.add("id", "identifier");
        assert_eq!(platform.id_column_name(), Some("id"));
    }

    #[test]
    fn usable_data_follows_platform_flag() {
        let mut result = ParseResult::default();
        result.sample_or_insert("GSM1").add_platform("GPL1");
        result.platform_or_insert("GPL1");
        assert!(result.sample_has_usable_data("GSM1"));
        result.platform_or_insert("GPL1").use_data_from_geo = false;
        assert!(!result.sample_has_usable_data("GSM1"));
    }

    #[test]
    fn datasets_link_to_populated_series_only() {
        let mut result = ParseResult::default();
        let dataset = result.dataset_or_insert("GDS1");
        dataset.reference_series = vec!["GSE1".to_string(), "GSE2".to_string()];
        result.series_or_insert("GSE1").add_sample("GSM1");
        result.series_or_insert("GSE2");
        result.link_datasets();
        assert_eq!(result.datasets["GDS1"].series, vec!["GSE1".to_string()]);
        assert!(result.series["GSE1"].datasets.contains("GDS1"));
        assert!(result.series["GSE2"].datasets.is_empty());
    }
}
