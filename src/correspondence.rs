use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::{debug, warn};

/// Partition of sample accessions into groups believed to hold the same biological material.
///
/// Every accession belongs to at most one group. An addition that would place an accession into a
/// second group is dropped, never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SampleCorrespondence {
    groups: Vec<IndexSet<String>>,
    #[serde(skip)]
    acc_to_title: IndexMap<String, String>,
}

impl SampleCorrespondence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_titles(&mut self, titles: IndexMap<String, String>) {
        self.acc_to_title = titles;
    }

    pub fn title(&self, accession: &str) -> Option<&str> {
        self.acc_to_title.get(accession).map(String::as_str)
    }

    fn group_of(&self, accession: &str) -> Option<usize> {
        self.groups.iter().position(|group| group.contains(accession))
    }

    /// Records that `a` corresponds to `b`, or that `a` stands alone when `b` is `None`.
    pub fn add(&mut self, a: &str, b: Option<&str>) {
        let Some(b) = b else {
            if self.group_of(a).is_none() {
                self.groups.push(IndexSet::from([a.to_string()]));
            }
            return;
        };

        match (self.group_of(a), self.group_of(b)) {
            (Some(ga), Some(gb)) if ga == gb => {}
            (Some(ga), Some(gb)) => {
                warn!(
                    "{a} and {b} are already in different groups ({} / {}), not merging",
                    self.describe(ga),
                    self.describe(gb)
                );
            }
            (Some(ga), None) => {
                debug!("{b} joins the group of {a}");
                self.groups[ga].insert(b.to_string());
            }
            (None, Some(gb)) => {
                debug!("{a} joins the group of {b}");
                self.groups[gb].insert(a.to_string());
            }
            (None, None) => {
                self.groups
                    .push(IndexSet::from([a.to_string(), b.to_string()]));
            }
        }
    }

    /// Other members of the accession's group.
    pub fn corresponding_samples(&self, accession: &str) -> Vec<&str> {
        self.group_of(accession)
            .map(|idx| {
                self.groups[idx]
                    .iter()
                    .filter(|member| *member != accession)
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes the accession; a group left empty disappears.
    pub fn remove_sample(&mut self, accession: &str) {
        for group in &mut self.groups {
            group.shift_remove(accession);
        }
        self.groups.retain(|group| !group.is_empty());
        self.acc_to_title.shift_remove(accession);
    }

    pub fn groups(&self) -> &[IndexSet<String>] {
        &self.groups
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexSet<String>> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, accession: &str) -> bool {
        self.group_of(accession).is_some()
    }

    fn describe(&self, idx: usize) -> String {
        self.groups[idx]
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for SampleCorrespondence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, group) in self.groups.iter().enumerate() {
            write!(f, "Group {}:", idx + 1)?;
            for member in group {
                match self.acc_to_title.get(member) {
                    Some(title) => write!(f, " {member} ({title})")?,
                    None => write!(f, " {member}")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_then_pair() {
        let mut corr = SampleCorrespondence::new();
        corr.add("GSM1", None);
        corr.add("GSM1", Some("GSM2"));
        assert_eq!(corr.len(), 1);
        assert_eq!(corr.corresponding_samples("GSM2"), vec!["GSM1"]);
    }

    #[test]
    fn conflicting_addition_is_dropped() {
        let mut corr = SampleCorrespondence::new();
        corr.add("GSM1", Some("GSM2"));
        corr.add("GSM3", Some("GSM4"));
        corr.add("GSM1", Some("GSM4"));
        assert_eq!(corr.len(), 2);
        assert_eq!(corr.corresponding_samples("GSM1"), vec!["GSM2"]);
        assert_eq!(corr.corresponding_samples("GSM4"), vec!["GSM3"]);
    }

    #[test]
    fn remove_sample_prunes_empty_groups() {
        let mut corr = SampleCorrespondence::new();
        corr.add("GSM1", None);
        corr.add("GSM2", Some("GSM3"));
        corr.remove_sample("GSM1");
        corr.remove_sample("GSM2");
        assert_eq!(corr.len(), 1);
        assert!(corr.contains("GSM3"));
        assert!(!corr.contains("GSM1"));
    }

    #[test]
    fn display_includes_titles() {
        let mut corr = SampleCorrespondence::new();
        corr.add("GSM1", Some("GSM2"));
        corr.set_titles(IndexMap::from([("GSM1".to_string(), "WT".to_string())]));
        assert_eq!(corr.to_string(), "Group 1: GSM1 (WT) GSM2\n");
    }
}
