//! Maps the physical columns of each sample table onto stable quantitation-type indices.
//!
//! Samples of one platform do not always list their columns in the same order, and some repeat a
//! name. The router remembers where every column name went the first time it was seen on a
//! platform and redirects later samples to that slot.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::KiraError;
use crate::values::{GeoValues, QtIndex, is_wanted_quantitation_type};

#[derive(Debug, Default)]
pub struct ColumnRouter {
    /// platform -> column name -> target index, kept for the whole parse.
    known: IndexMap<String, IndexMap<String, QtIndex>>,
    /// physical -> target for the current sample.
    redirects: HashMap<QtIndex, QtIndex>,
    wanted: HashSet<QtIndex>,
    warned_clobbering: bool,
    warned_column_order: bool,
    warned_duplicate_name: bool,
}

impl ColumnRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-arms the one-time warnings; called at the start of every parse.
    pub fn reset_warnings(&mut self) {
        self.warned_clobbering = false;
        self.warned_column_order = false;
        self.warned_duplicate_name = false;
    }

    /// Walks the column names of a sample and registers each one with the values store.
    ///
    /// `column_names` starts with `ID_REF`, which lands at index -1.
    pub fn begin_sample(
        &mut self,
        sample: &str,
        platform: &str,
        column_names: &[String],
        values: &mut GeoValues,
    ) -> Result<(), KiraError> {
        self.redirects.clear();
        self.wanted.clear();
        debug!(sample, platform, "initializing quantitation types");

        let known = self.known.entry(platform.to_string()).or_default();
        let mut seen: HashSet<String> = HashSet::new();

        for (position, original) in column_names.iter().enumerate() {
            let physical = position as QtIndex - 1;
            let wanted = is_wanted_quantitation_type(original);
            if !wanted {
                debug!("{original} will not be included in final data");
            }

            let mut name = original.clone();
            if seen.contains(&name) {
                if !self.warned_duplicate_name {
                    warn!(
                        "{name} appears more than once for sample {sample}, it will be mangled to make it unique; \
                         this usually indicates a problem with the GEO file (further warnings suppressed)"
                    );
                    self.warned_duplicate_name = true;
                }
                name = format!("{name}___{physical}");
            }

            let target = match known.get(&name) {
                Some(&target) => {
                    if target != physical {
                        if !self.warned_column_order {
                            warn!(
                                "{name} is not in previous column {target}: for sample {sample} it is in column {physical}; \
                                 check that data is not misaligned (further warnings suppressed)"
                            );
                            self.warned_column_order = true;
                        }
                        self.redirects.insert(physical, target);
                    }
                    target
                }
                None => {
                    let clobbers = column_names
                        .iter()
                        .any(|other| *other != name && known.get(other) == Some(&physical));
                    let target = if clobbers {
                        let target = known.values().copied().max().unwrap_or(-1).max(-1) + 1;
                        self.redirects.insert(physical, target);
                        if !self.warned_clobbering {
                            warn!(
                                "Column {name} reassigned to index {target} to avoid clobbering; \
                                 check that data is not misaligned (further warnings suppressed)"
                            );
                            self.warned_clobbering = true;
                        }
                        target
                    } else {
                        physical
                    };
                    debug!("{name} ---> {target}");
                    known.insert(name.clone(), target);
                    target
                }
            };

            values.add_quantitation_type(platform, &name, target)?;
            if wanted {
                self.wanted.insert(target);
            }
            seen.insert(name);
        }
        Ok(())
    }

    /// Where the value in physical column `physical` belongs.
    pub fn target(&self, physical: QtIndex) -> QtIndex {
        self.redirects.get(&physical).copied().unwrap_or(physical)
    }

    pub fn is_wanted(&self, target: QtIndex) -> bool {
        self.wanted.contains(&target)
    }

    /// Target index of a column name on a platform, if it has been seen.
    pub fn known_index(&self, platform: &str, name: &str) -> Option<QtIndex> {
        self.known.get(platform)?.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(columns: &[&str]) -> Vec<String> {
        columns.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn moved_column_is_redirected() {
        let mut router = ColumnRouter::new();
        let mut values = GeoValues::new();
        router
            .begin_sample("GSM1", "GPL1", &names(&["ID_REF", "VALUE", "SIGNAL"]), &mut values)
            .unwrap();
        assert_eq!(router.target(0), 0);

        router
            .begin_sample("GSM2", "GPL1", &names(&["ID_REF", "SIGNAL", "VALUE"]), &mut values)
            .unwrap();
        assert_eq!(router.target(0), 1);
        assert_eq!(router.target(1), 0);
    }

    #[test]
    fn new_column_at_taken_slot_goes_to_end() {
        let mut router = ColumnRouter::new();
        let mut values = GeoValues::new();
        router
            .begin_sample("GSM1", "GPL1", &names(&["ID_REF", "VALUE", "SIGNAL"]), &mut values)
            .unwrap();
        router
            .begin_sample("GSM2", "GPL1", &names(&["ID_REF", "OTHER", "VALUE"]), &mut values)
            .unwrap();
        // OTHER sits where VALUE used to be, so it is moved past the highest known index
        assert_eq!(router.target(0), 2);
        assert_eq!(router.known_index("GPL1", "OTHER"), Some(2));
    }

    #[test]
    fn duplicate_names_are_mangled() {
        let mut router = ColumnRouter::new();
        let mut values = GeoValues::new();
        router
            .begin_sample("GSM1", "GPL1", &names(&["ID_REF", "VALUE", "VALUE"]), &mut values)
            .unwrap();
        assert_eq!(router.known_index("GPL1", "VALUE___1"), Some(1));
    }

    #[test]
    fn unwanted_columns_are_not_wanted() {
        let mut router = ColumnRouter::new();
        let mut values = GeoValues::new();
        router
            .begin_sample("GSM1", "GPL1", &names(&["ID_REF", "VALUE", "ABS_CALL"]), &mut values)
            .unwrap();
        assert!(router.is_wanted(0));
        assert!(!router.is_wanted(1));
    }
}
