//! Per-series store of raw sample values, keyed by platform, quantitation-type index and design element.
//!
//! Samples arrive one at a time, so every vector is built up sample by sample. The parser must
//! complete each vector (see [`GeoValues::add_value`] with blank fill-ins) before moving on to the
//! next sample, otherwise values end up in the wrong slot.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use tracing::{debug, trace, warn};

use crate::error::KiraError;
use crate::model::{Platform, Sample};

/// Target index of a quantitation type. `ID_REF` sits at -1.
pub type QtIndex = i32;

/// Location, area and raw-pixel columns that are either recomputable or useless downstream.
static SKIPPABLE_QUANTITATION_TYPES: Lazy<IndexSet<&'static str>> = Lazy::new(|| {
    [
        "X_COORD", "Y_COORD", "X", "Y", "TOP", "BOT", "LEFT", "RIGHT", "DIAMETER", "TOT_SPIX",
        "TOT_BPIX", "Slide_block", "Slide_row", "Slide_column", "B Pixels", "F Pixels",
        "Bkgd_area", "Spot_area", "Spot_diameter", "Bkgd_diameter", "CH2_BKD_AREA",
        "CH1_BKD_AREA", "ch1 Area", "ch2 Area", "CH1_AREA", "AREA", "CH2_AREA", "CH2_Spot_Area",
        "CH1_Spot_Area", "CH1_SIGNAL_AREA", "CH2_SIGNAL_AREA", "Spot Area", "Area To Perimeter",
        "Background Area", "Signal Area", "Ignored Area", "Probe 1Area%", "BKD_AREA",
        "Perim-to-area failed", "F_AREA_L", "F_AREA_H", "F_AREA_M", "Probe 2Area%",
        "Probe 2 %Area", "B_AREA_H", "B_AREA_M", "B_AREA_L", "Dia.",
        // raw items, assuming medians are used
        "SUM_MEAN", "RAT1_MEAN", "RAT2_MEAN", "PIX_RAT2_MEAN", "PIX_RAT2_MEDIAN",
        "PERGTBCH1I_1SD", "PERGTBCH2I_1SD", "PERGTBCH1I_2SD", "PERGTBCH2I_2SD",
        "SUM_MEDIAN", "REGR", "CORR", "UNF_VALUE",
        // agilent
        "PositionX", "PositionY", "rNumPix", "gNumPix",
        // present/absent and detection calls
        "ABS_CALL", "ABS CALL", "CALL", "Detection Pval", "DETECTION P-VALUE",
        "Detection_p-value", "Detection_pvalue", "D_P-VALUE", "Detection", "Detection call",
        "rIsWellAboveBG", "gIsWellAboveBG", "CH2_IsWellAboveBG", "CH1_IsWellAboveBG",
        "COMPUTED.G_IS_WELL_ABOVE_BG", "COMPUTED.R_IS_WELL_ABOVE_BG",
        // QC flags without a consistent meaning
        "FLAG", "FLAGS", "QUALITY_FLAG", "CH2_Flag", "CH1_Flag", "IsManualFlag",
        "Flag_high_pmt", "Flag_low_pmt", "Autoflag", "FLAGGED", "FlagCy5", "FlagCy3", "FLAG_L",
        "FLAG_H", "Flagbkgrd", "FLAG_M", "flag1", "Flag.30236", "flag2", "Flagged?",
        "Pos_Fraction", "Pairs_Used", "% > B635+2SD", "% > B635+1SD", "% > B532+2SD",
        "% > B532+1SD", "F532 % Sat.", "F635 % Sat.", "rIsSaturated", "gIsSaturated",
        "ch1 Signal Noise Ratio", "ch2 Signal Noise Ratio", "gIsFeatNonUnifOL",
        "gIsPosAndSignif", "rIsPosAndSignif", "rIsFeatNonUnifOL",
    ]
    .into_iter()
    .collect()
});

/// Normalized and spread columns dropped to keep large series manageable.
static AGGRESSIVELY_REMOVED_QUANTITATION_TYPES: Lazy<IndexSet<&'static str>> = Lazy::new(|| {
    [
        "RAT2N_MEAN", "RAT2N_MEDIAN", "CH2DN_MEAN", "CH2IN_MEAN", "CH2BN_MEDIAN", "CH2IN_MEDIAN",
        "CH2DN_MEDIAN", "RAT1N_MEAN", "RAT1N_MEDIAN", "CH1DN_MEAN", "CH1IN_MEAN", "CH1BN_MEDIAN",
        "CH1IN_MEDIAN", "CH1DN_MEDIAN", "CH2I_SD", "CH1B_SD", "CH2B_SD", "CH1_PER_SAT",
        "CH2_PER_SAT", "RAT2_SD", "RAT1_SD", "LOG_RAT2N_MEDIAN", "gBGPixSDev",
        "ch1 Background Std Dev", "rBGPixSDev", "ch2 Background Std Dev", "CY3_BKD_SD",
        "CY5_BKD_SD", "BEAD_STDERR", "CH1_BKD_SD", "CH2_BKD_SD", "R_BG_SD", "G_BG_SD", "CH1_SD",
        "CH2_SD", "G_SD", "R_SD", "ch1 Signal Noise Ratio", "ch2 Signal Noise Ratio",
        "Bkgd_stdev", "F635 SD", "F532 SD",
    ]
    .into_iter()
    .collect()
});

/// False for names on the skippable or aggressively-removed lists.
pub fn is_wanted_quantitation_type(name: &str) -> bool {
    !SKIPPABLE_QUANTITATION_TYPES.contains(name)
        && !AGGRESSIVELY_REMOVED_QUANTITATION_TYPES.contains(name)
}

type Vectors = IndexMap<String, Vec<Option<String>>>;

#[derive(Debug, Clone, Default)]
pub struct GeoValues {
    data: IndexMap<String, BTreeMap<QtIndex, Vectors>>,
    name_map: IndexMap<String, IndexMap<String, QtIndex>>,
    index_map: IndexMap<String, BTreeMap<QtIndex, Vec<String>>>,
    /// platform -> qt -> samples, in the order their values were added.
    sample_dimensions: IndexMap<String, BTreeMap<QtIndex, IndexSet<String>>>,
}

impl GeoValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` at `index`. Reassigning a known name to a different index is an error.
    pub fn add_quantitation_type(
        &mut self,
        platform: &str,
        name: &str,
        index: QtIndex,
    ) -> Result<(), KiraError> {
        let names = self.name_map.entry(platform.to_string()).or_default();
        if let Some(existing) = names.get(name) {
            if *existing != index {
                return Err(KiraError::Values(format!(
                    "tried to reassign quantitation type {name} on {platform} from column {existing} to {index}"
                )));
            }
        }
        names.insert(name.to_string(), index);

        let by_index = self
            .index_map
            .entry(platform.to_string())
            .or_default()
            .entry(index)
            .or_default();
        if by_index.is_empty() {
            debug!(platform, name, index, "added quantitation type");
            by_index.push(name.to_string());
        } else if !by_index.iter().any(|existing| existing == name) {
            warn!(
                "Column #{index} has an additional name: {name}, it already has names: {}",
                by_index.join(" ")
            );
            if !is_wanted_quantitation_type(name) {
                warn!("Alternate name is an unwanted quantitation type; data may be retained anyway because of other name");
            }
            by_index.push(name.to_string());
        }
        Ok(())
    }

    /// Stores one value; the sample joins the dimension for this quantitation type.
    pub fn add_value(
        &mut self,
        sample: &str,
        platform: &str,
        index: QtIndex,
        design_element: &str,
        value: &str,
    ) {
        self.join_dimension(sample, platform, index);
        self.data
            .entry(platform.to_string())
            .or_default()
            .entry(index)
            .or_default()
            .entry(design_element.to_string())
            .or_default()
            .push(Some(value.to_string()));
        trace!(platform, sample, index, design_element, value, "added value");
    }

    /// Registers a sample that has no data columns at all.
    pub fn add_sample(&mut self, sample: &mut Sample, platform: &mut Platform) {
        if platform.is_tag_based() {
            platform.use_data_from_geo = false;
            return;
        }
        match self.sample_dimensions.get_mut(&platform.accession) {
            Some(dimensions) => {
                for samples in dimensions.values_mut() {
                    samples.insert(sample.accession.clone());
                }
            }
            None => {
                self.join_dimension(&sample.accession, &platform.accession, 0);
                if sample.might_not_have_data_in_file {
                    warn!("Data not anticipated to be present (RNA-seq etc.), adding dummy quantitation type");
                    return;
                }
                sample.might_not_have_data_in_file = true;
                platform.use_data_from_geo = false;
                warn!(
                    sample = %sample.accession,
                    "Sample lacks data, no data will be imported for this data set"
                );
            }
        }
    }

    fn join_dimension(&mut self, sample: &str, platform: &str, index: QtIndex) {
        self.sample_dimensions
            .entry(platform.to_string())
            .or_default()
            .entry(index)
            .or_default()
            .insert(sample.to_string());
    }

    /// Quantitation-type indices holding data for the platform.
    pub fn quantitation_types(&self, platform: &str) -> Vec<QtIndex> {
        self.data
            .get(platform)
            .map(|qts| qts.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn quantitation_type_index(&self, platform: &str, name: &str) -> Option<QtIndex> {
        self.name_map.get(platform)?.get(name).copied()
    }

    pub fn quantitation_type_names(&self, platform: &str, index: QtIndex) -> &[String] {
        self.index_map
            .get(platform)
            .and_then(|by_index| by_index.get(&index))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.sample_dimensions.keys().map(String::as_str)
    }

    /// Samples in dimension order for one quantitation type.
    pub fn dimension(&self, platform: &str, index: QtIndex) -> Option<&IndexSet<String>> {
        self.sample_dimensions.get(platform)?.get(&index)
    }

    pub fn has_data(&self) -> bool {
        !self.sample_dimensions.is_empty()
    }

    /// Drops the stored vectors for a platform.
    pub fn clear(&mut self, platform: &str) {
        self.data.shift_remove(platform);
    }

    /// Slots of `samples` within the dimension; `None` for samples without data.
    pub fn indices(
        &self,
        platform: &str,
        samples: &[String],
        index: QtIndex,
    ) -> Option<Vec<Option<usize>>> {
        let dimension = self.dimension(platform, index)?;
        Some(
            samples
                .iter()
                .map(|sample| dimension.get_index_of(sample))
                .collect(),
        )
    }

    pub fn values(&self, platform: &str, index: QtIndex, design_element: &str) -> Option<&[Option<String>]> {
        self.data
            .get(platform)?
            .get(&index)?
            .get(design_element)
            .map(Vec::as_slice)
    }

    /// A slice of one vector. `None` when the design element has no data at all.
    pub fn values_at(
        &self,
        platform: &str,
        index: QtIndex,
        design_element: &str,
        indices: &[Option<usize>],
    ) -> Result<Option<Vec<Option<String>>>, KiraError> {
        let Some(raw) = self.values(platform, index, design_element) else {
            return Ok(None);
        };
        let mut sliced = Vec::with_capacity(indices.len());
        for slot in indices {
            match slot {
                None => sliced.push(None),
                Some(i) => {
                    let value = raw.get(*i).ok_or_else(|| {
                        KiraError::Values(format!(
                            "data out of bounds index={i} ({design_element} on {platform} qt #{index}), vector has only {} values",
                            raw.len()
                        ))
                    })?;
                    sliced.push(value.clone());
                }
            }
        }
        Ok(Some(sliced))
    }

    /// Pads short vectors with `None`; a vector longer than its dimension is an error.
    pub fn validate(&mut self) -> Result<(), KiraError> {
        for (platform, dimensions) in &self.sample_dimensions {
            let Some(qts) = self.data.get_mut(platform) else {
                continue;
            };
            for (index, samples) in dimensions {
                let expected = samples.len();
                let Some(vectors) = qts.get_mut(index) else {
                    continue;
                };
                let names = self
                    .index_map
                    .get(platform)
                    .and_then(|by_index| by_index.get(index))
                    .map(|names| names.join("/"))
                    .unwrap_or_default();
                let mut warned = false;
                for (design_element, values) in vectors.iter_mut() {
                    if values.len() < expected {
                        let padding = expected - values.len();
                        if !warned {
                            warn!("Padding some vectors with {padding} values for quantitation type {index}({names})");
                            warned = true;
                        }
                        values.resize(expected, None);
                    } else if values.len() > expected {
                        return Err(KiraError::Values(format!(
                            "validation failed at platform={platform} design element={design_element} qt={index}: expected {expected} values, got {}; names are {names}",
                            values.len()
                        )));
                    }
                }
                debug!(platform = %platform, index, "all vectors have {expected} values");
            }
        }
        Ok(())
    }

    /// A new store holding only the given samples. `platform_of` maps each sample to its platform.
    pub fn subset<F>(&self, samples: &[String], platform_of: F) -> GeoValues
    where
        F: Fn(&str) -> Option<String>,
    {
        let wanted: IndexSet<&str> = samples.iter().map(String::as_str).collect();
        let mut platforms = IndexSet::new();
        for sample in samples {
            if let Some(platform) = platform_of(sample) {
                platforms.insert(platform);
            }
        }

        let mut subset = GeoValues {
            name_map: self.name_map.clone(),
            index_map: self.index_map.clone(),
            ..GeoValues::default()
        };
        for platform in platforms {
            let Some(dimensions) = self.sample_dimensions.get(&platform) else {
                continue;
            };
            let mut new_dimensions = BTreeMap::new();
            let mut new_data = BTreeMap::new();
            for (index, dimension) in dimensions {
                let keep: Vec<usize> = dimension
                    .iter()
                    .enumerate()
                    .filter(|(_, sample)| wanted.contains(sample.as_str()))
                    .map(|(slot, _)| slot)
                    .collect();
                new_dimensions.insert(
                    *index,
                    dimension
                        .iter()
                        .filter(|sample| wanted.contains(sample.as_str()))
                        .cloned()
                        .collect::<IndexSet<_>>(),
                );
                if let Some(vectors) = self.data.get(&platform).and_then(|qts| qts.get(index)) {
                    let sliced: Vectors = vectors
                        .iter()
                        .map(|(design_element, values)| {
                            let kept = keep
                                .iter()
                                .map(|slot| values.get(*slot).cloned().flatten())
                                .collect();
                            (design_element.clone(), kept)
                        })
                        .collect();
                    new_data.insert(*index, sliced);
                }
            }
            subset.sample_dimensions.insert(platform.clone(), new_dimensions);
            subset.data.insert(platform, new_data);
        }
        subset
    }
}

impl fmt::Display for GeoValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sample_dimensions.is_empty() {
            return write!(f, "No values stored");
        }
        for (platform, dimensions) in &self.sample_dimensions {
            writeln!(f, "============== {platform} =================")?;
            for (index, samples) in dimensions {
                let names = self.quantitation_type_names(platform, *index).join("/");
                writeln!(
                    f,
                    "---------------- Platform {platform} QuantitationType #{index} ({names}) ------------------"
                )?;
                write!(f, "DeEl")?;
                for sample in samples {
                    write!(f, "\t{sample}")?;
                }
                writeln!(f)?;
                let Some(vectors) = self.data.get(platform).and_then(|qts| qts.get(index)) else {
                    continue;
                };
                let mut elements: Vec<&String> = vectors.keys().collect();
                elements.sort();
                for element in elements {
                    write!(f, "{element}")?;
                    for value in &vectors[element] {
                        match value.as_deref().map(str::trim) {
                            Some(text) if !text.is_empty() => write!(f, "\t{text}")?,
                            _ => write!(f, "\t.")?,
                        }
                    }
                    writeln!(f)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn unwanted_names_are_filtered() {
        assert!(!is_wanted_quantitation_type("ABS_CALL"));
        assert!(!is_wanted_quantitation_type("F635 SD"));
        assert!(is_wanted_quantitation_type("VALUE"));
    }

    #[test]
    fn reassigning_a_name_fails() {
        let mut values = GeoValues::new();
        values.add_quantitation_type("GPL1", "VALUE", 0).unwrap();
        values.add_quantitation_type("GPL1", "VALUE", 0).unwrap();
        let err = values.add_quantitation_type("GPL1", "VALUE", 1).unwrap_err();
        assert_matches!(err, KiraError::Values(_));
    }

    #[test]
    fn validate_pads_short_vectors() {
        let mut values = GeoValues::new();
        values.add_value("GSM1", "GPL1", 0, "p1", "1.0");
        values.add_value("GSM1", "GPL1", 0, "p2", "2.0");
        values.add_value("GSM2", "GPL1", 0, "p1", "3.0");
        values.validate().unwrap();
        assert_eq!(
            values.values("GPL1", 0, "p2").unwrap(),
            &[Some("2.0".to_string()), None]
        );
    }

    #[test]
    fn validate_rejects_long_vectors() {
        let mut values = GeoValues::new();
        values.add_value("GSM1", "GPL1", 0, "p1", "1.0");
        values.add_value("GSM1", "GPL1", 0, "p1", "1.5");
        assert_matches!(values.validate(), Err(KiraError::Values(_)));
    }

    #[test]
    fn empty_first_sample_disables_platform() {
        let mut values = GeoValues::new();
        let mut sample = Sample::new("GSM1");
        let mut platform = Platform::new("GPL1");
        values.add_sample(&mut sample, &mut platform);
        assert!(sample.might_not_have_data_in_file);
        assert!(!platform.use_data_from_geo);
        assert!(values.has_data());
    }

    #[test]
    fn subset_keeps_selected_samples() {
        let mut values = GeoValues::new();
        for (sample, value) in [("GSM1", "1"), ("GSM2", "2"), ("GSM3", "3")] {
            values.add_value(sample, "GPL1", 0, "p1", value);
        }
        let picked = vec!["GSM3".to_string(), "GSM1".to_string()];
        let subset = values.subset(&picked, |_| Some("GPL1".to_string()));
        assert_eq!(
            subset.values("GPL1", 0, "p1").unwrap(),
            &[Some("1".to_string()), Some("3".to_string())]
        );
        let idx = subset.indices("GPL1", &picked, 0).unwrap();
        assert_eq!(idx, vec![Some(1), Some(0)]);
    }

    #[test]
    fn display_marks_blanks() {
        let mut values = GeoValues::new();
        assert_eq!(values.to_string(), "No values stored");
        values.add_quantitation_type("GPL1", "VALUE", 0).unwrap();
        values.add_value("GSM1", "GPL1", 0, "p1", " ");
        assert!(values.to_string().contains("p1\t."));
    }
}
