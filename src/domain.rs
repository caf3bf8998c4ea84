use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessionKind {
    Gse,
    Gds,
    Gpl,
    Gsm,
}

impl AccessionKind {
    pub fn prefix(self) -> &'static str {
        match self {
            AccessionKind::Gse => "GSE",
            AccessionKind::Gds => "GDS",
            AccessionKind::Gpl => "GPL",
            AccessionKind::Gsm => "GSM",
        }
    }

    /// Top-level FTP directory holding records of this kind.
    pub fn ftp_directory(self) -> &'static str {
        match self {
            AccessionKind::Gse => "series",
            AccessionKind::Gds => "datasets",
            AccessionKind::Gpl => "platforms",
            AccessionKind::Gsm => "samples",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoAccession {
    kind: AccessionKind,
    value: String,
}

impl GeoAccession {
    pub fn kind(&self) -> AccessionKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Numeric part of the accession.
    pub fn digits(&self) -> &str {
        &self.value[3..]
    }

    /// GEO groups records in directories of a thousand: GSE102902 lives under GSE102nnn.
    pub fn ftp_stub(&self) -> String {
        let digits = self.digits();
        if digits.len() <= 3 {
            return format!("{}nnn", self.kind.prefix());
        }
        let head = &digits[..digits.len() - 3];
        format!("{}{}nnn", self.kind.prefix(), head)
    }

    /// Name of the compressed SOFT file GEO publishes for this record.
    pub fn soft_file_name(&self) -> String {
        match self.kind {
            AccessionKind::Gds => format!("{}.soft.gz", self.value),
            _ => format!("{}_family.soft.gz", self.value),
        }
    }
}

impl fmt::Display for GeoAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for GeoAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let kind = match normalized.get(..3) {
            Some("GSE") => AccessionKind::Gse,
            Some("GDS") => AccessionKind::Gds,
            Some("GPL") => AccessionKind::Gpl,
            Some("GSM") => AccessionKind::Gsm,
            _ => return Err(KiraError::InvalidAccession(value.to_string())),
        };
        let digits = &normalized[3..];
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self {
            kind,
            value: normalized,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Rna,
    Dna,
    Protein,
    Mixed,
    Sage,
    Mpss,
    Other,
}

impl SampleType {
    /// Sample types whose SOFT files never carry usable expression values.
    pub fn lacks_expression_data(self) -> bool {
        matches!(
            self,
            SampleType::Dna | SampleType::Protein | SampleType::Sage | SampleType::Mpss
        )
    }
}

impl FromStr for SampleType {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let lowered = trimmed.to_lowercase();
        let parsed = match lowered.as_str() {
            "cdna" | "rna" | "transcriptomic" => SampleType::Rna,
            "genomic" => SampleType::Dna,
            "protein" | "sarst" => SampleType::Protein,
            "mixed" => SampleType::Mixed,
            "sage" => SampleType::Sage,
            "mpss" | "sra" => SampleType::Mpss,
            "other" => SampleType::Other,
            _ => {
                return Err(KiraError::Parse {
                    line: 0,
                    message: format!("unknown sample type '{trimmed}'"),
                });
            }
        };
        Ok(parsed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibrarySource {
    Transcriptomic,
    Genomic,
}

impl FromStr for LibrarySource {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "transcriptomic" => Ok(LibrarySource::Transcriptomic),
            "genomic" => Ok(LibrarySource::Genomic),
            other => Err(KiraError::Parse {
                line: 0,
                message: format!("unknown library source '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibraryStrategy {
    RnaSeq,
    BisulfiteSeq,
    DnaseHypersensitivity,
    AtacSeq,
    ChipSeq,
    Other,
    MreSeq,
    MirnaSeq,
    RipSeq,
    HiC,
    SsRnaSeq,
    MbdSeq,
    FaireSeq,
    MedipSeq,
    MnaseSeq,
    ChiaPet,
    NcRnaSeq,
}

impl LibraryStrategy {
    const NAMES: [(&'static str, LibraryStrategy); 17] = [
        ("rna-seq", LibraryStrategy::RnaSeq),
        ("bisulfite-seq", LibraryStrategy::BisulfiteSeq),
        ("dnase-hypersensitivity", LibraryStrategy::DnaseHypersensitivity),
        ("atac-seq", LibraryStrategy::AtacSeq),
        ("chip-seq", LibraryStrategy::ChipSeq),
        ("other", LibraryStrategy::Other),
        ("mre-seq", LibraryStrategy::MreSeq),
        ("mirna-seq", LibraryStrategy::MirnaSeq),
        ("rip-seq", LibraryStrategy::RipSeq),
        ("hi-c", LibraryStrategy::HiC),
        ("ssrna-seq", LibraryStrategy::SsRnaSeq),
        ("mbd-seq", LibraryStrategy::MbdSeq),
        ("faire-seq", LibraryStrategy::FaireSeq),
        ("medip-seq", LibraryStrategy::MedipSeq),
        ("mnase-seq", LibraryStrategy::MnaseSeq),
        ("chia-pet", LibraryStrategy::ChiaPet),
        ("ncrna-seq", LibraryStrategy::NcRnaSeq),
    ];
}

impl FromStr for LibraryStrategy {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_lowercase();
        Self::NAMES
            .iter()
            .find(|(name, _)| *name == lowered)
            .map(|(_, strategy)| *strategy)
            .ok_or_else(|| KiraError::Parse {
                line: 0,
                message: format!("unknown library strategy '{}'", value.trim()),
            })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_accession_normalizes_case() {
        let acc: GeoAccession = " gse2018 ".parse().unwrap();
        assert_eq!(acc.as_str(), "GSE2018");
        assert_eq!(acc.kind(), AccessionKind::Gse);
    }

    #[test]
    fn parse_accession_invalid() {
        let err = "GSX12".parse::<GeoAccession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidAccession(_));
        let err = "GDS".parse::<GeoAccession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidAccession(_));
    }

    #[test]
    fn ftp_stub_groups_by_thousand() {
        let acc: GeoAccession = "GSE102902".parse().unwrap();
        assert_eq!(acc.ftp_stub(), "GSE102nnn");
        let acc: GeoAccession = "GDS999".parse().unwrap();
        assert_eq!(acc.ftp_stub(), "GDSnnn");
    }

    #[test]
    fn sample_type_aliases() {
        assert_eq!("cDNA".parse::<SampleType>().unwrap(), SampleType::Rna);
        assert_eq!("SRA".parse::<SampleType>().unwrap(), SampleType::Mpss);
        assert_eq!("SARST".parse::<SampleType>().unwrap(), SampleType::Protein);
        assert_matches!("bogus".parse::<SampleType>(), Err(KiraError::Parse { .. }));
    }

    #[test]
    fn library_strategy_is_case_insensitive() {
        assert_eq!(
            "ChIP-Seq".parse::<LibraryStrategy>().unwrap(),
            LibraryStrategy::ChipSeq
        );
        assert!("WGS".parse::<LibraryStrategy>().is_err());
    }
}
