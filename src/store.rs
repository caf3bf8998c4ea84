use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::domain::GeoAccession;
use crate::error::KiraError;

/// On-disk cache of downloaded SOFT files.
///
/// Layout: `<root>/soft/<GSE|GDS|GPL>/<accession>/<file>.soft.gz`, with a `metadata.json` beside
/// each file.
#[derive(Debug, Clone)]
pub struct Store {
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, KiraError> {
        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-geo")).ok()
            })
            .ok_or_else(|| {
                KiraError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Ok(Self { cache_root })
    }

    pub fn new_with_root(cache_root: Utf8PathBuf) -> Self {
        Self { cache_root }
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn soft_dir(&self, accession: &GeoAccession) -> Utf8PathBuf {
        self.cache_root
            .join("soft")
            .join(accession.kind().prefix())
            .join(accession.as_str())
    }

    pub fn soft_path(&self, accession: &GeoAccession) -> Utf8PathBuf {
        self.soft_dir(accession).join(accession.soft_file_name())
    }

    pub fn metadata_path(&self, accession: &GeoAccession) -> Utf8PathBuf {
        self.soft_dir(accession).join("metadata.json")
    }

    pub fn ensure_cache_root(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn exists(&self, path: &Utf8Path) -> bool {
        path.as_std_path().is_file()
    }

    /// Removes the whole cache; returns whether there was one.
    pub fn clear(&self) -> Result<bool, KiraError> {
        if !self.cache_root.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_dir_all(self.cache_root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(true)
    }

    /// Writes through a temp file in the destination directory so readers never see a partial file.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("kira-geo-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_metadata(path: &Utf8Path, metadata: &Metadata) -> Result<(), KiraError> {
        let content = serde_json::to_vec_pretty(metadata)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn read_metadata(path: &Utf8Path) -> Result<Option<Metadata>, KiraError> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    /// Metadata of every cached SOFT file, sorted by accession.
    pub fn list_metadata(&self) -> Result<Vec<Metadata>, KiraError> {
        let soft_root = self.cache_root.join("soft");
        if !soft_root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for kind in read_dirs(&soft_root)? {
            for record in read_dirs(&kind)? {
                if let Some(metadata) = Self::read_metadata(&record.join("metadata.json"))? {
                    entries.push(metadata);
                }
            }
        }
        entries.sort_by(|a, b| a.accession.cmp(&b.accession));
        Ok(entries)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub source: String,
    pub accession: String,
    pub url: String,
    pub downloaded_at: String,
    pub tool: String,
    pub resolved_path: String,
}

fn read_dirs(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, KiraError> {
    let mut dirs = Vec::new();
    let entries =
        fs::read_dir(root.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Ok(path) = Utf8PathBuf::from_path_buf(path) {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new_with_root(Utf8PathBuf::from("/tmp/kira-geo"));
        let series: GeoAccession = "GSE1234".parse().unwrap();
        let dataset: GeoAccession = "GDS55".parse().unwrap();

        assert!(store
            .soft_path(&series)
            .ends_with("soft/GSE/GSE1234/GSE1234_family.soft.gz"));
        assert!(store.soft_path(&dataset).ends_with("soft/GDS/GDS55/GDS55.soft.gz"));
        assert!(store.metadata_path(&series).ends_with("GSE1234/metadata.json"));
    }
}
