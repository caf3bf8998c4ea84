use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info};

use crate::domain::GeoAccession;
use crate::error::KiraError;
use crate::store::{Metadata, Store};

const GEO_FTP_BASE: &str = "https://ftp.ncbi.nlm.nih.gov/geo";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Source of SOFT files; returns the path of a local (possibly cached) copy.
pub trait GeoClient: Send + Sync {
    fn fetch_soft(&self, accession: &GeoAccession, force: bool) -> Result<Utf8PathBuf, KiraError>;
}

#[derive(Clone)]
pub struct GeoHttpClient {
    client: Client,
    store: Store,
    base_url: String,
}

impl GeoHttpClient {
    pub fn new(store: Store) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-geo/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::GeoHttp(err.to_string()))?;
        Ok(Self {
            client,
            store,
            base_url: GEO_FTP_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn soft_url(&self, accession: &GeoAccession) -> String {
        soft_url(&self.base_url, accession)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, KiraError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| KiraError::GeoHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "GEO request failed".to_string());
            return Err(KiraError::GeoStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| KiraError::GeoHttp(err.to_string()))?;
        if !bytes.starts_with(&GZIP_MAGIC) {
            return Err(KiraError::GeoHttp(format!("{url} did not return a gzip file")));
        }
        Ok(bytes.to_vec())
    }
}

impl GeoClient for GeoHttpClient {
    fn fetch_soft(&self, accession: &GeoAccession, force: bool) -> Result<Utf8PathBuf, KiraError> {
        let path = self.store.soft_path(accession);
        if !force && self.store.exists(&path) {
            debug!(%accession, path = %path, "using cached SOFT file");
            return Ok(path);
        }

        let url = self.soft_url(accession);
        info!(%accession, %url, "downloading SOFT file");
        let content = self.download(&url)?;
        self.store.ensure_cache_root()?;
        Store::write_bytes_atomic(&path, &content)?;
        Store::write_metadata(
            &self.store.metadata_path(accession),
            &Metadata {
                source: "geo".to_string(),
                accession: accession.to_string(),
                url,
                downloaded_at: chrono::Utc::now().to_rfc3339(),
                tool: format!("kira-geo/{}", env!("CARGO_PKG_VERSION")),
                resolved_path: path.to_string(),
            },
        )?;
        Ok(path)
    }
}

/// `{base}/{series|datasets|platforms}/{stub}/{acc}/soft/{file}`.
pub fn soft_url(base_url: &str, accession: &GeoAccession) -> String {
    format!(
        "{}/{}/{}/{}/soft/{}",
        base_url.trim_end_matches('/'),
        accession.kind().ftp_directory(),
        accession.ftp_stub(),
        accession.as_str(),
        accession.soft_file_name()
    )
}
