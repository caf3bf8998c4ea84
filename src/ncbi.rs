use std::thread;
use std::time::Duration;

use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::domain::GeoAccession;
use crate::error::KiraError;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const MAX_RESULTS: usize = 100;

static SEARCH_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Id>(\d+)</Id>").expect("search id pattern is valid"));
static DOC_SUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<DocSum>(.*?)</DocSum>").expect("docsum pattern is valid"));
static ENTRY_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<Item Name="entryType"[^>]*>([^<]*)</Item>"#).expect("entry type pattern is valid")
});
static GDS_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<Item Name="GDS"[^>]*>([^<]*)</Item>"#).expect("GDS item pattern is valid")
});
static GSE_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<Item Name="GSE"[^>]*>([^<]*)</Item>"#).expect("GSE item pattern is valid")
});
static GSE_RECORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(GSE\d+)").expect("GSE record pattern is valid"));

/// Lookups between series and the curated datasets built from them.
pub trait EntrezClient: Send + Sync {
    /// Datasets built from a series; empty when there are none.
    fn find_gds_for_gse(&self, series: &GeoAccession) -> Result<Vec<GeoAccession>, KiraError>;
    /// Series a dataset was built from; finding none is an error.
    fn find_gse_for_gds(&self, dataset: &GeoAccession) -> Result<Vec<GeoAccession>, KiraError>;
}

#[derive(Clone)]
pub struct NcbiHttpClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl NcbiHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-geo/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Filesystem(err.to_string()))?,
        );

        let api_key = std::env::var("NCBI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        if let Some(api_key) = &api_key {
            headers.insert(
                "api-key",
                HeaderValue::from_str(api_key)
                    .map_err(|err| KiraError::Filesystem(err.to_string()))?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: EUTILS_BASE.to_string(),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn eutil(&self, tool: &str, params: &[(&str, String)]) -> Result<String, KiraError> {
        let url = format!("{}/{tool}.fcgi", self.base_url.trim_end_matches('/'));
        let response = self.send_with_retries(|| {
            let mut request = self.client.get(&url).query(params);
            if let Some(key) = &self.api_key {
                request = request.query(&[("api_key", key.as_str())]);
            }
            request
        })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "NCBI request failed".to_string());
            return Err(KiraError::NcbiStatus { status, message });
        }
        response
            .text()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))
    }

    /// esearch then esummary on the gds database; `None` when the search finds nothing.
    fn summarize(&self, term: &str) -> Result<Option<String>, KiraError> {
        let search = self.eutil(
            "esearch",
            &[
                ("db", "gds".to_string()),
                ("term", term.to_string()),
                ("retmax", MAX_RESULTS.to_string()),
            ],
        )?;
        let ids = parse_search_ids(&search);
        debug!(term, hits = ids.len(), "esearch");
        if ids.is_empty() {
            return Ok(None);
        }
        let summary = self.eutil(
            "esummary",
            &[("db", "gds".to_string()), ("id", ids.join(","))],
        )?;
        Ok(Some(summary))
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, KiraError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::NcbiHttp(err.to_string()));
                }
            }
        }
    }
}

impl EntrezClient for NcbiHttpClient {
    fn find_gds_for_gse(&self, series: &GeoAccession) -> Result<Vec<GeoAccession>, KiraError> {
        match self.summarize(series.as_str())? {
            Some(summary) => parse_gds_summary(&summary),
            None => Ok(Vec::new()),
        }
    }

    fn find_gse_for_gds(&self, dataset: &GeoAccession) -> Result<Vec<GeoAccession>, KiraError> {
        let summary = self
            .summarize(&format!("{}[Accession]", dataset.as_str()))?
            .unwrap_or_default();
        let series = parse_gse_summary(&summary)?;
        if series.is_empty() {
            return Err(KiraError::EntrezLookup(format!("No GSE found for {dataset}")));
        }
        Ok(series)
    }
}

pub fn parse_search_ids(xml: &str) -> Vec<String> {
    SEARCH_ID
        .captures_iter(xml)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Dataset accessions from the summaries whose entry type is `GDS`.
pub fn parse_gds_summary(xml: &str) -> Result<Vec<GeoAccession>, KiraError> {
    let mut datasets = IndexSet::new();
    for doc in DOC_SUM.captures_iter(xml) {
        let body = &doc[1];
        let is_dataset = ENTRY_TYPE
            .captures(body)
            .map(|caps| caps[1].trim() == "GDS")
            .unwrap_or(false);
        if !is_dataset {
            continue;
        }
        if let Some(caps) = GDS_ITEM.captures(body) {
            // a record may list several datasets separated by ';'
            for number in caps[1].split(';').map(str::trim).filter(|n| !n.is_empty()) {
                datasets.insert(format!("GDS{number}").parse::<GeoAccession>()?);
            }
        }
    }
    Ok(datasets.into_iter().collect())
}

/// Series accessions mentioned by a dataset summary.
pub fn parse_gse_summary(xml: &str) -> Result<Vec<GeoAccession>, KiraError> {
    let mut series = IndexSet::new();
    for caps in GSE_ITEM.captures_iter(xml) {
        for number in caps[1].split(';').map(str::trim).filter(|n| !n.is_empty()) {
            series.insert(format!("GSE{number}").parse::<GeoAccession>()?);
        }
    }
    for caps in GSE_RECORD.captures_iter(xml) {
        series.insert(caps[1].parse::<GeoAccession>()?);
    }
    Ok(series.into_iter().collect())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn search_ids_are_collected() {
        let xml = "<eSearchResult><IdList><Id>200000674</Id><Id>674</Id></IdList></eSearchResult>";
        assert_eq!(parse_search_ids(xml), vec!["200000674", "674"]);
    }
}
