//! Citation metadata lookups by DOI and ISBN.
//!
//! [MetadataLookup] is the capability the service consumes; [HttpMetadataLookup] queries
//! Crossref and the Google Books volume API. The normalizers are plain functions over the
//! provider JSON so they can be exercised without a network.
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::{error::EvidenceMapError, properties::Citation};

#[cfg(feature = "service")]
use crate::config::ServiceConfig;
#[cfg(feature = "service")]
use std::time::Duration;
#[cfg(feature = "service")]
use url::Url;

static DOI_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://(?:dx\.)?doi\.org/|doi:\s*)").expect("DOI prefix pattern")
});
static NOT_ISBN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9X]").expect("ISBN pattern"));

const UNKNOWN: &str = "Unknown";
const NO_DATE: &str = "n.d.";

#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn lookup_doi(&self, doi: &str) -> Result<Citation, EvidenceMapError>;
    async fn lookup_isbn(&self, isbn: &str) -> Result<Citation, EvidenceMapError>;
}

/// Trim a DOI and strip resolver or `doi:` prefixes.
pub fn normalize_doi(raw: &str) -> Result<String, EvidenceMapError> {
    let doi = DOI_PREFIX.replace(raw.trim(), "").trim().to_string();
    if doi.is_empty() {
        return Err(EvidenceMapError::InvalidRequest("DOI is required".to_string()));
    }
    Ok(doi)
}

/// Reduce an ISBN to its digits (and check character); hyphens and spaces are dropped.
pub fn normalize_isbn(raw: &str) -> Result<String, EvidenceMapError> {
    let isbn = NOT_ISBN.replace_all(&raw.to_uppercase(), "").to_string();
    if isbn.len() != 10 && isbn.len() != 13 {
        return Err(EvidenceMapError::InvalidRequest(format!(
            "'{raw}' is not a 10 or 13 digit ISBN"
        )));
    }
    Ok(isbn)
}

fn text(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Normalize a Crossref `works` response.
pub fn citation_from_crossref(requested: &str, body: &Value) -> Result<Citation, EvidenceMapError> {
    let msg = body
        .get("message")
        .filter(|m| m.is_object())
        .ok_or_else(|| EvidenceMapError::UpstreamLookupFailed("Invalid DOI".to_string()))?;

    let year = match &msg["published"]["date-parts"][0][0] {
        Value::Number(n) => n.to_string(),
        Value::String(s) if !s.is_empty() => s.clone(),
        _ => NO_DATE.to_string(),
    };
    let first_author = &msg["author"][0];
    let author = match (text(&first_author["family"]), text(&first_author["given"])) {
        (Some(family), Some(given)) => format!("{family}, {given}"),
        (Some(family), None) => family.to_string(),
        (None, Some(given)) => given.to_string(),
        (None, None) => text(&first_author["name"]).unwrap_or(UNKNOWN).to_string(),
    };

    Ok(Citation {
        doi: text(&msg["DOI"]).unwrap_or(requested).to_string(),
        title: text(&msg["title"][0]).unwrap_or("Untitled").to_string(),
        year,
        author,
        journal: text(&msg["container-title"][0])
            .unwrap_or(UNKNOWN)
            .to_string(),
        abstract_text: text(&msg["abstract"]).map(str::to_string),
    })
}

/// Normalize the first volume of a Google Books search. The ISBN stands in for the DOI.
pub fn citation_from_isbn_volume(isbn: &str, body: &Value) -> Result<Citation, EvidenceMapError> {
    let info = &body["items"][0]["volumeInfo"];
    if !info.is_object() {
        return Err(EvidenceMapError::UpstreamLookupFailed(format!(
            "ISBN {isbn} not found"
        )));
    }
    let year = text(&info["publishedDate"])
        .map(|d| d.get(..4).unwrap_or(d).to_string())
        .unwrap_or_else(|| NO_DATE.to_string());
    Ok(Citation {
        doi: isbn.to_string(),
        title: text(&info["title"]).unwrap_or("Untitled").to_string(),
        year,
        author: text(&info["authors"][0]).unwrap_or(UNKNOWN).to_string(),
        journal: text(&info["publisher"]).unwrap_or(UNKNOWN).to_string(),
        abstract_text: Some(text(&info["description"]).unwrap_or_default().to_string()),
    })
}

/// Crossref work URL for `doi`. Each `/`-separated part of the DOI becomes its own path
/// segment, so `#`, `?` and the like are percent-encoded instead of read as URL syntax.
#[cfg(feature = "service")]
pub fn doi_work_url(endpoint: &Url, doi: &str) -> Result<Url, EvidenceMapError> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|_| {
            EvidenceMapError::InvalidRequest(format!("'{endpoint}' cannot take a DOI path"))
        })?
        .pop_if_empty()
        .extend(doi.split('/'));
    Ok(url)
}

/// Lookups against the public Crossref and Google Books endpoints.
#[cfg(feature = "service")]
#[derive(Debug, Clone)]
pub struct HttpMetadataLookup {
    client: reqwest::Client,
    doi_endpoint: Url,
    isbn_endpoint: Url,
}

#[cfg(feature = "service")]
impl HttpMetadataLookup {
    pub fn new(config: &ServiceConfig) -> Result<HttpMetadataLookup, EvidenceMapError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("evidence-map/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.lookup_timeout_secs))
            .build()?;
        Ok(HttpMetadataLookup {
            client,
            doi_endpoint: Url::parse(&config.doi_endpoint)?,
            isbn_endpoint: Url::parse(&config.isbn_endpoint)?,
        })
    }

    async fn fetch_json(&self, url: Url) -> Result<Value, EvidenceMapError> {
        tracing::debug!("[HttpMetadataLookup] GET {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(EvidenceMapError::UpstreamLookupFailed(format!(
                "provider answered {}",
                response.status()
            )));
        }
        Ok(response.json::<Value>().await?)
    }
}

#[cfg(feature = "service")]
#[async_trait]
impl MetadataLookup for HttpMetadataLookup {
    async fn lookup_doi(&self, doi: &str) -> Result<Citation, EvidenceMapError> {
        let doi = normalize_doi(doi)?;
        let url = doi_work_url(&self.doi_endpoint, &doi)?;
        let body = self.fetch_json(url).await?;
        citation_from_crossref(&doi, &body)
    }

    async fn lookup_isbn(&self, isbn: &str) -> Result<Citation, EvidenceMapError> {
        let isbn = normalize_isbn(isbn)?;
        let mut url = self.isbn_endpoint.clone();
        url.query_pairs_mut().append_pair("q", &format!("isbn:{isbn}"));
        let body = self.fetch_json(url).await?;
        citation_from_isbn_volume(&isbn, &body)
    }
}
