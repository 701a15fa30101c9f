use crate::{db::EVIDENCE_MAP_DB, error::EvidenceMapError};
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    net::SocketAddr,
    path::PathBuf,
};

pub const DEFAULT_BIND: &str = "127.0.0.1:3001";
pub const DEFAULT_BODY_LIMIT: usize = 50 * 1024 * 1024;

/// Settings of the HTTP service. Every key is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind: String,
    pub database: PathBuf,
    pub body_limit_bytes: usize,
    pub doi_endpoint: String,
    pub isbn_endpoint: String,
    pub lookup_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            bind: DEFAULT_BIND.to_string(),
            database: PathBuf::from(EVIDENCE_MAP_DB),
            body_limit_bytes: DEFAULT_BODY_LIMIT,
            doi_endpoint: "https://api.crossref.org/works/".to_string(),
            isbn_endpoint: "https://www.googleapis.com/books/v1/volumes".to_string(),
            lookup_timeout_secs: 10,
        }
    }
}

impl ServiceConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, EvidenceMapError> {
        self.bind.parse::<SocketAddr>().map_err(|e| {
            EvidenceMapError::InvalidRequest(format!("invalid bind address '{}': {e}", self.bind))
        })
    }
}

pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<ServiceConfig, EvidenceMapError>;
    fn save(&self, config: &ServiceConfig) -> Result<(), EvidenceMapError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn load(&self) -> Result<ServiceConfig, EvidenceMapError> {
        tracing::debug!("Attempting to read service config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(ServiceConfig::default());
        }
        let content = read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    fn save(&self, config: &ServiceConfig) -> Result<(), EvidenceMapError> {
        tracing::debug!("Attempting to write service config to: {:?}", &self.path);
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}
