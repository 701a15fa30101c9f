//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use evidence_map::{db::GraphStore, properties::EvidenceMetadata};
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times: subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Open a fresh store in its own temp directory. Keep the `TempDir` alive for as long as the
/// store is in use.
#[allow(dead_code)]
pub async fn temp_store() -> (TempDir, GraphStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = GraphStore::open(dir.path().join("evidence_map.db"))
        .await
        .unwrap();
    (dir, store)
}

#[allow(dead_code)]
pub fn metadata(doi: &str) -> EvidenceMetadata {
    EvidenceMetadata {
        doi: doi.to_string(),
        title: "Job burnout".to_string(),
        author: "Maslach".to_string(),
        year: "2001".to_string(),
        journal: "Annual Review of Psychology".to_string(),
    }
}
