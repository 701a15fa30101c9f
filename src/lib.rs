//! # evidence-map
//!
//! Persistence backend for collaborative evidence maps and research-quality matrices.
//!
//! ## Overview
//!
//! An **evidence map** is a directed graph of *factors* connected by *evidence
//! relationships*, each backed by a DOI-identified publication. Maps are tenant containers
//! gated by an optional plaintext password; factor identity is always `(name, mapName)`, so
//! two maps may hold factors of the same name without interfering.
//!
//! A **quality matrix** classifies research designs (rows) against data-collection
//! techniques (columns) for one paradigm (e.g. `qualitative`). Cells hold research methods or
//! a bare suitability rating, and methods carry bibliographic or standards resources.
//!
//! Both live in one [`db::GraphStore`], a labeled property graph persisted in SQLite.
//!
//! ## Architecture
//!
//! - **[`identity`]**: composite keys (`FactorKey`, `CellKey`) and opaque matrix ids
//! - **[`properties`]**: stored records and their JSON wire shapes
//! - **[`db`]**: schema migrations, pool setup and the `GraphStore` handle
//! - **[`maps`]**, **[`evidence`]**, **[`exchange`]**: map registry, evidence graph engine,
//!   import/export
//! - **[`matrix`]**: full-state reconciliation of a submitted matrix
//! - **[`resources`]**: method resources with tag filtering
//! - **[`lookup`]**: DOI/ISBN citation lookups
//! - **`server`**: the HTTP surface (feature `service`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use evidence_map::{db::GraphStore, properties::EvidenceMetadata};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = GraphStore::open("evidence_map.db".into()).await?;
//!     store.create_map("Study1", "p").await?;
//!     let metadata = EvidenceMetadata {
//!         doi: "10.1/xyz".to_string(),
//!         ..Default::default()
//!     };
//!     store
//!         .save_relationship("Stress", "Burnout", &metadata, "strong", "direct", "Study1")
//!         .await?;
//!     let graph = store.get_graph("Study1", Some("p")).await?;
//!     for factor in graph.nodes() {
//!         println!("{}", factor.label);
//!     }
//!     store.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **default**: `service`
//! - **service**: HTTP API (`axum`) and HTTP metadata lookups (`reqwest`)
//! - **bin**: the `evidence-map` command line binary

pub mod config;
pub mod db;
pub mod error;
pub mod evidence;
pub mod exchange;
pub mod graph;
pub mod identity;
pub mod lookup;
pub mod maps;
pub mod matrix;
pub mod properties;
pub mod resources;
#[cfg(feature = "service")]
pub mod server;

pub use error::*;
