//! Import and export of a whole map as a portable document.
//!
//! Edges are addressed by factor name, not by store-internal ids, so a document exported
//! from one store imports cleanly into another.
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::Sqlite, QueryBuilder};
use std::collections::BTreeSet;

use crate::{
    db::{authorize, ensure_map, fetch_map, GraphStore},
    error::EvidenceMapError,
    evidence::load_evidence_graph,
    properties::{EvidenceEdge, Factor, MapRecord},
};

/// Rows per bulk INSERT. Keeps bound parameters well under SQLite's variable limit.
const BULK_CHUNK: usize = 500;

/// Export document: map properties, factor property maps and evidence triples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapExport {
    pub map: MapRecord,
    pub nodes: Vec<Factor>,
    pub edges: Vec<EvidenceEdge>,
}

/// Import payload. Older clients send the map under `mapData`, newer ones under `map`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapImport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<MapRecord>,
    #[serde(rename = "mapData", default, skip_serializing_if = "Option::is_none")]
    pub map_data: Option<MapRecord>,
    #[serde(default)]
    pub nodes: Vec<Factor>,
    #[serde(default)]
    pub edges: Vec<EvidenceEdge>,
}

impl MapImport {
    pub fn map_record(&self) -> Option<&MapRecord> {
        self.map.as_ref().or(self.map_data.as_ref())
    }
}

impl From<MapExport> for MapImport {
    fn from(export: MapExport) -> Self {
        MapImport {
            map: Some(export.map),
            map_data: None,
            nodes: export.nodes,
            edges: export.edges,
        }
    }
}

impl GraphStore {
    #[tracing::instrument(skip(self, password))]
    pub async fn export_map(
        &self,
        map_name: &str,
        password: Option<&str>,
    ) -> Result<MapExport, EvidenceMapError> {
        let mut conn = self.0.acquire().await?;
        let map = authorize(&mut conn, map_name, password).await?;
        let graph = load_evidence_graph(&mut conn, map_name).await?;
        Ok(MapExport {
            map,
            nodes: graph.factors().cloned().collect(),
            edges: graph.edges(),
        })
    }

    /// Create a map from an export document. Create-only: an existing map of the same name
    /// is a conflict, never a merge. The map, its factors and its edges are written in one
    /// transaction, so an edge naming a factor missing from `nodes` leaves nothing behind.
    #[tracing::instrument(skip(self, payload), fields(nodes = payload.nodes.len(), edges = payload.edges.len()))]
    pub async fn import_map(&self, payload: &MapImport) -> Result<(), EvidenceMapError> {
        let Some(map) = payload.map_record() else {
            return Err(EvidenceMapError::InvalidRequest(
                "Import payload needs a 'map' or 'mapData' entry".to_string(),
            ));
        };
        if map.name.trim().is_empty() {
            return Err(EvidenceMapError::InvalidRequest(
                "Imported map has no name".to_string(),
            ));
        }

        let names = payload
            .nodes
            .iter()
            .map(|n| n.name.as_str())
            .collect::<BTreeSet<_>>();
        if let Some(dangling) = payload
            .edges
            .iter()
            .find(|e| !names.contains(e.source.as_str()) || !names.contains(e.target.as_str()))
        {
            return Err(EvidenceMapError::InvalidRequest(format!(
                "Edge {} -> {} ({}) references a factor missing from the node list",
                dangling.source, dangling.target, dangling.props.doi
            )));
        }

        let mut tx = self.0.begin().await?;
        if fetch_map(&mut tx, &map.name).await?.is_some() {
            return Err(EvidenceMapError::Conflict(format!(
                "Map '{}' already exists",
                map.name
            )));
        }
        ensure_map(&mut tx, &map.name, &map.password).await?;

        for chunk in payload.nodes.chunks(BULK_CHUNK) {
            let mut qb =
                QueryBuilder::<Sqlite>::new("INSERT INTO factors (map_name, name, definition) ");
            qb.push_values(chunk, |mut b, node| {
                b.push_bind(map.name.clone())
                    .push_bind(node.name.clone())
                    .push_bind(node.definition.clone());
            });
            qb.push(" ON CONFLICT(map_name, name) DO UPDATE SET definition = excluded.definition");
            qb.build().execute(&mut *tx).await?;
        }

        for chunk in payload.edges.chunks(BULK_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO evidence \
                 (map_name, source, target, doi, title, author, year, journal, level, causality, notes) ",
            );
            qb.push_values(chunk, |mut b, edge| {
                b.push_bind(map.name.clone())
                    .push_bind(edge.source.clone())
                    .push_bind(edge.target.clone())
                    .push_bind(edge.props.doi.clone())
                    .push_bind(edge.props.title.clone())
                    .push_bind(edge.props.author.clone())
                    .push_bind(edge.props.year.clone())
                    .push_bind(edge.props.journal.clone())
                    .push_bind(edge.props.level.clone())
                    .push_bind(edge.props.causality.clone())
                    .push_bind(edge.props.notes.clone());
            });
            qb.push(
                " ON CONFLICT(map_name, source, target, doi) DO UPDATE SET \
                 title = excluded.title, author = excluded.author, year = excluded.year, \
                 journal = excluded.journal, level = excluded.level, \
                 causality = excluded.causality, notes = excluded.notes",
            );
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::info!(
            "[GraphStore.import_map] imported '{}': {} factors, {} evidence edges",
            map.name,
            payload.nodes.len(),
            payload.edges.len()
        );
        Ok(())
    }
}
