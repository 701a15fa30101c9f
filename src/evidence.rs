//! Evidence graph engine: factors and DOI-keyed evidence relationships inside one map.
//!
//! Every mutation matches factors on `(name, mapName)`, never on name alone, so two maps
//! can hold factors with the same name without seeing each other.
use sqlx::sqlite::SqliteConnection;

use crate::{
    db::{authorize, ensure_map, GraphStore},
    error::EvidenceMapError,
    graph::{EvidenceGraph, GraphElements},
    identity::{EvidenceKey, FactorKey},
    properties::{EvidenceEdge, EvidenceMetadata, Factor},
};

fn require(value: &str, what: &str) -> Result<(), EvidenceMapError> {
    if value.trim().is_empty() {
        return Err(EvidenceMapError::InvalidRequest(format!("{what} is required")));
    }
    Ok(())
}

/// Read the factors of `map_name` and every evidence edge between two of them.
pub(crate) async fn load_evidence_graph(
    conn: &mut SqliteConnection,
    map_name: &str,
) -> Result<EvidenceGraph, EvidenceMapError> {
    let factors = sqlx::query_as::<_, Factor>(
        "SELECT map_name, name, definition FROM factors WHERE map_name = ? ORDER BY name",
    )
    .bind(map_name)
    .fetch_all(&mut *conn)
    .await?;
    let edges = sqlx::query_as::<_, EvidenceEdge>(
        "SELECT source, target, doi, title, author, year, journal, level, causality, notes \
         FROM evidence WHERE map_name = ? ORDER BY source, target, doi",
    )
    .bind(map_name)
    .fetch_all(&mut *conn)
    .await?;
    Ok(EvidenceGraph::from_parts(factors, edges))
}

pub(crate) async fn upsert_factor(
    conn: &mut SqliteConnection,
    key: &FactorKey,
    definition: &str,
) -> Result<bool, EvidenceMapError> {
    let created = sqlx::query(
        "INSERT INTO factors (map_name, name, definition) VALUES (?, ?, ?) \
         ON CONFLICT(map_name, name) DO NOTHING",
    )
    .bind(&key.map_name)
    .bind(&key.name)
    .bind(definition)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        > 0;
    Ok(created)
}

impl GraphStore {
    /// Factors and evidence of a map as a node/edge element list. An empty map name yields
    /// an empty graph instead of an error.
    #[tracing::instrument(skip(self, password))]
    pub async fn get_graph(
        &self,
        map_name: &str,
        password: Option<&str>,
    ) -> Result<GraphElements, EvidenceMapError> {
        if map_name.is_empty() {
            return Ok(GraphElements::default());
        }
        let mut conn = self.0.acquire().await?;
        authorize(&mut conn, map_name, password).await?;
        let graph = load_evidence_graph(&mut conn, map_name).await?;
        tracing::debug!(
            "[GraphStore.get_graph] '{}': {} factors, {} evidence edges",
            map_name,
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph.elements())
    }

    /// Create a factor on its own. Existing factors keep their definition.
    #[tracing::instrument(skip(self, definition))]
    pub async fn create_factor(
        &self,
        name: &str,
        definition: &str,
        map_name: &str,
    ) -> Result<bool, EvidenceMapError> {
        require(name, "Factor name")?;
        require(map_name, "Map name")?;
        let mut tx = self.0.begin().await?;
        ensure_map(&mut tx, map_name, "").await?;
        let created = upsert_factor(&mut tx, &FactorKey::new(map_name, name), definition).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Upsert both endpoint factors and the evidence edge keyed by `metadata.doi`. A first
    /// save records the citation metadata with empty notes; saving the same DOI again only
    /// moves `level` and `causality`.
    #[tracing::instrument(skip(self, metadata), fields(doi = %metadata.doi))]
    pub async fn save_relationship(
        &self,
        source: &str,
        target: &str,
        metadata: &EvidenceMetadata,
        level: &str,
        causality: &str,
        map_name: &str,
    ) -> Result<(), EvidenceMapError> {
        require(source, "Source factor")?;
        require(target, "Target factor")?;
        require(map_name, "Map name")?;
        require(&metadata.doi, "DOI")?;

        let mut tx = self.0.begin().await?;
        if ensure_map(&mut tx, map_name, "").await? {
            tracing::info!(
                "[GraphStore.save_relationship] created public map '{}' on first write",
                map_name
            );
        }
        upsert_factor(&mut tx, &FactorKey::new(map_name, source), "").await?;
        upsert_factor(&mut tx, &FactorKey::new(map_name, target), "").await?;
        sqlx::query(
            "INSERT INTO evidence \
             (map_name, source, target, doi, title, author, year, journal, level, causality, notes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '') \
             ON CONFLICT(map_name, source, target, doi) DO UPDATE SET \
             level = excluded.level, causality = excluded.causality",
        )
        .bind(map_name)
        .bind(source)
        .bind(target)
        .bind(&metadata.doi)
        .bind(&metadata.title)
        .bind(&metadata.author)
        .bind(&metadata.year)
        .bind(&metadata.journal)
        .bind(level)
        .bind(causality)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Overwrite level, causality and notes of one evidence edge. Returns whether an edge
    /// matched; a miss is not an error.
    #[tracing::instrument(skip(self, notes))]
    pub async fn update_relationship(
        &self,
        key: &EvidenceKey,
        level: &str,
        causality: &str,
        notes: &str,
    ) -> Result<bool, EvidenceMapError> {
        let mut conn = self.0.acquire().await?;
        let updated = sqlx::query(
            "UPDATE evidence SET level = ?, causality = ?, notes = ? \
             WHERE map_name = ? AND source = ? AND target = ? AND doi = ?",
        )
        .bind(level)
        .bind(causality)
        .bind(notes)
        .bind(&key.map_name)
        .bind(&key.source)
        .bind(&key.target)
        .bind(&key.doi)
        .execute(&mut *conn)
        .await?
        .rows_affected()
            > 0;
        if !updated {
            tracing::warn!(
                "[GraphStore.update_relationship] no evidence edge {}; nothing updated",
                key
            );
        }
        Ok(updated)
    }

    /// Rename a factor. Its evidence edges follow the new name.
    #[tracing::instrument(skip(self))]
    pub async fn rename_factor(
        &self,
        old_name: &str,
        new_name: &str,
        map_name: &str,
    ) -> Result<bool, EvidenceMapError> {
        require(new_name, "New factor name")?;
        let mut conn = self.0.acquire().await?;
        let renamed = sqlx::query("UPDATE factors SET name = ? WHERE map_name = ? AND name = ?")
            .bind(new_name)
            .bind(map_name)
            .bind(old_name)
            .execute(&mut *conn)
            .await
            .map_err(|e| match EvidenceMapError::from(e) {
                EvidenceMapError::Conflict(_) => EvidenceMapError::Conflict(format!(
                    "Factor '{new_name}' already exists in map '{map_name}'"
                )),
                other => other,
            })?
            .rows_affected()
            > 0;
        Ok(renamed)
    }

    #[tracing::instrument(skip(self, definition))]
    pub async fn set_definition(
        &self,
        name: &str,
        definition: &str,
        map_name: &str,
    ) -> Result<bool, EvidenceMapError> {
        let mut conn = self.0.acquire().await?;
        let updated =
            sqlx::query("UPDATE factors SET definition = ? WHERE map_name = ? AND name = ?")
                .bind(definition)
                .bind(map_name)
                .bind(name)
                .execute(&mut *conn)
                .await?
                .rows_affected()
                > 0;
        Ok(updated)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_relationship(&self, key: &EvidenceKey) -> Result<bool, EvidenceMapError> {
        let mut conn = self.0.acquire().await?;
        let deleted = sqlx::query(
            "DELETE FROM evidence WHERE map_name = ? AND source = ? AND target = ? AND doi = ?",
        )
        .bind(&key.map_name)
        .bind(&key.source)
        .bind(&key.target)
        .bind(&key.doi)
        .execute(&mut *conn)
        .await?
        .rows_affected()
            > 0;
        Ok(deleted)
    }

    /// Delete a factor together with every evidence edge touching it.
    #[tracing::instrument(skip(self))]
    pub async fn delete_factor(&self, key: &FactorKey) -> Result<bool, EvidenceMapError> {
        let mut conn = self.0.acquire().await?;
        let deleted = sqlx::query("DELETE FROM factors WHERE map_name = ? AND name = ?")
            .bind(&key.map_name)
            .bind(&key.name)
            .execute(&mut *conn)
            .await?
            .rows_affected()
            > 0;
        Ok(deleted)
    }
}
