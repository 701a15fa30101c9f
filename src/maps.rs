//! Map registry: tenant containers hanging off the `Maps` root node.
use crate::{
    db::{ensure_map, ensure_root, fetch_map, GraphStore},
    error::EvidenceMapError,
    identity::ROOT_NAME,
};

impl GraphStore {
    /// Names of every map linked to the root, lexicographically ordered. Creates the root
    /// node if this is the first call against a fresh store.
    #[tracing::instrument(skip(self))]
    pub async fn list_maps(&self) -> Result<Vec<String>, EvidenceMapError> {
        let mut conn = self.0.acquire().await?;
        ensure_root(&mut conn).await?;
        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM maps WHERE root = ? ORDER BY name",
        )
        .bind(ROOT_NAME)
        .fetch_all(&mut *conn)
        .await?;
        Ok(names)
    }

    /// Create a map. Idempotent: calling it again for an existing map succeeds without
    /// touching the stored password.
    #[tracing::instrument(skip(self, password))]
    pub async fn create_map(&self, name: &str, password: &str) -> Result<(), EvidenceMapError> {
        if name.trim().is_empty() {
            return Err(EvidenceMapError::InvalidRequest(
                "Map name is required".to_string(),
            ));
        }
        let mut conn = self.0.acquire().await?;
        if !ensure_map(&mut conn, name, password).await? {
            tracing::debug!("[GraphStore.create_map] map '{}' already exists", name);
        }
        Ok(())
    }

    /// Delete a map and every factor scoped to it (evidence edges go with their factors).
    #[tracing::instrument(skip(self, password))]
    pub async fn delete_map(
        &self,
        name: &str,
        password: Option<&str>,
    ) -> Result<(), EvidenceMapError> {
        let mut tx = self.0.begin().await?;
        let Some(map) = fetch_map(&mut tx, name).await? else {
            return Err(EvidenceMapError::NotFound(format!("Map '{name}' not found")));
        };
        if !map.admits(password) {
            return Err(EvidenceMapError::Forbidden);
        }

        // Factors first, then the map itself.
        let factors = sqlx::query("DELETE FROM factors WHERE map_name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM maps WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            "[GraphStore.delete_map] deleted map '{}' with {} factors",
            name,
            factors
        );
        Ok(())
    }
}
