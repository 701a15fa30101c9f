//! Resources attached to research methods, with tag filtering.
use sqlx::sqlite::SqliteConnection;

use crate::{
    db::GraphStore,
    error::EvidenceMapError,
    identity::{MethodId, ResourceId},
    properties::{
        ResearchMethod, Resource, ResourceDraft, ResourceKind, ResourceKindSet, TagAction,
    },
};

/// Create the method if it does not exist yet. An existing method keeps its name.
async fn ensure_method(
    conn: &mut SqliteConnection,
    id: &MethodId,
    name: &str,
    matrix_type: Option<&str>,
) -> Result<bool, EvidenceMapError> {
    if id.as_str().trim().is_empty() {
        return Err(EvidenceMapError::InvalidRequest(
            "Method id is required".to_string(),
        ));
    }
    let created = sqlx::query(
        "INSERT INTO research_methods (id, name, matrix_type) VALUES (?, ?, ?) \
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(id.as_str())
    .bind(name)
    .bind(matrix_type)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        > 0;
    Ok(created)
}

fn dedup_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

impl GraphStore {
    #[tracing::instrument(skip(self))]
    pub async fn create_method(
        &self,
        id: &MethodId,
        name: &str,
        matrix_type: Option<&str>,
    ) -> Result<bool, EvidenceMapError> {
        let mut conn = self.0.acquire().await?;
        ensure_method(&mut conn, id, name, matrix_type).await
    }

    pub async fn get_method(
        &self,
        id: &MethodId,
    ) -> Result<Option<ResearchMethod>, EvidenceMapError> {
        let mut conn = self.0.acquire().await?;
        Ok(sqlx::query_as::<_, ResearchMethod>(
            "SELECT id, name, suitability, resources, matrix_type FROM research_methods WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?)
    }

    /// Attach a bibliographic reference to a method, creating the method on first reference.
    #[tracing::instrument(skip(self, draft), fields(title = %draft.title))]
    pub async fn add_resource(
        &self,
        method_id: &MethodId,
        method_name: &str,
        draft: &ResourceDraft,
    ) -> Result<ResourceId, EvidenceMapError> {
        self.attach_resource(ResourceKind::Reference, method_id, method_name, draft)
            .await
    }

    /// Attach a standard to a method. Standards carry no DOI.
    #[tracing::instrument(skip(self, draft), fields(title = %draft.title))]
    pub async fn add_standard_resource(
        &self,
        method_id: &MethodId,
        method_name: &str,
        draft: &ResourceDraft,
    ) -> Result<ResourceId, EvidenceMapError> {
        self.attach_resource(ResourceKind::Standard, method_id, method_name, draft)
            .await
    }

    async fn attach_resource(
        &self,
        kind: ResourceKind,
        method_id: &MethodId,
        method_name: &str,
        draft: &ResourceDraft,
    ) -> Result<ResourceId, EvidenceMapError> {
        let id = ResourceId::generate(kind.id_prefix());
        let doi = match kind {
            ResourceKind::Reference => draft.doi.as_deref().filter(|d| !d.trim().is_empty()),
            ResourceKind::Standard => None,
        };
        let tags = serde_json::to_string(&dedup_tags(&draft.tags))?;
        let attributes = draft
            .attributes
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.0.begin().await?;
        if ensure_method(&mut tx, method_id, method_name, None).await? {
            tracing::debug!(
                "[GraphStore.attach_resource] created method '{}' on first reference",
                method_id
            );
        }
        sqlx::query(
            "INSERT INTO resources \
             (id, method_id, kind, doi, title, author, year, journal, abstract, tags, attributes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(method_id.as_str())
        .bind(kind.as_str())
        .bind(doi)
        .bind(&draft.title)
        .bind(&draft.author)
        .bind(&draft.year)
        .bind(&draft.journal)
        .bind(&draft.abstract_text)
        .bind(tags)
        .bind(attributes)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Resources of a method whose type is in `kinds` (an empty set admits every type) and
    /// which pass the tag filter, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_resources(
        &self,
        method_id: &MethodId,
        kinds: ResourceKindSet,
        tags: &[String],
    ) -> Result<Vec<Resource>, EvidenceMapError> {
        let kinds = if kinds.is_empty() {
            ResourceKindSet::all()
        } else {
            kinds
        };
        let mut conn = self.0.acquire().await?;
        let mut resources = sqlx::query_as::<_, Resource>(
            "SELECT id, method_id, kind, doi, title, author, year, journal, abstract, tags, attributes \
             FROM resources WHERE method_id = ? ORDER BY id",
        )
        .bind(method_id.as_str())
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .filter(|r| kinds.contains(r.kind) && r.matches_tags(tags))
        .collect::<Vec<_>>();
        resources.sort_by(|a, b| b.sort_year().cmp(&a.sort_year()));
        Ok(resources)
    }

    /// Add or remove one tag. Tags behave as a set: adding a present tag and removing an
    /// absent one both leave the list as it was. Returns the resulting tags.
    #[tracing::instrument(skip(self))]
    pub async fn tag_resource(
        &self,
        resource_id: &ResourceId,
        tag: &str,
        action: TagAction,
    ) -> Result<Vec<String>, EvidenceMapError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(EvidenceMapError::InvalidRequest("Tag is required".to_string()));
        }
        let mut tx = self.0.begin().await?;
        let Some(stored) = sqlx::query_scalar::<_, String>("SELECT tags FROM resources WHERE id = ?")
            .bind(resource_id.as_str())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Err(EvidenceMapError::NotFound(format!(
                "Resource '{resource_id}' not found"
            )));
        };
        let mut tags = serde_json::from_str::<Vec<String>>(&stored)?;
        let changed = match action {
            TagAction::Add if !tags.iter().any(|t| t == tag) => {
                tags.push(tag.to_string());
                true
            }
            TagAction::Remove if tags.iter().any(|t| t == tag) => {
                tags.retain(|t| t != tag);
                true
            }
            _ => false,
        };
        if changed {
            sqlx::query("UPDATE resources SET tags = ? WHERE id = ?")
                .bind(serde_json::to_string(&tags)?)
                .bind(resource_id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(tags)
    }
}
