//! Quality matrix reconciliation.
//!
//! A matrix is stored per paradigm as a fixed-depth tree,
//! `Paradigm -> Group (level1) -> Category (level2) -> Row`, with columns linked under each
//! group and methods or applicability ratings at row x column intersections. Saving is a
//! full sync against the submitted document and runs in a single transaction: a failure at
//! any step leaves the previously stored matrix untouched.
use sqlx::{sqlite::SqliteConnection, FromRow};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    db::GraphStore,
    error::EvidenceMapError,
    identity::{CellKey, ColumnId, MethodId, RowId},
    properties::{Cell, CellMethod, Matrix, MatrixColumn, MatrixRow},
};

/// Counts of what one save touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatrixSaveReport {
    pub rows: usize,
    pub columns: usize,
    pub cells: usize,
    pub skipped_cells: usize,
    pub pruned_rows: usize,
    pub pruned_columns: usize,
}

#[derive(Debug, FromRow)]
struct StoredCellMethod {
    id: String,
    name: String,
    suitability: String,
    resources: String,
    cell_suitability: String,
    row_id: String,
    technique_id: String,
}

#[derive(Debug, FromRow)]
struct StoredApplicability {
    row_id: String,
    technique_id: String,
    suitability: String,
}

async fn linked_columns(
    conn: &mut SqliteConnection,
    paradigm: &str,
) -> Result<BTreeSet<ColumnId>, EvidenceMapError> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT DISTINCT technique_id FROM group_techniques WHERE paradigm = ?",
    )
    .bind(paradigm)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().map(ColumnId).collect())
}

async fn upsert_row(
    conn: &mut SqliteConnection,
    paradigm: &str,
    row: &MatrixRow,
) -> Result<(), EvidenceMapError> {
    let owner = sqlx::query_scalar::<_, String>("SELECT paradigm FROM matrix_rows WHERE id = ?")
        .bind(row.id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(owner) = owner.filter(|owner| owner != paradigm) {
        return Err(EvidenceMapError::Conflict(format!(
            "row '{}' belongs to the '{}' matrix",
            row.id, owner
        )));
    }
    sqlx::query(
        "INSERT INTO design_groups (paradigm, name) VALUES (?, ?) \
         ON CONFLICT(paradigm, name) DO NOTHING",
    )
    .bind(paradigm)
    .bind(&row.level1)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "INSERT INTO design_categories (paradigm, group_name, name, definition) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT(paradigm, group_name, name) DO UPDATE SET definition = excluded.definition",
    )
    .bind(paradigm)
    .bind(&row.level1)
    .bind(&row.level2)
    .bind(&row.cat_definition)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "INSERT INTO matrix_rows (id, paradigm, group_name, category, name, definition, risks, ord) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET group_name = excluded.group_name, \
         category = excluded.category, name = excluded.name, \
         definition = excluded.definition, risks = excluded.risks, ord = excluded.ord",
    )
    .bind(row.id.as_str())
    .bind(paradigm)
    .bind(&row.level1)
    .bind(&row.level2)
    .bind(&row.name)
    .bind(&row.definition)
    .bind(&row.risks)
    .bind(row.order)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_column(
    conn: &mut SqliteConnection,
    column: &MatrixColumn,
) -> Result<(), EvidenceMapError> {
    sqlx::query(
        "INSERT INTO techniques (id, name, risks, ord) VALUES (?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
         name = excluded.name, risks = excluded.risks, ord = excluded.ord",
    )
    .bind(column.id.as_str())
    .bind(&column.name)
    .bind(&column.risks)
    .bind(column.order)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Bring one cell in line with the submitted contents. Methods still present keep their id
/// (and with it their attached resources); methods missing from the submission are deleted.
/// A method may move between cells of the same paradigm but never into another one.
async fn apply_cell(
    conn: &mut SqliteConnection,
    paradigm: &str,
    key: &CellKey,
    cell: &Cell,
) -> Result<(), EvidenceMapError> {
    let existing = sqlx::query_scalar::<_, String>(
        "SELECT id FROM research_methods WHERE row_id = ? AND technique_id = ?",
    )
    .bind(key.row.as_str())
    .bind(key.column.as_str())
    .fetch_all(&mut *conn)
    .await?;
    let submitted = cell
        .methods
        .iter()
        .map(|m| m.id.as_str())
        .collect::<BTreeSet<_>>();
    for stale in existing.iter().filter(|id| !submitted.contains(id.as_str())) {
        sqlx::query("DELETE FROM research_methods WHERE id = ?")
            .bind(stale)
            .execute(&mut *conn)
            .await?;
    }

    for (position, method) in cell.methods.iter().enumerate() {
        let owner = sqlx::query_scalar::<_, String>(
            "SELECT r.paradigm FROM research_methods m JOIN matrix_rows r ON r.id = m.row_id \
             WHERE m.id = ?",
        )
        .bind(method.id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(owner) = owner.filter(|owner| owner != paradigm) {
            return Err(EvidenceMapError::Conflict(format!(
                "method '{}' is placed in the '{}' matrix",
                method.id, owner
            )));
        }
        let resources = serde_json::to_string(&method.resources)?;
        sqlx::query(
            "INSERT INTO research_methods \
             (id, name, suitability, resources, matrix_type, cell_suitability, position, row_id, technique_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             name = excluded.name, suitability = excluded.suitability, \
             resources = excluded.resources, matrix_type = excluded.matrix_type, \
             cell_suitability = excluded.cell_suitability, position = excluded.position, \
             row_id = excluded.row_id, technique_id = excluded.technique_id",
        )
        .bind(method.id.as_str())
        .bind(&method.name)
        .bind(&method.val)
        .bind(resources)
        .bind(paradigm)
        .bind(&cell.suitability)
        .bind(position as i64)
        .bind(key.row.as_str())
        .bind(key.column.as_str())
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query("DELETE FROM applicability WHERE row_id = ? AND technique_id = ?")
        .bind(key.row.as_str())
        .bind(key.column.as_str())
        .execute(&mut *conn)
        .await?;
    if cell.methods.is_empty() && !cell.suitability.is_empty() {
        sqlx::query(
            "INSERT INTO applicability (row_id, technique_id, suitability) VALUES (?, ?, ?)",
        )
        .bind(key.row.as_str())
        .bind(key.column.as_str())
        .bind(&cell.suitability)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

impl GraphStore {
    /// Reconcile the stored matrix of `paradigm` with `matrix`.
    ///
    /// Row and method ids are owned by the paradigm that first stored them; submitting one
    /// that another paradigm owns fails with [EvidenceMapError::Conflict] and nothing is saved.
    /// Rows of this paradigm missing from `matrix.rows` are deleted with their cells. Columns
    /// that were linked under this paradigm but are no longer submitted lose their links here
    /// and are deleted only once no other paradigm links them. Cell keys that do not name a
    /// submitted row and column are skipped.
    #[tracing::instrument(skip(self, matrix), fields(rows = matrix.rows.len(), cols = matrix.cols.len()))]
    pub async fn save_matrix(
        &self,
        paradigm: &str,
        matrix: &Matrix,
    ) -> Result<MatrixSaveReport, EvidenceMapError> {
        if paradigm.trim().is_empty() {
            return Err(EvidenceMapError::InvalidRequest(
                "Matrix type is required".to_string(),
            ));
        }
        let mut report = MatrixSaveReport {
            rows: matrix.rows.len(),
            columns: matrix.cols.len(),
            ..Default::default()
        };
        let row_ids = matrix
            .rows
            .iter()
            .map(|r| r.id.clone())
            .collect::<BTreeSet<RowId>>();
        let column_ids = matrix
            .cols
            .iter()
            .map(|c| c.id.clone())
            .collect::<BTreeSet<ColumnId>>();

        let mut tx = self.0.begin().await?;

        sqlx::query("INSERT INTO research_classes (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(paradigm)
            .execute(&mut *tx)
            .await?;

        for row in matrix.rows.iter() {
            upsert_row(&mut tx, paradigm, row).await?;
        }

        // Column membership is re-derived from the current row groups on every save.
        let previously_linked = linked_columns(&mut tx, paradigm).await?;
        sqlx::query("DELETE FROM group_techniques WHERE paradigm = ?")
            .bind(paradigm)
            .execute(&mut *tx)
            .await?;
        let groups = matrix
            .rows
            .iter()
            .map(|r| r.level1.as_str())
            .collect::<BTreeSet<_>>();
        for column in matrix.cols.iter() {
            upsert_column(&mut tx, column).await?;
            for group in groups.iter() {
                sqlx::query(
                    "INSERT INTO group_techniques (paradigm, group_name, technique_id) \
                     VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
                )
                .bind(paradigm)
                .bind(*group)
                .bind(column.id.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        for (wire, cell) in matrix.data.iter() {
            match CellKey::resolve(wire, &row_ids, &column_ids) {
                Ok(key) => {
                    apply_cell(&mut tx, paradigm, &key, cell).await?;
                    report.cells += 1;
                }
                Err(e) => {
                    tracing::warn!("[GraphStore.save_matrix] skipping cell: {}", e);
                    report.skipped_cells += 1;
                }
            }
        }

        let stored_rows = sqlx::query_scalar::<_, String>(
            "SELECT id FROM matrix_rows WHERE paradigm = ?",
        )
        .bind(paradigm)
        .fetch_all(&mut *tx)
        .await?;
        for stale in stored_rows
            .into_iter()
            .map(RowId)
            .filter(|id| !row_ids.contains(id))
        {
            sqlx::query("DELETE FROM matrix_rows WHERE id = ?")
                .bind(stale.as_str())
                .execute(&mut *tx)
                .await?;
            report.pruned_rows += 1;
        }

        for stale in previously_linked.difference(&column_ids) {
            sqlx::query(
                "DELETE FROM research_methods WHERE technique_id = ? \
                 AND row_id IN (SELECT id FROM matrix_rows WHERE paradigm = ?)",
            )
            .bind(stale.as_str())
            .bind(paradigm)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "DELETE FROM applicability WHERE technique_id = ? \
                 AND row_id IN (SELECT id FROM matrix_rows WHERE paradigm = ?)",
            )
            .bind(stale.as_str())
            .bind(paradigm)
            .execute(&mut *tx)
            .await?;
            let deleted = sqlx::query(
                "DELETE FROM techniques WHERE id = ? \
                 AND NOT EXISTS (SELECT 1 FROM group_techniques WHERE technique_id = ?)",
            )
            .bind(stale.as_str())
            .bind(stale.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if deleted > 0 {
                report.pruned_columns += 1;
            } else {
                tracing::debug!(
                    "[GraphStore.save_matrix] column '{}' still linked by another paradigm",
                    stale
                );
            }
        }

        tx.commit().await?;
        tracing::info!(
            "[GraphStore.save_matrix] '{}' saved: {:?}",
            paradigm,
            report
        );
        Ok(report)
    }

    /// Read the matrix of `paradigm` back into its wire form. Columns linked under several
    /// groups appear once; cells carry methods in submission order, and an applicability
    /// rating overrides the cell's stored suitability.
    #[tracing::instrument(skip(self))]
    pub async fn load_matrix(&self, paradigm: &str) -> Result<Matrix, EvidenceMapError> {
        let mut conn = self.0.acquire().await?;
        let rows = sqlx::query_as::<_, MatrixRow>(
            "SELECT r.id, r.name, r.group_name, r.category, r.definition, \
             c.definition AS cat_definition, r.risks, r.ord \
             FROM matrix_rows r \
             JOIN design_categories c \
               ON c.paradigm = r.paradigm AND c.group_name = r.group_name AND c.name = r.category \
             WHERE r.paradigm = ? ORDER BY r.ord, r.id",
        )
        .bind(paradigm)
        .fetch_all(&mut *conn)
        .await?;
        let cols = sqlx::query_as::<_, MatrixColumn>(
            "SELECT DISTINCT t.id, t.name, t.risks, t.ord \
             FROM techniques t JOIN group_techniques g ON g.technique_id = t.id \
             WHERE g.paradigm = ? ORDER BY t.ord, t.id",
        )
        .bind(paradigm)
        .fetch_all(&mut *conn)
        .await?;

        let row_ids = rows.iter().map(|r| r.id.clone()).collect::<BTreeSet<_>>();
        let column_ids = cols.iter().map(|c| c.id.clone()).collect::<BTreeSet<_>>();
        let visible = |row: &str, col: &str| {
            row_ids.contains(&RowId::from(row)) && column_ids.contains(&ColumnId::from(col))
        };

        let methods = sqlx::query_as::<_, StoredCellMethod>(
            "SELECT m.id, m.name, m.suitability, m.resources, m.cell_suitability, \
             m.row_id, m.technique_id \
             FROM research_methods m JOIN matrix_rows r ON r.id = m.row_id \
             WHERE r.paradigm = ? AND m.technique_id IS NOT NULL \
             ORDER BY m.row_id, m.technique_id, m.position, m.id",
        )
        .bind(paradigm)
        .fetch_all(&mut *conn)
        .await?;
        let applicability = sqlx::query_as::<_, StoredApplicability>(
            "SELECT a.row_id, a.technique_id, a.suitability \
             FROM applicability a JOIN matrix_rows r ON r.id = a.row_id \
             WHERE r.paradigm = ?",
        )
        .bind(paradigm)
        .fetch_all(&mut *conn)
        .await?;

        let mut data: BTreeMap<String, Cell> = BTreeMap::new();
        for stored in methods {
            if !visible(&stored.row_id, &stored.technique_id) {
                continue;
            }
            let key = CellKey::new(stored.row_id, stored.technique_id);
            let cell = data.entry(key.to_wire()).or_default();
            if cell.suitability.is_empty() {
                cell.suitability = stored.cell_suitability;
            }
            cell.methods.push(CellMethod {
                id: MethodId(stored.id),
                name: stored.name,
                val: stored.suitability,
                resources: serde_json::from_str(&stored.resources).unwrap_or_default(),
            });
        }
        for stored in applicability {
            if !visible(&stored.row_id, &stored.technique_id) {
                continue;
            }
            let key = CellKey::new(stored.row_id, stored.technique_id);
            data.entry(key.to_wire()).or_default().suitability = stored.suitability;
        }

        Ok(Matrix { rows, cols, data })
    }
}
