//! Graph store: the labeled property graph behind both the evidence maps and the quality
//! matrix, persisted in SQLite.
//!
//! Node labels are tables keyed by their identity key. Relationship types are either
//! foreign-key columns (ownership: `BELONGS_TO`, `HAS_CATEGORY`, `HAS_METHOD`,
//! `HAS_RESOURCE`) or link tables (`EVIDENCE`, `HAS_TECHNIQUE`, `APPLICABILITY`). Detach
//! deletes are `ON DELETE CASCADE` foreign keys, so every delete takes its incident edges
//! with it.
//!
//! ```text
//! root_nodes -HAS_MAP-> maps <-BELONGS_TO- factors -EVIDENCE-> factors
//!
//! research_classes -HAS_DESIGN_CLASS-> design_groups -HAS_CATEGORY-> design_categories
//!     -HAS_SUB_CATEGORY-> matrix_rows -HAS_METHOD-> research_methods -HAS_RESOURCE-> resources
//! design_groups -HAS_TECHNIQUE-> techniques <-USES_TECHNIQUE- research_methods
//! matrix_rows -APPLICABILITY-> techniques
//! ```
use futures_core::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{MigrateDatabase, Migration as SqlxMigration, MigrationSource, MigrationType, Migrator},
    pool::PoolOptions,
    sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode},
    ConnectOptions, Pool, Row,
};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::{error::EvidenceMapError, identity::ROOT_NAME, properties::MapRecord};

pub const EVIDENCE_MAP_DB: &str = "evidence_map.db";

/// Handle on the graph store. Constructed once at startup and passed to every consumer;
/// each operation borrows one pooled connection (or one transaction) for its duration and
/// hands it back when the guard drops, on success and failure alike.
#[derive(Debug, Clone)]
pub struct GraphStore(pub Pool<Sqlite>);

/// Node and edge counts, mostly for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub maps: i64,
    pub factors: i64,
    pub evidence: i64,
    pub rows: i64,
    pub techniques: i64,
    pub methods: i64,
    pub resources: i64,
}

impl GraphStore {
    pub async fn open(db_path: PathBuf) -> Result<GraphStore, EvidenceMapError> {
        Ok(GraphStore(db_init(db_path).await?))
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.0
    }

    /// Close the pool, waiting for checked-out connections to come back.
    pub async fn close(&self) {
        self.0.close().await;
        tracing::info!("[GraphStore] connection pool closed");
    }

    pub async fn stats(&self) -> Result<StoreStats, EvidenceMapError> {
        let mut conn = self.0.acquire().await?;
        let row = sqlx::query(
            "SELECT \
             (SELECT COUNT(*) FROM maps) AS maps, \
             (SELECT COUNT(*) FROM factors) AS factors, \
             (SELECT COUNT(*) FROM evidence) AS evidence, \
             (SELECT COUNT(*) FROM matrix_rows) AS matrix_rows, \
             (SELECT COUNT(*) FROM techniques) AS techniques, \
             (SELECT COUNT(*) FROM research_methods) AS methods, \
             (SELECT COUNT(*) FROM resources) AS resources",
        )
        .fetch_one(&mut *conn)
        .await?;
        Ok(StoreStats {
            maps: row.try_get("maps")?,
            factors: row.try_get("factors")?,
            evidence: row.try_get("evidence")?,
            rows: row.try_get("matrix_rows")?,
            techniques: row.try_get("techniques")?,
            methods: row.try_get("methods")?,
            resources: row.try_get("resources")?,
        })
    }

    /// Check that `map_name` exists and `password` opens it. Every map-scoped read goes
    /// through here before touching any factor.
    #[tracing::instrument(skip(self, password))]
    pub async fn authorize(
        &self,
        map_name: &str,
        password: Option<&str>,
    ) -> Result<MapRecord, EvidenceMapError> {
        let mut conn = self.0.acquire().await?;
        authorize(&mut conn, map_name, password).await
    }
}

pub(crate) async fn fetch_map(
    conn: &mut SqliteConnection,
    map_name: &str,
) -> Result<Option<MapRecord>, EvidenceMapError> {
    Ok(
        sqlx::query_as::<_, MapRecord>("SELECT name, password FROM maps WHERE name = ?")
            .bind(map_name)
            .fetch_optional(&mut *conn)
            .await?,
    )
}

pub(crate) async fn authorize(
    conn: &mut SqliteConnection,
    map_name: &str,
    password: Option<&str>,
) -> Result<MapRecord, EvidenceMapError> {
    let Some(map) = fetch_map(conn, map_name).await? else {
        return Err(EvidenceMapError::NotFound(format!("Map '{map_name}' not found")));
    };
    if !map.admits(password) {
        tracing::debug!("[authorize] password mismatch for map '{}'", map_name);
        return Err(EvidenceMapError::Forbidden);
    }
    Ok(map)
}

pub(crate) async fn ensure_root(conn: &mut SqliteConnection) -> Result<(), EvidenceMapError> {
    sqlx::query("INSERT INTO root_nodes (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(ROOT_NAME)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Create the map under the root if it is missing. An existing map keeps its password.
pub(crate) async fn ensure_map(
    conn: &mut SqliteConnection,
    map_name: &str,
    password: &str,
) -> Result<bool, EvidenceMapError> {
    ensure_root(conn).await?;
    let created = sqlx::query(
        "INSERT INTO maps (name, password, root) VALUES (?, ?, ?) ON CONFLICT(name) DO NOTHING",
    )
    .bind(map_name)
    .bind(password)
    .bind(ROOT_NAME)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        > 0;
    Ok(created)
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::Simple) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

fn migrations() -> MigrationList {
    MigrationList(vec![
        Migration {
            version: 1,
            description: "create_evidence_map_tables",
            sql: "\
            CREATE TABLE root_nodes (name TEXT PRIMARY KEY); \
            CREATE TABLE maps (\
                name TEXT PRIMARY KEY, \
                password TEXT NOT NULL DEFAULT '', \
                root TEXT NOT NULL REFERENCES root_nodes(name)); \
            CREATE TABLE factors (\
                map_name TEXT NOT NULL REFERENCES maps(name) ON DELETE CASCADE ON UPDATE CASCADE, \
                name TEXT NOT NULL, \
                definition TEXT NOT NULL DEFAULT '', \
                PRIMARY KEY (map_name, name)); \
            CREATE TABLE evidence (\
                map_name TEXT NOT NULL, \
                source TEXT NOT NULL, \
                target TEXT NOT NULL, \
                doi TEXT NOT NULL, \
                title TEXT NOT NULL DEFAULT '', \
                author TEXT NOT NULL DEFAULT '', \
                year TEXT NOT NULL DEFAULT '', \
                journal TEXT NOT NULL DEFAULT '', \
                level TEXT NOT NULL DEFAULT '', \
                causality TEXT NOT NULL DEFAULT '', \
                notes TEXT NOT NULL DEFAULT '', \
                PRIMARY KEY (map_name, source, target, doi), \
                FOREIGN KEY (map_name, source) REFERENCES factors(map_name, name) \
                    ON DELETE CASCADE ON UPDATE CASCADE, \
                FOREIGN KEY (map_name, target) REFERENCES factors(map_name, name) \
                    ON DELETE CASCADE ON UPDATE CASCADE); \
            CREATE INDEX evidence_by_target ON evidence (map_name, target);",
            kind: MigrationType::Simple,
        },
        Migration {
            version: 2,
            description: "create_quality_matrix_tables",
            sql: "\
            CREATE TABLE research_classes (name TEXT PRIMARY KEY); \
            CREATE TABLE design_groups (\
                paradigm TEXT NOT NULL REFERENCES research_classes(name) ON DELETE CASCADE, \
                name TEXT NOT NULL, \
                PRIMARY KEY (paradigm, name)); \
            CREATE TABLE design_categories (\
                paradigm TEXT NOT NULL, \
                group_name TEXT NOT NULL, \
                name TEXT NOT NULL, \
                definition TEXT NOT NULL DEFAULT '', \
                PRIMARY KEY (paradigm, group_name, name), \
                FOREIGN KEY (paradigm, group_name) REFERENCES design_groups(paradigm, name) \
                    ON DELETE CASCADE); \
            CREATE TABLE matrix_rows (\
                id TEXT PRIMARY KEY, \
                paradigm TEXT NOT NULL, \
                group_name TEXT NOT NULL, \
                category TEXT NOT NULL, \
                name TEXT NOT NULL DEFAULT '', \
                definition TEXT NOT NULL DEFAULT '', \
                risks TEXT NOT NULL DEFAULT '', \
                ord INTEGER NOT NULL DEFAULT 0, \
                FOREIGN KEY (paradigm, group_name, category) \
                    REFERENCES design_categories(paradigm, group_name, name) ON DELETE CASCADE); \
            CREATE INDEX matrix_rows_by_paradigm ON matrix_rows (paradigm); \
            CREATE TABLE techniques (\
                id TEXT PRIMARY KEY, \
                name TEXT NOT NULL DEFAULT '', \
                risks TEXT NOT NULL DEFAULT '', \
                ord INTEGER NOT NULL DEFAULT 0); \
            CREATE TABLE group_techniques (\
                paradigm TEXT NOT NULL, \
                group_name TEXT NOT NULL, \
                technique_id TEXT NOT NULL REFERENCES techniques(id) ON DELETE CASCADE, \
                PRIMARY KEY (paradigm, group_name, technique_id), \
                FOREIGN KEY (paradigm, group_name) REFERENCES design_groups(paradigm, name) \
                    ON DELETE CASCADE); \
            CREATE TABLE research_methods (\
                id TEXT PRIMARY KEY, \
                name TEXT NOT NULL DEFAULT '', \
                suitability TEXT NOT NULL DEFAULT '', \
                resources TEXT NOT NULL DEFAULT '[]', \
                matrix_type TEXT, \
                cell_suitability TEXT NOT NULL DEFAULT '', \
                position INTEGER NOT NULL DEFAULT 0, \
                row_id TEXT REFERENCES matrix_rows(id) ON DELETE CASCADE, \
                technique_id TEXT REFERENCES techniques(id) ON DELETE CASCADE); \
            CREATE INDEX research_methods_by_cell ON research_methods (row_id, technique_id); \
            CREATE TABLE applicability (\
                row_id TEXT NOT NULL REFERENCES matrix_rows(id) ON DELETE CASCADE, \
                technique_id TEXT NOT NULL REFERENCES techniques(id) ON DELETE CASCADE, \
                suitability TEXT NOT NULL, \
                PRIMARY KEY (row_id, technique_id)); \
            CREATE TABLE resources (\
                id TEXT PRIMARY KEY, \
                method_id TEXT NOT NULL REFERENCES research_methods(id) ON DELETE CASCADE, \
                kind TEXT NOT NULL, \
                doi TEXT, \
                title TEXT NOT NULL DEFAULT '', \
                author TEXT NOT NULL DEFAULT '', \
                year TEXT NOT NULL DEFAULT '', \
                journal TEXT NOT NULL DEFAULT '', \
                abstract TEXT NOT NULL DEFAULT '', \
                tags TEXT NOT NULL DEFAULT '[]', \
                attributes TEXT); \
            CREATE INDEX resources_by_method ON resources (method_id);",
            kind: MigrationType::Simple,
        },
    ])
}

pub async fn db_init(db_path: PathBuf) -> Result<Pool<Sqlite>, EvidenceMapError> {
    let fqdb = format!("sqlite:{}", db_path.to_string_lossy());
    tracing::debug!("Initializing graph store from file: {:?}", fqdb);
    if !Sqlite::database_exists(&fqdb).await.unwrap_or(false) {
        Sqlite::create_database(&fqdb).await?;
    }
    let options = SqliteConnectOptions::from_str(&fqdb)?
        .read_only(false)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .disable_statement_logging()
        .create_if_missing(true);

    let pool = PoolOptions::<Sqlite>::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    let migrator = Migrator::new(migrations()).await?;
    migrator.run(&pool).await?;

    let store = GraphStore(pool);
    let stats = store.stats().await?;
    tracing::info!(
        "Graph store initialized.\n \
         \tMaps:\t{} \n \
         \tFactors:\t{} \n \
         \tEvidence edges:\t{} \n \
         \tMatrix rows:\t{} \n \
         \tTechniques:\t{}",
        stats.maps,
        stats.factors,
        stats.evidence,
        stats.rows,
        stats.techniques
    );

    Ok(store.0)
}
