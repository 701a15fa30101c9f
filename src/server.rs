//! JSON request/response surface over the graph store and the metadata lookups.
//!
//! Handlers only decode the body, call one store operation and shape the reply; every
//! failure leaves through [EvidenceMapError]'s `IntoResponse`.
use axum::{
    extract::{DefaultBodyLimit, FromRequest, FromRequestParts, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{future::Future, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::ServiceConfig,
    db::GraphStore,
    error::EvidenceMapError,
    exchange::{MapExport, MapImport},
    graph::GraphElements,
    identity::{EvidenceKey, FactorKey, MethodId, ResourceId, DEFAULT_PARADIGM},
    lookup::{HttpMetadataLookup, MetadataLookup},
    properties::{
        Citation, EvidenceMetadata, Matrix, Resource, ResourceDraft, ResourceKind, ResourceKindSet,
        TagAction,
    },
};

type ApiResult<T> = Result<Json<T>, EvidenceMapError>;

/// JSON body whose rejections answer as [EvidenceMapError] (400 with an `error` field).
#[derive(FromRequest)]
#[from_request(via(Json), rejection(EvidenceMapError))]
struct ApiJson<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(EvidenceMapError))]
struct ApiQuery<T>(T);

#[derive(Clone)]
pub struct AppState {
    pub store: GraphStore,
    pub lookup: Arc<dyn MetadataLookup>,
}

impl AppState {
    pub fn new(store: GraphStore, lookup: Arc<dyn MetadataLookup>) -> Self {
        AppState { store, lookup }
    }
}

fn success() -> Json<Value> {
    Json(json!({ "success": true }))
}

#[derive(Debug, Deserialize)]
struct CreateMapBody {
    name: String,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteMapBody {
    name: String,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapAccessBody {
    #[serde(default)]
    map_name: String,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveRelationshipBody {
    source: String,
    target: String,
    metadata: EvidenceMetadata,
    #[serde(default)]
    level: String,
    #[serde(default)]
    causality: String,
    map_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRelationshipBody {
    source: String,
    target: String,
    doi: String,
    #[serde(default)]
    level: String,
    #[serde(default)]
    causality: String,
    #[serde(default)]
    notes: String,
    map_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationshipBody {
    source: String,
    target: String,
    doi: String,
    map_name: String,
}

impl From<RelationshipBody> for EvidenceKey {
    fn from(body: RelationshipBody) -> Self {
        EvidenceKey {
            map_name: body.map_name,
            source: body.source,
            target: body.target,
            doi: body.doi,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameBody {
    old_name: String,
    new_name: String,
    map_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FactorBody {
    name: String,
    #[serde(default)]
    definition: String,
    map_name: String,
}

#[derive(Debug, Deserialize)]
struct SaveMatrixBody {
    #[serde(rename = "type", default)]
    paradigm: Option<String>,
    matrix: Matrix,
}

#[derive(Debug, Deserialize)]
struct MatrixQuery {
    #[serde(rename = "type", default)]
    paradigm: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DoiBody {
    doi: String,
}

#[derive(Debug, Deserialize)]
struct IsbnBody {
    isbn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMethodBody {
    id: MethodId,
    #[serde(default)]
    name: String,
    #[serde(default)]
    matrix_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResourcesBody {
    method_id: MethodId,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddResourceBody {
    method_id: MethodId,
    #[serde(default)]
    method_name: String,
    #[serde(flatten)]
    resource: ResourceDraft,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagBody {
    resource_id: ResourceId,
    tag: String,
    action: TagAction,
}

async fn list_maps(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    Ok(Json(state.store.list_maps().await?))
}

async fn create_map(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateMapBody>,
) -> ApiResult<Value> {
    state
        .store
        .create_map(&body.name, body.password.as_deref().unwrap_or_default())
        .await?;
    Ok(success())
}

async fn delete_map(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<DeleteMapBody>,
) -> ApiResult<Value> {
    state
        .store
        .delete_map(&body.name, body.password.as_deref())
        .await?;
    Ok(success())
}

async fn export_map(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<MapAccessBody>,
) -> ApiResult<MapExport> {
    Ok(Json(
        state
            .store
            .export_map(&body.map_name, body.password.as_deref())
            .await?,
    ))
}

async fn import_map(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<MapImport>,
) -> ApiResult<Value> {
    state.store.import_map(&body).await?;
    Ok(success())
}

async fn get_graph(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<MapAccessBody>,
) -> ApiResult<GraphElements> {
    Ok(Json(
        state
            .store
            .get_graph(&body.map_name, body.password.as_deref())
            .await?,
    ))
}

async fn save_relationship(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SaveRelationshipBody>,
) -> ApiResult<Value> {
    state
        .store
        .save_relationship(
            &body.source,
            &body.target,
            &body.metadata,
            &body.level,
            &body.causality,
            &body.map_name,
        )
        .await?;
    Ok(success())
}

async fn update_relationship(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<UpdateRelationshipBody>,
) -> ApiResult<Value> {
    let key = EvidenceKey {
        map_name: body.map_name,
        source: body.source,
        target: body.target,
        doi: body.doi,
    };
    state
        .store
        .update_relationship(&key, &body.level, &body.causality, &body.notes)
        .await?;
    Ok(success())
}

async fn delete_relationship(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RelationshipBody>,
) -> ApiResult<Value> {
    state.store.delete_relationship(&body.into()).await?;
    Ok(success())
}

async fn rename_factor(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RenameBody>,
) -> ApiResult<Value> {
    state
        .store
        .rename_factor(&body.old_name, &body.new_name, &body.map_name)
        .await?;
    Ok(Json(json!({ "success": true, "newName": body.new_name })))
}

async fn set_definition(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<FactorBody>,
) -> ApiResult<Value> {
    state
        .store
        .set_definition(&body.name, &body.definition, &body.map_name)
        .await?;
    Ok(success())
}

async fn create_factor(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<FactorBody>,
) -> ApiResult<Value> {
    let created = state
        .store
        .create_factor(&body.name, &body.definition, &body.map_name)
        .await?;
    Ok(Json(json!({ "success": true, "created": created })))
}

async fn delete_factor(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<FactorBody>,
) -> ApiResult<Value> {
    state
        .store
        .delete_factor(&FactorKey::new(body.map_name, body.name))
        .await?;
    Ok(success())
}

async fn save_matrix(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SaveMatrixBody>,
) -> ApiResult<Value> {
    let paradigm = body.paradigm.as_deref().unwrap_or(DEFAULT_PARADIGM);
    state.store.save_matrix(paradigm, &body.matrix).await?;
    Ok(success())
}

async fn load_matrix(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<MatrixQuery>,
) -> ApiResult<Matrix> {
    let paradigm = query.paradigm.as_deref().unwrap_or(DEFAULT_PARADIGM);
    Ok(Json(state.store.load_matrix(paradigm).await?))
}

async fn lookup_doi(State(state): State<AppState>, ApiJson(body): ApiJson<DoiBody>) -> ApiResult<Citation> {
    Ok(Json(state.lookup.lookup_doi(&body.doi).await?))
}

async fn lookup_isbn(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<IsbnBody>,
) -> ApiResult<Citation> {
    Ok(Json(state.lookup.lookup_isbn(&body.isbn).await?))
}

async fn create_method(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateMethodBody>,
) -> ApiResult<Value> {
    let created = state
        .store
        .create_method(&body.id, &body.name, body.matrix_type.as_deref())
        .await?;
    Ok(Json(json!({ "success": true, "created": created })))
}

async fn list_resources(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ListResourcesBody>,
) -> ApiResult<Vec<Resource>> {
    let kinds = body
        .types
        .iter()
        .map(|t| t.parse::<ResourceKind>())
        .collect::<Result<ResourceKindSet, _>>()?;
    Ok(Json(
        state
            .store
            .list_resources(&body.method_id, kinds, &body.tags)
            .await?,
    ))
}

async fn add_resource(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<AddResourceBody>,
) -> ApiResult<Value> {
    let id = state
        .store
        .add_resource(&body.method_id, &body.method_name, &body.resource)
        .await?;
    Ok(Json(json!({ "success": true, "id": id })))
}

async fn add_standard_resource(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<AddResourceBody>,
) -> ApiResult<Value> {
    let id = state
        .store
        .add_standard_resource(&body.method_id, &body.method_name, &body.resource)
        .await?;
    Ok(Json(json!({ "success": true, "id": id })))
}

async fn tag_resource(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<TagBody>,
) -> ApiResult<Value> {
    let tags = state
        .store
        .tag_resource(&body.resource_id, &body.tag, body.action)
        .await?;
    Ok(Json(json!({ "success": true, "tags": tags })))
}

pub fn router(state: AppState, config: &ServiceConfig) -> Router {
    Router::new()
        .route("/maps", get(list_maps).post(create_map).delete(delete_map))
        .route("/map/export", post(export_map))
        .route("/map/import", post(import_map))
        .route("/graph", post(get_graph))
        .route("/save-relationship", post(save_relationship))
        .route("/relationship/update", post(update_relationship))
        .route("/relationship", axum::routing::delete(delete_relationship))
        .route("/node", post(create_factor).delete(delete_factor))
        .route("/node/rename", post(rename_factor))
        .route("/node/definition", post(set_definition))
        .route("/quality/matrix", get(load_matrix))
        .route("/quality/matrix/save", post(save_matrix))
        .route("/doi", post(lookup_doi))
        .route("/isbn", post(lookup_isbn))
        .route("/method/create", post(create_method))
        .route("/method/resources", post(list_resources))
        .route("/method/resource/add", post(add_resource))
        .route("/method/resource/add-standard", post(add_standard_resource))
        .route("/resource/tag", post(tag_resource))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(config.body_limit_bytes)),
        )
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves, and the server
/// runs until the process is killed.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("[server] failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("[server] Ctrl-C received, shutting down");
}

/// Open the store, bind and serve until `shutdown` resolves, then close the pool.
pub async fn serve(
    config: ServiceConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), EvidenceMapError> {
    let addr = config.bind_addr()?;
    let store = GraphStore::open(config.database.clone()).await?;
    let lookup: Arc<dyn MetadataLookup> = Arc::new(HttpMetadataLookup::new(&config)?);
    let app = router(AppState::new(store.clone(), lookup), &config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API running on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    store.close().await;
    tracing::info!("API shut down");
    Ok(())
}
