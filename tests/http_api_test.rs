//! HTTP surface, driven in-process through the axum router.
#![cfg(feature = "service")]
mod common;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use common::temp_store;
use evidence_map::{
    config::ServiceConfig,
    lookup::{normalize_doi, MetadataLookup},
    properties::Citation,
    server::{router, shutdown_signal, AppState},
    EvidenceMapError,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use test_log::test;
use tower::ServiceExt;

struct StubLookup;

#[async_trait]
impl MetadataLookup for StubLookup {
    async fn lookup_doi(&self, doi: &str) -> Result<Citation, EvidenceMapError> {
        let doi = normalize_doi(doi)?;
        if doi != "10.1/xyz" {
            return Err(EvidenceMapError::UpstreamLookupFailed("DOI not found".into()));
        }
        Ok(Citation {
            doi,
            title: "Job burnout".into(),
            year: "2001".into(),
            author: "Maslach, Christina".into(),
            journal: "Annual Review of Psychology".into(),
            abstract_text: None,
        })
    }

    async fn lookup_isbn(&self, isbn: &str) -> Result<Citation, EvidenceMapError> {
        Err(EvidenceMapError::UpstreamLookupFailed(format!(
            "ISBN {isbn} not found"
        )))
    }
}

async fn app() -> (TempDir, Router) {
    let (dir, store) = temp_store().await;
    let state = AppState::new(store, Arc::new(StubLookup));
    (dir, router(state, &ServiceConfig::default()))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[test(tokio::test)]
async fn test_map_lifecycle() {
    let (_dir, app) = app().await;
    let (status, body) = call(&app, Method::GET, "/maps", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, body) = call(
        &app,
        Method::POST,
        "/maps",
        Some(json!({"name": "Study1", "password": "p"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let (status, body) = call(
        &app,
        Method::DELETE,
        "/maps",
        Some(json!({"name": "Study1", "password": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Incorrect password");

    let (status, _) = call(
        &app,
        Method::DELETE,
        "/maps",
        Some(json!({"name": "Study1", "password": "p"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &app,
        Method::DELETE,
        "/maps",
        Some(json!({"name": "Study1", "password": "p"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test(tokio::test)]
async fn test_evidence_endpoints() {
    let (_dir, app) = app().await;
    call(&app, Method::POST, "/maps", Some(json!({"name": "Study1", "password": "p"}))).await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/save-relationship",
        Some(json!({
            "source": "Stress", "target": "Burnout",
            "metadata": {"doi": "10.1/xyz", "title": "Job burnout", "author": "Maslach",
                         "year": 2001, "journal": "ARP"},
            "level": "strong", "causality": "direct", "mapName": "Study1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, graph) = call(
        &app,
        Method::POST,
        "/graph",
        Some(json!({"mapName": "Study1", "password": "p"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let elements = graph["elements"].as_array().unwrap();
    assert_eq!(elements.len(), 3);
    let edge = elements.iter().find(|e| e["group"] == "edges").unwrap();
    assert_eq!(edge["data"]["doi"], "10.1/xyz");
    assert_eq!(edge["data"]["level"], "strong");
    assert_eq!(edge["data"]["year"], "2001");

    let (status, _) = call(
        &app,
        Method::POST,
        "/graph",
        Some(json!({"mapName": "Study1", "password": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&app, Method::POST, "/graph", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"elements": []}));

    let (status, _) = call(
        &app,
        Method::POST,
        "/relationship/update",
        Some(json!({"source": "Stress", "target": "Burnout", "doi": "10.1/xyz",
                    "level": "weak", "causality": "direct", "notes": "n", "mapName": "Study1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        Method::POST,
        "/node/rename",
        Some(json!({"oldName": "Stress", "newName": "Strain", "mapName": "Study1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "newName": "Strain"}));

    let (status, _) = call(
        &app,
        Method::POST,
        "/node/definition",
        Some(json!({"name": "Strain", "definition": "load", "mapName": "Study1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        Method::POST,
        "/node",
        Some(json!({"name": "Sleep", "mapName": "Study1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], true);

    let (status, export) = call(
        &app,
        Method::POST,
        "/map/export",
        Some(json!({"mapName": "Study1", "password": "p"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(export["nodes"].as_array().unwrap().len(), 3);
    assert_eq!(export["edges"][0]["source"], "Strain");
    assert_eq!(export["edges"][0]["props"]["notes"], "n");

    let (status, _) = call(&app, Method::POST, "/map/import", Some(export.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &app,
        Method::DELETE,
        "/relationship",
        Some(json!({"source": "Strain", "target": "Burnout", "doi": "10.1/xyz", "mapName": "Study1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(
        &app,
        Method::DELETE,
        "/node",
        Some(json!({"name": "Sleep", "mapName": "Study1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, graph) = call(
        &app,
        Method::POST,
        "/graph",
        Some(json!({"mapName": "Study1", "password": "p"})),
    )
    .await;
    assert_eq!(graph["elements"].as_array().unwrap().len(), 2);
}

#[test(tokio::test)]
async fn test_import_endpoint() {
    let (_dir, app) = app().await;
    let (status, _) = call(
        &app,
        Method::POST,
        "/map/import",
        Some(json!({
            "mapData": {"name": "Imported"},
            "nodes": [{"name": "A"}, {"name": "B"}],
            "edges": [{"source": "A", "target": "B", "props": {"doi": "10.1/q"}}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &app,
        Method::POST,
        "/map/import",
        Some(json!({
            "map": {"name": "Broken"},
            "nodes": [{"name": "A"}],
            "edges": [{"source": "A", "target": "B", "props": {"doi": "10.1/q"}}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, maps) = call(&app, Method::GET, "/maps", None).await;
    assert_eq!(maps, json!(["Imported"]));
}

#[test(tokio::test)]
async fn test_malformed_bodies_answer_with_json_errors() {
    let (_dir, app) = app().await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/map/import",
        Some(json!({"map": {"name": "A"}, "nodes": "oops"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("nodes"));

    let (status, body) = call(&app, Method::POST, "/maps", Some(json!({"password": "p"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/graph")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].is_string());

    let (_, maps) = call(&app, Method::GET, "/maps", None).await;
    assert_eq!(maps, json!([]));
}

#[test(tokio::test)]
async fn test_matrix_endpoints() {
    let (_dir, app) = app().await;
    let matrix = json!({
        "rows": [{"id": "R1", "name": "Case study", "level1": "Exploratory", "level2": "Case",
                  "definition": "", "catDefinition": "", "risks": "", "order": 1}],
        "cols": [{"id": "C1", "name": "Interview", "risks": "", "order": 1}],
        "data": {"R1_C1": {"methods": [], "suitability": "high"}}
    });
    let (status, _) = call(
        &app,
        Method::POST,
        "/quality/matrix/save",
        Some(json!({"type": "qualitative", "matrix": matrix})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, loaded) = call(&app, Method::GET, "/quality/matrix?type=qualitative", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(loaded["rows"][0]["id"], "R1");
    assert_eq!(loaded["cols"][0]["id"], "C1");
    assert_eq!(loaded["data"]["R1_C1"]["suitability"], "high");

    let (_, other) = call(&app, Method::GET, "/quality/matrix?type=quantitative", None).await;
    assert_eq!(other, json!({"rows": [], "cols": [], "data": {}}));
}

#[test(tokio::test)]
async fn test_resource_endpoints() {
    let (_dir, app) = app().await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/method/create",
        Some(json!({"id": "m1", "name": "Narrative", "matrixType": "qualitative"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], true);

    let (status, added) = call(
        &app,
        Method::POST,
        "/method/resource/add",
        Some(json!({"methodId": "m1", "methodName": "Narrative", "doi": "10.1/xyz",
                    "title": "Job burnout", "year": 2001, "tags": ["ethics"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = added["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        Method::POST,
        "/method/resource/add-standard",
        Some(json!({"methodId": "m1", "title": "ISO 20252", "year": "2019"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        Method::POST,
        "/resource/tag",
        Some(json!({"resourceId": id, "tag": "interviews", "action": "add"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tags"], json!(["ethics", "interviews"]));

    let (status, listed) = call(
        &app,
        Method::POST,
        "/method/resources",
        Some(json!({"methodId": "m1", "types": ["reference"], "tags": ["interviews"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["type"], "reference");
    assert_eq!(listed[0]["methodId"], "m1");

    let (status, _) = call(
        &app,
        Method::POST,
        "/method/resources",
        Some(json!({"methodId": "m1", "types": ["book"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[test(tokio::test)]
async fn test_lookup_endpoints() {
    let (_dir, app) = app().await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/doi",
        Some(json!({"doi": "https://doi.org/10.1/xyz"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["author"], "Maslach, Christina");
    assert!(body.get("abstract").is_none());

    let (status, _) = call(&app, Method::POST, "/doi", Some(json!({"doi": "10.1/other"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, Method::POST, "/doi", Some(json!({"doi": " "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, Method::POST, "/isbn", Some(json!({"isbn": "9780134685991"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("9780134685991"));
}

#[test(tokio::test)]
async fn test_shutdown_signal_waits_for_ctrl_c() {
    let waited = tokio::time::timeout(Duration::from_millis(100), shutdown_signal()).await;
    assert!(waited.is_err());
}
