//! Resources attached to research methods: creation, filtering and tag sets.
mod common;

use common::temp_store;
use evidence_map::{
    identity::{MethodId, ResourceId},
    properties::{ResourceDraft, ResourceKind, ResourceKindSet, TagAction},
    EvidenceMapError,
};
use serde_json::json;
use test_log::test;

fn draft(title: &str, year: &str, tags: &[&str]) -> ResourceDraft {
    ResourceDraft {
        doi: Some(format!("10.1/{}", title.to_lowercase().replace(' ', "-"))),
        title: title.to_string(),
        author: "Yin".to_string(),
        year: year.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    }
}

#[test(tokio::test)]
async fn test_create_method_keeps_first_name() {
    let (_dir, store) = temp_store().await;
    let id = MethodId::from("m1");
    assert!(store.create_method(&id, "Narrative", Some("qualitative")).await.unwrap());
    assert!(!store.create_method(&id, "Renamed", None).await.unwrap());

    let stored = store.get_method(&id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Narrative");
    assert_eq!(stored.matrix_type.as_deref(), Some("qualitative"));
    assert!(stored.resources.is_empty());
    assert!(store.get_method(&MethodId::from("m2")).await.unwrap().is_none());
}

#[test(tokio::test)]
async fn test_add_resources_creates_method_and_unique_ids() {
    let (_dir, store) = temp_store().await;
    let method = MethodId::from("m-new");
    let a = store
        .add_resource(&method, "Grounded theory", &draft("Basics", "2015", &[]))
        .await
        .unwrap();
    let b = store
        .add_resource(&method, "Grounded theory", &draft("Basics", "2015", &[]))
        .await
        .unwrap();
    let standard = store
        .add_standard_resource(
            &method,
            "ignored",
            &ResourceDraft {
                doi: Some("10.1/should-drop".into()),
                title: "ISO 20252".into(),
                year: "2019".into(),
                attributes: Some(json!({"body": "ISO", "status": "published"})),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_ne!(a, b);
    assert!(a.as_str().starts_with("res-"));
    assert!(standard.as_str().starts_with("std-"));

    let all = store
        .list_resources(&method, ResourceKindSet::empty(), &[])
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    let std = all.iter().find(|r| r.id == standard).unwrap();
    assert_eq!(std.kind, ResourceKind::Standard);
    assert_eq!(std.doi, None);
    assert_eq!(std.attributes.as_ref().unwrap()["body"], "ISO");
    // Newest first.
    assert_eq!(all[0].year, "2019");
}

#[test(tokio::test)]
async fn test_list_resources_filters() {
    let (_dir, store) = temp_store().await;
    let method = MethodId::from("m1");
    store
        .add_resource(&method, "m", &draft("Untagged", "2010", &[]))
        .await
        .unwrap();
    store
        .add_resource(&method, "m", &draft("Tagged", "2020", &["ethics"]))
        .await
        .unwrap();
    store
        .add_resource(&method, "m", &draft("Other", "n.d.", &["sampling"]))
        .await
        .unwrap();
    store
        .add_standard_resource(&method, "m", &draft("Standard", "2021", &["ethics"]))
        .await
        .unwrap();

    let references = ResourceKindSet::only(ResourceKind::Reference);
    let titles = |rs: Vec<evidence_map::properties::Resource>| {
        rs.into_iter().map(|r| r.title).collect::<Vec<_>>()
    };

    let ethics = store
        .list_resources(&method, references, &["ethics".to_string()])
        .await
        .unwrap();
    assert_eq!(titles(ethics), vec!["Tagged", "Untagged"]);

    let everything = store.list_resources(&method, references, &[]).await.unwrap();
    assert_eq!(titles(everything), vec!["Tagged", "Untagged", "Other"]);

    let standards = store
        .list_resources(&method, ResourceKindSet::only(ResourceKind::Standard), &[])
        .await
        .unwrap();
    assert_eq!(titles(standards), vec!["Standard"]);

    let none = store
        .list_resources(&MethodId::from("unknown"), ResourceKindSet::all(), &[])
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[test(tokio::test)]
async fn test_tag_set_semantics() {
    let (_dir, store) = temp_store().await;
    let method = MethodId::from("m1");
    let id = store
        .add_resource(&method, "m", &draft("Tagged", "2020", &["a", "a", "b"]))
        .await
        .unwrap();

    assert_eq!(
        store.tag_resource(&id, "X", TagAction::Add).await.unwrap(),
        vec!["a", "b", "X"]
    );
    assert_eq!(
        store.tag_resource(&id, "X", TagAction::Add).await.unwrap(),
        vec!["a", "b", "X"]
    );
    assert_eq!(
        store.tag_resource(&id, "missing", TagAction::Remove).await.unwrap(),
        vec!["a", "b", "X"]
    );
    assert_eq!(
        store.tag_resource(&id, "a", TagAction::Remove).await.unwrap(),
        vec!["b", "X"]
    );

    let stored = store
        .list_resources(&method, ResourceKindSet::all(), &[])
        .await
        .unwrap();
    assert_eq!(stored[0].tags, vec!["b", "X"]);

    assert!(matches!(
        store
            .tag_resource(&ResourceId::from("res-nope"), "X", TagAction::Add)
            .await
            .unwrap_err(),
        EvidenceMapError::NotFound(_)
    ));
}
