#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use strata_bind::{BindOptions, CollectionBinding, DocumentBinding};
use strata_cloud::memory::MemoryCloud;
use strata_cloud::DocStore;
use strata_core::{CollectionRef, Query};

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        if Instant::now() >= deadline {
            panic!("timed out waiting for: {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn flat_spec(flat: &str) -> impl Fn(&CollectionRef) -> Option<Query> {
    let flat = flat.to_string();
    move |c: &CollectionRef| Some(c.all().where_eq("flatNumber", flat.as_str()))
}

#[tokio::test]
async fn not_ready_spec_short_circuits_without_store_calls() {
    let cloud = Arc::new(MemoryCloud::new());
    cloud.put("visitors", "v1", json!({ "name": "someone" }));
    let stats = cloud.stats();

    // Identity not resolved yet: the spec declines to build a query.
    let binding = CollectionBinding::bind(
        cloud.clone(),
        "visitors",
        BindOptions::default().with_spec(|_c: &CollectionRef| None::<Query>),
    );
    settle().await;

    let state = binding.current();
    assert!(state.rows.is_empty());
    assert!(!state.loading);
    assert!(state.error.is_none());
    assert_eq!(stats.opened(), 0, "no subscription may be opened");
    assert_eq!(stats.fetches(), 0, "no one-shot fetch may run");
}

#[tokio::test]
async fn listening_binding_reflects_creates_without_manual_refresh() {
    let cloud = Arc::new(MemoryCloud::new());
    cloud.put("alerts", "a1", json!({ "title": "existing" }));

    let binding = CollectionBinding::bind(cloud.clone(), "alerts", BindOptions::default());
    let handle = binding.handle();
    wait_until("initial snapshot", || handle.current().rows.len() == 1).await;

    let id = cloud.create("alerts", json!({ "title": "x" })).await.unwrap();
    wait_until("create visible", || handle.current().rows.len() == 2).await;
    let state = handle.current();
    let created = state.rows.iter().find(|r| r.id == id).expect("new row present");
    assert_eq!(created.str_field("title"), Some("x"));
}

#[tokio::test]
async fn binding_applies_the_query_spec() {
    let cloud = Arc::new(MemoryCloud::new());
    cloud.put("visitors", "v1", json!({ "flatNumber": "A-101", "name": "meter reader" }));
    cloud.put("visitors", "v2", json!({ "flatNumber": "B-204", "name": "courier" }));

    let binding = CollectionBinding::bind(
        cloud.clone(),
        "visitors",
        BindOptions::default().with_spec(flat_spec("A-101")),
    );
    let handle = binding.handle();
    wait_until("filtered snapshot", || handle.current().rows.len() == 1).await;
    assert_eq!(handle.current().rows[0].id, "v1");

    cloud.create("visitors", json!({ "flatNumber": "A-101", "name": "guest" })).await.unwrap();
    wait_until("second matching row", || handle.current().rows.len() == 2).await;
    assert!(handle.current().rows.iter().all(|r| r.str_field("flatNumber") == Some("A-101")));
}

#[tokio::test]
async fn rebind_closes_the_previous_subscription_first() {
    let cloud = Arc::new(MemoryCloud::new());
    cloud.put("visitors", "v1", json!({ "flatNumber": "A-101" }));
    cloud.put("visitors", "v2", json!({ "flatNumber": "B-204" }));
    let stats = cloud.stats();

    let mut binding = CollectionBinding::bind(
        cloud.clone(),
        "visitors",
        BindOptions::default().with_spec(flat_spec("A-101")),
    );
    let handle = binding.handle();
    wait_until("first subscription", || stats.opened() == 1).await;
    wait_until("first rows", || handle.current().rows.len() == 1).await;

    binding.rebind(BindOptions::default().with_spec(flat_spec("B-204")));
    wait_until("old closed, new opened", || stats.opened() == 2 && stats.closed() == 1).await;
    let handle = binding.handle();
    wait_until("rows from new spec", || {
        let s = handle.current();
        s.rows.len() == 1 && s.rows[0].id == "v2"
    })
    .await;

    // A write matching only the old spec must not leak into the view.
    cloud.create("visitors", json!({ "flatNumber": "A-101" })).await.unwrap();
    settle().await;
    let state = handle.current();
    assert_eq!(state.rows.len(), 1);
    assert_eq!(state.rows[0].id, "v2");
}

#[tokio::test]
async fn one_shot_binding_is_stale_until_refetched() {
    let cloud = Arc::new(MemoryCloud::new());
    cloud.put("complaints", "c1", json!({ "title": "lift stuck" }));
    let stats = cloud.stats();

    let binding =
        CollectionBinding::bind(cloud.clone(), "complaints", BindOptions::default().one_shot());
    let handle = binding.handle();
    wait_until("one-shot fetch", || handle.current().rows.len() == 1).await;
    assert_eq!(stats.opened(), 0, "one-shot mode must not subscribe");

    cloud.create("complaints", json!({ "title": "parking" })).await.unwrap();
    settle().await;
    assert_eq!(handle.current().rows.len(), 1, "no subscription, so still stale");

    binding.refetch().await;
    assert_eq!(handle.current().rows.len(), 2);
}

#[tokio::test]
async fn dropped_binding_never_publishes_again() {
    let cloud = Arc::new(MemoryCloud::new());
    cloud.put("deliveries", "d1", json!({ "company": "bluedart" }));

    let binding = CollectionBinding::bind(cloud.clone(), "deliveries", BindOptions::default());
    let handle = binding.handle();
    wait_until("initial snapshot", || handle.current().rows.len() == 1).await;

    let epoch_before = *handle.subscribe_epoch().borrow();
    drop(binding);

    cloud.create("deliveries", json!({ "company": "delhivery" })).await.unwrap();
    settle().await;
    assert_eq!(*handle.subscribe_epoch().borrow(), epoch_before, "no publish after teardown");
    assert_eq!(handle.current().rows.len(), 1);
}

#[tokio::test]
async fn subscription_rejection_surfaces_as_error_state() {
    let cloud = Arc::new(MemoryCloud::new());
    cloud.deny("maintenance_bills");

    let binding =
        CollectionBinding::bind(cloud.clone(), "maintenance_bills", BindOptions::default());
    let handle = binding.handle();
    wait_until("error state", || handle.current().error.is_some()).await;
    let state = handle.current();
    assert!(!state.loading);
    assert!(state.rows.is_empty());
    assert!(state.error.as_deref().unwrap().contains("permission denied"));
}

#[tokio::test]
async fn document_binding_tracks_updates_and_deletion() {
    let cloud = Arc::new(MemoryCloud::new());
    cloud.put("documents", "d1", json!({ "title": "bylaws", "rev": 1 }));

    let binding = DocumentBinding::bind(cloud.clone(), "documents", "d1", true);
    let handle = binding.handle();
    wait_until("doc loaded", || handle.current().doc.is_some()).await;

    cloud.update("documents", "d1", json!({ "rev": 2 })).await.unwrap();
    wait_until("update observed", || {
        handle.current().doc.as_ref().and_then(|d| d.field("rev")).cloned() == Some(json!(2))
    })
    .await;

    cloud.delete("documents", "d1").await.unwrap();
    wait_until("deletion observed", || {
        let s = handle.current();
        s.doc.is_none() && !s.loading
    })
    .await;
    assert!(handle.current().error.is_none(), "deletion is not an error");
}

#[tokio::test]
async fn document_binding_not_found_is_a_valid_state() {
    let cloud = Arc::new(MemoryCloud::new());
    let binding = DocumentBinding::bind(cloud.clone(), "documents", "nope", true);
    let handle = binding.handle();
    wait_until("settled", || !handle.current().loading).await;
    let state = handle.current();
    assert!(state.doc.is_none());
    assert!(state.error.is_none());
}

#[tokio::test]
async fn document_binding_empty_id_short_circuits() {
    let cloud = Arc::new(MemoryCloud::new());
    let stats = cloud.stats();
    let binding = DocumentBinding::bind(cloud.clone(), "documents", "", true);
    settle().await;
    let state = binding.current();
    assert!(state.doc.is_none());
    assert!(!state.loading);
    assert!(state.error.is_none());
    assert_eq!(stats.opened(), 0);
    assert_eq!(stats.fetches(), 0);
}

#[tokio::test]
async fn document_rebind_switches_documents_cleanly() {
    let cloud = Arc::new(MemoryCloud::new());
    cloud.put("members", "m1", json!({ "name": "Asha" }));
    cloud.put("members", "m2", json!({ "name": "Vikram" }));
    let stats = cloud.stats();

    let mut binding = DocumentBinding::bind(cloud.clone(), "members", "m1", true);
    let handle = binding.handle();
    wait_until("first doc", || {
        handle.current().doc.as_ref().map(|d| d.id.as_str()) == Some("m1")
    })
    .await;

    binding.rebind("m2");
    wait_until("old closed, new opened", || stats.opened() == 2 && stats.closed() == 1).await;
    let handle = binding.handle();
    wait_until("second doc", || {
        handle.current().doc.as_ref().map(|d| d.id.as_str()) == Some("m2")
    })
    .await;
}
