use futures::TryStreamExt;
use serde_json::json;

use catalog_sync_core::clock::FixedClock;
use catalog_sync_core::collections::{CheckpointKey, Collections, EntityClass};
use catalog_sync_core::contract::{DocumentStore, Documents, Filter, MockDocumentStore};
use catalog_sync_core::error::StoreError;
use catalog_sync_core::store::{active_products, scan_all, AuditedStore, Checkpoints, InMemoryStore};

fn docs(entries: &[(&str, serde_json::Value)]) -> Documents {
    entries
        .iter()
        .map(|(id, v)| (id.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn bulk_upsert_is_idempotent_and_overwrites() {
    let store = InMemoryStore::new();
    let batch = docs(&[("a", json!({"v": 1})), ("b", json!({"v": 2}))]);

    store.bulk_upsert("things", &batch).await.unwrap();
    store.bulk_upsert("things", &batch).await.unwrap();
    assert_eq!(store.dump("things"), batch);

    store
        .bulk_upsert("things", &docs(&[("a", json!({"v": 10}))]))
        .await
        .unwrap();
    assert_eq!(store.get("things", "a").await.unwrap(), Some(json!({"v": 10})));
    assert_eq!(store.len("things"), 2);
}

#[tokio::test]
async fn bulk_create_never_overwrites_existing_ids() {
    let store = InMemoryStore::new();
    store
        .bulk_upsert("refs", &docs(&[("L1", json!({"fetchedAt": {"en": 5}}))]))
        .await
        .unwrap();

    store
        .bulk_create(
            "refs",
            &docs(&[("L1", json!({"fetchedAt": {}})), ("L2", json!({"fetchedAt": {}}))]),
        )
        .await
        .unwrap();

    assert_eq!(
        store.get("refs", "L1").await.unwrap(),
        Some(json!({"fetchedAt": {"en": 5}}))
    );
    assert_eq!(store.get("refs", "L2").await.unwrap(), Some(json!({"fetchedAt": {}})));
}

#[tokio::test]
async fn missing_ids_and_collections_read_as_absent() {
    let store = InMemoryStore::new();
    assert!(store.get("nowhere", "x").await.unwrap().is_none());
    assert!(store
        .bulk_get("nowhere", &["x".to_string()])
        .await
        .unwrap()
        .is_empty());

    store
        .bulk_upsert("things", &docs(&[("a", json!(1))]))
        .await
        .unwrap();
    let found = store
        .bulk_get("things", &["a".to_string(), "zzz".to_string()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found.contains_key("a"));

    // Deleting unknown ids is a no-op.
    store
        .bulk_delete("things", &["zzz".to_string()])
        .await
        .unwrap();
    store
        .bulk_delete("nowhere", &["a".to_string()])
        .await
        .unwrap();
    assert_eq!(store.len("things"), 1);

    store.bulk_delete("things", &["a".to_string()]).await.unwrap();
    assert_eq!(store.len("things"), 0);
}

#[tokio::test]
async fn filtered_scan_pages_until_exhausted() {
    let store = InMemoryStore::new();
    let mut batch = Documents::new();
    for i in 0..7 {
        let status = if i % 2 == 0 { "ACTIVE" } else { "INACTIVE" };
        batch.insert(format!("P{i}"), json!({"status": status}));
    }
    store.bulk_upsert("products", &batch).await.unwrap();

    let filter = Filter::equals("status", "ACTIVE");
    let first = store
        .scan_filtered("products", &filter, 3, None)
        .await
        .unwrap();
    let ids: Vec<_> = first.items.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["P0", "P2", "P4"]);
    let next = first.next.expect("one more active product remains");

    let second = store
        .scan_filtered("products", &filter, 3, Some(next))
        .await
        .unwrap();
    let ids: Vec<_> = second.items.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["P6"]);
    assert!(second.next.is_none());

    let pages: Vec<_> = active_products(&store, "products", 2)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages.iter().map(Vec::len).sum::<usize>(), 4);
}

#[tokio::test]
async fn missing_filter_matches_absent_nested_fields() {
    let store = InMemoryStore::new();
    store
        .bulk_upsert(
            "refs",
            &docs(&[
                ("L1", json!({"fetchedAt": {"en": 1}})),
                ("L2", json!({"fetchedAt": {}})),
                ("L3", json!({"fetchedAt": {"de": 1}})),
            ]),
        )
        .await
        .unwrap();

    let page = store
        .scan_filtered("refs", &Filter::missing("fetchedAt.en"), 10, None)
        .await
        .unwrap();
    let ids: Vec<_> = page.items.into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["L2".to_string(), "L3".to_string()]);

    let bounded = store
        .search("refs", &Filter::missing("fetchedAt.en"), 1)
        .await
        .unwrap();
    assert_eq!(bounded.len(), 1);
    assert_eq!(bounded[0].0, "L2");
    assert!(store
        .search("nowhere", &Filter::All, 5)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn scan_all_walks_every_document() {
    let store = InMemoryStore::new();
    let mut batch = Documents::new();
    for i in 0..450 {
        batch.insert(format!("{i:04}"), json!({"n": i}));
    }
    store.bulk_upsert("big", &batch).await.unwrap();

    let all: Vec<(String, serde_json::Value)> =
        scan_all(&store, "big").try_collect().await.unwrap();
    assert_eq!(all.len(), 450);
    assert_eq!(all.first().map(|(id, _)| id.as_str()), Some("0000"));
    assert_eq!(all.last().map(|(id, _)| id.as_str()), Some("0449"));
}

#[tokio::test]
async fn audited_store_appends_one_record_per_bulk_write() {
    let collections = Collections::new("catalog");
    let clock = FixedClock::new(1_700_000_000);
    let store = AuditedStore::new(InMemoryStore::new(), &clock, &collections);

    store
        .bulk_upsert("catalog_raw_tags", &docs(&[("1", json!({})), ("2", json!({}))]))
        .await
        .unwrap();
    store
        .bulk_create("catalog_sync_location_refs", &docs(&[("L1", json!({}))]))
        .await
        .unwrap();
    store
        .bulk_delete("catalog_raw_tags", &["1".to_string()])
        .await
        .unwrap();

    let log = store.inner().dump(&collections.audit_log());
    assert_eq!(log.len(), 3);
    let mut operations: Vec<_> = log
        .values()
        .map(|r| {
            (
                r["operation"].as_str().unwrap_or_default().to_string(),
                r["objectCount"].as_u64().unwrap_or_default(),
            )
        })
        .collect();
    operations.sort();
    assert_eq!(
        operations,
        vec![
            ("bulkCreate".to_string(), 1),
            ("bulkDelete".to_string(), 1),
            ("bulkUpsert".to_string(), 2),
        ]
    );
    for record in log.values() {
        assert_eq!(record["timestamp"], json!(1_700_000_000));
        assert!(record["datetime"].as_str().unwrap().starts_with("2023-11-14"));
    }
}

#[tokio::test]
async fn audit_failure_does_not_fail_the_write() {
    let collections = Collections::new("catalog");
    let log_collection = collections.audit_log();

    let mut inner = MockDocumentStore::new();
    inner
        .expect_bulk_upsert()
        .withf(|collection, _| collection == "catalog_raw_tags")
        .times(1)
        .returning(|_, _| Ok(()));
    inner
        .expect_bulk_upsert()
        .withf(move |collection, _| collection == log_collection)
        .times(1)
        .returning(|_, _| Err(StoreError::Backend("log index unavailable".into())));

    let store = AuditedStore::new(inner, FixedClock::new(10), &collections);
    let result = store
        .bulk_upsert("catalog_raw_tags", &docs(&[("1", json!({}))]))
        .await;
    assert!(result.is_ok(), "audit failure must be swallowed: {result:?}");
}

#[tokio::test]
async fn checkpoints_round_trip_and_treat_blank_cursor_as_absent() {
    let store = InMemoryStore::new();
    let collections = Collections::new("catalog");
    let checkpoints = Checkpoints::new(&store, &collections);
    let key = CheckpointKey::localised(EntityClass::Products, "en");

    assert_eq!(checkpoints.cursor(&key).await.unwrap(), None);
    checkpoints.set_cursor(&key, "").await.unwrap();
    assert_eq!(checkpoints.cursor(&key).await.unwrap(), None);
    checkpoints.set_cursor(&key, "abc").await.unwrap();
    assert_eq!(checkpoints.cursor(&key).await.unwrap().as_deref(), Some("abc"));

    checkpoints.set_last_full_sync(&key, 42).await.unwrap();
    assert_eq!(checkpoints.last_full_sync(&key).await.unwrap(), Some(42));

    let metadata = store.dump(&collections.metadata());
    assert!(metadata.contains_key("cursor:products:en"));
    assert!(metadata.contains_key("last_sync:products:en"));
}
