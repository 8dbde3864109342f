use serde_json::json;

use catalog_sync_core::collections::{CheckpointKey, Collections, EntityClass};
use catalog_sync_core::config::PagerSettings;
use catalog_sync_core::contract::{CursorPage, Documents, Since};
use catalog_sync_core::pager::{CursorPager, PageOutcome};
use catalog_sync_core::store::{Checkpoints, InMemoryStore};

fn page(prefix: &str, n: usize, next_cursor: &str) -> CursorPage {
    let items: Documents = (0..n)
        .map(|i| (format!("{prefix}{i:03}"), json!({"productCode": format!("{prefix}{i:03}")})))
        .collect();
    CursorPage {
        items,
        next_cursor: next_cursor.to_string(),
    }
}

fn settings() -> PagerSettings {
    PagerSettings {
        bootstrap_since: "2020-01-01T00:00:01.737043Z".to_string(),
        bootstrap_count: 10,
        page_count: 50,
    }
}

#[tokio::test]
async fn fresh_pager_bootstraps_from_fixed_timestamp() {
    let store = InMemoryStore::new();
    let collections = Collections::new("catalog");
    let checkpoints = Checkpoints::new(&store, &collections);

    let pager = CursorPager::resume(
        &checkpoints,
        CheckpointKey::global(EntityClass::AvailabilitySchedules),
        settings(),
    )
    .await
    .unwrap();

    assert_eq!(
        pager.request(),
        Some((
            Since::Timestamp("2020-01-01T00:00:01.737043Z".to_string()),
            10
        ))
    );
    assert!(pager.cursor().is_none());
}

#[tokio::test]
async fn pages_until_empty_and_commits_last_cursor() {
    let store = InMemoryStore::new();
    let collections = Collections::new("catalog");
    let checkpoints = Checkpoints::new(&store, &collections);
    let key = CheckpointKey::localised(EntityClass::Products, "en");

    let mut pager = CursorPager::resume(&checkpoints, key.clone(), settings())
        .await
        .unwrap();
    let mut upstream = vec![page("A", 50, "c1"), page("B", 50, "c2"), page("", 0, "")].into_iter();
    let mut persisted = Documents::new();

    while let Some((_since, _count)) = pager.request() {
        let fetched = upstream.next().expect("pager asked for more pages than exist");
        match pager.observe(&fetched) {
            PageOutcome::Exhausted => break,
            PageOutcome::Final => panic!("no blank continuation in this stream"),
            PageOutcome::Continue(cursor) => {
                persisted.extend(fetched.items);
                pager.commit(&checkpoints, cursor).await.unwrap();
            }
        }
    }

    assert_eq!(persisted.len(), 100);
    assert_eq!(pager.pages_seen(), 3);
    assert!(pager.request().is_none());
    assert_eq!(checkpoints.cursor(&key).await.unwrap().as_deref(), Some("c2"));

    // Next run resumes from the committed cursor with the steady-state page size.
    let resumed = CursorPager::resume(&checkpoints, key, settings())
        .await
        .unwrap();
    assert_eq!(
        resumed.request(),
        Some((Since::Cursor("c2".to_string()), 50))
    );
}

#[tokio::test]
async fn blank_continuation_finishes_without_advancing() {
    let store = InMemoryStore::new();
    let collections = Collections::new("catalog");
    let checkpoints = Checkpoints::new(&store, &collections);
    let key = CheckpointKey::global(EntityClass::AvailabilitySchedules);
    checkpoints.set_cursor(&key, "c7").await.unwrap();

    let mut pager = CursorPager::resume(&checkpoints, key.clone(), settings())
        .await
        .unwrap();
    assert_eq!(pager.observe(&page("X", 3, "")), PageOutcome::Final);
    assert!(pager.request().is_none());
    assert_eq!(pager.cursor(), Some("c7"));
    assert_eq!(checkpoints.cursor(&key).await.unwrap().as_deref(), Some("c7"));
}

#[tokio::test]
async fn uncommitted_page_is_refetched_after_a_crash() {
    let store = InMemoryStore::new();
    let collections = Collections::new("catalog");
    let checkpoints = Checkpoints::new(&store, &collections);
    let key = CheckpointKey::localised(EntityClass::Products, "de");

    let mut pager = CursorPager::resume(&checkpoints, key.clone(), settings())
        .await
        .unwrap();
    let PageOutcome::Continue(c1) = pager.observe(&page("A", 5, "c1")) else {
        panic!("expected a continuation");
    };
    pager.commit(&checkpoints, c1).await.unwrap();

    // Second page observed but the process dies before it is persisted.
    let _ = pager.observe(&page("B", 5, "c2"));
    drop(pager);

    let resumed = CursorPager::resume(&checkpoints, key, settings())
        .await
        .unwrap();
    assert_eq!(
        resumed.request(),
        Some((Since::Cursor("c1".to_string()), 50))
    );
}

#[test]
fn page_sizes_are_clamped_to_upstream_limits() {
    let oversized = PagerSettings {
        bootstrap_count: 0,
        page_count: 10_000,
        ..PagerSettings::default()
    };
    assert_eq!(oversized.bootstrap_count(), 1);
    assert_eq!(oversized.page_count(), 500);
}
