use std::collections::BTreeSet;

use serde_json::json;

use catalog_sync_core::collections::Collections;
use catalog_sync_core::discovery::{
    extract_attraction_ids, extract_location_refs, DependencyTracker,
};
use catalog_sync_core::store::InMemoryStore;

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn extracts_location_refs_from_every_known_shape() {
    let product = json!({
        "logistics": {
            "redemption": {"locations": [{"ref": "LOC-redeem"}]},
            "start": [{"location": {"ref": "LOC-start"}}],
            "end": [{"location": {"ref": "LOC-end"}}],
            "travelerPickup": {"locations": [
                {"pickupType": "HOTEL", "location": {"ref": "LOC-hotel"}},
                {"pickupType": "OTHER", "location": {"ref": "LOC-other"}},
                {"pickupType": "PORT", "location": {"ref": "LOC-port"}}
            ]}
        },
        "itinerary": {
            "itineraryItems": [
                {"pointOfInterestLocation": {"location": {"ref": "LOC-poi"}, "attractionId": 101}}
            ],
            "days": [
                {
                    "items": [{"pointOfInterestLocation": {"location": {"ref": "LOC-day"}, "attractionId": "202"}}],
                    "accommodations": [{"location": {"ref": "LOC-hotel"}}]
                }
            ],
            "routes": [
                {
                    "pointsOfInterest": [{"location": {"ref": "LOC-route"}, "attractionId": 303}],
                    "stops": [{"stopLocation": {"ref": "LOC-stop"}}]
                }
            ],
            "pointsOfInterest": [{"ref": "LOC-bare"}],
            "activityInfo": {"location": {"ref": "LOC-activity"}},
            "pointOfInterestLocations": [{"location": {"ref": "LOC-unstructured"}, "attractionId": 0}]
        }
    });

    assert_eq!(
        extract_location_refs(&product),
        set(&[
            "LOC-activity",
            "LOC-bare",
            "LOC-day",
            "LOC-end",
            "LOC-hotel",
            "LOC-poi",
            "LOC-port",
            "LOC-redeem",
            "LOC-route",
            "LOC-start",
            "LOC-stop",
            "LOC-unstructured",
        ])
    );
    assert_eq!(extract_attraction_ids(&product), set(&["101", "202", "303"]));
}

#[test]
fn pickup_locations_need_an_allowed_type() {
    let product = json!({
        "logistics": {"travelerPickup": {"locations": [
            {"pickupType": "MEET_EVERYONE_AT_START_POINT", "location": {"ref": "LOC-1"}},
            {"location": {"ref": "LOC-2"}},
            {"pickupType": "AIRPORT", "location": {"ref": "LOC-3"}}
        ]}}
    });
    assert_eq!(extract_location_refs(&product), set(&["LOC-3"]));
}

#[test]
fn arrays_serialised_as_objects_are_walked_and_blanks_skipped() {
    let product = json!({
        "logistics": {"start": {"0": {"location": {"ref": "LOC-a"}}, "1": {"location": {"ref": ""}}}},
        "itinerary": {"pointsOfInterest": [{"ref": null}, {"ref": "LOC-b"}]}
    });
    assert_eq!(extract_location_refs(&product), set(&["LOC-a", "LOC-b"]));
    assert!(extract_location_refs(&json!({})).is_empty());
}

#[tokio::test]
async fn ledger_tracks_resolution_per_locale() {
    let store = InMemoryStore::new();
    let collections = Collections::new("catalog");
    let tracker = DependencyTracker::new(&store, &collections);

    tracker
        .record_discovered(&set(&["L1", "L2", "L3"]), 100)
        .await
        .unwrap();
    assert_eq!(
        tracker.find_unresolved("en", 10).await.unwrap(),
        vec!["L1", "L2", "L3"]
    );

    tracker
        .mark_resolved("en", &["L1".to_string(), "L2".to_string()], 200)
        .await
        .unwrap();
    assert_eq!(tracker.find_unresolved("en", 10).await.unwrap(), vec!["L3"]);
    assert_eq!(
        tracker.find_unresolved("de", 10).await.unwrap(),
        vec!["L1", "L2", "L3"]
    );

    tracker
        .mark_resolved("de", &["L1".to_string()], 300)
        .await
        .unwrap();
    let record = store
        .dump(tracker.collection())
        .remove("L1")
        .expect("L1 is in the ledger");
    assert_eq!(record["fetchedAt"], json!({"en": 200, "de": 300}));
    assert_eq!(record["discoveredAt"], json!(100));
}

#[tokio::test]
async fn rediscovery_keeps_resolution_markers() {
    let store = InMemoryStore::new();
    let collections = Collections::new("catalog");
    let tracker = DependencyTracker::new(&store, &collections);

    tracker.record_discovered(&set(&["L1"]), 100).await.unwrap();
    tracker
        .mark_resolved("en", &["L1".to_string()], 200)
        .await
        .unwrap();
    tracker.record_discovered(&set(&["L1"]), 900).await.unwrap();

    assert!(tracker.find_unresolved("en", 10).await.unwrap().is_empty());
    let record = store.dump(tracker.collection()).remove("L1").unwrap();
    assert_eq!(record["discoveredAt"], json!(100));
}

#[tokio::test]
async fn unresolved_lookup_honours_limit() {
    let store = InMemoryStore::new();
    let collections = Collections::new("catalog");
    let tracker = DependencyTracker::new(&store, &collections);
    let refs: BTreeSet<String> = (0..25).map(|i| format!("L{i:02}")).collect();
    tracker.record_discovered(&refs, 1).await.unwrap();

    let batch = tracker.find_unresolved("en", 10).await.unwrap();
    assert_eq!(batch.len(), 10);
    assert_eq!(batch.first().map(String::as_str), Some("L00"));
}

#[tokio::test]
async fn unresolved_count_spans_pages() {
    let store = InMemoryStore::new();
    let collections = Collections::new("catalog");
    let tracker = DependencyTracker::new(&store, &collections);
    let refs: BTreeSet<String> = (0..25).map(|i| format!("L{i:02}")).collect();
    tracker.record_discovered(&refs, 1).await.unwrap();
    tracker
        .mark_resolved("en", &["L00".to_string(), "L24".to_string()], 2)
        .await
        .unwrap();

    assert_eq!(tracker.count_unresolved("en", 10).await.unwrap(), 23);
    assert_eq!(tracker.count_unresolved("de", 7).await.unwrap(), 25);
}
