//! Revision Retention Tests
//!
//! Tests for:
//! - `latest` keeps the newest revisions unmarked and marks the rest
//! - Marked revisions stay readable until their grace window passes
//! - A later write physically removes expired revisions
//! - Existing marks are never pushed later
//! - Items are swept independently; `all` never sweeps

mod common;

use std::time::Duration;

use revstore::{GetRequest, PutRequest, RetentionSweep, SortOrder, TableStore, Tid};

use common::{expiry_markers, retained_schema, DOMAIN};

fn revision(title: &str, body: &str) -> PutRequest {
    PutRequest::new("retained")
        .with("title", title)
        .with("body", body)
}

fn now_ms() -> i64 {
    Tid::now().timestamp_ms()
}

async fn visible(store: &TableStore, title: &str) -> Vec<String> {
    store
        .get(
            DOMAIN,
            &GetRequest::new("retained")
                .with("title", title)
                .order_by("_tid", SortOrder::Asc),
        )
        .await
        .unwrap()
        .items
        .iter()
        .filter_map(|row| row["body"].as_str().map(String::from))
        .collect()
}

#[tokio::test]
async fn latest_marks_oldest_and_later_write_removes_it() {
    let (dir, path) = common::create_temp_db_file("retention.db");
    let store = common::open_store(&path);
    store
        .create_table(DOMAIN, &retained_schema(2, 1))
        .await
        .unwrap();

    let first = store.put(DOMAIN, &revision("Main", "v1")).await.unwrap();
    let second = store.put(DOMAIN, &revision("Main", "v2")).await.unwrap();
    assert_eq!(
        first.retention,
        RetentionSweep::Applied {
            examined: 1,
            marked: 0
        }
    );
    assert_eq!(
        second.retention,
        RetentionSweep::Applied {
            examined: 2,
            marked: 0
        }
    );

    let before = now_ms();
    let third = store.put(DOMAIN, &revision("Main", "v3")).await.unwrap();
    let after = now_ms();
    assert_eq!(
        third.retention,
        RetentionSweep::Applied {
            examined: 3,
            marked: 1
        }
    );

    let conn = common::open_read_only(&path);
    let markers = expiry_markers(&conn, "retained");
    assert_eq!(markers.len(), 3);
    assert_eq!(markers[0].0, first.tid.to_string());
    let mark = markers[0].1.expect("oldest revision is marked");
    assert!(
        (before + 1000..=after + 1000).contains(&mark),
        "mark {mark} should be now + grace"
    );
    assert_eq!(markers[1].1, None);
    assert_eq!(markers[2].1, None);

    // Still inside the grace window: every revision is readable.
    assert_eq!(visible(&store, "Main").await, vec!["v1", "v2", "v3"]);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(
        visible(&store, "Main").await,
        vec!["v2", "v3"],
        "an expired revision is no longer readable"
    );

    let fourth = store.put(DOMAIN, &revision("Main", "v4")).await.unwrap();
    assert_eq!(
        fourth.retention,
        RetentionSweep::Applied {
            examined: 3,
            marked: 1
        }
    );
    let markers = expiry_markers(&conn, "retained");
    assert_eq!(markers.len(), 3, "the expired revision was deleted");
    assert_eq!(markers[0].0, second.tid.to_string());
    assert!(markers[0].1.is_some());
    assert_eq!(markers[1].1, None);
    assert_eq!(markers[2].1, None);
    drop(dir);
}

#[tokio::test]
async fn existing_mark_is_never_extended() {
    let (dir, path) = common::create_temp_db_file("monotone.db");
    let store = common::open_store(&path);
    store
        .create_table(DOMAIN, &retained_schema(2, 3600))
        .await
        .unwrap();

    for body in ["v1", "v2", "v3"] {
        store.put(DOMAIN, &revision("Main", body)).await.unwrap();
    }
    let conn = common::open_read_only(&path);
    let original = expiry_markers(&conn, "retained")[0].1.expect("marked");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let ack = store.put(DOMAIN, &revision("Main", "v4")).await.unwrap();
    assert_eq!(
        ack.retention,
        RetentionSweep::Applied {
            examined: 4,
            marked: 2
        }
    );

    let markers = expiry_markers(&conn, "retained");
    assert_eq!(markers[0].1, Some(original));
    let newer = markers[1].1.expect("second revision is now marked");
    assert!(newer > original);
    drop(dir);
}

#[tokio::test]
async fn items_are_swept_independently() {
    let store = TableStore::open_in_memory().unwrap();
    store
        .create_table(DOMAIN, &retained_schema(1, 3600))
        .await
        .unwrap();

    store.put(DOMAIN, &revision("A", "a1")).await.unwrap();
    let ack = store.put(DOMAIN, &revision("B", "b1")).await.unwrap();
    assert_eq!(
        ack.retention,
        RetentionSweep::Applied {
            examined: 1,
            marked: 0
        }
    );

    let ack = store.put(DOMAIN, &revision("A", "a2")).await.unwrap();
    assert_eq!(
        ack.retention,
        RetentionSweep::Applied {
            examined: 2,
            marked: 1
        }
    );
    assert_eq!(visible(&store, "B").await, vec!["b1"]);
}

#[tokio::test]
async fn keep_all_policy_never_sweeps() {
    let store = TableStore::open_in_memory().unwrap();
    let schema = retained_schema(1, 1).retention(revstore::RetentionPolicy::All);
    store.create_table(DOMAIN, &schema).await.unwrap();

    for body in ["v1", "v2", "v3"] {
        let ack = store.put(DOMAIN, &revision("Main", body)).await.unwrap();
        assert_eq!(ack.retention, RetentionSweep::Skipped);
    }
    assert_eq!(visible(&store, "Main").await.len(), 3);
}
