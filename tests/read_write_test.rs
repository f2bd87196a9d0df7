//! Read and Write Path Tests
//!
//! Tests for:
//! - tid auto-assignment and write time
//! - Typed values through the whole stack
//! - Statics shared across revisions
//! - Conditions, ordering, projection, pagination
//! - Secondary index reads
//! - Decimals support equality only
//! - Reads racing a drop from another process

mod common;

use std::collections::BTreeSet;

use revstore::{
    AttributeType, Condition, Error, GetRequest, IndexElement, PutRequest, SortOrder,
    TableSchema, TableStore, Tid, Value,
};

use uuid::{NoContext, Timestamp, Uuid};

use common::{pages_schema, DOMAIN};

async fn pages_store() -> TableStore {
    let store = TableStore::open_in_memory().unwrap();
    store.create_table(DOMAIN, &pages_schema()).await.unwrap();
    store
}

fn page(title: &str, rev: i64) -> PutRequest {
    PutRequest::new("pages")
        .with("title", title)
        .with("rev", rev)
        .with("body", format!("{title} at {rev}"))
}

#[tokio::test]
async fn missing_tid_is_generated() {
    let store = pages_store().await;
    let before = Tid::now();
    let ack = store.put(DOMAIN, &page("Main", 1)).await.unwrap();
    let after = Tid::now();

    assert!(before < ack.tid && ack.tid < after);
    assert!(
        (before.timestamp_ms()..=after.timestamp_ms()).contains(&ack.write_time_ms),
        "write time {} is the time of the put",
        ack.write_time_ms
    );

    let result = store
        .get(DOMAIN, &GetRequest::new("pages").with("title", "Main"))
        .await
        .unwrap();
    assert_eq!(result.count, 1);
    assert_eq!(
        result.items[0]["_tid"].as_uuid(),
        Some(ack.tid.as_uuid()),
        "the stored row carries the generated tid"
    );
}

#[tokio::test]
async fn explicit_tid_sets_write_time() {
    let store = pages_store().await;
    let historical = Tid::from_uuid(Uuid::new_v7(Timestamp::from_unix(
        NoContext,
        1_000_000_000,
        123_000_000,
    )))
    .unwrap();

    let ack = store
        .put(DOMAIN, &page("Main", 1).with("_tid", historical))
        .await
        .unwrap();
    assert_eq!(ack.tid, historical);
    assert_eq!(ack.write_time_ms, 1_000_000_000_123);

    // A later write with a minted tid sorts after the back-dated one.
    let current = store.put(DOMAIN, &page("Main", 1)).await.unwrap();
    assert!(current.write_time_ms > ack.write_time_ms);
    let result = store
        .get(
            DOMAIN,
            &GetRequest::new("pages")
                .with("title", "Main")
                .order_by("_tid", SortOrder::Asc),
        )
        .await
        .unwrap();
    let tids: Vec<_> = result.items.iter().filter_map(|r| r["_tid"].as_uuid()).collect();
    assert_eq!(tids, vec![historical.as_uuid(), current.tid.as_uuid()]);
}

#[tokio::test]
async fn every_write_is_a_new_revision() {
    let store = pages_store().await;
    let first = store.put(DOMAIN, &page("Main", 1)).await.unwrap();
    let second = store.put(DOMAIN, &page("Main", 1)).await.unwrap();
    assert!(second.tid > first.tid);

    let result = store
        .get(DOMAIN, &GetRequest::new("pages").with("title", "Main").with("rev", 1))
        .await
        .unwrap();
    assert_eq!(result.count, 2);
    // Declared order: rev desc, then tid desc.
    assert_eq!(result.items[0]["_tid"].as_uuid(), Some(second.tid.as_uuid()));
    assert_eq!(result.next, None, "unpaged reads carry no accumulator");
}

#[tokio::test]
async fn typed_values_round_trip_through_storage() {
    let store = TableStore::open_in_memory().unwrap();
    let schema = TableSchema::new("typed")
        .attribute("id", AttributeType::Uuid)
        .attribute("flag", AttributeType::Boolean)
        .attribute("ratio", AttributeType::Double)
        .attribute("amount", AttributeType::Decimal)
        .attribute("at", AttributeType::Timestamp)
        .attribute("doc", AttributeType::Json)
        .attribute("raw", AttributeType::Blob)
        .attribute("tags", "set<string>".parse().unwrap())
        .hash("id");
    store.create_table(DOMAIN, &schema).await.unwrap();

    let id = uuid::Uuid::now_v7();
    let doc = serde_json::json!({ "nested": [1, 2, { "k": "v" }] });
    store
        .put(
            DOMAIN,
            &PutRequest::new("typed")
                .with("id", id)
                .with("flag", true)
                .with("ratio", 0.1)
                .with("amount", Value::Text("12.50".into()))
                .with("at", Value::Timestamp(1_700_000_000_123))
                .with("doc", doc.clone())
                .with("raw", vec![0u8, 159, 255])
                .with(
                    "tags",
                    Value::Set(vec!["b".into(), "a".into(), "b".into()]),
                ),
        )
        .await
        .unwrap();

    let result = store
        .get(DOMAIN, &GetRequest::new("typed").with("id", id))
        .await
        .unwrap();
    let row = &result.items[0];
    assert_eq!(row["id"], Value::Uuid(id));
    assert_eq!(row["flag"], Value::Bool(true));
    assert_eq!(row["ratio"], Value::Float(0.1));
    assert_eq!(row["amount"], Value::Text("12.50".into()));
    assert_eq!(row["at"], Value::Timestamp(1_700_000_000_123));
    assert_eq!(row["doc"], Value::Json(doc));
    assert_eq!(row["raw"], Value::Blob(vec![0, 159, 255]));
    match &row["tags"] {
        Value::Set(tags) => {
            let tags: BTreeSet<_> = tags.iter().filter_map(Value::as_str).collect();
            assert_eq!(tags, BTreeSet::from(["a", "b"]));
        }
        other => panic!("expected a set, got {other:?}"),
    }
}

#[tokio::test]
async fn type_mismatch_and_unknown_attributes_are_rejected() {
    let store = pages_store().await;

    let err = store
        .put(DOMAIN, &page("Main", 1).with("rev", "one"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));

    let err = store
        .put(DOMAIN, &page("Main", 1).with("colour", "red"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));

    let err = store
        .put(DOMAIN, &PutRequest::new("pages").with("title", "Main"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(msg) if msg.contains("rev")));
}

#[tokio::test]
async fn statics_are_shared_across_revisions() {
    let store = pages_store().await;
    store
        .put(DOMAIN, &page("Main", 1).with("owner", "alice"))
        .await
        .unwrap();
    store.put(DOMAIN, &page("Main", 2)).await.unwrap();
    store
        .put(DOMAIN, &page("Other", 1).with("owner", "carol"))
        .await
        .unwrap();

    let result = store
        .get(DOMAIN, &GetRequest::new("pages").with("title", "Main"))
        .await
        .unwrap();
    assert_eq!(result.count, 2);
    for item in &result.items {
        assert_eq!(item["owner"].as_str(), Some("alice"));
    }

    store
        .put(DOMAIN, &page("Main", 3).with("owner", "bob"))
        .await
        .unwrap();
    let result = store
        .get(
            DOMAIN,
            &GetRequest::new("pages")
                .with("title", "Main")
                .with("owner", "bob"),
        )
        .await
        .unwrap();
    assert_eq!(result.count, 3, "a static write updates every revision of the item");
}

#[tokio::test]
async fn conditions_order_and_projection() {
    let store = pages_store().await;
    for rev in 1..=5 {
        store.put(DOMAIN, &page("Main", rev)).await.unwrap();
    }

    let result = store
        .get(
            DOMAIN,
            &GetRequest::new("pages")
                .with("title", "Main")
                .condition("rev", Condition::Between(2.into(), 4.into()))
                .order_by("rev", SortOrder::Asc)
                .project(["rev", "body"]),
        )
        .await
        .unwrap();
    let revs: Vec<i64> = result.items.iter().filter_map(|r| r["rev"].as_i64()).collect();
    assert_eq!(revs, vec![2, 3, 4]);
    assert_eq!(
        result.items[0].keys().collect::<Vec<_>>(),
        vec!["body", "rev"],
        "projection returns only the named attributes"
    );

    let newest = store
        .get(
            DOMAIN,
            &GetRequest::new("pages")
                .with("title", "Main")
                .condition("rev", Condition::Gt(3.into())),
        )
        .await
        .unwrap();
    let revs: Vec<i64> = newest.items.iter().filter_map(|r| r["rev"].as_i64()).collect();
    assert_eq!(revs, vec![5, 4], "declared range order is descending");
}

#[tokio::test]
async fn pagination_accumulates_offsets() {
    let store = pages_store().await;
    for rev in 1..=5 {
        store.put(DOMAIN, &page("Main", rev)).await.unwrap();
    }
    let base = GetRequest::new("pages").with("title", "Main").limit(2);

    let first = store.get(DOMAIN, &base).await.unwrap();
    assert_eq!((first.count, first.next), (2, Some(2)));

    let second = store
        .get(DOMAIN, &base.clone().next(first.next.unwrap()))
        .await
        .unwrap();
    assert_eq!((second.count, second.next), (2, Some(4)));

    let third = store
        .get(DOMAIN, &base.clone().next(second.next.unwrap()))
        .await
        .unwrap();
    assert_eq!((third.count, third.next), (1, Some(5)));

    let seen: BTreeSet<i64> = [first, second, third]
        .iter()
        .flat_map(|page| page.items.iter().filter_map(|r| r["rev"].as_i64()))
        .collect();
    assert_eq!(seen, (1..=5).collect::<BTreeSet<i64>>(), "pages neither skip nor repeat rows");
}

#[tokio::test]
async fn secondary_index_reads_latest_revision() {
    let store = TableStore::open_in_memory().unwrap();
    let schema = TableSchema::new("docs")
        .attribute("id", AttributeType::String)
        .attribute("author", AttributeType::String)
        .attribute("text", AttributeType::String)
        .hash("id")
        .secondary_index(
            "by_author",
            vec![IndexElement::hash("author"), IndexElement::proj("text")],
        );
    store.create_table(DOMAIN, &schema).await.unwrap();

    for text in ["draft", "review", "final"] {
        store
            .put(
                DOMAIN,
                &PutRequest::new("docs")
                    .with("id", "a")
                    .with("author", "ann")
                    .with("text", text),
            )
            .await
            .unwrap();
    }
    store
        .put(
            DOMAIN,
            &PutRequest::new("docs")
                .with("id", "b")
                .with("author", "ann")
                .with("text", "other"),
        )
        .await
        .unwrap();

    let result = store
        .get(
            DOMAIN,
            &GetRequest::new("docs").index("by_author").with("author", "ann"),
        )
        .await
        .unwrap();
    let texts: BTreeSet<_> = result.items.iter().filter_map(|r| r["text"].as_str()).collect();
    assert_eq!(texts, BTreeSet::from(["final", "other"]));

    let err = store
        .get(DOMAIN, &GetRequest::new("docs").index("by_title"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

#[tokio::test]
async fn read_from_dropped_table_is_empty() {
    let (dir, path) = common::create_temp_db_file("dropped.db");
    let reader = common::open_store(&path);
    reader.create_table(DOMAIN, &pages_schema()).await.unwrap();
    reader.put(DOMAIN, &page("Main", 1)).await.unwrap();

    // Another process drops the table while `reader` still caches the schema.
    let other = common::open_store(&path);
    other.drop_table(DOMAIN, "pages").await.unwrap();

    let result = reader
        .get(DOMAIN, &GetRequest::new("pages").with("title", "Main").limit(10))
        .await
        .unwrap();
    assert_eq!(result.count, 0);
    assert!(result.items.is_empty());
    assert_eq!(result.next, Some(0));
    drop(dir);
}

#[tokio::test]
async fn decimal_attributes_match_but_do_not_order() {
    let store = TableStore::open_in_memory().unwrap();
    let ranged = TableSchema::new("prices")
        .attribute("sku", AttributeType::String)
        .attribute("price", AttributeType::Decimal)
        .hash("sku")
        .range("price", SortOrder::Asc);
    assert!(matches!(
        store.create_table(DOMAIN, &ranged).await,
        Err(Error::InvalidRequest(_))
    ));

    let schema = TableSchema::new("prices")
        .attribute("sku", AttributeType::String)
        .attribute("price", AttributeType::Decimal)
        .hash("sku");
    store.create_table(DOMAIN, &schema).await.unwrap();
    for price in ["9", "10", "100.5", "2"] {
        store
            .put(
                DOMAIN,
                &PutRequest::new("prices")
                    .with("sku", "widget")
                    .with("price", Value::Text(price.into())),
            )
            .await
            .unwrap();
    }

    let matched = store
        .get(
            DOMAIN,
            &GetRequest::new("prices").with("price", Value::Text("10".into())),
        )
        .await
        .unwrap();
    assert_eq!(matched.count, 1);
    assert_eq!(matched.items[0]["price"], Value::Text("10".into()));

    let cheaper = GetRequest::new("prices")
        .condition("price", Condition::Lt(Value::Text("10".into())));
    assert!(matches!(
        store.get(DOMAIN, &cheaper).await,
        Err(Error::InvalidRequest(_))
    ));
    let sorted = GetRequest::new("prices").order_by("price", SortOrder::Asc);
    assert!(matches!(
        store.get(DOMAIN, &sorted).await,
        Err(Error::InvalidRequest(_))
    ));
}
