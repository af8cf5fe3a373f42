//! Conditional Write Tests
//!
//! Tests the per-record compare-and-swap pipeline:
//! - First write of a key inserts the primary row and its index row together
//! - Rewrites at the same index position update both rows in place
//! - Index moves delete the old index row and insert the new one atomically,
//!   whatever the type of the indexed attribute
//! - Undeclared attributes travel in the dynamic columns
//! - Lost races are retried a bounded number of times

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use bulkload::config::RetryPolicy;
use bulkload::{
    AttributeMap, AttributeType, AttributeValue, BulkLoader, CqlValue, Error, IndexDefinition,
    Statement, TableInfo, TableSchema, WriteContext, WriteOutcome,
};

fn item(id: &str, indexed: Option<&str>) -> AttributeMap {
    let mut pairs = vec![("id", AttributeValue::string(id))];
    if let Some(value) = indexed {
        pairs.push(("indexed_attr", AttributeValue::string(value)));
    }
    pairs.into_iter().collect()
}

fn is_guarded_update(statement: &Statement) -> bool {
    match statement {
        Statement::Update(update) => update.condition.is_some(),
        Statement::Batch(members) => members.first().is_some_and(is_guarded_update),
        _ => false,
    }
}

/// Tests the lifecycle of one item as its indexed value changes.
#[tokio::test]
async fn index_row_follows_indexed_value() {
    let table = common::standard_table();
    let session = common::session_with(&table).await;
    let context = WriteContext::new(Arc::clone(&session), Arc::new(table), RetryPolicy::default());

    let report = context.put_item(&item("k1", Some("a"))).await.unwrap();
    assert_eq!(report.outcome, WriteOutcome::Inserted);
    assert_eq!(report.retries, 0);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(common::indexed_value(common::primary_rows(&rows, "k1")[0]), Some("a"));
    assert_eq!(common::slot_value(common::index_rows(&rows, "k1")[0]), Some("a"));

    // Moving the indexed value from "a" to "b" leaves no row at "a".
    let report = context.put_item(&item("k1", Some("b"))).await.unwrap();
    assert_eq!(report.outcome, WriteOutcome::Reindexed);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 2);
    let index = common::index_rows(&rows, "k1");
    assert_eq!(index.len(), 1);
    assert_eq!(common::slot_value(index[0]), Some("b"));
    assert_eq!(common::indexed_value(common::primary_rows(&rows, "k1")[0]), Some("b"));

    // Dropping the indexed attribute drops the index row.
    let report = context.put_item(&item("k1", None)).await.unwrap();
    assert_eq!(report.outcome, WriteOutcome::Reindexed);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(common::indexed_value(common::primary_rows(&rows, "k1")[0]), None);

    // And it comes back when the attribute does.
    let report = context.put_item(&item("k1", Some("c"))).await.unwrap();
    assert_eq!(report.outcome, WriteOutcome::Reindexed);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 2);
    common::assert_index_consistent(&rows);
}

/// A table keyed on `id` and indexed on `field` of type `ty`.
fn table_indexed_on(field: &str, ty: AttributeType) -> TableInfo {
    let schema = TableSchema::new(
        [("id", AttributeType::String), (field, ty)],
        ["id"],
        Some(IndexDefinition::new("by_field", field)),
    )
    .unwrap();
    TableInfo::new(common::TENANT, common::TABLE, schema)
}

fn item_with(id: &str, field: &str, value: AttributeValue) -> AttributeMap {
    [("id", AttributeValue::string(id)), (field, value)]
        .into_iter()
        .collect()
}

/// Tests index moves on a table indexed on a number attribute.
#[tokio::test]
async fn index_row_follows_number_value() {
    let table = table_indexed_on("score", AttributeType::Number);
    let session = common::session_with(&table).await;
    let context = WriteContext::new(Arc::clone(&session), Arc::new(table), RetryPolicy::default());
    let score = |n: &str| item_with("k1", "score", AttributeValue::number(n));

    let report = context.put_item(&score("1.5")).await.unwrap();
    assert_eq!(report.outcome, WriteOutcome::Inserted);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 2);
    let index = common::index_rows(&rows, "k1");
    assert_eq!(common::number_slot(index[0]), Some("1.5"));
    assert_eq!(common::slot_value(index[0]), Some(""));

    let report = context.put_item(&score("2")).await.unwrap();
    assert_eq!(report.outcome, WriteOutcome::Reindexed);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 2);
    let index = common::index_rows(&rows, "k1");
    assert_eq!(index.len(), 1);
    assert_eq!(common::number_slot(index[0]), Some("2"));
    assert!(rows.iter().all(|row| common::number_slot(row) != Some("1.5")));
    assert_eq!(
        common::primary_rows(&rows, "k1")[0].get("user_score"),
        Some(&CqlValue::Decimal("2".to_string()))
    );

    // A different spelling of the same number stays on the same index row.
    let report = context.put_item(&score("2.00")).await.unwrap();
    assert_eq!(report.outcome, WriteOutcome::Updated);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 2);
    let index = common::index_rows(&rows, "k1");
    assert_eq!(common::number_slot(index[0]), Some("2"));
    assert_eq!(
        index[0].get("user_score"),
        Some(&CqlValue::Decimal("2.00".to_string()))
    );

    // Moving away from the respelled value finds and drops its row.
    let report = context.put_item(&score("-0.5e1")).await.unwrap();
    assert_eq!(report.outcome, WriteOutcome::Reindexed);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 2);
    let index = common::index_rows(&rows, "k1");
    assert_eq!(index.len(), 1);
    assert_eq!(common::number_slot(index[0]), Some("-5"));
}

/// Tests index moves on a table indexed on a binary attribute.
#[tokio::test]
async fn index_row_follows_binary_value() {
    let table = table_indexed_on("digest", AttributeType::Binary);
    let session = common::session_with(&table).await;
    let context = WriteContext::new(Arc::clone(&session), Arc::new(table), RetryPolicy::default());
    let digest = |b: &[u8]| item_with("k1", "digest", AttributeValue::binary(b.to_vec()));

    let report = context.put_item(&digest(&[0u8, 1, 2])).await.unwrap();
    assert_eq!(report.outcome, WriteOutcome::Inserted);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(common::blob_slot(common::index_rows(&rows, "k1")[0]), Some(&[0u8, 1, 2][..]));

    let report = context.put_item(&digest(&[0xffu8])).await.unwrap();
    assert_eq!(report.outcome, WriteOutcome::Reindexed);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 2);
    let index = common::index_rows(&rows, "k1");
    assert_eq!(index.len(), 1);
    assert_eq!(common::blob_slot(index[0]), Some(&[0xffu8][..]));
    assert!(rows.iter().all(|row| common::blob_slot(row) != Some(&[0u8, 1, 2][..])));
    assert_eq!(
        common::primary_rows(&rows, "k1")[0].get("user_digest"),
        Some(&CqlValue::Blob(vec![0xff]))
    );

    let report = context.put_item(&digest(&[0xffu8])).await.unwrap();
    assert_eq!(report.outcome, WriteOutcome::Updated);
    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 2);
}

/// Tests that writing the same record twice converges to the same rows.
#[tokio::test]
async fn rewrite_at_same_position_updates_in_place() {
    let table = common::standard_table();
    let session = common::session_with(&table).await;
    let loader = BulkLoader::new(Arc::clone(&session), table, common::test_config(8));

    let first = json!({"id": {"S": "k1"}, "indexed_attr": {"S": "a"}, "qty": {"N": "1"}});
    let second = json!({"id": {"S": "k1"}, "indexed_attr": {"S": "a"}, "qty": {"N": "2"}});

    let summary = loader.load_values(vec![first]).await.unwrap();
    assert_eq!(summary.inserted, 1);
    let summary = loader.load_values(vec![second]).await.unwrap();
    assert_eq!(summary.updated, 1);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 2);
    common::assert_index_consistent(&rows);

    // The index row carries the new data too.
    for row in &rows {
        assert_eq!(
            common::dynamic_attribute(row, "qty"),
            Some(AttributeValue::number("2"))
        );
    }
}

/// Tests that undeclared attributes are stored and replaced as a whole.
#[tokio::test]
async fn dynamic_attributes_are_replaced_not_merged() {
    let table = common::standard_table();
    let session = common::session_with(&table).await;
    let loader = BulkLoader::new(Arc::clone(&session), table, common::test_config(8));

    let record = json!({
        "id": {"S": "k1"},
        "tags": {"SS": ["red", "blue"]},
        "raw": {"B": "aGVsbG8="},
    });
    loader.load_values(vec![record]).await.unwrap();

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    let primary = common::primary_rows(&rows, "k1")[0];
    assert_eq!(
        common::dynamic_attribute(primary, "tags"),
        Some(AttributeValue::StringSet(
            ["blue", "red"].into_iter().map(String::from).collect()
        ))
    );
    assert_eq!(
        common::dynamic_attribute(primary, "raw"),
        Some(AttributeValue::binary(b"hello".to_vec()))
    );

    // A later record without "tags" removes it.
    let record = json!({"id": {"S": "k1"}, "raw": {"B": "aGk="}});
    let summary = loader.load_values(vec![record]).await.unwrap();
    assert_eq!(summary.updated, 1);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    let primary = common::primary_rows(&rows, "k1")[0];
    assert_eq!(common::dynamic_attribute(primary, "tags"), None);
    assert_eq!(
        common::dynamic_attribute(primary, "raw"),
        Some(AttributeValue::binary(b"hi".to_vec()))
    );
}

/// Tests a table with no index: one row per item, guarded by existence.
#[tokio::test]
async fn unindexed_table_keeps_one_row_per_item() {
    let schema = TableSchema::new(
        [("id", AttributeType::String), ("n", AttributeType::Number)],
        ["id"],
        None,
    )
    .unwrap();
    let table = TableInfo::new(common::TENANT, common::TABLE, schema);
    let session = common::session_with(&table).await;
    let context = WriteContext::new(Arc::clone(&session), Arc::new(table), RetryPolicy::default());

    let first: AttributeMap = [
        ("id", AttributeValue::string("k1")),
        ("n", AttributeValue::number("1")),
    ]
    .into_iter()
    .collect();
    let second: AttributeMap = [("id", AttributeValue::string("k1"))].into_iter().collect();

    assert_eq!(context.put_item(&first).await.unwrap().outcome, WriteOutcome::Inserted);
    assert_eq!(context.put_item(&second).await.unwrap().outcome, WriteOutcome::Updated);

    let rows = session.scan(common::TENANT, common::TABLE).await.unwrap();
    assert_eq!(rows.len(), 1);
    // Declared attributes missing from the record are cleared.
    assert!(rows[0].get("user_n").map_or(true, |v| v.is_null()));
}

/// Tests that rejected corrective writes are retried and counted.
#[tokio::test]
async fn lost_races_are_retried() {
    let table = common::standard_table();
    let local = common::session_with(&table).await;
    let seed = WriteContext::new(Arc::clone(&local), Arc::new(table.clone()), RetryPolicy::default());
    seed.put_item(&item("k1", Some("a"))).await.unwrap();

    let losses = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&losses);
    let session = Arc::new(common::InterceptSession::new(Arc::clone(&local), move |statement| {
        if is_guarded_update(statement) && counter.fetch_add(1, Ordering::SeqCst) < 2 {
            return Some(Ok(common::rejected()));
        }
        None
    }));

    let retry = common::test_config(1).retry;
    let context = WriteContext::new(Arc::clone(&session), Arc::new(table), retry);
    let report = context.put_item(&item("k1", Some("b"))).await.unwrap();

    assert_eq!(report.outcome, WriteOutcome::Reindexed);
    assert_eq!(report.retries, 2);
    assert_eq!(session.intercepted(), 2);

    let rows = local.scan(common::TENANT, common::TABLE).await.unwrap();
    common::assert_index_consistent(&rows);
    assert_eq!(common::slot_value(common::index_rows(&rows, "k1")[0]), Some("b"));
}

/// Tests that a record that never wins its race fails after the retry budget.
#[tokio::test]
async fn retries_are_bounded() {
    let table = common::standard_table();
    let local = common::session_with(&table).await;
    let seed = WriteContext::new(Arc::clone(&local), Arc::new(table.clone()), RetryPolicy::default());
    seed.put_item(&item("k1", Some("a"))).await.unwrap();

    let session = Arc::new(common::InterceptSession::new(Arc::clone(&local), |statement| {
        is_guarded_update(statement).then(|| Ok(common::rejected()))
    }));

    let retry = RetryPolicy {
        max_retries: 3,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        op_timeout: Duration::from_secs(5),
    };
    let context = WriteContext::new(Arc::clone(&session), Arc::new(table), retry);
    let err = context.put_item(&item("k1", Some("b"))).await.unwrap_err();

    assert!(matches!(err, Error::RetriesExhausted { attempts: 4 }), "{:?}", err);
    assert_eq!(session.intercepted(), 4);

    // The item is untouched.
    let rows = local.scan(common::TENANT, common::TABLE).await.unwrap();
    common::assert_index_consistent(&rows);
    assert_eq!(common::slot_value(common::index_rows(&rows, "k1")[0]), Some("a"));
}

/// Tests that a record without its key never reaches storage.
#[tokio::test]
async fn missing_key_is_rejected_before_storage() {
    let table = common::standard_table();
    let local = common::session_with(&table).await;
    let session = Arc::new(common::InterceptSession::new(Arc::clone(&local), |_| None));
    let context = WriteContext::new(Arc::clone(&session), Arc::new(table), RetryPolicy::default());

    let keyless: AttributeMap = [("indexed_attr", AttributeValue::string("a"))]
        .into_iter()
        .collect();
    let err = context.put_item(&keyless).await.unwrap_err();

    assert!(matches!(err, Error::MissingKey { ref attribute } if attribute == "id"));
    assert!(local.scan(common::TENANT, common::TABLE).await.unwrap().is_empty());
}
