#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use bulkload::codec::decode_dynamic_blob;
use bulkload::config::RetryPolicy;
use bulkload::schema::{
    attribute_column, standard_schema, APPLIED_COLUMN, STANDARD_INDEXED_ATTRIBUTE, STANDARD_KEY,
    SYSTEM_COLUMN_EXTRA_ATTR_DATA, SYSTEM_COLUMN_INDEX_NAME, SYSTEM_COLUMN_INDEX_VALUE_BLOB,
    SYSTEM_COLUMN_INDEX_VALUE_NUMBER, SYSTEM_COLUMN_INDEX_VALUE_STRING,
};
use bulkload::{
    AttributeValue, CqlValue, LoaderConfig, LocalSession, Result, ResultSet, Row, Session,
    Statement, TableInfo,
};

pub const TENANT: &str = "acme";
pub const TABLE: &str = "items";

pub fn standard_table() -> TableInfo {
    TableInfo::new(TENANT, TABLE, standard_schema().expect("standard schema"))
}

/// An in-memory store with `table` provisioned.
pub async fn session_with(table: &TableInfo) -> Arc<LocalSession> {
    let session = LocalSession::open_in_memory().expect("open in-memory store");
    session
        .create_table(table.clone())
        .await
        .expect("create table");
    Arc::new(session)
}

/// Config with fast retries so contention tests finish quickly.
pub fn test_config(queue_capacity: usize) -> LoaderConfig {
    LoaderConfig {
        tenant: TENANT.to_string(),
        table: TABLE.to_string(),
        queue_capacity,
        progress_interval: 0,
        retry: RetryPolicy {
            max_retries: 32,
            base_backoff: Duration::from_micros(200),
            max_backoff: Duration::from_millis(5),
            op_timeout: Duration::from_secs(5),
        },
    }
}

/// A record of the standard table.
pub fn record(id: &str, indexed: Option<&str>) -> Value {
    let mut record = json!({ STANDARD_KEY: {"S": id} });
    if let Some(value) = indexed {
        record[STANDARD_INDEXED_ATTRIBUTE] = json!({"S": value});
    }
    record
}

// =============================================================================
// Row Inspection
// =============================================================================

fn key_of(row: &Row) -> Option<&str> {
    row.get(&attribute_column(STANDARD_KEY))
        .and_then(CqlValue::as_text)
}

fn index_name_of(row: &Row) -> Option<&str> {
    row.get(SYSTEM_COLUMN_INDEX_NAME).and_then(CqlValue::as_text)
}

pub fn primary_rows<'r>(rows: &'r [Row], id: &str) -> Vec<&'r Row> {
    rows.iter()
        .filter(|row| key_of(row) == Some(id) && index_name_of(row) == Some(""))
        .collect()
}

pub fn index_rows<'r>(rows: &'r [Row], id: &str) -> Vec<&'r Row> {
    rows.iter()
        .filter(|row| key_of(row) == Some(id) && index_name_of(row) != Some(""))
        .collect()
}

/// The slot value of an index row.
pub fn slot_value(row: &Row) -> Option<&str> {
    row.get(SYSTEM_COLUMN_INDEX_VALUE_STRING)
        .and_then(CqlValue::as_text)
}

pub fn number_slot(row: &Row) -> Option<&str> {
    match row.get(SYSTEM_COLUMN_INDEX_VALUE_NUMBER)? {
        CqlValue::Decimal(n) => Some(n.as_str()),
        _ => None,
    }
}

pub fn blob_slot(row: &Row) -> Option<&[u8]> {
    match row.get(SYSTEM_COLUMN_INDEX_VALUE_BLOB)? {
        CqlValue::Blob(b) => Some(b.as_slice()),
        _ => None,
    }
}

pub fn indexed_value(row: &Row) -> Option<&str> {
    row.get(&attribute_column(STANDARD_INDEXED_ATTRIBUTE))
        .and_then(CqlValue::as_text)
}

/// A dynamic attribute decoded from a row's `extra_attr_data`.
pub fn dynamic_attribute(row: &Row, name: &str) -> Option<AttributeValue> {
    match row.get(SYSTEM_COLUMN_EXTRA_ATTR_DATA)? {
        CqlValue::Map(entries) => entries.iter().find_map(|(k, v)| match (k, v) {
            (CqlValue::Text(k), CqlValue::Blob(blob)) if k == name => {
                decode_dynamic_blob(name, blob).ok()
            }
            _ => None,
        }),
        _ => None,
    }
}

/// Asserts one primary row per item and exactly one index row, at the
/// primary's indexed value, or none if the primary has no indexed value.
pub fn assert_index_consistent(rows: &[Row]) {
    let mut keys: Vec<&str> = rows.iter().filter_map(key_of).collect();
    keys.sort_unstable();
    keys.dedup();

    for key in keys {
        let primaries = primary_rows(rows, key);
        assert_eq!(primaries.len(), 1, "item {} has {} primary rows", key, primaries.len());
        let primary = primaries[0];
        let index = index_rows(rows, key);

        match indexed_value(primary) {
            None => assert!(index.is_empty(), "item {} has stray index rows", key),
            Some(value) => {
                assert_eq!(index.len(), 1, "item {} has {} index rows", key, index.len());
                assert_eq!(slot_value(index[0]), Some(value), "item {} indexed at wrong slot", key);
                assert_eq!(
                    index[0].get(SYSTEM_COLUMN_EXTRA_ATTR_DATA),
                    primary.get(SYSTEM_COLUMN_EXTRA_ATTR_DATA),
                    "index row of {} is stale",
                    key
                );
            }
        }
    }
}

// =============================================================================
// Session Wrappers
// =============================================================================

/// A `[applied] = false` result.
pub fn rejected() -> ResultSet {
    let mut row = Row::new();
    row.insert(APPLIED_COLUMN.to_string(), CqlValue::Boolean(false));
    ResultSet::from_rows(vec![row])
}

/// True if any bound value of `statement` is the text `needle`.
pub fn mentions(statement: &Statement, needle: &str) -> bool {
    statement
        .values()
        .iter()
        .any(|value| value.as_text() == Some(needle))
}

type Hook = Box<dyn Fn(&Statement) -> Option<Result<ResultSet>> + Send + Sync>;

/// Lets a hook answer a statement before the inner session sees it.
pub struct InterceptSession<S> {
    inner: S,
    hook: Hook,
    intercepted: AtomicUsize,
}

impl<S> InterceptSession<S> {
    pub fn new(
        inner: S,
        hook: impl Fn(&Statement) -> Option<Result<ResultSet>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            hook: Box::new(hook),
            intercepted: AtomicUsize::new(0),
        }
    }

    pub fn intercepted(&self) -> usize {
        self.intercepted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: Session> Session for InterceptSession<S> {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet> {
        if let Some(answer) = (self.hook)(statement) {
            self.intercepted.fetch_add(1, Ordering::SeqCst);
            return answer;
        }
        self.inner.execute(statement).await
    }

    async fn describe_table(&self, tenant: &str, table: &str) -> Result<TableInfo> {
        self.inner.describe_table(tenant, table).await
    }
}

/// Never answers statements that mention `needle`.
pub struct StallingSession<S> {
    inner: S,
    needle: String,
}

impl<S> StallingSession<S> {
    pub fn new(inner: S, needle: &str) -> Self {
        Self {
            inner,
            needle: needle.to_string(),
        }
    }
}

#[async_trait]
impl<S: Session> Session for StallingSession<S> {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet> {
        if mentions(statement, &self.needle) {
            futures::future::pending::<()>().await;
        }
        self.inner.execute(statement).await
    }

    async fn describe_table(&self, tenant: &str, table: &str) -> Result<TableInfo> {
        self.inner.describe_table(tenant, table).await
    }
}

/// Delays every statement and records the peak number in flight.
pub struct SlowSession<S> {
    inner: S,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    executed: AtomicUsize,
}

impl<S> SlowSession<S> {
    pub fn new(inner: S, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            executed: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: Session> Session for SlowSession<S> {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        let result = self.inner.execute(statement).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.executed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn describe_table(&self, tenant: &str, table: &str) -> Result<TableInfo> {
        self.inner.describe_table(tenant, table).await
    }
}
