//! # Embedded Column Store
//!
//! A single-node storage engine behind the [`Session`] trait, backed by
//! SQLite. It runs the pipeline's statements with column-store semantics so
//! the whole ingestion path can be exercised without a cluster: by the CLI,
//! the stress binary, and the integration tests.
//!
//! ## Single-Writer Actor
//!
//! ```text
//!  pipeline tasks                         dedicated thread
//! ┌──────────────┐   Request + oneshot   ┌───────────────────────────┐
//! │ LocalSession │ ───────────────────►  │ LocalStore                │
//! │ (Clone)      │ ◄───────────────────  │   rusqlite::Connection    │
//! └──────────────┘      Result<T>        │   table metadata cache    │
//!                                        └───────────────────────────┘
//! ```
//!
//! The connection never leaves its thread. Every statement, batches
//! included, runs in its own SQLite transaction, so there is no interleaving
//! to reason about.
//!
//! ## Column-Store Semantics
//!
//! | Statement | Behavior |
//! |-----------|----------|
//! | `INSERT` | Upsert of the listed columns; unlisted columns are untouched |
//! | `UPDATE` | Upsert as well: creates the row if it is missing |
//! | `DELETE` | Removes the row at the full primary key |
//! | `IF NOT EXISTS` | Row must be absent |
//! | `IF EXISTS` | Row must be present |
//! | `IF c = v` | Row must be present with `c = v` (null matches null) |
//! | `BATCH` | Every condition checked first, then every mutation applied, atomically |
//!
//! A conditional statement answers with one row carrying `[applied]`; when
//! rejected the row also carries the current values of the row whose
//! condition failed. Unconditional statements answer with no rows.
//!
//! ## Storage Mapping
//!
//! Each user table is one SQLite table named `<keyspace>__<table>` with the
//! columns from [`schema::columns`]. Text and decimal columns are `TEXT`,
//! blobs are `BLOB`, collections are JSON arrays in `TEXT` (blob elements as
//! hex). Empty collections are stored as null, as in the column store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value as Json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::schema::{self, quote_identifier, Column, CqlType, APPLIED_COLUMN};
use crate::session::{ResultSet, Row, Session};
use crate::statement::{ColumnValue, Condition, CqlValue, Statement, TableRef};
use crate::types::{TableInfo, TableSchema};

// =============================================================================
// Configuration
// =============================================================================

/// Size of the request channel.
const REQUEST_CHANNEL_SIZE: usize = 4096;

/// Catalog of provisioned tables.
const CATALOG_TABLE: &str = "table_info";

// =============================================================================
// Table Metadata
// =============================================================================

/// What the engine needs to know about a user table.
#[derive(Debug)]
struct TableMeta {
    sql_name: String,
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl TableMeta {
    fn for_info(info: &TableInfo) -> Self {
        Self {
            sql_name: quote_identifier(&format!("{}__{}", info.keyspace, info.internal_name)),
            columns: schema::columns(&info.schema),
            primary_key: schema::primary_key_columns(&info.schema),
        }
    }

    fn column_type(&self, name: &str) -> Result<&CqlType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.cql_type)
            .ok_or_else(|| {
                Error::StorageExecution(format!("undefined column '{}' on {}", name, self.sql_name))
            })
    }

    fn is_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }

    /// Picks the full primary key out of `pairs`, in key order.
    fn key_of(&self, pairs: &[ColumnValue]) -> Result<Vec<ColumnValue>> {
        self.primary_key
            .iter()
            .map(|key| {
                pairs
                    .iter()
                    .find(|(c, _)| c == key)
                    .cloned()
                    .ok_or_else(|| {
                        Error::StorageExecution(format!(
                            "missing primary key column '{}' on {}",
                            key, self.sql_name
                        ))
                    })
            })
            .collect()
    }

    fn ddl(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.name), sql_type(&c.cql_type)))
            .collect();
        let key: Vec<String> = self.primary_key.iter().map(|k| quote_identifier(k)).collect();
        format!(
            "CREATE TABLE {} ({}, PRIMARY KEY ({})) WITHOUT ROWID",
            self.sql_name,
            columns.join(", "),
            key.join(", ")
        )
    }
}

fn sql_type(ty: &CqlType) -> &'static str {
    match ty {
        CqlType::Blob => "BLOB",
        CqlType::Boolean => "INTEGER",
        CqlType::Text | CqlType::Decimal | CqlType::Set(_) | CqlType::Map(_, _) => "TEXT",
    }
}

// =============================================================================
// Local Store
// =============================================================================

/// Synchronous engine that owns the SQLite connection.
///
/// `LocalStore` is not thread-safe; [`LocalSession`] runs it on its own
/// thread. Use it directly only from synchronous code.
pub struct LocalStore {
    conn: Connection,
    tables: HashMap<TableRef, Arc<TableMeta>>,
}

impl LocalStore {
    /// Wraps a connection, creating the catalog if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL")?;

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {catalog} (
                tenant TEXT NOT NULL,
                name TEXT NOT NULL,
                keyspace TEXT NOT NULL,
                internal_name TEXT NOT NULL,
                schema TEXT NOT NULL,
                PRIMARY KEY (tenant, name)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS {catalog}_storage
                ON {catalog} (keyspace, internal_name);",
            catalog = CATALOG_TABLE
        ))?;

        Ok(Self {
            conn,
            tables: HashMap::new(),
        })
    }

    // -------------------------------------------------------------------------
    // Catalog
    // -------------------------------------------------------------------------

    /// Registers a table and creates its storage.
    ///
    /// # Errors
    ///
    /// [`Error::TableAlreadyExists`] if the tenant already has a table of that
    /// name.
    pub fn create_table(&mut self, info: &TableInfo) -> Result<()> {
        info.schema.validate()?;
        if self.lookup(&info.tenant, &info.name)?.is_some() {
            return Err(Error::TableAlreadyExists {
                tenant: info.tenant.clone(),
                table: info.name.clone(),
            });
        }

        let meta = TableMeta::for_info(info);
        let schema_json = serde_json::to_string(&info.schema)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {} (tenant, name, keyspace, internal_name, schema)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                CATALOG_TABLE
            ),
            params![info.tenant, info.name, info.keyspace, info.internal_name, schema_json],
        )?;
        tx.execute_batch(&meta.ddl())?;
        tx.commit()?;

        info!(tenant = %info.tenant, table = %info.name, "created table");
        self.tables.insert(TableRef::of(info), Arc::new(meta));
        Ok(())
    }

    /// Loads a table's metadata from the catalog.
    pub fn describe_table(&self, tenant: &str, table: &str) -> Result<TableInfo> {
        self.lookup(tenant, table)?.ok_or_else(|| Error::TableNotFound {
            tenant: tenant.to_string(),
            table: table.to_string(),
        })
    }

    fn lookup(&self, tenant: &str, table: &str) -> Result<Option<TableInfo>> {
        let schema_json: Option<String> = self
            .conn
            .query_row(
                &format!(
                    "SELECT schema FROM {} WHERE tenant = ?1 AND name = ?2",
                    CATALOG_TABLE
                ),
                params![tenant, table],
                |row| row.get(0),
            )
            .optional()?;

        schema_json
            .map(|json| -> Result<TableInfo> {
                let schema: TableSchema = serde_json::from_str(&json)?;
                schema.validate()?;
                Ok(TableInfo::new(tenant, table, schema))
            })
            .transpose()
    }

    fn meta(&mut self, table: &TableRef) -> Result<Arc<TableMeta>> {
        if let Some(meta) = self.tables.get(table) {
            return Ok(Arc::clone(meta));
        }

        let found: Option<(String, String)> = self
            .conn
            .query_row(
                &format!(
                    "SELECT tenant, name FROM {} WHERE keyspace = ?1 AND internal_name = ?2",
                    CATALOG_TABLE
                ),
                params![table.keyspace, table.table],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (tenant, name) = found.ok_or_else(|| {
            Error::StorageExecution(format!(
                "unconfigured table {}.{}",
                table.keyspace, table.table
            ))
        })?;
        let info = self.describe_table(&tenant, &name)?;
        let meta = Arc::new(TableMeta::for_info(&info));
        self.tables.insert(table.clone(), Arc::clone(&meta));
        Ok(meta)
    }

    /// Deletes every row of a table. Returns the number of rows removed.
    pub fn truncate(&mut self, tenant: &str, table: &str) -> Result<usize> {
        let info = self.describe_table(tenant, table)?;
        let meta = self.meta(&TableRef::of(&info))?;
        let removed = self
            .conn
            .execute(&format!("DELETE FROM {}", meta.sql_name), [])?;
        info!(tenant, table, removed, "truncated table");
        Ok(removed)
    }

    /// Every row of a table in primary key order, index rows included.
    pub fn scan(&mut self, tenant: &str, table: &str) -> Result<Vec<Row>> {
        let info = self.describe_table(tenant, table)?;
        let meta = self.meta(&TableRef::of(&info))?;
        select_rows(&self.conn, &meta, &[])
    }

    // -------------------------------------------------------------------------
    // Statements
    // -------------------------------------------------------------------------

    /// Executes one statement.
    pub fn execute(&mut self, statement: &Statement) -> Result<ResultSet> {
        if let Statement::Select(select) = statement {
            let meta = self.meta(&select.table)?;
            return select_rows(&self.conn, &meta, &select.predicates).map(ResultSet::from_rows);
        }

        let mut members = Vec::new();
        flatten(statement, &mut members);

        let mut plans = Vec::with_capacity(members.len());
        for member in members {
            let plan = Mutation::plan(member)?;
            let meta = self.meta(plan.table)?;
            plans.push((plan, meta));
        }

        let tx = self.conn.transaction()?;

        for (plan, meta) in &plans {
            let Some(condition) = plan.condition else {
                continue;
            };
            let key = meta.key_of(plan.key_source)?;
            let current = select_rows(&tx, meta, &key)?.into_iter().next();
            if !condition_holds(meta, condition, current.as_ref())? {
                debug!(statement = statement.kind(), "condition not met");
                return Ok(rejected(current));
            }
        }

        for (plan, meta) in &plans {
            plan.apply(&tx, meta)?;
        }
        tx.commit()?;

        if statement.is_conditional() {
            Ok(applied())
        } else {
            Ok(ResultSet::empty())
        }
    }
}

fn flatten<'s>(statement: &'s Statement, out: &mut Vec<&'s Statement>) {
    match statement {
        Statement::Batch(members) => members.iter().for_each(|m| flatten(m, out)),
        other => out.push(other),
    }
}

fn applied() -> ResultSet {
    let mut row = Row::new();
    row.insert(APPLIED_COLUMN.to_string(), CqlValue::Boolean(true));
    ResultSet::from_rows(vec![row])
}

fn rejected(current: Option<Row>) -> ResultSet {
    let mut row = current.unwrap_or_default();
    row.insert(APPLIED_COLUMN.to_string(), CqlValue::Boolean(false));
    ResultSet::from_rows(vec![row])
}

fn condition_holds(meta: &TableMeta, condition: &Condition, current: Option<&Row>) -> Result<bool> {
    match (condition, current) {
        (Condition::NotExists, current) => Ok(current.is_none()),
        (Condition::Exists, current) => Ok(current.is_some()),
        (Condition::Equals(_), None) => Ok(false),
        (Condition::Equals(expected), Some(row)) => {
            for (column, value) in expected {
                meta.column_type(column)?;
                if row.get(column).unwrap_or(&CqlValue::Null) != value {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

// =============================================================================
// Mutations
// =============================================================================

/// One write of a batch, reduced to what the engine does with it.
struct Mutation<'s> {
    table: &'s TableRef,
    condition: Option<&'s Condition>,
    /// Pairs the primary key is taken from.
    key_source: &'s [ColumnValue],
    kind: MutationKind<'s>,
}

#[derive(Clone, Copy)]
enum MutationKind<'s> {
    Upsert(&'s [ColumnValue]),
    Delete,
}

impl<'s> Mutation<'s> {
    fn plan(statement: &'s Statement) -> Result<Self> {
        match statement {
            Statement::Insert(s) => Ok(Self {
                table: &s.table,
                condition: s.condition.as_ref(),
                key_source: &s.columns,
                kind: MutationKind::Upsert(&s.columns),
            }),
            Statement::Update(s) => Ok(Self {
                table: &s.table,
                condition: s.condition.as_ref(),
                key_source: &s.predicates,
                kind: MutationKind::Upsert(&s.assignments),
            }),
            Statement::Delete(s) => Ok(Self {
                table: &s.table,
                condition: s.condition.as_ref(),
                key_source: &s.predicates,
                kind: MutationKind::Delete,
            }),
            Statement::Select(_) | Statement::Batch(_) => Err(Error::StorageExecution(format!(
                "{} is not allowed inside a batch",
                statement.kind()
            ))),
        }
    }

    fn apply(&self, conn: &Connection, meta: &TableMeta) -> Result<()> {
        let key = meta.key_of(self.key_source)?;

        match self.kind {
            MutationKind::Delete => {
                let (clause, values) = where_clause(meta, &key, 1)?;
                conn.execute(
                    &format!("DELETE FROM {}{}", meta.sql_name, clause),
                    params_from_iter(values),
                )?;
            }
            MutationKind::Upsert(pairs) => {
                let data: Vec<&ColumnValue> = pairs.iter().filter(|(c, _)| !meta.is_key(c)).collect();

                let mut names = Vec::with_capacity(key.len() + data.len());
                let mut values = Vec::with_capacity(key.len() + data.len());
                for (column, value) in key.iter().chain(data.iter().copied()) {
                    names.push(quote_identifier(column));
                    values.push(to_sql(meta.column_type(column)?, value)?);
                }
                let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
                let target: Vec<String> = meta.primary_key.iter().map(|k| quote_identifier(k)).collect();

                let on_conflict = if data.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    let sets: Vec<String> = data
                        .iter()
                        .map(|(c, _)| {
                            let c = quote_identifier(c);
                            format!("{} = excluded.{}", c, c)
                        })
                        .collect();
                    format!("DO UPDATE SET {}", sets.join(", "))
                };

                conn.execute(
                    &format!(
                        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
                        meta.sql_name,
                        names.join(", "),
                        placeholders.join(", "),
                        target.join(", "),
                        on_conflict
                    ),
                    params_from_iter(values),
                )?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Reads
// =============================================================================

fn where_clause(
    meta: &TableMeta,
    predicates: &[ColumnValue],
    first_param: usize,
) -> Result<(String, Vec<SqlValue>)> {
    if predicates.is_empty() {
        return Ok((String::new(), Vec::new()));
    }

    let mut terms = Vec::with_capacity(predicates.len());
    let mut values = Vec::with_capacity(predicates.len());
    for (i, (column, value)) in predicates.iter().enumerate() {
        let ty = meta.column_type(column)?;
        terms.push(format!("{} = ?{}", quote_identifier(column), first_param + i));
        values.push(to_sql(ty, value)?);
    }
    Ok((format!(" WHERE {}", terms.join(" AND ")), values))
}

fn select_rows(conn: &Connection, meta: &TableMeta, predicates: &[ColumnValue]) -> Result<Vec<Row>> {
    let (clause, values) = where_clause(meta, predicates, 1)?;
    let columns: Vec<String> = meta.columns.iter().map(|c| quote_identifier(&c.name)).collect();
    let order: Vec<String> = meta.primary_key.iter().map(|k| quote_identifier(k)).collect();

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {}{} ORDER BY {}",
        columns.join(", "),
        meta.sql_name,
        clause,
        order.join(", ")
    ))?;

    let raw_rows = stmt
        .query_map(params_from_iter(values), |row| {
            (0..meta.columns.len())
                .map(|i| row.get::<_, SqlValue>(i))
                .collect::<rusqlite::Result<Vec<SqlValue>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    raw_rows
        .into_iter()
        .map(|raw| {
            meta.columns
                .iter()
                .zip(raw)
                .map(|(column, value)| Ok((column.name.clone(), from_sql(column, value)?)))
                .collect::<Result<Row>>()
        })
        .collect()
}

// =============================================================================
// Value Mapping
// =============================================================================

fn to_sql(ty: &CqlType, value: &CqlValue) -> Result<SqlValue> {
    let mismatch = || {
        Error::StorageExecution(format!("cannot store {} in a {} column", value.type_name(), ty))
    };

    Ok(match (ty, value) {
        (_, CqlValue::Null) => SqlValue::Null,
        (CqlType::Text, CqlValue::Text(s)) | (CqlType::Decimal, CqlValue::Decimal(s)) => {
            SqlValue::Text(s.clone())
        }
        (CqlType::Blob, CqlValue::Blob(b)) => SqlValue::Blob(b.clone()),
        (CqlType::Boolean, CqlValue::Boolean(b)) => SqlValue::Integer(i64::from(*b)),
        (CqlType::Set(_), CqlValue::Set(items)) if items.is_empty() => SqlValue::Null,
        (CqlType::Set(element), CqlValue::Set(items)) => {
            let items = items
                .iter()
                .map(|item| to_json(element, item).ok_or_else(mismatch))
                .collect::<Result<Vec<Json>>>()?;
            SqlValue::Text(Json::Array(items).to_string())
        }
        (CqlType::Map(_, _), CqlValue::Map(entries)) if entries.is_empty() => SqlValue::Null,
        (CqlType::Map(key_ty, value_ty), CqlValue::Map(entries)) => {
            let entries = entries
                .iter()
                .map(|(k, v)| {
                    let k = to_json(key_ty, k).ok_or_else(mismatch)?;
                    let v = to_json(value_ty, v).ok_or_else(mismatch)?;
                    Ok(Json::Array(vec![k, v]))
                })
                .collect::<Result<Vec<Json>>>()?;
            SqlValue::Text(Json::Array(entries).to_string())
        }
        _ => return Err(mismatch()),
    })
}

fn to_json(ty: &CqlType, value: &CqlValue) -> Option<Json> {
    match (ty, value) {
        (CqlType::Text, CqlValue::Text(s)) | (CqlType::Decimal, CqlValue::Decimal(s)) => {
            Some(Json::String(s.clone()))
        }
        (CqlType::Blob, CqlValue::Blob(b)) => Some(Json::String(hex::encode(b))),
        (CqlType::Boolean, CqlValue::Boolean(b)) => Some(Json::Bool(*b)),
        _ => None,
    }
}

fn from_sql(column: &Column, value: SqlValue) -> Result<CqlValue> {
    let corrupt = |what: &str| {
        Error::StorageExecution(format!("column '{}' holds corrupt {}", column.name, what))
    };

    Ok(match (&column.cql_type, value) {
        (_, SqlValue::Null) => CqlValue::Null,
        (CqlType::Text, SqlValue::Text(s)) => CqlValue::Text(s),
        (CqlType::Decimal, SqlValue::Text(s)) => CqlValue::Decimal(s),
        (CqlType::Blob, SqlValue::Blob(b)) => CqlValue::Blob(b),
        (CqlType::Boolean, SqlValue::Integer(i)) => CqlValue::Boolean(i != 0),
        (CqlType::Set(element), SqlValue::Text(json)) => {
            let items: Vec<Json> = serde_json::from_str(&json).map_err(|_| corrupt("set"))?;
            CqlValue::Set(
                items
                    .iter()
                    .map(|item| from_json(element, item).ok_or_else(|| corrupt("set element")))
                    .collect::<Result<_>>()?,
            )
        }
        (CqlType::Map(key_ty, value_ty), SqlValue::Text(json)) => {
            let entries: Vec<(Json, Json)> =
                serde_json::from_str(&json).map_err(|_| corrupt("map"))?;
            CqlValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| {
                        let k = from_json(key_ty, k).ok_or_else(|| corrupt("map key"))?;
                        let v = from_json(value_ty, v).ok_or_else(|| corrupt("map value"))?;
                        Ok((k, v))
                    })
                    .collect::<Result<_>>()?,
            )
        }
        _ => return Err(corrupt("value")),
    })
}

fn from_json(ty: &CqlType, value: &Json) -> Option<CqlValue> {
    match ty {
        CqlType::Text => value.as_str().map(|s| CqlValue::Text(s.to_string())),
        CqlType::Decimal => value.as_str().map(|s| CqlValue::Decimal(s.to_string())),
        CqlType::Blob => value.as_str().and_then(|s| hex::decode(s).ok()).map(CqlValue::Blob),
        CqlType::Boolean => value.as_bool().map(CqlValue::Boolean),
        CqlType::Set(_) | CqlType::Map(_, _) => None,
    }
}

// =============================================================================
// Request Types
// =============================================================================

enum Request {
    Execute {
        statement: Statement,
        response: oneshot::Sender<Result<ResultSet>>,
    },
    Describe {
        tenant: String,
        table: String,
        response: oneshot::Sender<Result<TableInfo>>,
    },
    CreateTable {
        info: TableInfo,
        response: oneshot::Sender<Result<()>>,
    },
    Truncate {
        tenant: String,
        table: String,
        response: oneshot::Sender<Result<usize>>,
    },
    Scan {
        tenant: String,
        table: String,
        response: oneshot::Sender<Result<Vec<Row>>>,
    },
}

fn run_local_store(mut store: LocalStore, mut rx: mpsc::Receiver<Request>) {
    while let Some(request) = rx.blocking_recv() {
        match request {
            Request::Execute {
                statement,
                response,
            } => {
                let _ = response.send(store.execute(&statement));
            }
            Request::Describe {
                tenant,
                table,
                response,
            } => {
                let _ = response.send(store.describe_table(&tenant, &table));
            }
            Request::CreateTable { info, response } => {
                let _ = response.send(store.create_table(&info));
            }
            Request::Truncate {
                tenant,
                table,
                response,
            } => {
                let _ = response.send(store.truncate(&tenant, &table));
            }
            Request::Scan {
                tenant,
                table,
                response,
            } => {
                let _ = response.send(store.scan(&tenant, &table));
            }
        }
    }
    debug!("local store stopped");
}

// =============================================================================
// Local Session
// =============================================================================

/// Async handle to a [`LocalStore`] running on its own thread.
///
/// Cloning is cheap; the store stops once every clone is dropped.
#[derive(Clone)]
pub struct LocalSession {
    tx: mpsc::Sender<Request>,
}

impl LocalSession {
    /// Opens (or creates) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::spawn(Connection::open(path)?)
    }

    /// Opens a store that lives only as long as the session.
    pub fn open_in_memory() -> Result<Self> {
        Self::spawn(Connection::open_in_memory()?)
    }

    fn spawn(conn: Connection) -> Result<Self> {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let store = LocalStore::new(conn)?;

        std::thread::Builder::new()
            .name("bulkload-local-store".to_string())
            .spawn(move || run_local_store(store, rx))
            .map_err(|e| Error::StorageExecution(format!("failed to spawn store thread: {}", e)))?;

        Ok(Self { tx })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Request,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(build(response_tx))
            .await
            .map_err(|_| Error::StorageExecution("local store has shut down".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::StorageExecution("local store dropped response".to_string()))?
    }

    /// Provisions a table. See [`LocalStore::create_table`].
    pub async fn create_table(&self, info: TableInfo) -> Result<()> {
        self.request(|response| Request::CreateTable { info, response })
            .await
    }

    /// Deletes every row of a table.
    pub async fn truncate(&self, tenant: &str, table: &str) -> Result<usize> {
        let (tenant, table) = (tenant.to_string(), table.to_string());
        self.request(|response| Request::Truncate {
            tenant,
            table,
            response,
        })
        .await
    }

    /// Every row of a table, index rows included.
    pub async fn scan(&self, tenant: &str, table: &str) -> Result<Vec<Row>> {
        let (tenant, table) = (tenant.to_string(), table.to_string());
        self.request(|response| Request::Scan {
            tenant,
            table,
            response,
        })
        .await
    }
}

#[async_trait]
impl Session for LocalSession {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet> {
        let statement = statement.clone();
        self.request(|response| Request::Execute {
            statement,
            response,
        })
        .await
    }

    async fn describe_table(&self, tenant: &str, table: &str) -> Result<TableInfo> {
        let (tenant, table) = (tenant.to_string(), table.to_string());
        self.request(|response| Request::Describe {
            tenant,
            table,
            response,
        })
        .await
    }
}

// =============================================================================
// Tests
// =============================================================================
