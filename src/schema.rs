//! # Persisted Table Layout
//!
//! This module defines how a [`TableSchema`] is laid out in the column store
//! and renders the DDL that provisions it.
//!
//! ## Row Layout
//!
//! ```text
//! ┌───────────────┬──────────────────────┬──────────────────────────┬──────────────────────────────┐
//! │  key columns  │  declared columns    │  dynamic companions      │  index slot (part of the key)│
//! ├───────────────┼──────────────────────┼──────────────────────────┼──────────────────────────────┤
//! │ user_id       │ user_indexed_attr    │ attr_exist   set<text>   │ index_name          text     │
//! │               │ user_<declared> ...  │ extra_attr_data          │ index_value_string  text     │
//! │               │                      │   map<text, blob>        │ index_value_number  decimal  │
//! │               │                      │ extra_attr_types         │ index_value_blob    blob     │
//! │               │                      │   map<text, text>        │                              │
//! └───────────────┴──────────────────────┴──────────────────────────┴──────────────────────────────┘
//! ```
//!
//! Every item has a *primary row* at the sentinel slot. When the table has an
//! index and the item carries the indexed attribute, the item also has one
//! *index row* at the slot of that value, holding a copy of the data columns.
//!
//! ## Design Decisions
//!
//! ### Why prefix user columns?
//!
//! Declared attributes are named by users. Prefixing them with `user_` keeps
//! them from ever colliding with the system columns, whatever they are called.
//!
//! ### Why is the index slot part of the primary key?
//!
//! It lets the primary row and the index row of an item live in the same
//! partition, so a single conditional batch can move an item between index
//! positions atomically.

use std::fmt;

use crate::error::Result;
use crate::types::{AttributeType, IndexDefinition, TableInfo, TableSchema};

// =============================================================================
// Naming
// =============================================================================

/// Prefix of user keyspaces, user tables, and declared-attribute columns.
pub const USER_PREFIX: &str = "user_";

/// Set of dynamic attribute names present on the item.
pub const SYSTEM_COLUMN_ATTR_EXIST: &str = "attr_exist";

/// Dynamic attribute name to encoded value blob.
pub const SYSTEM_COLUMN_EXTRA_ATTR_DATA: &str = "extra_attr_data";

/// Dynamic attribute name to external type tag.
pub const SYSTEM_COLUMN_EXTRA_ATTR_TYPES: &str = "extra_attr_types";

pub const SYSTEM_COLUMN_INDEX_NAME: &str = "index_name";
pub const SYSTEM_COLUMN_INDEX_VALUE_STRING: &str = "index_value_string";
pub const SYSTEM_COLUMN_INDEX_VALUE_NUMBER: &str = "index_value_number";
pub const SYSTEM_COLUMN_INDEX_VALUE_BLOB: &str = "index_value_blob";

/// Marker column on the result of a conditional statement.
pub const APPLIED_COLUMN: &str = "[applied]";

/// Column holding a declared attribute.
pub fn attribute_column(attribute: &str) -> String {
    format!("{}{}", USER_PREFIX, attribute)
}

/// Columns of the index slot, in key order.
pub const INDEX_SLOT_COLUMNS: [&str; 4] = [
    SYSTEM_COLUMN_INDEX_NAME,
    SYSTEM_COLUMN_INDEX_VALUE_STRING,
    SYSTEM_COLUMN_INDEX_VALUE_NUMBER,
    SYSTEM_COLUMN_INDEX_VALUE_BLOB,
];

// =============================================================================
// Column Types
// =============================================================================

/// Storage-level column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CqlType {
    Text,
    Decimal,
    Blob,
    Boolean,
    Set(Box<CqlType>),
    Map(Box<CqlType>, Box<CqlType>),
}

impl CqlType {
    /// Column type of a declared attribute.
    pub fn for_attribute(ty: AttributeType) -> Self {
        match ty {
            AttributeType::String => CqlType::Text,
            AttributeType::Number => CqlType::Decimal,
            AttributeType::Binary => CqlType::Blob,
            set => CqlType::Set(Box::new(CqlType::for_attribute(set.element_type()))),
        }
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlType::Text => f.write_str("text"),
            CqlType::Decimal => f.write_str("decimal"),
            CqlType::Blob => f.write_str("blob"),
            CqlType::Boolean => f.write_str("boolean"),
            CqlType::Set(element) => write!(f, "set<{}>", element),
            CqlType::Map(key, value) => write!(f, "map<{}, {}>", key, value),
        }
    }
}

/// A column of a user table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub cql_type: CqlType,
}

impl Column {
    fn new(name: impl Into<String>, cql_type: CqlType) -> Self {
        Self {
            name: name.into(),
            cql_type,
        }
    }
}

/// Every column of a user table: declared attributes (name order), the three
/// dynamic companions, then the index slot.
pub fn columns(schema: &TableSchema) -> Vec<Column> {
    let mut columns: Vec<Column> = schema
        .declared()
        .map(|(name, ty)| Column::new(attribute_column(name), CqlType::for_attribute(ty)))
        .collect();

    columns.push(Column::new(
        SYSTEM_COLUMN_ATTR_EXIST,
        CqlType::Set(Box::new(CqlType::Text)),
    ));
    columns.push(Column::new(
        SYSTEM_COLUMN_EXTRA_ATTR_DATA,
        CqlType::Map(Box::new(CqlType::Text), Box::new(CqlType::Blob)),
    ));
    columns.push(Column::new(
        SYSTEM_COLUMN_EXTRA_ATTR_TYPES,
        CqlType::Map(Box::new(CqlType::Text), Box::new(CqlType::Text)),
    ));

    columns.push(Column::new(SYSTEM_COLUMN_INDEX_NAME, CqlType::Text));
    columns.push(Column::new(SYSTEM_COLUMN_INDEX_VALUE_STRING, CqlType::Text));
    columns.push(Column::new(SYSTEM_COLUMN_INDEX_VALUE_NUMBER, CqlType::Decimal));
    columns.push(Column::new(SYSTEM_COLUMN_INDEX_VALUE_BLOB, CqlType::Blob));

    columns
}

/// Primary key columns: the key attributes followed by the index slot.
pub fn primary_key_columns(schema: &TableSchema) -> Vec<String> {
    schema
        .key_attributes()
        .iter()
        .map(|key| attribute_column(key))
        .chain(INDEX_SLOT_COLUMNS.iter().map(|c| c.to_string()))
        .collect()
}

// =============================================================================
// DDL
// =============================================================================

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `CREATE KEYSPACE` for a tenant's keyspace.
pub fn create_keyspace_cql(keyspace: &str, replication_factor: u32) -> String {
    format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        quote_identifier(keyspace),
        replication_factor
    )
}

/// `CREATE TABLE` for a user table.
///
/// The first key attribute is the partition key; the remaining key attributes
/// and the index slot are clustering columns.
pub fn create_table_cql(info: &TableInfo) -> String {
    let column_defs: Vec<String> = columns(&info.schema)
        .iter()
        .map(|c| format!("{} {}", quote_identifier(&c.name), c.cql_type))
        .collect();

    let mut key = primary_key_columns(&info.schema)
        .into_iter()
        .map(|c| quote_identifier(&c));
    let partition = key.next().unwrap_or_default();
    let clustering: Vec<String> = key.collect();

    format!(
        "CREATE TABLE {}.{} ({}, PRIMARY KEY (({}), {}))",
        quote_identifier(&info.keyspace),
        quote_identifier(&info.internal_name),
        column_defs.join(", "),
        partition,
        clustering.join(", ")
    )
}

// =============================================================================
// Standard Table
// =============================================================================

/// Key attribute of the standard table.
pub const STANDARD_KEY: &str = "id";

/// Indexed attribute of the standard table.
pub const STANDARD_INDEXED_ATTRIBUTE: &str = "indexed_attr";

/// Index name of the standard table.
pub const STANDARD_INDEX_NAME: &str = "index";

/// `{id: S, indexed_attr: S}` keyed on `id`, indexed on `indexed_attr`.
pub fn standard_schema() -> Result<TableSchema> {
    TableSchema::new(
        [
            (STANDARD_KEY, AttributeType::String),
            (STANDARD_INDEXED_ATTRIBUTE, AttributeType::String),
        ],
        [STANDARD_KEY],
        Some(IndexDefinition::new(STANDARD_INDEX_NAME, STANDARD_INDEXED_ATTRIBUTE)),
    )
}

// =============================================================================
// Tests
// =============================================================================
