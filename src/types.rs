//! # Domain Types for bulkload
//!
//! This module defines the data model shared by every stage of the pipeline:
//! attribute values and records, the fixed table schema, and the index slot
//! that positions each item in the synthetic secondary index.
//!
//! ## Invariants
//!
//! - An [`AttributeValue`]'s variant fully determines how it is encoded later.
//! - Set variants are non-empty and canonical (sorted, no duplicates).
//! - An [`AttributeMap`] is immutable once built.
//! - A [`TableSchema`] declares every key attribute and the indexed attribute
//!   with a scalar type, and has at most one index.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::canonical_decimal;
use crate::error::{Error, Result};
use crate::schema::USER_PREFIX;

// =============================================================================
// Attribute Types
// =============================================================================

/// The six external type tags.
///
/// Serialized as the tag itself (`"S"`, `"N"`, ...), which is also the form
/// used in the external record format and the dynamic-attribute type map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeType {
    #[serde(rename = "S")]
    String,
    #[serde(rename = "N")]
    Number,
    #[serde(rename = "B")]
    Binary,
    #[serde(rename = "SS")]
    StringSet,
    #[serde(rename = "NS")]
    NumberSet,
    #[serde(rename = "BS")]
    BinarySet,
}

impl AttributeType {
    /// Every recognized type, in tag order.
    pub const ALL: [AttributeType; 6] = [
        AttributeType::String,
        AttributeType::Number,
        AttributeType::Binary,
        AttributeType::StringSet,
        AttributeType::NumberSet,
        AttributeType::BinarySet,
    ];

    /// Parses an external type tag. Returns `None` for unknown tags.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "S" => Some(AttributeType::String),
            "N" => Some(AttributeType::Number),
            "B" => Some(AttributeType::Binary),
            "SS" => Some(AttributeType::StringSet),
            "NS" => Some(AttributeType::NumberSet),
            "BS" => Some(AttributeType::BinarySet),
            _ => None,
        }
    }

    /// The external type tag.
    pub fn tag(self) -> &'static str {
        match self {
            AttributeType::String => "S",
            AttributeType::Number => "N",
            AttributeType::Binary => "B",
            AttributeType::StringSet => "SS",
            AttributeType::NumberSet => "NS",
            AttributeType::BinarySet => "BS",
        }
    }

    pub fn is_set(self) -> bool {
        matches!(
            self,
            AttributeType::StringSet | AttributeType::NumberSet | AttributeType::BinarySet
        )
    }

    /// The scalar type of a set's elements, or the type itself for scalars.
    pub fn element_type(self) -> AttributeType {
        match self {
            AttributeType::StringSet => AttributeType::String,
            AttributeType::NumberSet => AttributeType::Number,
            AttributeType::BinarySet => AttributeType::Binary,
            scalar => scalar,
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// =============================================================================
// Attribute Values
// =============================================================================

/// A decoded, typed attribute value.
///
/// Numbers stay as decimal text so no precision is lost between the external
/// representation and the storage engine's `decimal` columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeValue {
    String(String),
    Number(String),
    Binary(Vec<u8>),
    StringSet(BTreeSet<String>),
    NumberSet(BTreeSet<String>),
    BinarySet(BTreeSet<Vec<u8>>),
}

impl AttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        AttributeValue::String(value.into())
    }

    pub fn number(value: impl Into<String>) -> Self {
        AttributeValue::Number(value.into())
    }

    pub fn binary(value: impl Into<Vec<u8>>) -> Self {
        AttributeValue::Binary(value.into())
    }

    /// The tag this value was decoded under.
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::String(_) => AttributeType::String,
            AttributeValue::Number(_) => AttributeType::Number,
            AttributeValue::Binary(_) => AttributeType::Binary,
            AttributeValue::StringSet(_) => AttributeType::StringSet,
            AttributeValue::NumberSet(_) => AttributeType::NumberSet,
            AttributeValue::BinarySet(_) => AttributeType::BinarySet,
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// One logical record: attribute name to typed value.
///
/// Built once per ingested record (usually by
/// [`codec::decode_record`](crate::codec::decode_record)) and never mutated.
/// Iteration is ordered by attribute name, which keeps generated statements
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap(BTreeMap<String, AttributeValue>);

impl AttributeMap {
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K: Into<String>> FromIterator<(K, AttributeValue)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (K, AttributeValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// =============================================================================
// Table Schema
// =============================================================================

/// The table's single secondary index: which attribute is projected into the
/// index slot, and under what index name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub attribute: String,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attribute: attribute.into(),
        }
    }
}

/// The fixed schema of a table, loaded once at startup.
///
/// Attributes listed in `attribute_types` are *declared*: each gets its own
/// typed column. Everything else in a record is *dynamic* and lands in the
/// companion existence/value/type columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    attribute_types: BTreeMap<String, AttributeType>,
    key_attributes: Vec<String>,
    index: Option<IndexDefinition>,
}

impl TableSchema {
    /// Builds and validates a schema.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] when there are no key attributes, a key or the indexed
    /// attribute is undeclared or set-typed, a key is listed twice, or the
    /// index name is empty (the empty name is the sentinel slot).
    pub fn new<N: Into<String>>(
        attribute_types: impl IntoIterator<Item = (N, AttributeType)>,
        key_attributes: impl IntoIterator<Item = N>,
        index: Option<IndexDefinition>,
    ) -> Result<Self> {
        let schema = Self {
            attribute_types: attribute_types
                .into_iter()
                .map(|(name, ty)| (name.into(), ty))
                .collect(),
            key_attributes: key_attributes.into_iter().map(Into::into).collect(),
            index,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Re-checks the invariants. Used after deserializing from a catalog.
    pub fn validate(&self) -> Result<()> {
        if self.key_attributes.is_empty() {
            return Err(Error::Schema("at least one key attribute is required".into()));
        }

        let mut seen = BTreeSet::new();
        for key in &self.key_attributes {
            if !seen.insert(key.as_str()) {
                return Err(Error::Schema(format!("key attribute '{}' listed twice", key)));
            }
            self.require_scalar(key, "key attribute")?;
        }

        if let Some(index) = &self.index {
            if index.name.is_empty() {
                return Err(Error::Schema("index name must not be empty".into()));
            }
            if self.key_attributes.contains(&index.attribute) {
                return Err(Error::Schema(format!(
                    "key attribute '{}' cannot be indexed",
                    index.attribute
                )));
            }
            self.require_scalar(&index.attribute, "indexed attribute")?;
        }

        Ok(())
    }

    fn require_scalar(&self, name: &str, role: &str) -> Result<()> {
        match self.attribute_types.get(name) {
            None => Err(Error::Schema(format!("{} '{}' is not declared", role, name))),
            Some(ty) if ty.is_set() => Err(Error::Schema(format!(
                "{} '{}' must be scalar, not {}",
                role, name, ty
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Declared type of an attribute, `None` for dynamic attributes.
    pub fn attribute_type(&self, name: &str) -> Option<AttributeType> {
        self.attribute_types.get(name).copied()
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.attribute_types.contains_key(name)
    }

    /// Declared attributes in name order.
    pub fn declared(&self) -> impl Iterator<Item = (&str, AttributeType)> {
        self.attribute_types.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    pub fn key_attributes(&self) -> &[String] {
        &self.key_attributes
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.key_attributes.iter().any(|k| k == name)
    }

    pub fn index(&self) -> Option<&IndexDefinition> {
        self.index.as_ref()
    }
}

// =============================================================================
// Index Slot
// =============================================================================

/// Index name of the sentinel slot.
pub const DEFAULT_INDEX_NAME: &str = "";

/// String value of an unused string slot.
pub const DEFAULT_INDEX_VALUE_STRING: &str = "";

/// Number value of an unused number slot.
pub const DEFAULT_INDEX_VALUE_NUMBER: &str = "0";

/// Blob value of an unused blob slot.
pub const DEFAULT_INDEX_VALUE_BLOB: &[u8] = &[];

/// Where a row sits in the synthetic index space.
///
/// Exactly one of the three value slots carries the indexed value; the others
/// hold sentinels. The primary row of every item lives at
/// [`IndexSlot::sentinel`], so reads use the same predicate shape whether or
/// not the table has an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSlot {
    pub index_name: String,
    pub string_value: String,
    pub number_value: String,
    pub blob_value: Vec<u8>,
}

impl IndexSlot {
    /// The slot every primary row occupies.
    pub fn sentinel() -> Self {
        Self {
            index_name: DEFAULT_INDEX_NAME.to_string(),
            string_value: DEFAULT_INDEX_VALUE_STRING.to_string(),
            number_value: DEFAULT_INDEX_VALUE_NUMBER.to_string(),
            blob_value: DEFAULT_INDEX_VALUE_BLOB.to_vec(),
        }
    }

    /// The slot for an item whose indexed attribute holds `value`.
    ///
    /// Numbers are placed by value, not by spelling.
    ///
    /// # Errors
    ///
    /// [`Error::Decoding`] if `value` is a set; only scalars can be indexed.
    pub fn for_value(index_name: &str, value: &AttributeValue) -> Result<Self> {
        let mut slot = Self::sentinel();
        slot.index_name = index_name.to_string();
        match value {
            AttributeValue::String(s) => slot.string_value = s.clone(),
            AttributeValue::Number(n) => slot.number_value = canonical_decimal(n),
            AttributeValue::Binary(b) => slot.blob_value = b.clone(),
            other => {
                return Err(Error::decoding(
                    index_name,
                    format!("{} values cannot be indexed", other.attribute_type()),
                ))
            }
        }
        Ok(slot)
    }

    pub fn is_sentinel(&self) -> bool {
        self.index_name == DEFAULT_INDEX_NAME
    }
}

// =============================================================================
// Table Info
// =============================================================================

/// A table as known to the catalog: its owner, storage names, and schema.
///
/// Threaded explicitly through every pipeline call; there is no process-wide
/// table or tenant context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub tenant: String,
    pub name: String,
    /// Storage keyspace (`user_<tenant>`).
    pub keyspace: String,
    /// Storage table name (`user_<name>`).
    pub internal_name: String,
    pub schema: TableSchema,
}

impl TableInfo {
    pub fn new(tenant: impl Into<String>, name: impl Into<String>, schema: TableSchema) -> Self {
        let tenant = tenant.into();
        let name = name.into();
        Self {
            keyspace: format!("{}{}", USER_PREFIX, tenant),
            internal_name: format!("{}{}", USER_PREFIX, name),
            tenant,
            name,
            schema,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
