//! # Statement Construction
//!
//! Statements are built as structured values rather than concatenated
//! strings. A [`Statement`] renders two ways:
//!
//! - [`Statement::cql`] + [`Statement::values`]: CQL with `?` placeholders and
//!   the bound values in placeholder order, for drivers that bind parameters.
//! - [`Statement::to_literal_cql`]: CQL with escaped inline literals, for logs
//!   and for drivers that only accept plain text.
//!
//! Engines that understand the structure (such as
//! [`LocalSession`](crate::local::LocalSession)) execute it directly.
//!
//! ## The Four Pipeline Statements
//!
//! [`StatementBuilder`] produces the statements the write pipeline needs:
//!
//! ```text
//! read_existing        SELECT primary row              (key, sentinel slot)
//! optimistic_insert    INSERT primary IF NOT EXISTS    [+ INSERT index row]      ── batch when indexed
//! corrective_update    UPDATE primary IF idx = seen    [+ UPDATE index row]      ── index position unchanged
//! corrective_batch     UPDATE primary IF idx = seen    [+ DELETE old index row]  ── index position moved
//!                                                      [+ INSERT new index row]
//! ```
//!
//! Every write that can race with another writer is conditional, and every
//! multi-row change is one batch, so the engine applies it all or nothing.

use std::fmt::Write as _;

use crate::codec::{dynamic_blob, dynamic_type_tag, schema_value};
use crate::error::{Error, Result};
use crate::schema::{
    attribute_column, quote_identifier, SYSTEM_COLUMN_ATTR_EXIST, SYSTEM_COLUMN_EXTRA_ATTR_DATA,
    SYSTEM_COLUMN_EXTRA_ATTR_TYPES, SYSTEM_COLUMN_INDEX_NAME, SYSTEM_COLUMN_INDEX_VALUE_BLOB,
    SYSTEM_COLUMN_INDEX_VALUE_NUMBER, SYSTEM_COLUMN_INDEX_VALUE_STRING,
};
use crate::types::{AttributeMap, AttributeValue, IndexSlot, TableInfo};

// =============================================================================
// Values
// =============================================================================

/// A value as the column store sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CqlValue {
    Null,
    Boolean(bool),
    Text(String),
    /// Decimal text, never parsed.
    Decimal(String),
    Blob(Vec<u8>),
    Set(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
}

impl CqlValue {
    /// CQL literal text of this value.
    ///
    /// Text is single-quoted with embedded quotes doubled, so literal
    /// rendering cannot break out of the string.
    pub fn literal(&self) -> String {
        match self {
            CqlValue::Null => "null".to_string(),
            CqlValue::Boolean(b) => b.to_string(),
            CqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            CqlValue::Decimal(d) => d.clone(),
            CqlValue::Blob(b) => format!("0x{}", hex::encode(b)),
            CqlValue::Set(items) => {
                let items: Vec<String> = items.iter().map(CqlValue::literal).collect();
                format!("{{{}}}", items.join(","))
            }
            CqlValue::Map(entries) => {
                let entries: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k.literal(), v.literal()))
                    .collect();
                format!("{{{}}}", entries.join(","))
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CqlValue::Null => "null",
            CqlValue::Boolean(_) => "boolean",
            CqlValue::Text(_) => "text",
            CqlValue::Decimal(_) => "decimal",
            CqlValue::Blob(_) => "blob",
            CqlValue::Set(_) => "set",
            CqlValue::Map(_) => "map",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CqlValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CqlValue::Null)
    }
}

// =============================================================================
// Statement Model
// =============================================================================

/// Fully qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub keyspace: String,
    pub table: String,
}

impl TableRef {
    pub fn of(info: &TableInfo) -> Self {
        Self {
            keyspace: info.keyspace.clone(),
            table: info.internal_name.clone(),
        }
    }

    fn render(&self) -> String {
        format!("{}.{}", quote_identifier(&self.keyspace), quote_identifier(&self.table))
    }
}

/// A `column = value` pair, used for predicates, assignments and conditions.
pub type ColumnValue = (String, CqlValue);

/// Precondition of a lightweight transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `IF NOT EXISTS`: the row must be absent.
    NotExists,
    /// `IF EXISTS`: the row must be present.
    Exists,
    /// `IF a = ? AND b = ?`: the row must be present with these values.
    Equals(Vec<ColumnValue>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub table: TableRef,
    pub predicates: Vec<ColumnValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub table: TableRef,
    pub columns: Vec<ColumnValue>,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub table: TableRef,
    pub assignments: Vec<ColumnValue>,
    pub predicates: Vec<ColumnValue>,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub table: TableRef,
    pub predicates: Vec<ColumnValue>,
    pub condition: Option<Condition>,
}

/// A statement for the column store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    /// Atomic batch of writes. Conditional if any member is conditional.
    Batch(Vec<Statement>),
}

impl Statement {
    /// Short name used in logs and timeout errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Select(_) => "select",
            Statement::Insert(_) => "insert",
            Statement::Update(_) => "update",
            Statement::Delete(_) => "delete",
            Statement::Batch(_) => "batch",
        }
    }

    /// True if the engine will report an `[applied]` marker for it.
    pub fn is_conditional(&self) -> bool {
        match self {
            Statement::Select(_) => false,
            Statement::Insert(s) => s.condition.is_some(),
            Statement::Update(s) => s.condition.is_some(),
            Statement::Delete(s) => s.condition.is_some(),
            Statement::Batch(members) => members.iter().any(Statement::is_conditional),
        }
    }

    /// CQL text with `?` placeholders.
    pub fn cql(&self) -> String {
        let mut renderer = Renderer::placeholders();
        renderer.statement(self);
        renderer.out
    }

    /// Bound values in placeholder order.
    pub fn values(&self) -> Vec<CqlValue> {
        let mut renderer = Renderer::placeholders();
        renderer.statement(self);
        renderer.values
    }

    /// CQL text with values inlined as literals.
    pub fn to_literal_cql(&self) -> String {
        let mut renderer = Renderer::literals();
        renderer.statement(self);
        renderer.out
    }
}

struct Renderer {
    inline: bool,
    out: String,
    values: Vec<CqlValue>,
}

impl Renderer {
    fn placeholders() -> Self {
        Self {
            inline: false,
            out: String::new(),
            values: Vec::new(),
        }
    }

    fn literals() -> Self {
        Self {
            inline: true,
            ..Self::placeholders()
        }
    }

    fn value(&mut self, value: &CqlValue) {
        if self.inline {
            self.out.push_str(&value.literal());
        } else {
            self.out.push('?');
            self.values.push(value.clone());
        }
    }

    fn pairs(&mut self, pairs: &[ColumnValue], separator: &str) {
        for (i, (column, value)) in pairs.iter().enumerate() {
            if i > 0 {
                self.out.push_str(separator);
            }
            let _ = write!(self.out, "{} = ", quote_identifier(column));
            self.value(value);
        }
    }

    fn condition(&mut self, condition: &Option<Condition>) {
        match condition {
            None => {}
            Some(Condition::NotExists) => self.out.push_str(" IF NOT EXISTS"),
            Some(Condition::Exists) => self.out.push_str(" IF EXISTS"),
            Some(Condition::Equals(pairs)) => {
                self.out.push_str(" IF ");
                self.pairs(pairs, " AND ");
            }
        }
    }

    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Select(s) => {
                let _ = write!(self.out, "SELECT * FROM {} WHERE ", s.table.render());
                self.pairs(&s.predicates, " AND ");
            }
            Statement::Insert(s) => {
                let columns: Vec<String> =
                    s.columns.iter().map(|(c, _)| quote_identifier(c)).collect();
                let _ = write!(
                    self.out,
                    "INSERT INTO {} ({}) VALUES (",
                    s.table.render(),
                    columns.join(", ")
                );
                for (i, (_, value)) in s.columns.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.value(value);
                }
                self.out.push(')');
                self.condition(&s.condition);
            }
            Statement::Update(s) => {
                let _ = write!(self.out, "UPDATE {} SET ", s.table.render());
                self.pairs(&s.assignments, ", ");
                self.out.push_str(" WHERE ");
                self.pairs(&s.predicates, " AND ");
                self.condition(&s.condition);
            }
            Statement::Delete(s) => {
                let _ = write!(self.out, "DELETE FROM {} WHERE ", s.table.render());
                self.pairs(&s.predicates, " AND ");
                self.condition(&s.condition);
            }
            Statement::Batch(members) => {
                self.out.push_str("BEGIN BATCH ");
                for member in members {
                    self.statement(member);
                    self.out.push_str("; ");
                }
                self.out.push_str("APPLY BATCH");
            }
        }
    }
}

// =============================================================================
// Statement Builder
// =============================================================================

/// Builds the pipeline's statements for one table.
///
/// Borrowing the [`TableInfo`] keeps the builder free of any ambient table or
/// tenant state.
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder<'a> {
    info: &'a TableInfo,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(info: &'a TableInfo) -> Self {
        Self { info }
    }

    /// Reads the item's primary row.
    ///
    /// # Errors
    ///
    /// [`Error::MissingKey`] if the record lacks a key attribute.
    pub fn read_existing(&self, item: &AttributeMap) -> Result<Statement> {
        Ok(Statement::Select(Select {
            table: self.table(),
            predicates: self.row_predicates(item, &IndexSlot::sentinel())?,
        }))
    }

    /// Inserts the item if its primary row does not exist yet.
    ///
    /// Declared attributes absent from the record are left out of the column
    /// list. For an indexed item the index row is inserted in the same batch.
    pub fn optimistic_insert(&self, item: &AttributeMap) -> Result<Statement> {
        let primary = Statement::Insert(Insert {
            table: self.table(),
            columns: self.row_columns(item, &IndexSlot::sentinel())?,
            condition: Some(Condition::NotExists),
        });

        match self.index_slot(item)? {
            None => Ok(primary),
            Some(slot) => Ok(Statement::Batch(vec![primary, self.insert_index_row(item, &slot)?])),
        }
    }

    /// Rewrites an item whose index position has not moved.
    ///
    /// `seen` is the indexed attribute's value observed in the primary row at
    /// read time; the update only applies if it is still there.
    pub fn corrective_update(
        &self,
        item: &AttributeMap,
        seen: Option<&AttributeValue>,
    ) -> Result<Statement> {
        let primary = self.guarded_primary_update(item, seen)?;

        match self.index_slot(item)? {
            None => Ok(primary),
            Some(slot) => Ok(Statement::Batch(vec![
                primary,
                Statement::Update(Update {
                    table: self.table(),
                    assignments: self.data_assignments(item),
                    predicates: self.row_predicates(item, &slot)?,
                    condition: None,
                }),
            ])),
        }
    }

    /// Moves an item between index positions in one atomic batch: guarded
    /// primary update, delete of the row at the old slot, insert at the new.
    pub fn corrective_batch(
        &self,
        item: &AttributeMap,
        seen: Option<&AttributeValue>,
    ) -> Result<Statement> {
        let mut members = vec![self.guarded_primary_update(item, seen)?];

        if let (Some(index), Some(old)) = (self.info.schema.index(), seen) {
            let old_slot = IndexSlot::for_value(&index.name, old)?;
            members.push(Statement::Delete(Delete {
                table: self.table(),
                predicates: self.row_predicates(item, &old_slot)?,
                condition: None,
            }));
        }

        if let Some(new_slot) = self.index_slot(item)? {
            members.push(self.insert_index_row(item, &new_slot)?);
        }

        Ok(Statement::Batch(members))
    }

    /// The slot of the item's index row, `None` if it has none.
    pub fn index_slot(&self, item: &AttributeMap) -> Result<Option<IndexSlot>> {
        match self.info.schema.index() {
            Some(index) => self.slot_of(item.get(&index.attribute)),
            None => Ok(None),
        }
    }

    /// The slot an indexed attribute holding `value` maps to.
    ///
    /// Two values share a slot exactly when they denote the same position,
    /// so `1` and `1.0` land on one index row.
    pub fn slot_of(&self, value: Option<&AttributeValue>) -> Result<Option<IndexSlot>> {
        match (self.info.schema.index(), value) {
            (Some(index), Some(value)) => IndexSlot::for_value(&index.name, value).map(Some),
            _ => Ok(None),
        }
    }

    // -------------------------------------------------------------------------
    // Pieces
    // -------------------------------------------------------------------------

    fn table(&self) -> TableRef {
        TableRef::of(self.info)
    }

    fn guarded_primary_update(
        &self,
        item: &AttributeMap,
        seen: Option<&AttributeValue>,
    ) -> Result<Statement> {
        let condition = match self.info.schema.index() {
            Some(index) => Condition::Equals(vec![(
                attribute_column(&index.attribute),
                seen.map(schema_value).unwrap_or(CqlValue::Null),
            )]),
            None => Condition::Exists,
        };

        Ok(Statement::Update(Update {
            table: self.table(),
            assignments: self.data_assignments(item),
            predicates: self.row_predicates(item, &IndexSlot::sentinel())?,
            condition: Some(condition),
        }))
    }

    fn insert_index_row(&self, item: &AttributeMap, slot: &IndexSlot) -> Result<Statement> {
        Ok(Statement::Insert(Insert {
            table: self.table(),
            columns: self.row_columns(item, slot)?,
            condition: None,
        }))
    }

    fn key_predicates(&self, item: &AttributeMap) -> Result<Vec<ColumnValue>> {
        self.info
            .schema
            .key_attributes()
            .iter()
            .map(|key| {
                let value = item.get(key).ok_or_else(|| Error::MissingKey {
                    attribute: key.clone(),
                })?;
                Ok((attribute_column(key), schema_value(value)))
            })
            .collect()
    }

    fn row_predicates(&self, item: &AttributeMap, slot: &IndexSlot) -> Result<Vec<ColumnValue>> {
        let mut predicates = self.key_predicates(item)?;
        predicates.extend(slot_columns(slot));
        Ok(predicates)
    }

    /// Full column list of a new row: key, present declared attributes,
    /// dynamic companions, slot.
    fn row_columns(&self, item: &AttributeMap, slot: &IndexSlot) -> Result<Vec<ColumnValue>> {
        let mut columns = self.key_predicates(item)?;
        for (name, _) in self.declared_data() {
            if let Some(value) = item.get(name) {
                columns.push((attribute_column(name), schema_value(value)));
            }
        }
        columns.extend(self.dynamic_columns(item));
        columns.extend(slot_columns(slot));
        Ok(columns)
    }

    /// Assignments that overwrite every data column. Declared attributes the
    /// record lacks are nulled.
    fn data_assignments(&self, item: &AttributeMap) -> Vec<ColumnValue> {
        let mut assignments: Vec<ColumnValue> = self
            .declared_data()
            .map(|(name, _)| {
                (
                    attribute_column(name),
                    item.get(name).map(schema_value).unwrap_or(CqlValue::Null),
                )
            })
            .collect();
        assignments.extend(self.dynamic_columns(item));
        assignments
    }

    fn declared_data(&self) -> impl Iterator<Item = (&'a str, crate::types::AttributeType)> + 'a {
        let schema = &self.info.schema;
        schema.declared().filter(move |(name, _)| !schema.is_key(name))
    }

    /// The existence set, value map and type map of the dynamic attributes.
    fn dynamic_columns(&self, item: &AttributeMap) -> [ColumnValue; 3] {
        let mut names = Vec::new();
        let mut data = Vec::new();
        let mut types = Vec::new();

        for (name, value) in item.iter() {
            if self.info.schema.is_declared(name) {
                continue;
            }
            let key = CqlValue::Text(name.to_string());
            names.push(key.clone());
            data.push((key.clone(), CqlValue::Blob(dynamic_blob(value))));
            types.push((key, dynamic_type_tag(value)));
        }

        [
            (SYSTEM_COLUMN_ATTR_EXIST.to_string(), CqlValue::Set(names)),
            (SYSTEM_COLUMN_EXTRA_ATTR_DATA.to_string(), CqlValue::Map(data)),
            (SYSTEM_COLUMN_EXTRA_ATTR_TYPES.to_string(), CqlValue::Map(types)),
        ]
    }
}

/// The four index-slot columns with their values.
pub fn slot_columns(slot: &IndexSlot) -> [ColumnValue; 4] {
    [
        (
            SYSTEM_COLUMN_INDEX_NAME.to_string(),
            CqlValue::Text(slot.index_name.clone()),
        ),
        (
            SYSTEM_COLUMN_INDEX_VALUE_STRING.to_string(),
            CqlValue::Text(slot.string_value.clone()),
        ),
        (
            SYSTEM_COLUMN_INDEX_VALUE_NUMBER.to_string(),
            CqlValue::Decimal(slot.number_value.clone()),
        ),
        (
            SYSTEM_COLUMN_INDEX_VALUE_BLOB.to_string(),
            CqlValue::Blob(slot.blob_value.clone()),
        ),
    ]
}

// =============================================================================
// Tests
// =============================================================================
