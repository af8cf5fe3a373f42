//! # Storage Session
//!
//! [`Session`] is the seam between the pipeline and the column store. The
//! pipeline only ever needs two things from storage: execute one statement
//! (possibly a conditional batch) and look up a table's metadata.
//!
//! ## The `[applied]` Protocol
//!
//! A conditional statement does not fail when its precondition is false; it
//! returns a result whose first row carries `[applied] = false` together with
//! the current values of the row it inspected. [`ResultSet::was_applied`]
//! decodes that marker:
//!
//! | Result | Meaning |
//! |--------|---------|
//! | no rows | applied (unconditional statements return nothing) |
//! | first row `[applied] = true` | applied |
//! | first row `[applied] = false` | rejected |
//! | first row without `[applied]` | rejected |

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::schema::APPLIED_COLUMN;
use crate::statement::{CqlValue, Statement};
use crate::types::TableInfo;

/// One result row: column name to value.
pub type Row = BTreeMap<String, CqlValue>;

/// Rows returned by a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn first_row(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether a conditional statement took effect.
    pub fn was_applied(&self) -> bool {
        match self.first_row() {
            None => true,
            Some(row) => row
                .get(APPLIED_COLUMN)
                .and_then(CqlValue::as_bool)
                .unwrap_or(false),
        }
    }
}

/// A connection to the column store.
///
/// Implementations must be safe to share across the tasks the admission
/// queue spawns.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Executes one statement.
    ///
    /// A rejected conditional statement is returned as `Ok` with
    /// `[applied] = false`; `Err` means the engine failed.
    async fn execute(&self, statement: &Statement) -> Result<ResultSet>;

    /// Looks up a table in the catalog.
    async fn describe_table(&self, tenant: &str, table: &str) -> Result<TableInfo>;
}

#[async_trait]
impl<S: Session + ?Sized> Session for Arc<S> {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet> {
        (**self).execute(statement).await
    }

    async fn describe_table(&self, tenant: &str, table: &str) -> Result<TableInfo> {
        (**self).describe_table(tenant, table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, CqlValue)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_was_applied() {
        assert!(ResultSet::empty().was_applied());
        assert!(ResultSet::from_rows(vec![row(&[(APPLIED_COLUMN, CqlValue::Boolean(true))])])
            .was_applied());
        assert!(!ResultSet::from_rows(vec![row(&[
            (APPLIED_COLUMN, CqlValue::Boolean(false)),
            ("user_id", CqlValue::Text("k1".into())),
        ])])
        .was_applied());
        assert!(!ResultSet::from_rows(vec![row(&[("user_id", CqlValue::Text("k1".into()))])])
            .was_applied());
    }
}
