use crate::{AsValue, Result, Value, truncate_long};
use std::{
    fmt::{self, Display},
    sync::Arc,
};

/// Shared reference-counted column name list.
pub type RowNames = Arc<[String]>;
/// Owned row value slice matching `RowNames` length.
pub type Row = Box<[Value]>;
/// Ordered output type tags of a compiled statement.
pub type RowShape = Arc<[Value]>;

/// A compiled statement: SQL text, ordered parameter values and the declared
/// result-row shape. Immutable; the batch path reuses the text with fresh
/// parameter bindings through [`Statement::rebind`].
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    pub labels: RowNames,
    pub shape: RowShape,
}

impl Statement {
    pub fn new(sql: String, params: Vec<Value>, labels: RowNames, shape: RowShape) -> Self {
        debug_assert_eq!(
            placeholder_count(&sql),
            params.len(),
            "placeholder count must equal bound value count"
        );
        Self {
            sql,
            params,
            labels,
            shape,
        }
    }

    /// A statement with no parameters and no declared row shape.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            labels: Arc::new([]),
            shape: Arc::new([]),
        }
    }

    /// Same SQL text bound to a different parameter list.
    pub fn rebind(&self, params: Vec<Value>) -> Self {
        Self::new(self.sql.clone(), params, self.labels.clone(), self.shape.clone())
    }
}

/// A `?` inside a quoted identifier is part of the name, not a placeholder.
#[cfg(debug_assertions)]
fn placeholder_count(sql: &str) -> usize {
    let mut count = 0;
    let mut quoted = false;
    for c in sql.chars() {
        match c {
            '"' => quoted = !quoted,
            '?' if !quoted => count += 1,
            _ => {}
        }
    }
    count
}

impl Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} params]", truncate_long!(self.sql), self.params.len())
    }
}

/// Metadata about modify operations (INSERT/UPDATE/DELETE).
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct RowsAffected {
    /// Total number of rows impacted.
    pub rows_affected: u64,
    /// Backend-specific last inserted / affected identifier when available.
    pub last_affected_id: Option<i64>,
}

impl Extend<RowsAffected> for RowsAffected {
    fn extend<T: IntoIterator<Item = RowsAffected>>(&mut self, iter: T) {
        for elem in iter {
            self.rows_affected += elem.rows_affected;
            if elem.last_affected_id.is_some() {
                self.last_affected_id = elem.last_affected_id;
            }
        }
    }
}

/// A decoded result row with its corresponding column labels.
#[derive(Debug, Clone, PartialEq)]
pub struct RowLabeled {
    /// Column names.
    pub labels: RowNames,
    /// Data values (aligned by index with `labels`).
    pub values: Row,
}

impl RowLabeled {
    pub fn new(labels: RowNames, values: Row) -> Self {
        Self { labels, values }
    }
    pub fn names(&self) -> &[String] {
        &self.labels
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
    pub fn get_column(&self, name: &str) -> Option<&Value> {
        self.labels
            .iter()
            .position(|v| v == name)
            .map(|i| &self.values[i])
    }
    /// Decode the value at `index` into a native type.
    pub fn get<T: AsValue>(&self, index: usize) -> Result<T> {
        T::try_from_value(self.values[index].clone())
    }
}

/// Heterogeneous items emitted by a backend, combining rows and modify
/// results.
#[derive(Debug)]
pub enum QueryResult {
    Row(RowLabeled),
    Affected(RowsAffected),
}

impl From<RowLabeled> for QueryResult {
    fn from(value: RowLabeled) -> Self {
        QueryResult::Row(value)
    }
}

impl From<RowsAffected> for QueryResult {
    fn from(value: RowsAffected) -> Self {
        QueryResult::Affected(value)
    }
}
