use crate::{
    Error, Query, Result, RowLabeled, RowsAffected, Table, TableDef, Value, validate_insert_rows,
};
use std::{fmt, sync::Arc};

/// Result of running one [`Action`] step, fed into `and_then` continuations.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    None,
    Value(Value),
    Rows(Vec<RowLabeled>),
    Affected(RowsAffected),
    Sequence(Vec<Outcome>),
}

impl Outcome {
    pub fn into_rows(self) -> Result<Vec<RowLabeled>> {
        match self {
            Outcome::Rows(rows) => Ok(rows),
            other => Err(Error::execution(format!("expected rows, found {other:?}"))),
        }
    }

    pub fn into_affected(self) -> Result<RowsAffected> {
        match self {
            Outcome::Affected(affected) => Ok(affected),
            other => Err(Error::execution(format!(
                "expected an affected count, found {other:?}"
            ))),
        }
    }

    /// The single value of a one-row one-column result, the shape aggregate
    /// queries produce.
    pub fn single_value(self) -> Result<Value> {
        match self {
            Outcome::Value(value) => Ok(value),
            Outcome::Rows(mut rows) if rows.len() == 1 && rows[0].values.len() == 1 => {
                Ok(rows.remove(0).values.into_vec().remove(0))
            }
            other => Err(Error::execution(format!(
                "expected a single value, found {other:?}"
            ))),
        }
    }
}

/// Continuation deciding the next action from the previous outcome.
pub type Continuation = Box<dyn FnOnce(Outcome) -> Result<Action> + Send>;

/// A composable description of database work. Nothing runs until an engine
/// interprets the tree; the same building blocks describe a single query, a
/// dependent chain or a transaction.
pub enum Action {
    /// Immediately produces a value without touching the database.
    Pure(Value),
    /// Runs one compiled query.
    Query(Query),
    /// Runs `first`, then the action its outcome maps to.
    FlatMap {
        first: Box<Action>,
        rest: Continuation,
    },
    /// Runs the actions in order, failing fast on the first error.
    Sequence(Vec<Action>),
    /// Runs the inner action inside BEGIN/COMMIT, rolling back on error.
    /// Nested transactional blocks flatten into the outermost one.
    Transactional(Box<Action>),
    /// Inserts many rows of one table, lowered per backend capability.
    Batch {
        table: Arc<TableDef>,
        rows: Vec<Vec<Value>>,
    },
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Pure(value) => f.debug_tuple("Pure").field(value).finish(),
            Action::Query(query) => f.debug_tuple("Query").field(query).finish(),
            Action::FlatMap { first, .. } => f
                .debug_struct("FlatMap")
                .field("first", first)
                .finish_non_exhaustive(),
            Action::Sequence(actions) => f.debug_tuple("Sequence").field(actions).finish(),
            Action::Transactional(inner) => f.debug_tuple("Transactional").field(inner).finish(),
            Action::Batch { table, rows } => f
                .debug_struct("Batch")
                .field("table", &table.name)
                .field("rows", &rows.len())
                .finish(),
        }
    }
}

impl Action {
    pub fn pure(value: impl Into<Value>) -> Action {
        Action::Pure(value.into())
    }

    pub fn query(query: Query) -> Action {
        Action::Query(query)
    }

    /// Chain a dependent step computed from this action's outcome.
    pub fn and_then<F>(self, rest: F) -> Action
    where
        F: FnOnce(Outcome) -> Result<Action> + Send + 'static,
    {
        Action::FlatMap {
            first: Box::new(self),
            rest: Box::new(rest),
        }
    }

    pub fn sequence(actions: impl IntoIterator<Item = Action>) -> Action {
        Action::Sequence(actions.into_iter().collect())
    }

    /// Wrap this action in a transaction boundary.
    pub fn transactional(self) -> Action {
        Action::Transactional(Box::new(self))
    }

    /// Bulk insert, validated row by row at construction time. An empty
    /// batch is legal and executes as a no-op.
    pub fn batch(table: &Table, rows: Vec<Vec<Value>>) -> Result<Action> {
        validate_insert_rows(table.def(), &rows)?;
        Ok(Action::Batch {
            table: table.def().clone(),
            rows,
        })
    }
}

impl From<Query> for Action {
    fn from(query: Query) -> Self {
        Action::Query(query)
    }
}
