use crate::{QueryResult, Result, RowLabeled, RowsAffected, Statement};
use futures::{Future, Stream, StreamExt, TryStreamExt};

/// A live database connection.
///
/// `run` is the only required method: it executes one compiled statement and
/// streams back a mix of rows and affected counts. The `fetch` and `execute`
/// defaults specialize that stream for the read and write paths.
pub trait Backend: Send + 'static {
    /// Execute one statement, streaming results in arrival order.
    fn run(&mut self, statement: Statement) -> impl Stream<Item = Result<QueryResult>> + Send;

    /// Whether this backend accepts multi-row VALUES lists. When false the
    /// engine lowers a batch to one single-row statement per row.
    fn supports_batch_values(&self) -> bool {
        false
    }

    /// Execute a statement expected to produce rows, dropping affected
    /// counts.
    fn fetch(&mut self, statement: Statement) -> impl Stream<Item = Result<RowLabeled>> + Send {
        self.run(statement).filter_map(|v| async move {
            match v {
                Ok(QueryResult::Row(row)) => Some(Ok(row)),
                Ok(QueryResult::Affected(..)) => None,
                Err(e) => Some(Err(e)),
            }
        })
    }

    /// Execute a statement expected to modify rows, accumulating the
    /// affected counts and dropping any rows.
    fn execute(&mut self, statement: Statement) -> impl Future<Output = Result<RowsAffected>> + Send {
        self.run(statement)
            .filter_map(|v| async move {
                match v {
                    Ok(QueryResult::Affected(affected)) => Some(Ok(affected)),
                    Ok(QueryResult::Row(..)) => None,
                    Err(e) => Some(Err(e)),
                }
            })
            .try_collect()
    }
}

/// Factory opening fresh [`Backend`] connections for the pool.
pub trait Connector: Send + Sync + 'static {
    type Backend: Backend;

    fn connect(&self) -> impl Future<Output = Result<Self::Backend>> + Send;
}
