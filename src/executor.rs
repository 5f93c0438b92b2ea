use crate::{
    Action, Backend, Connector, Error, GenericSqlWriter, Outcome, Pool, PoolOptions, PooledConn,
    Query, Result, RowLabeled, RowNames, RowShape, RowsAffected, SqlWriter, Statement, TableDef,
    TaskHandle, Value,
};
use futures::{Stream, StreamExt, TryStreamExt, future::BoxFuture, stream::BoxStream};
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

/// The execution engine: a connection pool plus a SQL writer.
///
/// Cheap to clone; every submitted action leases one connection for its whole
/// run, so independent tasks interleave across the pool while each action
/// sees a single linear connection.
pub struct Engine<C: Connector, W: SqlWriter = GenericSqlWriter> {
    pool: Pool<C>,
    writer: Arc<W>,
}

impl<C: Connector, W: SqlWriter> Clone for Engine<C, W> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            writer: self.writer.clone(),
        }
    }
}

impl<C: Connector> Engine<C> {
    pub fn new(connector: C, options: PoolOptions) -> Self {
        Self::with_writer(connector, options, GenericSqlWriter::new())
    }
}

impl<C: Connector, W: SqlWriter + 'static> Engine<C, W> {
    pub fn with_writer(connector: C, options: PoolOptions, writer: W) -> Self {
        Self {
            pool: Pool::new(connector, options),
            writer: Arc::new(writer),
        }
    }

    pub fn pool(&self) -> &Pool<C> {
        &self.pool
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Submit an action to run on the background runtime, returning a handle
    /// that can observe, cancel or await it.
    pub fn submit(&self, action: Action) -> TaskHandle {
        let engine = self.clone();
        TaskHandle::spawn(async move { engine.run(action).await })
    }

    /// Run an action on one pooled connection. Compilation of every
    /// statically known statement happens before a connection is leased, so
    /// compile errors never consume a pool slot.
    pub async fn run(&self, action: Action) -> Result<Outcome> {
        precheck(self.writer.as_dyn(), &action)?;
        let mut conn = self.pool.acquire().await?;
        interpret(self.writer.as_dyn(), &mut conn, action, false).await
    }

    /// Run a row-producing query and collect all rows.
    pub async fn fetch_all(&self, query: Query) -> Result<Vec<RowLabeled>> {
        self.stream(query).await?.try_collect().await
    }

    /// Run a row-producing query, streaming decoded rows as they arrive.
    /// The leased connection travels with the stream and returns to the pool
    /// when the stream is dropped, consumed or closed.
    pub async fn stream(&self, query: Query) -> Result<RowStream> {
        if !query.node().returns_rows() {
            return Err(Error::execution(
                "write statements produce an affected count, not rows",
            ));
        }
        let statement = self.writer.compile(&query)?;
        log::debug!("Streaming: {}", statement);
        let mut conn = self.pool.acquire().await?;
        let inner = async_stream::try_stream! {
            let labels = statement.labels.clone();
            let shape = statement.shape.clone();
            let mut rows = std::pin::pin!(conn.backend_mut().fetch(statement));
            while let Some(row) = rows.next().await {
                yield decode_row(row?, &labels, &shape)?;
            }
        };
        Ok(RowStream {
            inner: Box::pin(inner),
        })
    }
}

/// Stream of decoded rows holding its pooled connection alive.
pub struct RowStream {
    inner: BoxStream<'static, Result<RowLabeled>>,
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream").finish_non_exhaustive()
    }
}

impl RowStream {
    /// Stop consuming and release the connection back to the pool.
    pub fn close(self) {}
}

impl Stream for RowStream {
    type Item = Result<RowLabeled>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

/// Compile every statically known statement of the tree. Continuations are
/// opaque and check only their input side.
fn precheck(writer: &dyn SqlWriter, action: &Action) -> Result<()> {
    match action {
        Action::Pure(..) => Ok(()),
        Action::Query(query) => writer.compile(query).map(|_| ()),
        Action::FlatMap { first, .. } => precheck(writer, first),
        Action::Sequence(actions) => actions.iter().try_for_each(|a| precheck(writer, a)),
        Action::Transactional(inner) => precheck(writer, inner),
        Action::Batch { table, rows } => writer.compile_insert(table, rows, true).map(|_| ()),
    }
}

fn interpret<'a, C: Connector>(
    writer: &'a dyn SqlWriter,
    conn: &'a mut PooledConn<C>,
    action: Action,
    in_txn: bool,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        match action {
            Action::Pure(value) => Ok(Outcome::Value(value)),
            Action::Query(query) => run_query(writer, conn, &query).await,
            Action::FlatMap { first, rest } => {
                let outcome = interpret(writer, conn, *first, in_txn).await?;
                let next = rest(outcome)?;
                interpret(writer, conn, next, in_txn).await
            }
            Action::Sequence(actions) => {
                let mut outcomes = Vec::with_capacity(actions.len());
                for action in actions {
                    outcomes.push(interpret(writer, conn, action, in_txn).await?);
                }
                Ok(Outcome::Sequence(outcomes))
            }
            Action::Transactional(inner) => {
                if in_txn {
                    return interpret(writer, conn, *inner, true).await;
                }
                let mut sql = String::new();
                writer.write_transaction_begin(&mut sql);
                conn.backend_mut().execute(Statement::raw(sql)).await?;
                // While the transaction is open a dropped lease must close
                // the connection, rolling the transaction back.
                conn.set_discard(true);
                match interpret(writer, conn, *inner, true).await {
                    Ok(outcome) => {
                        let mut sql = String::new();
                        writer.write_transaction_commit(&mut sql);
                        conn.backend_mut().execute(Statement::raw(sql)).await?;
                        conn.set_discard(false);
                        Ok(outcome)
                    }
                    Err(e) => {
                        let mut sql = String::new();
                        writer.write_transaction_rollback(&mut sql);
                        match conn.backend_mut().execute(Statement::raw(sql)).await {
                            Ok(..) => conn.set_discard(false),
                            // the lease stays marked, dropping it closes the
                            // connection and the transaction with it
                            Err(rollback) => log::error!("Rollback failed: {rollback}"),
                        }
                        Err(e)
                    }
                }
            }
            Action::Batch { table, rows } => run_batch(writer, conn, &table, rows).await,
        }
    })
}

async fn run_query<C: Connector>(
    writer: &dyn SqlWriter,
    conn: &mut PooledConn<C>,
    query: &Query,
) -> Result<Outcome> {
    let statement = writer.compile(query)?;
    log::debug!("Executing: {}", statement);
    if query.node().returns_rows() {
        let labels = statement.labels.clone();
        let shape = statement.shape.clone();
        let rows = conn
            .backend_mut()
            .fetch(statement)
            .map(|row| row.and_then(|row| decode_row(row, &labels, &shape)))
            .try_collect()
            .await?;
        Ok(Outcome::Rows(rows))
    } else {
        Ok(Outcome::Affected(conn.backend_mut().execute(statement).await?))
    }
}

async fn run_batch<C: Connector>(
    writer: &dyn SqlWriter,
    conn: &mut PooledConn<C>,
    table: &Arc<TableDef>,
    rows: Vec<Vec<Value>>,
) -> Result<Outcome> {
    if rows.is_empty() {
        return Ok(Outcome::Affected(RowsAffected::default()));
    }
    let multi = conn.backend_mut().supports_batch_values();
    let statements = writer.compile_insert(table, &rows, multi)?;
    let mut affected = RowsAffected::default();
    for statement in statements {
        log::debug!("Executing: {}", statement);
        affected.extend([conn.backend_mut().execute(statement).await?]);
    }
    Ok(Outcome::Affected(affected))
}

/// Check a backend row against the statement's declared shape and relabel it
/// with the compiled column labels. Missing values take the declared type's
/// empty form, so `Option` decoding stays type-aware.
fn decode_row(row: RowLabeled, labels: &RowNames, shape: &RowShape) -> Result<RowLabeled> {
    if shape.is_empty() {
        return Ok(row);
    }
    if row.values.len() != shape.len() {
        return Err(Error::decode(format!(
            "expected {} columns, backend returned {}",
            shape.len(),
            row.values.len()
        )));
    }
    let mut values = Vec::with_capacity(shape.len());
    for (value, expected) in row.values.into_vec().into_iter().zip(shape.iter()) {
        if value.is_none() {
            values.push(expected.empty_of());
        } else if expected.comparable_with(&value) {
            values.push(value);
        } else {
            return Err(Error::decode(format!(
                "expected {}, backend returned {}",
                expected.type_name(),
                value.type_name()
            )));
        }
    }
    Ok(RowLabeled::new(labels.clone(), values.into()))
}
