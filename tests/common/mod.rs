//! In-memory database used by the integration tests.
//!
//! The backend interprets the exact SQL the generic writer emits: quoted
//! identifiers, `?` placeholders, INNER/CROSS joins and single aggregates.
//! Transactions run on a snapshot overlay that replaces the committed state
//! on COMMIT and is discarded on ROLLBACK or when the connection drops.

use futures::Stream;
use rust_decimal::{
    Decimal,
    prelude::{FromPrimitive, ToPrimitive},
};
use silo::{Backend, Connector, Error, QueryResult, Result, RowLabeled, RowsAffected, Statement, Table, Value};
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Clone, Default)]
struct StoredTable {
    columns: Vec<String>,
    primary_key: Vec<usize>,
    rows: Vec<Vec<Value>>,
}

type Tables = BTreeMap<String, StoredTable>;

#[derive(Default)]
struct SharedState {
    tables: Mutex<Tables>,
}

/// Connector handing out [`MemoryConn`] backends over one shared store.
#[derive(Clone)]
pub struct MemoryDb {
    state: Arc<SharedState>,
    latency: Duration,
    batch_values: bool,
    log: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<usize>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SharedState::default()),
            latency: Duration::ZERO,
            batch_values: false,
            log: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(Mutex::new(0)),
        }
    }

    /// Delay injected before every statement, to make cancellation windows
    /// and pool contention observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_batch_values(mut self, batch_values: bool) -> Self {
        self.batch_values = batch_values;
        self
    }

    pub fn register(&self, table: &Table) {
        let def = table.def();
        let stored = StoredTable {
            columns: def.columns.iter().map(|c| c.name.clone()).collect(),
            primary_key: def
                .columns
                .iter()
                .enumerate()
                .filter(|(_, c)| c.primary_key)
                .map(|(i, _)| i)
                .collect(),
            rows: Vec::new(),
        };
        self.state
            .tables
            .lock()
            .expect("state lock")
            .insert(def.name.clone(), stored);
    }

    /// Every statement text executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().expect("log lock").clone()
    }

    /// Committed rows of a table.
    pub fn rows(&self, table: &str) -> Vec<Vec<Value>> {
        self.state
            .tables
            .lock()
            .expect("state lock")
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn connections_opened(&self) -> usize {
        *self.connections.lock().expect("counter lock")
    }
}

impl Connector for MemoryDb {
    type Backend = MemoryConn;

    async fn connect(&self) -> Result<MemoryConn> {
        *self.connections.lock().expect("counter lock") += 1;
        Ok(MemoryConn {
            state: self.state.clone(),
            txn: None,
            latency: self.latency,
            batch_values: self.batch_values,
            log: self.log.clone(),
        })
    }
}

pub struct MemoryConn {
    state: Arc<SharedState>,
    txn: Option<Tables>,
    latency: Duration,
    batch_values: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl Backend for MemoryConn {
    fn supports_batch_values(&self) -> bool {
        self.batch_values
    }

    fn run(&mut self, statement: Statement) -> impl Stream<Item = Result<QueryResult>> + Send {
        async_stream::try_stream! {
            self.log.lock().expect("log lock").push(statement.sql.clone());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            for item in self.execute_sql(statement)? {
                yield item;
            }
        }
    }
}

impl MemoryConn {
    fn with_tables<R>(&mut self, f: impl FnOnce(&mut Tables) -> R) -> R {
        match &mut self.txn {
            Some(overlay) => f(overlay),
            None => f(&mut self.state.tables.lock().expect("state lock")),
        }
    }

    fn execute_sql(&mut self, statement: Statement) -> Result<Vec<QueryResult>> {
        let sql = statement.sql.clone();
        match sql.as_str() {
            "BEGIN TRANSACTION;" => {
                self.txn = Some(self.state.tables.lock().expect("state lock").clone());
                return Ok(affected(0));
            }
            "COMMIT;" => {
                let overlay = self
                    .txn
                    .take()
                    .ok_or_else(|| Error::execution("COMMIT without an open transaction"))?;
                *self.state.tables.lock().expect("state lock") = overlay;
                return Ok(affected(0));
            }
            "ROLLBACK;" => {
                self.txn = None;
                return Ok(affected(0));
            }
            _ => {}
        }
        if sql.starts_with("CREATE ") || sql.starts_with("DROP ") {
            return Ok(affected(0));
        }
        let mut parser = Parser::new(&sql, statement.params)?;
        if sql.starts_with("SELECT ") {
            self.execute_select(&mut parser)
        } else if sql.starts_with("INSERT INTO ") {
            self.execute_insert(&mut parser)
        } else if sql.starts_with("UPDATE ") {
            self.execute_update(&mut parser)
        } else if sql.starts_with("DELETE FROM ") {
            self.execute_delete(&mut parser)
        } else {
            Err(Error::execution(format!("unsupported statement: {sql}")))
        }
    }

    fn table_rows(&mut self, name: &str) -> Result<Vec<EnvRow>> {
        self.with_tables(|tables| {
            let table = tables
                .get(name)
                .ok_or_else(|| Error::execution(format!("no such table `{name}`")))?;
            Ok(table
                .rows
                .iter()
                .map(|row| {
                    table
                        .columns
                        .iter()
                        .zip(row)
                        .map(|(c, v)| (name.to_string(), c.clone(), v.clone()))
                        .collect()
                })
                .collect())
        })
    }

    fn execute_select(&mut self, parser: &mut Parser) -> Result<Vec<QueryResult>> {
        let select = parser.parse_select()?;
        let mut rows = self.table_rows(&select.from.base)?;
        for step in &select.from.joins {
            let right = self.table_rows(&step.table)?;
            let mut joined = Vec::new();
            for l in &rows {
                for r in &right {
                    let mut row = l.clone();
                    row.extend(r.iter().cloned());
                    let keep = match &step.on {
                        Some(on) => truthy(&eval(on, &row)?),
                        None => true,
                    };
                    if keep {
                        joined.push(row);
                    }
                }
            }
            rows = joined;
        }
        if let Some(predicate) = &select.filter {
            let mut kept = Vec::new();
            for row in rows {
                if truthy(&eval(predicate, &row)?) {
                    kept.push(row);
                }
            }
            rows = kept;
        }
        let out = match &select.items {
            SelectItems::Star => rows
                .into_iter()
                .map(|row| {
                    let labels: Vec<String> = row.iter().map(|(_, c, _)| c.clone()).collect();
                    let values: Vec<Value> = row.into_iter().map(|(_, _, v)| v).collect();
                    QueryResult::Row(RowLabeled::new(labels.into(), values.into()))
                })
                .collect(),
            SelectItems::Aggregate(func, arg) => {
                let value = eval_aggregate(func, arg.as_deref(), &rows)?;
                vec![QueryResult::Row(RowLabeled::new(
                    Arc::new(["aggregate".to_string()]),
                    vec![value].into(),
                ))]
            }
            SelectItems::Exprs(exprs) => {
                let labels: Vec<String> = exprs
                    .iter()
                    .map(|e| match e {
                        SqlExpr::Column(_, name) => name.clone(),
                        _ => "expr".to_string(),
                    })
                    .collect();
                let labels: Arc<[String]> = labels.into();
                let mut out = Vec::with_capacity(rows.len());
                for row in &rows {
                    let mut values = Vec::with_capacity(exprs.len());
                    for expr in exprs {
                        values.push(eval(expr, row)?);
                    }
                    out.push(QueryResult::Row(RowLabeled::new(
                        labels.clone(),
                        values.into(),
                    )));
                }
                out
            }
        };
        Ok(out)
    }

    fn execute_insert(&mut self, parser: &mut Parser) -> Result<Vec<QueryResult>> {
        let insert = parser.parse_insert()?;
        self.with_tables(|tables| {
            let table = tables
                .get_mut(&insert.table)
                .ok_or_else(|| Error::execution(format!("no such table `{}`", insert.table)))?;
            let mut staged = Vec::with_capacity(insert.rows.len());
            for row in &insert.rows {
                // column list order may differ from storage order
                let mut stored = vec![Value::Null; table.columns.len()];
                for (column, value) in insert.columns.iter().zip(row) {
                    let index = table
                        .columns
                        .iter()
                        .position(|c| c == column)
                        .ok_or_else(|| Error::execution(format!("no such column `{column}`")))?;
                    stored[index] = value.clone();
                }
                if !table.primary_key.is_empty() {
                    let key: Vec<&Value> = table.primary_key.iter().map(|i| &stored[*i]).collect();
                    let clash = table
                        .rows
                        .iter()
                        .chain(staged.iter())
                        .any(|r| table.primary_key.iter().map(|i| &r[*i]).eq(key.iter().copied()));
                    if clash {
                        return Err(Error::execution(format!(
                            "duplicate primary key in `{}`",
                            insert.table
                        )));
                    }
                }
                staged.push(stored);
            }
            let count = staged.len() as u64;
            table.rows.extend(staged);
            Ok(affected(count))
        })
    }

    fn execute_update(&mut self, parser: &mut Parser) -> Result<Vec<QueryResult>> {
        let update = parser.parse_update()?;
        self.with_tables(|tables| {
            let table = tables
                .get_mut(&update.table)
                .ok_or_else(|| Error::execution(format!("no such table `{}`", update.table)))?;
            let columns = table.columns.clone();
            let mut count = 0u64;
            for row in &mut table.rows {
                let env: EnvRow = columns
                    .iter()
                    .zip(row.iter())
                    .map(|(c, v)| (update.table.clone(), c.clone(), v.clone()))
                    .collect();
                let touched = match &update.filter {
                    Some(predicate) => truthy(&eval(predicate, &env)?),
                    None => true,
                };
                if !touched {
                    continue;
                }
                for (column, expr) in &update.assignments {
                    let index = columns
                        .iter()
                        .position(|c| c == column)
                        .ok_or_else(|| Error::execution(format!("no such column `{column}`")))?;
                    row[index] = eval(expr, &env)?;
                }
                count += 1;
            }
            Ok(affected(count))
        })
    }

    fn execute_delete(&mut self, parser: &mut Parser) -> Result<Vec<QueryResult>> {
        let delete = parser.parse_delete()?;
        self.with_tables(|tables| {
            let table = tables
                .get_mut(&delete.table)
                .ok_or_else(|| Error::execution(format!("no such table `{}`", delete.table)))?;
            let columns = table.columns.clone();
            let before = table.rows.len();
            let mut kept = Vec::with_capacity(before);
            for row in table.rows.drain(..) {
                let env: EnvRow = columns
                    .iter()
                    .zip(row.iter())
                    .map(|(c, v)| (delete.table.clone(), c.clone(), v.clone()))
                    .collect();
                let doomed = match &delete.filter {
                    Some(predicate) => truthy(&eval(predicate, &env)?),
                    None => true,
                };
                if !doomed {
                    kept.push(row);
                }
            }
            table.rows = kept;
            Ok(affected((before - table.rows.len()) as u64))
        })
    }
}

fn affected(rows_affected: u64) -> Vec<QueryResult> {
    vec![QueryResult::Affected(RowsAffected {
        rows_affected,
        last_affected_id: None,
    })]
}

type EnvRow = Vec<(String, String, Value)>;

#[derive(Debug, Clone)]
enum SqlExpr {
    Column(Option<String>, String),
    Param(Value),
    Not(Box<SqlExpr>),
    Binary(String, Box<SqlExpr>, Box<SqlExpr>),
    Cast(Box<SqlExpr>, String),
}

enum SelectItems {
    Star,
    Aggregate(String, Option<Box<SqlExpr>>),
    Exprs(Vec<SqlExpr>),
}

struct JoinStep {
    table: String,
    on: Option<SqlExpr>,
}

struct FromClause {
    base: String,
    joins: Vec<JoinStep>,
}

struct Select {
    items: SelectItems,
    from: FromClause,
    filter: Option<SqlExpr>,
}

struct Insert {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

struct Update {
    table: String,
    assignments: Vec<(String, SqlExpr)>,
    filter: Option<SqlExpr>,
}

struct Delete {
    table: String,
    filter: Option<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Word(String),
    Placeholder,
    Symbol(char),
    Op(String),
}

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '"' => {
                chars.next();
                let mut ident = String::new();
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            ident.push('"');
                        }
                        Some('"') => break,
                        Some(c) => ident.push(c),
                        None => return Err(Error::execution("unterminated identifier")),
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            '?' => {
                chars.next();
                tokens.push(Token::Placeholder);
            }
            '(' | ')' | ',' | ';' | '.' | '*' => {
                chars.next();
                tokens.push(Token::Symbol(c));
            }
            '|' => {
                chars.next();
                if chars.next() != Some('|') {
                    return Err(Error::execution("expected `||`"));
                }
                tokens.push(Token::Op("||".into()));
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(Error::execution("expected `!=`"));
                }
                tokens.push(Token::Op("!=".into()));
            }
            '<' | '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(format!("{c}=")));
                } else {
                    tokens.push(Token::Op(c.to_string()));
                }
            }
            '=' => {
                chars.next();
                tokens.push(Token::Op("=".into()));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(Error::execution(format!("unexpected character `{other}`"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    params: std::vec::IntoIter<Value>,
}

impl Parser {
    fn new(sql: &str, params: Vec<Value>) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(sql)?,
            pos: 0,
            params: params.into_iter(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| Error::execution("unexpected end of statement"))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect_word(&mut self, word: &str) -> Result<()> {
        match self.next()? {
            Token::Word(w) if w == word => Ok(()),
            other => Err(Error::execution(format!("expected {word}, found {other:?}"))),
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<()> {
        match self.next()? {
            Token::Symbol(s) if s == symbol => Ok(()),
            other => Err(Error::execution(format!(
                "expected `{symbol}`, found {other:?}"
            ))),
        }
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if self.peek() == Some(&Token::Symbol(symbol)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Word(w)) if w == word) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(ident) => Ok(ident),
            other => Err(Error::execution(format!(
                "expected an identifier, found {other:?}"
            ))),
        }
    }

    fn next_param(&mut self) -> Result<Value> {
        self.params
            .next()
            .ok_or_else(|| Error::execution("more placeholders than bound values"))
    }

    fn parse_select(&mut self) -> Result<Select> {
        self.expect_word("SELECT")?;
        let items = if self.eat_symbol('*') {
            SelectItems::Star
        } else if let Some(Token::Word(w)) = self.peek() {
            let func = w.clone();
            if !is_aggregate(&func) {
                return Err(Error::execution(format!("unexpected word `{func}`")));
            }
            self.pos += 1;
            self.expect_symbol('(')?;
            let arg = if self.eat_symbol('*') {
                None
            } else {
                Some(Box::new(self.parse_expr(0)?))
            };
            self.expect_symbol(')')?;
            SelectItems::Aggregate(func, arg)
        } else {
            let mut exprs = vec![self.parse_expr(0)?];
            while self.eat_symbol(',') {
                exprs.push(self.parse_expr(0)?);
            }
            SelectItems::Exprs(exprs)
        };
        self.expect_word("FROM")?;
        let base = self.ident()?;
        let mut joins = Vec::new();
        loop {
            if self.eat_word("INNER") {
                self.expect_word("JOIN")?;
                let table = self.ident()?;
                self.expect_word("ON")?;
                let on = self.parse_expr(0)?;
                joins.push(JoinStep {
                    table,
                    on: Some(on),
                });
            } else if self.eat_word("CROSS") {
                self.expect_word("JOIN")?;
                joins.push(JoinStep {
                    table: self.ident()?,
                    on: None,
                });
            } else {
                break;
            }
        }
        let filter = self.parse_where()?;
        Ok(Select {
            items,
            from: FromClause { base, joins },
            filter,
        })
    }

    fn parse_where(&mut self) -> Result<Option<SqlExpr>> {
        if self.eat_word("WHERE") {
            return Ok(Some(self.parse_expr(0)?));
        }
        Ok(None)
    }

    fn parse_insert(&mut self) -> Result<Insert> {
        self.expect_word("INSERT")?;
        self.expect_word("INTO")?;
        let table = self.ident()?;
        self.expect_symbol('(')?;
        let mut columns = vec![self.ident()?];
        while self.eat_symbol(',') {
            columns.push(self.ident()?);
        }
        self.expect_symbol(')')?;
        self.expect_word("VALUES")?;
        let mut rows = Vec::new();
        loop {
            self.expect_symbol('(')?;
            let mut row = Vec::with_capacity(columns.len());
            loop {
                match self.next()? {
                    Token::Placeholder => row.push(self.next_param()?),
                    other => {
                        return Err(Error::execution(format!(
                            "expected a placeholder, found {other:?}"
                        )));
                    }
                }
                if !self.eat_symbol(',') {
                    break;
                }
            }
            self.expect_symbol(')')?;
            rows.push(row);
            if !self.eat_symbol(',') {
                break;
            }
        }
        Ok(Insert {
            table,
            columns,
            rows,
        })
    }

    fn parse_update(&mut self) -> Result<Update> {
        self.expect_word("UPDATE")?;
        let table = self.ident()?;
        self.expect_word("SET")?;
        let mut assignments = Vec::new();
        loop {
            let column = self.ident()?;
            match self.next()? {
                Token::Op(op) if op == "=" => {}
                other => {
                    return Err(Error::execution(format!("expected `=`, found {other:?}")));
                }
            }
            assignments.push((column, self.parse_expr(0)?));
            if !self.eat_symbol(',') {
                break;
            }
        }
        let filter = self.parse_where()?;
        Ok(Update {
            table,
            assignments,
            filter,
        })
    }

    fn parse_delete(&mut self) -> Result<Delete> {
        self.expect_word("DELETE")?;
        self.expect_word("FROM")?;
        let table = self.ident()?;
        let filter = self.parse_where()?;
        Ok(Delete { table, filter })
    }

    /// Precedence climbing: OR < AND < comparisons < `||`.
    fn parse_expr(&mut self, min_precedence: u8) -> Result<SqlExpr> {
        let mut lhs = self.parse_primary()?;
        loop {
            let (op, precedence) = match self.peek() {
                Some(Token::Word(w)) if w == "OR" => ("OR".to_string(), 1),
                Some(Token::Word(w)) if w == "AND" => ("AND".to_string(), 2),
                Some(Token::Op(op)) if op != "||" => (op.clone(), 3),
                Some(Token::Op(_)) => ("||".to_string(), 4),
                _ => break,
            };
            if precedence < min_precedence {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_expr(precedence + 1)?;
            lhs = SqlExpr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<SqlExpr> {
        match self.next()? {
            Token::Placeholder => Ok(SqlExpr::Param(self.next_param()?)),
            Token::Ident(first) => {
                if self.eat_symbol('.') {
                    return Ok(SqlExpr::Column(Some(first), self.ident()?));
                }
                Ok(SqlExpr::Column(None, first))
            }
            Token::Symbol('(') => {
                let inner = self.parse_expr(0)?;
                self.expect_symbol(')')?;
                Ok(inner)
            }
            Token::Word(w) if w == "NOT" => Ok(SqlExpr::Not(Box::new(self.parse_primary()?))),
            Token::Word(w) if w == "CAST" => {
                self.expect_symbol('(')?;
                let inner = self.parse_expr(0)?;
                self.expect_word("AS")?;
                let mut ty = match self.next()? {
                    Token::Word(w) => w,
                    other => {
                        return Err(Error::execution(format!(
                            "expected a type name, found {other:?}"
                        )));
                    }
                };
                // DECIMAL(p,s) carries a parenthesized suffix
                if self.eat_symbol('(') {
                    while !self.eat_symbol(')') {
                        self.pos += 1;
                    }
                }
                ty.make_ascii_uppercase();
                self.expect_symbol(')')?;
                Ok(SqlExpr::Cast(Box::new(inner), ty))
            }
            other => Err(Error::execution(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }
}

fn is_aggregate(word: &str) -> bool {
    matches!(word, "MIN" | "MAX" | "SUM" | "COUNT" | "AVG")
}

fn lookup<'a>(row: &'a EnvRow, qualifier: Option<&str>, name: &str) -> Result<&'a Value> {
    row.iter()
        .find(|(t, c, _)| c == name && qualifier.is_none_or(|q| q == t))
        .map(|(_, _, v)| v)
        .ok_or_else(|| Error::execution(format!("unknown column `{name}`")))
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Boolean(Some(true)))
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Int16(Some(v)) => Some(Decimal::from(*v)),
        Value::Int32(Some(v)) => Some(Decimal::from(*v)),
        Value::Int64(Some(v)) => Some(Decimal::from(*v)),
        Value::Float64(Some(v)) => Decimal::from_f64(*v),
        Value::Decimal(Some(v), ..) => Some(*v),
        _ => None,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (decimal_of(lhs), decimal_of(rhs)) {
        return Some(l.cmp(&r));
    }
    match (lhs, rhs) {
        (Value::Boolean(Some(l)), Value::Boolean(Some(r))) => Some(l.cmp(r)),
        (Value::Varchar(Some(l)), Value::Varchar(Some(r))) => Some(l.cmp(r)),
        (Value::Date(Some(l)), Value::Date(Some(r))) => Some(l.cmp(r)),
        (Value::Timestamp(Some(l)), Value::Timestamp(Some(r))) => Some(l.cmp(r)),
        (Value::Uuid(Some(l)), Value::Uuid(Some(r))) => Some(l.cmp(r)),
        _ => None,
    }
}

fn text_of(value: &Value) -> Result<String> {
    match value {
        Value::Boolean(Some(v)) => Ok(v.to_string()),
        Value::Int16(Some(v)) => Ok(v.to_string()),
        Value::Int32(Some(v)) => Ok(v.to_string()),
        Value::Int64(Some(v)) => Ok(v.to_string()),
        Value::Float64(Some(v)) => Ok(v.to_string()),
        Value::Decimal(Some(v), ..) => Ok(v.to_string()),
        Value::Varchar(Some(v)) => Ok(v.clone()),
        Value::Date(Some(v)) => Ok(v.to_string()),
        Value::Timestamp(Some(v)) => Ok(v.to_string()),
        Value::Uuid(Some(v)) => Ok(v.to_string()),
        other => Err(Error::execution(format!("cannot render {other:?} as text"))),
    }
}

fn eval(expr: &SqlExpr, row: &EnvRow) -> Result<Value> {
    match expr {
        SqlExpr::Column(qualifier, name) => Ok(lookup(row, qualifier.as_deref(), name)?.clone()),
        SqlExpr::Param(value) => Ok(value.clone()),
        SqlExpr::Not(inner) => {
            let value = eval(inner, row)?;
            Ok(Value::Boolean(Some(!truthy(&value))))
        }
        SqlExpr::Binary(op, lhs, rhs) => {
            let (l, r) = (eval(lhs, row)?, eval(rhs, row)?);
            let result = match op.as_str() {
                "AND" => truthy(&l) && truthy(&r),
                "OR" => truthy(&l) || truthy(&r),
                "||" => return Ok(Value::Varchar(Some(format!("{}{}", text_of(&l)?, text_of(&r)?)))),
                "=" => compare(&l, &r) == Some(Ordering::Equal),
                "!=" => matches!(compare(&l, &r), Some(o) if o != Ordering::Equal),
                "<" => compare(&l, &r) == Some(Ordering::Less),
                "<=" => matches!(compare(&l, &r), Some(Ordering::Less | Ordering::Equal)),
                ">" => compare(&l, &r) == Some(Ordering::Greater),
                ">=" => matches!(compare(&l, &r), Some(Ordering::Greater | Ordering::Equal)),
                other => return Err(Error::execution(format!("unsupported operator `{other}`"))),
            };
            Ok(Value::Boolean(Some(result)))
        }
        SqlExpr::Cast(inner, ty) => {
            let value = eval(inner, row)?;
            cast(value, ty)
        }
    }
}

fn cast(value: Value, ty: &str) -> Result<Value> {
    if value.is_none() {
        return Ok(Value::Null);
    }
    match ty {
        "VARCHAR" => Ok(Value::Varchar(Some(text_of(&value)?))),
        "SMALLINT" | "INTEGER" | "BIGINT" | "DOUBLE" | "DECIMAL" => {
            let decimal = decimal_of(&value)
                .ok_or_else(|| Error::execution(format!("cannot cast {value:?} to {ty}")))?;
            Ok(match ty {
                "SMALLINT" => Value::Int16(decimal.to_i16()),
                "INTEGER" => Value::Int32(decimal.to_i32()),
                "BIGINT" => Value::Int64(decimal.to_i64()),
                "DOUBLE" => Value::Float64(decimal.to_f64()),
                _ => Value::Decimal(Some(decimal), 0, 0),
            })
        }
        _ => Ok(value),
    }
}

fn eval_aggregate(func: &str, arg: Option<&SqlExpr>, rows: &[EnvRow]) -> Result<Value> {
    let mut values = Vec::new();
    for row in rows {
        match arg {
            Some(expr) => {
                let value = eval(expr, row)?;
                if !value.is_none() {
                    values.push(value);
                }
            }
            None => values.push(Value::Int64(Some(1))),
        }
    }
    match func {
        "COUNT" => Ok(Value::Int64(Some(values.len() as i64))),
        "MIN" | "MAX" => {
            let mut best: Option<Value> = None;
            for value in values {
                best = Some(match best {
                    None => value,
                    Some(current) => {
                        let keep_new = match compare(&value, &current) {
                            Some(Ordering::Less) => func == "MIN",
                            Some(Ordering::Greater) => func == "MAX",
                            _ => false,
                        };
                        if keep_new { value } else { current }
                    }
                });
            }
            Ok(best.unwrap_or(Value::Null))
        }
        "SUM" | "AVG" => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let mut sum = Decimal::ZERO;
            for value in &values {
                sum += decimal_of(value)
                    .ok_or_else(|| Error::execution(format!("{func} over non-numeric {value:?}")))?;
            }
            if func == "AVG" {
                let count = Decimal::from(values.len());
                return Ok(Value::Float64((sum / count).to_f64()));
            }
            Ok(match &values[0] {
                Value::Float64(..) => Value::Float64(sum.to_f64()),
                Value::Decimal(.., p, s) => Value::Decimal(Some(sum), *p, *s),
                _ => Value::Int64(sum.to_i64()),
            })
        }
        other => Err(Error::execution(format!("unsupported aggregate `{other}`"))),
    }
}
