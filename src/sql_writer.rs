use crate::{
    BinaryOpType, Column, Error, Expr, JoinKind, Query, QueryAst, Result, Statement, Table,
    TableDef, UnaryOpType, Value, creation_order, possibly_parenthesized, separated_by,
};
use std::{fmt::Write, sync::Arc};

/// What a select tree lowers to: a from-tree of scans and joins, the
/// accumulated predicates in combinator-application order, and at most one
/// projection or aggregate.
struct SelectParts<'a> {
    from: Option<FromItem<'a>>,
    filters: Vec<&'a Expr>,
    projection: Option<&'a [Expr]>,
    aggregate: Option<&'a Expr>,
    table_count: usize,
}

enum FromItem<'a> {
    Table(&'a Arc<TableDef>),
    Join {
        lhs: Box<FromItem<'a>>,
        rhs: Box<FromItem<'a>>,
        kind: JoinKind,
        on: Option<&'a Expr>,
    },
}

/// Deterministic lowering of a [`Query`] tree into a parameterized
/// [`Statement`]. Default methods implement a generic SQL dialect; a backend
/// may override individual `write_*` fragments.
pub trait SqlWriter: Send + Sync {
    fn as_dyn(&self) -> &dyn SqlWriter;

    fn write_escaped(&self, out: &mut String, value: &str, search: char, replace: &str) {
        let mut position = 0;
        for (i, c) in value.char_indices() {
            if c == search {
                out.push_str(&value[position..i]);
                out.push_str(replace);
                position = i + 1;
            }
        }
        out.push_str(&value[position..]);
    }

    fn write_identifier_quoted(&self, out: &mut String, value: &str) {
        out.push('"');
        self.write_escaped(out, value, '"', r#""""#);
        out.push('"');
    }

    fn write_column_type(&self, out: &mut String, value: &Value) {
        match value {
            Value::Boolean(..) => out.push_str("BOOLEAN"),
            Value::Int16(..) => out.push_str("SMALLINT"),
            Value::Int32(..) => out.push_str("INTEGER"),
            Value::Int64(..) => out.push_str("BIGINT"),
            Value::Float64(..) => out.push_str("DOUBLE"),
            Value::Decimal(.., precision, scale) => {
                out.push_str("DECIMAL");
                if (precision, scale) != (&0, &0) {
                    let _ = write!(out, "({},{})", precision, scale);
                }
            }
            Value::Varchar(..) => out.push_str("VARCHAR"),
            Value::Date(..) => out.push_str("DATE"),
            Value::Timestamp(..) => out.push_str("TIMESTAMP"),
            Value::Uuid(..) => out.push_str("UUID"),
            Value::Null => panic!("Unexpected Value::Null, cannot derive a column type"),
        };
    }

    fn write_column(&self, out: &mut String, column: &Column, qualify: bool) {
        if qualify {
            self.write_identifier_quoted(out, column.table_name());
            out.push('.');
        }
        self.write_identifier_quoted(out, column.name());
    }

    fn binary_op_precedence(&self, op: &BinaryOpType) -> i32 {
        match op {
            BinaryOpType::Or => 100,
            BinaryOpType::And => 200,
            BinaryOpType::Equal
            | BinaryOpType::NotEqual
            | BinaryOpType::Less
            | BinaryOpType::LessEqual
            | BinaryOpType::Greater
            | BinaryOpType::GreaterEqual => 300,
            BinaryOpType::Concat => 800,
        }
    }

    fn expression_precedence(&self, expr: &Expr) -> i32 {
        match expr {
            Expr::Binary { op, .. } => self.binary_op_precedence(op),
            Expr::Unary {
                op: UnaryOpType::Not,
                ..
            } => 250,
            Expr::Cast { .. } => 1100,
            _ => 1_000_000,
        }
    }

    /// Serialize an expression. Every literal lowers to a `?` placeholder
    /// with its value appended to `params`, never inlined into the text.
    fn write_expression(
        &self,
        out: &mut String,
        params: &mut Vec<Value>,
        expr: &Expr,
        qualify: bool,
    ) {
        match expr {
            Expr::Column(column) => self.write_column(out, column, qualify),
            Expr::Literal(value) => {
                out.push('?');
                params.push(value.clone());
            }
            Expr::Unary {
                op: UnaryOpType::Not,
                expr,
            } => {
                out.push_str("NOT ");
                possibly_parenthesized!(
                    out,
                    self.expression_precedence(expr) <= 250,
                    self.write_expression(out, params, expr, qualify)
                );
            }
            Expr::Binary { op, lhs, rhs } => {
                let infix = match op {
                    BinaryOpType::Equal => " = ",
                    BinaryOpType::NotEqual => " != ",
                    BinaryOpType::Less => " < ",
                    BinaryOpType::LessEqual => " <= ",
                    BinaryOpType::Greater => " > ",
                    BinaryOpType::GreaterEqual => " >= ",
                    BinaryOpType::And => " AND ",
                    BinaryOpType::Or => " OR ",
                    BinaryOpType::Concat => " || ",
                };
                let precedence = self.binary_op_precedence(op);
                possibly_parenthesized!(
                    out,
                    self.expression_precedence(lhs) < precedence,
                    self.write_expression(out, params, lhs, qualify)
                );
                out.push_str(infix);
                possibly_parenthesized!(
                    out,
                    self.expression_precedence(rhs) <= precedence,
                    self.write_expression(out, params, rhs, qualify)
                );
            }
            Expr::Cast { expr, value } => {
                out.push_str("CAST(");
                self.write_expression(out, params, expr, qualify);
                out.push_str(" AS ");
                self.write_column_type(out, value);
                out.push(')');
            }
            Expr::Aggregate { func, expr } => {
                out.push_str(func.sql_name());
                out.push('(');
                self.write_expression(out, params, expr, qualify);
                out.push(')');
            }
            Expr::Asterisk => out.push('*'),
        }
    }

    fn write_join_kind(&self, out: &mut String, kind: &JoinKind) {
        out.push_str(match kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Cross => "CROSS JOIN",
        });
    }

    fn write_transaction_begin(&self, out: &mut String) {
        out.push_str("BEGIN TRANSACTION;");
    }

    fn write_transaction_commit(&self, out: &mut String) {
        out.push_str("COMMIT;");
    }

    fn write_transaction_rollback(&self, out: &mut String) {
        out.push_str("ROLLBACK;");
    }

    /// Lower one query tree into one compiled statement.
    fn compile(&self, query: &Query) -> Result<Statement> {
        match &**query.node() {
            QueryAst::Update { .. } => self.compile_update(query.node()),
            QueryAst::Delete { .. } => self.compile_delete(query.node()),
            QueryAst::Insert { table, rows } => {
                let mut statements = self.compile_insert(table, rows, true)?;
                statements.pop().ok_or_else(|| {
                    Error::compile("INSERT requires at least one row".to_string())
                })
            }
            _ => self.compile_select(query.node()),
        }
    }

    fn compile_select(&self, node: &Arc<QueryAst>) -> Result<Statement> {
        let mut parts = SelectParts {
            from: None,
            filters: Vec::new(),
            projection: None,
            aggregate: None,
            table_count: 0,
        };
        gather_select(node, &mut parts)?;
        let Some(from) = &parts.from else {
            return Err(Error::compile("query has no row source"));
        };
        let qualify = parts.table_count > 1;
        let mut sql = String::with_capacity(256);
        let mut params = Vec::new();
        sql.push_str("SELECT ");
        if let Some(aggregate) = parts.aggregate {
            self.write_expression(&mut sql, &mut params, aggregate, qualify);
        } else if let Some(columns) = parts.projection {
            separated_by(
                &mut sql,
                columns,
                |out, column| self.write_expression(out, &mut params, column, qualify),
                ", ",
            );
        } else {
            sql.push('*');
        }
        sql.push_str("\nFROM ");
        write_from(self.as_dyn(), &mut sql, &mut params, from);
        self.write_where(&mut sql, &mut params, &parts.filters, qualify);
        sql.push(';');
        let (labels, shape) = node.output();
        Ok(Statement::new(sql, params, labels.into(), shape.into()))
    }

    /// WHERE clause as the conjunction of `filters`, application order.
    fn write_where(
        &self,
        out: &mut String,
        params: &mut Vec<Value>,
        filters: &[&Expr],
        qualify: bool,
    ) {
        if filters.is_empty() {
            return;
        }
        out.push_str("\nWHERE ");
        let precedence = self.binary_op_precedence(&BinaryOpType::And);
        separated_by(
            out,
            filters,
            |out, filter| {
                possibly_parenthesized!(
                    out,
                    self.expression_precedence(filter) < precedence,
                    self.write_expression(out, params, filter, qualify)
                );
            },
            " AND ",
        );
    }

    fn compile_update(&self, node: &Arc<QueryAst>) -> Result<Statement> {
        let QueryAst::Update {
            source,
            assignments,
        } = &**node
        else {
            return Err(Error::compile("expected an UPDATE node"));
        };
        let mut filters = Vec::new();
        let table = gather_write_target(source, &mut filters)?;
        let mut sql = String::with_capacity(256);
        let mut params = Vec::new();
        sql.push_str("UPDATE ");
        self.write_identifier_quoted(&mut sql, &table.name);
        sql.push_str(" SET ");
        separated_by(
            &mut sql,
            assignments,
            |out, (column, expr)| {
                self.write_identifier_quoted(out, column.name());
                out.push_str(" = ");
                self.write_expression(out, &mut params, expr, false);
            },
            ", ",
        );
        self.write_where(&mut sql, &mut params, &filters, false);
        sql.push(';');
        Ok(Statement::new(sql, params, Arc::new([]), Arc::new([])))
    }

    fn compile_delete(&self, node: &Arc<QueryAst>) -> Result<Statement> {
        let QueryAst::Delete { source } = &**node else {
            return Err(Error::compile("expected a DELETE node"));
        };
        let mut filters = Vec::new();
        let table = gather_write_target(source, &mut filters)?;
        let mut sql = String::with_capacity(128);
        let mut params = Vec::new();
        sql.push_str("DELETE FROM ");
        self.write_identifier_quoted(&mut sql, &table.name);
        self.write_where(&mut sql, &mut params, &filters, false);
        sql.push(';');
        Ok(Statement::new(sql, params, Arc::new([]), Arc::new([])))
    }

    /// Lower an insert. With `multi_values` all rows go into one multi-row
    /// VALUES statement; otherwise one single-row statement is produced per
    /// row, rebinding the same text. Row order is preserved either way.
    fn compile_insert(
        &self,
        table: &Arc<TableDef>,
        rows: &[Vec<Value>],
        multi_values: bool,
    ) -> Result<Vec<Statement>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = String::with_capacity(256);
        sql.push_str("INSERT INTO ");
        self.write_identifier_quoted(&mut sql, &table.name);
        sql.push_str(" (");
        separated_by(
            &mut sql,
            &table.columns,
            |out, column| self.write_identifier_quoted(out, &column.name),
            ", ",
        );
        sql.push_str(") VALUES\n");
        let mut row_text = String::with_capacity(table.columns.len() * 3 + 2);
        row_text.push('(');
        separated_by(
            &mut row_text,
            &table.columns,
            |out, _| out.push('?'),
            ", ",
        );
        row_text.push(')');
        if multi_values {
            separated_by(
                &mut sql,
                rows,
                |out, _| out.push_str(&row_text),
                ",\n",
            );
            sql.push(';');
            let params = rows.iter().flat_map(|row| row.iter().cloned()).collect();
            return Ok(vec![Statement::new(sql, params, Arc::new([]), Arc::new([]))]);
        }
        sql.push_str(&row_text);
        sql.push(';');
        let template = Statement::new(
            sql,
            rows[0].clone(),
            Arc::new([]),
            Arc::new([]),
        );
        Ok(rows
            .iter()
            .map(|row| template.rebind(row.clone()))
            .collect())
    }

    fn write_create_table(&self, out: &mut String, table: &TableDef, if_not_exists: bool) {
        out.push_str("CREATE TABLE ");
        if if_not_exists {
            out.push_str("IF NOT EXISTS ");
        }
        self.write_identifier_quoted(out, &table.name);
        out.push_str(" (\n");
        let single_pk = table.primary_key_columns().count() == 1;
        separated_by(
            out,
            &table.columns,
            |out, column| {
                self.write_identifier_quoted(out, &column.name);
                out.push(' ');
                self.write_column_type(out, &column.value);
                if !column.nullable && !column.primary_key {
                    out.push_str(" NOT NULL");
                }
                if column.primary_key && single_pk {
                    out.push_str(" PRIMARY KEY");
                }
                if column.unique && !column.primary_key {
                    out.push_str(" UNIQUE");
                }
            },
            ",\n",
        );
        if !single_pk && table.primary_key_columns().count() > 1 {
            out.push_str(",\nPRIMARY KEY (");
            separated_by(
                out,
                table.primary_key_columns(),
                |out, column| self.write_identifier_quoted(out, &column.name),
                ", ",
            );
            out.push(')');
        }
        for fk in &table.foreign_keys {
            out.push_str(",\nFOREIGN KEY (");
            separated_by(
                out,
                &fk.columns,
                |out, column| self.write_identifier_quoted(out, column),
                ", ",
            );
            out.push_str(") REFERENCES ");
            self.write_identifier_quoted(out, &fk.table);
            out.push('(');
            separated_by(
                out,
                &fk.references,
                |out, column| self.write_identifier_quoted(out, column),
                ", ",
            );
            out.push(')');
        }
        out.push_str("\n);");
    }

    fn write_drop_table(&self, out: &mut String, table: &TableDef, if_exists: bool) {
        out.push_str("DROP TABLE ");
        if if_exists {
            out.push_str("IF EXISTS ");
        }
        self.write_identifier_quoted(out, &table.name);
        out.push(';');
    }

    fn write_create_index(&self, out: &mut String, table: &TableDef, index: usize) {
        let index = &table.indexes[index];
        out.push_str(if index.unique {
            "CREATE UNIQUE INDEX "
        } else {
            "CREATE INDEX "
        });
        self.write_identifier_quoted(out, &index.name);
        out.push_str(" ON ");
        self.write_identifier_quoted(out, &table.name);
        out.push_str(" (");
        separated_by(
            out,
            &index.columns,
            |out, column| self.write_identifier_quoted(out, column),
            ", ",
        );
        out.push_str(");");
    }

    fn write_drop_index(&self, out: &mut String, table: &TableDef, index: usize) {
        out.push_str("DROP INDEX IF EXISTS ");
        self.write_identifier_quoted(out, &table.indexes[index].name);
        out.push(';');
    }

    /// DDL for a set of tables, creation honoring foreign-key dependency
    /// order: dependents after dependencies, indexes after their table.
    fn create_statements(&self, tables: &[Table], if_not_exists: bool) -> Result<Vec<Statement>> {
        let ordered = creation_order(tables)?;
        let mut statements = Vec::new();
        for table in &ordered {
            let mut sql = String::with_capacity(256);
            self.write_create_table(&mut sql, table.def(), if_not_exists);
            statements.push(Statement::raw(sql));
            for index in 0..table.def().indexes.len() {
                let mut sql = String::with_capacity(128);
                self.write_create_index(&mut sql, table.def(), index);
                statements.push(Statement::raw(sql));
            }
        }
        Ok(statements)
    }

    /// Drop statements for a set of tables, reverse creation order.
    fn drop_statements(&self, tables: &[Table], if_exists: bool) -> Result<Vec<Statement>> {
        let ordered = creation_order(tables)?;
        let mut statements = Vec::new();
        for table in ordered.iter().rev() {
            for index in 0..table.def().indexes.len() {
                let mut sql = String::with_capacity(64);
                self.write_drop_index(&mut sql, table.def(), index);
                statements.push(Statement::raw(sql));
            }
            let mut sql = String::with_capacity(64);
            self.write_drop_table(&mut sql, table.def(), if_exists);
            statements.push(Statement::raw(sql));
        }
        Ok(statements)
    }
}

fn write_from(writer: &dyn SqlWriter, out: &mut String, params: &mut Vec<Value>, item: &FromItem) {
    match item {
        FromItem::Table(table) => writer.write_identifier_quoted(out, &table.name),
        FromItem::Join { lhs, rhs, kind, on } => {
            write_from(writer, out, params, lhs);
            out.push(' ');
            writer.write_join_kind(out, kind);
            out.push(' ');
            write_from(writer, out, params, rhs);
            if let Some(on) = on {
                out.push_str(" ON ");
                writer.write_expression(out, params, on, true);
            }
        }
    }
}

fn gather_select<'a>(node: &'a QueryAst, parts: &mut SelectParts<'a>) -> Result<()> {
    match node {
        QueryAst::Aggregate { source, expr } => {
            if parts.aggregate.is_some() || parts.projection.is_some() {
                return Err(Error::compile(
                    "only one aggregate or projection is supported per query",
                ));
            }
            parts.aggregate = Some(expr);
            gather_select(source, parts)
        }
        QueryAst::Project { source, columns } => {
            if parts.aggregate.is_some() || parts.projection.is_some() {
                return Err(Error::compile(
                    "only one aggregate or projection is supported per query",
                ));
            }
            parts.projection = Some(columns);
            gather_select(source, parts)
        }
        QueryAst::Filter { source, predicate } => {
            gather_select(source, parts)?;
            parts.filters.push(predicate);
            Ok(())
        }
        QueryAst::Scan { .. } | QueryAst::Join { .. } => {
            parts.from = Some(gather_from(node, &mut parts.filters, &mut parts.table_count)?);
            Ok(())
        }
        QueryAst::Update { .. } | QueryAst::Delete { .. } | QueryAst::Insert { .. } => {
            Err(Error::compile("write statements are not a row source"))
        }
    }
}

fn gather_from<'a>(
    node: &'a QueryAst,
    filters: &mut Vec<&'a Expr>,
    table_count: &mut usize,
) -> Result<FromItem<'a>> {
    match node {
        QueryAst::Scan { table } => {
            *table_count += 1;
            Ok(FromItem::Table(table))
        }
        QueryAst::Filter { source, predicate } => {
            let item = gather_from(source, filters, table_count)?;
            filters.push(predicate);
            Ok(item)
        }
        QueryAst::Join { lhs, rhs, kind, on } => {
            let lhs = gather_from(lhs, filters, table_count)?;
            let rhs = gather_from(rhs, filters, table_count)?;
            Ok(FromItem::Join {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                kind: *kind,
                on: on.as_ref(),
            })
        }
        _ => Err(Error::compile(
            "projections and aggregates cannot appear under a join",
        )),
    }
}

/// The single table an UPDATE/DELETE targets plus its filter conjunction.
fn gather_write_target<'a>(
    node: &'a QueryAst,
    filters: &mut Vec<&'a Expr>,
) -> Result<&'a Arc<TableDef>> {
    match node {
        QueryAst::Scan { table } => Ok(table),
        QueryAst::Filter { source, predicate } => {
            let table = gather_write_target(source, filters)?;
            filters.push(predicate);
            Ok(table)
        }
        _ => Err(Error::compile(
            "UPDATE/DELETE must target a Scan or Filter over exactly one table",
        )),
    }
}

/// Default dialect implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericSqlWriter;

impl GenericSqlWriter {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqlWriter for GenericSqlWriter {
    fn as_dyn(&self) -> &dyn SqlWriter {
        self
    }
}
