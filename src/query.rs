use crate::{Column, Error, Expr, Result, Table, TableDef, Value};
use std::sync::Arc;

/// Immutable relational-operator tree. Combinators on [`Query`] produce new
/// nodes wrapping the old ones; structural sharing through `Arc` keeps the
/// originals reusable.
#[derive(Debug)]
pub enum QueryAst {
    Scan {
        table: Arc<TableDef>,
    },
    Filter {
        source: Arc<QueryAst>,
        predicate: Expr,
    },
    Project {
        source: Arc<QueryAst>,
        columns: Vec<Expr>,
    },
    Join {
        lhs: Arc<QueryAst>,
        rhs: Arc<QueryAst>,
        kind: JoinKind,
        on: Option<Expr>,
    },
    Aggregate {
        source: Arc<QueryAst>,
        expr: Expr,
    },
    Update {
        source: Arc<QueryAst>,
        assignments: Vec<(Column, Expr)>,
    },
    Delete {
        source: Arc<QueryAst>,
    },
    Insert {
        table: Arc<TableDef>,
        rows: Vec<Vec<Value>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JoinKind {
    Inner,
    Cross,
}

impl QueryAst {
    /// Names of all tables this tree reads from.
    pub fn tables(&self) -> Vec<String> {
        let mut result = Vec::new();
        self.collect_tables(&mut result);
        result
    }

    fn collect_tables(&self, out: &mut Vec<String>) {
        match self {
            QueryAst::Scan { table } | QueryAst::Insert { table, .. } => {
                if !out.contains(&table.name) {
                    out.push(table.name.clone());
                }
            }
            QueryAst::Filter { source, .. }
            | QueryAst::Project { source, .. }
            | QueryAst::Aggregate { source, .. }
            | QueryAst::Update { source, .. }
            | QueryAst::Delete { source } => source.collect_tables(out),
            QueryAst::Join { lhs, rhs, .. } => {
                lhs.collect_tables(out);
                rhs.collect_tables(out);
            }
        }
    }

    /// Whether executing this node produces rows (as opposed to a count).
    pub fn returns_rows(&self) -> bool {
        !matches!(
            self,
            QueryAst::Update { .. } | QueryAst::Delete { .. } | QueryAst::Insert { .. }
        )
    }

    /// Output shape: ordered labels and type tags, fully determined by the
    /// inputs of each node.
    pub fn output(&self) -> (Vec<String>, Vec<Value>) {
        match self {
            QueryAst::Scan { table } => (
                table.columns.iter().map(|c| c.name.clone()).collect(),
                table.columns.iter().map(|c| c.value.empty_of()).collect(),
            ),
            QueryAst::Filter { source, .. } => source.output(),
            QueryAst::Project { columns, .. } => {
                // computed expressions share a generic label; suffix repeats
                // so positional labels stay unique
                let mut labels: Vec<String> = Vec::with_capacity(columns.len());
                for column in columns {
                    let base = column.label();
                    let mut label = base.clone();
                    let mut n = 1;
                    while labels.contains(&label) {
                        n += 1;
                        label = format!("{base}_{n}");
                    }
                    labels.push(label);
                }
                (labels, columns.iter().map(Expr::value_type).collect())
            }
            QueryAst::Join { lhs, rhs, .. } => {
                let (mut labels, mut shape) = lhs.output();
                let (rhs_labels, rhs_shape) = rhs.output();
                labels.extend(rhs_labels);
                shape.extend(rhs_shape);
                (labels, shape)
            }
            QueryAst::Aggregate { expr, .. } => (vec![expr.label()], vec![expr.value_type()]),
            QueryAst::Update { .. } | QueryAst::Delete { .. } | QueryAst::Insert { .. } => {
                (Vec::new(), Vec::new())
            }
        }
    }

    /// The single table a write statement targets: the node must be a
    /// `Scan` or a chain of `Filter`s over one.
    pub fn single_target(&self) -> Result<&Arc<TableDef>> {
        match self {
            QueryAst::Scan { table } => Ok(table),
            QueryAst::Filter { source, .. } => source.single_target(),
            _ => Err(Error::construct(
                "UPDATE/DELETE must target a Scan or Filter over exactly one table",
            )),
        }
    }
}

/// Fluent builder over [`QueryAst`] mirroring relational algebra.
#[derive(Debug, Clone)]
pub struct Query {
    node: Arc<QueryAst>,
}

impl Query {
    pub fn scan(table: &Table) -> Query {
        Query {
            node: Arc::new(QueryAst::Scan {
                table: table.def().clone(),
            }),
        }
    }

    pub fn node(&self) -> &Arc<QueryAst> {
        &self.node
    }

    fn wrap(node: QueryAst) -> Query {
        Query {
            node: Arc::new(node),
        }
    }

    fn check_writable_source(&self, operation: &str) -> Result<()> {
        if !self.node.returns_rows() {
            return Err(Error::construct(format!(
                "cannot apply {operation} to a write statement"
            )));
        }
        Ok(())
    }

    /// Every column referenced by the predicate must resolve against the
    /// source's tables; free references are a construction error.
    fn check_resolved(&self, expr: &Expr) -> Result<()> {
        let tables = self.node.tables();
        for column in expr.columns() {
            if !tables.iter().any(|t| t == column.table_name()) {
                return Err(Error::construct(format!(
                    "column `{}`.`{}` does not belong to this query's sources",
                    column.table_name(),
                    column.name()
                )));
            }
        }
        Ok(())
    }

    /// Restrict the rows by a boolean predicate. Repeated filters compose
    /// with logical AND in application order. The first filter over a cross
    /// pair becomes the join predicate of a canonical inner join, so the
    /// sequential-binding style normalizes to the same AST as `join`.
    pub fn filter(&self, predicate: Expr) -> Result<Query> {
        self.check_writable_source("filter")?;
        if !predicate.value_type().same_type(&Value::Boolean(None)) {
            return Err(Error::construct(format!(
                "filter predicate must be boolean, found {}",
                predicate.value_type().type_name()
            )));
        }
        self.check_resolved(&predicate)?;
        if let QueryAst::Join {
            lhs,
            rhs,
            kind: JoinKind::Cross,
            on: None,
        } = &*self.node
        {
            return Ok(Query::wrap(QueryAst::Join {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
                kind: JoinKind::Inner,
                on: Some(predicate),
            }));
        }
        Ok(Query::wrap(QueryAst::Filter {
            source: self.node.clone(),
            predicate,
        }))
    }

    /// Project the output columns in declaration order. A single aggregate
    /// expression normalizes to an `Aggregate` node; mixing aggregate and
    /// plain columns without grouping is a construction error.
    pub fn select(&self, columns: impl IntoIterator<Item = Expr>) -> Result<Query> {
        self.check_writable_source("select")?;
        let columns: Vec<Expr> = columns.into_iter().collect();
        if columns.is_empty() {
            return Err(Error::construct("projection cannot be empty"));
        }
        for column in &columns {
            self.check_resolved(column)?;
        }
        let aggregates = columns.iter().filter(|c| c.is_aggregate()).count();
        if aggregates > 0 {
            if columns.len() > 1 {
                return Err(Error::construct(
                    "aggregate and non-aggregate output columns cannot be mixed without grouping",
                ));
            }
            let mut columns = columns;
            return Ok(Query::wrap(QueryAst::Aggregate {
                source: self.node.clone(),
                expr: columns.remove(0),
            }));
        }
        Ok(Query::wrap(QueryAst::Project {
            source: self.node.clone(),
            columns,
        }))
    }

    fn join_with(&self, other: &Query, kind: JoinKind, on: Option<Expr>) -> Result<Query> {
        self.check_writable_source("join")?;
        other.check_writable_source("join")?;
        let lhs_tables = self.node.tables();
        let rhs_tables = other.node.tables();
        if let Some(shared) = lhs_tables.iter().find(|t| rhs_tables.contains(t)) {
            return Err(Error::construct(format!(
                "both join sides reference table `{shared}`"
            )));
        }
        Ok(Query::wrap(QueryAst::Join {
            lhs: self.node.clone(),
            rhs: other.node.clone(),
            kind,
            on,
        }))
    }

    /// Direct join: `join ... on` producing the canonical inner join node.
    pub fn join(&self, other: &Query, on: Expr) -> Result<Query> {
        if !on.value_type().same_type(&Value::Boolean(None)) {
            return Err(Error::construct(format!(
                "join predicate must be boolean, found {}",
                on.value_type().type_name()
            )));
        }
        let joined = self.join_with(other, JoinKind::Inner, None)?;
        joined.check_resolved(&on)?;
        let QueryAst::Join { lhs, rhs, kind, .. } = &*joined.node else {
            unreachable!("join_with always produces a Join node");
        };
        Ok(Query::wrap(QueryAst::Join {
            lhs: lhs.clone(),
            rhs: rhs.clone(),
            kind: *kind,
            on: Some(on),
        }))
    }

    /// Sequential-binding join: iterate `self`, then for each row iterate
    /// `other`. A following `filter` referencing both sides turns the pair
    /// into the same canonical inner join `join` produces.
    pub fn cross(&self, other: &Query) -> Result<Query> {
        self.join_with(other, JoinKind::Cross, None)
    }

    /// Single aggregate over the whole result.
    pub fn aggregate(&self, expr: Expr) -> Result<Query> {
        self.check_writable_source("aggregate")?;
        if !expr.is_aggregate() {
            return Err(Error::construct(
                "aggregate combinator requires an aggregate expression",
            ));
        }
        self.check_resolved(&expr)?;
        Ok(Query::wrap(QueryAst::Aggregate {
            source: self.node.clone(),
            expr,
        }))
    }

    pub fn min(&self, column: &Column) -> Result<Query> {
        self.aggregate(column.min())
    }
    pub fn max(&self, column: &Column) -> Result<Query> {
        self.aggregate(column.max())
    }
    pub fn sum(&self, column: &Column) -> Result<Query> {
        self.aggregate(column.sum()?)
    }
    pub fn avg(&self, column: &Column) -> Result<Query> {
        self.aggregate(column.avg()?)
    }
    pub fn count(&self, column: &Column) -> Result<Query> {
        self.aggregate(column.count())
    }
    pub fn count_all(&self) -> Result<Query> {
        self.aggregate(crate::count_all())
    }

    /// Update the rows this query selects. The source must be a `Scan` or a
    /// chain of `Filter`s over exactly one table.
    pub fn update(&self, assignments: impl IntoIterator<Item = (Column, Expr)>) -> Result<Query> {
        let table = self.node.single_target()?.clone();
        let assignments: Vec<(Column, Expr)> = assignments.into_iter().collect();
        if assignments.is_empty() {
            return Err(Error::construct("UPDATE requires at least one assignment"));
        }
        for (column, expr) in &assignments {
            if column.table_name() != table.name {
                return Err(Error::construct(format!(
                    "cannot assign column `{}` of table `{}` in an UPDATE of `{}`",
                    column.name(),
                    column.table_name(),
                    table.name
                )));
            }
            if expr.is_aggregate() {
                return Err(Error::construct(
                    "aggregate expressions cannot appear in an assignment",
                ));
            }
            // the assigned value may only read the target table's columns
            self.check_resolved(expr)?;
            let (ct, et) = (column.value_type(), expr.value_type());
            if !et.is_none() && !ct.comparable_with(&et) {
                return Err(Error::construct(format!(
                    "cannot assign {} to column `{}` of type {}",
                    et.type_name(),
                    column.name(),
                    ct.type_name()
                )));
            }
        }
        Ok(Query::wrap(QueryAst::Update {
            source: self.node.clone(),
            assignments,
        }))
    }

    /// Delete the rows this query selects, same source restriction as
    /// [`Query::update`].
    pub fn delete(&self) -> Result<Query> {
        self.node.single_target()?;
        Ok(Query::wrap(QueryAst::Delete {
            source: self.node.clone(),
        }))
    }

    /// Insert full rows in declaration order, single or batch.
    pub fn insert(table: &Table, rows: Vec<Vec<Value>>) -> Result<Query> {
        if rows.is_empty() {
            return Err(Error::construct("INSERT requires at least one row"));
        }
        validate_insert_rows(table.def(), &rows)?;
        Ok(Query::wrap(QueryAst::Insert {
            table: table.def().clone(),
            rows,
        }))
    }
}

/// Each row must match the table's column list positionally: arity, type and
/// nullability are checked at construction time.
pub(crate) fn validate_insert_rows(table: &Arc<TableDef>, rows: &[Vec<Value>]) -> Result<()> {
    for row in rows {
        if row.len() != table.columns.len() {
            return Err(Error::construct(format!(
                "table `{}` expects {} values per row, found {}",
                table.name,
                table.columns.len(),
                row.len()
            )));
        }
        for (value, column) in row.iter().zip(&table.columns) {
            if value.is_none() {
                if !column.nullable {
                    return Err(Error::construct(format!(
                        "column `{}` of table `{}` is not nullable",
                        column.name, table.name
                    )));
                }
            } else if !column.value.comparable_with(value) {
                return Err(Error::construct(format!(
                    "cannot insert {} into column `{}` of type {}",
                    value.type_name(),
                    column.name,
                    column.value.type_name()
                )));
            }
        }
    }
    Ok(())
}
