use crate::{AsValue, Column, Error, Result, Value};

/// A node of the closed expression tree built by the column combinators.
///
/// Every constructor type-checks its operands, so a tree that was built
/// successfully cannot produce a column-type mismatch at execution time.
#[derive(Debug, Clone)]
pub enum Expr {
    Column(Column),
    Literal(Value),
    Unary {
        op: UnaryOpType,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOpType,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        value: Value,
    },
    Aggregate {
        func: AggregateFn,
        expr: Box<Expr>,
    },
    Asterisk,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOpType {
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOpType {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateFn {
    Min,
    Max,
    Sum,
    Count,
    Avg,
}

impl AggregateFn {
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::Avg => "AVG",
        }
    }
}

/// Conversion of values, columns and expressions into expression nodes.
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for &Expr {
    fn into_expr(self) -> Expr {
        self.clone()
    }
}

impl IntoExpr for Column {
    fn into_expr(self) -> Expr {
        Expr::Column(self)
    }
}

impl IntoExpr for &Column {
    fn into_expr(self) -> Expr {
        Expr::Column(self.clone())
    }
}

impl IntoExpr for &str {
    fn into_expr(self) -> Expr {
        Expr::Literal(Value::Varchar(Some(self.into())))
    }
}

impl<T: AsValue> IntoExpr for T {
    fn into_expr(self) -> Expr {
        Expr::Literal(self.as_value())
    }
}

impl Expr {
    /// The type this expression evaluates to, as an empty `Value`.
    pub fn value_type(&self) -> Value {
        match self {
            Expr::Column(column) => column.value_type(),
            Expr::Literal(value) => value.empty_of(),
            Expr::Unary { .. } => Value::Boolean(None),
            Expr::Binary { op, .. } => match op {
                BinaryOpType::Concat => Value::Varchar(None),
                _ => Value::Boolean(None),
            },
            Expr::Cast { value, .. } => value.empty_of(),
            Expr::Aggregate { func, expr } => match func {
                AggregateFn::Count => Value::Int64(None),
                AggregateFn::Avg => Value::Float64(None),
                _ => expr.value_type(),
            },
            Expr::Asterisk => Value::Null,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expr::Aggregate { .. })
    }

    /// A human readable label for the output column this expression produces.
    pub fn label(&self) -> String {
        match self {
            Expr::Column(column) => column.name().into(),
            Expr::Literal(..) => "literal".into(),
            Expr::Cast { expr, .. } => expr.label(),
            Expr::Aggregate { func, expr } => match expr.as_ref() {
                Expr::Asterisk => format!("{}(*)", func.sql_name().to_lowercase()),
                inner => format!("{}({})", func.sql_name().to_lowercase(), inner.label()),
            },
            Expr::Unary { .. } | Expr::Binary { .. } => "expr".into(),
            Expr::Asterisk => "*".into(),
        }
    }

    /// All column handles referenced by this tree.
    pub fn columns(&self) -> Vec<&Column> {
        let mut result = Vec::new();
        self.collect_columns(&mut result);
        result
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a Column>) {
        match self {
            Expr::Column(column) => out.push(column),
            Expr::Unary { expr, .. } | Expr::Cast { expr, .. } | Expr::Aggregate { expr, .. } => {
                expr.collect_columns(out)
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_columns(out);
                rhs.collect_columns(out);
            }
            Expr::Literal(..) | Expr::Asterisk => {}
        }
    }

    /// Explicit type coercion, always permitted.
    pub fn cast(self, value: Value) -> Expr {
        Expr::Cast {
            expr: Box::new(self),
            value: value.empty_of(),
        }
    }

    /// Logical conjunction, both operands must be boolean.
    pub fn and(self, rhs: impl IntoExpr) -> Result<Expr> {
        binary_logical(BinaryOpType::And, self, rhs.into_expr())
    }

    /// Logical disjunction, both operands must be boolean.
    pub fn or(self, rhs: impl IntoExpr) -> Result<Expr> {
        binary_logical(BinaryOpType::Or, self, rhs.into_expr())
    }

    pub fn not(self) -> Result<Expr> {
        if !self.value_type().same_type(&Value::Boolean(None)) {
            return Err(Error::construct(format!(
                "NOT requires a boolean operand, found {}",
                self.value_type().type_name()
            )));
        }
        Ok(Expr::Unary {
            op: UnaryOpType::Not,
            expr: Box::new(self),
        })
    }
}

fn reject_aggregate(expr: &Expr, position: &str) -> Result<()> {
    if expr.is_aggregate() {
        return Err(Error::construct(format!(
            "aggregate expressions cannot appear {position}"
        )));
    }
    Ok(())
}

fn binary_comparison(op: BinaryOpType, lhs: Expr, rhs: Expr) -> Result<Expr> {
    reject_aggregate(&lhs, "inside a predicate")?;
    reject_aggregate(&rhs, "inside a predicate")?;
    let (lt, rt) = (lhs.value_type(), rhs.value_type());
    if !lt.comparable_with(&rt) {
        return Err(Error::construct(format!(
            "cannot compare {} with {} without an explicit cast",
            lt.type_name(),
            rt.type_name()
        )));
    }
    Ok(Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

fn binary_logical(op: BinaryOpType, lhs: Expr, rhs: Expr) -> Result<Expr> {
    let boolean = Value::Boolean(None);
    for side in [&lhs, &rhs] {
        if !side.value_type().same_type(&boolean) {
            return Err(Error::construct(format!(
                "logical operators require boolean operands, found {}",
                side.value_type().type_name()
            )));
        }
    }
    Ok(Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

/// Coerce an operand of a concatenation to text through an explicit cast.
fn coerce_text(expr: Expr) -> Expr {
    if expr.value_type().same_type(&Value::Varchar(None)) {
        expr
    } else {
        expr.cast(Value::Varchar(None))
    }
}

impl Column {
    pub fn eq(&self, rhs: impl IntoExpr) -> Result<Expr> {
        binary_comparison(BinaryOpType::Equal, self.into_expr(), rhs.into_expr())
    }
    pub fn ne(&self, rhs: impl IntoExpr) -> Result<Expr> {
        binary_comparison(BinaryOpType::NotEqual, self.into_expr(), rhs.into_expr())
    }
    pub fn lt(&self, rhs: impl IntoExpr) -> Result<Expr> {
        binary_comparison(BinaryOpType::Less, self.into_expr(), rhs.into_expr())
    }
    pub fn le(&self, rhs: impl IntoExpr) -> Result<Expr> {
        binary_comparison(BinaryOpType::LessEqual, self.into_expr(), rhs.into_expr())
    }
    pub fn gt(&self, rhs: impl IntoExpr) -> Result<Expr> {
        binary_comparison(BinaryOpType::Greater, self.into_expr(), rhs.into_expr())
    }
    pub fn ge(&self, rhs: impl IntoExpr) -> Result<Expr> {
        binary_comparison(BinaryOpType::GreaterEqual, self.into_expr(), rhs.into_expr())
    }

    /// String concatenation, coercing non-text operands via explicit cast.
    pub fn concat(&self, rhs: impl IntoExpr) -> Result<Expr> {
        let rhs = rhs.into_expr();
        reject_aggregate(&rhs, "inside a concatenation")?;
        Ok(Expr::Binary {
            op: BinaryOpType::Concat,
            lhs: Box::new(coerce_text(self.into_expr())),
            rhs: Box::new(coerce_text(rhs)),
        })
    }

    /// Explicit type coercion of the column.
    pub fn cast(&self, value: Value) -> Expr {
        self.into_expr().cast(value)
    }

    pub fn min(&self) -> Expr {
        Expr::Aggregate {
            func: AggregateFn::Min,
            expr: Box::new(self.into_expr()),
        }
    }

    pub fn max(&self) -> Expr {
        Expr::Aggregate {
            func: AggregateFn::Max,
            expr: Box::new(self.into_expr()),
        }
    }

    pub fn count(&self) -> Expr {
        Expr::Aggregate {
            func: AggregateFn::Count,
            expr: Box::new(self.into_expr()),
        }
    }

    /// Sum over the column, numeric columns only.
    pub fn sum(&self) -> Result<Expr> {
        self.numeric_aggregate(AggregateFn::Sum)
    }

    /// Average over the column, numeric columns only.
    pub fn avg(&self) -> Result<Expr> {
        self.numeric_aggregate(AggregateFn::Avg)
    }

    fn numeric_aggregate(&self, func: AggregateFn) -> Result<Expr> {
        if !self.value_type().is_numeric() {
            return Err(Error::construct(format!(
                "{} requires a numeric column, `{}` is {}",
                func.sql_name(),
                self.name(),
                self.value_type().type_name()
            )));
        }
        Ok(Expr::Aggregate {
            func,
            expr: Box::new(self.into_expr()),
        })
    }
}

/// `COUNT(*)` over the whole result.
pub fn count_all() -> Expr {
    Expr::Aggregate {
        func: AggregateFn::Count,
        expr: Box::new(Expr::Asterisk),
    }
}
