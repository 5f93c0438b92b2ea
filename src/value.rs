use rust_decimal::Decimal;
use time::{Date, PrimitiveDateTime};
use uuid::Uuid;

/// Dynamically typed value used for query parameters and decoded rows.
///
/// A variant with a `None` payload doubles as the type tag of a column or
/// expression, so the same enum describes both schema metadata and runtime
/// data.
#[derive(Default, Debug, Clone)]
pub enum Value {
    #[default]
    Null,
    Boolean(Option<bool>),
    Int16(Option<i16>),
    Int32(Option<i32>),
    Int64(Option<i64>),
    Float64(Option<f64>),
    Decimal(Option<Decimal>, /* prec: */ u8, /* scale: */ u8),
    Varchar(Option<String>),
    Date(Option<Date>),
    Timestamp(Option<PrimitiveDateTime>),
    Uuid(Option<Uuid>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Boolean(l), Self::Boolean(r)) => l == r,
            (Self::Int16(l), Self::Int16(r)) => l == r,
            (Self::Int32(l), Self::Int32(r)) => l == r,
            (Self::Int64(l), Self::Int64(r)) => l == r,
            (Self::Float64(l), Self::Float64(r)) => l == r,
            (Self::Decimal(l, ..), Self::Decimal(r, ..)) => l == r,
            (Self::Varchar(l), Self::Varchar(r)) => l == r,
            (Self::Date(l), Self::Date(r)) => l == r,
            (Self::Timestamp(l), Self::Timestamp(r)) => l == r,
            (Self::Uuid(l), Self::Uuid(r)) => l == r,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl Value {
    pub fn same_type(&self, other: &Self) -> bool {
        core::mem::discriminant(self) == core::mem::discriminant(other)
    }

    /// Whether two types may appear on the two sides of a comparison without
    /// an explicit cast.
    pub fn comparable_with(&self, other: &Self) -> bool {
        self.same_type(other) || (self.is_numeric() && other.is_numeric())
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int16(..) | Self::Int32(..) | Self::Int64(..) | Self::Float64(..) | Self::Decimal(..)
        )
    }

    /// Whether the value carries no data (either `Null` or an empty payload).
    pub fn is_none(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Boolean(v) => v.is_none(),
            Self::Int16(v) => v.is_none(),
            Self::Int32(v) => v.is_none(),
            Self::Int64(v) => v.is_none(),
            Self::Float64(v) => v.is_none(),
            Self::Decimal(v, ..) => v.is_none(),
            Self::Varchar(v) => v.is_none(),
            Self::Date(v) => v.is_none(),
            Self::Timestamp(v) => v.is_none(),
            Self::Uuid(v) => v.is_none(),
        }
    }

    /// Same variant with the payload stripped, keeping decimal precision.
    pub fn empty_of(&self) -> Value {
        match self {
            Self::Null => Self::Null,
            Self::Boolean(..) => Self::Boolean(None),
            Self::Int16(..) => Self::Int16(None),
            Self::Int32(..) => Self::Int32(None),
            Self::Int64(..) => Self::Int64(None),
            Self::Float64(..) => Self::Float64(None),
            Self::Decimal(.., precision, scale) => Self::Decimal(None, *precision, *scale),
            Self::Varchar(..) => Self::Varchar(None),
            Self::Date(..) => Self::Date(None),
            Self::Timestamp(..) => Self::Timestamp(None),
            Self::Uuid(..) => Self::Uuid(None),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(..) => "boolean",
            Self::Int16(..) => "int16",
            Self::Int32(..) => "int32",
            Self::Int64(..) => "int64",
            Self::Float64(..) => "float64",
            Self::Decimal(..) => "decimal",
            Self::Varchar(..) => "varchar",
            Self::Date(..) => "date",
            Self::Timestamp(..) => "timestamp",
            Self::Uuid(..) => "uuid",
        }
    }
}
