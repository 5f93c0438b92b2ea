use crate::{Error, Result, Value};
use rust_decimal::{
    Decimal,
    prelude::{FromPrimitive, ToPrimitive},
};
use std::any;
use time::{Date, PrimitiveDateTime};
use uuid::Uuid;

/// Conversion between native Rust types and the dynamically typed [`Value`]
/// representation that backs query parameters and row decoding.
pub trait AsValue {
    /// An empty (NULL-like) value variant for this type, used as a type tag.
    fn as_empty_value() -> Value;
    /// Convert this value into its owned [`Value`] representation.
    fn as_value(self) -> Value;
    /// Attempt to convert a dynamic [`Value`] into `Self`. Accepts narrower
    /// numeric variants where the conversion is lossless.
    fn try_from_value(value: Value) -> Result<Self>
    where
        Self: Sized;
}

fn mismatch<T>(value: &Value) -> Error {
    Error::decode(format!(
        "cannot convert {} value into {}",
        value.type_name(),
        any::type_name::<T>(),
    ))
}

macro_rules! impl_as_value {
    ($source:ty, $into:path, |$value:ident| $try:expr $(,)?) => {
        impl AsValue for $source {
            fn as_empty_value() -> Value {
                $into(None)
            }
            fn as_value(self) -> Value {
                $into(Some(self))
            }
            fn try_from_value($value: Value) -> Result<Self> {
                $try
            }
        }
    };
}

impl_as_value!(bool, Value::Boolean, |value| match value {
    Value::Boolean(Some(v)) => Ok(v),
    _ => Err(mismatch::<Self>(&value)),
});

impl_as_value!(i16, Value::Int16, |value| match value {
    Value::Int16(Some(v)) => Ok(v),
    _ => Err(mismatch::<Self>(&value)),
});

impl_as_value!(i32, Value::Int32, |value| match value {
    Value::Int16(Some(v)) => Ok(v as i32),
    Value::Int32(Some(v)) => Ok(v),
    _ => Err(mismatch::<Self>(&value)),
});

impl_as_value!(i64, Value::Int64, |value| match value {
    Value::Int16(Some(v)) => Ok(v as i64),
    Value::Int32(Some(v)) => Ok(v as i64),
    Value::Int64(Some(v)) => Ok(v),
    _ => Err(mismatch::<Self>(&value)),
});

impl_as_value!(f64, Value::Float64, |value| match value {
    Value::Int16(Some(v)) => Ok(v as f64),
    Value::Int32(Some(v)) => Ok(v as f64),
    Value::Int64(Some(v)) => Ok(v as f64),
    Value::Float64(Some(v)) => Ok(v),
    Value::Decimal(Some(v), ..) => v.to_f64().ok_or_else(|| mismatch::<Self>(&Value::Decimal(Some(v), 0, 0))),
    _ => Err(mismatch::<Self>(&value)),
});

impl_as_value!(String, Value::Varchar, |value| match value {
    Value::Varchar(Some(v)) => Ok(v),
    _ => Err(mismatch::<Self>(&value)),
});

impl_as_value!(Date, Value::Date, |value| match value {
    Value::Date(Some(v)) => Ok(v),
    _ => Err(mismatch::<Self>(&value)),
});

impl_as_value!(PrimitiveDateTime, Value::Timestamp, |value| match value {
    Value::Timestamp(Some(v)) => Ok(v),
    _ => Err(mismatch::<Self>(&value)),
});

impl_as_value!(Uuid, Value::Uuid, |value| match value {
    Value::Uuid(Some(v)) => Ok(v),
    _ => Err(mismatch::<Self>(&value)),
});

impl AsValue for Decimal {
    fn as_empty_value() -> Value {
        Value::Decimal(None, 0, 0)
    }
    fn as_value(self) -> Value {
        Value::Decimal(Some(self), 0, 0)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Decimal(Some(v), ..) => Ok(v),
            Value::Int16(Some(v)) => Ok(Decimal::from(v)),
            Value::Int32(Some(v)) => Ok(Decimal::from(v)),
            Value::Int64(Some(v)) => Ok(Decimal::from(v)),
            Value::Float64(Some(v)) => {
                Decimal::from_f64(v).ok_or_else(|| mismatch::<Self>(&Value::Float64(Some(v))))
            }
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl<T: AsValue> AsValue for Option<T> {
    fn as_empty_value() -> Value {
        T::as_empty_value()
    }
    fn as_value(self) -> Value {
        match self {
            Some(v) => v.as_value(),
            None => T::as_empty_value(),
        }
    }
    fn try_from_value(value: Value) -> Result<Self> {
        if value.is_none() {
            Ok(None)
        } else {
            T::try_from_value(value).map(Some)
        }
    }
}

impl<T: AsValue> From<T> for Value {
    fn from(value: T) -> Self {
        value.as_value()
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Varchar(Some(value.into()))
    }
}
