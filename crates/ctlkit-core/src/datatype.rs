//! DataType catalog
//!
//! The finite set of scalar kinds an attribute may hold. Each kind carries its default
//! (zero / false) and, for booleans, a pair of display labels. [`Value`] is the
//! type-erased carrier used wherever the concrete attribute type is not known
//! (handlers, backends, put methods), and [`AttrValue`] ties the Rust types
//! `i64`, `f64` and `bool` to their catalog entry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CtlError, CtlResult};

/// Default number of decimals shown for floating-point attributes.
pub const DEFAULT_FLOAT_PRECISION: u32 = 2;

/// Scalar value kind of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataType {
    /// Signed integer, default 0.
    Int,
    /// Floating point, default 0.0. `prec` is the display precision.
    Float {
        /// Decimals shown by backends.
        prec: u32,
    },
    /// Boolean, default false.
    Bool {
        /// Label for `false`.
        znam: String,
        /// Label for `true`.
        onam: String,
    },
}

impl DataType {
    /// Integer dtype.
    pub fn int() -> Self {
        DataType::Int
    }

    /// Float dtype with the default precision.
    pub fn float() -> Self {
        DataType::Float {
            prec: DEFAULT_FLOAT_PRECISION,
        }
    }

    /// Float dtype with an explicit display precision.
    pub fn float_with_prec(prec: u32) -> Self {
        DataType::Float { prec }
    }

    /// Boolean dtype labelled "OFF"/"ON".
    pub fn bool() -> Self {
        Self::bool_with_labels("OFF", "ON")
    }

    /// Boolean dtype with custom labels.
    pub fn bool_with_labels(znam: impl Into<String>, onam: impl Into<String>) -> Self {
        DataType::Bool {
            znam: znam.into(),
            onam: onam.into(),
        }
    }

    /// Canonical name of the kind ("int", "float", "bool").
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Int => "int",
            DataType::Float { .. } => "float",
            DataType::Bool { .. } => "bool",
        }
    }

    /// The value a freshly bound attribute of this dtype holds.
    pub fn default_value(&self) -> Value {
        match self {
            DataType::Int => Value::Int(0),
            DataType::Float { .. } => Value::Float(0.0),
            DataType::Bool { .. } => Value::Bool(false),
        }
    }

    /// Display precision, for floats only.
    pub fn precision(&self) -> Option<u32> {
        match self {
            DataType::Float { prec } => Some(*prec),
            _ => None,
        }
    }

    /// `(false, true)` labels, for booleans only.
    pub fn labels(&self) -> Option<(&str, &str)> {
        match self {
            DataType::Bool { znam, onam } => Some((znam.as_str(), onam.as_str())),
            _ => None,
        }
    }

    /// Coerce `value` into this dtype.
    pub fn coerce(&self, value: Value) -> CtlResult<Value> {
        match self {
            DataType::Int => i64::coerce(value).map(Value::Int),
            DataType::Float { .. } => f64::coerce(value).map(Value::Float),
            DataType::Bool { .. } => bool::coerce(value).map(Value::Bool),
        }
    }
}

impl FromStr for DataType {
    type Err = CtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(DataType::int()),
            "float" | "double" => Ok(DataType::float()),
            "bool" | "boolean" => Ok(DataType::bool()),
            other => Err(CtlError::Configuration(format!(
                "unsupported attribute dtype '{}': expected one of int, float, bool",
                other
            ))),
        }
    }
}

/// Type-erased scalar.
///
/// `Text` carries a raw, unparsed device response; it only ever appears as an input to
/// coercion and is never stored in an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// Unparsed text, e.g. a device response line.
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Rust types that can back an [`Attribute`](crate::attribute::Attribute).
pub trait AttrValue: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Whether `dtype` is the catalog entry for this type.
    fn matches(dtype: &DataType) -> bool;

    /// Convert an arbitrary value into this type.
    fn coerce(value: Value) -> CtlResult<Self>;

    /// Wrap into the type-erased carrier.
    fn into_value(self) -> Value;

    /// The dtype default.
    fn zero() -> Self;
}

impl AttrValue for i64 {
    fn matches(dtype: &DataType) -> bool {
        matches!(dtype, DataType::Int)
    }

    fn coerce(value: Value) -> CtlResult<Self> {
        match value {
            Value::Int(v) => Ok(v),
            Value::Float(v) => truncate(v),
            Value::Bool(v) => Ok(i64::from(v)),
            Value::Text(s) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(v) => Ok(v),
                    Err(_) => s
                        .parse::<f64>()
                        .map_err(|_| CtlError::Value(format!("cannot convert '{}' to int", s)))
                        .and_then(truncate),
                }
            }
        }
    }

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn zero() -> Self {
        0
    }
}

impl AttrValue for f64 {
    fn matches(dtype: &DataType) -> bool {
        matches!(dtype, DataType::Float { .. })
    }

    fn coerce(value: Value) -> CtlResult<Self> {
        match value {
            Value::Int(v) => Ok(v as f64),
            Value::Float(v) => Ok(v),
            Value::Bool(v) => Ok(if v { 1.0 } else { 0.0 }),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| CtlError::Value(format!("cannot convert '{}' to float", s.trim()))),
        }
    }

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn zero() -> Self {
        0.0
    }
}

impl AttrValue for bool {
    fn matches(dtype: &DataType) -> bool {
        matches!(dtype, DataType::Bool { .. })
    }

    fn coerce(value: Value) -> CtlResult<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::Int(v) => Ok(v != 0),
            Value::Float(v) if v.is_nan() => {
                Err(CtlError::Value("cannot convert NaN to bool".to_string()))
            }
            Value::Float(v) => Ok(v != 0.0),
            Value::Text(s) => parse_bool(s.trim()),
        }
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn zero() -> Self {
        false
    }
}

fn truncate(v: f64) -> CtlResult<i64> {
    // i64::MAX is not representable as f64; the exclusive bound is 2^63.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    let t = v.trunc();
    if t.is_finite() && t >= -LIMIT && t < LIMIT {
        Ok(t as i64)
    } else {
        Err(CtlError::Value(format!("cannot convert {} to int", v)))
    }
}

fn parse_bool(s: &str) -> CtlResult<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "y" | "yes" | "on" => Ok(true),
        "0" | "false" | "n" | "no" | "off" => Ok(false),
        other => match other.parse::<f64>() {
            Ok(v) if !v.is_nan() => Ok(v != 0.0),
            _ => Err(CtlError::Value(format!("cannot convert '{}' to bool", s))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_dtype_name() {
        let err = "string".parse::<DataType>().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("string"));
    }

    #[test]
    fn test_dtype_names_parse() {
        assert_eq!("int".parse::<DataType>().unwrap(), DataType::Int);
        assert_eq!("Float".parse::<DataType>().unwrap(), DataType::float());
        assert_eq!("boolean".parse::<DataType>().unwrap(), DataType::bool());
    }

    #[test]
    fn test_defaults_and_labels() {
        assert_eq!(DataType::int().default_value(), Value::Int(0));
        assert_eq!(DataType::float().default_value(), Value::Float(0.0));
        assert_eq!(DataType::bool().default_value(), Value::Bool(false));
        assert_eq!(DataType::bool().labels(), Some(("OFF", "ON")));
        assert_eq!(
            DataType::bool_with_labels("Off", "On").labels(),
            Some(("Off", "On"))
        );
        assert_eq!(DataType::float_with_prec(3).precision(), Some(3));
        assert_eq!(DataType::int().labels(), None);
    }

    #[test]
    fn test_int_truncates() {
        assert_eq!(i64::coerce(Value::Float(3.9)).unwrap(), 3);
        assert_eq!(i64::coerce(Value::Float(-3.9)).unwrap(), -3);
        assert_eq!(i64::coerce(Value::Text("12.7\r\n".into())).unwrap(), 12);
        assert_eq!(i64::coerce(Value::Bool(true)).unwrap(), 1);
        assert!(i64::coerce(Value::Float(f64::INFINITY)).unwrap_err().is_value());
        assert!(i64::coerce(Value::Text("abc".into())).unwrap_err().is_value());
    }

    #[test]
    fn test_float_passes_through() {
        assert_eq!(f64::coerce(Value::Float(1.25)).unwrap(), 1.25);
        assert_eq!(f64::coerce(Value::Int(4)).unwrap(), 4.0);
        assert_eq!(f64::coerce(Value::Text(" 2.5 ".into())).unwrap(), 2.5);
        assert!(f64::coerce(Value::Text("warm".into())).is_err());
    }

    #[test]
    fn test_bool_mapping() {
        assert!(bool::coerce(Value::Int(1)).unwrap());
        assert!(!bool::coerce(Value::Int(0)).unwrap());
        assert!(bool::coerce(Value::Text("Y".into())).unwrap());
        assert!(!bool::coerce(Value::Text("False".into())).unwrap());
        assert!(bool::coerce(Value::Text("maybe".into())).unwrap_err().is_value());
        assert!(bool::coerce(Value::Float(f64::NAN)).is_err());
    }

    #[test]
    fn test_dtype_coerce() {
        assert_eq!(
            DataType::bool().coerce(Value::Int(1)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            DataType::int().coerce(Value::Float(7.5)).unwrap(),
            Value::Int(7)
        );
    }
}
