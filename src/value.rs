// used for persistence of property values
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, TrellisError};

/// A property value as seen by callers: exactly one of integer, float or text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(String::from(v))
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}
impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Int(v) => Ok(ToSqlOutput::from(*v)),
            Value::Float(v) => Ok(ToSqlOutput::from(*v)),
            Value::Text(v) => Ok(ToSqlOutput::from(v.as_str())),
        }
    }
}
impl From<Value> for rusqlite::types::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Int(v) => rusqlite::types::Value::Integer(v),
            Value::Float(v) => rusqlite::types::Value::Real(v),
            Value::Text(v) => rusqlite::types::Value::Text(v),
        }
    }
}

/// The persisted form of a property value: three nullable slots, of which at
/// most one is set. Writing through [`FlexibleValue::set`] keeps that
/// invariant; reading applies a fixed first-non-null order.
///
/// The read order is **int → float → text**. On well-formed rows the order is
/// irrelevant (only one slot is ever set), but a hand-edited row with several
/// slots set must read back deterministically, so the order is part of the
/// contract and [`FlexibleValue::READ_EXPR`] compiles the same order into the
/// backing-store expression used by server-side filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlexibleValue {
    value_int: Option<i64>,
    value_float: Option<f64>,
    value_str: Option<String>,
}

/// The slot coalescing applied when a property value is read back inside the
/// backing store, to be qualified with a table alias via [`FlexibleValue::read_expr`].
const READ_EXPR: &str = "coalesce({a}.value_int, {a}.value_float, {a}.value_str)";

impl FlexibleValue {
    pub fn unset() -> Self {
        Self::default()
    }

    pub fn new(value: Value) -> Self {
        let mut flexible = Self::default();
        flexible.set(value);
        flexible
    }

    /// Store a value into its slot and clear the other two.
    pub fn set(&mut self, value: Value) {
        self.value_int = None;
        self.value_float = None;
        self.value_str = None;
        match value {
            Value::Int(v) => self.value_int = Some(v),
            Value::Float(v) => self.value_float = Some(v),
            Value::Text(v) => self.value_str = Some(v),
        }
    }

    /// First non-null slot in read order, or `None` when all slots are null.
    pub fn value(&self) -> Option<Value> {
        if let Some(v) = self.value_int {
            return Some(Value::Int(v));
        }
        if let Some(v) = self.value_float {
            return Some(Value::Float(v));
        }
        self.value_str.clone().map(Value::Text)
    }

    /// The three slots in declaration order, for binding insert parameters.
    pub fn slots(&self) -> (Option<i64>, Option<f64>, Option<&str>) {
        (self.value_int, self.value_float, self.value_str.as_deref())
    }

    /// The backing-store expression reproducing the read order for a property
    /// table aliased as `alias`.
    pub fn read_expr(alias: &str) -> String {
        READ_EXPR.replace("{a}", alias)
    }

    /// Decode the three slot columns from a backing-store row, starting at
    /// `first`. A slot holding an unexpected storage class is a type error.
    pub fn from_row(row: &rusqlite::Row, first: usize) -> Result<Self> {
        let value_int = match row.get_ref(first)? {
            ValueRef::Null => None,
            ValueRef::Integer(v) => Some(v),
            other => {
                return Err(TrellisError::Type(format!(
                    "expected integer slot, found {:?}",
                    other.data_type()
                )));
            }
        };
        let value_float = match row.get_ref(first + 1)? {
            ValueRef::Null => None,
            ValueRef::Real(v) => Some(v),
            ValueRef::Integer(v) => Some(v as f64),
            other => {
                return Err(TrellisError::Type(format!(
                    "expected float slot, found {:?}",
                    other.data_type()
                )));
            }
        };
        let value_str = match row.get_ref(first + 2)? {
            ValueRef::Null => None,
            ValueRef::Text(v) => Some(
                std::str::from_utf8(v)
                    .map_err(|e| TrellisError::Type(format!("text slot is not UTF-8: {}", e)))?
                    .to_owned(),
            ),
            other => {
                return Err(TrellisError::Type(format!(
                    "expected text slot, found {:?}",
                    other.data_type()
                )));
            }
        };
        Ok(Self {
            value_int,
            value_float,
            value_str,
        })
    }

    /// Short-circuit-null comparison: each slot pair compares only when both
    /// sides are set, and the parallel results collapse first-non-null-wins.
    /// Comparing against a fully unset value yields `None`, never an error.
    pub fn compare(&self, other: &FlexibleValue) -> Option<Ordering> {
        let int_cmp = match (self.value_int, other.value_int) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        };
        let float_cmp = match (self.value_float, other.value_float) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        };
        let str_cmp = match (&self.value_str, &other.value_str) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        };
        int_cmp.or(float_cmp).or(str_cmp)
    }

    /// Short-circuit-null arithmetic over the numeric slots. Text slots have
    /// no arithmetic and collapse to unset.
    pub fn arithmetic(&self, other: &FlexibleValue, op: fn(f64, f64) -> f64) -> FlexibleValue {
        let value_int = match (self.value_int, other.value_int) {
            (Some(a), Some(b)) => Some(op(a as f64, b as f64) as i64),
            _ => None,
        };
        let value_float = match (self.value_float, other.value_float) {
            (Some(a), Some(b)) => Some(op(a, b)),
            _ => None,
        };
        FlexibleValue {
            value_int,
            value_float,
            value_str: None,
        }
    }
}

impl From<Value> for FlexibleValue {
    fn from(value: Value) -> Self {
        FlexibleValue::new(value)
    }
}
