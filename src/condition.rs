//! The condition algebra used by filter links.
//!
//! A [`Condition`] is an immutable expression tree over property references,
//! literal values and operators. Building one performs no I/O; a filter link
//! later resolves every property reference to a staging-table column and
//! compiles the tree into a backing-store predicate. Until then the tree can
//! report which property names it still needs bound
//! ([`Condition::unresolved_property_names`]) and which already-bound columns
//! it needs a value join for ([`Condition::bound_columns`]).

use std::collections::{BTreeMap, BTreeSet};
use std::ops;

use crate::error::{Result, TrellisError};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}
impl BinaryOp {
    fn sql(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
}

/// An expression tree node. See the module documentation for the lifecycle.
#[derive(Debug, Clone)]
pub enum Condition {
    /// A property referenced by name, not yet bound to a staging column.
    Property(String),
    /// A property already staged by an earlier projection link, referenced
    /// through its staging-table column name.
    Bound { name: String, column: String },
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<Condition>,
        right: Box<Condition>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Condition>,
    },
}

/// Reference a property by name inside a condition.
pub fn property(name: &str) -> Condition {
    Condition::Property(String::from(name))
}

/// What a value expression gets bound to: an unresolved property name, or a
/// staging-table column carrying an already-projected property id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum BindKey {
    Name(String),
    Column(String),
}

/// Maps each reference in a condition to the SQL value expression the
/// filtering link has joined in for it.
pub type Bindings = BTreeMap<BindKey, String>;

impl Condition {
    /// Property names this condition requires but that are not yet bound to
    /// a staging-table column.
    pub fn unresolved_property_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.visit(&mut |condition| {
            if let Condition::Property(name) = condition {
                names.insert(name.clone());
            }
        });
        names
    }

    /// Staging-table columns this condition needs a value joined in for.
    pub fn bound_columns(&self) -> BTreeSet<String> {
        let mut columns = BTreeSet::new();
        self.visit(&mut |condition| {
            if let Condition::Bound { column, .. } = condition {
                columns.insert(column.clone());
            }
        });
        columns
    }

    fn visit(&self, f: &mut impl FnMut(&Condition)) {
        f(self);
        match self {
            Condition::Binary { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Condition::Unary { operand, .. } => operand.visit(f),
            _ => {}
        }
    }

    /// Compile to a backing-store expression. Literals append to `params` in
    /// tree order and compile to placeholders. Every reference must appear in
    /// `bindings`; a missing one is a structure error, so a partially bound
    /// condition can never reach the backing store.
    ///
    /// `not` compiles to a literal `not` wrapper rather than an algebraically
    /// inverted comparison, because a referenced property may be null and the
    /// null handling must stay the backing engine's own.
    pub(crate) fn compile(
        &self,
        bindings: &Bindings,
        params: &mut Vec<rusqlite::types::Value>,
    ) -> Result<String> {
        match self {
            Condition::Property(name) => bindings
                .get(&BindKey::Name(name.clone()))
                .cloned()
                .ok_or_else(|| {
                    TrellisError::Structure(format!(
                        "property '{}' is not bound to a staging column",
                        name
                    ))
                }),
            Condition::Bound { name, column } => bindings
                .get(&BindKey::Column(column.clone()))
                .cloned()
                .ok_or_else(|| {
                    TrellisError::Structure(format!(
                        "bound property '{}' (column {}) has no value join",
                        name, column
                    ))
                }),
            Condition::Literal(value) => {
                params.push(value.clone().into());
                Ok(String::from("?"))
            }
            Condition::Binary { op, left, right } => Ok(format!(
                "({} {} {})",
                left.compile(bindings, params)?,
                op.sql(),
                right.compile(bindings, params)?
            )),
            Condition::Unary {
                op: UnaryOp::Not,
                operand,
            } => Ok(format!("(not {})", operand.compile(bindings, params)?)),
        }
    }

    fn binary(self, op: BinaryOp, other: impl Into<Condition>) -> Condition {
        Condition::Binary {
            op,
            left: Box::new(self),
            right: Box::new(other.into()),
        }
    }

    pub fn eq(self, other: impl Into<Condition>) -> Condition {
        self.binary(BinaryOp::Eq, other)
    }
    pub fn ne(self, other: impl Into<Condition>) -> Condition {
        self.binary(BinaryOp::Ne, other)
    }
    pub fn lt(self, other: impl Into<Condition>) -> Condition {
        self.binary(BinaryOp::Lt, other)
    }
    pub fn le(self, other: impl Into<Condition>) -> Condition {
        self.binary(BinaryOp::Le, other)
    }
    pub fn gt(self, other: impl Into<Condition>) -> Condition {
        self.binary(BinaryOp::Gt, other)
    }
    pub fn ge(self, other: impl Into<Condition>) -> Condition {
        self.binary(BinaryOp::Ge, other)
    }
    pub fn and(self, other: impl Into<Condition>) -> Condition {
        self.binary(BinaryOp::And, other)
    }
    pub fn or(self, other: impl Into<Condition>) -> Condition {
        self.binary(BinaryOp::Or, other)
    }
    pub fn not(self) -> Condition {
        Condition::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }
}

impl From<Value> for Condition {
    fn from(value: Value) -> Self {
        Condition::Literal(value)
    }
}
impl From<i64> for Condition {
    fn from(value: i64) -> Self {
        Condition::Literal(Value::Int(value))
    }
}
impl From<i32> for Condition {
    fn from(value: i32) -> Self {
        Condition::Literal(Value::Int(value as i64))
    }
}
impl From<f64> for Condition {
    fn from(value: f64) -> Self {
        Condition::Literal(Value::Float(value))
    }
}
impl From<&str> for Condition {
    fn from(value: &str) -> Self {
        Condition::Literal(Value::from(value))
    }
}
impl From<String> for Condition {
    fn from(value: String) -> Self {
        Condition::Literal(Value::Text(value))
    }
}

impl<R: Into<Condition>> ops::Add<R> for Condition {
    type Output = Condition;
    fn add(self, other: R) -> Condition {
        self.binary(BinaryOp::Add, other)
    }
}
impl<R: Into<Condition>> ops::Sub<R> for Condition {
    type Output = Condition;
    fn sub(self, other: R) -> Condition {
        self.binary(BinaryOp::Sub, other)
    }
}
impl<R: Into<Condition>> ops::Mul<R> for Condition {
    type Output = Condition;
    fn mul(self, other: R) -> Condition {
        self.binary(BinaryOp::Mul, other)
    }
}
impl<R: Into<Condition>> ops::Div<R> for Condition {
    type Output = Condition;
    fn div(self, other: R) -> Condition {
        self.binary(BinaryOp::Div, other)
    }
}
