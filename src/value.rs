//! Runtime values that operations are applied to.
//!
//! Subject types are opaque to the registry, so every carrier is encoded in
//! one small [`Value`] enum: integers, booleans, and pairs for product types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{OpError, OpResult};

/// An element of some subject type, or the truth value of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Pair(Box<Value>, Box<Value>),
}

impl Value {
    /// Build a pair value (an element of a product subject).
    pub fn pair(left: Value, right: Value) -> Self {
        Self::Pair(Box::new(left), Box::new(right))
    }

    pub fn as_int(&self) -> OpResult<i64> {
        match self {
            Self::Int(n) => Ok(*n),
            other => Err(OpError::TypeMismatch {
                expected: "integer",
                found: other.to_string(),
            }),
        }
    }

    pub fn as_bool(&self) -> OpResult<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(OpError::TypeMismatch {
                expected: "boolean",
                found: other.to_string(),
            }),
        }
    }

    /// Split a pair into its components.
    pub fn split_pair(&self) -> OpResult<(&Value, &Value)> {
        match self {
            Self::Pair(l, r) => Ok((&**l, &**r)),
            other => Err(OpError::TypeMismatch {
                expected: "pair",
                found: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Pair(l, r) => write!(f, "({l}, {r})"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Error returned when a value literal cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseValueError(pub String);

impl fmt::Display for ParseValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value literal: '{}'", self.0)
    }
}

impl std::error::Error for ParseValueError {}

impl FromStr for Value {
    type Err = ParseValueError;

    /// Parse `3`, `-2`, `true`, or `(1, (2, false))`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser { src: s, pos: 0 };
        let value = parser.value()?;
        parser.skip_ws();
        if parser.pos != s.len() {
            return Err(ParseValueError(s.to_string()));
        }
        Ok(value)
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn rest(&self) -> &str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.rest().starts_with(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Result<Value, ParseValueError> {
        let src = self.src;
        let fail = move || ParseValueError(src.to_string());
        if self.eat('(') {
            let left = self.value()?;
            if !self.eat(',') {
                return Err(fail());
            }
            let right = self.value()?;
            if !self.eat(')') {
                return Err(fail());
            }
            return Ok(Value::pair(left, right));
        }

        self.skip_ws();
        let token_len = self
            .rest()
            .find(|c: char| c == ',' || c == ')' || c.is_whitespace())
            .unwrap_or(self.rest().len());
        let token = &self.rest()[..token_len];
        let value = match token {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Int(token.parse().map_err(|_| fail())?),
        };
        self.pos += token_len;
        Ok(value)
    }
}

/// Result sort of an operation: an element of the subject, or a proposition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sort {
    #[default]
    Element,
    Prop,
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Element => write!(f, "element"),
            Self::Prop => write!(f, "prop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scalars() {
        assert_eq!("3".parse::<Value>().unwrap(), Value::Int(3));
        assert_eq!(" -12 ".parse::<Value>().unwrap(), Value::Int(-12));
        assert_eq!("true".parse::<Value>().unwrap(), Value::Bool(true));
    }

    #[test]
    fn parse_nested_pairs() {
        let v: Value = "(1, (2, false))".parse().unwrap();
        assert_eq!(
            v,
            Value::pair(Value::Int(1), Value::pair(Value::Int(2), Value::Bool(false)))
        );
        assert_eq!(v.to_string(), "(1, (2, false))");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("(1, 2".parse::<Value>().is_err());
        assert!("one".parse::<Value>().is_err());
        assert!("1 2".parse::<Value>().is_err());
    }

    #[test]
    fn accessors_report_type_mismatch() {
        let err = Value::Bool(true).as_int().unwrap_err();
        assert!(matches!(err, OpError::TypeMismatch { expected: "integer", .. }));
        assert!(Value::Int(1).split_pair().is_err());
        let p = Value::pair(1.into(), 2.into());
        let (l, r) = p.split_pair().unwrap();
        assert_eq!((l, r), (&Value::Int(1), &Value::Int(2)));
    }
}
