//! Callable operations and operation tables.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{OpError, OpResult};
use crate::value::Value;

type OpFn = dyn Fn(&[Value]) -> OpResult<Value> + Send + Sync;

/// A concrete implementation of one capability operation.
///
/// Cheap to clone: the function body is shared.
#[derive(Clone)]
pub struct Operation {
    arity: usize,
    func: Arc<OpFn>,
}

impl Operation {
    /// Wrap a function taking exactly `arity` arguments.
    pub fn new<F>(arity: usize, func: F) -> Self
    where
        F: Fn(&[Value]) -> OpResult<Value> + Send + Sync + 'static,
    {
        Self {
            arity,
            func: Arc::new(func),
        }
    }

    pub fn constant(value: Value) -> Self {
        Self::new(0, move |_| Ok(value.clone()))
    }

    pub fn unary<F>(func: F) -> Self
    where
        F: Fn(&Value) -> OpResult<Value> + Send + Sync + 'static,
    {
        Self::new(1, move |args| func(&args[0]))
    }

    pub fn binary<F>(func: F) -> Self
    where
        F: Fn(&Value, &Value) -> OpResult<Value> + Send + Sync + 'static,
    {
        Self::new(2, move |args| func(&args[0], &args[1]))
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Apply the operation, checking the argument count first.
    ///
    /// `name` is only used for error reporting.
    pub fn apply(&self, name: &str, args: &[Value]) -> OpResult<Value> {
        if args.len() != self.arity {
            return Err(OpError::ArityMismatch {
                operation: name.to_string(),
                expected: self.arity,
                actual: args.len(),
            });
        }
        (self.func)(args)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Operations keyed by name, iterated in name order.
#[derive(Debug, Clone, Default)]
pub struct OperationTable {
    ops: BTreeMap<String, Operation>,
}

impl OperationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, op: Operation) -> Self {
        self.ops.insert(name.into(), op);
        self
    }

    /// Insert an operation, returning the one it replaced.
    pub fn insert(&mut self, name: impl Into<String>, op: Operation) -> Option<Operation> {
        self.ops.insert(name.into(), op)
    }

    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.ops.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Operation)> {
        self.ops.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_checks_arity() {
        let add = Operation::binary(|a, b| Ok(Value::Int(a.as_int()? + b.as_int()?)));
        assert_eq!(
            add.apply("add", &[Value::Int(2), Value::Int(3)]).unwrap(),
            Value::Int(5)
        );
        let err = add.apply("add", &[Value::Int(2)]).unwrap_err();
        assert_eq!(
            err,
            OpError::ArityMismatch {
                operation: "add".into(),
                expected: 2,
                actual: 1,
            }
        );
    }

    #[test]
    fn table_iterates_in_name_order() {
        let table = OperationTable::new()
            .with("mul", Operation::constant(Value::Int(0)))
            .with("inv", Operation::constant(Value::Int(0)))
            .with("one", Operation::constant(Value::Int(1)));
        let names: Vec<&str> = table.names().collect();
        assert_eq!(names, vec!["inv", "mul", "one"]);
        assert_eq!(table.len(), 3);
        assert!(table.contains("one"));
        assert!(table.get("div").is_none());
    }
}
