//! Ready-made primitive structures.
//!
//! Operation tables for a few concrete subjects (integers, integers mod n,
//! booleans), plus helpers registering them against the standard catalog.
//! Used by the CLI and by tests.

use crate::error::{OpError, OpResult, RegistrationResult};
use crate::operation::{Operation, OperationTable};
use crate::registry::Registry;
use crate::rules::{Congruence, Embedding};
use crate::subject::SubjectType;
use crate::value::Value;

/// The cyclic group Z/n in multiplicative notation: `mul` is addition mod n.
///
/// Arguments are reduced mod n first, so any `i64` is accepted. A
/// non-positive `n` makes every operation fail with `DivisionByZero`.
pub fn cyclic_group(n: i64) -> OperationTable {
    OperationTable::new()
        .with(
            "mul",
            Operation::binary(move |a, b| {
                let sum = residue(a, n, "mul")?
                    .checked_add(residue(b, n, "mul")?)
                    .ok_or_else(|| OpError::Overflow {
                        operation: "mul".into(),
                    })?;
                Ok(Value::Int(sum % n))
            }),
        )
        .with("one", Operation::constant(Value::Int(0)))
        .with(
            "inv",
            Operation::unary(move |a| Ok(Value::Int((n - residue(a, n, "inv")?) % n))),
        )
}

/// `value` reduced into `0..n`.
fn residue(value: &Value, n: i64, operation: &str) -> OpResult<i64> {
    if n <= 0 {
        return Err(OpError::DivisionByZero {
            operation: operation.into(),
        });
    }
    Ok(value.as_int()?.rem_euclid(n))
}

/// The discrete order: `a <= b` iff `a == b`.
pub fn discrete_order() -> OperationTable {
    OperationTable::new().with("le", Operation::binary(|a, b| Ok(Value::Bool(a == b))))
}

/// The additive group of `i64`, written multiplicatively, with checked arithmetic.
pub fn integer_group() -> OperationTable {
    OperationTable::new()
        .with(
            "mul",
            Operation::binary(|a, b| {
                a.as_int()?
                    .checked_add(b.as_int()?)
                    .map(Value::Int)
                    .ok_or_else(|| OpError::Overflow {
                        operation: "mul".into(),
                    })
            }),
        )
        .with("one", Operation::constant(Value::Int(0)))
        .with(
            "inv",
            Operation::unary(|a| {
                a.as_int()?
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| OpError::Overflow {
                        operation: "inv".into(),
                    })
            }),
        )
}

/// The usual order on `i64`, with `max`/`min` as lattice operations.
pub fn integer_lattice() -> OperationTable {
    OperationTable::new()
        .with(
            "le",
            Operation::binary(|a, b| Ok(Value::Bool(a.as_int()? <= b.as_int()?))),
        )
        .with(
            "sup",
            Operation::binary(|a, b| Ok(Value::Int(a.as_int()?.max(b.as_int()?)))),
        )
        .with(
            "inf",
            Operation::binary(|a, b| Ok(Value::Int(a.as_int()?.min(b.as_int()?)))),
        )
}

/// The two-element boolean lattice, bounded.
pub fn boolean_lattice() -> OperationTable {
    OperationTable::new()
        .with(
            "le",
            Operation::binary(|a, b| Ok(Value::Bool(!a.as_bool()? || b.as_bool()?))),
        )
        .with(
            "sup",
            Operation::binary(|a, b| Ok(Value::Bool(a.as_bool()? || b.as_bool()?))),
        )
        .with(
            "inf",
            Operation::binary(|a, b| Ok(Value::Bool(a.as_bool()? && b.as_bool()?))),
        )
        .with("top", Operation::constant(Value::Bool(true)))
        .with("bot", Operation::constant(Value::Bool(false)))
}

/// Congruence mod n on `Int`, canonical representatives in `0..n`.
///
/// A non-positive `n` makes canonicalization fail with `DivisionByZero`.
pub fn residue_congruence(n: i64) -> Congruence {
    let name = format!("mod {n}");
    Congruence::new(name.clone(), SubjectType::named("Int"), move |v| {
        Ok(Value::Int(residue(v, n, &name)?))
    })
}

/// `Even` as a subset of `Int`.
pub fn even_embedding() -> Embedding {
    Embedding::new(
        "even",
        SubjectType::named("Even"),
        SubjectType::named("Int"),
        |v| {
            let n = v.as_int()?;
            if n % 2 == 0 {
                Ok(Value::Int(n))
            } else {
                Err(OpError::OutsideImage {
                    embedding: "even".into(),
                    value: v.to_string(),
                })
            }
        },
        |v| match v {
            Value::Int(n) if n % 2 == 0 => Some(Value::Int(*n)),
            _ => None,
        },
    )
}

/// Register Z/n as a `CommGroup` with the discrete `PartialOrder` on `Z{n}`.
///
/// Needs the standard catalog applied to `registry`.
pub fn register_cyclic(registry: &Registry, n: i64) -> RegistrationResult<SubjectType> {
    let subject = SubjectType::named(format!("Z{n}"));
    registry.register_primitive("CommGroup", &subject, cyclic_group(n))?;
    registry.register_primitive("PartialOrder", &subject, discrete_order())?;
    Ok(subject)
}

/// Register `Int` as a `CommGroup`, a `Lattice` and a `LinearOrder`.
///
/// Needs the standard catalog applied to `registry`.
pub fn register_integers(registry: &Registry) -> RegistrationResult<SubjectType> {
    let subject = SubjectType::named("Int");
    registry.register_primitive("CommGroup", &subject, integer_group())?;
    registry.register_primitive("Lattice", &subject, integer_lattice())?;
    registry.register_primitive("LinearOrder", &subject, integer_lattice())?;
    Ok(subject)
}
