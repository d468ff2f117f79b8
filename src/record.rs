//! Implementation records and their provenance.
//!
//! Every record links a (capability, subject) pair to its operation table and
//! to how it was obtained: declared as a primitive, or synthesized by a named
//! rule from premise records. Records are immutable once published; callers
//! hold them through cheap [`ImplementationHandle`] clones.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityId;
use crate::error::{OpError, OpResult};
use crate::operation::{Operation, OperationTable};
use crate::rules::RuleKind;
use crate::subject::SubjectType;
use crate::value::Value;

/// A (capability, subject) pair: the key of every record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingKey {
    pub capability: CapabilityId,
    pub subject: SubjectType,
}

impl BindingKey {
    pub fn new(capability: impl Into<CapabilityId>, subject: SubjectType) -> Self {
        Self {
            capability: capability.into(),
            subject,
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.capability, self.subject)
    }
}

/// How a record was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Derivation {
    /// Declared directly by `register_primitive`.
    Primitive,
    /// Synthesized by a composition rule from premise records.
    Rule {
        rule: String,
        kind: RuleKind,
        premises: Vec<BindingKey>,
    },
}

impl fmt::Display for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive => write!(f, "primitive"),
            Self::Rule { rule, kind, .. } => write!(f, "{kind} rule '{rule}'"),
        }
    }
}

/// The realized operation table for one (capability, subject) pair.
#[derive(Debug)]
pub struct ImplementationRecord {
    key: BindingKey,
    operations: OperationTable,
    derivation: Derivation,
    /// Length of the longest derivation chain down to a primitive.
    depth: usize,
}

impl ImplementationRecord {
    pub(crate) fn new(
        key: BindingKey,
        operations: OperationTable,
        derivation: Derivation,
        depth: usize,
    ) -> Self {
        Self {
            key,
            operations,
            derivation,
            depth,
        }
    }
}

/// Shared, read-only handle to a published record.
#[derive(Debug, Clone)]
pub struct ImplementationHandle(Arc<ImplementationRecord>);

impl ImplementationHandle {
    pub(crate) fn new(record: ImplementationRecord) -> Self {
        Self(Arc::new(record))
    }

    pub fn key(&self) -> &BindingKey {
        &self.0.key
    }

    pub fn capability(&self) -> &CapabilityId {
        &self.0.key.capability
    }

    pub fn subject(&self) -> &SubjectType {
        &self.0.key.subject
    }

    pub fn derivation(&self) -> &Derivation {
        &self.0.derivation
    }

    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn operations(&self) -> &OperationTable {
        &self.0.operations
    }

    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.0.operations.names()
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.0.operations.get(name)
    }

    /// Apply the named operation to values of the subject type.
    pub fn call(&self, name: &str, args: &[Value]) -> OpResult<Value> {
        let op = self.operation(name).ok_or_else(|| OpError::UnknownOperation {
            capability: self.capability().to_string(),
            operation: name.to_string(),
        })?;
        op.apply(name, args)
    }

    /// Whether both handles point at the same published record.
    pub fn same_record(&self, other: &ImplementationHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Whether both records expose the same operations with the same results
    /// on every argument tuple drawn from `samples`.
    pub fn agrees_with(&self, other: &ImplementationHandle, samples: &[Value]) -> bool {
        let ours: Vec<&str> = self.operation_names().collect();
        let theirs: Vec<&str> = other.operation_names().collect();
        if ours != theirs {
            return false;
        }
        self.operations().iter().all(|(name, op)| {
            argument_tuples(samples, op.arity())
                .iter()
                .all(|args| self.call(name, args).ok() == other.call(name, args).ok())
        })
    }
}

/// Every tuple of length `arity` over `samples`.
fn argument_tuples(samples: &[Value], arity: usize) -> Vec<Vec<Value>> {
    let mut tuples: Vec<Vec<Value>> = vec![Vec::new()];
    for _ in 0..arity {
        tuples = tuples
            .into_iter()
            .flat_map(|prefix| {
                samples.iter().map(move |s| {
                    let mut next = prefix.clone();
                    next.push(s.clone());
                    next
                })
            })
            .collect();
    }
    tuples
}

/// The capabilities held by one subject, each with its record.
#[derive(Debug, Clone)]
pub struct CapabilitySet {
    subject: SubjectType,
    records: BTreeMap<CapabilityId, ImplementationHandle>,
}

impl CapabilitySet {
    pub fn new(subject: SubjectType) -> Self {
        Self {
            subject,
            records: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, handle: ImplementationHandle) {
        self.records.insert(handle.capability().clone(), handle);
    }

    pub fn subject(&self) -> &SubjectType {
        &self.subject
    }

    pub fn get(&self, capability: &CapabilityId) -> Option<&ImplementationHandle> {
        self.records.get(capability)
    }

    pub fn contains(&self, capability: &CapabilityId) -> bool {
        self.records.contains_key(capability)
    }

    /// Held capabilities, in name order.
    pub fn capabilities(&self) -> impl Iterator<Item = &CapabilityId> {
        self.records.keys()
    }

    pub fn handles(&self) -> impl Iterator<Item = &ImplementationHandle> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Operational equality: same subject, same capabilities, and every pair
    /// of records agrees on `samples`.
    pub fn agrees_with(&self, other: &CapabilitySet, samples: &[Value]) -> bool {
        self.subject == other.subject
            && self.records.len() == other.records.len()
            && self.records.iter().all(|(capability, ours)| {
                other
                    .records
                    .get(capability)
                    .is_some_and(|theirs| ours.agrees_with(theirs, samples))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(capability: &str, offset: i64) -> ImplementationHandle {
        let table = OperationTable::new().with(
            "shift",
            Operation::unary(move |v| Ok(Value::Int(v.as_int()? + offset))),
        );
        ImplementationHandle::new(ImplementationRecord::new(
            BindingKey::new(capability, SubjectType::named("Z")),
            table,
            Derivation::Primitive,
            0,
        ))
    }

    #[test]
    fn call_dispatches_by_name() {
        let h = handle("Shift", 2);
        assert_eq!(h.call("shift", &[Value::Int(1)]).unwrap(), Value::Int(3));
        let err = h.call("unshift", &[Value::Int(1)]).unwrap_err();
        assert!(matches!(err, OpError::UnknownOperation { .. }));
    }

    #[test]
    fn agreement_compares_results_on_samples() {
        let samples = [Value::Int(0), Value::Int(1), Value::Int(2)];
        assert!(handle("Shift", 2).agrees_with(&handle("Shift", 2), &samples));
        assert!(!handle("Shift", 2).agrees_with(&handle("Shift", 3), &samples));
    }

    #[test]
    fn argument_tuples_cover_the_cartesian_power() {
        let samples = [Value::Int(0), Value::Int(1)];
        assert_eq!(argument_tuples(&samples, 0), vec![Vec::<Value>::new()]);
        assert_eq!(argument_tuples(&samples, 2).len(), 4);
    }

    #[test]
    fn capability_sets_compare_by_subject_and_records() {
        let samples = [Value::Int(5)];
        let mut a = CapabilitySet::new(SubjectType::named("Z"));
        a.insert(handle("Shift", 1));
        let mut b = CapabilitySet::new(SubjectType::named("Z"));
        b.insert(handle("Shift", 1));
        assert!(a.agrees_with(&b, &samples));

        let c = CapabilitySet::new(SubjectType::named("Z"));
        assert!(!a.agrees_with(&c, &samples));
    }

    #[test]
    fn derivation_display() {
        let d = Derivation::Rule {
            rule: "ordered-comm-group".into(),
            kind: RuleKind::Extension,
            premises: vec![],
        };
        assert_eq!(d.to_string(), "extension rule 'ordered-comm-group'");
        assert_eq!(Derivation::Primitive.to_string(), "primitive");
    }
}
