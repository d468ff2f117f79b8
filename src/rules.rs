//! Composition rules: how new implementation records are synthesized.
//!
//! Rules are values, not code paths in the resolver. Each rule answers two
//! questions: which premises would it need to produce a given (capability,
//! subject) pair (`plan`), and, given those premise records, what operation
//! table does the conclusion get (`construct`). Both are pure.
//!
//! Structural rules (order dual, additive twin, product, quotient, pullback)
//! apply to any capability on a subject of the right shape; extension,
//! projection and custom rules conclude one named capability.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityGraph, CapabilityId, Duality, Notation, OpSignature};
use crate::config::TwinDictionary;
use crate::error::{
    OpError, OpResult, RegistrationError, RegistrationResult, ResolutionError, ResolutionResult,
};
use crate::operation::{Operation, OperationTable};
use crate::record::{BindingKey, ImplementationHandle};
use crate::subject::SubjectType;
use crate::value::{Sort, Value};

type MapFn = dyn Fn(&Value) -> OpResult<Value> + Send + Sync;
type PartialMapFn = dyn Fn(&Value) -> Option<Value> + Send + Sync;
type ConstructFn = dyn Fn(&[ImplementationHandle]) -> OperationTable + Send + Sync;

// ---------------------------------------------------------------------------
// Rule kind
// ---------------------------------------------------------------------------

/// Classification of the composition a rule performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    Extension,
    Projection,
    Pullback,
    Product,
    Quotient,
    OrderDual,
    AdditiveTwin,
    Custom,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Extension => "extension",
            Self::Projection => "projection",
            Self::Pullback => "pullback",
            Self::Product => "product",
            Self::Quotient => "quotient",
            Self::OrderDual => "order-dual",
            Self::AdditiveTwin => "additive-twin",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Embeddings and congruences
// ---------------------------------------------------------------------------

/// An injection of `source` into `target`, with a partial inverse.
pub struct Embedding {
    name: String,
    source: SubjectType,
    target: SubjectType,
    forward: Arc<MapFn>,
    back: Arc<PartialMapFn>,
}

impl Embedding {
    pub fn new<F, B>(
        name: impl Into<String>,
        source: SubjectType,
        target: SubjectType,
        forward: F,
        back: B,
    ) -> Self
    where
        F: Fn(&Value) -> OpResult<Value> + Send + Sync + 'static,
        B: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            source: source.normalized(),
            target: target.normalized(),
            forward: Arc::new(forward),
            back: Arc::new(back),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SubjectType {
        &self.source
    }

    pub fn target(&self) -> &SubjectType {
        &self.target
    }

    pub fn forward(&self, value: &Value) -> OpResult<Value> {
        (self.forward)(value)
    }

    /// Map a target value back, failing when it is outside the image.
    pub fn back(&self, value: &Value) -> OpResult<Value> {
        (self.back)(value).ok_or_else(|| OpError::OutsideImage {
            embedding: self.name.clone(),
            value: value.to_string(),
        })
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedding")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// A congruence on `base`, given by a map to canonical representatives.
pub struct Congruence {
    name: String,
    base: SubjectType,
    canon: Arc<MapFn>,
}

impl Congruence {
    pub fn new<F>(name: impl Into<String>, base: SubjectType, canon: F) -> Self
    where
        F: Fn(&Value) -> OpResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            base: base.normalized(),
            canon: Arc::new(canon),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> &SubjectType {
        &self.base
    }

    /// The quotient subject this congruence defines.
    pub fn subject(&self) -> SubjectType {
        self.base.clone().quotient(self.name.clone())
    }

    pub fn canonical(&self, value: &Value) -> OpResult<Value> {
        (self.canon)(value)
    }
}

impl fmt::Debug for Congruence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Congruence")
            .field("name", &self.name)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Composition rule
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum RuleBody {
    Extension {
        conclusion: CapabilityId,
        premises: Vec<CapabilityId>,
        witnesses: Vec<String>,
        extra: OperationTable,
    },
    Projection {
        from: CapabilityId,
        to: CapabilityId,
    },
    Pullback {
        embedding: Arc<Embedding>,
        only: Option<Vec<CapabilityId>>,
    },
    Product {
        only: Option<Vec<CapabilityId>>,
    },
    Quotient {
        congruence: Arc<Congruence>,
        only: Option<Vec<CapabilityId>>,
    },
    OrderDual,
    AdditiveTwin,
    Custom {
        conclusion: CapabilityId,
        premises: Vec<CapabilityId>,
        construct: Arc<ConstructFn>,
    },
}

/// A named, deterministic derivation of one capability record from others.
#[derive(Clone)]
pub struct CompositionRule {
    name: String,
    body: RuleBody,
}

impl CompositionRule {
    /// `premises` on a subject, plus `witnesses` for the conclusion's new
    /// axioms, give `conclusion` on the same subject. The merged table takes
    /// each operation from the first premise that has it.
    pub fn extension<I, S>(
        name: impl Into<String>,
        conclusion: impl Into<CapabilityId>,
        premises: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CapabilityId>,
    {
        Self {
            name: name.into(),
            body: RuleBody::Extension {
                conclusion: conclusion.into(),
                premises: premises.into_iter().map(Into::into).collect(),
                witnesses: Vec::new(),
                extra: OperationTable::new(),
            },
        }
    }

    /// Record axioms the extension discharges itself. No effect on other kinds.
    pub fn witnessing<I, S>(mut self, axioms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let RuleBody::Extension { witnesses, .. } = &mut self.body {
            witnesses.extend(axioms.into_iter().map(Into::into));
        }
        self
    }

    /// Supply an operation no premise provides. No effect on other kinds.
    pub fn with_operation(mut self, name: impl Into<String>, op: Operation) -> Self {
        if let RuleBody::Extension { extra, .. } = &mut self.body {
            extra.insert(name, op);
        }
        self
    }

    /// Forget `from` down to its super `to`.
    pub fn projection(from: impl Into<CapabilityId>, to: impl Into<CapabilityId>) -> Self {
        let (from, to) = (from.into(), to.into());
        Self {
            name: format!("{from}->{to}"),
            body: RuleBody::Projection { from, to },
        }
    }

    /// Pull capabilities of the embedding's target back to its source.
    pub fn pullback(embedding: Embedding) -> Self {
        Self {
            name: format!("pullback:{}", embedding.name),
            body: RuleBody::Pullback {
                embedding: Arc::new(embedding),
                only: None,
            },
        }
    }

    /// Pointwise structure on products.
    pub fn product() -> Self {
        Self {
            name: "product".into(),
            body: RuleBody::Product { only: None },
        }
    }

    /// Induced structure on the quotient by `congruence`.
    pub fn quotient(congruence: Congruence) -> Self {
        Self {
            name: format!("quotient:{}", congruence.name),
            body: RuleBody::Quotient {
                congruence: Arc::new(congruence),
                only: None,
            },
        }
    }

    /// Mirrored structure on order duals.
    pub fn order_dual() -> Self {
        Self {
            name: "order-dual".into(),
            body: RuleBody::OrderDual,
        }
    }

    /// Renamed structure on `Additive(T)` / `Multiplicative(T)`.
    pub fn additive_twin() -> Self {
        Self {
            name: "additive-twin".into(),
            body: RuleBody::AdditiveTwin,
        }
    }

    /// A rule with a user-supplied constructor. The constructor receives the
    /// premise records in the order given and must be pure.
    pub fn custom<I, S, F>(
        name: impl Into<String>,
        conclusion: impl Into<CapabilityId>,
        premises: I,
        construct: F,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CapabilityId>,
        F: Fn(&[ImplementationHandle]) -> OperationTable + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: RuleBody::Custom {
                conclusion: conclusion.into(),
                premises: premises.into_iter().map(Into::into).collect(),
                construct: Arc::new(construct),
            },
        }
    }

    /// Restrict a pullback, product or quotient rule to the given capabilities.
    pub fn only<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CapabilityId>,
    {
        let list: Vec<CapabilityId> = capabilities.into_iter().map(Into::into).collect();
        match &mut self.body {
            RuleBody::Pullback { only, .. }
            | RuleBody::Product { only }
            | RuleBody::Quotient { only, .. } => *only = Some(list),
            _ => {}
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RuleKind {
        match self.body {
            RuleBody::Extension { .. } => RuleKind::Extension,
            RuleBody::Projection { .. } => RuleKind::Projection,
            RuleBody::Pullback { .. } => RuleKind::Pullback,
            RuleBody::Product { .. } => RuleKind::Product,
            RuleBody::Quotient { .. } => RuleKind::Quotient,
            RuleBody::OrderDual => RuleKind::OrderDual,
            RuleBody::AdditiveTwin => RuleKind::AdditiveTwin,
            RuleBody::Custom { .. } => RuleKind::Custom,
        }
    }

    /// The capability this rule concludes, for rules that conclude one.
    pub fn conclusion(&self) -> Option<&CapabilityId> {
        match &self.body {
            RuleBody::Extension { conclusion, .. } | RuleBody::Custom { conclusion, .. } => {
                Some(conclusion)
            }
            RuleBody::Projection { to, .. } => Some(to),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check the rule against the declared capabilities.
    pub(crate) fn validate(&self, graph: &CapabilityGraph) -> RegistrationResult<()> {
        let declared = |id: &CapabilityId| -> RegistrationResult<()> {
            if graph.contains(id) {
                Ok(())
            } else {
                Err(RegistrationError::UnknownCapability {
                    capability: id.to_string(),
                })
            }
        };

        match &self.body {
            RuleBody::Extension {
                conclusion,
                premises,
                witnesses,
                extra,
            } => {
                declared(conclusion)?;
                premises.iter().try_for_each(declared)?;

                let mut ops: HashSet<&str> = extra.names().collect();
                let mut axioms: HashSet<&str> = witnesses.iter().map(String::as_str).collect();
                for premise in premises {
                    ops.extend(requirement(graph, premise).iter().map(|s| s.name.as_str()));
                    axioms.extend(graph.axioms(premise).unwrap_or(&[]).iter().map(String::as_str));
                }
                for signature in requirement(graph, conclusion) {
                    if let Some(op) = extra.get(&signature.name) {
                        if op.arity() != signature.arity {
                            return Err(RegistrationError::ArityMismatch {
                                capability: conclusion.to_string(),
                                operation: signature.name.clone(),
                                expected: signature.arity,
                                actual: op.arity(),
                            });
                        }
                    }
                }
                self.check_coverage(graph, conclusion, &ops, &axioms)
            }
            RuleBody::Projection { from, to } => {
                declared(from)?;
                declared(to)?;
                let ops: HashSet<&str> = requirement(graph, from)
                    .iter()
                    .map(|s| s.name.as_str())
                    .collect();
                let axioms: HashSet<&str> = graph
                    .axioms(from)
                    .unwrap_or(&[])
                    .iter()
                    .map(String::as_str)
                    .collect();
                self.check_coverage(graph, to, &ops, &axioms)
            }
            RuleBody::Custom {
                conclusion,
                premises,
                ..
            } => {
                declared(conclusion)?;
                premises.iter().try_for_each(declared)
            }
            RuleBody::Pullback { only, .. }
            | RuleBody::Product { only }
            | RuleBody::Quotient { only, .. } => {
                only.iter().flatten().try_for_each(declared)
            }
            RuleBody::OrderDual | RuleBody::AdditiveTwin => Ok(()),
        }
    }

    fn check_coverage(
        &self,
        graph: &CapabilityGraph,
        conclusion: &CapabilityId,
        ops: &HashSet<&str>,
        axioms: &HashSet<&str>,
    ) -> RegistrationResult<()> {
        let mut missing: Vec<String> = requirement(graph, conclusion)
            .iter()
            .filter(|s| !ops.contains(s.name.as_str()))
            .map(|s| format!("operation '{}'", s.name))
            .collect();
        missing.extend(
            graph
                .axioms(conclusion)
                .unwrap_or(&[])
                .iter()
                .filter(|a| !axioms.contains(a.as_str()))
                .map(|a| format!("axiom '{a}'")),
        );
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistrationError::IncompleteRule {
                rule: self.name.clone(),
                missing: missing.join(", "),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    /// The premises this rule needs to produce `goal`, or `None` if it does
    /// not apply.
    pub(crate) fn plan(&self, goal: &BindingKey, graph: &CapabilityGraph) -> Option<Vec<BindingKey>> {
        let capability = &goal.capability;
        match &self.body {
            RuleBody::Extension {
                conclusion,
                premises,
                ..
            }
            | RuleBody::Custom {
                conclusion,
                premises,
                ..
            } => (conclusion == capability)
                .then(|| premises.iter().map(|p| on(p, &goal.subject)).collect()),
            RuleBody::Projection { from, to } => {
                (to == capability).then(|| vec![on(from, &goal.subject)])
            }
            RuleBody::Pullback { embedding, only } => (goal.subject == embedding.source
                && admits(only, capability))
            .then(|| vec![on(capability, &embedding.target)]),
            RuleBody::Product { only } => match &goal.subject {
                SubjectType::Product(left, right) if admits(only, capability) => {
                    Some(vec![on(capability, left), on(capability, right)])
                }
                _ => None,
            },
            RuleBody::Quotient { congruence, only } => match &goal.subject {
                SubjectType::Quotient {
                    base,
                    congruence: name,
                } if name == &congruence.name
                    && **base == congruence.base
                    && admits(only, capability) =>
                {
                    Some(vec![on(capability, base)])
                }
                _ => None,
            },
            RuleBody::OrderDual => match &goal.subject {
                SubjectType::OrderDual(inner) => Some(vec![on(&graph.dual_of(capability), inner)]),
                _ => None,
            },
            RuleBody::AdditiveTwin => {
                let (inner, wanted) = match &goal.subject {
                    SubjectType::Additive(inner) => (inner, Notation::Additive),
                    SubjectType::Multiplicative(inner) => (inner, Notation::Multiplicative),
                    _ => return None,
                };
                match graph.notation(capability)? {
                    Notation::Neutral => Some(vec![on(capability, inner)]),
                    notation if notation == wanted => {
                        graph.twin_of(capability).map(|twin| vec![on(twin, inner)])
                    }
                    _ => None,
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Build the conclusion's operation table from resolved premises, in the
    /// order `plan` returned them.
    pub(crate) fn construct(
        &self,
        goal: &BindingKey,
        premises: &[ImplementationHandle],
        graph: &CapabilityGraph,
        twins: &TwinDictionary,
    ) -> ResolutionResult<OperationTable> {
        let required = requirement(graph, &goal.capability);
        let mut table = OperationTable::new();

        match &self.body {
            RuleBody::Extension { extra, .. } => {
                for signature in required {
                    let op = premises
                        .iter()
                        .find_map(|p| p.operation(&signature.name))
                        .or_else(|| extra.get(&signature.name))
                        .ok_or_else(|| self.invalid(goal, &signature.name))?;
                    table.insert(signature.name.clone(), op.clone());
                }
            }
            RuleBody::Projection { .. } => {
                let premise = self.single(goal, premises)?;
                for signature in required {
                    let op = self.source(goal, premise, &signature.name)?;
                    table.insert(signature.name.clone(), op.clone());
                }
            }
            RuleBody::Custom { construct, .. } => {
                let built = construct(premises);
                for signature in required {
                    let op = built
                        .get(&signature.name)
                        .filter(|op| op.arity() == signature.arity)
                        .ok_or_else(|| self.invalid(goal, &signature.name))?;
                    table.insert(signature.name.clone(), op.clone());
                }
            }
            RuleBody::Pullback { embedding, .. } => {
                let premise = self.single(goal, premises)?;
                for signature in required {
                    let op = self.source(goal, premise, &signature.name)?;
                    table.insert(
                        signature.name.clone(),
                        pulled_back(signature, op.clone(), Arc::clone(embedding)),
                    );
                }
            }
            RuleBody::Product { .. } => {
                let [left, right] = premises else {
                    return Err(self.invalid(goal, "premise"));
                };
                for signature in required {
                    let l = self.source(goal, left, &signature.name)?;
                    let r = self.source(goal, right, &signature.name)?;
                    table.insert(signature.name.clone(), pointwise(signature, l.clone(), r.clone()));
                }
            }
            RuleBody::Quotient { congruence, .. } => {
                let premise = self.single(goal, premises)?;
                for signature in required {
                    let op = self.source(goal, premise, &signature.name)?;
                    table.insert(
                        signature.name.clone(),
                        canonicalized(signature, op.clone(), Arc::clone(congruence)),
                    );
                }
            }
            RuleBody::OrderDual => {
                let premise = self.single(goal, premises)?;
                for signature in required {
                    let op = match &signature.duality {
                        Duality::SelfDual => self.source(goal, premise, &signature.name)?.clone(),
                        Duality::Flip => {
                            flipped(&signature.name, self.source(goal, premise, &signature.name)?.clone())
                        }
                        Duality::Swap(partner) => self.source(goal, premise, partner)?.clone(),
                    };
                    table.insert(signature.name.clone(), op);
                }
            }
            RuleBody::AdditiveTwin => {
                let premise = self.single(goal, premises)?;
                let neutral = graph.notation(&goal.capability) == Some(Notation::Neutral);
                for signature in required {
                    let source = if neutral {
                        signature.name.as_str()
                    } else {
                        twins.partner(&signature.name).unwrap_or(&signature.name)
                    };
                    let op = self.source(goal, premise, source)?;
                    table.insert(signature.name.clone(), op.clone());
                }
            }
        }

        Ok(table)
    }

    fn single<'a>(
        &self,
        goal: &BindingKey,
        premises: &'a [ImplementationHandle],
    ) -> ResolutionResult<&'a ImplementationHandle> {
        match premises {
            [premise] => Ok(premise),
            _ => Err(self.invalid(goal, "premise")),
        }
    }

    fn source<'a>(
        &self,
        goal: &BindingKey,
        premise: &'a ImplementationHandle,
        name: &str,
    ) -> ResolutionResult<&'a Operation> {
        premise
            .operation(name)
            .ok_or_else(|| self.invalid(goal, name))
    }

    fn invalid(&self, goal: &BindingKey, missing: &str) -> ResolutionError {
        ResolutionError::InvalidRecord {
            rule: self.name.clone(),
            capability: goal.capability.to_string(),
            subject: goal.subject.to_string(),
            missing: missing.to_string(),
        }
    }
}

impl fmt::Debug for CompositionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionRule")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("conclusion", &self.conclusion())
            .finish()
    }
}

fn on(capability: &CapabilityId, subject: &SubjectType) -> BindingKey {
    BindingKey::new(capability, subject.clone())
}

fn admits(only: &Option<Vec<CapabilityId>>, capability: &CapabilityId) -> bool {
    only.as_ref().is_none_or(|list| list.contains(capability))
}

fn requirement<'g>(graph: &'g CapabilityGraph, capability: &CapabilityId) -> &'g [OpSignature] {
    graph.requirement(capability).unwrap_or(&[])
}

// ---------------------------------------------------------------------------
// Operation wrappers
// ---------------------------------------------------------------------------

fn pulled_back(signature: &OpSignature, op: Operation, embedding: Arc<Embedding>) -> Operation {
    let name = signature.name.clone();
    let sort = signature.sort;
    Operation::new(signature.arity, move |args| {
        let mapped = args
            .iter()
            .map(|a| embedding.forward(a))
            .collect::<OpResult<Vec<_>>>()?;
        let out = op.apply(&name, &mapped)?;
        match sort {
            Sort::Prop => Ok(out),
            Sort::Element => embedding.back(&out),
        }
    })
}

fn pointwise(signature: &OpSignature, left: Operation, right: Operation) -> Operation {
    let name = signature.name.clone();
    let sort = signature.sort;
    Operation::new(signature.arity, move |args| {
        let mut ls = Vec::with_capacity(args.len());
        let mut rs = Vec::with_capacity(args.len());
        for arg in args {
            let (l, r) = arg.split_pair()?;
            ls.push(l.clone());
            rs.push(r.clone());
        }
        let l = left.apply(&name, &ls)?;
        let r = right.apply(&name, &rs)?;
        match sort {
            Sort::Element => Ok(Value::pair(l, r)),
            Sort::Prop => Ok(Value::Bool(l.as_bool()? && r.as_bool()?)),
        }
    })
}

fn canonicalized(signature: &OpSignature, op: Operation, congruence: Arc<Congruence>) -> Operation {
    let name = signature.name.clone();
    let sort = signature.sort;
    Operation::new(signature.arity, move |args| {
        let canonical = args
            .iter()
            .map(|a| congruence.canonical(a))
            .collect::<OpResult<Vec<_>>>()?;
        let out = op.apply(&name, &canonical)?;
        match sort {
            Sort::Element => congruence.canonical(&out),
            Sort::Prop => Ok(out),
        }
    })
}

fn flipped(name: &str, op: Operation) -> Operation {
    let name = name.to_string();
    Operation::new(2, move |args| match args {
        [a, b] => op.apply(&name, &[b.clone(), a.clone()]),
        _ => Err(OpError::ArityMismatch {
            operation: name.clone(),
            expected: 2,
            actual: args.len(),
        }),
    })
}
