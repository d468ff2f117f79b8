//! Capability registry: registration and memoized resolution.
//!
//! Published records live in a `DashMap`, so looking up an existing record
//! never blocks. Everything that can change what resolves (declarations,
//! primitives, rules) and all synthesis runs under one `Mutex` around the
//! declarations, so a pair is synthesized at most once even when many threads
//! ask for it at the same time.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::{DashMap, DashSet};
use serde::Serialize;

use crate::capability::{Capability, CapabilityGraph, CapabilityId, Notation, OpSignature};
use crate::config::RegistryConfig;
use crate::error::{RegistrationError, RegistrationResult, ResolutionError, ResolutionResult};
use crate::operation::OperationTable;
use crate::record::{
    BindingKey, CapabilitySet, Derivation, ImplementationHandle, ImplementationRecord,
};
use crate::rules::{CompositionRule, RuleKind};
use crate::subject::SubjectType;

/// Declarations guarded by the registry's global lock.
struct Declarations {
    graph: CapabilityGraph,
    rules: Vec<CompositionRule>,
    /// Rule indices by the capability they conclude.
    concluding: HashMap<CapabilityId, Vec<usize>>,
    /// Indices of rules without a fixed conclusion.
    open: Vec<usize>,
}

impl Declarations {
    fn new() -> Self {
        let mut decls = Self {
            graph: CapabilityGraph::new(),
            rules: Vec::new(),
            concluding: HashMap::new(),
            open: Vec::new(),
        };
        for rule in [
            CompositionRule::order_dual(),
            CompositionRule::additive_twin(),
            CompositionRule::product(),
        ] {
            decls.push_rule(rule);
        }
        decls
    }

    fn push_rule(&mut self, rule: CompositionRule) {
        let index = self.rules.len();
        match rule.conclusion() {
            Some(conclusion) => self
                .concluding
                .entry(conclusion.clone())
                .or_default()
                .push(index),
            None => self.open.push(index),
        }
        self.rules.push(rule);
    }

    /// Indices of the rules that may conclude `capability`, in priority order.
    fn candidates(&self, capability: &CapabilityId) -> Vec<usize> {
        let concluding = self
            .concluding
            .get(capability)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let mut indices: Vec<usize> = self.open.iter().chain(concluding).copied().collect();
        indices.sort_unstable();
        indices
    }
}

/// Observable resolution state of one (capability, subject) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionState {
    /// No record and no cached failure.
    Unregistered,
    /// On the active resolution stack of some thread.
    Resolving,
    Resolved,
    /// A cached failure, kept until the next registration.
    Failed(ResolutionError),
}

/// One node of a derivation tree, flattened in pre-order.
#[derive(Debug, Clone, Serialize)]
pub struct ExplainStep {
    pub depth: usize,
    pub key: BindingKey,
    pub derivation: Derivation,
}

/// Summary of a declared capability, for display.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityInfo {
    pub name: CapabilityId,
    pub extends: Vec<CapabilityId>,
    pub notation: Notation,
    pub twin: Option<CapabilityId>,
    pub dual: CapabilityId,
    pub order_related: bool,
    pub requirement: Vec<OpSignature>,
    pub axioms: Vec<String>,
    pub ancestors: Vec<CapabilityId>,
    pub descendants: Vec<CapabilityId>,
}

/// Thread-safe capability registry.
pub struct Registry {
    config: RegistryConfig,
    /// Published records. Written only while holding `declarations`.
    records: DashMap<BindingKey, ImplementationHandle>,
    /// Definitive failures, cleared by every registration.
    failures: DashMap<BindingKey, ResolutionError>,
    /// Pairs on some thread's active resolution stack.
    in_flight: DashSet<BindingKey>,
    declarations: Mutex<Declarations>,
}

impl Registry {
    /// Create a registry with the default configuration and the built-in
    /// order-dual, additive-twin and product rules.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
            failures: DashMap::new(),
            in_flight: DashSet::new(),
            declarations: Mutex::new(Declarations::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Declarations> {
        self.declarations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn invalidate_failures(&self) {
        self.failures.clear();
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Declare a capability. Its supers must already be declared.
    pub fn declare_capability(&self, capability: Capability) -> RegistrationResult<()> {
        let mut decls = self.lock();
        let id = capability.id.clone();
        decls.graph.declare(capability)?;
        if self.config.auto_projection {
            add_projections(&mut decls, &id)?;
        }
        self.invalidate_failures();
        Ok(())
    }

    /// Register one projection rule per direct super of `capability`.
    /// Returns the number of rules added.
    pub fn register_projections(
        &self,
        capability: impl Into<CapabilityId>,
    ) -> RegistrationResult<usize> {
        let mut decls = self.lock();
        let added = add_projections(&mut decls, &capability.into())?;
        self.invalidate_failures();
        Ok(added)
    }

    /// Register a primitive implementation of `capability` on `subject`.
    ///
    /// The table must provide every operation of the full requirement with
    /// the declared arity; extra operations are dropped.
    pub fn register_primitive(
        &self,
        capability: impl Into<CapabilityId>,
        subject: &SubjectType,
        ops: OperationTable,
    ) -> RegistrationResult<()> {
        let capability = capability.into();
        let decls = self.lock();
        let required =
            decls
                .graph
                .requirement(&capability)
                .ok_or_else(|| RegistrationError::UnknownCapability {
                    capability: capability.to_string(),
                })?;

        let key = BindingKey::new(&capability, subject.clone().normalized());
        if let Some(existing) = self.records.get(&key) {
            return Err(RegistrationError::DuplicateBinding {
                capability: capability.to_string(),
                subject: key.subject.to_string(),
                existing: existing.derivation().to_string(),
            });
        }

        let mut table = OperationTable::new();
        for signature in required {
            let op = ops
                .get(&signature.name)
                .ok_or_else(|| RegistrationError::MissingOperation {
                    capability: capability.to_string(),
                    subject: key.subject.to_string(),
                    operation: signature.name.clone(),
                })?;
            if op.arity() != signature.arity {
                return Err(RegistrationError::ArityMismatch {
                    capability: capability.to_string(),
                    operation: signature.name.clone(),
                    expected: signature.arity,
                    actual: op.arity(),
                });
            }
            table.insert(signature.name.clone(), op.clone());
        }

        tracing::debug!(%key, ops = table.len(), "registered primitive");
        let record = ImplementationRecord::new(key.clone(), table, Derivation::Primitive, 0);
        self.records.insert(key, ImplementationHandle::new(record));
        self.invalidate_failures();
        Ok(())
    }

    /// Append a composition rule. Rules are tried in registration order.
    pub fn register_rule(&self, rule: CompositionRule) -> RegistrationResult<()> {
        let mut decls = self.lock();
        rule.validate(&decls.graph)?;
        tracing::debug!(rule = rule.name(), kind = %rule.kind(), "registered rule");
        decls.push_rule(rule);
        self.invalidate_failures();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Resolve `capability` on `subject` to its unique record, synthesizing
    /// and memoizing it if needed.
    pub fn resolve(
        &self,
        capability: impl Into<CapabilityId>,
        subject: &SubjectType,
    ) -> ResolutionResult<ImplementationHandle> {
        let key = BindingKey::new(capability, subject.clone().normalized());
        if let Some(handle) = self.published(&key) {
            tracing::trace!(%key, "record cache hit");
            return Ok(handle);
        }

        let decls = self.lock();
        let result = Resolver::new(self, &decls)
            .resolve(&key)
            .map_err(Failure::into_error);
        if let Err(ResolutionError::CyclicDependency { cycle, .. }) = &result {
            tracing::warn!(%key, %cycle, "resolution failed on a cyclic dependency");
        }
        result
    }

    fn published(&self, key: &BindingKey) -> Option<ImplementationHandle> {
        self.records.get(key).map(|entry| entry.value().clone())
    }

    pub fn state(
        &self,
        capability: impl Into<CapabilityId>,
        subject: &SubjectType,
    ) -> ResolutionState {
        let key = BindingKey::new(capability, subject.clone().normalized());
        if self.records.contains_key(&key) {
            ResolutionState::Resolved
        } else if self.in_flight.contains(&key) {
            ResolutionState::Resolving
        } else if let Some(error) = self.failures.get(&key) {
            ResolutionState::Failed(error.value().clone())
        } else {
            ResolutionState::Unregistered
        }
    }

    /// Every declared capability that resolves on `subject`.
    ///
    /// Capabilities that fail with `CapabilityNotFound` or
    /// `CyclicDependency` are simply not held; other errors propagate.
    pub fn held_capabilities(&self, subject: &SubjectType) -> ResolutionResult<CapabilitySet> {
        let subject = subject.clone().normalized();
        let ids: Vec<CapabilityId> = self.lock().graph.ids().cloned().collect();
        self.collect(subject, ids)
    }

    fn collect(
        &self,
        subject: SubjectType,
        capabilities: Vec<CapabilityId>,
    ) -> ResolutionResult<CapabilitySet> {
        let mut set = CapabilitySet::new(subject.clone());
        for capability in capabilities {
            match self.resolve(capability, &subject) {
                Ok(handle) => set.insert(handle),
                Err(
                    ResolutionError::CapabilityNotFound { .. }
                    | ResolutionError::CyclicDependency { .. },
                ) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(set)
    }

    /// The capability set of `OrderDual(subject)`: the dual of every
    /// capability `subject` holds.
    pub fn derive_order_dual(&self, subject: &SubjectType) -> ResolutionResult<CapabilitySet> {
        let subject = subject.clone().normalized();
        let held = self.held_capabilities(&subject)?;
        let targets: Vec<CapabilityId> = {
            let decls = self.lock();
            if !held.capabilities().any(|c| decls.graph.is_order_related(c)) {
                return Err(ResolutionError::NothingToMirror {
                    subject: subject.to_string(),
                    what: "order-related",
                });
            }
            held.capabilities().map(|c| decls.graph.dual_of(c)).collect()
        };
        self.collect(subject.order_dual(), targets)
    }

    /// The capability set of `subject` written in the other notation.
    ///
    /// A subject with multiplicative structure maps to `Additive(subject)`,
    /// otherwise one with additive structure maps to `Multiplicative(subject)`.
    pub fn derive_additive_twin(&self, subject: &SubjectType) -> ResolutionResult<CapabilitySet> {
        let subject = subject.clone().normalized();
        let held = self.held_capabilities(&subject)?;
        let (target, capabilities) = {
            let decls = self.lock();
            let holds = |notation: Notation| {
                held.capabilities()
                    .any(|c| decls.graph.notation(c) == Some(notation))
            };
            let (target, from) = if holds(Notation::Multiplicative) {
                (subject.clone().additive(), Notation::Multiplicative)
            } else if holds(Notation::Additive) {
                (subject.clone().multiplicative(), Notation::Additive)
            } else {
                return Err(ResolutionError::NothingToMirror {
                    subject: subject.to_string(),
                    what: "multiplicative or additive",
                });
            };
            let capabilities: Vec<CapabilityId> = held
                .capabilities()
                .filter_map(|c| match decls.graph.notation(c)? {
                    Notation::Neutral => Some(c.clone()),
                    notation if notation == from => decls.graph.twin_of(c).cloned(),
                    _ => None,
                })
                .collect();
            (target, capabilities)
        };
        self.collect(target, capabilities)
    }

    /// Resolve and return the derivation tree of the record, in pre-order.
    pub fn explain(
        &self,
        capability: impl Into<CapabilityId>,
        subject: &SubjectType,
    ) -> ResolutionResult<Vec<ExplainStep>> {
        let root = self.resolve(capability, subject)?;
        let mut steps = Vec::new();
        let mut pending = vec![(0usize, root)];
        while let Some((depth, handle)) = pending.pop() {
            if let Derivation::Rule { premises, .. } = handle.derivation() {
                for premise in premises.iter().rev() {
                    if let Some(record) = self.published(premise) {
                        pending.push((depth + 1, record));
                    }
                }
            }
            steps.push(ExplainStep {
                depth,
                key: handle.key().clone(),
                derivation: handle.derivation().clone(),
            });
        }
        Ok(steps)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Declared capabilities in declaration order.
    pub fn capabilities(&self) -> Vec<CapabilityId> {
        self.lock().graph.ids().cloned().collect()
    }

    pub fn describe(&self, capability: impl Into<CapabilityId>) -> Option<CapabilityInfo> {
        let id = capability.into();
        let decls = self.lock();
        let graph = &decls.graph;
        let declared = graph.get(&id)?;
        Some(CapabilityInfo {
            name: id.clone(),
            extends: declared.extends.clone(),
            notation: declared.notation,
            twin: graph.twin_of(&id).cloned(),
            dual: graph.dual_of(&id),
            order_related: graph.is_order_related(&id),
            requirement: graph.requirement(&id).unwrap_or(&[]).to_vec(),
            axioms: graph.axioms(&id).unwrap_or(&[]).to_vec(),
            ancestors: graph.ancestors(&id),
            descendants: graph.descendants(&id),
        })
    }

    /// Registered rules as (name, kind), in priority order.
    pub fn rules(&self) -> Vec<(String, RuleKind)> {
        self.lock()
            .rules
            .iter()
            .map(|r| (r.name().to_string(), r.kind()))
            .collect()
    }

    /// Number of published records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("records", &self.records.len())
            .field("failures", &self.failures.len())
            .field("config", &self.config)
            .finish()
    }
}

fn add_projections(decls: &mut Declarations, id: &CapabilityId) -> RegistrationResult<usize> {
    let supers = decls
        .graph
        .get(id)
        .map(|c| c.extends.clone())
        .ok_or_else(|| RegistrationError::UnknownCapability {
            capability: id.to_string(),
        })?;
    for parent in &supers {
        let rule = CompositionRule::projection(id, parent);
        rule.validate(&decls.graph)?;
        decls.push_rule(rule);
    }
    Ok(supers.len())
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Sentinel low-link for failures that do not depend on the active stack.
const DETACHED: usize = usize::MAX;

/// Why a pair could not be resolved.
enum Failure {
    /// Aborts the whole resolution (`DepthExceeded`, `InvalidRecord`).
    Fatal(ResolutionError),
    /// Makes the current rule inapplicable. `low` is the lowest stack index
    /// the failure depends on, or `DETACHED`.
    Skip { error: ResolutionError, low: usize },
}

impl Failure {
    fn into_error(self) -> ResolutionError {
        match self {
            Self::Fatal(error) | Self::Skip { error, .. } => error,
        }
    }
}

/// A failure that depends on pairs still on the stack.
struct Tentative {
    key: BindingKey,
    error: ResolutionError,
    low: usize,
}

/// One pair on the resolution stack.
struct Frame {
    key: BindingKey,
    /// Length of the tentative list when the frame was pushed.
    mark: usize,
    /// Rules that may conclude the pair, in priority order.
    candidates: Vec<usize>,
    /// Position in `candidates` of the rule being tried.
    cursor: usize,
    /// Premises of the current rule, once it applies.
    plan: Option<Vec<BindingKey>>,
    premises: Vec<ImplementationHandle>,
    low: usize,
    /// Some rule failed on a plain miss.
    missing: bool,
    /// First cycle this pair lies on.
    cycle: Option<ResolutionError>,
}

enum Step {
    Premise(BindingKey),
    Done(Result<ImplementationHandle, Failure>),
}

impl Frame {
    fn new(key: BindingKey, mark: usize, candidates: Vec<usize>) -> Self {
        Self {
            key,
            mark,
            candidates,
            cursor: 0,
            plan: None,
            premises: Vec::new(),
            low: DETACHED,
            missing: false,
            cycle: None,
        }
    }

    /// Index of the rule whose premises are being resolved.
    fn current_rule(&self) -> Option<usize> {
        self.plan
            .as_ref()
            .and(self.candidates.get(self.cursor).copied())
    }

    /// Record the outcome of the premise last asked for.
    fn accept(&mut self, result: Result<ImplementationHandle, Failure>) -> ResolutionResult<()> {
        match result {
            Ok(handle) => self.premises.push(handle),
            Err(Failure::Fatal(error)) => return Err(error),
            Err(Failure::Skip { error, low }) => {
                self.low = self.low.min(low);
                // Failures settled elsewhere count as misses here, whatever their kind.
                match error {
                    ResolutionError::CyclicDependency { .. } if low != DETACHED => {
                        self.cycle.get_or_insert(error);
                    }
                    _ => self.missing = true,
                }
                self.plan = None;
                self.premises.clear();
                self.cursor += 1;
            }
        }
        Ok(())
    }

    /// Advance to the next unresolved premise, or finish the pair.
    fn step(&mut self, decls: &Declarations, config: &RegistryConfig) -> Step {
        loop {
            let Some(&index) = self.candidates.get(self.cursor) else {
                return Step::Done(Err(self.exhausted()));
            };
            let rule = &decls.rules[index];
            let Some(plan) = &self.plan else {
                match rule.plan(&self.key, &decls.graph) {
                    Some(plan) => {
                        tracing::debug!(key = %self.key, rule = rule.name(), "trying rule");
                        self.plan = Some(plan);
                    }
                    None => self.cursor += 1,
                }
                continue;
            };
            if let Some(premise) = plan.get(self.premises.len()) {
                return Step::Premise(premise.clone());
            }

            let built = rule
                .construct(&self.key, &self.premises, &decls.graph, &config.twins)
                .map(|table| {
                    let depth = self.premises.iter().map(|p| p.depth() + 1).max().unwrap_or(1);
                    let derivation = Derivation::Rule {
                        rule: rule.name().to_string(),
                        kind: rule.kind(),
                        premises: plan.clone(),
                    };
                    let record =
                        ImplementationRecord::new(self.key.clone(), table, derivation, depth);
                    ImplementationHandle::new(record)
                })
                .map_err(Failure::Fatal);
            return Step::Done(built);
        }
    }

    /// The failure of a pair whose rules are all used up.
    fn exhausted(&self) -> Failure {
        // A plain miss anywhere wins: the cycle alone is not why this pair fails.
        let error = match &self.cycle {
            Some(ResolutionError::CyclicDependency { cycle, .. }) if !self.missing => {
                ResolutionError::CyclicDependency {
                    capability: self.key.capability.to_string(),
                    subject: self.key.subject.to_string(),
                    cycle: cycle.clone(),
                }
            }
            _ => not_found(&self.key),
        };
        Failure::Skip {
            error,
            low: self.low,
        }
    }
}

/// Depth-first search over rule premises, run under the declarations lock.
///
/// The search keeps its own stack of frames, so the depth it can reach is
/// bounded by `max_depth` alone and not by the thread's stack.
///
/// Failures that hit a pair still on the stack are kept as tentative until
/// the lowest such pair finishes: if it fails, every tentative failure above
/// it is final; if it succeeds, they are discarded.
struct Resolver<'r> {
    registry: &'r Registry,
    decls: &'r Declarations,
    /// Pairs currently being synthesized, outermost first.
    frames: Vec<Frame>,
    /// Stack index of every pair in `frames`.
    positions: HashMap<BindingKey, usize>,
    tentative: Vec<Tentative>,
    /// Final failures of this run, kept even when the failure cache is off.
    settled: HashMap<BindingKey, ResolutionError>,
}

enum Lookup {
    Ready(Result<ImplementationHandle, Failure>),
    Pushed,
}

impl<'r> Resolver<'r> {
    fn new(registry: &'r Registry, decls: &'r Declarations) -> Self {
        Self {
            registry,
            decls,
            frames: Vec::new(),
            positions: HashMap::new(),
            tentative: Vec::new(),
            settled: HashMap::new(),
        }
    }

    fn resolve(&mut self, goal: &BindingKey) -> Result<ImplementationHandle, Failure> {
        let mut incoming = match self.lookup(goal) {
            Lookup::Ready(result) => return result,
            Lookup::Pushed => None,
        };
        let decls = self.decls;
        let registry = self.registry;
        let config = &registry.config;

        loop {
            let Some(frame) = self.frames.last_mut() else {
                return incoming.unwrap_or_else(|| {
                    Err(Failure::Skip {
                        error: not_found(goal),
                        low: DETACHED,
                    })
                });
            };
            if let Some(result) = incoming.take() {
                if let Err(error) = frame.accept(result) {
                    return Err(self.abort(error));
                }
            }
            match frame.step(decls, config) {
                Step::Premise(premise) => {
                    if let Lookup::Ready(result) = self.lookup(&premise) {
                        incoming = Some(result);
                    }
                }
                Step::Done(outcome) => {
                    let result = self.finish(outcome);
                    if self.frames.is_empty() {
                        return result;
                    }
                    incoming = Some(result);
                }
            }
        }
    }

    /// Answer `key` from what is already known, or push a frame for it.
    fn lookup(&mut self, key: &BindingKey) -> Lookup {
        if let Some(handle) = self.registry.published(key) {
            tracing::trace!(%key, "record cache hit");
            return Lookup::Ready(Ok(handle));
        }
        if let Some(error) = self.registry.failures.get(key) {
            tracing::trace!(%key, "failure cache hit");
            return Lookup::Ready(Err(Failure::Skip {
                error: error.value().clone(),
                low: DETACHED,
            }));
        }
        if let Some(error) = self.settled.get(key) {
            return Lookup::Ready(Err(Failure::Skip {
                error: error.clone(),
                low: DETACHED,
            }));
        }
        if let Some(t) = self.tentative.iter().find(|t| &t.key == key) {
            return Lookup::Ready(Err(Failure::Skip {
                error: t.error.clone(),
                low: t.low,
            }));
        }
        if let Some(&pos) = self.positions.get(key) {
            return Lookup::Ready(Err(self.cycle_at(pos, key)));
        }
        if !self.decls.graph.contains(&key.capability) {
            return Lookup::Ready(Err(Failure::Skip {
                error: not_found(key),
                low: DETACHED,
            }));
        }
        let max_depth = self.registry.config.max_depth;
        if self.frames.len() >= max_depth {
            return Lookup::Ready(Err(Failure::Fatal(ResolutionError::DepthExceeded {
                capability: key.capability.to_string(),
                subject: key.subject.to_string(),
                max_depth,
            })));
        }

        let mark = self.tentative.len();
        self.positions.insert(key.clone(), self.frames.len());
        self.registry.in_flight.insert(key.clone());
        let candidates = self.decls.candidates(&key.capability);
        self.frames.push(Frame::new(key.clone(), mark, candidates));
        Lookup::Pushed
    }

    /// `key` was asked for again while already on the stack at `pos`.
    fn cycle_at(&self, pos: usize, key: &BindingKey) -> Failure {
        let on_cycle = &self.frames[pos..];
        let cycle = on_cycle
            .iter()
            .map(|f| &f.key)
            .chain(std::iter::once(key))
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");

        // Projections lead back to the supers every extension needs, so
        // loops through one are dead ends, not self-definitions.
        let through_projection = on_cycle.iter().any(|f| {
            f.current_rule()
                .is_some_and(|i| self.decls.rules[i].kind() == RuleKind::Projection)
        });
        let error = if through_projection {
            tracing::trace!(%key, %cycle, "dead end through a projection");
            not_found(key)
        } else {
            tracing::debug!(%key, %cycle, "cycle on the resolution stack");
            ResolutionError::CyclicDependency {
                capability: key.capability.to_string(),
                subject: key.subject.to_string(),
                cycle,
            }
        };
        Failure::Skip { error, low: pos }
    }

    /// Pop the finished top frame and publish or classify its outcome.
    fn finish(
        &mut self,
        outcome: Result<ImplementationHandle, Failure>,
    ) -> Result<ImplementationHandle, Failure> {
        let Some(frame) = self.frames.pop() else {
            return outcome;
        };
        let key = frame.key;
        let depth = self.frames.len();
        self.positions.remove(&key);
        self.registry.in_flight.remove(&key);

        match outcome {
            Ok(handle) => {
                self.tentative.truncate(frame.mark);
                tracing::debug!(%key, derivation = %handle.derivation(), "synthesized record");
                self.registry.records.insert(key, handle.clone());
                Ok(handle)
            }
            Err(Failure::Fatal(error)) => {
                self.tentative.truncate(frame.mark);
                Err(Failure::Fatal(error))
            }
            Err(Failure::Skip { error, low }) if low >= depth => {
                let settled = self.tentative.split_off(frame.mark);
                for t in settled {
                    self.settle(t.key, t.error);
                }
                self.settle(key, error.clone());
                Err(Failure::Skip {
                    error,
                    low: DETACHED,
                })
            }
            Err(Failure::Skip { error, low }) => {
                for t in &mut self.tentative[frame.mark..] {
                    t.low = t.low.min(low);
                }
                self.tentative.push(Tentative {
                    key,
                    error: error.clone(),
                    low,
                });
                Err(Failure::Skip { error, low })
            }
        }
    }

    /// Unwind every frame after a fatal error.
    fn abort(&mut self, error: ResolutionError) -> Failure {
        let mark = self.frames.first().map_or(self.tentative.len(), |f| f.mark);
        for frame in self.frames.drain(..) {
            self.registry.in_flight.remove(&frame.key);
        }
        self.positions.clear();
        self.tentative.truncate(mark);
        Failure::Fatal(error)
    }

    fn settle(&mut self, key: BindingKey, error: ResolutionError) {
        if self.registry.config.cache_failures {
            self.registry.failures.insert(key.clone(), error.clone());
        }
        self.settled.insert(key, error);
    }
}

fn not_found(key: &BindingKey) -> ResolutionError {
    ResolutionError::CapabilityNotFound {
        capability: key.capability.to_string(),
        subject: key.subject.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use crate::value::Value;

    fn magma() -> Capability {
        Capability::new("Magma").with_operation(OpSignature::element("mul", 2))
    }

    fn add_table() -> OperationTable {
        OperationTable::new().with(
            "mul",
            Operation::binary(|a, b| Ok(Value::Int(a.as_int()? + b.as_int()?))),
        )
    }

    #[test]
    fn primitive_must_cover_requirement() {
        let reg = Registry::new();
        reg.declare_capability(magma()).unwrap();
        let z = SubjectType::named("Z");

        let err = reg
            .register_primitive("Magma", &z, OperationTable::new())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::MissingOperation { .. }));

        let wrong = OperationTable::new().with("mul", Operation::constant(Value::Int(0)));
        let err = reg.register_primitive("Magma", &z, wrong).unwrap_err();
        assert!(matches!(err, RegistrationError::ArityMismatch { .. }));

        let err = reg
            .register_primitive("Nope", &z, add_table())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownCapability { .. }));
    }

    #[test]
    fn duplicate_primitive_is_rejected() {
        let reg = Registry::new();
        reg.declare_capability(magma()).unwrap();
        let z = SubjectType::named("Z");
        reg.register_primitive("Magma", &z, add_table()).unwrap();
        let err = reg.register_primitive("Magma", &z, add_table()).unwrap_err();
        match err {
            RegistrationError::DuplicateBinding { existing, .. } => {
                assert_eq!(existing, "primitive")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn extra_operations_are_dropped() {
        let reg = Registry::new();
        reg.declare_capability(magma()).unwrap();
        let z = SubjectType::named("Z");
        let table = add_table().with("neg", Operation::unary(|v| Ok(v.clone())));
        reg.register_primitive("Magma", &z, table).unwrap();
        let handle = reg.resolve("Magma", &z).unwrap();
        let names: Vec<&str> = handle.operation_names().collect();
        assert_eq!(names, vec!["mul"]);
    }

    #[test]
    fn failures_are_cached_until_registration() {
        let reg = Registry::new();
        reg.declare_capability(magma()).unwrap();
        let z = SubjectType::named("Z");
        assert_eq!(reg.state("Magma", &z), ResolutionState::Unregistered);

        assert!(reg.resolve("Magma", &z).is_err());
        assert!(matches!(reg.state("Magma", &z), ResolutionState::Failed(_)));

        reg.register_primitive("Magma", &z, add_table()).unwrap();
        assert_eq!(reg.state("Magma", &z), ResolutionState::Resolved);
        assert!(reg.resolve("Magma", &z).is_ok());
    }

    #[test]
    fn failure_cache_can_be_disabled() {
        let config = RegistryConfig {
            cache_failures: false,
            ..RegistryConfig::default()
        };
        let reg = Registry::with_config(config);
        reg.declare_capability(magma()).unwrap();
        let z = SubjectType::named("Z");
        assert!(reg.resolve("Magma", &z).is_err());
        assert_eq!(reg.state("Magma", &z), ResolutionState::Unregistered);
    }

    #[test]
    fn undeclared_capability_is_not_found() {
        let reg = Registry::new();
        let err = reg.resolve("Ghost", &SubjectType::named("Z")).unwrap_err();
        assert!(matches!(err, ResolutionError::CapabilityNotFound { .. }));
    }

    #[test]
    fn projections_follow_direct_supers() {
        let reg = Registry::new();
        reg.declare_capability(magma()).unwrap();
        reg.declare_capability(
            Capability::new("Semigroup")
                .with_supers(["Magma"])
                .with_axiom("mul_assoc"),
        )
        .unwrap();
        assert_eq!(reg.register_projections("Semigroup").unwrap(), 1);

        let z = SubjectType::named("Z");
        reg.register_primitive("Semigroup", &z, add_table()).unwrap();
        let magma = reg.resolve("Magma", &z).unwrap();
        assert_eq!(
            magma.call("mul", &[Value::Int(2), Value::Int(2)]).unwrap(),
            Value::Int(4)
        );
        assert_eq!(magma.depth(), 1);
    }

    #[test]
    fn auto_projection_registers_on_declaration() {
        let config = RegistryConfig {
            auto_projection: true,
            ..RegistryConfig::default()
        };
        let reg = Registry::with_config(config);
        reg.declare_capability(magma()).unwrap();
        reg.declare_capability(Capability::new("Semigroup").with_supers(["Magma"]))
            .unwrap();
        assert!(
            reg.rules()
                .iter()
                .any(|(name, kind)| name == "Semigroup->Magma" && *kind == RuleKind::Projection)
        );
    }

    #[test]
    fn builtin_rules_come_first() {
        let reg = Registry::new();
        let kinds: Vec<RuleKind> = reg.rules().into_iter().map(|(_, k)| k).collect();
        assert_eq!(
            kinds,
            vec![RuleKind::OrderDual, RuleKind::AdditiveTwin, RuleKind::Product]
        );
    }

    #[test]
    fn describe_reports_links() {
        let reg = Registry::new();
        reg.declare_capability(magma()).unwrap();
        let info = reg.describe("Magma").unwrap();
        assert_eq!(info.dual, CapabilityId::from("Magma"));
        assert!(!info.order_related);
        assert!(reg.describe("Ghost").is_none());
    }
}
