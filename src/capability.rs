//! Capability declarations and the extension DAG.
//!
//! A [`Capability`] names a set of required operations and axioms and lists the
//! capabilities it extends. The [`CapabilityGraph`] keeps every declaration in
//! a petgraph DAG (edges point from a capability to its supers) and caches each
//! capability's full requirement: its own operations plus those of every
//! transitive super, merged by name.

use std::collections::HashMap;
use std::fmt;

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, RegistrationResult};
use crate::value::Sort;

/// Name of a capability, e.g. `OrderedCommGroup`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(String);

impl CapabilityId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CapabilityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CapabilityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&CapabilityId> for CapabilityId {
    fn from(id: &CapabilityId) -> Self {
        id.clone()
    }
}

/// How an operation transforms when the order is reversed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Duality {
    /// Unchanged (group operations, constants unrelated to the order).
    #[default]
    #[serde(rename = "self")]
    SelfDual,
    /// Binary relation with its arguments swapped (`le`, `lt`).
    Flip,
    /// Exchanged with a partner operation (`sup`/`inf`, `top`/`bot`).
    Swap(String),
}

impl fmt::Display for Duality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfDual => write!(f, "self"),
            Self::Flip => write!(f, "flip"),
            Self::Swap(partner) => write!(f, "swap {partner}"),
        }
    }
}

/// Notation a capability is written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Notation {
    Multiplicative,
    Additive,
    #[default]
    Neutral,
}

impl fmt::Display for Notation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multiplicative => write!(f, "multiplicative"),
            Self::Additive => write!(f, "additive"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Signature of one required operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpSignature {
    pub name: String,
    pub arity: usize,
    #[serde(default)]
    pub sort: Sort,
    #[serde(default)]
    pub duality: Duality,
}

impl OpSignature {
    /// An operation returning an element of the subject.
    pub fn element(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
            sort: Sort::Element,
            duality: Duality::SelfDual,
        }
    }

    /// An operation returning a proposition.
    pub fn prop(name: impl Into<String>, arity: usize) -> Self {
        Self {
            sort: Sort::Prop,
            ..Self::element(name, arity)
        }
    }

    /// A binary order relation, flipped under order reversal.
    pub fn relation(name: impl Into<String>) -> Self {
        Self::prop(name, 2).with_duality(Duality::Flip)
    }

    pub fn with_duality(mut self, duality: Duality) -> Self {
        self.duality = duality;
        self
    }

    /// Pair this operation with `partner` under order reversal.
    pub fn swapped_with(self, partner: impl Into<String>) -> Self {
        self.with_duality(Duality::Swap(partner.into()))
    }

    fn same_shape(&self, other: &OpSignature) -> bool {
        self.arity == other.arity && self.sort == other.sort && self.duality == other.duality
    }
}

impl fmt::Display for OpSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} -> {}", self.name, self.arity, self.sort)?;
        if self.duality != Duality::SelfDual {
            write!(f, " [{}]", self.duality)?;
        }
        Ok(())
    }
}

/// A capability declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(rename = "name")]
    pub id: CapabilityId,
    /// Super-capabilities, in priority order.
    #[serde(default)]
    pub extends: Vec<CapabilityId>,
    /// Operations introduced by this capability (not inherited ones).
    #[serde(default)]
    pub operations: Vec<OpSignature>,
    /// Axioms introduced by this capability.
    #[serde(default)]
    pub axioms: Vec<String>,
    #[serde(default)]
    pub notation: Notation,
    /// Counterpart in the other notation (`Group` / `AddGroup`).
    #[serde(default)]
    pub twin: Option<CapabilityId>,
    /// Order-reversed counterpart; `None` means self-dual.
    #[serde(default)]
    pub dual: Option<CapabilityId>,
}

impl Capability {
    pub fn new(name: impl Into<CapabilityId>) -> Self {
        Self {
            id: name.into(),
            extends: Vec::new(),
            operations: Vec::new(),
            axioms: Vec::new(),
            notation: Notation::Neutral,
            twin: None,
            dual: None,
        }
    }

    pub fn with_supers<I, S>(mut self, supers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CapabilityId>,
    {
        self.extends.extend(supers.into_iter().map(Into::into));
        self
    }

    pub fn with_operation(mut self, signature: OpSignature) -> Self {
        self.operations.push(signature);
        self
    }

    pub fn with_axiom(mut self, axiom: impl Into<String>) -> Self {
        self.axioms.push(axiom.into());
        self
    }

    pub fn with_notation(mut self, notation: Notation) -> Self {
        self.notation = notation;
        self
    }

    pub fn with_twin(mut self, twin: impl Into<CapabilityId>) -> Self {
        self.twin = Some(twin.into());
        self
    }

    pub fn with_dual(mut self, dual: impl Into<CapabilityId>) -> Self {
        self.dual = Some(dual.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Capability graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    capability: Capability,
    node: NodeIndex,
    /// Full requirement: inherited operations first, then own, merged by name.
    requirement: Vec<OpSignature>,
    axioms: Vec<String>,
}

/// The capability DAG with cached requirements and symmetric twin/dual links.
#[derive(Debug, Clone, Default)]
pub struct CapabilityGraph {
    /// Edges point from a capability to each of its direct supers.
    graph: DiGraph<CapabilityId, ()>,
    entries: HashMap<CapabilityId, Entry>,
    order: Vec<CapabilityId>,
    twins: HashMap<CapabilityId, CapabilityId>,
    duals: HashMap<CapabilityId, CapabilityId>,
}

impl CapabilityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a capability. Its supers must already be declared, which keeps
    /// the graph acyclic by construction.
    pub fn declare(&mut self, capability: Capability) -> RegistrationResult<()> {
        let id = capability.id.clone();
        if self.entries.contains_key(&id) {
            return Err(RegistrationError::DuplicateCapability {
                capability: id.to_string(),
            });
        }

        let mut supers: Vec<CapabilityId> = Vec::new();
        for parent in &capability.extends {
            if !self.entries.contains_key(parent) {
                return Err(RegistrationError::UnknownSuper {
                    capability: id.to_string(),
                    parent: parent.to_string(),
                });
            }
            if !supers.contains(parent) {
                supers.push(parent.clone());
            }
        }

        let mut requirement: Vec<OpSignature> = Vec::new();
        let mut axioms: Vec<String> = Vec::new();
        for parent in &supers {
            let entry = &self.entries[parent];
            for signature in &entry.requirement {
                merge_signature(&mut requirement, signature, &id)?;
            }
            for axiom in &entry.axioms {
                if !axioms.contains(axiom) {
                    axioms.push(axiom.clone());
                }
            }
        }
        for signature in &capability.operations {
            merge_signature(&mut requirement, signature, &id)?;
        }
        for axiom in &capability.axioms {
            if !axioms.contains(axiom) {
                axioms.push(axiom.clone());
            }
        }

        check_link(&self.twins, "twin", &id, capability.twin.as_ref())?;
        check_link(&self.duals, "dual", &id, capability.dual.as_ref())?;

        let effective_dual = capability
            .dual
            .as_ref()
            .or_else(|| self.duals.get(&id))
            .unwrap_or(&id);
        validate_duality(&id, &requirement, effective_dual == &id)?;

        // All checks passed; mutate.
        apply_link(&mut self.twins, &id, capability.twin.as_ref());
        apply_link(&mut self.duals, &id, capability.dual.as_ref());

        let node = self.graph.add_node(id.clone());
        for parent in &supers {
            let parent_node = self.entries[parent].node;
            self.graph.add_edge(node, parent_node, ());
        }

        tracing::debug!(capability = %id, operations = requirement.len(), "declared capability");

        let capability = Capability {
            extends: supers,
            ..capability
        };
        self.entries.insert(
            id.clone(),
            Entry {
                capability,
                node,
                requirement,
                axioms,
            },
        );
        self.order.push(id);
        Ok(())
    }

    pub fn contains(&self, id: &CapabilityId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &CapabilityId) -> Option<&Capability> {
        self.entries.get(id).map(|e| &e.capability)
    }

    /// Every operation the capability requires, including inherited ones.
    pub fn requirement(&self, id: &CapabilityId) -> Option<&[OpSignature]> {
        self.entries.get(id).map(|e| e.requirement.as_slice())
    }

    /// Every axiom the capability carries, including inherited ones.
    pub fn axioms(&self, id: &CapabilityId) -> Option<&[String]> {
        self.entries.get(id).map(|e| e.axioms.as_slice())
    }

    /// Declared capabilities, in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = &CapabilityId> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn notation(&self, id: &CapabilityId) -> Option<Notation> {
        self.get(id).map(|c| c.notation)
    }

    pub fn twin_of(&self, id: &CapabilityId) -> Option<&CapabilityId> {
        self.twins.get(id)
    }

    /// The order-reversed counterpart; a capability without a dual link is self-dual.
    pub fn dual_of(&self, id: &CapabilityId) -> CapabilityId {
        self.duals.get(id).cloned().unwrap_or_else(|| id.clone())
    }

    /// Whether any required operation changes under order reversal.
    pub fn is_order_related(&self, id: &CapabilityId) -> bool {
        self.requirement(id)
            .is_some_and(|req| req.iter().any(|s| s.duality != Duality::SelfDual))
    }

    /// All transitive supers, in declaration order.
    pub fn ancestors(&self, id: &CapabilityId) -> Vec<CapabilityId> {
        let Some(entry) = self.entries.get(id) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        let mut dfs = Dfs::new(&self.graph, entry.node);
        while let Some(node) = dfs.next(&self.graph) {
            if node != entry.node {
                found.push(self.graph[node].clone());
            }
        }
        self.in_declaration_order(found)
    }

    /// All capabilities that transitively extend this one, in declaration order.
    pub fn descendants(&self, id: &CapabilityId) -> Vec<CapabilityId> {
        let Some(entry) = self.entries.get(id) else {
            return Vec::new();
        };
        let reversed = Reversed(&self.graph);
        let mut found = Vec::new();
        let mut dfs = Dfs::new(reversed, entry.node);
        while let Some(node) = dfs.next(reversed) {
            if node != entry.node {
                found.push(self.graph[node].clone());
            }
        }
        self.in_declaration_order(found)
    }

    /// Whether `child` extends `parent`, directly or transitively.
    pub fn extends(&self, child: &CapabilityId, parent: &CapabilityId) -> bool {
        match (self.entries.get(child), self.entries.get(parent)) {
            (Some(c), Some(p)) => c.node != p.node && has_path_connecting(&self.graph, c.node, p.node, None),
            _ => false,
        }
    }

    fn in_declaration_order(&self, mut ids: Vec<CapabilityId>) -> Vec<CapabilityId> {
        ids.sort_by_key(|id| self.order.iter().position(|o| o == id));
        ids
    }
}

fn merge_signature(
    requirement: &mut Vec<OpSignature>,
    signature: &OpSignature,
    capability: &CapabilityId,
) -> RegistrationResult<()> {
    match requirement.iter().find(|s| s.name == signature.name) {
        Some(existing) if existing.same_shape(signature) => Ok(()),
        Some(existing) => Err(RegistrationError::ConflictingOperation {
            capability: capability.to_string(),
            operation: signature.name.clone(),
            first: existing.to_string(),
            second: signature.to_string(),
        }),
        None => {
            requirement.push(signature.clone());
            Ok(())
        }
    }
}

fn validate_duality(
    capability: &CapabilityId,
    requirement: &[OpSignature],
    self_dual: bool,
) -> RegistrationResult<()> {
    let invalid = |operation: &str, message: String| RegistrationError::InvalidDuality {
        capability: capability.to_string(),
        operation: operation.to_string(),
        message,
    };

    for signature in requirement {
        match &signature.duality {
            Duality::SelfDual => {}
            Duality::Flip if signature.arity != 2 => {
                return Err(invalid(
                    &signature.name,
                    format!("flip needs arity 2, found {}", signature.arity),
                ));
            }
            Duality::Flip => {}
            Duality::Swap(partner) if partner == &signature.name => {
                return Err(invalid(&signature.name, "cannot swap with itself".into()));
            }
            // The partner lives in the dual capability; checked when the dual is built.
            Duality::Swap(_) if !self_dual => {}
            Duality::Swap(partner) => {
                let Some(other) = requirement.iter().find(|s| &s.name == partner) else {
                    return Err(invalid(
                        &signature.name,
                        format!("partner '{partner}' is not required by this self-dual capability"),
                    ));
                };
                let swaps_back = other.duality == Duality::Swap(signature.name.clone());
                if other.arity != signature.arity || other.sort != signature.sort || !swaps_back {
                    return Err(invalid(
                        &signature.name,
                        format!("partner '{partner}' does not mirror it ({other})"),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn check_link(
    links: &HashMap<CapabilityId, CapabilityId>,
    link: &'static str,
    id: &CapabilityId,
    other: Option<&CapabilityId>,
) -> RegistrationResult<()> {
    let Some(other) = other else {
        return Ok(());
    };
    for (from, to) in [(id, other), (other, id)] {
        if let Some(existing) = links.get(from) {
            if existing != to {
                return Err(RegistrationError::ConflictingLink {
                    capability: from.to_string(),
                    link,
                    existing: existing.to_string(),
                    requested: to.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn apply_link(
    links: &mut HashMap<CapabilityId, CapabilityId>,
    id: &CapabilityId,
    other: Option<&CapabilityId>,
) {
    if let Some(other) = other {
        links.insert(id.clone(), other.clone());
        links.insert(other.clone(), id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_graph() -> CapabilityGraph {
        let mut g = CapabilityGraph::new();
        g.declare(Capability::new("Preorder").with_operation(OpSignature::relation("le")))
            .unwrap();
        g.declare(
            Capability::new("PartialOrder")
                .with_supers(["Preorder"])
                .with_axiom("le_antisymm"),
        )
        .unwrap();
        g.declare(
            Capability::new("SemilatticeSup")
                .with_supers(["PartialOrder"])
                .with_operation(OpSignature::element("sup", 2).swapped_with("inf"))
                .with_dual("SemilatticeInf"),
        )
        .unwrap();
        g.declare(
            Capability::new("SemilatticeInf")
                .with_supers(["PartialOrder"])
                .with_operation(OpSignature::element("inf", 2).swapped_with("sup")),
        )
        .unwrap();
        g.declare(Capability::new("Lattice").with_supers(["SemilatticeSup", "SemilatticeInf"]))
            .unwrap();
        g
    }

    #[test]
    fn requirement_merges_inherited_operations() {
        let g = order_graph();
        let names: Vec<&str> = g
            .requirement(&"Lattice".into())
            .unwrap()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["le", "sup", "inf"]);
        assert_eq!(g.axioms(&"Lattice".into()).unwrap(), ["le_antisymm"]);
    }

    #[test]
    fn undeclared_super_is_rejected() {
        let mut g = CapabilityGraph::new();
        let err = g
            .declare(Capability::new("Group").with_supers(["Monoid"]))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownSuper { .. }));
        assert!(g.is_empty());
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let mut g = order_graph();
        let err = g.declare(Capability::new("Lattice")).unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateCapability { .. }));
    }

    #[test]
    fn conflicting_inherited_signatures_are_rejected() {
        let mut g = CapabilityGraph::new();
        g.declare(Capability::new("A").with_operation(OpSignature::element("op", 2)))
            .unwrap();
        g.declare(Capability::new("B").with_operation(OpSignature::element("op", 1)))
            .unwrap();
        let err = g
            .declare(Capability::new("C").with_supers(["A", "B"]))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::ConflictingOperation { .. }));
    }

    #[test]
    fn dual_links_are_symmetric() {
        let g = order_graph();
        assert_eq!(
            g.dual_of(&"SemilatticeSup".into()),
            CapabilityId::from("SemilatticeInf")
        );
        assert_eq!(
            g.dual_of(&"SemilatticeInf".into()),
            CapabilityId::from("SemilatticeSup")
        );
        assert_eq!(g.dual_of(&"Lattice".into()), CapabilityId::from("Lattice"));
        assert!(g.is_order_related(&"Preorder".into()));
    }

    #[test]
    fn self_dual_swap_needs_its_partner() {
        let mut g = CapabilityGraph::new();
        let err = g
            .declare(
                Capability::new("OrderTop")
                    .with_operation(OpSignature::element("top", 0).swapped_with("bot")),
            )
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidDuality { .. }));
    }

    #[test]
    fn flip_requires_binary_operation() {
        let mut g = CapabilityGraph::new();
        let err = g
            .declare(
                Capability::new("Weird")
                    .with_operation(OpSignature::prop("pos", 1).with_duality(Duality::Flip)),
            )
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidDuality { .. }));
    }

    #[test]
    fn conflicting_twin_link_is_rejected() {
        let mut g = CapabilityGraph::new();
        g.declare(Capability::new("Group").with_twin("AddGroup")).unwrap();
        let err = g
            .declare(Capability::new("Monoid").with_twin("AddGroup"))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::ConflictingLink { link: "twin", .. }));
        assert!(!g.contains(&"Monoid".into()));
    }

    #[test]
    fn ancestors_and_descendants_follow_the_dag() {
        let g = order_graph();
        assert_eq!(
            g.ancestors(&"Lattice".into()),
            vec![
                CapabilityId::from("Preorder"),
                "PartialOrder".into(),
                "SemilatticeSup".into(),
                "SemilatticeInf".into(),
            ]
        );
        assert_eq!(
            g.descendants(&"PartialOrder".into()),
            vec![
                CapabilityId::from("SemilatticeSup"),
                "SemilatticeInf".into(),
                "Lattice".into(),
            ]
        );
        assert!(g.extends(&"Lattice".into(), &"Preorder".into()));
        assert!(!g.extends(&"Preorder".into(), &"Lattice".into()));
    }
}
