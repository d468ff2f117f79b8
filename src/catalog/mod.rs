//! Catalogs: TOML-defined capability hierarchies.
//!
//! A catalog is a bundle of capability declarations and declarative rules
//! that can be applied to a [`Registry`]. The standard algebraic hierarchy is
//! bundled into the binary; others are loaded from disk.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::{Capability, CapabilityId};
use crate::error::RegistrationError;
use crate::registry::Registry;
use crate::rules::CompositionRule;

// ── Errors ──────────────────────────────────────────────────────────────

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("failed to parse catalog \"{id}\": {message}")]
    #[diagnostic(
        code(structura::catalog::parse),
        help("Check the TOML syntax: a [catalog] table, then [[capability]] and [[rule]] entries.")
    )]
    Parse { id: String, message: String },

    #[error("failed to read catalog file: {path}")]
    #[diagnostic(code(structura::catalog::io), help("Ensure the file exists and is readable."))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to apply catalog \"{id}\"")]
    #[diagnostic(
        code(structura::catalog::apply),
        help("Capabilities must be declared after their supers, and rules after what they name.")
    )]
    Apply {
        id: String,
        #[source]
        #[diagnostic_source]
        source: RegistrationError,
    },
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

// ── Data model ──────────────────────────────────────────────────────────

/// Where a catalog came from.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// Bundled into the binary via `include_str!`.
    Bundled,
    /// Loaded from a file.
    External(PathBuf),
}

/// A declarative composition rule, as written in a catalog.
///
/// Rules that carry closures (pullback, quotient, custom) are registered in
/// code instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RuleSpec {
    Extension {
        name: String,
        conclusion: CapabilityId,
        #[serde(default)]
        premises: Vec<CapabilityId>,
        #[serde(default)]
        witnesses: Vec<String>,
    },
    Projection {
        from: CapabilityId,
        to: CapabilityId,
    },
    Product {
        #[serde(default)]
        only: Option<Vec<CapabilityId>>,
    },
    OrderDual,
    AdditiveTwin,
}

impl RuleSpec {
    pub fn to_rule(&self) -> CompositionRule {
        match self {
            Self::Extension {
                name,
                conclusion,
                premises,
                witnesses,
            } => CompositionRule::extension(name.clone(), conclusion, premises)
                .witnessing(witnesses.iter().cloned()),
            Self::Projection { from, to } => CompositionRule::projection(from, to),
            Self::Product { only: None } => CompositionRule::product(),
            Self::Product { only: Some(only) } => CompositionRule::product().only(only),
            Self::OrderDual => CompositionRule::order_dual(),
            Self::AdditiveTwin => CompositionRule::additive_twin(),
        }
    }
}

/// A parsed catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    /// Register a projection rule per direct super after the rules.
    pub projections: bool,
    pub capabilities: Vec<Capability>,
    pub rules: Vec<RuleSpec>,
    pub source: CatalogSource,
}

/// Report after applying a catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogReport {
    pub id: String,
    pub capabilities: usize,
    pub rules: usize,
    pub projections: usize,
}

// ── TOML deserialization helpers ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CatalogToml {
    catalog: CatalogMeta,
    #[serde(default)]
    capability: Vec<Capability>,
    #[serde(default)]
    rule: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct CatalogMeta {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    projections: bool,
}

const ALGEBRA_TOML: &str = include_str!("../../data/catalogs/algebra.toml");

// ── Loading and applying ────────────────────────────────────────────────

impl Catalog {
    /// Parse a catalog. `origin` names the source in parse errors.
    pub fn from_toml_str(origin: &str, content: &str, source: CatalogSource) -> CatalogResult<Self> {
        let parsed: CatalogToml = toml::from_str(content).map_err(|e| CatalogError::Parse {
            id: origin.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            id: parsed.catalog.id,
            name: parsed.catalog.name,
            version: parsed.catalog.version,
            description: parsed.catalog.description,
            projections: parsed.catalog.projections,
            capabilities: parsed.capability,
            rules: parsed.rule,
            source,
        })
    }

    pub fn load(path: &Path) -> CatalogResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(
            &path.display().to_string(),
            &content,
            CatalogSource::External(path.to_path_buf()),
        )
    }

    /// The bundled standard hierarchy.
    pub fn standard() -> CatalogResult<Self> {
        Self::from_toml_str("algebra", ALGEBRA_TOML, CatalogSource::Bundled)
    }

    /// Declare every capability, then register the rules in order.
    ///
    /// Stops at the first registration error; declarations made before it
    /// stay in the registry.
    pub fn apply(&self, registry: &Registry) -> CatalogResult<CatalogReport> {
        let fail = |source| CatalogError::Apply {
            id: self.id.clone(),
            source,
        };

        for capability in &self.capabilities {
            registry.declare_capability(capability.clone()).map_err(fail)?;
        }
        for spec in &self.rules {
            registry.register_rule(spec.to_rule()).map_err(fail)?;
        }

        let mut projections = 0;
        // A registry with auto_projection already added them on declaration.
        if self.projections && !registry.config().auto_projection {
            for capability in &self.capabilities {
                projections += registry
                    .register_projections(&capability.id)
                    .map_err(fail)?;
            }
        }

        tracing::info!(
            catalog = %self.id,
            capabilities = self.capabilities.len(),
            rules = self.rules.len(),
            projections,
            "applied catalog"
        );
        Ok(CatalogReport {
            id: self.id.clone(),
            capabilities: self.capabilities.len(),
            rules: self.rules.len(),
            projections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Duality, Notation};

    #[test]
    fn standard_catalog_parses() {
        let catalog = Catalog::standard().unwrap();
        assert_eq!(catalog.id, "algebra");
        assert!(catalog.projections);
        assert!(catalog.capabilities.iter().any(|c| c.id.as_str() == "LatticeCommGroup"));

        let sup = catalog
            .capabilities
            .iter()
            .find(|c| c.id.as_str() == "SemilatticeSup")
            .unwrap();
        assert_eq!(sup.operations[0].duality, Duality::Swap("inf".into()));
        assert_eq!(sup.dual, Some(CapabilityId::from("SemilatticeInf")));
    }

    #[test]
    fn standard_catalog_applies() {
        let registry = Registry::new();
        let report = Catalog::standard().unwrap().apply(&registry).unwrap();
        assert_eq!(report.capabilities, registry.capabilities().len());
        assert!(report.projections > 0);

        let info = registry.describe("OrderedAddCommGroup").unwrap();
        assert_eq!(info.notation, Notation::Additive);
        assert_eq!(info.twin, Some(CapabilityId::from("OrderedCommGroup")));
        let names: Vec<&str> = info.requirement.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["add", "zero", "neg", "le"]);
    }

    #[test]
    fn rule_kinds_parse() {
        let catalog = Catalog::from_toml_str(
            "inline",
            r#"
            [catalog]
            id = "rules"

            [[rule]]
            kind = "order-dual"

            [[rule]]
            kind = "product"
            only = ["Preorder"]

            [[rule]]
            kind = "projection"
            from = "PartialOrder"
            to = "Preorder"
            "#,
            CatalogSource::Bundled,
        )
        .unwrap();
        assert_eq!(catalog.rules.len(), 3);
        assert_eq!(catalog.rules[0], RuleSpec::OrderDual);
        assert_eq!(catalog.rules[2].to_rule().name(), "PartialOrder->Preorder");
    }

    #[test]
    fn unknown_rule_kind_is_a_parse_error() {
        let err = Catalog::from_toml_str(
            "inline",
            "[catalog]\nid = \"x\"\n[[rule]]\nkind = \"telepathy\"\n",
            CatalogSource::Bundled,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Parse { .. }));
    }

    #[test]
    fn apply_reports_registration_errors() {
        let catalog = Catalog::from_toml_str(
            "inline",
            r#"
            [catalog]
            id = "broken"

            [[capability]]
            name = "Child"
            extends = ["Missing"]
            "#,
            CatalogSource::Bundled,
        )
        .unwrap();
        let err = catalog.apply(&Registry::new()).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Apply {
                source: RegistrationError::UnknownSuper { .. },
                ..
            }
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tiny.toml");
        std::fs::write(
            &path,
            "[catalog]\nid = \"tiny\"\n\n[[capability]]\nname = \"Magma\"\noperations = [{ name = \"mul\", arity = 2 }]\n",
        )
        .unwrap();
        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.id, "tiny");
        assert!(matches!(catalog.source, CatalogSource::External(_)));

        let err = Catalog::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }
}
