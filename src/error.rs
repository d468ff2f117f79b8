//! Rich diagnostic error types for the structura registry.
//!
//! Each concern defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so users know exactly what went wrong
//! and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigError;

/// Top-level error type for structura.
///
/// Each variant wraps a concern-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum StructuraError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Op(#[from] OpError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Registration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum RegistrationError {
    #[error("duplicate binding: {capability} on {subject} is already implemented ({existing})")]
    #[diagnostic(
        code(structura::registration::duplicate_binding),
        help(
            "At most one implementation may exist per (capability, subject) pair. \
             The existing record was kept unchanged. Remove the second registration, \
             or register it for a different subject type."
        )
    )]
    DuplicateBinding {
        capability: String,
        subject: String,
        existing: String,
    },

    #[error("unknown capability: {capability}")]
    #[diagnostic(
        code(structura::registration::unknown_capability),
        help("Declare the capability before registering implementations or rules that mention it.")
    )]
    UnknownCapability { capability: String },

    #[error("capability already declared: {capability}")]
    #[diagnostic(
        code(structura::registration::duplicate_capability),
        help("Capability names are unique. Pick a different name or drop the second declaration.")
    )]
    DuplicateCapability { capability: String },

    #[error("capability {capability} extends undeclared capability {parent}")]
    #[diagnostic(
        code(structura::registration::unknown_super),
        help("Super-capabilities must be declared first; reorder the declarations.")
    )]
    UnknownSuper { capability: String, parent: String },

    #[error("capability {capability} inherits conflicting signatures for '{operation}': {first} vs {second}")]
    #[diagnostic(
        code(structura::registration::conflicting_operation),
        help(
            "Operations with the same name are merged across super-capabilities, \
             so their arity and sort must agree."
        )
    )]
    ConflictingOperation {
        capability: String,
        operation: String,
        first: String,
        second: String,
    },

    #[error("invalid duality for '{operation}' in {capability}: {message}")]
    #[diagnostic(
        code(structura::registration::invalid_duality),
        help(
            "`flip` applies to binary operations only. `swap` must name a partner \
             operation of the same arity and sort that swaps back."
        )
    )]
    InvalidDuality {
        capability: String,
        operation: String,
        message: String,
    },

    #[error("capability {capability} already has {link} {existing}, cannot link it to {requested}")]
    #[diagnostic(
        code(structura::registration::conflicting_link),
        help("Twin and dual links are symmetric and unique. Check both declarations.")
    )]
    ConflictingLink {
        capability: String,
        link: &'static str,
        existing: String,
        requested: String,
    },

    #[error("implementation of {capability} on {subject} lacks operation '{operation}'")]
    #[diagnostic(
        code(structura::registration::missing_operation),
        help(
            "A primitive must provide every operation required by the capability \
             and all of its super-capabilities."
        )
    )]
    MissingOperation {
        capability: String,
        subject: String,
        operation: String,
    },

    #[error("operation '{operation}' of {capability} has arity {actual}, expected {expected}")]
    #[diagnostic(
        code(structura::registration::arity_mismatch),
        help("Match the arity declared in the capability's operation signature.")
    )]
    ArityMismatch {
        capability: String,
        operation: String,
        expected: usize,
        actual: usize,
    },

    #[error("rule '{rule}' cannot build its conclusion: missing {missing}")]
    #[diagnostic(
        code(structura::registration::incomplete_rule),
        help(
            "An extension rule's premises, extra operations and witnessed axioms \
             must together cover everything the conclusion requires."
        )
    )]
    IncompleteRule { rule: String, missing: String },
}

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ResolutionError {
    #[error("capability not found: {capability} on {subject}")]
    #[diagnostic(
        code(structura::resolution::not_found),
        help(
            "No finite derivation chain reaches this pair from the registered primitives. \
             Register a primitive or a composition rule for it and retry."
        )
    )]
    CapabilityNotFound { capability: String, subject: String },

    #[error("cyclic dependency resolving {capability} on {subject}: {cycle}")]
    #[diagnostic(
        code(structura::resolution::cyclic_dependency),
        help(
            "The rules for this pair only ever require the pair itself. \
             Add a primitive base case or remove one of the rules on the cycle."
        )
    )]
    CyclicDependency {
        capability: String,
        subject: String,
        cycle: String,
    },

    #[error("resolution of {capability} on {subject} exceeded depth {max_depth}")]
    #[diagnostic(
        code(structura::resolution::depth_exceeded),
        help(
            "The derivation chain grew past `max_depth`. Raise it in the registry \
             configuration, or look for rules that keep producing new subject types."
        )
    )]
    DepthExceeded {
        capability: String,
        subject: String,
        max_depth: usize,
    },

    #[error("rule '{rule}' produced an incomplete record for {capability} on {subject}: missing '{missing}'")]
    #[diagnostic(
        code(structura::resolution::invalid_record),
        help(
            "The rule's premises do not supply an operation the conclusion requires. \
             Check twin/dual links and the operation names on both sides."
        )
    )]
    InvalidRecord {
        rule: String,
        capability: String,
        subject: String,
        missing: String,
    },

    #[error("{subject} holds no {what} capability to mirror")]
    #[diagnostic(
        code(structura::resolution::nothing_to_mirror),
        help("Register at least one such capability on the subject first.")
    )]
    NothingToMirror { subject: String, what: &'static str },
}

// ---------------------------------------------------------------------------
// Operation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum OpError {
    #[error("{capability} has no operation '{operation}'")]
    #[diagnostic(
        code(structura::op::unknown),
        help("List the record's operations with `operation_names()`.")
    )]
    UnknownOperation {
        capability: String,
        operation: String,
    },

    #[error("operation '{operation}' takes {expected} argument(s), got {actual}")]
    #[diagnostic(code(structura::op::arity))]
    ArityMismatch {
        operation: String,
        expected: usize,
        actual: usize,
    },

    #[error("expected {expected}, found {found}")]
    #[diagnostic(
        code(structura::op::type_mismatch),
        help("Values passed to an operation must belong to the subject type.")
    )]
    TypeMismatch { expected: &'static str, found: String },

    #[error("operation '{operation}' overflowed")]
    #[diagnostic(code(structura::op::overflow))]
    Overflow { operation: String },

    #[error("operation '{operation}' divided by zero")]
    #[diagnostic(
        code(structura::op::division_by_zero),
        help("Moduli of cyclic groups and residue congruences must be positive.")
    )]
    DivisionByZero { operation: String },

    #[error("{value} is outside the image of embedding '{embedding}'")]
    #[diagnostic(
        code(structura::op::outside_image),
        help(
            "A pulled-back operation produced a value the injection cannot map back. \
             The source subject is not closed under this operation."
        )
    )]
    OutsideImage { embedding: String, value: String },
}

pub type RegistrationResult<T> = std::result::Result<T, RegistrationError>;
pub type ResolutionResult<T> = std::result::Result<T, ResolutionError>;
pub type OpResult<T> = std::result::Result<T, OpError>;

/// Convenience alias for functions returning structura results.
pub type StructuraResult<T> = std::result::Result<T, StructuraError>;
