// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # structura
//!
//! A capability registry for algebraic structure hierarchies.
//!
//! Capabilities are typeclass-like interfaces (a set of required operations
//! plus named axioms) that extend each other and form a DAG. Primitive
//! implementations are registered for concrete subject types; every other
//! implementation is synthesized on demand by composition rules and memoized.
//!
//! ## Architecture
//!
//! - **Capabilities** (`capability`): declarations, operation signatures, the extension DAG (petgraph)
//! - **Subjects** (`subject`): opaque and structural subject types (order dual, twins, products, quotients)
//! - **Rules** (`rules`): extension, projection, pullback, product, quotient, order-dual, additive twin
//! - **Registry** (`registry`): registration, cycle-checked memoized resolution, mirrored capability sets
//! - **Catalog** (`catalog`): TOML declarations, with the standard hierarchy bundled
//!
//! ## Library usage
//!
//! ```
//! use structura::catalog::Catalog;
//! use structura::registry::Registry;
//! use structura::samples;
//! use structura::value::Value;
//!
//! let registry = Registry::new();
//! Catalog::standard().unwrap().apply(&registry).unwrap();
//! let z5 = samples::register_cyclic(&registry, 5).unwrap();
//!
//! let group = registry.resolve("OrderedCommGroup", &z5).unwrap();
//! assert_eq!(group.call("inv", &[Value::Int(2)]).unwrap(), Value::Int(3));
//! ```

pub mod capability;
pub mod catalog;
pub mod config;
pub mod error;
pub mod operation;
pub mod record;
pub mod registry;
pub mod rules;
pub mod samples;
pub mod subject;
pub mod value;
