//! Subject types: the carriers capabilities attach to.
//!
//! A subject is either an opaque named type or a structural form built from
//! other subjects. Structural forms are what composition rules decompose: the
//! order dual of `T` borrows `T`'s structure with the order reversed, a product
//! borrows from both factors, and so on. Use the constructor methods rather
//! than the raw variants; they keep subjects in normal form, so that
//! `T.order_dual().order_dual() == T`.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubjectType {
    Named(String),
    /// `T` with its order reversed.
    OrderDual(Box<SubjectType>),
    /// `T` with its multiplicative structure written additively.
    Additive(Box<SubjectType>),
    /// `T` with its additive structure written multiplicatively.
    Multiplicative(Box<SubjectType>),
    Product(Box<SubjectType>, Box<SubjectType>),
    /// `T` modulo a registered congruence.
    Quotient {
        base: Box<SubjectType>,
        congruence: String,
    },
}

impl SubjectType {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn order_dual(self) -> Self {
        match self {
            Self::OrderDual(inner) => *inner,
            other => Self::OrderDual(Box::new(other)),
        }
    }

    pub fn additive(self) -> Self {
        match self {
            Self::Multiplicative(inner) => *inner,
            other => Self::Additive(Box::new(other)),
        }
    }

    pub fn multiplicative(self) -> Self {
        match self {
            Self::Additive(inner) => *inner,
            other => Self::Multiplicative(Box::new(other)),
        }
    }

    pub fn product(left: SubjectType, right: SubjectType) -> Self {
        Self::Product(Box::new(left), Box::new(right))
    }

    pub fn quotient(self, congruence: impl Into<String>) -> Self {
        Self::Quotient {
            base: Box::new(self),
            congruence: congruence.into(),
        }
    }

    /// Rebuild the subject through the normalizing constructors.
    ///
    /// Needed for values built from the raw variants, e.g. deserialized ones.
    pub fn normalized(self) -> Self {
        match self {
            Self::Named(_) => self,
            Self::OrderDual(inner) => inner.normalized().order_dual(),
            Self::Additive(inner) => inner.normalized().additive(),
            Self::Multiplicative(inner) => inner.normalized().multiplicative(),
            Self::Product(l, r) => Self::product(l.normalized(), r.normalized()),
            Self::Quotient { base, congruence } => base.normalized().quotient(congruence),
        }
    }

    /// Nesting depth of structural forms; a named subject has depth 0.
    pub fn depth(&self) -> usize {
        match self {
            Self::Named(_) => 0,
            Self::OrderDual(inner) | Self::Additive(inner) | Self::Multiplicative(inner) => {
                1 + inner.depth()
            }
            Self::Product(l, r) => 1 + l.depth().max(r.depth()),
            Self::Quotient { base, .. } => 1 + base.depth(),
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::OrderDual(inner) => write!(f, "OrderDual({inner})"),
            Self::Additive(inner) => write!(f, "Additive({inner})"),
            Self::Multiplicative(inner) => write!(f, "Multiplicative({inner})"),
            Self::Product(l, r) => write!(f, "({l} × {r})"),
            Self::Quotient { base, congruence } => write!(f, "({base} / {congruence})"),
        }
    }
}

impl From<&str> for SubjectType {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}
