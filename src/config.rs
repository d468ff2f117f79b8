//! Registry configuration.
//!
//! [`RegistryConfig`] can be built in code (`RegistryConfig::default()`) or
//! loaded from a TOML file:
//!
//! ```toml
//! max_depth = 256
//! cache_failures = true
//! auto_projection = false
//!
//! [[twin]]
//! multiplicative = "mul"
//! additive = "add"
//! ```

use std::path::Path;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file: {path}")]
    #[diagnostic(code(structura::config::io), help("Ensure the file exists and is readable."))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(structura::config::parse),
        help("Check the TOML syntax and field names against `RegistryConfig`.")
    )]
    Parse { path: String, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(structura::config::invalid), help("{message}"))]
    Invalid { message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// One pair of operation names exchanged between the two notations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwinPair {
    pub multiplicative: String,
    pub additive: String,
}

impl TwinPair {
    pub fn new(multiplicative: impl Into<String>, additive: impl Into<String>) -> Self {
        Self {
            multiplicative: multiplicative.into(),
            additive: additive.into(),
        }
    }
}

/// Dictionary used to rename operations between notations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TwinDictionary(Vec<TwinPair>);

impl TwinDictionary {
    pub fn new(pairs: Vec<TwinPair>) -> Self {
        Self(pairs)
    }

    /// The name of `op` in the other notation, if it has one.
    pub fn partner(&self, op: &str) -> Option<&str> {
        self.0.iter().find_map(|pair| {
            if pair.multiplicative == op {
                Some(pair.additive.as_str())
            } else if pair.additive == op {
                Some(pair.multiplicative.as_str())
            } else {
                None
            }
        })
    }

    pub fn pairs(&self) -> &[TwinPair] {
        &self.0
    }
}

impl Default for TwinDictionary {
    fn default() -> Self {
        Self(vec![
            TwinPair::new("mul", "add"),
            TwinPair::new("one", "zero"),
            TwinPair::new("inv", "neg"),
            TwinPair::new("div", "sub"),
        ])
    }
}

/// Configuration for a [`Registry`](crate::registry::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum depth of the active resolution stack (default: 512).
    pub max_depth: usize,
    /// Whether to remember definitive failures until the next registration (default: true).
    pub cache_failures: bool,
    /// Register a projection rule per direct super on every declaration (default: false).
    pub auto_projection: bool,
    /// Operation renaming between multiplicative and additive notation.
    #[serde(rename = "twin")]
    pub twins: TwinDictionary,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_depth: 512,
            cache_failures: true,
            auto_projection: false,
            twins: TwinDictionary::default(),
        }
    }
}

impl RegistryConfig {
    /// Parse and validate a TOML configuration. `origin` names the source in errors.
    pub fn from_toml_str(origin: &str, content: &str) -> ConfigResult<Self> {
        let config: RegistryConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&path.display().to_string(), &content)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid {
                message: "max_depth must be > 0".into(),
            });
        }
        let mut seen: Vec<&str> = Vec::new();
        for pair in self.twins.pairs() {
            for name in [pair.multiplicative.as_str(), pair.additive.as_str()] {
                if seen.contains(&name) {
                    return Err(ConfigError::Invalid {
                        message: format!("operation '{name}' appears in more than one twin pair"),
                    });
                }
                seen.push(name);
            }
        }
        Ok(())
    }
}
