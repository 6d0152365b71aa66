//! Engine configuration
//!
//! Loaded from TOML. Every section is optional; a missing file yields the
//! defaults.
//!
//! ```toml
//! [auth]
//! guard = "staff"
//!
//! [defaults]
//! capability = "approvals.manage"
//! step_name = "Default"
//!
//! [defaults.step_meta]
//! summary = "Pending change"
//!
//! [[flows.orders.approve]]
//! name = "Ops"
//! threshold = 2
//! signers = { capabilities = ["orders.manage"] }
//! ```

use guardrails_flow::{ConfiguredFlows, FlowBuilder};
use guardrails_types::{AttributeMap, FlowDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A required engine component was not supplied to the builder
    #[error("{0} required")]
    MissingComponent(&'static str),
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailsConfig {
    pub auth: AuthConfig,
    pub defaults: DefaultsConfig,
    /// Nested flow overrides addressed by dotted `feature.action` keys
    pub flows: Value,
}

/// Actor realm settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Guard given to steps built with [`GuardrailsConfig::flow_builder`]
    pub guard: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            guard: "staff".to_string(),
        }
    }
}

/// Built-in fallback step and step metadata defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub capability: String,
    pub step_name: String,
    /// Merged into the meta of every configured step that lacks the key
    pub step_meta: AttributeMap,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            capability: "approvals.manage".to_string(),
            step_name: "Default".to_string(),
            step_meta: AttributeMap::new(),
        }
    }
}

impl GuardrailsConfig {
    /// Load configuration from `path`, or defaults when the file is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    pub fn configured_flows(&self) -> ConfiguredFlows {
        let flows = if self.flows.is_null() {
            Value::Object(AttributeMap::new())
        } else {
            self.flows.clone()
        };
        ConfiguredFlows::new(flows)
    }

    /// Flow builder whose steps default to the configured guard.
    pub fn flow_builder(&self) -> FlowBuilder {
        FlowBuilder::with_default_guard(self.auth.guard.clone())
    }

    /// The single step applied when nothing else provides a flow.
    pub fn default_flow(&self) -> FlowDefinition {
        FlowDefinition::single(&self.defaults.step_name, &self.defaults.capability)
    }
}
