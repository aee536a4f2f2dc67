use crate::{ForemanError, ForemanResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Model parameters attached to an agent descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Model identifier passed through to the execution host.
    pub model_id: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum output tokens per turn.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Maximum reasoning-loop turns per execution.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_turns() -> u32 {
    20
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model_id: "default".to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_turns: default_max_turns(),
        }
    }
}

/// A named, versioned capability descriptor.
///
/// Descriptors are immutable once loaded; the catalog that owns them is
/// built at process start from external agent definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Catalog name, optionally namespaced with `/` (e.g. `review/security`).
    pub name: String,
    /// Descriptor version, bumped when the external definition changes.
    #[serde(default = "default_version")]
    pub version: String,
    /// Human-readable capability summary.
    pub description: String,
    /// Tools this agent may use during execution.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Model and sampling parameters.
    #[serde(default)]
    pub model: ModelParams,
}

fn default_version() -> String {
    "1".to_string()
}

impl AgentDescriptor {
    /// Creates a descriptor with default version, tools, and model params.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: description.into(),
            allowed_tools: Vec::new(),
            model: ModelParams::default(),
        }
    }

    /// Sets the allowed tool list.
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    /// Sets the model parameters.
    pub fn with_model(mut self, model: ModelParams) -> Self {
        self.model = model;
        self
    }

    /// The namespace portion of the agent name (everything before the final
    /// `/`), or `""` for un-namespaced agents.
    pub fn namespace(&self) -> &str {
        namespace_of(&self.name)
    }
}

fn namespace_of(name: &str) -> &str {
    name.rfind('/').map_or("", |idx| &name[..idx])
}

/// Read-only catalog of agent descriptors, resolved once at startup.
///
/// Unknown names resolve to a typed [`ForemanError::AgentNotFound`] carrying
/// the sibling agents in the same namespace, never a runtime crash.
#[derive(Debug, Clone, Default)]
pub struct AgentCatalog {
    agents: HashMap<String, AgentDescriptor>,
}

impl AgentCatalog {
    /// Builds a catalog from loaded descriptors. Later duplicates of a name
    /// replace earlier ones.
    pub fn from_descriptors(descriptors: Vec<AgentDescriptor>) -> Self {
        let agents = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self { agents }
    }

    /// Resolves a name to its descriptor.
    pub fn resolve(&self, name: &str) -> ForemanResult<&AgentDescriptor> {
        self.agents.get(name).ok_or_else(|| {
            let namespace = namespace_of(name);
            let mut siblings: Vec<String> = self
                .agents
                .keys()
                .filter(|n| namespace_of(n) == namespace)
                .cloned()
                .collect();
            siblings.sort();
            ForemanError::AgentNotFound {
                name: name.to_string(),
                siblings,
            }
        })
    }

    /// Whether the catalog contains `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// All registered agent names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
