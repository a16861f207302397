//! Capability registry loaded from RON
//!
//! The registry maps each agent id to the capability tags the router matches
//! against and the tools the agent may call. It is read-only once loaded; a
//! reload builds a fresh registry and swaps it in whole.

use crate::error::{BrainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::builtin;

pub const REGISTRY_FILE: &str = "agents.ron";

/// Routing-relevant view of an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub capability_tags: BTreeSet<String>,
    pub allowed_tools: BTreeSet<String>,
}

impl AgentDescriptor {
    pub fn allows_tool(&self, tool_name: &str) -> bool {
        self.allowed_tools.contains(tool_name)
    }
}

fn default_template() -> String {
    "{content}\n\n{actions}".to_string()
}

/// Full configuration of one agent variant.
///
/// Variants differ only in data: tools, tags, response template and temperature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: String,
    pub name: String,
    pub persona: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub capability_tags: BTreeSet<String>,
    #[serde(default)]
    pub allowed_tools: BTreeSet<String>,
    /// Placeholders: {content}, {actions}, {agent}, {name}
    #[serde(default = "default_template")]
    pub response_template: String,
    pub temperature: f32,
}

impl AgentProfile {
    pub fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            agent_id: self.agent_id.clone(),
            capability_tags: self
                .capability_tags
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            allowed_tools: self.allowed_tools.clone(),
        }
    }
}

/// On-disk layout of `agents.ron`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryFile {
    pub default_agent: String,
    pub agents: Vec<AgentProfile>,
}

#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    default_agent: String,
    profiles: BTreeMap<String, AgentProfile>,
    descriptors: BTreeMap<String, AgentDescriptor>,
}

impl CapabilityRegistry {
    /// Build and validate a registry from profiles
    pub fn new(default_agent: impl Into<String>, agents: Vec<AgentProfile>) -> Result<Self> {
        let default_agent = default_agent.into();
        let mut profiles = BTreeMap::new();
        let mut descriptors = BTreeMap::new();

        for profile in agents {
            if profile.agent_id.trim().is_empty() {
                return Err(BrainError::Config("agent with empty agent_id".to_string()));
            }
            if !(0.0..=2.0).contains(&profile.temperature) {
                return Err(BrainError::Config(format!(
                    "agent '{}' has temperature {} outside 0.0..=2.0",
                    profile.agent_id, profile.temperature
                )));
            }
            let descriptor = profile.descriptor();
            if descriptors.insert(profile.agent_id.clone(), descriptor).is_some() {
                return Err(BrainError::Config(format!(
                    "duplicate agent_id '{}'",
                    profile.agent_id
                )));
            }
            profiles.insert(profile.agent_id.clone(), profile);
        }

        if !profiles.contains_key(&default_agent) {
            return Err(BrainError::Config(format!(
                "default agent '{}' is not registered",
                default_agent
            )));
        }

        Ok(Self {
            default_agent,
            profiles,
            descriptors,
        })
    }

    pub fn from_file(file: RegistryFile) -> Result<Self> {
        Self::new(file.default_agent, file.agents)
    }

    /// Registry of the built-in agents
    pub fn builtin() -> Result<Self> {
        Self::new(builtin::DEFAULT_AGENT, builtin::profiles())
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.descriptors.contains_key(agent_id)
    }

    pub fn descriptor(&self, agent_id: &str) -> Option<&AgentDescriptor> {
        self.descriptors.get(agent_id)
    }

    pub fn profile(&self, agent_id: &str) -> Option<&AgentProfile> {
        self.profiles.get(agent_id)
    }

    /// Descriptors ordered by agent id
    pub fn descriptors(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.descriptors.values()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &AgentProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }
}

/// Load the registry from `<config_dir>/agents.ron`, or the built-ins when the file is absent
pub fn load_registry(config_dir: &Path) -> Result<CapabilityRegistry> {
    let path = config_dir.join(REGISTRY_FILE);
    if !path.exists() {
        log::warn!("[registry] {:?} not found, using built-in agents", path);
        return CapabilityRegistry::builtin();
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| BrainError::Config(format!("failed to read {:?}: {}", path, e)))?;
    let file: RegistryFile = ron::from_str(&content)
        .map_err(|e| BrainError::Config(format!("failed to parse {:?}: {}", path, e)))?;
    let registry = CapabilityRegistry::from_file(file)?;

    log::info!(
        "[registry] Loaded {} agents from {:?} (default: {})",
        registry.len(),
        path,
        registry.default_agent()
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn profile(id: &str) -> AgentProfile {
        AgentProfile {
            agent_id: id.to_string(),
            name: id.to_string(),
            persona: "test".to_string(),
            instructions: String::new(),
            capability_tags: ["Files ".to_string()].into_iter().collect(),
            allowed_tools: ["filesystem".to_string()].into_iter().collect(),
            response_template: default_template(),
            temperature: 0.2,
        }
    }

    #[test]
    fn test_builtin_registry_is_valid() {
        let registry = CapabilityRegistry::builtin().unwrap();
        assert!(registry.contains("filesystem_agent"));
        assert_eq!(registry.default_agent(), builtin::DEFAULT_AGENT);
    }

    #[test]
    fn test_tags_are_normalized() {
        let registry = CapabilityRegistry::new("a", vec![profile("a")]).unwrap();
        let d = registry.descriptor("a").unwrap();
        assert!(d.capability_tags.contains("files"));
        assert!(d.allows_tool("filesystem"));
        assert!(!d.allows_tool("whatsapp"));
    }

    #[test]
    fn test_rejects_duplicates_and_missing_default() {
        assert!(CapabilityRegistry::new("a", vec![profile("a"), profile("a")]).is_err());
        assert!(CapabilityRegistry::new("missing", vec![profile("a")]).is_err());
        let mut hot = profile("a");
        hot.temperature = 3.5;
        assert!(CapabilityRegistry::new("a", vec![hot]).is_err());
    }

    #[test]
    fn test_load_registry_from_ron_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join(REGISTRY_FILE)).unwrap();
        write!(
            file,
            r#"(
                default_agent: "helper",
                agents: [
                    (
                        agent_id: "helper",
                        name: "Helper",
                        persona: "calm",
                        capability_tags: ["help"],
                        allowed_tools: ["memory"],
                        temperature: 0.3,
                    ),
                ],
            )"#
        )
        .unwrap();

        let registry = load_registry(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.default_agent(), "helper");
        assert_eq!(registry.profile("helper").unwrap().response_template, default_template());
    }

    #[test]
    fn test_load_registry_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let registry = load_registry(dir.path()).unwrap();
        assert_eq!(registry.len(), builtin::profiles().len());
    }

    #[test]
    fn test_load_registry_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(REGISTRY_FILE), "(not valid").unwrap();
        assert!(matches!(load_registry(dir.path()), Err(BrainError::Config(_))));
    }

    #[test]
    fn test_shipped_config_matches_builtin() {
        let config_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config");
        let shipped = load_registry(&config_dir).unwrap();
        let builtin = CapabilityRegistry::builtin().unwrap();

        assert_eq!(shipped.default_agent(), builtin.default_agent());
        let shipped: Vec<_> = shipped.descriptors().cloned().collect();
        let builtin: Vec<_> = builtin.descriptors().cloned().collect();
        assert_eq!(shipped, builtin);
    }
}
