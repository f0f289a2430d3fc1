//! The agent registry: which agents exist and which may receive traffic.
//!
//! The registry keeps its state in an immutable [`Roster`] behind an
//! `Arc`. Readers take a snapshot with [`AgentRegistry::snapshot`] and keep
//! using it for as long as they like; every mutator builds a new roster and
//! swaps it in, so a dispatch round that started before an edit keeps seeing
//! the agents as they were when it began.
//!
//! Mutations are validated first and persisted second; the in-memory roster
//! only changes once storage accepted the change, so a rejected or failed
//! edit is never partially applied.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use groupllm::agent::AgentDefinition;
//! use groupllm::registry::AgentRegistry;
//! use groupllm::store::MemoryStore;
//!
//! let registry = AgentRegistry::load(Arc::new(MemoryStore::new()), "Alice").unwrap();
//! registry.upsert(AgentDefinition::new("Ann")).unwrap();
//!
//! // The human's name is reserved.
//! assert!(registry.upsert(AgentDefinition::new("Alice")).is_err());
//!
//! let before = registry.snapshot();
//! registry.remove("Ann").unwrap();
//! assert!(before.is_active("Ann"));             // old snapshot is unchanged
//! assert!(!registry.snapshot().is_active("Ann"));
//! ```

use crate::groupllm::agent::{name_problem, AgentDefinition};
use crate::groupllm::store::{ConfigStore, StoreError, DEFAULT_AGENTS_KEY};
use serde_json::{json, Value};
use std::error::Error;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Setting key holding the human participant's display name.
pub const USER_NAME_KEY: &str = "user_name";

/// Errors returned by registry mutators.
#[derive(Debug)]
pub enum RegistryError {
    /// The proposed name is empty or otherwise unusable.
    InvalidName(String),
    /// The proposed agent name equals the human's display name.
    ReservedName(String),
    /// Another agent already uses the name.
    DuplicateName(String),
    /// No agent with that name is registered.
    UnknownAgent(String),
    /// Storage rejected the change; nothing was applied.
    Store(StoreError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::InvalidName(reason) => write!(f, "Invalid agent name: {}", reason),
            RegistryError::ReservedName(name) => {
                write!(f, "Name '{}' is the human participant's name", name)
            }
            RegistryError::DuplicateName(name) => write!(f, "Agent '{}' already exists", name),
            RegistryError::UnknownAgent(name) => write!(f, "Agent not found: {}", name),
            RegistryError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl Error for RegistryError {}

impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        RegistryError::Store(e)
    }
}

/// Immutable point-in-time view of the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Roster {
    human_name: String,
    /// Every known agent, in registry iteration order.
    agents: Vec<AgentDefinition>,
    /// Names of agents currently receiving traffic.
    active: Vec<String>,
    default_agents: Vec<String>,
}

impl Roster {
    /// Build a roster directly. Every enabled agent is active.
    ///
    /// `default_agents` is carried along for presentation layers that
    /// preselect agents; it does not affect which agents receive traffic.
    pub fn new(
        human_name: impl Into<String>,
        agents: Vec<AgentDefinition>,
        default_agents: Vec<String>,
    ) -> Self {
        let active = agents
            .iter()
            .filter(|a| a.enabled)
            .map(|a| a.name.clone())
            .collect();
        Self {
            human_name: human_name.into(),
            agents,
            active,
            default_agents,
        }
    }

    pub fn human_name(&self) -> &str {
        &self.human_name
    }

    /// Active agents in registry iteration order.
    pub fn active_agents(&self) -> Vec<&AgentDefinition> {
        self.agents
            .iter()
            .filter(|a| self.active.contains(&a.name))
            .collect()
    }

    /// Names of the active agents, in registry iteration order.
    pub fn active_names(&self) -> Vec<String> {
        self.active_agents().iter().map(|a| a.name.clone()).collect()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.iter().any(|n| n == name)
    }

    /// Any known agent, active or not.
    pub fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Every known agent, active or not.
    pub fn all_agents(&self) -> &[AgentDefinition] {
        &self.agents
    }

    pub fn default_agents(&self) -> &[String] {
        &self.default_agents
    }

    fn apply_upsert(&mut self, replacing: &str, def: AgentDefinition) {
        let name = def.name.clone();
        let enabled = def.enabled;

        match self.agents.iter().position(|a| a.name == replacing) {
            Some(index) => self.agents[index] = def,
            None => self.agents.push(def),
        }

        if replacing != name {
            for n in self.active.iter_mut().chain(self.default_agents.iter_mut()) {
                if n.as_str() == replacing {
                    *n = name.clone();
                }
            }
        }

        if enabled {
            if !self.active.contains(&name) {
                self.active.push(name);
            }
        } else {
            self.active.retain(|n| n != &name);
        }
    }

    fn apply_remove(&mut self, name: &str) {
        self.agents.retain(|a| a.name != name);
        self.active.retain(|n| n != name);
        self.default_agents.retain(|n| n != name);
    }
}

/// Holder of the current [`Roster`], backed by a [`ConfigStore`].
pub struct AgentRegistry {
    store: Arc<dyn ConfigStore>,
    current: RwLock<Arc<Roster>>,
}

impl AgentRegistry {
    /// Load agents and the default-agent list from `store`.
    ///
    /// `human_name` is reserved: a stored agent with that name is skipped with
    /// a warning.
    pub fn load(store: Arc<dyn ConfigStore>, human_name: &str) -> Result<Self, RegistryError> {
        let roster = Self::read_roster(store.as_ref(), human_name)?;
        log::info!(
            "groupllm::registry: loaded {} agents ({} active)",
            roster.agents.len(),
            roster.active.len()
        );
        Ok(Self {
            store,
            current: RwLock::new(Arc::new(roster)),
        })
    }

    fn read_roster(store: &dyn ConfigStore, human_name: &str) -> Result<Roster, RegistryError> {
        let mut agents = Vec::new();
        for (_, def) in store.load_all_agents()? {
            if def.name == human_name {
                log::warn!(
                    "groupllm::registry: ignoring stored agent '{}' that shares the human's name",
                    def.name
                );
                continue;
            }
            agents.push(def);
        }

        let default_agents = match store.load_setting(DEFAULT_AGENTS_KEY, json!([])) {
            Value::Array(names) => names
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        Ok(Roster::new(human_name, agents, default_agents))
    }

    /// The store this registry persists to.
    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Point-in-time view that later edits will not affect.
    pub fn snapshot(&self) -> Arc<Roster> {
        let guard = self.current.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    /// Active agent definitions in registry iteration order.
    pub fn list_active(&self) -> Vec<AgentDefinition> {
        self.snapshot().active_agents().into_iter().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<AgentDefinition> {
        self.snapshot().get(name).cloned()
    }

    pub fn human_name(&self) -> String {
        self.snapshot().human_name().to_string()
    }

    /// Create an agent or replace the one with the same name.
    pub fn upsert(&self, def: AgentDefinition) -> Result<(), RegistryError> {
        let name = def.name.clone();
        self.modify(|roster, store| {
            Self::validate_name(roster, &def.name)?;
            store.save_agent(&def)?;
            roster.apply_upsert(&name, def);
            Ok(())
        })?;
        log::info!("groupllm::registry: saved agent '{}'", name);
        Ok(())
    }

    /// Replace `previous_name` with `def`, which may carry a new name.
    ///
    /// Fails when the new name belongs to a different existing agent.
    pub fn rename(&self, previous_name: &str, def: AgentDefinition) -> Result<(), RegistryError> {
        let name = def.name.clone();
        self.modify(|roster, store| {
            if roster.get(previous_name).is_none() {
                return Err(RegistryError::UnknownAgent(previous_name.to_string()));
            }
            Self::validate_name(roster, &def.name)?;
            if def.name != previous_name && roster.get(&def.name).is_some() {
                return Err(RegistryError::DuplicateName(def.name.clone()));
            }

            store.save_agent(&def)?;
            if def.name != previous_name {
                if let Err(e) = store.delete_agent(previous_name) {
                    log::error!(
                        "groupllm::registry: renamed '{}' to '{}' but could not delete the old entry: {}",
                        previous_name,
                        def.name,
                        e
                    );
                }
            }
            roster.apply_upsert(previous_name, def);
            Ok(())
        })?;
        log::info!("groupllm::registry: saved agent '{}' (was '{}')", name, previous_name);
        Ok(())
    }

    /// Delete an agent; it also leaves the active and default-loaded sets.
    pub fn remove(&self, name: &str) -> Result<(), RegistryError> {
        self.modify(|roster, store| {
            if roster.get(name).is_none() {
                return Err(RegistryError::UnknownAgent(name.to_string()));
            }
            store.delete_agent(name)?;
            roster.apply_remove(name);
            Ok(())
        })?;
        log::info!("groupllm::registry: removed agent '{}'", name);
        Ok(())
    }

    /// Change which agents are loaded by default. Unknown names are rejected.
    pub fn set_default_agents(&self, names: Vec<String>) -> Result<(), RegistryError> {
        self.modify(|roster, store| {
            if let Some(unknown) = names.iter().find(|n| roster.get(n).is_none()) {
                return Err(RegistryError::UnknownAgent(unknown.clone()));
            }
            store.save_setting(DEFAULT_AGENTS_KEY, json!(names))?;
            roster.default_agents = names.clone();
            Ok(())
        })
    }

    /// Change the human's display name. It may not equal any agent's name.
    pub fn set_human_name(&self, name: &str) -> Result<(), RegistryError> {
        let name = name.trim();
        self.modify(|roster, store| {
            if name.is_empty() {
                return Err(RegistryError::InvalidName("user name must not be empty".into()));
            }
            if roster.get(name).is_some() {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
            store.save_setting(USER_NAME_KEY, json!(name))?;
            roster.human_name = name.to_string();
            Ok(())
        })
    }

    /// Re-read every definition from storage, replacing the current roster.
    pub fn reload(&self) -> Result<(), RegistryError> {
        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        let roster = Self::read_roster(self.store.as_ref(), guard.human_name())?;
        *guard = Arc::new(roster);
        Ok(())
    }

    fn validate_name(roster: &Roster, name: &str) -> Result<(), RegistryError> {
        if let Some(reason) = name_problem(name) {
            return Err(RegistryError::InvalidName(reason.to_string()));
        }
        if name == roster.human_name {
            return Err(RegistryError::ReservedName(name.to_string()));
        }
        Ok(())
    }

    /// Copy the roster, let `change` edit the copy, and publish it only if
    /// `change` succeeded.
    fn modify<F>(&self, change: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut Roster, &dyn ConfigStore) -> Result<(), RegistryError>,
    {
        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        let mut next = Roster::clone(&guard);
        match change(&mut next, self.store.as_ref()) {
            Ok(()) => {
                *guard = Arc::new(next);
                Ok(())
            }
            Err(e) => {
                log::warn!("groupllm::registry: change rejected: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groupllm::store::MemoryStore;

    fn registry_with(agents: Vec<AgentDefinition>) -> AgentRegistry {
        let store = Arc::new(MemoryStore::new().with_agents(agents));
        AgentRegistry::load(store, "Alice").unwrap()
    }

    #[test]
    fn test_disabled_agents_are_known_but_inactive() {
        let registry = registry_with(vec![
            AgentDefinition::new("Ann"),
            AgentDefinition::new("Bob").with_enabled(false),
        ]);
        let roster = registry.snapshot();
        assert_eq!(roster.active_names(), vec!["Ann".to_string()]);
        assert!(roster.get("Bob").is_some());
        assert!(registry.get("Bob").is_some());
    }

    #[test]
    fn test_activity_follows_enabled_across_load_upsert_and_reload() {
        let store = Arc::new(
            MemoryStore::new()
                .with_agents(vec![
                    AgentDefinition::new("Ann"),
                    AgentDefinition::new("Bob"),
                    AgentDefinition::new("Cid").with_enabled(false),
                ])
                .with_setting(DEFAULT_AGENTS_KEY, json!(["Ann"])),
        );
        let registry = AgentRegistry::load(store, "Alice").unwrap();
        let expected = vec!["Ann".to_string(), "Bob".to_string()];
        assert_eq!(registry.snapshot().active_names(), expected);
        assert_eq!(registry.snapshot().default_agents(), ["Ann".to_string()]);

        registry
            .upsert(AgentDefinition::new("Bob").with_persona("terse"))
            .unwrap();
        assert_eq!(registry.snapshot().active_names(), expected);

        registry.reload().unwrap();
        assert_eq!(registry.snapshot().active_names(), expected);
        assert_eq!(registry.get("Bob").unwrap().persona_prompt, "terse");

        registry.set_default_agents(vec!["Bob".into()]).unwrap();
        registry.reload().unwrap();
        assert_eq!(registry.snapshot().active_names(), expected);
        assert_eq!(registry.snapshot().default_agents(), ["Bob".to_string()]);
    }

    #[test]
    fn test_upsert_toggles_activity() {
        let registry = registry_with(vec![AgentDefinition::new("Ann")]);
        registry
            .upsert(AgentDefinition::new("Ann").with_enabled(false))
            .unwrap();
        assert!(registry.list_active().is_empty());

        registry.upsert(AgentDefinition::new("Ann")).unwrap();
        assert_eq!(registry.list_active().len(), 1);
    }

    #[test]
    fn test_rename_keeps_position_and_rejects_collisions() {
        let registry = registry_with(vec![
            AgentDefinition::new("Ann"),
            AgentDefinition::new("Bob"),
            AgentDefinition::new("Cid"),
        ]);

        let err = registry.rename("Ann", AgentDefinition::new("Bob")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(_)));

        registry.rename("Ann", AgentDefinition::new("Ada")).unwrap();
        assert_eq!(
            registry.snapshot().active_names(),
            vec!["Ada".to_string(), "Bob".to_string(), "Cid".to_string()]
        );
        assert!(registry.store().load_all_agents().unwrap().get("Ann").is_none());
    }

    #[test]
    fn test_set_human_name_rejects_agent_names() {
        let registry = registry_with(vec![AgentDefinition::new("Ann")]);
        assert!(registry.set_human_name("Ann").is_err());
        assert!(registry.set_human_name("  ").is_err());
        registry.set_human_name("Zoe").unwrap();
        assert_eq!(registry.human_name(), "Zoe");
        assert!(registry.upsert(AgentDefinition::new("Zoe")).is_err());
    }
}
