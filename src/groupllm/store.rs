//! Storage collaborators for agent definitions, settings and prompts.
//!
//! The engine only talks to storage through [`ConfigStore`]. Two
//! implementations ship with the crate:
//!
//! - [`JsonFileStore`] keeps the classic directory layout: one pretty-printed
//!   JSON file per agent under `robots/`, prompt texts under `prompts/`, and
//!   every setting in `main_config.json`.
//! - [`MemoryStore`] keeps everything in process, for tests and for
//!   applications that persist configuration elsewhere.
//!
//! # Disk Layout
//!
//! ```text
//! <root>/
//!   main_config.json        {"user_name": "Alice", "max_agent_turns": 10, ...}
//!   robots/Ann.json         {"name": "Ann", "persona_prompt": "...", ...}
//!   robots/Bob.json
//!   prompts/botanist.txt
//! ```

use crate::groupllm::agent::{AgentDefinition, DEFAULT_AGENT_COLORS};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Setting key holding the names of agents loaded by default.
pub const DEFAULT_AGENTS_KEY: &str = "default_agents";

/// Errors raised by a [`ConfigStore`].
#[derive(Debug)]
pub enum StoreError {
    /// Reading or writing the backing files failed.
    Io(io::Error),
    /// A stored document could not be (de)serialised.
    Serialization(String),
    /// The requested agent or prompt does not exist.
    NotFound(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Storage I/O error: {}", e),
            StoreError::Serialization(msg) => write!(f, "Storage serialization error: {}", msg),
            StoreError::NotFound(what) => write!(f, "Not found in storage: {}", what),
        }
    }
}

impl Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Read/write contract the engine needs from persistent configuration.
pub trait ConfigStore: Send + Sync {
    /// Every stored agent, keyed (and therefore ordered) by name.
    fn load_all_agents(&self) -> Result<BTreeMap<String, AgentDefinition>, StoreError>;

    /// Create or overwrite the stored definition named `def.name`.
    fn save_agent(&self, def: &AgentDefinition) -> Result<(), StoreError>;

    /// Delete a stored agent and drop it from the default-agents setting.
    fn delete_agent(&self, name: &str) -> Result<(), StoreError>;

    /// Stored value for `key`, or `default` when absent.
    fn load_setting(&self, key: &str, default: Value) -> Value;

    fn save_setting(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// File names of the prompts in the prompt library.
    fn list_prompts(&self) -> Result<Vec<String>, StoreError>;

    fn load_prompt(&self, file_name: &str) -> Result<String, StoreError>;

    /// Store a prompt, appending `.txt` when missing. Returns the file name used.
    fn save_prompt(&self, file_name: &str, content: &str) -> Result<String, StoreError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn prompt_file_name(file_name: &str) -> String {
    if file_name.ends_with(".txt") {
        file_name.to_string()
    } else {
        format!("{}.txt", file_name)
    }
}

fn without_default_agent(settings: &mut Map<String, Value>, name: &str) -> bool {
    match settings.get_mut(DEFAULT_AGENTS_KEY) {
        Some(Value::Array(names)) => {
            let before = names.len();
            names.retain(|v| v.as_str() != Some(name));
            names.len() != before
        }
        _ => false,
    }
}

/// JSON-file backed store rooted at a directory.
pub struct JsonFileStore {
    agents_dir: PathBuf,
    prompts_dir: PathBuf,
    settings_file: PathBuf,
    settings: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// An unreadable `main_config.json` is logged and replaced by empty
    /// settings so defaults apply.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let agents_dir = root.join("robots");
        let prompts_dir = root.join("prompts");
        fs::create_dir_all(&agents_dir)?;
        fs::create_dir_all(&prompts_dir)?;

        let settings_file = root.join("main_config.json");
        let settings = if settings_file.exists() {
            match fs::read_to_string(&settings_file)
                .map_err(StoreError::from)
                .and_then(|raw| serde_json::from_str::<Map<String, Value>>(&raw).map_err(StoreError::from))
            {
                Ok(map) => map,
                Err(e) => {
                    log::error!(
                        "groupllm::store::JsonFileStore::open(...): failed to load {}: {}; using defaults",
                        settings_file.display(),
                        e
                    );
                    Map::new()
                }
            }
        } else {
            Map::new()
        };

        Ok(Self {
            agents_dir,
            prompts_dir,
            settings_file,
            settings: Mutex::new(settings),
        })
    }

    fn agent_path(&self, name: &str) -> PathBuf {
        self.agents_dir.join(format!("{}.json", name))
    }

    fn write_settings(&self, settings: &Map<String, Value>) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_file, raw)?;
        Ok(())
    }

    fn stored_agent_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.agents_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl ConfigStore for JsonFileStore {
    fn load_all_agents(&self) -> Result<BTreeMap<String, AgentDefinition>, StoreError> {
        let names = self.stored_agent_names()?;
        let mut agents = BTreeMap::new();

        for (index, file_stem) in names.iter().enumerate() {
            let path = self.agent_path(file_stem);
            let loaded = fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|raw| serde_json::from_str::<AgentDefinition>(&raw).map_err(StoreError::from));

            match loaded {
                Ok(mut def) => {
                    if def.display_color.is_none() {
                        let color = DEFAULT_AGENT_COLORS[index % DEFAULT_AGENT_COLORS.len()];
                        def.display_color = Some(color.to_string());
                    }
                    agents.insert(def.name.clone(), def);
                }
                // One corrupt file must not hide the remaining agents.
                Err(e) => log::error!(
                    "groupllm::store::JsonFileStore::load_all_agents(...): skipping {}: {}",
                    path.display(),
                    e
                ),
            }
        }

        Ok(agents)
    }

    fn save_agent(&self, def: &AgentDefinition) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(def)?;
        fs::write(self.agent_path(&def.name), raw)?;
        Ok(())
    }

    fn delete_agent(&self, name: &str) -> Result<(), StoreError> {
        let path = self.agent_path(name);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("agent '{}'", name)));
        }
        fs::remove_file(path)?;

        let mut settings = lock(&self.settings);
        if without_default_agent(&mut settings, name) {
            self.write_settings(&settings)?;
        }
        Ok(())
    }

    fn load_setting(&self, key: &str, default: Value) -> Value {
        lock(&self.settings).get(key).cloned().unwrap_or(default)
    }

    fn save_setting(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut settings = lock(&self.settings);
        let mut next = settings.clone();
        next.insert(key.to_string(), value);
        self.write_settings(&next)?;
        *settings = next;
        Ok(())
    }

    fn list_prompts(&self) -> Result<Vec<String>, StoreError> {
        let mut prompts = Vec::new();
        for entry in fs::read_dir(&self.prompts_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                prompts.push(name.to_string());
            }
        }
        prompts.sort();
        Ok(prompts)
    }

    fn load_prompt(&self, file_name: &str) -> Result<String, StoreError> {
        let path = self.prompts_dir.join(file_name);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("prompt '{}'", file_name)));
        }
        Ok(fs::read_to_string(path)?)
    }

    fn save_prompt(&self, file_name: &str, content: &str) -> Result<String, StoreError> {
        let file_name = prompt_file_name(file_name);
        fs::write(self.prompts_dir.join(&file_name), content)?;
        Ok(file_name)
    }
}

/// In-process store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    agents: Mutex<BTreeMap<String, AgentDefinition>>,
    settings: Mutex<Map<String, Value>>,
    prompts: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `agents` (builder pattern).
    pub fn with_agents(self, agents: impl IntoIterator<Item = AgentDefinition>) -> Self {
        {
            let mut stored = lock(&self.agents);
            for def in agents {
                stored.insert(def.name.clone(), def);
            }
        }
        self
    }

    /// Store pre-populated with one setting (builder pattern).
    pub fn with_setting(self, key: &str, value: Value) -> Self {
        lock(&self.settings).insert(key.to_string(), value);
        self
    }
}

impl ConfigStore for MemoryStore {
    fn load_all_agents(&self) -> Result<BTreeMap<String, AgentDefinition>, StoreError> {
        Ok(lock(&self.agents).clone())
    }

    fn save_agent(&self, def: &AgentDefinition) -> Result<(), StoreError> {
        lock(&self.agents).insert(def.name.clone(), def.clone());
        Ok(())
    }

    fn delete_agent(&self, name: &str) -> Result<(), StoreError> {
        if lock(&self.agents).remove(name).is_none() {
            return Err(StoreError::NotFound(format!("agent '{}'", name)));
        }
        without_default_agent(&mut lock(&self.settings), name);
        Ok(())
    }

    fn load_setting(&self, key: &str, default: Value) -> Value {
        lock(&self.settings).get(key).cloned().unwrap_or(default)
    }

    fn save_setting(&self, key: &str, value: Value) -> Result<(), StoreError> {
        lock(&self.settings).insert(key.to_string(), value);
        Ok(())
    }

    fn list_prompts(&self) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.prompts).keys().cloned().collect())
    }

    fn load_prompt(&self, file_name: &str) -> Result<String, StoreError> {
        lock(&self.prompts)
            .get(file_name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("prompt '{}'", file_name)))
    }

    fn save_prompt(&self, file_name: &str, content: &str) -> Result<String, StoreError> {
        let file_name = prompt_file_name(file_name);
        lock(&self.prompts).insert(file_name.clone(), content.to_string());
        Ok(file_name)
    }
}
