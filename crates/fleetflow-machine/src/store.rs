//! Persisted machine state
//!
//! Manages the `.fleetflow/state.json` file which holds one attribute record
//! per fleet member. Backends never touch the file directly: they load their
//! record through a [`RecordStore`], project it into a typed state and flush
//! it back when something changed.

use crate::error::{MachineError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".fleetflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const STATE_TMP: &str = "state.json.tmp";
const LOCK_FILE: &str = "lock.json";

/// Contents of the state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file version
    pub version: u32,

    /// Identifier of this deployment, assigned on first use
    #[serde(default)]
    pub deployment_id: Option<String>,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Records indexed by machine name
    pub resources: HashMap<String, ResourceRecord>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            deployment_id: None,
            updated_at: Utc::now(),
            resources: HashMap::new(),
        }
    }
}

impl StateFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records owned by a specific backend type
    pub fn records_of_type(&self, resource_type: &str) -> Vec<(&String, &ResourceRecord)> {
        self.resources
            .iter()
            .filter(|(_, r)| r.resource_type == resource_type)
            .collect()
    }

    /// Add or replace a record
    pub fn set_record(&mut self, record: ResourceRecord) {
        self.resources.insert(record.name.clone(), record);
        self.updated_at = Utc::now();
    }

    pub fn get_record(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }
}

/// Attribute record of a single fleet member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Logical machine name
    pub name: String,

    /// Backend type (e.g., "existing")
    pub resource_type: String,

    /// Persisted attributes, keyed by attribute name
    pub attributes: HashMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
        self.updated_at = Utc::now();
    }

    /// Set an attribute, or remove it when `value` is `None`
    pub fn set_optional<T: Serialize>(&mut self, key: &str, value: Option<&T>) -> Result<()> {
        match value {
            Some(v) => self.set_attribute(key, serde_json::to_value(v)?),
            None => {
                if self.attributes.remove(key).is_some() {
                    self.updated_at = Utc::now();
                }
            }
        }
        Ok(())
    }

    pub fn get_attribute<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// State manager for reading/writing the state file
#[derive(Debug, Clone)]
pub struct StateManager {
    /// Directory holding `.fleetflow/`
    root: PathBuf,
}

impl StateManager {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the current state
    ///
    /// Falls back to the backup when the state file is missing or unreadable.
    pub async fn load(&self) -> Result<StateFile> {
        let state = match read_state_file(&self.state_path()).await {
            Ok(Some(state)) => state,
            Ok(None) => match read_state_file(&self.backup_path()).await? {
                Some(state) => {
                    tracing::warn!("State file missing, recovered from backup");
                    state
                }
                None => {
                    tracing::debug!("State file not found, returning empty state");
                    return Ok(StateFile::new());
                }
            },
            Err(MachineError::Json(e)) => match read_state_file(&self.backup_path()).await {
                Ok(Some(state)) => {
                    tracing::warn!("State file unreadable ({}), recovered from backup", e);
                    state
                }
                _ => return Err(MachineError::Json(e)),
            },
            Err(e) => return Err(e),
        };

        if state.version > STATE_VERSION {
            return Err(MachineError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!("Loaded state with {} records", state.resources.len());
        Ok(state)
    }

    /// Save the state, keeping the previous file as a backup
    ///
    /// The new content is written to a temporary file and renamed over the
    /// state file, so `state.json` is always either the old or the new state.
    pub async fn save(&self, state: &StateFile) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let tmp = self.state_dir().join(STATE_TMP);

        if path.exists() {
            fs::copy(&path, self.backup_path()).await?;
        }

        let content = serde_json::to_string_pretty(state)?;
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;

        tracing::debug!("Saved state with {} records", state.resources.len());
        Ok(())
    }

    /// Return the deployment id, generating and persisting one on first use
    pub async fn deployment_id(&self) -> Result<String> {
        let mut state = self.load().await?;
        if let Some(id) = &state.deployment_id {
            return Ok(id.clone());
        }

        let id = uuid::Uuid::new_v4().to_string();
        state.deployment_id = Some(id.clone());
        state.updated_at = Utc::now();
        self.save(&state).await?;

        tracing::info!("Assigned deployment id {}", id);
        Ok(id)
    }

    /// Handle on the record of a single machine
    pub fn record(&self, name: impl Into<String>, resource_type: impl Into<String>) -> RecordStore {
        RecordStore {
            manager: self.clone(),
            name: name.into(),
            resource_type: resource_type.into(),
        }
    }

    /// Acquire a lock for exclusive access
    pub async fn acquire_lock(&self) -> Result<LockGuard> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            // Locks older than one hour are considered abandoned
            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(MachineError::LockError(format!(
                    "State is locked by {} since {}",
                    lock_info.holder, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired state lock");
        Ok(LockGuard {
            lock_path,
            released: false,
        })
    }
}

async fn read_state_file(path: &Path) -> Result<Option<StateFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).await?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Read/write access to one machine's record
///
/// Every save re-reads the state file so that records of other machines
/// written in the meantime are preserved.
#[derive(Debug, Clone)]
pub struct RecordStore {
    manager: StateManager,
    name: String,
    resource_type: String,
}

impl RecordStore {
    /// Load the record, or a fresh empty one if the machine is unknown
    pub async fn load(&self) -> Result<ResourceRecord> {
        let state = self.manager.load().await?;
        match state.get_record(&self.name) {
            Some(record) if record.resource_type != self.resource_type => {
                Err(MachineError::StateError(format!(
                    "Record {} belongs to backend {}, not {}",
                    self.name, record.resource_type, self.resource_type
                )))
            }
            Some(record) => Ok(record.clone()),
            None => Ok(ResourceRecord::new(&self.name, &self.resource_type)),
        }
    }

    pub async fn save(&self, record: &ResourceRecord) -> Result<()> {
        let mut state = self.manager.load().await?;
        state.set_record(record.clone());
        self.manager.save(&state).await
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the state lock
pub struct LockGuard {
    lock_path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
