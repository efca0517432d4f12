//! Sync cursor and device identity, persisted through a small key/value store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use fitsync_common::{DeviceId, Error, Result};

/// Key holding the device identity token.
pub const DEVICE_ID_KEY: &str = "fitsync.deviceId";
/// Key holding the last successful sync boundary (RFC 3339).
pub const LAST_SYNCED_AT_KEY: &str = "fitsync.lastSyncedAt";

/// Device-local persistence for the engine's bookkeeping state.
///
/// Values are plain strings with no schema versioning.
pub trait StateStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

fn poisoned<T>(_: T) -> Error {
    Error::LocalStore("state store lock poisoned".to_string())
}

/// State store kept in memory, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

/// State store backed by a JSON object file.
///
/// Every write replaces the file through a temporary sibling and a rename,
/// so a crash leaves either the old or the new contents.
pub struct FileStateStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStateStore {
    /// Open (or lazily create) the state file at `path`.
    ///
    /// A missing file starts empty. An unreadable or corrupt file also
    /// starts empty: losing the cursor only costs a full pull.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let values = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring corrupt state file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(Error::Io(e)),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.values.lock().map_err(poisoned)
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.lock()?;
        // Memory only changes once the new contents are on disk.
        let mut next = values.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next)?;
        *values = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.lock()?;
        if !values.contains_key(key) {
            return Ok(());
        }
        let mut next = values.clone();
        next.remove(key);
        self.persist(&next)?;
        *values = next;
        Ok(())
    }
}

/// Point-in-time view of the client state, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStateSnapshot {
    pub device_id: DeviceId,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// The engine's private bookkeeping: device identity and sync cursor.
///
/// Owned by whatever drives sync and backed by an injectable store.
pub struct SyncClientState<S: StateStore> {
    store: S,
}

impl<S: StateStore> SyncClientState<S> {
    /// Wrap a state store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Get the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the persisted device token, creating one on first use.
    ///
    /// Storage failures degrade to a fresh token rather than an error.
    pub fn device_id(&self) -> DeviceId {
        match self.store.get(DEVICE_ID_KEY) {
            Ok(Some(token)) => match DeviceId::new(token) {
                Ok(id) => return id,
                Err(_) => warn!("Stored device id is empty, generating a new one"),
            },
            Ok(None) => {}
            Err(e) => warn!("Failed to read device id: {}", e),
        }

        let id = DeviceId::generate();
        match self.store.set(DEVICE_ID_KEY, id.as_str()) {
            Ok(()) => info!("Generated device id {}", id),
            Err(e) => warn!("Failed to persist device id {}: {}", id, e),
        }
        id
    }

    /// The last recorded sync boundary, or `None` if never synced.
    ///
    /// An unparseable stored value is treated as absent.
    pub fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.store.get(LAST_SYNCED_AT_KEY)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                warn!("Ignoring invalid sync cursor '{}': {}", raw, e);
                Ok(None)
            }
        }
    }

    /// Overwrite the cursor unconditionally.
    ///
    /// Only values reported by the server may be written here.
    pub fn set_last_synced_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.store.set(LAST_SYNCED_AT_KEY, &at.to_rfc3339())
    }

    /// Move the cursor forward to a server-reported boundary.
    ///
    /// Values older than the stored cursor are ignored so the cursor never
    /// decreases. Returns whether the stored value changed.
    pub fn advance_cursor(&self, at: DateTime<Utc>) -> Result<bool> {
        match self.last_synced_at()? {
            Some(current) if at < current => {
                warn!(
                    "Server reported boundary {} older than cursor {}, keeping cursor",
                    at, current
                );
                Ok(false)
            }
            Some(current) if at == current => Ok(false),
            _ => {
                self.set_last_synced_at(at)?;
                debug!("Sync cursor advanced to {}", at);
                Ok(true)
            }
        }
    }

    /// Forget the cursor so the next pull is a full export.
    ///
    /// Part of an explicit user data reset; the device id is kept.
    pub fn reset(&self) -> Result<()> {
        self.store.remove(LAST_SYNCED_AT_KEY)?;
        info!("Sync cursor reset");
        Ok(())
    }

    /// Capture device id and cursor together.
    pub fn snapshot(&self) -> Result<ClientStateSnapshot> {
        Ok(ClientStateSnapshot {
            device_id: self.device_id(),
            last_synced_at: self.last_synced_at()?,
        })
    }
}
