use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ConfigLocator;

use super::AuthError;

const ENVELOPE_VERSION: u32 = 1;

/// Key/value persistence used for login state and in-flight transactions.
#[async_trait]
pub trait KeyValueStore<T: Send + Sync>: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<T>, AuthError>;
    async fn put(&self, key: &str, value: &T) -> Result<(), AuthError>;
    async fn delete(&self, key: &str) -> Result<(), AuthError>;
}

/// Durable storage: one JSON file per key in the user's data directory.
pub struct FileStore<T> {
    locator: ConfigLocator,
    _value: PhantomData<fn() -> T>,
}

impl<T> FileStore<T> {
    pub fn new(locator: ConfigLocator) -> Self {
        Self {
            locator,
            _value: PhantomData,
        }
    }

    pub fn with_default_locator() -> Result<Self, AuthError> {
        Ok(Self::new(ConfigLocator::new()?))
    }

    fn write_file(path: &Path, payload: &str) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(payload.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = file.metadata()?.permissions();
            perm.set_mode(0o600);
            fs::set_permissions(path, perm)?;
        }

        Ok(())
    }
}

#[async_trait]
impl<T> KeyValueStore<T> for FileStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<T>, AuthError> {
        let path = self.locator.entry_file(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let envelope: StoredEntry<T> = serde_json::from_str(&raw)?;
        if envelope.version != ENVELOPE_VERSION || envelope.key != key {
            tracing::warn!(key, version = envelope.version, "ignoring stale storage entry");
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }

    async fn put(&self, key: &str, value: &T) -> Result<(), AuthError> {
        let path = self.locator.entry_file(key);
        let envelope = EntryRef {
            version: ENVELOPE_VERSION,
            key,
            value,
        };
        let payload = serde_json::to_string_pretty(&envelope)?;
        Self::write_file(&path, &payload)
    }

    async fn delete(&self, key: &str) -> Result<(), AuthError> {
        let path = self.locator.entry_file(key);
        match fs::remove_file(path) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Serialize)]
struct EntryRef<'a, T> {
    version: u32,
    key: &'a str,
    value: &'a T,
}

#[derive(Deserialize)]
struct StoredEntry<T> {
    version: u32,
    key: String,
    value: T,
}

/// Session-scoped storage that lives as long as the process.
pub struct MemoryStore<T> {
    entries: Mutex<HashMap<String, T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> KeyValueStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<T>, AuthError> {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &T) -> Result<(), AuthError> {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(key.to_owned(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AuthError> {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Storage used when the host has no storage capability; remembers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

#[async_trait]
impl<T: Send + Sync> KeyValueStore<T> for NullStore {
    async fn get(&self, _key: &str) -> Result<Option<T>, AuthError> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: &T) -> Result<(), AuthError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), AuthError> {
        Ok(())
    }
}
