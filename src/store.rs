// src/store.rs

use crate::error::IdentityError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Key of the cached provider discovery document.
pub const PROVIDER_CONFIG_KEY: &str = "openidc.json";
/// Key of the cached provider signing keys.
pub const SIGNING_KEYS_KEY: &str = "jwks.json";
/// Key of the signed-in user's token set.
pub const TOKENS_KEY: &str = "tokens.json";
/// Key of this installation's OAuth2 client registration.
pub const CLIENT_KEY: &str = "client.json";

/// An abstract key-value byte store holding the persisted identity state.
///
/// Entries are always replaced whole; there is no partial update.
pub trait ByteStore: Send + Sync {
    /// Returns the bytes stored under `key`, or `None` if the entry does not exist.
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
    /// Replaces the entry under `key`.
    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
    /// Removes the entry under `key`. Removing an absent entry succeeds.
    fn delete(&self, key: &str) -> io::Result<()>;
}

/// A `ByteStore` backed by one file per key inside a directory.
///
/// Files are created owner-only (0600 on Unix) and written through a temporary
/// file plus rename, so a reader sees either the old or the new entry.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The directory holding the entries.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl ByteStore for FileStore {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let target = self.path(key);
        let staging = self.path(&format!(".{key}.tmp"));

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&staging)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&staging, &target)
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// An in-process `ByteStore`, useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ByteStore for MemoryStore {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Reads and decodes a JSON entry. An undecodable entry is reported as `CorruptStore`.
pub(crate) fn read_json<T: DeserializeOwned>(store: &dyn ByteStore, key: &str) -> Result<Option<T>, IdentityError> {
    let Some(bytes) = store.read(key)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| IdentityError::CorruptStore { key: key.to_string(), reason: e.to_string() })
}

/// Encodes `value` as pretty-printed JSON and replaces the entry.
pub(crate) fn write_json<T: Serialize>(store: &dyn ByteStore, key: &str, value: &T) -> Result<(), IdentityError> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| IdentityError::CorruptStore { key: key.to_string(), reason: e.to_string() })?;
    store.write(key, &data)?;
    Ok(())
}
