//! File-backed API key store.
//!
//! The store is a single JSON object mapping user name to key. Every write
//! replaces the whole file through a temporary file in the same directory, so
//! readers see either the old table or the new one.

use parking_lot::Mutex;
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Bytes of OS randomness per key (hex encoded to twice as many characters)
pub const KEY_BYTES: usize = 32;

type KeyTable = BTreeMap<String, String>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyStoreError {
    #[error("API key store not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("API key store {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("API key store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("username must not be empty")]
    EmptyUsername,
}

pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

/// Issues and verifies API keys persisted in one JSON file.
#[derive(Debug)]
pub struct KeyStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Issue a fresh key for `user`, replacing any previous one.
    ///
    /// Creates the store if it does not exist yet.
    pub fn generate(&self, user: &str) -> KeyStoreResult<String> {
        if user.trim().is_empty() {
            return Err(KeyStoreError::EmptyUsername);
        }

        let mut bytes = [0u8; KEY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let key = hex::encode(bytes);

        let _guard = self.write_lock.lock();
        let mut table = match self.read_table() {
            Ok(table) => table,
            Err(KeyStoreError::NotFound { .. }) => {
                info!(path = %self.path.display(), "creating API key store");
                KeyTable::new()
            }
            Err(err) => return Err(err),
        };
        let replaced = table.insert(user.to_string(), key.clone()).is_some();
        self.write_table(&table)?;

        info!(user = %user, replaced, "issued API key");
        Ok(key)
    }

    /// Resolve a presented key to the user it was issued to.
    ///
    /// Every stored key is compared in constant time, and the scan does not
    /// stop at the first match.
    pub fn verify(&self, presented: &str) -> KeyStoreResult<Option<String>> {
        let table = self.read_table()?;
        let mut owner = None;
        for (user, key) in &table {
            if bool::from(key.as_bytes().ct_eq(presented.as_bytes())) {
                owner = Some(user.clone());
            }
        }
        if owner.is_none() {
            debug!("presented API key did not match any user");
        }
        Ok(owner)
    }

    fn read_table(&self) -> KeyStoreResult<KeyTable> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(KeyStoreError::NotFound {
                    path: self.path.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&raw).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "API key store is corrupt");
            KeyStoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })
    }

    fn write_table(&self, table: &KeyTable) -> KeyStoreResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, table).map_err(io::Error::from)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn store_in(dir: &tempfile::TempDir) -> KeyStore {
        KeyStore::new(dir.path().join("apikey_store.json"))
    }

    fn persisted(store: &KeyStore) -> KeyTable {
        serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap()
    }

    #[test]
    fn test_generate_creates_store_and_persists_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let key = store.generate("alice").unwrap();
        assert_eq!(key.len(), KEY_BYTES * 2);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(persisted(&store).get("alice"), Some(&key));
    }

    #[test]
    fn test_generate_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("nested/keys.json"));
        store.generate("bob").unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_verify_resolves_key_to_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let alice = store.generate("alice").unwrap();
        let bob = store.generate("bob").unwrap();

        assert_eq!(store.verify(&alice).unwrap().as_deref(), Some("alice"));
        assert_eq!(store.verify(&bob).unwrap().as_deref(), Some("bob"));
        assert_eq!(store.verify("alice").unwrap(), None);
        assert_eq!(store.verify("").unwrap(), None);
    }

    #[test]
    fn test_regenerate_revokes_old_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let old = store.generate("alice").unwrap();
        let new = store.generate("alice").unwrap();

        assert_ne!(old, new);
        assert_eq!(persisted(&store).len(), 1);
        assert_eq!(store.verify(&old).unwrap(), None);
        assert_eq!(store.verify(&new).unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_verify_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.verify("anything"),
            Err(KeyStoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_corrupt_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(
            store.verify("anything"),
            Err(KeyStoreError::Corrupt { .. })
        ));
        assert!(matches!(
            store.generate("alice"),
            Err(KeyStoreError::Corrupt { .. })
        ));
        // the corrupt file is left for an operator to inspect
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "{ not json");
    }

    #[test]
    fn test_empty_username_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(matches!(store.generate("  "), Err(KeyStoreError::EmptyUsername)));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_concurrent_generation_loses_no_users() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let user = format!("user-{i}");
                    let key = store.generate(&user).unwrap();
                    (user, key)
                })
            })
            .collect();
        let issued: Vec<(String, String)> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let table = persisted(&store);
        assert_eq!(table.len(), 16);
        for (user, key) in issued {
            assert_eq!(table.get(&user), Some(&key));
        }
    }
}
