use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::domain::{LocalDraft, SessionTokens};

/// Slot the registration draft is kept under unless configuration overrides it.
pub const DEFAULT_DRAFT_STORAGE_KEY: &str = "professional_registration_draft";

const ACCESS_TOKEN_KEY: &str = "access_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Durable string key/value storage surviving restarts of the client.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage key '{0}' contains unsupported characters")]
    InvalidKey(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode stored payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Process-local store, used by tests and the CLI demo.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let guard = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        guard.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves either the previous payload or the new one.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, value).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| StoreError::Io { path, source })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

/// Accessor for the single registration draft slot.
pub struct DraftStore<S> {
    store: Arc<S>,
    key: String,
}

impl<S> Clone for DraftStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
        }
    }
}

impl<S: KeyValueStore> DraftStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_key(store, DEFAULT_DRAFT_STORAGE_KEY)
    }

    pub fn with_key(store: Arc<S>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Never fails: unreadable or malformed payloads read as no draft.
    pub fn load(&self) -> Option<LocalDraft> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key = %self.key, error = %err, "draft store read failed");
                return None;
            }
        };

        match serde_json::from_str::<LocalDraft>(&raw) {
            Ok(draft) => Some(draft),
            Err(err) => {
                warn!(key = %self.key, error = %err, "discarding malformed draft payload");
                None
            }
        }
    }

    pub fn save(&self, draft: &LocalDraft) -> Result<(), StoreError> {
        let payload = serde_json::to_string(draft)?;
        self.store.set(&self.key, &payload)?;
        debug!(key = %self.key, step = draft.current_step, "draft persisted");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(&self.key)
    }
}

/// Session token slots read by the authentication layer.
pub struct SessionStore<S> {
    store: Arc<S>,
}

impl<S> Clone for SessionStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn persist(&self, tokens: &SessionTokens) -> Result<(), StoreError> {
        self.store.set(ACCESS_TOKEN_KEY, &tokens.access)?;
        self.store.set(REFRESH_TOKEN_KEY, &tokens.refresh)
    }

    pub fn access_token(&self) -> Result<Option<String>, StoreError> {
        self.store.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Result<Option<String>, StoreError> {
        self.store.get(REFRESH_TOKEN_KEY)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(ACCESS_TOKEN_KEY)?;
        self.store.remove(REFRESH_TOKEN_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn malformed_payload_loads_as_absent() {
        let backing = Arc::new(MemoryStore::new());
        backing
            .set(DEFAULT_DRAFT_STORAGE_KEY, "{not json")
            .expect("seed payload");
        let drafts = DraftStore::new(backing);

        assert!(drafts.load().is_none());
    }

    #[test]
    fn drafts_are_scoped_by_key() {
        let backing = Arc::new(MemoryStore::new());
        let first = DraftStore::with_key(backing.clone(), "tab-one");
        let second = DraftStore::with_key(backing.clone(), "tab-two");

        first
            .save(&LocalDraft::start("one@x.com", Utc::now()))
            .expect("save first");
        second
            .save(&LocalDraft::start("two@x.com", Utc::now()))
            .expect("save second");

        assert_eq!(first.load().expect("first present").email, "one@x.com");
        assert_eq!(second.load().expect("second present").email, "two@x.com");
        assert_eq!(backing.len(), 2);
    }

    #[test]
    fn file_store_round_trips_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backing = Arc::new(FileStore::new(dir.path().join("nested")));
        let drafts = DraftStore::new(backing.clone());

        assert!(drafts.load().is_none());

        let draft = LocalDraft::start("a@x.com", Utc::now());
        drafts.save(&draft).expect("save");
        assert_eq!(drafts.load(), Some(draft));
        assert!(dir
            .path()
            .join("nested")
            .join("professional_registration_draft.json")
            .exists());

        drafts.clear().expect("clear");
        assert!(drafts.load().is_none());
        drafts.clear().expect("clearing twice is fine");
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());

        match store.set("../escape", "x") {
            Err(StoreError::InvalidKey(key)) => assert_eq!(key, "../escape"),
            other => panic!("expected invalid key, got {other:?}"),
        }
    }

    #[test]
    fn session_store_writes_both_tokens() {
        let backing = Arc::new(MemoryStore::new());
        let sessions = SessionStore::new(backing.clone());

        sessions
            .persist(&SessionTokens {
                access: "acc".to_string(),
                refresh: "ref".to_string(),
            })
            .expect("persist");

        assert_eq!(backing.get("access_token").expect("get"), Some("acc".to_string()));
        assert_eq!(sessions.refresh_token().expect("get"), Some("ref".to_string()));

        sessions.clear().expect("clear");
        assert!(sessions.access_token().expect("get").is_none());
    }
}
