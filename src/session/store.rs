//! Durable token → session mapping.
//!
//! [`FileSessionStore`] keeps two views on disk:
//!
//! * `session-map.json`: every session keyed directly by token, so a relay
//!   lookup is a single file read with no directory scan;
//! * `sessions/<session_id>.json`: one descriptor per session, for
//!   diagnostics and log correlation.
//!
//! Every write goes to a temp file, is fsynced, then renamed over the target
//! and the directory fsynced, so a crash never leaves a half-written map or
//! loses a rename. Mutations are serialized by a
//! process-wide lock and always re-read the map from disk first; nothing is
//! cached between calls.

use super::token::generate_token;
use super::types::{Session, SessionDraft, SessionMutation};
use crate::util::{sync_directory, unix_now};

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on regenerate-and-retry when a fresh token collides.
pub const MAX_TOKEN_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token {0} is already bound to a live session")]
    DuplicateToken(String),
    #[error("no session for token {0}")]
    NotFound(String),
    #[error("could not allocate a unique token after {attempts} attempts")]
    TokenSpaceExhausted { attempts: usize },
    #[error("session storage I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session storage at {} is not valid JSON: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Storage contract for relay sessions. Any backing can sit behind it.
pub trait SessionStore: Send + Sync {
    /// Persist a new session. Fails with [`StoreError::DuplicateToken`] when
    /// the token is already held by a session that has not expired at `now`.
    fn create_at(&self, session: Session, now: i64) -> Result<(), StoreError>;

    /// Look a token up as of `now`. Expired sessions read as `None`; they are
    /// left in place for the caller (or a sweep) to purge.
    fn lookup_at(&self, token: &str, now: i64) -> Result<Option<Session>, StoreError>;

    /// Delete a session. Returns whether anything was removed; deleting a
    /// missing token is not an error.
    fn remove(&self, token: &str) -> Result<bool, StoreError>;

    /// Apply `mutation` under the store's write lock and return the result.
    fn touch(&self, token: &str, mutation: SessionMutation) -> Result<Session, StoreError>;

    /// Every stored session, expired ones included.
    fn list(&self) -> Result<Vec<Session>, StoreError>;

    /// Drop every session expired at `now`. Returns how many were removed.
    fn purge_expired(&self, now: i64) -> Result<usize, StoreError>;

    fn create(&self, session: Session) -> Result<(), StoreError> {
        self.create_at(session, unix_now())
    }

    fn get(&self, token: &str) -> Result<Option<Session>, StoreError> {
        self.lookup_at(token, unix_now())
    }
}

/// Register `draft` under a freshly generated token, regenerating on
/// collision up to [`MAX_TOKEN_ATTEMPTS`] times.
pub fn register_session(
    store: &dyn SessionStore,
    draft: SessionDraft,
    now: i64,
) -> Result<Session, StoreError> {
    register_session_with(store, draft, now, generate_token)
}

/// Same as [`register_session`] with a caller-supplied token source.
pub fn register_session_with(
    store: &dyn SessionStore,
    draft: SessionDraft,
    now: i64,
    mut next_token: impl FnMut() -> String,
) -> Result<Session, StoreError> {
    for attempt in 1..=MAX_TOKEN_ATTEMPTS {
        let token = next_token();
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = draft.clone().into_session(token.clone(), session_id, now);
        match store.create_at(session.clone(), now) {
            Ok(()) => {
                tracing::debug!(
                    token = %token,
                    session_id = %session.session_id,
                    "relay session created"
                );
                return Ok(session);
            }
            Err(StoreError::DuplicateToken(_)) => {
                tracing::debug!(token = %token, attempt, "token collision, regenerating");
            }
            Err(e) => return Err(e),
        }
    }
    Err(StoreError::TokenSpaceExhausted {
        attempts: MAX_TOKEN_ATTEMPTS,
    })
}

// ── FileSessionStore ─────────────────────────────────────────────

pub struct FileSessionStore {
    map_path: PathBuf,
    sessions_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    /// Store rooted at `data_dir`: `data_dir/session-map.json` plus
    /// `data_dir/sessions/`.
    pub fn new(data_dir: &Path) -> Self {
        Self::with_map_path(data_dir, data_dir.join("session-map.json"))
    }

    /// Store with an explicit session map location.
    pub fn with_map_path(data_dir: &Path, map_path: PathBuf) -> Self {
        Self {
            map_path,
            sessions_dir: data_dir.join("sessions"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn map_path(&self) -> &Path {
        &self.map_path
    }

    pub fn session_file(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.json"))
    }

    fn load_map(&self) -> Result<BTreeMap<String, Session>, StoreError> {
        let data = match fs::read_to_string(&self.map_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.map_path.clone(),
                    source,
                });
            }
        };
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&data).map_err(|source| StoreError::Corrupt {
            path: self.map_path.clone(),
            source,
        })
    }

    fn persist_map(&self, map: &BTreeMap<String, Session>) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(map).map_err(|source| StoreError::Corrupt {
            path: self.map_path.clone(),
            source,
        })?;
        write_atomic(&self.map_path, &data)
    }

    fn write_session_file(&self, session: &Session) -> Result<(), StoreError> {
        let path = self.session_file(&session.session_id);
        let data = serde_json::to_vec_pretty(session).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &data)
    }

    fn remove_session_file(&self, session_id: &str) -> Result<(), StoreError> {
        let path = self.session_file(session_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

impl SessionStore for FileSessionStore {
    fn create_at(&self, session: Session, now: i64) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut map = self.load_map()?;
        if let Some(existing) = map.get(&session.token) {
            if !existing.is_expired(now) {
                return Err(StoreError::DuplicateToken(session.token));
            }
            // An expired holder of the token is replaced outright.
            self.remove_session_file(&existing.session_id)?;
        }
        self.write_session_file(&session)?;
        let session_id = session.session_id.clone();
        map.insert(session.token.clone(), session);
        if let Err(e) = self.persist_map(&map) {
            // The map is authoritative; never leave a descriptor it does not list.
            let _ = self.remove_session_file(&session_id);
            return Err(e);
        }
        Ok(())
    }

    fn lookup_at(&self, token: &str, now: i64) -> Result<Option<Session>, StoreError> {
        let map = self.load_map()?;
        Ok(map.get(token).filter(|s| !s.is_expired(now)).cloned())
    }

    fn remove(&self, token: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let mut map = self.load_map()?;
        let Some(session) = map.remove(token) else {
            return Ok(false);
        };
        self.persist_map(&map)?;
        self.remove_session_file(&session.session_id)?;
        Ok(true)
    }

    fn touch(&self, token: &str, mutation: SessionMutation) -> Result<Session, StoreError> {
        let _guard = self.write_lock.lock();
        let mut map = self.load_map()?;
        let session = map
            .get_mut(token)
            .ok_or_else(|| StoreError::NotFound(token.to_string()))?;
        session.apply(mutation);
        let updated = session.clone();
        self.write_session_file(&updated)?;
        self.persist_map(&map)?;
        Ok(updated)
    }

    fn list(&self) -> Result<Vec<Session>, StoreError> {
        Ok(self.load_map()?.into_values().collect())
    }

    fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let mut map = self.load_map()?;
        let expired: Vec<Session> = map
            .values()
            .filter(|s| s.is_expired(now))
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        for session in &expired {
            map.remove(&session.token);
        }
        self.persist_map(&map)?;
        for session in &expired {
            self.remove_session_file(&session.session_id)?;
        }
        Ok(expired.len())
    }
}

/// Write `data` to `path` via temp file → fsync → rename → directory fsync.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(io_err)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("session-map.json");
    let tmp_path = parent.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

    let result = (|| {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_err(e));
    }
    sync_directory(parent).map_err(io_err)
}

// ── InMemorySessionStore ─────────────────────────────────────────

/// Non-durable store for tests and embedding.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session unconditionally, bypassing duplicate checks.
    pub fn insert(&self, session: Session) {
        self.sessions.lock().insert(session.token.clone(), session);
    }
}

impl SessionStore for InMemorySessionStore {
    fn create_at(&self, session: Session, now: i64) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock();
        if sessions
            .get(&session.token)
            .is_some_and(|existing| !existing.is_expired(now))
        {
            return Err(StoreError::DuplicateToken(session.token));
        }
        sessions.insert(session.token.clone(), session);
        Ok(())
    }

    fn lookup_at(&self, token: &str, now: i64) -> Result<Option<Session>, StoreError> {
        Ok(self
            .sessions
            .lock()
            .get(token)
            .filter(|s| !s.is_expired(now))
            .cloned())
    }

    fn remove(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.lock().remove(token).is_some())
    }

    fn touch(&self, token: &str, mutation: SessionMutation) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(token)
            .ok_or_else(|| StoreError::NotFound(token.to_string()))?;
        session.apply(mutation);
        Ok(session.clone())
    }

    fn list(&self) -> Result<Vec<Session>, StoreError> {
        Ok(self.sessions.lock().values().cloned().collect())
    }

    fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok(before - sessions.len())
    }
}
