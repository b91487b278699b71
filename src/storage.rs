//! Resumable session store.
//!
//! A small string-valued key/value file that survives restarts. Every read
//! tolerates missing or corrupt data by reporting "no session"; write failures
//! are logged and swallowed so persistence never surfaces to the user.

use crate::error::{JobError, JobResult};
use crate::model::{JobRequest, JobStatus, StatusEvent, UserIdentity};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const KEY_ACTIVE: &str = "job_generation_active";
pub const KEY_REQUEST: &str = "job_generation_data";
pub const KEY_RESULT: &str = "job_result";
pub const KEY_USER: &str = "job_user_info";
pub const KEY_ANON_ID: &str = "job_anon_id";

const STATE_FILENAME: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWrite<'a> {
    Set(&'a str, String),
    Remove(&'a str),
}

/// String key/value persistence. `apply` must make a batch visible all at once.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> JobResult<Option<String>>;
    fn apply(&self, writes: &[KvWrite<'_>]) -> JobResult<()>;
}

/// One JSON object on disk, rewritten through a temp file and a rename.
pub struct FileKv {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKv {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Raw file contents, `None` when the file does not exist yet.
    fn read_bytes(&self) -> JobResult<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn parse(&self, bytes: &[u8]) -> Result<BTreeMap<String, String>, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    fn load(&self) -> JobResult<BTreeMap<String, String>> {
        let Some(bytes) = self.read_bytes()? else {
            return Ok(BTreeMap::new());
        };
        self.parse(&bytes).map_err(|e| {
            JobError::Persistence(format!("corrupt store {}: {e}", self.path.display()))
        })
    }

    fn save(&self, map: &BTreeMap<String, String>) -> JobResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(map)
            .map_err(|e| JobError::Persistence(e.to_string()))?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKv {
    fn get(&self, key: &str) -> JobResult<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| JobError::Persistence("store lock poisoned".into()))?;
        Ok(self.load()?.get(key).cloned())
    }

    fn apply(&self, writes: &[KvWrite<'_>]) -> JobResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| JobError::Persistence("store lock poisoned".into()))?;
        // Only unparsable contents are replaced; an I/O failure leaves the file alone.
        let mut map = match self.read_bytes()? {
            None => BTreeMap::new(),
            Some(bytes) => self.parse(&bytes).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "discarding corrupt session store");
                BTreeMap::new()
            }),
        };
        for write in writes {
            match write {
                KvWrite::Set(key, value) => {
                    map.insert((*key).to_string(), value.clone());
                }
                KvWrite::Remove(key) => {
                    map.remove(*key);
                }
            }
        }
        self.save(&map)
    }
}

/// The persisted view of a session, as read back from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedSession {
    pub active: bool,
    pub request: Option<JobRequest>,
    pub result: Option<StatusEvent>,
}

#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// File-backed store under `dir`.
    pub fn open(dir: &Path) -> Self {
        Self::new(Arc::new(FileKv::new(dir.join(STATE_FILENAME))))
    }

    pub fn begin_session(&self, request: &JobRequest) {
        let Some(data) = encode(request) else { return };
        self.write(&[
            KvWrite::Set(KEY_ACTIVE, "true".into()),
            KvWrite::Set(KEY_REQUEST, data),
            KvWrite::Remove(KEY_RESULT),
        ]);
    }

    pub fn complete_session(&self, event: &StatusEvent) {
        self.finish(event);
    }

    pub fn fail_session(&self, message: &str) {
        self.finish(&StatusEvent::error(message));
    }

    fn finish(&self, event: &StatusEvent) {
        let Some(data) = encode(event) else { return };
        self.write(&[KvWrite::Remove(KEY_ACTIVE), KvWrite::Set(KEY_RESULT, data)]);
    }

    /// The stream ended without a result: stop treating the session as in flight.
    pub fn end_session(&self) {
        self.write(&[KvWrite::Remove(KEY_ACTIVE)]);
    }

    pub fn load(&self) -> PersistedSession {
        PersistedSession {
            active: self.read_raw(KEY_ACTIVE).as_deref() == Some("true"),
            request: self.read_json(KEY_REQUEST),
            result: self.read_json(KEY_RESULT),
        }
    }

    /// The stored request, only while a stream is believed in flight.
    pub fn read_active_request(&self) -> Option<JobRequest> {
        let session = self.load();
        if session.active {
            session.request
        } else {
            None
        }
    }

    /// The stored result, only if the job completed.
    pub fn read_result(&self) -> Option<StatusEvent> {
        self.load()
            .result
            .filter(|ev| ev.status == JobStatus::Completed)
    }

    /// Hand a completed result to a newly mounted view and clear the session.
    pub fn take_result(&self) -> Option<StatusEvent> {
        let result = self.read_result()?;
        self.reset();
        Some(result)
    }

    pub fn reset(&self) {
        self.write(&[
            KvWrite::Remove(KEY_ACTIVE),
            KvWrite::Remove(KEY_REQUEST),
            KvWrite::Remove(KEY_RESULT),
        ]);
    }

    pub fn read_identity(&self) -> Option<UserIdentity> {
        self.read_json(KEY_USER)
    }

    pub fn save_identity(&self, identity: &UserIdentity) {
        if let Some(data) = encode(identity) {
            self.write(&[KvWrite::Set(KEY_USER, data)]);
        }
    }

    pub fn read_anon_id(&self) -> Option<String> {
        self.read_raw(KEY_ANON_ID).filter(|id| !id.is_empty())
    }

    pub fn save_anon_id(&self, id: &str) {
        self.write(&[KvWrite::Set(KEY_ANON_ID, id.to_string())]);
    }

    fn read_raw(&self, key: &str) -> Option<String> {
        match self.kv.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "session store read failed; treating as empty");
                None
            }
        }
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.read_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "ignoring corrupt session store entry");
                None
            }
        }
    }

    fn write(&self, writes: &[KvWrite<'_>]) {
        if let Err(e) = self.kv.apply(writes) {
            warn!(error = %e, "session store write failed");
        } else {
            debug!(count = writes.len(), "session store updated");
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "failed to encode session store entry");
            None
        }
    }
}

/// In-memory store for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryKv {
    map: Mutex<BTreeMap<String, String>>,
}

#[cfg(test)]
impl MemoryKv {
    pub fn insert(&self, key: &str, value: &str) {
        self.map
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }
}

#[cfg(test)]
impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> JobResult<Option<String>> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn apply(&self, writes: &[KvWrite<'_>]) -> JobResult<()> {
        let mut map = self.map.lock().unwrap();
        for write in writes {
            match write {
                KvWrite::Set(key, value) => {
                    map.insert((*key).to_string(), value.clone());
                }
                KvWrite::Remove(key) => {
                    map.remove(*key);
                }
            }
        }
        Ok(())
    }
}
