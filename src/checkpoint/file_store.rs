//! Directory-backed checkpoint store
//!
//! Layout under the root directory:
//!
//! ```text
//! schema.json
//! <hex(owner)>/<hex(task)>/<time-bits>/host-<n>.json
//! <hex(owner)>/<hex(task)>/<time-bits>/VALID
//! ```
//!
//! Time directories are named by the 16-digit hex of the time's IEEE bits so
//! every `SimTime` maps to exactly one directory. Each host file carries the
//! base64 payload and its SHA-256 digest; entries failing the digest check
//! are skipped.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{HostIndex, SimTime, TaskId};

use super::store::{CheckpointEntry, CheckpointStore, StoreCapabilities};

const SCHEMA_FILE: &str = "schema.json";
const SCHEMA_VERSION: u32 = 1;
const VALID_MARKER: &str = "VALID";

#[derive(Debug, Serialize, Deserialize)]
struct Schema {
    version: u32,
    created_by: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    task_id: TaskId,
    time: SimTime,
    host: HostIndex,
    payload: String,
    sha256: String,
    written_at: chrono::DateTime<chrono::Utc>,
}

impl StoredEntry {
    fn new(task: &TaskId, time: SimTime, host: HostIndex, payload: &[u8]) -> Self {
        Self {
            task_id: task.clone(),
            time,
            host,
            payload: base64::engine::general_purpose::STANDARD.encode(payload),
            sha256: digest(payload),
            written_at: chrono::Utc::now(),
        }
    }

    fn decode(self) -> std::result::Result<CheckpointEntry, String> {
        let payload = base64::engine::general_purpose::STANDARD
            .decode(&self.payload)
            .map_err(|e| format!("invalid base64 payload: {}", e))?;
        if digest(&payload) != self.sha256 {
            return Err("payload digest mismatch".to_string());
        }
        Ok(CheckpointEntry {
            task_id: self.task_id,
            time: self.time,
            host: self.host,
            payload,
        })
    }
}

fn digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Checkpoint store writing one JSON file per host and time point
#[derive(Debug)]
pub struct FileCheckpointStore {
    root: PathBuf,
    open: Mutex<bool>,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: Mutex::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.open.lock() {
            Ok(())
        } else {
            Err(Error::StorageUnavailable(format!(
                "file store at {} is not open",
                self.root.display()
            )))
        }
    }

    fn task_dir(&self, owner: &str, task: &TaskId) -> PathBuf {
        self.root
            .join(hex::encode(owner.as_bytes()))
            .join(hex::encode(task.as_str().as_bytes()))
    }

    fn time_dir(&self, owner: &str, task: &TaskId, time: SimTime) -> PathBuf {
        self.task_dir(owner, task)
            .join(format!("{:016x}", time.value().to_bits()))
    }

    /// Valid time directories of a task, newest first
    fn valid_times(&self, task_dir: &Path) -> Result<Vec<(SimTime, PathBuf)>> {
        let read_dir = match fs::read_dir(task_dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(Error::IoRead {
                    path: task_dir.to_path_buf(),
                    source,
                })
            }
        };

        let mut times = Vec::new();
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            let Some(bits) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| u64::from_str_radix(n, 16).ok())
            else {
                continue;
            };
            if path.join(VALID_MARKER).is_file() {
                times.push((SimTime::new(f64::from_bits(bits)), path));
            }
        }
        times.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(times)
    }

    fn read_time_dir(&self, task: &TaskId, time: SimTime, dir: &Path) -> Result<Vec<CheckpointEntry>> {
        let read_dir = fs::read_dir(dir).map_err(|source| Error::IoRead {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut entries = Vec::new();
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(|source| Error::IoRead {
                path: path.clone(),
                source,
            })?;

            let decoded = serde_json::from_str::<StoredEntry>(&content)
                .map_err(|e| e.to_string())
                .and_then(StoredEntry::decode);
            match decoded {
                Ok(entry) => entries.push(entry),
                Err(message) => {
                    let err = Error::CheckpointCorrupted {
                        task_id: task.to_string(),
                        time: time.value(),
                        message: format!("{}: {}", path.display(), message),
                    };
                    warn!(error = %err, "Skipping corrupted checkpoint entry");
                }
            }
        }
        entries.sort_by_key(|e| e.host);
        Ok(entries)
    }
}

/// Write via a temporary file so readers never see a partial entry
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).map_err(|source| Error::IoWrite {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| Error::IoWrite {
        path: path.to_path_buf(),
        source,
    })
}

impl CheckpointStore for FileCheckpointStore {
    fn name(&self) -> &str {
        "file"
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::all()
    }

    fn open(&self, owner: &str) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            Error::storage_open(format!("cannot create {}: {}", self.root.display(), e))
        })?;

        let schema_path = self.root.join(SCHEMA_FILE);
        if schema_path.is_file() {
            let content = fs::read_to_string(&schema_path).map_err(|source| Error::IoRead {
                path: schema_path.clone(),
                source,
            })?;
            let schema: Schema = serde_json::from_str(&content)
                .map_err(|e| Error::storage_open(format!("unreadable {}: {}", schema_path.display(), e)))?;
            if schema.version != SCHEMA_VERSION {
                return Err(Error::storage_open(format!(
                    "schema version {} in {}, expected {}",
                    schema.version,
                    self.root.display(),
                    SCHEMA_VERSION
                )));
            }
        } else {
            let schema = Schema {
                version: SCHEMA_VERSION,
                created_by: owner.to_string(),
            };
            write_atomic(&schema_path, serde_json::to_string_pretty(&schema)?.as_bytes())?;
            info!(root = %self.root.display(), "Checkpoint store schema created");
        }

        *self.open.lock() = true;
        debug!(root = %self.root.display(), owner = %owner, "File checkpoint store opened");
        Ok(())
    }

    fn write(&self, owner: &str, task: &TaskId, time: SimTime, host: HostIndex, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;

        let dir = self.time_dir(owner, task, time);
        fs::create_dir_all(&dir).map_err(|source| Error::IoWrite {
            path: dir.clone(),
            source,
        })?;

        let entry = StoredEntry::new(task, time, host, payload);
        write_atomic(
            &dir.join(format!("host-{}.json", host)),
            serde_json::to_string_pretty(&entry)?.as_bytes(),
        )
    }

    fn read_last_checkpoint(&self, owner: &str, task: &TaskId) -> Result<Option<Vec<CheckpointEntry>>> {
        self.ensure_open()?;

        for (time, dir) in self.valid_times(&self.task_dir(owner, task))? {
            let entries = self.read_time_dir(task, time, &dir)?;
            if !entries.is_empty() {
                return Ok(Some(entries));
            }
            warn!(task_id = %task, time = %time, "Valid checkpoint has no readable entries, trying older");
        }
        Ok(None)
    }

    fn mark_valid(&self, owner: &str, task: &TaskId, time: SimTime) -> Result<bool> {
        self.ensure_open()?;

        let dir = self.time_dir(owner, task, time);
        if !dir.is_dir() {
            return Ok(false);
        }
        let marker = dir.join(VALID_MARKER);
        fs::write(&marker, chrono::Utc::now().to_rfc3339()).map_err(|source| Error::IoWrite {
            path: marker,
            source,
        })?;
        Ok(true)
    }

    fn close(&self) -> Result<()> {
        *self.open.lock() = false;
        debug!(root = %self.root.display(), "File checkpoint store closed");
        Ok(())
    }
}
