//! Durable coordination record: current term and last accepted state
//!
//! File format: [MAGIC][BODY_LEN: u32 LE][BODY: bincode][CRC32 of BODY: u32 LE]
//!
//! Writes go to a temporary file that is synced and renamed over the
//! previous record, so a crash leaves either the old or the new record.
//! Callers sit on async handlers, so on a multi-threaded runtime the write
//! runs under `block_in_place` and the worker's other tasks move elsewhere.

use crate::cluster::state::ClusterState;
use crate::common::{Error, Result};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::RuntimeFlavor;

const STATE_MAGIC: [u8; 4] = [0x4D, 0x53, 0x43, 0x31]; // "MSC1"
const STATE_FILE: &str = "coordination.state";

pub trait PersistedState: Send + Sync {
    fn current_term(&self) -> u64;

    fn last_accepted_state(&self) -> Arc<ClusterState>;

    fn set_current_term(&self, term: u64) -> Result<()>;

    fn set_last_accepted_state(&self, state: Arc<ClusterState>) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Record {
    current_term: u64,
    last_accepted: Arc<ClusterState>,
}

impl Record {
    fn empty(cluster_name: &str) -> Self {
        Self {
            current_term: 0,
            last_accepted: Arc::new(ClusterState::empty(cluster_name)),
        }
    }
}

pub struct InMemoryPersistedState {
    record: Mutex<Record>,
}

impl InMemoryPersistedState {
    pub fn new(current_term: u64, last_accepted: ClusterState) -> Self {
        Self {
            record: Mutex::new(Record {
                current_term,
                last_accepted: Arc::new(last_accepted),
            }),
        }
    }
}

impl PersistedState for InMemoryPersistedState {
    fn current_term(&self) -> u64 {
        self.record.lock().current_term
    }

    fn last_accepted_state(&self) -> Arc<ClusterState> {
        self.record.lock().last_accepted.clone()
    }

    fn set_current_term(&self, term: u64) -> Result<()> {
        self.record.lock().current_term = term;
        Ok(())
    }

    fn set_last_accepted_state(&self, state: Arc<ClusterState>) -> Result<()> {
        self.record.lock().last_accepted = state;
        Ok(())
    }
}

pub struct FilePersistedState {
    path: PathBuf,
    record: Mutex<Record>,
}

impl FilePersistedState {
    /// Open the record under `dir`, or start from the empty sentinel when
    /// none has been written yet.
    pub fn open(dir: impl AsRef<Path>, cluster_name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(STATE_FILE);

        let record = match fs::read(&path) {
            Ok(bytes) => Self::decode(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Record::empty(cluster_name),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            "loaded coordination state from {:?}: term {}, version {}",
            path,
            record.current_term,
            record.last_accepted.version
        );

        Ok(Self {
            path,
            record: Mutex::new(record),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn decode(bytes: &[u8]) -> Result<Record> {
        if bytes.len() < 12 || bytes[..4] != STATE_MAGIC {
            return Err(Error::Corrupted("missing coordination state header".into()));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[4..8]);
        let body_len = u32::from_le_bytes(len_bytes) as usize;
        if bytes.len() != 8 + body_len + 4 {
            return Err(Error::Corrupted(format!(
                "expected {} body bytes, file holds {}",
                body_len,
                bytes.len().saturating_sub(12)
            )));
        }

        let body = &bytes[8..8 + body_len];
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&bytes[8 + body_len..]);
        let expected = u32::from_le_bytes(crc_bytes);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        let (current_term, last_accepted): (u64, ClusterState) = bincode::deserialize(body)
            .map_err(|e| Error::Corrupted(format!("undecodable coordination state: {}", e)))?;
        Ok(Record {
            current_term,
            last_accepted: Arc::new(last_accepted),
        })
    }

    fn write(&self, record: &Record) -> Result<()> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.write_sync(record))
            }
            _ => self.write_sync(record),
        }
    }

    fn write_sync(&self, record: &Record) -> Result<()> {
        let body = bincode::serialize(&(record.current_term, record.last_accepted.as_ref()))?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&STATE_MAGIC)?;
            file.write_all(&(body.len() as u32).to_le_bytes())?;
            file.write_all(&body)?;
            file.write_all(&crc32fast::hash(&body).to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PersistedState for FilePersistedState {
    fn current_term(&self) -> u64 {
        self.record.lock().current_term
    }

    fn last_accepted_state(&self) -> Arc<ClusterState> {
        self.record.lock().last_accepted.clone()
    }

    fn set_current_term(&self, term: u64) -> Result<()> {
        let mut record = self.record.lock();
        let mut updated = record.clone();
        updated.current_term = term;
        self.write(&updated)?;
        *record = updated;
        Ok(())
    }

    fn set_last_accepted_state(&self, state: Arc<ClusterState>) -> Result<()> {
        let mut record = self.record.lock();
        let mut updated = record.clone();
        updated.last_accepted = state;
        self.write(&updated)?;
        *record = updated;
        Ok(())
    }
}
