//! Durable sorted store
//!
//! A [`MemKv`] whose commits are first appended to a record-format log.
//! Each record holds one commit: a bincode-encoded `Vec<Mutation>`.
//!
//! ## Recovery
//! On open the log is replayed into memory. Damaged records are skipped and
//! a torn final record is dropped; both are counted in [`RecoveryStats`].
//! The live entries are then written to a fresh log that replaces the old
//! one, and new commits are appended after them.

use std::fs::{self, File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::config::{Options, SyncPolicy};
use crate::error::{Result, StrataError};
use crate::record;

use super::{check_key_size, check_sizes, Batch, KvIter, MemKv, Mutation, ReadTx, SortedKv};

/// Mutations per record when writing the compacted snapshot.
const SNAPSHOT_CHUNK: usize = 1024;

/// Outcome of replaying the log on open
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Commits replayed
    pub records_replayed: u64,
    /// Records lost to corruption
    pub records_corrupted: u64,
    /// Blocks the record reader abandoned
    pub skipped_blocks: u64,
    /// Whether the log ended in the middle of a record
    pub torn_tail: bool,
    /// Live entries after replay
    pub live_entries: u64,
}

struct LogState {
    /// `None` once closed
    writer: Option<record::Writer<File>>,
    commits_since_sync: usize,
}

/// Durable [`SortedKv`] backed by a mutation log
///
/// ## Concurrency:
/// Commits are serialized by the log lock: a commit is appended and flushed
/// to the log before it is applied in memory. Reads never touch the log.
pub struct LogKv {
    mem: MemKv,
    log: Mutex<LogState>,
    path: PathBuf,
    sync: SyncPolicy,
    recovery: RecoveryStats,
}

impl LogKv {
    /// Open or create the log at `path`
    ///
    /// On startup:
    /// 1. Replay the existing log, if any
    /// 2. Write the live entries to a temporary log and fsync it
    /// 3. Rename it over the old log and fsync the directory
    /// 4. Keep appending commits to it
    pub fn open(path: &Path, options: &Options, sync: SyncPolicy) -> Result<Self> {
        let mem = MemKv::with_options(options);

        // Step 1: Replay
        let mut recovery = if path.exists() {
            let file = File::open(path)?;
            replay(record::Reader::new(BufReader::new(file)), &mem)?
        } else {
            RecoveryStats::default()
        };

        // Step 2: Snapshot
        let entries = mem.entries();
        recovery.live_entries = entries.len() as u64;
        let tmp_path = snapshot_path(path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = record::Writer::new(file);
        for chunk in entries.chunks(SNAPSHOT_CHUNK) {
            let mutations: Vec<Mutation> = chunk
                .iter()
                .map(|(key, value)| Mutation::Set {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect();
            writer.append(&encode(&mutations)?)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;

        // Step 3: Replace
        fs::rename(&tmp_path, path)?;
        sync_parent_dir(path)?;

        if recovery.records_replayed > 0 || recovery.records_corrupted > 0 || recovery.torn_tail {
            tracing::info!(
                "Log recovery: {} commits replayed, {} corrupted, {} blocks skipped, torn tail: {}, {} live entries",
                recovery.records_replayed,
                recovery.records_corrupted,
                recovery.skipped_blocks,
                recovery.torn_tail,
                recovery.live_entries
            );
        }

        Ok(Self {
            mem,
            log: Mutex::new(LogState {
                writer: Some(writer),
                commits_since_sync: 0,
            }),
            path: path.to_path_buf(),
            sync,
            recovery,
        })
    }

    /// What replay found when the log was opened
    pub fn recovery(&self) -> &RecoveryStats {
        &self.recovery
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one commit to the log, then apply it in memory.
    fn commit(&self, mutations: Vec<Mutation>) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let payload = encode(&mutations)?;
        let mut log = self.log.lock();
        let writer = log
            .writer
            .as_mut()
            .ok_or(StrataError::Closed("log kv"))?;
        writer.append(&payload)?;
        writer.flush()?;

        log.commits_since_sync += 1;
        let due = match self.sync {
            SyncPolicy::EveryCommit => true,
            SyncPolicy::EveryNCommits { count } => log.commits_since_sync >= count.max(1),
        };
        if due {
            if let Some(writer) = &log.writer {
                writer.get_ref().sync_data()?;
            }
            log.commits_since_sync = 0;
        }

        self.mem.apply(&mutations)
    }
}

/// Temporary file the compacted log is written to: `<path>.tmp`
fn snapshot_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Make a rename within `path`'s directory durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

fn encode(mutations: &[Mutation]) -> Result<Vec<u8>> {
    bincode::serialize(mutations).map_err(|e| StrataError::Serialization(e.to_string()))
}

fn replay<R: std::io::Read>(mut reader: record::Reader<R>, mem: &MemKv) -> Result<RecoveryStats> {
    let mut stats = RecoveryStats::default();
    loop {
        match reader.next_record() {
            Ok(Some(payload)) => match bincode::deserialize::<Vec<Mutation>>(&payload) {
                Ok(mutations) => {
                    mem.apply(&mutations)?;
                    stats.records_replayed += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping undecodable log record: {}", e);
                    stats.records_corrupted += 1;
                }
            },
            Ok(None) => break,
            Err(StrataError::UnexpectedEof) => {
                tracing::warn!("Log ends with a partial record, dropping it");
                stats.torn_tail = true;
                break;
            }
            Err(err) if err.is_corruption() => stats.records_corrupted += 1,
            Err(err) => return Err(err),
        }
    }
    stats.skipped_blocks = reader.skipped_blocks();
    Ok(stats)
}

impl SortedKv for LogKv {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.mem.get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_sizes(key, value)?;
        self.commit(vec![Mutation::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        check_key_size(key)?;
        self.commit(vec![Mutation::Delete { key: key.to_vec() }])
    }

    fn find(&self, start: &[u8], end: &[u8]) -> Result<KvIter<'_>> {
        self.mem.find(start, end)
    }

    fn commit_batch(&self, batch: Batch) -> Result<()> {
        self.commit(batch.into_mutations()?)
    }

    fn begin_read_tx(&self) -> Result<Box<dyn ReadTx + '_>> {
        self.mem.begin_read_tx()
    }

    /// Flush and fsync the log. Later writes fail; reads keep working.
    fn close(&self) -> Result<()> {
        let mut log = self.log.lock();
        let Some(mut writer) = log.writer.take() else {
            return Err(StrataError::Closed("log kv"));
        };
        writer.close()?;
        writer.get_ref().sync_all()?;
        tracing::debug!("Closed log {}", self.path.display());
        Ok(())
    }
}
