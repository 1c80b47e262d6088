//! Directory-backed log store with an in-memory ordered index
//!
//! Layout of a store directory:
//! ```text
//! LOCK       - held with an exclusive flock while the store is open
//! data.log   - [HEADER: 16 bytes][RECORDS: variable]
//!
//! HEADER
//!   - magic: 8 bytes ("PATRICIA")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes (reserved)
//! ```
//!
//! Records are appended and never rewritten in place (see `store::record`).
//! Opening a store replays the log into a `BTreeMap` of key to value location.
//! A torn final record is truncated away. A damaged record with more log
//! after it fails the open and leaves the file untouched.

use super::record::{inflate, ReadOutcome, Record, RecordOp};
use super::{BatchOp, KvBackend, PrefixIterator, WriteBatch};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::{Result, MAGIC, VERSION};
use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HEADER_SIZE: u64 = 16;
const LOG_FILE: &str = "data.log";
const LOCK_FILE: &str = "LOCK";

/// Location of a live value in the log
#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
    compressed: bool,
}

/// Open state; dropped on close
struct Inner {
    log: File,
    lock: File,
    index: BTreeMap<Vec<u8>, IndexEntry>,
    write_offset: u64,
}

/// A persistent ordered key-value store in a single directory
pub struct FileStore {
    path: PathBuf,
    config: StoreConfig,
    inner: Mutex<Option<Inner>>,
}

impl FileStore {
    /// Open the store at `path` with default options, creating it if missing
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open the store at `path`
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            if !config.create_if_missing {
                return Err(StoreError::NotFound(path).into());
            }
            fs::create_dir_all(&path)?;
        }

        let lock = acquire_lock(&path)?;

        let mut log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.join(LOG_FILE))?;

        let file_len = log.metadata()?.len();
        if file_len == 0 {
            write_header(&mut log)?;
        } else {
            check_header(&mut log)?;
        }

        let (index, write_offset) = replay(&mut log, &path)?;
        debug!(path = %path.display(), keys = index.len(), "opened store");

        Ok(FileStore {
            path,
            config,
            inner: Mutex::new(Some(Inner {
                log,
                lock,
                index,
                write_offset,
            })),
        })
    }

    /// Get the store directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Size of the log file in bytes
    pub fn log_size(&self) -> std::result::Result<u64, StoreError> {
        let guard = self.inner.lock();
        let inner = guard.as_ref().ok_or_else(|| self.closed())?;
        Ok(inner.write_offset)
    }

    /// Rewrite the log keeping only live values
    pub fn compact(&self) -> std::result::Result<(), StoreError> {
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or_else(|| self.closed())?;

        let tmp_path = self.path.join(format!("{}.compact", LOG_FILE));
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        write_header(&mut tmp)?;

        let mut index = BTreeMap::new();
        let mut offset = HEADER_SIZE;
        for (key, entry) in inner.index.iter() {
            let stored = read_stored(&mut inner.log, entry)?;
            let record = Record {
                op: RecordOp::Put,
                key: key.clone(),
                value: stored,
                compressed: entry.compressed,
            };
            tmp.write_all(&record.encode())?;
            index.insert(
                key.clone(),
                IndexEntry {
                    offset: offset + record.value_offset() as u64,
                    size: entry.size,
                    compressed: entry.compressed,
                },
            );
            offset += record.encoded_len() as u64;
        }
        tmp.sync_all()?;
        fs::rename(&tmp_path, self.path.join(LOG_FILE))?;

        debug!(
            path = %self.path.display(),
            before = inner.write_offset,
            after = offset,
            "compacted store"
        );
        inner.log = tmp;
        inner.index = index;
        inner.write_offset = offset;
        Ok(())
    }

    fn closed(&self) -> StoreError {
        StoreError::Closed(self.path.clone())
    }
}

impl KvBackend for FileStore {
    fn get(&self, key: &[u8]) -> std::result::Result<Option<Vec<u8>>, StoreError> {
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or_else(|| self.closed())?;

        let Some(entry) = inner.index.get(key).copied() else {
            return Ok(None);
        };
        let stored = read_stored(&mut inner.log, &entry)?;
        Ok(Some(inflate(stored, entry.compressed)?))
    }

    fn write_batch(&self, batch: WriteBatch) -> std::result::Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let records = batch
            .operations
            .into_iter()
            .map(|op| match op {
                BatchOp::Put { key, value } => {
                    Record::put(&key, &value, self.config.should_compress(value.len()))
                }
                BatchOp::Delete { key } => Record::delete(&key),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut buffer = Vec::with_capacity(records.iter().map(Record::encoded_len).sum());
        for record in &records {
            buffer.extend(record.encode());
        }

        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or_else(|| self.closed())?;

        let start = inner.write_offset;
        inner.log.seek(SeekFrom::Start(start))?;
        inner.log.write_all(&buffer)?;
        if self.config.sync_writes {
            inner.log.sync_data()?;
        }

        let mut offset = start;
        for record in records {
            let len = record.encoded_len() as u64;
            match record.op {
                RecordOp::Put => {
                    let entry = IndexEntry {
                        offset: offset + record.value_offset() as u64,
                        size: record.value.len() as u32,
                        compressed: record.compressed,
                    };
                    inner.index.insert(record.key, entry);
                }
                RecordOp::Delete => {
                    inner.index.remove(&record.key);
                }
            }
            offset += len;
        }
        inner.write_offset = offset;
        Ok(())
    }

    fn prefix_iterator(&self, prefix: &[u8]) -> std::result::Result<PrefixIterator<'_>, StoreError> {
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or_else(|| self.closed())?;

        let matches: Vec<(Vec<u8>, IndexEntry)> = inner
            .index
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), *e))
            .collect();

        let mut entries = Vec::with_capacity(matches.len());
        for (key, entry) in matches {
            let stored = read_stored(&mut inner.log, &entry)?;
            entries.push((key, inflate(stored, entry.compressed)?));
        }
        Ok(Box::new(entries.into_iter()))
    }

    fn len(&self) -> std::result::Result<usize, StoreError> {
        let guard = self.inner.lock();
        let inner = guard.as_ref().ok_or_else(|| self.closed())?;
        Ok(inner.index.len())
    }

    fn flush(&self) -> std::result::Result<(), StoreError> {
        let guard = self.inner.lock();
        let inner = guard.as_ref().ok_or_else(|| self.closed())?;
        inner.log.sync_all()?;
        Ok(())
    }

    fn close(&self) -> std::result::Result<(), StoreError> {
        let Some(inner) = self.inner.lock().take() else {
            return Ok(());
        };

        inner.log.sync_all()?;
        flock(inner.lock.as_raw_fd(), FlockArg::UnlockNonblock)
            .map_err(|e| StoreError::Io(e.into()))?;
        debug!(path = %self.path.display(), "closed store");
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        // Best-effort close on drop
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "failed to close store on drop");
        }
    }
}

fn acquire_lock(dir: &Path) -> std::result::Result<File, StoreError> {
    let lock = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(dir.join(LOCK_FILE))?;

    match flock(lock.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(lock),
        Err(Errno::EWOULDBLOCK) => Err(StoreError::Locked(dir.to_path_buf())),
        Err(e) => Err(StoreError::Io(e.into())),
    }
}

fn write_header(file: &mut File) -> std::result::Result<(), StoreError> {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..8].copy_from_slice(MAGIC);
    header[8..12].copy_from_slice(&VERSION.to_le_bytes());
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    file.sync_all()?;
    Ok(())
}

fn check_header(file: &mut File) -> std::result::Result<(), StoreError> {
    let mut header = [0u8; HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut header)
        .map_err(|_| StoreError::InvalidFile("truncated header".into()))?;

    if &header[0..8] != MAGIC {
        return Err(StoreError::InvalidFile("invalid magic bytes".into()));
    }

    let version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    if version != VERSION {
        return Err(StoreError::VersionMismatch {
            expected: VERSION,
            found: version,
        });
    }
    Ok(())
}

/// Rebuild the index from the log, cutting off a torn tail
fn replay(
    log: &mut File,
    path: &Path,
) -> std::result::Result<(BTreeMap<Vec<u8>, IndexEntry>, u64), StoreError> {
    let file_len = log.metadata()?.len();
    log.seek(SeekFrom::Start(HEADER_SIZE))?;

    let mut index = BTreeMap::new();
    let mut offset = HEADER_SIZE;
    let mut reader = BufReader::new(&*log);

    loop {
        match Record::read_from(&mut reader, file_len - offset)? {
            ReadOutcome::Record(record) => {
                let len = record.encoded_len() as u64;
                match record.op {
                    RecordOp::Put => {
                        let entry = IndexEntry {
                            offset: offset + record.value_offset() as u64,
                            size: record.value.len() as u32,
                            compressed: record.compressed,
                        };
                        index.insert(record.key, entry);
                    }
                    RecordOp::Delete => {
                        index.remove(&record.key);
                    }
                }
                offset += len;
            }
            ReadOutcome::End => break,
            ReadOutcome::Corrupt(reason) => {
                warn!(path = %path.display(), offset, reason = %reason, "corrupt log record");
                return Err(StoreError::Corrupt(format!(
                    "{} at offset {}: {}",
                    path.join(LOG_FILE).display(),
                    offset,
                    reason
                )));
            }
            ReadOutcome::Torn(reason) => {
                warn!(
                    path = %path.display(),
                    offset,
                    dropped = file_len - offset,
                    reason = %reason,
                    "truncating torn log tail"
                );
                drop(reader);
                log.set_len(offset)?;
                log.sync_all()?;
                return Ok((index, offset));
            }
        }
    }

    Ok((index, offset))
}

fn read_stored(log: &mut File, entry: &IndexEntry) -> std::result::Result<Vec<u8>, StoreError> {
    let mut data = vec![0u8; entry.size as usize];
    log.seek(SeekFrom::Start(entry.offset))?;
    log.read_exact(&mut data)?;
    Ok(data)
}
