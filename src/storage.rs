//! Persistence backends.
//!
//! Two kinds of storage exist on the device: a raw non-volatile memory region holding
//! the configuration record, and a small filesystem holding the message table and the
//! latency log. Both are traits so the poll loop can run against in-memory doubles.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use crate::messages::{LatencyRow, MessageRecord};

pub const MESSAGES_FILE: &str = "messages.json";
pub const STATS_FILE: &str = "stats.csv";

pub type MessageTable = BTreeMap<String, MessageRecord>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{needed} bytes exceed capacity {capacity}")]
    Capacity { needed: usize, capacity: usize },
    #[error("storage unavailable")]
    Unavailable,
}

/// Raw byte-addressed non-volatile memory.
pub trait Nvm {
    fn contents(&self) -> &[u8];
    fn capacity(&self) -> usize;
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError>;
}

fn check_bounds(offset: usize, len: usize, capacity: usize) -> Result<(), StorageError> {
    let needed = offset.saturating_add(len);
    if needed > capacity {
        return Err(StorageError::Capacity { needed, capacity });
    }
    Ok(())
}

/// NVM image kept in a fixed-size file.
#[derive(Debug)]
pub struct FileNvm {
    file: File,
    image: Vec<u8>,
}

impl FileNvm {
    /// Open or create the image, zero-filling it to `capacity`.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let mut image = Vec::with_capacity(capacity);
        file.read_to_end(&mut image)?;
        image.resize(capacity, 0);
        file.set_len(capacity as u64)?;
        Ok(Self { file, image })
    }
}

impl Nvm for FileNvm {
    fn contents(&self) -> &[u8] {
        &self.image
    }

    fn capacity(&self) -> usize {
        self.image.len()
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len(), self.image.len())?;
        self.image[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(bytes)?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// In-memory NVM. Clones share the same bytes.
#[derive(Debug, Clone)]
pub struct MemoryNvm {
    image: Rc<RefCell<Vec<u8>>>,
    snapshot: Vec<u8>,
}

impl MemoryNvm {
    pub fn new(capacity: usize) -> Self {
        Self {
            image: Rc::new(RefCell::new(vec![0; capacity])),
            snapshot: vec![0; capacity],
        }
    }

    /// Bytes currently stored, as seen through any handle.
    pub fn bytes(&self) -> Vec<u8> {
        self.image.borrow().clone()
    }

    fn refresh(&mut self) {
        self.snapshot.clone_from(&self.image.borrow());
    }
}

impl Nvm for MemoryNvm {
    fn contents(&self) -> &[u8] {
        &self.snapshot
    }

    fn capacity(&self) -> usize {
        self.snapshot.len()
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len(), self.snapshot.len())?;
        self.image.borrow_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.refresh();
        Ok(())
    }
}

impl MemoryNvm {
    /// A handle whose view reflects writes made through other clones.
    pub fn handle(&self) -> Self {
        let mut handle = self.clone();
        handle.refresh();
        handle
    }
}

/// Message table and latency log persistence.
pub trait RecordStore {
    fn load_messages(&self) -> Result<MessageTable, StorageError>;
    /// Replace the whole persisted table.
    fn save_messages(&mut self, table: &MessageTable) -> Result<(), StorageError>;
    fn append_latency(&mut self, row: &LatencyRow) -> Result<(), StorageError>;
}

impl<S: RecordStore + ?Sized> RecordStore for Box<S> {
    fn load_messages(&self) -> Result<MessageTable, StorageError> {
        (**self).load_messages()
    }

    fn save_messages(&mut self, table: &MessageTable) -> Result<(), StorageError> {
        (**self).save_messages(table)
    }

    fn append_latency(&mut self, row: &LatencyRow) -> Result<(), StorageError> {
        (**self).append_latency(row)
    }
}

/// `messages.json` and `stats.csv` in a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn messages_path(&self) -> PathBuf {
        self.dir.join(MESSAGES_FILE)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.dir.join(STATS_FILE)
    }
}

impl RecordStore for FileStore {
    fn load_messages(&self) -> Result<MessageTable, StorageError> {
        let path = self.messages_path();
        if !path.exists() {
            debug!(path = %path.display(), "no message table yet");
            return Ok(MessageTable::new());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn save_messages(&mut self, table: &MessageTable) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let text = serde_json::to_string(table)?;
        fs::write(self.messages_path(), text)?;
        Ok(())
    }

    fn append_latency(&mut self, row: &LatencyRow) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.stats_path())?;
        writeln!(file, "{}", row)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    messages: MessageTable,
    latency_rows: Vec<String>,
    saves: u32,
    fail_writes: bool,
}

/// In-memory record store. Clones share state so tests can inspect what was written.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Rc<RefCell<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail as if storage were read-only.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.borrow_mut().fail_writes = fail;
    }

    pub fn messages(&self) -> MessageTable {
        self.inner.borrow().messages.clone()
    }

    pub fn latency_rows(&self) -> Vec<String> {
        self.inner.borrow().latency_rows.clone()
    }

    pub fn save_count(&self) -> u32 {
        self.inner.borrow().saves
    }
}

impl RecordStore for MemoryStore {
    fn load_messages(&self) -> Result<MessageTable, StorageError> {
        Ok(self.inner.borrow().messages.clone())
    }

    fn save_messages(&mut self, table: &MessageTable) -> Result<(), StorageError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_writes {
            return Err(StorageError::Unavailable);
        }
        inner.messages = table.clone();
        inner.saves += 1;
        Ok(())
    }

    fn append_latency(&mut self, row: &LatencyRow) -> Result<(), StorageError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_writes {
            return Err(StorageError::Unavailable);
        }
        inner.latency_rows.push(row.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_nvm_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvm.bin");
        {
            let mut nvm = FileNvm::open(&path, 64).unwrap();
            assert_eq!(nvm.contents(), &[0u8; 64][..]);
            nvm.write(0, b"{}\0").unwrap();
        }
        let nvm = FileNvm::open(&path, 64).unwrap();
        assert_eq!(&nvm.contents()[..3], b"{}\0");
        assert_eq!(nvm.capacity(), 64);
    }

    #[test]
    fn test_nvm_rejects_overflow() {
        let mut nvm = MemoryNvm::new(4);
        assert!(matches!(
            nvm.write(2, b"abc"),
            Err(StorageError::Capacity { needed: 5, capacity: 4 })
        ));
    }

    #[test]
    fn test_memory_nvm_handles_share_bytes() {
        let nvm = MemoryNvm::new(8);
        let mut writer = nvm.clone();
        writer.write(0, b"ab").unwrap();
        assert_eq!(&nvm.bytes()[..2], b"ab");
        assert_eq!(&nvm.handle().contents()[..2], b"ab");
    }

    #[test]
    fn test_file_store_missing_table_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.load_messages().unwrap().is_empty());
    }
}
