//! A single named container: a file of equal-sized blocks behind an
//! in-band header block.
//!
//! ## On-disk format
//!
//! ```text
//! bytes 0..4                               block_size, little-endian i32
//! bytes 4..(4+block_size)                  header block (app-writable)
//! bytes (4+block_size)..(4+2*block_size)   payload block 0
//! ...
//! ```
//!
//! `read_block`/`write_block` address payload blocks only; the header is
//! reached through [`Handle::header`]/[`Handle::set_header`] and is
//! persisted to disk only on [`BlockStorage::close`], matching the
//! "persisted on close, reloaded on open" contract.

use crate::error::{PickleError, Result};
use crate::identifier;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;

const SIZE_FIELD_BYTES: u64 = 4;

struct ContainerInner {
    id: String,
    file: Arc<Mutex<File>>,
    block_size: u32,
    block_count: Mutex<u64>,
    header: Mutex<Vec<u8>>,
    header_dirty: AtomicBool,
    closed: AtomicBool,
}

/// A cheaply cloneable reference to an open container.
///
/// Multiple tables over the same container within one thread may share a
/// `Handle`; block I/O is serialized through the container's file mutex.
#[derive(Clone)]
pub struct Handle(Arc<ContainerInner>);

impl Handle {
    fn check_open(&self) -> Result<()> {
        if self.0.closed.load(Ordering::Acquire) {
            return Err(PickleError::Closed(self.0.id.clone()));
        }
        Ok(())
    }

    pub fn block_size(&self) -> u32 {
        self.0.block_size
    }

    pub fn block_count(&self) -> u64 {
        *self.0.block_count.lock()
    }

    fn payload_offset(&self, pos: u64) -> u64 {
        SIZE_FIELD_BYTES + self.0.block_size as u64 + pos * self.0.block_size as u64
    }

    /// Reads payload block `pos`. `pos` must be `< block_count`.
    pub async fn read_block(&self, pos: u64) -> Result<Vec<u8>> {
        self.check_open()?;
        let count = self.block_count();
        if pos >= count {
            return Err(PickleError::IndexOutOfRange {
                index: pos,
                bound: count,
            });
        }

        let offset = self.payload_offset(pos);
        let block_size = self.0.block_size as usize;
        let file = self.0.file.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut file = file.lock();
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; block_size];
            file.read_exact(&mut buf)?;
            Ok(buf)
        })
        .await?
    }

    /// Writes payload block `pos`. `pos` must be `<= block_count`; writing
    /// at `pos == block_count` extends the container by one block.
    pub async fn write_block(&self, pos: u64, buf: Vec<u8>) -> Result<()> {
        self.check_open()?;
        if buf.len() != self.0.block_size as usize {
            return Err(PickleError::InvalidArgument(format!(
                "write_block buffer length {} does not match block size {}",
                buf.len(),
                self.0.block_size
            )));
        }
        let count = self.block_count();
        if pos > count {
            return Err(PickleError::IndexOutOfRange {
                index: pos,
                bound: count,
            });
        }

        let offset = self.payload_offset(pos);
        let file = self.0.file.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut file = file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&buf)?;
            Ok(())
        })
        .await??;

        if pos == count {
            *self.0.block_count.lock() = count + 1;
        }
        Ok(())
    }

    /// Returns a copy of the in-memory header block.
    pub fn header(&self) -> Vec<u8> {
        self.0.header.lock().clone()
    }

    /// Overwrites the in-memory header block. `bytes.len()` must equal
    /// `block_size`. The header is not written to disk until
    /// [`BlockStorage::close`].
    pub fn set_header(&self, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        if bytes.len() != self.0.block_size as usize {
            return Err(PickleError::InvalidArgument(format!(
                "header length {} does not match block size {}",
                bytes.len(),
                self.0.block_size
            )));
        }
        let mut header = self.0.header.lock();
        header.copy_from_slice(bytes);
        self.0.header_dirty.store(true, Ordering::Release);
        Ok(())
    }
}

/// Workspace of named containers rooted at a directory.
pub struct BlockStorage {
    root: PathBuf,
    open: Mutex<HashMap<String, Handle>>,
}

impl BlockStorage {
    /// Opens (creating if necessary) a storage workspace rooted at `root`.
    pub fn open_root(root: impl Into<PathBuf>) -> Self {
        BlockStorage {
            root: root.into(),
            open: Mutex::new(HashMap::new()),
        }
    }

    fn container_path(&self, normalized_id: &str) -> PathBuf {
        self.root.join(normalized_id)
    }

    fn normalize(&self, id: &str) -> Result<String> {
        identifier::normalize(id, std::path::MAIN_SEPARATOR)
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        let normalized = self.normalize(id)?;
        if self.open.lock().contains_key(&normalized) {
            return Ok(true);
        }
        Ok(self.container_path(&normalized).is_file())
    }

    /// Creates a new container. Fails [`PickleError::AlreadyExists`] if
    /// the container already exists, [`PickleError::InvalidArgument`] if
    /// `block_size <= 0`.
    pub fn create(&self, id: &str, block_size: i32) -> Result<Handle> {
        if block_size <= 0 {
            return Err(PickleError::InvalidArgument(format!(
                "block_size must be positive, got {block_size}"
            )));
        }
        let normalized = self.normalize(id)?;
        let path = self.container_path(&normalized);
        if path.exists() {
            return Err(PickleError::AlreadyExists(normalized));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let block_size = block_size as u32;
        file.write_all(&(block_size as i32).to_le_bytes())?;
        let header = vec![0u8; block_size as usize];
        file.write_all(&header)?;
        file.flush()?;

        let handle = Handle(Arc::new(ContainerInner {
            id: normalized.clone(),
            file: Arc::new(Mutex::new(file)),
            block_size,
            block_count: Mutex::new(0),
            header: Mutex::new(header),
            header_dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }));

        self.open.lock().insert(normalized, handle.clone());
        tracing::info!(container = %handle.0.id, block_size, "created container");
        Ok(handle)
    }

    /// Opens an existing container. Idempotent: returns the same handle
    /// for the same identifier within one `BlockStorage` instance. Fails
    /// [`PickleError::NotFound`] if the container does not exist,
    /// [`PickleError::Corrupted`] if its header is shorter than 4 bytes.
    pub fn open(&self, id: &str) -> Result<Handle> {
        let normalized = self.normalize(id)?;
        if let Some(handle) = self.open.lock().get(&normalized) {
            return Ok(handle.clone());
        }

        let path = self.container_path(&normalized);
        if !path.is_file() {
            return Err(PickleError::NotFound(normalized));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len < SIZE_FIELD_BYTES {
            return Err(PickleError::Corrupted(format!(
                "container {normalized} header shorter than 4 bytes"
            )));
        }

        let mut size_buf = [0u8; 4];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut size_buf)?;
        let block_size = i32::from_le_bytes(size_buf);
        if block_size <= 0 {
            return Err(PickleError::Corrupted(format!(
                "container {normalized} has non-positive block size {block_size}"
            )));
        }
        let block_size = block_size as u32;

        if len < SIZE_FIELD_BYTES + block_size as u64 {
            return Err(PickleError::Corrupted(format!(
                "container {normalized} header block truncated"
            )));
        }
        let mut header = vec![0u8; block_size as usize];
        file.read_exact(&mut header)?;

        let payload_len = len - SIZE_FIELD_BYTES - block_size as u64;
        if payload_len % block_size as u64 != 0 {
            return Err(PickleError::Corrupted(format!(
                "container {normalized} payload length {payload_len} not a multiple of block size {block_size}"
            )));
        }
        let block_count = payload_len / block_size as u64;

        let handle = Handle(Arc::new(ContainerInner {
            id: normalized.clone(),
            file: Arc::new(Mutex::new(file)),
            block_size,
            block_count: Mutex::new(block_count),
            header: Mutex::new(header),
            header_dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }));

        self.open.lock().insert(normalized, handle.clone());
        Ok(handle)
    }

    /// Flushes the header if dirty and releases the handle. Fails
    /// [`PickleError::InvalidArgument`] on double-close.
    pub fn close(&self, handle: &Handle) -> Result<()> {
        if handle.0.closed.swap(true, Ordering::AcqRel) {
            return Err(PickleError::InvalidArgument(format!(
                "container {} already closed",
                handle.0.id
            )));
        }
        if handle.0.header_dirty.swap(false, Ordering::AcqRel) {
            let header = handle.0.header.lock();
            let mut file = handle.0.file.lock();
            file.seek(SeekFrom::Start(SIZE_FIELD_BYTES))?;
            file.write_all(&header)?;
            file.flush()?;
        }
        self.open.lock().remove(&handle.0.id);
        tracing::info!(container = %handle.0.id, "closed container");
        Ok(())
    }

    /// Closes (if not already closed) and removes the container's file.
    pub fn delete(&self, handle: Handle) -> Result<()> {
        let path = self.container_path(&handle.0.id);
        if !handle.0.closed.load(Ordering::Acquire) {
            self.close(&handle)?;
        }
        std::fs::remove_file(&path)?;
        tracing::info!(container = %handle.0.id, "deleted container");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn create_open_read_write_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());

        let h = storage.create("widgets/data", 9).unwrap();
        assert_eq!(h.block_count(), 0);

        h.write_block(0, vec![7u8; 9]).await.unwrap();
        assert_eq!(h.block_count(), 1);

        let block = h.read_block(0).await.unwrap();
        assert_eq!(block, vec![7u8; 9]);

        storage.close(&h).unwrap();

        let h2 = storage.open("widgets/data").unwrap();
        assert_eq!(h2.block_count(), 1);
        let block = h2.read_block(0).await.unwrap();
        assert_eq!(block, vec![7u8; 9]);
    }

    #[tokio::test]
    async fn header_persists_across_close() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        let h = storage.create("t", 16).unwrap();

        let mut header = vec![0u8; 16];
        header[0..8].copy_from_slice(&42i64.to_le_bytes());
        h.set_header(&header).unwrap();
        storage.close(&h).unwrap();

        let h2 = storage.open("t").unwrap();
        assert_eq!(&h2.header()[0..8], &42i64.to_le_bytes());
    }

    #[test]
    fn create_rejects_non_positive_block_size() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        let err = storage.create("t", 0).unwrap_err();
        assert!(matches!(err, PickleError::InvalidArgument(_)));
    }

    #[test]
    fn create_twice_fails_already_exists() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        storage.create("t", 8).unwrap();
        let err = storage.create("t", 8).unwrap_err();
        assert!(matches!(err, PickleError::AlreadyExists(_)));
    }

    #[test]
    fn open_missing_fails_not_found() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        let err = storage.open("nope").unwrap_err();
        assert!(matches!(err, PickleError::NotFound(_)));
    }

    #[test]
    fn open_is_idempotent_within_one_storage() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        let a = storage.create("t", 8).unwrap();
        let b = storage.open("t").unwrap();
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[tokio::test]
    async fn read_out_of_range_fails() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        let h = storage.create("t", 8).unwrap();
        let err = h.read_block(0).await.unwrap_err();
        assert!(matches!(err, PickleError::IndexOutOfRange { .. }));
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        let h = storage.create("t", 8).unwrap();
        let path = storage.container_path("t");
        assert!(path.exists());
        storage.delete(h).unwrap();
        assert!(!path.exists());
    }
}
