//! Synchronous, random-access byte-level table over a block container.
//!
//! `PagedTable` turns the block-addressed [`crate::storage::Handle`] into
//! a flat, growable byte array with a page cache in front of it. The
//! cache itself is an intrusive LRU list specialized for `Page`, rather
//! than [`crate::buffer::LruCache`]: page loads here are asynchronous and
//! need to inspect and mutate sibling state (the background read/write
//! slots, the buffer recycle stack) that a closure-based `load` callback
//! cannot borrow alongside the cache it is called from. The eviction
//! policy and recency bookkeeping are otherwise the same algorithm as
//! [`crate::buffer::LruCache`].

use super::ByteBuffer;
use crate::error::{PickleError, Result};
use crate::storage::Handle;
use std::collections::HashMap;

const NIL: usize = usize::MAX;

/// A cached copy of one on-disk block.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: u64,
    pub modified: bool,
    pub bytes: ByteBuffer,
}

struct PageNode {
    page: Page,
    prev: usize,
    next: usize,
}

struct BgRead {
    id: u64,
    task: tokio::task::JoinHandle<Result<Vec<u8>>>,
}

struct BgWrite {
    id: u64,
    task: tokio::task::JoinHandle<Result<()>>,
}

/// LRU cache capacity for a paged byte table. Must be `> 2` (spec.md
/// §4.4); the default comfortably exceeds the one-ahead-read /
/// one-in-flight-write working set.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { capacity: 64 }
    }
}

/// Synchronous (from the caller's point of view), random-access byte
/// table over a [`Handle`]'s payload blocks.
pub struct PagedTable {
    handle: Handle,
    block_size: usize,
    block_count: u64,
    element_count: u64,
    capacity: usize,
    nodes: Vec<Option<PageNode>>,
    index: HashMap<u64, usize>,
    head: usize,
    tail: usize,
    last_accessed: Option<(u64, usize)>,
    bg_read: Option<BgRead>,
    bg_write: Option<BgWrite>,
    recycle: Vec<ByteBuffer>,
}

impl PagedTable {
    /// Opens a paged table over `handle`. Reads `element_count` from the
    /// first 8 bytes of the handle's header block (zero for a fresh
    /// container).
    pub fn open(handle: Handle, config: CacheConfig) -> Result<Self> {
        if config.capacity <= 2 {
            return Err(PickleError::InvalidArgument(format!(
                "paged table cache capacity must be > 2, got {}",
                config.capacity
            )));
        }
        let header = handle.header();
        let element_count = if header.len() >= 8 {
            i64::from_le_bytes(header[0..8].try_into().unwrap()) as u64
        } else {
            0
        };
        let block_size = handle.block_size() as usize;
        let block_count = handle.block_count();
        Ok(PagedTable {
            handle,
            block_size,
            block_count,
            element_count,
            capacity: config.capacity,
            nodes: Vec::with_capacity(config.capacity),
            index: HashMap::with_capacity(config.capacity),
            head: NIL,
            tail: NIL,
            last_accessed: None,
            bg_read: None,
            bg_write: None,
            recycle: Vec::new(),
        })
    }

    pub fn element_count(&self) -> u64 {
        self.element_count
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn locate(&self, i: u64) -> (u64, usize) {
        let block_size = self.block_size as u64;
        (i / block_size, (i % block_size) as usize)
    }

    fn zero_buffer(&mut self) -> ByteBuffer {
        self.recycle
            .pop()
            .map(|mut buf| {
                buf.zero();
                buf
            })
            .unwrap_or_else(|| ByteBuffer::with_capacity(self.block_size))
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.nodes[slot].as_ref().unwrap();
            (node.prev, node.next)
        };
        if prev != NIL {
            self.nodes[prev].as_mut().unwrap().next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].as_mut().unwrap().prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, slot: usize) {
        {
            let node = self.nodes[slot].as_mut().unwrap();
            node.prev = NIL;
            node.next = self.head;
        }
        if self.head != NIL {
            self.nodes[self.head].as_mut().unwrap().prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    async fn drain_write(&mut self) -> Result<()> {
        if let Some(bg) = self.bg_write.take() {
            bg.task.await??;
        }
        Ok(())
    }

    async fn drain_read(&mut self) -> Result<()> {
        if let Some(bg) = self.bg_read.take() {
            let bytes = bg.task.await??;
            self.recycle.push(ByteBuffer::from_vec(bytes));
        }
        Ok(())
    }

    fn start_background_write(&mut self, id: u64, bytes: Vec<u8>) {
        let handle = self.handle.clone();
        let task = tokio::spawn(async move { handle.write_block(id, bytes).await });
        self.bg_write = Some(BgWrite { id, task });
    }

    fn start_background_read(&mut self, id: u64) {
        if self.bg_read.is_some() || self.bg_write.as_ref().is_some_and(|w| w.id == id) {
            return;
        }
        if self.index.contains_key(&id) {
            return;
        }
        let handle = self.handle.clone();
        let task = tokio::spawn(async move { handle.read_block(id).await });
        self.bg_read = Some(BgRead { id, task });
    }

    /// Evicts the tail entry, applying the unload policy (drain +
    /// background-write dirty pages, recycle clean ones). Returns the
    /// now-vacant arena slot so the caller can reuse it in `insert_node`
    /// instead of growing `self.nodes`.
    async fn evict_tail(&mut self) -> Result<usize> {
        let tail = self.tail;
        self.unlink(tail);
        let evicted = self.nodes[tail].take().unwrap();
        self.index.remove(&evicted.page.id);
        if evicted.page.modified {
            self.drain_write().await?;
            self.start_background_write(evicted.page.id, evicted.page.bytes.into_vec());
        } else {
            self.recycle.push(evicted.page.bytes);
        }
        Ok(tail)
    }

    /// Inserts `page` at the head of the recency list. `reuse_slot`, when
    /// given, is a vacant slot freed by a prior `evict_tail` call in this
    /// same `get_page` invocation; reusing it keeps the arena's size
    /// bounded by `capacity` instead of growing with every page fault.
    fn insert_node(&mut self, page: Page, reuse_slot: Option<usize>) -> usize {
        let slot = match reuse_slot {
            Some(slot) => slot,
            None => {
                self.nodes.push(None);
                self.nodes.len() - 1
            }
        };
        let id = page.id;
        self.nodes[slot] = Some(PageNode {
            page,
            prev: NIL,
            next: NIL,
        });
        self.push_front(slot);
        self.index.insert(id, slot);
        slot
    }

    /// Loads (or finds cached) the page for `bid`, returns its slot.
    async fn get_page(&mut self, bid: u64) -> Result<usize> {
        if let Some((last_id, last_slot)) = self.last_accessed {
            if last_id == bid && self.nodes[last_slot].is_some() {
                return Ok(last_slot);
            }
        }

        if let Some(&slot) = self.index.get(&bid) {
            self.unlink(slot);
            self.push_front(slot);
            self.last_accessed = Some((bid, slot));
            return Ok(slot);
        }

        let reused_slot = if self.index.len() >= self.capacity {
            Some(self.evict_tail().await?)
        } else {
            None
        };

        let page = if bid == self.block_count {
            self.block_count += 1;
            self.drain_write().await?;
            let bytes = self.zero_buffer();
            self.start_background_write(bid, bytes.clone().into_vec());
            Page {
                id: bid,
                modified: true,
                bytes,
            }
        } else if self.bg_read.as_ref().is_some_and(|r| r.id == bid) {
            let bg = self.bg_read.take().unwrap();
            let bytes = ByteBuffer::from_vec(bg.task.await??);
            let prefetch_target = bid + 1;
            if prefetch_target < self.block_count {
                self.start_background_read(prefetch_target);
            }
            Page {
                id: bid,
                modified: false,
                bytes,
            }
        } else {
            if self.bg_write.as_ref().is_some_and(|w| w.id == bid) {
                self.drain_write().await?;
            }
            self.drain_read().await?;
            let bytes = ByteBuffer::from_vec(self.handle.read_block(bid).await?);
            let prefetch_target = bid + 1;
            if prefetch_target < self.block_count {
                self.start_background_read(prefetch_target);
            }
            Page {
                id: bid,
                modified: false,
                bytes,
            }
        };

        let slot = self.insert_node(page, reused_slot);
        self.last_accessed = Some((bid, slot));
        Ok(slot)
    }

    /// Reads the byte at logical position `i`. Fails
    /// [`PickleError::IndexOutOfRange`] if `i >= element_count()`.
    pub async fn read(&mut self, i: u64) -> Result<u8> {
        if i >= self.element_count {
            return Err(PickleError::IndexOutOfRange {
                index: i,
                bound: self.element_count,
            });
        }
        let (bid, off) = self.locate(i);
        let slot = self.get_page(bid).await?;
        self.nodes[slot].as_ref().unwrap().page.bytes.byte(off)
    }

    /// Writes the byte at logical position `i`. `i == element_count()`
    /// appends, extending the table by one element.
    pub async fn write(&mut self, i: u64, value: u8) -> Result<()> {
        if i > self.element_count {
            return Err(PickleError::IndexOutOfRange {
                index: i,
                bound: self.element_count,
            });
        }
        let (bid, off) = self.locate(i);
        let slot = self.get_page(bid).await?;
        {
            let node = self.nodes[slot].as_mut().unwrap();
            node.page.bytes.set_byte(off, value)?;
            node.page.modified = true;
        }
        if i == self.element_count {
            self.element_count += 1;
        }
        Ok(())
    }

    /// Bulk-reads `dst.len()` consecutive bytes starting at logical
    /// position `start`.
    pub async fn read_range(&mut self, start: u64, dst: &mut [u8]) -> Result<()> {
        for (k, slot) in dst.iter_mut().enumerate() {
            *slot = self.read(start + k as u64).await?;
        }
        Ok(())
    }

    /// Bulk-writes `src` starting at logical position `start`.
    pub async fn write_range(&mut self, start: u64, src: &[u8]) -> Result<()> {
        for (k, byte) in src.iter().enumerate() {
            self.write(start + k as u64, *byte).await?;
        }
        Ok(())
    }

    /// Flushes every dirty page, drains the pending background write,
    /// and persists `element_count` into the in-memory header (which the
    /// owning [`crate::storage::BlockStorage::close`] writes to disk).
    /// Does not close the underlying handle.
    pub async fn close(&mut self) -> Result<()> {
        let resident: Vec<u64> = {
            let mut ids = Vec::with_capacity(self.index.len());
            let mut cur = self.tail;
            while cur != NIL {
                let node = self.nodes[cur].as_ref().unwrap();
                ids.push(node.page.id);
                cur = node.prev;
            }
            ids
        };
        for id in resident {
            let slot = *self.index.get(&id).unwrap();
            self.unlink(slot);
            let evicted = self.nodes[slot].take().unwrap();
            self.index.remove(&id);
            if evicted.page.modified {
                self.drain_write().await?;
                self.start_background_write(evicted.page.id, evicted.page.bytes.into_vec());
            }
        }
        self.drain_write().await?;
        self.drain_read().await?;

        let mut header = self.handle.header();
        if header.len() < 8 {
            header = vec![0u8; self.block_size];
        }
        header[0..8].copy_from_slice(&(self.element_count as i64).to_le_bytes());
        self.handle.set_header(&header)?;
        Ok(())
    }
}
