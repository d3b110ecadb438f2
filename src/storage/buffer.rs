//! In-memory page cache: a fixed array of frames, a page-table, a
//! free-frame list and a strict O(1) LRU over evictable frames.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{PageId, SpaceId};
use crate::error::{EngineError, Result};
use crate::storage::disk::DiskManager;
use crate::storage::page::Page;

type FrameId = usize;

/// Intrusive doubly-linked list of evictable frame ids. `victim()`
/// pops the tail (most stale); `insert_front` is used on unpin.
/// All three operations are O(1).
struct LruList {
    prev: Vec<Option<FrameId>>,
    next: Vec<Option<FrameId>>,
    in_list: Vec<bool>,
    head: Option<FrameId>,
    tail: Option<FrameId>,
}

impl LruList {
    fn new(capacity: usize) -> Self {
        LruList {
            prev: vec![None; capacity],
            next: vec![None; capacity],
            in_list: vec![false; capacity],
            head: None,
            tail: None,
        }
    }

    fn contains(&self, frame: FrameId) -> bool {
        self.in_list[frame]
    }

    fn remove(&mut self, frame: FrameId) {
        if !self.in_list[frame] {
            return;
        }
        let p = self.prev[frame];
        let n = self.next[frame];
        match p {
            Some(pp) => self.next[pp] = n,
            None => self.head = n,
        }
        match n {
            Some(nn) => self.prev[nn] = p,
            None => self.tail = p,
        }
        self.prev[frame] = None;
        self.next[frame] = None;
        self.in_list[frame] = false;
    }

    /// `pin(frame)`: remove it from the evictable list.
    fn pin(&mut self, frame: FrameId) {
        self.remove(frame);
    }

    /// `unpin(frame)`: insert at the head (most recently used end).
    fn unpin(&mut self, frame: FrameId) {
        if self.in_list[frame] {
            return;
        }
        self.prev[frame] = None;
        self.next[frame] = self.head;
        if let Some(h) = self.head {
            self.prev[h] = Some(frame);
        }
        self.head = Some(frame);
        if self.tail.is_none() {
            self.tail = Some(frame);
        }
        self.in_list[frame] = true;
    }

    /// Returns and removes the tail (most-stale) frame.
    fn victim(&mut self) -> Option<FrameId> {
        let t = self.tail?;
        self.remove(t);
        Some(t)
    }
}

struct Frame {
    space_id: SpaceId,
    page_no: PageId,
    page: Option<Page>,
    pin_count: u32,
    dirty: bool,
}

impl Frame {
    fn empty() -> Self {
        Frame { space_id: 0, page_no: 0, page: None, pin_count: 0, dirty: false }
    }
}

/// Point-in-time counters for hit rate and eviction pressure.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferPoolStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
}

impl BufferPoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

struct Inner {
    frames: Vec<Frame>,
    page_table: HashMap<(SpaceId, PageId), FrameId>,
    free_list: Vec<FrameId>,
    lru: LruList,
    stats: BufferPoolStats,
}

/// A fixed-capacity page cache pinned against table-space I/O
/// performed through a `DiskManager`. A single pool-wide mutex
/// guards all bookkeeping, per the concurrency model.
pub struct BufferPool {
    disk: Arc<DiskManager>,
    inner: Mutex<Inner>,
}

impl BufferPool {
    pub fn new(capacity: usize, disk: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            frames.push(Frame::empty());
        }
        BufferPool {
            disk,
            inner: Mutex::new(Inner {
                frames,
                page_table: HashMap::new(),
                free_list: (0..capacity).collect(),
                lru: LruList::new(capacity),
                stats: BufferPoolStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> BufferPoolStats {
        self.inner.lock().stats
    }

    pub fn used_frames(&self) -> usize {
        let inner = self.inner.lock();
        inner.frames.len() - inner.free_list.len()
    }

    fn space(&self, space_id: SpaceId) -> Result<Arc<crate::storage::disk::TableSpace>> {
        self.disk
            .space(space_id)
            .ok_or(EngineError::PageNotFound { space_id, page_no: 0 })
    }

    /// Obtain a frame for a new page load: from the free list, else
    /// evict the LRU victim (writing it through if dirty).
    fn acquire_frame(&self, inner: &mut Inner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop() {
            return Ok(frame_id);
        }
        let victim = inner.lru.victim().ok_or(EngineError::BufferPoolExhausted)?;
        let (space_id, page_no, dirty) = {
            let f = &inner.frames[victim];
            (f.space_id, f.page_no, f.dirty)
        };
        if dirty {
            let page = inner.frames[victim].page.clone().unwrap();
            self.space(space_id)?.write_page(&page)?;
            inner.frames[victim].dirty = false;
        }
        inner.page_table.remove(&(space_id, page_no));
        inner.stats.eviction_count += 1;
        Ok(victim)
    }

    /// HIT: pin and return the cached page. MISS: load via the
    /// backing table-space, installing it into a free or evicted
    /// frame with `pin_count = 1`.
    pub fn fetch_page(&self, space_id: SpaceId, page_no: PageId) -> Result<Page> {
        let mut inner = self.inner.lock();
        if let Some(&frame_id) = inner.page_table.get(&(space_id, page_no)) {
            inner.frames[frame_id].pin_count += 1;
            inner.lru.pin(frame_id);
            inner.stats.hit_count += 1;
            return Ok(inner.frames[frame_id].page.clone().unwrap());
        }

        inner.stats.miss_count += 1;
        let frame_id = self.acquire_frame(&mut inner)?;
        let page = self.space(space_id)?.read_page(page_no)?;

        inner.frames[frame_id] = Frame {
            space_id,
            page_no,
            page: Some(page.clone()),
            pin_count: 1,
            dirty: false,
        };
        inner.page_table.insert((space_id, page_no), frame_id);
        inner.lru.pin(frame_id);
        Ok(page)
    }

    /// Allocate a new page on disk and load it into a free/evicted
    /// frame, pinned once.
    pub fn new_page(&self, space_id: SpaceId, page_type: crate::storage::page::PageType) -> Result<Page> {
        let space = self.space(space_id)?;
        let page_no = space.allocate_page()?;
        let page = crate::storage::page::Page::new(space_id, page_no, page_type);
        space.write_page(&page)?;

        let mut inner = self.inner.lock();
        inner.stats.miss_count += 1;
        let frame_id = self.acquire_frame(&mut inner)?;
        inner.frames[frame_id] = Frame {
            space_id,
            page_no,
            page: Some(page.clone()),
            pin_count: 1,
            dirty: false,
        };
        inner.page_table.insert((space_id, page_no), frame_id);
        inner.lru.pin(frame_id);
        Ok(page)
    }

    /// Decrement the pin count (floor 0); OR dirty with `made_dirty`;
    /// when the pin count reaches 0, the frame becomes evictable.
    /// A double-unpin or an unpin of an absent page is a logged
    /// no-op, not a panic.
    pub fn unpin_page(&self, space_id: SpaceId, page_no: PageId, made_dirty: bool) {
        let mut inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&(space_id, page_no)) else {
            tracing::warn!(space_id, page_no, "unpin of page not present in buffer pool");
            return;
        };
        let frame = &mut inner.frames[frame_id];
        if frame.pin_count == 0 {
            tracing::warn!(space_id, page_no, "double-unpin");
            return;
        }
        frame.pin_count -= 1;
        frame.dirty |= made_dirty;
        if frame.pin_count == 0 {
            inner.lru.unpin(frame_id);
        }
    }

    /// If the cached frame exists and is dirty, write it through and
    /// clear dirty. No-op if clean; silent if the page isn't cached.
    pub fn flush_page(&self, space_id: SpaceId, page_no: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&(space_id, page_no)) else {
            return Ok(());
        };
        if !inner.frames[frame_id].dirty {
            return Ok(());
        }
        let page = inner.frames[frame_id].page.clone().unwrap();
        self.space(space_id)?.write_page(&page)?;
        inner.frames[frame_id].dirty = false;
        Ok(())
    }

    /// Write every dirty, currently-cached frame.
    pub fn flush_all(&self) -> Result<()> {
        let dirty: Vec<(SpaceId, PageId)> = {
            let inner = self.inner.lock();
            inner
                .frames
                .iter()
                .filter(|f| f.page.is_some() && f.dirty)
                .map(|f| (f.space_id, f.page_no))
                .collect()
        };
        for (space_id, page_no) in dirty {
            self.flush_page(space_id, page_no)?;
        }
        Ok(())
    }

    /// True iff the frame backing `(space_id, page_no)` is in the
    /// pool and currently pinned.
    pub fn is_pinned(&self, space_id: SpaceId, page_no: PageId) -> bool {
        let inner = self.inner.lock();
        inner
            .page_table
            .get(&(space_id, page_no))
            .map(|&f| inner.frames[f].pin_count > 0)
            .unwrap_or(false)
    }

    /// True iff the frame is currently sitting in the LRU (evictable).
    pub fn is_in_lru(&self, space_id: SpaceId, page_no: PageId) -> bool {
        let inner = self.inner.lock();
        inner
            .page_table
            .get(&(space_id, page_no))
            .map(|&f| inner.lru.contains(f))
            .unwrap_or(false)
    }
}

/// A scoped, non-owning handle on a pinned page whose `Drop` unpins
/// it exactly once, per the §9 frame-sharing design note. Prefer
/// this over bare `fetch_page`/`unpin_page` pairs at call sites that
/// don't need to straddle the pin across a longer scope.
pub struct PagePin<'a> {
    pool: &'a BufferPool,
    space_id: SpaceId,
    page_no: PageId,
    made_dirty: bool,
    pub page: Page,
}

impl<'a> PagePin<'a> {
    pub fn fetch(pool: &'a BufferPool, space_id: SpaceId, page_no: PageId) -> Result<Self> {
        let page = pool.fetch_page(space_id, page_no)?;
        Ok(PagePin { pool, space_id, page_no, made_dirty: false, page })
    }

    pub fn mark_dirty(&mut self) {
        self.made_dirty = true;
    }
}

impl Drop for PagePin<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.space_id, self.page_no, self.made_dirty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageType;

    fn pool_with_space(capacity: usize) -> (tempfile::TempDir, BufferPool) {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path()));
        disk.open_space("t").unwrap();
        let pool = BufferPool::new(capacity, disk);
        (dir, pool)
    }

    #[test]
    fn fetch_pins_and_unpin_restores_lru() {
        let (_dir, pool) = pool_with_space(4);
        let space_id = pool.disk.open_space("t").unwrap().space_id();
        let page = pool.new_page(space_id, PageType::Index).unwrap();
        assert!(pool.is_pinned(space_id, page.page_no()));
        assert!(!pool.is_in_lru(space_id, page.page_no()));
        pool.unpin_page(space_id, page.page_no(), false);
        assert!(!pool.is_pinned(space_id, page.page_no()));
        assert!(pool.is_in_lru(space_id, page.page_no()));
    }

    #[test]
    fn scenario_b_hit_miss_and_eviction() {
        let (_dir, pool) = pool_with_space(10);
        let space_id = pool.disk.open_space("t").unwrap().space_id();
        let mut page_nos = Vec::new();
        for _ in 0..10 {
            let page = pool.new_page(space_id, PageType::Index).unwrap();
            page_nos.push(page.page_no());
            pool.unpin_page(space_id, page.page_no(), false);
        }
        assert_eq!(pool.used_frames(), 10);
        assert_eq!(pool.stats().hit_rate(), 0.0);

        for &page_no in &page_nos {
            pool.fetch_page(space_id, page_no).unwrap();
            pool.unpin_page(space_id, page_no, false);
        }
        assert_eq!(pool.stats().hit_rate(), 0.5);

        pool.new_page(space_id, PageType::Index).unwrap();
        assert_eq!(pool.used_frames(), 10);
        assert_eq!(pool.stats().eviction_count, 1);
    }

    #[test]
    fn unpin_of_absent_page_is_a_no_op() {
        let (_dir, pool) = pool_with_space(2);
        let space_id = pool.disk.open_space("t").unwrap().space_id();
        pool.unpin_page(space_id, 999, false);
    }
}
