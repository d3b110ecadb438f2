//! `TableSpace`: a page-addressable file with an OS advisory exclusive
//! lock, plus the `DiskManager` registry that maps table-space names
//! to ids.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use fs4::fs_std::FileExt;

use crate::common::{PageId, SpaceId, PAGE_SIZE};
use crate::error::{EngineError, Result};
use crate::storage::page::Page;

/// A single file of N contiguous 16384-byte pages, exclusively
/// locked for the lifetime of the open handle.
pub struct TableSpace {
    space_id: SpaceId,
    path: PathBuf,
    file: Mutex<File>,
    page_count: AtomicU32,
}

impl TableSpace {
    /// Open (creating if absent) and acquire the exclusive advisory
    /// lock. Fails with `FileLockedByOtherProcess` if another handle
    /// already holds it.
    pub fn open(path: impl AsRef<Path>, space_id: SpaceId) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|_| EngineError::FileLockedByOtherProcess)?;

        let len = file.metadata()?.len();
        let page_count = (len / PAGE_SIZE as u64) as u32;

        Ok(TableSpace {
            space_id,
            path,
            file: Mutex::new(file),
            page_count: AtomicU32::new(page_count),
        })
    }

    pub fn space_id(&self) -> SpaceId {
        self.space_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::SeqCst)
    }

    /// Extend the file by one page, returning its page number.
    pub fn allocate_page(&self) -> Result<PageId> {
        let page_no = self.page_count.fetch_add(1, Ordering::SeqCst);
        let mut file = self.file.lock().unwrap();
        let offset = page_no as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&[0u8; PAGE_SIZE])?;
        Ok(page_no)
    }

    /// Read exactly one page at `page_no`, verifying its checksum.
    pub fn read_page(&self, page_no: PageId) -> Result<Page> {
        if page_no >= self.page_count() {
            return Err(EngineError::PageNotFound { space_id: self.space_id, page_no });
        }
        let mut file = self.file.lock().unwrap();
        let offset = page_no as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut buf)?;
        let page = Page::deserialize(&buf)?;
        if !page.verify() {
            return Err(EngineError::PageCorrupted { space_id: self.space_id, page_no });
        }
        Ok(page)
    }

    /// Serialize and write `page` at its own page number, extending
    /// the file if needed. Caller is responsible for clearing dirty
    /// on success.
    pub fn write_page(&self, page: &Page) -> Result<()> {
        let page_no = page.page_no();
        let mut file = self.file.lock().unwrap();
        let offset = page_no as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.serialize())?;
        if page_no >= self.page_count.load(Ordering::SeqCst) {
            self.page_count.store(page_no + 1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// fsync the underlying file.
    pub fn sync(&self) -> Result<()> {
        let file = self.file.lock().unwrap();
        file.sync_all()?;
        Ok(())
    }

    /// Release the advisory lock and close the handle.
    pub fn close(&self) -> Result<()> {
        let file = self.file.lock().unwrap();
        file.unlock()?;
        Ok(())
    }
}

/// Owns the `name -> space_id -> TableSpace` registry and assigns
/// ids from a monotonic counter.
pub struct DiskManager {
    data_dir: PathBuf,
    next_space_id: AtomicU32,
    by_name: Mutex<HashMap<String, SpaceId>>,
    spaces: Mutex<HashMap<SpaceId, Arc<TableSpace>>>,
}

impl DiskManager {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        DiskManager {
            data_dir: data_dir.as_ref().to_path_buf(),
            next_space_id: AtomicU32::new(1),
            by_name: Mutex::new(HashMap::new()),
            spaces: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or return the already-open handle for) the table-space
    /// named `name`, stored at `<data_dir>/<name>.ibd`.
    pub fn open_space(&self, name: &str) -> Result<Arc<TableSpace>> {
        let mut by_name = self.by_name.lock().unwrap();
        if let Some(space_id) = by_name.get(name) {
            return Ok(self.spaces.lock().unwrap().get(space_id).unwrap().clone());
        }
        let space_id = self.next_space_id.fetch_add(1, Ordering::SeqCst);
        let path = self.data_dir.join(format!("{name}.ibd"));
        let space = Arc::new(TableSpace::open(path, space_id)?);
        by_name.insert(name.to_string(), space_id);
        self.spaces.lock().unwrap().insert(space_id, space.clone());
        Ok(space)
    }

    pub fn space(&self, space_id: SpaceId) -> Option<Arc<TableSpace>> {
        self.spaces.lock().unwrap().get(&space_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let space = TableSpace::open(dir.path().join("t.ibd"), 1).unwrap();
        let page_no = space.allocate_page().unwrap();
        let mut page = Page::new(1, page_no, crate::storage::page::PageType::Index);
        page.write(0, b"payload").unwrap();
        page.update_checksum_and_lsn(5);
        space.write_page(&page).unwrap();

        let read_back = space.read_page(page_no).unwrap();
        assert_eq!(read_back.read(0, 7).unwrap(), b"payload");
        assert_eq!(read_back.lsn(), 5);
    }

    #[test]
    fn read_missing_page_fails() {
        let dir = tempfile::tempdir().unwrap();
        let space = TableSpace::open(dir.path().join("t.ibd"), 1).unwrap();
        assert!(matches!(space.read_page(0), Err(EngineError::PageNotFound { .. })));
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.ibd");
        let _first = TableSpace::open(&path, 1).unwrap();
        let second = TableSpace::open(&path, 2);
        assert!(matches!(second, Err(EngineError::FileLockedByOtherProcess)));
    }

    #[test]
    fn disk_manager_reuses_open_space() {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(dir.path());
        let s1 = dm.open_space("orders").unwrap();
        let s2 = dm.open_space("orders").unwrap();
        assert_eq!(s1.space_id(), s2.space_id());
    }
}
