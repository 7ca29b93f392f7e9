use crate::block_cache::BlockCache;
use crate::block_dev::BlockDevice;
use crate::config::{DIR_ENTRY_SIZE, FS_FILE_MAX_COUNT};
use crate::error::{FsError, Result};
use crate::layout::DirEntry;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

/// The root directory: a fixed number of slots persisted in one block.
#[derive(Clone)]
pub struct Directory {
    block_id: usize,
    entries: Vec<DirEntry>,
    free: usize,
}

impl Directory {
    pub fn new(block_id: usize) -> Self {
        Self {
            block_id,
            entries: vec![DirEntry::empty(); FS_FILE_MAX_COUNT],
            free: FS_FILE_MAX_COUNT,
        }
    }

    pub fn load(block_device: &Arc<dyn BlockDevice>, block_id: usize) -> Result<Self> {
        let cache = BlockCache::load(block_id, block_device)?;
        let entries: Vec<DirEntry> = cache
            .as_slice()
            .chunks_exact(DIR_ENTRY_SIZE)
            .take(FS_FILE_MAX_COUNT)
            .map(DirEntry::decode)
            .collect();
        let mut dir = Self {
            block_id,
            entries,
            free: 0,
        };
        dir.free = dir.count_free();
        Ok(dir)
    }

    pub fn sync(&self, block_device: &Arc<dyn BlockDevice>) -> Result<()> {
        let mut cache = BlockCache::zeroed(self.block_id, block_device);
        for (slot, entry) in cache
            .as_mut_slice()
            .chunks_exact_mut(DIR_ENTRY_SIZE)
            .zip(&self.entries)
        {
            entry.encode(slot);
        }
        cache.sync()
    }

    pub fn free_count(&self) -> usize {
        self.free
    }

    pub fn count_free(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_empty()).count()
    }

    /// Slot index of the file called `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| !entry.is_empty() && entry.name_bytes() == name.as_bytes())
    }

    /// Put a new empty file in the lowest free slot. `name` must be valid.
    pub fn insert(&mut self, name: &str) -> Result<usize> {
        if self.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let slot = self
            .entries
            .iter()
            .position(DirEntry::is_empty)
            .ok_or(FsError::DirectoryFull)?;
        self.entries[slot] = DirEntry::new(name);
        self.free -= 1;
        Ok(slot)
    }

    /// Clear a slot, returning what it held.
    pub fn remove(&mut self, slot: usize) -> DirEntry {
        let old = core::mem::replace(&mut self.entries[slot], DirEntry::empty());
        if !old.is_empty() {
            self.free += 1;
        }
        old
    }

    pub fn entry(&self, slot: usize) -> &DirEntry {
        &self.entries[slot]
    }

    pub fn entry_mut(&mut self, slot: usize) -> &mut DirEntry {
        &mut self.entries[slot]
    }

    /// Used slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &DirEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::RamDisk;

    #[test]
    fn insert_find_remove() {
        let mut dir = Directory::new(2);
        assert_eq!(dir.insert("a").unwrap(), 0);
        assert_eq!(dir.insert("b").unwrap(), 1);
        assert_eq!(dir.insert("a"), Err(FsError::AlreadyExists));
        assert_eq!(dir.find("b"), Some(1));
        assert_eq!(dir.find("c"), None);
        assert_eq!(dir.free_count(), FS_FILE_MAX_COUNT - 2);

        let old = dir.remove(0);
        assert_eq!(old.name(), "a");
        assert_eq!(dir.find("a"), None);
        // the freed slot is taken first
        assert_eq!(dir.insert("c").unwrap(), 0);
        assert_eq!(dir.free_count(), dir.count_free());
    }

    #[test]
    fn fills_up() {
        let mut dir = Directory::new(2);
        for i in 0..FS_FILE_MAX_COUNT {
            dir.insert(&alloc::format!("f{}", i)).unwrap();
        }
        assert_eq!(dir.free_count(), 0);
        assert_eq!(dir.insert("extra"), Err(FsError::DirectoryFull));
    }

    #[test]
    fn persists_in_one_block() {
        let device: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(4));
        let mut dir = Directory::new(3);
        dir.insert("x").unwrap();
        let slot = dir.insert("y").unwrap();
        dir.entry_mut(slot).size = 42;
        dir.entry_mut(slot).first_block = Some(5);
        dir.remove(0);
        dir.sync(&device).unwrap();

        let loaded = Directory::load(&device, 3).unwrap();
        assert_eq!(loaded.free_count(), FS_FILE_MAX_COUNT - 1);
        let used: Vec<_> = loaded.iter().collect();
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].0, 1);
        assert_eq!(used[0].1.size, 42);
        assert_eq!(used[0].1.first_block, Some(5));
    }
}
