use crate::block_cache::BlockCache;
use crate::block_dev::BlockDevice;
use crate::config::{FAT_ENTRIES_PER_BLOCK, FAT_ENTRY_SIZE, FAT_EOC};
use crate::error::{FsError, Result};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use log::warn;

/// Data block 0 can never be linked to, since `0` on disk means free.
const RESERVED_ENTRY: usize = 0;

/// State of one data block in the allocation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    EndOfChain,
    Next(u16),
}

impl FatEntry {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => Self::Free,
            FAT_EOC => Self::EndOfChain,
            next => Self::Next(next),
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            Self::Free => 0,
            Self::EndOfChain => FAT_EOC,
            Self::Next(next) => next,
        }
    }
}

/// The allocation table, one entry per data block, held in memory and
/// mirrored to blocks `start_block_id..start_block_id + blocks`.
///
/// Allocation is first-fit by ascending index.
#[derive(Clone)]
pub struct FatTable {
    start_block_id: usize,
    blocks: usize,
    entries: Vec<FatEntry>,
    free: usize,
}

impl FatTable {
    /// Table of a freshly formatted volume: everything free except the
    /// reserved entry.
    pub fn new(start_block_id: usize, blocks: usize, data_blocks: usize) -> Self {
        let mut entries = vec![FatEntry::Free; data_blocks];
        entries[RESERVED_ENTRY] = FatEntry::EndOfChain;
        Self {
            start_block_id,
            blocks,
            free: data_blocks - 1,
            entries,
        }
    }

    pub fn load(
        block_device: &Arc<dyn BlockDevice>,
        start_block_id: usize,
        blocks: usize,
        data_blocks: usize,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(data_blocks);
        for block_pos in 0..blocks {
            let cache = BlockCache::load(start_block_id + block_pos, block_device)?;
            let raw = cache.as_slice();
            let remaining = data_blocks - entries.len();
            entries.extend(
                raw.chunks_exact(FAT_ENTRY_SIZE)
                    .take(remaining.min(FAT_ENTRIES_PER_BLOCK))
                    .map(|pair| FatEntry::from_raw(u16::from_le_bytes([pair[0], pair[1]]))),
            );
            if entries.len() == data_blocks {
                break;
            }
        }
        if entries.len() < data_blocks {
            return Err(FsError::CorruptVolume("allocation table too small"));
        }
        if entries[RESERVED_ENTRY] == FatEntry::Free {
            warn!("allocation table entry 0 is free, treating it as reserved");
            entries[RESERVED_ENTRY] = FatEntry::EndOfChain;
        }
        let mut fat = Self {
            start_block_id,
            blocks,
            entries,
            free: 0,
        };
        fat.free = fat.count_free();
        Ok(fat)
    }

    /// Write the whole table back to its blocks.
    pub fn sync(&self, block_device: &Arc<dyn BlockDevice>) -> Result<()> {
        for block_pos in 0..self.blocks {
            let mut cache = BlockCache::zeroed(self.start_block_id + block_pos, block_device);
            let first = block_pos * FAT_ENTRIES_PER_BLOCK;
            let end = self.entries.len().min(first + FAT_ENTRIES_PER_BLOCK);
            if first < end {
                let raw = cache.as_mut_slice();
                for (slot, entry) in raw
                    .chunks_exact_mut(FAT_ENTRY_SIZE)
                    .zip(&self.entries[first..end])
                {
                    slot.copy_from_slice(&entry.to_raw().to_le_bytes());
                }
            }
            cache.sync()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn free_count(&self) -> usize {
        self.free
    }

    /// Free entries by full scan, independent of the running count.
    pub fn count_free(&self) -> usize {
        self.entries
            .iter()
            .filter(|&&entry| entry == FatEntry::Free)
            .count()
    }

    pub fn get(&self, block: u16) -> Option<FatEntry> {
        self.entries.get(block as usize).copied()
    }

    /// Take the lowest free block and make it a one-block chain.
    pub fn alloc(&mut self) -> Option<u16> {
        let pos = self
            .entries
            .iter()
            .enumerate()
            .skip(RESERVED_ENTRY + 1)
            .find(|(_, &entry)| entry == FatEntry::Free)
            .map(|(pos, _)| pos)?;
        self.entries[pos] = FatEntry::EndOfChain;
        self.free -= 1;
        Some(pos as u16)
    }

    /// Allocate a block and link it after `tail`, the current end of a chain.
    pub fn append(&mut self, tail: u16) -> Option<u16> {
        let block = self.alloc()?;
        self.entries[tail as usize] = FatEntry::Next(block);
        Some(block)
    }

    /// Follow one link. `None` at the end of the chain.
    pub fn next(&self, block: u16) -> Result<Option<u16>> {
        match self.get(block) {
            Some(FatEntry::EndOfChain) => Ok(None),
            Some(FatEntry::Next(next)) => {
                let next_pos = next as usize;
                if next_pos == RESERVED_ENTRY || next_pos >= self.entries.len() {
                    warn!("block {} links outside the data region ({})", block, next);
                    Err(FsError::CorruptVolume("chain links outside the data region"))
                } else {
                    Ok(Some(next))
                }
            }
            Some(FatEntry::Free) => {
                warn!("chain runs into free block {}", block);
                Err(FsError::CorruptVolume("chain runs into a free block"))
            }
            None => Err(FsError::CorruptVolume("chain links outside the data region")),
        }
    }

    /// Free every block of the chain starting at `root`, returning how many
    /// were released.
    ///
    /// Stops at the first free or out-of-range entry, so a corrupted chain
    /// (cycles included) is released up to the point of damage. At most
    /// `len()` entries are visited.
    pub fn dealloc_chain(&mut self, root: u16) -> usize {
        let mut cur = root as usize;
        let mut freed = 0;
        for _ in 0..self.entries.len() {
            if cur == RESERVED_ENTRY || cur >= self.entries.len() {
                break;
            }
            let entry = self.entries[cur];
            if entry == FatEntry::Free {
                break;
            }
            self.entries[cur] = FatEntry::Free;
            freed += 1;
            match entry {
                FatEntry::Next(next) => cur = next as usize,
                _ => break,
            }
        }
        self.free += freed;
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::RamDisk;

    fn device(blocks: usize) -> Arc<dyn BlockDevice> {
        Arc::new(RamDisk::new(blocks))
    }

    fn chain_len(fat: &FatTable, root: u16) -> Result<usize> {
        let mut len = 1;
        let mut cur = root;
        while let Some(next) = fat.next(cur)? {
            len += 1;
            if len > fat.len() {
                return Err(FsError::CorruptVolume("cycle"));
            }
            cur = next;
        }
        Ok(len)
    }

    #[test]
    fn raw_values() {
        assert_eq!(FatEntry::from_raw(0), FatEntry::Free);
        assert_eq!(FatEntry::from_raw(0xffff), FatEntry::EndOfChain);
        assert_eq!(FatEntry::from_raw(12), FatEntry::Next(12));
        assert_eq!(FatEntry::Next(12).to_raw(), 12);
        assert_eq!(FatEntry::EndOfChain.to_raw(), 0xffff);
    }

    #[test]
    fn first_fit_allocation() {
        let mut fat = FatTable::new(1, 1, 8);
        assert_eq!(fat.free_count(), 7);
        assert_eq!(fat.alloc(), Some(1));
        assert_eq!(fat.alloc(), Some(2));
        assert_eq!(fat.append(1), Some(3));
        assert_eq!(fat.get(1), Some(FatEntry::Next(3)));
        assert_eq!(fat.get(3), Some(FatEntry::EndOfChain));
        assert_eq!(fat.free_count(), 4);
        assert_eq!(fat.free_count(), fat.count_free());

        assert_eq!(fat.dealloc_chain(1), 2);
        assert_eq!(fat.free_count(), 6);
        // lowest index is reused first
        assert_eq!(fat.alloc(), Some(1));
    }

    #[test]
    fn allocation_exhausts() {
        let mut fat = FatTable::new(1, 1, 3);
        assert_eq!(fat.alloc(), Some(1));
        assert_eq!(fat.append(1), Some(2));
        assert_eq!(fat.alloc(), None);
        assert_eq!(fat.append(2), None);
        assert_eq!(fat.get(2), Some(FatEntry::EndOfChain));
        assert_eq!(fat.free_count(), 0);
    }

    #[test]
    fn chain_walk() {
        let mut fat = FatTable::new(1, 1, 8);
        let root = fat.alloc().unwrap();
        let mut tail = root;
        for _ in 0..3 {
            tail = fat.append(tail).unwrap();
        }
        assert_eq!(chain_len(&fat, root).unwrap(), 4);
        assert_eq!(fat.next(root).unwrap(), Some(2));
        assert_eq!(fat.next(tail).unwrap(), None);
        assert!(fat.next(6).is_err());
    }

    #[test]
    fn dealloc_survives_cycle() {
        let mut fat = FatTable::new(1, 1, 8);
        fat.entries[1] = FatEntry::Next(2);
        fat.entries[2] = FatEntry::Next(3);
        fat.entries[3] = FatEntry::Next(1);
        fat.free = fat.count_free();
        assert!(chain_len(&fat, 1).is_err());
        assert_eq!(fat.dealloc_chain(1), 3);
        assert_eq!(fat.free_count(), fat.count_free());
        // freeing an already free root does nothing
        assert_eq!(fat.dealloc_chain(1), 0);
    }

    #[test]
    fn sync_and_load_span_blocks() {
        let device = device(4);
        let data_blocks = FAT_ENTRIES_PER_BLOCK + 10;
        let mut fat = FatTable::new(1, 2, data_blocks);
        let root = fat.alloc().unwrap();
        let mut tail = root;
        while (tail as usize) < FAT_ENTRIES_PER_BLOCK + 2 {
            tail = fat.append(tail).unwrap();
        }
        fat.sync(&device).unwrap();

        let loaded = FatTable::load(&device, 1, 2, data_blocks).unwrap();
        assert_eq!(loaded.len(), data_blocks);
        assert_eq!(loaded.entries, fat.entries);
        assert_eq!(loaded.free_count(), fat.free_count());
        assert_eq!(chain_len(&loaded, root).unwrap(), FAT_ENTRIES_PER_BLOCK + 2);
    }
}
