use crate::block_cache::BlockCache;
use crate::block_dev::{BlockDevice, BlockStore};
use crate::config::{FAT_EOC, FAT_START_BLOCK, FS_FILE_MAX_COUNT, SUPER_BLOCK_ID};
use crate::directory::Directory;
use crate::error::{FsError, Result};
use crate::fat::FatTable;
use crate::fd_table::FdTable;
use crate::layout::{check_name, SuperBlock};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use log::{debug, warn};

/// A mounted volume: geometry, allocation table, root directory and the open
/// file table, all kept in memory and written through to the device.
///
/// superblock, allocation table, root directory, data
pub struct FatFileSystem {
    pub(crate) block_device: Arc<dyn BlockDevice>,
    pub(crate) super_block: SuperBlock,
    pub(crate) fat: FatTable,
    pub(crate) root_dir: Directory,
    pub(crate) fd_table: FdTable,
}

/// Geometry and usage of a mounted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_blocks: usize,
    pub fat_blocks: usize,
    pub root_dir_block: usize,
    pub data_start_block: usize,
    pub data_blocks: usize,
    pub fat_free: usize,
    pub dir_free: usize,
    pub dir_capacity: usize,
}

impl fmt::Display for VolumeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FS Info:")?;
        writeln!(f, "total_blk_count={}", self.total_blocks)?;
        writeln!(f, "fat_blk_count={}", self.fat_blocks)?;
        writeln!(f, "rdir_blk={}", self.root_dir_block)?;
        writeln!(f, "data_blk={}", self.data_start_block)?;
        writeln!(f, "data_blk_count={}", self.data_blocks)?;
        writeln!(f, "fat_free_ratio={}/{}", self.fat_free, self.data_blocks)?;
        write!(f, "rdir_free_ratio={}/{}", self.dir_free, self.dir_capacity)
    }
}

/// One file as reported by [`FatFileSystem::ls`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: usize,
    pub first_block: Option<u16>,
}

impl fmt::Display for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file: {}, size: {}, data_blk: {}",
            self.name,
            self.size,
            self.first_block.unwrap_or(FAT_EOC)
        )
    }
}

impl FatFileSystem {
    /// Lay out an empty volume over the whole device.
    pub fn format(block_device: &Arc<dyn BlockDevice>) -> Result<SuperBlock> {
        let super_block = SuperBlock::new(block_device.block_count())?;
        let mut cache = BlockCache::zeroed(SUPER_BLOCK_ID, block_device);
        super_block.encode(cache.as_mut_slice());
        cache.sync()?;

        FatTable::new(
            FAT_START_BLOCK,
            super_block.fat_blocks as usize,
            super_block.data_blocks as usize,
        )
        .sync(block_device)?;
        Directory::new(super_block.root_dir_block as usize).sync(block_device)?;
        debug!(
            "formatted volume: {} blocks, {} data blocks",
            super_block.total_blocks, super_block.data_blocks
        );
        Ok(super_block)
    }

    /// Open `name` from `store` and mount the volume it holds.
    pub fn mount(store: &dyn BlockStore, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        let block_device = store.open(name)?;
        match Self::from_device(Arc::clone(&block_device)) {
            Ok(fs) => {
                debug!("mounted {}", name);
                Ok(fs)
            }
            Err(err) => {
                if let Err(close_err) = block_device.close() {
                    warn!("closing {} after failed mount: {}", name, close_err);
                }
                Err(err)
            }
        }
    }

    /// Mount the volume on an already opened device.
    pub fn from_device(block_device: Arc<dyn BlockDevice>) -> Result<Self> {
        let cache = BlockCache::load(SUPER_BLOCK_ID, &block_device)?;
        let super_block = SuperBlock::decode(cache.as_slice());
        if let Err(err) = super_block.validate(block_device.block_count()) {
            warn!("rejecting volume: {}", err);
            return Err(err);
        }
        let fat = FatTable::load(
            &block_device,
            FAT_START_BLOCK,
            super_block.fat_blocks as usize,
            super_block.data_blocks as usize,
        )?;
        let root_dir = Directory::load(&block_device, super_block.root_dir_block as usize)?;
        Ok(Self {
            block_device,
            super_block,
            fat,
            root_dir,
            fd_table: FdTable::new(),
        })
    }

    /// Close the device and tear the session down.
    ///
    /// On failure the session is handed back untouched so the caller can
    /// close descriptors and retry.
    pub fn unmount(self) -> core::result::Result<(), (Self, FsError)> {
        if !self.fd_table.is_empty() {
            return Err((self, FsError::FilesStillOpen));
        }
        let closed = self.block_device.close();
        if let Err(err) = closed {
            return Err((self, FsError::Io(err)));
        }
        debug!("unmounted volume");
        Ok(())
    }

    pub fn info(&self) -> VolumeInfo {
        let sb = &self.super_block;
        VolumeInfo {
            total_blocks: sb.total_blocks as usize,
            fat_blocks: sb.fat_blocks as usize,
            root_dir_block: sb.root_dir_block as usize,
            data_start_block: sb.data_start_block as usize,
            data_blocks: sb.data_blocks as usize,
            fat_free: self.fat.free_count(),
            dir_free: self.root_dir.free_count(),
            dir_capacity: FS_FILE_MAX_COUNT,
        }
    }

    pub fn create(&mut self, name: &str) -> Result<()> {
        check_name(name)?;
        let slot = self.root_dir.insert(name)?;
        if let Err(err) = self.root_dir.sync(&self.block_device) {
            self.root_dir.remove(slot);
            return Err(err);
        }
        Ok(())
    }

    /// Remove a file and release its blocks.
    ///
    /// When persisting fails the file is left in place in memory, so the next
    /// successful sync of either table writes it back.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        check_name(name)?;
        let slot = self.root_dir.find(name).ok_or(FsError::NoSuchFile)?;
        if self.fd_table.is_open(slot) {
            return Err(FsError::FileIsOpen);
        }
        let fat = self.fat.clone();
        let root_dir = self.root_dir.clone();
        let old = self.root_dir.remove(slot);
        if let Some(root) = old.first_block {
            self.fat.dealloc_chain(root);
        }
        let persisted = self
            .fat
            .sync(&self.block_device)
            .and_then(|()| self.root_dir.sync(&self.block_device));
        if let Err(err) = persisted {
            self.fat = fat;
            self.root_dir = root_dir;
            return Err(err);
        }
        Ok(())
    }

    pub fn ls(&self) -> Vec<FileEntry> {
        self.root_dir
            .iter()
            .map(|(_, entry)| FileEntry {
                name: entry.name(),
                size: entry.size as usize,
                first_block: entry.first_block,
            })
            .collect()
    }

    pub fn open(&mut self, name: &str) -> Result<usize> {
        check_name(name)?;
        let slot = self.root_dir.find(name).ok_or(FsError::NoSuchFile)?;
        self.fd_table.alloc(slot)
    }

    pub fn close(&mut self, fd: usize) -> Result<()> {
        self.fd_table.dealloc(fd)
    }

    /// Current size of the file behind `fd`.
    pub fn stat(&self, fd: usize) -> Result<usize> {
        let file = self.fd_table.get(fd)?;
        Ok(self.root_dir.entry(file.entry).size as usize)
    }

    /// Move the cursor of `fd`. Seeking to the file size appends.
    pub fn seek(&mut self, fd: usize, offset: usize) -> Result<()> {
        let size = self.stat(fd)?;
        if offset > size {
            return Err(FsError::OffsetOutOfRange);
        }
        self.fd_table.get_mut(fd)?.offset = offset;
        Ok(())
    }

    /// Cursor position of `fd`.
    pub fn tell(&self, fd: usize) -> Result<usize> {
        Ok(self.fd_table.get(fd)?.offset)
    }

    pub fn fat_free_count(&self) -> usize {
        self.fat.free_count()
    }

    pub fn dir_free_count(&self) -> usize {
        self.root_dir.free_count()
    }

    /// Free counts recomputed by scanning both tables.
    pub fn scan_free_counts(&self) -> (usize, usize) {
        (self.fat.count_free(), self.root_dir.count_free())
    }

    /// Data block indices of the file called `name`, in chain order.
    pub fn blocks_of(&self, name: &str) -> Result<Vec<u16>> {
        check_name(name)?;
        let slot = self.root_dir.find(name).ok_or(FsError::NoSuchFile)?;
        let mut blocks = Vec::new();
        let mut cur = self.root_dir.entry(slot).first_block;
        while let Some(block) = cur {
            if blocks.len() == self.fat.len() {
                return Err(FsError::CorruptVolume("cycle in allocation chain"));
            }
            blocks.push(block);
            cur = self.fat.next(block)?;
        }
        Ok(blocks)
    }
}
