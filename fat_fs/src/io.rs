//! Byte-level reads and writes, translated into block copies along a file's
//! allocation chain.

use crate::block_cache::BlockCache;
use crate::config::BLOCK_SIZE;
use crate::error::{FsError, Result};
use crate::fat::FatEntry;
use crate::fs::FatFileSystem;
use log::warn;

impl FatFileSystem {
    fn data_block_id(&self, block: u16) -> usize {
        self.super_block.data_start_block as usize + block as usize
    }

    /// Follow `steps` links from `block`.
    ///
    /// With `grow`, a chain that ends early is extended one block at a time.
    /// `None` when the chain ends (or, growing, the volume is full) first.
    fn walk(&mut self, mut block: u16, steps: usize, grow: bool) -> Result<Option<u16>> {
        if steps >= self.fat.len() {
            return Err(FsError::CorruptVolume("offset beyond volume capacity"));
        }
        match self.fat.get(block) {
            Some(FatEntry::Free) | None => {
                return Err(FsError::CorruptVolume("file starts outside its chain"))
            }
            _ => {}
        }
        for _ in 0..steps {
            block = match self.fat.next(block)? {
                Some(next) => next,
                None if grow => match self.fat.append(block) {
                    Some(next) => next,
                    None => return Ok(None),
                },
                None => return Ok(None),
            };
        }
        Ok(Some(block))
    }

    /// Write `buf` at the cursor of `fd`, growing the file as needed.
    ///
    /// Returns how many bytes made it to disk. That is less than
    /// `buf.len()`, possibly 0, when the volume runs out of free blocks. A
    /// device error on a data block after some blocks were written also ends
    /// the write early: size and cursor cover the written part, and the
    /// metadata is persisted before returning the short count.
    pub fn write(&mut self, fd: usize, buf: &[u8]) -> Result<usize> {
        let file = *self.fd_table.get(fd)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let entry = self.root_dir.entry(file.entry);
        let old_size = entry.size as usize;
        let first_block = entry.first_block;
        let first = match first_block {
            Some(first) => first,
            None => match self.fat.alloc() {
                Some(first) => {
                    self.root_dir.entry_mut(file.entry).first_block = Some(first);
                    first
                }
                None => return Ok(0),
            },
        };

        let mut written = 0;
        let mut cursor = file.offset;
        let mut block_offset = cursor % BLOCK_SIZE;
        let mut failure = None;
        let mut cur = self.walk(first, cursor / BLOCK_SIZE, true)?;
        while let Some(block) = cur {
            let len = (buf.len() - written).min(BLOCK_SIZE - block_offset);
            if let Err(err) = self.write_data(block, block_offset, &buf[written..written + len]) {
                failure = Some(err);
                break;
            }
            written += len;
            cursor += len;
            block_offset = 0;
            if written == buf.len() {
                break;
            }
            cur = self.walk(block, 1, true)?;
        }

        let entry = self.root_dir.entry_mut(file.entry);
        if cursor > old_size {
            entry.size = cursor as u32;
        }
        self.fd_table.get_mut(fd)?.offset = cursor;
        self.root_dir.sync(&self.block_device)?;
        self.fat.sync(&self.block_device)?;
        match failure {
            Some(err) if written == 0 => Err(err),
            Some(err) => {
                warn!("write stopped after {} bytes: {}", written, err);
                Ok(written)
            }
            None => Ok(written),
        }
    }

    fn write_data(&self, block: u16, offset: usize, src: &[u8]) -> Result<()> {
        let mut cache = BlockCache::load(self.data_block_id(block), &self.block_device)?;
        cache.write_at(offset, src);
        cache.sync()
    }

    /// Read into `buf` from the cursor of `fd`, stopping at end of file.
    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> Result<usize> {
        let file = *self.fd_table.get(fd)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let entry = self.root_dir.entry(file.entry);
        let size = entry.size as usize;
        let first_block = entry.first_block;
        if file.offset >= size {
            return Ok(0);
        }
        let Some(first) = first_block else {
            return Ok(0);
        };

        let end = size.min(file.offset + buf.len());
        let mut read = 0;
        let mut cursor = file.offset;
        let mut block_offset = cursor % BLOCK_SIZE;
        let mut cur = self.walk(first, cursor / BLOCK_SIZE, false)?;
        while let Some(block) = cur {
            let len = (end - cursor).min(BLOCK_SIZE - block_offset);
            let cache = BlockCache::load(self.data_block_id(block), &self.block_device)?;
            cache.read_at(block_offset, &mut buf[read..read + len]);
            read += len;
            cursor += len;
            block_offset = 0;
            if cursor == end {
                break;
            }
            cur = self.walk(block, 1, false)?;
        }
        self.fd_table.get_mut(fd)?.offset = cursor;
        Ok(read)
    }
}
