use crate::block_dev::BlockDevice;
use crate::config::BLOCK_SIZE;
use crate::error::Result;
use alloc::sync::Arc;

/// In-memory copy of one block.
///
/// Nothing is written back implicitly: callers `sync` once they are done
/// mutating, so device failures surface as errors instead of being lost in
/// a destructor.
pub struct BlockCache {
    data: [u8; BLOCK_SIZE],
    block_id: usize,
    block_device: Arc<dyn BlockDevice>,
    dirty: bool,
}

impl BlockCache {
    /// A zero-filled block that will overwrite `block_id` on sync.
    pub fn zeroed(block_id: usize, block_device: &Arc<dyn BlockDevice>) -> Self {
        Self {
            data: [0u8; BLOCK_SIZE],
            block_id,
            block_device: Arc::clone(block_device),
            dirty: true,
        }
    }

    pub fn load(block_id: usize, block_device: &Arc<dyn BlockDevice>) -> Result<Self> {
        let mut data = [0u8; BLOCK_SIZE];
        block_device.read_block(block_id, &mut data)?;
        Ok(Self {
            data,
            block_id,
            block_device: Arc::clone(block_device),
            dirty: false,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the block.
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) {
        assert!(offset + dst.len() <= BLOCK_SIZE);
        dst.copy_from_slice(&self.data[offset..offset + dst.len()]);
    }

    /// Copy `src` into the block starting at `offset`.
    pub fn write_at(&mut self, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= BLOCK_SIZE);
        self.as_mut_slice()[offset..offset + src.len()].copy_from_slice(src);
    }

    pub fn sync(&mut self) -> Result<()> {
        if self.dirty {
            self.block_device.write_block(self.block_id, &self.data)?;
            self.dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::RamDisk;

    #[test]
    fn partial_write_keeps_rest_of_block() {
        let device: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(2));
        let mut cache = BlockCache::zeroed(1, &device);
        cache.as_mut_slice().fill(b'x');
        cache.sync().unwrap();

        let mut cache = BlockCache::load(1, &device).unwrap();
        cache.write_at(10, b"hello");
        cache.sync().unwrap();

        let cache = BlockCache::load(1, &device).unwrap();
        let mut out = [0u8; 7];
        cache.read_at(9, &mut out);
        assert_eq!(&out, b"xhellox");
    }

    #[test]
    fn clean_block_is_not_written() {
        let disk = Arc::new(RamDisk::new(1));
        let device: Arc<dyn BlockDevice> = disk.clone();
        let mut cache = BlockCache::load(0, &device).unwrap();
        disk.set_faulty(true);
        // nothing dirty, so the faulty device is never touched
        assert!(cache.sync().is_ok());
        cache.write_at(0, b"a");
        assert!(cache.sync().is_err());
    }
}
