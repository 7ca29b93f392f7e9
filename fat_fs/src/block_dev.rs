use crate::config::BLOCK_SIZE;
use crate::error::DeviceError;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

/// Fixed-size block storage the file system lives on.
///
/// `buf` is always exactly [`BLOCK_SIZE`] bytes.
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError>;
    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), DeviceError>;
    /// Number of blocks the device holds.
    fn block_count(&self) -> usize;
    /// Release the backing storage. Called once on unmount.
    fn close(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Opens block devices by name.
pub trait BlockStore {
    fn open(&self, name: &str) -> Result<Arc<dyn BlockDevice>, DeviceError>;
}

/// Block device kept in memory.
///
/// A faulty disk fails every transfer and close, which is how callers
/// exercise the I/O error paths.
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    block_count: usize,
    faulty: AtomicBool,
}

impl RamDisk {
    pub fn new(block_count: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; block_count * BLOCK_SIZE]),
            block_count,
            faulty: AtomicBool::new(false),
        }
    }

    pub fn set_faulty(&self, faulty: bool) {
        self.faulty.store(faulty, Ordering::SeqCst);
    }

    fn check(&self, block_id: usize, len: usize) -> Result<(), DeviceError> {
        if self.faulty.load(Ordering::SeqCst) {
            return Err(DeviceError::Backend(String::from("faulty ram disk")));
        }
        if block_id >= self.block_count {
            return Err(DeviceError::OutOfRange { block_id });
        }
        if len != BLOCK_SIZE {
            return Err(DeviceError::ShortTransfer { block_id });
        }
        Ok(())
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.check(block_id, buf.len())?;
        let start = block_id * BLOCK_SIZE;
        buf.copy_from_slice(&self.data.lock()[start..start + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), DeviceError> {
        self.check(block_id, buf.len())?;
        let start = block_id * BLOCK_SIZE;
        self.data.lock()[start..start + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn close(&self) -> Result<(), DeviceError> {
        if self.faulty.load(Ordering::SeqCst) {
            Err(DeviceError::Close)
        } else {
            Ok(())
        }
    }
}

/// Named collection of [`RamDisk`]s.
pub struct RamStore {
    disks: Mutex<BTreeMap<String, Arc<RamDisk>>>,
}

impl RamStore {
    pub fn new() -> Self {
        Self {
            disks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, name: &str, disk: Arc<RamDisk>) {
        self.disks.lock().insert(String::from(name), disk);
    }
}

impl Default for RamStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for RamStore {
    fn open(&self, name: &str) -> Result<Arc<dyn BlockDevice>, DeviceError> {
        match self.disks.lock().get(name) {
            Some(disk) => {
                let disk: Arc<dyn BlockDevice> = disk.clone();
                Ok(disk)
            }
            None => Err(DeviceError::Open(String::from(name))),
        }
    }
}
