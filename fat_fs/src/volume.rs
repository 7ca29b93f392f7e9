//! The process-wide mount slot.
//!
//! At most one volume is mounted at a time. Every call here locks the slot,
//! so calls from different threads are serialized.

use crate::block_dev::BlockStore;
use crate::error::{FsError, Result};
use crate::fs::{FatFileSystem, FileEntry, VolumeInfo};
use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::Mutex;

lazy_static! {
    static ref VOLUME: Mutex<Option<FatFileSystem>> = Mutex::new(None);
}

fn with_volume<T>(f: impl FnOnce(&mut FatFileSystem) -> Result<T>) -> Result<T> {
    let mut slot = VOLUME.lock();
    let fs = slot.as_mut().ok_or(FsError::NotMounted)?;
    f(fs)
}

/// Mount the volume stored under `name`.
pub fn mount(store: &dyn BlockStore, name: &str) -> Result<()> {
    let mut slot = VOLUME.lock();
    if slot.is_some() {
        return Err(FsError::AlreadyMounted);
    }
    *slot = Some(FatFileSystem::mount(store, name)?);
    Ok(())
}

/// Unmount the current volume. On error the volume stays mounted.
pub fn unmount() -> Result<()> {
    let mut slot = VOLUME.lock();
    let fs = slot.take().ok_or(FsError::NotMounted)?;
    fs.unmount().map_err(|(fs, err)| {
        *slot = Some(fs);
        err
    })
}

pub fn is_mounted() -> bool {
    VOLUME.lock().is_some()
}

pub fn info() -> Result<VolumeInfo> {
    with_volume(|fs| Ok(fs.info()))
}

pub fn create(name: &str) -> Result<()> {
    with_volume(|fs| fs.create(name))
}

pub fn delete(name: &str) -> Result<()> {
    with_volume(|fs| fs.delete(name))
}

pub fn ls() -> Result<Vec<FileEntry>> {
    with_volume(|fs| Ok(fs.ls()))
}

pub fn open(name: &str) -> Result<usize> {
    with_volume(|fs| fs.open(name))
}

pub fn close(fd: usize) -> Result<()> {
    with_volume(|fs| fs.close(fd))
}

pub fn stat(fd: usize) -> Result<usize> {
    with_volume(|fs| fs.stat(fd))
}

pub fn lseek(fd: usize, offset: usize) -> Result<()> {
    with_volume(|fs| fs.seek(fd, offset))
}

pub fn write(fd: usize, buf: &[u8]) -> Result<usize> {
    with_volume(|fs| fs.write(fd, buf))
}

pub fn read(fd: usize, buf: &mut [u8]) -> Result<usize> {
    with_volume(|fs| fs.read(fd, buf))
}
