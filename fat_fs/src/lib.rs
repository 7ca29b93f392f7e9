//! fat_fs
//!
//! A single-volume, flat-namespace FAT-style file system layered on a
//! fixed-size block device.
//!
//! Disk layout, block by block:
//!
//! - superblock (block 0)
//! - allocation table (blocks `1..=fat_blocks`)
//! - root directory (one block)
//! - data region
//!
//! The crate is divided into the same levels as the disk:
//!
//! - block device interface ([`BlockDevice`], [`BlockStore`])
//! - block buffer, one loaded copy of a block at a time
//! - on-disk layout ([`SuperBlock`], directory entries)
//! - allocation table, directory table and descriptor table
//! - [`FatFileSystem`], the mounted session with the read/write engine
//! - [`volume`], the process-wide mount slot with the C-style call surface
#![no_std]
extern crate alloc;

pub use crate::block_dev::{BlockDevice, BlockStore, RamDisk, RamStore};

mod block_cache;
mod block_dev;
pub mod config;
mod directory;
mod error;
mod fat;
mod fd_table;
mod fs;
mod io;
mod layout;
pub mod volume;

pub use config::BLOCK_SIZE;
pub use error::{DeviceError, FsError, Result};
pub use fat::FatEntry;
pub use fs::{FatFileSystem, FileEntry, VolumeInfo};
pub use layout::SuperBlock;
