//! Volume constants shared by the engine and the block store.

pub const BLOCK_SIZE: usize = 4096;

/// Filename capacity in bytes, terminator included.
pub const FS_FILENAME_LEN: usize = 16;
pub const FS_FILE_MAX_COUNT: usize = 128;
pub const FS_OPEN_MAX_COUNT: usize = 32;

pub const SIGNATURE: &[u8; 8] = b"ECS150FS";

/// On-disk allocation table value of a chain's last block.
pub const FAT_EOC: u16 = 0xFFFF;
pub const FAT_ENTRY_SIZE: usize = core::mem::size_of::<u16>();
pub const FAT_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / FAT_ENTRY_SIZE;

pub const DIR_ENTRY_SIZE: usize = 32;

pub const SUPER_BLOCK_ID: usize = 0;
pub const FAT_START_BLOCK: usize = 1;

/// Superblock, one allocation table block, the directory, the reserved data
/// block and one usable data block.
pub const MIN_VOLUME_BLOCKS: usize = 5;
pub const MAX_VOLUME_BLOCKS: usize = u16::MAX as usize;
