use crate::config::{
    BLOCK_SIZE, DIR_ENTRY_SIZE, FAT_ENTRIES_PER_BLOCK, FAT_EOC, FAT_START_BLOCK,
    FS_FILENAME_LEN, MAX_VOLUME_BLOCKS, MIN_VOLUME_BLOCKS, SIGNATURE,
};
use crate::error::{FsError, Result};
use alloc::string::String;

fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Volume geometry stored in block 0.
///
/// | bytes | field |
/// |-------|-------|
/// | 0..8  | signature `ECS150FS` |
/// | 8..10 | total block count |
/// | 10..12 | root directory block |
/// | 12..14 | first data block |
/// | 14..16 | data block count |
/// | 16    | allocation table block count |
///
/// Integers are little endian, the rest of the block is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub signature: [u8; 8],
    pub total_blocks: u16,
    pub root_dir_block: u16,
    pub data_start_block: u16,
    pub data_blocks: u16,
    pub fat_blocks: u8,
}

impl SuperBlock {
    /// Geometry of a fresh volume spanning `total_blocks`.
    ///
    /// Picks the largest data region whose allocation table still fits in
    /// front of it.
    pub fn new(total_blocks: usize) -> Result<Self> {
        if !(MIN_VOLUME_BLOCKS..=MAX_VOLUME_BLOCKS).contains(&total_blocks) {
            return Err(FsError::InvalidArgument);
        }
        for fat_blocks in 1..=u8::MAX as usize {
            // superblock + fat + root directory
            let Some(data_blocks) = total_blocks.checked_sub(2 + fat_blocks) else {
                break;
            };
            if fat_blocks * FAT_ENTRIES_PER_BLOCK >= data_blocks {
                let root_dir_block = FAT_START_BLOCK + fat_blocks;
                return Ok(Self {
                    signature: *SIGNATURE,
                    total_blocks: total_blocks as u16,
                    root_dir_block: root_dir_block as u16,
                    data_start_block: (root_dir_block + 1) as u16,
                    data_blocks: data_blocks as u16,
                    fat_blocks: fat_blocks as u8,
                });
            }
        }
        Err(FsError::InvalidArgument)
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut signature = [0u8; 8];
        signature.copy_from_slice(&buf[..8]);
        Self {
            signature,
            total_blocks: get_u16(buf, 8),
            root_dir_block: get_u16(buf, 10),
            data_start_block: get_u16(buf, 12),
            data_blocks: get_u16(buf, 14),
            fat_blocks: buf[16],
        }
    }

    /// Write the superblock into a whole block, zeroing the padding.
    pub fn encode(&self, buf: &mut [u8]) {
        buf[..BLOCK_SIZE].fill(0);
        buf[..8].copy_from_slice(&self.signature);
        put_u16(buf, 8, self.total_blocks);
        put_u16(buf, 10, self.root_dir_block);
        put_u16(buf, 12, self.data_start_block);
        put_u16(buf, 14, self.data_blocks);
        buf[16] = self.fat_blocks;
    }

    pub fn is_valid(&self) -> bool {
        &self.signature == SIGNATURE
    }

    /// Check the geometry against itself and against the device it was read
    /// from.
    pub fn validate(&self, device_blocks: usize) -> Result<()> {
        if !self.is_valid() {
            return Err(FsError::CorruptVolume("bad signature"));
        }
        if self.total_blocks as usize != device_blocks {
            return Err(FsError::CorruptVolume("block count differs from device"));
        }
        let fat_blocks = self.fat_blocks as usize;
        let data_blocks = self.data_blocks as usize;
        if data_blocks == 0 {
            return Err(FsError::CorruptVolume("empty data region"));
        }
        if fat_blocks == 0 || fat_blocks * FAT_ENTRIES_PER_BLOCK < data_blocks {
            return Err(FsError::CorruptVolume("allocation table too small"));
        }
        if self.root_dir_block as usize != FAT_START_BLOCK + fat_blocks {
            return Err(FsError::CorruptVolume("misplaced root directory"));
        }
        if self.data_start_block != self.root_dir_block + 1 {
            return Err(FsError::CorruptVolume("misplaced data region"));
        }
        if self.data_start_block as usize + data_blocks > device_blocks {
            return Err(FsError::CorruptVolume("data region overruns device"));
        }
        Ok(())
    }
}

/// One 32-byte slot of the root directory.
///
/// | bytes | field |
/// |-------|-------|
/// | 0..16 | name, NUL padded; empty first byte marks an unused slot |
/// | 16..20 | size in bytes |
/// | 20..22 | first data block, `0xFFFF` when the file has no data |
/// | 22..32 | zero |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; FS_FILENAME_LEN],
    pub size: u32,
    pub first_block: Option<u16>,
}

impl DirEntry {
    pub fn empty() -> Self {
        Self {
            name: [0u8; FS_FILENAME_LEN],
            size: 0,
            first_block: None,
        }
    }

    /// `name` must already be validated with [`check_name`].
    pub fn new(name: &str) -> Self {
        let mut new_name = [0u8; FS_FILENAME_LEN];
        new_name[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            name: new_name,
            size: 0,
            first_block: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name[0] == 0
    }

    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&x| x == 0)
            .unwrap_or(FS_FILENAME_LEN);
        &self.name[..len]
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut name = [0u8; FS_FILENAME_LEN];
        name.copy_from_slice(&buf[..FS_FILENAME_LEN]);
        let first_block = match get_u16(buf, 20) {
            FAT_EOC => None,
            block => Some(block),
        };
        Self {
            name,
            size: get_u32(buf, 16),
            first_block,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..DIR_ENTRY_SIZE].fill(0);
        if self.is_empty() {
            return;
        }
        buf[..FS_FILENAME_LEN].copy_from_slice(&self.name);
        put_u32(buf, 16, self.size);
        put_u16(buf, 20, self.first_block.unwrap_or(FAT_EOC));
    }
}

/// Validate a filename: non-empty, no NUL, and short enough to leave room for
/// the terminator.
pub fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.as_bytes().contains(&0) {
        return Err(FsError::InvalidArgument);
    }
    if name.len() >= FS_FILENAME_LEN {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}
