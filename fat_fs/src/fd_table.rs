use crate::config::FS_OPEN_MAX_COUNT;
use crate::error::{FsError, Result};
use alloc::vec;
use alloc::vec::Vec;

/// An open file: the directory slot it refers to and its own cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    pub entry: usize,
    pub offset: usize,
}

/// Fixed-capacity table of open files. Descriptors are slot indices, handed
/// out lowest first.
pub struct FdTable {
    slots: Vec<Option<OpenFile>>,
    free: usize,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None; FS_OPEN_MAX_COUNT],
            free: FS_OPEN_MAX_COUNT,
        }
    }

    pub fn alloc(&mut self, entry: usize) -> Result<usize> {
        let fd = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::TooManyOpenFiles)?;
        self.slots[fd] = Some(OpenFile { entry, offset: 0 });
        self.free -= 1;
        Ok(fd)
    }

    pub fn dealloc(&mut self, fd: usize) -> Result<()> {
        match self.slots.get_mut(fd) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.free += 1;
                Ok(())
            }
            _ => Err(FsError::InvalidDescriptor),
        }
    }

    pub fn get(&self, fd: usize) -> Result<&OpenFile> {
        self.slots
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(FsError::InvalidDescriptor)
    }

    pub fn get_mut(&mut self, fd: usize) -> Result<&mut OpenFile> {
        self.slots
            .get_mut(fd)
            .and_then(Option::as_mut)
            .ok_or(FsError::InvalidDescriptor)
    }

    /// Whether any descriptor refers to directory slot `entry`.
    pub fn is_open(&self, entry: usize) -> bool {
        self.slots.iter().flatten().any(|file| file.entry == entry)
    }

    pub fn is_empty(&self) -> bool {
        self.free == FS_OPEN_MAX_COUNT
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
