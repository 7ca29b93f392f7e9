//! Error types.
//!
//! [`DeviceError`] is what a block store reports; the engine wraps it into
//! [`FsError::Io`]. Every public operation returns [`FsError`].

use alloc::string::String;
use thiserror::Error;

/// Failure reported by a [`BlockDevice`](crate::BlockDevice) or
/// [`BlockStore`](crate::BlockStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("cannot open block store `{0}`")]
    Open(String),
    #[error("cannot close block store")]
    Close,
    #[error("block {block_id} is outside the device")]
    OutOfRange { block_id: usize },
    #[error("incomplete transfer on block {block_id}")]
    ShortTransfer { block_id: usize },
    #[error("block store failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("no volume is mounted")]
    NotMounted,
    #[error("a volume is already mounted")]
    AlreadyMounted,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("filename too long")]
    NameTooLong,
    #[error("file already exists")]
    AlreadyExists,
    #[error("root directory is full")]
    DirectoryFull,
    #[error("no such file")]
    NoSuchFile,
    #[error("file is open")]
    FileIsOpen,
    #[error("files are still open")]
    FilesStillOpen,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("invalid file descriptor")]
    InvalidDescriptor,
    #[error("offset beyond end of file")]
    OffsetOutOfRange,
    #[error("corrupt volume: {0}")]
    CorruptVolume(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] DeviceError),
}

pub type Result<T> = core::result::Result<T, FsError>;
