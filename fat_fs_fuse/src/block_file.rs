use fat_fs::{BlockDevice, BlockStore, DeviceError, BLOCK_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// A disk image on the host file system.
pub struct BlockFile {
    file: Mutex<File>,
    block_count: usize,
}

impl BlockFile {
    /// Open an existing image. Trailing bytes short of a block are ignored.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let block_count = (file.metadata()?.len() / BLOCK_SIZE as u64) as usize;
        Ok(Self {
            file: Mutex::new(file),
            block_count,
        })
    }

    /// Create an image of `block_count` blocks, truncating or growing any
    /// existing file.
    pub fn create(path: impl AsRef<Path>, block_count: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((block_count * BLOCK_SIZE) as u64)?;
        Ok(Self {
            file: Mutex::new(file),
            block_count,
        })
    }

    fn locate(&self, block_id: usize, len: usize) -> Result<MutexGuard<'_, File>, DeviceError> {
        if block_id >= self.block_count {
            return Err(DeviceError::OutOfRange { block_id });
        }
        if len != BLOCK_SIZE {
            return Err(DeviceError::ShortTransfer { block_id });
        }
        let mut file = self
            .file
            .lock()
            .map_err(|_| DeviceError::Backend("image lock poisoned".into()))?;
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .map_err(backend)?;
        Ok(file)
    }
}

fn backend(err: io::Error) -> DeviceError {
    DeviceError::Backend(err.to_string())
}

fn transfer(block_id: usize) -> impl Fn(io::Error) -> DeviceError {
    move |err| match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::WriteZero => {
            DeviceError::ShortTransfer { block_id }
        }
        _ => backend(err),
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        let mut file = self.locate(block_id, buf.len())?;
        file.read_exact(buf).map_err(transfer(block_id))
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), DeviceError> {
        let mut file = self.locate(block_id, buf.len())?;
        file.write_all(buf).map_err(transfer(block_id))
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn close(&self) -> Result<(), DeviceError> {
        let file = self.file.lock().map_err(|_| DeviceError::Close)?;
        file.sync_all().map_err(|_| DeviceError::Close)
    }
}

/// Resolves block store names as host paths.
pub struct ImageStore;

impl BlockStore for ImageStore {
    fn open(&self, name: &str) -> Result<Arc<dyn BlockDevice>, DeviceError> {
        let block_file =
            BlockFile::open(name).map_err(|err| DeviceError::Open(format!("{}: {}", name, err)))?;
        Ok(Arc::new(block_file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fat_fs::{FatFileSystem, FsError};
    use tempfile::tempdir;

    #[test]
    fn blocks_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fs.img");
        let image = BlockFile::create(&path, 4).unwrap();
        assert_eq!(image.block_count(), 4);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4 * BLOCK_SIZE as u64);

        let block = [7u8; BLOCK_SIZE];
        image.write_block(3, &block).unwrap();
        let mut out = [0u8; BLOCK_SIZE];
        image.read_block(3, &mut out).unwrap();
        assert_eq!(out, block);
        image.read_block(0, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
        image.close().unwrap();

        let reopened = BlockFile::open(&path).unwrap();
        reopened.read_block(3, &mut out).unwrap();
        assert_eq!(out, block);
    }

    #[test]
    fn bad_transfers_are_errors() {
        let dir = tempdir().unwrap();
        let image = BlockFile::create(dir.path().join("fs.img"), 2).unwrap();
        let mut out = [0u8; BLOCK_SIZE];
        assert_eq!(
            image.read_block(2, &mut out),
            Err(DeviceError::OutOfRange { block_id: 2 })
        );
        assert_eq!(
            image.write_block(0, &[0u8; 10]),
            Err(DeviceError::ShortTransfer { block_id: 0 })
        );
    }

    #[test]
    fn partial_trailing_block_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("odd.img");
        std::fs::write(&path, vec![0u8; 2 * BLOCK_SIZE + 100]).unwrap();
        assert_eq!(BlockFile::open(&path).unwrap().block_count(), 2);
    }

    #[test]
    fn store_mounts_formatted_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk.fs");
        let device: Arc<dyn BlockDevice> = Arc::new(BlockFile::create(&path, 16).unwrap());
        FatFileSystem::format(&device).unwrap();
        device.close().unwrap();

        let name = path.to_str().unwrap();
        let mut fs = FatFileSystem::mount(&ImageStore, name).unwrap();
        fs.create("hello").unwrap();
        let fd = fs.open("hello").unwrap();
        fs.write(fd, b"from the host").unwrap();
        fs.close(fd).unwrap();
        fs.unmount().map_err(|(_, err)| err).unwrap();

        let mut fs = FatFileSystem::mount(&ImageStore, name).unwrap();
        let fd = fs.open("hello").unwrap();
        let mut out = [0u8; 32];
        assert_eq!(fs.read(fd, &mut out).unwrap(), 13);
        assert_eq!(&out[..13], b"from the host");

        let missing = dir.path().join("missing.fs");
        assert!(matches!(
            FatFileSystem::mount(&ImageStore, missing.to_str().unwrap()),
            Err(FsError::Io(DeviceError::Open(_)))
        ));
    }
}
