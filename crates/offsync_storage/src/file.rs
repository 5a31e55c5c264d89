//! On-disk backend holding a queue journal.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Suffix of the snapshot written during compaction before it replaces the journal.
const REWRITE_SUFFIX: &str = ".rewrite";

/// Journal file backend.
///
/// Frames are only ever appended. A journal store calls `sync` after each
/// record when configured to, `truncate` once on open to drop a torn tail,
/// and `rewrite` when it compacts. `rewrite` goes through a sibling
/// `<name>.rewrite` file that is synced and renamed into place, so a crash
/// mid-compaction leaves the old journal readable.
///
/// ```no_run
/// use offsync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut journal = FileBackend::open(Path::new("queue.journal")).unwrap();
/// journal.append(b"frame").unwrap();
/// journal.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    handle: Mutex<Handle>,
}

/// The open file and the length the journal has written so far.
#[derive(Debug)]
struct Handle {
    file: File,
    len: u64,
}

impl Handle {
    fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl FileBackend {
    /// Opens the journal at `path`, creating an empty one if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            handle: Mutex::new(Handle::open(path)?),
        })
    }

    /// Like [`open`](Self::open), first creating the journal's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        Self::open(path)
    }

    /// Location of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(REWRITE_SUFFIX);
        self.path.with_file_name(name)
    }

    fn write_snapshot(&self, data: &[u8]) -> StorageResult<PathBuf> {
        let snapshot = self.snapshot_path();
        let mut file = File::create(&snapshot)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(snapshot)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut handle = self.handle.lock();
        let size = handle.len;
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => {}
            _ => return Err(StorageError::OutOfRange { offset, len, size }),
        }

        let mut frame = vec![0u8; len];
        if len > 0 {
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.read_exact(&mut frame)?;
        }
        Ok(frame)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let handle = self.handle.get_mut();
        let offset = handle.len;
        if !data.is_empty() {
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.write_all(data)?;
            handle.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.handle.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.handle.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.handle.get_mut().file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let handle = self.handle.get_mut();
        if new_size > handle.len {
            return Err(StorageError::TruncateGrows {
                requested: new_size,
                size: handle.len,
            });
        }
        handle.file.set_len(new_size)?;
        handle.file.sync_all()?;
        handle.len = new_size;
        Ok(())
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        let snapshot = self.write_snapshot(data)?;
        if let Err(err) = fs::rename(&snapshot, &self.path) {
            let _ = fs::remove_file(&snapshot);
            return Err(err.into());
        }
        // Makes the rename durable where the platform allows a directory fsync.
        if let Some(dir) = self.path.parent().and_then(|dir| File::open(dir).ok()) {
            let _ = dir.sync_all();
        }

        *self.handle.get_mut() = Handle::open(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.journal");

        let mut backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_at(0, 11).unwrap(), b"hello world");
        assert!(matches!(
            backend.read_at(10, 5),
            Err(StorageError::OutOfRange { .. })
        ));
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.journal");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 10);
        assert_eq!(backend.read_at(0, 10).unwrap(), b"persistent");
    }

    #[test]
    fn truncate_removes_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.journal");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"completepart").unwrap();
        backend.truncate(8).unwrap();

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.read_at(0, 8).unwrap(), b"complete");
        assert!(backend.truncate(64).is_err());
    }

    #[test]
    fn rewrite_swaps_content_and_keeps_appending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.journal");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"obsolete records").unwrap();
        backend.rewrite(b"snap").unwrap();

        assert_eq!(backend.size().unwrap(), 4);
        assert_eq!(backend.append(b"+1").unwrap(), 4);
        assert_eq!(backend.read_at(0, 6).unwrap(), b"snap+1");
        assert!(!dir.path().join("queue.journal.rewrite").exists());

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.read_at(0, 6).unwrap(), b"snap+1");
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.journal");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.path(), path);
        assert!(path.exists());
    }
}
