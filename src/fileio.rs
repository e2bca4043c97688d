//! Random-file-access (C4): cached per-path read/write handles with range I/O.

use crate::error::TransferError;
use crate::range::ByteRange;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Caches open file handles per path. `read`/`write` dispatch the blocking
/// seek+read/write to `spawn_blocking`, since positional random access has
/// no natural async equivalent in `std`/`tokio::fs`.
#[derive(Default)]
pub struct RandomAccessFileCache {
    handles: RwLock<HashMap<PathBuf, Arc<AsyncMutex<File>>>>,
}

impl RandomAccessFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn path_from_url(url: &str) -> Result<PathBuf, TransferError> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| TransferError::IllegalArgument(format!("not a file URL: {}", url)))?;
        Ok(PathBuf::from(path))
    }

    fn read_handle(&self, path: &Path) -> Result<Arc<AsyncMutex<File>>, TransferError> {
        if let Some(handle) = self.handles.read().get(path) {
            return Ok(handle.clone());
        }
        let mut handles = self.handles.write();
        if let Some(handle) = handles.get(path) {
            return Ok(handle.clone());
        }
        let file = File::open(path).map_err(|e| TransferError::Io(e.to_string()))?;
        let handle = Arc::new(AsyncMutex::new(file));
        handles.insert(path.to_path_buf(), handle.clone());
        Ok(handle)
    }

    fn write_handle(&self, path: &Path, total_size: u64) -> Result<Arc<AsyncMutex<File>>, TransferError> {
        if let Some(handle) = self.handles.read().get(path) {
            return Ok(handle.clone());
        }
        let mut handles = self.handles.write();
        if let Some(handle) = handles.get(path) {
            return Ok(handle.clone());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TransferError::Io(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| TransferError::Io(e.to_string()))?;
        file.set_len(total_size).map_err(|e| TransferError::Io(e.to_string()))?;
        let handle = Arc::new(AsyncMutex::new(file));
        handles.insert(path.to_path_buf(), handle.clone());
        Ok(handle)
    }

    /// Read `range.len()` bytes at `range.low` from `url` (a `file://` URL).
    pub async fn read(&self, url: &str, range: ByteRange) -> Result<Bytes, TransferError> {
        let path = Self::path_from_url(url)?;
        let handle = self.read_handle(&path)?;
        let guard = handle.lock().await;
        let file = guard.try_clone().map_err(|e| TransferError::Io(e.to_string()))?;
        drop(guard);

        tokio::task::spawn_blocking(move || {
            let mut file = file;
            file.seek(SeekFrom::Start(range.low))
                .map_err(|e| TransferError::Io(e.to_string()))?;
            let mut buf = vec![0u8; range.len() as usize];
            file.read_exact(&mut buf).map_err(|e| TransferError::Io(e.to_string()))?;
            Ok::<_, TransferError>(Bytes::from(buf))
        })
        .await
        .map_err(|e| TransferError::Io(format!("read task join error: {}", e)))?
    }

    /// Write `data` at `range.low` into `url`, preallocating the file to
    /// `total_size` the first time it is opened.
    pub async fn write(
        &self,
        url: &str,
        range: ByteRange,
        data: Bytes,
        total_size: u64,
    ) -> Result<(), TransferError> {
        let path = Self::path_from_url(url)?;
        let handle = self.write_handle(&path, total_size)?;
        let mut guard = handle.lock().await;

        tokio::task::block_in_place(|| {
            guard
                .seek(SeekFrom::Start(range.low))
                .map_err(|e| TransferError::Io(e.to_string()))?;
            guard.write_all(&data).map_err(|e| TransferError::Io(e.to_string()))
        })
    }

    /// Close all cached handles, dropping them.
    pub fn close(&self) {
        self.handles.write().clear();
    }

    /// Close and drop the cached handle for one path (`CloseFiles`, run
    /// once an asset's transfer has fully completed).
    pub fn close_path(&self, url: &str) {
        if let Ok(path) = Self::path_from_url(url) {
            self.handles.write().remove(&path);
        }
    }

    /// Unlink a partially written target file (download-cleanup path).
    pub fn unlink(&self, url: &str) {
        if let Ok(path) = Self::path_from_url(url) {
            self.handles.write().remove(&path);
            let _ = std::fs::remove_file(&path);
        }
    }
}
