// src/locked_file.rs
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;

use crate::error::{Result, RimeError};

/// A file held under an exclusive advisory lock until dropped.
pub struct LockedFile(File);

impl LockedFile {
    /// Open (creating if needed), lock, and read the current contents.
    /// Fails fast if another process already holds the lock.
    pub fn open_exclusive(path: &Path) -> Result<(Self, String)> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| RimeError::HistoryLocked { path: path.to_path_buf() })?;

        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Ok((Self(file), buf))
    }

    /// Replace the whole file contents.
    pub fn save(&mut self, data: &str) -> Result<()> {
        self.0.seek(SeekFrom::Start(0))?;
        self.0.set_len(0)?;
        self.0.write_all(data.as_bytes())?;
        self.0.sync_data()?;
        Ok(())
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}
