//! Size-capped log file with numbered backups.
//!
//! `combined.log` is the active file; on rotation it becomes `combined.log.1`,
//! older backups shift up by one and whatever would exceed the retained file
//! count is deleted. Writes are never split across files, so a record always
//! lands whole in a single file.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    /// Total files kept, the active one included
    max_files: usize,
    file: File,
    size: u64,
}

impl RotatingFile {
    /// Opens (or creates) the active file, appending to existing content.
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, max_files: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path,
            max_bytes,
            max_files: max_files.max(1),
            file,
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let oldest = self.max_files - 1;
        if oldest == 0 {
            remove_if_exists(&self.path)?;
        } else {
            remove_if_exists(&self.backup_path(oldest))?;
            for index in (1..oldest).rev() {
                let from = self.backup_path(index);
                if from.exists() {
                    fs::rename(&from, self.backup_path(index + 1))?;
                }
            }
            // The active file may already be gone (removed externally, or
            // moved by a rotation whose reopen failed)
            if self.path.exists() {
                fs::rename(&self.path, self.backup_path(1))?;
            }
        }

        // Reset before reopening: if the reopen fails, writes keep going to the
        // old handle until the cap is reached again instead of rotating on
        // every record.
        self.size = 0;
        self.file = open_append(&self.path)?;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // An empty file takes the record even if it alone exceeds the cap
        if self.size > 0 && self.size + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
