use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::config::APP_NAME;
use crate::error::{DaemonError, Result};

/// Exclusive lock that keeps a second daemon from driving the same TV
///
/// flock is released by the kernel when the file is closed, so dropping the
/// guard (or the process dying) frees it.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Lock `<runtime dir>/gamepad-tv.lock`, falling back to /tmp
    pub fn acquire() -> Result<Self> {
        let path = dirs::runtime_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(format!("{}.lock", APP_NAME));
        Self::acquire_at(&path)
    }

    pub fn acquire_at(path: &Path) -> Result<Self> {
        let file = File::create(path)?;

        // Try to acquire exclusive lock (non-blocking) using flock
        let lock_result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

        if lock_result != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(DaemonError::AlreadyRunning(path.to_path_buf()));
            }
            return Err(DaemonError::Io(err));
        }

        debug!("Acquired instance lock {}", path.display());
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
