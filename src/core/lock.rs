//! Cross-process GPU device lock.
//!
//! Training and prediction stages serialize access to the GPU through a
//! blocking advisory lock on a well-known path shared by every process on
//! the host. The lock is released when the guard drops, so every exit
//! path out of a stage releases it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::error::Result;
use crate::core::paths;

pub struct DeviceLock {
    path: PathBuf,
}

impl DeviceLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Lock guarding the GPU device on this host.
    pub fn gpu() -> Self {
        Self::new(paths::GPU_LOCK_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until the lock is held. The holder's PID is written into the
    /// lock file for operators inspecting a stuck host; the lock itself is
    /// the flock, not the file content.
    pub fn acquire(&self) -> Result<DeviceLockGuard> {
        acquire_impl(&self.path)
    }
}

#[cfg(unix)]
fn acquire_impl(path: &Path) -> Result<DeviceLockGuard> {
    use std::os::unix::io::AsRawFd;

    use crate::core::error::Error;

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some("gpu lock open".to_string())))?;
    let fd = file.as_raw_fd();
    loop {
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if rc == 0 {
            break;
        }
        let errno = std::io::Error::last_os_error();
        if errno.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(Error::lock_unavailable(errno.to_string()));
    }
    file.set_len(0)
        .and_then(|_| write!(file, "{}", std::process::id()))
        .map_err(|e| Error::internal_io(e.to_string(), Some("gpu lock pid write".to_string())))?;
    Ok(DeviceLockGuard { file: Some(file) })
}

#[cfg(not(unix))]
fn acquire_impl(path: &Path) -> Result<DeviceLockGuard> {
    crate::log_status!(
        "WARN",
        "lock.unavailable: advisory locks are not supported on this platform; \
         proceeding without GPU serialization ({})",
        path.display()
    );
    let _ = OpenOptions::new().create(true).append(true).open(path);
    Ok(DeviceLockGuard { file: None })
}

/// Held lock. Dropping the guard releases the flock.
pub struct DeviceLockGuard {
    file: Option<std::fs::File>,
}

impl DeviceLockGuard {
    /// False when the platform fallback handed out a disengaged guard.
    pub fn is_engaged(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for DeviceLockGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(file) = self.file.take() {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            self.file = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn acquire_writes_holder_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DeviceLock::new(dir.path().join("gpulock"));
        let guard = lock.acquire().unwrap();
        assert!(guard.is_engaged());
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content, std::process::id().to_string());
    }

    #[cfg(unix)]
    #[test]
    fn reacquire_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DeviceLock::new(dir.path().join("gpulock"));
        drop(lock.acquire().unwrap());
        let second = lock.acquire().unwrap();
        assert!(second.is_engaged());
    }

    #[cfg(unix)]
    #[test]
    fn second_acquirer_blocks_until_release() {
        use std::sync::mpsc;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpulock");
        let guard = DeviceLock::new(&path).acquire().unwrap();

        let (tx, rx) = mpsc::channel();
        let contender_path = path.clone();
        let contender = std::thread::spawn(move || {
            let guard = DeviceLock::new(contender_path).acquire().unwrap();
            tx.send(()).unwrap();
            drop(guard);
        });

        assert!(
            rx.recv_timeout(Duration::from_millis(200)).is_err(),
            "contender acquired while the lock was held"
        );
        drop(guard);
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        contender.join().unwrap();
    }
}
