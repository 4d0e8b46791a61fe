//! PID-file rendezvous between a launcher and a waiter process.
//!
//! The training launcher writes its PID to a file under `nn_scratch/`;
//! a separate waiter invocation polls the same file until the launcher
//! writes the finished sentinel. The file outlives both processes, so
//! the waiter rewrites the sentinel after observing it and a stale
//! positive PID from a crashed run is reported to the caller.

use std::path::{Path, PathBuf};

use crate::core::error::{Error, Result};
use crate::utils::io;

/// Written by `finish` regardless of how the run ended.
pub const FINISHED_SENTINEL: i64 = -1;

pub struct PidRendezvous {
    path: PathBuf,
}

impl PidRendezvous {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records the launcher's PID. Must be positive.
    pub fn start(&self, pid: i64) -> Result<()> {
        if pid <= 0 {
            return Err(Error::validation_invalid_argument(
                "pid",
                format!("must be positive, got {}", pid),
            ));
        }
        io::write_file(&self.path, &pid.to_string(), "pid rendezvous start")
    }

    /// Marks the run finished. Called on every exit path, success or not.
    pub fn finish(&self) -> Result<()> {
        io::write_file(
            &self.path,
            &FINISHED_SENTINEL.to_string(),
            "pid rendezvous finish",
        )
    }

    /// Polls the file until the finished sentinel appears, then rewrites
    /// the sentinel and returns the last valid PID observed. Returns
    /// `None` when no positive PID was ever seen before the sentinel.
    pub fn wait(&self) -> Result<Option<i64>> {
        let mut last_pid = None;
        loop {
            let content = match io::read_file(&self.path, "pid rendezvous wait") {
                Ok(content) => content,
                Err(_) => continue,
            };
            let Some(token) = content.split_whitespace().next() else {
                continue;
            };
            let Ok(pid) = token.parse::<i64>() else {
                continue;
            };
            if pid > 0 {
                last_pid = Some(pid);
                continue;
            }
            self.finish()?;
            return Ok(last_pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendezvous() -> (tempfile::TempDir, PidRendezvous) {
        let dir = tempfile::tempdir().unwrap();
        let rdv = PidRendezvous::new(dir.path().join("rob.pid"));
        (dir, rdv)
    }

    #[test]
    fn start_rejects_nonpositive_pid() {
        let (_dir, rdv) = rendezvous();
        let err = rdv.start(0).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn wait_observes_pid_then_sentinel() {
        let (_dir, rdv) = rendezvous();
        rdv.start(4242).unwrap();
        let path = rdv.path().to_path_buf();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            std::fs::write(&path, FINISHED_SENTINEL.to_string()).unwrap();
        });
        assert_eq!(rdv.wait().unwrap(), Some(4242));
        writer.join().unwrap();
    }

    #[test]
    fn wait_without_start_returns_none() {
        let (_dir, rdv) = rendezvous();
        rdv.finish().unwrap();
        assert_eq!(rdv.wait().unwrap(), None);
    }

    #[test]
    fn wait_rewrites_sentinel() {
        let (_dir, rdv) = rendezvous();
        rdv.finish().unwrap();
        assert_eq!(rdv.wait().unwrap(), None);
        let content = std::fs::read_to_string(rdv.path()).unwrap();
        assert_eq!(content, FINISHED_SENTINEL.to_string());
    }
}
