//! File mirroring between the local workspace and remote hosts.
//!
//! Each path is mirrored with its own `rsync -a` invocation. Multi-source
//! invocations are never built: rsync flattens several sources into one
//! target directory, which silently breaks the mirrored layout.

use std::path::Path;

use crate::core::error::Result;
use crate::utils::command;

/// Endpoint of a transfer. `host: None` means the local filesystem.
#[derive(Debug, Clone)]
pub struct Endpoint<'a> {
    pub host: Option<&'a str>,
    pub path: &'a str,
}

impl<'a> Endpoint<'a> {
    pub fn local(path: &'a str) -> Self {
        Self { host: None, path }
    }

    pub fn remote(host: &'a str, path: &'a str) -> Self {
        Self {
            host: Some(host),
            path,
        }
    }

    fn spec(&self) -> String {
        match self.host {
            Some(host) => format!("{}:{}", host, self.path),
            None => self.path.to_string(),
        }
    }
}

/// Mirrors a single path from one endpoint to another.
pub fn mirror(from: &Endpoint<'_>, to: &Endpoint<'_>) -> Result<i32> {
    if let (None, parent) = (to.host, Path::new(to.path).parent()) {
        if let Some(parent) = parent {
            if !parent.as_os_str().is_empty() {
                crate::utils::io::ensure_dir(parent, "mirror target parent")?;
            }
        }
    }
    command::run_status("rsync", &["-a", &from.spec(), &to.spec()], "rsync mirror")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_spec_prefixes_host() {
        assert_eq!(
            Endpoint::remote("gpu.example.edu", "/ws/train").spec(),
            "gpu.example.edu:/ws/train"
        );
        assert_eq!(Endpoint::local("/ws/train").spec(), "/ws/train");
    }

    #[test]
    fn mirror_creates_local_target_parent() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, "payload").unwrap();
        let dst = dir.path().join("nested/deep/dst.txt");
        let _ = mirror(
            &Endpoint::local(src.to_str().unwrap()),
            &Endpoint::local(dst.to_str().unwrap()),
        );
        assert!(dst.parent().unwrap().is_dir());
    }
}
