//! Remote stage dispatch over SSH with connection-loss retry.
//!
//! A dispatch runs one pipeline stage on a remote role host. Long stages
//! run inside a detached tmux session so a dropped connection does not
//! kill the stage; on reconnect the dispatcher re-issues the same command
//! with `--only_wait` appended, which attaches to the already-running
//! work instead of starting it again.

use std::time::Duration;

use crate::core::error::{Error, Result};
use crate::log_status;
use crate::utils::command;

/// How reconnect attempts are paced. `max_attempts: None` retries until
/// the stage finishes or the operator kills the dispatcher.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Immediate, bounded retries. Used by tests.
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: Some(max_attempts),
        }
    }
}

/// Runs a shell script on a host and reports its exit status.
pub trait RemoteTransport {
    fn run(&self, host: &str, script: &str, in_tmux: bool) -> Result<i32>;
}

/// SSH transport. Scripts wrapped in tmux survive connection loss; the
/// `-A` flag attaches to the session when it already exists.
pub struct SshTransport;

impl RemoteTransport for SshTransport {
    fn run(&self, host: &str, script: &str, in_tmux: bool) -> Result<i32> {
        let wrapped;
        let script = if in_tmux {
            wrapped = format!(
                "tmux new-session -A -s gridhand bash -c {}",
                shell_quote(script)
            );
            wrapped.as_str()
        } else {
            script
        };
        command::run_status(
            "ssh",
            &[
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                host,
                script,
            ],
            "remote dispatch",
        )
    }
}

fn shell_quote(script: &str) -> String {
    format!("'{}'", script.replace('\'', "'\\''"))
}

/// One stage invocation on a remote role host.
#[derive(Debug, Clone)]
pub struct RemoteInvocation {
    pub host: String,
    pub exec_path: String,
    pub workspace_path: String,
    pub pipeline: String,
    pub stage: String,
    pub in_tmux: bool,
    pub auto_retry: bool,
    pub current_trial: Option<i64>,
    pub nn_profile: Option<String>,
}

impl RemoteInvocation {
    /// Command line executed on the remote host. `only_wait` is appended
    /// on reconnect so the stage attaches instead of restarting.
    pub fn script(&self, only_wait: bool) -> String {
        let mut script = format!(
            "cd {}; ./gridhand {} {} --stage {}",
            self.exec_path, self.pipeline, self.workspace_path, self.stage
        );
        if let Some(trial) = self.current_trial {
            script.push_str(&format!(" --current_trial {}", trial));
        }
        if let Some(profile) = &self.nn_profile {
            script.push_str(&format!(" --nn_profile {}", profile));
        }
        if only_wait {
            script.push_str(" --only_wait");
        }
        script
    }

    /// Dispatches the stage and blocks until it exits. A nonzero exit
    /// with `auto_retry` set is treated as a dropped connection: after
    /// the retry delay the same command is re-issued with `--only_wait`.
    pub fn dispatch(&self, transport: &dyn RemoteTransport, policy: &RetryPolicy) -> Result<()> {
        let mut attempt = 0u32;
        let mut code = transport.run(&self.host, &self.script(false), self.in_tmux)?;
        while code != 0 {
            if !self.auto_retry {
                return Err(Error::remote_dispatch_failed(
                    &self.host,
                    &self.script(false),
                    code,
                ));
            }
            attempt += 1;
            if let Some(max) = policy.max_attempts {
                if attempt > max {
                    return Err(Error::remote_dispatch_failed(
                        &self.host,
                        &self.script(true),
                        code,
                    ));
                }
            }
            log_status!(
                "WARN",
                "connection to {} lost (exit {}), reconnecting to stage {}",
                self.host,
                code,
                self.stage
            );
            std::thread::sleep(policy.delay);
            code = transport.run(&self.host, &self.script(true), false)?;
        }
        Ok(())
    }
}
