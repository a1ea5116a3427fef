//! SSH Command Runner
//!
//! Runs command batches on storage nodes through the system `ssh` client.
//! Commands execute strictly in order, one ssh invocation each, and the
//! whole batch shares a single timeout.

use crate::config::SshConfig;
use crate::domain::ports::RemoteCommandRunner;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// [`RemoteCommandRunner`] backed by the OpenSSH client
pub struct SshCommandRunner {
    config: SshConfig,
}

impl SshCommandRunner {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to the ssh binary for one remote command
    fn ssh_args(&self, host: &str, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-p".to_string(),
            self.config.port.to_string(),
        ];
        if let Some(key) = &self.config.private_key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{}", self.config.user, host));
        args.push(command.to_string());
        args
    }

    async fn run_batch(&self, host: &str, commands: &[String]) -> Result<Vec<String>> {
        let mut outputs = Vec::with_capacity(commands.len());

        for command in commands {
            debug!(host, command = %command, "Running remote command");

            let output = Command::new(&self.config.ssh_binary)
                .args(self.ssh_args(host, command))
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| Error::RemoteExecution {
                    host: host.to_string(),
                    reason: format!("failed to spawn {}: {}", self.config.ssh_binary, e),
                })?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::RemoteExecution {
                    host: host.to_string(),
                    reason: format!("{}: {} ({})", command, stderr.trim(), output.status),
                });
            }

            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !stdout.is_empty() {
                outputs.push(stdout);
            }
        }

        Ok(outputs)
    }
}

#[async_trait]
impl RemoteCommandRunner for SshCommandRunner {
    async fn run(&self, host: &str, commands: &[String], timeout: Duration) -> Result<Vec<String>> {
        // Dropping the batch future kills the in-flight ssh child
        tokio::time::timeout(timeout, self.run_batch(host, commands))
            .await
            .map_err(|_| Error::RemoteTimeout {
                host: host.to_string(),
                timeout_secs: timeout.as_secs(),
            })?
    }
}
