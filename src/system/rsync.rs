//! rsync-backed node transfers

use std::process::{Command, Stdio};

use tracing::debug;

use super::{TransferReport, Transferrer};
use crate::core::TransferTask;
use crate::error::{Phase, RestoreError, Result};

/// Mirrors a partition with `rsync --files-from`
///
/// `--delete` combined with `--files-from` only prunes inside the listed
/// directories, so other content on the node is left alone.
#[derive(Debug, Clone)]
pub struct RsyncTransferrer {
    program: String,
    remote_sync_user: String,
}

impl RsyncTransferrer {
    pub fn new(program: impl Into<String>, remote_sync_user: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            remote_sync_user: remote_sync_user.into(),
        }
    }

    pub fn command(&self, task: &TransferTask) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-arHR")
            .arg("--delete")
            .arg("--stats")
            .arg("-e")
            .arg(task.transport.remote_shell())
            .arg(format!("--rsync-path=sudo -u {} rsync", self.remote_sync_user))
            .arg(format!("--files-from={}", task.files_from.display()))
            .arg(format!("{}/./", task.source.display()))
            .arg(format!(
                "{}:{}/",
                task.target.address,
                task.destination.display()
            ));
        cmd
    }
}

impl Transferrer for RsyncTransferrer {
    fn transfer(&self, task: &TransferTask) -> Result<TransferReport> {
        let mut cmd = self.command(task);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("{:?}", cmd);

        let output = cmd.output().map_err(|source| RestoreError::Spawn {
            phase: Phase::Transfer,
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(RestoreError::Subprocess {
                phase: Phase::Transfer,
                program: self.program.clone(),
                target: format!("{} ({})", task.target.node, task.target.address),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(parse_rsync_stats(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Pull file counts out of `rsync --stats` output
pub fn parse_rsync_stats(output: &str) -> TransferReport {
    let mut report = TransferReport::default();
    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Number of regular files transferred:") {
            report.files_transferred = leading_count(rest);
        } else if let Some(rest) = line.strip_prefix("Number of files transferred:") {
            // rsync < 3.1
            report.files_transferred = leading_count(rest);
        } else if let Some(rest) = line.strip_prefix("Number of deleted files:") {
            report.files_deleted = leading_count(rest);
        }
    }
    report
}

fn leading_count(text: &str) -> Option<u64> {
    let digits: String = text
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(|c| *c != ',')
        .collect();
    digits.parse().ok()
}
