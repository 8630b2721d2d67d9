//! ssh command execution against the head node

use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::config::{RemoteHost, RestoreConfig};
use crate::error::{Phase, RestoreError, Result};

/// Connection settings for running commands on the appliance
#[derive(Debug, Clone)]
pub struct SshSession {
    program: String,
    host: RemoteHost,
    user: String,
    extra_opts: Vec<String>,
}

impl SshSession {
    pub fn new(
        program: impl Into<String>,
        host: RemoteHost,
        user: impl Into<String>,
        extra_opts: Vec<String>,
    ) -> Self {
        Self {
            program: program.into(),
            host,
            user: user.into(),
            extra_opts,
        }
    }

    pub fn from_config(config: &RestoreConfig) -> Result<Self> {
        Ok(Self::new(
            config.ssh_program.clone(),
            config.remote_host()?,
            config.ssh_user.clone(),
            config.extra_ssh_opts.clone(),
        ))
    }

    pub fn host(&self) -> &RemoteHost {
        &self.host
    }

    /// Arguments preceding the host name
    pub fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.host.port.to_string(),
            "-l".to_string(),
            self.user.clone(),
        ];
        args.extend(self.extra_opts.iter().cloned());
        args
    }

    /// Build the ssh command running `remote` on the head node
    pub fn command(&self, remote: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.base_args())
            .arg(&self.host.name)
            .arg("--")
            .arg(remote);
        cmd
    }

    /// Run `remote`, feeding `stdin` from a local file, and return stdout
    ///
    /// The remote command's own exit status decides success; it is never
    /// combined with another stage.
    pub fn run(&self, phase: Phase, remote: &str, stdin: Option<&Path>) -> Result<String> {
        let mut cmd = self.command(remote);
        let input = match stdin {
            Some(path) => Stdio::from(File::open(path)?),
            None => Stdio::null(),
        };
        cmd.stdin(input).stdout(Stdio::piped()).stderr(Stdio::piped());

        debug!("[{}] ssh {} -- {}", phase, self.host, remote);

        let output = cmd.output().map_err(|source| RestoreError::Spawn {
            phase,
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(RestoreError::Subprocess {
                phase,
                program: format!("{} ({})", self.program, remote),
                target: self.host.name.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Copy a local file to `remote_path` on the head node
    pub fn upload(&self, phase: Phase, local: &Path, remote_path: &Path) -> Result<()> {
        let remote = format!("cat > {}", shell_quote(&remote_path.to_string_lossy()));
        self.run(phase, &remote, Some(local)).map(|_| ())
    }
}

/// Quote a word for a POSIX shell
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
