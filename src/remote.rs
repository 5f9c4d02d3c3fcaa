//! The remote host capability: run a command, move a file.
//!
//! The pipeline only needs these three operations; how a session is opened
//! and authenticated is the transport's business.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::config::HostSettings;

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status; `None` when the process was killed by a signal.
    pub status: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

pub trait RemoteHost: Send + Sync {
    /// Run `command` through the remote shell.
    fn execute(&self, command: &str) -> Result<CommandOutput>;

    /// Copy `remote` to the local file `local`, replacing it.
    fn download(&self, remote: &str, local: &Path) -> Result<()>;

    /// Copy the local file `local` to `remote`.
    fn upload(&self, local: &Path, remote: &str) -> Result<()>;
}

/// Build the host described by `settings`.
pub fn connect(settings: &HostSettings) -> Arc<dyn RemoteHost> {
    match settings {
        HostSettings::Local => Arc::new(LocalHost),
        HostSettings::Ssh { destination, port, identity } => Arc::new(OpenSshHost {
            destination: destination.clone(),
            port: *port,
            identity: identity.as_ref().map(|p| p.display().to_string()),
        }),
    }
}

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn captured(output: std::process::Output) -> CommandOutput {
    CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status.code(),
    }
}

fn ensure_parent(local: &Path) -> Result<()> {
    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// LocalHost – the "remote" is this machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct LocalHost;

impl RemoteHost for LocalHost {
    fn execute(&self, command: &str) -> Result<CommandOutput> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("running `{command}`"))?;
        Ok(captured(output))
    }

    fn download(&self, remote: &str, local: &Path) -> Result<()> {
        ensure_parent(local)?;
        std::fs::copy(remote, local)
            .with_context(|| format!("copying {remote} to {}", local.display()))?;
        Ok(())
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        ensure_parent(Path::new(remote))?;
        std::fs::copy(local, remote)
            .with_context(|| format!("copying {} to {remote}", local.display()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OpenSshHost – system ssh/scp clients
// ---------------------------------------------------------------------------

/// Drives the system `ssh` and `scp` binaries in batch mode, so keys and
/// agents are whatever the user's ssh client is configured with.
#[derive(Debug, Clone)]
pub struct OpenSshHost {
    /// `user@host` or an ssh_config alias.
    pub destination: String,
    pub port: Option<u16>,
    pub identity: Option<String>,
}

impl OpenSshHost {
    fn common_args(&self, cmd: &mut Command, port_flag: &str) {
        cmd.args(["-o", "BatchMode=yes"]);
        if let Some(port) = self.port {
            cmd.arg(port_flag).arg(port.to_string());
        }
        if let Some(identity) = &self.identity {
            cmd.arg("-i").arg(identity);
        }
    }

    fn scp(&self, from: &str, to: &str) -> Result<()> {
        let mut cmd = Command::new("scp");
        cmd.arg("-q");
        self.common_args(&mut cmd, "-P");
        let output = cmd
            .arg(from)
            .arg(to)
            .stdin(Stdio::null())
            .output()
            .context("running scp")?;

        if !output.status.success() {
            bail!(
                "scp {from} {to} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn remote_spec(&self, path: &str) -> String {
        format!("{}:{}", self.destination, path)
    }
}

impl RemoteHost for OpenSshHost {
    fn execute(&self, command: &str) -> Result<CommandOutput> {
        let mut cmd = Command::new("ssh");
        self.common_args(&mut cmd, "-p");
        let output = cmd
            .arg(&self.destination)
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("ssh {} `{command}`", self.destination))?;
        Ok(captured(output))
    }

    fn download(&self, remote: &str, local: &Path) -> Result<()> {
        ensure_parent(local)?;
        self.scp(&self.remote_spec(remote), &local.display().to_string())
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        self.scp(&local.display().to_string(), &self.remote_spec(remote))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn quoting_survives_the_shell() {
        let out = LocalHost
            .execute(&format!("printf %s {}", shell_quote("it's a \"path\" $HOME")))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "it's a \"path\" $HOME");
    }

    #[test]
    fn failing_command_reports_status() {
        let out = LocalHost.execute("exit 3").unwrap();
        assert_eq!(out.status, Some(3));
        assert!(!out.success());
    }

    #[test]
    fn local_transfer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.csv");
        std::fs::write(&src, "a\n1\n").unwrap();

        let staged = dir.path().join("stage/one/src.csv");
        LocalHost.download(src.to_str().unwrap(), &staged).unwrap();
        assert_eq!(std::fs::read_to_string(&staged).unwrap(), "a\n1\n");

        let back = dir.path().join("back.csv");
        LocalHost.upload(&staged, back.to_str().unwrap()).unwrap();
        assert!(back.is_file());
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalHost.download("/definitely/not/here.csv", &dir.path().join("x.csv")).is_err());
    }
}
