//! Remote command execution over the system `ssh` client, plus per-machine
//! key generation through `ssh-keygen`.

use anyhow::{Context, Result};
use hubfleet_common::poll::{poll_until, Attempt, PollPolicy};
use hubfleet_common::Secret;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Freshly minted key pair. The private half is OpenSSH PEM text.
pub struct KeyPair {
    pub private_key: Secret<String>,
    pub public_key: String,
}

pub async fn generate_key_pair(comment: &str) -> Result<KeyPair> {
    let dir = tempfile::tempdir().context("create temp dir for ssh-keygen")?;
    let key_path = dir.path().join("id_ed25519");

    let output = Command::new("ssh-keygen")
        .args(["-q", "-t", "ed25519", "-N", "", "-C", comment, "-f"])
        .arg(&key_path)
        .stdin(Stdio::null())
        .output()
        .await
        .context("spawn ssh-keygen")?;
    if !output.status.success() {
        anyhow::bail!(
            "ssh-keygen failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let private_key = tokio::fs::read_to_string(&key_path)
        .await
        .context("read generated private key")?;
    let public_key = tokio::fs::read_to_string(key_path.with_extension("pub"))
        .await
        .context("read generated public key")?;

    Ok(KeyPair {
        private_key: Secret::new(private_key),
        public_key: public_key.trim().to_string(),
    })
}

/// Quote a value for a POSIX shell command line.
pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

fn tail_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[derive(Debug, Clone)]
pub struct SshRunner {
    pub user: String,
    /// Retry policy for the first successful connection.
    pub connect: PollPolicy,
    /// Ceiling for the script itself once connected.
    pub command_timeout: Duration,
}

impl SshRunner {
    pub fn new(user: impl Into<String>, connect: PollPolicy, command_timeout: Duration) -> Self {
        Self {
            user: user.into(),
            connect,
            command_timeout,
        }
    }

    fn base_command(&self, key_path: &std::path::Path, address: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(key_path)
            .args([
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-o",
                "LogLevel=ERROR",
            ])
            .arg(format!("{}@{}", self.user, address))
            .kill_on_drop(true);
        cmd
    }

    /// Pipe `script` to `bash -s` on the remote host with the given positional
    /// arguments and return its stdout. Arguments are never logged.
    pub async fn run_script(
        &self,
        address: &str,
        key: &Secret<String>,
        script: &str,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<String> {
        // NamedTempFile is created 0600, which ssh insists on for identity files.
        let mut key_file = tempfile::NamedTempFile::new().context("create identity file")?;
        key_file
            .write_all(key.expose().as_bytes())
            .context("write identity file")?;
        key_file.flush().context("flush identity file")?;
        let key_path = key_file.path().to_path_buf();

        poll_until(self.connect, cancel, || {
            let mut probe = self.base_command(&key_path, address);
            async move {
                match probe.arg("true").stdin(Stdio::null()).output().await {
                    Ok(out) if out.status.success() => Attempt::Ready(()),
                    Ok(out) => Attempt::Pending(format!(
                        "ssh {}: {}",
                        out.status,
                        tail_str(String::from_utf8_lossy(&out.stderr).trim(), 500)
                    )),
                    Err(e) => Attempt::Abort(format!("cannot spawn ssh: {e}")),
                }
            }
        })
        .await
        .with_context(|| format!("could not connect to {address} over ssh"))?;

        let remote = std::iter::once("bash -s --".to_string())
            .chain(args.iter().map(|a| sh_quote(a)))
            .collect::<Vec<_>>()
            .join(" ");

        let mut child = self
            .base_command(&key_path, address)
            .arg(remote)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawn ssh")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .context("send script over ssh")?;
        }

        let output = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("remote command on {address} cancelled by shutdown"),
            res = tokio::time::timeout(self.command_timeout, child.wait_with_output()) => match res {
                Ok(out) => out.context("wait for ssh")?,
                Err(_) => anyhow::bail!(
                    "remote command on {address} timed out after {:?}",
                    self.command_timeout
                ),
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "remote command on {address} failed ({}): {}",
                output.status,
                tail_str(stderr.trim(), 2000)
            );
        }
        Ok(stdout)
    }
}
