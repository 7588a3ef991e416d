use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::{net::TcpStream, process::Command, time};

use crate::error::{Error, Result};
use crate::types::{Credentials, Secret};

/// What a remote command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Remote command execution and file transfer against a single address.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn open_and_verify(
        &self,
        address: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<()>;

    async fn execute_command(
        &self,
        address: &str,
        credentials: &Credentials,
        command: &str,
    ) -> Result<CommandOutput>;

    async fn upload_file(
        &self,
        address: &str,
        credentials: &Credentials,
        local: &Path,
        remote: &str,
    ) -> Result<()>;

    async fn download_file(
        &self,
        address: &str,
        credentials: &Credentials,
        remote: &str,
        local: &Path,
        overwrite: bool,
    ) -> Result<()>;
}

/// Drives the system `ssh` and `scp` binaries. Password credentials go
/// through `sshpass`, which reads the password from `SSHPASS`.
#[derive(Debug, Clone)]
pub struct OpenSsh {
    pub port: u16,
    pub probe_interval: Duration,
}

impl Default for OpenSsh {
    fn default() -> Self {
        OpenSsh {
            port: 22,
            probe_interval: Duration::from_secs(10),
        }
    }
}

impl OpenSsh {
    fn command(&self, program: &str, credentials: &Credentials) -> Command {
        let mut cmd = match &credentials.secret {
            Secret::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg(program).env("SSHPASS", password);
                cmd
            }
            Secret::PrivateKey(key) => {
                let mut cmd = Command::new(program);
                cmd.arg("-i").arg(key).args(&["-o", "BatchMode=yes"]);
                cmd
            }
        };

        let port_flag = if program == "scp" { "-P" } else { "-p" };
        cmd.arg(port_flag).arg(self.port.to_string()).args(&[
            "-o",
            "StrictHostKeyChecking=accept-new",
            "-o",
            "ServerAliveInterval=60",
            "-o",
            "ConnectTimeout=30",
        ]);
        cmd.stdin(Stdio::null());
        cmd
    }

    async fn run(&self, mut cmd: Command) -> Result<CommandOutput> {
        debug!("run: {}", describe(&cmd));
        let output = cmd.output().await?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn transfer(&self, address: &str, mut cmd: Command, what: String) -> Result<()> {
        cmd.kill_on_drop(true);
        let output = self.run(cmd).await?;
        if output.status != 0 {
            return Err(Error::Execution {
                operation: what,
                address: address.to_string(),
                reason: format!("scp exited with {}: {}", output.status, output.stderr.trim()),
            });
        }
        Ok(())
    }
}

// Program and arguments only; the environment may carry a password.
fn describe(cmd: &Command) -> String {
    let std = cmd.as_std();
    let mut parts = vec![std.get_program().to_string_lossy().to_string()];
    parts.extend(std.get_args().map(|arg| arg.to_string_lossy().to_string()));
    parts.join(" ")
}

fn user_host(credentials: &Credentials, address: &str) -> String {
    format!("{}@{}", credentials.username, address)
}

#[async_trait]
impl RemoteShell for OpenSsh {
    async fn open_and_verify(
        &self,
        address: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<()> {
        let connectivity = |reason: String| Error::Connectivity {
            address: address.to_string(),
            reason,
        };
        let attempts = (timeout.as_millis() / self.probe_interval.as_millis().max(1)).max(1) as usize;

        let verify = async {
            wait_for_port(address, self.port, self.probe_interval, attempts).await?;

            let mut cmd = self.command("ssh", credentials);
            cmd.arg(user_host(credentials, address)).arg("true");
            cmd.kill_on_drop(true);
            let output = self.run(cmd).await?;
            if output.status != 0 {
                return Err(connectivity(output.stderr.trim().to_string()));
            }
            Ok::<(), Error>(())
        };

        match time::timeout(timeout, verify).await {
            Ok(result) => result.map_err(|e| match e {
                Error::Connectivity { .. } => e,
                other => connectivity(other.to_string()),
            }),
            Err(elapsed) => Err(connectivity(elapsed.to_string())),
        }
    }

    async fn execute_command(
        &self,
        address: &str,
        credentials: &Credentials,
        command: &str,
    ) -> Result<CommandOutput> {
        let mut cmd = self.command("ssh", credentials);
        cmd.arg(user_host(credentials, address)).arg(command);
        cmd.kill_on_drop(true);
        self.run(cmd).await
    }

    async fn upload_file(
        &self,
        address: &str,
        credentials: &Credentials,
        local: &Path,
        remote: &str,
    ) -> Result<()> {
        let mut cmd = self.command("scp", credentials);
        cmd.arg(local)
            .arg(format!("{}:{}", user_host(credentials, address), remote));
        self.transfer(address, cmd, format!("upload {} -> {}", local.display(), remote))
            .await
    }

    async fn download_file(
        &self,
        address: &str,
        credentials: &Credentials,
        remote: &str,
        local: &Path,
        overwrite: bool,
    ) -> Result<()> {
        if !overwrite && local.exists() {
            return Err(Error::LocalFileExists(local.to_path_buf()));
        }
        let mut cmd = self.command("scp", credentials);
        cmd.arg(format!("{}:{}", user_host(credentials, address), remote))
            .arg(local);
        self.transfer(address, cmd, format!("download {} -> {}", remote, local.display()))
            .await
    }
}

/// Tries to open a TCP connection to `address:port` up to `attempts` times,
/// waiting `interval` between failed attempts.
pub async fn wait_for_port(
    address: &str,
    port: u16,
    interval: Duration,
    attempts: usize,
) -> Result<()> {
    let addr = format!("{}:{}", address, port);
    let mut last_error = String::from("no attempt made");

    for attempt in 0..attempts {
        let stream = TcpStream::connect(addr.clone());
        match time::timeout(interval, stream).await {
            Ok(Ok(_)) => {
                debug!("{} accepts connections", addr);
                return Ok(());
            }
            Ok(Err(e)) => {
                info!("error while connecting to {}: {}", addr, e);
                last_error = e.to_string();
                if attempt + 1 < attempts {
                    time::sleep(interval).await;
                }
            }
            Err(e) => {
                info!("waiting for {} to respond: {}", addr, e);
                last_error = e.to_string();
            }
        }
    }

    Err(Error::Connectivity {
        address: addr,
        reason: format!("exhausted {} attempts: {}", attempts, last_error),
    })
}
