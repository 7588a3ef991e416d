use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::error::{Error, Result};
use crate::ssh::RemoteShell;
use crate::target::TargetSpec;
use crate::types::Credentials;

/// Credentials bound to the member addresses of a group at the moment the
/// handle was created. Later membership changes are not reflected.
pub struct ConnectionHandle {
    credentials: Credentials,
    addresses: Vec<String>,
    shell: Arc<dyn RemoteShell>,
}

impl ConnectionHandle {
    pub fn new(credentials: Credentials, addresses: Vec<String>, shell: Arc<dyn RemoteShell>) -> Self {
        ConnectionHandle {
            credentials,
            addresses,
            shell,
        }
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    fn resolve(&self, targets: &TargetSpec) -> Result<Vec<(usize, &str)>> {
        targets
            .resolve(self.addresses.len())
            .into_iter()
            .map(|index| match self.addresses.get(index) {
                Some(address) => Ok((index, address.as_str())),
                None => Err(Error::TargetSpec {
                    spec: targets.to_string(),
                    reason: format!("index {} but only {} addresses", index, self.addresses.len()),
                }),
            })
            .collect()
    }

    /// Runs `command` on every target in order and returns the trimmed
    /// standard output of each.
    pub async fn execute(&self, command: &str, targets: &TargetSpec) -> Result<Vec<String>> {
        let mut outputs = Vec::new();
        for (index, address) in self.resolve(targets)? {
            info!("exec on #{} {}: {}", index, address, command);
            let output = self
                .shell
                .execute_command(address, &self.credentials, command)
                .await?;
            if output.status != 0 {
                return Err(Error::Execution {
                    operation: format!("exec '{}'", command),
                    address: address.to_string(),
                    reason: format!("exit status {}: {}", output.status, output.stderr.trim()),
                });
            }
            outputs.push(output.stdout.trim().to_string());
        }
        Ok(outputs)
    }

    pub async fn upload(&self, local: &Path, remote: &str, targets: &TargetSpec) -> Result<()> {
        for (index, address) in self.resolve(targets)? {
            info!("upload to #{} {}: {} -> {}", index, address, local.display(), remote);
            self.shell
                .upload_file(address, &self.credentials, local, remote)
                .await?;
        }
        Ok(())
    }

    /// With more than one target the index of the target is appended to the
    /// local file name so downloads don't collide.
    pub async fn download(
        &self,
        remote: &str,
        local: &Path,
        overwrite: bool,
        targets: &TargetSpec,
    ) -> Result<()> {
        let resolved = self.resolve(targets)?;
        let suffixed = resolved.len() > 1;
        for (index, address) in resolved {
            let local = if suffixed {
                indexed_path(local, index)
            } else {
                local.to_path_buf()
            };
            info!("download from #{} {}: {} -> {}", index, address, remote, local.display());
            self.shell
                .download_file(address, &self.credentials, remote, &local, overwrite)
                .await?;
        }
        Ok(())
    }
}

fn indexed_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingShell};
    use pretty_assertions::assert_eq;

    fn handle(shell: &Arc<RecordingShell>, members: usize) -> ConnectionHandle {
        let addresses = (1..=members).map(|i| format!("host{}", i)).collect();
        ConnectionHandle::new(Credentials::with_key("root", "/key"), addresses, shell.clone())
    }

    #[tokio::test]
    async fn executes_on_selected_targets_in_order() {
        let shell = Arc::new(RecordingShell::default());
        shell.respond("uptime", "up\n");
        let outputs = handle(&shell, 3)
            .execute("uptime", &TargetSpec::indices(vec![2, 0]))
            .await
            .unwrap();

        assert_eq!(outputs, vec!["up".to_string(), "up".to_string()]);
        assert_eq!(
            shell.calls(),
            vec![
                Call::Exec("host1".into(), "uptime".into()),
                Call::Exec("host3".into(), "uptime".into()),
            ]
        );
    }

    #[tokio::test]
    async fn non_zero_exit_fails() {
        let shell = Arc::new(RecordingShell::default());
        shell.fail_status("false", 1);
        let err = handle(&shell, 2)
            .execute("false", &TargetSpec::All)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Execution { ref address, .. } if address == "host1"));
        assert_eq!(shell.calls().len(), 1);
    }

    #[tokio::test]
    async fn downloads_from_several_targets_get_suffixed() {
        let shell = Arc::new(RecordingShell::default());
        handle(&shell, 2)
            .download("/var/log/syslog", Path::new("syslog"), true, &TargetSpec::All)
            .await
            .unwrap();

        assert_eq!(
            shell.calls(),
            vec![
                Call::Download("host1".into(), "/var/log/syslog".into(), "syslog.0".into()),
                Call::Download("host2".into(), "/var/log/syslog".into(), "syslog.1".into()),
            ]
        );
    }

    #[tokio::test]
    async fn single_target_download_keeps_the_name() {
        let shell = Arc::new(RecordingShell::default());
        handle(&shell, 2)
            .download("/etc/hosts", Path::new("hosts"), false, &TargetSpec::indices(vec![1]))
            .await
            .unwrap();

        assert_eq!(
            shell.calls(),
            vec![Call::Download("host2".into(), "/etc/hosts".into(), "hosts".into())]
        );
    }
}
