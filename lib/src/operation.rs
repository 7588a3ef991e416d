use std::fmt;
use std::path::PathBuf;

use log::info;
use serde::Deserialize;

use crate::connection::ConnectionHandle;
use crate::error::{Error, Result};
use crate::target::TargetSpec;
use crate::vars::OutputBindings;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Execute {
    pub command: String,
    /// Variable the trimmed standard output is bound to.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub targets: TargetSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Upload {
    pub local: PathBuf,
    pub remote: String,
    #[serde(default)]
    pub targets: TargetSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Download {
    pub remote: String,
    pub local: PathBuf,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub targets: TargetSpec,
}

/// An action against some members of a group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteOperation {
    #[serde(rename = "exec")]
    Execute(Execute),
    Upload(Upload),
    Download(Download),
}

impl RemoteOperation {
    pub fn exec(command: impl Into<String>) -> Self {
        RemoteOperation::Execute(Execute {
            command: command.into(),
            output: None,
            targets: TargetSpec::All,
        })
    }

    pub fn upload(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        RemoteOperation::Upload(Upload {
            local: local.into(),
            remote: remote.into(),
            targets: TargetSpec::All,
        })
    }

    pub fn download(remote: impl Into<String>, local: impl Into<PathBuf>) -> Self {
        RemoteOperation::Download(Download {
            remote: remote.into(),
            local: local.into(),
            overwrite: false,
            targets: TargetSpec::All,
        })
    }

    /// Binds the output of an [`Execute`]; other kinds ignore it.
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        if let RemoteOperation::Execute(exec) = &mut self {
            exec.output = Some(name.into());
        }
        self
    }

    pub fn with_targets(mut self, spec: TargetSpec) -> Self {
        match &mut self {
            RemoteOperation::Execute(op) => op.targets = spec,
            RemoteOperation::Upload(op) => op.targets = spec,
            RemoteOperation::Download(op) => op.targets = spec,
        }
        self
    }

    pub fn targets(&self) -> &TargetSpec {
        match self {
            RemoteOperation::Execute(op) => &op.targets,
            RemoteOperation::Upload(op) => &op.targets,
            RemoteOperation::Download(op) => &op.targets,
        }
    }

    /// Checks the declaration of step number `step` against a group of
    /// `member_count` instances without touching anything remote.
    pub fn verify(&self, step: usize, member_count: usize) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidStep {
            step,
            reason: reason.to_string(),
        };
        match self {
            RemoteOperation::Execute(op) => {
                if op.command.trim().is_empty() {
                    return Err(invalid("no command given"));
                }
                if let Some(output) = &op.output {
                    if output.trim().is_empty() {
                        return Err(invalid("output variable name is empty"));
                    }
                }
            }
            RemoteOperation::Upload(Upload { local, remote, .. })
            | RemoteOperation::Download(Download { local, remote, .. }) => {
                if local.as_os_str().is_empty() {
                    return Err(invalid("no local file given"));
                }
                if remote.trim().is_empty() {
                    return Err(invalid("no remote file given"));
                }
            }
        }

        if let Some(index) = self.targets().max_index() {
            if index >= member_count {
                return Err(Error::TargetOutOfRange {
                    step,
                    index,
                    count: member_count,
                });
            }
        }
        Ok(())
    }

    /// Runs the operation through `handle`. Earlier bindings are substituted
    /// into an exec command and its output, if named, is bound afterwards.
    pub async fn perform(
        &self,
        handle: &ConnectionHandle,
        bindings: &mut OutputBindings,
    ) -> Result<()> {
        match self {
            RemoteOperation::Execute(op) => {
                let command = bindings.substitute(&op.command)?;
                let outputs = handle.execute(&command, &op.targets).await?;
                if let Some(name) = &op.output {
                    let value = outputs.join("\n");
                    info!("{} = '{}'", name, value);
                    bindings.insert(name.as_str(), value);
                }
                Ok(())
            }
            RemoteOperation::Upload(op) => handle.upload(&op.local, &op.remote, &op.targets).await,
            RemoteOperation::Download(op) => {
                handle
                    .download(&op.remote, &op.local, op.overwrite, &op.targets)
                    .await
            }
        }
    }
}

impl fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RemoteOperation::Execute(op) => write!(f, "exec '{}' on {}", op.command, op.targets),
            RemoteOperation::Upload(op) => write!(
                f,
                "upload {} -> {} on {}",
                op.local.display(),
                op.remote,
                op.targets
            ),
            RemoteOperation::Download(op) => write!(
                f,
                "download {} -> {} from {}",
                op.remote,
                op.local.display(),
                op.targets
            ),
        }
    }
}
