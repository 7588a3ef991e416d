use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use async_trait::async_trait;
use execute::Execute as _;
use log::info;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::operation::{Download, Execute, RemoteOperation, Upload};
use crate::orchestrator::{ExternalTask, Step};

/// A program run on the local machine as part of a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl LocalCommand {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

fn handle_command_error(task: String, mut command: Command) -> Result<()> {
    info!("run: {:?}", command);
    command.stderr(Stdio::piped());

    let failed = |reason: String| Error::Task {
        task: task.clone(),
        reason,
    };
    let output = command
        .execute_output()
        .map_err(|e| failed(e.to_string()))?;
    match output.status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(failed(format!(
            "exit status {}: {}",
            code,
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        None => Err(failed("interrupted".to_string())),
    }
}

#[async_trait]
impl ExternalTask for LocalCommand {
    fn name(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    async fn perform(&self) -> Result<()> {
        let task = self.name();
        let command = self.command();
        tokio::task::spawn_blocking(move || handle_command_error(task, command))
            .await
            .map_err(|e| Error::Task {
                task: self.name(),
                reason: e.to_string(),
            })?
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ScriptStep {
    Exec(Execute),
    Upload(Upload),
    Download(Download),
    Local(LocalCommand),
}

impl From<ScriptStep> for Step {
    fn from(step: ScriptStep) -> Self {
        match step {
            ScriptStep::Exec(op) => Step::Remote(RemoteOperation::Execute(op)),
            ScriptStep::Upload(op) => Step::Remote(RemoteOperation::Upload(op)),
            ScriptStep::Download(op) => Step::Remote(RemoteOperation::Download(op)),
            ScriptStep::Local(cmd) => Step::Task(Box::new(cmd)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Script {
    steps: Vec<ScriptStep>,
}

/// Reads a sequence from its JSON form:
///
/// ```json
/// {"steps": [
///   {"exec": {"command": "hostname", "output": "h", "targets": "0-1"}},
///   {"upload": {"local": "dist.tar", "remote": "/tmp/dist.tar"}},
///   {"download": {"remote": "/var/log/app.log", "local": "app.log", "overwrite": true}},
///   {"local": {"program": "make", "args": ["dist"]}}
/// ]}
/// ```
pub fn parse(json: &str) -> Result<Vec<Step>> {
    let script: Script = serde_json::from_str(json)?;
    Ok(script.steps.into_iter().map(Step::from).collect())
}

pub fn load(path: &Path) -> Result<Vec<Step>> {
    parse(&fs::read_to_string(path)?)
}
