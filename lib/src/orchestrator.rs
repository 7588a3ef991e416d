use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info};

use crate::ec2::ControlPlane;
use crate::error::{Error, Result};
use crate::group::{Ec2InstanceGroup, InstanceGroup, DEFAULT_WAIT};
use crate::operation::RemoteOperation;
use crate::ssh::RemoteShell;
use crate::types::Credentials;
use crate::vars::OutputBindings;

/// A unit of work that runs between remote operations without touching the
/// group, such as a local build step.
#[async_trait]
pub trait ExternalTask: Send + Sync {
    fn name(&self) -> String;

    async fn perform(&self) -> Result<()>;
}

pub enum Step {
    Remote(RemoteOperation),
    Task(Box<dyn ExternalTask>),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Step::Remote(op) => fmt::Display::fmt(op, f),
            Step::Task(task) => write!(f, "task '{}'", task.name()),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Step::Remote(op) => f.debug_tuple("Remote").field(op).finish(),
            Step::Task(task) => f.debug_tuple("Task").field(&task.name()).finish(),
        }
    }
}

impl From<RemoteOperation> for Step {
    fn from(op: RemoteOperation) -> Self {
        Step::Remote(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// How long to wait for pending instances to come up.
    pub wait_timeout: Duration,
    pub connect_retries: bool,
    pub include_multiple_reservations: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            wait_timeout: DEFAULT_WAIT,
            connect_retries: false,
            include_multiple_reservations: false,
        }
    }
}

impl RunOptions {
    /// An EC2 backed group configured with these options.
    pub fn instance_group(
        &self,
        ec2: Arc<dyn ControlPlane>,
        shell: Arc<dyn RemoteShell>,
    ) -> Ec2InstanceGroup {
        Ec2InstanceGroup::new(ec2, shell)
            .connect_retries(self.connect_retries)
            .include_multiple_reservations(self.include_multiple_reservations)
    }
}

/// Runs sequences of steps against one instance group.
pub struct Orchestrator<G> {
    group: G,
    options: RunOptions,
}

impl<G: InstanceGroup> Orchestrator<G> {
    pub fn new(group: G, options: RunOptions) -> Self {
        Orchestrator { group, options }
    }

    pub fn group(&self) -> &G {
        &self.group
    }

    /// Executes `sequence` in order on the instances of `group_name` and
    /// returns what the exec steps captured.
    ///
    /// Every remote step is verified against the member count before the
    /// first one runs. A failing step aborts the run and nothing captured so
    /// far is returned.
    pub async fn run(
        &self,
        sequence: &[Step],
        group_name: &str,
        credentials: Credentials,
    ) -> Result<OutputBindings> {
        if !self.group.is_associated() {
            self.group
                .attach_by_name(group_name, self.options.wait_timeout)
                .await?;
        }

        let member_count = self.group.member_count()?;
        for (index, step) in sequence.iter().enumerate() {
            if let Step::Remote(op) = step {
                op.verify(index, member_count)?;
            }
        }

        let handle = self.group.create_connection(credentials).await?;
        info!(
            "running {} steps on {} instances of '{}'",
            sequence.len(),
            member_count,
            group_name
        );

        let mut bindings = OutputBindings::default();
        for (index, step) in sequence.iter().enumerate() {
            info!("step {}: {}", index, step);
            let result = match step {
                Step::Remote(op) => op.perform(&handle, &mut bindings).await,
                Step::Task(task) => task.perform().await,
            };
            if let Err(source) = result {
                error!("step {} of '{}' failed: {}", index, group_name, source);
                return Err(Error::Step {
                    group: group_name.to_string(),
                    step: index,
                    source: Box::new(source),
                });
            }
        }

        Ok(bindings)
    }
}
