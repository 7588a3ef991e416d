//! Lifecycle management for groups of EC2 instances and ordered remote
//! command sequences run against them over ssh.

pub mod connection;
pub mod ec2;
pub mod error;
pub mod group;
pub mod operation;
pub mod orchestrator;
pub mod permission;
pub mod poll;
pub mod script;
pub mod ssh;
pub mod target;
pub mod types;
pub mod vars;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::ConnectionHandle;
pub use ec2::{ControlPlane, RusotoEc2};
pub use error::{Error, ErrorKind, Result};
pub use group::{Ec2InstanceGroup, InstanceGroup};
pub use operation::RemoteOperation;
pub use orchestrator::{ExternalTask, Orchestrator, RunOptions, Step};
pub use ssh::{OpenSsh, RemoteShell};
pub use target::TargetSpec;
pub use types::{Credentials, Instance, InstanceState, LaunchSpec, Reservation};
pub use vars::OutputBindings;
