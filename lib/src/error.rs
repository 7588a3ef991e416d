use std::path::PathBuf;

use thiserror::Error;

use crate::permission::GroupPermission;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of an [`Error`], used by callers that only care
/// about which phase of a run went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Association,
    Lifecycle,
    Permission,
    Connectivity,
    Execution,
    ControlPlane,
    Io,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid target specification '{spec}': {reason}")]
    TargetSpec { spec: String, reason: String },
    #[error("step {step} is invalid: {reason}")]
    InvalidStep { step: usize, reason: String },
    #[error("step {step} targets instance index {index} but the group has only {count} instances")]
    TargetOutOfRange {
        step: usize,
        index: usize,
        count: usize,
    },

    #[error("instance group is not yet associated with ec2 instances")]
    NotAssociated,
    #[error("instance group already associated with ec2 instances")]
    AlreadyAssociated,

    #[error("no instances of group '{0}' running")]
    NotFound(String),
    #[error("instance {instance} of {groups:?} terminated: {reason}")]
    InstanceTerminated {
        instance: String,
        groups: Vec<String>,
        reason: String,
    },
    #[error("not all instances of group {groups:?} are in state 'running', some are in: {states:?}")]
    NotRunning {
        groups: Vec<String>,
        states: Vec<String>,
    },
    #[error("instance {instance} is not in state 'running' but in state '{state}'")]
    UnexpectedState { instance: String, state: String },
    #[error("instance {0} has no public address")]
    NoAddress(String),

    #[error("no permission for '{0}' set")]
    NoPermission(GroupPermission),
    #[error("found permission for protocol '{protocol}' but with diverse ports (need {needed})")]
    PermissionMismatch {
        protocol: String,
        needed: GroupPermission,
    },

    #[error("ssh connection to {address} failed: {reason}")]
    Connectivity { address: String, reason: String },

    #[error("{operation} failed on {address}: {reason}")]
    Execution {
        operation: String,
        address: String,
        reason: String,
    },
    #[error("local file {0} already exists and overwrite is not set")]
    LocalFileExists(PathBuf),
    #[error("task '{task}' failed: {reason}")]
    Task { task: String, reason: String },
    #[error("step {step} of group '{group}' failed")]
    Step {
        group: String,
        step: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("ec2 {operation} failed: {message}")]
    ControlPlane {
        operation: &'static str,
        message: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("error parsing json: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TargetSpec { .. }
            | Error::InvalidStep { .. }
            | Error::TargetOutOfRange { .. }
            | Error::Pattern(_)
            | Error::Serde(_) => ErrorKind::Validation,
            Error::NotAssociated | Error::AlreadyAssociated => ErrorKind::Association,
            Error::NotFound(_)
            | Error::InstanceTerminated { .. }
            | Error::NotRunning { .. }
            | Error::UnexpectedState { .. }
            | Error::NoAddress(_) => ErrorKind::Lifecycle,
            Error::NoPermission(_) | Error::PermissionMismatch { .. } => ErrorKind::Permission,
            Error::Connectivity { .. } => ErrorKind::Connectivity,
            Error::Execution { .. } | Error::LocalFileExists(_) | Error::Task { .. } => {
                ErrorKind::Execution
            }
            Error::Step { source, .. } => source.kind(),
            Error::ControlPlane { .. } => ErrorKind::ControlPlane,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn control_plane<E: std::fmt::Display>(operation: &'static str) -> impl FnOnce(E) -> Error {
        move |e| Error::ControlPlane {
            operation,
            message: e.to_string(),
        }
    }
}
