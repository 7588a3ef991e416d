use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an EC2 instance as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Terminated,
    Other(String),
}

impl InstanceState {
    pub fn name(&self) -> &str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Terminated => "terminated",
            InstanceState::Other(name) => name.as_str(),
        }
    }

    pub fn is_running(&self) -> bool {
        *self == InstanceState::Running
    }
}

impl From<&str> for InstanceState {
    fn from(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "pending" => InstanceState::Pending,
            "running" => InstanceState::Running,
            "terminated" => InstanceState::Terminated,
            other => InstanceState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub state: InstanceState,
    pub public_dns: Option<String>,
    pub public_ip: Option<String>,
    pub security_groups: Vec<String>,
    pub state_reason: Option<String>,
}

impl Instance {
    /// The address used to reach the instance over ssh: the public dns name
    /// when EC2 assigned one, the public ip otherwise.
    pub fn address(&self) -> Option<&str> {
        self.public_dns
            .as_deref()
            .filter(|dns| !dns.is_empty())
            .or_else(|| self.public_ip.as_deref().filter(|ip| !ip.is_empty()))
    }
}

/// A batch of instances started by a single run-instances request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub image_id: String,
    pub instance_type: Option<String>,
    pub key_name: Option<String>,
    pub security_groups: Vec<String>,
    pub min_count: i64,
    pub max_count: i64,
    /// Plain text, base64 encoded on launch.
    pub user_data: Option<String>,
}

/// One inbound rule of a security group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub protocol: String,
    pub from_port: Option<i64>,
    pub to_port: Option<i64>,
    pub cidrs: Vec<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    PrivateKey(PathBuf),
    Password(String),
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Secret::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
            Secret::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: Secret,
}

impl Credentials {
    pub fn with_key(username: impl Into<String>, key: impl Into<PathBuf>) -> Self {
        Credentials {
            username: username.into(),
            secret: Secret::PrivateKey(key.into()),
        }
    }

    pub fn with_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            secret: Secret::Password(password.into()),
        }
    }
}
