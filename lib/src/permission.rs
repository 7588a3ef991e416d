use std::fmt;

use log::{debug, info};

use crate::ec2::ControlPlane;
use crate::error::{Error, Result};
use crate::types::FirewallRule;

/// An inbound permission a security group has to grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPermission {
    pub protocol: String,
    pub from_port: i64,
    pub to_port: i64,
    /// Required source range. `None` accepts a rule from any source.
    pub source: Option<String>,
}

impl GroupPermission {
    pub fn ssh() -> Self {
        GroupPermission {
            protocol: "tcp".into(),
            from_port: 22,
            to_port: 22,
            source: None,
        }
    }

    pub fn with_source(mut self, cidr: impl Into<String>) -> Self {
        self.source = Some(cidr.into());
        self
    }

    /// Port ranges have to be identical; a rule that merely overlaps the
    /// needed range does not count.
    pub fn matches(&self, rule: &FirewallRule) -> bool {
        rule.protocol.eq_ignore_ascii_case(&self.protocol)
            && rule.from_port == Some(self.from_port)
            && rule.to_port == Some(self.to_port)
            && self
                .source
                .as_ref()
                .map_or(true, |cidr| rule.cidrs.iter().any(|c| c == cidr))
    }
}

impl fmt::Display for GroupPermission {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}-{}", self.protocol, self.from_port, self.to_port)?;
        if let Some(source) = &self.source {
            write!(f, " from {}", source)?;
        }
        Ok(())
    }
}

pub fn verify_rules(rules: &[FirewallRule], permission: &GroupPermission) -> Result<()> {
    if rules.is_empty() {
        return Err(Error::NoPermission(permission.clone()));
    }
    if rules.iter().any(|rule| permission.matches(rule)) {
        return Ok(());
    }
    Err(Error::PermissionMismatch {
        protocol: permission.protocol.clone(),
        needed: permission.clone(),
    })
}

pub async fn check_permission(
    ec2: &dyn ControlPlane,
    groups: &[String],
    permission: &GroupPermission,
) -> Result<()> {
    debug!("checking '{}' on groups {:?}", permission, groups);
    let rules = ec2.firewall_rules(groups, &permission.protocol).await?;
    verify_rules(&rules, permission)?;
    info!("groups {:?} allow '{}'", groups, permission);
    Ok(())
}
