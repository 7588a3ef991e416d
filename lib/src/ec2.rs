use async_trait::async_trait;
use log::debug;
use rusoto_core::Region;
use rusoto_ec2::{
    DescribeInstancesRequest, DescribeSecurityGroupsRequest, Ec2, Ec2Client, Filter,
    RunInstancesRequest, TerminateInstancesRequest,
};

use crate::error::{Error, Result};
use crate::types::{FirewallRule, Instance, InstanceState, LaunchSpec, Reservation};

/// The parts of the EC2 api an instance group needs.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Reservations holding instances of security group `group` that are in one
    /// of `states`.
    async fn find_reservations(
        &self,
        group: &str,
        states: &[InstanceState],
    ) -> Result<Vec<Reservation>>;

    async fn describe(&self, ids: &[String]) -> Result<Vec<Instance>>;

    async fn launch(&self, spec: &LaunchSpec) -> Result<Reservation>;

    /// Returns the ids of the instances that are shutting down.
    async fn terminate(&self, ids: &[String]) -> Result<Vec<String>>;

    /// Inbound rules for `protocol` of the given security groups.
    async fn firewall_rules(&self, groups: &[String], protocol: &str)
        -> Result<Vec<FirewallRule>>;
}

pub struct RusotoEc2 {
    client: Ec2Client,
}

impl RusotoEc2 {
    pub fn new(region: Region) -> Self {
        RusotoEc2 {
            client: Ec2Client::new(region),
        }
    }

    async fn describe_instances(
        &self,
        instance_ids: Option<Vec<String>>,
        filters: Option<Vec<Filter>>,
    ) -> Result<Vec<rusoto_ec2::Reservation>> {
        let mut reservations = Vec::new();
        let mut next_token = None;
        loop {
            let request = DescribeInstancesRequest {
                instance_ids: instance_ids.clone(),
                filters: filters.clone(),
                next_token: next_token.take(),
                ..Default::default()
            };
            let response = self
                .client
                .describe_instances(request)
                .await
                .map_err(Error::control_plane("describe-instances"))?;
            reservations.extend(response.reservations.unwrap_or_default());
            match response.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => return Ok(reservations),
            }
        }
    }
}

fn filter(name: &str, values: Vec<String>) -> Filter {
    Filter {
        name: Some(name.to_string()),
        values: Some(values),
    }
}

#[async_trait]
impl ControlPlane for RusotoEc2 {
    async fn find_reservations(
        &self,
        group: &str,
        states: &[InstanceState],
    ) -> Result<Vec<Reservation>> {
        let filters = vec![
            filter("instance.group-name", vec![group.to_string()]),
            filter(
                "instance-state-name",
                states.iter().map(|s| s.name().to_string()).collect(),
            ),
        ];
        let reservations = self.describe_instances(None, Some(filters)).await?;
        debug!("group '{}' matched {} reservations", group, reservations.len());
        Ok(reservations.into_iter().map(Reservation::from).collect())
    }

    async fn describe(&self, ids: &[String]) -> Result<Vec<Instance>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let reservations = self.describe_instances(Some(ids.to_vec()), None).await?;
        Ok(reservations
            .into_iter()
            .flat_map(|r| r.instances.unwrap_or_default())
            .map(Instance::from)
            .collect())
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<Reservation> {
        let request = RunInstancesRequest {
            image_id: Some(spec.image_id.clone()),
            instance_type: spec.instance_type.clone(),
            key_name: spec.key_name.clone(),
            security_groups: Some(spec.security_groups.clone()),
            min_count: spec.min_count,
            max_count: spec.max_count,
            user_data: spec.user_data.as_ref().map(base64::encode),
            ..Default::default()
        };
        let reservation = self
            .client
            .run_instances(request)
            .await
            .map_err(Error::control_plane("run-instances"))?;
        Ok(reservation.into())
    }

    async fn terminate(&self, ids: &[String]) -> Result<Vec<String>> {
        let request = TerminateInstancesRequest {
            instance_ids: ids.to_vec(),
            dry_run: None,
        };
        let result = self
            .client
            .terminate_instances(request)
            .await
            .map_err(Error::control_plane("terminate-instances"))?;
        Ok(result
            .terminating_instances
            .unwrap_or_default()
            .into_iter()
            .filter_map(|change| change.instance_id)
            .collect())
    }

    async fn firewall_rules(
        &self,
        groups: &[String],
        protocol: &str,
    ) -> Result<Vec<FirewallRule>> {
        let request = DescribeSecurityGroupsRequest {
            filters: Some(vec![
                filter("group-name", groups.to_vec()),
                filter("ip-permission.protocol", vec![protocol.to_string()]),
            ]),
            ..Default::default()
        };
        let response = self
            .client
            .describe_security_groups(request)
            .await
            .map_err(Error::control_plane("describe-security-groups"))?;

        Ok(response
            .security_groups
            .unwrap_or_default()
            .into_iter()
            .flat_map(|group| group.ip_permissions.unwrap_or_default())
            .filter(|permission| permission.ip_protocol.as_deref() == Some(protocol))
            .map(|permission| FirewallRule {
                protocol: protocol.to_string(),
                from_port: permission.from_port,
                to_port: permission.to_port,
                cidrs: permission
                    .ip_ranges
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|range| range.cidr_ip)
                    .collect(),
            })
            .collect())
    }
}

impl From<rusoto_ec2::Instance> for Instance {
    fn from(instance: rusoto_ec2::Instance) -> Self {
        Instance {
            id: instance.instance_id.unwrap_or_default(),
            state: instance
                .state
                .and_then(|state| state.name)
                .map_or_else(|| InstanceState::Other("unknown".into()), |name| name.as_str().into()),
            public_dns: instance.public_dns_name,
            public_ip: instance.public_ip_address,
            security_groups: instance
                .security_groups
                .unwrap_or_default()
                .into_iter()
                .filter_map(|group| group.group_name)
                .collect(),
            state_reason: instance.state_transition_reason,
        }
    }
}

impl From<rusoto_ec2::Reservation> for Reservation {
    fn from(reservation: rusoto_ec2::Reservation) -> Self {
        Reservation {
            id: reservation.reservation_id.unwrap_or_default(),
            instances: reservation
                .instances
                .unwrap_or_default()
                .into_iter()
                .map(Instance::from)
                .collect(),
        }
    }
}
