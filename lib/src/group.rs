use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::connection::ConnectionHandle;
use crate::ec2::ControlPlane;
use crate::error::{Error, Result};
use crate::permission::{check_permission, GroupPermission};
use crate::poll::{poll_until, Outcome, Poll, PollPolicy, DEFAULT_INTERVAL};
use crate::ssh::RemoteShell;
use crate::types::{Credentials, Instance, InstanceState, LaunchSpec, Reservation};

pub const DEFAULT_WAIT: Duration = Duration::from_secs(10 * 60);
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A named set of EC2 instances a caller works with.
///
/// A group starts out unassociated. `attach_by_name`, `attach_by_reservation`
/// and `launch` associate it with instances; `terminate` shuts those down and
/// makes the group unassociated again. Everything else requires an
/// associated group and fails with [`Error::NotAssociated`] otherwise.
#[async_trait]
pub trait InstanceGroup: Send + Sync {
    fn is_associated(&self) -> bool;

    /// Attaches to the pending or running instances of security group `name`,
    /// waiting up to `wait` for them to come up.
    async fn attach_by_name(&self, name: &str, wait: Duration) -> Result<()>;

    async fn attach_by_reservation(&self, reservation: &Reservation) -> Result<()>;

    async fn launch(&self, spec: &LaunchSpec, wait: Option<Duration>) -> Result<Reservation>;

    fn member_count(&self) -> Result<usize>;

    async fn members(&self, refresh: bool) -> Result<Arc<Vec<Instance>>>;

    /// Returns the number of instances that are shutting down.
    async fn terminate(&self) -> Result<usize>;

    async fn create_connection(&self, credentials: Credentials) -> Result<ConnectionHandle>;
}

pub struct Ec2InstanceGroup {
    ec2: Arc<dyn ControlPlane>,
    shell: Arc<dyn RemoteShell>,
    include_multiple_reservations: bool,
    connect_retries: bool,
    poll_interval: Duration,
    permission: GroupPermission,
    members: RwLock<Option<Arc<Vec<Instance>>>>,
    refreshing: Mutex<()>,
}

impl Ec2InstanceGroup {
    pub fn new(ec2: Arc<dyn ControlPlane>, shell: Arc<dyn RemoteShell>) -> Self {
        Ec2InstanceGroup {
            ec2,
            shell,
            include_multiple_reservations: false,
            connect_retries: false,
            poll_interval: DEFAULT_INTERVAL,
            permission: GroupPermission::ssh(),
            members: RwLock::new(None),
            refreshing: Mutex::new(()),
        }
    }

    /// Use instances of every matching reservation instead of only the first.
    pub fn include_multiple_reservations(mut self, include: bool) -> Self {
        self.include_multiple_reservations = include;
        self
    }

    /// Keep retrying connection verification until [`VERIFY_TIMEOUT`] instead
    /// of failing on the first refused attempt.
    pub fn connect_retries(mut self, retries: bool) -> Self {
        self.connect_retries = retries;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn permission(mut self, permission: GroupPermission) -> Self {
        self.permission = permission;
        self
    }

    fn snapshot(&self) -> Option<Arc<Vec<Instance>>> {
        match self.members.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn current(&self) -> Result<Arc<Vec<Instance>>> {
        self.snapshot().ok_or(Error::NotAssociated)
    }

    fn check_not_associated(&self) -> Result<()> {
        if self.is_associated() {
            return Err(Error::AlreadyAssociated);
        }
        Ok(())
    }

    fn store(&self, members: Option<Arc<Vec<Instance>>>) {
        match self.members.write() {
            Ok(mut guard) => *guard = members,
            Err(poisoned) => *poisoned.into_inner() = members,
        }
    }

    /// Publishes a fresh association; fails if another caller associated the
    /// group in the meantime.
    fn associate(&self, instances: Vec<Instance>) -> Result<()> {
        let mut guard = match self.members.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return Err(Error::AlreadyAssociated);
        }
        *guard = Some(Arc::new(instances));
        Ok(())
    }

    /// Re-fetches descriptions of all members and swaps them in as a whole.
    async fn refresh(&self) -> Result<Arc<Vec<Instance>>> {
        let _refreshing = self.refreshing.lock().await;
        let current = self.current()?;
        let ids: Vec<String> = current.iter().map(|i| i.id.clone()).collect();

        let mut described: HashMap<String, Instance> = self
            .ec2
            .describe(&ids)
            .await?
            .into_iter()
            .map(|i| (i.id.clone(), i))
            .collect();

        let refreshed: Vec<Instance> = current
            .iter()
            .map(|old| match described.remove(&old.id) {
                Some(new) => new,
                None => {
                    warn!("instance {} was not described, keeping its last known state", old.id);
                    old.clone()
                }
            })
            .collect();

        self.publish(&current, Arc::new(refreshed))
    }

    /// Swaps `refreshed` in only if the list it was built from is still the
    /// published one. A terminate or a new association in the meantime wins.
    fn publish(
        &self,
        base: &Arc<Vec<Instance>>,
        refreshed: Arc<Vec<Instance>>,
    ) -> Result<Arc<Vec<Instance>>> {
        let mut guard = match self.members.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(published) if Arc::ptr_eq(published, base) => {
                *guard = Some(Arc::clone(&refreshed));
                Ok(refreshed)
            }
            Some(published) => {
                debug!("group was re-associated during refresh, dropping stale descriptions");
                Ok(Arc::clone(published))
            }
            None => {
                debug!("group was terminated during refresh");
                Err(Error::NotAssociated)
            }
        }
    }

    fn group_names(instances: &[Instance]) -> Vec<String> {
        let mut names: Vec<String> = instances
            .iter()
            .flat_map(|i| i.security_groups.iter().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    async fn wait_until_running(&self, wait: Duration) -> Result<Arc<Vec<Instance>>> {
        let groups = Self::group_names(&self.current()?);
        let policy = PollPolicy::new(wait).with_interval(self.poll_interval);
        let what = format!("instances {:?} to enter 'running' mode", groups);

        let outcome = poll_until(&policy, &what, || async move {
            let members = self.refresh().await?;
            let mut unexpected = Vec::new();
            for instance in members.iter() {
                if instance.state == InstanceState::Terminated {
                    return Err(Error::InstanceTerminated {
                        instance: instance.id.clone(),
                        groups: instance.security_groups.clone(),
                        reason: instance.state_reason.clone().unwrap_or_default(),
                    });
                }
                if !instance.state.is_running() {
                    unexpected.push(instance.state.to_string());
                }
            }
            Ok(if unexpected.is_empty() {
                Poll::Ready(members)
            } else {
                Poll::Pending(unexpected)
            })
        })
        .await?;

        match outcome {
            Outcome::Ready(members) => Ok(members),
            Outcome::Expired(states) => Err(Error::NotRunning { groups, states }),
        }
    }

    async fn verify_connection(&self, address: &str, credentials: &Credentials) -> Result<()> {
        if !self.connect_retries {
            return self
                .shell
                .open_and_verify(address, credentials, VERIFY_TIMEOUT)
                .await;
        }

        // every attempt only gets what is left of the one deadline
        let end = Instant::now() + VERIFY_TIMEOUT;
        let attempt = || async move {
            let remaining = end.saturating_duration_since(Instant::now());
            match self
                .shell
                .open_and_verify(address, credentials, remaining)
                .await
            {
                Ok(()) => Ok(Poll::Ready(())),
                Err(Error::Connectivity { reason, .. }) => Ok(Poll::Pending(reason)),
                Err(other) => Err(other),
            }
        };

        match attempt().await? {
            Poll::Ready(()) => return Ok(()),
            Poll::Pending(reason) => warn!("ssh on {} not ready yet: {}", address, reason),
        }

        let policy = PollPolicy::new(end.saturating_duration_since(Instant::now()))
            .with_interval(self.poll_interval);
        let what = format!("ssh on {}", address);
        let outcome = poll_until(&policy, &what, attempt).await?;

        match outcome {
            Outcome::Ready(()) => Ok(()),
            Outcome::Expired(reason) => Err(Error::Connectivity {
                address: address.to_string(),
                reason,
            }),
        }
    }
}

#[async_trait]
impl InstanceGroup for Ec2InstanceGroup {
    fn is_associated(&self) -> bool {
        self.snapshot().is_some()
    }

    async fn attach_by_name(&self, name: &str, wait: Duration) -> Result<()> {
        self.check_not_associated()?;
        info!("connecting to instances of group '{}'", name);

        let reservations = self
            .ec2
            .find_reservations(name, &[InstanceState::Pending, InstanceState::Running])
            .await?;
        if reservations.len() > 1 && !self.include_multiple_reservations {
            warn!(
                "group '{}' spans {} reservations, using only {}",
                name,
                reservations.len(),
                reservations[0].id
            );
        }
        let take = if self.include_multiple_reservations {
            reservations.len()
        } else {
            1
        };
        let instances: Vec<Instance> = reservations
            .into_iter()
            .take(take)
            .flat_map(|r| r.instances)
            .collect();

        let first_running = match instances.first() {
            None => return Err(Error::NotFound(name.to_string())),
            Some(first) => first.state.is_running(),
        };
        self.associate(instances)?;
        if !first_running {
            self.wait_until_running(wait).await?;
        }
        Ok(())
    }

    async fn attach_by_reservation(&self, reservation: &Reservation) -> Result<()> {
        self.check_not_associated()?;
        info!("connecting to reservation '{}'", reservation.id);
        self.associate(reservation.instances.clone())?;
        self.refresh().await?;
        Ok(())
    }

    async fn launch(&self, spec: &LaunchSpec, wait: Option<Duration>) -> Result<Reservation> {
        self.check_not_associated()?;
        info!(
            "starting {} to {} instances with {} in groups {:?}...",
            spec.min_count, spec.max_count, spec.image_id, spec.security_groups
        );
        let reservation = self.ec2.launch(spec).await?;
        let ids: Vec<&str> = reservation.instances.iter().map(|i| i.id.as_str()).collect();
        info!("triggered start of {} instances: {:?}", ids.len(), ids);
        self.associate(reservation.instances.clone())?;

        let members = match wait {
            Some(wait) => {
                let members = self.wait_until_running(wait).await?;
                let addresses: Vec<&str> = members.iter().filter_map(|i| i.address()).collect();
                info!("started {} instances: {:?} / {:?}", members.len(), ids, addresses);
                members
            }
            None => self.refresh().await?,
        };

        Ok(Reservation {
            id: reservation.id,
            instances: members.as_ref().clone(),
        })
    }

    fn member_count(&self) -> Result<usize> {
        Ok(self.current()?.len())
    }

    async fn members(&self, refresh: bool) -> Result<Arc<Vec<Instance>>> {
        if refresh {
            return self.refresh().await;
        }
        self.current()
    }

    async fn terminate(&self) -> Result<usize> {
        let members = self.current()?;
        let ids: Vec<String> = members.iter().map(|i| i.id.clone()).collect();
        let terminating = self.ec2.terminate(&ids).await?;
        self.store(None);
        info!("stopped {} instances", terminating.len());
        Ok(terminating.len())
    }

    async fn create_connection(&self, credentials: Credentials) -> Result<ConnectionHandle> {
        let members = self.refresh().await?;

        let mut addresses = Vec::with_capacity(members.len());
        for instance in members.iter() {
            if !instance.state.is_running() {
                return Err(Error::UnexpectedState {
                    instance: instance.id.clone(),
                    state: instance.state.to_string(),
                });
            }
            let address = instance
                .address()
                .ok_or_else(|| Error::NoAddress(instance.id.clone()))?;
            addresses.push(address.to_string());
        }

        check_permission(
            self.ec2.as_ref(),
            &Self::group_names(&members),
            &self.permission,
        )
        .await?;

        info!("checking ssh connections of {}@{:?}", credentials.username, addresses);
        for address in &addresses {
            self.verify_connection(address, &credentials).await?;
        }

        Ok(ConnectionHandle::new(
            credentials,
            addresses,
            Arc::clone(&self.shell),
        ))
    }
}
