//! In-memory stand-ins for EC2 and ssh used by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::ec2::ControlPlane;
use crate::error::{Error, Result};
use crate::ssh::{CommandOutput, RemoteShell};
use crate::types::{Credentials, FirewallRule, Instance, InstanceState, LaunchSpec, Reservation};

pub fn instance(id: &str, group: &str, state: InstanceState) -> Instance {
    Instance {
        id: id.to_string(),
        state,
        public_dns: Some(format!("{}.compute.example", id)),
        public_ip: None,
        security_groups: vec![group.to_string()],
        state_reason: None,
    }
}

pub fn ssh_rule() -> FirewallRule {
    FirewallRule {
        protocol: "tcp".into(),
        from_port: Some(22),
        to_port: Some(22),
        cidrs: vec!["0.0.0.0/0".into()],
    }
}

#[derive(Default)]
pub struct FakeControlPlane {
    reservations: Mutex<Vec<Reservation>>,
    /// Each describe call pops one state and applies it to every instance.
    describe_states: Mutex<VecDeque<InstanceState>>,
    rules: Mutex<Vec<FirewallRule>>,
    terminated: Mutex<Vec<String>>,
    launched: Mutex<Vec<LaunchSpec>>,
    describe_calls: AtomicUsize,
    describe_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeControlPlane {
    pub fn with_group(group: &str, members: usize, state: InstanceState) -> Self {
        let fake = FakeControlPlane::default();
        fake.add_reservation(group, members, state);
        fake.rules.lock().unwrap().push(ssh_rule());
        fake
    }

    pub fn add_reservation(&self, group: &str, members: usize, state: InstanceState) -> Reservation {
        let mut reservations = self.reservations.lock().unwrap();
        let n = reservations.len();
        let reservation = Reservation {
            id: format!("r-{}", n),
            instances: (0..members)
                .map(|i| instance(&format!("i-{}{}", n, i), group, state.clone()))
                .collect(),
        };
        reservations.push(reservation.clone());
        reservation
    }

    pub fn then_states(&self, states: Vec<InstanceState>) {
        self.describe_states.lock().unwrap().extend(states);
    }

    pub fn set_rules(&self, rules: Vec<FirewallRule>) {
        *self.rules.lock().unwrap() = rules;
    }

    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.launched.lock().unwrap().clone()
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    /// The next describe call blocks until the returned gate is notified.
    pub fn hold_describe(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.describe_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn set_all(&self, state: &InstanceState) {
        for reservation in self.reservations.lock().unwrap().iter_mut() {
            for instance in reservation.instances.iter_mut() {
                instance.state = state.clone();
            }
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn find_reservations(
        &self,
        group: &str,
        states: &[InstanceState],
    ) -> Result<Vec<Reservation>> {
        let reservations = self.reservations.lock().unwrap();
        Ok(reservations
            .iter()
            .map(|r| Reservation {
                id: r.id.clone(),
                instances: r
                    .instances
                    .iter()
                    .filter(|i| i.security_groups.iter().any(|g| g == group))
                    .filter(|i| states.contains(&i.state))
                    .cloned()
                    .collect(),
            })
            .filter(|r| !r.instances.is_empty())
            .collect())
    }

    async fn describe(&self, ids: &[String]) -> Result<Vec<Instance>> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.describe_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let next = self.describe_states.lock().unwrap().pop_front();
        if let Some(state) = next {
            self.set_all(&state);
        }
        let reservations = self.reservations.lock().unwrap();
        // reversed, callers must not rely on the response order
        Ok(reservations
            .iter()
            .flat_map(|r| r.instances.iter())
            .filter(|i| ids.contains(&i.id))
            .rev()
            .cloned()
            .collect())
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<Reservation> {
        self.launched.lock().unwrap().push(spec.clone());
        let group = spec.security_groups.first().cloned().unwrap_or_default();
        Ok(self.add_reservation(&group, spec.max_count as usize, InstanceState::Pending))
    }

    async fn terminate(&self, ids: &[String]) -> Result<Vec<String>> {
        self.terminated.lock().unwrap().extend(ids.iter().cloned());
        for reservation in self.reservations.lock().unwrap().iter_mut() {
            for instance in reservation.instances.iter_mut() {
                if ids.contains(&instance.id) {
                    instance.state = InstanceState::Terminated;
                }
            }
        }
        Ok(ids.to_vec())
    }

    async fn firewall_rules(
        &self,
        _groups: &[String],
        protocol: &str,
    ) -> Result<Vec<FirewallRule>> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.protocol == protocol)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Verify(String),
    Exec(String, String),
    Upload(String, String, String),
    Download(String, String, String),
}

#[derive(Default)]
pub struct RecordingShell {
    calls: Mutex<Vec<Call>>,
    responses: Mutex<HashMap<String, CommandOutput>>,
    unreachable: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    broken_transfers: Mutex<HashSet<String>>,
    timeouts: Mutex<Vec<Duration>>,
}

impl RecordingShell {
    pub fn respond(&self, command: &str, stdout: &str) {
        self.responses.lock().unwrap().insert(
            command.to_string(),
            CommandOutput {
                status: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    pub fn fail_status(&self, command: &str, status: i32) {
        self.responses.lock().unwrap().insert(
            command.to_string(),
            CommandOutput {
                status,
                stdout: String::new(),
                stderr: "failed".to_string(),
            },
        );
    }

    pub fn unreachable(&self, address: &str) {
        self.unreachable.lock().unwrap().insert(address.to_string());
    }

    /// Verification against `address` uses up its whole timeout, then fails.
    pub fn hang(&self, address: &str) {
        self.hanging.lock().unwrap().insert(address.to_string());
    }

    /// Uploads and downloads involving `address` fail.
    pub fn fail_transfers(&self, address: &str) {
        self.broken_transfers.lock().unwrap().insert(address.to_string());
    }

    /// Timeouts handed to each verification, in call order.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than connection verification.
    pub fn operations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Verify(_)))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn transfer(&self, address: &str, what: &str) -> Result<()> {
        if self.broken_transfers.lock().unwrap().contains(address) {
            return Err(Error::Execution {
                operation: what.to_string(),
                address: address.to_string(),
                reason: "lost connection".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteShell for RecordingShell {
    async fn open_and_verify(
        &self,
        address: &str,
        _credentials: &Credentials,
        timeout: Duration,
    ) -> Result<()> {
        self.record(Call::Verify(address.to_string()));
        self.timeouts.lock().unwrap().push(timeout);
        let hangs = self.hanging.lock().unwrap().contains(address);
        if hangs {
            tokio::time::sleep(timeout).await;
        }
        if hangs || self.unreachable.lock().unwrap().contains(address) {
            return Err(Error::Connectivity {
                address: address.to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn execute_command(
        &self,
        address: &str,
        _credentials: &Credentials,
        command: &str,
    ) -> Result<CommandOutput> {
        self.record(Call::Exec(address.to_string(), command.to_string()));
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_default())
    }

    async fn upload_file(
        &self,
        address: &str,
        _credentials: &Credentials,
        local: &Path,
        remote: &str,
    ) -> Result<()> {
        self.record(Call::Upload(
            address.to_string(),
            local.display().to_string(),
            remote.to_string(),
        ));
        self.transfer(address, "upload")
    }

    async fn download_file(
        &self,
        address: &str,
        _credentials: &Credentials,
        remote: &str,
        local: &Path,
        _overwrite: bool,
    ) -> Result<()> {
        self.record(Call::Download(
            address.to_string(),
            remote.to_string(),
            local.display().to_string(),
        ));
        self.transfer(address, "download")
    }
}
