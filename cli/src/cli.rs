pub mod opts;
pub mod subs;

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use ec2ssh_lib::{
    permission::GroupPermission, script, ControlPlane, Credentials, Instance, InstanceGroup,
    InstanceState, LaunchSpec, OpenSsh, Orchestrator, OutputBindings, Reservation, RunOptions,
    RusotoEc2,
};
use log::*;
use prettytable::{cell, row, Table};
use rusoto_core::Region;
use std::collections::BTreeMap;
use std::{fs, io, path::Path, path::PathBuf, sync::Arc, time::Duration};

use subs::{Launch, List, Run, Terminate};

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn credentials(sub: &Run) -> Result<Credentials> {
    match (&sub.key_file, &sub.password) {
        (Some(key), _) => Ok(Credentials::with_key(&sub.user, expand(key))),
        (None, Some(password)) => Ok(Credentials::with_password(&sub.user, password)),
        (None, None) => anyhow::bail!("either --key-file or --password is required"),
    }
}

fn ec2(region: Region) -> Arc<RusotoEc2> {
    Arc::new(RusotoEc2::new(region))
}

pub(crate) async fn run(sub: Run, region: Region) -> Result<()> {
    let path = expand(&sub.script);
    let sequence = script::load(&path)
        .with_context(|| format!("failed to load script '{}'", path.display()))?;
    let credentials = credentials(&sub)?;

    let options = RunOptions {
        wait_timeout: Duration::from_secs(sub.wait),
        connect_retries: sub.connect_retries,
        include_multiple_reservations: sub.include_multiple_reservations,
    };
    let mut group = options.instance_group(ec2(region), Arc::new(OpenSsh::default()));
    if let Some(cidr) = &sub.ssh_source {
        group = group.permission(GroupPermission::ssh().with_source(cidr));
    }
    let orchestrator = Orchestrator::new(group, options);

    let bindings = orchestrator
        .run(&sequence, &sub.group, credentials)
        .await
        .with_context(|| format!("running '{}' on group '{}' failed", path.display(), sub.group))?;

    match sub.outputs {
        Some(outputs) => write_outputs(&outputs, &bindings),
        None => {
            for (name, value) in bindings.iter() {
                println!("{}={}", name, value);
            }
            Ok(())
        }
    }
}

fn write_outputs(path: &Path, bindings: &OutputBindings) -> Result<()> {
    let mut properties: BTreeMap<String, String> = if path.exists() {
        let existing = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&existing)
            .with_context(|| format!("{} is not a JSON object of strings", path.display()))?
    } else {
        BTreeMap::new()
    };
    bindings.publish_into(&mut properties);

    let json = serde_json::to_string_pretty(&properties)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    info!("wrote {} outputs to {}", bindings.len(), path.display());
    Ok(())
}

async fn all_reservations(ec2: &dyn ControlPlane, group: &str) -> Result<Vec<Reservation>> {
    let states = [
        InstanceState::Pending,
        InstanceState::Running,
        InstanceState::Other("shutting-down".into()),
        InstanceState::Other("stopping".into()),
        InstanceState::Other("stopped".into()),
    ];
    Ok(ec2
        .find_reservations(group, &states)
        .await
        .with_context(|| format!("failed to look up instances of group '{}'", group))?)
}

pub(crate) async fn list(sub: List, region: Region) -> Result<()> {
    let ec2 = ec2(region);
    let instances: Vec<Instance> = all_reservations(ec2.as_ref(), &sub.group)
        .await?
        .into_iter()
        .flat_map(|r| r.instances)
        .collect();

    if sub.json {
        let stdout = io::stdout();
        let handle = stdout.lock();
        serde_json::to_writer_pretty(handle, &instances)?;
    } else {
        print_instances(&instances);
    }
    Ok(())
}

pub(crate) async fn launch(sub: Launch, region: Region) -> Result<()> {
    let user_data = match &sub.user_data {
        Some(file) => {
            let file = expand(file);
            Some(
                fs::read_to_string(&file)
                    .with_context(|| format!("failed to read user data {}", file.display()))?,
            )
        }
        None => None,
    };
    let spec = LaunchSpec {
        image_id: sub.image,
        instance_type: Some(sub.instance_type),
        key_name: sub.key_name,
        security_groups: vec![sub.group],
        min_count: sub.count,
        max_count: sub.count,
        user_data,
    };

    let group = RunOptions::default().instance_group(ec2(region), Arc::new(OpenSsh::default()));
    let reservation = group
        .launch(&spec, sub.wait.map(Duration::from_secs))
        .await
        .context("failed to launch instances")?;

    println!("reservation {}", reservation.id);
    print_instances(&reservation.instances);
    Ok(())
}

pub(crate) async fn terminate(sub: Terminate, region: Region) -> Result<()> {
    let ec2 = ec2(region);
    let instances: Vec<Instance> = all_reservations(ec2.as_ref(), &sub.group)
        .await?
        .into_iter()
        .flat_map(|r| r.instances)
        .collect();
    if instances.is_empty() {
        warn!("group '{}' has no instances to terminate", sub.group);
        return Ok(());
    }

    let group = RunOptions::default().instance_group(ec2, Arc::new(OpenSsh::default()));
    group
        .attach_by_reservation(&Reservation {
            id: sub.group.clone(),
            instances,
        })
        .await?;
    let count = group
        .terminate()
        .await
        .with_context(|| format!("failed to terminate group '{}'", sub.group))?;
    println!("{} instances of '{}' are shutting down", count, sub.group);
    Ok(())
}

fn colored_state(state: &InstanceState) -> ColoredString {
    match state {
        InstanceState::Running => state.name().green(),
        InstanceState::Pending => state.name().yellow(),
        InstanceState::Terminated => state.name().red(),
        InstanceState::Other(name) => name.as_str().normal(),
    }
}

fn print_instances(instances: &[Instance]) {
    let mut instance_table = Table::new();
    instance_table.add_row(row!["ID", "State", "Address", "Groups"]);

    for instance in instances {
        instance_table.add_row(row![
            instance.id,
            colored_state(&instance.state),
            instance.address().unwrap_or("-"),
            instance.security_groups.join(",")
        ]);
    }

    instance_table.printstd();
}
