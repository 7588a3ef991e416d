use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use std::process::Command; // Run programs

fn ec2ssh() -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("ec2ssh")?;
    cmd.env_remove("EC2SSH_GROUP")
        .env_remove("EC2SSH_USER")
        .env_remove("EC2SSH_PASSWORD")
        .env("AWS_DEFAULT_REGION", "eu-west-1");
    Ok(cmd)
}

#[test]
fn ec2ssh_without_subcommand() -> Result<(), Box<dyn std::error::Error>> {
    ec2ssh()?
        .assert()
        .failure()
        .stderr(predicate::str::contains("USAGE"));

    Ok(())
}

#[test]
fn ec2ssh_help_lists_subcommands() -> Result<(), Box<dyn std::error::Error>> {
    ec2ssh()?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("terminate"));

    Ok(())
}

#[test]
fn run_needs_a_key_or_password() -> Result<(), Box<dyn std::error::Error>> {
    ec2ssh()?
        .args(&["run", "steps.json", "--group", "web", "--user", "ubuntu"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--key-file"));

    Ok(())
}

#[test]
fn run_rejects_key_and_password_together() -> Result<(), Box<dyn std::error::Error>> {
    ec2ssh()?
        .args(&["run", "steps.json", "-g", "web", "-u", "ubuntu", "-i", "id_rsa"])
        .args(&["--password", "secret"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));

    Ok(())
}

#[test]
fn run_with_missing_script() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let script = dir.path().join("missing.json");

    ec2ssh()?
        .arg("run")
        .arg(&script)
        .args(&["--group", "web", "--user", "ubuntu", "--key-file", "id_rsa"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load script"))
        .stderr(predicate::str::contains("missing.json"));

    Ok(())
}

#[test]
fn run_with_malformed_script() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let script = dir.path().join("steps.json");
    std::fs::write(
        &script,
        r#"{"steps": [{"exec": {"command": "ls", "targets": "2-1"}}]}"#,
    )?;

    ec2ssh()?
        .arg("run")
        .arg(&script)
        .args(&["--group", "web", "--user", "ubuntu", "--password", "secret"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error parsing json"))
        .stderr(predicate::str::contains("secret").not());

    Ok(())
}
