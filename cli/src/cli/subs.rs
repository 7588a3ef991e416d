use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum SubCommands {
    Run(Run),
    List(List),
    Launch(Launch),
    Terminate(Terminate),
}

#[derive(Args)]
#[clap(about = "Run the steps of a script against the instances of a group")]
pub struct Run {
    #[clap(help = "JSON file with the steps to run", value_name = "SCRIPT")]
    pub script: String,
    #[clap(
        short,
        long,
        help = "security group of the instances",
        env = "EC2SSH_GROUP",
        value_name = "NAME"
    )]
    pub group: String,
    #[clap(short, long, help = "ssh user name", env = "EC2SSH_USER")]
    pub user: String,
    #[clap(
        short = 'i',
        long,
        help = "private key to log in with",
        value_name = "FILE",
        required_unless_present = "password",
        conflicts_with = "password"
    )]
    pub key_file: Option<String>,
    #[clap(
        long,
        help = "password to log in with (needs sshpass)",
        env = "EC2SSH_PASSWORD",
        hide_env_values = true
    )]
    pub password: Option<String>,
    #[clap(
        short,
        long,
        help = "seconds to wait for pending instances",
        default_value = "600",
        value_name = "SECS"
    )]
    pub wait: u64,
    #[clap(long, help = "keep retrying the ssh connection check for up to 5 minutes")]
    pub connect_retries: bool,
    #[clap(long, help = "use the instances of every matching reservation")]
    pub include_multiple_reservations: bool,
    #[clap(
        long,
        help = "require the security groups to allow ssh from this range",
        value_name = "CIDR"
    )]
    pub ssh_source: Option<String>,
    #[clap(
        short,
        long,
        help = "merge captured outputs into this JSON file instead of printing them",
        value_name = "FILE"
    )]
    pub outputs: Option<PathBuf>,
}

#[derive(Args)]
#[clap(about = "Show the instances of a group")]
pub struct List {
    #[clap(short, long, help = "security group of the instances", env = "EC2SSH_GROUP")]
    pub group: String,
    #[clap(short, long, help = "output as JSON")]
    pub json: bool,
}

#[derive(Args)]
#[clap(about = "Start new instances in a group")]
pub struct Launch {
    #[clap(short, long, help = "security group of the new instances", env = "EC2SSH_GROUP")]
    pub group: String,
    #[clap(long, help = "AMI to start", value_name = "AMI")]
    pub image: String,
    #[clap(long, help = "EC2 instance type", value_name = "TYPE")]
    pub instance_type: String,
    #[clap(short, long, help = "number of instances", default_value = "1")]
    pub count: i64,
    #[clap(long, help = "name of the EC2 key pair to install")]
    pub key_name: Option<String>,
    #[clap(long, help = "file with user data", value_name = "FILE")]
    pub user_data: Option<String>,
    #[clap(
        short,
        long,
        help = "seconds to wait for the instances to run",
        value_name = "SECS"
    )]
    pub wait: Option<u64>,
}

#[derive(Args)]
#[clap(about = "Terminate every instance of a group")]
pub struct Terminate {
    #[clap(short, long, help = "security group of the instances", env = "EC2SSH_GROUP")]
    pub group: String,
}
