use super::subs::SubCommands;
use clap::Parser;
use rusoto_core::Region;

#[derive(Parser)]
#[clap(version, about)]
pub struct Ec2Ssh {
    #[clap(
        long,
        global = true,
        help = "The AWS region of the instances",
        env = "AWS_DEFAULT_REGION",
        value_name = "REGION"
    )]
    pub region: Option<Region>,
    #[clap(subcommand)]
    pub commands: SubCommands,
}
