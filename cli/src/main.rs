mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{opts::Ec2Ssh, subs::SubCommands};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let opts = Ec2Ssh::parse();
    let region = opts.region.unwrap_or_default();

    match opts.commands {
        SubCommands::Run(sub) => cli::run(sub, region).await,
        SubCommands::List(sub) => cli::list(sub, region).await,
        SubCommands::Launch(sub) => cli::launch(sub, region).await,
        SubCommands::Terminate(sub) => cli::terminate(sub, region).await,
    }
}
