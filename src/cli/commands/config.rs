//! Config command implementation

use crate::cli::error::CliResult;
use crate::cli::messages;
use clap::Args;
use fastskill_moderation::ModerationConfig;

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Only validate, do not print
    #[arg(long, help = "Validate the configuration without printing it")]
    pub check: bool,
}

pub fn execute_config(config: &ModerationConfig, args: ConfigArgs) -> CliResult<()> {
    // Loading already validated it
    if args.check {
        println!("{}", messages::ok("Configuration is valid"));
        return Ok(());
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
