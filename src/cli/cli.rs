//! Main CLI application structure

use clap::Parser;
use fastskill_moderation::ModerationConfig;
use std::path::PathBuf;

use crate::cli::commands::{config, quality, serve, Commands};
use crate::cli::error::{CliError, CliResult};

/// FastSkill moderation service
#[derive(Debug, Parser)]
#[command(name = "fastskill-moderation")]
#[command(version = fastskill_moderation::VERSION)]
#[command(about = "Trust and moderation lifecycle for a FastSkill registry")]
#[command(long_about = "Runs the moderation service for a FastSkill registry.\n\n\
                         Configuration is layered: built-in defaults, then the file given\n\
                         with --config, then FASTSKILL_MODERATION__SECTION__KEY variables.\n\n\
                         Examples:\n\
                           fastskill-moderation serve --port 8090\n\
                           fastskill-moderation quality ./my-skill/SKILL.md --tier low\n\
                           fastskill-moderation config")]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> CliResult<()> {
        fastskill_moderation::init_logging();

        let config = ModerationConfig::load(self.config.as_deref())
            .map_err(|e| CliError::Config(e.to_string()))?;
        if self.verbose {
            match &self.config {
                Some(path) => eprintln!("Using configuration from {}", path.display()),
                None => eprintln!("Using default configuration"),
            }
        }

        match self.command {
            Commands::Serve(args) => serve::execute_serve(config, args).await,
            Commands::Quality(args) => quality::execute_quality(&config, args).await,
            Commands::Config(args) => config::execute_config(&config, args),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quality_command() {
        let cli = Cli::try_parse_from([
            "fastskill-moderation",
            "quality",
            "SKILL.md",
            "--tier",
            "trusted",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Quality(_)));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["fastskill-moderation", "config", "--config", "mod.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("mod.toml")));
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["fastskill-moderation"]).is_err());
    }
}
