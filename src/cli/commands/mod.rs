//! Command modules for CLI

pub mod config;
pub mod quality;
pub mod serve;

use clap::Subcommand;

#[derive(Debug, Subcommand)]
#[command(about = "FastSkill moderation commands")]
pub enum Commands {
    /// Run the moderation HTTP API and background task runner
    #[command(about = "Run the moderation HTTP API and background task runner")]
    Serve(serve::ServeArgs),

    /// Score a SKILL.md with the quality gate
    #[command(about = "Score a SKILL.md with the quality gate")]
    Quality(quality::QualityArgs),

    /// Print the effective configuration
    #[command(about = "Print the effective configuration as TOML")]
    Config(config::ConfigArgs),
}
