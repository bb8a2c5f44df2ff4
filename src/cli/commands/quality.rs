//! Quality command implementation

use crate::cli::error::{CliError, CliResult};
use crate::cli::messages;
use clap::{Args, ValueEnum};
use fastskill_moderation::core::quality::{evaluate, normalize_body, QualityDecision};
use fastskill_moderation::core::trust::TrustTier;
use fastskill_moderation::ModerationConfig;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TierArg {
    Low,
    Trusted,
}

impl From<TierArg> for TrustTier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Low => TrustTier::Low,
            TierArg::Trusted => TrustTier::Trusted,
        }
    }
}

#[derive(Debug, Args)]
pub struct QualityArgs {
    /// SKILL.md to evaluate
    pub file: PathBuf,

    /// Publisher trust tier to evaluate for
    #[arg(long, value_enum, default_value = "low")]
    pub tier: TierArg,

    /// Similar skills the publisher created recently
    #[arg(long, default_value = "0")]
    pub similar: u32,

    /// Print the full assessment as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute_quality(config: &ModerationConfig, args: QualityArgs) -> CliResult<()> {
    let raw = tokio::fs::read_to_string(&args.file).await?;
    let body = normalize_body(&raw);
    let assessment = evaluate(&body, args.tier.into(), args.similar, &config.quality);

    if args.json {
        let rendered = serde_json::to_string_pretty(&assessment)
            .map_err(|e| CliError::Validation(e.to_string()))?;
        println!("{}", rendered);
    } else {
        let summary = format!(
            "{}: {} (score {}, {} words, {} headings, {} list items, {} template markers)",
            args.file.display(),
            assessment.decision.as_str(),
            assessment.score,
            assessment.signals.effective_words(),
            assessment.signals.heading_count,
            assessment.signals.bullet_count,
            assessment.signals.template_marker_hits,
        );
        match assessment.decision {
            QualityDecision::Pass => println!("{}", messages::ok(&summary)),
            QualityDecision::Quarantine => println!("{}", messages::warning(&summary)),
            QualityDecision::Reject => println!("{}", messages::error(&summary)),
        }
    }

    if assessment.decision == QualityDecision::Reject {
        return Err(CliError::QualityRejected(format!(
            "{} scored {}",
            args.file.display(),
            assessment.score
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fastskill_moderation::test_utils::{sample_skill_md, spam_skill_md};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_quality_passes_sample() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("SKILL.md");
        std::fs::write(&path, sample_skill_md("pdf-tools")).unwrap();

        let args = QualityArgs {
            file: path,
            tier: TierArg::Low,
            similar: 0,
            json: false,
        };
        execute_quality(&ModerationConfig::default(), args)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_quality_rejects_spam() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("SKILL.md");
        std::fs::write(&path, spam_skill_md()).unwrap();

        let args = QualityArgs {
            file: path,
            tier: TierArg::Trusted,
            similar: 0,
            json: true,
        };
        let err = execute_quality(&ModerationConfig::default(), args)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
