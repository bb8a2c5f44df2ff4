//! Serve command implementation

use crate::cli::error::{CliError, CliResult};
use crate::cli::messages;
use anyhow::Context;
use clap::Args;
use fastskill_moderation::core::{
    create_blob_storage, CounterBackend, ModerationService, ServicePorts, SystemClock, TaskRunner,
    TokioScheduler,
};
use fastskill_moderation::http::ModerationServer;
use fastskill_moderation::scanners::{
    FileReputationApi, LlmJudgeApi, OpenAiJudgeClient, VirusTotalClient,
};
use fastskill_moderation::storage::MemoryRegistryStore;
use fastskill_moderation::ModerationConfig;
use std::sync::Arc;
use tracing::{info, warn};

/// Serve the moderation API
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Host to bind the server to (overrides configuration)
    #[arg(long, help = "Host to bind the server to")]
    host: Option<String>,

    /// Port to bind the server to (overrides configuration)
    #[arg(long, help = "Port to bind the server to")]
    port: Option<u16>,
}

/// Scanner clients for every scanner that is enabled and has an API key
fn scanner_clients(
    config: &ModerationConfig,
) -> (
    Option<Arc<dyn FileReputationApi>>,
    Option<Arc<dyn LlmJudgeApi>>,
) {
    let file_reputation = if config.scanners.file_reputation.enabled {
        match VirusTotalClient::from_config(&config.scanners.file_reputation) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn FileReputationApi>),
            Err(e) => {
                warn!("File reputation scanner disabled: {}", e);
                None
            }
        }
    } else {
        None
    };
    let llm_judge = if config.scanners.llm_judge.enabled {
        match OpenAiJudgeClient::from_config(&config.scanners.llm_judge) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn LlmJudgeApi>),
            Err(e) => {
                warn!("LLM judge disabled: {}", e);
                None
            }
        }
    } else {
        None
    };
    (file_reputation, llm_judge)
}

pub async fn execute_serve(config: ModerationConfig, args: ServeArgs) -> CliResult<()> {
    let host = args.host.unwrap_or_else(|| config.http.host.clone());
    let port = args.port.unwrap_or(config.http.port);

    let store = Arc::new(MemoryRegistryStore::new());
    let blobs = create_blob_storage(&config.storage)?;
    let (scheduler, rx) = TokioScheduler::new();
    let (file_reputation, llm_judge) = scanner_clients(&config);

    let service = ModerationService::new(
        ServicePorts {
            store: store.clone(),
            rate_store: store.clone(),
            counter: CounterBackend::Available(store.clone()),
            scheduler: Arc::new(scheduler),
            blobs,
            clock: Arc::new(SystemClock),
            file_reputation,
            llm_judge,
        },
        config,
    )
    .context("failed to initialize moderation service")?;
    let service = Arc::new(service);

    tokio::spawn(TaskRunner::new(rx, service.clone()).run());

    let active: Vec<&str> = service
        .context()
        .scanners
        .iter()
        .map(|s| s.as_str())
        .collect();
    println!("{}", messages::info(&format!("Scanners: {}", active.join(", "))));
    println!(
        "{}",
        messages::ok(&format!("Listening on http://{}:{}", host, port))
    );
    info!("Starting moderation server on {}:{}", host, port);

    let server = ModerationServer::new(service, &host, port).map_err(CliError::Validation)?;
    server
        .serve()
        .await
        .map_err(|e| CliError::Server(e.to_string()))?;

    Ok(())
}
