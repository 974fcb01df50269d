use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;

use roadmapper::anthropic::AnthropicClient;
use roadmapper::cli::{Cli, Command};
use roadmapper::config::RoadmapperConfig;
use roadmapper::job::{GenerationRequest, JobStatus, Requester};
use roadmapper::orchestrator::Pipeline;
use roadmapper::persistence::{ArtifactStore, PersistenceWriter, SqliteArtifactStore};
use roadmapper::quota::{InMemoryQuotaGate, QuotaGate};
use roadmapper::server::{self, AppState};
use roadmapper::ui::{JobProgress, show_artifact};
use roadmapper::{RoadmapperError, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RoadmapperConfig::load(cli.config.as_deref())?;
    telemetry::init(cli.verbose, config.log_json);

    match cli.command {
        Command::Serve { bind } => {
            let bind_addr = bind.unwrap_or_else(|| config.bind_addr.clone());
            let store = open_store(&config)?;
            let pipeline = Arc::new(build_pipeline(&config, store.clone())?);
            let quota: Arc<dyn QuotaGate> = Arc::new(InMemoryQuotaGate::new(
                config.user_allowance,
                config.trial_allowance,
            ));
            let state = AppState {
                pipeline,
                quota,
                store,
            };
            server::serve(state, &bind_addr)
                .await
                .with_context(|| format!("server on {bind_addr} failed"))?;
        }
        Command::Generate {
            goals,
            challenges,
            industry,
            experience_level,
            urgency,
            budget,
            requester,
        } => {
            let requester = Requester::parse(&requester)
                .with_context(|| format!("requester must be user:<id> or trial:<id>, got {requester:?}"))?;
            let request = GenerationRequest {
                goals,
                challenges,
                industry,
                experience_level,
                urgency,
                budget,
            };
            request.validate().map_err(RoadmapperError::from)?;

            let store = open_store(&config)?;
            let pipeline = Arc::new(build_pipeline(&config, store.clone())?);
            let quota = InMemoryQuotaGate::new(config.user_allowance, config.trial_allowance);
            let token = quota
                .authorize_and_debit(&requester)
                .map_err(RoadmapperError::from)?;

            let (job_id, mut events) = pipeline.spawn(request, token);
            let progress = JobProgress::start(&job_id);
            while let Some(event) = events.recv().await {
                progress.on_event(&event);
            }
            pipeline.writer().flush().await;

            let artifact = store
                .get(&job_id)
                .map_err(RoadmapperError::from)?
                .ok_or_else(|| RoadmapperError::NotFound(job_id.clone()))?;
            progress.print_artifact(&artifact);
            println!("job id: {job_id}");
            if artifact.status == JobStatus::Failed {
                bail!("roadmap generation failed");
            }
        }
        Command::Show { job_id } => {
            let store = open_store(&config)?;
            let artifact = store
                .get(&job_id)
                .map_err(RoadmapperError::from)?
                .ok_or(RoadmapperError::NotFound(job_id))?;
            show_artifact(&artifact);
        }
    }

    Ok(())
}

fn open_store(config: &RoadmapperConfig) -> Result<Arc<SqliteArtifactStore>> {
    let store = SqliteArtifactStore::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    Ok(Arc::new(store))
}

fn build_pipeline(
    config: &RoadmapperConfig,
    store: Arc<SqliteArtifactStore>,
) -> Result<Pipeline<AnthropicClient>> {
    let api_key = config.require_api_key()?.to_string();
    let client = match &config.api_base_url {
        Some(url) => AnthropicClient::with_base_url(api_key, config.model.clone(), url.clone()),
        None => AnthropicClient::new(api_key, config.model.clone()),
    }
    .map_err(RoadmapperError::from)?;
    let writer = PersistenceWriter::spawn(
        store,
        config.writer_queue_capacity,
        config.writer_concurrency,
    );
    Ok(Pipeline::new(client, config.stage_table(), writer))
}
