use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use claim_workflow::services::controller::{AnalysisOutcome, UploadOutcome};
use claim_workflow::utils::validation::{format_file_size, validate_file};
use claim_workflow::{
    ConsoleRenderer, EffectSink, HttpTransport, TracingSink, UploadFile, UploadStep,
    UploadWorkflowController, WorkflowConfig, WorkflowError,
};
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "claim-workflow", version, about = "Insurance claim document workflow")]
struct Cli {
    /// Backend base URL (overrides WORKFLOW_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check files against the upload limits without sending them
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show which documents the server already holds
    Status,
    /// Upload the missing documents and start the analysis
    Run {
        #[arg(long)]
        requirements: Option<PathBuf>,
        #[arg(long)]
        claim: Option<PathBuf>,
        #[arg(long)]
        analysis: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claim_workflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = WorkflowConfig::from_env();
    if let Some(base_url) = cli.base_url {
        config = config.with_base_url(base_url);
    }

    match cli.command {
        Command::Validate { files } => validate(&config, files).await,
        Command::Status => status(config).await,
        Command::Run {
            requirements,
            claim,
            analysis,
        } => run(config, requirements, claim, &analysis).await,
    }
}

fn controller(
    config: WorkflowConfig,
    sink: Arc<dyn EffectSink>,
) -> anyhow::Result<UploadWorkflowController> {
    info!(
        "🛡️  Workflow Config: Backend={}, Max Size={}, Timeout={}ms, Native Progress={}",
        config.base_url,
        format_file_size(config.max_file_size),
        config.upload_timeout_ms,
        config.native_progress
    );
    let transport = HttpTransport::new(&config)?;
    Ok(UploadWorkflowController::new(config, Arc::new(transport), sink))
}

async fn validate(config: &WorkflowConfig, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let constraints = config.constraints();
    let mut invalid = 0;

    for path in files {
        let file = UploadFile::from_path(&path).await?;
        let result = validate_file(Some(&file), &constraints);
        if result.ok {
            println!("✅ {} ({})", path.display(), format_file_size(file.size()));
        } else {
            invalid += 1;
            println!(
                "❌ {} [{}] {}",
                path.display(),
                result.reason.code(),
                result.reason
            );
        }
    }

    if invalid > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn status(config: WorkflowConfig) -> anyhow::Result<()> {
    // Only the summary goes to stdout
    let controller = controller(config, Arc::new(TracingSink))?;
    let snapshot = controller
        .rehydrate()
        .await
        .context("Failed to load workflow state")?;

    let state = controller.state().await;
    println!(
        "Requirements document: {}",
        snapshot.requirements_doc_id.as_deref().unwrap_or("missing")
    );
    println!(
        "Claim document:        {}",
        snapshot.claim_doc_id.as_deref().unwrap_or("missing")
    );
    println!("Next: {}", state.current_step());
    Ok(())
}

async fn run(
    config: WorkflowConfig,
    requirements: Option<PathBuf>,
    claim: Option<PathBuf>,
    analysis_type: &str,
) -> anyhow::Result<()> {
    info!("🚀 Starting claim workflow...");
    let controller = controller(config, Arc::new(ConsoleRenderer::new()))?;

    // Documents uploaded in an earlier session count as done
    if let Err(e) = controller.rehydrate().await {
        warn!("Could not load workflow state: {}", e);
    }

    for (step, path) in [
        (UploadStep::Requirements, requirements),
        (UploadStep::Claim, claim),
    ] {
        match path {
            Some(path) => {
                let file = UploadFile::from_path(&path).await?;
                upload_with_abort(&controller, step, file).await?;
            }
            None if controller.state().await.is_completed(step) => {
                info!("⏭️  {} already on the server", step.label());
            }
            None => bail!("No {} given and none on the server", step.label()),
        }
    }

    match controller.run_analysis(analysis_type).await? {
        AnalysisOutcome::Redirect { location, .. } => println!("{}", location),
        AnalysisOutcome::Ignored => bail!("Analysis is already running"),
    }
    Ok(())
}

/// Uploads `file`, aborting the transfer on Ctrl+C
async fn upload_with_abort(
    controller: &UploadWorkflowController,
    step: UploadStep,
    file: UploadFile,
) -> Result<UploadOutcome, WorkflowError> {
    let upload = controller.submit_upload(step, Some(file));
    tokio::pin!(upload);

    tokio::select! {
        outcome = &mut upload => outcome,
        _ = signal::ctrl_c() => {
            info!("⌨️  Ctrl+C received, cancelling upload...");
            controller.abort_upload();
            upload.await
        }
    }
}
