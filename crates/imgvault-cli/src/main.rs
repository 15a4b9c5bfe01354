//! imgvault CLI: upload, deliver and age generated images from the terminal.
//!
//! Storage, CDN and lifecycle settings come from the environment (see `.env`).

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use imgvault_cli::{
    ticks_for_days, CommandFailure, FetchOutput, ReferenceOutput, SimulationOutput, SweepOutput,
    UploadOutput,
};
use imgvault_core::{Clock, Config, EngineError, ManualClock, RawImage, SystemClock};
use imgvault_infra::{init_telemetry, shutdown_telemetry};
use imgvault_services::{
    Access, Delivery, LifecycleManager, LifecycleScheduler, RetrievalCoordinator,
    UploadCoordinator, UploadOptions,
};
use imgvault_storage::{create_store, ImageStore};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "imgvault", about = "Generated image storage and delivery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize and store an image for an assignment
    Upload {
        /// Path to the image file
        file: PathBuf,
        /// Assignment identifier the image belongs to
        #[arg(long)]
        assignment: String,
        /// Exempt the object from archival and expiry
        #[arg(long)]
        permanent: bool,
        /// Content type to record when the bytes are not a recognized image
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Print a delivery URL for a stored key
    Resolve {
        /// Object key, e.g. generated_images/42.webp
        key: String,
        /// Sign a store URL even when a CDN is configured
        #[arg(long)]
        direct: bool,
    },
    /// Download an object's bytes
    Fetch {
        /// Object key
        key: String,
        /// Write the bytes to this path
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete an object by key, or every object of an assignment
    Delete {
        /// Object key or assignment identifier
        target: String,
    },
    /// Set or clear the permanent flag on an object
    Tag {
        /// Object key
        key: String,
        #[arg(long, action = ArgAction::Set)]
        permanent: bool,
    },
    /// Run one lifecycle sweep now
    Sweep,
    /// Run the lifecycle scheduler until interrupted
    RunLifecycle {
        /// Replay this many days on a simulated clock instead. Transitions are applied
        /// to the configured store.
        #[arg(long)]
        simulate_days: Option<u32>,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_telemetry(config.log_format(), config.environment())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let store = create_store(&config)
        .await
        .context("Failed to initialize image store")?;

    let outcome = run(cli.command, &config, store).await;
    shutdown_telemetry().await;

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(failure) => {
            print_json(&failure.report)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(
    command: Commands,
    config: &Config,
    store: Arc<dyn ImageStore>,
) -> Result<(), CommandFailure> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match command {
        Commands::Upload {
            file,
            assignment,
            permanent,
            content_type,
        } => {
            let data = tokio::fs::read(&file).await.map_err(|e| {
                EngineError::InvalidInput(format!("cannot read {}: {}", file.display(), e))
            })?;
            let mut raw = RawImage::new(data);
            if let Some(content_type) = content_type {
                raw = raw.with_content_type(content_type);
            }

            store.check_access().await.map_err(EngineError::from)?;
            let uploader = UploadCoordinator::from_config(store, config, clock);
            let receipt = uploader
                .upload_with(raw, &assignment, UploadOptions { permanent })
                .await?;
            emit(&UploadOutput::from(&receipt))
        }
        Commands::Resolve { key, direct } => {
            let access = if direct { Access::Direct } else { Access::Auto };
            let retrieval = RetrievalCoordinator::from_config(store, config, clock);
            let reference = retrieval.resolve_with(&key, access).await?;
            emit(&ReferenceOutput::from(reference))
        }
        Commands::Fetch { key, out } => {
            let retrieval = RetrievalCoordinator::from_config(store, config, clock);
            let delivery = retrieval.fetch(&key).await?;

            let mut written_to = None;
            if let (Delivery::Bytes { bytes, .. }, Some(path)) = (&delivery, out) {
                tokio::fs::write(&path, bytes).await.map_err(|e| {
                    EngineError::InvalidInput(format!("cannot write {}: {}", path.display(), e))
                })?;
                written_to = Some(path.display().to_string());
            }
            emit(&FetchOutput::new(&key, &delivery, written_to))
        }
        Commands::Delete { target } => {
            let uploader = UploadCoordinator::from_config(store, config, clock);
            let deleted = uploader.delete(&target).await?;
            emit(&serde_json::json!({ "deleted": deleted }))
        }
        Commands::Tag { key, permanent } => {
            let uploader = UploadCoordinator::from_config(store, config, clock);
            let stored = uploader.set_permanent(&key, permanent).await?;
            emit(&stored)
        }
        Commands::Sweep => {
            let manager = LifecycleManager::from_config(store, config, clock);
            let report = manager.sweep().await?;
            emit(&SweepOutput::from(&report))
        }
        Commands::RunLifecycle { simulate_days } => {
            let interval = config.lifecycle().sweep_interval;
            match simulate_days {
                Some(days) => {
                    let manual = Arc::new(ManualClock::new(clock.now()));
                    let manager = Arc::new(LifecycleManager::from_config(
                        store,
                        config,
                        manual.clone(),
                    ));
                    let scheduler = LifecycleScheduler::new(manager, interval, manual.clone());
                    let reports = scheduler.run_ticks(ticks_for_days(days, interval)).await;
                    emit(&SimulationOutput::new(days, manual.now(), &reports))
                }
                None => {
                    let manager = Arc::new(LifecycleManager::from_config(store, config, clock.clone()));
                    let scheduler = Arc::new(LifecycleScheduler::new(manager, interval, clock));
                    let handle = scheduler.start();

                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "Failed to listen for shutdown signal");
                    }
                    handle.shutdown().await;
                    Ok(())
                }
            }
        }
    }
}

fn emit(value: &impl Serialize) -> Result<(), CommandFailure> {
    print_json(value).map_err(|e| {
        CommandFailure::from(EngineError::Configuration(format!("cannot print output: {}", e)))
    })
}
