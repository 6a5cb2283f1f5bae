//! # Stash BackupSession Controller
//!
//! Kubernetes controller that drives Stash `BackupSession` objects from
//! creation to a terminal phase.
//!
//! ## Commands
//!
//! - `run` (default): watch BackupSessions and BackupConfigurations, provision
//!   backup jobs and their RBAC, and move sessions through their phases
//! - `update-status`: fold the output file a backup or restore job wrote into
//!   session and repository status
//!
//! ```bash
//! stash-controller run
//! stash-controller update-status --namespace demo --repository gcs-repo \
//!     --backup-session sample-backup-1561974001 --output-dir /tmp/output
//! ```

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use stash_controller::config::{ControllerConfig, ServerConfig};
use stash_controller::constants::{
    DEFAULT_OUTPUT_FILE_NAME, DEFAULT_PUSHGATEWAY_URL, PROM_JOB_BACKUP_SESSION_CONTROLLER,
    STATUS_UPDATER_NAME,
};
use stash_controller::controller::client::KubeClusterApi;
use stash_controller::controller::events::KubeEventRecorder;
use stash_controller::controller::status::StatusUpdater;
use stash_controller::observability::PushgatewaySink;
use stash_controller::runtime::initialization::{
    init_tracing, initialize, install_crypto_provider,
};
use stash_controller::runtime::watch_loop::run_watch_loop;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Stash BackupSession controller
#[derive(Parser)]
#[command(name = "stash-controller")]
#[command(about = "Stash BackupSession controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller (default)
    Run,
    /// Update session and repository status from a job's output file
    #[command(name = "update-status")]
    UpdateStatus(UpdateStatusArgs),
}

#[derive(Args)]
struct UpdateStatusArgs {
    /// Namespace of the session and repository
    #[arg(long, env = "NAMESPACE")]
    namespace: String,

    /// Repository whose status receives the repository stats
    #[arg(long)]
    repository: Option<String>,

    /// BackupSession to update
    #[arg(long, conflicts_with = "restore_session", required_unless_present = "restore_session")]
    backup_session: Option<String>,

    /// RestoreSession to update
    #[arg(long)]
    restore_session: Option<String>,

    /// Directory holding the output file
    #[arg(long)]
    output_dir: PathBuf,

    /// Name of the output file
    #[arg(long, default_value = DEFAULT_OUTPUT_FILE_NAME)]
    output_file_name: String,

    /// Write status through the status subresource
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    enable_status_subresource: bool,

    /// Push host metrics to the Pushgateway
    #[arg(long)]
    metrics_enabled: bool,

    /// Pushgateway receiving host metrics
    #[arg(long, default_value = DEFAULT_PUSHGATEWAY_URL)]
    pushgateway_url: String,

    /// Pushgateway job of the host metrics
    #[arg(long, default_value = PROM_JOB_BACKUP_SESSION_CONTROLLER)]
    metrics_job_name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run().await,
        Commands::UpdateStatus(args) => update_status(args).await,
    }
}

async fn run() -> Result<()> {
    let init = initialize(ControllerConfig::from_env(), ServerConfig::from_env())
        .await
        .context("Failed to initialize controller")?;

    run_watch_loop(init.client, init.reconciler, &init.config, init.server_state).await
}

async fn update_status(args: UpdateStatusArgs) -> Result<()> {
    install_crypto_provider();
    init_tracing(&std::env::var("LOG_FORMAT").unwrap_or_default());

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let api = Arc::new(KubeClusterApi::new(client.clone()));
    let recorder = Arc::new(KubeEventRecorder::new(client, STATUS_UPDATER_NAME));

    let mut updater = StatusUpdater::new(api, recorder)
        .with_status_subresource(args.enable_status_subresource);
    if args.metrics_enabled {
        let sink = PushgatewaySink::new(&args.pushgateway_url)
            .with_context(|| format!("Invalid Pushgateway URL '{}'", args.pushgateway_url))?;
        updater = updater.with_metrics(Arc::new(sink), &args.metrics_job_name);
    }

    let path = args.output_dir.join(&args.output_file_name);
    match (&args.backup_session, &args.restore_session) {
        (Some(session), _) => {
            updater
                .update_backup_status_from_file(
                    &args.namespace,
                    session,
                    args.repository.as_deref(),
                    &path,
                )
                .await
                .with_context(|| {
                    format!(
                        "Failed to update status of BackupSession {}/{session}",
                        args.namespace
                    )
                })?;
            info!("Updated status of BackupSession {}/{}", args.namespace, session);
        }
        (None, Some(session)) => {
            updater
                .update_restore_status_from_file(&args.namespace, session, &path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to update status of RestoreSession {}/{session}",
                        args.namespace
                    )
                })?;
            info!("Updated status of RestoreSession {}/{}", args.namespace, session);
        }
        (None, None) => anyhow::bail!("one of --backup-session or --restore-session is required"),
    }

    Ok(())
}
