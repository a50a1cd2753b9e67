use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use triage_daemon::channels::{ChannelRegistry, EmailChannel, SignalChannel};
use triage_daemon::config::DaemonConfig;
use triage_daemon::llm::LlmClient;
use triage_daemon::orchestrator::{Orchestrator, OrchestratorSettings, Shutdown};
use triage_daemon::pipeline::{Classifier, Drafter};
use triage_daemon::swap::{ModelSwapController, Supervisor, SwapTimings, SystemdSupervisor};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "Triage daemon exiting");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    // Another crate may already have installed one.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = DaemonConfig::from_env().context("invalid configuration")?;
    let _log_guard = init_tracing(&config)?;

    // ── Channels ────────────────────────────────────────────────────
    let mut channels = ChannelRegistry::new();
    if let Some(email) = config.email.clone() {
        tracing::info!(user = %email.username, folders = ?email.watch_folders, "Email channel enabled");
        channels.register(Arc::new(EmailChannel::new(email)));
    }
    if let Some(signal) = config.signal.clone() {
        tracing::info!(account = %signal.account, "Signal channel enabled");
        channels.register(Arc::new(SignalChannel::new(signal)));
    }
    if channels.is_empty() {
        tracing::warn!("No channels configured, nothing will be polled");
    }
    if channels.get(config.control.channel).is_none() || config.control.operator.is_empty() {
        tracing::warn!(
            channel = %config.control.channel,
            "Control channel or operator not configured, notifications and commands disabled"
        );
    }

    // ── Model ───────────────────────────────────────────────────────
    let llm = Arc::new(LlmClient::new(&config.llm));
    let supervisor = SystemdSupervisor::detect().map(|s| Arc::new(s) as Arc<dyn Supervisor>);
    if supervisor.is_none() {
        tracing::info!("systemctl not found, model swapping runs in passthrough mode");
    }
    let models = ModelSwapController::new(
        config.llm.models.clone(),
        config.llm.default_model.clone(),
        llm.clone(),
        supervisor,
    )
    .with_timings(SwapTimings::default().with_swap_timeout(config.llm.swap_timeout));

    let classifier = Classifier::new(llm.clone()).with_context(config.triage_context.clone());
    let drafter = Drafter::new(llm).with_signature(config.draft_signature.clone());

    let orchestrator = Orchestrator::new(
        OrchestratorSettings::from_config(&config),
        channels,
        models,
        classifier,
        drafter,
    );

    orchestrator.run(Shutdown::from_signals()).await?;
    Ok(())
}

/// Console logging, plus a daily rolling file under `LOG_DIR` when set.
/// `RUST_LOG` wins over `LOG_LEVEL`.
fn init_tracing(config: &DaemonConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::Builder::new()
                .rotation(Rotation::DAILY)
                .filename_prefix("triage-daemon")
                .filename_suffix("log")
                .build(dir)
                .context("cannot create rolling log file")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    Ok(guard)
}
