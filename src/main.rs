use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use radio_recorder::{
    config::Config,
    database::Database,
    recorder::{CaptureBackend, DurationProbe, ExecutorSettings, FfmpegCapture, FfprobeDuration, RecordingExecutor},
    scheduler::{Scheduler, TriggerHandler},
    services::{PostProcessor, RecordingService, RecoveryWatchdog},
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "radio-recorder")]
#[command(version)]
#[command(about = "Scheduled internet radio recorder with resumable captures")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Add the stock stations when none exist yet
    #[arg(long)]
    seed_stations: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("radio_recorder={},tower_http=trace", cli.log_level)
    } else {
        format!("radio_recorder={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting radio recorder v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    info!("Using database: {}", config.database.url);
    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    tokio::fs::create_dir_all(&config.storage.recordings_path).await?;
    info!("Recordings stored under {}", config.storage.recordings_path.display());

    let timezone = config.scheduler.timezone()?;
    let scheduler = Scheduler::new(&config.scheduler)?;
    let capture: Arc<dyn CaptureBackend> = Arc::new(FfmpegCapture::new(&config.recorder));
    let probe: Arc<dyn DurationProbe> = Arc::new(FfprobeDuration::new(config.recorder.ffprobe_command.clone()));
    let post_processor = Arc::new(PostProcessor::from_config(
        database.clone(),
        &config.delivery,
        &config.notifications,
    ));

    let executor: Arc<dyn TriggerHandler> = Arc::new(RecordingExecutor::new(
        database.clone(),
        capture,
        probe.clone(),
        post_processor.clone(),
        ExecutorSettings::new(&config.recorder, &config.storage, timezone),
    ));
    let watchdog = RecoveryWatchdog::new(
        database.clone(),
        scheduler.clone(),
        probe,
        post_processor,
        config.watchdog.clone(),
    );
    let recordings = RecordingService::new(
        database.clone(),
        scheduler.clone(),
        &config.storage,
        &config.recorder,
    );

    if cli.seed_stations {
        recordings.seed_default_stations().await?;
    }

    scheduler.restore(&database).await?;

    let cancellation_token = CancellationToken::new();

    let scheduler_task = {
        let scheduler = scheduler.clone();
        let token = cancellation_token.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run(executor, token).await {
                error!("Scheduler failed: {}", e);
            }
        })
    };

    let watchdog_task = {
        let token = cancellation_token.clone();
        tokio::spawn(async move {
            if let Err(e) = watchdog.run(token).await {
                error!("Recovery watchdog failed: {}", e);
            }
        })
    };

    {
        let token = cancellation_token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    token.cancel();
                }
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        });
    }

    let web_server = WebServer::new(&config.web, AppState { recordings })?;
    info!("Starting web server on {}", web_server.addr());
    web_server.serve(cancellation_token.clone()).await?;

    cancellation_token.cancel();
    let _ = tokio::join!(scheduler_task, watchdog_task);
    info!("Radio recorder stopped");
    Ok(())
}
