//! Tempo Scheduler daemon.
//!
//! Serves the schedule management API on localhost for the desktop shell.

use clap::Parser;
use mimalloc::MiMalloc;

use tempo_scheduler::config::AppConfig;
use tempo_scheduler::logging::init_tracing;
use tempo_scheduler::server::create_app;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments. Flags override the config file and `TEMPO__*`.
#[derive(Parser, Debug)]
#[command(name = "tempo-scheduler")]
#[command(about = "Recurring task scheduler for the desktop assistant")]
#[command(version)]
struct Args {
    /// Host to bind to.
    #[arg(long, env = "TEMPO_HOST")]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long, env = "TEMPO_PORT")]
    port: Option<u16>,

    /// SQLite database path (":memory:" for a throwaway store).
    #[arg(long, env = "TEMPO_DATABASE")]
    database: Option<String>,

    /// Log level or filter directive.
    #[arg(long)]
    log_level: Option<String>,

    /// Config file path.
    #[arg(short, long, env = "TEMPO_CONFIG")]
    config: Option<String>,
}

impl Args {
    fn apply(self, config: &mut AppConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(path) = self.database {
            config.database.path = path;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load_unchecked(args.config.as_deref())?;
    args.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

    init_tracing(&config.logging)?;
    tracing::info!("Starting Tempo Scheduler v{}", env!("CARGO_PKG_VERSION"));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let (app, state) = create_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match state.scheduler.shutdown_report().await {
        Ok(report) if report.requires_confirmation => {
            tracing::warn!(
                active_schedules = report.active_schedules,
                "{}",
                report.message
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Could not count active schedules"),
    }
    state.scheduler.shutdown();

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        () = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
