use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mediatrend_db::repo::runs;
use mediatrend_server::config_store::{ConfigStore, EnvOverrides};
use mediatrend_server::logs::LogBuffer;
use mediatrend_server::scheduler::{LastRun, Scheduler};
use mediatrend_server::state::{AppState, ServerEvent};
use mediatrend_server::worker::{LiveConnectors, Worker};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "mediatrend", version, about = "Send trending streaming titles to Radarr and Sonarr")]
struct Args {
    /// Run the interactive menu instead of the web server.
    #[arg(long)]
    cli: bool,

    #[arg(long, env = "MEDIATREND_CONFIG", default_value = "settings.json")]
    config: PathBuf,

    #[arg(long, env = "MEDIATREND_DB", default_value = "mediatrend.db")]
    db: String,

    /// Listen address, overriding `web.host` and `web.port`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // The menu owns the terminal, so only warnings reach stderr there.
    let logs = LogBuffer::default();
    let default_filter = if args.cli { "warn" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
            ),
        )
        .with(logs.layer())
        .init();

    let store = Arc::new(
        ConfigStore::load(&args.config, EnvOverrides::from_env())
            .await
            .context("failed to load settings")?,
    );
    info!(path = %store.path().display(), "settings loaded");

    info!(db_path = %args.db, "connecting to database");
    let pool = mediatrend_db::connect(&args.db)
        .await
        .context("failed to connect to database")?;
    mediatrend_db::migrate::run(&pool)
        .await
        .context("failed to run migrations")?;

    let interrupted = runs::fail_interrupted_runs(&pool)
        .await
        .context("failed to close interrupted runs")?;
    if interrupted > 0 {
        warn!(count = interrupted, "marked runs interrupted by the last shutdown as failed");
    }

    let (events_tx, _) = tokio::sync::broadcast::channel::<ServerEvent>(256);

    let cfg = store.snapshot().await;
    let worker = Worker::new(
        pool.clone(),
        store.clone(),
        events_tx.clone(),
        Arc::new(LiveConnectors::default()),
    );
    let scheduler = Scheduler::new(Arc::new(worker), &cfg);
    let history = runs::latest_finished_per_job(&pool)
        .await
        .context("failed to load run history")?;
    scheduler.seed_history(
        history.into_iter().filter_map(LastRun::from_row),
        chrono::Utc::now(),
    );

    let state = AppState {
        db: pool,
        config: store.clone(),
        scheduler: scheduler.clone(),
        logs,
        events: events_tx.clone(),
        started_at: chrono::Utc::now(),
    };

    if args.cli {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        mediatrend_server::cli::run_menu(&state, stdin, std::io::stdout()).await?;
        let grace = store.snapshot().await.scheduler.shutdown_grace_secs;
        scheduler.shutdown(Duration::from_secs(grace)).await;
        return Ok(());
    }

    let scheduler_task = tokio::spawn(scheduler.clone().run_loop(store.clone()));
    tokio::spawn(mediatrend_server::retention::run_loop(
        state.db.clone(),
        store.clone(),
    ));

    // Spawn heartbeat emitter
    {
        let tx = events_tx.clone();
        tokio::spawn(async move {
            let mut seq = 0u64;
            loop {
                tokio::time::sleep(Duration::from_secs(30)).await;
                let _ = tx.send(ServerEvent::Heartbeat { seq });
                seq += 1;
            }
        });
    }

    let app = mediatrend_server::routes::build_router(state);

    let bind_addr = args
        .bind
        .unwrap_or_else(|| format!("{}:{}", cfg.web.host, cfg.web.port));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    let grace = store.snapshot().await.scheduler.shutdown_grace_secs;
    if !scheduler.shutdown(Duration::from_secs(grace)).await {
        warn!("exiting with jobs still running");
    }
    let _ = scheduler_task.await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
