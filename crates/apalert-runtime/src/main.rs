//! apalert: multiworld randomizer tracker binary.

use apalert_runtime::cli::{Cli, Command};
use apalert_runtime::{
    JsonStore, LogSink, NotificationSink, OutboxSink, Settings, Tracker, logging, status,
};
use chrono::Utc;
use clap::Parser;
use tokio::time::{MissedTickBehavior, interval};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let settings = Settings::from_cli(&args)?;

    match args.command {
        Command::Status => {
            let store = JsonStore::open(&settings.state_dir)?;
            print!("{}", status::render(&store.load_trackers()?));
        }
        Command::Once { force } => {
            logging::init();
            let mut tracker = build_tracker(&settings)?;
            tracker.run_cycle(force, Utc::now()).await?;
        }
        Command::Run => {
            logging::init();
            tracing::info!(
                state_dir = %settings.state_dir.display(),
                interval_secs = settings.policy.interval.as_secs(),
                "apalert starting"
            );
            let mut tracker = build_tracker(&settings)?;
            run_loop(&mut tracker, &settings).await;
            tracker.flush()?;
            tracing::info!("apalert stopped");
        }
    }

    Ok(())
}

fn build_tracker(settings: &Settings) -> anyhow::Result<Tracker> {
    let sink: Box<dyn NotificationSink> = match &settings.outbox {
        Some(path) => Box::new(OutboxSink::new(path)),
        None => Box::new(LogSink),
    };
    let store = JsonStore::open(&settings.state_dir)?;
    Tracker::new(
        settings.build_sources()?,
        sink,
        settings.policy.clone(),
        settings.aggregator_url.clone(),
    )
    .with_store(store)
}

/// Run a cycle per interval until a shutdown signal. A cycle in flight is
/// abandoned on shutdown; the caller flushes what it got through.
async fn run_loop(tracker: &mut Tracker, settings: &Settings) {
    let mut ticker = interval(settings.policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            () = &mut shutdown => break,
            result = tracker.run_cycle(false, Utc::now()) => {
                if let Err(e) = result {
                    tracing::error!(error = %format!("{e:#}"), "cycle failed");
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}
