//! Outbox relay daemon.
//!
//! Wires the configured source databases to NATS JetStream and runs the
//! polling schedulers until SIGINT/SIGTERM.

use clap::Parser;
use outbox_relay::config::{ConfigLoader, RelayConfig};
use outbox_relay::domain::dead_letter::DeadLetterSink;
use outbox_relay::domain::store::OutboxStore;
use outbox_relay::messaging::nats::NatsBrokerPublisher;
use outbox_relay::messaging::publisher::{BrokerPublisher, GuardedPublisher};
use outbox_relay::persistence::{PostgresDeadLetterSink, PostgresOutboxStore};
use outbox_relay::relay::{PollingScheduler, RelayOrchestrator, SchedulerConfig};
use outbox_relay::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use outbox_relay::telemetry::{init_tracing, RelayMetrics};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "outbox-relay", about = "Transactional outbox to NATS relay", version)]
struct Args {
    /// Path to a .env file with overrides
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let loader = ConfigLoader::new(Some(args.env_file.clone()));
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let level = if args.debug {
        "debug"
    } else {
        config.log_level.as_str()
    };
    init_tracing(level);

    info!(
        sources = config.sources.len(),
        nats_urls = ?config.nats.urls,
        poll_interval_secs = config.poll_interval_secs,
        "Starting outbox relay"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "Relay failed");
        std::process::exit(1);
    }
}

async fn run(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let metrics = Arc::new(RelayMetrics::new()?);

    let broker: Arc<dyn BrokerPublisher> =
        Arc::new(NatsBrokerPublisher::connect(&config.nats).await?);

    let mut orchestrator = RelayOrchestrator::new(
        broker.clone(),
        config.poll_interval(),
        config.shutdown_timeout(),
    );

    let breaker_config = CircuitBreakerConfig {
        failure_threshold: config.breaker.failure_threshold,
        failure_window: Duration::from_secs(config.breaker.failure_window_secs),
        reset_timeout: Duration::from_secs(config.breaker.reset_timeout_secs),
    };

    for source in &config.sources {
        // Lazy pool: a source database that is down at startup still gets
        // its scheduler and is picked up when it recovers. The
        // orchestrator's ping decides whether enough sources are up.
        let store =
            PostgresOutboxStore::connect_lazy(&source.database_url, config.max_db_connections)?;
        if let Err(e) = store.run_migrations().await {
            warn!(source = %source.name, error = %e, "Outbox table bootstrap failed");
        }

        let dead_letters = PostgresDeadLetterSink::new(store.pool().clone(), metrics.clone());
        if let Err(e) = dead_letters.run_migrations().await {
            warn!(source = %source.name, error = %e, "Dead letter table bootstrap failed");
        }

        let breaker = Arc::new(CircuitBreaker::new(
            format!("nats:{}", source.name),
            breaker_config.clone(),
        ));
        let publisher = Arc::new(GuardedPublisher::new(
            source.name.clone(),
            config.topic_for(&source.name),
            broker.clone(),
            breaker,
            metrics.clone(),
        ));

        let store: Arc<dyn OutboxStore> = Arc::new(store);
        let dead_letters: Arc<dyn DeadLetterSink> = Arc::new(dead_letters);
        let scheduler = Arc::new(PollingScheduler::new(
            SchedulerConfig {
                source: source.name.clone(),
                batch_size: config.batch_size,
                poll_interval: config.poll_interval(),
                max_in_flight: config.max_in_flight,
                stale_claim_timeout: config.stale_claim_timeout(),
            },
            store.clone(),
            publisher,
            dead_letters,
            config.retry.clone(),
            metrics.clone(),
        ));

        orchestrator.register(scheduler, store);
    }

    orchestrator.initialize().await?;
    orchestrator.start_polling().await?;

    wait_for_shutdown_signal().await;
    orchestrator.shutdown().await;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "Could not install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }
}
