//! Metrics and tracing infrastructure.
//!
//! One `RelayMetrics` registry per process; the external collector scrapes
//! it through whatever exporter the deployment wires up.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

/// Prometheus metrics exposed by the relay.
pub struct RelayMetrics {
    registry: Registry,
    /// Relayed events by source and outcome (published, retried,
    /// dead_lettered, skipped)
    pub events_total: IntCounterVec,
    /// Broker publish duration per source
    pub publish_duration_seconds: HistogramVec,
    /// Circuit breaker state per publish target (0 closed, 1 open, 2 half-open)
    pub circuit_breaker_state: IntGaugeVec,
    /// Rows currently sitting in the dead letter table
    pub dlq_size: IntGauge,
    /// Eligible rows per source at the last poll
    pub queue_depth: IntGaugeVec,
    /// Completed poll cycles per source
    pub cycles_total: IntCounterVec,
}

impl RelayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events_total = IntCounterVec::new(
            Opts::new("relay_events_total", "Outbox events handled by the relay")
                .const_label("component", "outbox_relay"),
            &["source", "outcome"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let publish_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "relay_publish_duration_seconds",
                "Broker publish duration per event",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["source"],
        )?;
        registry.register(Box::new(publish_duration_seconds.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "relay_circuit_breaker_state",
                "Circuit breaker state: 0 closed, 1 open, 2 half-open",
            ),
            &["target"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let dlq_size = IntGauge::new("relay_dlq_size", "Entries in the dead letter table")?;
        registry.register(Box::new(dlq_size.clone()))?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("relay_queue_depth", "Eligible outbox rows at last poll"),
            &["source"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let cycles_total = IntCounterVec::new(
            Opts::new("relay_cycles_total", "Completed poll cycles"),
            &["source", "outcome"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        Ok(Self {
            registry,
            events_total,
            publish_duration_seconds,
            circuit_breaker_state,
            dlq_size,
            queue_depth,
            cycles_total,
        })
    }

    /// Registry handle for the exporter.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the provided default level is used.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
