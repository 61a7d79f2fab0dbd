//! Prometheus metrics for the watch engine
//!
//! Counters for every notification, reconciliation, emitted event, and
//! channel operation, plus a reconcile-duration histogram. Served as text
//! exposition format at `GET /metrics`.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use drivewatch_core::domain::ChangeEvent;

/// Central registry holding all engine metrics
pub struct WatchMetrics {
    registry: Registry,
    /// Counter: inbound notifications by outcome
    pub notifications_total: IntCounterVec,
    /// Counter: reconciliation passes by status
    pub reconciliations_total: IntCounterVec,
    /// Counter: emitted change events by event type
    pub events_total: IntCounterVec,
    /// Counter: channel operations by (operation, status)
    pub channel_operations_total: IntCounterVec,
    /// Histogram: reconciliation duration in seconds
    pub reconcile_duration_seconds: HistogramVec,
    /// Gauge: scopes waiting in the reconcile queue
    pub queued_scopes: IntGauge,
}

impl WatchMetrics {
    /// Creates a new `WatchMetrics` with all metrics registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("drivewatch".to_string()), None)?;

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Inbound notifications by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(notifications_total.clone()))?;

        let reconciliations_total = IntCounterVec::new(
            Opts::new("reconciliations_total", "Reconciliation passes by status"),
            &["status"],
        )?;
        registry.register(Box::new(reconciliations_total.clone()))?;

        let events_total = IntCounterVec::new(
            Opts::new("events_total", "Emitted change events by type"),
            &["event"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let channel_operations_total = IntCounterVec::new(
            Opts::new("channel_operations_total", "Channel operations"),
            &["operation", "status"],
        )?;
        registry.register(Box::new(channel_operations_total.clone()))?;

        let reconcile_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "reconcile_duration_seconds",
                "Reconciliation duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 30.0, f64::INFINITY]),
            &["status"],
        )?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        let queued_scopes = IntGauge::new("queued_scopes", "Scopes waiting for reconciliation")?;
        registry.register(Box::new(queued_scopes.clone()))?;

        Ok(Self {
            registry,
            notifications_total,
            reconciliations_total,
            events_total,
            channel_operations_total,
            reconcile_duration_seconds,
            queued_scopes,
        })
    }

    // ========================================================================
    // Recording helpers
    // ========================================================================

    /// Record the outcome of one inbound notification.
    pub fn record_notification(&self, outcome: &str) {
        self.notifications_total.with_label_values(&[outcome]).inc();
    }

    /// Record a finished reconciliation pass.
    pub fn record_reconciliation(&self, status: &str, duration_secs: f64) {
        self.reconciliations_total
            .with_label_values(&[status])
            .inc();
        self.reconcile_duration_seconds
            .with_label_values(&[status])
            .observe(duration_secs);
    }

    /// Count a batch of emitted events by type.
    pub fn record_events(&self, events: &[ChangeEvent]) {
        for event in events {
            self.events_total.with_label_values(&[event.name()]).inc();
        }
    }

    /// Record a channel create/renew/retire outcome.
    pub fn record_channel_operation(&self, operation: &str, status: &str) {
        self.channel_operations_total
            .with_label_values(&[operation, status])
            .inc();
    }

    pub fn set_queued_scopes(&self, count: usize) {
        self.queued_scopes.set(count as i64);
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
