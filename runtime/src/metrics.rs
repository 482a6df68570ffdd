//! Prometheus metrics for the sync client.
//!
//! Components record through the `metrics` facade, so nothing is collected
//! until a recorder is installed. [`MetricsExporter::install`] installs the
//! Prometheus recorder; the host application decides how to expose
//! [`MetricsExporter::render`].
//!
//! # Example
//!
//! ```rust,no_run
//! use ticket_sync_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//! println!("{}", exporter.render().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Prometheus recorder for the sync client's metrics.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsExporter {
    /// Create an exporter; nothing is installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe every metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder is process-global. If one is already installed (e.g. by
    /// another test) this logs a warning and leaves `render` returning `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Handle to the installed recorder.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Request executor
    describe_counter!(
        "request_attempts_total",
        "Network attempts issued, including retries"
    );
    describe_counter!(
        "request_retries_total",
        "Retries scheduled after a transient failure"
    );
    describe_counter!(
        "request_failures_total",
        "Failed attempts, labelled by error kind"
    );
    describe_histogram!(
        "request_duration_seconds",
        "Duration of a single network attempt"
    );

    // Circuit breaker
    describe_counter!(
        "circuit_breaker_state_change",
        "Breaker transitions, labelled by endpoint and from/to state"
    );

    // Offline cache
    describe_counter!("cache_hits_total", "Cache reads that returned a valid entry");
    describe_counter!(
        "cache_misses_total",
        "Cache reads with no entry or an expired or incompatible one"
    );
    describe_counter!(
        "cache_errors_total",
        "Storage failures swallowed by the cache"
    );

    // Synchronizer
    describe_counter!(
        "sync_events_applied_total",
        "Push frames applied to the store, labelled by type"
    );
    describe_counter!(
        "sync_events_dropped_total",
        "Push frames dropped because they failed validation"
    );
    describe_counter!("sync_polls_total", "Fallback polls issued");

    // Mutations and store
    describe_counter!(
        "mutations_total",
        "Optimistic mutations, labelled by kind and outcome"
    );
    describe_counter!("store_actions_total", "Actions applied to the ticket store");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_creation() {
        let exporter = MetricsExporter::new();
        assert!(exporter.handle().is_none());
        assert!(exporter.render().is_none());
    }

    #[test]
    fn test_install_and_render() {
        let mut exporter = MetricsExporter::new();
        exporter.install().unwrap();

        counter!("sync_polls_total").increment(1);
        counter!("mutations_total", "kind" => "send_message", "outcome" => "confirmed").increment(1);

        // Another test may have installed the recorder first.
        if let Some(rendered) = exporter.render() {
            assert!(rendered.contains("sync_polls_total"));
            assert!(rendered.contains("mutations_total"));
        }
    }
}
