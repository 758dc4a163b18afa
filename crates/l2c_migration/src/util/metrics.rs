use crate::api::v1::l2c::L2c;
use crate::util::errors::Error;
use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tokio::time::Instant;
use tracing::warn;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub webhook_signals: IntCounterVec,
}

impl Default for Metrics {
    #[allow(clippy::unwrap_used)]
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "controller_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["instance"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!("controller_reconciliation_errors_total", "reconciliation errors",),
            &["instance", "error"],
        )
        .unwrap();
        let reconciliations = IntCounter::new("reconciliations_total", "reconciliations").unwrap();
        let webhook_signals = IntCounterVec::new(
            opts!("l2c_webhook_signals_total", "quality gate webhooks handled, by result"),
            &["result"],
        )
        .unwrap();
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            webhook_signals,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.webhook_signals.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, l2c: &L2c, e: &Error) {
        warn!("reconcile_failure: {:?}", &[l2c.name_any(), e.metric_label()]);
        self.failures
            .with_label_values(&[l2c.name_any().as_ref(), e.metric_label().as_ref()])
            .inc()
    }

    /// Counts a handled webhook: `signaled`, `rejected` or `failed`.
    pub fn webhook_signal(&self, result: &str) {
        self.webhook_signals.with_label_values(&[result]).inc()
    }

    pub fn count_and_measure(&self, controller: &str) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            instance: controller.to_string(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
    instance: String,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.instance.as_str()])
            .observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::errors::StdError;

    #[test]
    fn failures_are_labelled_by_project_and_error() {
        let registry = Registry::new();
        let metrics = Metrics::default().register(&registry).unwrap();
        let mut l2c = L2c::new("shop", Default::default());
        l2c.metadata.namespace = Some("demo".into());

        metrics.reconcile_failure(&l2c, &Error::StdError(StdError::Conflict("busy".into())));
        metrics.webhook_signal("signaled");
        {
            let _timer = metrics.count_and_measure("l2c");
        }

        assert_eq!(metrics.failures.with_label_values(&["shop", "conflict"]).get(), 1);
        assert_eq!(metrics.webhook_signals.with_label_values(&["signaled"]).get(), 1);
        assert_eq!(metrics.reconciliations.get(), 1);
        assert_eq!(registry.gather().len(), 4);
    }
}
