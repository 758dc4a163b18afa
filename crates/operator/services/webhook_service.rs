use l2c_migration::bridge::exec::PodExecutor;
use l2c_migration::bridge::{QualityGateEvent, Verdict, WebhookBridge};
use l2c_migration::cluster::Cluster;
use l2c_migration::util::errors::Result;
use l2c_migration::util::metrics::Metrics;
use tracing::error;

/// Turns quality gate deliveries into signals for the waiting analyze step.
pub struct WebhookService<C, E> {
    bridge: WebhookBridge<C, E>,
    metrics: Metrics,
}

impl<C: Cluster, E: PodExecutor> WebhookService<C, E> {
    pub fn new(bridge: WebhookBridge<C, E>, metrics: Metrics) -> Self {
        Self { bridge, metrics }
    }

    pub async fn deliver(&self, event: &QualityGateEvent) -> Result<Verdict> {
        let result = self.bridge.handle(event).await;
        match &result {
            Ok(_) => self.metrics.webhook_signal("signaled"),
            Err(e) if e.is_protocol_violation() => self.metrics.webhook_signal("rejected"),
            Err(e) => {
                error!("Failed to deliver webhook for {}: {}", event.project.key, e);
                self.metrics.webhook_signal("failed");
            }
        }
        result
    }
}
