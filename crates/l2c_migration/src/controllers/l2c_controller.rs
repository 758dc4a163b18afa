use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Secret, Service, ServiceAccount},
    networking::v1::Ingress,
    rbac::v1::RoleBinding,
};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder, Reporter},
        finalizer::{finalizer, Event as Finalizer},
        watcher::{self, Config},
    },
    Resource,
};
use serde::Serialize;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use super::driver::Driver;
use crate::api::tekton::{Pipeline, PipelineRun};
use crate::api::v1::l2c::{L2c, L2C_FINALIZER};
use crate::cluster::KubeCluster;
use crate::quality::{QualityOrchestrator, SonarClient};
use crate::util::config::OperatorConfig;
use crate::util::errors::{Error, Result, StdError};
use crate::util::metrics;

/// Label every derived object carries; limits the owned-object watches.
const OWNED_SELECTOR: &str = "l2c";

pub type L2cDriver = Driver<KubeCluster, SonarClient>;

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    /// Create a Controller Context that can update State
    pub fn to_context(
        &self,
        client: Client,
        config: Arc<OperatorConfig>,
        orchestrator: Arc<QualityOrchestrator<SonarClient>>,
    ) -> std::result::Result<Arc<Context>, prometheus::Error> {
        Ok(Arc::new(Context {
            driver: Driver::new(KubeCluster::new(client.clone()), orchestrator, config),
            client,
            metrics: metrics::Metrics::default().register(&self.registry)?,
            diagnostics: self.diagnostics.clone(),
        }))
    }
}

/// Context for our reconciler
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: metrics::Metrics,
    pub driver: L2cDriver,
}

#[instrument(skip(ctx, l2c), fields(name = %l2c.name_any()))]
pub async fn reconcile(l2c: Arc<L2c>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("l2c");
    ctx.diagnostics.write().await.last_event = Utc::now();

    let ns = l2c.namespace_or_err()?;
    let l2cs: Api<L2c> = Api::namespaced(ctx.client.clone(), &ns);

    info!("Reconciling L2c \"{}\" in {}", l2c.name_any(), ns);
    finalizer(&l2cs, L2C_FINALIZER, l2c, |event| async {
        match event {
            Finalizer::Apply(l2c) => ctx.driver.apply(&l2c).await,
            Finalizer::Cleanup(l2c) => cleanup(&l2c, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::StdError(StdError::FinalizerError(Box::new(e))))
}

/// Finalizer cleanup: the SonarQube project is not garbage collected with the owner.
async fn cleanup(l2c: &L2c, ctx: Arc<Context>) -> Result<Action> {
    let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone());
    recorder
        .publish(
            &Event {
                type_: EventType::Normal,
                reason: "DeleteRequested".into(),
                note: Some(format!("Delete `{}`", l2c.name_any())),
                action: "Deleting".into(),
                secondary: None,
            },
            &l2c.object_ref(&()),
        )
        .await
        .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
    ctx.driver.cleanup(l2c).await?;
    Ok(Action::await_change())
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "l2c-controller".into(),
        }
    }
}
impl Diagnostics {
    fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

fn error_policy(l2c: Arc<L2c>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(&l2c, error);
    match error {
        Error::ErrorWithRequeue(e) => Action::requeue(e.duration),
        Error::StdError(_) => Action::requeue(Duration::from_secs(5 * 60)),
    }
}

/// Runs the controller until a shutdown signal (given the crd is installed)
pub async fn run(ctx: Arc<Context>) -> Result<()> {
    let client = ctx.client.clone();
    let l2cs = Api::<L2c>::all(client.clone());
    if let Err(e) = l2cs.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        return Err(Error::StdError(StdError::KubeError(e)));
    }

    let owned = || watcher::Config::default().labels(OWNED_SELECTOR);
    Controller::new(l2cs, Config::default().any_semantic())
        .owns(Api::<ConfigMap>::all(client.clone()), owned())
        .owns(Api::<Secret>::all(client.clone()), owned())
        .owns(Api::<ServiceAccount>::all(client.clone()), owned())
        .owns(Api::<RoleBinding>::all(client.clone()), owned())
        .owns(Api::<Pipeline>::all(client.clone()), owned())
        .owns(Api::<PipelineRun>::all(client.clone()), owned())
        .owns(Api::<Service>::all(client.clone()), owned())
        .owns(Api::<Ingress>::all(client.clone()), owned())
        .owns(Api::<Deployment>::all(client.clone()), owned())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_serialize_without_the_reporter() {
        let diagnostics = Diagnostics::default();
        let value = serde_json::to_value(&diagnostics).unwrap();
        assert!(value.get("last_event").is_some());
        assert!(value.get("reporter").is_none());
        assert_eq!(diagnostics.reporter.controller, "l2c-controller");
    }
}
