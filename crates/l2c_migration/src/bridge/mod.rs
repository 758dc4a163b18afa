//! Turns a SonarQube quality-gate webhook into the signal that unblocks the
//! waiting step of a running analyze task.
//!
//! The decision logic (key parsing, the task-running check) is plain functions
//! over fetched objects; the exec transport sits behind [`exec::PodExecutor`].

pub mod exec;
#[cfg(any(test, feature = "test-utils"))]
pub mod recording;

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::tekton::PipelineRun;
use crate::api::v1::l2c::L2c;
use crate::cluster::Cluster;
use crate::util::conditions::Phase;
use crate::util::errors::{Error, Result, StdError};
use exec::PodExecutor;

/// Binary inside the waiter step that records the analysis result.
pub const SIGNAL_COMMAND: &str = "/scan-waiter";
pub const WAITER_CONTAINER: &str = "step-waiter";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QualityGateEvent {
    pub project: EventProject,
    pub quality_gate: EventQualityGate,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct EventProject {
    pub key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct EventQualityGate {
    pub status: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Fail,
}

impl Verdict {
    pub fn from_gate_status(status: &str) -> Self {
        if status == "OK" {
            Verdict::Ok
        } else {
            Verdict::Fail
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ok => "ok",
            Verdict::Fail => "fail",
        }
    }
}

/// Splits `<namespace>_<name>`. Names cannot contain underscores, so anything else is foreign.
pub fn parse_project_key(key: &str) -> Result<(String, String)> {
    match key.split('_').collect::<Vec<_>>().as_slice() {
        [namespace, name] if !namespace.is_empty() && !name.is_empty() => {
            Ok((namespace.to_string(), name.to_string()))
        }
        _ => Err(Error::StdError(StdError::MalformedKey(format!(
            "project {key} was not created by l2c"
        )))),
    }
}

/// Pod of the analyze task, provided that task is still running.
pub fn resolve_signal_target(run: &PipelineRun) -> Result<String> {
    let task = run
        .task_runs()
        .map(|(_, task)| task)
        .find(|task| task.pipeline_task_name == Phase::Analyze.task_name())
        .ok_or_else(|| {
            Error::StdError(StdError::TaskNotRunning(format!(
                "pipeline run has no {} task",
                Phase::Analyze.task_name()
            )))
        })?;

    match task.single_condition() {
        Some(c) if c.status == "Unknown" && c.reason == "Running" => {}
        _ => {
            return Err(Error::StdError(StdError::TaskNotRunning(
                "analyze task is not currently running".to_string(),
            )))
        }
    }

    match task.status.as_ref().map(|s| s.pod_name.as_str()) {
        Some(pod) if !pod.is_empty() => Ok(pod.to_string()),
        _ => Err(Error::StdError(StdError::InvalidPodName(
            "analyze task has no pod".to_string(),
        ))),
    }
}

pub struct WebhookBridge<C, E> {
    cluster: C,
    executor: E,
}

impl<C: Cluster, E: PodExecutor> WebhookBridge<C, E> {
    pub fn new(cluster: C, executor: E) -> Self {
        Self { cluster, executor }
    }

    /// Delivers one quality-gate result. Never retries; every read is fresh.
    pub async fn handle(&self, event: &QualityGateEvent) -> Result<Verdict> {
        let result = self.signal(event).await;
        if let Err(e) = &result {
            if e.is_protocol_violation() {
                warn!("Rejected webhook for {}: {}", event.project.key, e);
            }
        }
        result
    }

    async fn signal(&self, event: &QualityGateEvent) -> Result<Verdict> {
        let (namespace, name) = parse_project_key(&event.project.key)?;

        let l2c = self
            .cluster
            .get::<L2c>(&namespace, &name)
            .await?
            .ok_or_else(|| Error::StdError(StdError::NotFound(format!("L2c {namespace}/{name}"))))?;

        let run_name = l2c
            .status
            .as_ref()
            .and_then(|s| s.pipeline_run_name.clone())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                Error::StdError(StdError::NoActiveRun(format!(
                    "L2c {namespace}/{name} has no running pipeline"
                )))
            })?;

        let run = self
            .cluster
            .get::<PipelineRun>(&namespace, &run_name)
            .await?
            .ok_or_else(|| Error::StdError(StdError::NotFound(format!("PipelineRun {namespace}/{run_name}"))))?;

        let pod = resolve_signal_target(&run)?;
        if self.cluster.get::<Pod>(&namespace, &pod).await?.is_none() {
            return Err(Error::StdError(StdError::NotFound(format!("Pod {namespace}/{pod}"))));
        }

        let verdict = Verdict::from_gate_status(&event.quality_gate.status);
        let command = vec![SIGNAL_COMMAND.to_string(), verdict.as_str().to_string()];
        let output = self
            .executor
            .exec(&namespace, &pod, WAITER_CONTAINER, command)
            .await?;
        if !output.stderr.is_empty() {
            return Err(Error::StdError(StdError::ExecError(output.stderr)));
        }

        info!("Signalled analysis result {} to {}/{}", verdict.as_str(), namespace, pod);
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tekton::PipelineRunSpec;
    use crate::cluster::memory::MemoryCluster;
    use crate::resources::fixtures;
    use crate::util::errors::Result;
    use async_trait::async_trait;
    use exec::ExecOutput;
    use recording::RecordingExecutor;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn event(key: &str, status: &str) -> QualityGateEvent {
        QualityGateEvent {
            project: EventProject { key: key.into() },
            quality_gate: EventQualityGate { status: status.into() },
        }
    }

    fn analyze_task(status: &str, reason: &str) -> serde_json::Value {
        json!({
            "shop-analyze-x1": {
                "pipelineTaskName": "analyze",
                "status": {
                    "conditions": [{ "type": "Succeeded", "status": status, "reason": reason }],
                    "podName": "shop-analyze-x1-pod"
                }
            }
        })
    }

    /// Project `demo/shop` with a run whose analyze task waits for the webhook.
    fn running_project() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        let mut l2c = fixtures::l2c();
        l2c.status = Some(crate::api::v1::l2c::L2cStatus {
            pipeline_run_name: Some("shop".into()),
            ..Default::default()
        });
        cluster.insert(&l2c).unwrap();

        let mut run = PipelineRun::new("shop", PipelineRunSpec::default());
        run.metadata.namespace = Some("demo".into());
        run.status = serde_json::from_value(json!({ "taskRuns": analyze_task("Unknown", "Running") })).unwrap();
        cluster.insert(&run).unwrap();

        cluster
            .insert(&Pod {
                metadata: ObjectMeta {
                    name: Some("shop-analyze-x1-pod".into()),
                    namespace: Some("demo".into()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();
        cluster
    }

    /// Executor whose signal completes the waiting task, as the real waiter step does.
    #[derive(Clone)]
    struct CompletingExecutor {
        inner: RecordingExecutor,
        cluster: MemoryCluster,
    }

    #[async_trait]
    impl PodExecutor for CompletingExecutor {
        async fn exec(&self, namespace: &str, pod: &str, container: &str, command: Vec<String>) -> Result<ExecOutput> {
            let output = self.inner.exec(namespace, pod, container, command).await?;
            self.cluster
                .patch_status::<PipelineRun>(
                    namespace,
                    "shop",
                    json!({ "taskRuns": analyze_task("True", "Succeeded") }),
                )
                .await?;
            Ok(output)
        }
    }

    #[test]
    fn key_parsing() {
        assert_eq!(
            parse_project_key("ns_name").unwrap(),
            ("ns".to_string(), "name".to_string())
        );
        for bad in ["ns_name_extra", "noUnderscore", "_name", "ns_"] {
            let err = parse_project_key(bad).unwrap_err();
            assert!(matches!(err.inner(), StdError::MalformedKey(_)), "{bad}");
        }
    }

    #[test]
    fn verdict_tokens() {
        assert_eq!(Verdict::from_gate_status("OK").as_str(), "ok");
        assert_eq!(Verdict::from_gate_status("ERROR").as_str(), "fail");
    }

    #[tokio::test]
    async fn replayed_delivery_signals_once() {
        let cluster = running_project();
        let recorder = RecordingExecutor::new();
        let bridge = WebhookBridge::new(
            cluster.clone(),
            CompletingExecutor {
                inner: recorder.clone(),
                cluster: cluster.clone(),
            },
        );

        let first = bridge.handle(&event("demo_shop", "OK")).await.unwrap();
        assert_eq!(first, Verdict::Ok);
        let second = bridge.handle(&event("demo_shop", "OK")).await.unwrap_err();
        assert!(matches!(second.inner(), StdError::TaskNotRunning(_)));
        assert!(second.is_protocol_violation());

        let calls = recorder.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].pod, "shop-analyze-x1-pod");
        assert_eq!(calls[0].container, WAITER_CONTAINER);
        assert_eq!(calls[0].command, vec!["/scan-waiter".to_string(), "ok".to_string()]);
    }

    #[tokio::test]
    async fn webhook_without_run_is_rejected() {
        let cluster = running_project();
        cluster
            .patch_status::<L2c>("demo", "shop", json!({ "pipelineRunName": null }))
            .await
            .unwrap();
        let recorder = RecordingExecutor::new();
        let bridge = WebhookBridge::new(cluster, recorder.clone());

        let err = bridge.handle(&event("demo_shop", "ERROR")).await.unwrap_err();
        assert!(matches!(err.inner(), StdError::NoActiveRun(_)));
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let bridge = WebhookBridge::new(MemoryCluster::new(), RecordingExecutor::new());
        let err = bridge.handle(&event("demo_other", "OK")).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn stderr_is_a_failure() {
        let recorder = RecordingExecutor::new();
        recorder.respond_with(ExecOutput {
            stdout: String::new(),
            stderr: "no such file /wait".into(),
        });
        let bridge = WebhookBridge::new(running_project(), recorder);
        let err = bridge.handle(&event("demo_shop", "OK")).await.unwrap_err();
        assert!(matches!(err.inner(), StdError::ExecError(_)));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn pod_name_is_required() {
        let mut run = PipelineRun::new("shop", PipelineRunSpec::default());
        run.status = serde_json::from_value(json!({
            "taskRuns": {
                "t": {
                    "pipelineTaskName": "analyze",
                    "status": { "conditions": [{ "type": "Succeeded", "status": "Unknown", "reason": "Running" }] }
                }
            }
        }))
        .unwrap();
        let err = resolve_signal_target(&run).unwrap_err();
        assert!(matches!(err.inner(), StdError::InvalidPodName(_)));
    }
}
