//! Starting a pipeline run on request.

use kube::ResourceExt;
use serde_json::json;
use tracing::info;

use super::owner_reference;
use crate::api::tekton::PipelineRun;
use crate::api::v1::l2c::L2c;
use crate::cluster::{ensure::ensure, Cluster};
use crate::quality::credentials;
use crate::resources::pipeline::create_pipeline_run;
use crate::util::conditions::{
    is_status_condition_true, reset_to_defaults, set_condition, ConditionType, Phase, ProjectCondition,
};
use crate::util::config::OperatorConfig;
use crate::util::errors::{Error, Result, StdError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Started(String),
    /// Readiness provisioning has not finished.
    NotReady,
    AlreadyRunning,
}

impl RunOutcome {
    pub fn message(&self) -> String {
        match self {
            RunOutcome::Started(name) => format!("PipelineRun {name} started"),
            RunOutcome::NotReady => "project is not ready yet".to_string(),
            RunOutcome::AlreadyRunning => "project is already running".to_string(),
        }
    }
}

/// Starts (or restarts) the project's pipeline with the analyzer token.
///
/// The previous run of the same name is replaced. Phases and the success flag are
/// reset so the new run is projected onto a clean slate.
pub async fn start_run<C: Cluster>(
    cluster: &C,
    config: &OperatorConfig,
    namespace: &str,
    name: &str,
) -> Result<RunOutcome> {
    let l2c = cluster
        .get::<L2c>(namespace, name)
        .await?
        .ok_or_else(|| Error::StdError(StdError::NotFound(format!("L2c {namespace}/{name}"))))?;

    let status = l2c.status.clone().unwrap_or_default();
    if !is_status_condition_true(&status.conditions, ProjectCondition::Ready) {
        return Ok(RunOutcome::NotReady);
    }
    if is_status_condition_true(&status.conditions, ProjectCondition::Running) {
        return Ok(RunOutcome::AlreadyRunning);
    }

    let creds = credentials::load(cluster, &config.namespace, &config.sonar_resource_name).await?;
    let run = create_pipeline_run(&l2c, &config.sonar_url(), &creds.analyzer_token)?;
    let run_name = run.name_any();
    ensure::<C, PipelineRun>(cluster, run, Some(&owner_reference(&l2c)?), true).await?;

    // Conditions may have moved on while the run was being replaced.
    let mut conditions = cluster
        .get::<L2c>(namespace, name)
        .await?
        .and_then(|l| l.status)
        .map(|s| s.conditions)
        .unwrap_or(status.conditions);
    let (succeeded, reason, message) = ProjectCondition::Succeeded.default_state();
    set_condition(&mut conditions, ProjectCondition::Succeeded, succeeded, reason, message);
    cluster
        .patch_status::<L2c>(
            namespace,
            name,
            json!({
                "conditions": conditions,
                "phases": reset_to_defaults::<Phase>(),
                "pipelineRunName": run_name,
                "completionTime": null,
                "taskStatus": [],
                "sonarIssues": [],
            }),
        )
        .await?;

    info!("Started PipelineRun {}/{} for {}", namespace, run_name, l2c.name_any());
    Ok(RunOutcome::Started(run_name))
}
