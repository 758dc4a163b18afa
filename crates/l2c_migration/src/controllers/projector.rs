//! Folds the state of the project's PipelineRun into the `L2c` status.
//!
//! The run is looked up by the stored `pipelineRunName`, or adopted by the project's own
//! name when nothing is stored yet. A run that vanished mid-flight cancels every phase
//! still marked as running and drops its task entries. A run whose aggregate state is not settled (zero or several
//! top-level conditions) leaves the phases alone for that cycle.

use kube::ResourceExt;
use tracing::{debug, info};

use super::owner_reference;
use crate::api::tekton::{PipelineRun, RunCondition};
use crate::api::v1::l2c::{L2c, L2cStatus, L2cTaskStatus, ServiceType};
use crate::cluster::{ensure::ensure, Cluster};
use crate::resources::was::{create_was_ingress, create_was_service};
use crate::util::conditions::{
    get_condition, set_condition, ConditionStatus, ConditionType, Phase, PhaseReason, ProjectCondition,
};
use crate::util::errors::Result;

const REASON_SUCCESSFUL: &str = "Successful";

pub async fn project<C: Cluster>(cluster: &C, l2c: &L2c, status: &mut L2cStatus) -> Result<()> {
    let namespace = l2c.namespace_or_err()?;

    let run = match status.pipeline_run_name.clone().filter(|n| !n.is_empty()) {
        None => {
            let run = cluster.get::<PipelineRun>(&namespace, &l2c.name_any()).await?;
            if let Some(run) = &run {
                info!("Adopting PipelineRun {}/{}", namespace, run.name_any());
                status.pipeline_run_name = Some(run.name_any());
            }
            run
        }
        Some(name) => {
            let run = cluster.get::<PipelineRun>(&namespace, &name).await?;
            if run.is_none() {
                info!("PipelineRun {}/{} disappeared", namespace, name);
                status.pipeline_run_name = None;
            }
            run
        }
    };

    match run {
        Some(run) => apply_run(cluster, l2c, &run, status).await,
        None => {
            cancel_running_phases(status);
            status.task_status.clear();
            Ok(())
        }
    }
}

async fn apply_run<C: Cluster>(cluster: &C, l2c: &L2c, run: &PipelineRun, status: &mut L2cStatus) -> Result<()> {
    let Some(aggregate) = run.aggregate_condition() else {
        debug!("PipelineRun {} has no settled condition yet", run.name_any());
        return Ok(());
    };

    match run.completion_time() {
        Some(completed) => {
            status.completion_time = Some(completed);
            set_condition(
                &mut status.conditions,
                ProjectCondition::Running,
                ConditionStatus::False,
                &aggregate.reason,
                &aggregate.message,
            );
        }
        None => {
            status.completion_time = None;
            set_condition(
                &mut status.conditions,
                ProjectCondition::Running,
                ConditionStatus::True,
                PhaseReason::Running.as_str(),
                "L2c is now running",
            );
        }
    }

    status.task_status = run
        .task_runs()
        .map(|(name, task)| L2cTaskStatus {
            task_run_name: name.clone(),
            conditions: task.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default(),
            pod_name: task.status.as_ref().map(|s| s.pod_name.clone()).unwrap_or_default(),
            start_time: task.status.as_ref().and_then(|s| s.start_time),
            completion_time: task.status.as_ref().and_then(|s| s.completion_time),
        })
        .collect();

    for (_, task) in run.task_runs() {
        let (Some(phase), Some(condition)) = (
            Phase::from_task_name(&task.pipeline_task_name),
            task.single_condition(),
        ) else {
            continue;
        };
        apply_phase(status, phase, condition);
    }

    if is_successful(aggregate) {
        set_condition(
            &mut status.conditions,
            ProjectCondition::Succeeded,
            ConditionStatus::True,
            PhaseReason::Succeeded.as_str(),
            &aggregate.message,
        );
        expose(cluster, l2c).await?;
    } else {
        set_condition(
            &mut status.conditions,
            ProjectCondition::Succeeded,
            ConditionStatus::False,
            &aggregate.reason,
            &aggregate.message,
        );
    }
    Ok(())
}

fn apply_phase(status: &mut L2cStatus, phase: Phase, condition: &RunCondition) {
    if set_condition(
        &mut status.phases,
        phase,
        ConditionStatus::parse(&condition.status),
        &condition.reason,
        &condition.message,
    ) {
        info!("{} is now {}/{}", phase, condition.status, condition.reason);
    }
}

fn is_successful(condition: &RunCondition) -> bool {
    ConditionStatus::parse(&condition.status) == ConditionStatus::True && condition.reason == REASON_SUCCESSFUL
}

/// Service, and for `Ingress` exposure the Ingress, in front of the deployed application.
async fn expose<C: Cluster>(cluster: &C, l2c: &L2c) -> Result<()> {
    let owner = owner_reference(l2c)?;
    ensure(cluster, create_was_service(l2c)?, Some(&owner), false).await?;
    if l2c.spec.was.to.service_type == ServiceType::Ingress {
        ensure(cluster, create_was_ingress(l2c)?, Some(&owner), false).await?;
    }
    Ok(())
}

fn cancel_running_phases(status: &mut L2cStatus) {
    let (_, reason, message) = ProjectCondition::Running.default_state();
    set_condition(
        &mut status.conditions,
        ProjectCondition::Running,
        ConditionStatus::False,
        reason,
        message,
    );

    for phase in Phase::all() {
        let running = get_condition(&status.phases, *phase)
            .map(|c| c.reason == PhaseReason::Running.as_str())
            .unwrap_or(false);
        if running {
            set_condition(
                &mut status.phases,
                *phase,
                ConditionStatus::False,
                PhaseReason::Canceled.as_str(),
                "pipeline run was removed before it completed",
            );
            info!("{} canceled", phase);
        }
    }
}
