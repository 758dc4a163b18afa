//! Provisions everything a project needs before a run can be started.
//!
//! Steps run in a fixed order and stop at the first failure. The failing step is
//! recorded as the reason of `ProjectReady=False`; the next reconcile starts over and
//! skips whatever already exists.

use std::future::Future;

use kube::ResourceExt;
use tracing::{info, warn};

use super::owner_reference;
use crate::api::v1::l2c::{L2c, L2cStatus};
use crate::cluster::{ensure::ensure, Cluster};
use crate::quality::{rules::desired_rules, QualityOrchestrator, SonarApi};
use crate::resources::db::{create_db_config_map, create_db_secret};
use crate::resources::pipeline::create_pipeline;
use crate::resources::rbac::{create_role_binding, create_service_account};
use crate::resources::was::create_was_config_map;
use crate::util::conditions::{set_condition, ConditionStatus, ProjectCondition};
use crate::util::config::OperatorConfig;
use crate::util::crypto::PasswordCipher;
use crate::util::errors::{Error, Result};

pub const REASON_READY: &str = "Ready";

async fn step<F, T>(reason: &'static str, fut: F) -> std::result::Result<T, (&'static str, Error)>
where
    F: Future<Output = Result<T>>,
{
    fut.await.map_err(|e| (reason, e))
}

async fn provision<C: Cluster, S: SonarApi>(
    cluster: &C,
    orchestrator: &QualityOrchestrator<S>,
    config: &OperatorConfig,
    cipher: &PasswordCipher,
    l2c: &L2c,
) -> std::result::Result<(), (&'static str, Error)> {
    let owner = step("OwnerReferenceFailed", async { owner_reference(l2c) }).await?;
    let owner = Some(&owner);

    step("EnsureWasConfigMapFailed", async {
        ensure(cluster, create_was_config_map(l2c)?, owner, false).await
    })
    .await?;
    step("EnsureServiceAccountFailed", async {
        ensure(cluster, create_service_account(l2c)?, owner, false).await
    })
    .await?;
    step("EnsureRoleBindingFailed", async {
        ensure(cluster, create_role_binding(l2c)?, owner, false).await
    })
    .await?;
    step("EnsurePipelineFailed", async {
        ensure(cluster, create_pipeline(l2c, config)?, owner, false).await
    })
    .await?;

    if l2c.spec.db.is_some() {
        step("EnsureDBConfigMapFailed", async {
            ensure(cluster, create_db_config_map(l2c, config, cipher)?, owner, false).await
        })
        .await?;
        step("EnsureDBSecretFailed", async {
            ensure(cluster, create_db_secret(l2c, cipher)?, owner, false).await
        })
        .await?;
    }

    let key = step("SonarProjectFailed", async { l2c.project_key() }).await?;
    step("SonarProjectFailed", orchestrator.ensure_project(&key)).await?;
    step(
        "SonarQualityProfileFailed",
        orchestrator.ensure_quality_profiles(&key, &desired_rules(l2c)),
    )
    .await?;
    Ok(())
}

/// Ensures every derived object and flips `ProjectReady` accordingly.
///
/// On failure the condition carries the failing step and the error is returned so the
/// caller can persist the status and end the cycle.
pub async fn ensure_ready<C: Cluster, S: SonarApi>(
    cluster: &C,
    orchestrator: &QualityOrchestrator<S>,
    config: &OperatorConfig,
    cipher: &PasswordCipher,
    l2c: &L2c,
    status: &mut L2cStatus,
) -> Result<()> {
    match provision(cluster, orchestrator, config, cipher, l2c).await {
        Ok(()) => {
            status.pipeline_name = Some(l2c.name_any());
            if set_condition(
                &mut status.conditions,
                ProjectCondition::Ready,
                ConditionStatus::True,
                REASON_READY,
                "project is ready to run",
            ) {
                info!("L2c {} is ready", l2c.name_any());
            }
            Ok(())
        }
        Err((reason, e)) => {
            warn!("L2c {} not ready, {}: {}", l2c.name_any(), reason, e);
            set_condition(
                &mut status.conditions,
                ProjectCondition::Ready,
                ConditionStatus::False,
                reason,
                &e.message(),
            );
            Err(e)
        }
    }
}
