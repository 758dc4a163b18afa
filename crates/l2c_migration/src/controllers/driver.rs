//! One reconcile pass over an `L2c`, independent of the kube-runtime plumbing.
//!
//! Order within a pass is fixed: credential encryption, readiness, pipeline
//! projection, analysis follow-up, address resolution, then a single status write.
//! Each step reads before it writes, so a pass cut short anywhere converges on the
//! next one.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tokio::time::Duration;
use tracing::{info, warn};

use super::ingress::{resolve_ingress_host, was_url};
use super::{owner_reference, projector, readiness};
use crate::api::v1::l2c::{L2c, L2cEditor, L2cStatus};
use crate::cluster::{ensure::ensure, Cluster};
use crate::quality::{QualityOrchestrator, SonarApi};
use crate::resources::ide::{
    create_ide_config_map, create_ide_deployment, create_ide_ingress, create_ide_secret, create_ide_service,
    ide_password, ide_resource_name, random_password,
};
use crate::util::conditions::{
    is_status_condition_present_and_equal, is_status_condition_true, reset_to_defaults, ConditionStatus, Phase,
    PhaseReason, ProjectCondition,
};
use crate::util::config::OperatorConfig;
use crate::util::crypto::PasswordCipher;
use crate::util::errors::{Error, Result, StdError};

const IDE_PASSWORD_LENGTH: usize = 30;

pub struct Driver<C, S> {
    cluster: C,
    orchestrator: Arc<QualityOrchestrator<S>>,
    config: Arc<OperatorConfig>,
    cipher: PasswordCipher,
}

impl<C: Cluster, S: SonarApi> Driver<C, S> {
    pub fn new(cluster: C, orchestrator: Arc<QualityOrchestrator<S>>, config: Arc<OperatorConfig>) -> Self {
        let cipher = PasswordCipher::new(&config.encrypt_key);
        Self {
            cluster,
            orchestrator,
            config,
            cipher,
        }
    }

    pub async fn apply(&self, l2c: &L2c) -> Result<Action> {
        let namespace = l2c.namespace_or_err()?;
        let name = l2c.name_any();

        if let Some(encrypted) = self.encrypt_credentials(l2c)? {
            self.cluster.replace(&namespace, &encrypted).await?;
            info!("Encrypted database credentials of L2c {}/{}", namespace, name);
            return Ok(Action::await_change());
        }

        let mut status = l2c.status.clone().unwrap_or_default();
        if status.conditions.is_empty() {
            status.conditions = reset_to_defaults::<ProjectCondition>();
        }
        if status.phases.is_empty() {
            status.phases = reset_to_defaults::<Phase>();
        }

        let result = self.converge(l2c, &mut status).await;

        if l2c.status.as_ref() != Some(&status) {
            let value = serde_json::to_value(&status)
                .map_err(|e| Error::StdError(StdError::JsonSerializationError(e)))?;
            self.cluster.patch_status::<L2c>(&namespace, &name, value).await?;
        }
        result?;

        if is_status_condition_true(&status.conditions, ProjectCondition::Running) {
            Ok(Action::requeue(Duration::from_secs(30)))
        } else {
            Ok(Action::requeue(Duration::from_secs(5 * 60)))
        }
    }

    async fn converge(&self, l2c: &L2c, status: &mut L2cStatus) -> Result<()> {
        readiness::ensure_ready(
            &self.cluster,
            &self.orchestrator,
            &self.config,
            &self.cipher,
            l2c,
            status,
        )
        .await?;
        projector::project(&self.cluster, l2c, status).await?;
        self.follow_analysis(l2c, status).await?;
        self.resolve_addresses(l2c, status).await
    }

    /// The spec with every plaintext database password encrypted, or `None` if there is nothing to do.
    fn encrypt_credentials(&self, l2c: &L2c) -> Result<Option<L2c>> {
        let mut updated = l2c.clone();
        let Some(db) = updated.spec.db.as_mut() else {
            return Ok(None);
        };
        let mut changed = false;
        for password in [&mut db.from.password, &mut db.to.password] {
            if !self.cipher.is_encrypted(password) {
                *password = self.cipher.encrypt(password)?;
                changed = true;
            }
        }
        Ok(changed.then_some(updated))
    }

    async fn follow_analysis(&self, l2c: &L2c, status: &mut L2cStatus) -> Result<()> {
        if is_status_condition_present_and_equal(
            &status.phases,
            Phase::Analyze,
            ConditionStatus::False,
            Some(PhaseReason::Failed.as_str()),
        ) {
            status.sonar_issues = self.orchestrator.issues(&l2c.project_key()?).await?;
            let password = self.ensure_editor(l2c).await?;
            let url = status.editor.as_ref().and_then(|e| e.url.clone());
            status.editor = Some(L2cEditor { url, password });
        } else if is_status_condition_true(&status.phases, Phase::Analyze) && !status.sonar_issues.is_empty() {
            status.sonar_issues.clear();
        }
        Ok(())
    }

    /// Web IDE on the project's sources. Returns the login password as stored.
    async fn ensure_editor(&self, l2c: &L2c) -> Result<Option<String>> {
        let namespace = l2c.namespace_or_err()?;
        let owner = owner_reference(l2c)?;
        let owner = Some(&owner);

        ensure(
            &self.cluster,
            create_ide_secret(l2c, &random_password(IDE_PASSWORD_LENGTH))?,
            owner,
            false,
        )
        .await?;
        ensure(&self.cluster, create_ide_config_map(l2c, &self.config)?, owner, false).await?;
        ensure(&self.cluster, create_ide_service(l2c)?, owner, false).await?;
        ensure(&self.cluster, create_ide_ingress(l2c)?, owner, false).await?;
        ensure(&self.cluster, create_ide_deployment(l2c, &self.config)?, owner, false).await?;

        let secret = self
            .cluster
            .get::<Secret>(&namespace, &ide_resource_name(l2c))
            .await?
            .as_ref()
            .and_then(ide_password);
        if secret.is_none() {
            warn!("IDE secret of L2c {} has no password", l2c.name_any());
        }
        Ok(secret)
    }

    async fn resolve_addresses(&self, l2c: &L2c, status: &mut L2cStatus) -> Result<()> {
        if let Some(url) = was_url(&self.cluster, l2c).await? {
            status.was_url = Some(url);
        }
        if let Some(editor) = status.editor.as_mut() {
            let namespace = l2c.namespace_or_err()?;
            if let Some(host) = resolve_ingress_host(&self.cluster, &namespace, &ide_resource_name(l2c)).await? {
                editor.url = Some(format!("http://{host}"));
            }
        }
        Ok(())
    }

    /// Removes the SonarQube state of a deleted project. Safe to repeat.
    pub async fn cleanup(&self, l2c: &L2c) -> Result<()> {
        let key = l2c.project_key()?;
        self.orchestrator.delete_project(&key).await?;
        self.orchestrator.delete_profiles(&key).await?;
        info!("Removed SonarQube project {}", key);
        Ok(())
    }
}
