use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec};
use kube::api::{Api, PostParams};
use kube::Client;
use l2c_migration::cluster::Cluster;
use l2c_migration::controllers::run::{start_run, RunOutcome};
use l2c_migration::util::config::OperatorConfig;
use l2c_migration::util::errors::{Error, Result, StdError};
use tracing::info;

/// Identity forwarded by the aggregation layer.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user: Option<String>,
    pub groups: Vec<String>,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether `user` may `update` the `run` subresource of `l2cs/<name>`.
    async fn may_run(&self, user: &str, groups: &[String], namespace: &str, name: &str) -> Result<bool>;
}

/// Asks the API server through a SubjectAccessReview.
pub struct KubeAuthorizer {
    client: Client,
}

impl KubeAuthorizer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Authorizer for KubeAuthorizer {
    async fn may_run(&self, user: &str, groups: &[String], namespace: &str, name: &str) -> Result<bool> {
        let review = SubjectAccessReview {
            spec: SubjectAccessReviewSpec {
                user: Some(user.to_string()),
                groups: Some(groups.to_vec()),
                resource_attributes: Some(ResourceAttributes {
                    namespace: Some(namespace.to_string()),
                    verb: Some("update".to_string()),
                    group: Some("tmax.io".to_string()),
                    version: Some("v1".to_string()),
                    resource: Some("l2cs".to_string()),
                    subresource: Some("run".to_string()),
                    name: Some(name.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let reviewed = Api::<SubjectAccessReview>::all(self.client.clone())
            .create(&PostParams::default(), &review)
            .await
            .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
        Ok(reviewed.status.map(|s| s.allowed).unwrap_or(false))
    }
}

/// Result of a run request: whether it was acted on, and what to tell the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResponse {
    pub accepted_only: bool,
    pub message: String,
}

pub struct RunService<C, A> {
    cluster: C,
    authorizer: A,
    config: Arc<OperatorConfig>,
}

impl<C: Cluster, A: Authorizer> RunService<C, A> {
    pub fn new(cluster: C, authorizer: A, config: Arc<OperatorConfig>) -> Self {
        Self {
            cluster,
            authorizer,
            config,
        }
    }

    pub async fn run(&self, caller: &Caller, namespace: &str, name: &str) -> Result<RunResponse> {
        let user = caller
            .user
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::StdError(StdError::Unauthorized("no user in request".to_string())))?;
        if !self.authorizer.may_run(user, &caller.groups, namespace, name).await? {
            return Err(Error::StdError(StdError::Unauthorized(format!(
                "{user} may not run l2cs/{name} in {namespace}"
            ))));
        }

        let outcome = start_run(&self.cluster, &self.config, namespace, name).await?;
        info!("Run of {}/{} requested by {}: {:?}", namespace, name, user, outcome);
        Ok(RunResponse {
            accepted_only: !matches!(outcome, RunOutcome::Started(_)),
            message: outcome.message(),
        })
    }
}
