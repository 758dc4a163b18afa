//! Brings up the operator's SonarQube before anything talks to it.

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, info};

use crate::cluster::ensure::ensure;
use crate::cluster::Cluster;
use crate::resources::sonarqube::{
    create_sonar_deployment, create_sonar_pvc, create_sonar_secret, create_sonar_service,
};
use crate::util::config::OperatorConfig;
use crate::util::errors::{Error, Result, StdError};

/// Creates whichever of the credential secret, claim, service and deployment are missing.
/// Existing objects are left alone.
pub async fn deploy<C: Cluster>(cluster: &C, config: &OperatorConfig) -> Result<()> {
    let namespace = &config.namespace;
    let name = &config.sonar_resource_name;
    ensure(cluster, create_sonar_secret(namespace, name), None, false).await?;
    ensure(cluster, create_sonar_pvc(config), None, false).await?;
    ensure(cluster, create_sonar_service(config), None, false).await?;
    ensure(cluster, create_sonar_deployment(config), None, false).await?;
    Ok(())
}

fn available_replicas(deploy: &Deployment) -> i32 {
    deploy
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or_default()
}

/// Polls the SonarQube deployment until at least one replica is available.
pub async fn wait_until_available<C: Cluster>(cluster: &C, config: &OperatorConfig, poll: Duration) -> Result<()> {
    let namespace = &config.namespace;
    let name = &config.sonar_resource_name;
    loop {
        let deploy = cluster.get::<Deployment>(namespace, name).await?.ok_or_else(|| {
            Error::StdError(StdError::NotFound(format!("deployment {namespace}/{name}")))
        })?;
        if available_replicas(&deploy) > 0 {
            info!("SonarQube {}/{} is available", namespace, name);
            return Ok(());
        }
        debug!("Waiting for SonarQube {}/{}", namespace, name);
        tokio::time::sleep(poll).await;
    }
}
