//! Access to the control-plane object store.
//!
//! The reconciler, the webhook bridge and the SonarQube bootstrap only talk to the
//! cluster through [`Cluster`], so their decision logic runs unchanged against
//! the in-memory store of the `memory` module in tests.

pub mod ensure;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::debug;

use crate::util::errors::{Error, Result, StdError};

/// Any namespaced, statically typed Kubernetes object.
pub trait ClusterResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Serialize
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
}

impl<K> ClusterResource for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait Cluster: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn create<K: ClusterResource>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Full update; fails with `Conflict` when `obj` carries a stale resourceVersion.
    async fn replace<K: ClusterResource>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Returns `false` when the object was already gone.
    async fn delete<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Merge-patches the status subresource with `{"status": status}`.
    async fn patch_status<K: ClusterResource>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;
}

/// [`Cluster`] backed by the API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: ClusterResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn kube_error(e: kube::Error) -> Error {
    match e {
        kube::Error::Api(ref err) if err.code == 409 => {
            Error::StdError(StdError::Conflict(err.message.clone()))
        }
        e => Error::StdError(StdError::KubeError(e)),
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api::<K>(namespace).get_opt(name).await.map_err(kube_error)
    }

    async fn create<K: ClusterResource>(&self, namespace: &str, obj: &K) -> Result<K> {
        self.api::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(kube_error)
    }

    async fn replace<K: ClusterResource>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.meta().name.clone().ok_or_else(|| {
            Error::StdError(StdError::MetadataMissing(format!("{} without a name", K::kind(&()))))
        })?;
        self.api::<K>(namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(kube_error)
    }

    async fn delete<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.api::<K>(namespace).delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                debug!("{} {}/{} already gone", K::kind(&()), namespace, name);
                Ok(false)
            }
            Err(e) => Err(kube_error(e)),
        }
    }

    async fn patch_status<K: ClusterResource>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()> {
        self.api::<K>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(json!({ "status": status })))
            .await
            .map_err(kube_error)?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes = Api::<Node>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(kube_error)?;
        Ok(nodes.items)
    }
}
