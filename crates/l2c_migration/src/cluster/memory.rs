//! In-memory [`Cluster`] for tests.
//!
//! Objects are stored as JSON keyed by kind, namespace and name. The store assigns
//! `uid` and a monotonically increasing `resourceVersion`, rejects stale replaces,
//! and records every create and delete so tests can assert on call counts.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use serde_json::Value;

use super::{Cluster, ClusterResource};
use crate::util::errors::{Error, Result, StdError};

#[derive(Debug, Default)]
struct Store {
    objects: BTreeMap<(String, String, String), Value>,
    nodes: Vec<Node>,
    next_version: u64,
    creates: Vec<String>,
    deletes: Vec<String>,
    status_patches: Vec<String>,
    rejected_deletes: HashSet<String>,
}

/// Cloning shares the underlying store.
#[derive(Clone, Debug, Default)]
pub struct MemoryCluster {
    state: Arc<RwLock<Store>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::StdError(StdError::Conflict("memory cluster lock poisoned".to_string()))
}

fn kind_of<K: ClusterResource>() -> String {
    K::kind(&()).to_string()
}

fn key<K: ClusterResource>(namespace: &str, name: &str) -> (String, String, String) {
    (
        format!("{}/{}", K::api_version(&()), K::kind(&())),
        namespace.to_string(),
        name.to_string(),
    )
}

fn serialize<K: ClusterResource>(obj: &K) -> Result<Value> {
    serde_json::to_value(obj).map_err(|e| Error::StdError(StdError::JsonSerializationError(e)))
}

fn deserialize<K: ClusterResource>(value: Value) -> Result<K> {
    serde_json::from_value(value).map_err(|e| Error::StdError(StdError::JsonSerializationError(e)))
}

/// RFC 7386 JSON merge patch.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (k, v) in patch {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object as if it had been created by someone else. Not counted as a create.
    pub fn insert<K: ClusterResource>(&self, obj: &K) -> Result<()> {
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        let name = obj.meta().name.clone().unwrap_or_default();
        let mut state = self.state.write().map_err(poison_err)?;
        state.next_version += 1;
        let version = state.next_version;
        let mut value = serialize(obj)?;
        stamp(&mut value, version, true);
        state.objects.insert(key::<K>(&namespace, &name), value);
        Ok(())
    }

    pub fn add_node(&self, node: Node) -> Result<()> {
        self.state.write().map_err(poison_err)?.nodes.push(node);
        Ok(())
    }

    /// Makes every later delete of `kind/name` fail.
    pub fn reject_deletes(&self, kind: &str, name: &str) -> Result<()> {
        self.state
            .write()
            .map_err(poison_err)?
            .rejected_deletes
            .insert(format!("{kind}/{name}"));
        Ok(())
    }

    /// `Kind/name` of every create call, in order.
    pub fn creates(&self) -> Vec<String> {
        self.state.read().map(|s| s.creates.clone()).unwrap_or_default()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state.read().map(|s| s.deletes.clone()).unwrap_or_default()
    }

    pub fn status_patches(&self) -> Vec<String> {
        self.state.read().map(|s| s.status_patches.clone()).unwrap_or_default()
    }

    pub fn count<K: ClusterResource>(&self, namespace: &str) -> usize {
        let kind = key::<K>(namespace, "").0;
        self.state
            .read()
            .map(|s| {
                s.objects
                    .keys()
                    .filter(|(k, ns, _)| *k == kind && ns == namespace)
                    .count()
            })
            .unwrap_or_default()
    }
}

fn stamp(value: &mut Value, version: u64, assign_uid: bool) {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert("resourceVersion".into(), Value::String(version.to_string()));
        if assign_uid && !meta.contains_key("uid") {
            meta.insert("uid".into(), Value::String(format!("uid-{version}")));
        }
    }
}

fn resource_version(value: &Value) -> Option<&str> {
    value.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn get<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let value = {
            let state = self.state.read().map_err(poison_err)?;
            state.objects.get(&key::<K>(namespace, name)).cloned()
        };
        value.map(deserialize).transpose()
    }

    async fn create<K: ClusterResource>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let mut value = serialize(obj)?;
        if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert("namespace".into(), Value::String(namespace.to_string()));
        }
        let stored = {
            let mut state = self.state.write().map_err(poison_err)?;
            let k = key::<K>(namespace, &name);
            if state.objects.contains_key(&k) {
                return Err(Error::StdError(StdError::Conflict(format!(
                    "{} {namespace}/{name} already exists",
                    kind_of::<K>()
                ))));
            }
            state.next_version += 1;
            let version = state.next_version;
            stamp(&mut value, version, true);
            state.creates.push(format!("{}/{name}", kind_of::<K>()));
            state.objects.insert(k, value.clone());
            value
        };
        deserialize(stored)
    }

    async fn replace<K: ClusterResource>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let mut value = serialize(obj)?;
        let stored = {
            let mut state = self.state.write().map_err(poison_err)?;
            let k = key::<K>(namespace, &name);
            let current = state.objects.get(&k).ok_or_else(|| {
                Error::StdError(StdError::NotFound(format!("{} {namespace}/{name}", kind_of::<K>())))
            })?;
            if let Some(expected) = resource_version(&value) {
                if Some(expected) != resource_version(current) {
                    return Err(Error::StdError(StdError::Conflict(format!(
                        "{} {namespace}/{name} was modified",
                        kind_of::<K>()
                    ))));
                }
            }
            let uid = current.pointer("/metadata/uid").cloned();
            let status = current.get("status").cloned();
            state.next_version += 1;
            let version = state.next_version;
            stamp(&mut value, version, false);
            if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
                if let Some(uid) = uid {
                    meta.insert("uid".into(), uid);
                }
            }
            // replace does not touch the status subresource
            if let (Some(obj), Some(status)) = (value.as_object_mut(), status) {
                obj.insert("status".into(), status);
            }
            state.objects.insert(k, value.clone());
            value
        };
        deserialize(stored)
    }

    async fn delete<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<bool> {
        let mut state = self.state.write().map_err(poison_err)?;
        let label = format!("{}/{name}", kind_of::<K>());
        if state.rejected_deletes.contains(&label) {
            return Err(Error::StdError(StdError::Conflict(format!("delete of {label} rejected"))));
        }
        let removed = state.objects.remove(&key::<K>(namespace, name)).is_some();
        if removed {
            state.deletes.push(label);
        }
        Ok(removed)
    }

    async fn patch_status<K: ClusterResource>(
        &self,
        namespace: &str,
        name: &str,
        status: Value,
    ) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.next_version += 1;
        let version = state.next_version;
        let current = state.objects.get_mut(&key::<K>(namespace, name)).ok_or_else(|| {
            Error::StdError(StdError::NotFound(format!("{} {namespace}/{name}", kind_of::<K>())))
        })?;
        merge(current, &serde_json::json!({ "status": status }));
        stamp(current, version, false);
        state.status_patches.push(format!("{}/{name}", kind_of::<K>()));
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.state.read().map_err(poison_err)?.nodes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("demo".to_string()),
                ..Default::default()
            },
            data: Some([("k".to_string(), value.to_string())].into_iter().collect()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_then_get_assigns_identity() {
        let cluster = MemoryCluster::new();
        cluster.create("demo", &config_map("a", "1")).await.unwrap();

        let stored: ConfigMap = cluster.get("demo", "a").await.unwrap().unwrap();
        assert!(stored.metadata.uid.is_some());
        assert!(stored.metadata.resource_version.is_some());
        assert_eq!(cluster.creates(), vec!["ConfigMap/a".to_string()]);
        assert!(cluster.create("demo", &config_map("a", "2")).await.is_err());
    }

    #[tokio::test]
    async fn stale_replace_is_a_conflict() {
        let cluster = MemoryCluster::new();
        let created = cluster.create("demo", &config_map("a", "1")).await.unwrap();

        let mut first = created.clone();
        first.data = Some([("k".to_string(), "2".to_string())].into_iter().collect());
        cluster.replace("demo", &first).await.unwrap();

        let err = cluster.replace("demo", &created).await.unwrap_err();
        assert!(matches!(err.inner(), StdError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_reports_absence_and_rejections() {
        let cluster = MemoryCluster::new();
        assert!(!cluster.delete::<ConfigMap>("demo", "missing").await.unwrap());

        cluster.create("demo", &config_map("a", "1")).await.unwrap();
        cluster.reject_deletes("ConfigMap", "a").unwrap();
        assert!(cluster.delete::<ConfigMap>("demo", "a").await.is_err());
    }

    #[test]
    fn merge_patch_replaces_arrays_and_drops_nulls() {
        let mut target = serde_json::json!({ "a": [1, 2], "b": "x", "c": { "d": 1 } });
        merge(&mut target, &serde_json::json!({ "a": [3], "b": null, "c": { "e": 2 } }));
        assert_eq!(target, serde_json::json!({ "a": [3], "c": { "d": 1, "e": 2 } }));
    }
}
