use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::tekton::RunCondition;
use crate::api::v1::conditions_schema;
use crate::util::errors::{Error, Result, StdError};

pub static L2C_FINALIZER: &str = "finalizer.l2c.tmax.io";

/// A legacy-to-cloud migration project: one application server (and optionally one
/// database) moved from a source platform to a target platform through the fixed
/// analyze, migrate, build and deploy pipeline.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(kind = "L2c", group = "tmax.io", version = "v1", namespaced)]
#[kube(status = "L2cStatus", shortname = "l2c")]
#[kube(
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"ProjectReady\")].status"}"#,
    printcolumn = r#"{"name":"Running","type":"string","jsonPath":".status.conditions[?(@.type==\"ProjectRunning\")].status"}"#
)]
pub struct L2cSpec {
    pub was: L2cWas,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<L2cDb>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct L2cWas {
    pub from: L2cWasFrom,
    pub to: L2cWasTo,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct L2cWasFrom {
    /// Source application server, e.g. `weblogic`.
    #[serde(rename = "type")]
    pub type_: String,
    pub git: L2cGit,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct L2cGit {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct L2cWasTo {
    /// Target application server, e.g. `jeus`.
    #[serde(rename = "type")]
    pub type_: String,
    pub image: L2cImage,
    /// Port the migrated application is exposed on.
    pub port: i32,
    #[serde(default)]
    pub service_type: ServiceType,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct L2cImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reg_secret: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ServiceType {
    ClusterIP,
    LoadBalancer,
    NodePort,
    #[default]
    Ingress,
}

impl ServiceType {
    /// Kubernetes Service type backing this exposure mode.
    pub fn service_kind(&self) -> &'static str {
        match self {
            ServiceType::ClusterIP | ServiceType::Ingress => "ClusterIP",
            ServiceType::LoadBalancer => "LoadBalancer",
            ServiceType::NodePort => "NodePort",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct L2cDb {
    pub from: L2cDbFrom,
    pub to: L2cDbTo,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct L2cDbFrom {
    /// Source database, e.g. `oracle`.
    #[serde(rename = "type")]
    pub type_: String,
    pub host: String,
    pub port: i32,
    pub user: String,
    /// Encrypted in place by the controller on first reconcile.
    pub password: String,
    pub sid: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct L2cDbTo {
    /// Target database, e.g. `tibero`.
    #[serde(rename = "type")]
    pub type_: String,
    pub storage_size: String,
    pub user: String,
    /// Encrypted in place by the controller on first reconcile.
    pub password: String,
}

/// The status object of `L2c`
///
/// Optional fields serialize as `null` so that a merge patch of the whole status clears them.
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct L2cStatus {
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub phases: Vec<Condition>,
    pub completion_time: Option<DateTime<Utc>>,
    pub pipeline_name: Option<String>,
    pub pipeline_run_name: Option<String>,
    #[serde(default)]
    pub task_status: Vec<L2cTaskStatus>,
    pub was_url: Option<String>,
    pub editor: Option<L2cEditor>,
    #[serde(default)]
    pub sonar_issues: Vec<SonarIssue>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct L2cTaskStatus {
    pub task_run_name: String,
    #[serde(default)]
    pub conditions: Vec<RunCondition>,
    #[serde(default)]
    pub pod_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
}

/// Web IDE opened on the source tree after a failed analysis.
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct L2cEditor {
    pub url: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct SonarIssue {
    pub file: String,
    pub line: Option<i64>,
    pub message: String,
}

impl L2c {
    pub fn namespace_or_err(&self) -> Result<String> {
        self.namespace().ok_or_else(|| {
            Error::StdError(StdError::MetadataMissing(format!(
                "L2c {} has no namespace",
                self.name_any()
            )))
        })
    }

    /// Key of the SonarQube project, stable across restarts: `<namespace>_<name>`.
    pub fn project_key(&self) -> Result<String> {
        Ok(project_key(&self.namespace_or_err()?, &self.name_any()))
    }
}

pub fn project_key(namespace: &str, name: &str) -> String {
    format!("{namespace}_{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_include;
    use kube::Resource;

    #[test]
    fn spec_uses_camel_case_wire_names() {
        let l2c: L2c = serde_json::from_value(serde_json::json!({
            "apiVersion": "tmax.io/v1",
            "kind": "L2c",
            "metadata": { "name": "shop", "namespace": "demo" },
            "spec": {
                "was": {
                    "from": { "type": "weblogic", "git": { "url": "https://git/shop.git" } },
                    "to": {
                        "type": "jeus",
                        "image": { "url": "registry/shop", "regSecret": "pull" },
                        "port": 8080,
                        "serviceType": "LoadBalancer"
                    }
                },
                "db": {
                    "from": { "type": "oracle", "host": "ora", "port": 1521, "user": "u", "password": "p", "sid": "ORCL" },
                    "to": { "type": "tibero", "storageSize": "10Gi", "user": "t", "password": "tp" }
                }
            }
        }))
        .unwrap();

        assert_eq!(l2c.spec.was.to.service_type, ServiceType::LoadBalancer);
        assert_eq!(l2c.spec.was.to.image.reg_secret.as_deref(), Some("pull"));
        assert_eq!(l2c.spec.db.as_ref().unwrap().to.storage_size, "10Gi");
        assert_eq!(l2c.project_key().unwrap(), "demo_shop");
        assert_eq!(L2c::kind(&()), "L2c");
    }

    #[test]
    fn service_type_defaults_to_ingress() {
        let to: L2cWasTo = serde_json::from_value(serde_json::json!({
            "type": "jeus", "image": { "url": "registry/shop" }, "port": 8080
        }))
        .unwrap();
        assert_eq!(to.service_type, ServiceType::Ingress);
        assert_eq!(to.service_type.service_kind(), "ClusterIP");
    }

    #[test]
    fn status_serializes_cleared_fields_as_null() {
        let status = serde_json::to_value(L2cStatus::default()).unwrap();
        assert!(status.as_object().unwrap().contains_key("pipelineRunName"));
        assert_json_include!(
            actual: status,
            expected: serde_json::json!({
                "pipelineRunName": null,
                "completionTime": null,
                "editor": null,
                "taskStatus": [],
                "sonarIssues": [],
            })
        );
    }
}
