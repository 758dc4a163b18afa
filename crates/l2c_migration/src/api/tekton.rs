//! Client-side view of the Tekton `v1beta1` resources this operator creates and reads.
//!
//! Only the fields the controller touches are modelled; the CRDs themselves are
//! installed by Tekton, so no schema is generated for them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(
    kind = "Pipeline",
    group = "tekton.dev",
    version = "v1beta1",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(default)]
    pub resources: Vec<PipelineDeclaredResource>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default)]
    pub tasks: Vec<PipelineTask>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct PipelineDeclaredResource {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTask {
    pub name: String,
    pub task_ref: TaskRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_after: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<PipelineTaskResources>,
    #[serde(default)]
    pub params: Vec<Param>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct TaskRef {
    pub name: String,
    pub kind: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct PipelineTaskResources {
    #[serde(default)]
    pub inputs: Vec<PipelineTaskResource>,
    #[serde(default)]
    pub outputs: Vec<PipelineTaskResource>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct PipelineTaskResource {
    pub name: String,
    pub resource: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(
    kind = "PipelineRun",
    group = "tekton.dev",
    version = "v1beta1",
    namespaced,
    schema = "disabled"
)]
#[kube(status = "PipelineRunStatus")]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    pub pipeline_ref: PipelineRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default)]
    pub resources: Vec<PipelineResourceBinding>,
    #[serde(default)]
    pub params: Vec<Param>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct PipelineRef {
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResourceBinding {
    pub name: String,
    pub resource_spec: PipelineResourceSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct PipelineResourceSpec {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub params: Vec<Param>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    #[serde(default)]
    pub conditions: Vec<RunCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    /// Keyed by TaskRun name.
    #[serde(default)]
    pub task_runs: BTreeMap<String, PipelineRunTaskRunStatus>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunTaskRunStatus {
    pub pipeline_task_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskRunStatus>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunStatus {
    #[serde(default)]
    pub conditions: Vec<RunCondition>,
    #[serde(default)]
    pub pod_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

/// Knative-style condition as reported by Tekton runs.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// The single aggregate condition, or `None` while Tekton has not settled on one.
    pub fn aggregate_condition(&self) -> Option<&RunCondition> {
        match self.status.as_ref().map(|s| s.conditions.as_slice()) {
            Some([only]) => Some(only),
            _ => None,
        }
    }

    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.completion_time)
    }

    /// Task runs ordered by TaskRun name.
    pub fn task_runs(&self) -> impl Iterator<Item = (&String, &PipelineRunTaskRunStatus)> {
        self.status.iter().flat_map(|s| s.task_runs.iter())
    }
}

impl PipelineRunTaskRunStatus {
    pub fn single_condition(&self) -> Option<&RunCondition> {
        match self.status.as_ref().map(|s| s.conditions.as_slice()) {
            Some([only]) => Some(only),
            _ => None,
        }
    }
}
