//! SonarQube integration: the REST surface the operator consumes, and the
//! orchestration that keeps projects, rule profiles, the quality gate and the
//! global webhook in their desired state.

pub mod client;
pub mod credentials;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod orchestrator;
pub mod provision;
pub mod rules;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::util::errors::Result;

pub use client::SonarClient;
pub use orchestrator::QualityOrchestrator;

/// Name of the process-wide webhook registration.
pub const WEBHOOK_NAME: &str = "global-webhook";
pub const QUALITY_GATE_NAME: &str = "migration";
/// Rule-less profile set as default for every language.
pub const EMPTY_PROFILE_NAME: &str = "empty";

/// How requests authenticate. A token goes in the username with an empty password.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SonarAuth {
    Token(String),
    Basic { user: String, password: String },
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SonarProject {
    pub key: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QualityProfile {
    pub key: String,
    pub name: String,
    pub language: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Webhook {
    pub key: String,
    pub name: String,
    pub url: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Issue {
    pub component: String,
    #[serde(default)]
    pub line: Option<i64>,
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QualityGate {
    /// Numeric in older servers, a string in newer ones.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct GateCondition {
    pub metric: String,
    pub op: String,
    pub error: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct GroupPermissions {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SonarUser {
    pub login: String,
    #[serde(default)]
    pub name: String,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}

/// One method per SonarQube endpoint the operator uses.
#[async_trait]
pub trait SonarApi: Send + Sync {
    /// Replaces the credentials used by later calls.
    fn authenticate(&self, auth: SonarAuth);

    async fn search_projects(&self, key: &str) -> Result<Vec<SonarProject>>;
    async fn create_project(&self, key: &str) -> Result<()>;
    async fn delete_project(&self, key: &str) -> Result<()>;

    /// Profiles filtered by name, by attached project, or neither.
    async fn search_profiles(&self, name: Option<&str>, project: Option<&str>) -> Result<Vec<QualityProfile>>;
    async fn create_profile(&self, name: &str, language: &str) -> Result<QualityProfile>;
    async fn delete_profile(&self, name: &str, language: &str) -> Result<()>;
    async fn set_default_profile(&self, name: &str, language: &str) -> Result<()>;
    async fn add_project_profile(&self, project: &str, name: &str, language: &str) -> Result<()>;
    /// Keys of the rules activated in a profile.
    async fn active_rules(&self, profile_key: &str) -> Result<Vec<String>>;
    async fn activate_rule(&self, profile_key: &str, rule: &str) -> Result<()>;
    async fn deactivate_rule(&self, profile_key: &str, rule: &str) -> Result<()>;

    /// Unresolved issues of a project.
    async fn search_issues(&self, project: &str) -> Result<Vec<Issue>>;

    async fn list_webhooks(&self) -> Result<Vec<Webhook>>;
    async fn create_webhook(&self, name: &str, url: &str) -> Result<()>;
    async fn update_webhook(&self, key: &str, name: &str, url: &str) -> Result<()>;

    async fn list_quality_gates(&self) -> Result<Vec<QualityGate>>;
    async fn create_quality_gate(&self, name: &str) -> Result<QualityGate>;
    async fn gate_conditions(&self, gate_id: &str) -> Result<Vec<GateCondition>>;
    async fn create_gate_condition(&self, gate_id: &str, condition: &GateCondition) -> Result<()>;
    async fn set_default_gate(&self, gate_id: &str) -> Result<()>;

    async fn group_permissions(&self, group: &str) -> Result<Option<GroupPermissions>>;
    async fn remove_group_permission(&self, group: &str, permission: &str) -> Result<()>;
    async fn search_users(&self, login: &str) -> Result<Vec<SonarUser>>;
    async fn create_user(&self, login: &str, password: &str) -> Result<()>;
    async fn add_user_permission(&self, login: &str, permission: &str) -> Result<()>;
    /// Mints a token for `login`, authenticating as that user.
    async fn generate_token(&self, login: &str, password: &str) -> Result<String>;
    async fn change_password(&self, login: &str, previous: &str, password: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_ids_accept_both_encodings() {
        let old: QualityGate = serde_json::from_str(r#"{"id": 7, "name": "migration", "isDefault": true}"#).unwrap();
        let new: QualityGate = serde_json::from_str(r#"{"id": "AXz", "name": "migration"}"#).unwrap();
        assert_eq!(old.id, "7");
        assert!(old.is_default);
        assert_eq!(new.id, "AXz");
    }
}
