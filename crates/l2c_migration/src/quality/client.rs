use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, info};

use super::{
    GateCondition, GroupPermissions, Issue, QualityGate, QualityProfile, SonarApi, SonarAuth, SonarProject,
    SonarUser, Webhook,
};
use crate::resources::ide::random_password;
use crate::util::errors::{Error, Result, StdError};

pub struct SonarClient {
    base_url: String,
    client: reqwest::Client,
    auth: RwLock<SonarAuth>,
}

#[derive(Deserialize)]
struct Components {
    #[serde(default)]
    components: Vec<SonarProject>,
}

#[derive(Deserialize)]
struct Profiles {
    #[serde(default)]
    profiles: Vec<QualityProfile>,
}

#[derive(Deserialize)]
struct CreatedProfile {
    profile: QualityProfile,
}

#[derive(Deserialize)]
struct RuleKey {
    key: String,
}

#[derive(Deserialize)]
struct Rules {
    #[serde(default)]
    rules: Vec<RuleKey>,
}

#[derive(Deserialize)]
struct Issues {
    #[serde(default)]
    issues: Vec<Issue>,
}

#[derive(Deserialize)]
struct Webhooks {
    #[serde(default)]
    webhooks: Vec<Webhook>,
}

#[derive(Deserialize)]
struct QualityGates {
    #[serde(default)]
    qualitygates: Vec<QualityGate>,
}

#[derive(Deserialize)]
struct GateDetails {
    #[serde(default)]
    conditions: Vec<GateCondition>,
}

#[derive(Deserialize)]
struct Groups {
    #[serde(default)]
    groups: Vec<GroupPermissions>,
}

#[derive(Deserialize)]
struct Users {
    #[serde(default)]
    users: Vec<SonarUser>,
}

#[derive(Deserialize)]
struct Token {
    token: String,
}

impl SonarClient {
    pub fn new(base_url: &str, auth: SonarAuth) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            auth: RwLock::new(auth),
        }
    }

    fn current_auth(&self) -> SonarAuth {
        self.auth.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sends a request and returns the raw body of a 2xx response.
    ///
    /// GET parameters go in the query string, every other method sends them as a form body.
    async fn call(&self, method: Method, path: &str, params: &[(&str, &str)], auth: &SonarAuth) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        debug!("SonarQube {} {}", method, url);

        let builder = self.client.request(method.clone(), &url);
        let builder = if method == Method::GET {
            builder.query(params)
        } else {
            builder.form(params)
        };
        let builder = match auth {
            SonarAuth::Token(token) => builder.basic_auth(token, Some("")),
            SonarAuth::Basic { user, password } => builder.basic_auth(user, Some(password)),
        };

        let response = builder.send().await.map_err(|e| {
            error!("Failed to connect to SonarQube: {}", e);
            Error::StdError(StdError::HttpError(format!("SonarQube request {path} failed: {e}")))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            Error::StdError(StdError::HttpError(format!("SonarQube response {path} unreadable: {e}")))
        })?;
        if !status.is_success() {
            error!("SonarQube {} returned {}", path, status);
            return Err(Error::StdError(StdError::ExternalServiceError(format!(
                "{path} returned {status}: {body}"
            ))));
        }
        Ok(body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        let body = self.call(Method::GET, path, params, &self.current_auth()).await?;
        parse(path, &body)
    }

    async fn post(&self, path: &str, params: &[(&str, &str)]) -> Result<String> {
        self.call(Method::POST, path, params, &self.current_auth()).await
    }
}

fn parse<T: DeserializeOwned>(path: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        Error::StdError(StdError::SerializationError(format!(
            "cannot parse SonarQube response of {path}: {e}"
        )))
    })
}

#[async_trait]
impl SonarApi for SonarClient {
    fn authenticate(&self, auth: SonarAuth) {
        *self.auth.write().unwrap_or_else(PoisonError::into_inner) = auth;
    }

    async fn search_projects(&self, key: &str) -> Result<Vec<SonarProject>> {
        let found: Components = self.get("/api/projects/search", &[("projects", key)]).await?;
        Ok(found.components)
    }

    async fn create_project(&self, key: &str) -> Result<()> {
        self.post("/api/projects/create", &[("name", key), ("project", key)]).await?;
        Ok(())
    }

    async fn delete_project(&self, key: &str) -> Result<()> {
        self.post("/api/projects/delete", &[("project", key)]).await?;
        Ok(())
    }

    async fn search_profiles(&self, name: Option<&str>, project: Option<&str>) -> Result<Vec<QualityProfile>> {
        let mut params = Vec::new();
        if let Some(name) = name {
            params.push(("qualityProfile", name));
        }
        if let Some(project) = project {
            params.push(("project", project));
        }
        let found: Profiles = self.get("/api/qualityprofiles/search", &params).await?;
        Ok(found.profiles)
    }

    async fn create_profile(&self, name: &str, language: &str) -> Result<QualityProfile> {
        let body = self
            .post("/api/qualityprofiles/create", &[("name", name), ("language", language)])
            .await?;
        let created: CreatedProfile = parse("/api/qualityprofiles/create", &body)?;
        info!("Created quality profile {}/{} ({})", language, name, created.profile.key);
        Ok(created.profile)
    }

    async fn delete_profile(&self, name: &str, language: &str) -> Result<()> {
        self.post(
            "/api/qualityprofiles/delete",
            &[("qualityProfile", name), ("language", language)],
        )
        .await?;
        Ok(())
    }

    async fn set_default_profile(&self, name: &str, language: &str) -> Result<()> {
        self.post(
            "/api/qualityprofiles/set_default",
            &[("qualityProfile", name), ("language", language)],
        )
        .await?;
        Ok(())
    }

    async fn add_project_profile(&self, project: &str, name: &str, language: &str) -> Result<()> {
        self.post(
            "/api/qualityprofiles/add_project",
            &[("project", project), ("qualityProfile", name), ("language", language)],
        )
        .await?;
        Ok(())
    }

    async fn active_rules(&self, profile_key: &str) -> Result<Vec<String>> {
        let found: Rules = self
            .get(
                "/api/rules/search",
                &[("qprofile", profile_key), ("activation", "true"), ("ps", "500")],
            )
            .await?;
        Ok(found.rules.into_iter().map(|r| r.key).collect())
    }

    async fn activate_rule(&self, profile_key: &str, rule: &str) -> Result<()> {
        self.post(
            "/api/qualityprofiles/activate_rule",
            &[("key", profile_key), ("rule", rule), ("severity", "BLOCKER")],
        )
        .await?;
        Ok(())
    }

    async fn deactivate_rule(&self, profile_key: &str, rule: &str) -> Result<()> {
        self.post("/api/qualityprofiles/deactivate_rule", &[("key", profile_key), ("rule", rule)])
            .await?;
        Ok(())
    }

    async fn search_issues(&self, project: &str) -> Result<Vec<Issue>> {
        let found: Issues = self
            .get(
                "/api/issues/search",
                &[("componentKeys", project), ("resolved", "false"), ("ps", "500")],
            )
            .await?;
        Ok(found.issues)
    }

    async fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        let found: Webhooks = self.get("/api/webhooks/list", &[]).await?;
        Ok(found.webhooks)
    }

    async fn create_webhook(&self, name: &str, url: &str) -> Result<()> {
        self.post("/api/webhooks/create", &[("name", name), ("url", url)]).await?;
        Ok(())
    }

    async fn update_webhook(&self, key: &str, name: &str, url: &str) -> Result<()> {
        self.post("/api/webhooks/update", &[("webhook", key), ("name", name), ("url", url)])
            .await?;
        Ok(())
    }

    async fn list_quality_gates(&self) -> Result<Vec<QualityGate>> {
        let found: QualityGates = self.get("/api/qualitygates/list", &[]).await?;
        Ok(found.qualitygates)
    }

    async fn create_quality_gate(&self, name: &str) -> Result<QualityGate> {
        let body = self.post("/api/qualitygates/create", &[("name", name)]).await?;
        parse("/api/qualitygates/create", &body)
    }

    async fn gate_conditions(&self, gate_id: &str) -> Result<Vec<GateCondition>> {
        let found: GateDetails = self.get("/api/qualitygates/show", &[("id", gate_id)]).await?;
        Ok(found.conditions)
    }

    async fn create_gate_condition(&self, gate_id: &str, condition: &GateCondition) -> Result<()> {
        self.post(
            "/api/qualitygates/create_condition",
            &[
                ("gateId", gate_id),
                ("metric", &condition.metric),
                ("op", &condition.op),
                ("error", &condition.error),
            ],
        )
        .await?;
        Ok(())
    }

    async fn set_default_gate(&self, gate_id: &str) -> Result<()> {
        self.post("/api/qualitygates/set_as_default", &[("id", gate_id)]).await?;
        Ok(())
    }

    async fn group_permissions(&self, group: &str) -> Result<Option<GroupPermissions>> {
        let found: Groups = self.get("/api/permissions/groups", &[("q", group)]).await?;
        Ok(found.groups.into_iter().find(|g| g.name == group))
    }

    async fn remove_group_permission(&self, group: &str, permission: &str) -> Result<()> {
        self.post(
            "/api/permissions/remove_group",
            &[("groupName", group), ("permission", permission)],
        )
        .await?;
        Ok(())
    }

    async fn search_users(&self, login: &str) -> Result<Vec<SonarUser>> {
        let found: Users = self.get("/api/users/search", &[("q", login)]).await?;
        Ok(found.users)
    }

    async fn create_user(&self, login: &str, password: &str) -> Result<()> {
        self.post(
            "/api/users/create",
            &[("login", login), ("name", login), ("password", password)],
        )
        .await?;
        Ok(())
    }

    async fn add_user_permission(&self, login: &str, permission: &str) -> Result<()> {
        self.post("/api/permissions/add_user", &[("login", login), ("permission", permission)])
            .await?;
        Ok(())
    }

    async fn generate_token(&self, login: &str, password: &str) -> Result<String> {
        let name = format!("{login}{}", random_password(5));
        let auth = SonarAuth::Basic {
            user: login.to_string(),
            password: password.to_string(),
        };
        let body = self
            .call(
                Method::POST,
                "/api/user_tokens/generate",
                &[("login", login), ("name", &name)],
                &auth,
            )
            .await?;
        let token: Token = parse("/api/user_tokens/generate", &body)?;
        info!("SonarQube access token {} is generated", name);
        Ok(token.token)
    }

    async fn change_password(&self, login: &str, previous: &str, password: &str) -> Result<()> {
        self.post(
            "/api/users/change_password",
            &[("login", login), ("previousPassword", previous), ("password", password)],
        )
        .await?;
        info!("SonarQube password of {} is changed", login);
        Ok(())
    }
}
