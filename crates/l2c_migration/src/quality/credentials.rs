//! SonarQube accounts kept in the secret named after the managed SonarQube.
//!
//! Every write goes through a resourceVersion-checked replace, so two replicas
//! starting at once cannot both rotate the factory password.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use tracing::info;

use super::{SonarApi, SonarAuth};
use crate::cluster::Cluster;
use crate::resources::ide::random_password;
use crate::resources::sonarqube::create_sonar_secret;
use crate::util::errors::{Error, Result, StdError};

pub const SONAR_USERS_GROUP: &str = "sonar-users";

const DEFAULT_ADMIN_ID: &str = "admin";
const DEFAULT_ADMIN_PW: &str = "admin";
const DEFAULT_ANALYZER_ID: &str = "analyzer";
const DEFAULT_ANALYZER_PW: &str = "analyzer";

const KEY_ADMIN_ID: &str = "adminId";
const KEY_ADMIN_PW: &str = "adminPw";
const KEY_TOKEN: &str = "token";
const KEY_ANALYZER_ID: &str = "analyzerId";
const KEY_ANALYZER_PW: &str = "analyzerPw";
const KEY_ANALYZER_TOKEN: &str = "analyzerToken";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SonarCredentials {
    pub admin_id: String,
    pub admin_pw: String,
    pub token: String,
    pub analyzer_id: String,
    pub analyzer_pw: String,
    pub analyzer_token: String,
}

impl Default for SonarCredentials {
    fn default() -> Self {
        Self {
            admin_id: DEFAULT_ADMIN_ID.to_string(),
            admin_pw: DEFAULT_ADMIN_PW.to_string(),
            token: String::new(),
            analyzer_id: DEFAULT_ANALYZER_ID.to_string(),
            analyzer_pw: DEFAULT_ANALYZER_PW.to_string(),
            analyzer_token: String::new(),
        }
    }
}

fn field(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|b| String::from_utf8(b.0.clone()).ok())
        .or_else(|| secret.string_data.as_ref().and_then(|d| d.get(key)).cloned())
}

fn required(secret: &Secret, key: &str) -> Result<String> {
    field(secret, key).ok_or_else(|| {
        Error::StdError(StdError::MetadataMissing(format!(
            "secret {} has no key {key}",
            secret.metadata.name.as_deref().unwrap_or_default()
        )))
    })
}

impl SonarCredentials {
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        Ok(Self {
            admin_id: required(secret, KEY_ADMIN_ID)?,
            admin_pw: required(secret, KEY_ADMIN_PW)?,
            token: field(secret, KEY_TOKEN).unwrap_or_default(),
            analyzer_id: required(secret, KEY_ANALYZER_ID)?,
            analyzer_pw: required(secret, KEY_ANALYZER_PW)?,
            analyzer_token: field(secret, KEY_ANALYZER_TOKEN).unwrap_or_default(),
        })
    }

    pub(crate) fn to_data(&self) -> BTreeMap<String, ByteString> {
        [
            (KEY_ADMIN_ID, &self.admin_id),
            (KEY_ADMIN_PW, &self.admin_pw),
            (KEY_TOKEN, &self.token),
            (KEY_ANALYZER_ID, &self.analyzer_id),
            (KEY_ANALYZER_PW, &self.analyzer_pw),
            (KEY_ANALYZER_TOKEN, &self.analyzer_token),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.clone().into_bytes())))
        .collect()
    }

    pub fn is_factory_admin(&self) -> bool {
        self.admin_id == DEFAULT_ADMIN_ID && self.admin_pw == DEFAULT_ADMIN_PW
    }

    /// Admin token once minted, admin id and password before that.
    pub fn admin_auth(&self) -> SonarAuth {
        if self.token.is_empty() {
            SonarAuth::Basic {
                user: self.admin_id.clone(),
                password: self.admin_pw.clone(),
            }
        } else {
            SonarAuth::Token(self.token.clone())
        }
    }
}

/// Reads the credential secret, creating it with factory defaults when absent.
pub async fn load_secret<C: Cluster>(cluster: &C, namespace: &str, name: &str) -> Result<Secret> {
    if let Some(secret) = cluster.get::<Secret>(namespace, name).await? {
        return Ok(secret);
    }
    info!("Creating SonarQube credential secret {}/{}", namespace, name);
    cluster.create(namespace, &create_sonar_secret(namespace, name)).await
}

pub async fn load<C: Cluster>(cluster: &C, namespace: &str, name: &str) -> Result<SonarCredentials> {
    SonarCredentials::from_secret(&load_secret(cluster, namespace, name).await?)
}

/// Compare-and-swap write; fails with `Conflict` if the secret changed since `secret` was read.
async fn save<C: Cluster>(cluster: &C, namespace: &str, secret: &Secret, creds: &SonarCredentials) -> Result<Secret> {
    let mut updated = secret.clone();
    updated.data = Some(creds.to_data());
    updated.string_data = None;
    cluster.replace(namespace, &updated).await
}

/// Moves SonarQube off its factory accounts, idempotently.
///
/// Replaces a factory admin password, mints the admin token, strips the default
/// group's permissions and provisions the analyzer account used by pipeline runs.
/// Values already in the secret are reused. On return `api` is authenticated as admin.
pub async fn rotate_default_credentials<C: Cluster, A: SonarApi>(
    cluster: &C,
    api: &A,
    namespace: &str,
    name: &str,
) -> Result<SonarCredentials> {
    let mut secret = load_secret(cluster, namespace, name).await?;
    let mut creds = SonarCredentials::from_secret(&secret)?;

    if creds.is_factory_admin() {
        api.authenticate(creds.admin_auth());
        let password = random_password(10);
        api.change_password(&creds.admin_id, &creds.admin_pw, &password).await?;
        creds.admin_pw = password;
        secret = save(cluster, namespace, &secret, &creds).await?;
        info!("Replaced the factory SonarQube admin password");
    }

    if creds.token.is_empty() {
        creds.token = api.generate_token(&creds.admin_id, &creds.admin_pw).await?;
        secret = save(cluster, namespace, &secret, &creds).await?;
    }
    api.authenticate(creds.admin_auth());

    if let Some(group) = api.group_permissions(SONAR_USERS_GROUP).await? {
        for permission in &group.permissions {
            api.remove_group_permission(SONAR_USERS_GROUP, permission).await?;
            info!("Removed permission {} from group {}", permission, SONAR_USERS_GROUP);
        }
    }

    if !api
        .search_users(&creds.analyzer_id)
        .await?
        .iter()
        .any(|u| u.login == creds.analyzer_id)
    {
        api.create_user(&creds.analyzer_id, &creds.analyzer_pw).await?;
        info!("Created SonarQube user {}", creds.analyzer_id);
    }
    api.add_user_permission(&creds.analyzer_id, "scan").await?;

    if creds.analyzer_token.is_empty() {
        creds.analyzer_token = api.generate_token(&creds.analyzer_id, &creds.analyzer_pw).await?;
        save(cluster, namespace, &secret, &creds).await?;
    }

    Ok(creds)
}
