//! In-memory SonarQube for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    GateCondition, GroupPermissions, Issue, QualityGate, QualityProfile, SonarApi, SonarAuth, SonarProject,
    SonarUser, Webhook,
};
use crate::util::errors::{Error, Result, StdError};

#[derive(Debug, Default)]
struct FakeState {
    auth: Option<SonarAuth>,
    projects: BTreeSet<String>,
    profiles: Vec<QualityProfile>,
    /// profile key -> active rules
    rules: BTreeMap<String, BTreeSet<String>>,
    /// (project, profile key)
    attachments: BTreeSet<(String, String)>,
    issues: BTreeMap<String, Vec<Issue>>,
    webhooks: Vec<Webhook>,
    gates: Vec<QualityGate>,
    gate_conditions: BTreeMap<String, Vec<GateCondition>>,
    groups: Vec<GroupPermissions>,
    /// login -> password
    users: BTreeMap<String, String>,
    user_permissions: BTreeSet<(String, String)>,
    next_id: u64,
    calls: Vec<String>,
    failing: BTreeSet<String>,
}

/// Cloning shares the underlying state.
#[derive(Clone, Debug, Default)]
pub struct FakeSonar {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSonar {
    /// A fresh server with the factory `admin/admin` account and the `sonar-users` group.
    pub fn new() -> Self {
        let sonar = Self::default();
        {
            let mut state = sonar.lock();
            state.users.insert("admin".into(), "admin".into());
            state.groups.push(GroupPermissions {
                name: "sonar-users".into(),
                permissions: vec!["scan".into(), "provisioning".into()],
            });
        }
        sonar
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a call and fails it when injected with [`FakeSonar::fail_on`].
    fn record(&self, state: &mut FakeState, method: &str) -> Result<()> {
        state.calls.push(method.to_string());
        if state.failing.contains(method) {
            return Err(Error::StdError(StdError::ExternalServiceError(format!(
                "{method} returned 500 Internal Server Error"
            ))));
        }
        Ok(())
    }

    fn next_key(state: &mut FakeState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}-{}", state.next_id)
    }

    pub fn fail_on(&self, method: &str) {
        self.lock().failing.insert(method.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == method).count()
    }

    pub fn current_auth(&self) -> Option<SonarAuth> {
        self.lock().auth.clone()
    }

    pub fn has_project(&self, key: &str) -> bool {
        self.lock().projects.contains(key)
    }

    pub fn password_of(&self, login: &str) -> Option<String> {
        self.lock().users.get(login).cloned()
    }

    pub fn has_user_permission(&self, login: &str, permission: &str) -> bool {
        self.lock()
            .user_permissions
            .contains(&(login.to_string(), permission.to_string()))
    }

    pub fn group_permission_list(&self, group: &str) -> Vec<String> {
        self.lock()
            .groups
            .iter()
            .find(|g| g.name == group)
            .map(|g| g.permissions.clone())
            .unwrap_or_default()
    }

    /// Adds a built-in default profile for a language.
    pub fn add_language(&self, language: &str) {
        let mut state = self.lock();
        let key = Self::next_key(&mut state, "builtin");
        state.profiles.push(QualityProfile {
            key,
            name: "Sonar way".into(),
            language: language.into(),
            is_default: true,
        });
    }

    pub fn add_issue(&self, project: &str, issue: Issue) {
        self.lock().issues.entry(project.to_string()).or_default().push(issue);
    }

    pub fn active_rule_set(&self, profile: &str, language: &str) -> BTreeSet<String> {
        let state = self.lock();
        state
            .profiles
            .iter()
            .find(|p| p.name == profile && p.language == language)
            .and_then(|p| state.rules.get(&p.key).cloned())
            .unwrap_or_default()
    }

    /// Overwrites the active rules of a profile, bypassing the API.
    pub fn force_rules(&self, profile: &str, language: &str, rules: &[&str]) {
        let mut state = self.lock();
        let key = state
            .profiles
            .iter()
            .find(|p| p.name == profile && p.language == language)
            .map(|p| p.key.clone());
        if let Some(key) = key {
            state
                .rules
                .insert(key, rules.iter().map(|r| r.to_string()).collect());
        }
    }

    pub fn is_attached(&self, project: &str, language: &str) -> bool {
        let state = self.lock();
        state.attachments.iter().any(|(p, key)| {
            p == project
                && state
                    .profiles
                    .iter()
                    .any(|profile| &profile.key == key && profile.language == language)
        })
    }

    pub fn webhook_url(&self, name: &str) -> Option<String> {
        self.lock()
            .webhooks
            .iter()
            .find(|w| w.name == name)
            .map(|w| w.url.clone())
    }

    fn profile_key(state: &FakeState, name: &str, language: &str) -> Result<String> {
        state
            .profiles
            .iter()
            .find(|p| p.name == name && p.language == language)
            .map(|p| p.key.clone())
            .ok_or_else(|| {
                Error::StdError(StdError::ExternalServiceError(format!(
                    "quality profile {language}/{name} does not exist"
                )))
            })
    }
}

#[async_trait]
impl SonarApi for FakeSonar {
    fn authenticate(&self, auth: SonarAuth) {
        self.lock().auth = Some(auth);
    }

    async fn search_projects(&self, key: &str) -> Result<Vec<SonarProject>> {
        let mut state = self.lock();
        self.record(&mut state, "search_projects")?;
        Ok(state
            .projects
            .iter()
            .filter(|p| *p == key)
            .map(|p| SonarProject {
                key: p.clone(),
                name: p.clone(),
            })
            .collect())
    }

    async fn create_project(&self, key: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "create_project")?;
        if !state.projects.insert(key.to_string()) {
            return Err(Error::StdError(StdError::ExternalServiceError(format!(
                "project {key} already exists"
            ))));
        }
        Ok(())
    }

    async fn delete_project(&self, key: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "delete_project")?;
        state.projects.remove(key);
        state.attachments.retain(|(p, _)| p != key);
        Ok(())
    }

    async fn search_profiles(&self, name: Option<&str>, project: Option<&str>) -> Result<Vec<QualityProfile>> {
        let mut state = self.lock();
        self.record(&mut state, "search_profiles")?;
        Ok(state
            .profiles
            .iter()
            .filter(|p| name.map_or(true, |n| p.name == n))
            .filter(|p| {
                project.map_or(true, |project| {
                    state
                        .attachments
                        .contains(&(project.to_string(), p.key.clone()))
                })
            })
            .cloned()
            .collect())
    }

    async fn create_profile(&self, name: &str, language: &str) -> Result<QualityProfile> {
        let mut state = self.lock();
        self.record(&mut state, "create_profile")?;
        if Self::profile_key(&state, name, language).is_ok() {
            return Err(Error::StdError(StdError::ExternalServiceError(format!(
                "quality profile {language}/{name} already exists"
            ))));
        }
        let profile = QualityProfile {
            key: Self::next_key(&mut state, "profile"),
            name: name.to_string(),
            language: language.to_string(),
            is_default: false,
        };
        state.profiles.push(profile.clone());
        Ok(profile)
    }

    async fn delete_profile(&self, name: &str, language: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "delete_profile")?;
        let key = Self::profile_key(&state, name, language)?;
        state.profiles.retain(|p| p.key != key);
        state.rules.remove(&key);
        state.attachments.retain(|(_, k)| *k != key);
        Ok(())
    }

    async fn set_default_profile(&self, name: &str, language: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "set_default_profile")?;
        let key = Self::profile_key(&state, name, language)?;
        for profile in state.profiles.iter_mut().filter(|p| p.language == language) {
            profile.is_default = profile.key == key;
        }
        Ok(())
    }

    async fn add_project_profile(&self, project: &str, name: &str, language: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "add_project_profile")?;
        let key = Self::profile_key(&state, name, language)?;
        let stale: Vec<String> = state
            .profiles
            .iter()
            .filter(|p| p.language == language)
            .map(|p| p.key.clone())
            .collect();
        state
            .attachments
            .retain(|(p, k)| !(p == project && stale.contains(k)));
        state.attachments.insert((project.to_string(), key));
        Ok(())
    }

    async fn active_rules(&self, profile_key: &str) -> Result<Vec<String>> {
        let mut state = self.lock();
        self.record(&mut state, "search_rules")?;
        Ok(state
            .rules
            .get(profile_key)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn activate_rule(&self, profile_key: &str, rule: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "activate_rule")?;
        state
            .rules
            .entry(profile_key.to_string())
            .or_default()
            .insert(rule.to_string());
        Ok(())
    }

    async fn deactivate_rule(&self, profile_key: &str, rule: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "deactivate_rule")?;
        if let Some(rules) = state.rules.get_mut(profile_key) {
            rules.remove(rule);
        }
        Ok(())
    }

    async fn search_issues(&self, project: &str) -> Result<Vec<Issue>> {
        let mut state = self.lock();
        self.record(&mut state, "search_issues")?;
        Ok(state.issues.get(project).cloned().unwrap_or_default())
    }

    async fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        let mut state = self.lock();
        self.record(&mut state, "list_webhooks")?;
        Ok(state.webhooks.clone())
    }

    async fn create_webhook(&self, name: &str, url: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "create_webhook")?;
        let key = Self::next_key(&mut state, "webhook");
        state.webhooks.push(Webhook {
            key,
            name: name.to_string(),
            url: url.to_string(),
        });
        Ok(())
    }

    async fn update_webhook(&self, key: &str, name: &str, url: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "update_webhook")?;
        if let Some(hook) = state.webhooks.iter_mut().find(|w| w.key == key) {
            hook.name = name.to_string();
            hook.url = url.to_string();
        }
        Ok(())
    }

    async fn list_quality_gates(&self) -> Result<Vec<QualityGate>> {
        let mut state = self.lock();
        self.record(&mut state, "list_quality_gates")?;
        Ok(state.gates.clone())
    }

    async fn create_quality_gate(&self, name: &str) -> Result<QualityGate> {
        let mut state = self.lock();
        self.record(&mut state, "create_quality_gate")?;
        let gate = QualityGate {
            id: Self::next_key(&mut state, "gate"),
            name: name.to_string(),
            is_default: false,
        };
        state.gates.push(gate.clone());
        Ok(gate)
    }

    async fn gate_conditions(&self, gate_id: &str) -> Result<Vec<GateCondition>> {
        let mut state = self.lock();
        self.record(&mut state, "gate_conditions")?;
        Ok(state.gate_conditions.get(gate_id).cloned().unwrap_or_default())
    }

    async fn create_gate_condition(&self, gate_id: &str, condition: &GateCondition) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "create_gate_condition")?;
        state
            .gate_conditions
            .entry(gate_id.to_string())
            .or_default()
            .push(condition.clone());
        Ok(())
    }

    async fn set_default_gate(&self, gate_id: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "set_default_gate")?;
        for gate in state.gates.iter_mut() {
            gate.is_default = gate.id == gate_id;
        }
        Ok(())
    }

    async fn group_permissions(&self, group: &str) -> Result<Option<GroupPermissions>> {
        let mut state = self.lock();
        self.record(&mut state, "search_groups")?;
        Ok(state.groups.iter().find(|g| g.name == group).cloned())
    }

    async fn remove_group_permission(&self, group: &str, permission: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "remove_group_permission")?;
        if let Some(g) = state.groups.iter_mut().find(|g| g.name == group) {
            g.permissions.retain(|p| p != permission);
        }
        Ok(())
    }

    async fn search_users(&self, login: &str) -> Result<Vec<SonarUser>> {
        let mut state = self.lock();
        self.record(&mut state, "search_users")?;
        Ok(state
            .users
            .keys()
            .filter(|u| u.contains(login))
            .map(|u| SonarUser {
                login: u.clone(),
                name: u.clone(),
            })
            .collect())
    }

    async fn create_user(&self, login: &str, password: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "create_user")?;
        state.users.insert(login.to_string(), password.to_string());
        Ok(())
    }

    async fn add_user_permission(&self, login: &str, permission: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "add_user_permission")?;
        state
            .user_permissions
            .insert((login.to_string(), permission.to_string()));
        Ok(())
    }

    async fn generate_token(&self, login: &str, password: &str) -> Result<String> {
        let mut state = self.lock();
        self.record(&mut state, "generate_token")?;
        if state.users.get(login).map(String::as_str) != Some(password) {
            return Err(Error::StdError(StdError::ExternalServiceError(format!(
                "401 Unauthorized for {login}"
            ))));
        }
        Ok(Self::next_key(&mut state, &format!("token-{login}")))
    }

    async fn change_password(&self, login: &str, previous: &str, password: &str) -> Result<()> {
        let mut state = self.lock();
        self.record(&mut state, "change_password")?;
        match state.users.get_mut(login) {
            Some(current) if current == previous => {
                *current = password.to_string();
                Ok(())
            }
            _ => Err(Error::StdError(StdError::ExternalServiceError(format!(
                "cannot change password of {login}"
            )))),
        }
    }
}
