use std::collections::BTreeSet;

use tracing::info;

use super::rules::DesiredRules;
use super::{GateCondition, SonarApi, EMPTY_PROFILE_NAME, QUALITY_GATE_NAME, WEBHOOK_NAME};
use crate::api::v1::l2c::SonarIssue;
use crate::util::errors::Result;

/// Converges SonarQube onto the state each project, and the process, needs.
///
/// Every operation reads before it writes, so calling any of them again after a
/// partial failure only performs the remaining steps.
pub struct QualityOrchestrator<A> {
    api: A,
}

impl<A: SonarApi> QualityOrchestrator<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub async fn ensure_project(&self, key: &str) -> Result<()> {
        if self.api.search_projects(key).await?.iter().any(|p| p.key == key) {
            return Ok(());
        }
        self.api.create_project(key).await?;
        info!("Created SonarQube project {}", key);
        Ok(())
    }

    pub async fn delete_project(&self, key: &str) -> Result<()> {
        if !self.api.search_projects(key).await?.iter().any(|p| p.key == key) {
            return Ok(());
        }
        self.api.delete_project(key).await?;
        info!("Deleted SonarQube project {}", key);
        Ok(())
    }

    /// Makes a profile named `key` per language hold exactly the desired rules, attached to the project.
    pub async fn ensure_quality_profiles(&self, key: &str, desired: &DesiredRules) -> Result<()> {
        let existing = self.api.search_profiles(Some(key), None).await?;

        for (language, rules) in desired {
            let profile = match existing.iter().find(|p| &p.language == language) {
                Some(profile) => profile.clone(),
                None => self.api.create_profile(key, language).await?,
            };

            let active: BTreeSet<String> = self.api.active_rules(&profile.key).await?.into_iter().collect();
            for rule in rules.difference(&active) {
                self.api.activate_rule(&profile.key, rule).await?;
                info!("Activated rule {} in {}/{}", rule, language, key);
            }
            for rule in active.difference(rules) {
                self.api.deactivate_rule(&profile.key, rule).await?;
                info!("Deactivated rule {} in {}/{}", rule, language, key);
            }

            let attached = self.api.search_profiles(None, Some(key)).await?;
            if !attached
                .iter()
                .any(|p| p.language == profile.language && p.key == profile.key)
            {
                self.api.add_project_profile(key, key, language).await?;
                info!("Attached quality profile {}/{} to project {}", language, key, key);
            }
        }
        Ok(())
    }

    pub async fn delete_profiles(&self, key: &str) -> Result<()> {
        for profile in self.api.search_profiles(Some(key), None).await? {
            if profile.name != key {
                continue;
            }
            self.api.delete_profile(&profile.name, &profile.language).await?;
            info!("Deleted quality profile {}/{}", profile.language, profile.name);
        }
        Ok(())
    }

    /// Unresolved issues of the project, with file paths relative to the project.
    pub async fn issues(&self, key: &str) -> Result<Vec<SonarIssue>> {
        let prefix = format!("{key}:");
        Ok(self
            .api
            .search_issues(key)
            .await?
            .into_iter()
            .map(|issue| SonarIssue {
                file: issue
                    .component
                    .strip_prefix(&prefix)
                    .unwrap_or(&issue.component)
                    .to_string(),
                line: issue.line,
                message: issue.message,
            })
            .collect())
    }

    /// Compare-and-update of the single global webhook.
    pub async fn register_webhook(&self, url: &str) -> Result<()> {
        let webhooks = self.api.list_webhooks().await?;
        match webhooks.iter().find(|w| w.name == WEBHOOK_NAME) {
            Some(hook) if hook.url == url => Ok(()),
            Some(hook) => {
                self.api.update_webhook(&hook.key, WEBHOOK_NAME, url).await?;
                info!("Updated SonarQube webhook {} to {}", WEBHOOK_NAME, url);
                Ok(())
            }
            None => {
                self.api.create_webhook(WEBHOOK_NAME, url).await?;
                info!("Registered SonarQube webhook {} as {}", WEBHOOK_NAME, url);
                Ok(())
            }
        }
    }

    /// Default gate failing on any violation.
    pub async fn ensure_quality_gate(&self) -> Result<()> {
        let gates = self.api.list_quality_gates().await?;
        let gate = match gates.into_iter().find(|g| g.name == QUALITY_GATE_NAME) {
            Some(gate) => gate,
            None => {
                let gate = self.api.create_quality_gate(QUALITY_GATE_NAME).await?;
                info!("Created quality gate {}", QUALITY_GATE_NAME);
                gate
            }
        };

        let condition = GateCondition {
            metric: "violations".to_string(),
            op: "GT".to_string(),
            error: "0".to_string(),
        };
        if !self.api.gate_conditions(&gate.id).await?.contains(&condition) {
            self.api.create_gate_condition(&gate.id, &condition).await?;
            info!("Added condition violations > 0 to quality gate {}", QUALITY_GATE_NAME);
        }

        if !gate.is_default {
            self.api.set_default_gate(&gate.id).await?;
            info!("Set quality gate {} as default", QUALITY_GATE_NAME);
        }
        Ok(())
    }

    /// An `empty` default profile for every language, so projects without their own profile run no rules.
    pub async fn ensure_empty_profiles(&self) -> Result<()> {
        let profiles = self.api.search_profiles(None, None).await?;
        let languages: BTreeSet<&str> = profiles.iter().map(|p| p.language.as_str()).collect();

        for language in languages {
            let empty = profiles
                .iter()
                .find(|p| p.language == language && p.name == EMPTY_PROFILE_NAME);
            if empty.is_none() {
                self.api.create_profile(EMPTY_PROFILE_NAME, language).await?;
            }
            if !empty.map(|p| p.is_default).unwrap_or(false) {
                self.api.set_default_profile(EMPTY_PROFILE_NAME, language).await?;
                info!("Set quality profile {}/{} as default", language, EMPTY_PROFILE_NAME);
            }
        }
        Ok(())
    }

    /// Process-wide setup run once at start, after credentials are in place.
    pub async fn bootstrap(&self, webhook_url: &str) -> Result<()> {
        self.ensure_quality_gate().await?;
        self.register_webhook(webhook_url).await?;
        self.ensure_empty_profiles().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::memory::FakeSonar;
    use crate::quality::rules::{desired_rules, RULE_JAVA_DISALLOW_WEBLOGIC, RULE_XML_DISALLOW_TOMCAT};
    use crate::quality::Issue;
    use crate::resources::fixtures;
    use crate::util::errors::StdError;

    #[tokio::test]
    async fn project_is_created_once() {
        let sonar = FakeSonar::new();
        let orchestrator = QualityOrchestrator::new(sonar.clone());
        orchestrator.ensure_project("demo_shop").await.unwrap();
        orchestrator.ensure_project("demo_shop").await.unwrap();
        assert_eq!(sonar.calls_to("create_project"), 1);

        orchestrator.delete_project("demo_shop").await.unwrap();
        orchestrator.delete_project("demo_shop").await.unwrap();
        assert_eq!(sonar.calls_to("delete_project"), 1);
    }

    #[tokio::test]
    async fn profiles_converge_to_the_desired_rules() {
        let sonar = FakeSonar::new();
        let orchestrator = QualityOrchestrator::new(sonar.clone());
        orchestrator.ensure_project("demo_shop").await.unwrap();

        let desired = desired_rules(&fixtures::l2c());
        orchestrator.ensure_quality_profiles("demo_shop", &desired).await.unwrap();
        assert_eq!(sonar.active_rule_set("demo_shop", "xml").len(), 2);
        assert_eq!(
            sonar.active_rule_set("demo_shop", "java"),
            BTreeSet::from([RULE_JAVA_DISALLOW_WEBLOGIC.to_string()])
        );
        assert!(sonar.is_attached("demo_shop", "java"));
        assert!(sonar.is_attached("demo_shop", "xml"));

        // drift: an extra rule and a missing one
        sonar.force_rules("demo_shop", "xml", &["xml:Stray"]);
        orchestrator.ensure_quality_profiles("demo_shop", &desired).await.unwrap();
        let xml = sonar.active_rule_set("demo_shop", "xml");
        assert!(xml.contains(RULE_XML_DISALLOW_TOMCAT));
        assert!(!xml.contains("xml:Stray"));
        assert_eq!(sonar.calls_to("create_profile"), 2);
        assert_eq!(sonar.calls_to("add_project_profile"), 2);
    }

    #[tokio::test]
    async fn profile_failures_are_surfaced() {
        let sonar = FakeSonar::new();
        sonar.fail_on("activate_rule");
        let orchestrator = QualityOrchestrator::new(sonar.clone());
        let err = orchestrator
            .ensure_quality_profiles("demo_shop", &desired_rules(&fixtures::l2c()))
            .await
            .unwrap_err();
        assert!(matches!(err.inner(), StdError::ExternalServiceError(_)));
    }

    #[tokio::test]
    async fn profiles_are_deleted_by_name() {
        let sonar = FakeSonar::new();
        let orchestrator = QualityOrchestrator::new(sonar.clone());
        orchestrator
            .ensure_quality_profiles("demo_shop", &desired_rules(&fixtures::l2c()))
            .await
            .unwrap();
        orchestrator.delete_profiles("demo_shop").await.unwrap();
        assert!(sonar.active_rule_set("demo_shop", "java").is_empty());
        assert_eq!(sonar.calls_to("delete_profile"), 2);
        orchestrator.delete_profiles("demo_shop").await.unwrap();
        assert_eq!(sonar.calls_to("delete_profile"), 2);
    }

    #[tokio::test]
    async fn webhook_is_compared_before_update() {
        let sonar = FakeSonar::new();
        let orchestrator = QualityOrchestrator::new(sonar.clone());
        orchestrator.register_webhook("http://a:1/webhook").await.unwrap();
        orchestrator.register_webhook("http://a:1/webhook").await.unwrap();
        assert_eq!(sonar.calls_to("create_webhook"), 1);
        assert_eq!(sonar.calls_to("update_webhook"), 0);

        orchestrator.register_webhook("http://b:1/webhook").await.unwrap();
        assert_eq!(sonar.calls_to("update_webhook"), 1);
        assert_eq!(sonar.webhook_url(WEBHOOK_NAME).as_deref(), Some("http://b:1/webhook"));
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let sonar = FakeSonar::new();
        sonar.add_language("java");
        sonar.add_language("xml");
        let orchestrator = QualityOrchestrator::new(sonar.clone());

        orchestrator.bootstrap("http://l2c-operator:34335/webhook").await.unwrap();
        let first = sonar.calls().len();
        orchestrator.bootstrap("http://l2c-operator:34335/webhook").await.unwrap();

        let writes_after: Vec<_> = sonar.calls()[first..]
            .iter()
            .filter(|c| !c.starts_with("list") && !c.starts_with("search") && !c.starts_with("gate_conditions"))
            .cloned()
            .collect();
        assert!(writes_after.is_empty(), "unexpected writes {writes_after:?}");
        assert_eq!(sonar.calls_to("create_gate_condition"), 1);
        assert_eq!(sonar.calls_to("set_default_profile"), 2);
    }

    #[tokio::test]
    async fn issue_paths_are_relative_to_the_project() {
        let sonar = FakeSonar::new();
        sonar.add_issue(
            "demo_shop",
            Issue {
                component: "demo_shop:src/main/java/App.java".into(),
                line: Some(12),
                message: "weblogic.jar dependency".into(),
            },
        );
        let issues = QualityOrchestrator::new(sonar).issues("demo_shop").await.unwrap();
        assert_eq!(
            issues,
            vec![SonarIssue {
                file: "src/main/java/App.java".into(),
                line: Some(12),
                message: "weblogic.jar dependency".into(),
            }]
        );
    }
}
