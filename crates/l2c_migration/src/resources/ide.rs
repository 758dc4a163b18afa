//! On-demand web IDE opened on the project's sources after a failed analysis.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ExecAction, Lifecycle, LifecycleHandler, PodSpec, PodTemplateSpec,
    Secret, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::json;

use super::{create_placeholder_ingress, metadata, tier_labels};
use crate::api::v1::l2c::L2c;
use crate::util::config::OperatorConfig;
use crate::util::errors::Result;

pub const IDE_PORT: i32 = 8080;
const CONFIG_KEY: &str = "config.yaml";
const SETTINGS_KEY: &str = "settings.json";
const VOLUME_SETTINGS: &str = "setting";
const VOLUME_CONFIG: &str = "config";

pub fn ide_resource_name(l2c: &L2c) -> String {
    format!("{}-ide", l2c.name_any())
}

pub fn random_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn ide_metadata(l2c: &L2c) -> Result<ObjectMeta> {
    metadata(l2c, ide_resource_name(l2c), "ide")
}

/// code-server configuration with password authentication.
pub fn create_ide_secret(l2c: &L2c, password: &str) -> Result<Secret> {
    let config = format!("bind-addr: 0.0.0.0:{IDE_PORT}\nauth: password\npassword: {password}\ncert: false");
    Ok(Secret {
        metadata: ide_metadata(l2c)?,
        string_data: Some(BTreeMap::from([(CONFIG_KEY.to_string(), config)])),
        ..Default::default()
    })
}

/// Reads the login password back from a stored IDE secret.
pub fn ide_password(secret: &Secret) -> Option<String> {
    let config = secret
        .data
        .as_ref()
        .and_then(|d| d.get(CONFIG_KEY))
        .and_then(|b| String::from_utf8(b.0.clone()).ok())
        .or_else(|| secret.string_data.as_ref().and_then(|d| d.get(CONFIG_KEY)).cloned())?;
    config
        .lines()
        .find_map(|line| line.strip_prefix("password: "))
        .map(|p| p.trim().to_string())
}

/// SonarLint settings pointing the editor at the project's quality profile.
pub fn create_ide_config_map(l2c: &L2c, config: &OperatorConfig) -> Result<ConfigMap> {
    let settings = json!({
        "sonarlint.connectedMode.connections.sonarqube": [
            { "serverUrl": format!("{}/", config.sonar_url()) }
        ],
        "sonarlint.connectedMode.project": { "projectKey": l2c.project_key()? },
        "java.semanticHighlighting.enabled": true,
        "sonarlint.ls.javaHome": "/usr/lib/jvm/java-11-openjdk-amd64",
        "java.home": "/usr/lib/jvm/java-11-openjdk-amd64"
    });
    Ok(ConfigMap {
        metadata: ide_metadata(l2c)?,
        data: Some(BTreeMap::from([(SETTINGS_KEY.to_string(), settings.to_string())])),
        ..Default::default()
    })
}

pub fn create_ide_service(l2c: &L2c) -> Result<Service> {
    Ok(Service {
        metadata: ide_metadata(l2c)?,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: IDE_PORT,
                ..Default::default()
            }]),
            selector: Some(tier_labels(l2c, "ide-pod")),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn create_ide_ingress(l2c: &L2c) -> Result<Ingress> {
    Ok(create_placeholder_ingress(
        ide_metadata(l2c)?,
        &ide_resource_name(l2c),
        IDE_PORT,
    ))
}

pub fn create_ide_deployment(l2c: &L2c, config: &OperatorConfig) -> Result<Deployment> {
    let selector = tier_labels(l2c, "ide-pod");
    let clone = format!(
        "git clone {} ~/project/{}; cp /tmp/settings.json /home/coder/.local/share/code-server/User/settings.json",
        l2c.spec.was.from.git.url,
        l2c.name_any()
    );

    Ok(Deployment {
        metadata: ide_metadata(l2c)?,
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "web-ide".to_string(),
                        image: Some(config.ide_image.clone()),
                        volume_mounts: Some(vec![
                            VolumeMount {
                                name: VOLUME_SETTINGS.to_string(),
                                sub_path: Some(SETTINGS_KEY.to_string()),
                                mount_path: "/tmp/settings.json".to_string(),
                                ..Default::default()
                            },
                            VolumeMount {
                                name: VOLUME_CONFIG.to_string(),
                                sub_path: Some(CONFIG_KEY.to_string()),
                                mount_path: "/home/coder/.config/code-server/config.yaml".to_string(),
                                ..Default::default()
                            },
                        ]),
                        lifecycle: Some(Lifecycle {
                            post_start: Some(LifecycleHandler {
                                exec: Some(ExecAction {
                                    command: Some(vec!["/bin/bash".to_string(), "-c".to_string(), clone]),
                                }),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    volumes: Some(vec![
                        Volume {
                            name: VOLUME_SETTINGS.to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: ide_resource_name(l2c),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: VOLUME_CONFIG.to_string(),
                            secret: Some(SecretVolumeSource {
                                secret_name: Some(ide_resource_name(l2c)),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::fixtures;
    use k8s_openapi::ByteString;

    #[test]
    fn password_is_read_back_from_either_encoding() {
        let l2c = fixtures::l2c();
        let secret = create_ide_secret(&l2c, "s3cret").unwrap();
        assert_eq!(ide_password(&secret).as_deref(), Some("s3cret"));

        let config = secret.string_data.clone().unwrap()[CONFIG_KEY].clone();
        let stored = Secret {
            data: Some(BTreeMap::from([(CONFIG_KEY.to_string(), ByteString(config.into_bytes()))])),
            ..Default::default()
        };
        assert_eq!(ide_password(&stored).as_deref(), Some("s3cret"));
        assert_eq!(ide_password(&Secret::default()), None);
    }

    #[test]
    fn random_passwords_have_the_requested_length() {
        let a = random_password(30);
        assert_eq!(a.len(), 30);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, random_password(30));
    }

    #[test]
    fn deployment_clones_the_source_repository() {
        let l2c = fixtures::l2c();
        let deploy = create_ide_deployment(&l2c, &OperatorConfig::default()).unwrap();
        let container = &deploy.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("codercom/code-server:3.4.1"));
        let command = container
            .lifecycle
            .as_ref()
            .and_then(|l| l.post_start.as_ref())
            .and_then(|h| h.exec.as_ref())
            .and_then(|e| e.command.clone())
            .unwrap();
        assert!(command[2].starts_with("git clone https://git.example.com/shop.git ~/project/shop;"));
    }

    #[test]
    fn settings_point_at_the_project() {
        let cm = create_ide_config_map(&fixtures::l2c(), &OperatorConfig::default()).unwrap();
        let settings: serde_json::Value = serde_json::from_str(&cm.data.unwrap()[SETTINGS_KEY]).unwrap();
        assert_eq!(settings["sonarlint.connectedMode.project"]["projectKey"], "demo_shop");
    }
}
