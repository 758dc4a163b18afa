//! The operator's own SonarQube instance, living in the operator namespace.
//!
//! Unlike the per-`L2c` builders these objects have no owner; they outlive
//! every migration project.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe, Secret, Service, ServicePort, ServiceSpec,
    Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::quality::credentials::SonarCredentials;
use crate::util::config::OperatorConfig;

pub const SONAR_PORT: i32 = 9000;
const SONAR_VOLUME: &str = "sonar-pv";

pub fn sonar_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("owned-by".to_string(), "l2c-operator".to_string())])
}

/// Pod selector of the SonarQube Deployment.
pub fn sonar_pod_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), "l2c-sonarqube".to_string())])
}

fn sonar_metadata(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(sonar_labels()),
        ..Default::default()
    }
}

/// Credential secret holding the factory admin account until it is rotated.
pub fn create_sonar_secret(namespace: &str, name: &str) -> Secret {
    Secret {
        metadata: sonar_metadata(namespace, name),
        data: Some(SonarCredentials::default().to_data()),
        ..Default::default()
    }
}

pub fn create_sonar_pvc(config: &OperatorConfig) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: sonar_metadata(&config.namespace, &config.sonar_resource_name),
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: config.storage_class_name.clone(),
            access_modes: Some(vec!["ReadWriteMany".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(config.sonar_storage_size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn create_sonar_service(config: &OperatorConfig) -> Service {
    Service {
        metadata: sonar_metadata(&config.namespace, &config.sonar_resource_name),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                port: SONAR_PORT,
                ..Default::default()
            }]),
            selector: Some(sonar_pod_labels()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn sonar_mount(sub_path: &str) -> VolumeMount {
    VolumeMount {
        name: SONAR_VOLUME.to_string(),
        mount_path: format!("/opt/sonarqube/{sub_path}"),
        sub_path: Some(sub_path.to_string()),
        ..Default::default()
    }
}

fn create_sonar_container(config: &OperatorConfig) -> Container {
    Container {
        name: "sonarqube".to_string(),
        image: Some(config.sonar_image.clone()),
        image_pull_policy: Some("Always".to_string()),
        ports: Some(vec![ContainerPort {
            name: Some("web".to_string()),
            container_port: SONAR_PORT,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![sonar_mount("data"), sonar_mount("logs")]),
        // The user search answers only once the web server and its database are up.
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/api/users/search".to_string()),
                port: IntOrString::Int(SONAR_PORT),
                ..Default::default()
            }),
            period_seconds: Some(1),
            success_threshold: Some(5),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn create_sonar_deployment(config: &OperatorConfig) -> Deployment {
    let selector = sonar_pod_labels();
    Deployment {
        metadata: sonar_metadata(&config.namespace, &config.sonar_resource_name),
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
                    containers: vec![create_sonar_container(config)],
                    volumes: Some(vec![Volume {
                        name: SONAR_VOLUME.to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: config.sonar_resource_name.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deployment_serves_from_the_claim() {
        let config = OperatorConfig::default();
        let deploy = create_sonar_deployment(&config);
        assert_eq!(deploy.metadata.name.as_deref(), Some("l2c-managed-sonarqube"));
        assert_eq!(deploy.metadata.namespace.as_deref(), Some("l2c-system"));

        let pod = deploy.spec.unwrap().template.spec.unwrap();
        let volumes = pod.volumes.unwrap();
        assert_eq!(
            volumes[0].persistent_volume_claim.as_ref().map(|c| c.claim_name.as_str()),
            Some("l2c-managed-sonarqube")
        );
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("azssi/working:0.0.1"));
        let mounts: Vec<_> = container
            .volume_mounts
            .iter()
            .flatten()
            .map(|m| (m.mount_path.as_str(), m.sub_path.as_deref()))
            .collect();
        assert_eq!(
            mounts,
            vec![("/opt/sonarqube/data", Some("data")), ("/opt/sonarqube/logs", Some("logs"))]
        );
        let readiness = container.readiness_probe.as_ref().and_then(|p| p.http_get.as_ref()).unwrap();
        assert_eq!(readiness.path.as_deref(), Some("/api/users/search"));
    }

    #[test]
    fn service_selects_the_sonar_pods() {
        let service = create_sonar_service(&OperatorConfig::default());
        let spec = service.spec.unwrap();
        assert_eq!(spec.selector, Some(sonar_pod_labels()));
        assert_eq!(spec.ports.unwrap()[0].port, 9000);
    }

    #[test]
    fn pvc_uses_configured_storage() {
        let config = OperatorConfig {
            storage_class_name: Some("nfs".to_string()),
            sonar_storage_size: "5Gi".to_string(),
            ..Default::default()
        };
        let spec = create_sonar_pvc(&config).spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("nfs"));
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteMany".to_string()]));
        assert_eq!(
            spec.resources.and_then(|r| r.requests).and_then(|r| r.get("storage").cloned()),
            Some(Quantity("5Gi".to_string()))
        );
    }

    #[test]
    fn secret_starts_with_factory_admin() {
        let secret = create_sonar_secret("l2c-system", "l2c-managed-sonarqube");
        assert_eq!(secret.metadata.labels, Some(sonar_labels()));
        assert!(SonarCredentials::from_secret(&secret).unwrap().is_factory_admin());
    }
}
