use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, LocalObjectReference, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use super::{create_placeholder_ingress, labels, metadata, tier_labels, to_yaml, unsupported};
use crate::api::v1::l2c::L2c;
use crate::util::config::OperatorConfig;
use crate::util::errors::Result;

pub const DEPLOY_SPEC_KEY: &str = "deploy-spec.yaml";

pub fn was_resource_name(l2c: &L2c) -> String {
    format!("{}-was", l2c.name_any())
}

/// Container port of the target application server.
pub fn was_port(l2c: &L2c) -> Result<i32> {
    match l2c.spec.was.to.type_.as_str() {
        "jeus" => Ok(8808),
        other => Err(unsupported("spec.was.to.type", other)),
    }
}

pub fn builder_image(l2c: &L2c, config: &OperatorConfig) -> Result<String> {
    match l2c.spec.was.to.type_.as_str() {
        "jeus" => Ok(config.builder_image_jeus.clone()),
        other => Err(unsupported("spec.was.to.type", other)),
    }
}

/// Deployment template handed to the deploy task; the task fills in name and image.
pub fn create_was_deployment(l2c: &L2c) -> Result<Deployment> {
    let port = was_port(l2c)?;
    let selector = tier_labels(l2c, &l2c.spec.was.to.type_);

    Ok(Deployment {
        metadata: ObjectMeta {
            labels: Some(labels(l2c, "was")),
            ..Default::default()
        },
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
                        image: Some(l2c.spec.was.to.image.url.clone()),
                        ports: Some(vec![ContainerPort {
                            container_port: port,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    image_pull_secrets: l2c
                        .spec
                        .was
                        .to
                        .image
                        .reg_secret
                        .as_ref()
                        .filter(|s| !s.is_empty())
                        .map(|s| vec![LocalObjectReference { name: s.clone() }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn create_was_config_map(l2c: &L2c) -> Result<ConfigMap> {
    let deploy = to_yaml(&create_was_deployment(l2c)?)?;
    Ok(ConfigMap {
        metadata: metadata(l2c, was_resource_name(l2c), "l2c")?,
        data: Some([(DEPLOY_SPEC_KEY.to_string(), deploy)].into_iter().collect()),
        ..Default::default()
    })
}

pub fn create_was_service(l2c: &L2c) -> Result<Service> {
    let target = was_port(l2c)?;
    Ok(Service {
        metadata: metadata(l2c, was_resource_name(l2c), "was")?,
        spec: Some(ServiceSpec {
            type_: Some(l2c.spec.was.to.service_type.service_kind().to_string()),
            ports: Some(vec![ServicePort {
                port: l2c.spec.was.to.port,
                target_port: Some(IntOrString::Int(target)),
                ..Default::default()
            }]),
            selector: Some(tier_labels(l2c, &l2c.spec.was.to.type_)),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn create_was_ingress(l2c: &L2c) -> Result<Ingress> {
    Ok(create_placeholder_ingress(
        metadata(l2c, was_resource_name(l2c), "was")?,
        &was_resource_name(l2c),
        l2c.spec.was.to.port,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::fixtures;
    use crate::resources::INGRESS_PLACEHOLDER_HOST;

    #[test]
    fn config_map_embeds_deployment_template() {
        let cm = create_was_config_map(&fixtures::l2c()).unwrap();
        assert_eq!(cm.metadata.name.as_deref(), Some("shop-was"));

        let yaml = &cm.data.unwrap()[DEPLOY_SPEC_KEY];
        let deploy: Deployment = serde_yaml::from_str(yaml).unwrap();
        let spec = deploy.spec.unwrap();
        assert_eq!(spec.selector.match_labels.unwrap()["tier"], "jeus");
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers[0].ports.as_ref().unwrap()[0].container_port, 8808);
        assert_eq!(pod.containers[0].image.as_deref(), Some("registry.example.com/shop"));
        assert_eq!(pod.image_pull_secrets.unwrap()[0].name, "regcred");
    }

    #[test]
    fn unknown_was_type_is_rejected() {
        let mut l2c = fixtures::l2c();
        l2c.spec.was.to.type_ = "tomcat".into();
        assert!(was_port(&l2c).is_err());
        assert!(create_was_config_map(&l2c).is_err());
        assert!(builder_image(&l2c, &OperatorConfig::default()).is_err());
    }

    #[test]
    fn service_and_ingress_expose_the_requested_port() {
        let l2c = fixtures::l2c();
        let svc = create_was_service(&l2c).unwrap().spec.unwrap();
        assert_eq!(svc.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(svc.ports.unwrap()[0].port, 8080);

        let ingress = create_was_ingress(&l2c).unwrap();
        let rule = &ingress.spec.unwrap().rules.unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some(INGRESS_PLACEHOLDER_HOST));
    }
}
