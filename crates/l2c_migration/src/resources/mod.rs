//! Desired-state builders for every object derived from an `L2c`.
//!
//! Builders only fill in object literals; owner references are attached by
//! [`crate::cluster::ensure::ensure`].

pub mod db;
pub mod ide;
pub mod pipeline;
pub mod rbac;
pub mod sonarqube;
pub mod was;

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::Serialize;

use crate::api::v1::l2c::L2c;
use crate::util::errors::{Error, Result, StdError};

/// Host every generated Ingress starts with, until a load balancer address is known.
pub const INGRESS_PLACEHOLDER_HOST: &str = "waiting.for.ingress.ready";

pub fn labels(l2c: &L2c, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("l2c".to_string(), l2c.name_any()),
        ("component".to_string(), component.to_string()),
    ])
}

/// Pod selector labels.
pub fn tier_labels(l2c: &L2c, tier: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("l2c".to_string(), l2c.name_any()),
        ("tier".to_string(), tier.to_string()),
    ])
}

pub fn metadata(l2c: &L2c, name: String, component: &str) -> Result<ObjectMeta> {
    Ok(ObjectMeta {
        name: Some(name),
        namespace: Some(l2c.namespace_or_err()?),
        labels: Some(labels(l2c, component)),
        ..Default::default()
    })
}

/// Single-rule Ingress routing the placeholder host to `service:port`.
pub fn create_placeholder_ingress(metadata: ObjectMeta, service: &str, port: i32) -> Ingress {
    Ingress {
        metadata,
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(INGRESS_PLACEHOLDER_HOST.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(port),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn to_yaml<T: Serialize>(obj: &T) -> Result<String> {
    serde_yaml::to_string(obj).map_err(|e| Error::StdError(StdError::SerializationError(e.to_string())))
}

pub fn unsupported(field: &str, value: &str) -> Error {
    Error::StdError(StdError::InvalidArgument(format!("{field}({value}) not supported")))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::api::v1::l2c::*;
    use kube::api::ObjectMeta;

    /// `weblogic` to `jeus` project without a database, as created by a user.
    pub fn l2c() -> L2c {
        L2c {
            metadata: ObjectMeta {
                name: Some("shop".into()),
                namespace: Some("demo".into()),
                uid: Some("uid-shop".into()),
                ..Default::default()
            },
            spec: L2cSpec {
                was: L2cWas {
                    from: L2cWasFrom {
                        type_: "weblogic".into(),
                        git: L2cGit {
                            url: "https://git.example.com/shop.git".into(),
                            revision: Some("main".into()),
                        },
                    },
                    to: L2cWasTo {
                        type_: "jeus".into(),
                        image: L2cImage {
                            url: "registry.example.com/shop".into(),
                            reg_secret: Some("regcred".into()),
                        },
                        port: 8080,
                        service_type: ServiceType::Ingress,
                    },
                },
                db: None,
            },
            status: None,
        }
    }

    pub fn with_db(mut l2c: L2c, from_password: &str, to_password: &str) -> L2c {
        l2c.spec.db = Some(L2cDb {
            from: L2cDbFrom {
                type_: "oracle".into(),
                host: "oracle.legacy".into(),
                port: 1521,
                user: "scott".into(),
                password: from_password.into(),
                sid: "ORCL".into(),
            },
            to: L2cDbTo {
                type_: "tibero".into(),
                storage_size: "10Gi".into(),
                user: "tibero".into(),
                password: to_password.into(),
            },
        });
        l2c
    }
}
