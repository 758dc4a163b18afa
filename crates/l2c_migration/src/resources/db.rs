use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, Lifecycle, LifecycleHandler,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, Probe, Secret, SecretKeySelector, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::{metadata, tier_labels, to_yaml, unsupported};
use crate::api::v1::l2c::{L2c, L2cDb};
use crate::util::config::OperatorConfig;
use crate::util::crypto::PasswordCipher;
use crate::util::errors::{Error, Result, StdError};

const DB_VOLUME: &str = "db-volume";
const TIBERO_ENV: [&str; 6] = [
    "MASTER_USER",
    "MASTER_PASSWORD",
    "TCS_INSTALL",
    "TCS_SID",
    "TB_SID",
    "TCS_PORT",
];

const TIBERO_PROBE_SETUP: &str = r##"echo 'SELECT COUNT(*) FROM all_tables;' > /tmp/test.sql
echo 'EXIT;' >> /tmp/test.sql
echo "#!/bin/bash" > /tmp/probe.sh
echo "TEST=\$(tbsql $MASTER_USER/$MASTER_PASSWORD @/tmp/test.sql | grep -E '[0-9]* row[s]? selected')" >> /tmp/probe.sh
echo "[ \"\$TEST\" == \"\" ] && exit 1 || exit 0" >> /tmp/probe.sh
chmod +x /tmp/probe.sh"##;

pub fn db_resource_name(l2c: &L2c) -> String {
    format!("{}-db", l2c.name_any())
}

fn db_spec(l2c: &L2c) -> Result<&L2cDb> {
    l2c.spec
        .db
        .as_ref()
        .ok_or_else(|| Error::StdError(StdError::InvalidArgument("db migration is not configured".to_string())))
}

/// Listener port of the target database.
pub fn db_port(l2c: &L2c) -> Result<i32> {
    let db = db_spec(l2c)?;
    match db.to.type_.as_str() {
        "tibero" => Ok(8629),
        other => Err(unsupported("spec.db.to.type", other)),
    }
}

/// Environment of the target database container.
fn db_secret_values(l2c: &L2c, cipher: &PasswordCipher) -> Result<BTreeMap<String, String>> {
    let db = db_spec(l2c)?;
    let port = db_port(l2c)?;
    match db.to.type_.as_str() {
        "tibero" => Ok(BTreeMap::from([
            ("MASTER_USER".to_string(), db.to.user.clone()),
            ("MASTER_PASSWORD".to_string(), cipher.decrypt(&db.to.password)?),
            ("TCS_INSTALL".to_string(), "1".to_string()),
            ("TCS_SID".to_string(), db.to.user.clone()),
            ("TB_SID".to_string(), db.to.user.clone()),
            ("TCS_PORT".to_string(), port.to_string()),
        ])),
        other => Err(unsupported("spec.db.to.type", other)),
    }
}

fn create_db_pvc(l2c: &L2c, config: &OperatorConfig) -> Result<PersistentVolumeClaim> {
    let db = db_spec(l2c)?;
    Ok(PersistentVolumeClaim {
        metadata: metadata(l2c, db_resource_name(l2c), "db")?,
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: config.storage_class_name.clone(),
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(db.to.storage_size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn create_db_service(l2c: &L2c) -> Result<Service> {
    let db = db_spec(l2c)?;
    Ok(Service {
        metadata: metadata(l2c, db_resource_name(l2c), "db")?,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                port: db_port(l2c)?,
                ..Default::default()
            }]),
            selector: Some(tier_labels(l2c, &db.to.type_)),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn create_db_instance_secret(l2c: &L2c, cipher: &PasswordCipher) -> Result<Secret> {
    Ok(Secret {
        metadata: metadata(l2c, db_resource_name(l2c), "db")?,
        string_data: Some(db_secret_values(l2c, cipher)?),
        ..Default::default()
    })
}

fn create_db_container(l2c: &L2c, config: &OperatorConfig) -> Result<Container> {
    let db = db_spec(l2c)?;
    let port = db_port(l2c)?;
    match db.to.type_.as_str() {
        "tibero" => Ok(Container {
            name: "database".to_string(),
            image: Some(config.tibero_image.clone()),
            ports: Some(vec![ContainerPort {
                name: Some("database".to_string()),
                container_port: port,
                ..Default::default()
            }]),
            env: Some(
                TIBERO_ENV
                    .iter()
                    .map(|key| EnvVar {
                        name: key.to_string(),
                        value_from: Some(EnvVarSource {
                            secret_key_ref: Some(SecretKeySelector {
                                name: db_resource_name(l2c),
                                key: key.to_string(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    })
                    .collect(),
            ),
            volume_mounts: Some(vec![VolumeMount {
                name: DB_VOLUME.to_string(),
                mount_path: "/tibero/mnt/tibero".to_string(),
                ..Default::default()
            }]),
            lifecycle: Some(Lifecycle {
                post_start: Some(LifecycleHandler {
                    exec: Some(ExecAction {
                        command: Some(vec![
                            "/bin/bash".to_string(),
                            "-c".to_string(),
                            TIBERO_PROBE_SETUP.to_string(),
                        ]),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            readiness_probe: Some(Probe {
                initial_delay_seconds: Some(5),
                period_seconds: Some(10),
                exec: Some(ExecAction {
                    command: Some(vec![
                        "/bin/bash".to_string(),
                        "-c".to_string(),
                        "/tmp/probe.sh".to_string(),
                    ]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        other => Err(unsupported("spec.db.to.type", other)),
    }
}

fn create_db_deployment(l2c: &L2c, config: &OperatorConfig) -> Result<Deployment> {
    let db = db_spec(l2c)?;
    let selector = tier_labels(l2c, &db.to.type_);
    Ok(Deployment {
        metadata: metadata(l2c, db_resource_name(l2c), "db")?,
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
                    containers: vec![create_db_container(l2c, config)?],
                    volumes: Some(vec![Volume {
                        name: DB_VOLUME.to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: db_resource_name(l2c),
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
    })
}

/// Manifest bundle the migrate task applies to stand up the target database.
pub fn create_db_config_map(l2c: &L2c, config: &OperatorConfig, cipher: &PasswordCipher) -> Result<ConfigMap> {
    let data = BTreeMap::from([
        ("pvc.yaml".to_string(), to_yaml(&create_db_pvc(l2c, config)?)?),
        ("svc.yaml".to_string(), to_yaml(&create_db_service(l2c)?)?),
        ("secret.yaml".to_string(), to_yaml(&create_db_instance_secret(l2c, cipher)?)?),
        ("deploy.yaml".to_string(), to_yaml(&create_db_deployment(l2c, config)?)?),
    ]);
    Ok(ConfigMap {
        metadata: metadata(l2c, db_resource_name(l2c), "l2c")?,
        data: Some(data),
        ..Default::default()
    })
}

/// Source and target credentials read by the migrate task.
pub fn create_db_secret(l2c: &L2c, cipher: &PasswordCipher) -> Result<Secret> {
    let db = db_spec(l2c)?;
    let data = BTreeMap::from([
        ("source-user".to_string(), db.from.user.clone()),
        ("source-password".to_string(), cipher.decrypt(&db.from.password)?),
        ("source-sid".to_string(), db.from.sid.clone()),
        ("target-user".to_string(), db.to.user.clone()),
        ("target-password".to_string(), cipher.decrypt(&db.to.password)?),
        ("target-sid".to_string(), db.to.user.clone()),
    ]);
    Ok(Secret {
        metadata: metadata(l2c, l2c.name_any(), "l2c")?,
        string_data: Some(data),
        ..Default::default()
    })
}
