use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use kube::ResourceExt;

use super::metadata;
use crate::api::v1::l2c::L2c;
use crate::util::errors::Result;

/// ClusterRole granting pipeline tasks what they need in the project namespace.
pub const PIPELINE_CLUSTER_ROLE: &str = "l2c";

pub fn create_service_account(l2c: &L2c) -> Result<ServiceAccount> {
    Ok(ServiceAccount {
        metadata: metadata(l2c, l2c.name_any(), "l2c")?,
        ..Default::default()
    })
}

pub fn create_role_binding(l2c: &L2c) -> Result<RoleBinding> {
    Ok(RoleBinding {
        metadata: metadata(l2c, l2c.name_any(), "l2c")?,
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: PIPELINE_CLUSTER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: l2c.name_any(),
            namespace: Some(l2c.namespace_or_err()?),
            ..Default::default()
        }]),
    })
}
