pub mod driver;
pub mod ingress;
pub mod l2c_controller;
pub mod projector;
pub mod readiness;
pub mod run;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::api::v1::l2c::L2c;
use crate::util::errors::{Error, Result, StdError};

/// Controller reference stamped on every object derived from `l2c`.
pub fn owner_reference(l2c: &L2c) -> Result<OwnerReference> {
    l2c.controller_owner_ref(&()).ok_or_else(|| {
        Error::StdError(StdError::OwnershipError(format!(
            "L2c {} has no uid yet",
            l2c.name_any()
        )))
    })
}
