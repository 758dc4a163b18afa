use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::info;

use super::{Cluster, ClusterResource};
use crate::util::errors::{Error, Result, StdError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    /// Already present and left as is.
    Existing,
    /// Deleted and created again from the desired object.
    Recreated,
}

/// Makes sure `desired` exists.
///
/// An absent object is created with `owner` as its controller reference. A present one
/// is left untouched unless `delete_first` is set, in which case it is deleted and
/// created again from `desired`, so the stored object is exactly `desired` rather than
/// a merge with the old one. Failures are returned as-is; retrying is left to the next
/// reconcile.
pub async fn ensure<C: Cluster, K: ClusterResource>(
    cluster: &C,
    mut desired: K,
    owner: Option<&OwnerReference>,
    delete_first: bool,
) -> Result<EnsureOutcome> {
    let kind = K::kind(&());
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing(format!("{kind} without a name"))))?;
    let namespace = desired.meta().namespace.clone().ok_or_else(|| {
        Error::StdError(StdError::MetadataMissing(format!("{kind} {name} without a namespace")))
    })?;

    if let Some(owner) = owner {
        if owner.uid.is_empty() || owner.name.is_empty() {
            return Err(Error::StdError(StdError::OwnershipError(format!(
                "owner of {kind} {name} has no uid"
            ))));
        }
        desired.meta_mut().owner_references = Some(vec![owner.clone()]);
    }
    desired.meta_mut().resource_version = None;

    let existing = cluster.get::<K>(&namespace, &name).await?;
    let outcome = match existing {
        Some(_) if !delete_first => return Ok(EnsureOutcome::Existing),
        Some(_) => {
            cluster.delete::<K>(&namespace, &name).await.map_err(|e| {
                Error::StdError(StdError::ResourceConflict(format!(
                    "cannot delete {kind} {namespace}/{name}: {}",
                    e.message()
                )))
            })?;
            EnsureOutcome::Recreated
        }
        None => EnsureOutcome::Created,
    };

    cluster.create(&namespace, &desired).await.map_err(|e| {
        Error::StdError(StdError::ResourceCreateFailed(format!(
            "cannot create {kind} {namespace}/{name}: {}",
            e.message()
        )))
    })?;
    info!("{:?} {} {}/{}", outcome, kind, namespace, name);
    Ok(outcome)
}
