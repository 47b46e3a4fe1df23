//! Policy set version upload: create a version, then push the bundle.
//!
//! The two remote calls are not atomic: when creation succeeds and the
//! upload fails, an empty version stays behind on the remote. Callers must
//! not record the bundle as uploaded unless [`upload`] returned `Ok`.

use std::path::Path;

use sha2::{Digest, Sha256};

use govern_core::{PolicySetId, PolicySetVersion, SlugSource};

use crate::context::Context;
use crate::error::{mutation_err, remote_err, Operation, ReconcileError};
use crate::remote::RemoteApi;

/// Hex SHA-256 of the bundle file at `slug.source_path`.
pub fn fingerprint(slug: &SlugSource) -> Result<String, ReconcileError> {
    let bytes = std::fs::read(&slug.source_path).map_err(|source| ReconcileError::Bundle {
        path: slug.source_path.clone(),
        source,
    })?;
    let mut h = Sha256::new();
    h.update(&bytes);
    Ok(hex::encode(h.finalize()))
}

/// Create a new version of `policy_set_id` and upload `bundle` into it.
pub fn upload<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    policy_set_id: &PolicySetId,
    bundle: &Path,
) -> Result<PolicySetVersion, ReconcileError> {
    tracing::debug!(id = %policy_set_id, "creating policy set version");
    let version = api
        .create_policy_set_version(ctx, policy_set_id)
        .map_err(|e| mutation_err(policy_set_id, Operation::CreatePolicySetVersion, e))?;

    tracing::debug!(version = %version.id, bundle = %bundle.display(), "uploading policy set version");
    api.upload_policy_set_version(ctx, &version, bundle)
        .map_err(|e| remote_err(&version.id, Operation::UploadPolicySetVersion, e))?;

    tracing::info!(id = %policy_set_id, version = %version.id, "uploaded policy set version");
    Ok(version)
}
