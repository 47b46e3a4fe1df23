//! Remote state reader: authoritative reads, with NotFound as "gone".

use chrono::Utc;

use govern_core::{OrganizationName, PolicySet, PolicySetId, PolicySetRecord, VcsRepo};

use crate::context::Context;
use crate::error::{remote_err, Operation, ReconcileError, RemoteError};
use crate::pagination::collect_pages;
use crate::remote::RemoteApi;

/// Read a policy set. `Ok(None)` means the remote no longer has it.
pub fn read_policy_set<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    id: &PolicySetId,
) -> Result<Option<PolicySet>, ReconcileError> {
    tracing::debug!(id = %id, "reading policy set");
    match api.read_policy_set(ctx, id) {
        Ok(set) => Ok(Some(set)),
        Err(RemoteError::NotFound) => {
            tracing::warn!(id = %id, "policy set no longer exists");
            Ok(None)
        }
        Err(e) => Err(remote_err(id, Operation::ReadPolicySet, e)),
    }
}

/// Map a remote policy set onto a record.
///
/// - The VCS branch is only kept when the declaration (or the previous
///   record) names one, so a default branch never reads back as an override.
/// - Global sets carry no workspaces.
/// - An empty description reads as none.
/// - `organization` falls back to `known_org` when the remote omits it.
pub fn to_record(
    remote: PolicySet,
    declared_vcs: Option<&VcsRepo>,
    known_org: &OrganizationName,
    slug_fingerprint: Option<String>,
) -> PolicySetRecord {
    let keep_branch = declared_vcs
        .and_then(|vcs| vcs.branch.as_deref())
        .is_some_and(|b| !b.is_empty());
    let vcs_repo = remote.vcs_repo.map(|mut vcs| {
        if !keep_branch {
            vcs.branch = None;
        }
        vcs
    });
    let workspace_ids = if remote.global {
        Default::default()
    } else {
        remote.workspace_ids
    };

    PolicySetRecord {
        id: remote.id,
        name: remote.name,
        description: remote.description.filter(|d| !d.is_empty()),
        organization: remote.organization.unwrap_or_else(|| known_org.clone()),
        global: remote.global,
        policies_path: remote.policies_path,
        vcs_repo,
        policy_ids: remote.policy_ids,
        workspace_ids,
        slug_fingerprint,
        observed_at: Utc::now(),
    }
}

/// Re-read the record's policy set and overwrite the record with what the
/// remote reports. A vanished set clears the record; that is not an error.
///
/// Returns `false` when the record was cleared.
pub fn refresh_policy_set<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    record: &mut Option<PolicySetRecord>,
    declared_vcs: Option<&VcsRepo>,
) -> Result<bool, ReconcileError> {
    let Some(current) = record.as_ref() else {
        return Ok(false);
    };
    match read_policy_set(api, ctx, &current.id)? {
        Some(remote) => {
            let declared = declared_vcs.or(current.vcs_repo.as_ref()).cloned();
            let refreshed = to_record(
                remote,
                declared.as_ref(),
                &current.organization,
                current.slug_fingerprint.clone(),
            );
            *record = Some(refreshed);
            Ok(true)
        }
        None => {
            *record = None;
            Ok(false)
        }
    }
}

/// Read a producer's full consumer list. `Ok(None)` means the producer
/// organization no longer exists.
pub fn read_module_consumers<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    producer: &OrganizationName,
) -> Result<Option<Vec<String>>, ReconcileError> {
    tracing::debug!(organization = %producer, "reading module consumers");
    let listed = collect_pages(ctx, |page| api.list_module_consumers(ctx, producer, page));
    match listed {
        Ok(consumers) => Ok(Some(consumers)),
        Err(RemoteError::NotFound) => {
            tracing::warn!(organization = %producer, "organization no longer exists");
            Ok(None)
        }
        Err(e) => Err(remote_err(producer, Operation::ListModuleConsumers, e)),
    }
}
