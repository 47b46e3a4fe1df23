//! Policy set reconciler.
//!
//! ## `reconcile`: step protocol
//!
//! 1. Create the policy set if no record is held; store its identity.
//! 2. Upload a new version when the source is a bundle whose fingerprint
//!    differs from the last successful upload.
//! 3. When `global` flips from false to true, detach every previously
//!    attached workspace before anything else is touched.
//! 4. Issue one whole-object attribute update if name, description,
//!    global or the VCS binding differ from the record.
//! 5. Diff policy membership; add first, then remove.
//! 6. Diff workspace membership the same way (skipped for global sets).
//! 7. Refresh the record from the remote.
//!
//! The record is updated after each successful step, so an interrupted run
//! can be persisted and resumed without repeating completed mutations.

use std::collections::BTreeSet;

use govern_core::{PolicySetRecord, PolicySetSpec};

use crate::action::Action;
use crate::context::Context;
use crate::diff::diff_sets;
use crate::error::{mutation_err, remote_err, Operation, ReconcileError, RemoteError};
use crate::reader::{refresh_policy_set, to_record};
use crate::remote::{PolicySetCreate, PolicySetUpdate, RemoteApi};
use crate::version;

/// Converge one policy set towards `desired`.
///
/// `record` is the last observed state (`None` when nothing exists yet).
/// It is updated in place, including on error. After a successful run it
/// holds the freshly read remote state, or `None` if the set vanished
/// during the final read.
pub fn reconcile<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    desired: &PolicySetSpec,
    record: &mut Option<PolicySetRecord>,
) -> Result<Vec<Action>, ReconcileError> {
    let slug_fingerprint = desired.slug().map(version::fingerprint).transpose()?;
    let mut actions = Vec::new();

    let mut rec = match record.take() {
        Some(rec) => rec,
        None => {
            let rec = create(api, ctx, desired)?;
            actions.push(Action::CreatedPolicySet { id: rec.id.clone() });
            rec
        }
    };

    let converged = converge(
        api,
        ctx,
        desired,
        &mut rec,
        slug_fingerprint.as_deref(),
        &mut actions,
    );
    *record = Some(rec);
    converged?;

    if let Some(rec) = record.as_ref() {
        step(ctx, rec.id.as_str(), Operation::ReadPolicySet)?;
    }
    refresh_policy_set(api, ctx, record, desired.vcs_repo())?;
    Ok(actions)
}

/// Why `desired` cannot be converged in place onto `rec`. A non-empty
/// result means the set must be deleted and created again.
pub fn replacement_reasons(desired: &PolicySetSpec, rec: &PolicySetRecord) -> Vec<String> {
    let mut reasons = Vec::new();
    if desired.organization != rec.organization {
        reasons.push(format!(
            "organization changes from {} to {}",
            rec.organization, desired.organization
        ));
    }
    if desired.policies_path != rec.policies_path {
        reasons.push("policies_path changes".to_string());
    }
    if desired.vcs_repo() != rec.vcs_repo.as_ref() {
        reasons.push("vcs_repo changes".to_string());
    }
    reasons
}

/// Human-readable list of in-place changes `reconcile` would make.
pub fn pending_changes(desired: &PolicySetSpec, rec: &PolicySetRecord) -> Vec<String> {
    let mut changes = Vec::new();
    if attributes_changed(desired, rec) {
        changes.push("attributes".to_string());
    }
    if desired.global && !rec.global && !rec.workspace_ids.is_empty() {
        changes.push(format!(
            "detach {} workspace(s) before going global",
            rec.workspace_ids.len()
        ));
    }
    if let Some(ids) = desired.policy_ids() {
        let d = diff_sets(&rec.policy_ids, ids);
        if !d.to_add.is_empty() {
            changes.push(format!("add {} policy(ies)", d.to_add.len()));
        }
        if !d.to_remove.is_empty() {
            changes.push(format!("remove {} policy(ies)", d.to_remove.len()));
        }
    }
    if !desired.global {
        let d = diff_sets(&rec.workspace_ids, &desired.workspace_ids);
        if !d.to_add.is_empty() {
            changes.push(format!("attach {} workspace(s)", d.to_add.len()));
        }
        if !d.to_remove.is_empty() {
            changes.push(format!("detach {} workspace(s)", d.to_remove.len()));
        }
    }
    changes
}

/// Delete the record's policy set. An already-absent set is success.
pub fn delete<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    record: &mut Option<PolicySetRecord>,
) -> Result<Vec<Action>, ReconcileError> {
    let Some(rec) = record.as_ref() else {
        return Ok(Vec::new());
    };
    step(ctx, rec.id.as_str(), Operation::DeletePolicySet)?;

    tracing::debug!(id = %rec.id, "deleting policy set");
    let action = match api.delete_policy_set(ctx, &rec.id) {
        Ok(()) => {
            tracing::info!(id = %rec.id, "deleted policy set");
            Action::DeletedPolicySet { id: rec.id.clone() }
        }
        Err(RemoteError::NotFound) => {
            tracing::info!(id = %rec.id, "policy set already deleted");
            Action::Forgotten
        }
        Err(e) => return Err(remote_err(&rec.id, Operation::DeletePolicySet, e)),
    };
    *record = None;
    Ok(vec![action])
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn step(ctx: &Context, id: &str, op: Operation) -> Result<(), ReconcileError> {
    ctx.check().map_err(|e| remote_err(id, op, e))
}

fn create<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    desired: &PolicySetSpec,
) -> Result<PolicySetRecord, ReconcileError> {
    let label = format!("{}/{}", desired.organization, desired.name);
    step(ctx, &label, Operation::CreatePolicySet)?;

    let attrs = PolicySetCreate {
        name: desired.name.clone(),
        description: desired.description.clone(),
        global: desired.global,
        policies_path: desired.policies_path.clone(),
        vcs_repo: desired.vcs_repo().cloned(),
        policy_ids: desired.policy_ids().cloned().unwrap_or_default(),
        workspace_ids: if desired.global {
            BTreeSet::new()
        } else {
            desired.workspace_ids.clone()
        },
    };

    tracing::debug!(policy_set = %label, "creating policy set");
    let created = api
        .create_policy_set(ctx, &desired.organization, &attrs)
        .map_err(|e| remote_err(&label, Operation::CreatePolicySet, e))?;
    tracing::info!(policy_set = %label, id = %created.id, "created policy set");

    // The slug fingerprint stays empty so step 2 uploads the first version.
    Ok(to_record(
        created,
        desired.vcs_repo(),
        &desired.organization,
        None,
    ))
}

fn attributes_changed(desired: &PolicySetSpec, rec: &PolicySetRecord) -> bool {
    desired.name != rec.name
        || desired
            .description
            .as_ref()
            .is_some_and(|d| rec.description.as_ref() != Some(d))
        || desired.global != rec.global
        || desired
            .vcs_repo()
            .is_some_and(|vcs| rec.vcs_repo.as_ref() != Some(vcs))
}

fn converge<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    desired: &PolicySetSpec,
    rec: &mut PolicySetRecord,
    slug_fingerprint: Option<&str>,
    actions: &mut Vec<Action>,
) -> Result<(), ReconcileError> {
    let id = rec.id.clone();

    // Step 2: upload a new version only when the bundle changed.
    if let (Some(slug), Some(fingerprint)) = (desired.slug(), slug_fingerprint) {
        if desired.vcs_repo().is_none() && rec.slug_fingerprint.as_deref() != Some(fingerprint) {
            step(ctx, id.as_str(), Operation::CreatePolicySetVersion)?;
            let version = version::upload(api, ctx, &id, &slug.source_path)?;
            rec.slug_fingerprint = Some(fingerprint.to_string());
            actions.push(Action::UploadedVersion {
                version: version.id,
            });
        }
    }

    // Step 3: a set that becomes global must first drop its workspaces.
    if desired.global && !rec.global && !rec.workspace_ids.is_empty() {
        step(ctx, id.as_str(), Operation::RemoveWorkspaces)?;
        let previous = rec.workspace_ids.clone();
        tracing::debug!(id = %id, count = previous.len(), "detaching workspaces from now-global policy set");
        api.remove_workspaces(ctx, &id, &previous)
            .map_err(|e| mutation_err(&id, Operation::RemoveWorkspaces, e))?;
        rec.workspace_ids.clear();
        actions.push(Action::DetachedForGlobal {
            workspaces: previous,
        });
    }

    // Step 4: whole-object attribute update.
    if attributes_changed(desired, rec) {
        step(ctx, id.as_str(), Operation::UpdatePolicySet)?;
        let attrs = PolicySetUpdate {
            name: desired.name.clone(),
            description: desired.description.clone(),
            global: desired.global,
            vcs_repo: desired.vcs_repo().cloned(),
        };
        tracing::debug!(id = %id, "updating policy set attributes");
        api.update_policy_set(ctx, &id, &attrs)
            .map_err(|e| mutation_err(&id, Operation::UpdatePolicySet, e))?;
        rec.name = attrs.name;
        if attrs.description.is_some() {
            rec.description = attrs.description;
        }
        rec.global = attrs.global;
        if attrs.vcs_repo.is_some() {
            rec.vcs_repo = attrs.vcs_repo;
        }
        tracing::info!(id = %id, "updated policy set attributes");
        actions.push(Action::UpdatedPolicySet);
    }

    // Step 5: policy membership, add before remove.
    if let Some(desired_policies) = desired.policy_ids() {
        let d = diff_sets(&rec.policy_ids, desired_policies);
        if !d.to_add.is_empty() {
            step(ctx, id.as_str(), Operation::AddPolicies)?;
            api.add_policies(ctx, &id, &d.to_add)
                .map_err(|e| mutation_err(&id, Operation::AddPolicies, e))?;
            rec.policy_ids.extend(d.to_add.iter().cloned());
            tracing::info!(id = %id, count = d.to_add.len(), "added policies");
            actions.push(Action::AddedPolicies { policies: d.to_add });
        }
        if !d.to_remove.is_empty() {
            step(ctx, id.as_str(), Operation::RemovePolicies)?;
            api.remove_policies(ctx, &id, &d.to_remove)
                .map_err(|e| mutation_err(&id, Operation::RemovePolicies, e))?;
            rec.policy_ids.retain(|p| !d.to_remove.contains(p));
            tracing::info!(id = %id, count = d.to_remove.len(), "removed policies");
            actions.push(Action::RemovedPolicies {
                policies: d.to_remove,
            });
        }
    }

    // Step 6: workspace membership, add before remove.
    if !desired.global {
        let d = diff_sets(&rec.workspace_ids, &desired.workspace_ids);
        if !d.to_add.is_empty() {
            step(ctx, id.as_str(), Operation::AddWorkspaces)?;
            api.add_workspaces(ctx, &id, &d.to_add)
                .map_err(|e| mutation_err(&id, Operation::AddWorkspaces, e))?;
            rec.workspace_ids.extend(d.to_add.iter().cloned());
            tracing::info!(id = %id, count = d.to_add.len(), "attached workspaces");
            actions.push(Action::AttachedWorkspaces {
                workspaces: d.to_add,
            });
        }
        if !d.to_remove.is_empty() {
            step(ctx, id.as_str(), Operation::RemoveWorkspaces)?;
            api.remove_workspaces(ctx, &id, &d.to_remove)
                .map_err(|e| mutation_err(&id, Operation::RemoveWorkspaces, e))?;
            rec.workspace_ids.retain(|w| !d.to_remove.contains(w));
            tracing::info!(id = %id, count = d.to_remove.len(), "detached workspaces");
            actions.push(Action::DetachedWorkspaces {
                workspaces: d.to_remove,
            });
        }
    }

    Ok(())
}
