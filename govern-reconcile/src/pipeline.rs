//! Manifest-level orchestration: plan, apply, refresh, destroy and import.
//!
//! Resources are processed in address order. Each resource's record is
//! lifted out of the [`StateFile`], handed to its reconciler, and put back
//! (or dropped) afterwards, so the state always holds the progress made so
//! far even when a run stops early.

use std::collections::BTreeMap;
use std::fmt;

use govern_core::{
    Manifest, ModuleSharingRecord, ModuleSharingSpec, PolicySetId, PolicySetRecord,
    PolicySetSpec, ResourceAddress, StateFile,
};

use crate::action::Action;
use crate::context::Context;
use crate::diff::{diff_sets, SetDiff};
use crate::error::{remote_err, Operation, PipelineError, ReconcileError, RemoteError};
use crate::reader::{read_policy_set, refresh_policy_set, to_record};
use crate::remote::RemoteApi;
use crate::{module_sharing, policy_set, version};

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Replace,
    Delete,
    NoOp,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Replace => "replace",
            ChangeKind::Delete => "delete",
            ChangeKind::NoOp => "no changes",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub address: ResourceAddress,
    pub kind: ChangeKind,
    pub reasons: Vec<String>,
}

impl PlannedChange {
    fn new(address: ResourceAddress, kind: ChangeKind, reasons: Vec<String>) -> Self {
        Self {
            address,
            kind,
            reasons,
        }
    }
}

/// Compare the manifest against the recorded state without touching the
/// remote. Only slug bundles are read, to detect content changes.
pub fn plan(manifest: &Manifest, state: &StateFile) -> Result<Vec<PlannedChange>, ReconcileError> {
    let mut changes = Vec::new();

    for (key, spec) in &manifest.policy_sets {
        let address = ResourceAddress::PolicySet(key.clone());
        let change = match state.policy_sets.get(key) {
            None => PlannedChange::new(address, ChangeKind::Create, Vec::new()),
            Some(rec) => plan_policy_set(address, spec, rec)?,
        };
        changes.push(change);
    }
    for (key, spec) in &manifest.module_sharing {
        let address = ResourceAddress::ModuleSharing(key.clone());
        let change = match state.module_sharing.get(key) {
            None => PlannedChange::new(
                address,
                ChangeKind::Create,
                vec![format!("share with {} consumer(s)", spec.consumers.len())],
            ),
            Some(rec) => plan_module_sharing(address, spec, rec),
        };
        changes.push(change);
    }

    let orphans = orphaned(manifest, state).into_iter().map(|address| {
        PlannedChange::new(address, ChangeKind::Delete, vec!["no longer declared".to_string()])
    });
    changes.extend(orphans);
    Ok(changes)
}

fn plan_policy_set(
    address: ResourceAddress,
    spec: &PolicySetSpec,
    rec: &PolicySetRecord,
) -> Result<PlannedChange, ReconcileError> {
    let reasons = policy_set::replacement_reasons(spec, rec);
    if !reasons.is_empty() {
        return Ok(PlannedChange::new(address, ChangeKind::Replace, reasons));
    }

    let mut reasons = policy_set::pending_changes(spec, rec);
    if let Some(slug) = spec.slug() {
        if rec.slug_fingerprint.as_deref() != Some(version::fingerprint(slug)?.as_str()) {
            reasons.insert(0, "upload new policy set version".to_string());
        }
    }
    let kind = if reasons.is_empty() {
        ChangeKind::NoOp
    } else {
        ChangeKind::Update
    };
    Ok(PlannedChange::new(address, kind, reasons))
}

fn plan_module_sharing(
    address: ResourceAddress,
    spec: &ModuleSharingSpec,
    rec: &ModuleSharingRecord,
) -> PlannedChange {
    if spec.organization != rec.organization {
        return PlannedChange::new(
            address,
            ChangeKind::Replace,
            vec![format!(
                "organization changes from {} to {}",
                rec.organization, spec.organization
            )],
        );
    }
    let d = diff_sets(&rec.consumers, &spec.consumers);
    let mut reasons = Vec::new();
    if !d.to_add.is_empty() {
        reasons.push(format!("add {} consumer(s)", d.to_add.len()));
    }
    if !d.to_remove.is_empty() {
        reasons.push(format!("remove {} consumer(s)", d.to_remove.len()));
    }
    let kind = if reasons.is_empty() {
        ChangeKind::NoOp
    } else {
        ChangeKind::Update
    };
    PlannedChange::new(address, kind, reasons)
}

fn orphaned(manifest: &Manifest, state: &StateFile) -> Vec<ResourceAddress> {
    let policy_sets = state
        .policy_sets
        .keys()
        .filter(|k| !manifest.policy_sets.contains_key(*k))
        .map(|k| ResourceAddress::PolicySet(k.clone()));
    let sharing = state
        .module_sharing
        .keys()
        .filter(|k| !manifest.module_sharing.contains_key(*k))
        .map(|k| ResourceAddress::ModuleSharing(k.clone()));
    policy_sets.chain(sharing).collect()
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// What a run did to one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReport {
    pub address: ResourceAddress,
    pub actions: Vec<Action>,
    /// Consumers that changed outside this tool (refresh only).
    pub drift: Option<SetDiff<String>>,
}

/// Converge the remote onto the manifest.
///
/// Resources recorded in `state` but no longer declared are deleted first,
/// so a renamed declaration can reuse the name it held before.
pub fn apply<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    manifest: &Manifest,
    state: &mut StateFile,
) -> Result<Vec<ResourceReport>, PipelineError> {
    let mut reports = Vec::new();

    for address in orphaned(manifest, state) {
        let result = match &address {
            ResourceAddress::PolicySet(key) => with_record(&mut state.policy_sets, key, |rec| {
                policy_set::delete(api, ctx, rec)
            }),
            ResourceAddress::ModuleSharing(key) => {
                with_record(&mut state.module_sharing, key, |rec| {
                    module_sharing::delete(api, ctx, rec)
                })
            }
        };
        record(&mut reports, address, result)?;
    }

    for (key, spec) in &manifest.policy_sets {
        let result = with_record(&mut state.policy_sets, key, |rec| {
            apply_policy_set(api, ctx, spec, rec)
        });
        record(&mut reports, ResourceAddress::PolicySet(key.clone()), result)?;
    }

    for (key, spec) in &manifest.module_sharing {
        let result = with_record(&mut state.module_sharing, key, |rec| {
            apply_module_sharing(api, ctx, spec, rec)
        });
        record(&mut reports, ResourceAddress::ModuleSharing(key.clone()), result)?;
    }

    Ok(reports)
}

fn apply_policy_set<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    spec: &PolicySetSpec,
    rec: &mut Option<PolicySetRecord>,
) -> Result<Vec<Action>, ReconcileError> {
    let mut actions = Vec::new();
    if rec.is_some() && !refresh_policy_set(api, ctx, rec, spec.vcs_repo())? {
        actions.push(Action::Forgotten);
    }
    if let Some(current) = rec.as_ref() {
        let reasons = policy_set::replacement_reasons(spec, current);
        if !reasons.is_empty() {
            tracing::info!(id = %current.id, reasons = %reasons.join("; "), "replacing policy set");
            actions.extend(policy_set::delete(api, ctx, rec)?);
        }
    }
    actions.extend(policy_set::reconcile(api, ctx, spec, rec)?);
    Ok(actions)
}

fn apply_module_sharing<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    spec: &ModuleSharingSpec,
    rec: &mut Option<ModuleSharingRecord>,
) -> Result<Vec<Action>, ReconcileError> {
    let mut actions = Vec::new();
    if rec
        .as_ref()
        .is_some_and(|r| r.organization != spec.organization)
    {
        // The old producer stops sharing before the new one starts.
        actions.extend(module_sharing::delete(api, ctx, rec)?);
    }
    if rec.is_some() && module_sharing::refresh(api, ctx, rec)?.is_none() {
        actions.push(Action::Forgotten);
    }
    let up_to_date = rec.as_ref().is_some_and(|r| r.consumers == spec.consumers);
    if !up_to_date {
        actions.extend(module_sharing::reconcile(api, ctx, spec, rec)?);
    }
    Ok(actions)
}

/// Re-read every recorded resource. Vanished objects are dropped from
/// `state`; module sharing also reports consumer drift.
pub fn refresh<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    state: &mut StateFile,
) -> Result<Vec<ResourceReport>, PipelineError> {
    let mut reports = Vec::new();

    let keys: Vec<String> = state.policy_sets.keys().cloned().collect();
    for key in keys {
        let address = ResourceAddress::PolicySet(key.clone());
        let result = with_record(&mut state.policy_sets, &key, |rec| {
            let present = refresh_policy_set(api, ctx, rec, None)?;
            Ok(if present { Vec::new() } else { vec![Action::Forgotten] })
        });
        record(&mut reports, address, result)?;
    }

    let keys: Vec<String> = state.module_sharing.keys().cloned().collect();
    for key in keys {
        let address = ResourceAddress::ModuleSharing(key.clone());
        let result = with_record(&mut state.module_sharing, &key, |rec| {
            module_sharing::refresh(api, ctx, rec)
        });
        match result {
            Ok(Some(drift)) => reports.push(ResourceReport {
                address,
                actions: Vec::new(),
                drift: Some(drift),
            }),
            Ok(None) => reports.push(ResourceReport {
                address,
                actions: vec![Action::Forgotten],
                drift: None,
            }),
            Err(source) => {
                return Err(PipelineError {
                    address,
                    completed: reports,
                    source,
                })
            }
        }
    }

    Ok(reports)
}

/// Delete every recorded resource.
pub fn destroy<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    state: &mut StateFile,
) -> Result<Vec<ResourceReport>, PipelineError> {
    let mut reports = Vec::new();

    let keys: Vec<String> = state.policy_sets.keys().cloned().collect();
    for key in keys {
        let result = with_record(&mut state.policy_sets, &key, |rec| {
            policy_set::delete(api, ctx, rec)
        });
        record(&mut reports, ResourceAddress::PolicySet(key), result)?;
    }

    let keys: Vec<String> = state.module_sharing.keys().cloned().collect();
    for key in keys {
        let result = with_record(&mut state.module_sharing, &key, |rec| {
            module_sharing::delete(api, ctx, rec)
        });
        record(&mut reports, ResourceAddress::ModuleSharing(key), result)?;
    }

    Ok(reports)
}

/// Adopt an existing remote policy set into `state` under `key`.
///
/// Nothing on the remote changes. The set must exist, and neither `key` nor
/// `id` may already be recorded. When `manifest` declares `key`, its VCS
/// binding decides whether the branch is kept, so the next plan compares
/// like with like. No bundle fingerprint is known, so a declared slug is
/// uploaded on the next apply.
pub fn import<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    manifest: &Manifest,
    key: &str,
    id: &PolicySetId,
    state: &mut StateFile,
) -> Result<ResourceReport, PipelineError> {
    let address = ResourceAddress::PolicySet(key.to_string());
    let fail = |source: ReconcileError| PipelineError {
        address: ResourceAddress::PolicySet(key.to_string()),
        completed: Vec::new(),
        source,
    };

    let held = state
        .policy_sets
        .iter()
        .find(|(k, rec)| k.as_str() == key || rec.id == *id);
    if let Some((held_key, rec)) = held {
        return Err(fail(ReconcileError::AlreadyRecorded {
            address: ResourceAddress::PolicySet(held_key.clone()),
            id: rec.id.to_string(),
        }));
    }

    let spec = manifest.policy_sets.get(key);
    if spec.is_none() {
        tracing::warn!(address = %address, "importing an undeclared policy set; the next apply deletes it");
    }

    let remote = read_policy_set(api, ctx, id)
        .map_err(fail)?
        .ok_or_else(|| fail(remote_err(id, Operation::ReadPolicySet, RemoteError::NotFound)))?;
    let organization = remote
        .organization
        .clone()
        .or_else(|| spec.map(|s| s.organization.clone()))
        .ok_or_else(|| fail(ReconcileError::UnknownOrganization { id: id.to_string() }))?;

    let rec = to_record(remote, spec.and_then(|s| s.vcs_repo()), &organization, None);
    tracing::info!(address = %address, id = %rec.id, "imported policy set");
    state.policy_sets.insert(key.to_string(), rec);
    Ok(ResourceReport {
        address,
        actions: vec![Action::ImportedPolicySet { id: id.clone() }],
        drift: None,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Run `f` on the record stored under `key`, writing back whatever it left
/// behind (including after an error).
fn with_record<R, T>(
    records: &mut BTreeMap<String, R>,
    key: &str,
    f: impl FnOnce(&mut Option<R>) -> T,
) -> T {
    let mut rec = records.remove(key);
    let out = f(&mut rec);
    if let Some(rec) = rec {
        records.insert(key.to_string(), rec);
    }
    out
}

fn record(
    reports: &mut Vec<ResourceReport>,
    address: ResourceAddress,
    result: Result<Vec<Action>, ReconcileError>,
) -> Result<(), PipelineError> {
    match result {
        Ok(actions) => {
            if actions.is_empty() {
                tracing::debug!(address = %address, "no changes");
            } else {
                tracing::info!(address = %address, actions = actions.len(), "resource converged");
            }
            reports.push(ResourceReport {
                address,
                actions,
                drift: None,
            });
            Ok(())
        }
        Err(source) => {
            tracing::warn!(address = %address, error = %source, "resource failed");
            Err(PipelineError {
                address,
                completed: std::mem::take(reports),
                source,
            })
        }
    }
}
