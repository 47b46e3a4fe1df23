//! Organization module sharing reconciler.
//!
//! The consumer list is always written whole: every reconcile replaces the
//! producer's consumers with exactly the declared set, which also evicts
//! consumers added outside of this tool.

use std::collections::BTreeSet;

use chrono::Utc;

use govern_core::{ModuleSharingRecord, ModuleSharingSpec, OrganizationName};

use crate::action::Action;
use crate::context::Context;
use crate::diff::{diff_sets, SetDiff};
use crate::error::{mutation_err, remote_err, Operation, ReconcileError, RemoteError};
use crate::reader::read_module_consumers;
use crate::remote::RemoteApi;

/// Replace the producer's consumers with the declared list, then read the
/// result back into `record`.
///
/// A producer that vanishes between the write and the read-back clears the
/// record.
pub fn reconcile<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    desired: &ModuleSharingSpec,
    record: &mut Option<ModuleSharingRecord>,
) -> Result<Vec<Action>, ReconcileError> {
    // Keep the spelling already on record when only the case differs.
    let producer = match record.as_ref() {
        Some(rec) if rec.organization == desired.organization => rec.organization.clone(),
        _ => desired.organization.clone(),
    };

    ctx.check()
        .map_err(|e| remote_err(&producer, Operation::UpdateModuleConsumers, e))?;
    let consumers: Vec<String> = desired.consumers.iter().cloned().collect();
    tracing::debug!(organization = %producer, count = consumers.len(), "replacing module consumers");
    api.update_module_consumers(ctx, &producer, &consumers)
        .map_err(|e| mutation_err(&producer, Operation::UpdateModuleConsumers, e))?;
    tracing::info!(organization = %producer, count = consumers.len(), "replaced module consumers");

    *record = Some(ModuleSharingRecord {
        organization: producer.clone(),
        consumers: desired.consumers.clone(),
        observed_at: Utc::now(),
    });
    let actions = vec![Action::ReplacedConsumers {
        consumers: desired.consumers.clone(),
    }];

    ctx.check()
        .map_err(|e| remote_err(&producer, Operation::ListModuleConsumers, e))?;
    refresh(api, ctx, record)?;
    Ok(actions)
}

/// Re-read the producer's consumers into `record`.
///
/// Returns the drift between what was on record and what the remote
/// reports (`to_add` are consumers the remote gained). A vanished producer
/// clears the record and returns `None`.
pub fn refresh<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    record: &mut Option<ModuleSharingRecord>,
) -> Result<Option<SetDiff<String>>, ReconcileError> {
    let Some(rec) = record.as_mut() else {
        return Ok(None);
    };
    match read_module_consumers(api, ctx, &rec.organization)? {
        Some(listed) => {
            let remote: BTreeSet<String> = listed.into_iter().collect();
            let drift = diff_sets(&rec.consumers, &remote);
            if !drift.is_empty() {
                tracing::warn!(
                    organization = %rec.organization,
                    added = drift.to_add.len(),
                    removed = drift.to_remove.len(),
                    "module consumers drifted"
                );
            }
            rec.consumers = remote;
            rec.observed_at = Utc::now();
            Ok(Some(drift))
        }
        None => {
            *record = None;
            Ok(None)
        }
    }
}

/// Disable sharing by clearing the consumer list. A producer that no longer
/// exists is treated as already disabled.
pub fn delete<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    record: &mut Option<ModuleSharingRecord>,
) -> Result<Vec<Action>, ReconcileError> {
    let Some(rec) = record.as_ref() else {
        return Ok(Vec::new());
    };
    let action = disable(api, ctx, &rec.organization)?;
    *record = None;
    Ok(vec![action])
}

fn disable<A: RemoteApi + ?Sized>(
    api: &A,
    ctx: &Context,
    producer: &OrganizationName,
) -> Result<Action, ReconcileError> {
    ctx.check()
        .map_err(|e| remote_err(producer, Operation::UpdateModuleConsumers, e))?;
    match api.update_module_consumers(ctx, producer, &[]) {
        Ok(()) => {
            tracing::info!(organization = %producer, "disabled module sharing");
            Ok(Action::DisabledSharing)
        }
        Err(RemoteError::NotFound) => {
            tracing::info!(organization = %producer, "organization already gone");
            Ok(Action::Forgotten)
        }
        Err(e) => Err(remote_err(producer, Operation::UpdateModuleConsumers, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{InMemoryRemote, RemoteCall};

    fn spec(org: &str, consumers: &[&str]) -> ModuleSharingSpec {
        ModuleSharingSpec {
            organization: OrganizationName::from(org),
            consumers: consumers.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn consumers_are_sent_sorted_and_whole() {
        let remote = InMemoryRemote::new().with_organization("acme");
        let mut record = None;
        reconcile(&remote, &Context::background(), &spec("acme", &["z", "a"]), &mut record)
            .expect("reconcile");

        assert_eq!(
            remote.mutations(),
            vec![RemoteCall::UpdateModuleConsumers {
                producer: "acme".into(),
                consumers: vec!["a".into(), "z".into()],
            }]
        );
        assert_eq!(record.unwrap().consumers.len(), 2);
    }

    #[test]
    fn case_only_rename_keeps_recorded_spelling() {
        let remote = InMemoryRemote::new().with_organization("acme");
        let ctx = Context::background();
        let mut record = None;
        reconcile(&remote, &ctx, &spec("acme", &["a"]), &mut record).expect("first");
        remote.clear_calls();

        reconcile(&remote, &ctx, &spec("ACME", &["a"]), &mut record).expect("second");
        assert_eq!(record.unwrap().organization.as_str(), "acme");
        match &remote.mutations()[0] {
            RemoteCall::UpdateModuleConsumers { producer, .. } => assert_eq!(producer, "acme"),
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn update_on_missing_producer_is_gone() {
        let remote = InMemoryRemote::new();
        let mut record = None;
        let err = reconcile(&remote, &Context::background(), &spec("ghost", &["a"]), &mut record)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Gone { .. }), "{err}");
        assert!(record.is_none());
    }

    #[test]
    fn refresh_reports_out_of_band_consumers() {
        let remote = InMemoryRemote::new().with_organization("acme");
        let ctx = Context::background();
        let mut record = None;
        reconcile(&remote, &ctx, &spec("acme", &["a"]), &mut record).expect("reconcile");
        remote.set_consumers("acme", &["a", "intruder"]);

        let drift = refresh(&remote, &ctx, &mut record).expect("refresh").expect("present");
        assert_eq!(drift.to_add, ["intruder".to_string()].into_iter().collect());
        assert!(drift.to_remove.is_empty());
        assert!(record.unwrap().consumers.contains("intruder"));
    }

    #[test]
    fn delete_sends_empty_list_and_tolerates_missing_producer() {
        let remote = InMemoryRemote::new().with_organization("acme");
        let ctx = Context::background();
        let mut record = None;
        reconcile(&remote, &ctx, &spec("acme", &["a"]), &mut record).expect("reconcile");

        let actions = delete(&remote, &ctx, &mut record).expect("delete");
        assert_eq!(actions, vec![Action::DisabledSharing]);
        assert_eq!(remote.consumers("acme"), Some(vec![]));
        assert!(record.is_none());

        let mut stale = Some(ModuleSharingRecord {
            organization: OrganizationName::from("ghost"),
            consumers: BTreeSet::new(),
            observed_at: Utc::now(),
        });
        let actions = delete(&remote, &ctx, &mut stale).expect("delete missing");
        assert_eq!(actions, vec![Action::Forgotten]);
        assert!(stale.is_none());
    }
}
