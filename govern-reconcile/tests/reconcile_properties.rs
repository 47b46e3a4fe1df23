use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use govern_core::{
    ModuleSharingSpec, OrganizationName, PolicyId, PolicySetSpec, PolicySource, SlugSource,
    WorkspaceId,
};
use govern_reconcile::mock::{CallKind, InMemoryRemote, RemoteCall};
use govern_reconcile::{
    collect_pages, diff_sets, module_sharing, policy_set, reader, Action, Context, Page,
    ReconcileError, RemoteError,
};
use rstest::rstest;
use tempfile::TempDir;

fn workspaces(ids: &[&str]) -> BTreeSet<WorkspaceId> {
    ids.iter().map(|id| WorkspaceId::from(*id)).collect()
}

fn policies(ids: &[&str]) -> BTreeSet<PolicyId> {
    ids.iter().map(|id| PolicyId::from(*id)).collect()
}

fn base_spec() -> PolicySetSpec {
    PolicySetSpec {
        name: "baseline".into(),
        description: Some("org guardrails".into()),
        organization: OrganizationName::from("acme"),
        global: false,
        policies_path: None,
        source: PolicySource::Policies(policies(&["pol-1", "pol-2"])),
        workspace_ids: workspaces(&["ws-1", "ws-2"]),
    }
}

fn sharing(org: &str, consumers: &[&str]) -> ModuleSharingSpec {
    ModuleSharingSpec {
        organization: OrganizationName::from(org),
        consumers: consumers.iter().map(|c| c.to_string()).collect(),
    }
}

fn kinds(calls: &[RemoteCall]) -> Vec<CallKind> {
    calls.iter().map(RemoteCall::kind).collect()
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[test]
fn second_policy_set_reconcile_issues_no_mutations() {
    let remote = InMemoryRemote::new().with_organization("acme");
    let ctx = Context::background();
    let mut record = None;

    policy_set::reconcile(&remote, &ctx, &base_spec(), &mut record).expect("first");
    remote.clear_calls();
    let actions = policy_set::reconcile(&remote, &ctx, &base_spec(), &mut record).expect("second");

    assert!(actions.is_empty(), "unexpected actions: {actions:?}");
    assert!(remote.mutations().is_empty(), "{:?}", remote.mutations());
}

#[test]
fn unchanged_bundle_is_not_uploaded_again() {
    let dir = TempDir::new().expect("tempdir");
    let bundle = dir.path().join("policies.tar.gz");
    std::fs::write(&bundle, b"bundle-v1").expect("write bundle");

    let mut spec = base_spec();
    spec.source = PolicySource::Slug(SlugSource {
        source_path: bundle.clone(),
    });

    let remote = InMemoryRemote::new().with_organization("acme");
    let ctx = Context::background();
    let mut record = None;
    policy_set::reconcile(&remote, &ctx, &spec, &mut record).expect("first");
    let id = record.as_ref().expect("record").id.clone();
    assert_eq!(remote.uploaded_bundles(&id), vec![b"bundle-v1".to_vec()]);

    remote.clear_calls();
    policy_set::reconcile(&remote, &ctx, &spec, &mut record).expect("second");
    assert!(remote.mutations().is_empty());

    std::fs::write(&bundle, b"bundle-v2").expect("rewrite bundle");
    let actions = policy_set::reconcile(&remote, &ctx, &spec, &mut record).expect("third");
    assert!(matches!(actions[0], Action::UploadedVersion { .. }), "{actions:?}");
    assert_eq!(remote.uploaded_bundles(&id).len(), 2);
}

#[test]
fn failed_upload_is_retried_on_next_reconcile() {
    let dir = TempDir::new().expect("tempdir");
    let bundle = dir.path().join("policies.tar.gz");
    std::fs::write(&bundle, b"bundle").expect("write bundle");
    let mut spec = base_spec();
    spec.source = PolicySource::Slug(SlugSource {
        source_path: bundle,
    });

    let remote = InMemoryRemote::new().with_organization("acme");
    let ctx = Context::background();
    remote.fail_next(
        CallKind::UploadPolicySetVersion,
        RemoteError::Transport("connection reset".into()),
    );
    let mut record = None;
    policy_set::reconcile(&remote, &ctx, &spec, &mut record).unwrap_err();
    let rec = record.as_ref().expect("identity kept");
    assert!(rec.slug_fingerprint.is_none());

    policy_set::reconcile(&remote, &ctx, &spec, &mut record).expect("retry");
    let id = record.as_ref().expect("record").id.clone();
    assert_eq!(remote.version_count(&id), 2);
    assert_eq!(remote.uploaded_bundles(&id).len(), 1);
}

// ---------------------------------------------------------------------------
// Diff correctness
// ---------------------------------------------------------------------------

#[rstest]
#[case(&[], &[])]
#[case(&["a"], &[])]
#[case(&[], &["a", "b"])]
#[case(&["a", "b", "c"], &["b", "c", "d", "e"])]
#[case(&["x", "y"], &["x", "y"])]
fn applying_the_diff_yields_desired(#[case] current: &[&str], #[case] desired: &[&str]) {
    let current: BTreeSet<String> = current.iter().map(|s| s.to_string()).collect();
    let desired: BTreeSet<String> = desired.iter().map(|s| s.to_string()).collect();
    let d = diff_sets(&current, &desired);

    assert_eq!(d.to_add, desired.difference(&current).cloned().collect());
    assert_eq!(d.to_remove, current.difference(&desired).cloned().collect());
    let applied: BTreeSet<String> = current
        .union(&d.to_add)
        .filter(|m| !d.to_remove.contains(*m))
        .cloned()
        .collect();
    assert_eq!(applied, desired);
}

// ---------------------------------------------------------------------------
// Pagination termination
// ---------------------------------------------------------------------------

#[rstest]
#[case(0, 7)]
#[case(1, 7)]
#[case(7, 7)]
#[case(8, 7)]
#[case(45, 7)]
fn consumer_listing_walks_every_page(#[case] count: usize, #[case] page_size: usize) {
    let remote = InMemoryRemote::new().with_page_size(page_size);
    let names: Vec<String> = (0..count).map(|i| format!("org-{i:03}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    remote.set_consumers("acme", &refs);

    let listed = reader::read_module_consumers(&remote, &Context::background(), &"acme".into())
        .expect("read")
        .expect("producer exists");
    assert_eq!(listed, names);

    let expected_calls = count.div_ceil(page_size).max(1);
    assert_eq!(remote.calls().len(), expected_calls);
}

#[test]
fn walker_stops_on_misreported_total() {
    let mut calls = 0;
    let items = collect_pages(&Context::background(), |_page| {
        calls += 1;
        Ok::<_, RemoteError>(Page {
            items: vec!["only"],
            current_page: 1,
            total_pages: 0,
            next_page: Some(2),
        })
    })
    .expect("collect");
    assert_eq!(items, vec!["only"]);
    assert_eq!(calls, 1);
}

// ---------------------------------------------------------------------------
// Global transition
// ---------------------------------------------------------------------------

#[test]
fn going_global_detaches_prior_workspaces_before_update() {
    let remote = InMemoryRemote::new().with_organization("acme");
    let ctx = Context::background();
    let mut record = None;
    policy_set::reconcile(&remote, &ctx, &base_spec(), &mut record).expect("create");
    remote.clear_calls();

    let mut global = base_spec();
    global.global = true;
    policy_set::reconcile(&remote, &ctx, &global, &mut record).expect("go global");

    let mutations = remote.mutations();
    assert_eq!(
        kinds(&mutations),
        vec![CallKind::RemoveWorkspaces, CallKind::UpdatePolicySet]
    );
    assert_eq!(
        mutations[0],
        RemoteCall::RemoveWorkspaces {
            id: record.as_ref().expect("record").id.clone(),
            workspaces: workspaces(&["ws-1", "ws-2"]),
        }
    );
    let rec = record.expect("record");
    assert!(rec.global);
    assert!(rec.workspace_ids.is_empty());
}

#[test]
fn global_set_ignores_declared_workspaces_on_create() {
    let remote = InMemoryRemote::new().with_organization("acme");
    let mut spec = base_spec();
    spec.global = true;
    spec.workspace_ids.clear();
    let mut record = None;
    policy_set::reconcile(&remote, &Context::background(), &spec, &mut record).expect("create");
    assert_eq!(kinds(&remote.mutations()), vec![CallKind::CreatePolicySet]);
}

// ---------------------------------------------------------------------------
// Not found
// ---------------------------------------------------------------------------

#[test]
fn vanished_policy_set_read_clears_record() {
    let remote = InMemoryRemote::new().with_organization("acme");
    let ctx = Context::background();
    let mut record = None;
    policy_set::reconcile(&remote, &ctx, &base_spec(), &mut record).expect("create");
    remote.remove_policy_set(&record.as_ref().expect("record").id);

    let present = reader::refresh_policy_set(&remote, &ctx, &mut record, None).expect("refresh");
    assert!(!present);
    assert!(record.is_none());

    // With no identity held, the next reconcile creates a fresh object.
    let actions = policy_set::reconcile(&remote, &ctx, &base_spec(), &mut record).expect("recreate");
    assert!(matches!(actions[0], Action::CreatedPolicySet { .. }));
}

#[test]
fn vanished_producer_clears_sharing_record() {
    let remote = InMemoryRemote::new().with_organization("acme");
    let ctx = Context::background();
    let mut record = None;
    module_sharing::reconcile(&remote, &ctx, &sharing("acme", &["x"]), &mut record).expect("share");
    remote.remove_organization("acme");

    let drift = module_sharing::refresh(&remote, &ctx, &mut record).expect("refresh");
    assert!(drift.is_none());
    assert!(record.is_none());
}

// ---------------------------------------------------------------------------
// Module sharing
// ---------------------------------------------------------------------------

#[test]
fn consumer_change_is_one_full_replacement() {
    let remote = InMemoryRemote::new().with_organization("Acme");
    let ctx = Context::background();
    let mut record = None;
    module_sharing::reconcile(&remote, &ctx, &sharing("Acme", &["X", "Y"]), &mut record)
        .expect("first");
    remote.clear_calls();

    module_sharing::reconcile(&remote, &ctx, &sharing("Acme", &["Y", "Z"]), &mut record)
        .expect("second");
    assert_eq!(
        remote.mutations(),
        vec![RemoteCall::UpdateModuleConsumers {
            producer: "Acme".into(),
            consumers: vec!["Y".into(), "Z".into()],
        }]
    );
}

#[test]
fn empty_consumer_list_disables_sharing() {
    let remote = InMemoryRemote::new().with_organization("acme");
    let ctx = Context::background();
    let mut record = None;
    module_sharing::reconcile(&remote, &ctx, &sharing("acme", &["x"]), &mut record).expect("share");
    module_sharing::reconcile(&remote, &ctx, &sharing("acme", &[]), &mut record).expect("clear");

    assert_eq!(remote.consumers("acme"), Some(vec![]));
    assert!(record.expect("record").consumers.is_empty());
}

#[test]
fn producer_identity_folds_case() {
    let remote = InMemoryRemote::new().with_organization("acme");
    let ctx = Context::background();
    let mut record = None;
    module_sharing::reconcile(&remote, &ctx, &sharing("acme", &["x"]), &mut record).expect("share");
    remote.clear_calls();

    module_sharing::reconcile(&remote, &ctx, &sharing("ACME", &["x"]), &mut record)
        .expect("reconcile upper");
    let calls = remote.mutations();
    assert_eq!(calls.len(), 1);
    assert!(matches!(
        &calls[0],
        RemoteCall::UpdateModuleConsumers { producer, .. } if producer == "acme"
    ));

    let mut spec = base_spec();
    let mut ps_record = None;
    policy_set::reconcile(&remote, &ctx, &spec, &mut ps_record).expect("create");
    spec.organization = OrganizationName::from("ACME");
    assert!(policy_set::replacement_reasons(&spec, ps_record.as_ref().expect("record")).is_empty());
}

// ---------------------------------------------------------------------------
// Cancellation and resumption
// ---------------------------------------------------------------------------

#[test]
fn cancelled_context_stops_before_any_call() {
    let remote = InMemoryRemote::new().with_organization("acme");
    let ctx = Context::background();
    ctx.cancel();
    let mut record = None;

    let err = policy_set::reconcile(&remote, &ctx, &base_spec(), &mut record).unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert!(remote.calls().is_empty());
    assert!(record.is_none());
}

#[test]
fn expired_deadline_is_reported() {
    let remote = InMemoryRemote::new().with_organization("acme");
    let ctx = Context::with_deadline(Instant::now() - Duration::from_secs(1));
    let mut record = None;
    let err = module_sharing::reconcile(&remote, &ctx, &sharing("acme", &["x"]), &mut record)
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Remote {
            source: RemoteError::DeadlineExceeded,
            ..
        }
    ));
}

#[test]
fn interrupted_membership_step_resumes_without_repeating_work() {
    let remote = InMemoryRemote::new().with_organization("acme");
    let ctx = Context::background();
    let mut record = None;
    policy_set::reconcile(&remote, &ctx, &base_spec(), &mut record).expect("create");

    let mut next = base_spec();
    next.source = PolicySource::Policies(policies(&["pol-2", "pol-3"]));
    next.workspace_ids = workspaces(&["ws-2", "ws-3"]);
    remote.fail_next(
        CallKind::AddWorkspaces,
        RemoteError::Transport("connection reset".into()),
    );
    remote.clear_calls();
    let err = policy_set::reconcile(&remote, &ctx, &next, &mut record).unwrap_err();
    assert!(err.to_string().contains("attach workspaces"), "{err}");
    assert_eq!(
        record.as_ref().expect("record").policy_ids,
        policies(&["pol-2", "pol-3"])
    );

    remote.clear_calls();
    policy_set::reconcile(&remote, &ctx, &next, &mut record).expect("resume");
    assert_eq!(
        kinds(&remote.mutations()),
        vec![CallKind::AddWorkspaces, CallKind::RemoveWorkspaces]
    );
    assert_eq!(record.expect("record").workspace_ids, workspaces(&["ws-2", "ws-3"]));
}

#[test]
fn rejected_mutation_carries_identity_and_operation() {
    let remote = InMemoryRemote::new().with_organization("acme");
    let ctx = Context::background();
    let mut record = None;
    policy_set::reconcile(&remote, &ctx, &base_spec(), &mut record).expect("create");
    let id = record.as_ref().expect("record").id.clone();
    remote.fail_next(
        CallKind::RemovePolicies,
        RemoteError::Rejected {
            status: 422,
            message: "policy is enforced".into(),
        },
    );

    let mut next = base_spec();
    next.source = PolicySource::Policies(policies(&["pol-1"]));
    let err = policy_set::reconcile(&remote, &ctx, &next, &mut record).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("remove policies"), "{msg}");
    assert!(msg.contains(id.as_str()), "{msg}");
    assert!(msg.contains("policy is enforced"), "{msg}");
}
