//! State file error-message, atomic-write-safety, and roundtrip tests.

use assert_fs::prelude::*;
use chrono::Utc;
use govern_core::{
    state,
    types::{
        ModuleSharingRecord, OrganizationName, PolicyId, PolicySetId, PolicySetRecord, VcsRepo,
        WorkspaceId,
    },
    StateError, StateFile,
};
use predicates::prelude::predicate;
use std::fs;

fn policy_set_record() -> PolicySetRecord {
    PolicySetRecord {
        id: PolicySetId::from("polset-abc123"),
        name: "baseline".to_string(),
        description: Some("Org-wide guardrails".to_string()),
        organization: OrganizationName::from("Acme"),
        global: false,
        policies_path: None,
        vcs_repo: None,
        policy_ids: [PolicyId::from("pol-1"), PolicyId::from("pol-2")].into_iter().collect(),
        workspace_ids: [WorkspaceId::from("ws-1")].into_iter().collect(),
        slug_fingerprint: None,
        observed_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = home.path().join("state.yaml");
    fs::write(&path, b": : corrupt : yaml : !!!\n  - broken: [unclosed").expect("write");

    let err = state::load_at(&path).unwrap_err();
    assert!(matches!(err, StateError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("state.yaml"), "must contain file path, got: {err}");
}

#[test]
fn load_wrong_type_yaml_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = home.path().join("state.yaml");
    fs::write(&path, b"- this is a list, not a mapping\n").expect("write");

    let err = state::load_at(&path).unwrap_err();
    assert!(matches!(err, StateError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn mid_write_crash_leaves_original_intact() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = state::state_path_at(home.path());
    let mut st = StateFile::default();
    st.policy_sets.insert("baseline".into(), policy_set_record());
    state::save_at(&path, &mut st).expect("save");

    let original_bytes = fs::read(&path).expect("read original");

    // Simulate crash: .tmp written but process died before rename
    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    let current_bytes = fs::read(&path).expect("read after crash");
    assert_eq!(original_bytes, current_bytes, "original must be unchanged after crash");
    let loaded = state::load_at(&path).expect("load after crash");
    assert_eq!(loaded.policy_sets.len(), 1);
}

#[test]
fn save_writes_state_under_govern_dir() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut st = StateFile::default();
    state::save_at(&state::state_path_at(home.path()), &mut st).expect("save");
    home.child(".govern/state.yaml").assert(predicate::path::exists());
    home.child(".govern/state.yaml.tmp").assert(predicate::path::missing());
}

// ---------------------------------------------------------------------------
// 3. Roundtrip
// ---------------------------------------------------------------------------

#[test]
fn records_roundtrip_through_disk() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = state::state_path_at(home.path());

    let mut vcs_record = policy_set_record();
    vcs_record.id = PolicySetId::from("polset-vcs");
    vcs_record.policy_ids.clear();
    vcs_record.vcs_repo = Some(VcsRepo {
        identifier: "acme/policies".into(),
        branch: None,
        ingress_submodules: true,
        oauth_token_id: "ot-123".into(),
    });
    vcs_record.policies_path = Some("sentinel/".into());

    let mut st = StateFile::default();
    st.policy_sets.insert("baseline".into(), policy_set_record());
    st.policy_sets.insert("from_vcs".into(), vcs_record.clone());
    st.module_sharing.insert(
        "acme".into(),
        ModuleSharingRecord {
            organization: OrganizationName::from("Acme"),
            consumers: ["acme-dev".to_string(), "acme-prod".to_string()].into_iter().collect(),
            observed_at: Utc::now(),
        },
    );
    state::save_at(&path, &mut st).expect("save");

    let loaded = state::load_at(&path).expect("load");
    assert_eq!(loaded, st);
    assert_eq!(loaded.policy_sets["from_vcs"].vcs_repo, vcs_record.vcs_repo);
    assert_eq!(loaded.module_sharing["acme"].organization.as_str(), "Acme");
}

#[test]
fn default_branch_is_not_written_as_blank() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = home.path().join("state.yaml");
    let mut record = policy_set_record();
    record.vcs_repo = Some(VcsRepo {
        identifier: "acme/policies".into(),
        branch: None,
        ingress_submodules: false,
        oauth_token_id: "ot-123".into(),
    });
    let mut st = StateFile::default();
    st.policy_sets.insert("v".into(), record);
    state::save_at(&path, &mut st).expect("save");

    let yaml = fs::read_to_string(&path).expect("read");
    assert!(!yaml.contains("branch"), "default branch must not be persisted:\n{yaml}");
}
