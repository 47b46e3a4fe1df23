use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use chrono::Utc;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use govern_core::{
    state, ModuleSharingRecord, OrganizationName, PolicyId, PolicySetId, PolicySetRecord,
    StateFile, WorkspaceId,
};

const MANIFEST: &str = "\
policy_sets:
  baseline:
    name: baseline
    organization: acme
    policy_ids: [pol-1, pol-2]
    workspace_ids: [ws-1]
module_sharing:
  acme:
    organization: acme
    module_consumers: [acme-dev]
";

fn govern_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("govern"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1")
        .env_remove("TFE_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

fn write_manifest(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("govern.yaml");
    fs::write(&path, contents).expect("write manifest");
    path
}

fn recorded_state() -> StateFile {
    let mut state = StateFile::default();
    state.policy_sets.insert(
        "baseline".into(),
        PolicySetRecord {
            id: PolicySetId::from("polset-0001"),
            name: "baseline".into(),
            description: None,
            organization: OrganizationName::from("acme"),
            global: false,
            policies_path: None,
            vcs_repo: None,
            policy_ids: [PolicyId::from("pol-1"), PolicyId::from("pol-2")]
                .into_iter()
                .collect(),
            workspace_ids: [WorkspaceId::from("ws-1")].into_iter().collect(),
            slug_fingerprint: None,
            observed_at: Utc::now(),
        },
    );
    state.module_sharing.insert(
        "acme".into(),
        ModuleSharingRecord {
            organization: OrganizationName::from("acme"),
            consumers: BTreeSet::from(["acme-dev".to_string()]),
            observed_at: Utc::now(),
        },
    );
    state
}

#[test]
fn plan_on_fresh_state_creates_everything() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let manifest = write_manifest(&work, MANIFEST);
    let state_path = work.path().join("state.yaml");

    govern_cmd(home.path())
        .arg("plan")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--state")
        .arg(&state_path)
        .assert()
        .success()
        .stdout(contains("policy_set.baseline: create"))
        .stdout(contains("module_sharing.acme: create"))
        .stdout(contains("Plan: 2 to create, 0 to update, 0 to replace, 0 to delete."));

    assert!(!state_path.exists(), "plan must not write state");
}

#[test]
fn plan_against_matching_state_is_a_noop() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let manifest = write_manifest(&work, MANIFEST);
    let state_path = work.path().join("state.yaml");
    state::save_at(&state_path, &mut recorded_state()).expect("save state");

    govern_cmd(home.path())
        .arg("plan")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--state")
        .arg(&state_path)
        .assert()
        .success()
        .stdout(contains("policy_set.baseline: no changes"))
        .stdout(contains("Plan: 0 to create, 0 to update, 0 to replace, 0 to delete."));
}

#[test]
fn plan_reports_updates_replacements_and_deletes() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let manifest = write_manifest(
        &work,
        "\
policy_sets:
  baseline:
    name: baseline
    organization: globex
    policy_ids: [pol-1]
",
    );
    let state_path = work.path().join("state.yaml");
    state::save_at(&state_path, &mut recorded_state()).expect("save state");

    govern_cmd(home.path())
        .arg("plan")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--state")
        .arg(&state_path)
        .assert()
        .success()
        .stdout(contains("policy_set.baseline: replace"))
        .stdout(contains("organization changes from acme to globex"))
        .stdout(contains("module_sharing.acme: delete"));
}

#[test]
fn plan_uses_default_state_under_home() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let manifest = write_manifest(&work, MANIFEST);
    let mut state = recorded_state();
    state::save_at(&state::state_path_at(home.path()), &mut state).expect("save state");

    govern_cmd(home.path())
        .arg("plan")
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(contains("Plan: 0 to create"));
}

#[test]
fn invalid_manifest_is_rejected_with_address() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let manifest = write_manifest(
        &work,
        "policy_sets:\n  bad:\n    name: \"has spaces\"\n    organization: acme\n",
    );

    govern_cmd(home.path())
        .arg("plan")
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(contains("policy_set.bad"))
        .stderr(contains("can only include letters, numbers, -, and _"));
}

#[test]
fn apply_without_token_fails_before_touching_state() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let manifest = write_manifest(&work, MANIFEST);
    let state_path = work.path().join("state.yaml");

    govern_cmd(home.path())
        .arg("apply")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--state")
        .arg(&state_path)
        .assert()
        .failure()
        .stderr(contains("TFE_TOKEN is not set"));

    assert!(!state_path.exists());
}

#[test]
fn status_without_state_reports_nothing_recorded() {
    let home = TempDir::new().expect("home");

    govern_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("No resources recorded."));
}

#[test]
fn status_table_lists_recorded_resources() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let state_path = work.path().join("state.yaml");
    state::save_at(&state_path, &mut recorded_state()).expect("save state");

    govern_cmd(home.path())
        .arg("status")
        .arg("--state")
        .arg(&state_path)
        .assert()
        .success()
        .stdout(contains("1 policy sets | 1 module sharing"))
        .stdout(contains("policy_set.baseline"))
        .stdout(contains("polset-0001"))
        .stdout(contains("2 policies, 1 workspace(s)"))
        .stdout(contains("1 consumer(s)"));
}

#[test]
fn status_json_is_machine_readable() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let state_path = work.path().join("state.yaml");
    state::save_at(&state_path, &mut recorded_state()).expect("save state");

    let output = govern_cmd(home.path())
        .arg("status")
        .arg("--state")
        .arg(&state_path)
        .arg("--json")
        .output()
        .expect("run status");
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(json["summary"]["policy_sets"], 1);
    assert_eq!(json["summary"]["module_sharing"], 1);
    let resources = json["resources"].as_array().expect("resources array");
    assert_eq!(resources.len(), 2);
    assert_eq!(resources[0]["address"], "policy_set.baseline");
    assert_eq!(resources[0]["id"], "polset-0001");
    assert_eq!(resources[1]["kind"], "module_sharing");
    assert!(resources[1]["id"].is_null());
}

#[test]
fn unreadable_state_is_reported() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let state_path = work.path().join("state.yaml");
    fs::write(&state_path, "version: [not, a, number]\n").expect("write state");

    govern_cmd(home.path())
        .arg("status")
        .arg("--state")
        .arg(&state_path)
        .assert()
        .failure()
        .stderr(contains("failed to load state").and(contains("state.yaml")));
}

#[test]
fn import_without_token_fails_before_touching_state() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let state_path = work.path().join("state.yaml");

    govern_cmd(home.path())
        .arg("import")
        .arg("baseline")
        .arg("polset-0001")
        .arg("--manifest")
        .arg(work.path().join("absent.yaml"))
        .arg("--state")
        .arg(&state_path)
        .assert()
        .failure()
        .stderr(contains("TFE_TOKEN is not set"));

    assert!(!state_path.exists());
}

#[test]
fn import_into_recorded_key_is_refused_without_remote_calls() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let manifest = write_manifest(&work, MANIFEST);
    let state_path = work.path().join("state.yaml");
    state::save_at(&state_path, &mut recorded_state()).expect("save state");

    govern_cmd(home.path())
        .env("TFE_TOKEN", "test-token")
        .env("TFE_ADDRESS", "http://127.0.0.1:9")
        .arg("import")
        .arg("baseline")
        .arg("polset-0002")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--state")
        .arg(&state_path)
        .assert()
        .failure()
        .stderr(contains("import stopped at policy_set.baseline"))
        .stderr(contains("already records policy set polset-0001"));

    let state = state::load_at(&state_path).expect("reload state");
    assert_eq!(state.policy_sets["baseline"].id, PolicySetId::from("polset-0001"));
}
