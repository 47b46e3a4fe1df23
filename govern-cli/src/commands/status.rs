//! `govern status`: what the state file says is deployed.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use govern_core::{PolicySetRecord, ResourceAddress, StateFile};

use super::config::StateArg;

/// Arguments for `govern status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub state: StateArg,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let (_, state) = self.state.load()?;
        let rows = build_rows(&state);
        if self.json {
            print_json(&state, rows)?;
            return Ok(());
        }
        print_table(&state, rows);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ResourceStatus {
    address: String,
    kind: &'static str,
    id: Option<String>,
    organization: String,
    detail: String,
    observed_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct StatusJson {
    summary: SummaryJson,
    resources: Vec<ResourceStatus>,
}

#[derive(Serialize)]
struct SummaryJson {
    policy_sets: usize,
    module_sharing: usize,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "resource")]
    address: String,
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "organization")]
    organization: String,
    #[tabled(rename = "detail")]
    detail: String,
    #[tabled(rename = "observed")]
    observed: String,
}

fn build_rows(state: &StateFile) -> Vec<ResourceStatus> {
    let policy_sets = state.policy_sets.iter().map(|(key, rec)| ResourceStatus {
        address: ResourceAddress::PolicySet(key.clone()).to_string(),
        kind: "policy_set",
        id: Some(rec.id.to_string()),
        organization: rec.organization.to_string(),
        detail: policy_set_detail(rec),
        observed_at: rec.observed_at,
    });
    let sharing = state.module_sharing.iter().map(|(key, rec)| ResourceStatus {
        address: ResourceAddress::ModuleSharing(key.clone()).to_string(),
        kind: "module_sharing",
        id: None,
        organization: rec.organization.to_string(),
        detail: if rec.consumers.is_empty() {
            "sharing disabled".to_string()
        } else {
            format!("{} consumer(s)", rec.consumers.len())
        },
        observed_at: rec.observed_at,
    });
    policy_sets.chain(sharing).collect()
}

fn policy_set_detail(rec: &PolicySetRecord) -> String {
    let source = match (&rec.vcs_repo, &rec.slug_fingerprint) {
        (Some(vcs), _) => format!("vcs {}", vcs.identifier),
        (None, Some(fingerprint)) => {
            format!("bundle {}", fingerprint.chars().take(12).collect::<String>())
        }
        (None, None) => format!("{} policies", rec.policy_ids.len()),
    };
    let scope = if rec.global {
        "global".to_string()
    } else {
        format!("{} workspace(s)", rec.workspace_ids.len())
    };
    format!("{source}, {scope}")
}

fn print_json(state: &StateFile, rows: Vec<ResourceStatus>) -> Result<()> {
    let payload = StatusJson {
        summary: SummaryJson {
            policy_sets: state.policy_sets.len(),
            module_sharing: state.module_sharing.len(),
            updated_at: (!state.is_empty()).then_some(state.updated_at),
        },
        resources: rows,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(state: &StateFile, rows: Vec<ResourceStatus>) {
    println!(
        "govern v{} | {} policy sets | {} module sharing",
        env!("CARGO_PKG_VERSION"),
        state.policy_sets.len(),
        state.module_sharing.len(),
    );

    if rows.is_empty() {
        println!("No resources recorded.");
        return;
    }

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            address: row.address,
            id: row.id.unwrap_or_else(|| "-".to_string()),
            organization: row.organization,
            detail: row.detail,
            observed: format_age(row.observed_at),
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("{}", "Run 'govern refresh' to re-read the remote.".bright_black());
}

fn format_age(at: DateTime<Utc>) -> String {
    let secs = (Utc::now() - at).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
