//! `govern plan`: compare the manifest with recorded state.

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;

use govern_reconcile::{pipeline, ChangeKind, PlannedChange};

use super::config::{ManifestArg, StateArg};

/// Arguments for `govern plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub manifest: ManifestArg,

    #[command(flatten)]
    pub state: StateArg,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let manifest = self.manifest.load()?;
        let (_, state) = self.state.load()?;
        let changes = pipeline::plan(&manifest, &state).context("failed to plan")?;
        print_plan(&changes);
        Ok(())
    }
}

fn print_plan(changes: &[PlannedChange]) {
    if changes.is_empty() {
        println!("Nothing declared and nothing recorded.");
        return;
    }

    for change in changes {
        let marker = match change.kind {
            ChangeKind::Create => "+".green(),
            ChangeKind::Update => "~".yellow(),
            ChangeKind::Replace => "±".magenta(),
            ChangeKind::Delete => "-".red(),
            ChangeKind::NoOp => "·".bright_black(),
        };
        println!("  {marker}  {}: {}", change.address, change.kind);
        for reason in &change.reasons {
            println!("       {reason}");
        }
    }

    let count = |kind: ChangeKind| changes.iter().filter(|c| c.kind == kind).count();
    println!(
        "Plan: {} to create, {} to update, {} to replace, {} to delete.",
        count(ChangeKind::Create),
        count(ChangeKind::Update),
        count(ChangeKind::Replace),
        count(ChangeKind::Delete),
    );
}
