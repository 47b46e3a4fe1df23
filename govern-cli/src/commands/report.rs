//! Printing run reports and persisting state after a run.

use std::path::Path;

use anyhow::{Context as _, Result};
use colored::Colorize;

use govern_core::{state, StateFile};
use govern_reconcile::{Action, PipelineError, ResourceReport};

/// Save `state`, print what the run did, then surface its failure if any.
///
/// State is written before the error is reported so progress made by a
/// failed run is not lost.
pub fn finish(
    verb: &str,
    result: Result<Vec<ResourceReport>, PipelineError>,
    path: &Path,
    state: &mut StateFile,
) -> Result<()> {
    state::save_at(path, state)
        .with_context(|| format!("failed to save state {}", path.display()))?;

    match result {
        Ok(reports) => {
            print_reports(&reports);
            let changed = reports.iter().filter(|r| !r.actions.is_empty()).count();
            println!("{} {verb}: {changed} resource(s) changed.", "✓".green());
            Ok(())
        }
        Err(PipelineError {
            address,
            completed,
            source,
        }) => {
            print_reports(&completed);
            println!("{} {address}", "✗".red());
            Err(anyhow::Error::new(source).context(format!("{verb} stopped at {address}")))
        }
    }
}

pub fn print_reports(reports: &[ResourceReport]) {
    for report in reports {
        if report.actions.is_empty() && report.drift.as_ref().map_or(true, |d| d.is_empty()) {
            println!("  ·  {}", report.address.to_string().bright_black());
            continue;
        }
        println!("  ✎  {}", report.address.to_string().bold());
        for action in &report.actions {
            println!("       {}", describe(action));
        }
        if let Some(drift) = report.drift.as_ref() {
            for name in &drift.to_add {
                println!("       {} consumer {name} (added outside govern)", "+".yellow());
            }
            for name in &drift.to_remove {
                println!("       {} consumer {name} (removed outside govern)", "-".yellow());
            }
        }
    }
}

fn describe(action: &Action) -> String {
    match action {
        Action::CreatedPolicySet { .. } | Action::ImportedPolicySet { .. } => action.to_string().green().to_string(),
        Action::DeletedPolicySet { .. } | Action::DisabledSharing => {
            action.to_string().red().to_string()
        }
        Action::Forgotten => action.to_string().yellow().to_string(),
        _ => action.to_string(),
    }
}
