//! `govern refresh`: re-read recorded resources.

use anyhow::Result;
use clap::Args;

use govern_reconcile::pipeline;

use super::config::{RemoteArgs, StateArg};
use super::report;

/// Arguments for `govern refresh`.
#[derive(Args, Debug)]
pub struct RefreshArgs {
    #[command(flatten)]
    pub state: StateArg,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

impl RefreshArgs {
    pub fn run(self) -> Result<()> {
        let (path, mut state) = self.state.load()?;
        if state.is_empty() {
            println!("No resources recorded.");
            return Ok(());
        }
        let remote = self.remote.connect()?;
        let ctx = self.remote.context();

        let result = pipeline::refresh(&remote, &ctx, &mut state);
        report::finish("refresh", result, &path, &mut state)
    }
}
