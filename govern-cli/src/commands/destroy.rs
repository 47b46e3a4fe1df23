//! `govern destroy`: delete every recorded resource.

use anyhow::Result;
use clap::Args;

use govern_reconcile::pipeline;

use super::config::{RemoteArgs, StateArg};
use super::report;

/// Arguments for `govern destroy`.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub state: StateArg,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

impl DestroyArgs {
    pub fn run(self) -> Result<()> {
        let (path, mut state) = self.state.load()?;
        if state.is_empty() {
            println!("No resources recorded.");
            return Ok(());
        }
        let remote = self.remote.connect()?;
        let ctx = self.remote.context();

        let result = pipeline::destroy(&remote, &ctx, &mut state);
        report::finish("destroy", result, &path, &mut state)
    }
}
