//! `govern apply`: converge the remote onto the manifest.

use anyhow::Result;
use clap::Args;

use govern_reconcile::pipeline;

use super::config::{ManifestArg, RemoteArgs, StateArg};
use super::report;

/// Arguments for `govern apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub manifest: ManifestArg,

    #[command(flatten)]
    pub state: StateArg,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

impl ApplyArgs {
    pub fn run(self) -> Result<()> {
        let manifest = self.manifest.load()?;
        let (path, mut state) = self.state.load()?;
        let remote = self.remote.connect()?;
        let ctx = self.remote.context();

        let result = pipeline::apply(&remote, &ctx, &manifest, &mut state);
        report::finish("apply", result, &path, &mut state)
    }
}
