//! `govern import`: adopt an existing remote policy set into state.

use anyhow::Result;
use clap::Args;

use govern_core::{Manifest, PolicySetId};
use govern_reconcile::pipeline;

use super::config::{ManifestArg, RemoteArgs, StateArg};
use super::report;

/// Arguments for `govern import`.
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Local key to record the policy set under (as in `policy_sets.<key>`).
    pub key: String,

    /// Remote policy set ID, e.g. `polset-3yVQZvHzf5j3WRJ1`.
    pub id: String,

    #[command(flatten)]
    pub manifest: ManifestArg,

    #[command(flatten)]
    pub state: StateArg,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

impl ImportArgs {
    pub fn run(self) -> Result<()> {
        // A missing manifest is allowed; the import is then recorded as undeclared.
        let manifest = if self.manifest.manifest.exists() {
            self.manifest.load()?
        } else {
            Manifest::default()
        };
        let (path, mut state) = self.state.load()?;
        let remote = self.remote.connect()?;
        let ctx = self.remote.context();

        let id = PolicySetId::from(self.id);
        let result = pipeline::import(&remote, &ctx, &manifest, &self.key, &id, &mut state)
            .map(|report| vec![report]);
        report::finish("import", result, &path, &mut state)
    }
}
