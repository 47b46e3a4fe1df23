//! Shared arguments: manifest and state locations, remote settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;

use govern_core::{manifest, state, Manifest, StateFile};
use govern_http::{ClientConfig, HttpRemote, DEFAULT_ADDRESS};
use govern_reconcile::Context;

pub const ADDRESS_ENV: &str = "TFE_ADDRESS";
pub const TOKEN_ENV: &str = "TFE_TOKEN";

#[derive(Args, Debug)]
pub struct ManifestArg {
    /// Declaration manifest to reconcile.
    #[arg(long, short, default_value = "govern.yaml")]
    pub manifest: PathBuf,
}

impl ManifestArg {
    pub fn load(&self) -> Result<Manifest> {
        manifest::load_at(&self.manifest)
            .with_context(|| format!("failed to load manifest {}", self.manifest.display()))
    }
}

#[derive(Args, Debug)]
pub struct StateArg {
    /// State file (defaults to ~/.govern/state.yaml).
    #[arg(long)]
    pub state: Option<PathBuf>,
}

impl StateArg {
    pub fn path(&self) -> Result<PathBuf> {
        match &self.state {
            Some(path) => Ok(path.clone()),
            None => state::state_path().context("could not determine state file location"),
        }
    }

    pub fn load(&self) -> Result<(PathBuf, StateFile)> {
        let path = self.path()?;
        let state = load_state(&path)?;
        Ok((path, state))
    }
}

pub fn load_state(path: &Path) -> Result<StateFile> {
    state::load_at(path).with_context(|| format!("failed to load state {}", path.display()))
}

#[derive(Args, Debug)]
pub struct RemoteArgs {
    /// Give up on the whole run after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl RemoteArgs {
    pub fn context(&self) -> Context {
        match self.timeout {
            Some(secs) => Context::with_timeout(Duration::from_secs(secs)),
            None => Context::background(),
        }
    }

    /// Build the HTTP remote from `TFE_ADDRESS` / `TFE_TOKEN`.
    pub fn connect(&self) -> Result<HttpRemote> {
        let address = std::env::var(ADDRESS_ENV)
            .ok()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        let token = std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .with_context(|| format!("{TOKEN_ENV} is not set"))?;

        let mut config = ClientConfig::new(address, token);
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        tracing::debug!(address = %config.address, "using remote");
        Ok(HttpRemote::new(config))
    }
}
