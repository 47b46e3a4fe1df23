//! Error types for govern-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating a declaration manifest.
#[derive(Debug, Error)]
pub enum DeclarationError {
    /// The manifest file could not be read.
    #[error("failed to read manifest at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error: includes file path and line context from serde_yaml.
    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{address}: policy set name '{name}' can only include letters, numbers, -, and _")]
    InvalidName { address: String, name: String },

    #[error("{address}: organization must not be empty")]
    EmptyOrganization { address: String },

    /// More than one of `policy_ids`, `vcs_repo`, `slug` was declared.
    #[error("{address}: only one of {fields} may be set")]
    ConflictingSource { address: String, fields: String },

    #[error("{address}: policies_path conflicts with policy_ids")]
    PoliciesPathWithPolicyIds { address: String },

    #[error("{address}: workspace_ids conflicts with global = true")]
    GlobalWithWorkspaces { address: String },

    #[error("{address}: vcs_repo.{field} must not be empty")]
    EmptyVcsField { address: String, field: &'static str },
}

/// Errors raised by the persisted state store.
#[derive(Debug, Error)]
pub enum StateError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load.
    #[error("failed to parse state at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The state file was written by a newer format version.
    #[error("state at {path} has unsupported version {found} (expected <= {supported})")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.govern/`.
    #[error("cannot determine home directory; set $HOME or pass --state")]
    HomeNotFound,
}

pub(crate) fn state_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StateError {
    StateError::Io {
        path: path.into(),
        source,
    }
}
