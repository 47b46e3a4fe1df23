//! Persisted state: the last observed record of every managed resource.
//!
//! # Storage layout
//!
//! ```text
//! ~/.govern/
//!   state.yaml   (mode 0600; directory mode 0700)
//! ```
//!
//! # API pattern
//!
//! Load and save always take an explicit path. [`state_path`] derives the
//! default location from `dirs::home_dir()`; tests use [`state_path_at`]
//! with a `TempDir`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{state_io_err, StateError};
use crate::types::{ModuleSharingRecord, PolicySetRecord};

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 1;

/// Root of the YAML state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    #[serde(default)]
    pub policy_sets: BTreeMap<String, PolicySetRecord>,
    #[serde(default)]
    pub module_sharing: BTreeMap<String, ModuleSharingRecord>,
    pub updated_at: DateTime<Utc>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            policy_sets: BTreeMap::new(),
            module_sharing: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

impl StateFile {
    pub fn is_empty(&self) -> bool {
        self.policy_sets.is_empty() && self.module_sharing.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.govern/state.yaml`: pure, no I/O.
pub fn state_path_at(home: &Path) -> PathBuf {
    home.join(".govern").join("state.yaml")
}

/// `state_path_at` convenience wrapper.
pub fn state_path() -> Result<PathBuf, StateError> {
    Ok(state_path_at(&home()?))
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load the state file at `path`.
///
/// A missing file is an empty state. Malformed YAML returns
/// `StateError::Parse` with the path.
pub fn load_at(path: &Path) -> Result<StateFile, StateError> {
    if !path.exists() {
        return Ok(StateFile::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| state_io_err(path, e))?;
    let state: StateFile = serde_yaml::from_str(&contents).map_err(|e| StateError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    if state.version > STATE_VERSION {
        return Err(StateError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: state.version,
            supported: STATE_VERSION,
        });
    }
    Ok(state)
}

// ---------------------------------------------------------------------------
// Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `state` to `path`, stamping `updated_at`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
/// The `.tmp` file lives in the target directory so the rename never
/// crosses filesystems.
pub fn save_at(path: &Path, state: &mut StateFile) -> Result<(), StateError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| state_io_err(dir, e))?;
            set_dir_permissions(dir)?;
        }
    }

    state.version = STATE_VERSION;
    state.updated_at = Utc::now();
    let yaml = serde_yaml::to_string(state)?;

    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| state_io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(state_io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, StateError> {
    dirs::home_dir().ok_or(StateError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StateError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| state_io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StateError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StateError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| state_io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StateError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
