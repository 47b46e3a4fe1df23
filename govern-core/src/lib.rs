//! govern core library: domain types, declaration manifests, state persistence, errors.
//!
//! - [`types`]: newtypes, desired-state specs, remote representations, records
//! - [`manifest`]: YAML declaration loading and validation
//! - [`state`]: load / save of the last observed records
//! - [`error`]: [`DeclarationError`], [`StateError`]

pub mod error;
pub mod manifest;
pub mod state;
pub mod types;

pub use error::{DeclarationError, StateError};
pub use manifest::Manifest;
pub use state::StateFile;
pub use types::{
    ModuleSharingRecord, ModuleSharingSpec, OrganizationName, PolicyId, PolicySet,
    PolicySetId, PolicySetRecord, PolicySetSpec, PolicySetVersion, PolicySetVersionId,
    PolicySource, ResourceAddress, SlugSource, VcsRepo, WorkspaceId,
};
