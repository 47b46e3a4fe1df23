//! Domain types for policy sets and organization module sharing.
//!
//! Desired state (`*Spec`) is produced by the manifest loader and is always
//! validated. Observed state (`*Record`) is what the reconcilers last read
//! from the remote API; records are persisted in the state file.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeclarationError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

opaque_id!(
    /// Remote-assigned identity of a policy set (`polset-…`).
    PolicySetId
);
opaque_id!(
    /// Identity of a single governance policy.
    PolicyId
);
opaque_id!(
    /// Identity of a workspace a policy set can be attached to.
    WorkspaceId
);
opaque_id!(
    /// Remote-assigned identity of a policy set version (`polsetver-…`).
    PolicySetVersionId
);

/// An organization name.
///
/// Equality and hashing fold case: `"Acme"` and `"acme"` are the same
/// organization. The original spelling is kept for display and payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationName(pub String);

impl OrganizationName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn folded(&self) -> String {
        self.0.to_lowercase()
    }
}

impl PartialEq for OrganizationName {
    fn eq(&self, other: &Self) -> bool {
        self.folded() == other.folded()
    }
}

impl Eq for OrganizationName {}

impl Hash for OrganizationName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded().hash(state);
    }
}

impl fmt::Display for OrganizationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for OrganizationName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrganizationName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Returns `true` when `name` is a valid policy set name: one or more
/// ASCII letters, digits, `_` or `-`.
pub fn is_valid_policy_set_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ---------------------------------------------------------------------------
// Resource addressing
// ---------------------------------------------------------------------------

/// Local address of a declared resource, e.g. `policy_set.baseline`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceAddress {
    PolicySet(String),
    ModuleSharing(String),
}

impl ResourceAddress {
    pub fn key(&self) -> &str {
        match self {
            ResourceAddress::PolicySet(key) | ResourceAddress::ModuleSharing(key) => key,
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceAddress::PolicySet(key) => write!(f, "policy_set.{key}"),
            ResourceAddress::ModuleSharing(key) => write!(f, "module_sharing.{key}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Policy set sources
// ---------------------------------------------------------------------------

/// Version-control binding of a policy set. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsRepo {
    pub identifier: String,
    /// `None` means the repository's default branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub ingress_submodules: bool,
    pub oauth_token_id: String,
}

/// A pre-packed policy bundle uploaded as a new policy set version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlugSource {
    pub source_path: PathBuf,
}

/// Where a policy set's policies come from. Exactly one mode is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    /// Policies referenced by ID; membership is reconciled incrementally.
    Policies(BTreeSet<PolicyId>),
    /// Policies are read by the remote from a VCS repository.
    Vcs(VcsRepo),
    /// Policies are uploaded from a local bundle.
    Slug(SlugSource),
}

impl Default for PolicySource {
    fn default() -> Self {
        PolicySource::Policies(BTreeSet::new())
    }
}

// ---------------------------------------------------------------------------
// Desired state
// ---------------------------------------------------------------------------

/// Desired configuration of one policy set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySetSpec {
    pub name: String,
    /// `None` leaves the remote description untouched.
    pub description: Option<String>,
    pub organization: OrganizationName,
    pub global: bool,
    pub policies_path: Option<String>,
    pub source: PolicySource,
    pub workspace_ids: BTreeSet<WorkspaceId>,
}

impl PolicySetSpec {
    /// Check the invariants the reconciler relies on.
    pub fn validate(&self, address: &str) -> Result<(), DeclarationError> {
        if !is_valid_policy_set_name(&self.name) {
            return Err(DeclarationError::InvalidName {
                address: address.to_string(),
                name: self.name.clone(),
            });
        }
        if self.organization.as_str().trim().is_empty() {
            return Err(DeclarationError::EmptyOrganization {
                address: address.to_string(),
            });
        }
        if self.global && !self.workspace_ids.is_empty() {
            return Err(DeclarationError::GlobalWithWorkspaces {
                address: address.to_string(),
            });
        }
        let has_policy_ids = matches!(&self.source, PolicySource::Policies(ids) if !ids.is_empty());
        if self.policies_path.is_some() && has_policy_ids {
            return Err(DeclarationError::PoliciesPathWithPolicyIds {
                address: address.to_string(),
            });
        }
        if let PolicySource::Vcs(vcs) = &self.source {
            if vcs.identifier.trim().is_empty() {
                return Err(DeclarationError::EmptyVcsField {
                    address: address.to_string(),
                    field: "identifier",
                });
            }
            if vcs.oauth_token_id.trim().is_empty() {
                return Err(DeclarationError::EmptyVcsField {
                    address: address.to_string(),
                    field: "oauth_token_id",
                });
            }
        }
        Ok(())
    }

    pub fn vcs_repo(&self) -> Option<&VcsRepo> {
        match &self.source {
            PolicySource::Vcs(vcs) => Some(vcs),
            _ => None,
        }
    }

    pub fn slug(&self) -> Option<&SlugSource> {
        match &self.source {
            PolicySource::Slug(slug) => Some(slug),
            _ => None,
        }
    }

    pub fn policy_ids(&self) -> Option<&BTreeSet<PolicyId>> {
        match &self.source {
            PolicySource::Policies(ids) => Some(ids),
            _ => None,
        }
    }
}

/// Desired module-sharing configuration of one producer organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSharingSpec {
    pub organization: OrganizationName,
    /// Full consumer list. Empty disables sharing.
    pub consumers: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Remote representations
// ---------------------------------------------------------------------------

/// A policy set as reported by the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySet {
    pub id: PolicySetId,
    pub name: String,
    pub description: Option<String>,
    pub organization: Option<OrganizationName>,
    pub global: bool,
    pub policies_path: Option<String>,
    pub vcs_repo: Option<VcsRepo>,
    pub policy_ids: BTreeSet<PolicyId>,
    pub workspace_ids: BTreeSet<WorkspaceId>,
}

/// A freshly created policy set version awaiting its bundle upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySetVersion {
    pub id: PolicySetVersionId,
    pub policy_set_id: PolicySetId,
    /// Pre-signed upload link, when the remote hands one out.
    pub upload_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Observed state
// ---------------------------------------------------------------------------

/// Last observed state of a managed policy set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySetRecord {
    pub id: PolicySetId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub organization: OrganizationName,
    #[serde(default)]
    pub global: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs_repo: Option<VcsRepo>,
    #[serde(default)]
    pub policy_ids: BTreeSet<PolicyId>,
    #[serde(default)]
    pub workspace_ids: BTreeSet<WorkspaceId>,
    /// SHA-256 of the last bundle successfully uploaded, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug_fingerprint: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Last applied module-sharing configuration of a producer organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSharingRecord {
    /// Producer organization, spelled as originally declared.
    pub organization: OrganizationName,
    #[serde(default)]
    pub consumers: BTreeSet<String>,
    pub observed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
