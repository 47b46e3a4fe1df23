//! Declaration manifest: the desired state, loaded from YAML.
//!
//! ```yaml
//! policy_sets:
//!   baseline:
//!     name: baseline
//!     organization: acme
//!     policy_ids: [pol-1, pol-2]
//!     workspace_ids: [ws-1]
//!   bundled:
//!     name: bundled
//!     organization: acme
//!     global: true
//!     slug:
//!       source_path: bundles/bundled.tar.gz
//! module_sharing:
//!   acme:
//!     organization: acme
//!     module_consumers: [acme-dev, acme-prod]
//! ```
//!
//! Raw declarations are deserialized into loosely optional structs and then
//! converted into validated [`PolicySetSpec`] / [`ModuleSharingSpec`] values.
//! The reconcilers never see the raw form.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::DeclarationError;
use crate::types::{
    ModuleSharingSpec, OrganizationName, PolicyId, PolicySetSpec, PolicySource, ResourceAddress,
    SlugSource, VcsRepo, WorkspaceId,
};

/// A validated set of declarations, keyed by local resource name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub policy_sets: BTreeMap<String, PolicySetSpec>,
    pub module_sharing: BTreeMap<String, ModuleSharingSpec>,
}

// ---------------------------------------------------------------------------
// Raw (on-disk) form
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    policy_sets: BTreeMap<String, RawPolicySet>,
    #[serde(default)]
    module_sharing: BTreeMap<String, RawModuleSharing>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPolicySet {
    name: String,
    description: Option<String>,
    organization: String,
    #[serde(default)]
    global: bool,
    policies_path: Option<String>,
    policy_ids: Option<Vec<String>>,
    vcs_repo: Option<RawVcsRepo>,
    slug: Option<SlugSource>,
    #[serde(default)]
    workspace_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVcsRepo {
    identifier: String,
    branch: Option<String>,
    #[serde(default)]
    ingress_submodules: bool,
    oauth_token_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModuleSharing {
    organization: String,
    #[serde(default)]
    module_consumers: Vec<String>,
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load and validate the manifest at `path`.
///
/// Relative `slug.source_path` values are resolved against the manifest's
/// directory.
pub fn load_at(path: &Path) -> Result<Manifest, DeclarationError> {
    let contents = std::fs::read_to_string(path).map_err(|source| DeclarationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse(&contents, path, base)
}

/// Parse and validate manifest YAML. `origin` is only used in error messages.
pub fn parse(contents: &str, origin: &Path, base: &Path) -> Result<Manifest, DeclarationError> {
    let raw: RawManifest =
        serde_yaml::from_str(contents).map_err(|source| DeclarationError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

    let mut manifest = Manifest::default();
    for (key, decl) in raw.policy_sets {
        let address = ResourceAddress::PolicySet(key.clone()).to_string();
        let spec = convert_policy_set(&address, decl, base)?;
        manifest.policy_sets.insert(key, spec);
    }
    for (key, decl) in raw.module_sharing {
        let address = ResourceAddress::ModuleSharing(key.clone()).to_string();
        let spec = convert_module_sharing(&address, decl)?;
        manifest.module_sharing.insert(key, spec);
    }
    Ok(manifest)
}

fn convert_policy_set(
    address: &str,
    raw: RawPolicySet,
    base: &Path,
) -> Result<PolicySetSpec, DeclarationError> {
    let declared: Vec<&str> = [
        raw.policy_ids.as_ref().map(|_| "policy_ids"),
        raw.vcs_repo.as_ref().map(|_| "vcs_repo"),
        raw.slug.as_ref().map(|_| "slug"),
    ]
    .into_iter()
    .flatten()
    .collect();
    if declared.len() > 1 {
        return Err(DeclarationError::ConflictingSource {
            address: address.to_string(),
            fields: declared.join(", "),
        });
    }
    if raw.policy_ids.is_some() && raw.policies_path.is_some() {
        return Err(DeclarationError::PoliciesPathWithPolicyIds {
            address: address.to_string(),
        });
    }

    let source = match (raw.policy_ids, raw.vcs_repo, raw.slug) {
        (_, Some(vcs), _) => PolicySource::Vcs(VcsRepo {
            identifier: vcs.identifier,
            branch: vcs.branch.filter(|b| !b.is_empty()),
            ingress_submodules: vcs.ingress_submodules,
            oauth_token_id: vcs.oauth_token_id,
        }),
        (_, _, Some(slug)) => PolicySource::Slug(SlugSource {
            source_path: resolve(base, slug.source_path),
        }),
        (ids, None, None) => PolicySource::Policies(
            ids.unwrap_or_default()
                .into_iter()
                .filter(|id| !id.is_empty())
                .map(PolicyId::from)
                .collect(),
        ),
    };

    let spec = PolicySetSpec {
        name: raw.name,
        description: raw.description.filter(|d| !d.is_empty()),
        organization: OrganizationName::from(raw.organization),
        global: raw.global,
        policies_path: raw.policies_path.filter(|p| !p.is_empty()),
        source,
        workspace_ids: raw
            .workspace_ids
            .into_iter()
            .filter(|id| !id.is_empty())
            .map(WorkspaceId::from)
            .collect(),
    };
    spec.validate(address)?;
    Ok(spec)
}

fn convert_module_sharing(
    address: &str,
    raw: RawModuleSharing,
) -> Result<ModuleSharingSpec, DeclarationError> {
    if raw.organization.trim().is_empty() {
        return Err(DeclarationError::EmptyOrganization {
            address: address.to_string(),
        });
    }
    let consumers: BTreeSet<String> = raw
        .module_consumers
        .into_iter()
        .filter(|name| !name.is_empty())
        .collect();
    Ok(ModuleSharingSpec {
        organization: OrganizationName::from(raw.organization),
        consumers,
    })
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
