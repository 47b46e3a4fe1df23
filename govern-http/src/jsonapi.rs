//! JSON:API wire documents for the policy set and module-consumer endpoints.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use govern_core::{
    OrganizationName, PolicyId, PolicySet, PolicySetId, PolicySetVersion, PolicySetVersionId,
    VcsRepo, WorkspaceId,
};
use govern_reconcile::{Page, PolicySetCreate, PolicySetUpdate};

pub const MEDIA_TYPE: &str = "application/vnd.api+json";

const POLICY_SETS: &str = "policy-sets";
const POLICIES: &str = "policies";
const WORKSPACES: &str = "workspaces";
const ORGANIZATIONS: &str = "organizations";

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct Document<T> {
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> Document<T> {
    pub fn new(data: T) -> Self {
        Self { data, meta: None }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    #[serde(default)]
    pub next_page: Option<u32>,
}

/// `{"id": ..., "type": ...}` resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Identifier {
    fn new(id: impl Into<String>, kind: &str) -> Self {
        Self {
            id: id.into(),
            kind: kind.to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ToMany {
    #[serde(default)]
    pub data: Vec<Identifier>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ToOne {
    #[serde(default)]
    pub data: Option<Identifier>,
}

#[derive(Debug, Deserialize)]
struct ErrorDocument {
    #[serde(default)]
    errors: Vec<ErrorObject>,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    title: Option<String>,
    detail: Option<String>,
}

/// Human summary of a JSON:API error body, `None` if it carries no errors.
pub fn error_message(body: &str) -> Option<String> {
    let doc: ErrorDocument = serde_json::from_str(body).ok()?;
    let parts: Vec<String> = doc
        .errors
        .into_iter()
        .filter_map(|e| match (e.title, e.detail) {
            (Some(title), Some(detail)) => Some(format!("{title}: {detail}")),
            (title, detail) => detail.or(title),
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("; "))
}

// ---------------------------------------------------------------------------
// Policy sets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VcsRepoAttrs {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub ingress_submodules: bool,
    #[serde(default)]
    pub oauth_token_id: String,
}

impl From<&VcsRepo> for VcsRepoAttrs {
    fn from(vcs: &VcsRepo) -> Self {
        Self {
            identifier: vcs.identifier.clone(),
            branch: vcs.branch.clone(),
            ingress_submodules: vcs.ingress_submodules,
            oauth_token_id: vcs.oauth_token_id.clone(),
        }
    }
}

impl From<VcsRepoAttrs> for VcsRepo {
    fn from(attrs: VcsRepoAttrs) -> Self {
        Self {
            identifier: attrs.identifier,
            branch: attrs.branch.filter(|b| !b.is_empty()),
            ingress_submodules: attrs.ingress_submodules,
            oauth_token_id: attrs.oauth_token_id,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PolicySetAttrs {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub global: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs_repo: Option<VcsRepoAttrs>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PolicySetRelationships {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<ToOne>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies: Option<ToMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspaces: Option<ToMany>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PolicySetResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: PolicySetAttrs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<PolicySetRelationships>,
}

pub fn create_policy_set_body(attrs: &PolicySetCreate) -> Document<PolicySetResource> {
    let policies = (!attrs.policy_ids.is_empty()).then(|| ToMany {
        data: attrs
            .policy_ids
            .iter()
            .map(|id| Identifier::new(id.as_str(), POLICIES))
            .collect(),
    });
    let workspaces = (!attrs.workspace_ids.is_empty()).then(|| ToMany {
        data: attrs
            .workspace_ids
            .iter()
            .map(|id| Identifier::new(id.as_str(), WORKSPACES))
            .collect(),
    });
    let relationships = (policies.is_some() || workspaces.is_some()).then_some(
        PolicySetRelationships {
            organization: None,
            policies,
            workspaces,
        },
    );

    Document::new(PolicySetResource {
        id: None,
        kind: POLICY_SETS.to_string(),
        attributes: PolicySetAttrs {
            name: attrs.name.clone(),
            description: attrs.description.clone(),
            global: attrs.global,
            policies_path: attrs.policies_path.clone(),
            vcs_repo: attrs.vcs_repo.as_ref().map(VcsRepoAttrs::from),
        },
        relationships,
    })
}

pub fn update_policy_set_body(
    id: &PolicySetId,
    attrs: &PolicySetUpdate,
) -> Document<PolicySetResource> {
    Document::new(PolicySetResource {
        id: Some(id.to_string()),
        kind: POLICY_SETS.to_string(),
        attributes: PolicySetAttrs {
            name: attrs.name.clone(),
            description: attrs.description.clone(),
            global: attrs.global,
            policies_path: None,
            vcs_repo: attrs.vcs_repo.as_ref().map(VcsRepoAttrs::from),
        },
        relationships: None,
    })
}

impl PolicySetResource {
    pub fn into_policy_set(self) -> Result<PolicySet, String> {
        let id = self
            .id
            .ok_or_else(|| "policy set response carries no id".to_string())?;
        let rel = self.relationships.unwrap_or_default();
        let ids = |many: Option<ToMany>| -> Vec<String> {
            many.map(|m| m.data.into_iter().map(|i| i.id).collect())
                .unwrap_or_default()
        };
        Ok(PolicySet {
            id: PolicySetId::from(id),
            name: self.attributes.name,
            description: self.attributes.description.filter(|d| !d.is_empty()),
            organization: rel
                .organization
                .and_then(|o| o.data)
                .map(|i| OrganizationName::from(i.id)),
            global: self.attributes.global,
            policies_path: self.attributes.policies_path.filter(|p| !p.is_empty()),
            vcs_repo: self.attributes.vcs_repo.map(VcsRepo::from),
            policy_ids: ids(rel.policies).into_iter().map(PolicyId::from).collect(),
            workspace_ids: ids(rel.workspaces)
                .into_iter()
                .map(WorkspaceId::from)
                .collect(),
        })
    }
}

pub fn policies_body(ids: &BTreeSet<PolicyId>) -> ToMany {
    ToMany {
        data: ids
            .iter()
            .map(|id| Identifier::new(id.as_str(), POLICIES))
            .collect(),
    }
}

pub fn workspaces_body(ids: &BTreeSet<WorkspaceId>) -> ToMany {
    ToMany {
        data: ids
            .iter()
            .map(|id| Identifier::new(id.as_str(), WORKSPACES))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct VersionLinks {
    pub upload: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VersionResource {
    pub id: String,
    #[serde(default)]
    pub links: VersionLinks,
}

impl VersionResource {
    pub fn into_version(self, policy_set_id: &PolicySetId) -> PolicySetVersion {
        PolicySetVersion {
            id: PolicySetVersionId::from(self.id),
            policy_set_id: policy_set_id.clone(),
            upload_url: self.links.upload,
        }
    }
}

// ---------------------------------------------------------------------------
// Module consumers
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct OrganizationAttrs {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrganizationResource {
    pub id: String,
    #[serde(default)]
    pub attributes: OrganizationAttrs,
}

/// Convert a consumer listing into a [`Page`]. A response without
/// pagination metadata is a single, final page.
pub fn consumer_page(doc: Document<Vec<OrganizationResource>>) -> Page<String> {
    let items: Vec<String> = doc
        .data
        .into_iter()
        .map(|org| org.attributes.name.unwrap_or(org.id))
        .collect();
    match doc.meta.and_then(|m| m.pagination) {
        Some(p) => Page {
            items,
            current_page: p.current_page,
            total_pages: p.total_pages,
            next_page: p.next_page,
        },
        None => Page {
            items,
            current_page: 1,
            total_pages: 1,
            next_page: None,
        },
    }
}

pub fn consumers_body(consumers: &[String]) -> Document<Vec<Identifier>> {
    Document::new(
        consumers
            .iter()
            .map(|name| Identifier::new(name.as_str(), ORGANIZATIONS))
            .collect(),
    )
}
