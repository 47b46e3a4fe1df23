//! The remote management API, as consumed by the reconcilers.
//!
//! Implementations own the transport. Every call receives the invocation's
//! [`Context`] and must fail with `Cancelled` / `DeadlineExceeded` once it
//! is done. A missing target object is always reported as
//! [`RemoteError::NotFound`].

use std::collections::BTreeSet;
use std::path::Path;

use govern_core::{
    OrganizationName, PolicyId, PolicySet, PolicySetId, PolicySetVersion, VcsRepo, WorkspaceId,
};

use crate::context::Context;
use crate::error::RemoteError;

/// Attributes sent when creating a policy set. At most one of
/// `vcs_repo` and a non-empty `policy_ids` is populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySetCreate {
    pub name: String,
    pub description: Option<String>,
    pub global: bool,
    pub policies_path: Option<String>,
    pub vcs_repo: Option<VcsRepo>,
    pub policy_ids: BTreeSet<PolicyId>,
    pub workspace_ids: BTreeSet<WorkspaceId>,
}

/// Whole-object attribute update. The VCS binding, when present, is always
/// sent complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySetUpdate {
    pub name: String,
    pub description: Option<String>,
    pub global: bool,
    pub vcs_repo: Option<VcsRepo>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub current_page: u32,
    pub total_pages: u32,
    pub next_page: Option<u32>,
}

/// Remote operations used by the reconcilers.
pub trait RemoteApi {
    fn create_policy_set(
        &self,
        ctx: &Context,
        organization: &OrganizationName,
        attrs: &PolicySetCreate,
    ) -> Result<PolicySet, RemoteError>;

    fn read_policy_set(&self, ctx: &Context, id: &PolicySetId) -> Result<PolicySet, RemoteError>;

    fn update_policy_set(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        attrs: &PolicySetUpdate,
    ) -> Result<PolicySet, RemoteError>;

    fn delete_policy_set(&self, ctx: &Context, id: &PolicySetId) -> Result<(), RemoteError>;

    fn add_policies(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        policies: &BTreeSet<PolicyId>,
    ) -> Result<(), RemoteError>;

    fn remove_policies(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        policies: &BTreeSet<PolicyId>,
    ) -> Result<(), RemoteError>;

    fn add_workspaces(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        workspaces: &BTreeSet<WorkspaceId>,
    ) -> Result<(), RemoteError>;

    fn remove_workspaces(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        workspaces: &BTreeSet<WorkspaceId>,
    ) -> Result<(), RemoteError>;

    fn create_policy_set_version(
        &self,
        ctx: &Context,
        id: &PolicySetId,
    ) -> Result<PolicySetVersion, RemoteError>;

    fn upload_policy_set_version(
        &self,
        ctx: &Context,
        version: &PolicySetVersion,
        bundle: &Path,
    ) -> Result<(), RemoteError>;

    /// List one page of the producer's consumers. `None` requests the
    /// remote's default (first) page.
    fn list_module_consumers(
        &self,
        ctx: &Context,
        producer: &OrganizationName,
        page: Option<u32>,
    ) -> Result<Page<String>, RemoteError>;

    /// Replace the producer's consumer list wholesale.
    fn update_module_consumers(
        &self,
        ctx: &Context,
        producer: &OrganizationName,
        consumers: &[String],
    ) -> Result<(), RemoteError>;
}
