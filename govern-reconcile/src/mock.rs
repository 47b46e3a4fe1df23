//! In-memory remote for testing.
//!
//! Records every call and keeps a small model of the remote's objects,
//! making it easy to write deterministic tests for the reconcilers. The
//! model enforces the same global/workspace rule as the real service and
//! reports empty consumer listings as zero total pages.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use govern_core::{
    OrganizationName, PolicyId, PolicySet, PolicySetId, PolicySetVersion, PolicySetVersionId,
    WorkspaceId,
};

use crate::context::Context;
use crate::error::RemoteError;
use crate::remote::{Page, PolicySetCreate, PolicySetUpdate, RemoteApi};

/// Branch the remote reports for VCS bindings declared without one.
pub const DEFAULT_BRANCH: &str = "main";

/// A call made against [`InMemoryRemote`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    CreatePolicySet { organization: String, name: String },
    ReadPolicySet { id: PolicySetId },
    UpdatePolicySet { id: PolicySetId, attrs: PolicySetUpdate },
    DeletePolicySet { id: PolicySetId },
    AddPolicies { id: PolicySetId, policies: BTreeSet<PolicyId> },
    RemovePolicies { id: PolicySetId, policies: BTreeSet<PolicyId> },
    AddWorkspaces { id: PolicySetId, workspaces: BTreeSet<WorkspaceId> },
    RemoveWorkspaces { id: PolicySetId, workspaces: BTreeSet<WorkspaceId> },
    CreatePolicySetVersion { id: PolicySetId },
    UploadPolicySetVersion { version: PolicySetVersionId, bundle: PathBuf },
    ListModuleConsumers { producer: String, page: Option<u32> },
    UpdateModuleConsumers { producer: String, consumers: Vec<String> },
}

/// Discriminant of [`RemoteCall`], used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    CreatePolicySet,
    ReadPolicySet,
    UpdatePolicySet,
    DeletePolicySet,
    AddPolicies,
    RemovePolicies,
    AddWorkspaces,
    RemoveWorkspaces,
    CreatePolicySetVersion,
    UploadPolicySetVersion,
    ListModuleConsumers,
    UpdateModuleConsumers,
}

impl RemoteCall {
    pub fn kind(&self) -> CallKind {
        match self {
            RemoteCall::CreatePolicySet { .. } => CallKind::CreatePolicySet,
            RemoteCall::ReadPolicySet { .. } => CallKind::ReadPolicySet,
            RemoteCall::UpdatePolicySet { .. } => CallKind::UpdatePolicySet,
            RemoteCall::DeletePolicySet { .. } => CallKind::DeletePolicySet,
            RemoteCall::AddPolicies { .. } => CallKind::AddPolicies,
            RemoteCall::RemovePolicies { .. } => CallKind::RemovePolicies,
            RemoteCall::AddWorkspaces { .. } => CallKind::AddWorkspaces,
            RemoteCall::RemoveWorkspaces { .. } => CallKind::RemoveWorkspaces,
            RemoteCall::CreatePolicySetVersion { .. } => CallKind::CreatePolicySetVersion,
            RemoteCall::UploadPolicySetVersion { .. } => CallKind::UploadPolicySetVersion,
            RemoteCall::ListModuleConsumers { .. } => CallKind::ListModuleConsumers,
            RemoteCall::UpdateModuleConsumers { .. } => CallKind::UpdateModuleConsumers,
        }
    }

    /// Everything except reads and listings.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self.kind(),
            CallKind::ReadPolicySet | CallKind::ListModuleConsumers
        )
    }
}

struct StoredVersion {
    version: PolicySetVersion,
    content: Option<Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    calls: Vec<RemoteCall>,
    failures: HashMap<CallKind, VecDeque<RemoteError>>,
    organizations: HashSet<OrganizationName>,
    policy_sets: HashMap<PolicySetId, PolicySet>,
    versions: Vec<StoredVersion>,
    consumers: HashMap<OrganizationName, Vec<String>>,
    next_id: u32,
}

impl Inner {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Record the call and pop an injected failure, if any.
    fn begin(&mut self, ctx: &Context, call: RemoteCall) -> Result<(), RemoteError> {
        ctx.check()?;
        let kind = call.kind();
        self.calls.push(call);
        match self.failures.get_mut(&kind).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn policy_set_mut(&mut self, id: &PolicySetId) -> Result<&mut PolicySet, RemoteError> {
        self.policy_sets.get_mut(id).ok_or(RemoteError::NotFound)
    }

    fn known_org(&self, org: &OrganizationName) -> Result<(), RemoteError> {
        if self.organizations.contains(org) {
            Ok(())
        } else {
            Err(RemoteError::NotFound)
        }
    }
}

/// A test double that records calls and models remote objects in memory.
pub struct InMemoryRemote {
    inner: Mutex<Inner>,
    page_size: usize,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        InMemoryRemote {
            inner: Mutex::new(Inner::default()),
            page_size: 20,
        }
    }

    /// Register an organization so policy sets and sharing can target it.
    pub fn with_organization(self, name: &str) -> Self {
        self.lock().organizations.insert(OrganizationName::from(name));
        self
    }

    /// Number of consumers per listing page (minimum 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- failure injection -------------------------------------------------

    /// Make the next call of `kind` fail with `err`. Queued per kind.
    pub fn fail_next(&self, kind: CallKind, err: RemoteError) {
        self.lock().failures.entry(kind).or_default().push_back(err);
    }

    // -- out-of-band changes -----------------------------------------------

    /// Create a plain, empty policy set without recording a call.
    pub fn seed_policy_set(&self, organization: &OrganizationName, name: &str) -> PolicySetId {
        let mut inner = self.lock();
        inner.organizations.insert(organization.clone());
        let id = PolicySetId(format!("polset-{:04}", inner.next_id()));
        inner.policy_sets.insert(
            id.clone(),
            PolicySet {
                id: id.clone(),
                name: name.to_string(),
                description: None,
                organization: Some(organization.clone()),
                global: false,
                policies_path: None,
                vcs_repo: None,
                policy_ids: BTreeSet::new(),
                workspace_ids: BTreeSet::new(),
            },
        );
        id
    }

    /// Delete a policy set behind the reconciler's back.
    pub fn remove_policy_set(&self, id: &PolicySetId) {
        self.lock().policy_sets.remove(id);
    }

    /// Attach workspaces behind the reconciler's back, bypassing the
    /// global check.
    pub fn attach_workspaces(&self, id: &PolicySetId, workspaces: &[&str]) {
        if let Some(set) = self.lock().policy_sets.get_mut(id) {
            set.workspace_ids
                .extend(workspaces.iter().map(|w| WorkspaceId::from(*w)));
        }
    }

    /// Overwrite a producer's consumer list behind the reconciler's back.
    pub fn set_consumers(&self, producer: &str, consumers: &[&str]) {
        let mut inner = self.lock();
        let org = OrganizationName::from(producer);
        inner.organizations.insert(org.clone());
        inner
            .consumers
            .insert(org, consumers.iter().map(|c| c.to_string()).collect());
    }

    /// Remove an organization and everything it owns.
    pub fn remove_organization(&self, name: &str) {
        let mut inner = self.lock();
        let org = OrganizationName::from(name);
        inner.organizations.remove(&org);
        inner.consumers.remove(&org);
        inner
            .policy_sets
            .retain(|_, set| set.organization.as_ref() != Some(&org));
    }

    // -- inspection --------------------------------------------------------

    /// All calls attempted, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Attempted calls that would change remote state.
    pub fn mutations(&self) -> Vec<RemoteCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn policy_set(&self, id: &PolicySetId) -> Option<PolicySet> {
        self.lock().policy_sets.get(id).cloned()
    }

    pub fn policy_set_count(&self) -> usize {
        self.lock().policy_sets.len()
    }

    pub fn consumers(&self, producer: &str) -> Option<Vec<String>> {
        self.lock()
            .consumers
            .get(&OrganizationName::from(producer))
            .cloned()
    }

    /// Number of versions ever created for a policy set.
    pub fn version_count(&self, id: &PolicySetId) -> usize {
        self.lock()
            .versions
            .iter()
            .filter(|v| &v.version.policy_set_id == id)
            .count()
    }

    /// Contents of every successfully uploaded version, oldest first.
    pub fn uploaded_bundles(&self, id: &PolicySetId) -> Vec<Vec<u8>> {
        self.lock()
            .versions
            .iter()
            .filter(|v| &v.version.policy_set_id == id)
            .filter_map(|v| v.content.clone())
            .collect()
    }
}

fn rejected(message: &str) -> RemoteError {
    RemoteError::Rejected {
        status: 422,
        message: message.to_string(),
    }
}

fn with_default_branch(mut vcs: govern_core::VcsRepo) -> govern_core::VcsRepo {
    if vcs.branch.as_deref().unwrap_or("").is_empty() {
        vcs.branch = Some(DEFAULT_BRANCH.to_string());
    }
    vcs
}

impl RemoteApi for InMemoryRemote {
    fn create_policy_set(
        &self,
        ctx: &Context,
        organization: &OrganizationName,
        attrs: &PolicySetCreate,
    ) -> Result<PolicySet, RemoteError> {
        let mut inner = self.lock();
        inner.begin(
            ctx,
            RemoteCall::CreatePolicySet {
                organization: organization.to_string(),
                name: attrs.name.clone(),
            },
        )?;
        inner.known_org(organization)?;
        if attrs.global && !attrs.workspace_ids.is_empty() {
            return Err(rejected("global policy sets cannot be attached to workspaces"));
        }
        let taken = inner.policy_sets.values().any(|s| {
            s.name == attrs.name && s.organization.as_ref() == Some(organization)
        });
        if taken {
            return Err(rejected("name has already been taken"));
        }

        let id = PolicySetId(format!("polset-{:04}", inner.next_id()));
        let set = PolicySet {
            id: id.clone(),
            name: attrs.name.clone(),
            description: attrs.description.clone(),
            organization: Some(organization.clone()),
            global: attrs.global,
            policies_path: attrs.policies_path.clone(),
            vcs_repo: attrs.vcs_repo.clone().map(with_default_branch),
            policy_ids: attrs.policy_ids.clone(),
            workspace_ids: attrs.workspace_ids.clone(),
        };
        inner.policy_sets.insert(id, set.clone());
        Ok(set)
    }

    fn read_policy_set(&self, ctx: &Context, id: &PolicySetId) -> Result<PolicySet, RemoteError> {
        let mut inner = self.lock();
        inner.begin(ctx, RemoteCall::ReadPolicySet { id: id.clone() })?;
        inner.policy_sets.get(id).cloned().ok_or(RemoteError::NotFound)
    }

    fn update_policy_set(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        attrs: &PolicySetUpdate,
    ) -> Result<PolicySet, RemoteError> {
        let mut inner = self.lock();
        inner.begin(
            ctx,
            RemoteCall::UpdatePolicySet {
                id: id.clone(),
                attrs: attrs.clone(),
            },
        )?;
        let set = inner.policy_set_mut(id)?;
        if attrs.global && !set.workspace_ids.is_empty() {
            return Err(rejected("global policy sets cannot be attached to workspaces"));
        }
        set.name = attrs.name.clone();
        if let Some(description) = &attrs.description {
            set.description = Some(description.clone());
        }
        set.global = attrs.global;
        if let Some(vcs) = &attrs.vcs_repo {
            set.vcs_repo = Some(with_default_branch(vcs.clone()));
        }
        Ok(set.clone())
    }

    fn delete_policy_set(&self, ctx: &Context, id: &PolicySetId) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.begin(ctx, RemoteCall::DeletePolicySet { id: id.clone() })?;
        inner.policy_sets.remove(id).map(|_| ()).ok_or(RemoteError::NotFound)
    }

    fn add_policies(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        policies: &BTreeSet<PolicyId>,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.begin(
            ctx,
            RemoteCall::AddPolicies {
                id: id.clone(),
                policies: policies.clone(),
            },
        )?;
        let set = inner.policy_set_mut(id)?;
        set.policy_ids.extend(policies.iter().cloned());
        Ok(())
    }

    fn remove_policies(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        policies: &BTreeSet<PolicyId>,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.begin(
            ctx,
            RemoteCall::RemovePolicies {
                id: id.clone(),
                policies: policies.clone(),
            },
        )?;
        let set = inner.policy_set_mut(id)?;
        set.policy_ids.retain(|p| !policies.contains(p));
        Ok(())
    }

    fn add_workspaces(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        workspaces: &BTreeSet<WorkspaceId>,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.begin(
            ctx,
            RemoteCall::AddWorkspaces {
                id: id.clone(),
                workspaces: workspaces.clone(),
            },
        )?;
        let set = inner.policy_set_mut(id)?;
        if set.global {
            return Err(rejected("global policy sets cannot be attached to workspaces"));
        }
        set.workspace_ids.extend(workspaces.iter().cloned());
        Ok(())
    }

    fn remove_workspaces(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        workspaces: &BTreeSet<WorkspaceId>,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.begin(
            ctx,
            RemoteCall::RemoveWorkspaces {
                id: id.clone(),
                workspaces: workspaces.clone(),
            },
        )?;
        let set = inner.policy_set_mut(id)?;
        set.workspace_ids.retain(|w| !workspaces.contains(w));
        Ok(())
    }

    fn create_policy_set_version(
        &self,
        ctx: &Context,
        id: &PolicySetId,
    ) -> Result<PolicySetVersion, RemoteError> {
        let mut inner = self.lock();
        inner.begin(ctx, RemoteCall::CreatePolicySetVersion { id: id.clone() })?;
        inner.policy_set_mut(id)?;
        let version_id = PolicySetVersionId(format!("polsetver-{:04}", inner.next_id()));
        let version = PolicySetVersion {
            id: version_id.clone(),
            policy_set_id: id.clone(),
            upload_url: Some(format!("memory://upload/{version_id}")),
        };
        inner.versions.push(StoredVersion {
            version: version.clone(),
            content: None,
        });
        Ok(version)
    }

    fn upload_policy_set_version(
        &self,
        ctx: &Context,
        version: &PolicySetVersion,
        bundle: &Path,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.begin(
            ctx,
            RemoteCall::UploadPolicySetVersion {
                version: version.id.clone(),
                bundle: bundle.to_path_buf(),
            },
        )?;
        let content = std::fs::read(bundle).map_err(|source| RemoteError::Io {
            path: bundle.to_path_buf(),
            source,
        })?;
        let stored = inner
            .versions
            .iter_mut()
            .find(|v| v.version.id == version.id)
            .ok_or(RemoteError::NotFound)?;
        stored.content = Some(content);
        Ok(())
    }

    fn list_module_consumers(
        &self,
        ctx: &Context,
        producer: &OrganizationName,
        page: Option<u32>,
    ) -> Result<Page<String>, RemoteError> {
        let mut inner = self.lock();
        inner.begin(
            ctx,
            RemoteCall::ListModuleConsumers {
                producer: producer.to_string(),
                page,
            },
        )?;
        inner.known_org(producer)?;
        let all = inner.consumers.get(producer).cloned().unwrap_or_default();

        let current = page.unwrap_or(1).max(1);
        let total = all.len().div_ceil(self.page_size) as u32;
        let start = (current as usize - 1) * self.page_size;
        let items = all.into_iter().skip(start).take(self.page_size).collect();
        Ok(Page {
            items,
            current_page: current,
            total_pages: total,
            next_page: (current < total).then_some(current + 1),
        })
    }

    fn update_module_consumers(
        &self,
        ctx: &Context,
        producer: &OrganizationName,
        consumers: &[String],
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.begin(
            ctx,
            RemoteCall::UpdateModuleConsumers {
                producer: producer.to_string(),
                consumers: consumers.to_vec(),
            },
        )?;
        inner.known_org(producer)?;
        inner.consumers.insert(producer.clone(), consumers.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_implements_remote_api() {
        let remote = InMemoryRemote::new();
        let _: &dyn RemoteApi = &remote;
    }

    #[test]
    fn empty_consumer_listing_reports_zero_pages() {
        let remote = InMemoryRemote::new().with_organization("acme");
        let page = remote
            .list_module_consumers(&Context::background(), &OrganizationName::from("ACME"), None)
            .expect("list");
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, 0);
        assert_eq!(page.next_page, None);
    }

    #[test]
    fn consumers_are_paged() {
        let remote = InMemoryRemote::new().with_page_size(2);
        remote.set_consumers("acme", &["a", "b", "c"]);
        let org = OrganizationName::from("acme");
        let first = remote
            .list_module_consumers(&Context::background(), &org, None)
            .expect("page 1");
        assert_eq!(first.items, vec!["a", "b"]);
        assert_eq!((first.current_page, first.total_pages, first.next_page), (1, 2, Some(2)));
        let second = remote
            .list_module_consumers(&Context::background(), &org, Some(2))
            .expect("page 2");
        assert_eq!(second.items, vec!["c"]);
        assert_eq!(second.next_page, None);
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let remote = InMemoryRemote::new();
        let id = remote.seed_policy_set(&OrganizationName::from("acme"), "base");
        remote.fail_next(CallKind::ReadPolicySet, RemoteError::Transport("boom".into()));
        let ctx = Context::background();
        assert!(remote.read_policy_set(&ctx, &id).is_err());
        assert!(remote.read_policy_set(&ctx, &id).is_ok());
        assert_eq!(remote.calls().len(), 2);
    }

    #[test]
    fn cancelled_context_records_nothing() {
        let remote = InMemoryRemote::new();
        let id = remote.seed_policy_set(&OrganizationName::from("acme"), "base");
        let ctx = Context::background();
        ctx.cancel();
        let err = remote.delete_policy_set(&ctx, &id).unwrap_err();
        assert!(matches!(err, RemoteError::Cancelled));
        assert!(remote.calls().is_empty());
        assert!(remote.policy_set(&id).is_some());
    }
}
