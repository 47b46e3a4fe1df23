//! Blocking JSON:API client implementing [`RemoteApi`].

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use govern_core::{
    OrganizationName, PolicyId, PolicySet, PolicySetId, PolicySetVersion, WorkspaceId,
};
use govern_reconcile::{
    Context, Page, PolicySetCreate, PolicySetUpdate, RemoteApi, RemoteError,
};

use crate::jsonapi::{self, Document, OrganizationResource, PolicySetResource, VersionResource};

pub const DEFAULT_ADDRESS: &str = "https://app.terraform.io";
const API_PREFIX: &str = "/api/v2";

/// Connection settings for [`HttpRemote`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base address, e.g. `https://app.terraform.io`.
    pub address: String,
    /// Bearer token sent with every API request.
    pub token: String,
    /// Upper bound for a single request when the context has no deadline.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpRemote {
    agent: ureq::Agent,
    base: String,
    token: String,
}

impl HttpRemote {
    pub fn new(config: ClientConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        let base = format!("{}{API_PREFIX}", config.address.trim_end_matches('/'));
        Self {
            agent,
            base,
            token: config.token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn request(&self, ctx: &Context, method: &str, url: &str) -> Result<ureq::Request, RemoteError> {
        ctx.check()?;
        tracing::debug!(method, url, "remote request");
        let mut req = self
            .agent
            .request(method, url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", jsonapi::MEDIA_TYPE)
            .set("Content-Type", jsonapi::MEDIA_TYPE);
        if let Some(remaining) = ctx.remaining() {
            req = req.timeout(remaining);
        }
        Ok(req)
    }

    fn send<B: Serialize>(
        &self,
        ctx: &Context,
        method: &str,
        path: &str,
        body: &B,
    ) -> Result<ureq::Response, RemoteError> {
        let url = self.url(path);
        let req = self.request(ctx, method, &url)?;
        req.send_json(body).map_err(|e| classify(ctx, e))
    }

    fn fetch<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        let url = self.url(path);
        let mut req = self.request(ctx, "GET", &url)?;
        for (key, value) in query {
            req = req.query(key, value);
        }
        let resp = req.call().map_err(|e| classify(ctx, e))?;
        decode(resp)
    }
}

/// Map a ureq failure onto the reconcile error taxonomy.
fn classify(ctx: &Context, err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(404, _) => RemoteError::NotFound,
        ureq::Error::Status(status, resp) => {
            let body = resp.into_string().unwrap_or_default();
            let message = jsonapi::error_message(&body).unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("HTTP {status}")
                } else {
                    body
                }
            });
            RemoteError::Rejected { status, message }
        }
        ureq::Error::Transport(t) => match ctx.check() {
            Err(done) => done,
            Ok(()) => RemoteError::Transport(t.to_string()),
        },
    }
}

fn decode<T: DeserializeOwned>(resp: ureq::Response) -> Result<T, RemoteError> {
    resp.into_json::<T>()
        .map_err(|e| RemoteError::Transport(format!("failed to decode response: {e}")))
}

fn policy_set_from(resp: ureq::Response) -> Result<PolicySet, RemoteError> {
    let doc: Document<PolicySetResource> = decode(resp)?;
    doc.data.into_policy_set().map_err(RemoteError::Transport)
}

impl RemoteApi for HttpRemote {
    fn create_policy_set(
        &self,
        ctx: &Context,
        organization: &OrganizationName,
        attrs: &PolicySetCreate,
    ) -> Result<PolicySet, RemoteError> {
        let path = format!("/organizations/{organization}/policy-sets");
        let resp = self.send(ctx, "POST", &path, &jsonapi::create_policy_set_body(attrs))?;
        let mut set = policy_set_from(resp)?;
        if set.organization.is_none() {
            set.organization = Some(organization.clone());
        }
        Ok(set)
    }

    fn read_policy_set(&self, ctx: &Context, id: &PolicySetId) -> Result<PolicySet, RemoteError> {
        let query = [("include", "policies,workspaces".to_string())];
        let doc: Document<PolicySetResource> =
            self.fetch(ctx, &format!("/policy-sets/{id}"), &query)?;
        doc.data.into_policy_set().map_err(RemoteError::Transport)
    }

    fn update_policy_set(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        attrs: &PolicySetUpdate,
    ) -> Result<PolicySet, RemoteError> {
        let resp = self.send(
            ctx,
            "PATCH",
            &format!("/policy-sets/{id}"),
            &jsonapi::update_policy_set_body(id, attrs),
        )?;
        policy_set_from(resp)
    }

    fn delete_policy_set(&self, ctx: &Context, id: &PolicySetId) -> Result<(), RemoteError> {
        let url = self.url(&format!("/policy-sets/{id}"));
        self.request(ctx, "DELETE", &url)?
            .call()
            .map_err(|e| classify(ctx, e))?;
        Ok(())
    }

    fn add_policies(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        policies: &BTreeSet<PolicyId>,
    ) -> Result<(), RemoteError> {
        let path = format!("/policy-sets/{id}/relationships/policies");
        self.send(ctx, "POST", &path, &jsonapi::policies_body(policies))?;
        Ok(())
    }

    fn remove_policies(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        policies: &BTreeSet<PolicyId>,
    ) -> Result<(), RemoteError> {
        let path = format!("/policy-sets/{id}/relationships/policies");
        self.send(ctx, "DELETE", &path, &jsonapi::policies_body(policies))?;
        Ok(())
    }

    fn add_workspaces(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        workspaces: &BTreeSet<WorkspaceId>,
    ) -> Result<(), RemoteError> {
        let path = format!("/policy-sets/{id}/relationships/workspaces");
        self.send(ctx, "POST", &path, &jsonapi::workspaces_body(workspaces))?;
        Ok(())
    }

    fn remove_workspaces(
        &self,
        ctx: &Context,
        id: &PolicySetId,
        workspaces: &BTreeSet<WorkspaceId>,
    ) -> Result<(), RemoteError> {
        let path = format!("/policy-sets/{id}/relationships/workspaces");
        self.send(ctx, "DELETE", &path, &jsonapi::workspaces_body(workspaces))?;
        Ok(())
    }

    fn create_policy_set_version(
        &self,
        ctx: &Context,
        id: &PolicySetId,
    ) -> Result<PolicySetVersion, RemoteError> {
        let url = self.url(&format!("/policy-sets/{id}/versions"));
        let resp = self
            .request(ctx, "POST", &url)?
            .call()
            .map_err(|e| classify(ctx, e))?;
        let doc: Document<VersionResource> = decode(resp)?;
        Ok(doc.data.into_version(id))
    }

    fn upload_policy_set_version(
        &self,
        ctx: &Context,
        version: &PolicySetVersion,
        bundle: &Path,
    ) -> Result<(), RemoteError> {
        ctx.check()?;
        let url = version.upload_url.as_deref().ok_or_else(|| {
            RemoteError::Transport(format!("version {} has no upload link", version.id))
        })?;
        let bytes = std::fs::read(bundle).map_err(|source| RemoteError::Io {
            path: bundle.to_path_buf(),
            source,
        })?;

        tracing::debug!(version = %version.id, bytes = bytes.len(), "uploading bundle");
        // Upload links are pre-signed; the API token is not sent.
        let mut req = self
            .agent
            .put(url)
            .set("Content-Type", "application/octet-stream");
        if let Some(remaining) = ctx.remaining() {
            req = req.timeout(remaining);
        }
        req.send_bytes(&bytes).map_err(|e| classify(ctx, e))?;
        Ok(())
    }

    fn list_module_consumers(
        &self,
        ctx: &Context,
        producer: &OrganizationName,
        page: Option<u32>,
    ) -> Result<Page<String>, RemoteError> {
        let path = format!("/admin/organizations/{producer}/relationships/module-consumers");
        let query: Vec<(&str, String)> = page
            .map(|n| ("page[number]", n.to_string()))
            .into_iter()
            .collect();
        let doc: Document<Vec<OrganizationResource>> = self.fetch(ctx, &path, &query)?;
        Ok(jsonapi::consumer_page(doc))
    }

    fn update_module_consumers(
        &self,
        ctx: &Context,
        producer: &OrganizationName,
        consumers: &[String],
    ) -> Result<(), RemoteError> {
        let path = format!("/admin/organizations/{producer}/relationships/module-consumers");
        self.send(ctx, "PATCH", &path, &jsonapi::consumers_body(consumers))?;
        Ok(())
    }
}
