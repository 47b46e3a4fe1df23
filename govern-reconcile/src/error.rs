//! Error types for govern-reconcile.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use govern_core::ResourceAddress;

use crate::pipeline::ResourceReport;

/// Failure classification for a single remote call.
///
/// Only `NotFound` carries special meaning to the reconcilers; everything
/// else is surfaced as a reported failure.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The target object does not exist (or no longer exists).
    #[error("resource not found")]
    NotFound,

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The remote refused the request (validation, conflict, permissions).
    #[error("remote rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Connection, TLS, timeout or decoding failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Local I/O while preparing a request (e.g. reading an upload bundle).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound)
    }
}

/// The remote operation a reconcile step was performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
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

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Operation::CreatePolicySet => "create policy set",
            Operation::ReadPolicySet => "read policy set",
            Operation::UpdatePolicySet => "update policy set",
            Operation::DeletePolicySet => "delete policy set",
            Operation::AddPolicies => "add policies",
            Operation::RemovePolicies => "remove policies",
            Operation::AddWorkspaces => "attach workspaces",
            Operation::RemoveWorkspaces => "detach workspaces",
            Operation::CreatePolicySetVersion => "create policy set version",
            Operation::UploadPolicySetVersion => "upload policy set version",
            Operation::ListModuleConsumers => "list module consumers",
            Operation::UpdateModuleConsumers => "update module consumers",
        };
        f.write_str(label)
    }
}

/// Terminal failure of a reconcile invocation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A remote call failed; carries the acting object and the operation.
    #[error("{op} failed for {id}: {source}")]
    Remote {
        id: String,
        op: Operation,
        #[source]
        source: RemoteError,
    },

    /// The object disappeared while it was being mutated.
    #[error("{op} failed for {id}: object no longer exists")]
    Gone { id: String, op: Operation },

    /// The policy bundle could not be read for fingerprinting.
    #[error("failed to read policy bundle at {path}: {source}")]
    Bundle {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An import target is already held by a record.
    #[error("{address} already records policy set {id}")]
    AlreadyRecorded { address: ResourceAddress, id: String },

    #[error("policy set {id} reports no organization; declare it in the manifest")]
    UnknownOrganization { id: String },
}

impl ReconcileError {
    /// `true` when the invocation stopped because its context was
    /// cancelled or its deadline passed.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ReconcileError::Remote {
                source: RemoteError::Cancelled | RemoteError::DeadlineExceeded,
                ..
            }
        )
    }
}

/// A manifest-level run stopped at `address`. Resources before it were
/// processed and are listed in `completed`.
#[derive(Debug, Error)]
#[error("{address}: {source}")]
pub struct PipelineError {
    pub address: ResourceAddress,
    pub completed: Vec<ResourceReport>,
    #[source]
    pub source: ReconcileError,
}

/// Classify a remote failure on a mutation path: NotFound means the object
/// is gone, anything else is reported with its cause.
pub(crate) fn mutation_err(id: impl fmt::Display, op: Operation, err: RemoteError) -> ReconcileError {
    match err {
        RemoteError::NotFound => ReconcileError::Gone {
            id: id.to_string(),
            op,
        },
        source => ReconcileError::Remote {
            id: id.to_string(),
            op,
            source,
        },
    }
}

/// Wrap a remote failure without NotFound reclassification.
pub(crate) fn remote_err(id: impl fmt::Display, op: Operation, source: RemoteError) -> ReconcileError {
    ReconcileError::Remote {
        id: id.to_string(),
        op,
        source,
    }
}
