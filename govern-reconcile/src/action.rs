//! Remote mutations performed by a reconcile, for reporting.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use govern_core::{PolicyId, PolicySetId, PolicySetVersionId, WorkspaceId};

/// One mutation a reconciler issued against the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    CreatedPolicySet { id: PolicySetId },
    /// An existing policy set was adopted into state; nothing was mutated.
    ImportedPolicySet { id: PolicySetId },
    UploadedVersion { version: PolicySetVersionId },
    /// Workspaces detached because the set became global.
    DetachedForGlobal { workspaces: BTreeSet<WorkspaceId> },
    UpdatedPolicySet,
    AddedPolicies { policies: BTreeSet<PolicyId> },
    RemovedPolicies { policies: BTreeSet<PolicyId> },
    AttachedWorkspaces { workspaces: BTreeSet<WorkspaceId> },
    DetachedWorkspaces { workspaces: BTreeSet<WorkspaceId> },
    DeletedPolicySet { id: PolicySetId },
    ReplacedConsumers { consumers: BTreeSet<String> },
    DisabledSharing,
    /// The object was already gone; local record cleared.
    Forgotten,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::CreatedPolicySet { id } => write!(f, "created policy set {id}"),
            Action::ImportedPolicySet { id } => write!(f, "imported policy set {id}"),
            Action::UploadedVersion { version } => write!(f, "uploaded version {version}"),
            Action::DetachedForGlobal { workspaces } => {
                write!(f, "detached {} workspace(s) before going global", workspaces.len())
            }
            Action::UpdatedPolicySet => write!(f, "updated attributes"),
            Action::AddedPolicies { policies } => write!(f, "added {}", join(policies)),
            Action::RemovedPolicies { policies } => write!(f, "removed {}", join(policies)),
            Action::AttachedWorkspaces { workspaces } => write!(f, "attached {}", join(workspaces)),
            Action::DetachedWorkspaces { workspaces } => write!(f, "detached {}", join(workspaces)),
            Action::DeletedPolicySet { id } => write!(f, "deleted policy set {id}"),
            Action::ReplacedConsumers { consumers } if consumers.is_empty() => {
                write!(f, "cleared module consumers")
            }
            Action::ReplacedConsumers { consumers } => {
                write!(f, "set module consumers to {}", join(consumers))
            }
            Action::DisabledSharing => write!(f, "disabled module sharing"),
            Action::Forgotten => write!(f, "already gone; forgotten"),
        }
    }
}

fn join<T: fmt::Display>(items: &BTreeSet<T>) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
