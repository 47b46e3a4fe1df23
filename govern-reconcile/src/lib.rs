//! # govern-reconcile
//!
//! Converges remote policy sets and organization module sharing onto
//! declared state.
//!
//! - [`policy_set::reconcile`] / [`module_sharing::reconcile`] drive one
//!   resource through its step protocol against any [`RemoteApi`].
//! - [`pipeline`] runs a whole [`Manifest`](govern_core::Manifest) against a
//!   [`StateFile`](govern_core::StateFile): plan, apply, refresh, destroy.
//! - [`mock::InMemoryRemote`] is a recording remote for tests.

pub mod action;
pub mod context;
pub mod diff;
pub mod error;
pub mod mock;
pub mod module_sharing;
pub mod pagination;
pub mod pipeline;
pub mod policy_set;
pub mod reader;
pub mod remote;
pub mod version;

pub use action::Action;
pub use context::Context;
pub use diff::{diff_sets, SetDiff};
pub use error::{Operation, PipelineError, ReconcileError, RemoteError};
pub use pagination::collect_pages;
pub use pipeline::{ChangeKind, PlannedChange, ResourceReport};
pub use remote::{Page, PolicySetCreate, PolicySetUpdate, RemoteApi};
