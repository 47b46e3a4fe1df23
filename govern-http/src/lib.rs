//! # govern-http
//!
//! [`HttpRemote`] speaks the JSON:API policy set and module-consumer
//! endpoints over blocking HTTP. HTTP 404 becomes
//! [`RemoteError::NotFound`](govern_reconcile::RemoteError::NotFound); other
//! error statuses become `Rejected` with the server's error details.

pub mod client;
pub mod jsonapi;

pub use client::{ClientConfig, HttpRemote, DEFAULT_ADDRESS};
