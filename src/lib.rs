//! Bulk mailbox compliance and shared-mailbox permission reconciliation for
//! Microsoft 365 tenants.

pub mod cmd;
pub mod config;
pub mod error;
pub mod graph;
pub mod reconcile;

pub use error::{Error, Result};
