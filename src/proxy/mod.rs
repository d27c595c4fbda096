//! Proxy subsystem.
//!
//! ```text
//! ContainerRecord
//!     → nat::extract            (front port → NAT records)
//!     → model::build            (backends + frontends keyed "<image>:<port>")
//!     → reconciler::Reconciler  (merge with live state, put/delete)
//!     → ControlPlane            (aqueduct REST API)
//! ```

use async_trait::async_trait;

use crate::error::ProxyError;
use crate::types::ContainerRecord;

pub mod aqueduct;
pub mod model;
pub mod reconciler;

#[cfg(test)]
pub mod fake;

pub use aqueduct::AqueductClient;
pub use model::{Backend, Frontend};
pub use reconciler::Reconciler;

/// Converges proxy state to the container records found in the store.
#[async_trait]
pub trait Proxy: Send + Sync {
    /// A container record was created or updated.
    async fn container_updated(&self, record: &ContainerRecord);
    /// A container record was removed; `record` is its last known value.
    async fn container_removed(&self, record: &ContainerRecord);
}

/// The subset of the proxy control plane needed for reconciliation.
///
/// Deleting an object that does not exist is not an error.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_backend(&self, key: &str) -> Result<Option<Backend>, ProxyError>;
    async fn put_backend(&self, key: &str, backend: &Backend) -> Result<(), ProxyError>;
    async fn delete_backend(&self, key: &str) -> Result<(), ProxyError>;
    async fn put_frontend(&self, key: &str, frontend: &Frontend) -> Result<(), ProxyError>;
    async fn delete_frontend(&self, key: &str) -> Result<(), ProxyError>;
}
