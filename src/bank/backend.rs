//! Storage backend and lease plugin contracts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::BankError;

/// Listing order for [`BankPlugin::list_objects`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDir {
    /// Ascending key order
    #[default]
    Asc,
    /// Descending key order
    Desc,
}

/// Contract a storage backend implements to back a [`Bank`](super::Bank).
///
/// Values are structured JSON documents. A backend that can only store
/// bytes/strings must serialize values itself and record a serialization
/// flag alongside, invisibly to callers. `limit` and `marker` are forwarded
/// opaquely: `marker` is the last key of the previous page, and listing
/// resumes strictly after it in the requested sort order.
#[async_trait]
pub trait BankPlugin: Send + Sync {
    /// Store a new object; fails if the key already exists
    async fn create_object(&self, key: &str, value: Value) -> Result<(), BankError>;

    /// Store or overwrite an object
    async fn update_object(&self, key: &str, value: Value) -> Result<(), BankError>;

    /// Fetch an object, failing with [`BankError::NotFound`] on a miss
    async fn get_object(&self, key: &str) -> Result<Value, BankError>;

    /// List keys under a prefix with pagination
    async fn list_objects(
        &self,
        prefix: &str,
        limit: Option<usize>,
        marker: Option<&str>,
        sort_dir: SortDir,
    ) -> Result<Vec<String>, BankError>;

    /// Remove an object
    async fn delete_object(&self, key: &str) -> Result<(), BankError>;

    /// Stable identifier of the process owning this backend connection
    fn owner_id(&self) -> &str;
}

/// Exclusive-ownership contract for backends shared between worker processes.
///
/// A lease is an owner-tagged, time-bounded marker in the backend. Exactly
/// one worker holds it at a time; the holder renews it on a timer (see
/// [`LeaseKeeper`](super::LeaseKeeper)) and polls `check_lease_validity`
/// before critical writes.
#[async_trait]
pub trait LeasePlugin: Send + Sync {
    /// Write the owner-tagged lease marker with a fresh expiry window
    async fn acquire_lease(&self) -> Result<(), BankError>;

    /// Re-acquire the lease before it expires
    async fn renew_lease(&self) -> Result<(), BankError>;

    /// Whether the remaining validity is still above the configured floor.
    ///
    /// Returns `false` (and may release the marker) once the lease is too
    /// close to expiry to cover another write safely.
    async fn check_lease_validity(&self) -> bool;
}
