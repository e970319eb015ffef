//! In-memory storage backend
//!
//! Backs tests and single-process deployments. Objects live in a sorted map
//! so listings come back in key order; the lease contract is honored with
//! the same marker-object scheme a remote object store would use.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::debug;

use super::backend::{BankPlugin, LeasePlugin, SortDir};
use super::lease::LeaseConfig;
use super::BankError;

struct LeaseState {
    expire_at: Instant,
}

/// In-memory [`BankPlugin`] with lease support
pub struct MemoryBankPlugin {
    owner_id: String,
    objects: RwLock<BTreeMap<String, Value>>,
    lease: Mutex<Option<LeaseState>>,
    lease_config: LeaseConfig,
}

impl MemoryBankPlugin {
    /// Create an empty backend owned by `owner_id`
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            objects: RwLock::new(BTreeMap::new()),
            lease: Mutex::new(None),
            lease_config: LeaseConfig::default(),
        }
    }

    /// Override the lease windows (expiry / renewal / validity floor)
    pub fn with_lease_config(mut self, config: LeaseConfig) -> Self {
        self.lease_config = config;
        self
    }

    fn lease_key(&self) -> String {
        format!("/leases/{}", self.owner_id)
    }

    fn write_lease_marker(&self, expire_window: Duration) {
        let mut lease = self.lease.lock();
        *lease = Some(LeaseState {
            expire_at: Instant::now() + expire_window,
        });
        self.objects.write().insert(
            self.lease_key(),
            json!({
                "owner_id": self.owner_id,
                "expire_window_secs": expire_window.as_secs(),
            }),
        );
    }
}

#[async_trait]
impl BankPlugin for MemoryBankPlugin {
    async fn create_object(&self, key: &str, value: Value) -> Result<(), BankError> {
        let mut objects = self.objects.write();
        if objects.contains_key(key) {
            return Err(BankError::AlreadyExists(key.to_string()));
        }
        objects.insert(key.to_string(), value);
        Ok(())
    }

    async fn update_object(&self, key: &str, value: Value) -> Result<(), BankError> {
        self.objects.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Value, BankError> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| BankError::NotFound(key.to_string()))
    }

    async fn list_objects(
        &self,
        prefix: &str,
        limit: Option<usize>,
        marker: Option<&str>,
        sort_dir: SortDir,
    ) -> Result<Vec<String>, BankError> {
        let objects = self.objects.read();
        let match_prefix = if prefix == "/" {
            "/".to_string()
        } else {
            format!("{prefix}/")
        };

        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(&match_prefix) || *k == prefix)
            .cloned()
            .collect();
        if sort_dir == SortDir::Desc {
            keys.reverse();
        }

        if let Some(marker) = marker {
            // Resume strictly after the marker in the requested order. The
            // comparison is positional, not a lookup: the marker object may
            // have been deleted between pages.
            match sort_dir {
                SortDir::Asc => keys.retain(|k| k.as_str() > marker),
                SortDir::Desc => keys.retain(|k| k.as_str() < marker),
            }
        }
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    async fn delete_object(&self, key: &str) -> Result<(), BankError> {
        self.objects
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BankError::NotFound(key.to_string()))
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

#[async_trait]
impl LeasePlugin for MemoryBankPlugin {
    async fn acquire_lease(&self) -> Result<(), BankError> {
        self.write_lease_marker(self.lease_config.expire_window);
        debug!(owner_id = %self.owner_id, "lease acquired");
        Ok(())
    }

    async fn renew_lease(&self) -> Result<(), BankError> {
        if self.lease.lock().is_none() {
            return Err(BankError::Lease(format!(
                "no lease held by {}",
                self.owner_id
            )));
        }
        self.write_lease_marker(self.lease_config.expire_window);
        debug!(owner_id = %self.owner_id, "lease renewed");
        Ok(())
    }

    async fn check_lease_validity(&self) -> bool {
        let expired = {
            let lease = self.lease.lock();
            match lease.as_ref() {
                Some(state) => {
                    state.expire_at.saturating_duration_since(Instant::now())
                        < self.lease_config.validity_window
                }
                None => return false,
            }
        };

        if expired {
            // Too close to expiry to trust; release the marker.
            *self.lease.lock() = None;
            self.objects.write().remove(&self.lease_key());
            return false;
        }
        true
    }
}
