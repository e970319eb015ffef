//! Bank: lease-coordinated key/value storage
//!
//! A [`Bank`] is the logical root of a key/value namespace over one storage
//! backend plugin. [`BankSection`]s are normalized key-prefix views of a
//! bank (or of another section), optionally read-only; checkpoints and
//! per-resource artifacts are persisted through them.

mod backend;
mod lease;
mod memory;

pub use backend::{BankPlugin, LeasePlugin, SortDir};
pub use lease::{LeaseConfig, LeaseKeeper};
pub use memory::MemoryBankPlugin;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Errors from Bank operations and backends
#[derive(Error, Debug)]
pub enum BankError {
    /// Key failed validation (empty, `..`, or otherwise malformed)
    #[error("Invalid bank key: {0}")]
    InvalidKey(String),

    /// Write attempted through a read-only section
    #[error("Write access attempted on a read-only bank section: {0}")]
    ReadOnly(String),

    /// No object stored under the key
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The key already holds an object
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    /// Backend-side failure (connection, serialization, ...)
    #[error("Bank backend error: {0}")]
    Backend(String),

    /// Lease could not be acquired or renewed
    #[error("Lease error: {0}")]
    Lease(String),
}

/// Normalize a key into POSIX absolute-path form.
///
/// Repeated slashes collapse, a leading `/` is forced, and a trailing `/`
/// is dropped (except for the root itself). Empty keys and any `..` segment
/// are rejected.
pub fn normalize_key(key: &str) -> Result<String, BankError> {
    if key.is_empty() {
        return Err(BankError::InvalidKey("empty key".to_string()));
    }

    let mut segments = Vec::new();
    for segment in key.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(BankError::InvalidKey(format!(
                    "'..' is not allowed in keys: {key}"
                )))
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Logical root of a key/value namespace over one backend plugin
#[derive(Clone)]
pub struct Bank {
    plugin: Arc<dyn BankPlugin>,
}

impl Bank {
    /// Wrap a backend plugin
    pub fn new(plugin: Arc<dyn BankPlugin>) -> Self {
        Self { plugin }
    }

    /// Owner id of the underlying backend connection
    pub fn owner_id(&self) -> &str {
        self.plugin.owner_id()
    }

    /// Store a new object
    pub async fn create_object(&self, key: &str, value: Value) -> Result<(), BankError> {
        self.plugin.create_object(&normalize_key(key)?, value).await
    }

    /// Store or overwrite an object
    pub async fn update_object(&self, key: &str, value: Value) -> Result<(), BankError> {
        self.plugin.update_object(&normalize_key(key)?, value).await
    }

    /// Fetch an object
    pub async fn get_object(&self, key: &str) -> Result<Value, BankError> {
        self.plugin.get_object(&normalize_key(key)?).await
    }

    /// Remove an object
    pub async fn delete_object(&self, key: &str) -> Result<(), BankError> {
        self.plugin.delete_object(&normalize_key(key)?).await
    }

    /// List keys under a prefix with pagination
    pub async fn list_objects(
        &self,
        prefix: &str,
        limit: Option<usize>,
        marker: Option<&str>,
        sort_dir: SortDir,
    ) -> Result<Vec<String>, BankError> {
        let marker = match marker {
            Some(m) => Some(normalize_key(m)?),
            None => None,
        };
        self.plugin
            .list_objects(&normalize_key(prefix)?, limit, marker.as_deref(), sort_dir)
            .await
    }

    /// Bind a writable (or read-only) prefix view of this bank
    pub fn get_sub_section(&self, prefix: &str, is_writable: bool) -> Result<BankSection, BankError> {
        Ok(BankSection {
            bank: self.clone(),
            prefix: normalize_key(prefix)?,
            is_writable,
        })
    }
}

/// A prefix-scoped, optionally read-only view into a [`Bank`]
#[derive(Clone)]
pub struct BankSection {
    bank: Bank,
    prefix: String,
    is_writable: bool,
}

impl BankSection {
    /// The section's normalized key prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether writes are permitted through this section
    pub fn is_writable(&self) -> bool {
        self.is_writable
    }

    /// Owner id of the underlying backend connection
    pub fn owner_id(&self) -> &str {
        self.bank.owner_id()
    }

    fn full_key(&self, key: &str) -> Result<String, BankError> {
        normalize_key(&format!("{}/{}", self.prefix, key))
    }

    fn check_writable(&self) -> Result<(), BankError> {
        if self.is_writable {
            Ok(())
        } else {
            Err(BankError::ReadOnly(self.prefix.clone()))
        }
    }

    /// Bind a nested section under this one.
    ///
    /// A read-only section never yields a writable child.
    pub fn get_sub_section(&self, prefix: &str, is_writable: bool) -> Result<BankSection, BankError> {
        if is_writable && !self.is_writable {
            return Err(BankError::ReadOnly(self.prefix.clone()));
        }
        Ok(BankSection {
            bank: self.bank.clone(),
            prefix: self.full_key(prefix)?,
            is_writable,
        })
    }

    /// Store a new object under the section prefix
    pub async fn create_object(&self, key: &str, value: Value) -> Result<(), BankError> {
        self.check_writable()?;
        self.bank.create_object(&self.full_key(key)?, value).await
    }

    /// Store or overwrite an object under the section prefix
    pub async fn update_object(&self, key: &str, value: Value) -> Result<(), BankError> {
        self.check_writable()?;
        self.bank.update_object(&self.full_key(key)?, value).await
    }

    /// Fetch an object under the section prefix
    pub async fn get_object(&self, key: &str) -> Result<Value, BankError> {
        self.bank.get_object(&self.full_key(key)?).await
    }

    /// Remove an object under the section prefix
    pub async fn delete_object(&self, key: &str) -> Result<(), BankError> {
        self.check_writable()?;
        self.bank.delete_object(&self.full_key(key)?).await
    }

    /// List keys under the section (optionally under a further sub-prefix),
    /// returned with the section's own prefix stripped.
    pub async fn list_objects(
        &self,
        prefix: Option<&str>,
        limit: Option<usize>,
        marker: Option<&str>,
        sort_dir: SortDir,
    ) -> Result<Vec<String>, BankError> {
        let full_prefix = match prefix {
            Some(p) => self.full_key(p)?,
            None => self.prefix.clone(),
        };
        let full_marker = match marker {
            Some(m) => Some(self.full_key(m)?),
            None => None,
        };

        let keys = self
            .bank
            .list_objects(&full_prefix, limit, full_marker.as_deref(), sort_dir)
            .await?;

        let strip = format!("{}/", self.prefix);
        Ok(keys
            .into_iter()
            .map(|k| match k.strip_prefix(&strip) {
                Some(rest) => rest.to_string(),
                None => k,
            })
            .collect())
    }
}
