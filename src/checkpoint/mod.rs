//! Checkpoint metadata and the indexed checkpoint collection
//!
//! A checkpoint is the point-in-time backup record for one protection run:
//! a versioned metadata blob persisted as a single index object inside a
//! dedicated bank section, cross-referenced by three secondary indexes
//! (provider, date, plan) so listings never scan every checkpoint.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::bank::{Bank, BankError, BankSection, SortDir};
use crate::resource::{PackedGraph, Resource};

/// Schema version written into every checkpoint index object
pub const CHECKPOINT_SCHEMA_VERSION: &str = "0.9";

const INDEX_OBJECT: &str = "index.json";

/// Errors from checkpoint persistence and lookup
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint stored under the id
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// The stored index object carries a schema version this build cannot read
    #[error("Unsupported checkpoint schema version: {0}")]
    UnsupportedVersion(String),

    /// Purge refused: per-resource artifacts still live under the section
    #[error("Checkpoint section not empty, refusing to purge: {0}")]
    NotEmpty(String),

    /// Underlying bank failure
    #[error("Checkpoint storage error: {0}")]
    Storage(#[from] BankError),

    /// Index object could not be (de)serialized
    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Lifecycle status of a checkpoint.
///
/// Transitions: `protecting → available | error`;
/// `available → copying → finished | error`;
/// `available | error → deleting → deleted | error-deleting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointStatus {
    /// Protect flow in progress
    #[serde(rename = "protecting")]
    Protecting,
    /// Protect flow finished, checkpoint usable
    #[serde(rename = "available")]
    Available,
    /// Protect flow failed
    #[serde(rename = "error")]
    Error,
    /// Queued for copy to a secondary bank
    #[serde(rename = "wait_copying")]
    WaitCopying,
    /// Copy in progress
    #[serde(rename = "copying")]
    Copying,
    /// Copy finished
    #[serde(rename = "finished")]
    Finished,
    /// Delete flow in progress
    #[serde(rename = "deleting")]
    Deleting,
    /// Delete flow finished
    #[serde(rename = "deleted")]
    Deleted,
    /// Delete flow failed
    #[serde(rename = "error-deleting")]
    ErrorDeleting,
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Protecting => "protecting",
            Self::Available => "available",
            Self::Error => "error",
            Self::WaitCopying => "wait_copying",
            Self::Copying => "copying",
            Self::Finished => "finished",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::ErrorDeleting => "error-deleting",
        };
        f.write_str(s)
    }
}

/// The plan snapshot embedded in a checkpoint record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionPlan {
    /// Plan identifier
    pub id: String,
    /// Human-readable plan name
    pub name: String,
    /// Provider the plan protects through
    pub provider_id: String,
    /// Resources the plan covers (graph roots)
    pub resources: Vec<Resource>,
}

impl ProtectionPlan {
    /// Create a plan snapshot
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider_id: impl Into<String>,
        resources: Vec<Resource>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider_id: provider_id.into(),
            resources,
        }
    }
}

/// The persisted checkpoint index object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Schema version (`"0.9"`)
    pub version: String,
    /// Checkpoint id
    pub id: String,
    /// Lifecycle status
    pub status: CheckpointStatus,
    /// Owner id of the bank connection that created the checkpoint
    pub owner_id: String,
    /// Provider the checkpoint was taken through
    pub provider_id: String,
    /// Project the protected resources belong to
    pub project_id: String,
    /// Plan snapshot, if the checkpoint was created from a plan
    pub protection_plan: Option<ProtectionPlan>,
    /// Packed dependency graph of the protected resources
    pub resource_graph: Option<PackedGraph>,
    /// Free-form metadata (plugins and revert tasks write here)
    pub extra_info: Map<String, Value>,
    /// Creation date, `YYYY-MM-DD`
    pub created_at: String,
    /// Creation time, unix seconds
    pub timestamp: i64,
}

/// A checkpoint bound to its bank section.
///
/// All mutators act on the in-memory record only; nothing reaches storage
/// until [`commit`](Checkpoint::commit) is called.
pub struct Checkpoint {
    section: BankSection,
    indices_section: Option<BankSection>,
    record: CheckpointRecord,
}

impl Checkpoint {
    /// Create a new checkpoint under `checkpoints_section`.
    ///
    /// Generates a v4 uuid when `checkpoint_id` is not supplied, writes the
    /// index object with status `protecting`, and writes the three
    /// secondary-index entries when an indices section is given.
    pub async fn create_in_section(
        checkpoints_section: &BankSection,
        indices_section: Option<&BankSection>,
        provider_id: &str,
        project_id: &str,
        plan: &ProtectionPlan,
        checkpoint_id: Option<&str>,
    ) -> Result<Self, CheckpointError> {
        let id = checkpoint_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();

        let record = CheckpointRecord {
            version: CHECKPOINT_SCHEMA_VERSION.to_string(),
            id: id.clone(),
            status: CheckpointStatus::Protecting,
            owner_id: checkpoints_section.owner_id().to_string(),
            provider_id: provider_id.to_string(),
            project_id: project_id.to_string(),
            protection_plan: Some(plan.clone()),
            resource_graph: None,
            extra_info: Map::new(),
            created_at: now.format("%Y-%m-%d").to_string(),
            timestamp: now.timestamp(),
        };

        let checkpoint = Self {
            section: checkpoints_section.get_sub_section(&id, true)?,
            indices_section: indices_section.cloned(),
            record,
        };
        checkpoint
            .section
            .create_object(INDEX_OBJECT, serde_json::to_value(&checkpoint.record)?)
            .await?;
        checkpoint.write_index_entries().await?;
        debug!(checkpoint_id = %id, provider_id, "checkpoint created");
        Ok(checkpoint)
    }

    /// Load an existing checkpoint from its section
    pub async fn get_by_section(
        checkpoints_section: &BankSection,
        indices_section: Option<&BankSection>,
        checkpoint_id: &str,
    ) -> Result<Self, CheckpointError> {
        let mut checkpoint = Self {
            section: checkpoints_section.get_sub_section(checkpoint_id, true)?,
            indices_section: indices_section.cloned(),
            record: CheckpointRecord {
                version: CHECKPOINT_SCHEMA_VERSION.to_string(),
                id: checkpoint_id.to_string(),
                status: CheckpointStatus::Protecting,
                owner_id: String::new(),
                provider_id: String::new(),
                project_id: String::new(),
                protection_plan: None,
                resource_graph: None,
                extra_info: Map::new(),
                created_at: String::new(),
                timestamp: 0,
            },
        };
        checkpoint.reload_meta_data().await?;
        Ok(checkpoint)
    }

    /// Checkpoint id
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Current in-memory status
    pub fn status(&self) -> CheckpointStatus {
        self.record.status
    }

    /// The full in-memory record
    pub fn record(&self) -> &CheckpointRecord {
        &self.record
    }

    /// Set the in-memory status (not persisted until `commit`)
    pub fn set_status(&mut self, status: CheckpointStatus) {
        self.record.status = status;
    }

    /// Attach the packed resource graph (not persisted until `commit`)
    pub fn set_resource_graph(&mut self, graph: PackedGraph) {
        self.record.resource_graph = Some(graph);
    }

    /// Set one extra-info entry (not persisted until `commit`)
    pub fn set_extra_info(&mut self, key: impl Into<String>, value: Value) {
        self.record.extra_info.insert(key.into(), value);
    }

    /// Writable per-resource artifact section for protection plugins
    pub fn get_resource_bank_section(
        &self,
        resource_id: &str,
    ) -> Result<BankSection, BankError> {
        self.section.get_sub_section(resource_id, true)
    }

    /// Persist the in-memory record back to the index object
    pub async fn commit(&self) -> Result<(), CheckpointError> {
        self.section
            .update_object(INDEX_OBJECT, serde_json::to_value(&self.record)?)
            .await?;
        Ok(())
    }

    /// Re-read the record from storage, replacing in-memory state.
    ///
    /// Fails with [`CheckpointError::NotFound`] when the index object is
    /// gone and [`CheckpointError::UnsupportedVersion`] when the stored
    /// schema version is not readable by this build.
    pub async fn reload_meta_data(&mut self) -> Result<(), CheckpointError> {
        let value = match self.section.get_object(INDEX_OBJECT).await {
            Ok(value) => value,
            Err(BankError::NotFound(_)) => {
                return Err(CheckpointError::NotFound(self.record.id.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let version = value
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if version != CHECKPOINT_SCHEMA_VERSION {
            return Err(CheckpointError::UnsupportedVersion(version));
        }

        self.record = serde_json::from_value(value)?;
        Ok(())
    }

    /// Mark the checkpoint deleted and drop its secondary-index entries
    pub async fn delete(&mut self) -> Result<(), CheckpointError> {
        self.record.status = CheckpointStatus::Deleted;
        self.commit().await?;

        if let Some(indices) = self.indices_section.clone() {
            for key in self.index_keys() {
                match indices.delete_object(&key).await {
                    Ok(()) | Err(BankError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        debug!(checkpoint_id = %self.record.id, "checkpoint deleted");
        Ok(())
    }

    /// Physically remove the index object.
    ///
    /// Refuses with [`CheckpointError::NotEmpty`] while any per-resource
    /// artifact still lives under the checkpoint's section.
    pub async fn purge(&self) -> Result<(), CheckpointError> {
        let keys = self
            .section
            .list_objects(None, None, None, SortDir::Asc)
            .await?;
        let leftovers: Vec<&String> = keys.iter().filter(|k| *k != INDEX_OBJECT).collect();
        if !leftovers.is_empty() {
            return Err(CheckpointError::NotEmpty(self.record.id.clone()));
        }
        if keys.iter().any(|k| k == INDEX_OBJECT) {
            self.section.delete_object(INDEX_OBJECT).await?;
        }
        Ok(())
    }

    fn index_keys(&self) -> Vec<String> {
        let r = &self.record;
        let mut keys = vec![
            format!("/by-provider/{}/{}/{}", r.provider_id, r.timestamp, r.id),
            format!("/by-date/{}/{}/{}", r.created_at, r.timestamp, r.id),
        ];
        if let Some(plan) = &r.protection_plan {
            keys.push(format!(
                "/by-plan/{}/{}/{}/{}",
                plan.id, r.created_at, r.timestamp, r.id
            ));
        }
        keys
    }

    async fn write_index_entries(&self) -> Result<(), CheckpointError> {
        if let Some(indices) = &self.indices_section {
            for key in self.index_keys() {
                indices.update_object(&key, json!(self.record.id)).await?;
            }
        }
        Ok(())
    }
}

/// Filters and pagination for [`CheckpointCollection::list_ids`]
#[derive(Debug, Clone, Default)]
pub struct CheckpointQuery {
    /// Provider to list under (used when no plan filter is given)
    pub provider_id: String,
    /// Maximum ids to return
    pub limit: Option<usize>,
    /// Checkpoint id of the last entry of the previous page
    pub marker: Option<String>,
    /// Restrict to checkpoints created from one plan
    pub plan_id: Option<String>,
    /// Inclusive lower creation-date bound
    pub start_date: Option<NaiveDate>,
    /// Inclusive upper creation-date bound
    pub end_date: Option<NaiveDate>,
    /// Listing order over index keys
    pub sort_dir: SortDir,
}

/// The set of checkpoints stored in one bank, with secondary indexes.
///
/// Owns the `/checkpoints` and `/indices` subsections; index keys are
/// `(provider, timestamp, id)`, `(date, timestamp, id)` and
/// `(plan, date, timestamp, id)` tuples encoded as paths.
pub struct CheckpointCollection {
    checkpoints_section: BankSection,
    indices_section: BankSection,
}

impl CheckpointCollection {
    /// Bind the collection to a bank
    pub fn new(bank: &Bank) -> Result<Self, BankError> {
        Ok(Self {
            checkpoints_section: bank.get_sub_section("/checkpoints", true)?,
            indices_section: bank.get_sub_section("/indices", true)?,
        })
    }

    /// Create a checkpoint for a plan
    pub async fn create(
        &self,
        provider_id: &str,
        plan: &ProtectionPlan,
        project_id: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<Checkpoint, CheckpointError> {
        Checkpoint::create_in_section(
            &self.checkpoints_section,
            Some(&self.indices_section),
            provider_id,
            project_id,
            plan,
            checkpoint_id,
        )
        .await
    }

    /// Load a checkpoint by id
    pub async fn get(&self, checkpoint_id: &str) -> Result<Checkpoint, CheckpointError> {
        Checkpoint::get_by_section(
            &self.checkpoints_section,
            Some(&self.indices_section),
            checkpoint_id,
        )
        .await
    }

    /// List checkpoint ids, ordered and paginated via the secondary indexes.
    ///
    /// A plan filter lists the by-plan index; a date range scans the by-date
    /// index with client-side filtering; otherwise the by-provider index is
    /// listed directly.
    pub async fn list_ids(&self, query: &CheckpointQuery) -> Result<Vec<String>, CheckpointError> {
        if query.plan_id.is_some() {
            self.list_by_plan(query).await
        } else if query.start_date.is_some() || query.end_date.is_some() {
            self.list_by_date(query).await
        } else {
            self.list_by_provider(query).await
        }
    }

    async fn marker_record(
        &self,
        marker: &str,
    ) -> Result<CheckpointRecord, CheckpointError> {
        Ok(self.get(marker).await?.record().clone())
    }

    async fn list_by_plan(&self, query: &CheckpointQuery) -> Result<Vec<String>, CheckpointError> {
        let plan_id = query.plan_id.as_deref().unwrap_or_default();
        let prefix = format!("/by-plan/{plan_id}");
        let marker = match &query.marker {
            Some(id) => {
                let r = self.marker_record(id).await?;
                Some(format!(
                    "{prefix}/{}/{}/{}",
                    r.created_at, r.timestamp, r.id
                ))
            }
            None => None,
        };
        let keys = self
            .indices_section
            .list_objects(Some(&prefix), query.limit, marker.as_deref(), query.sort_dir)
            .await?;
        Ok(keys.iter().filter_map(|k| checkpoint_id_of(k)).collect())
    }

    async fn list_by_provider(
        &self,
        query: &CheckpointQuery,
    ) -> Result<Vec<String>, CheckpointError> {
        let prefix = format!("/by-provider/{}", query.provider_id);
        let marker = match &query.marker {
            Some(id) => {
                let r = self.marker_record(id).await?;
                Some(format!("{prefix}/{}/{}", r.timestamp, r.id))
            }
            None => None,
        };
        let keys = self
            .indices_section
            .list_objects(Some(&prefix), query.limit, marker.as_deref(), query.sort_dir)
            .await?;
        Ok(keys.iter().filter_map(|k| checkpoint_id_of(k)).collect())
    }

    async fn list_by_date(&self, query: &CheckpointQuery) -> Result<Vec<String>, CheckpointError> {
        let marker = match &query.marker {
            Some(id) => {
                let r = self.marker_record(id).await?;
                Some(format!("/by-date/{}/{}/{}", r.created_at, r.timestamp, r.id))
            }
            None => None,
        };
        // Date filtering happens client-side, so the backend gets no limit;
        // the scan short-circuits once enough ids are collected.
        let keys = self
            .indices_section
            .list_objects(Some("/by-date"), None, marker.as_deref(), query.sort_dir)
            .await?;

        let mut ids = Vec::new();
        for key in &keys {
            let date = key
                .trim_start_matches("by-date/")
                .split('/')
                .next()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
            let Some(date) = date else { continue };
            if query.start_date.is_some_and(|start| date < start) {
                continue;
            }
            if query.end_date.is_some_and(|end| date > end) {
                continue;
            }
            if let Some(id) = checkpoint_id_of(key) {
                ids.push(id);
            }
            if query.limit.is_some_and(|limit| ids.len() >= limit) {
                break;
            }
        }
        Ok(ids)
    }
}

fn checkpoint_id_of(index_key: &str) -> Option<String> {
    index_key.rsplit('/').next().map(str::to_string)
}
