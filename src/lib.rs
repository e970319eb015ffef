//! # Parasol
//!
//! A cloud-resource protection core: given a set of cloud resources (servers,
//! volumes, networks, shares, ...), Parasol discovers their dependency
//! closure, persists point-in-time backup metadata ("checkpoints") into a
//! pluggable object store, and drives a per-resource, four-phase operation
//! lifecycle (protect/restore/delete/verify) across the dependency graph.
//!
//! ## Overview
//!
//! Resources form an acyclic, shared-node dependency DAG. The graph engine
//! builds that DAG from a child-resolution callback, the flow builder turns
//! it into an executable task DAG (four lifecycle hook-tasks per resource,
//! children ordered against their parents), and the Bank abstraction persists
//! checkpoint metadata through a lease-coordinated storage backend.
//!
//! ## Quick Start
//!
//! ```rust
//! use parasol::bank::{Bank, MemoryBankPlugin};
//! use parasol::checkpoint::{CheckpointCollection, ProtectionPlan};
//! use std::sync::Arc;
//!
//! # async fn example() -> parasol::Result<()> {
//! let bank = Bank::new(Arc::new(MemoryBankPlugin::new("worker-1")));
//! let collection = CheckpointCollection::new(&bank)?;
//!
//! let plan = ProtectionPlan::new("plan-1", "nightly", "provider-1", vec![]);
//! let checkpoint = collection.create("provider-1", &plan, "project-1", None).await?;
//! assert!(collection.get(checkpoint.id()).await.is_ok());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`resource`]: the `Resource` value type and the dependency-graph engine
//! - [`bank`]: lease-coordinated key/value storage (Bank / BankSection)
//! - [`checkpoint`]: versioned checkpoint metadata and indexed listing
//! - [`flow`]: task DAG construction and the revert-capable flow engine
//! - [`protection`]: plugin contracts, registries, and the resource flow builder

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

pub mod bank;
pub mod checkpoint;
pub mod flow;
pub mod protection;
pub mod resource;

/// Result type for Parasol operations
pub type Result<T> = std::result::Result<T, ParasolError>;

/// Main error type for Parasol operations
#[derive(Error, Debug)]
pub enum ParasolError {
    /// Resource graph error (cycles, malformed packed graphs)
    #[error("Graph error: {0}")]
    Graph(#[from] resource::GraphError),

    /// Bank storage error
    #[error("Bank error: {0}")]
    Bank(#[from] bank::BankError),

    /// Checkpoint metadata error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] checkpoint::CheckpointError),

    /// Flow construction or execution error
    #[error("Flow error: {0}")]
    Flow(#[from] flow::FlowError),

    /// Plugin resolution error
    #[error("Protection error: {0}")]
    Protection(#[from] protection::ProtectionError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error for plugin implementations
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
