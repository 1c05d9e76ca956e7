//! `TwinStore`: the external collaborator that executes cypher/SQL against
//! the graph. Out of scope per spec §1 — only the interface lives here; the
//! job engines in `cdc-jobs` call through it.

use crate::error::CdcError;
use async_trait::async_trait;
use serde_json::Value;

/// A batch of raw ND-JSON lines pulled straight from the import stream,
/// passed through uninterpreted so the store can apply its own validation.
pub type RawLines = Vec<String>;

#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait TwinStore: Send + Sync {
    /// Flushes the whole Models section in one call, since DTDL models may
    /// reference each other (§4.9).
    async fn create_models(&self, graph_name: &str, models: RawLines) -> Result<u64, CdcError>;

    /// Creates or replaces up to `BatchSize` twins per call.
    async fn create_or_replace_twins_batch(
        &self,
        graph_name: &str,
        twins: RawLines,
    ) -> Result<u64, CdcError>;

    async fn create_or_replace_relationships_batch(
        &self,
        graph_name: &str,
        relationships: RawLines,
    ) -> Result<u64, CdcError>;

    /// Pulls up to `limit` relationships for the delete engine's
    /// Relationships phase.
    async fn fetch_relationships_batch(
        &self,
        graph_name: &str,
        limit: usize,
    ) -> Result<Vec<Value>, CdcError>;

    async fn fetch_twins_batch(&self, graph_name: &str, limit: usize) -> Result<Vec<Value>, CdcError>;

    async fn fetch_models_batch(&self, graph_name: &str, limit: usize) -> Result<Vec<Value>, CdcError>;

    /// Deletes a single element by id; "already deleted" is swallowed by
    /// the caller, not this trait (§4.9).
    async fn delete_relationship(&self, graph_name: &str, relationship_id: &str) -> Result<(), CdcError>;

    async fn delete_twin(&self, graph_name: &str, twin_id: &str) -> Result<(), CdcError>;

    async fn delete_model(&self, graph_name: &str, model_id: &str) -> Result<(), CdcError>;
}
