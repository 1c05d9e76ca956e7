//! The real graph-database client is an external collaborator (spec §1):
//! this binary does not ship one. `UnconfiguredTwinStore` is the explicit
//! placeholder wired in until a deployment supplies its own
//! `Arc<dyn TwinStore>` — every method fails loudly rather than silently
//! no-opping, so a misconfigured deployment is caught on the first call
//! instead of an empty-looking import/delete run.

use async_trait::async_trait;
use cdc_core::twin_store::RawLines;
use cdc_core::{CdcError, TwinStore};
use serde_json::Value;

pub struct UnconfiguredTwinStore;

fn unconfigured() -> CdcError {
    CdcError::internal(
        "no TwinStore is configured; this binary only routes CDC events and runs import/delete \
         jobs against a graph store supplied by the embedding deployment",
    )
}

#[async_trait]
impl TwinStore for UnconfiguredTwinStore {
    async fn create_models(&self, _graph_name: &str, _models: RawLines) -> Result<u64, CdcError> {
        Err(unconfigured())
    }

    async fn create_or_replace_twins_batch(&self, _graph_name: &str, _twins: RawLines) -> Result<u64, CdcError> {
        Err(unconfigured())
    }

    async fn create_or_replace_relationships_batch(
        &self,
        _graph_name: &str,
        _relationships: RawLines,
    ) -> Result<u64, CdcError> {
        Err(unconfigured())
    }

    async fn fetch_relationships_batch(&self, _graph_name: &str, _limit: usize) -> Result<Vec<Value>, CdcError> {
        Err(unconfigured())
    }

    async fn fetch_twins_batch(&self, _graph_name: &str, _limit: usize) -> Result<Vec<Value>, CdcError> {
        Err(unconfigured())
    }

    async fn fetch_models_batch(&self, _graph_name: &str, _limit: usize) -> Result<Vec<Value>, CdcError> {
        Err(unconfigured())
    }

    async fn delete_relationship(&self, _graph_name: &str, _relationship_id: &str) -> Result<(), CdcError> {
        Err(unconfigured())
    }

    async fn delete_twin(&self, _graph_name: &str, _twin_id: &str) -> Result<(), CdcError> {
        Err(unconfigured())
    }

    async fn delete_model(&self, _graph_name: &str, _model_id: &str) -> Result<(), CdcError> {
        Err(unconfigured())
    }
}
