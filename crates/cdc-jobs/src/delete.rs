//! C9 delete engine: three checkpointed phases (Relationships → Twins →
//! Models), each repeatedly pulling a batch from `TwinStore` and deleting
//! every element in it.

use crate::job_store::JobLeaseStore;
use cdc_core::config::JobsConfig;
use cdc_core::model::{DeleteCheckpoint, DeleteSection, JobStatus};
use cdc_core::{CdcError, TwinStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct DeleteEngine {
    job_store: Arc<dyn JobLeaseStore>,
    twin_store: Arc<dyn TwinStore>,
    config: JobsConfig,
}

impl DeleteEngine {
    pub fn new(job_store: Arc<dyn JobLeaseStore>, twin_store: Arc<dyn TwinStore>, config: JobsConfig) -> Self {
        Self { job_store, twin_store, config }
    }

    pub async fn run(
        &self,
        graph_name: &str,
        job_id: &str,
        cancellation: CancellationToken,
    ) -> Result<JobStatus, CdcError> {
        let lease_lost = Arc::new(AtomicBool::new(false));
        let heartbeat = self.spawn_heartbeat(graph_name, job_id, cancellation.clone(), lease_lost.clone());
        let result = self.run_inner(graph_name, job_id, &cancellation, &lease_lost).await;
        heartbeat.abort();
        result
    }

    fn spawn_heartbeat(
        &self,
        graph_name: &str,
        job_id: &str,
        cancellation: CancellationToken,
        lease_lost: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let job_store = self.job_store.clone();
        let graph_name = graph_name.to_string();
        let job_id = job_id.to_string();
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match job_store.renew(&graph_name, &job_id) {
                    Ok(true) => {}
                    Ok(false) => {
                        lease_lost.store(true, Ordering::SeqCst);
                        cancellation.cancel();
                        return;
                    }
                    Err(error) => tracing::warn!(error = %error, job_id, "heartbeat renew failed"),
                }
                match job_store.job_status(&graph_name, &job_id) {
                    Ok(Some(JobStatus::Cancelling)) => {
                        cancellation.cancel();
                        return;
                    }
                    Ok(_) => {}
                    Err(error) => tracing::warn!(error = %error, job_id, "heartbeat status check failed"),
                }
            }
        })
    }

    async fn run_inner(
        &self,
        graph_name: &str,
        job_id: &str,
        cancellation: &CancellationToken,
        lease_lost: &AtomicBool,
    ) -> Result<JobStatus, CdcError> {
        let mut checkpoint = match self.job_store.load_checkpoint_value(graph_name, job_id)? {
            Some(value) => serde_json::from_value(value)?,
            None => DeleteCheckpoint::new(job_id),
        };

        if checkpoint.current_section == DeleteSection::Relationships && !checkpoint.relationships_completed {
            if self.run_relationships_phase(graph_name, job_id, &mut checkpoint, cancellation).await? {
                return self.finish(graph_name, job_id, &checkpoint, lease_lost, cancellation);
            }
            checkpoint.current_section = DeleteSection::Twins;
            self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(&checkpoint)?)?;
        }

        if checkpoint.current_section == DeleteSection::Twins && !checkpoint.twins_completed {
            if self.run_twins_phase(graph_name, job_id, &mut checkpoint, cancellation).await? {
                return self.finish(graph_name, job_id, &checkpoint, lease_lost, cancellation);
            }
            checkpoint.current_section = DeleteSection::Models;
            self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(&checkpoint)?)?;
        }

        if checkpoint.current_section == DeleteSection::Models && !checkpoint.models_completed {
            if self.run_models_phase(graph_name, job_id, &mut checkpoint, cancellation).await? {
                return self.finish(graph_name, job_id, &checkpoint, lease_lost, cancellation);
            }
            checkpoint.current_section = DeleteSection::Completed;
            self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(&checkpoint)?)?;
        }

        self.finish(graph_name, job_id, &checkpoint, lease_lost, cancellation)
    }

    /// Returns `Ok(true)` if the caller should stop early (cancelled or
    /// lease lost) without flipping the phase's `*_completed` flag.
    async fn run_relationships_phase(
        &self,
        graph_name: &str,
        job_id: &str,
        checkpoint: &mut DeleteCheckpoint,
        cancellation: &CancellationToken,
    ) -> Result<bool, CdcError> {
        loop {
            if cancellation.is_cancelled() {
                return Ok(true);
            }
            let batch = self.twin_store.fetch_relationships_batch(graph_name, self.config.batch_size).await?;
            if batch.is_empty() {
                checkpoint.relationships_completed = true;
                return Ok(false);
            }
            for relationship in &batch {
                let id = relationship.get("$relationshipId").and_then(|v| v.as_str()).unwrap_or_default();
                if let Err(error) = self.twin_store.delete_relationship(graph_name, id).await {
                    if is_already_deleted(&error) {
                        continue;
                    }
                    checkpoint.error_count += 1;
                    tracing::warn!(error = %error, id, "failed to delete relationship");
                    continue;
                }
                checkpoint.relationships_deleted += 1;
            }
            self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(&*checkpoint)?)?;
        }
    }

    async fn run_twins_phase(
        &self,
        graph_name: &str,
        job_id: &str,
        checkpoint: &mut DeleteCheckpoint,
        cancellation: &CancellationToken,
    ) -> Result<bool, CdcError> {
        loop {
            if cancellation.is_cancelled() {
                return Ok(true);
            }
            let batch = self.twin_store.fetch_twins_batch(graph_name, self.config.batch_size).await?;
            if batch.is_empty() {
                checkpoint.twins_completed = true;
                return Ok(false);
            }
            for twin in &batch {
                let id = twin.get("$dtId").and_then(|v| v.as_str()).unwrap_or_default();
                if let Err(error) = self.twin_store.delete_twin(graph_name, id).await {
                    if is_already_deleted(&error) {
                        continue;
                    }
                    checkpoint.error_count += 1;
                    tracing::warn!(error = %error, id, "failed to delete twin");
                    continue;
                }
                checkpoint.twins_deleted += 1;
            }
            self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(&*checkpoint)?)?;
        }
    }

    async fn run_models_phase(
        &self,
        graph_name: &str,
        job_id: &str,
        checkpoint: &mut DeleteCheckpoint,
        cancellation: &CancellationToken,
    ) -> Result<bool, CdcError> {
        loop {
            if cancellation.is_cancelled() {
                return Ok(true);
            }
            let batch = self.twin_store.fetch_models_batch(graph_name, self.config.batch_size).await?;
            if batch.is_empty() {
                checkpoint.models_completed = true;
                return Ok(false);
            }
            for model in &batch {
                let id = model.get("@id").and_then(|v| v.as_str()).unwrap_or_default();
                if let Err(error) = self.twin_store.delete_model(graph_name, id).await {
                    if is_already_deleted(&error) {
                        continue;
                    }
                    checkpoint.error_count += 1;
                    tracing::warn!(error = %error, id, "failed to delete model");
                    continue;
                }
                checkpoint.models_deleted += 1;
            }
            self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(&*checkpoint)?)?;
        }
    }

    fn finish(
        &self,
        graph_name: &str,
        job_id: &str,
        checkpoint: &DeleteCheckpoint,
        lease_lost: &AtomicBool,
        cancellation: &CancellationToken,
    ) -> Result<JobStatus, CdcError> {
        if lease_lost.load(Ordering::SeqCst) {
            return Err(CdcError::LeaseLost { job_id: job_id.to_string() });
        }
        if cancellation.is_cancelled() {
            self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(checkpoint)?)?;
            return Ok(JobStatus::Cancelled);
        }

        let total_deleted = checkpoint.relationships_deleted + checkpoint.twins_deleted + checkpoint.models_deleted;
        let status = if checkpoint.error_count > 0 && total_deleted == 0 {
            JobStatus::Failed
        } else if checkpoint.error_count > 0 {
            JobStatus::PartiallySucceeded
        } else {
            JobStatus::Succeeded
        };

        if status == JobStatus::Succeeded || status == JobStatus::PartiallySucceeded {
            self.job_store.clear_checkpoint(graph_name, job_id)?;
        } else {
            self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(checkpoint)?)?;
        }
        Ok(status)
    }
}

/// §4.9: "already deleted" faults are swallowed rather than counted as
/// errors. `TwinStore` is an external collaborator (out of scope per
/// spec §1), so this matches on the error message rather than a typed
/// variant.
fn is_already_deleted(error: &CdcError) -> bool {
    error.to_string().to_lowercase().contains("not found") || error.to_string().to_lowercase().contains("already deleted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::fakes::InMemoryJobLeaseStore;
    use cdc_core::MockTwinStore;
    use serde_json::json;

    fn config() -> JobsConfig {
        JobsConfig {
            batch_size: 10,
            checkpoint_interval_lines: 50,
            heartbeat_interval: std::time::Duration::from_secs(3600),
            lease_duration: std::time::Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn deletes_in_phase_order_and_swallows_not_found() {
        let mut store = MockTwinStore::new();
        store.expect_fetch_relationships_batch().times(1).returning(|_, _| Ok(vec![json!({"$relationshipId": "r1"})]));
        store.expect_delete_relationship().times(1).returning(|_, _| Ok(()));
        store.expect_fetch_relationships_batch().returning(|_, _| Ok(vec![]));

        store.expect_fetch_twins_batch().times(1).returning(|_, _| Ok(vec![json!({"$dtId": "t1"})]));
        store
            .expect_delete_twin()
            .times(1)
            .returning(|_, _| Err(CdcError::database_error("twin not found")));
        store.expect_fetch_twins_batch().returning(|_, _| Ok(vec![]));

        store.expect_fetch_models_batch().returning(|_, _| Ok(vec![]));

        let twin_store: Arc<dyn TwinStore> = Arc::new(store);
        let job_store: Arc<dyn JobLeaseStore> = Arc::new(InMemoryJobLeaseStore::new());
        let engine = DeleteEngine::new(job_store, twin_store, config());
        let status = engine.run_inner("factory-a", "job-1", &CancellationToken::new(), &AtomicBool::new(false)).await.unwrap();
        assert_eq!(status, JobStatus::Succeeded);
    }

    #[test]
    fn already_deleted_is_recognized_from_the_error_message() {
        assert!(is_already_deleted(&CdcError::database_error("twin not found")));
        assert!(!is_already_deleted(&CdcError::database_error("connection refused")));
    }
}
