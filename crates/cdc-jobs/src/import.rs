//! C9 import engine: a resumable, section-aware ND-JSON importer that
//! drives `TwinStore` in batches and checkpoints its progress so another
//! process can resume after a crash or lease handoff.

use crate::job_store::JobLeaseStore;
use cdc_core::config::JobsConfig;
use cdc_core::model::{ImportCheckpoint, ImportSection, JobStatus};
use cdc_core::{CdcError, TwinStore};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

const REQUIRED_FILE_VERSION: &str = "1.0.0";
/// §4.9: a single reopen attempt after this delay when the store reports
/// the connection is down, before treating it as a non-fatal
/// `DatabaseConnectivity` fault that leaves the job resumable.
const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(60);

pub struct ImportEngine {
    job_store: Arc<dyn JobLeaseStore>,
    twin_store: Arc<dyn TwinStore>,
    config: JobsConfig,
}

struct SectionMarker {
    section: ImportSection,
}

fn parse_section_marker(line: &Value) -> Option<SectionMarker> {
    let name = line.get("Section")?.as_str()?;
    let section = match name {
        "Header" => ImportSection::Header,
        "Models" => ImportSection::Models,
        "Twins" => ImportSection::Twins,
        "Relationships" => ImportSection::Relationships,
        _ => return None,
    };
    Some(SectionMarker { section })
}

impl ImportEngine {
    pub fn new(job_store: Arc<dyn JobLeaseStore>, twin_store: Arc<dyn TwinStore>, config: JobsConfig) -> Self {
        Self { job_store, twin_store, config }
    }

    /// Runs the import to completion (or until cancelled / the lease is
    /// lost). Returns the job's terminal status; the caller is responsible
    /// for persisting it via `JobStore::set_status`.
    pub async fn run(
        &self,
        graph_name: &str,
        job_id: &str,
        input_path: &Path,
        cancellation: CancellationToken,
    ) -> Result<JobStatus, CdcError> {
        let lease_lost = Arc::new(AtomicBool::new(false));
        let heartbeat = self.spawn_heartbeat(graph_name, job_id, cancellation.clone(), lease_lost.clone());

        let result = self.run_inner(graph_name, job_id, input_path, &cancellation, &lease_lost).await;
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
                    Err(error) => {
                        tracing::warn!(error = %error, job_id, "heartbeat renew failed");
                    }
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
        input_path: &Path,
        cancellation: &CancellationToken,
        lease_lost: &AtomicBool,
    ) -> Result<JobStatus, CdcError> {
        let mut checkpoint = match self.job_store.load_checkpoint_value(graph_name, job_id)? {
            Some(value) => serde_json::from_value(value)?,
            None => ImportCheckpoint::new(job_id),
        };
        let resuming = checkpoint.line_number > 0;

        let file = tokio::fs::File::open(input_path)
            .await
            .map_err(|e| CdcError::database_error(format!("opening import file: {e}")))?;
        let mut lines = BufReader::new(file).lines();

        if !resuming {
            self.validate_header(&mut lines).await?;
            checkpoint.line_number = 2;
            checkpoint.current_section = ImportSection::None;
        } else {
            for _ in 0..checkpoint.line_number {
                if lines.next_line().await.map_err(|e| CdcError::database_error(e.to_string()))?.is_none() {
                    break;
                }
            }
        }

        let mut lines_since_checkpoint: u64 = 0;
        let mut database_down = false;

        'lines: while let Some(raw) = lines.next_line().await.map_err(|e| CdcError::database_error(e.to_string()))? {
            checkpoint.line_number += 1;
            if cancellation.is_cancelled() {
                break;
            }
            if raw.trim().is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(error) => {
                    tracing::warn!(error = %error, line = checkpoint.line_number, "skipping malformed import line");
                    checkpoint.error_count += 1;
                    continue;
                }
            };

            if let Some(marker) = parse_section_marker(&value) {
                self.flush_models(graph_name, &mut checkpoint).await?;
                self.flush_twins(graph_name, &mut checkpoint).await?;
                self.flush_relationships(graph_name, &mut checkpoint).await?;
                checkpoint.current_section = marker.section;
                self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(&checkpoint)?)?;
                continue;
            }

            let outcome = match checkpoint.current_section {
                ImportSection::Models => {
                    checkpoint.pending_models.push(raw);
                    Ok(())
                }
                ImportSection::Twins => {
                    checkpoint.pending_twins.push(raw);
                    if checkpoint.pending_twins.len() >= self.config.batch_size {
                        self.flush_twins(graph_name, &mut checkpoint).await
                    } else {
                        Ok(())
                    }
                }
                ImportSection::Relationships => {
                    checkpoint.pending_relationships.push(raw);
                    if checkpoint.pending_relationships.len() >= self.config.batch_size {
                        self.flush_relationships(graph_name, &mut checkpoint).await
                    } else {
                        Ok(())
                    }
                }
                ImportSection::Header | ImportSection::None => {
                    tracing::warn!(line = checkpoint.line_number, "data line outside any section, skipping");
                    Ok(())
                }
            };

            if let Err(error) = outcome {
                if matches!(error, CdcError::DatabaseConnectivity { .. }) {
                    database_down = true;
                    break 'lines;
                }
                tracing::warn!(error = %error, line = checkpoint.line_number, "import line failed");
                checkpoint.error_count += 1;
            }

            lines_since_checkpoint += 1;
            if lines_since_checkpoint >= self.config.checkpoint_interval_lines {
                lines_since_checkpoint = 0;
                self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(&checkpoint)?)?;
            }
        }

        if database_down {
            tracing::warn!(job_id, "database connectivity lost, leaving job running for resume");
            tokio::time::sleep(RECONNECT_DELAY).await;
            self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(&checkpoint)?)?;
            return Err(CdcError::DatabaseConnectivity { message: "import store unreachable".to_string() });
        }

        if lease_lost.load(Ordering::SeqCst) {
            return Err(CdcError::LeaseLost { job_id: job_id.to_string() });
        }

        if cancellation.is_cancelled() {
            self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(&checkpoint)?)?;
            return Ok(JobStatus::Cancelled);
        }

        self.flush_models(graph_name, &mut checkpoint).await?;
        self.flush_twins(graph_name, &mut checkpoint).await?;
        self.flush_relationships(graph_name, &mut checkpoint).await?;

        let status = if checkpoint.error_count > 0 && checkpoint.total_created() == 0 {
            JobStatus::Failed
        } else if checkpoint.error_count > 0 {
            JobStatus::PartiallySucceeded
        } else {
            JobStatus::Succeeded
        };

        if status == JobStatus::Succeeded || status == JobStatus::PartiallySucceeded {
            self.job_store.clear_checkpoint(graph_name, job_id)?;
        } else {
            self.job_store.save_checkpoint(graph_name, job_id, &serde_json::to_value(&checkpoint)?)?;
        }

        Ok(status)
    }

    async fn validate_header(
        &self,
        lines: &mut tokio::io::Lines<BufReader<tokio::fs::File>>,
    ) -> Result<(), CdcError> {
        let marker_line = lines
            .next_line()
            .await
            .map_err(|e| CdcError::database_error(e.to_string()))?
            .ok_or_else(|| CdcError::ValidationError { message: "empty import file".to_string() })?;
        let marker: Value = serde_json::from_str(&marker_line)?;
        if parse_section_marker(&marker).map(|m| m.section) != Some(ImportSection::Header) {
            return Err(CdcError::ValidationError { message: "import file must start with a Header section".to_string() });
        }

        let version_line = lines
            .next_line()
            .await
            .map_err(|e| CdcError::database_error(e.to_string()))?
            .ok_or_else(|| CdcError::ValidationError { message: "missing header version line".to_string() })?;
        let version: Value = serde_json::from_str(&version_line)?;
        let file_version = version.get("fileVersion").and_then(|v| v.as_str());
        if file_version != Some(REQUIRED_FILE_VERSION) {
            return Err(CdcError::ValidationError {
                message: format!("unsupported fileVersion {:?}, expected {REQUIRED_FILE_VERSION}", file_version),
            });
        }
        Ok(())
    }

    async fn flush_models(
        &self,
        graph_name: &str,
        checkpoint: &mut ImportCheckpoint,
    ) -> Result<(), CdcError> {
        if checkpoint.pending_models.is_empty() {
            checkpoint.models_completed = true;
            return Ok(());
        }
        let models = std::mem::take(&mut checkpoint.pending_models);
        let count = self.twin_store.create_models(graph_name, models).await?;
        checkpoint.models_processed += count;
        checkpoint.models_completed = true;
        Ok(())
    }

    async fn flush_twins(&self, graph_name: &str, checkpoint: &mut ImportCheckpoint) -> Result<(), CdcError> {
        if checkpoint.pending_twins.is_empty() {
            return Ok(());
        }
        let lines = std::mem::take(&mut checkpoint.pending_twins);
        let count = self.twin_store.create_or_replace_twins_batch(graph_name, lines).await?;
        checkpoint.twins_processed += count;
        Ok(())
    }

    async fn flush_relationships(&self, graph_name: &str, checkpoint: &mut ImportCheckpoint) -> Result<(), CdcError> {
        if checkpoint.pending_relationships.is_empty() {
            return Ok(());
        }
        let lines = std::mem::take(&mut checkpoint.pending_relationships);
        let count = self.twin_store.create_or_replace_relationships_batch(graph_name, lines).await?;
        checkpoint.relationships_processed += count;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::fakes::InMemoryJobLeaseStore;
    use cdc_core::MockTwinStore;
    use std::io::Write;

    fn config() -> JobsConfig {
        JobsConfig {
            batch_size: 2,
            checkpoint_interval_lines: 1000,
            heartbeat_interval: std::time::Duration::from_secs(3600),
            lease_duration: std::time::Duration::from_secs(300),
        }
    }

    fn write_ndjson(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn section_marker_recognizes_all_four_sections() {
        assert!(matches!(
            parse_section_marker(&serde_json::json!({"Section": "Header"})).unwrap().section,
            ImportSection::Header
        ));
        assert!(matches!(
            parse_section_marker(&serde_json::json!({"Section": "Twins"})).unwrap().section,
            ImportSection::Twins
        ));
        assert!(parse_section_marker(&serde_json::json!({"foo": "bar"})).is_none());
    }

    #[tokio::test]
    async fn rejects_wrong_file_version() {
        let file = write_ndjson(&[
            r#"{"Section":"Header"}"#,
            r#"{"fileVersion":"2.0.0"}"#,
        ]);
        let store = MockTwinStore::new();
        let twin_store: Arc<dyn TwinStore> = Arc::new(store);
        let job_store: Arc<dyn JobLeaseStore> = Arc::new(InMemoryJobLeaseStore::new());
        let engine = ImportEngine::new(job_store, twin_store, config());
        let result = engine
            .run_inner(
                "factory-a",
                "job-1",
                file.path(),
                &CancellationToken::new(),
                &AtomicBool::new(false),
            )
            .await;
        assert!(matches!(result, Err(CdcError::ValidationError { .. })));
    }

    #[tokio::test]
    async fn imports_twins_in_batches_and_succeeds() {
        let file = write_ndjson(&[
            r#"{"Section":"Header"}"#,
            r#"{"fileVersion":"1.0.0"}"#,
            r#"{"Section":"Twins"}"#,
            r#"{"$dtId":"twin1"}"#,
            r#"{"$dtId":"twin2"}"#,
            r#"{"$dtId":"twin3"}"#,
        ]);
        let mut store = MockTwinStore::new();
        store
            .expect_create_or_replace_twins_batch()
            .times(2)
            .returning(|_graph, lines| Ok(lines.len() as u64));
        let twin_store: Arc<dyn TwinStore> = Arc::new(store);
        let job_store: Arc<dyn JobLeaseStore> = Arc::new(InMemoryJobLeaseStore::new());
        let engine = ImportEngine::new(job_store, twin_store, config());
        let status = engine
            .run_inner(
                "factory-a",
                "job-1",
                file.path(),
                &CancellationToken::new(),
                &AtomicBool::new(false),
            )
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Succeeded);
    }
}
