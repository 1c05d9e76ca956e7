//! Checkpoint types for the import and delete job engines (§3, §4.9).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ImportSection {
    None,
    Header,
    Models,
    Twins,
    Relationships,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportCheckpoint {
    pub job_id: String,
    pub current_section: ImportSection,
    /// 1-based line number within the input stream.
    pub line_number: u64,
    pub models_processed: u64,
    pub twins_processed: u64,
    pub relationships_processed: u64,
    pub error_count: u64,
    /// Raw JSON lines accumulated for the Models section, flushed in one
    /// call to `TwinStore::create_models` at section end.
    pub pending_models: Vec<String>,
    /// Lines buffered for the current twin batch, not yet flushed to
    /// `TwinStore`. Persisted in the checkpoint (rather than kept in a local
    /// variable) so a periodic checkpoint landing mid-batch still resumes
    /// from exactly where it left off instead of skipping unflushed lines.
    #[serde(default)]
    pub pending_twins: Vec<String>,
    /// Same as `pending_twins`, for the Relationships section.
    #[serde(default)]
    pub pending_relationships: Vec<String>,
    pub models_completed: bool,
    pub twins_completed: bool,
    pub relationships_completed: bool,
}

impl ImportCheckpoint {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            current_section: ImportSection::None,
            line_number: 0,
            models_processed: 0,
            twins_processed: 0,
            relationships_processed: 0,
            error_count: 0,
            pending_models: Vec::new(),
            pending_twins: Vec::new(),
            pending_relationships: Vec::new(),
            models_completed: false,
            twins_completed: false,
            relationships_completed: false,
        }
    }

    pub fn total_created(&self) -> u64 {
        self.models_processed + self.twins_processed + self.relationships_processed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DeleteSection {
    Relationships,
    Twins,
    Models,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCheckpoint {
    pub job_id: String,
    pub current_section: DeleteSection,
    pub relationships_completed: bool,
    pub twins_completed: bool,
    pub models_completed: bool,
    pub relationships_deleted: u64,
    pub twins_deleted: u64,
    pub models_deleted: u64,
    pub error_count: u64,
}

impl DeleteCheckpoint {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            current_section: DeleteSection::Relationships,
            relationships_completed: false,
            twins_completed: false,
            models_completed: false,
            relationships_deleted: 0,
            twins_deleted: 0,
            models_deleted: 0,
            error_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_checkpoint_totals_across_sections() {
        let mut checkpoint = ImportCheckpoint::new("job-1");
        checkpoint.models_processed = 2;
        checkpoint.twins_processed = 120;
        checkpoint.relationships_processed = 60;
        assert_eq!(checkpoint.total_created(), 182);
    }

    #[test]
    fn delete_checkpoint_starts_at_relationships() {
        let checkpoint = DeleteCheckpoint::new("job-1");
        assert_eq!(checkpoint.current_section, DeleteSection::Relationships);
        assert!(!checkpoint.relationships_completed);
    }
}
