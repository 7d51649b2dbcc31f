use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Imported,
    FileNotFound,
    HeaderNotFound,
    TopicNotFound,
    /// Datapoint rows were found but none was accepted.
    NoDatapoints,
    ReadFailed,
    WriteFailed,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Imported => "imported",
            Self::FileNotFound => "file_not_found",
            Self::HeaderNotFound => "header_not_found",
            Self::TopicNotFound => "topic_not_found",
            Self::NoDatapoints => "no_datapoints",
            Self::ReadFailed => "read_failed",
            Self::WriteFailed => "write_failed",
        }
    }

    /// Statuses that skip the file without counting an error.
    pub fn is_skip(self) -> bool {
        matches!(
            self,
            Self::FileNotFound | Self::HeaderNotFound | Self::TopicNotFound | Self::NoDatapoints
        )
    }
}

/// Outcome of loading one topic file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub topic_code: String,
    pub filename: String,
    pub status: FileStatus,
    pub data_start_row: Option<usize>,
    pub rows_seen: usize,
    pub created: usize,
    pub skipped: usize,
    pub errors: usize,
    pub skip_reasons: BTreeMap<String, usize>,
    pub error_detail: Option<String>,
}

impl FileReport {
    pub fn new(topic_code: &str, filename: &str) -> Self {
        Self {
            topic_code: topic_code.to_string(),
            filename: filename.to_string(),
            status: FileStatus::Imported,
            data_start_row: None,
            rows_seen: 0,
            created: 0,
            skipped: 0,
            errors: 0,
            skip_reasons: BTreeMap::new(),
            error_detail: None,
        }
    }
}

/// Run-wide counters. Observational only: nothing branches on them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportStats {
    pub files_total: usize,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub records_created: usize,
    pub records_skipped: usize,
    pub errors: usize,
    pub skip_reasons: BTreeMap<String, usize>,
}

impl ImportStats {
    pub fn record_skip(&mut self, reason: &str) {
        *self.skip_reasons.entry(reason.to_string()).or_default() += 1;
    }

    pub fn absorb(&mut self, report: &FileReport) {
        self.files_total += 1;
        self.records_created += report.created;
        self.records_skipped += report.skipped;
        self.errors += report.errors;

        if report.created > 0 {
            self.files_processed += 1;
        }
        if report.status.is_skip() {
            self.files_skipped += 1;
            self.record_skip(report.status.as_str());
        }
        for (reason, count) in &report.skip_reasons {
            *self.skip_reasons.entry(reason.clone()).or_default() += count;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceHash {
    pub filename: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub db_path: String,
    pub csv_dir: String,
    pub version_code: String,
    pub version_id: String,
    pub on_conflict: String,
    pub stats: ImportStats,
    pub files: Vec<FileReport>,
    pub source_hashes: Vec<SourceHash>,
    pub warnings: Vec<String>,
}
