use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::cli::ConflictPolicy;
use crate::config::SourceFile;
use crate::model::{FileReport, FileStatus};
use crate::source::{DataStartDetector, RowNormalizer, RowOutcome, read_rows};
use crate::store::{QUESTION_TABLE, Record, Store};
use crate::util::now_utc_string;
use crate::versions::VersionRef;

const ROW_ERROR_REASON: &str = "row_error";
const QUESTION_CONFLICT_COLUMNS: &[&str] = &["version_id", "code"];

/// Everything a file load needs besides the file itself.
pub struct LoadContext<'a> {
    pub store: &'a dyn Store,
    pub detector: &'a DataStartDetector,
    /// Topic code to topic id.
    pub topics: &'a HashMap<String, String>,
    pub version: &'a VersionRef,
    pub on_conflict: ConflictPolicy,
}

/// Loads one topic file with a single bulk write. Every failure stays local to
/// the file and is reported through the returned [`FileReport`].
pub fn load_file(ctx: &LoadContext<'_>, source: &SourceFile, path: &Path) -> FileReport {
    let mut report = FileReport::new(&source.topic_code, &source.filename);

    if !path.is_file() {
        warn!(path = %path.display(), "source file not found, skipping");
        report.status = FileStatus::FileNotFound;
        return report;
    }

    let rows = match read_rows(path) {
        Ok(rows) => rows,
        Err(err) => {
            warn!(path = %path.display(), error = %format!("{err:#}"), "failed to read source file");
            report.status = FileStatus::ReadFailed;
            report.errors = 1;
            report.error_detail = Some(format!("{err:#}"));
            return report;
        }
    };

    let Some(data_start) = ctx.detector.find_data_start(&rows) else {
        warn!(path = %path.display(), rows = rows.len(), "no datapoint rows found, skipping");
        report.status = FileStatus::HeaderNotFound;
        return report;
    };
    report.data_start_row = Some(data_start);

    let Some(topic_id) = ctx.topics.get(&source.topic_code) else {
        warn!(topic = %source.topic_code, "topic not found in store, skipping");
        report.status = FileStatus::TopicNotFound;
        return report;
    };

    let normalizer = RowNormalizer::new(topic_id, &ctx.version.id, &ctx.version.effective_date);
    let updated_at = now_utc_string();
    let mut batch = Vec::<Record>::new();

    for (offset, row) in rows[data_start..].iter().enumerate() {
        report.rows_seen += 1;
        match normalizer.normalize(row) {
            RowOutcome::Accepted(draft) => batch.push(match ctx.on_conflict {
                ConflictPolicy::Fail => draft.to_record(),
                ConflictPolicy::Update => draft.to_upsert_record(&updated_at),
            }),
            RowOutcome::Rejected(reason) => {
                report.skipped += 1;
                *report
                    .skip_reasons
                    .entry(reason.as_str().to_string())
                    .or_default() += 1;
            }
            RowOutcome::Failed(err) => {
                debug!(row = data_start + offset, error = %err, "row normalization failed");
                report.skipped += 1;
                report.errors += 1;
                *report
                    .skip_reasons
                    .entry(ROW_ERROR_REASON.to_string())
                    .or_default() += 1;
            }
        }
    }

    if batch.is_empty() {
        warn!(file = %source.filename, skipped = report.skipped, "every row was rejected, nothing to write");
        report.status = FileStatus::NoDatapoints;
        return report;
    }

    let written = match ctx.on_conflict {
        ConflictPolicy::Fail => ctx.store.insert(QUESTION_TABLE, &batch),
        ConflictPolicy::Update => {
            ctx.store
                .upsert(QUESTION_TABLE, &batch, QUESTION_CONFLICT_COLUMNS)
        }
    };

    match written {
        Ok(_) => {
            report.created = batch.len();
            info!(
                file = %source.filename,
                topic = %source.topic_code,
                created = report.created,
                skipped = report.skipped,
                errors = report.errors,
                "imported datapoints"
            );
        }
        Err(err) => {
            warn!(
                file = %source.filename,
                batch = batch.len(),
                error = %err,
                "bulk write failed, discarding file batch"
            );
            report.status = FileStatus::WriteFailed;
            report.errors += 1;
            report.error_detail = Some(err.to_string());
        }
    }

    report
}
