use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::open_store;
use crate::store::{
    Filter, QUESTION_TABLE, Store, TOPIC_TABLE, VERSION_TABLE, record_bool, record_str,
};
use crate::versions::{VersionRef, find_version};

const METADATA_TABLE: &str = "metadata";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionStatus {
    pub code: String,
    pub effective_date: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatus {
    pub schema_version: Option<String>,
    pub versions: Vec<VersionStatus>,
    /// The version the counts refer to.
    pub reported_version: Option<String>,
    /// Topic code to (questions, voluntary questions).
    pub questions_per_topic: BTreeMap<String, (usize, usize)>,
}

pub fn run(args: StatusArgs) -> Result<()> {
    let (db_path, store) = open_store(&args.store)?;
    let status = collect_status(&store, args.version_code.as_deref())?;

    info!(
        path = %db_path.display(),
        schema_version = %status.schema_version.clone().unwrap_or_default(),
        versions = status.versions.len(),
        "store status"
    );
    for version in &status.versions {
        info!(
            version = %version.code,
            effective_date = %version.effective_date,
            active = version.is_active,
            "version"
        );
    }

    match &status.reported_version {
        Some(code) => {
            for (topic, (questions, voluntary)) in &status.questions_per_topic {
                info!(version = %code, topic = %topic, questions, voluntary, "datapoints");
            }
        }
        None => warn!("no version selected and none active"),
    }

    Ok(())
}

/// Reads versions and per-topic counts for `version_code`, or for the active
/// version when no code is given.
pub fn collect_status(store: &dyn Store, version_code: Option<&str>) -> Result<StoreStatus> {
    let schema_version = store
        .select(METADATA_TABLE, &[Filter::eq("key", "db_schema_version")])
        .context("failed to read store metadata")?
        .first()
        .and_then(|row| record_str(row, "value").map(str::to_owned));

    let version_rows = store
        .select(VERSION_TABLE, &[])
        .context("failed to list versions")?;
    let versions = version_rows
        .iter()
        .map(|row| VersionStatus {
            code: record_str(row, "version_code").unwrap_or_default().to_string(),
            effective_date: record_str(row, "effective_date").unwrap_or_default().to_string(),
            is_active: record_bool(row, "is_active").unwrap_or(false),
        })
        .collect::<Vec<_>>();

    let selected = match version_code {
        Some(code) => find_version(store, code)?,
        None => match versions.iter().find(|version| version.is_active) {
            Some(active) => find_version(store, &active.code)?,
            None => None,
        },
    };

    let mut status = StoreStatus {
        schema_version,
        versions,
        ..StoreStatus::default()
    };
    if let Some(version) = selected {
        status.questions_per_topic = count_questions(store, &version)?;
        status.reported_version = Some(version.code);
    } else if let Some(code) = version_code {
        warn!(version = code, "version not found");
    }

    Ok(status)
}

fn count_questions(
    store: &dyn Store,
    version: &VersionRef,
) -> Result<BTreeMap<String, (usize, usize)>> {
    let topic_codes = store
        .select(TOPIC_TABLE, &[])
        .context("failed to load topics")?
        .iter()
        .filter_map(|row| {
            let id = record_str(row, "id")?;
            let code = record_str(row, "code")?;
            Some((id.to_string(), code.to_string()))
        })
        .collect::<BTreeMap<_, _>>();

    let questions = store
        .select(QUESTION_TABLE, &[Filter::eq("version_id", version.id.as_str())])
        .with_context(|| format!("failed to load questions of {}", version.code))?;

    let mut counts = BTreeMap::<String, (usize, usize)>::new();
    for row in &questions {
        let topic = record_str(row, "topic_id")
            .and_then(|id| topic_codes.get(id))
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        let entry = counts.entry(topic).or_default();
        entry.0 += 1;
        if record_bool(row, "is_mandatory") == Some(false) {
            entry.1 += 1;
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::commands::init::seed_topics;
    use crate::config::VersionSpec;
    use crate::record;
    use crate::store::SqliteStore;
    use crate::versions::{activate, ensure_version};

    fn version(store: &SqliteStore, code: &str) -> VersionRef {
        ensure_version(
            store,
            &VersionSpec {
                version_code: code.to_string(),
                version_name: code.to_string(),
                effective_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
                description: None,
                source_url: None,
            },
        )
        .expect("version")
    }

    fn topic_id(store: &SqliteStore, code: &str) -> String {
        let rows = store
            .select(TOPIC_TABLE, &[Filter::eq("code", code)])
            .expect("topic");
        record_str(&rows[0], "id").expect("id").to_string()
    }

    #[test]
    fn counts_questions_of_the_active_version_per_topic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(&dir.path().join("esrs.sqlite")).expect("store");
        seed_topics(&store).expect("seed");
        let v1 = version(&store, "V1");
        let v2 = version(&store, "V2");
        activate(&store, "V2").expect("activate");

        let e1 = topic_id(&store, "E1");
        let e1 = e1.as_str();
        let g1 = topic_id(&store, "G1");
        let g1 = g1.as_str();
        let question = |version: &VersionRef, topic: &str, code: &str, mandatory: bool| {
            record! {
                "topic_id" => topic,
                "version_id" => version.id.as_str(),
                "code" => code,
                "question_text" => "Question",
                "answer_type" => "text",
                "data_type" => "narrative",
                "is_mandatory" => mandatory,
            }
        };
        store
            .insert(
                QUESTION_TABLE,
                &[
                    question(&v1, e1, "E1-1_01", true),
                    question(&v2, e1, "E1-1_01", true),
                    question(&v2, e1, "E1-1_02", false),
                    question(&v2, g1, "G1-1_01", true),
                ],
            )
            .expect("insert questions");

        let status = collect_status(&store, None).expect("status");

        assert_eq!(status.schema_version.as_deref(), Some("0.1.0"));
        assert_eq!(status.versions.len(), 2);
        assert!(status.versions[1].is_active);
        assert_eq!(status.reported_version.as_deref(), Some("V2"));
        assert_eq!(status.questions_per_topic.get("E1"), Some(&(2, 1)));
        assert_eq!(status.questions_per_topic.get("G1"), Some(&(1, 0)));

        let v1_status = collect_status(&store, Some("V1")).expect("status");
        assert_eq!(v1_status.questions_per_topic.get("E1"), Some(&(1, 0)));
        assert_eq!(v1_status.questions_per_topic.get("G1"), None);
    }

    #[test]
    fn empty_store_reports_no_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(&dir.path().join("esrs.sqlite")).expect("store");

        let status = collect_status(&store, None).expect("status");

        assert!(status.versions.is_empty());
        assert_eq!(status.reported_version, None);
        assert!(status.questions_per_topic.is_empty());
    }
}
