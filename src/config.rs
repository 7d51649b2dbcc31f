use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::source::header::DEFAULT_TOPIC_PREFIXES;

pub const DATABASE_PATH_ENV: &str = "ESRS_DATABASE_PATH";

/// Release metadata written when a version row is first created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSpec {
    pub version_code: String,
    pub version_name: String,
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub topic_code: String,
    pub filename: String,
}

/// What to import: the export directory, the topic files in processing order
/// and the release they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportPlan {
    pub csv_dir: PathBuf,
    #[serde(default = "default_topic_prefixes")]
    pub topic_prefixes: String,
    pub version: VersionSpec,
    pub sources: Vec<SourceFile>,
}

fn default_topic_prefixes() -> String {
    DEFAULT_TOPIC_PREFIXES.to_string()
}

impl Default for ImportPlan {
    fn default() -> Self {
        let sources = ["E1", "E2", "E3", "E4", "E5", "S1", "S2", "S3", "S4", "G1"]
            .into_iter()
            .map(|code| SourceFile {
                topic_code: code.to_string(),
                filename: format!("ESRS {code}.csv"),
            })
            .collect();

        Self {
            csv_dir: PathBuf::from("database/IG3 csv"),
            topic_prefixes: default_topic_prefixes(),
            version: VersionSpec {
                version_code: "EFRAG-IG3-2024".to_string(),
                version_name: "EFRAG IG3 - Full ESRS Datapoints".to_string(),
                effective_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
                description: Some(
                    "Complete ESRS datapoints from EFRAG Implementation Guidance 3".to_string(),
                ),
                source_url: Some("https://www.efrag.org/lab3".to_string()),
            },
            sources,
        }
    }
}

impl ImportPlan {
    /// Loads a plan file, or the built-in EFRAG IG3 plan when none is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let plan: ImportPlan = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        plan.validate()
            .with_context(|| format!("invalid import plan {}", path.display()))?;

        info!(
            path = %path.display(),
            version = %plan.version.version_code,
            sources = plan.sources.len(),
            "loaded import plan"
        );
        Ok(plan)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version.version_code.trim().is_empty() {
            bail!("version_code must not be empty");
        }
        if self.sources.is_empty() {
            bail!("no source files listed");
        }
        for source in &self.sources {
            if source.topic_code.trim().is_empty() || source.filename.trim().is_empty() {
                bail!("source entry {source:?} needs a topic code and a filename");
            }
        }
        Ok(())
    }

    pub fn source_path(&self, source: &SourceFile) -> PathBuf {
        self.csv_dir.join(&source.filename)
    }
}

/// The store location is mandatory; without it nothing is read or written.
pub fn resolve_db_path(db_path: Option<PathBuf>) -> Result<PathBuf> {
    match db_path {
        Some(path) if !path.as_os_str().is_empty() => Ok(path),
        _ => bail!("missing configuration: set {DATABASE_PATH_ENV} or pass --db-path"),
    }
}
