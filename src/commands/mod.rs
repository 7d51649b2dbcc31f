use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::{PlanArgs, StoreArgs};
use crate::config::{ImportPlan, resolve_db_path};
use crate::store::SqliteStore;

pub mod activate;
pub mod fix_voluntary;
pub mod import;
pub mod init;
pub mod status;

/// Opens the store named by `--db-path` / the environment. Fails before any
/// source file is touched when the location is not configured.
pub(crate) fn open_store(args: &StoreArgs) -> Result<(PathBuf, SqliteStore)> {
    let db_path = resolve_db_path(args.db_path.clone())?;
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open store at {}", db_path.display()))?;

    info!(db_path = %db_path.display(), "opened store");
    Ok((db_path, store))
}

pub(crate) fn load_plan(args: &PlanArgs) -> Result<ImportPlan> {
    let mut plan = ImportPlan::load(args.plan.as_deref())?;

    if let Some(csv_dir) = &args.csv_dir {
        plan.csv_dir = csv_dir.clone();
    }
    if let Some(prefixes) = &args.topic_prefixes {
        plan.topic_prefixes = prefixes.clone();
    }

    Ok(plan)
}
