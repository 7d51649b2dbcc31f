//! Creating, resolving and activating taxonomy releases.

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::config::VersionSpec;
use crate::record;
use crate::store::{Filter, Record, Store, UpdateStep, VERSION_TABLE, record_str};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRef {
    pub id: String,
    pub code: String,
    pub effective_date: String,
}

impl VersionRef {
    fn from_record(record: &Record) -> Result<Self> {
        let field = |key: &str| {
            record_str(record, key)
                .map(str::to_owned)
                .with_context(|| format!("version row has no {key}"))
        };

        Ok(Self {
            id: field("id")?,
            code: field("version_code")?,
            effective_date: field("effective_date")?,
        })
    }
}

/// Creates the version row, or resolves the existing one when the code is
/// already taken. Any other store failure is returned to the caller.
pub fn ensure_version(store: &dyn Store, spec: &VersionSpec) -> Result<VersionRef> {
    let row = record! {
        "version_code" => spec.version_code.as_str(),
        "version_name" => spec.version_name.as_str(),
        "effective_date" => spec.effective_date.to_string(),
        "is_active" => false,
        "description" => spec.description.clone(),
        "source_url" => spec.source_url.clone(),
    };

    match store.insert(VERSION_TABLE, &[row]) {
        Ok(rows) => {
            let created = rows
                .first()
                .context("store returned no row for the created version")
                .and_then(VersionRef::from_record)?;
            info!(version = %created.code, id = %created.id, "created version");
            Ok(created)
        }
        Err(err) if err.is_unique_violation() => {
            let existing = find_version(store, &spec.version_code)?.with_context(|| {
                format!(
                    "version {} conflicts on insert but cannot be found",
                    spec.version_code
                )
            })?;
            info!(version = %existing.code, id = %existing.id, "using existing version");
            Ok(existing)
        }
        Err(err) => Err(err)
            .with_context(|| format!("failed to create version {}", spec.version_code)),
    }
}

pub fn find_version(store: &dyn Store, version_code: &str) -> Result<Option<VersionRef>> {
    let rows = store
        .select(VERSION_TABLE, &[Filter::eq("version_code", version_code)])
        .with_context(|| format!("failed to look up version {version_code}"))?;

    rows.first().map(VersionRef::from_record).transpose()
}

pub fn active_versions(store: &dyn Store) -> Result<Vec<Record>> {
    store
        .select(VERSION_TABLE, &[Filter::eq("is_active", true)])
        .context("failed to list active versions")
}

/// Makes `version_code` the only active version: every other active row is
/// switched off, then the target is switched on. Both steps go through
/// [`Store::update_many`]; whether the in-between state (no active version) is
/// observable depends on the store.
pub fn activate(store: &dyn Store, version_code: &str) -> Result<VersionRef> {
    let Some(target) = find_version(store, version_code)? else {
        bail!("version {version_code} does not exist");
    };

    store
        .update_many(
            VERSION_TABLE,
            &[
                UpdateStep::new(
                    record! { "is_active" => false },
                    vec![
                        Filter::eq("is_active", true),
                        Filter::neq("id", target.id.as_str()),
                    ],
                ),
                UpdateStep::new(
                    record! { "is_active" => true },
                    vec![Filter::eq("version_code", version_code)],
                ),
            ],
        )
        .with_context(|| format!("failed to activate version {version_code}"))?;

    let active = active_versions(store)?;
    let codes = active
        .iter()
        .filter_map(|row| record_str(row, "version_code"))
        .collect::<Vec<&str>>();
    if codes != [version_code] {
        warn!(expected = version_code, active = ?codes, "active versions changed concurrently");
    }

    info!(version = %target.code, id = %target.id, "activated version");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::store::testing::FlakyStore;
    use crate::store::{SqliteStore, record_bool};

    fn spec(code: &str) -> VersionSpec {
        VersionSpec {
            version_code: code.to_string(),
            version_name: format!("{code} release"),
            effective_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
            description: None,
            source_url: Some("https://example.org".to_string()),
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> SqliteStore {
        SqliteStore::open(&dir.path().join("esrs.sqlite")).expect("store should open")
    }

    #[test]
    fn ensure_version_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);

        let first = ensure_version(&store, &spec("EFRAG-IG3-2024")).expect("first call");
        let second = ensure_version(&store, &spec("EFRAG-IG3-2024")).expect("second call");

        assert_eq!(first, second);
        assert_eq!(first.effective_date, "2024-01-01");
        let rows = store.select(VERSION_TABLE, &[]).expect("select");
        assert_eq!(rows.len(), 1);
        assert_eq!(record_bool(&rows[0], "is_active"), Some(false));
        assert_eq!(rows[0].get("description"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn ensure_version_fails_on_other_store_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FlakyStore::open(&dir.path().join("esrs.sqlite"), Some(VERSION_TABLE));

        let err = ensure_version(&store, &spec("V1")).expect_err("must be fatal");
        assert!(err.to_string().contains("failed to create version V1"));
        assert_eq!(store.failed_inserts.get(), 1);
    }

    #[test]
    fn activate_leaves_exactly_one_active_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);
        ensure_version(&store, &spec("V1")).expect("v1");
        ensure_version(&store, &spec("V2")).expect("v2");

        activate(&store, "V1").expect("activate v1");
        activate(&store, "V2").expect("activate v2");

        let active = active_versions(&store).expect("active");
        assert_eq!(active.len(), 1);
        assert_eq!(record_str(&active[0], "version_code"), Some("V2"));

        activate(&store, "V2").expect("re-activating is a no-op");
        assert_eq!(active_versions(&store).expect("active").len(), 1);
    }

    #[test]
    fn activate_through_sequential_updates_settles_on_one_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FlakyStore::open(&dir.path().join("esrs.sqlite"), None);
        ensure_version(&store, &spec("V1")).expect("v1");
        ensure_version(&store, &spec("V2")).expect("v2");
        activate(&store, "V1").expect("activate v1");

        activate(&store, "V2").expect("activate v2");

        let active = active_versions(&store).expect("active");
        assert_eq!(active.len(), 1);
        assert_eq!(record_str(&active[0], "version_code"), Some("V2"));
    }

    #[test]
    fn activating_an_unknown_version_changes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);
        ensure_version(&store, &spec("V1")).expect("v1");
        activate(&store, "V1").expect("activate v1");

        let err = activate(&store, "MISSING").expect_err("unknown code");
        assert!(err.to_string().contains("MISSING"));

        let active = active_versions(&store).expect("active");
        assert_eq!(record_str(&active[0], "version_code"), Some("V1"));
    }
}
