//! Recomputes `is_mandatory` of an imported version from the "May [V]" column
//! of the source exports. Every question of the version is reset to mandatory,
//! then the codes marked voluntary in the files are switched off.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::FixVoluntaryArgs;
use crate::commands::{load_plan, open_store};
use crate::config::ImportPlan;
use crate::record;
use crate::source::{Column, DataStartDetector, SourceRow, read_rows};
use crate::store::{Filter, QUESTION_TABLE, Store, UpdateStep, record_bool, record_str};
use crate::util::now_utc_string;
use crate::versions::find_version;

/// Upper bound on the number of codes in one `IN (...)` filter.
pub const IN_LIST_CHUNK: usize = 500;

#[derive(Debug, Default)]
pub struct VoluntaryScan {
    pub codes: BTreeSet<String>,
    /// Filename and number of voluntary codes found in it.
    pub per_file: Vec<(String, usize)>,
    pub files_unreadable: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoluntaryUpdate {
    pub reset: usize,
    pub marked_voluntary: usize,
}

pub fn run(args: FixVoluntaryArgs) -> Result<()> {
    let plan = load_plan(&args.plan)?;
    let detector = DataStartDetector::new(&plan.topic_prefixes)?;
    let (_, store) = open_store(&args.store)?;

    let version_code = args
        .version_code
        .clone()
        .unwrap_or_else(|| plan.version.version_code.clone());
    let Some(version) = find_version(&store, &version_code)? else {
        bail!("version {version_code} does not exist; import it first");
    };

    let scan = scan_voluntary_codes(&plan, &detector);
    info!(
        version = %version.code,
        voluntary_codes = scan.codes.len(),
        files = scan.per_file.len(),
        "scanned source files"
    );

    if args.dry_run {
        let (present, changes) = preview_changes(&store, &version.id, &scan.codes)?;
        info!(
            version = %version.code,
            voluntary_codes = scan.codes.len(),
            present_in_store = present,
            flags_to_change = changes,
            "dry run, store left untouched"
        );
        return Ok(());
    }

    let update = apply_voluntary_flags(&store, &version.id, &scan.codes)?;
    info!(
        version = %version.code,
        reset = update.reset,
        marked_voluntary = update.marked_voluntary,
        "voluntary flags fixed"
    );
    Ok(())
}

/// Collects the ids of datapoint rows carrying a voluntary marker. Files that
/// are missing or unreadable are skipped with a warning.
pub fn scan_voluntary_codes(plan: &ImportPlan, detector: &DataStartDetector) -> VoluntaryScan {
    let mut scan = VoluntaryScan::default();

    for source in &plan.sources {
        let path = plan.source_path(source);
        match scan_file(&path, detector) {
            Ok(codes) => {
                debug!(file = %source.filename, voluntary = codes.len(), "scanned file");
                scan.per_file.push((source.filename.clone(), codes.len()));
                scan.codes.extend(codes);
            }
            Err(err) => {
                warn!(file = %source.filename, error = %format!("{err:#}"), "skipping source file");
                scan.files_unreadable += 1;
            }
        }
    }

    scan
}

fn scan_file(path: &Path, detector: &DataStartDetector) -> Result<Vec<String>> {
    if !path.is_file() {
        bail!("file not found: {}", path.display());
    }

    let rows = read_rows(path)?;
    let start = detector
        .find_data_start(&rows)
        .with_context(|| format!("no datapoint rows in {}", path.display()))?;

    let codes = rows[start..]
        .iter()
        .filter_map(|record| SourceRow::decode(record).ok())
        .filter(SourceRow::is_voluntary)
        .filter_map(|row| row.text(Column::Id).map(str::to_owned))
        .collect();

    Ok(codes)
}

/// Resets every question of the version to mandatory, then marks `codes`
/// voluntary. Manual edits to `is_mandatory` within the version are
/// overwritten.
pub fn apply_voluntary_flags(
    store: &dyn Store,
    version_id: &str,
    codes: &BTreeSet<String>,
) -> Result<VoluntaryUpdate> {
    let updated_at = now_utc_string();
    let codes = codes.iter().map(String::as_str).collect::<Vec<&str>>();

    let mut steps = vec![UpdateStep::new(
        record! { "is_mandatory" => true, "updated_at" => updated_at.as_str() },
        vec![Filter::eq("version_id", version_id)],
    )];
    steps.extend(codes.chunks(IN_LIST_CHUNK).map(|chunk| {
        UpdateStep::new(
            record! { "is_mandatory" => false, "updated_at" => updated_at.as_str() },
            vec![
                Filter::eq("version_id", version_id),
                Filter::is_in("code", chunk.iter().copied()),
            ],
        )
    }));

    let results = store
        .update_many(QUESTION_TABLE, &steps)
        .context("failed to update voluntary flags")?;

    let reset = results.first().map_or(0, Vec::len);
    let marked_voluntary = results.iter().skip(1).map(Vec::len).sum();
    Ok(VoluntaryUpdate {
        reset,
        marked_voluntary,
    })
}

/// Returns how many of `codes` exist in the version and how many questions
/// would change their flag.
fn preview_changes(
    store: &dyn Store,
    version_id: &str,
    codes: &BTreeSet<String>,
) -> Result<(usize, usize)> {
    let rows = store
        .select(QUESTION_TABLE, &[Filter::eq("version_id", version_id)])
        .context("failed to load questions")?;

    let mut present = 0;
    let mut changes = 0;
    for row in &rows {
        let voluntary = record_str(row, "code").is_some_and(|code| codes.contains(code));
        present += usize::from(voluntary);
        if record_bool(row, "is_mandatory") != Some(!voluntary) {
            changes += 1;
        }
    }
    Ok((present, changes))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::NaiveDate;

    use super::*;
    use crate::cli::{ConflictPolicy, FixVoluntaryArgs, PlanArgs, StoreArgs};
    use crate::commands::import::import_plan;
    use crate::commands::init::seed_topics;
    use crate::config::{SourceFile, VersionSpec};
    use crate::store::SqliteStore;
    use crate::store::testing::FlakyStore;

    const EXPORT: &str = "\
ESRS S1 Own workforce;;;;;;;;;;;
ID;ESRS;DR;Paragraph;Related AR;Name;Data Type;Conditional;May [V];B;C1;C2
S1-1_01;S1;S1-1;19;;Human rights policy;narrative;;;;;
S1-1_02;S1;S1-1;20;;Engagement with workers;narrative;;V;;;
S1-1_03;S1;S1-1;21;;Remediation measures;narrative;;v;;;
S1-6_01;S1;S1-6;50;;Number of employees;integer;;;;;
";

    fn plan(csv_dir: &Path) -> ImportPlan {
        ImportPlan {
            csv_dir: csv_dir.to_path_buf(),
            topic_prefixes: "ESGA".to_string(),
            version: VersionSpec {
                version_code: "V1".to_string(),
                version_name: "V1".to_string(),
                effective_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
                description: None,
                source_url: None,
            },
            sources: vec![
                SourceFile {
                    topic_code: "S1".to_string(),
                    filename: "ESRS S1.csv".to_string(),
                },
                SourceFile {
                    topic_code: "S2".to_string(),
                    filename: "ESRS S2.csv".to_string(),
                },
            ],
        }
    }

    fn imported(dir: &tempfile::TempDir) -> (SqliteStore, ImportPlan, String) {
        let csv_dir = dir.path().join("csv");
        fs::create_dir_all(&csv_dir).expect("csv dir");
        fs::write(csv_dir.join("ESRS S1.csv"), EXPORT).expect("write export");

        let store = SqliteStore::open(&dir.path().join("esrs.sqlite")).expect("store");
        seed_topics(&store).expect("seed");
        let plan = plan(&csv_dir);
        let outcome = import_plan(
            &store,
            &plan,
            &DataStartDetector::default(),
            ConflictPolicy::Fail,
        )
        .expect("import");
        (store, plan, outcome.version.id)
    }

    fn flags(store: &dyn Store) -> Vec<(String, bool)> {
        store
            .select(QUESTION_TABLE, &[])
            .expect("select")
            .iter()
            .map(|row| {
                (
                    record_str(row, "code").unwrap_or_default().to_string(),
                    record_bool(row, "is_mandatory").unwrap_or_default(),
                )
            })
            .collect()
    }

    #[test]
    fn scan_collects_marked_codes_and_skips_missing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_, plan, _) = imported(&dir);

        let scan = scan_voluntary_codes(&plan, &DataStartDetector::default());

        assert_eq!(
            scan.codes.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["S1-1_02", "S1-1_03"]
        );
        assert_eq!(scan.per_file, vec![("ESRS S1.csv".to_string(), 2)]);
        assert_eq!(scan.files_unreadable, 1);
    }

    #[test]
    fn fixer_overrides_manual_edits_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, plan, version_id) = imported(&dir);
        store
            .update(
                QUESTION_TABLE,
                &record! { "is_mandatory" => false },
                &[Filter::eq("code", "S1-6_01")],
            )
            .expect("manual edit");

        let codes = scan_voluntary_codes(&plan, &DataStartDetector::default()).codes;
        let first = apply_voluntary_flags(&store, &version_id, &codes).expect("first fix");
        let after_first = flags(&store);
        let second = apply_voluntary_flags(&store, &version_id, &codes).expect("second fix");

        assert_eq!(first, VoluntaryUpdate { reset: 4, marked_voluntary: 2 });
        assert_eq!(first, second);
        assert_eq!(after_first, flags(&store));
        assert_eq!(
            after_first,
            vec![
                ("S1-1_01".to_string(), true),
                ("S1-1_02".to_string(), false),
                ("S1-1_03".to_string(), false),
                ("S1-6_01".to_string(), true),
            ]
        );
    }

    #[test]
    fn large_code_sets_are_split_into_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _, version_id) = imported(&dir);
        let mut codes = (0..1_200)
            .map(|n| format!("S1-9_{n:04}"))
            .collect::<BTreeSet<String>>();
        codes.insert("S1-1_01".to_string());

        let update = apply_voluntary_flags(&store, &version_id, &codes).expect("fix");

        assert_eq!(update, VoluntaryUpdate { reset: 4, marked_voluntary: 1 });
    }

    #[test]
    fn fixer_leaves_other_versions_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, plan, _) = imported(&dir);
        let codes = scan_voluntary_codes(&plan, &DataStartDetector::default()).codes;

        let update = apply_voluntary_flags(&store, "other-version", &codes).expect("fix");

        assert_eq!(update, VoluntaryUpdate { reset: 0, marked_voluntary: 0 });
        assert_eq!(flags(&store).iter().filter(|(_, mandatory)| !mandatory).count(), 2);
    }

    #[test]
    fn sequential_store_reaches_the_same_flags() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, plan, version_id) = imported(&dir);
        drop(store);
        let flaky = FlakyStore::open(&dir.path().join("esrs.sqlite"), None);

        let codes = scan_voluntary_codes(&plan, &DataStartDetector::default()).codes;
        let update = apply_voluntary_flags(&flaky, &version_id, &codes).expect("fix");

        assert_eq!(update, VoluntaryUpdate { reset: 4, marked_voluntary: 2 });
    }

    #[test]
    fn dry_run_does_not_touch_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, plan, _) = imported(&dir);
        store
            .update(QUESTION_TABLE, &record! { "is_mandatory" => true }, &[])
            .expect("reset all");
        let before = flags(&store);
        drop(store);

        run(FixVoluntaryArgs {
            store: StoreArgs {
                db_path: Some(dir.path().join("esrs.sqlite")),
            },
            plan: PlanArgs {
                plan: None,
                csv_dir: Some(plan.csv_dir.clone()),
                topic_prefixes: None,
            },
            version_code: Some("V1".to_string()),
            dry_run: true,
        })
        .expect("dry run");

        let store = SqliteStore::open(&dir.path().join("esrs.sqlite")).expect("reopen");
        assert_eq!(flags(&store), before);
    }

    #[test]
    fn unknown_version_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_, plan, _) = imported(&dir);

        let err = run(FixVoluntaryArgs {
            store: StoreArgs {
                db_path: Some(dir.path().join("esrs.sqlite")),
            },
            plan: PlanArgs {
                plan: None,
                csv_dir: Some(plan.csv_dir.clone()),
                topic_prefixes: None,
            },
            version_code: Some("MISSING".to_string()),
            dry_run: false,
        })
        .expect_err("unknown version");

        assert!(err.to_string().contains("MISSING"));
    }
}
