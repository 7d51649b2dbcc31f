use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cli::{ConflictPolicy, ImportArgs};
use crate::commands::{load_plan, open_store};
use crate::config::ImportPlan;
use crate::model::{FileReport, ImportRunManifest, ImportStats, SourceHash};
use crate::source::DataStartDetector;
use crate::store::{Store, TOPIC_TABLE, record_str};
use crate::util::{now_utc_string, sha256_file, utc_compact_string, write_json_pretty};
use crate::versions::{VersionRef, ensure_version};

use super::loader::{LoadContext, load_file};

pub struct ImportOutcome {
    pub version: VersionRef,
    pub stats: ImportStats,
    pub files: Vec<FileReport>,
    pub source_hashes: Vec<SourceHash>,
    pub warnings: Vec<String>,
}

pub fn run(args: ImportArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let plan = load_plan(&args.plan)?;
    plan.validate().context("invalid import plan")?;
    let detector = DataStartDetector::new(&plan.topic_prefixes)?;
    let (db_path, store) = open_store(&args.store)?;

    info!(
        run_id = %run_id,
        csv_dir = %plan.csv_dir.display(),
        version = %plan.version.version_code,
        on_conflict = args.on_conflict.as_str(),
        "starting import"
    );

    let outcome = import_plan(&store, &plan, &detector, args.on_conflict)?;

    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        args.cache_root.join("manifests").join(format!(
            "import_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });

    let manifest = ImportRunManifest {
        manifest_version: 1,
        run_id,
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_import_command(&args),
        db_path: db_path.display().to_string(),
        csv_dir: plan.csv_dir.display().to_string(),
        version_code: outcome.version.code.clone(),
        version_id: outcome.version.id.clone(),
        on_conflict: args.on_conflict.as_str().to_string(),
        stats: outcome.stats,
        files: outcome.files,
        source_hashes: outcome.source_hashes,
        warnings: outcome.warnings,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote import run manifest");
    Ok(())
}

/// Imports every file of the plan into one version. Only an unusable store or
/// an unresolvable version abort the run; file-level failures are counted.
pub fn import_plan(
    store: &dyn Store,
    plan: &ImportPlan,
    detector: &DataStartDetector,
    on_conflict: ConflictPolicy,
) -> Result<ImportOutcome> {
    let topics = load_topics(store)?;
    debug!(
        topic_prefixes = %detector.prefixes().collect::<String>(),
        topics = topics.len(),
        "checking topic prefixes"
    );
    let mut warnings = check_topic_prefixes(&topics, detector);

    let version = ensure_version(store, &plan.version)?;

    let ctx = LoadContext {
        store,
        detector,
        topics: &topics,
        version: &version,
        on_conflict,
    };

    let mut stats = ImportStats::default();
    let mut files = Vec::with_capacity(plan.sources.len());
    let mut source_hashes = Vec::new();

    for source in &plan.sources {
        let path = plan.source_path(source);
        let report = load_file(&ctx, source, &path);
        stats.absorb(&report);
        files.push(report);

        if !path.is_file() {
            continue;
        }
        match sha256_file(&path) {
            Ok(sha256) => source_hashes.push(SourceHash {
                filename: source.filename.clone(),
                sha256,
            }),
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "failed to hash source file");
                warnings.push(format!("could not hash {}: {err:#}", source.filename));
            }
        }
    }

    info!(
        files_processed = stats.files_processed,
        files_total = stats.files_total,
        files_skipped = stats.files_skipped,
        records_created = stats.records_created,
        records_skipped = stats.records_skipped,
        errors = stats.errors,
        "import summary"
    );

    Ok(ImportOutcome {
        version,
        stats,
        files,
        source_hashes,
        warnings,
    })
}

/// Topic code to id, as stored by `init`.
fn load_topics(store: &dyn Store) -> Result<HashMap<String, String>> {
    let rows = store
        .select(TOPIC_TABLE, &[])
        .context("failed to load topics")?;

    let topics = rows
        .iter()
        .filter_map(|row| {
            let code = record_str(row, "code")?;
            let id = record_str(row, "id")?;
            Some((code.to_string(), id.to_string()))
        })
        .collect::<HashMap<_, _>>();

    debug!(topics = topics.len(), "loaded topics");
    if topics.is_empty() {
        warn!("no topics in store; run `init` first");
    }
    Ok(topics)
}

fn check_topic_prefixes(
    topics: &HashMap<String, String>,
    detector: &DataStartDetector,
) -> Vec<String> {
    let mut codes = topics.keys().collect::<Vec<_>>();
    codes.sort();

    codes
        .into_iter()
        .filter(|code| {
            code.chars()
                .next()
                .is_some_and(|first| !detector.allows_prefix(first))
        })
        .map(|code| {
            warn!(topic = %code, "topic prefix is not in the datapoint allow-list");
            format!("datapoints of topic {code} cannot be detected with the current prefixes")
        })
        .collect()
}

pub(super) fn render_import_command(args: &ImportArgs) -> String {
    let mut command = vec![
        "esrs-import".to_string(),
        "import".to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
        "--on-conflict".to_string(),
        args.on_conflict.as_str().to_string(),
    ];

    let optional_paths: [(&str, Option<&PathBuf>); 4] = [
        ("--db-path", args.store.db_path.as_ref()),
        ("--plan", args.plan.plan.as_ref()),
        ("--csv-dir", args.plan.csv_dir.as_ref()),
        ("--manifest-path", args.manifest_path.as_ref()),
    ];
    for (flag, path) in optional_paths
        .into_iter()
        .filter_map(|(flag, path)| path.map(|path| (flag, path)))
    {
        command.push(flag.to_string());
        command.push(path.display().to_string());
    }
    if let Some(prefixes) = &args.plan.topic_prefixes {
        command.push("--topic-prefixes".to_string());
        command.push(prefixes.clone());
    }

    command.join(" ")
}
