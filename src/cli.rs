use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::DATABASE_PATH_ENV;

#[derive(Parser, Debug)]
#[command(
    name = "esrs-import",
    version,
    about = "Import and maintain the ESRS disclosure taxonomy from EFRAG CSV exports"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the schema and seed the ESRS topics.
    Init(InitArgs),
    /// Import every topic file of the plan into one version.
    Import(ImportArgs),
    /// Make one version the only active version.
    Activate(ActivateArgs),
    /// Recompute the mandatory flag of an imported version from the exports.
    FixVoluntary(FixVoluntaryArgs),
    /// Show versions and per-topic datapoint counts.
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, env = DATABASE_PATH_ENV)]
    pub db_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// JSON import plan; defaults to the built-in EFRAG IG3 plan.
    #[arg(long)]
    pub plan: Option<PathBuf>,

    #[arg(long)]
    pub csv_dir: Option<PathBuf>,

    /// Allowed first letters of datapoint ids, e.g. "ESGA".
    #[arg(long)]
    pub topic_prefixes: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConflictPolicy {
    /// Plain insert; a file whose codes already exist in the version fails.
    Fail,
    /// Update rows that already exist for (version, code).
    Update,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Update => "update",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub plan: PlanArgs,

    #[arg(long, default_value = ".cache/esrs")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ConflictPolicy::Fail)]
    pub on_conflict: ConflictPolicy,
}

#[derive(Args, Debug, Clone)]
pub struct ActivateArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub version_code: String,
}

#[derive(Args, Debug, Clone)]
pub struct FixVoluntaryArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub plan: PlanArgs,

    /// Defaults to the plan's version.
    #[arg(long)]
    pub version_code: Option<String>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Defaults to the active version.
    #[arg(long)]
    pub version_code: Option<String>,
}
