use anyhow::Result;
use tracing::info;

use crate::cli::ActivateArgs;
use crate::commands::open_store;
use crate::store::record_str;
use crate::versions::{activate, active_versions};

pub fn run(args: ActivateArgs) -> Result<()> {
    let (_, store) = open_store(&args.store)?;
    let version = activate(&store, &args.version_code)?;

    let active = active_versions(&store)?;
    info!(
        version = %version.code,
        effective_date = %version.effective_date,
        active = ?active.iter().filter_map(|row| record_str(row, "version_code")).collect::<Vec<_>>(),
        "version is now active"
    );
    Ok(())
}
