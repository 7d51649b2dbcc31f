//! Reading the taxonomy CSV exports.
//!
//! The exports carry a caption block of variable height (quoted cells spanning
//! several lines are common) before the first datapoint row. Columns are read
//! positionally because the header text is not reliable.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ByteRecord, ReaderBuilder};

pub mod header;
pub mod normalize;

pub use header::DataStartDetector;
pub use normalize::{Column, RowNormalizer, RowOutcome, SourceRow};

pub const FIELD_DELIMITER: u8 = b';';

/// Reads every record of a semicolon-delimited export without assuming a
/// header row or a fixed width.
pub fn read_rows(path: &Path) -> Result<Vec<ByteRecord>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(FIELD_DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut rows = Vec::new();
    for (index, result) in reader.byte_records().enumerate() {
        let record =
            result.with_context(|| format!("failed to read record {index} of {}", path.display()))?;
        rows.push(record);
    }

    Ok(rows)
}
