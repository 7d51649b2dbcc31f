use std::collections::BTreeSet;

use anyhow::{Result, bail};
use csv::ByteRecord;

/// Default topic-prefix allow-list (environmental, social, governance and the
/// cross-cutting "A" identifiers seen in the exports).
pub const DEFAULT_TOPIC_PREFIXES: &str = "ESGA";

const MIN_ID_CHARS: usize = 6;

/// Locates the first datapoint row below the caption block.
///
/// A datapoint id looks like `<topic prefix><. or -><requirement>_<seq>`, e.g.
/// `E1.GOV-3_01` or `E1-1_01`. Caption rows never have that shape.
#[derive(Debug, Clone)]
pub struct DataStartDetector {
    prefixes: BTreeSet<char>,
}

impl DataStartDetector {
    pub fn new(prefixes: &str) -> Result<Self> {
        let prefixes = prefixes
            .chars()
            .filter(|ch| !ch.is_whitespace() && *ch != ',')
            .collect::<BTreeSet<char>>();

        if prefixes.is_empty() {
            bail!("topic prefix allow-list is empty");
        }
        if let Some(invalid) = prefixes.iter().find(|ch| !ch.is_ascii_uppercase()) {
            bail!("topic prefix {invalid:?} is not an upper-case ASCII letter");
        }

        Ok(Self { prefixes })
    }

    pub fn prefixes(&self) -> impl Iterator<Item = char> + '_ {
        self.prefixes.iter().copied()
    }

    pub fn allows_prefix(&self, ch: char) -> bool {
        self.prefixes.contains(&ch)
    }

    pub fn is_datapoint_id(&self, first_cell: &str) -> bool {
        let cell = first_cell.trim();
        let Some(first) = cell.chars().next() else {
            return false;
        };

        (cell.contains('.') || cell.contains('-'))
            && cell.contains('_')
            && cell.chars().count() >= MIN_ID_CHARS
            && self.prefixes.contains(&first)
    }

    pub fn find_data_start(&self, rows: &[ByteRecord]) -> Option<usize> {
        rows.iter().position(|row| {
            row.get(0)
                .is_some_and(|cell| self.is_datapoint_id(&String::from_utf8_lossy(cell)))
        })
    }
}

impl Default for DataStartDetector {
    fn default() -> Self {
        Self {
            prefixes: DEFAULT_TOPIC_PREFIXES.chars().collect(),
        }
    }
}
