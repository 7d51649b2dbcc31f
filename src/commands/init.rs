use anyhow::{Context, Result};
use tracing::info;

use crate::cli::InitArgs;
use crate::commands::open_store;
use crate::record;
use crate::store::{Record, Store, TOPIC_TABLE};

/// ESRS topical standards: code, name, category.
pub const ESRS_TOPICS: &[(&str, &str, &str)] = &[
    ("E1", "Climate change", "environmental"),
    ("E2", "Pollution", "environmental"),
    ("E3", "Water and marine resources", "environmental"),
    ("E4", "Biodiversity and ecosystems", "environmental"),
    ("E5", "Resource use and circular economy", "environmental"),
    ("S1", "Own workforce", "social"),
    ("S2", "Workers in the value chain", "social"),
    ("S3", "Affected communities", "social"),
    ("S4", "Consumers and end-users", "social"),
    ("G1", "Business conduct", "governance"),
];

pub fn run(args: InitArgs) -> Result<()> {
    let (_, store) = open_store(&args.store)?;
    let seeded = seed_topics(&store)?;

    info!(topics = seeded, "store initialized");
    Ok(())
}

/// Inserts the topic rows, refreshing names of topics that already exist.
pub fn seed_topics(store: &dyn Store) -> Result<usize> {
    let rows = ESRS_TOPICS
        .iter()
        .map(|(code, name, category)| {
            record! {
                "code" => *code,
                "name" => *name,
                "category" => *category,
            }
        })
        .collect::<Vec<Record>>();

    store
        .upsert(TOPIC_TABLE, &rows, &["code"])
        .context("failed to seed topics")?;

    Ok(rows.len())
}
