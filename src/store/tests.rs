use serde_json::Value;
use tempfile::TempDir;

use super::*;
use crate::record;

fn open_store() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::open(&dir.path().join("esrs.sqlite")).expect("store should open");
    (dir, store)
}

fn version(code: &str) -> Record {
    record! {
        "version_code" => code,
        "version_name" => format!("{code} release"),
        "effective_date" => "2024-01-01",
        "is_active" => false,
    }
}

#[test]
fn insert_generates_ids_and_returns_stored_rows() {
    let (_dir, store) = open_store();

    let rows = store
        .insert(VERSION_TABLE, &[version("V1")])
        .expect("insert should succeed");

    assert_eq!(rows.len(), 1);
    assert!(record_str(&rows[0], "id").is_some_and(|id| id.len() == 36));
    assert_eq!(record_str(&rows[0], "version_code"), Some("V1"));
    assert_eq!(record_bool(&rows[0], "is_active"), Some(false));
    assert!(record_str(&rows[0], "created_at").is_some());
}

#[test]
fn duplicate_insert_is_reported_as_unique_violation() {
    let (_dir, store) = open_store();
    store.insert(VERSION_TABLE, &[version("V1")]).expect("first insert");

    let err = store
        .insert(VERSION_TABLE, &[version("V1")])
        .expect_err("second insert must conflict");

    assert!(err.is_unique_violation(), "unexpected error: {err}");
}

#[test]
fn failing_record_rolls_back_the_whole_batch() {
    let (_dir, store) = open_store();

    let err = store
        .insert(VERSION_TABLE, &[version("V1"), version("V2"), version("V1")])
        .expect_err("batch with a duplicate must fail");
    assert!(err.is_unique_violation());

    let rows = store.select(VERSION_TABLE, &[]).expect("select");
    assert!(rows.is_empty());
}

#[test]
fn select_applies_eq_neq_and_in_filters() {
    let (_dir, store) = open_store();
    store
        .insert(VERSION_TABLE, &[version("V1"), version("V2"), version("V3")])
        .expect("insert");

    let eq = store
        .select(VERSION_TABLE, &[Filter::eq("version_code", "V2")])
        .expect("eq");
    assert_eq!(eq.len(), 1);

    let neq = store
        .select(VERSION_TABLE, &[Filter::neq("version_code", "V2")])
        .expect("neq");
    assert_eq!(neq.len(), 2);

    let within = store
        .select(VERSION_TABLE, &[Filter::is_in("version_code", ["V1", "V3", "V9"])])
        .expect("in");
    let codes = within
        .iter()
        .filter_map(|row| record_str(row, "version_code"))
        .collect::<Vec<&str>>();
    assert_eq!(codes, vec!["V1", "V3"]);

    let empty_in = store
        .select(VERSION_TABLE, &[Filter::is_in("version_code", Vec::<Value>::new())])
        .expect("empty in");
    assert!(empty_in.is_empty());
}

#[test]
fn update_returns_changed_rows() {
    let (_dir, store) = open_store();
    store
        .insert(VERSION_TABLE, &[version("V1"), version("V2")])
        .expect("insert");

    let changed = store
        .update(
            VERSION_TABLE,
            &record! { "description" => "patched" },
            &[Filter::eq("version_code", "V1")],
        )
        .expect("update");

    assert_eq!(changed.len(), 1);
    assert_eq!(record_str(&changed[0], "description"), Some("patched"));
}

#[test]
fn upsert_updates_existing_row_without_replacing_its_id() {
    let (_dir, store) = open_store();
    let first = store.insert(VERSION_TABLE, &[version("V1")]).expect("insert");
    let original_id = record_str(&first[0], "id").map(str::to_owned);

    let mut changed = version("V1");
    changed.insert("version_name".to_string(), Value::from("renamed"));
    store
        .upsert(VERSION_TABLE, &[changed], &["version_code"])
        .expect("upsert");

    let rows = store.select(VERSION_TABLE, &[]).expect("select");
    assert_eq!(rows.len(), 1);
    assert_eq!(record_str(&rows[0], "version_name"), Some("renamed"));
    assert_eq!(record_str(&rows[0], "id").map(str::to_owned), original_id);
}

#[test]
fn rejects_identifiers_that_are_not_plain_names() {
    let (_dir, store) = open_store();

    let err = store
        .select("esrs_version; DROP TABLE topic", &[])
        .expect_err("identifier must be rejected");
    assert!(matches!(err, StoreError::InvalidIdentifier(_)));

    let err = store
        .select(VERSION_TABLE, &[Filter::eq("version_code OR 1=1", "x")])
        .expect_err("column must be rejected");
    assert!(matches!(err, StoreError::InvalidIdentifier(_)));
}

#[test]
fn second_active_version_violates_the_single_active_index() {
    let (_dir, store) = open_store();
    let mut active = version("V1");
    active.insert("is_active".to_string(), Value::from(true));
    store.insert(VERSION_TABLE, &[active]).expect("insert");

    let mut other = version("V2");
    other.insert("is_active".to_string(), Value::from(true));
    let err = store
        .insert(VERSION_TABLE, &[other])
        .expect_err("two active versions must conflict");
    assert!(err.is_unique_violation());
}

#[test]
fn update_many_rolls_back_when_a_later_step_fails() {
    let (_dir, store) = open_store();
    store
        .insert(VERSION_TABLE, &[version("V1"), version("V2")])
        .expect("insert");

    let err = store
        .update_many(
            VERSION_TABLE,
            &[
                UpdateStep::new(record! { "description" => "step one" }, vec![]),
                UpdateStep::new(record! { "version_code" => "V1" }, vec![]),
            ],
        )
        .expect_err("second step breaks version_code uniqueness");
    assert!(err.is_unique_violation());

    let rows = store.select(VERSION_TABLE, &[]).expect("select");
    assert!(rows.iter().all(|row| row.get("description") == Some(&Value::Null)));
}
