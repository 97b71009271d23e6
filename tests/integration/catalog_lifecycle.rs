#![allow(missing_docs)]

use tabla::{Column, ColumnType, Database, Result, Schema, TablaError, Value};
use tempfile::tempdir;

fn schema() -> Schema {
    Schema::new(vec![
        Column::new("id", ColumnType::Int64, false),
        Column::new("body", ColumnType::Text, true),
    ])
    .unwrap()
}

#[test]
fn create_list_drop() -> Result<()> {
    let dir = tempdir().unwrap();
    let mut db = Database::open(dir.path())?;
    assert!(db.list_tables()?.is_empty());

    db.create_table("alpha", schema())?;
    db.create_table("beta", schema())?;
    assert_eq!(db.list_tables()?, vec!["alpha", "beta"]);

    match db.create_table("alpha", schema()) {
        Err(TablaError::AlreadyExists(name)) => assert_eq!(name, "alpha"),
        other => panic!("expected AlreadyExists, got {other:?}"),
    }

    db.drop_table("alpha")?;
    assert_eq!(db.list_tables()?, vec!["beta"]);
    match db.open_table("alpha") {
        Err(TablaError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
    match db.drop_table("alpha") {
        Err(TablaError::NotFound(_)) => {}
        other => panic!("dropping a dropped table reports NotFound, got {other:?}"),
    }
    db.close()?;
    Ok(())
}

#[test]
fn bad_identifiers_are_rejected_everywhere() -> Result<()> {
    let dir = tempdir().unwrap();
    let mut db = Database::open(dir.path())?;
    for bad in ["", "..", "a.b", "a/b", "tablé", "a b"] {
        match db.create_table(bad, schema()) {
            Err(TablaError::InvalidArgument(_)) => {}
            other => panic!("{bad:?} must be rejected, got {other:?}"),
        }
    }
    db.close()?;
    Ok(())
}

#[test]
fn rename_carries_rows_and_indexes() -> Result<()> {
    let dir = tempdir().unwrap();
    let mut db = Database::open(dir.path())?;
    let tid = {
        let mut table = db.create_table("old_name", schema())?;
        let mut index = db.create_btree_index("old_name", "by_id", "id")?;
        let tid = table.insert(&[Value::Int64(11), Value::Text("kept".into())])?;
        index.insert(11, tid)?;
        tid
    };
    db.flush_all_pools()?;

    db.rename_table("old_name", "new_name")?;
    assert_eq!(db.list_tables()?, vec!["new_name"]);
    match db.open_table("old_name") {
        Err(TablaError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }

    let table = db.open_table("new_name")?;
    assert_eq!(
        table.get(tid)?,
        vec![Value::Int64(11), Value::Text("kept".into())]
    );

    let index = db.open_btree_index("new_name", "by_id")?;
    assert_eq!(index.search_equal(11)?, vec![tid]);

    // renaming onto an existing table is refused
    db.create_table("occupied", schema())?;
    match db.rename_table("new_name", "occupied") {
        Err(TablaError::AlreadyExists(_)) => {}
        other => panic!("expected AlreadyExists, got {other:?}"),
    }
    db.close()?;
    Ok(())
}

#[test]
fn on_disk_layout_matches_the_catalog_contract() -> Result<()> {
    let dir = tempdir().unwrap();
    let mut db = Database::open(dir.path())?;
    let mut table = db.create_table("users", schema())?;
    table.insert(&[Value::Int64(1), Value::Null])?;
    table.overflow().write(&[7u8; 16])?;
    db.create_btree_index("users", "by_id", "id")?;
    db.flush_all_pools()?;
    db.close()?;

    let tables = dir.path().join("tables");
    for expected in [
        "users",
        "users_ovf",
        "users.meta.json",
        "users__idx__by_id.btree.meta.json",
    ] {
        assert!(
            tables.join(expected).exists(),
            "{expected} missing from tables/"
        );
    }

    let meta: serde_json::Value =
        serde_json::from_slice(&std::fs::read(tables.join("users.meta.json"))?)
            .expect("sidecar parses");
    assert_eq!(meta["name"], "users");
    assert_eq!(meta["page_count"], 1);
    assert_eq!(meta["indexes"][0]["kind"], "btree");
    assert_eq!(meta["indexes"][0]["key_column"], "id");
    assert_eq!(meta["schema"]["cols"][0]["type"], 1);
    Ok(())
}

#[test]
fn flush_all_pools_persists_without_close() -> Result<()> {
    let dir = tempdir().unwrap();
    let tid = {
        let mut db = Database::open(dir.path())?;
        let mut table = db.create_table("t", schema())?;
        let tid = table.insert(&[Value::Int64(9), Value::Null])?;
        db.flush_all_pools()?;
        // no close: the handle is simply forgotten
        std::mem::forget(db);
        tid
    };

    let mut db = Database::open(dir.path())?;
    let table = db.open_table("t")?;
    assert_eq!(table.get(tid)?, vec![Value::Int64(9), Value::Null]);
    db.close()?;
    Ok(())
}
