#![allow(missing_docs)]

use tabla::{
    Column, ColumnType, Database, DbConfig, Result, Schema, TablaError, Tid, Value,
};
use tempfile::tempdir;

fn keyed_schema() -> Schema {
    Schema::new(vec![Column::new("k", ColumnType::Int64, false)]).unwrap()
}

#[test]
fn ten_thousand_monotone_keys_build_a_tall_tree() -> Result<()> {
    let dir = tempdir().unwrap();
    let cfg = DbConfig::new(dir.path()).fsync_meta(false);
    let mut db = Database::open_with_config(cfg)?;
    db.create_table("events", keyed_schema())?;
    let mut index = db.create_btree_index("events", "by_k", "k")?;

    for key in 1..=10_000i64 {
        index.insert(key, Tid::new(key as u32, 0))?;
    }

    assert!(index.height() > 1, "ten thousand keys cannot fit one leaf");
    assert_eq!(index.search_equal(7_777)?, vec![Tid::new(7_777, 0)]);
    assert!(index.search_equal(0)?.is_empty());
    assert!(index.search_equal(10_001)?.is_empty());
    assert_eq!(index.entry_count()?, 10_000);

    let all = index.range_scan(i64::MIN, i64::MAX)?;
    assert_eq!(all.len(), 10_000, "full range scan yields every tid once");
    let mut pages: Vec<u32> = all.iter().map(|tid| tid.page_id).collect();
    pages.sort_unstable();
    pages.dedup();
    assert_eq!(pages.len(), 10_000, "no tid appears twice");

    assert_eq!(index.range_scan(500, 509)?.len(), 10);
    db.close()?;
    Ok(())
}

#[test]
fn index_state_survives_reopen_through_the_sidecar() -> Result<()> {
    let dir = tempdir().unwrap();
    let cfg = DbConfig::new(dir.path()).fsync_meta(false);
    let (root, height) = {
        let mut db = Database::open_with_config(cfg.clone())?;
        db.create_table("events", keyed_schema())?;
        let mut index = db.create_btree_index("events", "by_k", "k")?;
        for key in 0..2_000i64 {
            index.insert(key, Tid::new(key as u32, 0))?;
        }
        db.flush_all_pools()?;
        db.close()?;
        (index.root(), index.height())
    };

    let mut db = Database::open_with_config(cfg)?;
    let index = db.open_btree_index("events", "by_k")?;
    assert_eq!(index.root(), root, "root came back from the sidecar");
    assert_eq!(index.height(), height);
    assert_eq!(index.search_equal(1_234)?, vec![Tid::new(1_234, 0)]);
    assert_eq!(index.entry_count()?, 2_000);
    db.close()?;
    Ok(())
}

#[test]
fn heap_and_index_cooperate_for_lookups() -> Result<()> {
    let dir = tempdir().unwrap();
    let mut db = Database::open_with_config(DbConfig::new(dir.path()).fsync_meta(false))?;
    let schema = Schema::new(vec![
        Column::new("id", ColumnType::Int64, false),
        Column::new("label", ColumnType::Text, true),
    ])
    .unwrap();
    let mut table = db.create_table("items", schema)?;
    let mut index = db.create_btree_index("items", "by_id", "id")?;

    for id in 0..500i64 {
        let tid = table.insert(&[Value::Int64(id), Value::Text(format!("item-{id}"))])?;
        index.insert(id, tid)?;
    }

    let found = index.search_equal(321)?;
    assert_eq!(found.len(), 1);
    let row = table.get(found[0])?;
    assert_eq!(row[0], Value::Int64(321));
    assert_eq!(row[1], Value::Text("item-321".into()));

    // the executor contract: after a heap delete the index still carries
    // the entry, and the reader is the one who notices
    table.delete(found[0])?;
    let stale = index.search_equal(321)?;
    assert_eq!(stale.len(), 1, "index entries dangle by design");
    match table.get(stale[0]) {
        Err(TablaError::NotFound(_)) => {}
        other => panic!("heap re-check must fail, got {other:?}"),
    }
    db.close()?;
    Ok(())
}

#[test]
fn out_of_order_inserts_are_rejected_with_both_keys() -> Result<()> {
    let dir = tempdir().unwrap();
    let mut db = Database::open(dir.path())?;
    db.create_table("events", keyed_schema())?;
    let mut index = db.create_btree_index("events", "by_k", "k")?;

    index.insert(100, Tid::new(0, 0))?;
    index.insert(100, Tid::new(0, 1))?;
    match index.insert(99, Tid::new(0, 2)) {
        Err(TablaError::OutOfOrderKey { key: 99, last: 100 }) => {}
        other => panic!("expected OutOfOrderKey, got {other:?}"),
    }
    db.close()?;
    Ok(())
}

#[test]
fn index_registration_and_drop() -> Result<()> {
    let dir = tempdir().unwrap();
    let mut db = Database::open(dir.path())?;
    db.create_table("events", keyed_schema())?;
    db.create_btree_index("events", "by_k", "k")?;

    match db.create_btree_index("events", "by_k", "k") {
        Err(TablaError::AlreadyExists(_)) => {}
        other => panic!("expected AlreadyExists, got {other:?}"),
    }
    match db.create_btree_index("events", "by_text", "missing") {
        Err(TablaError::NotFound(_)) => {}
        other => panic!("expected NotFound for unknown column, got {other:?}"),
    }

    db.drop_index("events", "by_k")?;
    match db.open_btree_index("events", "by_k") {
        Err(TablaError::NotFound(_)) => {}
        other => panic!("expected NotFound after drop, got {other:?}"),
    }
    // a second drop reports the registration as gone
    match db.drop_index("events", "by_k") {
        Err(TablaError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
    db.close()?;
    Ok(())
}
