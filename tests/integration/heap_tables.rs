#![allow(missing_docs)]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tabla::{Column, ColumnType, Database, DbConfig, Result, Schema, TablaError, Tid, Value};
use tempfile::tempdir;

fn people_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", ColumnType::Int64, false),
        Column::new("name", ColumnType::Text, true),
    ])
    .unwrap()
}

fn person(id: i64, name: &str) -> Vec<Value> {
    vec![Value::Int64(id), Value::Text(name.into())]
}

#[test]
fn scan_skips_deleted_rows() -> Result<()> {
    let dir = tempdir().unwrap();
    let mut db = Database::open(dir.path())?;
    let mut table = db.create_table("people", people_schema())?;

    let mut tids = Vec::new();
    for id in 1..=5 {
        tids.push(table.insert(&person(id, "row"))?);
    }
    table.delete(tids[2])?;

    let mut ids = Vec::new();
    table.scan(|_, values| {
        let Value::Int64(id) = values[0] else {
            panic!("first column must decode as Int64");
        };
        ids.push(id);
        Ok(())
    })?;
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 4, 5]);
    db.close()?;
    Ok(())
}

#[test]
fn update_preserves_tid_and_scan_sees_it_once() -> Result<()> {
    let dir = tempdir().unwrap();
    let mut db = Database::open(dir.path())?;
    let mut table = db.create_table("people", people_schema())?;

    let tid = table.insert(&person(7, "short"))?;
    table.insert(&person(8, "neighbor"))?;

    let long_name = "n".repeat(300);
    table.update(tid, &person(7, &long_name))?;
    assert_eq!(table.get(tid)?, person(7, &long_name));

    let mut sightings = 0;
    table.scan(|_, values| {
        if values[0] == Value::Int64(7) {
            sightings += 1;
            assert_eq!(values[1], Value::Text(long_name.clone()));
        }
        Ok(())
    })?;
    assert_eq!(sightings, 1, "the updated row appears exactly once");
    db.close()?;
    Ok(())
}

#[test]
fn rows_survive_close_and_reopen() -> Result<()> {
    let dir = tempdir().unwrap();
    let tid = {
        let mut db = Database::open(dir.path())?;
        let mut table = db.create_table("people", people_schema())?;
        let tid = table.insert(&person(1, "durable"))?;
        table.insert(&person(2, "also durable"))?;
        db.close()?;
        tid
    };

    let mut db = Database::open(dir.path())?;
    let table = db.open_table("people")?;
    assert_eq!(table.page_count(), 1, "page count came back from the sidecar");
    assert_eq!(table.get(tid)?, person(1, "durable"));

    let mut count = 0;
    table.scan(|_, _| {
        count += 1;
        Ok(())
    })?;
    assert_eq!(count, 2);
    db.close()?;
    Ok(())
}

#[test]
fn many_rows_roll_across_pages_and_persist() -> Result<()> {
    let dir = tempdir().unwrap();
    let cfg = DbConfig::new(dir.path()).fsync_meta(false);
    let rows = 2_000;
    {
        let mut db = Database::open_with_config(cfg.clone())?;
        let mut table = db.create_table("bulk", people_schema())?;
        for id in 0..rows {
            table.insert(&person(id, "some medium length payload text"))?;
        }
        assert!(table.page_count() > 1);
        db.close()?;
    }

    let mut db = Database::open_with_config(cfg)?;
    let table = db.open_table("bulk")?;
    let mut seen = 0i64;
    table.scan(|_, values| {
        assert_eq!(values[1], Value::Text("some medium length payload text".into()));
        seen += 1;
        Ok(())
    })?;
    assert_eq!(seen, rows);
    db.close()?;
    Ok(())
}

#[test]
fn seeded_mixed_workload_matches_a_model() -> Result<()> {
    let dir = tempdir().unwrap();
    let cfg = DbConfig::new(dir.path()).fsync_meta(false);
    let mut db = Database::open_with_config(cfg)?;
    let mut table = db.create_table("model", people_schema())?;

    let mut rng = ChaCha8Rng::seed_from_u64(0xBEEF);
    let mut live: Vec<(Tid, i64)> = Vec::new();
    for round in 0..1_500i64 {
        let op = rng.gen_range(0u32..10);
        if op < 6 || live.is_empty() {
            let tid = table.insert(&person(round, "seeded row"))?;
            live.push((tid, round));
        } else if op < 8 {
            let at = rng.gen_range(0..live.len());
            let tid = live[at].0;
            match table.update(tid, &person(round, &"u".repeat(rng.gen_range(1..64)))) {
                Ok(()) => live[at].1 = round,
                // a grown row may not fit its (full) page; the old version stays
                Err(TablaError::PageFull) => {}
                Err(err) => return Err(err),
            }
        } else {
            let at = rng.gen_range(0..live.len());
            let (tid, _) = live.swap_remove(at);
            table.delete(tid)?;
        }
    }

    let mut expected: Vec<i64> = live.iter().map(|(_, id)| *id).collect();
    expected.sort_unstable();
    let mut seen = Vec::new();
    table.scan(|_, values| {
        let Value::Int64(id) = values[0] else {
            panic!("first column must decode as Int64");
        };
        seen.push(id);
        Ok(())
    })?;
    seen.sort_unstable();
    assert_eq!(seen, expected, "scan agrees with the in-memory model");

    // every live tid still resolves, including rows grown through redirects
    for (tid, id) in &live {
        assert_eq!(table.get(*tid)?[0], Value::Int64(*id));
    }
    db.close()?;
    Ok(())
}

#[test]
fn closed_handle_rejects_operations() -> Result<()> {
    let dir = tempdir().unwrap();
    let mut db = Database::open(dir.path())?;
    db.create_table("t", people_schema())?;
    db.close()?;

    match db.open_table("t") {
        Err(TablaError::Closed) => {}
        other => panic!("expected Closed, got {other:?}"),
    }
    match db.list_tables() {
        Err(TablaError::Closed) => {}
        other => panic!("expected Closed, got {other:?}"),
    }
    Ok(())
}
