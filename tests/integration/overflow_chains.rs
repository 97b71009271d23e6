#![allow(missing_docs)]

use tabla::{Column, ColumnType, Database, OverflowRef, Result, Schema, TablaError};
use tempfile::tempdir;

fn schema() -> Schema {
    Schema::new(vec![Column::new("id", ColumnType::Int64, false)]).unwrap()
}

#[test]
fn twelve_kilobyte_value_roundtrips() -> Result<()> {
    let dir = tempdir().unwrap();
    let mut db = Database::open(dir.path())?;
    let mut table = db.create_table("blobs", schema())?;

    let value = vec![b'X'; 12_012];
    let r = table.overflow().write(&value)?;
    assert_eq!(r.length, 12_012);
    assert!(r.first_page_id >= 1, "page 0 is the meta page");

    assert_eq!(table.overflow().read(r)?, value);
    db.close()?;
    Ok(())
}

#[test]
fn chains_survive_reopen_and_recycle_after_free() -> Result<()> {
    let dir = tempdir().unwrap();
    let (kept, freed) = {
        let mut db = Database::open(dir.path())?;
        let mut table = db.create_table("blobs", schema())?;
        let kept = table.overflow().write(&vec![1u8; 20_000])?;
        let freed = table.overflow().write(&vec![2u8; 20_000])?;
        db.close()?;
        (kept, freed)
    };

    let mut db = Database::open(dir.path())?;
    let mut table = db.open_table("blobs")?;
    assert_eq!(table.overflow().read(kept)?, vec![1u8; 20_000]);
    assert_eq!(table.overflow().read(freed)?, vec![2u8; 20_000]);

    table.overflow().free(freed)?;
    // the freed chain feeds the next allocation instead of growing the file
    let reused = table.overflow().write(&vec![3u8; 20_000])?;
    assert_eq!(reused.first_page_id, freed.first_page_id);
    assert_eq!(table.overflow().read(reused)?, vec![3u8; 20_000]);
    assert_eq!(
        table.overflow().read(kept)?,
        vec![1u8; 20_000],
        "recycling never touches live chains"
    );
    db.close()?;
    Ok(())
}

#[test]
fn invalid_references_are_rejected() -> Result<()> {
    let dir = tempdir().unwrap();
    let mut db = Database::open(dir.path())?;
    let mut table = db.create_table("blobs", schema())?;

    for bad in [
        OverflowRef {
            first_page_id: 1,
            length: 0,
        },
        OverflowRef {
            first_page_id: 0,
            length: 16,
        },
    ] {
        match table.overflow().read(bad) {
            Err(TablaError::InvalidArgument(_)) => {}
            other => panic!("expected InvalidArgument for {bad:?}, got {other:?}"),
        }
    }
    db.close()?;
    Ok(())
}
