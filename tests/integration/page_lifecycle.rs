#![allow(missing_docs)]

use tabla::storage::page::{SlottedPage, HEADER_SIZE, PAGE_SIZE, SLOT_SIZE};
use tabla::{Result, TablaError};

const SPECIAL: usize = PAGE_SIZE - 8;

#[test]
fn fresh_page_insert_read_delete() -> Result<()> {
    let mut buf = vec![0u8; PAGE_SIZE];
    SlottedPage::format(&mut buf, 0)?;
    let mut page = SlottedPage::from_bytes(&mut buf)?;

    let slot = page.insert_tuple(b"hello")?;
    assert_eq!(slot, 0);
    assert_eq!(page.slot_count(), 1, "lower advanced by one slot");
    assert_eq!(
        page.free_space(),
        SPECIAL - HEADER_SIZE - SLOT_SIZE - 5,
        "upper retreated by the payload length"
    );

    let slot = page.insert_tuple(b"world!")?;
    assert_eq!(slot, 1);
    assert_eq!(page.read_tuple(0)?, b"hello");
    assert_eq!(page.read_tuple(1)?, b"world!");

    page.delete_tuple(0)?;
    match page.read_tuple(0) {
        Err(TablaError::NotFound(_)) => {}
        other => panic!("deleted slot must read as NotFound, got {other:?}"),
    }
    Ok(())
}

#[test]
fn growing_update_redirects_within_the_page() -> Result<()> {
    let mut buf = vec![0u8; PAGE_SIZE];
    SlottedPage::format(&mut buf, 5)?;
    let mut page = SlottedPage::from_bytes(&mut buf)?;

    page.insert_tuple(b"12345")?;
    let grown = vec![b'g'; 60];
    page.update_tuple(0, &grown)?;

    assert_eq!(
        page.read_tuple(0)?,
        grown.as_slice(),
        "slot 0 still resolves to the row"
    );
    assert!(
        !page.is_live(0)?,
        "slot 0 itself is now a redirect, not a live tuple"
    );

    // exactly one live slot carries the payload
    let live: Vec<u16> = (0..page.slot_count())
        .filter(|&slot| page.is_live(slot).unwrap())
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(page.read_tuple(live[0])?, grown.as_slice());
    Ok(())
}

#[test]
fn header_invariants_hold_while_filling() -> Result<()> {
    let mut buf = vec![0u8; PAGE_SIZE];
    SlottedPage::format(&mut buf, 1)?;
    let mut page = SlottedPage::from_bytes(&mut buf)?;

    let payload = [9u8; 100];
    loop {
        let before = page.free_space();
        match page.insert_tuple(&payload) {
            Ok(_) => {
                assert_eq!(page.free_space(), before - payload.len() - SLOT_SIZE);
                let n = page.slot_count() as usize;
                assert_eq!(
                    HEADER_SIZE + n * SLOT_SIZE,
                    SPECIAL - page.free_space() - n * payload.len(),
                    "lower and upper stay consistent with the slot count"
                );
            }
            Err(TablaError::PageFull) => break,
            Err(other) => panic!("unexpected error while filling: {other:?}"),
        }
    }
    assert!(page.free_space() < payload.len() + SLOT_SIZE);
    Ok(())
}
