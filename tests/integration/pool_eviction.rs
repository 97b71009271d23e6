#![allow(missing_docs)]

use std::sync::Arc;

use tabla::io::{DiskFileSet, FileSet};
use tabla::pager::disk;
use tabla::storage::page::PAGE_SIZE;
use tabla::{BufferPool, PoolView, Result, TablaError};
use tempfile::tempdir;

fn single_frame_view(dir: &std::path::Path) -> (PoolView, Arc<dyn FileSet>) {
    let pool = Arc::new(BufferPool::new(1).unwrap());
    let fs: Arc<dyn FileSet> = Arc::new(DiskFileSet::new(dir, "relation"));
    (PoolView::new(pool, Arc::clone(&fs)), fs)
}

#[test]
fn eviction_flushes_dirty_page_to_disk() -> Result<()> {
    let dir = tempdir().unwrap();
    let (view, fs) = single_frame_view(dir.path());

    {
        let guard = view.get_page(0)?;
        {
            let mut data = guard.data_mut();
            data[0] = 42;
        }
        guard.mark_dirty();
    }

    // the pool has exactly one frame: pinning page 1 evicts page 0
    drop(view.get_page(1)?);
    assert_eq!(view.pool().stats().evictions, 1);

    let mut buf = vec![0u8; PAGE_SIZE];
    disk::read_page(fs.as_ref(), 0, &mut buf)?;
    assert_eq!(buf[0], 42, "the dirty byte reached disk through eviction");
    Ok(())
}

#[test]
fn pinned_page_blocks_eviction() -> Result<()> {
    let dir = tempdir().unwrap();
    let (view, _fs) = single_frame_view(dir.path());

    let held = view.get_page(0)?;
    match view.get_page(1) {
        Err(TablaError::NoFreeFrame) => {}
        other => panic!("expected NoFreeFrame, got {other:?}"),
    }
    drop(held);
    drop(view.get_page(1)?);
    Ok(())
}

#[test]
fn flush_makes_disk_match_memory() -> Result<()> {
    let dir = tempdir().unwrap();
    let pool = Arc::new(BufferPool::new(8)?);
    let fs: Arc<dyn FileSet> = Arc::new(DiskFileSet::new(dir.path(), "relation"));
    let view = PoolView::new(Arc::clone(&pool), Arc::clone(&fs));

    let mut expected = Vec::new();
    for page_id in 0..4u32 {
        let guard = view.get_page(page_id)?;
        {
            let mut data = guard.data_mut();
            data[100] = page_id as u8 + 1;
            expected.push(data.to_vec());
        }
        guard.mark_dirty();
    }
    pool.flush_all()?;

    for (page_id, image) in expected.iter().enumerate() {
        let mut buf = vec![0u8; PAGE_SIZE];
        disk::read_page(fs.as_ref(), page_id as u32, &mut buf)?;
        assert_eq!(&buf, image, "page {page_id} on disk matches memory");
    }

    // every dirty bit is clear: a second flush writes nothing
    let flushes = pool.stats().flushes;
    pool.flush_all()?;
    assert_eq!(pool.stats().flushes, flushes);
    Ok(())
}

#[test]
fn hit_ratio_reflects_reuse() -> Result<()> {
    let dir = tempdir().unwrap();
    let pool = Arc::new(BufferPool::new(4)?);
    let fs: Arc<dyn FileSet> = Arc::new(DiskFileSet::new(dir.path(), "relation"));
    let view = PoolView::new(Arc::clone(&pool), fs);

    for _ in 0..10 {
        drop(view.get_page(0)?);
    }
    let stats = pool.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 9);
    assert_eq!(stats.capacity, 4);
    assert_eq!(stats.cached, 1);
    Ok(())
}
