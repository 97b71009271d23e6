//! File abstractions: positioned I/O, segmented file sets, JSON sidecars.
//!
//! A relation's on-disk identity is a *file set*: a `(directory, base name)`
//! pair whose data lives in `<base>` plus 1 GiB rollover segments named
//! `<base>.1`, `<base>.2`, … The buffer pool and storage manager only see the
//! [`FileSet`] trait, so tests can substitute the in-memory implementation.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, TablaError};

/// Trait for performing positioned file I/O operations.
pub trait FileIo: Send + Sync {
    /// Reads into `dst` starting at `off`, stopping early at end-of-file.
    /// Returns the number of bytes actually read.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<usize>;
    /// Writes all of `src` at `off`, extending the file as needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Synchronizes file contents and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A logical relation's backing files, addressed by segment number.
pub trait FileSet: Send + Sync {
    /// Process-unique identity; the buffer pool keys its page table with it.
    fn id(&self) -> u64;
    /// Opens segment `no`, creating it if missing.
    fn open_segment(&self, no: u32) -> Result<Arc<dyn FileIo>>;
    /// Returns the byte length of segment `no`, or `None` if it does not
    /// exist. Never creates the segment.
    fn segment_len(&self, no: u32) -> Result<Option<u64>>;
    /// Human-readable identity for diagnostics and error messages.
    fn describe(&self) -> String;
}

static NEXT_FILE_SET_ID: AtomicU64 = AtomicU64::new(1);

fn next_file_set_id() -> u64 {
    NEXT_FILE_SET_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(unix)]
mod plat {
    use std::fs::{DirBuilder, File, OpenOptions};
    use std::io;
    use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt};
    use std::path::Path;

    pub fn create_dirs(path: &Path) -> io::Result<()> {
        match DirBuilder::new().recursive(true).mode(0o755).create(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn open_rw(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(path)
    }

    pub fn read_at(file: &File, off: u64, dst: &mut [u8]) -> io::Result<usize> {
        let mut total = 0usize;
        while total < dst.len() {
            let read = file.read_at(&mut dst[total..], off + total as u64)?;
            if read == 0 {
                break;
            }
            total += read;
        }
        Ok(total)
    }

    pub fn write_all(file: &File, off: u64, src: &[u8]) -> io::Result<()> {
        let mut total = 0usize;
        while total < src.len() {
            let written = file.write_at(&src[total..], off + total as u64)?;
            if written == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            total += written;
        }
        Ok(())
    }
}

#[cfg(windows)]
mod plat {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::windows::fs::FileExt;
    use std::path::Path;

    pub fn create_dirs(path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    pub fn open_rw(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    pub fn read_at(file: &File, off: u64, dst: &mut [u8]) -> io::Result<usize> {
        let mut total = 0usize;
        while total < dst.len() {
            let read = file.seek_read(&mut dst[total..], off + total as u64)?;
            if read == 0 {
                break;
            }
            total += read;
        }
        Ok(total)
    }

    pub fn write_all(file: &File, off: u64, src: &[u8]) -> io::Result<()> {
        let mut total = 0usize;
        while total < src.len() {
            let written = file.seek_write(&src[total..], off + total as u64)?;
            if written == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                ));
            }
            total += written;
        }
        Ok(())
    }
}

/// Positioned I/O over a standard [`File`].
pub struct StdFileIo {
    file: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already-open file handle.
    pub fn new(file: File) -> Self {
        Self {
            file: Arc::new(file),
        }
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<usize> {
        Ok(plat::read_at(&self.file, off, dst)?)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        Ok(plat::write_all(&self.file, off, src)?)
    }

    fn sync_all(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// Local-filesystem file set with 1 GiB segment rollover naming.
pub struct DiskFileSet {
    id: u64,
    dir: PathBuf,
    base: String,
    handles: Mutex<HashMap<u32, Arc<StdFileIo>>>,
}

impl DiskFileSet {
    /// Binds a file set to `<dir>/<base>`. No files are touched until a
    /// segment is opened.
    pub fn new(dir: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        Self {
            id: next_file_set_id(),
            dir: dir.into(),
            base: base.into(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// The directory holding this file set's segments.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The base file name (segment 0).
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Path of a sibling metadata sidecar `<base><suffix>`.
    pub fn sidecar_path(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.base, suffix))
    }

    fn segment_name(base: &str, no: u32) -> String {
        if no == 0 {
            base.to_string()
        } else {
            format!("{base}.{no}")
        }
    }

    fn segment_path(&self, no: u32) -> PathBuf {
        self.dir.join(Self::segment_name(&self.base, no))
    }

    /// Enumerates segment numbers present on disk, sorted ascending. Robust
    /// to gaps in the numbering; an absent directory yields an empty list.
    pub fn existing_segments(&self) -> Result<Vec<u32>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == self.base {
                found.push(0);
            } else if let Some(rest) = name.strip_prefix(&format!("{}.", self.base)) {
                if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(no) = rest.parse::<u32>() {
                        if no > 0 {
                            found.push(no);
                        }
                    }
                }
            }
        }
        found.sort_unstable();
        Ok(found)
    }

    /// Removes every segment file. Missing files are ignored.
    pub fn remove_all(&self) -> Result<()> {
        self.handles.lock().clear();
        for no in self.existing_segments()? {
            match fs::remove_file(self.segment_path(no)) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        debug!(file_set = %self.describe(), "io.remove_all");
        Ok(())
    }

    /// Renames every segment file to use `new_base`. Fails without touching
    /// anything if any target name is already taken.
    pub fn rename_all(&self, new_base: &str) -> Result<()> {
        let segments = self.existing_segments()?;
        for &no in &segments {
            let target = self.dir.join(Self::segment_name(new_base, no));
            if target.exists() {
                return Err(TablaError::AlreadyExists(
                    target.to_string_lossy().into_owned(),
                ));
            }
        }
        self.handles.lock().clear();
        for &no in &segments {
            let target = self.dir.join(Self::segment_name(new_base, no));
            fs::rename(self.segment_path(no), target)?;
        }
        debug!(file_set = %self.describe(), new_base, "io.rename_all");
        Ok(())
    }
}

impl FileSet for DiskFileSet {
    fn id(&self) -> u64 {
        self.id
    }

    fn open_segment(&self, no: u32) -> Result<Arc<dyn FileIo>> {
        let mut handles = self.handles.lock();
        if let Some(io) = handles.get(&no) {
            return Ok(Arc::clone(io) as Arc<dyn FileIo>);
        }
        plat::create_dirs(&self.dir)?;
        let file = plat::open_rw(&self.segment_path(no))?;
        let io = Arc::new(StdFileIo::new(file));
        handles.insert(no, Arc::clone(&io));
        Ok(io)
    }

    fn segment_len(&self, no: u32) -> Result<Option<u64>> {
        match fs::metadata(self.segment_path(no)) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn describe(&self) -> String {
        self.dir.join(&self.base).to_string_lossy().into_owned()
    }
}

/// In-memory file backed by a growable byte vector.
pub struct MemFile {
    data: Mutex<Vec<u8>>,
}

impl FileIo for MemFile {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<usize> {
        let data = self.data.lock();
        let off = off as usize;
        if off >= data.len() {
            return Ok(0);
        }
        let available = data.len() - off;
        let n = available.min(dst.len());
        dst[..n].copy_from_slice(&data[off..off + n]);
        Ok(n)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        let end = off as usize + src.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[off as usize..end].copy_from_slice(src);
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.lock().len() as u64)
    }
}

/// In-memory file set: behaves like [`DiskFileSet`] minus persistence.
/// Used by unit tests to exercise page-level code without a tempdir.
pub struct MemFileSet {
    id: u64,
    segments: Mutex<HashMap<u32, Arc<MemFile>>>,
}

impl MemFileSet {
    /// Creates an empty in-memory file set.
    pub fn new() -> Self {
        Self {
            id: next_file_set_id(),
            segments: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemFileSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSet for MemFileSet {
    fn id(&self) -> u64 {
        self.id
    }

    fn open_segment(&self, no: u32) -> Result<Arc<dyn FileIo>> {
        let mut segments = self.segments.lock();
        let file = segments.entry(no).or_insert_with(|| {
            Arc::new(MemFile {
                data: Mutex::new(Vec::new()),
            })
        });
        Ok(Arc::clone(file) as Arc<dyn FileIo>)
    }

    fn segment_len(&self, no: u32) -> Result<Option<u64>> {
        let segments = self.segments.lock();
        match segments.get(&no) {
            Some(file) => Ok(Some(file.data.lock().len() as u64)),
            None => Ok(None),
        }
    }

    fn describe(&self) -> String {
        format!("mem#{}", self.id)
    }
}

/// Serializes `value` as pretty JSON and writes it to `path` atomically:
/// temp file in the same directory, fsync, rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T, fsync: bool) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|err| TablaError::Meta(format!("failed to serialize {}: {err}", path.display())))?;
    let tmp_path = path.with_extension("tmp");
    {
        use std::io::Write;
        let mut file = File::create(&tmp_path)?;
        file.write_all(&data)?;
        if fsync {
            file.sync_all()?;
        }
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads a JSON sidecar, returning `None` when the file does not exist and
/// `Meta` when it exists but cannot be parsed.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&data)
        .map_err(|err| TablaError::Meta(format!("{} parse error: {err}", path.display())))?;
    Ok(Some(value))
}
