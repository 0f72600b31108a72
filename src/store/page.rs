//! Term page files: the on-disk unit of the streaming store.
//!
//! A page is `[u32 term_bytes][u32 num_terms]` (little-endian) followed by
//! exactly `term_bytes` bytes of concatenated term records. Pages are
//! written whole to a temporary sibling and renamed into place, so a reader
//! never observes a header without its body. Reads go through a read-only
//! memory map and are validated byte-exact against the header.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::Mmap;
use serde::Serialize;

use crate::error::PageError;
use crate::term::Term;

use super::pool::TermPool;

/// Size of the page header.
pub const PAGE_HEADER_BYTES: usize = 8;

pub type PageResult<T> = std::result::Result<T, PageError>;

/// Path of page `index` inside `dir`.
pub fn page_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("page-{index:06}.bin"))
}

fn io_error(path: &Path, source: std::io::Error) -> PageError {
    PageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// I/O accounting
// ---------------------------------------------------------------------------

/// Counters of page traffic, shared by the writer and every reader of a
/// store. Bytes include the page header.
#[derive(Debug, Default)]
pub struct IoStats {
    pages_written: AtomicU64,
    bytes_written: AtomicU64,
    pages_read: AtomicU64,
    bytes_read: AtomicU64,
    cache_hits: AtomicU64,
}

/// Point-in-time copy of [`IoStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IoSnapshot {
    pub pages_written: u64,
    pub bytes_written: u64,
    pub pages_read: u64,
    pub bytes_read: u64,
    pub cache_hits: u64,
}

impl IoStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, bytes: usize) {
        self.pages_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: usize) {
        self.pages_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A page served from the resident cache without touching disk.
    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IoSnapshot {
        IoSnapshot {
            pages_written: self.pages_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            pages_read: self.pages_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.pages_written.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.pages_read.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

/// Serializes term batches into page files, reusing one byte buffer.
#[derive(Debug)]
pub struct PageWriter {
    dir: PathBuf,
    buf: Vec<u8>,
    stats: Arc<IoStats>,
}

impl PageWriter {
    pub fn new(dir: impl Into<PathBuf>, stats: Arc<IoStats>) -> Self {
        Self {
            dir: dir.into(),
            buf: Vec::new(),
            stats,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `terms` as page `index`. Returns the page size in bytes.
    pub fn write(&mut self, index: usize, terms: &[Term]) -> PageResult<usize> {
        let path = page_path(&self.dir, index);
        self.buf.clear();
        self.buf.extend_from_slice(&[0u8; PAGE_HEADER_BYTES]);
        for term in terms {
            term.encode(&mut self.buf);
        }
        let term_bytes = self.buf.len() - PAGE_HEADER_BYTES;
        let num_terms = terms.len();
        if term_bytes > u32::MAX as usize || num_terms > u32::MAX as usize {
            return Err(PageError::Corrupt {
                path,
                message: format!("page of {term_bytes} bytes does not fit a u32 header"),
            });
        }
        self.buf[0..4].copy_from_slice(&(term_bytes as u32).to_le_bytes());
        self.buf[4..8].copy_from_slice(&(num_terms as u32).to_le_bytes());

        let tmp = path.with_extension("bin.tmp");
        {
            let mut file = File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
            file.write_all(&self.buf).map_err(|e| io_error(&tmp, e))?;
            file.flush().map_err(|e| io_error(&tmp, e))?;
            let written = file.metadata().map_err(|e| io_error(&tmp, e))?.len() as usize;
            if written != self.buf.len() {
                return Err(PageError::ShortWrite {
                    path: tmp,
                    expected: self.buf.len(),
                    actual: written,
                });
            }
        }
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;

        self.stats.record_write(self.buf.len());
        tracing::debug!(
            page = index,
            terms = num_terms,
            bytes = self.buf.len(),
            "wrote term page"
        );
        Ok(self.buf.len())
    }
}

// ---------------------------------------------------------------------------
// Read path
// ---------------------------------------------------------------------------

/// Read page `path` into `pool`, replacing its contents. Returns the number
/// of terms loaded.
pub fn read_page(path: &Path, pool: &mut TermPool, stats: &IoStats) -> PageResult<usize> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let len = file.metadata().map_err(|e| io_error(path, e))?.len() as usize;
    if len < PAGE_HEADER_BYTES {
        return Err(PageError::ShortRead {
            path: path.to_path_buf(),
            expected: PAGE_HEADER_BYTES,
            actual: len,
        });
    }

    // Safety: page files are private to their store and immutable once
    // renamed into place; nothing truncates them while mapped.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| io_error(path, e))?;
    let loaded = decode_page(path, &mmap, pool);
    if loaded.is_err() {
        pool.clear();
    }
    let loaded = loaded?;

    stats.record_read(len);
    tracing::debug!(
        page = %path.display(),
        terms = loaded,
        bytes = len,
        "read term page"
    );
    Ok(loaded)
}

/// Validate and decode one page image. `path` is only used for errors.
pub fn decode_page(path: &Path, bytes: &[u8], pool: &mut TermPool) -> PageResult<usize> {
    if bytes.len() < PAGE_HEADER_BYTES {
        return Err(PageError::ShortRead {
            path: path.to_path_buf(),
            expected: PAGE_HEADER_BYTES,
            actual: bytes.len(),
        });
    }
    let declared = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let num_terms = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let body = &bytes[PAGE_HEADER_BYTES..];

    if body.len() < declared {
        return Err(PageError::ShortRead {
            path: path.to_path_buf(),
            expected: PAGE_HEADER_BYTES + declared,
            actual: bytes.len(),
        });
    }
    if body.len() > declared {
        return Err(PageError::HeaderMismatch {
            path: path.to_path_buf(),
            declared,
            available: body.len(),
        });
    }
    if num_terms > pool.capacity() {
        return Err(PageError::PoolOverflow {
            terms: num_terms,
            capacity: pool.capacity(),
        });
    }

    pool.clear();
    let mut input = body;
    for i in 0..num_terms {
        let slot = pool.next_slot()?;
        slot.decode_into(&mut input)
            .map_err(|message| PageError::Corrupt {
                path: path.to_path_buf(),
                message: format!("record {i}: {message}"),
            })?;
    }
    if !input.is_empty() {
        return Err(PageError::Corrupt {
            path: path.to_path_buf(),
            message: format!(
                "{} trailing bytes after {num_terms} records",
                input.len()
            ),
        });
    }
    Ok(num_terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomId;
    use crate::rule::RuleId;
    use crate::term::{PotentialKind, Weight};
    use tempfile::TempDir;

    fn terms(n: u32) -> Vec<Term> {
        (0..n)
            .map(|i| {
                Term::new(
                    RuleId::new(i % 3),
                    PotentialKind::Hinge,
                    Weight::Soft(1.0 + i as f32),
                    vec![AtomId::new(i), AtomId::new(i + 1)],
                    vec![1.0, -1.0],
                    -0.5,
                )
                .unwrap()
            })
            .collect()
    }

    fn write_one(dir: &TempDir, terms: &[Term]) -> (PathBuf, Arc<IoStats>) {
        let stats = Arc::new(IoStats::new());
        let mut writer = PageWriter::new(dir.path(), Arc::clone(&stats));
        writer.write(0, terms).unwrap();
        (page_path(dir.path(), 0), stats)
    }

    #[test]
    fn write_then_read_restores_terms() {
        let dir = TempDir::new().unwrap();
        let original = terms(4);
        let (path, stats) = write_one(&dir, &original);
        let mut pool = TermPool::new(4);
        assert_eq!(read_page(&path, &mut pool, &stats).unwrap(), 4);
        assert_eq!(pool.as_slice(), original.as_slice());

        let io = stats.snapshot();
        assert_eq!(io.pages_written, 1);
        assert_eq!(io.pages_read, 1);
        assert_eq!(io.bytes_read, io.bytes_written);
        assert!(!path.with_extension("bin.tmp").exists());
    }

    #[test]
    fn header_declares_body_exactly() {
        let dir = TempDir::new().unwrap();
        let original = terms(3);
        let (path, _) = write_one(&dir, &original);
        let bytes = fs::read(&path).unwrap();
        let declared = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let count = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(declared, bytes.len() - PAGE_HEADER_BYTES);
        assert_eq!(count, 3);
        let expected: usize = original.iter().map(Term::encoded_len).sum();
        assert_eq!(declared, expected);
    }

    #[test]
    fn truncated_body_is_a_short_read() {
        let dir = TempDir::new().unwrap();
        let (path, stats) = write_one(&dir, &terms(2));
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();
        let mut pool = TermPool::new(2);
        let err = read_page(&path, &mut pool, &stats).unwrap_err();
        assert!(matches!(err, PageError::ShortRead { .. }));
        assert!(pool.is_empty());
    }

    #[test]
    fn truncated_header_is_a_short_read() {
        let dir = TempDir::new().unwrap();
        let path = page_path(dir.path(), 0);
        fs::write(&path, [1u8, 0, 0]).unwrap();
        let mut pool = TermPool::new(2);
        assert!(matches!(
            read_page(&path, &mut pool, &IoStats::new()),
            Err(PageError::ShortRead {
                expected: 8,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn extra_bytes_are_a_header_mismatch() {
        let dir = TempDir::new().unwrap();
        let (path, stats) = write_one(&dir, &terms(2));
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        fs::write(&path, &bytes).unwrap();
        let mut pool = TermPool::new(2);
        assert!(matches!(
            read_page(&path, &mut pool, &stats),
            Err(PageError::HeaderMismatch { available, declared, .. }) if available == declared + 4
        ));
    }

    #[test]
    fn page_larger_than_pool_overflows() {
        let dir = TempDir::new().unwrap();
        let (path, stats) = write_one(&dir, &terms(3));
        let mut pool = TermPool::new(2);
        assert!(matches!(
            read_page(&path, &mut pool, &stats),
            Err(PageError::PoolOverflow {
                terms: 3,
                capacity: 2
            })
        ));
    }

    #[test]
    fn wrong_term_count_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_one(&dir, &terms(2));
        let mut bytes = fs::read(&path).unwrap();
        bytes[4..8].copy_from_slice(&1u32.to_le_bytes());
        let mut pool = TermPool::new(4);
        assert!(matches!(
            decode_page(&path, &bytes, &mut pool),
            Err(PageError::Corrupt { .. })
        ));
    }

    #[test]
    fn missing_page_reports_its_path() {
        let dir = TempDir::new().unwrap();
        let path = page_path(dir.path(), 42);
        let mut pool = TermPool::new(1);
        match read_page(&path, &mut pool, &IoStats::new()) {
            Err(PageError::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn page_names_are_zero_padded() {
        let p = page_path(Path::new("/pages"), 7);
        assert_eq!(p, PathBuf::from("/pages/page-000007.bin"));
    }
}
