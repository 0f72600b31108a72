//! Out-of-core term store.
//!
//! Terms are grounded straight into a pooled page buffer and flushed to disk
//! one page at a time; every optimization sweep replays the pages through
//! the same pool. The component index and per-rule counts are built once on
//! the write path and never rebuilt on replay.
//!
//! Write path: [`StreamingTermStore::grounding_iter`] (or `add` + `seal`).
//! Read path: [`StreamingTermStore::cache_iter`], or the store itself as a
//! [`TermStream`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tempfile::TempDir;

use crate::atom::AtomStore;
use crate::cancel::CancelToken;
use crate::config::StreamingConfig;
use crate::error::{PageError, StoreError};
use crate::rule::RuleId;
use crate::term::{Term, Weight};

use super::page::{self, IoSnapshot, IoStats, PageWriter};
use super::pool::TermPool;
use super::{ComponentIndex, StorePhase, StoreResult, TermId, TermStream, illegal_state};

/// Decoded pages kept resident between sweeps, evicted least recently used.
#[derive(Debug)]
struct ResidentPages {
    capacity: usize,
    pages: Vec<ResidentPage>,
    tick: u64,
}

#[derive(Debug)]
struct ResidentPage {
    page: usize,
    terms: Vec<Term>,
    last_used: u64,
}

impl ResidentPages {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pages: Vec::with_capacity(capacity),
            tick: 0,
        }
    }

    fn lookup(&mut self, page: usize) -> Option<usize> {
        self.tick += 1;
        let slot = self.pages.iter().position(|p| p.page == page)?;
        self.pages[slot].last_used = self.tick;
        Some(slot)
    }

    /// Copy the pool's live terms in as `page`, evicting the least recently
    /// used page when full. Returns the slot.
    fn insert(&mut self, page: usize, pool: &TermPool) -> usize {
        self.tick += 1;
        let slot = if self.pages.len() < self.capacity {
            self.pages.push(ResidentPage {
                page,
                terms: Vec::new(),
                last_used: 0,
            });
            self.pages.len() - 1
        } else {
            self.pages
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.last_used)
                .map(|(slot, _)| slot)
                .unwrap_or(0)
        };
        let entry = &mut self.pages[slot];
        entry.page = page;
        entry.last_used = self.tick;
        let live = pool.as_slice();
        entry.terms.truncate(live.len());
        for (i, term) in live.iter().enumerate() {
            match entry.terms.get_mut(i) {
                Some(existing) => existing.assign_from(term),
                None => entry.terms.push(term.clone()),
            }
        }
        slot
    }

    fn get(&self, slot: usize, index: usize) -> Option<&Term> {
        self.pages.get(slot)?.terms.get(index)
    }

    fn set_weight(&mut self, rule: RuleId, weight: Weight) {
        for page in &mut self.pages {
            for term in page.terms.iter_mut().filter(|t| t.rule() == rule) {
                term.set_weight(weight);
            }
        }
    }

    fn clear(&mut self) {
        self.pages.clear();
        self.tick = 0;
    }
}

/// Where the terms of the page being replayed live.
#[derive(Debug, Clone, Copy)]
enum PageSource {
    Pool,
    Resident(usize),
}

/// Replay position within one sweep.
#[derive(Debug)]
struct Cursor {
    page_order: Vec<usize>,
    next_page: usize,
    term_order: Vec<usize>,
    pos: usize,
    source: PageSource,
}

impl Cursor {
    fn new() -> Self {
        Self {
            page_order: Vec::new(),
            next_page: 0,
            term_order: Vec::new(),
            pos: 0,
            source: PageSource::Pool,
        }
    }
}

/// Page-backed term store for term sets larger than memory.
pub struct StreamingTermStore {
    config: StreamingConfig,
    dir: PathBuf,
    owned_dir: Option<TempDir>,
    writer: PageWriter,
    pool: TermPool,
    /// Encoded bytes of the terms pending in the pool (write path).
    pending_bytes: usize,
    /// Terms per written page.
    page_sizes: Vec<usize>,
    num_terms: usize,
    components: ComponentIndex,
    counts: HashMap<RuleId, usize>,
    overrides: HashMap<RuleId, Weight>,
    resident: ResidentPages,
    stats: Arc<IoStats>,
    rng: StdRng,
    cancel: CancelToken,
    phase: StorePhase,
    cursor: Cursor,
}

impl StreamingTermStore {
    /// Open a store writing pages into `config.page_dir`, or into a fresh
    /// temporary directory removed when the store is closed or dropped.
    pub fn new(config: StreamingConfig) -> StoreResult<Self> {
        if config.page_terms == 0 {
            return Err(illegal_state("page_terms must be at least 1"));
        }
        let (dir, owned_dir) = match &config.page_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|source| PageError::Io {
                    path: dir.clone(),
                    source,
                })?;
                (dir.clone(), None)
            }
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("hlmrf-pages-")
                    .tempdir()
                    .map_err(|source| PageError::Io {
                        path: std::env::temp_dir(),
                        source,
                    })?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };
        let stats = Arc::new(IoStats::new());
        tracing::info!(
            dir = %dir.display(),
            page_terms = config.page_terms,
            cache_pages = config.cache_pages,
            "opened streaming term store"
        );
        Ok(Self {
            writer: PageWriter::new(dir.clone(), Arc::clone(&stats)),
            pool: TermPool::new(config.page_terms),
            pending_bytes: 0,
            page_sizes: Vec::new(),
            num_terms: 0,
            components: ComponentIndex::new(),
            counts: HashMap::new(),
            overrides: HashMap::new(),
            resident: ResidentPages::new(config.cache_pages),
            stats,
            rng: StdRng::seed_from_u64(config.seed),
            cancel: CancelToken::new(),
            phase: StorePhase::Grounding,
            cursor: Cursor::new(),
            dir,
            owned_dir,
            config,
        })
    }

    /// Honor `token` on both the grounding and the replay path.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn set_cancel(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn phase(&self) -> StorePhase {
        self.phase
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn num_pages(&self) -> usize {
        self.page_sizes.len()
    }

    /// Terms held by each written page, in page order.
    pub fn page_sizes(&self) -> &[usize] {
        &self.page_sizes
    }

    pub fn page_path(&self, index: usize) -> PathBuf {
        page::page_path(&self.dir, index)
    }

    pub fn len(&self) -> usize {
        self.num_terms
    }

    pub fn is_empty(&self) -> bool {
        self.num_terms == 0
    }

    pub fn components(&self) -> &ComponentIndex {
        &self.components
    }

    pub fn grounding_counts(&self) -> &HashMap<RuleId, usize> {
        &self.counts
    }

    pub fn io_stats(&self) -> IoSnapshot {
        self.stats.snapshot()
    }

    /// Shared handle on the I/O counters.
    pub fn io_counters(&self) -> Arc<IoStats> {
        Arc::clone(&self.stats)
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Ground one term: index it and buffer it, flushing a full page first.
    pub fn add<A: AtomStore + ?Sized>(&mut self, term: Term, atoms: &mut A) -> StoreResult<TermId> {
        self.push(&term, atoms)
    }

    fn push<A: AtomStore + ?Sized>(&mut self, term: &Term, atoms: &mut A) -> StoreResult<TermId> {
        match self.phase {
            StorePhase::Grounding => {}
            StorePhase::Ready => {
                return Err(illegal_state(
                    "streaming store is sealed; clear() it to ground a new round",
                ));
            }
            StorePhase::Closed => return Err(illegal_state("add on a closed streaming store")),
        }
        for &atom in term.atoms() {
            atoms.check(atom)?;
        }

        let len = term.encoded_len();
        let over_budget = self
            .config
            .page_bytes
            .is_some_and(|budget| self.pending_bytes + len > budget);
        if self.pool.is_full() || (over_budget && !self.pool.is_empty()) {
            self.flush_page()?;
        }

        let id = self.num_terms;
        self.components.insert(id, term, atoms)?;
        *self.counts.entry(term.rule()).or_insert(0) += 1;
        self.pool.push(term)?;
        self.pending_bytes += len;
        self.num_terms += 1;
        Ok(id)
    }

    fn flush_page(&mut self) -> StoreResult<()> {
        if self.pool.is_empty() {
            return Ok(());
        }
        let index = self.page_sizes.len();
        self.writer.write(index, self.pool.as_slice())?;
        self.page_sizes.push(self.pool.len());
        self.pool.clear();
        self.pending_bytes = 0;
        Ok(())
    }

    /// Flush the final partial page and open the store for replay.
    pub fn seal(&mut self) -> StoreResult<()> {
        match self.phase {
            StorePhase::Grounding => {
                self.flush_page()?;
                self.phase = StorePhase::Ready;
                self.cursor = Cursor::new();
                tracing::info!(
                    terms = self.num_terms,
                    pages = self.page_sizes.len(),
                    components = self.components.len(),
                    "streaming grounding finished"
                );
                Ok(())
            }
            StorePhase::Ready => Ok(()),
            StorePhase::Closed => Err(illegal_state("seal on a closed streaming store")),
        }
    }

    /// Lazily ground `source` into pages. The store is sealed when the
    /// source is exhausted.
    pub fn grounding_iter<'s, A, I>(
        &'s mut self,
        atoms: &'s mut A,
        source: I,
    ) -> GroundingIterator<'s, A, I::IntoIter>
    where
        A: AtomStore + ?Sized,
        I: IntoIterator<Item = StoreResult<Term>>,
    {
        GroundingIterator {
            store: self,
            atoms,
            source: source.into_iter(),
            finished: false,
            cancelled: false,
        }
    }

    /// Ground all of `source` and seal. Returns the number of terms added,
    /// or stops early without sealing if the cancel token fires.
    pub fn ground<A, I>(&mut self, atoms: &mut A, source: I) -> StoreResult<usize>
    where
        A: AtomStore + ?Sized,
        I: IntoIterator<Item = StoreResult<Term>>,
    {
        let mut iter = self.grounding_iter(atoms, source);
        let mut added = 0;
        while iter.next_term()?.is_some() {
            added += 1;
        }
        Ok(added)
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    fn ensure_ready(&self) -> StoreResult<()> {
        match self.phase {
            StorePhase::Ready => Ok(()),
            StorePhase::Grounding => Err(illegal_state(
                "streaming store is still grounding; seal() it before replaying",
            )),
            StorePhase::Closed => Err(illegal_state("streaming store is closed")),
        }
    }

    /// Replay cursor over the pages, positioned at the start of a sweep.
    pub fn cache_iter(&mut self) -> StoreResult<CacheIterator<'_>> {
        self.begin_sweep()?;
        Ok(CacheIterator { store: self })
    }

    /// Load the next page of the sweep. `false` once the sweep is done or
    /// the run was cancelled.
    fn advance_page(&mut self) -> StoreResult<bool> {
        let Some(&page) = self.cursor.page_order.get(self.cursor.next_page) else {
            return Ok(false);
        };
        if self.cancel.is_cancelled() {
            tracing::warn!(page, "page replay cancelled");
            return Ok(false);
        }
        self.cursor.next_page += 1;

        let len = if let Some(slot) = self.resident.lookup(page) {
            self.stats.record_hit();
            self.cursor.source = PageSource::Resident(slot);
            self.resident.pages[slot].terms.len()
        } else {
            let path = self.page_path(page);
            let loaded = page::read_page(&path, &mut self.pool, &self.stats)?;
            let expected = self.page_sizes[page];
            if loaded != expected {
                self.pool.clear();
                return Err(PageError::Corrupt {
                    path,
                    message: format!("holds {loaded} terms, {expected} were written"),
                }
                .into());
            }
            if !self.overrides.is_empty() {
                for term in self.pool.as_mut_slice() {
                    if let Some(&weight) = self.overrides.get(&term.rule()) {
                        term.set_weight(weight);
                    }
                }
            }
            if self.resident.capacity > 0 {
                let slot = self.resident.insert(page, &self.pool);
                self.cursor.source = PageSource::Resident(slot);
            } else {
                self.cursor.source = PageSource::Pool;
            }
            loaded
        };

        self.cursor.term_order.clear();
        self.cursor.term_order.extend(0..len);
        if self.config.shuffle_page {
            self.cursor.term_order.shuffle(&mut self.rng);
        }
        self.cursor.pos = 0;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Round management
    // -----------------------------------------------------------------------

    /// Re-weight every term of `rule`. Pages stay untouched; the new weight
    /// is applied as pages are loaded.
    pub fn set_weight(&mut self, rule: RuleId, weight: Weight) -> StoreResult<usize> {
        if self.phase == StorePhase::Closed {
            return Err(illegal_state("set_weight on a closed streaming store"));
        }
        let weight = weight.validate(rule)?;
        self.overrides.insert(rule, weight);
        self.resident.set_weight(rule, weight);
        for term in self.pool.as_mut_slice().iter_mut().filter(|t| t.rule() == rule) {
            term.set_weight(weight);
        }
        Ok(self.counts.get(&rule).copied().unwrap_or(0))
    }

    fn remove_pages(&self) -> StoreResult<()> {
        for index in 0..self.page_sizes.len() {
            let path = self.page_path(index);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(PageError::Io { path, source }.into()),
            }
        }
        Ok(())
    }

    /// Delete every page and reopen for a new grounding round.
    ///
    /// The caller is responsible for resetting the atom store's partition.
    pub fn clear(&mut self) -> StoreResult<()> {
        if self.phase == StorePhase::Closed {
            return Err(illegal_state("clear on a closed streaming store"));
        }
        self.remove_pages()?;
        self.page_sizes.clear();
        self.pool.clear();
        self.pending_bytes = 0;
        self.num_terms = 0;
        self.components.clear();
        self.counts.clear();
        self.overrides.clear();
        self.resident.clear();
        self.cursor = Cursor::new();
        self.rng = StdRng::seed_from_u64(self.config.seed);
        self.phase = StorePhase::Grounding;
        Ok(())
    }

    /// Delete every page (and the owned temporary directory). Every later
    /// operation fails.
    pub fn close(&mut self) -> StoreResult<()> {
        if self.phase == StorePhase::Closed {
            return Ok(());
        }
        self.remove_pages()?;
        self.phase = StorePhase::Closed;
        self.page_sizes.clear();
        self.pool.clear();
        self.resident.clear();
        self.components.clear();
        self.counts.clear();
        if let Some(tmp) = self.owned_dir.take() {
            let path = tmp.path().to_path_buf();
            tmp.close()
                .map_err(|source| StoreError::from(PageError::Io { path, source }))?;
        }
        let io = self.stats.snapshot();
        tracing::debug!(
            pages_written = io.pages_written,
            pages_read = io.pages_read,
            bytes_read = io.bytes_read,
            "closed streaming term store"
        );
        Ok(())
    }
}

impl std::fmt::Debug for StreamingTermStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingTermStore")
            .field("dir", &self.dir)
            .field("phase", &self.phase)
            .field("num_terms", &self.num_terms)
            .field("num_pages", &self.page_sizes.len())
            .finish()
    }
}

impl TermStream for StreamingTermStore {
    fn begin_sweep(&mut self) -> StoreResult<()> {
        self.ensure_ready()?;
        self.cursor.page_order.clear();
        self.cursor.page_order.extend(0..self.page_sizes.len());
        if self.config.randomize_page_access {
            self.cursor.page_order.shuffle(&mut self.rng);
        }
        self.cursor.next_page = 0;
        self.cursor.term_order.clear();
        self.cursor.pos = 0;
        Ok(())
    }

    fn next_term(&mut self) -> StoreResult<Option<&Term>> {
        self.ensure_ready()?;
        while self.cursor.pos >= self.cursor.term_order.len() {
            if !self.advance_page()? {
                return Ok(None);
            }
        }
        let index = self.cursor.term_order[self.cursor.pos];
        self.cursor.pos += 1;
        let term = match self.cursor.source {
            PageSource::Pool => self.pool.get(index),
            PageSource::Resident(slot) => self.resident.get(slot, index),
        };
        term.map(Some)
            .ok_or_else(|| illegal_state("page cursor points past the loaded page"))
    }

    fn num_terms(&self) -> usize {
        self.num_terms
    }
}

/// Single-pass grounding cursor that writes pages as it goes.
///
/// Each call to `next_term` pulls one term from the source, folds it into
/// the component index, and lends back the pooled copy. The final partial
/// page is flushed and the store sealed when the source runs out.
pub struct GroundingIterator<'s, A: AtomStore + ?Sized, I> {
    store: &'s mut StreamingTermStore,
    atoms: &'s mut A,
    source: I,
    finished: bool,
    cancelled: bool,
}

impl<A, I> GroundingIterator<'_, A, I>
where
    A: AtomStore + ?Sized,
    I: Iterator<Item = StoreResult<Term>>,
{
    pub fn next_term(&mut self) -> StoreResult<Option<&Term>> {
        if self.finished {
            return Ok(None);
        }
        if self.store.cancel.is_cancelled() {
            tracing::warn!(
                terms = self.store.num_terms,
                pages = self.store.page_sizes.len(),
                "grounding cancelled"
            );
            self.finished = true;
            self.cancelled = true;
            return Ok(None);
        }
        match self.source.next() {
            Some(term) => {
                let term = term?;
                self.store.push(&term, &mut *self.atoms)?;
                Ok(self.store.pool.as_slice().last())
            }
            None => {
                self.finished = true;
                self.store.seal()?;
                Ok(None)
            }
        }
    }

    /// Whether grounding stopped because the cancel token fired.
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    /// Pages written so far.
    pub fn pages_written(&self) -> usize {
        self.store.page_sizes.len()
    }
}

/// Replay cursor over a sealed [`StreamingTermStore`].
pub struct CacheIterator<'s> {
    store: &'s mut StreamingTermStore,
}

impl CacheIterator<'_> {
    /// Start over for a new sweep without re-grounding.
    pub fn restart(&mut self) -> StoreResult<()> {
        self.store.begin_sweep()
    }

    pub fn next_term(&mut self) -> StoreResult<Option<&Term>> {
        self.store.next_term()
    }
}

impl TermStream for CacheIterator<'_> {
    fn begin_sweep(&mut self) -> StoreResult<()> {
        self.store.begin_sweep()
    }

    fn next_term(&mut self) -> StoreResult<Option<&Term>> {
        self.store.next_term()
    }

    fn num_terms(&self) -> usize {
        self.store.num_terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{AtomId, MemAtomStore};
    use crate::term::PotentialKind;

    fn term(i: u32) -> Term {
        Term::new(
            RuleId::new(i % 2),
            PotentialKind::Hinge,
            Weight::Soft(1.0),
            vec![AtomId::new(i), AtomId::new(i + 1)],
            vec![1.0, -1.0],
            0.0,
        )
        .unwrap()
    }

    fn atoms(n: usize) -> MemAtomStore {
        let mut atoms = MemAtomStore::new();
        for _ in 0..n {
            atoms.add_variable(0.5).unwrap();
        }
        atoms
    }

    fn drain(store: &mut StreamingTermStore) -> Vec<Term> {
        let mut iter = store.cache_iter().unwrap();
        let mut out = Vec::new();
        while let Some(t) = iter.next_term().unwrap() {
            out.push(t.clone());
        }
        out
    }

    fn grounded(config: StreamingConfig, n: u32) -> (StreamingTermStore, MemAtomStore) {
        let mut atoms = atoms(n as usize + 1);
        let mut store = StreamingTermStore::new(config).unwrap();
        let added = store
            .ground(&mut atoms, (0..n).map(|i| Ok(term(i))))
            .unwrap();
        assert_eq!(added, n as usize);
        (store, atoms)
    }

    #[test]
    fn pages_split_by_term_budget() {
        let (store, _) = grounded(StreamingConfig::sequential(2), 5);
        assert_eq!(store.num_pages(), 3);
        assert_eq!(store.page_sizes(), &[2, 2, 1]);
        for i in 0..3 {
            assert!(store.page_path(i).exists());
        }
        assert_eq!(store.phase(), StorePhase::Ready);
    }

    #[test]
    fn pages_split_by_byte_budget() {
        // Each two-atom record is 32 bytes.
        let config = StreamingConfig {
            page_bytes: Some(70),
            ..StreamingConfig::sequential(100)
        };
        let (store, _) = grounded(config, 5);
        assert_eq!(store.page_sizes(), &[2, 2, 1]);
    }

    #[test]
    fn sequential_replay_matches_grounding_order() {
        let (mut store, _) = grounded(StreamingConfig::sequential(2), 5);
        let expected: Vec<Term> = (0..5).map(term).collect();
        assert_eq!(drain(&mut store), expected);
        assert_eq!(drain(&mut store), expected);
        assert_eq!(store.io_stats().pages_read, 6);
    }

    #[test]
    fn shuffled_replay_is_a_permutation() {
        let config = StreamingConfig {
            page_terms: 3,
            seed: 11,
            ..StreamingConfig::default()
        };
        let (mut store, _) = grounded(config, 10);
        let mut seen: Vec<u32> = drain(&mut store)
            .iter()
            .map(|t| t.atoms()[0].get())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn resident_pages_skip_disk() {
        let config = StreamingConfig {
            cache_pages: 3,
            ..StreamingConfig::sequential(2)
        };
        let (mut store, _) = grounded(config, 5);
        let first = drain(&mut store);
        let second = drain(&mut store);
        assert_eq!(first, second);
        let io = store.io_stats();
        assert_eq!(io.pages_read, 3);
        assert_eq!(io.cache_hits, 3);
    }

    #[test]
    fn small_cache_evicts_least_recently_used() {
        let config = StreamingConfig {
            cache_pages: 1,
            ..StreamingConfig::sequential(2)
        };
        let (mut store, _) = grounded(config, 4);
        drain(&mut store);
        drain(&mut store);
        // Two pages through a one-page cache: every load misses.
        assert_eq!(store.io_stats().pages_read, 4);
        assert_eq!(store.io_stats().cache_hits, 0);
    }

    #[test]
    fn components_are_built_on_the_write_path() {
        let (store, _) = grounded(StreamingConfig::sequential(2), 5);
        assert_eq!(store.components().len(), 1);
        assert_eq!(store.components().largest(), 5);
        assert_eq!(store.grounding_counts()[&RuleId::new(0)], 3);
    }

    #[test]
    fn set_weight_applies_on_load() {
        let (mut store, _) = grounded(StreamingConfig::sequential(2), 5);
        assert_eq!(store.set_weight(RuleId::new(1), Weight::Soft(3.0)).unwrap(), 2);
        for t in drain(&mut store) {
            let expected = if t.rule() == RuleId::new(1) { 3.0 } else { 1.0 };
            assert_eq!(t.weight(), Weight::Soft(expected));
        }
    }

    #[test]
    fn grounding_iterator_lends_each_term() {
        let mut atoms = atoms(6);
        let mut store = StreamingTermStore::new(StreamingConfig::sequential(2)).unwrap();
        let mut iter = store.grounding_iter(&mut atoms, (0..5).map(|i| Ok(term(i))));
        let mut firsts = Vec::new();
        while let Some(t) = iter.next_term().unwrap() {
            firsts.push(t.atoms()[0].get());
        }
        assert_eq!(firsts, vec![0, 1, 2, 3, 4]);
        assert_eq!(iter.pages_written(), 3);
        assert!(!iter.cancelled());
    }

    #[test]
    fn cancelled_grounding_writes_no_more_pages() {
        let mut atoms = atoms(10);
        let token = CancelToken::new();
        let mut store = StreamingTermStore::new(StreamingConfig::sequential(2))
            .unwrap()
            .with_cancel(token.clone());
        let mut iter = store.grounding_iter(&mut atoms, (0..9).map(|i| Ok(term(i))));
        for _ in 0..3 {
            iter.next_term().unwrap();
        }
        token.cancel();
        assert!(iter.next_term().unwrap().is_none());
        assert!(iter.cancelled());
        assert_eq!(iter.pages_written(), 1);
        assert_eq!(store.phase(), StorePhase::Grounding);
    }

    #[test]
    fn replay_requires_sealed_store() {
        let mut atoms = atoms(3);
        let mut store = StreamingTermStore::new(StreamingConfig::sequential(2)).unwrap();
        store.add(term(0), &mut atoms).unwrap();
        assert!(matches!(
            store.cache_iter(),
            Err(StoreError::IllegalState { .. })
        ));
        store.seal().unwrap();
        assert!(store.add(term(1), &mut atoms).is_err());
        assert_eq!(drain(&mut store).len(), 1);
    }

    #[test]
    fn clear_removes_pages_and_reopens() {
        let (mut store, mut atoms) = grounded(StreamingConfig::sequential(2), 5);
        let first = store.page_path(0);
        store.clear().unwrap();
        assert!(!first.exists());
        assert_eq!(store.phase(), StorePhase::Grounding);
        assert!(store.is_empty());
        atoms.reset_partition();
        store
            .ground(&mut atoms, (0..3).map(|i| Ok(term(i))))
            .unwrap();
        assert_eq!(store.page_sizes(), &[2, 1]);
    }

    #[test]
    fn cleared_store_replays_like_a_fresh_one() {
        let config = StreamingConfig {
            page_terms: 3,
            seed: 5,
            ..StreamingConfig::default()
        };
        let (mut reused, mut atoms) = grounded(config.clone(), 10);
        drain(&mut reused);
        reused.clear().unwrap();
        atoms.reset_partition();
        reused
            .ground(&mut atoms, (0..10).map(|i| Ok(term(i))))
            .unwrap();

        let (mut fresh, _) = grounded(config, 10);
        assert_eq!(drain(&mut reused), drain(&mut fresh));
    }

    #[test]
    fn close_deletes_owned_directory() {
        let (mut store, _) = grounded(StreamingConfig::sequential(2), 3);
        let dir = store.dir().to_path_buf();
        assert!(dir.exists());
        store.close().unwrap();
        assert!(!dir.exists());
        assert!(store.cache_iter().is_err());
    }

    #[test]
    fn external_page_dir_is_kept_after_close() {
        let tmp = TempDir::new().unwrap();
        let config = StreamingConfig {
            page_dir: Some(tmp.path().join("pages")),
            ..StreamingConfig::sequential(2)
        };
        let (mut store, _) = grounded(config, 3);
        assert!(store.page_path(1).exists());
        store.close().unwrap();
        assert!(tmp.path().join("pages").exists());
        assert!(!store.page_path(0).exists());
    }

    #[test]
    fn corrupted_page_fails_the_sweep() {
        let (mut store, _) = grounded(StreamingConfig::sequential(2), 4);
        let path = store.page_path(1);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();
        let mut iter = store.cache_iter().unwrap();
        assert!(iter.next_term().unwrap().is_some());
        assert!(iter.next_term().unwrap().is_some());
        assert!(matches!(
            iter.next_term(),
            Err(StoreError::Page(PageError::ShortRead { .. }))
        ));
    }
}
