//! Term storage for the inference core.
//!
//! Two stores serve different problem sizes:
//!
//! - [`MemTermStore`]: every term resident in memory, random access, the
//!   only store the consensus reasoner runs on.
//! - [`StreamingTermStore`]: terms grounded straight to fixed-size pages on
//!   disk and replayed through a pooled cache, for term sets larger than RAM.
//!
//! Both keep a [`ComponentIndex`] of connected components built incrementally
//! as terms are added. [`AtomDatabase`] is a redb-backed atom store used by
//! the binary as the database layer.

pub mod components;
pub mod durable;
pub mod grounder;
pub mod mem;
pub mod page;
pub mod pool;
pub mod streaming;

use crate::error::StoreError;
use crate::term::Term;

pub use components::ComponentIndex;
pub use durable::AtomDatabase;
pub use grounder::ConcurrentGrounder;
pub use mem::{MemSweep, MemTermStore};
pub use page::{IoSnapshot, IoStats};
pub use streaming::{CacheIterator, GroundingIterator, StreamingTermStore};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Dense id of a term: its position in insertion order.
pub type TermId = usize;

/// Lifecycle of a term store within one grounding round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    /// Accepting `add`; not yet readable by reasoners.
    Grounding,
    /// Grounding finished; terms may be read and swept, not added.
    Ready,
    /// Torn down; every operation fails.
    Closed,
}

impl std::fmt::Display for StorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorePhase::Grounding => write!(f, "grounding"),
            StorePhase::Ready => write!(f, "ready"),
            StorePhase::Closed => write!(f, "closed"),
        }
    }
}

pub(crate) fn illegal_state(message: impl Into<String>) -> StoreError {
    StoreError::IllegalState {
        message: message.into(),
    }
}

/// A replayable sequence of terms, swept once per optimization epoch.
///
/// Terms are lent one at a time so that paged stores can hand out slots of
/// their reusable pool instead of allocating.
pub trait TermStream {
    /// Start a new sweep from the first term.
    fn begin_sweep(&mut self) -> StoreResult<()>;

    /// Next term of the current sweep, or `None` once it is exhausted.
    fn next_term(&mut self) -> StoreResult<Option<&Term>>;

    /// Total number of terms a full sweep visits.
    fn num_terms(&self) -> usize;
}
