//! Rich diagnostic error types for the hlmrf inference core.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so callers can tell which
//! page, term, atom, or rule a fatal condition came from.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the hlmrf crate.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum HlmrfError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Atom(#[from] AtomError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Page(#[from] PageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reasoner(#[from] ReasonerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Atom errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum AtomError {
    #[error("atom index {index} out of range (store holds {len} atoms)")]
    #[diagnostic(
        code(hlmrf::atom::out_of_range),
        help(
            "A term or rule referenced an atom the atom store does not hold. \
             Ground rules only against atoms that were registered first."
        )
    )]
    OutOfRange { index: u32, len: usize },

    #[error("atom value {value} for atom {index} is outside [0, 1]")]
    #[diagnostic(
        code(hlmrf::atom::invalid_value),
        help("Atom truth values must be finite and lie in the closed unit interval.")
    )]
    InvalidValue { index: u32, value: f32 },

    #[error("atom {index} is fixed (observed) and cannot be assigned")]
    #[diagnostic(
        code(hlmrf::atom::fixed),
        help("Only random-variable atoms are updated by inference.")
    )]
    Fixed { index: u32 },
}

// ---------------------------------------------------------------------------
// Term store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("term index {index} out of range (store holds {len} terms)")]
    #[diagnostic(
        code(hlmrf::store::term_out_of_range),
        help("Term ids are dense indices assigned by `add`; check the id came from this store.")
    )]
    TermOutOfRange { index: usize, len: usize },

    #[error("illegal term store state: {message}")]
    #[diagnostic(
        code(hlmrf::store::illegal_state),
        help(
            "Term stores only accept `add` while grounding and only serve reads \
             once grounding has finished. A closed store cannot be reused."
        )
    )]
    IllegalState { message: String },

    #[error("malformed term from rule {rule}: {message}")]
    #[diagnostic(
        code(hlmrf::store::malformed_term),
        help("Terms need at least one atom and one finite coefficient per atom.")
    )]
    MalformedTerm { rule: u32, message: String },

    #[error("unknown rule {rule}")]
    #[diagnostic(
        code(hlmrf::store::unknown_rule),
        help("Register the rule in the RuleSet before grounding or re-weighting it.")
    )]
    UnknownRule { rule: u32 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Atom(#[from] AtomError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Page(#[from] PageError),

    #[error("atom database error: {message}")]
    #[diagnostic(
        code(hlmrf::store::durable),
        help(
            "The embedded atom database encountered an error. \
             This may indicate corruption; try a fresh persistence directory."
        )
    )]
    Durable { message: String },
}

// ---------------------------------------------------------------------------
// Page errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PageError {
    #[error("I/O error on term page {}: {source}", .path.display())]
    #[diagnostic(
        code(hlmrf::page::io),
        help(
            "A page file operation failed. Check that the page directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("short read for page {}: expected {expected} bytes, found {actual}", .path.display())]
    #[diagnostic(
        code(hlmrf::page::short_read),
        help(
            "The page file is smaller than its header declares. Pages are private \
             working state; re-ground the round instead of repairing the file."
        )
    )]
    ShortRead {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("short write for page {}: expected {expected} bytes, wrote {actual}", .path.display())]
    #[diagnostic(
        code(hlmrf::page::short_write),
        help("The page file on disk does not hold the full page. Check free disk space.")
    )]
    ShortWrite {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error(
        "page {} header declares {declared} term bytes but {available} bytes follow the header",
        .path.display()
    )]
    #[diagnostic(
        code(hlmrf::page::header_mismatch),
        help("The page header and body disagree. The file was truncated or overwritten.")
    )]
    HeaderMismatch {
        path: PathBuf,
        declared: usize,
        available: usize,
    },

    #[error("corrupt term record in page {}: {message}", .path.display())]
    #[diagnostic(
        code(hlmrf::page::corrupt),
        help("A term record could not be decoded. Re-ground the round.")
    )]
    Corrupt { path: PathBuf, message: String },

    #[error("page of {terms} terms exceeds the pool capacity of {capacity}")]
    #[diagnostic(
        code(hlmrf::page::pool_overflow),
        help("Pages must be read with the same `page_terms` budget they were written with.")
    )]
    PoolOverflow { terms: usize, capacity: usize },
}

// ---------------------------------------------------------------------------
// Reasoner errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ReasonerError {
    #[error("term {term} is a hard constraint, which the stochastic reasoner cannot enforce")]
    #[diagnostic(
        code(hlmrf::reasoner::hard_constraint),
        help(
            "Stochastic gradient steps only handle weighted potentials. \
             Use the consensus (ADMM) reasoner for models with hard constraints."
        )
    )]
    HardConstraintUnsupported { term: usize },

    #[error("invalid reasoner parameter: {message}")]
    #[diagnostic(
        code(hlmrf::reasoner::invalid_parameter),
        help("Validate the configuration with `HlmrfConfig::validate` before running.")
    )]
    InvalidParameter { message: String },

    #[error("reasoner state does not match the term store: {message}")]
    #[diagnostic(
        code(hlmrf::reasoner::stale_state),
        help("Run `optimize` against the current term store before reading per-term outputs.")
    )]
    StaleState { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Atom(#[from] AtomError),
}

impl From<PageError> for ReasonerError {
    fn from(err: PageError) -> Self {
        ReasonerError::Store(StoreError::Page(err))
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config {path}")]
    #[diagnostic(
        code(hlmrf::config::read),
        help("Check that the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}")]
    #[diagnostic(
        code(hlmrf::config::write),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(hlmrf::config::parse),
        help("The file must be valid TOML with [admm], [sgd] and [streaming] tables.")
    )]
    Parse { path: String, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(hlmrf::config::invalid), help("{message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning hlmrf results.
pub type HlmrfResult<T> = std::result::Result<T, HlmrfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_error_converts_through_store_to_top_level() {
        let err = PageError::PoolOverflow {
            terms: 10,
            capacity: 4,
        };
        let store: StoreError = err.into();
        let top: HlmrfError = store.into();
        assert!(matches!(
            top,
            HlmrfError::Store(StoreError::Page(PageError::PoolOverflow { .. }))
        ));
    }

    #[test]
    fn reasoner_error_wraps_page_error() {
        let err: ReasonerError = PageError::Corrupt {
            path: PathBuf::from("/tmp/page-000000.bin"),
            message: "bad kind".into(),
        }
        .into();
        assert!(matches!(
            err,
            ReasonerError::Store(StoreError::Page(PageError::Corrupt { .. }))
        ));
    }

    #[test]
    fn short_read_message_names_the_page() {
        let err = PageError::ShortRead {
            path: PathBuf::from("/tmp/pages/page-000003.bin"),
            expected: 128,
            actual: 64,
        };
        let msg = err.to_string();
        assert!(msg.contains("page-000003.bin"));
        assert!(msg.contains("128"));
        assert!(msg.contains("64"));
    }

    #[test]
    fn out_of_range_reports_index_and_len() {
        let err = StoreError::TermOutOfRange { index: 7, len: 3 };
        let msg = format!("{err}");
        assert!(msg.contains('7'));
        assert!(msg.contains('3'));
    }
}
