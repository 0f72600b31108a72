//! Iterative solvers that converge atom values against a term store.
//!
//! - [`AdmmReasoner`]: consensus optimization over a resident
//!   [`MemTermStore`](crate::store::MemTermStore), enforcing hard constraints
//!   by projection and exposing per-term incompatibilities for learning.
//! - [`SgdReasoner`]: one gradient step per term, over any
//!   [`TermStream`](crate::store::TermStream), including paged stores.
//!
//! Both read atom values from the atom store when a run starts and write the
//! final values back when it ends, whether or not the run converged.

pub mod admm;
pub mod sgd;

use serde::{Deserialize, Serialize};

use crate::atom::{AtomId, AtomResult, AtomStore};
use crate::error::ReasonerError;

pub use admm::{AdmmReasoner, RuleIncompatibility};
pub use sgd::SgdReasoner;

pub type ReasonerResult<T> = std::result::Result<T, ReasonerError>;

/// Slack allowed when counting violated hard constraints in a report.
pub const CONSTRAINT_TOLERANCE: f32 = 1e-3;

/// How an optimization run ended. Only `Converged` met the tolerances, but
/// every status comes with the best-known atom values written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Converged,
    MaxIterationsReached,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Converged => write!(f, "converged"),
            RunStatus::MaxIterationsReached => write!(f, "max iterations reached"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    /// Iterations (ADMM) or epochs (SGD) completed.
    pub iterations: usize,
    /// Final primal residual. For SGD, the L2 norm of the last epoch's updates.
    pub primal_residual: f64,
    /// Final dual residual. Zero for SGD.
    pub dual_residual: f64,
    /// Weighted objective at the written-back values. SGD leaves it at zero
    /// for a cancelled run, since the stream cannot be replayed in full.
    pub objective: f64,
    /// Hard constraints violated by more than [`CONSTRAINT_TOLERANCE`].
    pub violated_constraints: usize,
}

impl RunReport {
    pub fn converged(&self) -> bool {
        self.status == RunStatus::Converged
    }
}

/// Current values and fixed flags of every atom, indexed by atom.
pub(crate) fn snapshot<A: AtomStore + ?Sized>(atoms: &A) -> AtomResult<(Vec<f32>, Vec<bool>)> {
    let n = atoms.len();
    let mut values = Vec::with_capacity(n);
    let mut fixed = Vec::with_capacity(n);
    for i in 0..n {
        let atom = AtomId::new(i as u32);
        values.push(atoms.value(atom)?);
        fixed.push(atoms.is_fixed(atom)?);
    }
    Ok((values, fixed))
}

/// Write `values` back for every free atom whose value changed.
pub(crate) fn write_back<A: AtomStore + ?Sized>(
    atoms: &mut A,
    values: &[f32],
    fixed: &[bool],
) -> AtomResult<usize> {
    let mut written = 0;
    for (i, (&value, &is_fixed)) in values.iter().zip(fixed).enumerate() {
        if is_fixed {
            continue;
        }
        let atom = AtomId::new(i as u32);
        if atoms.value(atom)? != value {
            atoms.set_value(atom, value)?;
            written += 1;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::MemAtomStore;

    #[test]
    fn write_back_skips_fixed_atoms() {
        let mut atoms = MemAtomStore::new();
        atoms.add_observed(1.0).unwrap();
        atoms.add_variable(0.0).unwrap();
        let (mut values, fixed) = snapshot(&atoms).unwrap();
        assert_eq!(fixed, vec![true, false]);
        values[0] = 0.0;
        values[1] = 0.4;
        assert_eq!(write_back(&mut atoms, &values, &fixed).unwrap(), 1);
        assert_eq!(atoms.values(), &[1.0, 0.4]);
    }

    #[test]
    fn report_serializes_status_in_kebab_case() {
        let report = RunReport {
            status: RunStatus::MaxIterationsReached,
            iterations: 3,
            primal_residual: 0.5,
            dual_residual: 0.25,
            objective: 1.0,
            violated_constraints: 0,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"max-iterations-reached\""));
        assert!(!report.converged());
    }
}
