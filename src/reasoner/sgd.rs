//! Stochastic gradient reasoner.
//!
//! One epoch sweeps the term stream once and applies, per term, a projected
//! gradient step to every free atom the term references:
//! `x ← clip(x − η·∂(w·φ)/∂x)`. Updates are applied single-threaded in
//! stream order, so a run is reproducible given the stream's seed.

use crate::atom::AtomStore;
use crate::cancel::CancelToken;
use crate::config::SgdConfig;
use crate::error::ReasonerError;
use crate::store::{MemTermStore, TermStream};

use super::{CONSTRAINT_TOLERANCE, ReasonerResult, RunReport, RunStatus, snapshot, write_back};

const ADAGRAD_EPSILON: f32 = 1e-8;

#[derive(Debug)]
pub struct SgdReasoner {
    config: SgdConfig,
    cancel: CancelToken,
}

impl SgdReasoner {
    pub fn new(config: SgdConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    /// Optimize over a resident store, shuffling term order each epoch when
    /// `shuffle_terms` is set.
    pub fn optimize_mem<A: AtomStore + ?Sized>(
        &mut self,
        store: &MemTermStore,
        atoms: &mut A,
    ) -> ReasonerResult<RunReport> {
        let seed = self.config.shuffle_terms.then_some(self.config.seed);
        let mut sweep = store.sweep(seed)?;
        self.optimize(&mut sweep, atoms)
    }

    /// Optimize over any replayable term stream, paged or resident.
    pub fn optimize<S, A>(&mut self, stream: &mut S, atoms: &mut A) -> ReasonerResult<RunReport>
    where
        S: TermStream + ?Sized,
        A: AtomStore + ?Sized,
    {
        if !(self.config.learning_rate.is_finite() && self.config.learning_rate > 0.0) {
            return Err(ReasonerError::InvalidParameter {
                message: format!(
                    "learning rate must be positive, got {}",
                    self.config.learning_rate
                ),
            });
        }
        let (mut values, fixed) = snapshot(&*atoms)?;
        let mut accumulated = if self.config.adagrad {
            vec![0.0f32; values.len()]
        } else {
            Vec::new()
        };

        tracing::info!(
            terms = stream.num_terms(),
            max_epochs = self.config.max_epochs,
            adagrad = self.config.adagrad,
            "sgd optimization started"
        );

        let mut status = RunStatus::MaxIterationsReached;
        let mut epochs = 0;
        let mut movement = 0.0f64;

        while epochs < self.config.max_epochs {
            if self.cancel.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }
            let step = self.config.schedule.step(self.config.learning_rate, epochs);
            let mut moved_sq = 0.0f64;

            stream.begin_sweep()?;
            let mut index = 0;
            while let Some(term) = stream.next_term()? {
                if term.is_hard() {
                    return Err(ReasonerError::HardConstraintUnsupported { term: index });
                }
                index += 1;
                for &atom in term.atoms() {
                    if atom.index() >= values.len() {
                        atoms.check(atom)?;
                    }
                }
                let scale = term.gradient_scale(term.raw(&values));
                if scale == 0.0 {
                    continue;
                }
                for (atom, &c) in term.atoms().iter().zip(term.coefficients()) {
                    let i = atom.index();
                    if fixed[i] {
                        continue;
                    }
                    let gradient = scale * c;
                    let eta = if self.config.adagrad {
                        accumulated[i] += gradient * gradient;
                        step / (accumulated[i].sqrt() + ADAGRAD_EPSILON)
                    } else {
                        step
                    };
                    let updated = (values[i] - eta * gradient).clamp(0.0, 1.0);
                    moved_sq += ((updated - values[i]) as f64).powi(2);
                    values[i] = updated;
                }
            }
            movement = moved_sq.sqrt();
            // A paged stream ends the sweep early once the token fires.
            if self.cancel.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }
            epochs += 1;
            tracing::debug!(epoch = epochs, step, movement, "sgd epoch");

            if movement < self.config.tolerance as f64 {
                status = RunStatus::Converged;
                break;
            }
        }

        write_back(atoms, &values, &fixed)?;

        let mut objective = 0.0f64;
        let mut violated_constraints = 0;
        if status != RunStatus::Cancelled {
            stream.begin_sweep()?;
            let mut visited = 0;
            while let Some(term) = stream.next_term()? {
                visited += 1;
                objective += term.objective(&values) as f64;
                if term.is_hard() && !term.constraint_satisfied(&values, CONSTRAINT_TOLERANCE) {
                    violated_constraints += 1;
                }
            }
            if visited < stream.num_terms() {
                status = RunStatus::Cancelled;
                objective = 0.0;
                violated_constraints = 0;
            }
        }

        match status {
            RunStatus::Converged => tracing::info!(epochs, objective, "sgd converged"),
            RunStatus::MaxIterationsReached => tracing::warn!(
                epochs,
                movement,
                "sgd stopped at the epoch budget without converging"
            ),
            RunStatus::Cancelled => tracing::warn!(epochs, "sgd run cancelled"),
        }

        Ok(RunReport {
            status,
            iterations: epochs,
            primal_residual: movement,
            dual_residual: 0.0,
            objective,
            violated_constraints,
        })
    }
}
