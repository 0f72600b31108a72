//! Consensus (ADMM) reasoner.
//!
//! Every term owns local copies of its free atoms and one dual price per
//! copy. An iteration is:
//!
//! 1. local step, in parallel over terms: minimize
//!    `w·φ(a·x + c) + ρ/2·‖x − z + y/ρ‖²` in closed form;
//! 2. global step, in parallel over atoms: `z_j = clip(mean(x + y/ρ))` over
//!    the copies of atom `j`;
//! 3. dual step: `y += ρ(x − z)`;
//! 4. convergence check on the primal residual `‖x − z‖` and the dual
//!    residual `ρ‖Δz‖` against absolute plus relative tolerances.
//!
//! Fixed atoms get no copies: their contribution is folded into the term
//! constant. Hard terms replace the penalty by a projection onto their
//! feasible halfspace or hyperplane.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::atom::AtomStore;
use crate::cancel::CancelToken;
use crate::config::AdmmConfig;
use crate::error::ReasonerError;
use crate::rule::RuleId;
use crate::store::{MemTermStore, TermId};
use crate::term::{PotentialKind, Term, Weight};

use super::{CONSTRAINT_TOLERANCE, ReasonerResult, RunReport, RunStatus, snapshot, write_back};

/// Local subproblem of one term.
#[derive(Debug, Clone)]
struct LocalTerm {
    kind: PotentialKind,
    weight: Weight,
    /// Term constant plus the contribution of its fixed atoms.
    constant: f32,
    atoms: Vec<u32>,
    coefficients: Vec<f32>,
    /// `‖a‖²` over the free atoms.
    norm_sq: f32,
    x: Vec<f32>,
    y: Vec<f32>,
}

impl LocalTerm {
    fn new(term: &Term, values: &[f32], fixed: &[bool]) -> Self {
        let mut constant = term.constant();
        let mut atoms = Vec::with_capacity(term.size());
        let mut coefficients = Vec::with_capacity(term.size());
        for (atom, &c) in term.atoms().iter().zip(term.coefficients()) {
            let i = atom.index();
            if fixed[i] {
                constant += c * values[i];
            } else {
                atoms.push(atom.get());
                coefficients.push(c);
            }
        }
        let norm_sq: f32 = coefficients.iter().map(|c| c * c).sum();
        let x: Vec<f32> = atoms.iter().map(|&a| values[a as usize]).collect();
        let y = vec![0.0; atoms.len()];
        Self {
            kind: term.kind(),
            weight: term.weight(),
            constant,
            atoms,
            coefficients,
            norm_sq,
            x,
            y,
        }
    }

    fn raw_at(&self, point: impl Iterator<Item = f32>) -> f32 {
        self.coefficients
            .iter()
            .zip(point)
            .fold(self.constant, |acc, (c, v)| acc + c * v)
    }

    fn raw_local(&self) -> f32 {
        self.raw_at(self.x.iter().copied())
    }

    fn raw_global(&self, z: &[f32]) -> f32 {
        self.raw_at(self.atoms.iter().map(|&a| z[a as usize]))
    }

    /// Set `x` to `v − step·a`.
    fn step_from(&mut self, z: &[f32], rho: f32, step: f32) {
        for (((x, &y), &a), &c) in self
            .x
            .iter_mut()
            .zip(&self.y)
            .zip(&self.atoms)
            .zip(&self.coefficients)
        {
            *x = z[a as usize] - y / rho - step * c;
        }
    }

    /// Closed-form proximal solve of this term's local subproblem.
    fn minimize(&mut self, z: &[f32], rho: f32) {
        if self.atoms.is_empty() {
            return;
        }
        // raw value at the consensus point v = z − y/ρ
        let at_v = self.raw_at(
            self.atoms
                .iter()
                .zip(&self.y)
                .map(|(&a, &y)| z[a as usize] - y / rho),
        );
        let project = if self.norm_sq > 0.0 {
            at_v / self.norm_sq
        } else {
            0.0
        };
        match self.weight {
            Weight::Hard => {
                if self.kind.is_hinge() && at_v <= 0.0 {
                    self.step_from(z, rho, 0.0);
                } else {
                    self.step_from(z, rho, project);
                }
            }
            Weight::Soft(w) => match self.kind {
                PotentialKind::Linear => self.step_from(z, rho, w / rho),
                PotentialKind::Hinge => {
                    if at_v <= 0.0 {
                        self.step_from(z, rho, 0.0);
                    } else {
                        // Full gradient step unless it overshoots the hinge.
                        let step = w / rho;
                        if at_v - step * self.norm_sq >= 0.0 {
                            self.step_from(z, rho, step);
                        } else {
                            self.step_from(z, rho, project);
                        }
                    }
                }
                PotentialKind::SquaredLinear | PotentialKind::SquaredHinge => {
                    if self.kind == PotentialKind::SquaredHinge && at_v <= 0.0 {
                        self.step_from(z, rho, 0.0);
                    } else {
                        let s = at_v / (1.0 + 2.0 * w * self.norm_sq / rho);
                        self.step_from(z, rho, 2.0 * w * s / rho);
                    }
                }
            },
        }
    }

    /// `y += ρ(x − z)`. Returns `(Σ(x−z)², Σx², Σy²)`.
    fn update_duals(&mut self, z: &[f32], rho: f32) -> (f64, f64, f64) {
        let mut sums = (0.0, 0.0, 0.0);
        for ((&x, y), &a) in self.x.iter().zip(self.y.iter_mut()).zip(&self.atoms) {
            let diff = x - z[a as usize];
            *y += rho * diff;
            sums.0 += (diff as f64).powi(2);
            sums.1 += (x as f64).powi(2);
            sums.2 += (*y as f64).powi(2);
        }
        sums
    }
}

fn add3(a: (f64, f64, f64), b: (f64, f64, f64)) -> (f64, f64, f64) {
    (a.0 + b.0, a.1 + b.1, a.2 + b.2)
}

/// Per-rule sums of term incompatibilities, read by weight learning.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RuleIncompatibility {
    /// Σ dissatisfaction at the global (consensus) values.
    pub primal: f64,
    /// Σ dissatisfaction at the local copies.
    pub dual: f64,
}

/// State kept from the last run for the learning accessors.
#[derive(Debug)]
struct Solution {
    locals: Vec<LocalTerm>,
    rules: Vec<RuleId>,
    z: Vec<f32>,
}

/// Consensus optimization over a sealed [`MemTermStore`].
#[derive(Debug)]
pub struct AdmmReasoner {
    config: AdmmConfig,
    cancel: CancelToken,
    solution: Option<Solution>,
}

impl AdmmReasoner {
    pub fn new(config: AdmmConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
            solution: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &AdmmConfig {
        &self.config
    }

    /// Run to convergence or the iteration cap, starting from the atoms'
    /// current values, and write the consensus values back.
    pub fn optimize<A: AtomStore + ?Sized>(
        &mut self,
        store: &MemTermStore,
        atoms: &mut A,
    ) -> ReasonerResult<RunReport> {
        store.ensure_ready()?;
        let rho = self.config.penalty;
        if !(rho.is_finite() && rho > 0.0) {
            return Err(ReasonerError::InvalidParameter {
                message: format!("penalty must be positive, got {rho}"),
            });
        }
        self.solution = None;

        let (mut z, fixed) = snapshot(&*atoms)?;
        for term in store.iter() {
            for &atom in term.atoms() {
                atoms.check(atom)?;
            }
        }
        let mut locals: Vec<LocalTerm> = store
            .iter()
            .map(|t| LocalTerm::new(t, &z, &fixed))
            .collect();

        // Copies of each atom as (term, position), for the sharded global step.
        let mut copies: Vec<Vec<(u32, u32)>> = vec![Vec::new(); z.len()];
        for (t, local) in locals.iter().enumerate() {
            for (p, &a) in local.atoms.iter().enumerate() {
                copies[a as usize].push((t as u32, p as u32));
            }
        }
        let num_copies: usize = locals.iter().map(|l| l.atoms.len()).sum();
        let sqrt_p = (num_copies.max(1) as f64).sqrt();
        let eps_abs = self.config.epsilon_abs as f64;
        let eps_rel = self.config.epsilon_rel as f64;

        tracing::info!(
            terms = locals.len(),
            copies = num_copies,
            penalty = rho,
            "admm optimization started"
        );

        let mut status = RunStatus::MaxIterationsReached;
        let mut iterations = 0;
        let mut primal = f64::INFINITY;
        let mut dual = f64::INFINITY;
        let mut previous = z.clone();

        while iterations < self.config.max_iterations {
            if self.cancel.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }
            iterations += 1;

            locals.par_iter_mut().for_each(|l| l.minimize(&z, rho));

            previous.copy_from_slice(&z);
            z.par_iter_mut().enumerate().for_each(|(j, zj)| {
                let cs = &copies[j];
                if cs.is_empty() {
                    return;
                }
                let sum: f32 = cs
                    .iter()
                    .map(|&(t, p)| {
                        let l = &locals[t as usize];
                        l.x[p as usize] + l.y[p as usize] / rho
                    })
                    .sum();
                *zj = (sum / cs.len() as f32).clamp(0.0, 1.0);
            });

            let (r2, x2, y2) = locals
                .par_iter_mut()
                .map(|l| l.update_duals(&z, rho))
                .reduce(|| (0.0, 0.0, 0.0), add3);

            let (dz2, z2) = copies
                .iter()
                .enumerate()
                .filter(|(_, cs)| !cs.is_empty())
                .fold((0.0f64, 0.0f64), |acc, (j, cs)| {
                    let n = cs.len() as f64;
                    let dz = (z[j] - previous[j]) as f64;
                    (acc.0 + n * dz * dz, acc.1 + n * (z[j] as f64).powi(2))
                });

            primal = r2.sqrt();
            dual = rho as f64 * dz2.sqrt();
            let eps_primal = sqrt_p * eps_abs + eps_rel * x2.sqrt().max(z2.sqrt());
            let eps_dual = sqrt_p * eps_abs + eps_rel * y2.sqrt();

            if self.config.log_period > 0 && iterations % self.config.log_period == 0 {
                tracing::debug!(
                    iteration = iterations,
                    primal,
                    dual,
                    eps_primal,
                    eps_dual,
                    "admm residuals"
                );
            }
            if primal < eps_primal && dual < eps_dual {
                status = RunStatus::Converged;
                break;
            }
        }

        write_back(atoms, &z, &fixed)?;

        let objective: f64 = store.iter().map(|t| t.objective(&z) as f64).sum();
        let violated_constraints = store
            .iter()
            .filter(|t| t.is_hard() && !t.constraint_satisfied(&z, CONSTRAINT_TOLERANCE))
            .count();

        let report = RunReport {
            status,
            iterations,
            primal_residual: if primal.is_finite() { primal } else { 0.0 },
            dual_residual: if dual.is_finite() { dual } else { 0.0 },
            objective,
            violated_constraints,
        };
        match status {
            RunStatus::Converged => tracing::info!(
                iterations,
                objective,
                violated_constraints,
                "admm converged"
            ),
            RunStatus::MaxIterationsReached => tracing::warn!(
                iterations,
                primal = report.primal_residual,
                dual = report.dual_residual,
                "admm stopped at the iteration cap without converging"
            ),
            RunStatus::Cancelled => tracing::warn!(iterations, "admm run cancelled"),
        }

        self.solution = Some(Solution {
            rules: store.iter().map(Term::rule).collect(),
            locals,
            z,
        });
        Ok(report)
    }

    fn solution(&self) -> ReasonerResult<&Solution> {
        self.solution.as_ref().ok_or_else(|| ReasonerError::StaleState {
            message: "no completed run".into(),
        })
    }

    fn local(&self, term: TermId) -> ReasonerResult<(&Solution, &LocalTerm)> {
        let solution = self.solution()?;
        let local = solution
            .locals
            .get(term)
            .ok_or_else(|| ReasonerError::StaleState {
                message: format!(
                    "term {term} is not part of the last run ({} terms)",
                    solution.locals.len()
                ),
            })?;
        Ok((solution, local))
    }

    /// Dissatisfaction of `term` at its local copies.
    pub fn dual_incompatibility(&self, term: TermId) -> ReasonerResult<f32> {
        let (_, local) = self.local(term)?;
        Ok(local.kind.apply(local.raw_local()))
    }

    /// Dissatisfaction of `term` at the consensus values.
    pub fn primal_incompatibility(&self, term: TermId) -> ReasonerResult<f32> {
        let (solution, local) = self.local(term)?;
        Ok(local.kind.apply(local.raw_global(&solution.z)))
    }

    /// `Σ y·(x − z)` over every local copy.
    pub fn lagrangian_penalty(&self) -> ReasonerResult<f64> {
        let solution = self.solution()?;
        Ok(solution
            .locals
            .par_iter()
            .map(|l| {
                l.x.iter()
                    .zip(&l.y)
                    .zip(&l.atoms)
                    .map(|((&x, &y), &a)| (y * (x - solution.z[a as usize])) as f64)
                    .sum::<f64>()
            })
            .sum())
    }

    /// `ρ/2 · Σ (x − z)²` over every local copy.
    pub fn augmented_lagrangian_penalty(&self) -> ReasonerResult<f64> {
        let solution = self.solution()?;
        let squares: f64 = solution
            .locals
            .par_iter()
            .map(|l| {
                l.x.iter()
                    .zip(&l.atoms)
                    .map(|(&x, &a)| ((x - solution.z[a as usize]) as f64).powi(2))
                    .sum::<f64>()
            })
            .sum();
        Ok(0.5 * self.config.penalty as f64 * squares)
    }

    /// Primal and dual incompatibility summed per rule.
    pub fn incompatibility_by_rule(&self) -> ReasonerResult<HashMap<RuleId, RuleIncompatibility>> {
        let solution = self.solution()?;
        let mut by_rule: HashMap<RuleId, RuleIncompatibility> = HashMap::new();
        for (local, &rule) in solution.locals.iter().zip(&solution.rules) {
            let entry = by_rule.entry(rule).or_default();
            entry.primal += local.kind.apply(local.raw_global(&solution.z)) as f64;
            entry.dual += local.kind.apply(local.raw_local()) as f64;
        }
        Ok(by_rule)
    }

    /// Consensus values of the last run, indexed by atom.
    pub fn consensus(&self) -> ReasonerResult<&[f32]> {
        Ok(&self.solution()?.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{AtomId, MemAtomStore};

    fn term(kind: PotentialKind, weight: Weight, atoms: &[(u32, f32)], constant: f32) -> Term {
        Term::new(
            RuleId::new(0),
            kind,
            weight,
            atoms.iter().map(|&(a, _)| AtomId::new(a)).collect(),
            atoms.iter().map(|&(_, c)| c).collect(),
            constant,
        )
        .unwrap()
    }

    fn solve(terms: Vec<Term>, atoms: &mut MemAtomStore, config: AdmmConfig) -> (AdmmReasoner, RunReport) {
        let mut store = MemTermStore::new();
        for t in terms {
            store.add(t, atoms).unwrap();
        }
        store.seal().unwrap();
        let mut reasoner = AdmmReasoner::new(config);
        let report = reasoner.optimize(&store, atoms).unwrap();
        (reasoner, report)
    }

    #[test]
    fn squared_distance_converges_to_target() {
        let mut atoms = MemAtomStore::new();
        atoms.add_variable(0.5).unwrap();
        let t = term(PotentialKind::SquaredLinear, Weight::Soft(1.0), &[(0, 1.0)], -0.7);
        let (_, report) = solve(vec![t], &mut atoms, AdmmConfig::default());
        assert!(report.converged());
        assert!((atoms.values()[0] - 0.7).abs() < 1e-3);
    }

    #[test]
    fn minimizer_outside_the_box_is_clipped() {
        let mut atoms = MemAtomStore::new();
        atoms.add_variable(0.5).unwrap();
        let t = term(PotentialKind::SquaredLinear, Weight::Soft(1.0), &[(0, 1.0)], -1.4);
        let (_, report) = solve(vec![t], &mut atoms, AdmmConfig::default());
        assert!(report.converged());
        assert!((atoms.values()[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn linear_potential_pushes_to_the_boundary() {
        let mut atoms = MemAtomStore::new();
        atoms.add_variable(0.2).unwrap();
        let t = term(PotentialKind::Linear, Weight::Soft(1.0), &[(0, -1.0)], 0.0);
        let (_, report) = solve(vec![t], &mut atoms, AdmmConfig::default());
        assert!(report.converged());
        assert_eq!(atoms.values()[0], 1.0);
    }

    #[test]
    fn hard_constraint_caps_a_soft_preference() {
        let mut atoms = MemAtomStore::new();
        atoms.add_variable(0.0).unwrap();
        let want_high = term(PotentialKind::Hinge, Weight::Soft(1.0), &[(0, -1.0)], 0.9);
        let at_most = term(PotentialKind::Hinge, Weight::Hard, &[(0, 1.0)], -0.6);
        let config = AdmmConfig {
            epsilon_rel: 1e-5,
            ..AdmmConfig::default()
        };
        let (_, report) = solve(vec![want_high, at_most], &mut atoms, config);
        assert!(report.converged());
        assert_eq!(report.violated_constraints, 0);
        assert!((atoms.values()[0] - 0.6).abs() < 1e-3);
    }

    #[test]
    fn fixed_atoms_are_never_written() {
        let mut atoms = MemAtomStore::new();
        atoms.add_observed(0.8).unwrap();
        atoms.add_variable(0.2).unwrap();
        // hinge(obs − x): x is pulled up to the observation
        let t = term(
            PotentialKind::Hinge,
            Weight::Soft(1.0),
            &[(0, 1.0), (1, -1.0)],
            0.0,
        );
        let (reasoner, report) = solve(vec![t], &mut atoms, AdmmConfig::default());
        assert!(report.converged());
        assert_eq!(atoms.values()[0], 0.8);
        assert!((atoms.values()[1] - 0.8).abs() < 1e-3);
        assert!(reasoner.primal_incompatibility(0).unwrap() < 1e-3);
    }

    #[test]
    fn iteration_cap_is_reported_not_fatal() {
        let mut atoms = MemAtomStore::new();
        atoms.add_variable(0.5).unwrap();
        let t = term(PotentialKind::SquaredLinear, Weight::Soft(1.0), &[(0, 1.0)], -0.7);
        let config = AdmmConfig {
            max_iterations: 1,
            ..AdmmConfig::default()
        };
        let (_, report) = solve(vec![t], &mut atoms, config);
        assert_eq!(report.status, RunStatus::MaxIterationsReached);
        assert_eq!(report.iterations, 1);
        assert!(atoms.values()[0] > 0.5);
    }

    #[test]
    fn cancelled_run_still_writes_values() {
        let mut atoms = MemAtomStore::new();
        atoms.add_variable(0.5).unwrap();
        let mut store = MemTermStore::new();
        store
            .add(
                term(PotentialKind::SquaredLinear, Weight::Soft(1.0), &[(0, 1.0)], -0.7),
                &mut atoms,
            )
            .unwrap();
        store.seal().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let mut reasoner = AdmmReasoner::new(AdmmConfig::default()).with_cancel(token);
        let report = reasoner.optimize(&store, &mut atoms).unwrap();
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.iterations, 0);
        assert_eq!(atoms.values()[0], 0.5);
    }

    #[test]
    fn learning_accessors_need_a_run() {
        let reasoner = AdmmReasoner::new(AdmmConfig::default());
        assert!(matches!(
            reasoner.dual_incompatibility(0),
            Err(ReasonerError::StaleState { .. })
        ));
        assert!(reasoner.lagrangian_penalty().is_err());
    }

    #[test]
    fn penalties_vanish_at_consensus() {
        let mut atoms = MemAtomStore::new();
        atoms.add_variable(0.0).unwrap();
        atoms.add_variable(0.0).unwrap();
        let terms = vec![
            term(
                PotentialKind::Hinge,
                Weight::Soft(1.0),
                &[(0, 1.0), (1, 1.0)],
                -1.0,
            ),
            term(PotentialKind::Hinge, Weight::Soft(1.0), &[(1, -1.0)], 0.5),
        ];
        let (reasoner, report) = solve(terms, &mut atoms, AdmmConfig::default());
        assert!(report.converged());
        assert!(reasoner.augmented_lagrangian_penalty().unwrap() < 1e-6);
        assert!(reasoner.lagrangian_penalty().unwrap().abs() < 1e-4);
        let by_rule = reasoner.incompatibility_by_rule().unwrap();
        assert!(by_rule[&RuleId::new(0)].primal < 1e-4);
        assert!(by_rule[&RuleId::new(0)].dual < 1e-4);
    }

    #[test]
    fn unsealed_store_is_rejected() {
        let mut atoms = MemAtomStore::new();
        let store = MemTermStore::new();
        let mut reasoner = AdmmReasoner::new(AdmmConfig::default());
        assert!(matches!(
            reasoner.optimize(&store, &mut atoms),
            Err(ReasonerError::Store(_))
        ));
    }
}
