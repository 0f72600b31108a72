// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # hlmrf
//!
//! Inference core for hinge-loss Markov random fields: weighted logical and
//! arithmetic rules, grounded against a database of atoms, become a sum of
//! hinge-loss and linear potentials over truth values in `[0, 1]` that is
//! minimized numerically.
//!
//! ## Architecture
//!
//! - **Atoms** (`atom`): values, observed flags, union-find partition
//! - **Terms** (`term`, `rule`): potentials built from ground rules, page record codec
//! - **Term stores** (`store`): in-memory with connected components, and an
//!   out-of-core paged store with a pooled replay cache
//! - **Reasoners** (`reasoner`): consensus ADMM and stochastic gradient descent
//!
//! ## Library usage
//!
//! ```no_run
//! use hlmrf::atom::MemAtomStore;
//! use hlmrf::config::AdmmConfig;
//! use hlmrf::reasoner::AdmmReasoner;
//! use hlmrf::rule::{GroundLogicalRule, RuleSet};
//! use hlmrf::store::MemTermStore;
//! use hlmrf::term::Weight;
//!
//! let mut atoms = MemAtomStore::new();
//! let rains = atoms.add_observed(0.9).unwrap();
//! let wet = atoms.add_variable(0.0).unwrap();
//!
//! let mut rules = RuleSet::new();
//! let rule = rules.add("rains -> wet", Weight::Soft(1.0), false).unwrap();
//!
//! // negated clause: rains & !wet
//! let ground = GroundLogicalRule::new(rule, vec![rains], vec![wet]);
//! let mut store = MemTermStore::new();
//! store.add(ground.to_term(rules.get(rule).unwrap()).unwrap(), &mut atoms).unwrap();
//! store.seal().unwrap();
//!
//! let report = AdmmReasoner::new(AdmmConfig::default())
//!     .optimize(&store, &mut atoms)
//!     .unwrap();
//! println!("{:?}: wet = {}", report.status, atoms.values()[1]);
//! ```

pub mod atom;
pub mod cancel;
pub mod config;
pub mod error;
pub mod reasoner;
pub mod rule;
pub mod store;
pub mod term;
