//! hlmrf CLI: ground a hinge-loss MRF problem and run MAP inference.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use rayon::prelude::*;
use serde::Deserialize;

use hlmrf::atom::{AtomId, AtomRecord, AtomStore, MemAtomStore};
use hlmrf::cancel::CancelToken;
use hlmrf::config::{HlmrfConfig, StreamingConfig};
use hlmrf::error::HlmrfResult;
use hlmrf::reasoner::{AdmmReasoner, RunReport, SgdReasoner};
use hlmrf::rule::{Comparator, GroundArithmeticRule, GroundLogicalRule, RuleId, RuleSet};
use hlmrf::store::{AtomDatabase, ConcurrentGrounder, MemTermStore, StorePhase, StreamingTermStore};
use hlmrf::term::{Term, Weight};

#[derive(Parser)]
#[command(name = "hlmrf", version, about = "Hinge-loss Markov random field inference")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ground a problem file and optimize its atom values.
    Infer {
        /// Path to a JSON problem file.
        #[arg(long)]
        problem: PathBuf,

        /// Optimizer to run.
        #[arg(long, value_enum, default_value = "admm")]
        reasoner: ReasonerKind,

        /// Ground into the paged out-of-core store (SGD only).
        #[arg(long)]
        streaming: bool,

        /// Print per-rule incompatibilities after an ADMM run.
        #[arg(long)]
        incompatibility: bool,

        /// Save final atom values and the run report to this directory.
        #[arg(long)]
        persist: Option<PathBuf>,
    },

    /// Show the connected components of a grounded problem.
    Components {
        /// Path to a JSON problem file.
        #[arg(long)]
        problem: PathBuf,

        /// Number of components to list.
        #[arg(long, default_value = "10")]
        top_k: usize,
    },

    /// Print atom values saved by a previous `infer --persist`.
    Values {
        #[arg(long)]
        persist: PathBuf,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReasonerKind {
    Admm,
    Sgd,
}

// ---------------------------------------------------------------------------
// Problem file
// ---------------------------------------------------------------------------

/// JSON problem description: atoms by index, rules by index, and groundings
/// referring to both.
#[derive(Deserialize)]
struct Problem {
    atoms: Vec<AtomRecord>,
    rules: Vec<RuleSpec>,
    #[serde(default)]
    logical: Vec<LogicalSpec>,
    #[serde(default)]
    arithmetic: Vec<ArithmeticSpec>,
}

#[derive(Deserialize)]
struct RuleSpec {
    name: String,
    /// `null` for a hard constraint.
    weight: Option<f32>,
    #[serde(default)]
    squared: bool,
}

/// Literals of the negated clause.
#[derive(Deserialize)]
struct LogicalSpec {
    rule: u32,
    #[serde(default)]
    positive: Vec<u32>,
    #[serde(default)]
    negative: Vec<u32>,
}

#[derive(Deserialize)]
struct ArithmeticSpec {
    rule: u32,
    atoms: Vec<u32>,
    coefficients: Vec<f32>,
    comparator: Comparator,
    constant: f32,
}

struct Grounded {
    atoms: MemAtomStore,
    rules: RuleSet,
    terms: Vec<Term>,
}

fn atom_ids(raw: &[u32]) -> Vec<AtomId> {
    raw.iter().copied().map(AtomId::new).collect()
}

fn load_problem(path: &Path) -> Result<Grounded> {
    let content = std::fs::read_to_string(path).into_diagnostic()?;
    let problem: Problem = serde_json::from_str(&content).into_diagnostic()?;

    let mut atoms = MemAtomStore::with_capacity(problem.atoms.len());
    for record in problem.atoms {
        atoms.push_record(record)?;
    }

    let mut rules = RuleSet::new();
    for spec in problem.rules {
        let weight = spec.weight.map_or(Weight::Hard, Weight::Soft);
        rules.add(spec.name, weight, spec.squared)?;
    }

    let mut terms = Vec::new();
    let mut seen = HashSet::new();
    let mut duplicates = 0usize;
    for spec in problem.logical {
        let ground = GroundLogicalRule::new(
            RuleId::new(spec.rule),
            atom_ids(&spec.positive),
            atom_ids(&spec.negative),
        );
        if !seen.insert(ground.clone()) {
            duplicates += 1;
            continue;
        }
        terms.push(ground.to_term(rules.get(ground.rule())?)?);
    }
    for spec in problem.arithmetic {
        let ground = GroundArithmeticRule::new(
            RuleId::new(spec.rule),
            atom_ids(&spec.atoms),
            spec.coefficients,
            spec.comparator,
            spec.constant,
        );
        terms.extend(ground.to_terms(rules.get(ground.rule())?)?);
    }
    if duplicates > 0 {
        tracing::debug!(duplicates, "skipped duplicate logical groundings");
    }
    tracing::info!(
        atoms = atoms.len(),
        rules = rules.len(),
        terms = terms.len(),
        "loaded problem from {}",
        path.display()
    );
    Ok(Grounded {
        atoms,
        rules,
        terms,
    })
}

/// Ground every term into a resident store from the rayon pool.
fn ground_mem(grounded: &mut Grounded) -> HlmrfResult<MemTermStore> {
    let mut store = MemTermStore::with_capacity(grounded.terms.len());
    let grounder = ConcurrentGrounder::new(&mut store, &mut grounded.atoms)?;
    std::mem::take(&mut grounded.terms)
        .into_par_iter()
        .try_for_each(|term| grounder.add(term).map(|_| ()))?;
    grounder.finish()?;
    Ok(store)
}

/// Ground every term into a fresh paged store. The store is left unsealed
/// when `token` fires before the last term is written.
fn ground_streaming(
    grounded: &mut Grounded,
    config: StreamingConfig,
    token: CancelToken,
) -> HlmrfResult<StreamingTermStore> {
    let mut store = StreamingTermStore::new(config)?.with_cancel(token);
    let terms = std::mem::take(&mut grounded.terms);
    store.ground(&mut grounded.atoms, terms.into_iter().map(Ok))?;
    Ok(store)
}

fn print_report(report: &RunReport) {
    println!("Status:               {}", report.status);
    println!("Iterations:           {}", report.iterations);
    println!("Objective:            {:.6}", report.objective);
    println!("Primal residual:      {:.3e}", report.primal_residual);
    println!("Dual residual:        {:.3e}", report.dual_residual);
    println!("Violated constraints: {}", report.violated_constraints);
}

fn print_values(atoms: &MemAtomStore) {
    for (index, record) in atoms.records().iter().enumerate() {
        let tag = if record.fixed { " (observed)" } else { "" };
        println!("  atom:{index:<6} {:.4}{tag}", record.value);
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HlmrfConfig::load(path)?,
        None => HlmrfConfig::default(),
    };

    match cli.command {
        Commands::Infer {
            problem,
            reasoner,
            streaming,
            incompatibility,
            persist,
        } => {
            if streaming && reasoner == ReasonerKind::Admm {
                miette::bail!("ADMM needs the in-memory term store; use --reasoner sgd with --streaming");
            }

            let token = CancelToken::new();
            signal_hook::flag::register(signal_hook::consts::SIGINT, token.flag())
                .into_diagnostic()?;

            let mut grounded = load_problem(&problem)?;

            let report = if streaming {
                let mut store =
                    ground_streaming(&mut grounded, config.streaming.clone(), token.clone())?;
                if store.phase() != StorePhase::Ready {
                    store.close()?;
                    miette::bail!("grounding interrupted before the store was sealed");
                }
                println!(
                    "Grounded {} terms into {} pages ({} components)",
                    store.len(),
                    store.num_pages(),
                    store.components().len()
                );
                let report = SgdReasoner::new(config.sgd.clone())
                    .with_cancel(token)
                    .optimize(&mut store, &mut grounded.atoms)?;
                let io = store.io_stats();
                println!(
                    "Page I/O: {} written ({} bytes), {} read ({} bytes), {} cache hits",
                    io.pages_written, io.bytes_written, io.pages_read, io.bytes_read, io.cache_hits
                );
                store.close()?;
                report
            } else {
                let store = ground_mem(&mut grounded)?;
                println!(
                    "Grounded {} terms ({} components, largest {})",
                    store.len(),
                    store.components().len(),
                    store.components().largest()
                );
                match reasoner {
                    ReasonerKind::Admm => {
                        let mut admm =
                            AdmmReasoner::new(config.admm.clone()).with_cancel(token);
                        let report = admm.optimize(&store, &mut grounded.atoms)?;
                        if incompatibility {
                            let mut by_rule: Vec<_> =
                                admm.incompatibility_by_rule()?.into_iter().collect();
                            by_rule.sort_by_key(|(rule, _)| *rule);
                            println!("Incompatibility by rule:");
                            for (rule, inc) in by_rule {
                                let name = grounded.rules.get(rule)?.name.as_str();
                                println!(
                                    "  {rule} {name:<24} primal {:.6}  dual {:.6}",
                                    inc.primal, inc.dual
                                );
                            }
                        }
                        report
                    }
                    ReasonerKind::Sgd => SgdReasoner::new(config.sgd.clone())
                        .with_cancel(token)
                        .optimize_mem(&store, &mut grounded.atoms)?,
                }
            };

            print_report(&report);
            println!("Values:");
            print_values(&grounded.atoms);

            if let Some(dir) = persist {
                let db = AtomDatabase::open(&dir)?;
                db.save_atoms(&grounded.atoms)?;
                let summary = serde_json::to_vec(&report).into_diagnostic()?;
                db.put_meta("last_run", &summary)?;
                println!("Saved {} atoms to {}", grounded.atoms.len(), dir.display());
            }
        }

        Commands::Components { problem, top_k } => {
            let mut grounded = load_problem(&problem)?;
            let mut store = MemTermStore::with_capacity(grounded.terms.len());
            for term in std::mem::take(&mut grounded.terms) {
                store.add(term, &mut grounded.atoms)?;
            }
            store.seal()?;

            let components = store.components();
            println!(
                "Components: {} over {} terms (largest {})",
                components.len(),
                store.len(),
                components.largest()
            );
            let mut sizes: Vec<_> = components.iter().map(|(root, ids)| (root, ids.len())).collect();
            sizes.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            for (root, size) in sizes.into_iter().take(top_k) {
                println!("  {:<12} {size} terms", root.to_string());
            }
        }

        Commands::Values { persist } => {
            let db = AtomDatabase::open(&persist)?;
            let atoms = db.load_atoms()?;
            if atoms.is_empty() {
                println!("No atoms saved in {}.", persist.display());
                return Ok(());
            }
            if let Some(bytes) = db.get_meta("last_run")? {
                let report: RunReport = serde_json::from_slice(&bytes).into_diagnostic()?;
                print_report(&report);
            }
            println!("Values ({}):", atoms.len());
            print_values(&atoms);
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
