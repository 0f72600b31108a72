//! Rules and their groundings.
//!
//! A [`Rule`] carries what the learning loop may change (its weight) and what
//! shapes its potentials (the squared flag). Ground rules bind a rule to
//! concrete atoms and turn into [`Term`]s.

use serde::{Deserialize, Serialize};

use crate::atom::AtomId;
use crate::error::StoreError;
use crate::store::StoreResult;
use crate::term::{PotentialKind, Term, Weight};

/// Dense identifier of a rule inside a [`RuleSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RuleId(u32);

impl RuleId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule:{}", self.0)
    }
}

/// A (first-order) rule as seen by the inference core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub weight: Weight,
    /// Square the hinge of every grounding.
    pub squared: bool,
}

/// Registry of rules with dense ids.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule and return its id.
    pub fn add(&mut self, name: impl Into<String>, weight: Weight, squared: bool) -> StoreResult<RuleId> {
        let id = RuleId::new(self.rules.len() as u32);
        let weight = weight.validate(id)?;
        self.rules.push(Rule {
            id,
            name: name.into(),
            weight,
            squared,
        });
        Ok(id)
    }

    pub fn get(&self, id: RuleId) -> StoreResult<&Rule> {
        self.rules
            .get(id.get() as usize)
            .ok_or(StoreError::UnknownRule { rule: id.get() })
    }

    /// Change a rule's weight. Term stores must be told separately through
    /// their own `set_weight`.
    pub fn set_weight(&mut self, id: RuleId, weight: Weight) -> StoreResult<()> {
        let weight = weight.validate(id)?;
        let rule = self
            .rules
            .get_mut(id.get() as usize)
            .ok_or(StoreError::UnknownRule { rule: id.get() })?;
        rule.weight = weight;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }
}

/// Grounding of a logical rule: a clause already negated into DNF.
///
/// `positive` and `negative` are the literals of the *negated* clause, so the
/// term built from them measures the original clause's dissatisfaction
/// directly. Equality and hashing cover the rule id, then every positive
/// literal in order, then every negative literal in order, which lets
/// grounding deduplicate identical instantiations in a `HashSet`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroundLogicalRule {
    rule: RuleId,
    positive: Vec<AtomId>,
    negative: Vec<AtomId>,
}

impl GroundLogicalRule {
    pub fn new(rule: RuleId, positive: Vec<AtomId>, negative: Vec<AtomId>) -> Self {
        Self {
            rule,
            positive,
            negative,
        }
    }

    pub fn rule(&self) -> RuleId {
        self.rule
    }

    pub fn positive(&self) -> &[AtomId] {
        &self.positive
    }

    pub fn negative(&self) -> &[AtomId] {
        &self.negative
    }

    pub fn size(&self) -> usize {
        self.positive.len() + self.negative.len()
    }

    /// Build the potential term.
    ///
    /// Hinged only when there is more than one literal; `+1` per positive
    /// literal, `-1` per negative literal, constant `1 - |positive|`.
    pub fn to_term(&self, rule: &Rule) -> StoreResult<Term> {
        if rule.id != self.rule {
            return Err(StoreError::MalformedTerm {
                rule: self.rule.get(),
                message: format!("grounding of {} built with {}", self.rule, rule.id),
            });
        }
        let kind = PotentialKind::from_flags(self.size() > 1, rule.squared);
        let mut atoms = Vec::with_capacity(self.size());
        let mut coefficients = Vec::with_capacity(self.size());
        for &atom in &self.positive {
            atoms.push(atom);
            coefficients.push(1.0);
        }
        for &atom in &self.negative {
            atoms.push(atom);
            coefficients.push(-1.0);
        }
        let constant = 1.0 - self.positive.len() as f32;
        Term::new(self.rule, kind, rule.weight, atoms, coefficients, constant)
    }
}

impl std::fmt::Display for GroundLogicalRule {
    /// Renders the original clause: negated DNF literals negated back.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let literals = self
            .positive
            .iter()
            .map(|a| format!("!{a}"))
            .chain(self.negative.iter().map(|a| a.to_string()));
        for (i, lit) in literals.enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{lit}")?;
        }
        Ok(())
    }
}

/// Comparison of an arithmetic rule's linear sum against its constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    LessEqual,
    GreaterEqual,
    Equal,
}

/// Grounding of an arithmetic rule: `Σ cᵢ·xᵢ (≤ | ≥ | =) k`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundArithmeticRule {
    rule: RuleId,
    atoms: Vec<AtomId>,
    coefficients: Vec<f32>,
    comparator: Comparator,
    constant: f32,
}

impl GroundArithmeticRule {
    pub fn new(
        rule: RuleId,
        atoms: Vec<AtomId>,
        coefficients: Vec<f32>,
        comparator: Comparator,
        constant: f32,
    ) -> Self {
        Self {
            rule,
            atoms,
            coefficients,
            comparator,
            constant,
        }
    }

    pub fn rule(&self) -> RuleId {
        self.rule
    }

    /// Build the potential terms.
    ///
    /// Weighted rules become hinges of the violation (two hinges for `=`).
    /// Hard inequalities become one hard hinge term (`raw ≤ 0`), hard
    /// equalities one hard linear term (`raw = 0`).
    pub fn to_terms(&self, rule: &Rule) -> StoreResult<Vec<Term>> {
        let negated: Vec<f32> = self.coefficients.iter().map(|c| -c).collect();
        let below = |kind| {
            Term::new(
                self.rule,
                kind,
                rule.weight,
                self.atoms.clone(),
                self.coefficients.clone(),
                -self.constant,
            )
        };
        let above = |kind| {
            Term::new(
                self.rule,
                kind,
                rule.weight,
                self.atoms.clone(),
                negated.clone(),
                self.constant,
            )
        };
        let hinge = PotentialKind::from_flags(true, rule.squared);
        match (rule.weight, self.comparator) {
            (Weight::Hard, Comparator::LessEqual) => Ok(vec![below(PotentialKind::Hinge)?]),
            (Weight::Hard, Comparator::GreaterEqual) => Ok(vec![above(PotentialKind::Hinge)?]),
            (Weight::Hard, Comparator::Equal) => Ok(vec![below(PotentialKind::Linear)?]),
            (Weight::Soft(_), Comparator::LessEqual) => Ok(vec![below(hinge)?]),
            (Weight::Soft(_), Comparator::GreaterEqual) => Ok(vec![above(hinge)?]),
            (Weight::Soft(_), Comparator::Equal) => Ok(vec![below(hinge)?, above(hinge)?]),
        }
    }
}
