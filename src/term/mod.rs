//! Potential terms: the numeric artifact a ground rule produces.
//!
//! A term is `weight × φ(Σ cᵢ·xᵢ + k)` where `φ` is one of four shapes
//! (linear, hinge, squared linear, squared hinge). The shapes are a tagged
//! enum evaluated by one `match`, so the per-term hot loops of the reasoners
//! never go through dynamic dispatch.

pub mod codec;

use serde::{Deserialize, Serialize};

use crate::atom::AtomId;
use crate::error::StoreError;
use crate::rule::RuleId;
use crate::store::StoreResult;

/// Shape applied to a term's raw linear value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PotentialKind {
    /// `x`
    Linear,
    /// `max(0, x)`
    Hinge,
    /// `x²`
    SquaredLinear,
    /// `max(0, x)²`
    SquaredHinge,
}

impl PotentialKind {
    pub fn from_flags(hinge: bool, squared: bool) -> Self {
        match (hinge, squared) {
            (false, false) => PotentialKind::Linear,
            (true, false) => PotentialKind::Hinge,
            (false, true) => PotentialKind::SquaredLinear,
            (true, true) => PotentialKind::SquaredHinge,
        }
    }

    pub fn is_hinge(self) -> bool {
        matches!(self, PotentialKind::Hinge | PotentialKind::SquaredHinge)
    }

    pub fn is_squared(self) -> bool {
        matches!(
            self,
            PotentialKind::SquaredLinear | PotentialKind::SquaredHinge
        )
    }

    /// Apply the shape to a raw linear value.
    #[inline]
    pub fn apply(self, raw: f32) -> f32 {
        match self {
            PotentialKind::Linear => raw,
            PotentialKind::Hinge => raw.max(0.0),
            PotentialKind::SquaredLinear => raw * raw,
            PotentialKind::SquaredHinge => {
                let h = raw.max(0.0);
                h * h
            }
        }
    }

    /// Derivative of the shape with respect to the raw value.
    ///
    /// At the hinge point (`raw == 0`) the zero subgradient is chosen.
    #[inline]
    pub fn slope(self, raw: f32) -> f32 {
        match self {
            PotentialKind::Linear => 1.0,
            PotentialKind::Hinge => {
                if raw > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            PotentialKind::SquaredLinear => 2.0 * raw,
            PotentialKind::SquaredHinge => 2.0 * raw.max(0.0),
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            PotentialKind::Linear => 0,
            PotentialKind::Hinge => 1,
            PotentialKind::SquaredLinear => 2,
            PotentialKind::SquaredHinge => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PotentialKind::Linear),
            1 => Some(PotentialKind::Hinge),
            2 => Some(PotentialKind::SquaredLinear),
            3 => Some(PotentialKind::SquaredHinge),
            _ => None,
        }
    }
}

impl std::fmt::Display for PotentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PotentialKind::Linear => write!(f, "linear"),
            PotentialKind::Hinge => write!(f, "hinge"),
            PotentialKind::SquaredLinear => write!(f, "squared-linear"),
            PotentialKind::SquaredHinge => write!(f, "squared-hinge"),
        }
    }
}

/// Weight of a rule and of every term grounded from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Weight {
    /// Weighted potential; the weight is non-negative.
    Soft(f32),
    /// Unweighted rule: the term's dissatisfaction must be exactly zero.
    Hard,
}

impl Weight {
    pub fn is_hard(self) -> bool {
        matches!(self, Weight::Hard)
    }

    /// Numeric weight of a soft potential; `None` for hard constraints.
    pub fn soft(self) -> Option<f32> {
        match self {
            Weight::Soft(w) => Some(w),
            Weight::Hard => None,
        }
    }

    pub(crate) fn validate(self, rule: RuleId) -> StoreResult<Self> {
        if let Weight::Soft(w) = self {
            if !w.is_finite() || w < 0.0 {
                return Err(StoreError::MalformedTerm {
                    rule: rule.get(),
                    message: format!("weight {w} must be finite and non-negative"),
                });
            }
        }
        Ok(self)
    }
}

impl std::fmt::Display for Weight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Weight::Soft(w) => write!(f, "{w}"),
            Weight::Hard => write!(f, "hard"),
        }
    }
}

/// One potential term over a small fixed set of atoms.
///
/// Immutable after construction except for its weight, which the learning
/// loop may change between optimization rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    rule: RuleId,
    kind: PotentialKind,
    weight: Weight,
    constant: f32,
    atoms: Vec<AtomId>,
    coefficients: Vec<f32>,
}

impl Term {
    /// Build a term, rejecting empty, ragged, or non-finite inputs.
    pub fn new(
        rule: RuleId,
        kind: PotentialKind,
        weight: Weight,
        atoms: Vec<AtomId>,
        coefficients: Vec<f32>,
        constant: f32,
    ) -> StoreResult<Self> {
        let malformed = |message: String| StoreError::MalformedTerm {
            rule: rule.get(),
            message,
        };
        if atoms.is_empty() {
            return Err(malformed("term references no atoms".into()));
        }
        if atoms.len() != coefficients.len() {
            return Err(malformed(format!(
                "{} atoms but {} coefficients",
                atoms.len(),
                coefficients.len()
            )));
        }
        if atoms.len() > u16::MAX as usize {
            return Err(malformed(format!("arity {} too large", atoms.len())));
        }
        if !constant.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
            return Err(malformed("non-finite coefficient or constant".into()));
        }
        Ok(Self {
            rule,
            kind,
            weight: weight.validate(rule)?,
            constant,
            atoms,
            coefficients,
        })
    }

    /// Empty slot used by the page pool; overwritten by `decode_into`.
    pub(crate) fn placeholder() -> Self {
        Self {
            rule: RuleId::new(0),
            kind: PotentialKind::Linear,
            weight: Weight::Soft(0.0),
            constant: 0.0,
            atoms: Vec::new(),
            coefficients: Vec::new(),
        }
    }

    /// Overwrite this term with `other`, reusing this term's buffers.
    pub(crate) fn assign_from(&mut self, other: &Term) {
        self.rule = other.rule;
        self.kind = other.kind;
        self.weight = other.weight;
        self.constant = other.constant;
        self.atoms.clear();
        self.atoms.extend_from_slice(&other.atoms);
        self.coefficients.clear();
        self.coefficients.extend_from_slice(&other.coefficients);
    }

    pub fn rule(&self) -> RuleId {
        self.rule
    }

    pub fn kind(&self) -> PotentialKind {
        self.kind
    }

    pub fn weight(&self) -> Weight {
        self.weight
    }

    pub fn set_weight(&mut self, weight: Weight) {
        self.weight = weight;
    }

    pub fn constant(&self) -> f32 {
        self.constant
    }

    pub fn atoms(&self) -> &[AtomId] {
        &self.atoms
    }

    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    pub fn size(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_hard(&self) -> bool {
        self.weight.is_hard()
    }

    /// Raw linear value `Σ cᵢ·xᵢ + k`, reading atom values by index.
    #[inline]
    pub fn raw(&self, values: &[f32]) -> f32 {
        self.atoms
            .iter()
            .zip(&self.coefficients)
            .fold(self.constant, |acc, (atom, c)| acc + c * values[atom.index()])
    }

    /// Dissatisfaction at the given atom values: the shaped raw value.
    #[inline]
    pub fn dissatisfaction(&self, values: &[f32]) -> f32 {
        self.kind.apply(self.raw(values))
    }

    /// Weighted dissatisfaction; hard constraints contribute nothing.
    pub fn objective(&self, values: &[f32]) -> f32 {
        match self.weight {
            Weight::Soft(w) => w * self.dissatisfaction(values),
            Weight::Hard => 0.0,
        }
    }

    /// Whether a hard constraint holds within `tolerance`.
    ///
    /// Hinged constraints require `raw ≤ 0`, linear ones `raw = 0`.
    pub fn constraint_satisfied(&self, values: &[f32], tolerance: f32) -> bool {
        let raw = self.raw(values);
        if self.kind.is_hinge() {
            raw <= tolerance
        } else {
            raw.abs() <= tolerance
        }
    }

    /// Scale `s` such that `∂(w·φ)/∂xᵢ = s·cᵢ`, given the raw value.
    #[inline]
    pub fn gradient_scale(&self, raw: f32) -> f32 {
        match self.weight {
            Weight::Soft(w) => w * self.kind.slope(raw),
            Weight::Hard => 0.0,
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} * {}(", self.weight, self.kind)?;
        for (i, (atom, c)) in self.atoms.iter().zip(&self.coefficients).enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{c}*{atom}")?;
        }
        write!(f, " + {})", self.constant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(kind: PotentialKind, coeffs: &[f32], constant: f32) -> Term {
        let atoms = (0..coeffs.len() as u32).map(AtomId::new).collect();
        Term::new(
            RuleId::new(0),
            kind,
            Weight::Soft(1.0),
            atoms,
            coeffs.to_vec(),
            constant,
        )
        .unwrap()
    }

    #[test]
    fn hinge_is_zero_when_raw_is_negative() {
        let t = term(PotentialKind::Hinge, &[1.0, 1.0], -1.0);
        assert_eq!(t.dissatisfaction(&[0.2, 0.3]), 0.0);
        assert!((t.dissatisfaction(&[0.9, 0.6]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn squared_shapes_square_the_raw_value() {
        let sq = term(PotentialKind::SquaredLinear, &[1.0], -0.5);
        assert!((sq.dissatisfaction(&[0.0]) - 0.25).abs() < 1e-6);
        let sqh = term(PotentialKind::SquaredHinge, &[1.0], -0.5);
        assert_eq!(sqh.dissatisfaction(&[0.0]), 0.0);
        assert!((sqh.dissatisfaction(&[1.0]) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn gradient_scale_follows_the_shape() {
        let hinge = term(PotentialKind::Hinge, &[1.0], -0.5);
        assert_eq!(hinge.gradient_scale(-0.1), 0.0);
        assert_eq!(hinge.gradient_scale(0.0), 0.0);
        assert_eq!(hinge.gradient_scale(0.2), 1.0);
        let sq = term(PotentialKind::SquaredLinear, &[1.0], 0.0);
        assert!((sq.gradient_scale(0.3) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn hard_constraints_have_no_objective() {
        let t = Term::new(
            RuleId::new(1),
            PotentialKind::Hinge,
            Weight::Hard,
            vec![AtomId::new(0)],
            vec![1.0],
            -0.5,
        )
        .unwrap();
        assert_eq!(t.objective(&[1.0]), 0.0);
        assert!(!t.constraint_satisfied(&[1.0], 1e-6));
        assert!(t.constraint_satisfied(&[0.4], 1e-6));
    }

    #[test]
    fn constructor_rejects_malformed_terms() {
        let rule = RuleId::new(3);
        assert!(Term::new(rule, PotentialKind::Linear, Weight::Soft(1.0), vec![], vec![], 0.0).is_err());
        assert!(
            Term::new(
                rule,
                PotentialKind::Linear,
                Weight::Soft(1.0),
                vec![AtomId::new(0)],
                vec![1.0, 2.0],
                0.0
            )
            .is_err()
        );
        assert!(
            Term::new(
                rule,
                PotentialKind::Linear,
                Weight::Soft(-1.0),
                vec![AtomId::new(0)],
                vec![1.0],
                0.0
            )
            .is_err()
        );
    }

    #[test]
    fn kind_flags_round_trip() {
        for hinge in [false, true] {
            for squared in [false, true] {
                let kind = PotentialKind::from_flags(hinge, squared);
                assert_eq!(kind.is_hinge(), hinge);
                assert_eq!(kind.is_squared(), squared);
                assert_eq!(PotentialKind::from_tag(kind.tag()), Some(kind));
            }
        }
    }
}
