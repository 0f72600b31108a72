//! Fixed little-endian record encoding for terms written to pages.
//!
//! Record layout:
//! `[u32 rule][u8 kind][u8 hard][u16 arity][f32 weight][f32 constant]`
//! followed by `arity × [u32 atom][f32 coefficient]`.

use crate::atom::AtomId;
use crate::rule::RuleId;

use super::{PotentialKind, Term, Weight};

/// Bytes before the per-atom entries.
pub const RECORD_HEADER_BYTES: usize = 16;
/// Bytes per `(atom, coefficient)` entry.
pub const RECORD_ENTRY_BYTES: usize = 8;

impl Term {
    /// Size of this term's record in bytes.
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_BYTES + RECORD_ENTRY_BYTES * self.atoms.len()
    }

    /// Append this term's record to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.encoded_len());
        buf.extend_from_slice(&self.rule.get().to_le_bytes());
        buf.push(self.kind.tag());
        let (hard, weight) = match self.weight {
            Weight::Soft(w) => (0u8, w),
            Weight::Hard => (1u8, 0.0),
        };
        buf.push(hard);
        buf.extend_from_slice(&(self.atoms.len() as u16).to_le_bytes());
        buf.extend_from_slice(&weight.to_le_bytes());
        buf.extend_from_slice(&self.constant.to_le_bytes());
        for (atom, c) in self.atoms.iter().zip(&self.coefficients) {
            buf.extend_from_slice(&atom.get().to_le_bytes());
            buf.extend_from_slice(&c.to_le_bytes());
        }
    }

    /// Overwrite this term with the record at the front of `input`, advancing
    /// `input` past it. Existing atom and coefficient buffers are reused.
    pub fn decode_into(&mut self, input: &mut &[u8]) -> Result<(), String> {
        if input.len() < RECORD_HEADER_BYTES {
            return Err(format!(
                "record header needs {RECORD_HEADER_BYTES} bytes, {} remain",
                input.len()
            ));
        }
        let (head, rest) = input.split_at(RECORD_HEADER_BYTES);
        let rule = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let kind = PotentialKind::from_tag(head[4])
            .ok_or_else(|| format!("unknown potential kind tag {}", head[4]))?;
        let hard = match head[5] {
            0 => false,
            1 => true,
            other => return Err(format!("invalid hard flag {other}")),
        };
        let arity = u16::from_le_bytes([head[6], head[7]]) as usize;
        let weight = f32::from_le_bytes([head[8], head[9], head[10], head[11]]);
        let constant = f32::from_le_bytes([head[12], head[13], head[14], head[15]]);

        let body_len = arity * RECORD_ENTRY_BYTES;
        if arity == 0 {
            return Err("record has zero arity".into());
        }
        if rest.len() < body_len {
            return Err(format!(
                "record of arity {arity} needs {body_len} bytes, {} remain",
                rest.len()
            ));
        }
        let (body, tail) = rest.split_at(body_len);

        self.rule = RuleId::new(rule);
        self.kind = kind;
        self.weight = if hard { Weight::Hard } else { Weight::Soft(weight) };
        self.constant = constant;
        self.atoms.clear();
        self.coefficients.clear();
        for entry in body.chunks_exact(RECORD_ENTRY_BYTES) {
            self.atoms.push(AtomId::new(u32::from_le_bytes([
                entry[0], entry[1], entry[2], entry[3],
            ])));
            self.coefficients
                .push(f32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]));
        }
        *input = tail;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Term {
        Term::new(
            RuleId::new(7),
            PotentialKind::SquaredHinge,
            Weight::Soft(2.5),
            vec![AtomId::new(3), AtomId::new(11)],
            vec![1.0, -1.0],
            0.25,
        )
        .unwrap()
    }

    #[test]
    fn record_length_matches_layout() {
        let t = sample();
        let mut buf = Vec::new();
        t.encode(&mut buf);
        assert_eq!(buf.len(), t.encoded_len());
        assert_eq!(buf.len(), 16 + 2 * 8);
    }

    #[test]
    fn decode_reuses_slot_and_advances_input() {
        let a = sample();
        let b = Term::new(
            RuleId::new(1),
            PotentialKind::Linear,
            Weight::Hard,
            vec![AtomId::new(0)],
            vec![-1.0],
            1.0,
        )
        .unwrap();
        let mut buf = Vec::new();
        a.encode(&mut buf);
        b.encode(&mut buf);

        let mut slot = Term::placeholder();
        let mut input = buf.as_slice();
        slot.decode_into(&mut input).unwrap();
        assert_eq!(slot, a);
        slot.decode_into(&mut input).unwrap();
        assert_eq!(slot, b);
        assert!(input.is_empty());
    }

    #[test]
    fn truncated_record_is_rejected() {
        let mut buf = Vec::new();
        sample().encode(&mut buf);
        buf.truncate(buf.len() - 3);
        let mut slot = Term::placeholder();
        let mut input = buf.as_slice();
        assert!(slot.decode_into(&mut input).is_err());
    }

    #[test]
    fn bad_kind_tag_is_rejected() {
        let mut buf = Vec::new();
        sample().encode(&mut buf);
        buf[4] = 9;
        let mut slot = Term::placeholder();
        assert!(slot.decode_into(&mut buf.as_slice()).is_err());
    }
}
