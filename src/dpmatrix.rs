//! Packed cell storage shared by [`crate::forward::ForwardMatrix`] and
//! [`crate::backward::BackwardMatrix`]. Cells are laid out contiguously in
//! column-major order with per-column offsets derived from the envelope,
//! per spec.md §3 ("DP cell").

use crate::envelope::Envelope;
use crate::evaluated::EvaluatedMachine;
use crate::seqpair::SeqPair;

/// One log-probability cell per `(input index, output index, state)`
/// within the envelope.
pub(crate) struct DPMatrix<'a> {
    pub(crate) machine: &'a EvaluatedMachine,
    pub(crate) seq: &'a SeqPair,
    pub(crate) env: Envelope,
    n_states: usize,
    offsets: Vec<usize>,
    cells: Vec<f64>,
}

impl<'a> DPMatrix<'a> {
    pub(crate) fn new(machine: &'a EvaluatedMachine, seq: &'a SeqPair, env: Envelope) -> Self {
        let n_states = machine.num_states();
        let out_len = seq.out_len();
        let mut offsets = Vec::with_capacity(out_len + 1);
        let mut total = 0usize;
        for j in 0..=out_len {
            offsets.push(total);
            let (s, e) = env.range(j);
            total += (e - s) * n_states;
        }
        Self {
            machine,
            seq,
            env,
            n_states,
            offsets,
            cells: vec![f64::NEG_INFINITY; total],
        }
    }

    #[inline]
    pub(crate) fn n_states(&self) -> usize {
        self.n_states
    }

    #[inline]
    pub(crate) fn in_len(&self) -> usize {
        self.seq.in_len()
    }

    #[inline]
    pub(crate) fn out_len(&self) -> usize {
        self.seq.out_len()
    }

    #[inline]
    pub(crate) fn is_active(&self, in_pos: usize, out_pos: usize) -> bool {
        self.env.is_active(in_pos, out_pos)
    }

    #[inline]
    pub(crate) fn range(&self, out_pos: usize) -> (usize, usize) {
        self.env.range(out_pos)
    }

    #[inline]
    fn index(&self, in_pos: usize, out_pos: usize, state: usize) -> usize {
        debug_assert!(
            self.is_active(in_pos, out_pos),
            "access to inactive cell ({in_pos}, {out_pos})"
        );
        debug_assert!(state < self.n_states, "state {state} out of range");
        let (start, _) = self.range(out_pos);
        self.offsets[out_pos] + (in_pos - start) * self.n_states + state
    }

    #[inline]
    pub(crate) fn cell(&self, in_pos: usize, out_pos: usize, state: usize) -> f64 {
        self.cells[self.index(in_pos, out_pos, state)]
    }

    #[inline]
    pub(crate) fn set_cell(&mut self, in_pos: usize, out_pos: usize, state: usize, value: f64) {
        let idx = self.index(in_pos, out_pos, state);
        self.cells[idx] = value;
    }

    pub(crate) fn num_cells(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{Machine, MachineSpec, StateSpec, TransitionSpec};
    use crate::seqpair::SeqPair;
    use crate::weight::{Params, WeightExpr};

    fn identity_machine() -> Machine {
        let spec = MachineSpec {
            states: vec![
                StateSpec {
                    id: None,
                    trans: vec![TransitionSpec {
                        to: 1,
                        in_sym: Some("a".to_string()),
                        out_sym: Some("a".to_string()),
                        weight: WeightExpr::one(),
                    }],
                },
                StateSpec { id: None, trans: vec![] },
            ],
        };
        Machine::from_spec(spec).unwrap()
    }

    #[test]
    fn packs_cells_without_overlap() {
        let machine = identity_machine();
        let em = EvaluatedMachine::new(&machine, &Params::new()).unwrap();
        let seq = SeqPair::new(&machine, &["a".to_string()], &["a".to_string()]).unwrap();
        let env = Envelope::full_rectangle(seq.in_len(), seq.out_len());
        let mut m = DPMatrix::new(&em, &seq, env);
        assert_eq!(m.num_cells(), (seq.in_len() + 1) * (seq.out_len() + 1) * em.num_states());
        m.set_cell(0, 0, 0, -1.0);
        m.set_cell(1, 1, 1, -2.0);
        assert_eq!(m.cell(0, 0, 0), -1.0);
        assert_eq!(m.cell(1, 1, 1), -2.0);
        // untouched cells stay at -inf
        assert_eq!(m.cell(1, 0, 1), f64::NEG_INFINITY);
    }
}
