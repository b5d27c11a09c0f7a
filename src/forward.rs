//! Forward dynamic-programming fill: total log-likelihood, stochastic path
//! sampling, and deterministic best-so-far traceback. Grounded on
//! `examples/original_source/src/forward.h`'s `ForwardMatrix` interface and
//! the dual of `backward.cpp`'s fill loop (spec.md §4.4).

use log::info;
use rand::Rng;

use crate::dpmatrix::DPMatrix;
use crate::envelope::Envelope;
use crate::evaluated::{EvaluatedMachine, EvaluatedState};
use crate::machine::Machine;
use crate::numeric::accumulate_log_sum_exp;
use crate::seqpair::SeqPair;
use crate::token::{Token, Tokenizer};

/// One transition usage on a traced or sampled path.
#[derive(Debug, Clone, Copy)]
pub struct PathStep {
    /// Source state.
    pub from: usize,
    /// Destination state.
    pub to: usize,
    /// Index of the transition within `from`'s transition list.
    pub trans_index: usize,
}

/// An ordered sequence of transition usages from the start state to the end
/// state.
pub type MachinePath = Vec<PathStep>;

/// A terminator predicate that can abort a traceback early, given
/// `(in_pos, out_pos, state, trans_index)` of the step about to be taken.
pub type TraceTerminator<'a> = dyn Fn(usize, usize, usize, usize) -> bool + 'a;

/// The Forward matrix: `F[i, j, s]` is the log of the total probability of
/// reaching state `s` having consumed `input[0..i)` and emitted
/// `output[0..j)`.
pub struct ForwardMatrix<'a> {
    matrix: DPMatrix<'a>,
}

impl<'a> ForwardMatrix<'a> {
    /// Build and fill a Forward matrix over the full-rectangle envelope.
    pub fn new(machine: &'a EvaluatedMachine, seq: &'a SeqPair) -> Self {
        let env = Envelope::full_rectangle(seq.in_len(), seq.out_len());
        Self::with_envelope(machine, seq, env)
    }

    /// Build and fill a Forward matrix over an explicit envelope.
    pub fn with_envelope(machine: &'a EvaluatedMachine, seq: &'a SeqPair, env: Envelope) -> Self {
        let mut matrix = DPMatrix::new(machine, seq, env);
        info!(
            "filling forward matrix ({} cells)",
            matrix.num_cells()
        );
        fill(&mut matrix);
        Self { matrix }
    }

    /// The cell value `F[in_pos, out_pos, state]`.
    pub fn cell(&self, in_pos: usize, out_pos: usize, state: usize) -> f64 {
        self.matrix.cell(in_pos, out_pos, state)
    }

    /// `F[inLen, outLen, end]`: the total log-likelihood that the machine
    /// relates the two sequences. `-inf` means the pair is unalignable; the
    /// caller decides whether that is an error (spec.md §7, *Unalignable*).
    pub fn log_like(&self) -> f64 {
        let ll = self
            .matrix
            .cell(self.matrix.in_len(), self.matrix.out_len(), self.matrix.machine.end_state());
        if ll == f64::NEG_INFINITY {
            log::warn!("sequence pair is unalignable under this machine");
        }
        ll
    }

    /// Stochastic traceback from the end cell to the start cell, choosing
    /// each incoming transition with probability proportional to
    /// `exp(F[prev] + logWeight - F[cur])`. Deterministic given the PRNG
    /// sequence (spec.md §5, §4.4 "Sampling").
    pub fn sample_path<R: Rng>(&self, rng: &mut R) -> MachinePath {
        self.sample_path_from(
            self.matrix.in_len(),
            self.matrix.out_len(),
            self.matrix.machine.end_state(),
            rng,
        )
    }

    /// Stochastic traceback starting from an arbitrary active cell.
    pub fn sample_path_from<R: Rng>(
        &self,
        mut i: usize,
        mut j: usize,
        mut s: usize,
        rng: &mut R,
    ) -> MachinePath {
        let start = self.matrix.machine.start_state();
        let mut steps = Vec::new();
        while !(i == 0 && j == 0 && s == start) {
            let cur = self.matrix.cell(i, j, s);
            let candidates = self.incoming_candidates(i, j, s);
            let (prev_i, prev_j, prev_s, trans_index, weight) =
                choose_weighted(&candidates, cur, rng);
            steps.push(PathStep {
                from: prev_s,
                to: s,
                trans_index,
            });
            let _ = weight;
            i = prev_i;
            j = prev_j;
            s = prev_s;
        }
        steps.reverse();
        steps
    }

    /// Deterministic best-so-far traceback: at each step, follow the
    /// incoming transition maximizing `F[prev] + logWeight`. Used to splice
    /// a path prefix in [`crate::backward::BackwardMatrix::trace_from`].
    pub fn trace_back(&self, i: usize, j: usize, s: usize) -> MachinePath {
        self.trace_back_until(i, j, s, &|_, _, _, _| false)
    }

    /// As [`ForwardMatrix::trace_back`], but stops early once `stop`
    /// returns true for the next step about to be taken.
    pub fn trace_back_until(
        &self,
        mut i: usize,
        mut j: usize,
        mut s: usize,
        stop: &TraceTerminator,
    ) -> MachinePath {
        let start = self.matrix.machine.start_state();
        let mut steps = Vec::new();
        while !(i == 0 && j == 0 && s == start) {
            let candidates = self.incoming_candidates(i, j, s);
            let best = candidates
                .iter()
                .copied()
                .max_by(|a, b| a.4.partial_cmp(&b.4).unwrap());
            let Some((prev_i, prev_j, prev_s, trans_index, _)) = best else {
                break;
            };
            if stop(prev_i, prev_j, prev_s, trans_index) {
                break;
            }
            steps.push(PathStep {
                from: prev_s,
                to: s,
                trans_index,
            });
            i = prev_i;
            j = prev_j;
            s = prev_s;
        }
        steps.reverse();
        steps
    }

    /// All incoming-transition candidates for cell `(i, j, s)`, as
    /// `(prev_i, prev_j, prev_s, trans_index, F[prev] + logWeight)`.
    pub(crate) fn incoming_candidates(
        &self,
        i: usize,
        j: usize,
        s: usize,
    ) -> Vec<(usize, usize, usize, usize, f64)> {
        let state = self.matrix.machine.state(s);
        let in_tok = (i > 0).then(|| self.matrix.seq.input_tok(i - 1));
        let out_tok = (j > 0).then(|| self.matrix.seq.output_tok(j - 1));
        let mut out = Vec::new();
        if let (Some(it), Some(ot)) = (in_tok, out_tok) {
            self.push_candidates(&mut out, state, it, ot, i - 1, j - 1);
        }
        if let Some(it) = in_tok {
            self.push_candidates(&mut out, state, it, Tokenizer::EPSILON, i - 1, j);
        }
        if let Some(ot) = out_tok {
            self.push_candidates(&mut out, state, Tokenizer::EPSILON, ot, i, j - 1);
        }
        self.push_candidates(
            &mut out,
            state,
            Tokenizer::EPSILON,
            Tokenizer::EPSILON,
            i,
            j,
        );
        out
    }

    fn push_candidates(
        &self,
        out: &mut Vec<(usize, usize, usize, usize, f64)>,
        state: &EvaluatedState,
        in_tok: Token,
        out_tok: Token,
        prev_i: usize,
        prev_j: usize,
    ) {
        if !self.matrix.is_active(prev_i, prev_j) {
            return;
        }
        for edge in state.incoming(in_tok, out_tok) {
            let value = self.matrix.cell(prev_i, prev_j, edge.state) + edge.log_weight;
            out.push((prev_i, prev_j, edge.state, edge.trans_index, value));
        }
    }
}

fn choose_weighted<R: Rng>(
    candidates: &[(usize, usize, usize, usize, f64)],
    cur: f64,
    rng: &mut R,
) -> (usize, usize, usize, usize, f64) {
    let weights: Vec<f64> = candidates
        .iter()
        .map(|c| (c.4 - cur).exp().max(0.0))
        .collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        // degenerate cell (shouldn't occur on an alignable path); fall back
        // to the first candidate deterministically.
        return candidates[0];
    }
    let mut draw = rng.gen::<f64>() * total;
    for (candidate, weight) in candidates.iter().zip(weights.iter()) {
        if draw < *weight {
            return *candidate;
        }
        draw -= weight;
    }
    *candidates.last().unwrap()
}

fn fill(matrix: &mut DPMatrix) {
    let n_states = matrix.n_states();
    let out_len = matrix.out_len();
    let start_state = matrix.machine.start_state();
    for out_pos in 0..=out_len {
        let (in_start, in_end) = matrix.range(out_pos);
        let out_tok = (out_pos > 0).then(|| matrix.seq.output_tok(out_pos - 1));
        for in_pos in in_start..in_end {
            let in_tok = (in_pos > 0).then(|| matrix.seq.input_tok(in_pos - 1));
            for s in 0..n_states {
                let is_origin = in_pos == 0 && out_pos == 0;
                let mut ll = if is_origin && s == start_state {
                    0.0
                } else {
                    f64::NEG_INFINITY
                };
                let state = matrix.machine.state(s);
                if let (Some(it), Some(ot)) = (in_tok, out_tok) {
                    accumulate(matrix, &mut ll, &state, it, ot, in_pos - 1, out_pos - 1);
                }
                if let Some(it) = in_tok {
                    accumulate(
                        matrix,
                        &mut ll,
                        &state,
                        it,
                        Tokenizer::EPSILON,
                        in_pos - 1,
                        out_pos,
                    );
                }
                if let Some(ot) = out_tok {
                    accumulate(
                        matrix,
                        &mut ll,
                        &state,
                        Tokenizer::EPSILON,
                        ot,
                        in_pos,
                        out_pos - 1,
                    );
                }
                accumulate(
                    matrix,
                    &mut ll,
                    &state,
                    Tokenizer::EPSILON,
                    Tokenizer::EPSILON,
                    in_pos,
                    out_pos,
                );
                matrix.set_cell(in_pos, out_pos, s, ll);
            }
        }
    }
}

fn accumulate(
    matrix: &DPMatrix,
    ll: &mut f64,
    state: &EvaluatedState,
    in_tok: Token,
    out_tok: Token,
    prev_in: usize,
    prev_out: usize,
) {
    if !matrix.is_active(prev_in, prev_out) {
        return;
    }
    for edge in state.incoming(in_tok, out_tok) {
        let term = matrix.cell(prev_in, prev_out, edge.state) + edge.log_weight;
        accumulate_log_sum_exp(ll, term);
    }
}

/// Fetches the machine's actual [`Machine`] transition metadata for a
/// traced [`PathStep`] (the DP engine itself only needs `EvaluatedMachine`,
/// but callers reconstructing symbols/weights along a path want the
/// original structure).
pub fn resolve_step<'m>(machine: &'m Machine, step: &PathStep) -> &'m crate::machine::Transition {
    &machine.state(step.from).trans[step.trans_index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluated::EvaluatedMachine;
    use crate::machine::{Machine, MachineSpec, StateSpec, TransitionSpec};
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
    fn identity_transducer_has_zero_loglike() {
        let machine = identity_machine();
        let em = EvaluatedMachine::new(&machine, &Params::new()).unwrap();
        let seq = SeqPair::new(&machine, &["a".to_string()], &["a".to_string()]).unwrap();
        let fwd = ForwardMatrix::new(&em, &seq);
        assert!((fwd.log_like() - 0.0).abs() < 1e-12);
    }

    #[test]
    fn mismatched_pair_is_unalignable() {
        let machine = identity_machine();
        let em = EvaluatedMachine::new(&machine, &Params::new()).unwrap();
        let seq = SeqPair::new(&machine, &["a".to_string(), "a".to_string()], &["a".to_string()])
            .unwrap();
        let fwd = ForwardMatrix::new(&em, &seq);
        assert_eq!(fwd.log_like(), f64::NEG_INFINITY);
    }

    #[test]
    fn sampled_path_matches_the_single_alignment() {
        let machine = identity_machine();
        let em = EvaluatedMachine::new(&machine, &Params::new()).unwrap();
        let seq = SeqPair::new(&machine, &["a".to_string()], &["a".to_string()]).unwrap();
        let fwd = ForwardMatrix::new(&em, &seq);
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let path = fwd.sample_path(&mut rng);
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].from, 0);
        assert_eq!(path[0].to, 1);
    }
}
