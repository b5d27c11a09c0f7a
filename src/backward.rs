//! Backward dynamic-programming fill, posterior transition counts, and
//! trace composition. Grounded on
//! `examples/original_source/src/backward.cpp`'s `BackwardMatrix::fill`/
//! `getCounts`/`traceFrom`.

use log::info;
use min_max_heap::MinMaxHeap;

use crate::dpmatrix::DPMatrix;
use crate::envelope::Envelope;
use crate::evaluated::{EvaluatedMachine, EvaluatedState};
use crate::forward::{ForwardMatrix, MachinePath, PathStep, TraceTerminator};
use crate::machine::Machine;
use crate::numeric::{accumulate_log_sum_exp, POSTERIOR_UNDERFLOW_THRESHOLD};
use crate::seqpair::SeqPair;
use crate::token::{Token, Tokenizer};

/// The Backward matrix: `B[i, j, s]` is the log of the total probability of
/// reaching the end state from `s` having already consumed `input[0..i)`
/// and emitted `output[0..j)`.
pub struct BackwardMatrix<'a> {
    matrix: DPMatrix<'a>,
}

impl<'a> BackwardMatrix<'a> {
    /// Build and fill a Backward matrix over the full-rectangle envelope.
    pub fn new(machine: &'a EvaluatedMachine, seq: &'a SeqPair) -> Self {
        let env = Envelope::full_rectangle(seq.in_len(), seq.out_len());
        Self::with_envelope(machine, seq, env)
    }

    /// Build and fill a Backward matrix over an explicit envelope.
    pub fn with_envelope(machine: &'a EvaluatedMachine, seq: &'a SeqPair, env: Envelope) -> Self {
        let mut matrix = DPMatrix::new(machine, seq, env);
        info!("filling backward matrix ({} cells)", matrix.num_cells());
        fill(&mut matrix);
        Self { matrix }
    }

    /// The cell value `B[in_pos, out_pos, state]`.
    pub fn cell(&self, in_pos: usize, out_pos: usize, state: usize) -> f64 {
        self.matrix.cell(in_pos, out_pos, state)
    }

    /// `B[0, 0, start]`, equal to the Forward matrix's `logLike()` for the
    /// same machine and pair (spec.md P1).
    pub fn log_like(&self) -> f64 {
        self.matrix.cell(0, 0, self.matrix.machine.start_state())
    }

    /// Walk every active cell and every outgoing transition, invoking
    /// `visitor` with the posterior usage probability of that transition
    /// from that cell. Both the source cell and the destination cell are
    /// passed, per spec.md Open Question (b).
    pub fn get_counts(&self, forward: &ForwardMatrix, visitor: &mut dyn CountsVisitor) {
        let z = self.log_like();
        let n_states = self.matrix.n_states();
        let out_len = self.matrix.out_len();
        for out_pos in 0..=out_len {
            let (in_start, in_end) = self.matrix.range(out_pos);
            let out_tok = (out_pos < out_len).then(|| self.matrix.seq.output_tok(out_pos));
            for in_pos in in_start..in_end {
                let in_tok = (in_pos < self.matrix.in_len())
                    .then(|| self.matrix.seq.input_tok(in_pos));
                for s in 0..n_states {
                    let log_odds = forward.cell(in_pos, out_pos, s) - z;
                    if log_odds == f64::NEG_INFINITY {
                        continue;
                    }
                    let state = self.matrix.machine.state(s);
                    if let (Some(it), Some(ot)) = (in_tok, out_tok) {
                        self.visit_outgoing(
                            visitor, log_odds, in_pos, out_pos, s, state, it, ot, in_pos + 1,
                            out_pos + 1,
                        );
                    }
                    if let Some(it) = in_tok {
                        self.visit_outgoing(
                            visitor,
                            log_odds,
                            in_pos,
                            out_pos,
                            s,
                            state,
                            it,
                            Tokenizer::EPSILON,
                            in_pos + 1,
                            out_pos,
                        );
                    }
                    if let Some(ot) = out_tok {
                        self.visit_outgoing(
                            visitor,
                            log_odds,
                            in_pos,
                            out_pos,
                            s,
                            state,
                            Tokenizer::EPSILON,
                            ot,
                            in_pos,
                            out_pos + 1,
                        );
                    }
                    self.visit_outgoing(
                        visitor,
                        log_odds,
                        in_pos,
                        out_pos,
                        s,
                        state,
                        Tokenizer::EPSILON,
                        Tokenizer::EPSILON,
                        in_pos,
                        out_pos,
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_outgoing(
        &self,
        visitor: &mut dyn CountsVisitor,
        log_odds: f64,
        in_pos: usize,
        out_pos: usize,
        s: usize,
        state: &EvaluatedState,
        in_tok: Token,
        out_tok: Token,
        dest_in: usize,
        dest_out: usize,
    ) {
        if !self.matrix.is_active(dest_in, dest_out) {
            return;
        }
        for edge in state.outgoing(in_tok, out_tok) {
            let log_post = log_odds + edge.log_weight + self.matrix.cell(dest_in, dest_out, edge.state);
            let posterior = if log_post < POSTERIOR_UNDERFLOW_THRESHOLD {
                0.0
            } else {
                log_post.exp()
            };
            visitor.visit(
                (in_pos, out_pos, s),
                (dest_in, dest_out, edge.state),
                edge.trans_index,
                posterior,
            );
        }
    }

    /// All posterior-weighted transitions, as a caller-owned priority
    /// queue ordered by posterior probability (used for best-path
    /// decoding per spec.md §4.5).
    pub fn post_trans_queue(&self, forward: &ForwardMatrix) -> MinMaxHeap<PosteriorEntry> {
        let mut queue = MinMaxHeap::new();
        let mut sorter = TransitionSorter { queue: &mut queue };
        self.get_counts(forward, &mut sorter);
        queue
    }

    /// Splice a Forward best-so-far traceback from start to `(i, j, s)`
    /// with a Backward trace-forward from `(i, j, s)` to the end.
    pub fn trace_from(&self, forward: &ForwardMatrix, i: usize, j: usize, s: usize) -> MachinePath {
        let mut path = forward.trace_back(i, j, s);
        path.extend(self.trace_forward(i, j, s));
        path
    }

    /// As [`BackwardMatrix::trace_from`], but additionally splices a named
    /// transition out of `(i, j, s)` before tracing forward to the end.
    pub fn trace_from_transition(
        &self,
        forward: &ForwardMatrix,
        machine: &Machine,
        i: usize,
        j: usize,
        s: usize,
        trans_index: usize,
    ) -> MachinePath {
        let mut path = forward.trace_back(i, j, s);
        let trans = &machine.state(s).trans[trans_index];
        path.push(PathStep {
            from: s,
            to: trans.to,
            trans_index,
        });
        let next_i = i + usize::from(trans.in_tok != Tokenizer::EPSILON);
        let next_j = j + usize::from(trans.out_tok != Tokenizer::EPSILON);
        path.extend(self.trace_forward(next_i, next_j, trans.to));
        path
    }

    /// As [`BackwardMatrix::trace_from`], but aborts (returning whatever
    /// prefix was built) once `stop` returns true for the next step.
    pub fn trace_from_until(
        &self,
        forward: &ForwardMatrix,
        i: usize,
        j: usize,
        s: usize,
        stop: &TraceTerminator,
    ) -> MachinePath {
        let mut path = forward.trace_back_until(i, j, s, stop);
        path.extend(self.trace_forward_until(i, j, s, stop));
        path
    }

    /// Deterministic best-so-far trace forward from `(i, j, s)` to the end
    /// cell, following the outgoing transition maximizing
    /// `logWeight + B[dest]` at each step.
    pub fn trace_forward(&self, i: usize, j: usize, s: usize) -> MachinePath {
        self.trace_forward_until(i, j, s, &|_, _, _, _| false)
    }

    /// As [`BackwardMatrix::trace_forward`], but stops early once `stop`
    /// returns true for the next step about to be taken.
    pub fn trace_forward_until(
        &self,
        mut i: usize,
        mut j: usize,
        mut s: usize,
        stop: &TraceTerminator,
    ) -> MachinePath {
        let end = self.matrix.machine.end_state();
        let in_len = self.matrix.in_len();
        let out_len = self.matrix.out_len();
        let mut steps = Vec::new();
        while !(i == in_len && j == out_len && s == end) {
            let candidates = self.outgoing_candidates(i, j, s);
            let best = candidates
                .iter()
                .copied()
                .max_by(|a, b| a.4.partial_cmp(&b.4).unwrap());
            let Some((next_i, next_j, next_s, trans_index, _)) = best else {
                break;
            };
            if stop(i, j, s, trans_index) {
                break;
            }
            steps.push(PathStep {
                from: s,
                to: next_s,
                trans_index,
            });
            i = next_i;
            j = next_j;
            s = next_s;
        }
        steps
    }

    fn outgoing_candidates(
        &self,
        i: usize,
        j: usize,
        s: usize,
    ) -> Vec<(usize, usize, usize, usize, f64)> {
        let state = self.matrix.machine.state(s);
        let in_tok = (i < self.matrix.in_len()).then(|| self.matrix.seq.input_tok(i));
        let out_tok = (j < self.matrix.out_len()).then(|| self.matrix.seq.output_tok(j));
        let mut out = Vec::new();
        if let (Some(it), Some(ot)) = (in_tok, out_tok) {
            self.push_candidates(&mut out, state, it, ot, i + 1, j + 1);
        }
        if let Some(it) = in_tok {
            self.push_candidates(&mut out, state, it, Tokenizer::EPSILON, i + 1, j);
        }
        if let Some(ot) = out_tok {
            self.push_candidates(&mut out, state, Tokenizer::EPSILON, ot, i, j + 1);
        }
        self.push_candidates(&mut out, state, Tokenizer::EPSILON, Tokenizer::EPSILON, i, j);
        out
    }

    fn push_candidates(
        &self,
        out: &mut Vec<(usize, usize, usize, usize, f64)>,
        state: &EvaluatedState,
        in_tok: Token,
        out_tok: Token,
        next_i: usize,
        next_j: usize,
    ) {
        if !self.matrix.is_active(next_i, next_j) {
            return;
        }
        for edge in state.outgoing(in_tok, out_tok) {
            let value = edge.log_weight + self.matrix.cell(next_i, next_j, edge.state);
            out.push((next_i, next_j, edge.state, edge.trans_index, value));
        }
    }
}

/// Receives each `(source cell, destination cell, transIndex, posterior)`
/// tuple discovered while walking a [`BackwardMatrix`]. Implemented by
/// [`TransitionCounter`] and [`TransitionSorter`]; callers may implement
/// their own (spec.md §4.5, "Visitors").
pub trait CountsVisitor {
    /// `src`/`dest` are `(in_pos, out_pos, state)` triples.
    fn visit(
        &mut self,
        src: (usize, usize, usize),
        dest: (usize, usize, usize),
        trans_index: usize,
        posterior: f64,
    );
}

/// Accumulates posterior usage into a [`crate::counts::MachineCounts`].
pub struct TransitionCounter<'a> {
    counts: &'a mut crate::counts::MachineCounts,
}

impl<'a> TransitionCounter<'a> {
    /// Wrap a counts accumulator for use as a [`CountsVisitor`].
    pub fn new(counts: &'a mut crate::counts::MachineCounts) -> Self {
        Self { counts }
    }
}

impl<'a> CountsVisitor for TransitionCounter<'a> {
    fn visit(
        &mut self,
        src: (usize, usize, usize),
        _dest: (usize, usize, usize),
        trans_index: usize,
        posterior: f64,
    ) {
        self.counts.add_posterior(src.2, trans_index, posterior);
    }
}

/// One entry of a posterior-sorted priority queue.
#[derive(Debug, Clone, Copy)]
pub struct PosteriorEntry {
    /// The posterior usage probability of this transition from this cell.
    pub posterior: f64,
    /// `(in_pos, out_pos, state)` of the source cell.
    pub src: (usize, usize, usize),
    /// `(in_pos, out_pos, state)` of the destination cell.
    pub dest: (usize, usize, usize),
    /// Index of the transition within the source state's transition list.
    pub trans_index: usize,
}

impl PartialEq for PosteriorEntry {
    fn eq(&self, other: &Self) -> bool {
        self.posterior == other.posterior
    }
}
impl Eq for PosteriorEntry {}
impl PartialOrd for PosteriorEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PosteriorEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.posterior
            .partial_cmp(&other.posterior)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// Pushes each `(posterior, cell, transition)` tuple into a caller-owned
/// [`MinMaxHeap`], used for best-path decoding.
struct TransitionSorter<'a> {
    queue: &'a mut MinMaxHeap<PosteriorEntry>,
}

impl<'a> CountsVisitor for TransitionSorter<'a> {
    fn visit(
        &mut self,
        src: (usize, usize, usize),
        dest: (usize, usize, usize),
        trans_index: usize,
        posterior: f64,
    ) {
        self.queue.push(PosteriorEntry {
            posterior,
            src,
            dest,
            trans_index,
        });
    }
}

fn fill(matrix: &mut DPMatrix) {
    let n_states = matrix.n_states();
    let out_len = matrix.out_len();
    let in_len = matrix.in_len();
    let end_state = matrix.machine.end_state();
    for out_pos in (0..=out_len).rev() {
        let (in_start, in_end) = matrix.range(out_pos);
        let out_tok = (out_pos < out_len).then(|| matrix.seq.output_tok(out_pos));
        for in_pos in (in_start..in_end).rev() {
            let in_tok = (in_pos < in_len).then(|| matrix.seq.input_tok(in_pos));
            for s in (0..n_states).rev() {
                let is_final = in_pos == in_len && out_pos == out_len;
                let mut ll = if is_final && s == end_state {
                    0.0
                } else {
                    f64::NEG_INFINITY
                };
                let state = matrix.machine.state(s);
                if let (Some(it), Some(ot)) = (in_tok, out_tok) {
                    accumulate(matrix, &mut ll, state, it, ot, in_pos + 1, out_pos + 1);
                }
                if let Some(it) = in_tok {
                    accumulate(matrix, &mut ll, state, it, Tokenizer::EPSILON, in_pos + 1, out_pos);
                }
                if let Some(ot) = out_tok {
                    accumulate(matrix, &mut ll, state, Tokenizer::EPSILON, ot, in_pos, out_pos + 1);
                }
                accumulate(
                    matrix,
                    &mut ll,
                    state,
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
    next_in: usize,
    next_out: usize,
) {
    if !matrix.is_active(next_in, next_out) {
        return;
    }
    for edge in state.outgoing(in_tok, out_tok) {
        let term = edge.log_weight + matrix.cell(next_in, next_out, edge.state);
        accumulate_log_sum_exp(ll, term);
    }
}
