//! A transducer with its symbolic weights collapsed, under a given
//! parameter assignment, into log-weights, indexed for O(1) lookup by
//! `(input token, output token)` in the DP inner loop. Grounded on
//! `examples/original_source/src/eval.h`'s `EvaluatedMachineState`/
//! `EvaluatedMachine`.

use std::collections::HashMap;

use log::debug;

use crate::error::Error;
use crate::machine::Machine;
use crate::token::Token;
use crate::weight::Params;

/// One end of a resolved transition as seen from the *other* endpoint's
/// lookup table: `state` is the destination when found in an `outgoing`
/// table, or the source when found in an `incoming` table.
#[derive(Debug, Clone, Copy)]
pub struct EvalTrans {
    /// The neighboring state index.
    pub state: usize,
    /// Precomputed `log(eval(weight, params))`.
    pub log_weight: f64,
    /// Index of this transition within its *source* state's transition
    /// list (stable regardless of which table it is looked up from).
    pub trans_index: usize,
}

/// Lookup table keyed by `(input token, output token)`.
pub type TransMap = HashMap<(Token, Token), Vec<EvalTrans>>;

/// One state of an [`EvaluatedMachine`].
#[derive(Debug, Clone, Default)]
pub struct EvaluatedState {
    /// Total number of outgoing transitions, cached.
    pub n_transitions: usize,
    /// `(in_tok, out_tok) -> transitions leaving this state with that
    /// token pair`.
    pub outgoing: TransMap,
    /// `(in_tok, out_tok) -> transitions entering this state with that
    /// token pair`.
    pub incoming: TransMap,
}

impl EvaluatedState {
    /// Outgoing transitions for a token pair, or an empty slice if none.
    pub fn outgoing(&self, in_tok: Token, out_tok: Token) -> &[EvalTrans] {
        self.outgoing
            .get(&(in_tok, out_tok))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Incoming transitions for a token pair, or an empty slice if none.
    pub fn incoming(&self, in_tok: Token, out_tok: Token) -> &[EvalTrans] {
        self.incoming
            .get(&(in_tok, out_tok))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// A [`Machine`] with weights collapsed to log-space under a fixed
/// [`Params`] assignment.
#[derive(Debug, Clone)]
pub struct EvaluatedMachine {
    state: Vec<EvaluatedState>,
}

impl EvaluatedMachine {
    /// Construct from a machine and a fully numeric parameter assignment.
    /// Fails fast with [`Error::NotAdvancing`] / [`Error::NotAligning`] if
    /// the machine violates either structural invariant (spec.md §4.2).
    pub fn new(machine: &Machine, params: &Params) -> Result<Self, Error> {
        machine.check_advancing()?;
        machine.check_aligning()?;

        let mut state = vec![EvaluatedState::default(); machine.num_states()];
        for (src, m_state) in machine.states() {
            state[src].n_transitions = m_state.trans.len();
            for t in &m_state.trans {
                let log_weight = log_of_eval(&t.weight, params)?;
                let key = (t.in_tok, t.out_tok);
                state[src]
                    .outgoing
                    .entry(key)
                    .or_default()
                    .push(EvalTrans {
                        state: t.to,
                        log_weight,
                        trans_index: t.trans_index,
                    });
                state[t.to]
                    .incoming
                    .entry(key)
                    .or_default()
                    .push(EvalTrans {
                        state: src,
                        log_weight,
                        trans_index: t.trans_index,
                    });
            }
        }
        debug!(
            "evaluated machine with {} states, {} total transitions",
            state.len(),
            state.iter().map(|s| s.n_transitions).sum::<usize>()
        );
        Ok(Self { state })
    }

    /// Number of states.
    pub fn num_states(&self) -> usize {
        self.state.len()
    }

    /// Index of the start state.
    pub fn start_state(&self) -> usize {
        0
    }

    /// Index of the unique end state.
    pub fn end_state(&self) -> usize {
        self.state.len() - 1
    }

    /// Access a state's lookup tables by index.
    pub fn state(&self, index: usize) -> &EvaluatedState {
        &self.state[index]
    }
}

/// `log(eval(weight, params))`, with `log(0) = -inf` and a negative
/// evaluated weight rejected as [`Error::NumericDomain`] (always a bug or a
/// pathological input, per spec.md §7).
fn log_of_eval(weight: &crate::weight::WeightExpr, params: &Params) -> Result<f64, Error> {
    let w = weight.eval(params)?;
    if w < 0.0 {
        Err(Error::NumericDomain(format!(
            "transition weight evaluated to negative value {w}"
        )))
    } else if w == 0.0 {
        Ok(f64::NEG_INFINITY)
    } else {
        Ok(w.ln())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{MachineSpec, StateSpec, TransitionSpec};
    use crate::weight::WeightExpr;

    #[test]
    fn collapses_weights_to_log_space() {
        let spec = MachineSpec {
            states: vec![
                StateSpec {
                    id: None,
                    trans: vec![TransitionSpec {
                        to: 1,
                        in_sym: Some("a".to_string()),
                        out_sym: Some("a".to_string()),
                        weight: WeightExpr::Const(0.5),
                    }],
                },
                StateSpec { id: None, trans: vec![] },
            ],
        };
        let machine = Machine::from_spec(spec).unwrap();
        let em = EvaluatedMachine::new(&machine, &Params::new()).unwrap();
        let out = em.state(0).outgoing(1, 1);
        assert_eq!(out.len(), 1);
        assert!((out[0].log_weight - 0.5_f64.ln()).abs() < 1e-12);
        let inc = em.state(1).incoming(1, 1);
        assert_eq!(inc.len(), 1);
        assert_eq!(inc[0].state, 0);
    }

    #[test]
    fn zero_weight_is_neg_infinity_not_nan() {
        let spec = MachineSpec {
            states: vec![
                StateSpec {
                    id: None,
                    trans: vec![TransitionSpec {
                        to: 1,
                        in_sym: None,
                        out_sym: None,
                        weight: WeightExpr::Const(0.0),
                    }],
                },
                StateSpec { id: None, trans: vec![] },
            ],
        };
        let machine = Machine::from_spec(spec).unwrap();
        let em = EvaluatedMachine::new(&machine, &Params::new()).unwrap();
        let out = em.state(0).outgoing(0, 0);
        assert_eq!(out[0].log_weight, f64::NEG_INFINITY);
    }
}
