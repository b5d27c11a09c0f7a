//! The transducer data model: states, transitions, and the JSON wire shape
//! described in spec.md §6. Dense state indexing and stable per-state
//! transition indices follow the same "no owning pointers between states,
//! transitions carry indices only" design `meyerphi-strix` uses for its
//! parity-game nodes (`src/parity/game.rs`).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::token::{Token, Tokenizer};
use crate::weight::WeightExpr;

/// Wire shape for one transition: `{"to", "in"?, "out"?, "weight"}`.
/// Absent `in`/`out` means epsilon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub to: usize,
    #[serde(rename = "in", default, skip_serializing_if = "Option::is_none")]
    pub in_sym: Option<String>,
    #[serde(rename = "out", default, skip_serializing_if = "Option::is_none")]
    pub out_sym: Option<String>,
    pub weight: WeightExpr,
}

/// Wire shape for one state: an optional opaque `id` and a transition list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub trans: Vec<TransitionSpec>,
}

/// Wire shape for an entire machine: a list of states. State 0 is the
/// start state; the last state is the unique end state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSpec {
    pub states: Vec<StateSpec>,
}

/// A transition resolved against the machine's tokenizers.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Destination state index.
    pub to: usize,
    /// Input token consumed (`Tokenizer::EPSILON` for epsilon).
    pub in_tok: Token,
    /// Output token emitted (`Tokenizer::EPSILON` for epsilon).
    pub out_tok: Token,
    /// The transition's symbolic weight.
    pub weight: WeightExpr,
    /// Stable index of this transition within its source state's list.
    pub trans_index: usize,
}

/// A state: an optional opaque name and its outgoing transitions.
#[derive(Debug, Clone)]
pub struct State {
    /// Opaque caller-supplied name, carried through unchanged.
    pub id: Option<serde_json::Value>,
    /// Outgoing transitions, in declaration order.
    pub trans: Vec<Transition>,
}

/// A transducer: dense state indices 0..N, state 0 the start state, N-1 the
/// unique end state, plus the input/output tokenizers fixed at construction.
#[derive(Debug, Clone)]
pub struct Machine {
    states: Vec<State>,
    input_tokenizer: Tokenizer,
    output_tokenizer: Tokenizer,
}

impl Machine {
    /// Build a machine from its wire representation, inferring the input
    /// and output alphabets from the symbols used on transitions (in
    /// first-occurrence order). Does not check the advancing/aligning
    /// invariants: those are preconditions of
    /// [`crate::evaluated::EvaluatedMachine::new`], which is where spec.md
    /// §4.2 places them.
    pub fn from_spec(spec: MachineSpec) -> Result<Self, Error> {
        if spec.states.is_empty() {
            return Err(Error::SchemaViolation(
                "machine must have at least one state".to_string(),
            ));
        }
        let mut in_syms = Vec::new();
        let mut in_seen = HashSet::new();
        let mut out_syms = Vec::new();
        let mut out_seen = HashSet::new();
        for state in &spec.states {
            for t in &state.trans {
                if t.to >= spec.states.len() {
                    return Err(Error::SchemaViolation(format!(
                        "transition targets out-of-range state {}",
                        t.to
                    )));
                }
                if let Some(sym) = &t.in_sym {
                    if in_seen.insert(sym.clone()) {
                        in_syms.push(sym.clone());
                    }
                }
                if let Some(sym) = &t.out_sym {
                    if out_seen.insert(sym.clone()) {
                        out_syms.push(sym.clone());
                    }
                }
            }
        }
        let input_tokenizer = Tokenizer::new(in_syms, "input");
        let output_tokenizer = Tokenizer::new(out_syms, "output");

        let mut states = Vec::with_capacity(spec.states.len());
        for state in spec.states {
            let mut trans = Vec::with_capacity(state.trans.len());
            for (trans_index, t) in state.trans.into_iter().enumerate() {
                let in_tok = match &t.in_sym {
                    Some(sym) => input_tokenizer.tok(sym)?,
                    None => Tokenizer::EPSILON,
                };
                let out_tok = match &t.out_sym {
                    Some(sym) => output_tokenizer.tok(sym)?,
                    None => Tokenizer::EPSILON,
                };
                trans.push(Transition {
                    to: t.to,
                    in_tok,
                    out_tok,
                    weight: t.weight,
                    trans_index,
                });
            }
            states.push(State { id: state.id, trans });
        }

        Ok(Self {
            states,
            input_tokenizer,
            output_tokenizer,
        })
    }

    /// Number of states.
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Index of the start state: always 0.
    pub fn start_state(&self) -> usize {
        0
    }

    /// Index of the unique end state: always `num_states() - 1`.
    pub fn end_state(&self) -> usize {
        self.states.len() - 1
    }

    /// Access a state by index.
    pub fn state(&self, index: usize) -> &State {
        &self.states[index]
    }

    /// Iterate over all states with their indices.
    pub fn states(&self) -> impl Iterator<Item = (usize, &State)> {
        self.states.iter().enumerate()
    }

    /// The input alphabet's tokenizer.
    pub fn input_tokenizer(&self) -> &Tokenizer {
        &self.input_tokenizer
    }

    /// The output alphabet's tokenizer.
    pub fn output_tokenizer(&self) -> &Tokenizer {
        &self.output_tokenizer
    }

    /// Check the *advancing* invariant: every null (epsilon/epsilon)
    /// transition goes from a lower to a higher state index.
    pub fn check_advancing(&self) -> Result<(), Error> {
        for (index, state) in self.states() {
            for t in &state.trans {
                if t.in_tok == Tokenizer::EPSILON
                    && t.out_tok == Tokenizer::EPSILON
                    && t.to <= index
                {
                    return Err(Error::NotAdvancing {
                        from: index,
                        to: t.to,
                    });
                }
            }
        }
        Ok(())
    }

    /// Check the *aligning* invariant: no state has two outgoing
    /// transitions sharing an (input token, output token) pair.
    pub fn check_aligning(&self) -> Result<(), Error> {
        for (index, state) in self.states() {
            let mut seen = HashSet::new();
            for t in &state.trans {
                if !seen.insert((t.in_tok, t.out_tok)) {
                    return Err(Error::NotAligning {
                        state: index,
                        in_tok: t.in_tok,
                        out_tok: t.out_tok,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_spec() -> MachineSpec {
        MachineSpec {
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
                StateSpec {
                    id: None,
                    trans: vec![],
                },
            ],
        }
    }

    #[test]
    fn builds_tokenizers_from_transitions() {
        let m = Machine::from_spec(identity_spec()).unwrap();
        assert_eq!(m.input_tokenizer().tok("a").unwrap(), 1);
        assert_eq!(m.output_tokenizer().tok("a").unwrap(), 1);
        assert_eq!(m.num_states(), 2);
        assert_eq!(m.start_state(), 0);
        assert_eq!(m.end_state(), 1);
    }

    #[test]
    fn rejects_non_advancing_null_cycle() {
        let spec = MachineSpec {
            states: vec![
                StateSpec {
                    id: None,
                    trans: vec![TransitionSpec {
                        to: 1,
                        in_sym: None,
                        out_sym: None,
                        weight: WeightExpr::one(),
                    }],
                },
                StateSpec {
                    id: None,
                    trans: vec![TransitionSpec {
                        to: 0,
                        in_sym: None,
                        out_sym: None,
                        weight: WeightExpr::one(),
                    }],
                },
            ],
        };
        let m = Machine::from_spec(spec).unwrap();
        assert!(matches!(
            m.check_advancing(),
            Err(Error::NotAdvancing { from: 1, to: 0 })
        ));
    }

    #[test]
    fn rejects_ambiguous_transitions() {
        let spec = MachineSpec {
            states: vec![
                StateSpec {
                    id: None,
                    trans: vec![
                        TransitionSpec {
                            to: 1,
                            in_sym: Some("a".to_string()),
                            out_sym: Some("b".to_string()),
                            weight: WeightExpr::one(),
                        },
                        TransitionSpec {
                            to: 1,
                            in_sym: Some("a".to_string()),
                            out_sym: Some("b".to_string()),
                            weight: WeightExpr::Const(0.5),
                        },
                    ],
                },
                StateSpec { id: None, trans: vec![] },
            ],
        };
        let m = Machine::from_spec(spec).unwrap();
        assert!(matches!(m.check_aligning(), Err(Error::NotAligning { state: 0, .. })));
    }
}
