//! Input/output sequence pairs to be aligned.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::machine::Machine;
use crate::token::Token;

/// Wire shape for one sequence: `{"sequence": [sym, ...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceSpec {
    pub sequence: Vec<String>,
}

/// Wire shape for a sequence pair: `{"input": {...}, "output": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeqPairSpec {
    pub input: SequenceSpec,
    pub output: SequenceSpec,
}

/// A tokenized input/output sequence pair.
#[derive(Debug, Clone)]
pub struct SeqPair {
    input: Vec<Token>,
    output: Vec<Token>,
}

impl SeqPair {
    /// Tokenize raw symbol sequences against a machine's alphabets.
    pub fn new(machine: &Machine, input: &[String], output: &[String]) -> Result<Self, Error> {
        Ok(Self {
            input: machine.input_tokenizer().tokenize(input)?,
            output: machine.output_tokenizer().tokenize(output)?,
        })
    }

    /// Tokenize from the wire representation.
    pub fn from_spec(machine: &Machine, spec: &SeqPairSpec) -> Result<Self, Error> {
        Self::new(machine, &spec.input.sequence, &spec.output.sequence)
    }

    /// The input length, `inLen`.
    pub fn in_len(&self) -> usize {
        self.input.len()
    }

    /// The output length, `outLen`.
    pub fn out_len(&self) -> usize {
        self.output.len()
    }

    /// The input token at position `pos` (0-indexed, `pos < in_len()`).
    pub fn input_tok(&self, pos: usize) -> Token {
        self.input[pos]
    }

    /// The output token at position `pos` (0-indexed, `pos < out_len()`).
    pub fn output_tok(&self, pos: usize) -> Token {
        self.output[pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{MachineSpec, StateSpec, TransitionSpec};
    use crate::weight::WeightExpr;

    #[test]
    fn tokenizes_against_machine_alphabets() {
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
        let machine = Machine::from_spec(spec).unwrap();
        let pair = SeqPair::new(&machine, &["a".to_string()], &["a".to_string()]).unwrap();
        assert_eq!(pair.in_len(), 1);
        assert_eq!(pair.out_len(), 1);
        assert_eq!(pair.input_tok(0), 1);
    }
}
