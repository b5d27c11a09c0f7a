//! Bijection between a caller-visible alphabet of symbols and compact
//! integer tokens, reserving token 0 for the empty symbol (epsilon).
//!
//! Grounded on `examples/original_source/src/eval.h`'s `Tokenizer<Symbol,Token>`
//! template; input and output alphabets get independent instances.

use std::collections::HashMap;

use crate::error::Error;

/// A token: a small non-negative integer. Token 0 always means epsilon.
pub type Token = usize;

/// Bijection between symbols and tokens for one alphabet (input or output).
#[derive(Debug, Clone)]
pub struct Tokenizer {
    tok2sym: Vec<String>,
    sym2tok: HashMap<String, Token>,
    axis: &'static str,
}

impl Tokenizer {
    /// The token reserved for the empty symbol.
    pub const EPSILON: Token = 0;

    /// Build a tokenizer from an ordered list of symbols, assigning tokens
    /// `1..=symbols.len()` in order and reserving 0 for epsilon.
    pub fn new(symbols: impl IntoIterator<Item = String>, axis: &'static str) -> Self {
        let mut tok2sym = vec![String::new()];
        tok2sym.extend(symbols);
        let sym2tok = tok2sym
            .iter()
            .enumerate()
            .map(|(tok, sym)| (sym.clone(), tok))
            .collect();
        Self {
            tok2sym,
            sym2tok,
            axis,
        }
    }

    /// Number of non-epsilon symbols in the alphabet.
    pub fn len(&self) -> usize {
        self.tok2sym.len() - 1
    }

    /// Whether the alphabet (excluding epsilon) is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Map a token to its symbol. Token 0 maps to the empty string.
    pub fn sym(&self, tok: Token) -> &str {
        &self.tok2sym[tok]
    }

    /// Map a symbol to its token, or [`Error::UnknownSymbol`] if absent.
    /// `tok("")` is not a valid lookup path for epsilon: callers that need
    /// epsilon use [`Tokenizer::EPSILON`] directly.
    pub fn tok(&self, sym: &str) -> Result<Token, Error> {
        self.sym2tok
            .get(sym)
            .copied()
            .ok_or_else(|| Error::UnknownSymbol {
                symbol: sym.to_string(),
                axis: self.axis,
            })
    }

    /// Tokenize a sequence of symbols, failing on the first unknown symbol.
    pub fn tokenize(&self, seq: &[String]) -> Result<Vec<Token>, Error> {
        seq.iter().map(|s| self.tok(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> Tokenizer {
        Tokenizer::new(vec!["a".to_string(), "b".to_string()], "input")
    }

    #[test]
    fn epsilon_is_token_zero() {
        let t = t();
        assert_eq!(t.sym(Tokenizer::EPSILON), "");
    }

    #[test]
    fn round_trips_symbols() {
        let t = t();
        assert_eq!(t.tok("a").unwrap(), 1);
        assert_eq!(t.tok("b").unwrap(), 2);
        assert_eq!(t.sym(1), "a");
        assert_eq!(t.sym(2), "b");
    }

    #[test]
    fn unknown_symbol_errors() {
        let t = t();
        assert!(matches!(t.tok("c"), Err(Error::UnknownSymbol { .. })));
    }

    #[test]
    fn tokenize_sequence() {
        let t = t();
        let seq = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(t.tokenize(&seq).unwrap(), vec![1, 2, 1]);
    }
}
