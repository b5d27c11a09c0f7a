//! Error taxonomy for the WFST dynamic-programming core.

use thiserror::Error;

use crate::weight::Params;

/// Errors raised by the core. Each variant corresponds to one kind in the
/// error taxonomy: schema/structural problems abort the enclosing call;
/// `NumericDomain` indicates a bug or pathological input and is always
/// fatal. `Unalignable` is deliberately not a variant here: an unalignable
/// pair is not a failure at the core level, it is a `-inf` logLike that the
/// caller inspects (see [`crate::forward::ForwardMatrix::log_like`]).
#[derive(Debug, Error)]
pub enum Error {
    /// A JSON document did not fit the relevant schema before reaching the
    /// core, or fails a structural check the core performs as a defense in
    /// depth measure.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// A null (epsilon/epsilon) transition violates the advancing invariant:
    /// it does not go from a lower to a higher state index.
    #[error("machine is not advancing: null transition from state {from} to state {to}")]
    NotAdvancing {
        /// Source state of the offending null transition.
        from: usize,
        /// Destination state of the offending null transition.
        to: usize,
    },

    /// Two outgoing transitions from the same state share an
    /// (input token, output token) pair.
    #[error("machine is not aligning: state {state} has two transitions for (in={in_tok}, out={out_tok})")]
    NotAligning {
        /// The state with the ambiguous outgoing transitions.
        state: usize,
        /// The shared input token.
        in_tok: usize,
        /// The shared output token.
        out_tok: usize,
    },

    /// A sequence contains a symbol absent from the machine's alphabet.
    #[error("unknown symbol {symbol:?} in {axis} alphabet")]
    UnknownSymbol {
        /// The symbol that could not be tokenized.
        symbol: String,
        /// Which alphabet ("input" or "output") was consulted.
        axis: &'static str,
    },

    /// An envelope fails the corner or connectivity invariants, or contains
    /// an empty column (see Open Question (a) in `SPEC_FULL.md`).
    #[error("envelope inconsistent: {0}")]
    EnvelopeInconsistent(String),

    /// `log` of a non-positive weight, `sqrt` of a negative number, or
    /// similar: always a bug or a pathological input, always fatal.
    #[error("numeric domain error: {0}")]
    NumericDomain(String),
}

/// Outcome of [`crate::objective::MachineObjective::optimize`]. Stalling is
/// non-fatal: the best iterate found is returned alongside a diagnostic flag
/// rather than raised as an [`Error`].
#[derive(Debug, Clone)]
pub struct OptimizeResult {
    /// The best parameter assignment found.
    pub params: Params,
    /// Number of BFGS iterations performed.
    pub iterations: usize,
    /// Set when the line search failed to make progress before either the
    /// gradient tolerance or the iteration cap was reached.
    pub stalled: bool,
}

/// Convenience alias for fallible core operations.
pub type Result<T> = std::result::Result<T, Error>;
