//! Forward/Backward dynamic programming, posterior transition counting,
//! and constrained EM parameter optimization for weighted finite-state
//! transducers.
//!
//! The crate is organized bottom-up: [`token`] and [`weight`] are the
//! leaf data types: [`machine`] builds a transducer on top of them;
//! [`evaluated`] collapses a machine's symbolic weights to log-space under
//! a parameter assignment; [`envelope`] and [`dpmatrix`] provide the
//! packed cell storage the [`forward`] and [`backward`] fills share;
//! [`counts`] turns a Forward/Backward pair into expected transition usage
//! and per-parameter sufficient statistics; [`constraints`] and
//! [`objective`] implement the constrained M-step on top of that.

pub mod backward;
pub mod constraints;
pub mod counts;
pub(crate) mod dpmatrix;
pub mod envelope;
pub mod error;
pub mod evaluated;
pub mod forward;
pub mod machine;
pub mod numeric;
pub mod objective;
pub mod seqpair;
pub mod softplus;
pub mod token;
pub mod weight;

pub use error::{Error, OptimizeResult, Result};
