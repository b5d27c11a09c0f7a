//! Expected transition-usage counts accumulated from one or more sequence
//! pairs (the E-step), and the per-parameter sufficient statistics derived
//! from them for the M-step. Grounded on
//! `examples/original_source/src/counts.h`/`counts.cpp`'s `MachineCounts`.

use std::ops::AddAssign;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::backward::{BackwardMatrix, TransitionCounter};
use crate::envelope::Envelope;
use crate::error::Error;
use crate::evaluated::EvaluatedMachine;
use crate::forward::ForwardMatrix;
use crate::machine::Machine;
use crate::seqpair::SeqPair;
use crate::weight::ParamDefs;

/// Expected transition usage, one entry per transition of a machine, plus
/// the total log-likelihood of whatever sequence pairs contributed to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineCounts {
    /// `count[state][trans_index]`: expected number of times that
    /// transition fired, summed over every pair folded in.
    count: Vec<Vec<f64>>,
    /// Sum of `logLike` over every pair folded in.
    #[serde(rename = "logLike")]
    loglike: f64,
}

impl MachineCounts {
    /// A zeroed accumulator shaped after `machine`.
    pub fn init(machine: &EvaluatedMachine) -> Self {
        let count = (0..machine.num_states())
            .map(|s| vec![0.0; machine.state(s).n_transitions])
            .collect();
        Self { count, loglike: 0.0 }
    }

    /// Run Forward/Backward over `seq` and fold its posterior transition
    /// counts and log-likelihood into `self`. Returns the pair's
    /// log-likelihood.
    pub fn add(&mut self, machine: &EvaluatedMachine, seq: &SeqPair) -> f64 {
        let env = Envelope::full_rectangle(seq.in_len(), seq.out_len());
        self.add_with_envelope(machine, seq, env)
    }

    /// As [`MachineCounts::add`], but over an explicit envelope (spec.md
    /// §4.3, sub-quadratic alignment).
    pub fn add_with_envelope(&mut self, machine: &EvaluatedMachine, seq: &SeqPair, env: Envelope) -> f64 {
        let fwd = ForwardMatrix::with_envelope(machine, seq, env.clone());
        let bwd = BackwardMatrix::with_envelope(machine, seq, env);
        let ll = fwd.log_like();
        debug!("folding pair (inLen={}, outLen={}) with logLike={ll}", seq.in_len(), seq.out_len());
        let mut visitor = TransitionCounter::new(self);
        bwd.get_counts(&fwd, &mut visitor);
        self.loglike += ll;
        ll
    }

    pub(crate) fn add_posterior(&mut self, state: usize, trans_index: usize, posterior: f64) {
        self.count[state][trans_index] += posterior;
    }

    /// Expected usage count of one transition.
    pub fn count(&self, state: usize, trans_index: usize) -> f64 {
        self.count[state][trans_index]
    }

    /// Total log-likelihood folded into this accumulator so far.
    pub fn loglike(&self) -> f64 {
        self.loglike
    }

    /// For each free parameter appearing directly on some transition's
    /// weight expression, the expected sufficient statistic
    /// `sum_t count[t] * d(log w_t)/dp` (spec.md §4.6). `defs` resolves any
    /// parameter substitutions (reparameterizations); pass
    /// [`crate::weight::Params::to_defs`] for a plain numeric assignment.
    pub fn param_counts(
        &self,
        machine: &Machine,
        defs: &ParamDefs,
    ) -> Result<std::collections::HashMap<String, f64>, Error> {
        let mut out = std::collections::HashMap::new();
        for (s, state) in machine.states() {
            for t in &state.trans {
                let c = self.count[s][t.trans_index];
                if c == 0.0 {
                    continue;
                }
                let log_w = t.weight.clone().log();
                for p in t.weight.params() {
                    let d = log_w.deriv(defs, &p).eval_defs(defs)?;
                    *out.entry(p).or_insert(0.0) += c * d;
                }
            }
        }
        Ok(out)
    }

    /// Raw expected usage summed per parameter, for transitions whose
    /// weight is *literally* that one free parameter (the common "weights
    /// rewritten as parameters" case, spec.md S2). Unlike
    /// [`MachineCounts::param_counts`] this applies no chain rule, so it is
    /// the closed-form sufficient statistic a `norm` group's M-step
    /// normalizes directly, not a BFGS gradient term.
    pub fn literal_param_counts(&self, machine: &Machine) -> std::collections::HashMap<String, f64> {
        let mut out = std::collections::HashMap::new();
        for (s, state) in machine.states() {
            for t in &state.trans {
                if let crate::weight::WeightExpr::Param(name) = &t.weight {
                    *out.entry(name.clone()).or_insert(0.0) += self.count[s][t.trans_index];
                }
            }
        }
        out
    }

    /// Serialize the ragged per-transition counts as JSON, per the wire
    /// shape in `SPEC_FULL.md` section E.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "count": self.count, "logLike": self.loglike })
    }

    /// Serialize the per-parameter view produced by
    /// [`MachineCounts::param_counts`] as a flat JSON object.
    pub fn param_counts_json(
        &self,
        machine: &Machine,
        defs: &ParamDefs,
    ) -> Result<serde_json::Value, Error> {
        Ok(serde_json::to_value(self.param_counts(machine, defs)?)
            .expect("a HashMap<String, f64> always serializes"))
    }
}

impl AddAssign<&MachineCounts> for MachineCounts {
    /// Fold another accumulator's counts into this one. Both must have
    /// been built from the same machine (same per-state transition
    /// counts); mirrors the original's unchecked `operator+=`, which
    /// assumed the same precondition.
    fn add_assign(&mut self, other: &MachineCounts) {
        debug_assert_eq!(self.count.len(), other.count.len());
        for (a, b) in self.count.iter_mut().zip(other.count.iter()) {
            debug_assert_eq!(a.len(), b.len());
            for (x, y) in a.iter_mut().zip(b.iter()) {
                *x += y;
            }
        }
        self.loglike += other.loglike;
    }
}
