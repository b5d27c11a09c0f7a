//! Parameter constraints: which parameters must stay a probability in
//! `[0, 1]`, which must stay non-negative, and which groups of parameters
//! must sum to 1. Grounded on `examples/original_source/src/counts.h`'s
//! `Constraints` aggregate.

use serde::{Deserialize, Serialize};

/// Constraint groups over a machine's free parameters (spec.md §4.7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    /// Groups of parameter names that must each sum to 1 (a simplex).
    #[serde(default)]
    pub norm: Vec<Vec<String>>,
    /// Parameter names that must stay in `[0, 1]`.
    #[serde(default)]
    pub prob: Vec<String>,
    /// Parameter names that must stay non-negative.
    #[serde(default)]
    pub rate: Vec<String>,
}

impl Constraints {
    /// An empty constraint set: every parameter unconstrained.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `other` into `self`: concatenates `norm` groups and `prob`/`rate`
    /// lists. Mirrors `ParamDefs::combine`'s "caller assembles, core merges"
    /// shape; duplicate entries across the two sides are not deduplicated,
    /// matching the original `machine.cons.combine(cons)` behavior of
    /// leaving duplicate detection to the constrained optimizer.
    pub fn combine(&self, other: &Self) -> Self {
        let mut norm = self.norm.clone();
        norm.extend(other.norm.iter().cloned());
        let mut prob = self.prob.clone();
        prob.extend(other.prob.iter().cloned());
        let mut rate = self.rate.clone();
        rate.extend(other.rate.iter().cloned());
        Self { norm, prob, rate }
    }

    /// Whether no constraint is recorded at all.
    pub fn is_empty(&self) -> bool {
        self.norm.is_empty() && self.prob.is_empty() && self.rate.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_concatenates_each_field() {
        let mut a = Constraints::new();
        a.prob.push("p".to_string());
        a.norm.push(vec!["x".to_string(), "y".to_string()]);
        let mut b = Constraints::new();
        b.rate.push("r".to_string());
        let merged = a.combine(&b);
        assert_eq!(merged.prob, vec!["p".to_string()]);
        assert_eq!(merged.rate, vec!["r".to_string()]);
        assert_eq!(merged.norm.len(), 1);
    }

    #[test]
    fn empty_constraints_is_empty() {
        assert!(Constraints::new().is_empty());
    }
}
