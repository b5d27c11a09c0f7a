//! Symbolic weight expressions: the narrow "WeightExpression evaluator"
//! oracle that spec.md keeps out of scope beyond the operations the core
//! actually calls (`eval`, `deriv`, `params`, `log`, `mul`, `exp`). Grounded
//! on the `WeightAlgebra::{eval,deriv,params,multiply,negate,expOf,logOf,
//! zero,one,doubleConstant,subtract}` contract used throughout
//! `examples/original_source/src/counts.cpp`.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A symbolic weight expression: a small algebraic DAG over named
/// parameters and constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightExpr {
    /// A numeric literal.
    Const(f64),
    /// A free parameter, resolved through a [`ParamDefs`] or [`Params`] at
    /// evaluation time.
    Param(String),
    /// A tagged operator node (`add`, `sub`, `mul`, `log`, `exp`, `neg`).
    Op(OpNode),
}

/// The operator shape used on the wire: `{"op": "...", "args": [...]}`,
/// with one argument for unary operators and two for binary ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpNode {
    op: Op,
    args: Vec<WeightExpr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Op {
    Add,
    Sub,
    Mul,
    Log,
    Exp,
    Neg,
}

impl WeightExpr {
    /// The additive identity.
    pub fn zero() -> Self {
        Self::Const(0.0)
    }

    /// The multiplicative identity.
    pub fn one() -> Self {
        Self::Const(1.0)
    }

    /// A named free parameter.
    pub fn param(name: impl Into<String>) -> Self {
        Self::Param(name.into())
    }

    /// `self + other`.
    pub fn add(self, other: Self) -> Self {
        Self::Op(OpNode {
            op: Op::Add,
            args: vec![self, other],
        })
    }

    /// `self - other`.
    pub fn sub(self, other: Self) -> Self {
        Self::Op(OpNode {
            op: Op::Sub,
            args: vec![self, other],
        })
    }

    /// `self * other`.
    pub fn mul(self, other: Self) -> Self {
        Self::Op(OpNode {
            op: Op::Mul,
            args: vec![self, other],
        })
    }

    /// `-self`.
    pub fn neg(self) -> Self {
        Self::Op(OpNode {
            op: Op::Neg,
            args: vec![self],
        })
    }

    /// `log(self)`.
    pub fn log(self) -> Self {
        Self::Op(OpNode {
            op: Op::Log,
            args: vec![self],
        })
    }

    /// `exp(self)`.
    pub fn exp(self) -> Self {
        Self::Op(OpNode {
            op: Op::Exp,
            args: vec![self],
        })
    }

    /// Evaluate under a fully numeric assignment.
    pub fn eval(&self, params: &Params) -> Result<f64, Error> {
        self.eval_defs(&params.to_defs())
    }

    /// Evaluate by recursively resolving `Param` leaves through `defs`.
    /// A `Param` with no entry in `defs` is a [`Error::NumericDomain`]:
    /// every free parameter of a weight that reaches evaluation must be
    /// bound by the caller's `Params`/`ParamDefs`.
    pub fn eval_defs(&self, defs: &ParamDefs) -> Result<f64, Error> {
        match self {
            Self::Const(v) => Ok(*v),
            Self::Param(name) => defs
                .get(name)
                .ok_or_else(|| Error::NumericDomain(format!("unbound parameter {name:?}")))?
                .eval_defs(defs),
            Self::Op(node) => {
                let a = node.args[0].eval_defs(defs)?;
                match node.op {
                    Op::Add => Ok(a + node.args[1].eval_defs(defs)?),
                    Op::Sub => Ok(a - node.args[1].eval_defs(defs)?),
                    Op::Mul => Ok(a * node.args[1].eval_defs(defs)?),
                    Op::Neg => Ok(-a),
                    Op::Log => {
                        if a <= 0.0 {
                            Ok(f64::NEG_INFINITY)
                        } else {
                            Ok(a.ln())
                        }
                    }
                    Op::Exp => Ok(a.exp()),
                }
            }
        }
    }

    /// Free parameter names appearing as direct `Param` leaves (no
    /// resolution through `defs`): the set a caller must bind before
    /// `eval_defs` can succeed, absent further substitution.
    pub fn params(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_params(&mut out);
        out
    }

    fn collect_params(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Const(_) => {}
            Self::Param(name) => {
                out.insert(name.clone());
            }
            Self::Op(node) => {
                for arg in &node.args {
                    arg.collect_params(out);
                }
            }
        }
    }

    /// Symbolic partial derivative with respect to `wrt`. A `Param(name)`
    /// leaf is a chain-rule pass-through into `defs.get(name)` when present
    /// (the leaf's value *is* that expression), otherwise it is treated as
    /// independent of every other variable.
    pub fn deriv(&self, defs: &ParamDefs, wrt: &str) -> Self {
        match self {
            Self::Const(_) => Self::zero(),
            Self::Param(name) => {
                if name == wrt {
                    Self::one()
                } else if let Some(sub) = defs.get(name) {
                    sub.deriv(defs, wrt)
                } else {
                    Self::zero()
                }
            }
            Self::Op(node) => {
                let a = &node.args[0];
                match node.op {
                    Op::Add => a.deriv(defs, wrt).add(node.args[1].deriv(defs, wrt)),
                    Op::Sub => a.deriv(defs, wrt).sub(node.args[1].deriv(defs, wrt)),
                    Op::Mul => {
                        let b = &node.args[1];
                        a.deriv(defs, wrt)
                            .mul(b.clone())
                            .add(a.clone().mul(b.deriv(defs, wrt)))
                    }
                    Op::Neg => a.deriv(defs, wrt).neg(),
                    // d/dx log(a) = a' / a
                    Op::Log => a.deriv(defs, wrt).mul(Self::recip_marker(a.clone())),
                    // d/dx exp(a) = exp(a) * a'
                    Op::Exp => self.clone().mul(a.deriv(defs, wrt)),
                }
            }
        }
    }

    // `1/a`, expressed without a dedicated Div variant: `exp(neg(log(a)))`.
    // Kept as a private helper rather than a public operator since the
    // oracle's contract (spec.md SPEC_FULL.md section F) names only
    // add/mul/sub/log/exp/neg.
    fn recip_marker(a: Self) -> Self {
        Self::exp(Self::neg(Self::log(a)))
    }
}

/// A mapping from parameter name to a (possibly symbolic) definition.
/// `Params` values are always `Const`; `ParamDefs` additionally carries the
/// reparameterisation substitutions built by [`crate::objective::MachineObjective`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamDefs(HashMap<String, WeightExpr>);

impl ParamDefs {
    /// An empty definition set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a definition.
    pub fn insert(&mut self, name: impl Into<String>, expr: WeightExpr) {
        self.0.insert(name.into(), expr);
    }

    /// Look up a definition.
    pub fn get(&self, name: &str) -> Option<&WeightExpr> {
        self.0.get(name)
    }

    /// Merge `other` over `self`, with `other`'s entries taking precedence.
    pub fn combine(&self, other: &Self) -> Self {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    /// Iterate over `(name, expr)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &WeightExpr)> {
        self.0.iter()
    }
}

/// A fully numerical parameter assignment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Params(HashMap<String, f64>);

impl Params {
    /// An empty assignment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter's value.
    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    /// Look up a parameter's value.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Look up a parameter's value, failing with [`Error::NumericDomain`]
    /// if unbound.
    pub fn require(&self, name: &str) -> Result<f64, Error> {
        self.get(name)
            .ok_or_else(|| Error::NumericDomain(format!("unbound parameter {name:?}")))
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    /// View this assignment as a [`ParamDefs`] of `Const` leaves.
    pub fn to_defs(&self) -> ParamDefs {
        let mut defs = ParamDefs::new();
        for (name, value) in &self.0 {
            defs.insert(name.clone(), WeightExpr::Const(*value));
        }
        defs
    }
}
