//! Constrained EM's M-step: a smooth unconstrained reparameterization of a
//! machine's `prob`/`rate`/`norm` parameters, and a hand-rolled BFGS
//! optimizer over the resulting objective. Grounded on spec.md §4.7 and the
//! constrained-optimization call in `examples/original_source/src/counts.cpp`
//! (`MachineObjective` there wraps GSL's multimin; no such crate exists
//! anywhere in this pack, so the quasi-Newton loop is hand-rolled here, the
//! way that file hand-rolls the surrounding derivative bookkeeping).
//!
//! The optimizer vector holds only the reparameterized `__x` variables.
//! `optimize` takes its `seed` in the *constrained* space (the same space
//! `Params` live in everywhere else) and inverts it into that vector
//! internally; parameters touched by no constraint are carried through from
//! the seed unchanged rather than optimized, mirroring
//! `counts.cpp:287-289`'s `finalParams = seed` base.

use std::collections::HashMap;

use log::{debug, info};

use crate::constraints::Constraints;
use crate::envelope::Envelope;
use crate::error::{Error, OptimizeResult};
use crate::evaluated::EvaluatedMachine;
use crate::machine::Machine;
use crate::counts::MachineCounts;
use crate::seqpair::SeqPair;
use crate::weight::{ParamDefs, Params, WeightExpr};

/// BFGS tuning constants (spec.md §4.7).
#[derive(Debug, Clone, Copy)]
pub struct BfgsConfig {
    /// Initial line-search step length.
    pub step: f64,
    /// Armijo sufficient-decrease constant for the backtracking line search.
    pub line_search_tol: f64,
    /// Converged once the gradient's Euclidean norm falls below this.
    pub gradient_tol: f64,
    /// Hard cap on the number of BFGS iterations.
    pub max_iter: usize,
}

impl Default for BfgsConfig {
    fn default() -> Self {
        Self {
            step: 0.1,
            line_search_tol: 1e-4,
            gradient_tol: 1e-3,
            max_iter: 100,
        }
    }
}

/// A machine's free parameters, reparameterized onto an unconstrained
/// space, together with the training pairs whose total log-likelihood is
/// to be maximized.
pub struct MachineObjective {
    machine: Machine,
    /// Substitution from constrained parameter name to an expression over
    /// `{name}__x`-suffixed unconstrained leaves. Plain (unconstrained)
    /// parameter names have no entry: their unconstrained variable *is*
    /// their value.
    defs: ParamDefs,
    /// Every unconstrained free variable, in the order a BFGS iterate
    /// vector is indexed by.
    free_vars: Vec<String>,
    /// Every parameter name appearing on some transition's weight.
    param_names: Vec<String>,
    /// `prob`-constrained parameter names, in the order their `__x`
    /// variables were appended to `free_vars` (needed to encode a seed).
    prob_params: Vec<String>,
    /// `rate`-constrained parameter names, same ordering note as above.
    rate_params: Vec<String>,
    /// Simplex-constrained parameter groups, kept for the closed-form
    /// normalization step in [`MachineObjective::em_step`] and to encode a
    /// seed's `__x` values.
    norm_groups: Vec<Vec<String>>,
    pairs: Vec<(SeqPair, Envelope)>,
}

impl MachineObjective {
    /// Build the reparameterized objective for `machine` over `pairs`
    /// (each with its own alignment envelope), honoring `constraints`.
    pub fn new(machine: Machine, constraints: &Constraints, pairs: Vec<(SeqPair, Envelope)>) -> Self {
        let mut param_names: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (_, state) in machine.states() {
            for t in &state.trans {
                for p in t.weight.params() {
                    if seen.insert(p.clone()) {
                        param_names.push(p);
                    }
                }
            }
        }

        let mut defs = ParamDefs::new();
        let mut free_vars = Vec::new();

        for p in &constraints.prob {
            push_prob_def(&mut defs, &mut free_vars, p);
        }
        for r in &constraints.rate {
            push_rate_def(&mut defs, &mut free_vars, r);
        }
        for group in &constraints.norm {
            push_norm_group(&mut defs, &mut free_vars, group);
        }

        Self {
            machine,
            defs,
            free_vars,
            param_names,
            prob_params: constraints.prob.clone(),
            rate_params: constraints.rate.clone(),
            norm_groups: constraints.norm.clone(),
            pairs,
        }
    }

    /// Constant definitions for every parameter *not* touched by a
    /// constraint, read directly from `seed`. These are never part of the
    /// optimizer's vector; they pass through to the result unchanged.
    fn fixed_defs(&self, seed: &Params) -> Result<ParamDefs, Error> {
        let mut defs = ParamDefs::new();
        for p in &self.param_names {
            if self.defs.get(p).is_none() {
                defs.insert(p.clone(), WeightExpr::Const(seed.require(p)?));
            }
        }
        Ok(defs)
    }

    /// Invert the reparameterization (spec.md §4.7 "Seeding"): given a seed
    /// satisfying every constraint, compute the `__x` vector that decodes
    /// back to it.
    fn encode(&self, seed: &Params) -> Result<Vec<f64>, Error> {
        let mut xs = Vec::with_capacity(self.free_vars.len());
        for p in &self.prob_params {
            let prob = seed.require(p)?;
            if !(prob > 0.0 && prob <= 1.0) {
                return Err(Error::NumericDomain(format!(
                    "seed value for prob parameter {p:?} is not in (0, 1]: {prob}"
                )));
            }
            xs.push((-prob.ln()).sqrt());
        }
        for r in &self.rate_params {
            let rate = seed.require(r)?;
            if rate < 0.0 {
                return Err(Error::NumericDomain(format!(
                    "seed value for rate parameter {r:?} is negative: {rate}"
                )));
            }
            xs.push(rate.sqrt());
        }
        for group in &self.norm_groups {
            if group.is_empty() {
                continue;
            }
            let mut prior_sum = 0.0;
            for name in &group[..group.len() - 1] {
                let p = seed.require(name)?;
                let z = 1.0 - p / (1.0 - prior_sum);
                if !(z > 0.0 && z <= 1.0) {
                    return Err(Error::NumericDomain(format!(
                        "seed values for norm group member {name:?} do not fit on the simplex"
                    )));
                }
                xs.push((-z.ln()).sqrt());
                prior_sum += p;
            }
        }
        Ok(xs)
    }

    /// Map a `__x` vector back to a concrete, constrained `Params`.
    fn decode(&self, xk: &[f64], fixed: &ParamDefs) -> Result<Params, Error> {
        let mut x = Params::new();
        for (v, val) in self.free_vars.iter().zip(xk.iter()) {
            x.set(v.clone(), *val);
        }
        let full_defs = fixed.combine(&x.to_defs()).combine(&self.defs);
        self.concrete_params(&full_defs)
    }

    /// One closed-form EM iteration: re-estimate every `norm`-constrained
    /// parameter group directly from expected transition counts
    /// (`p_i = count_i / sum(group counts)`), leaving every other
    /// parameter at its current value. Grounded on spec.md S2, which
    /// specifies an exact multinomial M-step rather than a BFGS step.
    pub fn em_step(&self, current: &Params) -> Result<Params, Error> {
        let em = EvaluatedMachine::new(&self.machine, current)?;
        let mut counts = MachineCounts::init(&em);
        for (seq, env) in &self.pairs {
            counts.add_with_envelope(&em, seq, env.clone());
        }
        let raw = counts.literal_param_counts(&self.machine);
        let mut next = current.clone();
        for group in &self.norm_groups {
            let total: f64 = group.iter().map(|n| raw.get(n).copied().unwrap_or(0.0)).sum();
            if total > 0.0 {
                for n in group {
                    next.set(n.clone(), raw.get(n).copied().unwrap_or(0.0) / total);
                }
            }
        }
        Ok(next)
    }

    /// A reasonable starting point, in the same constrained space as any
    /// other `Params`: 0.5 for every `prob` parameter, 1.0 for every `rate`
    /// parameter, an even split for every `norm` group, and 1.0 for every
    /// parameter no constraint touches.
    pub fn seed(&self) -> Params {
        let mut seed = Params::new();
        for p in &self.prob_params {
            seed.set(p.clone(), 0.5);
        }
        for r in &self.rate_params {
            seed.set(r.clone(), 1.0);
        }
        for group in &self.norm_groups {
            if group.is_empty() {
                continue;
            }
            let share = 1.0 / group.len() as f64;
            for name in group {
                seed.set(name.clone(), share);
            }
        }
        let constrained: std::collections::HashSet<&String> = self
            .prob_params
            .iter()
            .chain(self.rate_params.iter())
            .chain(self.norm_groups.iter().flatten())
            .collect();
        for p in &self.param_names {
            if !constrained.contains(p) {
                seed.set(p.clone(), 1.0);
            }
        }
        seed
    }

    /// Evaluate total log-likelihood and its gradient with respect to the
    /// unconstrained free variables, at iterate `x` (plus `fixed`, the
    /// constants for every parameter no constraint touches).
    fn evaluate(&self, x: &Params, fixed: &ParamDefs) -> Result<(f64, Vec<f64>), Error> {
        let full_defs = fixed.combine(&x.to_defs()).combine(&self.defs);
        let concrete = self.concrete_params(&full_defs)?;
        let em = EvaluatedMachine::new(&self.machine, &concrete)?;
        let mut counts = MachineCounts::init(&em);
        let mut ll = 0.0;
        for (seq, env) in &self.pairs {
            ll += counts.add_with_envelope(&em, seq, env.clone());
        }
        let param_counts = counts.param_counts(&self.machine, &full_defs)?;
        let grad = self.gradient(&full_defs, &param_counts);
        Ok((ll, grad))
    }

    fn concrete_params(&self, full_defs: &ParamDefs) -> Result<Params, Error> {
        let mut params = Params::new();
        for name in &self.param_names {
            let v = WeightExpr::param(name.clone()).eval_defs(full_defs)?;
            params.set(name.clone(), v);
        }
        Ok(params)
    }

    fn gradient(&self, full_defs: &ParamDefs, param_counts: &HashMap<String, f64>) -> Vec<f64> {
        self.free_vars
            .iter()
            .map(|v| {
                param_counts
                    .iter()
                    .filter(|(_, &c)| c != 0.0)
                    .map(|(p, c)| {
                        let dp_dv = match self.defs.get(p) {
                            Some(expr) => expr.deriv(full_defs, v).eval_defs(full_defs).unwrap_or(0.0),
                            None if p == v => 1.0,
                            None => 0.0,
                        };
                        c * dp_dv
                    })
                    .sum()
            })
            .collect()
    }

    /// Maximize total log-likelihood from `seed` (a constraint-satisfying
    /// `Params`) via BFGS, returning the best concrete parameter assignment
    /// found. Parameters touched by no constraint are preserved from `seed`
    /// unchanged (spec.md §4.7).
    pub fn optimize(&self, seed: Params, config: &BfgsConfig) -> Result<OptimizeResult, Error> {
        let fixed = self.fixed_defs(&seed)?;
        let n = self.free_vars.len();
        let mut xk = self.encode(&seed)?;
        let mut hk = identity(n);
        let (mut fk, mut gk) = self.neg_eval(&xk, &fixed)?;
        let mut stalled = false;
        let mut iterations = 0;
        for iter in 0..config.max_iter {
            iterations = iter;
            let gnorm = norm(&gk);
            if gnorm < config.gradient_tol {
                info!("BFGS converged after {iter} iterations (|grad|={gnorm})");
                break;
            }
            let pk = neg_matvec(&hk, &gk);
            let slope = dot(&gk, &pk);
            if slope >= 0.0 {
                debug!("BFGS direction is not a descent direction, stopping");
                stalled = true;
                break;
            }
            let mut alpha = config.step;
            let mut accepted = None;
            for _ in 0..30 {
                let xt = axpy(alpha, &pk, &xk);
                if let Ok((ft, gt)) = self.neg_eval(&xt, &fixed) {
                    if ft <= fk + config.line_search_tol * alpha * slope {
                        accepted = Some((xt, ft, gt));
                        break;
                    }
                }
                alpha *= 0.5;
            }
            let Some((xk1, fk1, gk1)) = accepted else {
                debug!("BFGS line search failed to find a descent step");
                stalled = true;
                break;
            };
            let sk: Vec<f64> = sub(&xk1, &xk);
            let yk: Vec<f64> = sub(&gk1, &gk);
            let sy = dot(&sk, &yk);
            if sy > 1e-12 {
                hk = bfgs_update(&hk, &sk, &yk, sy);
            }
            xk = xk1;
            fk = fk1;
            gk = gk1;
        }
        let params = self.decode(&xk, &fixed)?;
        let _ = fk;
        Ok(OptimizeResult { params, iterations, stalled })
    }

    fn neg_eval(&self, xk: &[f64], fixed: &ParamDefs) -> Result<(f64, Vec<f64>), Error> {
        let mut x = Params::new();
        for (v, val) in self.free_vars.iter().zip(xk.iter()) {
            x.set(v.clone(), *val);
        }
        let (ll, grad) = self.evaluate(&x, fixed)?;
        Ok((-ll, grad.into_iter().map(|g| -g).collect()))
    }

    /// A short diagnostic summary: total log-likelihood and concrete
    /// parameter values at constraint-satisfying `seed`, for progress
    /// logging.
    pub fn to_string(&self, seed: &Params) -> Result<String, Error> {
        let fixed = self.fixed_defs(seed)?;
        let xk = self.encode(seed)?;
        let mut x = Params::new();
        for (v, val) in self.free_vars.iter().zip(xk.iter()) {
            x.set(v.clone(), *val);
        }
        let (ll, _) = self.evaluate(&x, &fixed)?;
        let full_defs = fixed.combine(&x.to_defs()).combine(&self.defs);
        let concrete = self.concrete_params(&full_defs)?;
        let mut parts: Vec<String> = concrete
            .iter()
            .map(|(k, v)| format!("{k}={v:.6}"))
            .collect();
        parts.sort();
        Ok(format!("logLike={ll:.6} [{}]", parts.join(", ")))
    }
}

fn push_prob_def(defs: &mut ParamDefs, free_vars: &mut Vec<String>, name: &str) {
    let x = WeightExpr::param(format!("{name}__x"));
    let expr = x.clone().mul(x).neg().exp();
    defs.insert(name.to_string(), expr);
    free_vars.push(format!("{name}__x"));
}

fn push_rate_def(defs: &mut ParamDefs, free_vars: &mut Vec<String>, name: &str) {
    let x = WeightExpr::param(format!("{name}__x"));
    defs.insert(name.to_string(), x.clone().mul(x));
    free_vars.push(format!("{name}__x"));
}

/// Stick-breaking, following spec.md §4.7 exactly: with
/// `z_i = exp(-x_i^2) in (0, 1]`,
/// `p_i = (1 - z_i) * prod_{k<i} z_k` for `i < K`, `p_K = prod_{k<K} z_k`.
fn push_norm_group(defs: &mut ParamDefs, free_vars: &mut Vec<String>, names: &[String]) {
    if names.is_empty() {
        return;
    }
    let mut prior_product = WeightExpr::one();
    for name in &names[..names.len() - 1] {
        let x = WeightExpr::param(format!("{name}__x"));
        let z = x.clone().mul(x).neg().exp();
        let share = prior_product.clone().mul(WeightExpr::one().sub(z.clone()));
        defs.insert(name.clone(), share);
        prior_product = prior_product.mul(z);
        free_vars.push(format!("{name}__x"));
    }
    defs.insert(names[names.len() - 1].clone(), prior_product);
}

fn identity(n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn sub(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x - y).collect()
}

fn axpy(alpha: f64, p: &[f64], x: &[f64]) -> Vec<f64> {
    x.iter().zip(p).map(|(xi, pi)| xi + alpha * pi).collect()
}

fn neg_matvec(h: &[Vec<f64>], g: &[f64]) -> Vec<f64> {
    h.iter().map(|row| -dot(row, g)).collect()
}

/// BFGS inverse-Hessian update: `H' = (I - rho s y^T) H (I - rho y s^T) + rho s s^T`.
fn bfgs_update(h: &[Vec<f64>], s: &[f64], y: &[f64], sy: f64) -> Vec<Vec<f64>> {
    let n = s.len();
    let rho = 1.0 / sy;
    let hy = matvec(h, y);
    let yhy = dot(y, &hy);
    let mut out = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            out[i][j] = h[i][j] - rho * (s[i] * hy[j] + hy[i] * s[j]) + rho * rho * yhy * s[i] * s[j]
                + rho * s[i] * s[j];
        }
    }
    out
}

fn matvec(h: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    h.iter().map(|row| dot(row, v)).collect()
}
