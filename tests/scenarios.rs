//! End-to-end scenarios exercising the public API together: building a
//! machine from its wire shape, evaluating it, running Forward/Backward,
//! folding posterior counts, and optimizing constrained parameters.

use wfst_core::constraints::Constraints;
use wfst_core::envelope::Envelope;
use wfst_core::error::Error;
use wfst_core::evaluated::EvaluatedMachine;
use wfst_core::forward::ForwardMatrix;
use wfst_core::backward::BackwardMatrix;
use wfst_core::machine::{Machine, MachineSpec, StateSpec, TransitionSpec};
use wfst_core::objective::{BfgsConfig, MachineObjective};
use wfst_core::seqpair::SeqPair;
use wfst_core::weight::{Params, WeightExpr};

fn sym(s: &str) -> Option<String> {
    Some(s.to_string())
}

/// S1: identity transducer. logLike is exactly 0 (the unique alignment has
/// weight 1), and its single transition gets expected count 1.
#[test]
fn s1_identity_transducer() {
    let spec = MachineSpec {
        states: vec![
            StateSpec {
                id: None,
                trans: vec![TransitionSpec {
                    to: 1,
                    in_sym: sym("a"),
                    out_sym: sym("a"),
                    weight: WeightExpr::one(),
                }],
            },
            StateSpec { id: None, trans: vec![] },
        ],
    };
    let machine = Machine::from_spec(spec).unwrap();
    let em = EvaluatedMachine::new(&machine, &Params::new()).unwrap();
    let seq = SeqPair::new(&machine, &["a".to_string()], &["a".to_string()]).unwrap();
    let fwd = ForwardMatrix::new(&em, &seq);
    assert!((fwd.log_like() - 0.0).abs() < 1e-12);

    let bwd = BackwardMatrix::new(&em, &seq);
    let mut counts = wfst_core::counts::MachineCounts::init(&em);
    bwd.get_counts(&fwd, &mut wfst_core::backward::TransitionCounter::new(&mut counts));
    assert!((counts.count(0, 0) - 1.0).abs() < 1e-9);
}

fn coin_flip_machine() -> Machine {
    let spec = MachineSpec {
        states: vec![
            StateSpec {
                id: None,
                trans: vec![
                    TransitionSpec {
                        to: 0,
                        in_sym: None,
                        out_sym: sym("H"),
                        weight: WeightExpr::param("p_H"),
                    },
                    TransitionSpec {
                        to: 0,
                        in_sym: None,
                        out_sym: sym("T"),
                        weight: WeightExpr::param("p_T"),
                    },
                    TransitionSpec {
                        to: 1,
                        in_sym: None,
                        out_sym: None,
                        weight: WeightExpr::one(),
                    },
                ],
            },
            StateSpec { id: None, trans: vec![] },
        ],
    };
    Machine::from_spec(spec).unwrap()
}

/// S2: coin flip. At the seeded 50/50 split, three flips have logLike
/// log(0.125); a closed-form EM iteration over six flips (2 heads, 4
/// tails) moves `p_H` to 1/3.
#[test]
fn s2_coin_flip_seed_loglike_and_em_step() {
    let machine = coin_flip_machine();
    let mut seeded = Params::new();
    seeded.set("p_H", 0.5);
    seeded.set("p_T", 0.5);
    let em = EvaluatedMachine::new(&machine, &seeded).unwrap();
    let seq = SeqPair::new(&machine, &[], &["H".to_string(), "H".to_string(), "T".to_string()]).unwrap();
    let fwd = ForwardMatrix::new(&em, &seq);
    assert!((fwd.log_like() - 0.125_f64.ln()).abs() < 1e-9);

    let mut constraints = Constraints::new();
    constraints.norm.push(vec!["p_H".to_string(), "p_T".to_string()]);
    let training = vec!["H", "H", "T", "T", "T", "T"].into_iter().map(String::from).collect::<Vec<_>>();
    let train_seq = SeqPair::new(&machine, &[], &training).unwrap();
    let env = Envelope::full_rectangle(train_seq.in_len(), train_seq.out_len());
    let objective = MachineObjective::new(machine, &constraints, vec![(train_seq, env)]);
    let next = objective.em_step(&seeded).unwrap();
    assert!((next.get("p_H").unwrap() - 1.0 / 3.0).abs() < 1e-9);
}

fn pair_hmm_machine() -> Machine {
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
                trans: vec![
                    TransitionSpec { to: 1, in_sym: sym("a"), out_sym: sym("a"), weight: WeightExpr::param("m") },
                    TransitionSpec { to: 1, in_sym: sym("b"), out_sym: sym("b"), weight: WeightExpr::param("m") },
                    TransitionSpec { to: 1, in_sym: sym("a"), out_sym: None, weight: WeightExpr::param("i") },
                    TransitionSpec { to: 1, in_sym: sym("b"), out_sym: None, weight: WeightExpr::param("i") },
                    TransitionSpec { to: 1, in_sym: None, out_sym: sym("a"), weight: WeightExpr::param("d") },
                    TransitionSpec { to: 1, in_sym: None, out_sym: sym("b"), weight: WeightExpr::param("d") },
                    TransitionSpec { to: 2, in_sym: None, out_sym: None, weight: WeightExpr::one() },
                ],
            },
            StateSpec { id: None, trans: vec![] },
        ],
    };
    Machine::from_spec(spec).unwrap()
}

/// S3: pair HMM. Forward and Backward agree on the total log-likelihood,
/// and narrowing the envelope to the diagonal (the only alignment that
/// matters here) leaves that log-likelihood unchanged.
#[test]
fn s3_pair_hmm_envelope_equivalence() {
    let machine = pair_hmm_machine();
    let mut params = Params::new();
    params.set("m", 0.8);
    params.set("i", 0.1);
    params.set("d", 0.1);
    let em = EvaluatedMachine::new(&machine, &params).unwrap();
    let seq = SeqPair::new(
        &machine,
        &["a".to_string(), "b".to_string()],
        &["a".to_string(), "b".to_string()],
    )
    .unwrap();

    let fwd_full = ForwardMatrix::new(&em, &seq);
    let bwd_full = BackwardMatrix::new(&em, &seq);
    assert!((fwd_full.log_like() - bwd_full.log_like()).abs() < 1e-9);

    // P6: an explicit full-rectangle envelope is exactly the default one.
    let explicit_full = Envelope::full_rectangle(seq.in_len(), seq.out_len());
    let fwd_explicit = ForwardMatrix::with_envelope(&em, &seq, explicit_full);
    assert!((fwd_explicit.log_like() - fwd_full.log_like()).abs() < 1e-12);

    // A +-1 diagonal band excludes the far corners (2,0) and (0,2), which
    // carry the all-insert and all-delete alignments (weight i^2 and d^2
    // respectively). With insert and delete transitions both present that
    // mass is real, so the band only approximates the full logLike.
    let band = Envelope::diagonal_band(seq.in_len(), seq.out_len(), 1);
    let fwd_band = ForwardMatrix::with_envelope(&em, &seq, band);
    let truncation = (fwd_band.log_like() - fwd_full.log_like()).abs();
    assert!(truncation < 1e-3, "band truncation error too large: {truncation}");
}

/// S4: a null (epsilon/epsilon) transition that does not advance the state
/// index is rejected.
#[test]
fn s4_null_cycle_is_rejected() {
    let spec = MachineSpec {
        states: vec![
            StateSpec {
                id: None,
                trans: vec![TransitionSpec { to: 1, in_sym: None, out_sym: None, weight: WeightExpr::one() }],
            },
            StateSpec {
                id: None,
                trans: vec![TransitionSpec { to: 0, in_sym: None, out_sym: None, weight: WeightExpr::one() }],
            },
        ],
    };
    let machine = Machine::from_spec(spec).unwrap();
    let err = EvaluatedMachine::new(&machine, &Params::new()).unwrap_err();
    assert!(matches!(err, Error::NotAdvancing { from: 1, to: 0 }));
}

/// S5: two outgoing transitions from the same state sharing a token pair
/// are rejected.
#[test]
fn s5_ambiguous_transitions_are_rejected() {
    let spec = MachineSpec {
        states: vec![
            StateSpec {
                id: None,
                trans: vec![
                    TransitionSpec { to: 1, in_sym: sym("a"), out_sym: sym("b"), weight: WeightExpr::one() },
                    TransitionSpec { to: 1, in_sym: sym("a"), out_sym: sym("b"), weight: WeightExpr::Const(0.5) },
                ],
            },
            StateSpec { id: None, trans: vec![] },
        ],
    };
    let machine = Machine::from_spec(spec).unwrap();
    let err = EvaluatedMachine::new(&machine, &Params::new()).unwrap_err();
    assert!(matches!(err, Error::NotAligning { state: 0, .. }));
}

/// S6: optimizing a single-norm-group instance with plenty of data from
/// two different seeds converges to the same parameters.
#[test]
fn s6_optimizer_is_seed_invariant_on_a_convex_instance() {
    let make_objective = || {
        let machine = coin_flip_machine();
        let mut constraints = Constraints::new();
        constraints.norm.push(vec!["p_H".to_string(), "p_T".to_string()]);
        let training: Vec<String> = std::iter::repeat("H".to_string())
            .take(7)
            .chain(std::iter::repeat("T".to_string()).take(3))
            .collect();
        let seq = SeqPair::new(&machine, &[], &training).unwrap();
        let env = Envelope::full_rectangle(seq.in_len(), seq.out_len());
        MachineObjective::new(machine, &constraints, vec![(seq, env)])
    };

    let config = BfgsConfig::default();

    let objective_a = make_objective();
    let mut seed_a = Params::new();
    seed_a.set("p_H", 0.3);
    seed_a.set("p_T", 0.7);
    let result_a = objective_a.optimize(seed_a, &config).unwrap();

    let objective_b = make_objective();
    let mut seed_b = Params::new();
    seed_b.set("p_H", 0.85);
    seed_b.set("p_T", 0.15);
    let result_b = objective_b.optimize(seed_b, &config).unwrap();

    let p_a = result_a.params.get("p_H").unwrap();
    let p_b = result_b.params.get("p_H").unwrap();
    assert!((p_a - p_b).abs() < 1e-3, "p_H diverged: {p_a} vs {p_b}");
    assert!((p_a - 0.7).abs() < 1e-2, "expected p_H near 0.7, got {p_a}");
}
