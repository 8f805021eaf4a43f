//! End-to-end validation of the multigrid cycle on synthetic 1-D chains.
//!
//! These tests drive the engine through its public API only: zero-defect
//! behavior, code-path equivalence between the serial and the loopback
//! transport, the adaptive-detection shortcut, and plain convergence on the
//! Poisson chain in both the fully refined and the locally refined shape.

use approx::assert_relative_eq;
use gmg::testing::ChainHierarchy;
use gmg::{
    Assembly, Communicator, CsrMatrix, CycleType, GeometricMultigrid, GridLevel, JacobiSmoother,
    LoopbackCommunicator, LuSolver, NullCommunicator, StandardTransfer, TransferKind,
};
use ndarray::Array1;
use std::sync::Arc;

fn build_engine(
    space: ChainHierarchy,
    comm: Box<dyn Communicator>,
) -> (GeometricMultigrid, CsrMatrix) {
    let space = Arc::new(space);
    let matrix = space
        .assemble_jacobian(GridLevel::surface(), None, None)
        .unwrap();
    let mut engine = GeometricMultigrid::new(space.clone(), space, comm);
    engine.set_smoother(JacobiSmoother::factory(2.0 / 3.0));
    engine.set_prolongation(StandardTransfer::factory(TransferKind::Interpolation));
    engine.set_projection(StandardTransfer::factory(TransferKind::Injection));
    engine.set_base_solver(Box::new(LuSolver::new()));
    (engine, matrix)
}

fn l2_norm(v: &Array1<f64>) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// A zero surface defect must come back as a zero correction for any cycle
/// type and smoothing count; the cycle must not amplify nothing into
/// something.
#[test]
fn test_zero_defect_yields_zero_correction() {
    for (cycle, nu) in [
        (CycleType::V, 2),
        (CycleType::W, 3),
        (CycleType::Gamma(3), 0),
    ] {
        let (mut engine, matrix) = build_engine(
            ChainHierarchy::full_refinement(3, 2),
            Box::new(NullCommunicator),
        );
        engine.set_cycle_type(cycle);
        engine.set_num_presmooth(nu);
        engine.set_num_postsmooth(nu);
        let n = matrix.num_rows;
        engine.init(matrix, None).unwrap();

        let defect = Array1::zeros(n);
        let mut correction = Array1::from_elem(n, 7.0);
        engine.apply(&mut correction, &defect).unwrap();
        assert!(correction.iter().all(|&v| v == 0.0));
    }
}

/// On a single partition the gather/broadcast points are no-ops, so a run
/// over a one-rank loopback mesh must match the serial transport exactly.
#[test]
fn test_single_partition_loopback_matches_serial() {
    let chain = ChainHierarchy::full_refinement(2, 3);
    let defect = Array1::from_shape_fn(7, |i| (i as f64 + 1.0) * 0.5 - 2.0);

    let (mut serial, matrix) = build_engine(chain.clone(), Box::new(NullCommunicator));
    serial.init(matrix, None).unwrap();
    let mut c_serial = Array1::zeros(7);
    serial.apply(&mut c_serial, &defect).unwrap();

    let comm = LoopbackCommunicator::mesh(1).pop().unwrap();
    let (mut looped, matrix) = build_engine(chain, Box::new(comm));
    looped.init(matrix, None).unwrap();
    let mut c_looped = Array1::zeros(7);
    looped.apply(&mut c_looped, &defect).unwrap();

    assert_eq!(c_serial, c_looped);
}

/// A ghost-only padding dof on the top level engages the adaptive code path
/// without introducing any hanging nodes; the result must match the
/// fully refined fast path (the surface matrix-copy shortcut).
#[test]
fn test_engaged_adaptive_path_matches_fast_path() {
    let defect = Array1::from_shape_fn(7, |i| ((i as f64) * 0.9).cos());

    let (mut fast, matrix) = build_engine(
        ChainHierarchy::full_refinement(2, 3),
        Box::new(NullCommunicator),
    );
    fast.init(matrix, None).unwrap();
    assert!(!fast.is_adaptive());
    let mut c_fast = Array1::zeros(7);
    fast.apply(&mut c_fast, &defect).unwrap();

    let (mut engaged, matrix) = build_engine(
        ChainHierarchy::full_refinement(2, 3).with_top_ghost_pad(),
        Box::new(NullCommunicator),
    );
    engaged.init(matrix, None).unwrap();
    assert!(engaged.is_adaptive());
    let mut c_engaged = Array1::zeros(7);
    engaged.apply(&mut c_engaged, &defect).unwrap();

    for i in 0..7 {
        assert_relative_eq!(c_fast[i], c_engaged[i], epsilon = 1e-12);
    }
}

/// Repeated V-cycles on the two-level Poisson chain must drive the residual
/// to (near) zero and recover the manufactured solution.
#[test]
fn test_v_cycle_converges_on_poisson_chain() {
    let (mut engine, matrix) = build_engine(
        ChainHierarchy::full_refinement(2, 7),
        Box::new(NullCommunicator),
    );
    let n = matrix.num_rows;
    let x_exact = Array1::from_shape_fn(n, |i| ((i + 1) as f64 * 0.4).sin());
    let b = matrix.matvec(&x_exact);
    engine.init(matrix, None).unwrap();

    let mut x = Array1::zeros(n);
    let mut d = b.clone();
    let r0 = l2_norm(&d);
    for _ in 0..30 {
        let mut c = Array1::zeros(n);
        engine.apply_update_defect(&mut c, &mut d).unwrap();
        x += &c;
    }

    assert!(
        l2_norm(&d) < 1e-10 * r0,
        "V-cycle residual stalled at {:e}",
        l2_norm(&d) / r0
    );
    for i in 0..n {
        assert_relative_eq!(x[i], x_exact[i], epsilon = 1e-8);
    }
}

/// Same as the V-cycle test over three levels.
#[test]
fn test_v_cycle_converges_on_three_levels() {
    let (mut engine, matrix) = build_engine(
        ChainHierarchy::full_refinement(3, 3),
        Box::new(NullCommunicator),
    );
    let n = matrix.num_rows;
    let x_exact = Array1::from_shape_fn(n, |i| ((i + 2) as f64 * 0.3).cos());
    let b = matrix.matvec(&x_exact);
    engine.init(matrix, None).unwrap();

    let mut x = Array1::zeros(n);
    let mut d = b.clone();
    let r0 = l2_norm(&d);
    for _ in 0..20 {
        let mut c = Array1::zeros(n);
        engine.apply_update_defect(&mut c, &mut d).unwrap();
        x += &c;
    }

    assert!(l2_norm(&d) < 1e-10 * r0);
    for i in 0..n {
        assert_relative_eq!(x[i], x_exact[i], epsilon = 1e-8);
    }
}

/// Every cycle repeat starts over from a zero level correction, so a W-cycle
/// runs the V-cycle body twice with the defect updated in between and returns
/// the second sweep's correction.
#[test]
fn test_w_cycle_runs_v_body_on_updated_defect() {
    let defect = Array1::from_shape_fn(9, |i| ((i as f64 + 1.0) * 0.7).sin());

    let (mut w_engine, matrix) = build_engine(
        ChainHierarchy::full_refinement(2, 4),
        Box::new(NullCommunicator),
    );
    w_engine.set_cycle_type(CycleType::W);
    w_engine.init(matrix, None).unwrap();
    let mut c_w = Array1::zeros(9);
    w_engine.apply(&mut c_w, &defect).unwrap();

    let (mut v_engine, matrix) = build_engine(
        ChainHierarchy::full_refinement(2, 4),
        Box::new(NullCommunicator),
    );
    v_engine.init(matrix, None).unwrap();
    let mut c_first = Array1::zeros(9);
    let mut d = defect.clone();
    v_engine.apply_update_defect(&mut c_first, &mut d).unwrap();
    let mut c_second = Array1::zeros(9);
    v_engine.apply(&mut c_second, &d).unwrap();

    for i in 0..9 {
        assert_relative_eq!(c_w[i], c_second[i], epsilon = 1e-12);
    }
}

/// On the locally refined chain the adaptive machinery (coupling repair,
/// shadow zeroing, shadow defect projection) must still produce a convergent
/// iteration that recovers the direct solution of the surface system.
#[test]
fn test_adaptive_chain_converges_to_direct_solve() {
    let (mut engine, matrix) = build_engine(ChainHierarchy::adaptive(4), Box::new(NullCommunicator));
    let n = matrix.num_rows;
    let x_exact = Array1::from_shape_fn(n, |i| 1.0 + (i as f64) * 0.25);
    let b = matrix.matvec(&x_exact);
    engine.init(matrix, None).unwrap();
    assert!(engine.is_adaptive());

    let mut x = Array1::zeros(n);
    let mut d = b.clone();
    let r0 = l2_norm(&d);
    for _ in 0..20 {
        let mut c = Array1::zeros(n);
        engine.apply_update_defect(&mut c, &mut d).unwrap();
        x += &c;
    }

    assert!(
        l2_norm(&d) < 1e-8 * r0,
        "adaptive cycle residual stalled at {:e}",
        l2_norm(&d) / r0
    );
    for i in 0..n {
        assert_relative_eq!(x[i], x_exact[i], epsilon = 1e-7);
    }
}

/// A deep clone must behave exactly like its original on the same input, and
/// repeated applies on both must stay in lockstep.
#[test]
fn test_cloned_engine_matches_original() {
    let (mut engine, matrix) = build_engine(
        ChainHierarchy::full_refinement(2, 4),
        Box::new(NullCommunicator),
    );
    let n = matrix.num_rows;
    engine.init(matrix, None).unwrap();
    let mut clone = engine.clone_with_communicator(Box::new(NullCommunicator));

    let defect = Array1::from_shape_fn(n, |i| (i as f64 * 1.3).sin());
    for _ in 0..2 {
        let mut c_orig = Array1::zeros(n);
        let mut c_clone = Array1::zeros(n);
        engine.apply(&mut c_orig, &defect).unwrap();
        clone.apply(&mut c_clone, &defect).unwrap();
        assert_eq!(c_orig, c_clone);
    }
}
