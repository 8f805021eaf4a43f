//! Cross-partition cycle validation over the in-process loopback transport.
//!
//! The main scenario splits a five-unknown Poisson chain over two ranks:
//! rank 0 owns the four left unknowns and keeps a ghost copy of the fifth as
//! its vertical master, rank 1 owns the fifth unknown as the matching
//! vertical slave. With smoothing disabled and identity transfers, the
//! gathered base solve must reproduce the global direct solution on both
//! ranks.

use approx::assert_relative_eq;
use gmg::traits::{PatchEntity, SurfaceEntity};
use gmg::{
    ApproximationSpace, Assembly, Communicator, CsrMatrix, ElementMarker, GeometricMultigrid,
    GmgError, GridLevel, GridLevelKind, IdentitySmoother, IdentityTransfer, IndexInterface,
    IndexLayout, LoopbackCommunicator, LuSolver, NullCommunicator, ParallelLayout, Result,
    Smoother, TransferKind,
};
use ndarray::Array1;
use std::sync::Arc;
use std::thread;

/// One rank's share of a two-level hierarchy whose levels are copies of each
/// other. The local matrix carries the rank's own element contributions; the
/// gathered matrix is the whole-grid operator used by a gathered base solve.
struct PartitionSpace {
    num_dofs: usize,
    layout: Arc<ParallelLayout>,
    local_matrix: CsrMatrix,
    gathered_matrix: CsrMatrix,
}

impl ApproximationSpace for PartitionSpace {
    fn num_levels(&self) -> usize {
        2
    }

    fn num_indices(&self, _gl: GridLevel) -> usize {
        self.num_dofs
    }

    fn parallel_layout(&self, _gl: GridLevel) -> Arc<ParallelLayout> {
        self.layout.clone()
    }

    fn surface_entities(&self) -> Vec<SurfaceEntity> {
        (0..self.num_dofs)
            .map(|i| SurfaceEntity {
                surface_indices: vec![i],
                level_representations: vec![(1, vec![i])],
            })
            .collect()
    }

    fn patch_entities(&self, _level: usize) -> Vec<PatchEntity> {
        (0..self.num_dofs)
            .map(|i| PatchEntity {
                patch_indices: vec![i],
                ghost_indices: vec![i],
            })
            .collect()
    }

    fn shadowed_patch_indices(&self, _level: usize) -> Vec<usize> {
        Vec::new()
    }

    fn shadow_entities(&self, _level: usize) -> Vec<usize> {
        Vec::new()
    }

    fn adjacent_surface_elements(&self, _entity: usize) -> Vec<usize> {
        Vec::new()
    }

    fn is_shadow_descendant(&self, _elem: usize) -> bool {
        false
    }

    fn num_surface_elements(&self) -> usize {
        self.num_dofs + 1
    }
}

impl Assembly for PartitionSpace {
    fn assemble_jacobian(
        &self,
        gl: GridLevel,
        _solution: Option<&Array1<f64>>,
        _marker: Option<&ElementMarker>,
    ) -> Result<CsrMatrix> {
        // the ghost-inclusive base distribution assembles over the whole
        // grid; everything else is the rank-local operator
        match gl.kind() {
            GridLevelKind::Level(0) if gl.ghosts() => Ok(self.gathered_matrix.clone()),
            _ => Ok(self.local_matrix.clone()),
        }
    }

    fn assemble_transfer(
        &self,
        _coarse: GridLevel,
        _fine: GridLevel,
        _kind: TransferKind,
    ) -> Result<CsrMatrix> {
        let triplets = (0..self.num_dofs).map(|i| (i, i, 1.0)).collect();
        Ok(CsrMatrix::from_triplets(self.num_dofs, self.num_dofs, triplets))
    }
}

/// Global stiffness of an `n`-unknown unit chain with Dirichlet ends.
fn global_chain(n: usize) -> CsrMatrix {
    let mut triplets = Vec::new();
    for i in 0..n {
        if i > 0 {
            triplets.push((i - 1, i, -1.0));
            triplets.push((i, i - 1, -1.0));
        }
        triplets.push((i, i, 2.0));
    }
    CsrMatrix::from_triplets(n, n, triplets)
}

fn vertical_master(peer: usize, indices: Vec<usize>) -> Arc<ParallelLayout> {
    Arc::new(ParallelLayout {
        vertical_master: IndexLayout {
            interfaces: vec![IndexInterface { peer, indices }],
        },
        ..Default::default()
    })
}

fn vertical_slave(peer: usize, indices: Vec<usize>) -> Arc<ParallelLayout> {
    Arc::new(ParallelLayout {
        vertical_slave: IndexLayout {
            interfaces: vec![IndexInterface { peer, indices }],
        },
        ..Default::default()
    })
}

/// A degenerate engine: no smoothing, identity transfers, gathered LU base
/// solve. The cycle then reduces to one direct solve of the gathered system.
fn degenerate_engine(
    space: Arc<PartitionSpace>,
    comm: Box<dyn Communicator>,
) -> (GeometricMultigrid, CsrMatrix) {
    let surface = space.local_matrix.clone();
    let mut engine = GeometricMultigrid::new(space.clone(), space, comm);
    engine.set_smoother(IdentitySmoother::factory());
    engine.set_num_presmooth(0);
    engine.set_num_postsmooth(0);
    engine.set_prolongation(IdentityTransfer::factory());
    engine.set_projection(IdentityTransfer::factory());
    engine.set_base_solver(Box::new(LuSolver::new()));
    engine.set_parallel_base_solver(false);
    (engine, surface)
}

/// Rank 0: unknowns 0..3 plus a ghost copy of unknown 4 (vertical master).
/// Its own elements leave the ghost row empty.
fn rank0_space() -> Arc<PartitionSpace> {
    let local = CsrMatrix::from_triplets(
        5,
        5,
        vec![
            (0, 0, 2.0),
            (0, 1, -1.0),
            (1, 0, -1.0),
            (1, 1, 2.0),
            (1, 2, -1.0),
            (2, 1, -1.0),
            (2, 2, 2.0),
            (2, 3, -1.0),
            (3, 2, -1.0),
            (3, 3, 1.0),
        ],
    );
    Arc::new(PartitionSpace {
        num_dofs: 5,
        layout: vertical_master(1, vec![4]),
        local_matrix: local,
        gathered_matrix: global_chain(5),
    })
}

/// Rank 1: unknown 4 only, slaved to rank 0's ghost copy.
fn rank1_space() -> Arc<PartitionSpace> {
    let local = CsrMatrix::from_triplets(1, 1, vec![(0, 0, 2.0)]);
    Arc::new(PartitionSpace {
        num_dofs: 1,
        layout: vertical_slave(0, vec![0]),
        local_matrix: local.clone(),
        gathered_matrix: local,
    })
}

/// 5 unknowns over 2 ranks, one vertical master/slave pair, base 0 / top 1,
/// no smoothing, exact base solver, identity transfer. The returned
/// correction equals the analytically computed single-level solve on both
/// ranks, with the shared unknown's additive defect split between the
/// ranks.
#[test]
fn test_two_rank_gathered_base_solve_matches_direct() {
    let global = global_chain(5);
    let b = [1.0, 2.0, 3.0, 4.0, 5.0];

    let mut direct = LuSolver::new();
    direct.init(&global, &Array1::zeros(5)).unwrap();
    let mut expected = Array1::zeros(5);
    direct
        .apply(&mut expected, &Array1::from_vec(b.to_vec()))
        .unwrap();

    let mut comms = LoopbackCommunicator::mesh(2);
    let c1 = comms.pop().unwrap();
    let c0 = comms.pop().unwrap();

    let handle = thread::spawn(move || {
        let (mut engine, surface) = degenerate_engine(rank1_space(), Box::new(c1));
        engine.init(surface, None).unwrap();
        let defect = Array1::from_vec(vec![2.5]);
        let mut correction = Array1::zeros(1);
        engine.apply(&mut correction, &defect).unwrap();
        correction
    });

    let (mut engine, surface) = degenerate_engine(rank0_space(), Box::new(c0));
    engine.init(surface, None).unwrap();
    // rank 0 carries the other half of the shared unknown's defect on its
    // ghost copy
    let defect = Array1::from_vec(vec![1.0, 2.0, 3.0, 4.0, 2.5]);
    let mut correction = Array1::zeros(5);
    engine.apply(&mut correction, &defect).unwrap();

    let slave_correction = handle.join().unwrap();

    for i in 0..5 {
        assert_relative_eq!(correction[i], expected[i], epsilon = 1e-12);
    }
    assert_relative_eq!(slave_correction[0], expected[4], epsilon = 1e-12);
}

/// Two ranks without any shared interfaces run two independent multigrid
/// solves; each must match the serial run of its own chain exactly.
#[test]
fn test_disjoint_partitions_match_serial_runs() {
    use gmg::testing::ChainHierarchy;
    use gmg::{JacobiSmoother, StandardTransfer};

    fn chain_engine(space: ChainHierarchy, comm: Box<dyn Communicator>) -> (GeometricMultigrid, CsrMatrix) {
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

    fn run(space: ChainHierarchy, comm: Box<dyn Communicator>, n: usize) -> Array1<f64> {
        let (mut engine, matrix) = chain_engine(space, comm);
        engine.init(matrix, None).unwrap();
        let defect = Array1::from_shape_fn(n, |i| (i as f64 + 0.5).sin());
        let mut correction = Array1::zeros(n);
        engine.apply(&mut correction, &defect).unwrap();
        correction
    }

    let mut comms = LoopbackCommunicator::mesh(2);
    let c1 = comms.pop().unwrap();
    let c0 = comms.pop().unwrap();

    let handle = thread::spawn(move || {
        run(ChainHierarchy::full_refinement(2, 4), Box::new(c1), 9)
    });
    let rank0 = run(ChainHierarchy::full_refinement(2, 3), Box::new(c0), 7);
    let rank1 = handle.join().unwrap();

    let serial0 = run(
        ChainHierarchy::full_refinement(2, 3),
        Box::new(NullCommunicator),
        7,
    );
    let serial1 = run(
        ChainHierarchy::full_refinement(2, 4),
        Box::new(NullCommunicator),
        9,
    );

    assert_eq!(rank0, serial0);
    assert_eq!(rank1, serial1);
}

/// A partition with horizontal interfaces but no vertical ones can never be
/// gathered; requesting a gathered base solve is a configuration error
/// detected at `init`, not a mid-solve surprise.
#[test]
fn test_horizontal_only_partition_rejects_gathered_base() {
    let layout = Arc::new(ParallelLayout {
        horizontal_slave: IndexLayout {
            interfaces: vec![IndexInterface {
                peer: 1,
                indices: vec![0],
            }],
        },
        ..Default::default()
    });
    let matrix = global_chain(3);
    let space = Arc::new(PartitionSpace {
        num_dofs: 3,
        layout,
        local_matrix: matrix.clone(),
        gathered_matrix: matrix,
    });

    let (mut engine, surface) = degenerate_engine(space, Box::new(NullCommunicator));
    let err = engine.init(surface, None).unwrap_err();
    assert!(matches!(err, GmgError::GatheringImpossible { level: 0 }));
    assert!(err.is_config_error());
}
