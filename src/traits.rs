//! Collaborator contracts of the multigrid engine.
//!
//! The engine is agnostic to how degrees of freedom are laid out, how
//! matrices are assembled and how individual smoothers work internally; it
//! only relies on the contracts defined here. Smoothers and transfer
//! operators are installed as factories producing one fresh instance per
//! level, which replaces any notion of shared prototype objects.

use crate::error::Result;
use crate::grid_level::GridLevel;
use crate::parallel::layout::ParallelLayout;
use crate::sparse::CsrMatrix;
use crate::vector::LevelVector;
use fixedbitset::FixedBitSet;
use ndarray::Array1;
use std::sync::Arc;

/// Identifier of a degree-of-freedom-carrying geometric entity.
pub type EntityId = usize;

/// Identifier of a surface element.
pub type ElementId = usize;

/// A set of marked surface elements, used to restrict assembly.
#[derive(Debug, Clone)]
pub struct ElementMarker {
    bits: FixedBitSet,
}

impl ElementMarker {
    /// An empty marker over `num_elements` elements.
    pub fn new(num_elements: usize) -> Self {
        Self {
            bits: FixedBitSet::with_capacity(num_elements),
        }
    }

    /// Mark an element.
    pub fn mark(&mut self, elem: ElementId) {
        self.bits.insert(elem);
    }

    /// Whether an element is marked.
    pub fn is_marked(&self, elem: ElementId) -> bool {
        self.bits.contains(elem)
    }

    /// Number of marked elements.
    pub fn count(&self) -> usize {
        self.bits.count_ones(..)
    }

    /// Remove all marks.
    pub fn clear(&mut self) {
        self.bits.clear();
    }
}

/// One degree-of-freedom-carrying entity of the surface grid together with
/// its representations in the level hierarchy.
#[derive(Debug, Clone)]
pub struct SurfaceEntity {
    /// Algebra indices of this entity in the surface distribution.
    pub surface_indices: Vec<usize>,
    /// Representations on regular (ghost-inclusive) levels, ordered coarse to
    /// fine: `(level, indices-within-level)`. More than one entry means the
    /// entity is a shadow with shadow-copies on finer levels.
    pub level_representations: Vec<(usize, Vec<usize>)>,
}

/// One entity of a level's patch (no-ghost) distribution together with its
/// indices in the ghost-inclusive distribution of the same level.
#[derive(Debug, Clone)]
pub struct PatchEntity {
    /// Algebra indices in the patch distribution.
    pub patch_indices: Vec<usize>,
    /// Algebra indices in the ghost-inclusive distribution.
    pub ghost_indices: Vec<usize>,
}

/// Degree-of-freedom bookkeeping of the mesh hierarchy.
///
/// Implemented by the surrounding discretization framework; the engine treats
/// the mesh itself as opaque and only walks the entity views exposed here.
pub trait ApproximationSpace: Send + Sync {
    /// Number of regular levels in the hierarchy.
    fn num_levels(&self) -> usize;

    /// Degree-of-freedom count of a grid level.
    fn num_indices(&self, gl: GridLevel) -> usize;

    /// Parallel interface layout of a grid level's distribution.
    fn parallel_layout(&self, gl: GridLevel) -> Arc<ParallelLayout>;

    /// Surface entities in canonical base-to-top traversal order.
    fn surface_entities(&self) -> Vec<SurfaceEntity>;

    /// Entities of a level's patch distribution.
    fn patch_entities(&self, level: usize) -> Vec<PatchEntity>;

    /// Patch indices on `level` whose entity is also represented on a finer
    /// level. Smoother corrections are zeroed here in the adaptive case.
    fn shadowed_patch_indices(&self, level: usize) -> Vec<usize>;

    /// Entities on `level` that are shadowed by finer copies.
    fn shadow_entities(&self, level: usize) -> Vec<EntityId>;

    /// Surface elements sharing at least one vertex with `entity`.
    fn adjacent_surface_elements(&self, entity: EntityId) -> Vec<ElementId>;

    /// Whether `elem` descends from a shadowed entity, i.e. lives on the
    /// refined side of the adaptive boundary.
    fn is_shadow_descendant(&self, elem: ElementId) -> bool;

    /// Total number of surface elements (marker capacity).
    fn num_surface_elements(&self) -> usize;
}

/// Which transfer matrix to assemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Interpolation weights (prolongation stencil).
    Interpolation,
    /// Pure injection at coincident degrees of freedom.
    Injection,
}

/// Jacobian assembly and constraint access of the discretization.
pub trait Assembly: Send + Sync {
    /// Assemble the Jacobian of a grid level, optionally linearized around
    /// `solution` and restricted to the elements of `marker`.
    fn assemble_jacobian(
        &self,
        gl: GridLevel,
        solution: Option<&Array1<f64>>,
        marker: Option<&ElementMarker>,
    ) -> Result<CsrMatrix>;

    /// Assemble a transfer matrix (fine rows, coarse columns) between two
    /// consecutive levels.
    fn assemble_transfer(
        &self,
        coarse: GridLevel,
        fine: GridLevel,
        kind: TransferKind,
    ) -> Result<CsrMatrix>;

    /// Constraints (e.g. boundary conditions) to attach to transfer
    /// operators.
    fn constraints(&self) -> Vec<Arc<dyn Constraint>> {
        Vec::new()
    }
}

/// A smoothing iteration, also used as the base-solver contract.
///
/// `apply` computes a correction without touching the defect;
/// `apply_update_defect` additionally keeps the defect up to date. The
/// engine picks between them depending on grid regularity.
pub trait Smoother: Send {
    /// Bind the smoother to a level matrix. `representative` is a vector of
    /// matching layout, available for sizing internal storage.
    fn init(&mut self, matrix: &CsrMatrix, representative: &Array1<f64>) -> Result<()>;

    /// Compute a correction from the defect; the defect is not modified.
    fn apply(&mut self, correction: &mut Array1<f64>, defect: &Array1<f64>) -> Result<()>;

    /// Compute a correction and update the defect in place.
    fn apply_update_defect(
        &mut self,
        correction: &mut Array1<f64>,
        defect: &mut Array1<f64>,
    ) -> Result<()>;

    /// An independent copy with the same configuration and bound state.
    fn clone_box(&self) -> Box<dyn Smoother>;
}

/// Factory producing one smoother instance per level.
pub type SmootherFactory = Arc<dyn Fn() -> Box<dyn Smoother> + Send + Sync>;

/// Inter-level transfer: prolongation, restriction and projection.
pub trait TransferOperator: Send {
    /// Select the level pair this operator acts between.
    fn set_levels(&mut self, coarse: GridLevel, fine: GridLevel);

    /// Build the operator for the selected levels.
    fn init(&mut self, assembly: &dyn Assembly) -> Result<()>;

    /// Interpolate a coarse vector up: `fine = P * coarse`.
    fn prolongate(&self, fine: &mut Array1<f64>, coarse: &Array1<f64>) -> Result<()>;

    /// Restrict a fine vector down: `coarse = P^T * fine`.
    fn do_restrict(&self, coarse: &mut Array1<f64>, fine: &Array1<f64>) -> Result<()>;

    /// Drop all attached constraints.
    fn clear_constraints(&mut self);

    /// Attach a constraint to honor during `init`.
    fn add_constraint(&mut self, constraint: Arc<dyn Constraint>);

    /// An independent copy with the same configuration.
    fn clone_box(&self) -> Box<dyn TransferOperator>;
}

/// Factory producing one transfer operator per level.
pub type TransferFactory = Arc<dyn Fn() -> Box<dyn TransferOperator> + Send + Sync>;

/// Hook applied to a vector right after prolongation or restriction.
pub trait TransferPostProcess: Send {
    /// Select the level the hook's target vectors live on.
    fn set_levels(&mut self, gl: GridLevel);

    /// Prepare the hook for the selected level.
    fn init(&mut self) -> Result<()>;

    /// Post-process a transferred vector in place.
    fn post_process(&self, v: &mut LevelVector) -> Result<()>;

    /// An independent copy with the same configuration.
    fn clone_box(&self) -> Box<dyn TransferPostProcess>;
}

/// Factory producing one post-process hook per level.
pub type PostProcessFactory = Arc<dyn Fn() -> Box<dyn TransferPostProcess> + Send + Sync>;

/// A constraint (e.g. a Dirichlet boundary condition) adjusting transfer
/// matrices during operator setup.
pub trait Constraint: Send + Sync {
    /// Adjust an assembled prolongation matrix.
    fn adjust_prolongation(
        &self,
        _p: &mut CsrMatrix,
        _coarse: GridLevel,
        _fine: GridLevel,
    ) -> Result<()> {
        Ok(())
    }

    /// Adjust an assembled restriction matrix.
    fn adjust_restriction(
        &self,
        _r: &mut CsrMatrix,
        _coarse: GridLevel,
        _fine: GridLevel,
    ) -> Result<()> {
        Ok(())
    }
}

/// Strategy computing the scale factor applied to the overall correction.
pub trait Damping: Send + Sync {
    /// Scale factor for `correction`, given the current surface defect and
    /// the surface operator.
    fn damping(&self, correction: &Array1<f64>, defect: &Array1<f64>, op: &CsrMatrix) -> f64;
}

/// Fixed damping factor; `ConstantDamping(1.0)` disables scaling.
#[derive(Debug, Clone, Copy)]
pub struct ConstantDamping(pub f64);

impl Damping for ConstantDamping {
    fn damping(&self, _c: &Array1<f64>, _d: &Array1<f64>, _op: &CsrMatrix) -> f64 {
        self.0
    }
}

/// Observer receiving named vector/matrix dumps keyed by level and iteration.
///
/// Purely observational; implementations needing mutability use interior
/// mutability.
pub trait DebugWriter: Send + Sync {
    /// Record a vector snapshot.
    fn write_vector(&self, name: &str, gl: GridLevel, iteration: usize, v: &Array1<f64>);

    /// Record a matrix snapshot.
    fn write_matrix(&self, name: &str, gl: GridLevel, iteration: usize, m: &CsrMatrix);
}
