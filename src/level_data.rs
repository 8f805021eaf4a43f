//! Per-level storage of the multigrid hierarchy.

use crate::sparse::CsrMatrix;
use crate::traits::{Smoother, TransferOperator, TransferPostProcess};
use crate::vector::LevelVector;

/// Everything the cycle needs on one level.
///
/// Vectors come in two flavors: the ghosted vectors `c`, `d`, `t` span the
/// full level distribution including overlap shared with other partitions;
/// the patch vectors `sc`, `sd`, `st` span the local smoothing domain only.
/// The whole bundle is (re)allocated when the top or base level changes and
/// replaced wholesale rather than mutated incrementally.
pub struct LevelData {
    /// Ghosted correction.
    pub c: LevelVector,
    /// Ghosted defect.
    pub d: LevelVector,
    /// Ghosted temporary.
    pub t: LevelVector,
    /// Patch correction.
    pub sc: LevelVector,
    /// Patch defect.
    pub sd: LevelVector,
    /// Patch temporary.
    pub st: LevelVector,

    /// The level system matrix over the patch distribution.
    pub matrix: CsrMatrix,
    /// Coarse-grid contribution over the ghosted distribution; `0 x 0`
    /// unless the grid is adaptively refined.
    pub coarse_contribution: CsrMatrix,

    /// Pre-smoother instance.
    pub pre_smoother: Box<dyn Smoother>,
    /// Distinct post-smoother; `None` shares the pre-smoother instance.
    pub post_smoother: Option<Box<dyn Smoother>>,

    /// Projection operator (solution transfer during setup).
    pub projection: Box<dyn TransferOperator>,
    /// Prolongation operator towards this level.
    pub prolongation: Box<dyn TransferOperator>,
    /// Distinct restriction; `None` uses the prolongation instance's
    /// transpose action.
    pub restriction: Option<Box<dyn TransferOperator>>,

    /// Hooks applied after prolongation.
    pub prolongation_post: Vec<Box<dyn TransferPostProcess>>,
    /// Hooks applied after restriction.
    pub restriction_post: Vec<Box<dyn TransferPostProcess>>,

    /// Patch index to ghosted index translation.
    pub patch_to_ghost: Vec<usize>,
    /// Patch indices on the adaptive refinement boundary; smoother
    /// corrections are zeroed here in the adaptive case.
    pub shadowed_patch: Vec<usize>,
}

impl LevelData {
    /// Deep copy duplicating all vectors, matrices, smoother and transfer
    /// instances.
    pub fn deep_clone(&self) -> LevelData {
        LevelData {
            c: self.c.clone(),
            d: self.d.clone(),
            t: self.t.clone(),
            sc: self.sc.clone(),
            sd: self.sd.clone(),
            st: self.st.clone(),
            matrix: self.matrix.clone(),
            coarse_contribution: self.coarse_contribution.clone(),
            pre_smoother: self.pre_smoother.clone_box(),
            post_smoother: self.post_smoother.as_ref().map(|s| s.clone_box()),
            projection: self.projection.clone_box(),
            prolongation: self.prolongation.clone_box(),
            restriction: self.restriction.as_ref().map(|r| r.clone_box()),
            prolongation_post: self
                .prolongation_post
                .iter()
                .map(|p| p.clone_box())
                .collect(),
            restriction_post: self
                .restriction_post
                .iter()
                .map(|p| p.clone_box())
                .collect(),
            patch_to_ghost: self.patch_to_ghost.clone(),
            shadowed_patch: self.shadowed_patch.clone(),
        }
    }
}
