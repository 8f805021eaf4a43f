//! Error types for the multigrid engine.
//!
//! Configuration and topology problems are detected eagerly during `init`;
//! stage failures during `apply` are wrapped with the level index and stage
//! name so a failed cycle can be located without a debugger.

use std::fmt;
use thiserror::Error;

/// The stage of a multigrid cycle in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    /// Projection of the surface defect into the level hierarchy.
    ProjectDefect,
    /// Pre-smoothing on a level.
    PreSmooth,
    /// Restriction of the defect to the next coarser level.
    Restrict,
    /// Prolongation of the coarse correction and defect update.
    Prolongate,
    /// Post-smoothing on a level.
    PostSmooth,
    /// The base-level solve.
    BaseSolve,
    /// Projection of the level correction back to the surface.
    ProjectCorrection,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStage::ProjectDefect => "defect projection",
            CycleStage::PreSmooth => "pre-smoothing",
            CycleStage::Restrict => "restriction",
            CycleStage::Prolongate => "prolongation",
            CycleStage::PostSmooth => "post-smoothing",
            CycleStage::BaseSolve => "base solve",
            CycleStage::ProjectCorrection => "correction projection",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during multigrid setup and application.
#[derive(Debug, Error)]
pub enum GmgError {
    /// A required collaborator or setting was never supplied.
    #[error("{component} not set")]
    MissingComponent {
        /// Name of the missing component
        component: &'static str,
    },

    /// The approximation space reports no grid levels at all.
    #[error("approximation space has no grid levels")]
    EmptyHierarchy,

    /// The configured base level lies above the top level.
    #[error("base level {base} exceeds top level {top}")]
    InvalidLevelRange {
        /// Configured base level
        base: usize,
        /// Top level derived from the hierarchy
        top: usize,
    },

    /// A surface entity carries a different number of indices than its
    /// level representation.
    #[error(
        "surface/level index count mismatch on level {level}: \
         surface entity carries {surface_len} indices, level carries {level_len}"
    )]
    SurfaceIndexMismatch {
        /// Level of the offending representation
        level: usize,
        /// Index count on the surface side
        surface_len: usize,
        /// Index count on the level side
        level_len: usize,
    },

    /// A patch entity carries a different number of indices in the ghosted
    /// distribution than in the patch distribution.
    #[error(
        "patch/ghost index count mismatch on level {level}: \
         patch entity carries {patch_len} indices, ghosted carries {ghost_len}"
    )]
    PatchIndexMismatch {
        /// Level of the offending entity
        level: usize,
        /// Index count on the patch side
        patch_len: usize,
        /// Index count on the ghosted side
        ghost_len: usize,
    },

    /// A surface index has no level representation at all.
    #[error("surface index {index} has no level representation")]
    UnmappedSurfaceIndex {
        /// The unmapped surface index
        index: usize,
    },

    /// A patch index was not covered by any patch entity.
    #[error("patch index {index} on level {level} not covered by any entity")]
    UnmappedPatchIndex {
        /// Level of the distribution
        level: usize,
        /// The uncovered patch index
        index: usize,
    },

    /// A surface entity is represented only below the configured base level.
    #[error("surface entity on level {level} lies below base level {base}")]
    EntityBelowBaseLevel {
        /// Level of the representation
        level: usize,
        /// Configured base level
        base: usize,
    },

    /// Two vectors or a matrix/vector pair disagree about their dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        got: usize,
    },

    /// A matrix row carries no usable diagonal entry.
    #[error("zero diagonal entry at row {row}")]
    ZeroDiagonal {
        /// Row with the missing/zero diagonal
        row: usize,
    },

    /// Factorization hit a zero pivot.
    #[error("singular matrix: zero pivot at column {pivot}")]
    SingularMatrix {
        /// Pivot column at which elimination broke down
        pivot: usize,
    },

    /// A gathered base solve was requested but the base-level layout offers
    /// no vertical interfaces to gather over.
    #[error(
        "gathered base solve impossible on level {level}: \
         distributed layout has no vertical interfaces"
    )]
    GatheringImpossible {
        /// The base level
        level: usize,
    },

    /// A smoother or solver collaborator failed.
    #[error("solver failure: {detail}")]
    SolverFailure {
        /// Collaborator-supplied description
        detail: String,
    },

    /// The communication layer failed or was driven out of protocol.
    #[error("communication failed: {detail}")]
    CommFailure {
        /// Transport-supplied description
        detail: String,
    },

    /// A cycle stage failed on a specific level.
    #[error("{stage} failed on level {level}")]
    Stage {
        /// The failing stage
        stage: CycleStage,
        /// Level index the stage ran on
        level: usize,
        /// The underlying failure
        #[source]
        source: Box<GmgError>,
    },
}

/// A specialized `Result` type for multigrid operations.
pub type Result<T> = std::result::Result<T, GmgError>;

impl GmgError {
    /// Wrap this error with the cycle stage and level it occurred in.
    pub fn at_stage(self, stage: CycleStage, level: usize) -> Self {
        GmgError::Stage {
            stage,
            level,
            source: Box::new(self),
        }
    }

    /// Returns `true` if this is a configuration error detected at `init`.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            GmgError::MissingComponent { .. }
                | GmgError::EmptyHierarchy
                | GmgError::InvalidLevelRange { .. }
                | GmgError::GatheringImpossible { .. }
        )
    }

    /// Returns `true` if this is a topology/consistency error raised during
    /// index-map construction.
    pub fn is_topology_error(&self) -> bool {
        matches!(
            self,
            GmgError::SurfaceIndexMismatch { .. }
                | GmgError::PatchIndexMismatch { .. }
                | GmgError::UnmappedSurfaceIndex { .. }
                | GmgError::UnmappedPatchIndex { .. }
                | GmgError::EntityBelowBaseLevel { .. }
        )
    }

    /// Returns the innermost non-`Stage` error.
    pub fn root_cause(&self) -> &GmgError {
        match self {
            GmgError::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
