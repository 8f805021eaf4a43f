//! The recursive multigrid cycle engine.
//!
//! [`GeometricMultigrid`] owns the per-level storage, builds the index maps
//! once per operator change in `init`, and schedules the recursive
//! presmooth / restrict / recurse / prolongate / postsmooth / base-solve
//! cycle in `apply`. Partitioned runs stay coherent through the vertical
//! gather/broadcast points; adaptively refined grids additionally receive
//! the coarse-grid coupling repair during prolongation.
//!
//! An engine instance is driven by exactly one caller at a time; concurrent
//! use requires [`GeometricMultigrid::clone_with_communicator`], which
//! duplicates all level data while sharing the discretization.

use crate::corrector::{project_shadow_defect, rebuild_contributions};
use crate::error::{CycleStage, GmgError, Result};
use crate::grid_level::GridLevel;
use crate::index_map::{
    build_patch_to_ghost_map, copy_ghost_to_noghost, copy_noghost_to_ghost, SurfaceToLevelMap,
};
use crate::level_data::LevelData;
use crate::parallel::comm::Communicator;
use crate::parallel::layout::can_gather;
use crate::parallel::sync::{
    broadcast_vertical, broadcast_vertical_add, consistent_to_additive, copy_to_vertical_masters,
    gather_vertical, set_layout_values,
};
use crate::sparse::CsrMatrix;
use crate::traits::{
    ApproximationSpace, Assembly, ConstantDamping, Damping, DebugWriter, PostProcessFactory,
    Smoother, SmootherFactory, TransferFactory, TransferOperator,
};
use crate::vector::{LevelVector, StorageMask};
use ndarray::Array1;
use std::fmt;
use std::sync::Arc;

/// How often the coarse hierarchy is visited per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleType {
    /// One coarse visit per level.
    V,
    /// Two coarse visits per level.
    W,
    /// A general gamma-cycle with the given number of coarse visits.
    Gamma(usize),
}

impl CycleType {
    /// Number of sub-cycles executed on each level.
    pub fn repeats(self) -> usize {
        match self {
            CycleType::V => 1,
            CycleType::W => 2,
            CycleType::Gamma(n) => n.max(1),
        }
    }
}

impl fmt::Display for CycleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleType::V => f.write_str("V-Cycle"),
            CycleType::W => f.write_str("W-Cycle"),
            CycleType::Gamma(n) => write!(f, "{n}-Cycle"),
        }
    }
}

fn level_mut(levels: &mut [Option<LevelData>], lev: usize) -> &mut LevelData {
    match levels[lev].as_mut() {
        Some(ld) => ld,
        None => unreachable!("level {lev} not allocated"),
    }
}

/// Coarse/fine pair `(lev - 1, lev)` with disjoint mutable access.
fn level_pair(levels: &mut [Option<LevelData>], lev: usize) -> (&mut LevelData, &mut LevelData) {
    let (coarse, fine) = levels.split_at_mut(lev);
    let lc = match coarse[lev - 1].as_mut() {
        Some(ld) => ld,
        None => unreachable!("level {} not allocated", lev - 1),
    };
    let lf = match fine[0].as_mut() {
        Some(ld) => ld,
        None => unreachable!("level {lev} not allocated"),
    };
    (lc, lf)
}

/// Run `nu` smoothing steps on a level's patch vectors.
///
/// On fully refined grids the smoother keeps the defect up to date itself.
/// On adaptive grids the step correction is zeroed on the shadow copies of
/// the refinement boundary before the defect update, since those entries
/// receive their value through the inter-level transfer instead. The summed
/// step corrections accumulate into the level correction.
fn smooth_level(ld: &mut LevelData, use_post: bool, adaptive: bool, nu: usize) -> Result<()> {
    if ld.sd.is_empty() {
        return Ok(());
    }

    let LevelData {
        pre_smoother,
        post_smoother,
        matrix,
        sc,
        sd,
        st,
        shadowed_patch,
        ..
    } = ld;
    let smoother: &mut dyn Smoother = match (use_post, post_smoother.as_mut()) {
        (true, Some(s)) => s.as_mut(),
        _ => pre_smoother.as_mut(),
    };

    for _ in 0..nu {
        if !adaptive {
            smoother.apply_update_defect(st.data_mut(), sd.data_mut())?;
        } else {
            smoother.apply(st.data_mut(), sd.data())?;
            let step = st.data_mut();
            for &i in shadowed_patch.iter() {
                step[i] = 0.0;
            }
            matrix.apply_sub(sd.data_mut(), st.data());
        }
        sc.add_assign(st);
    }
    Ok(())
}

/// Parallel geometric multigrid preconditioner.
///
/// Configured with factories producing one smoother/transfer instance per
/// level; `init` must be called with the surface operator before `apply`.
pub struct GeometricMultigrid {
    space: Arc<dyn ApproximationSpace>,
    assembly: Arc<dyn Assembly>,
    comm: Box<dyn Communicator>,

    base_level: usize,
    cycle_type: CycleType,
    num_presmooth: usize,
    num_postsmooth: usize,
    parallel_base: bool,

    pre_smoother: Option<SmootherFactory>,
    post_smoother: Option<SmootherFactory>,
    projection: Option<TransferFactory>,
    prolongation: Option<TransferFactory>,
    restriction: Option<TransferFactory>,
    prolongation_post: Vec<PostProcessFactory>,
    restriction_post: Vec<PostProcessFactory>,
    base_solver: Option<Box<dyn Smoother>>,
    damping: Arc<dyn Damping>,
    debug_writer: Option<Arc<dyn DebugWriter>>,

    // state established by `init`
    top_level: usize,
    adaptive: bool,
    levels: Vec<Option<LevelData>>,
    surf_to_level: SurfaceToLevelMap,
    surface_matrix: CsrMatrix,
    base_matrix: Option<CsrMatrix>,
    iter_count: usize,
}

impl GeometricMultigrid {
    /// Create an unconfigured engine over a discretization.
    ///
    /// The smoother, base solver and transfer factories must be supplied
    /// through the setters before `init`; missing ones are reported there,
    /// never defaulted.
    pub fn new(
        space: Arc<dyn ApproximationSpace>,
        assembly: Arc<dyn Assembly>,
        comm: Box<dyn Communicator>,
    ) -> Self {
        Self {
            space,
            assembly,
            comm,
            base_level: 0,
            cycle_type: CycleType::V,
            num_presmooth: 2,
            num_postsmooth: 2,
            parallel_base: true,
            pre_smoother: None,
            post_smoother: None,
            projection: None,
            prolongation: None,
            restriction: None,
            prolongation_post: Vec::new(),
            restriction_post: Vec::new(),
            base_solver: None,
            damping: Arc::new(ConstantDamping(1.0)),
            debug_writer: None,
            top_level: 0,
            adaptive: false,
            levels: Vec::new(),
            surf_to_level: SurfaceToLevelMap::default(),
            surface_matrix: CsrMatrix::default(),
            base_matrix: None,
            iter_count: 0,
        }
    }

    /// Coarsest level the cycle descends to.
    pub fn set_base_level(&mut self, lev: usize) {
        self.base_level = lev;
    }

    pub fn set_cycle_type(&mut self, cycle_type: CycleType) {
        self.cycle_type = cycle_type;
    }

    pub fn set_num_presmooth(&mut self, nu: usize) {
        self.num_presmooth = nu;
    }

    pub fn set_num_postsmooth(&mut self, nu: usize) {
        self.num_postsmooth = nu;
    }

    /// Solve the base problem distributed on each partition's patch instead
    /// of gathering it onto the vertical masters.
    pub fn set_parallel_base_solver(&mut self, parallel: bool) {
        self.parallel_base = parallel;
    }

    /// Use one smoother factory for both pre- and post-smoothing; the two
    /// share a single instance per level.
    pub fn set_smoother(&mut self, factory: SmootherFactory) {
        self.pre_smoother = Some(factory);
        self.post_smoother = None;
    }

    pub fn set_pre_smoother(&mut self, factory: SmootherFactory) {
        self.pre_smoother = Some(factory);
    }

    pub fn set_post_smoother(&mut self, factory: SmootherFactory) {
        self.post_smoother = Some(factory);
    }

    /// Transfer used to project the surface solution down during setup.
    pub fn set_projection(&mut self, factory: TransferFactory) {
        self.projection = Some(factory);
    }

    /// Prolongation factory. Without a distinct restriction, the same
    /// per-level instance also restricts via its transpose action.
    pub fn set_prolongation(&mut self, factory: TransferFactory) {
        self.prolongation = Some(factory);
    }

    pub fn set_restriction(&mut self, factory: TransferFactory) {
        self.restriction = Some(factory);
    }

    pub fn add_prolongation_post_process(&mut self, factory: PostProcessFactory) {
        self.prolongation_post.push(factory);
    }

    pub fn add_restriction_post_process(&mut self, factory: PostProcessFactory) {
        self.restriction_post.push(factory);
    }

    pub fn set_base_solver(&mut self, solver: Box<dyn Smoother>) {
        self.base_solver = Some(solver);
    }

    /// Strategy scaling the overall surface correction.
    pub fn set_damping(&mut self, damping: Arc<dyn Damping>) {
        self.damping = damping;
    }

    pub fn set_debug_writer(&mut self, writer: Arc<dyn DebugWriter>) {
        self.debug_writer = Some(writer);
    }

    /// Whether the grid was detected as adaptively refined during `init`.
    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    /// Topmost level of the hierarchy established by `init`.
    pub fn top_level(&self) -> usize {
        self.top_level
    }

    /// Bind the engine to a surface operator and rebuild all level data.
    ///
    /// Validates the configuration, detects adaptivity, allocates the level
    /// storage, builds the index maps, assembles the level operators and
    /// initializes smoothers, base solver and transfers. Must be called again
    /// whenever the operator or the grid changes; a failed `init` leaves the
    /// engine unusable until reconfigured and re-initialized.
    pub fn init(
        &mut self,
        surface_matrix: CsrMatrix,
        surface_solution: Option<&Array1<f64>>,
    ) -> Result<()> {
        self.levels.clear();

        let num_levels = self.space.num_levels();
        if num_levels == 0 {
            return Err(GmgError::EmptyHierarchy);
        }
        let top = num_levels - 1;
        if self.base_level > top {
            return Err(GmgError::InvalidLevelRange {
                base: self.base_level,
                top,
            });
        }
        if self.base_solver.is_none() {
            return Err(GmgError::MissingComponent {
                component: "base solver",
            });
        }
        if self.pre_smoother.is_none() {
            return Err(GmgError::MissingComponent {
                component: "pre-smoother",
            });
        }
        if self.prolongation.is_none() {
            return Err(GmgError::MissingComponent {
                component: "prolongation",
            });
        }
        if self.projection.is_none() {
            return Err(GmgError::MissingComponent {
                component: "projection",
            });
        }
        self.top_level = top;

        let n_surf = self.space.num_indices(GridLevel::surface());
        if surface_matrix.num_rows != n_surf || surface_matrix.num_cols != n_surf {
            return Err(GmgError::DimensionMismatch {
                expected: n_surf,
                got: surface_matrix.num_rows,
            });
        }
        if let Some(sol) = surface_solution {
            if sol.len() != n_surf {
                return Err(GmgError::DimensionMismatch {
                    expected: n_surf,
                    got: sol.len(),
                });
            }
        }
        self.surface_matrix = surface_matrix;
        self.iter_count = 0;

        // a partition whose top level carries more indices than its surface
        // cannot use the fully refined shortcut; one such partition switches
        // the whole run to the adaptive path
        let n_top = self.space.num_indices(GridLevel::level_with_ghosts(top));
        let locally_adaptive = n_top != n_surf;
        self.adaptive = self.comm.any_true(locally_adaptive)?;
        log::debug!(target: "gmg", "init: top level {top}, base level {}, grid is {}",
            self.base_level, if self.adaptive { "adaptive" } else { "fully refined" });

        self.init_level_memory()?;
        self.init_surface_to_level()?;
        self.init_level_operator(surface_solution)?;
        self.init_smoother()?;
        self.init_base_solver()?;
        self.init_transfer()?;

        log::debug!(target: "gmg", "init done: {} surface indices mapped", self.surf_to_level.len());
        Ok(())
    }

    /// Compute a correction for a surface defect with one multigrid cycle.
    ///
    /// The defect is projected into the hierarchy, the recursive cycle runs
    /// from the top level down to the base level, and the resulting level
    /// correction is projected back and scaled by the damping strategy. On
    /// failure the correction's contents are unspecified and must not be
    /// used.
    pub fn apply(&mut self, correction: &mut Array1<f64>, defect: &Array1<f64>) -> Result<()> {
        if self.levels.is_empty() {
            return Err(GmgError::MissingComponent {
                component: "initialized level hierarchy",
            });
        }
        let n_surf = self.surf_to_level.len();
        if defect.len() != n_surf {
            return Err(GmgError::DimensionMismatch {
                expected: n_surf,
                got: defect.len(),
            }
            .at_stage(CycleStage::ProjectDefect, self.top_level));
        }
        if correction.len() != n_surf {
            return Err(GmgError::DimensionMismatch {
                expected: n_surf,
                got: correction.len(),
            }
            .at_stage(CycleStage::ProjectCorrection, self.top_level));
        }

        if let Some(writer) = &self.debug_writer {
            writer.write_vector("defect_in", GridLevel::surface(), self.iter_count, defect);
        }

        // project the surface defect onto each index's finest representation
        for lev in self.base_level..=self.top_level {
            let ld = level_mut(&mut self.levels, lev);
            ld.d.set_zero();
            ld.d.set_storage(StorageMask::ADDITIVE);
        }
        for (i, li) in self.surf_to_level.iter() {
            level_mut(&mut self.levels, li.level).d.data_mut()[li.index] = defect[i];
        }

        self.level_cycle(self.top_level, defect)?;

        for (i, li) in self.surf_to_level.iter() {
            correction[i] = level_mut(&mut self.levels, li.level).c.data()[li.index];
        }

        let kappa = self.damping.damping(correction, defect, &self.surface_matrix);
        if kappa != 1.0 {
            correction.mapv_inplace(|v| v * kappa);
        }

        if let Some(writer) = &self.debug_writer {
            writer.write_vector(
                "correction_out",
                GridLevel::surface(),
                self.iter_count,
                correction,
            );
            writer.write_matrix(
                "surface_stiffness",
                GridLevel::surface(),
                self.iter_count,
                &self.surface_matrix,
            );
        }
        self.iter_count += 1;
        Ok(())
    }

    /// Like [`apply`](Self::apply), additionally updating the surface defect
    /// in place: `d := d - A * c`.
    pub fn apply_update_defect(
        &mut self,
        correction: &mut Array1<f64>,
        defect: &mut Array1<f64>,
    ) -> Result<()> {
        self.apply(correction, defect)?;
        self.surface_matrix.apply_sub(defect, correction);
        Ok(())
    }

    /// Deep clone for concurrent use on independent data.
    ///
    /// All level data, smoother and transfer instances are duplicated; the
    /// discretization is shared by reference and must stay read-only while
    /// clones are in use. Transports are per-process resources, so the clone
    /// receives its own communicator from the caller.
    pub fn clone_with_communicator(&self, comm: Box<dyn Communicator>) -> GeometricMultigrid {
        GeometricMultigrid {
            space: self.space.clone(),
            assembly: self.assembly.clone(),
            comm,
            base_level: self.base_level,
            cycle_type: self.cycle_type,
            num_presmooth: self.num_presmooth,
            num_postsmooth: self.num_postsmooth,
            parallel_base: self.parallel_base,
            pre_smoother: self.pre_smoother.clone(),
            post_smoother: self.post_smoother.clone(),
            projection: self.projection.clone(),
            prolongation: self.prolongation.clone(),
            restriction: self.restriction.clone(),
            prolongation_post: self.prolongation_post.clone(),
            restriction_post: self.restriction_post.clone(),
            base_solver: self.base_solver.as_ref().map(|s| s.clone_box()),
            damping: self.damping.clone(),
            debug_writer: self.debug_writer.clone(),
            top_level: self.top_level,
            adaptive: self.adaptive,
            levels: self
                .levels
                .iter()
                .map(|ld| ld.as_ref().map(|ld| ld.deep_clone()))
                .collect(),
            surf_to_level: self.surf_to_level.clone(),
            surface_matrix: self.surface_matrix.clone(),
            base_matrix: self.base_matrix.clone(),
            iter_count: self.iter_count,
        }
    }

    fn init_level_memory(&mut self) -> Result<()> {
        let pre = self.pre_smoother.as_ref().ok_or(GmgError::MissingComponent {
            component: "pre-smoother",
        })?;
        let prolongation = self.prolongation.as_ref().ok_or(GmgError::MissingComponent {
            component: "prolongation",
        })?;
        let projection = self.projection.as_ref().ok_or(GmgError::MissingComponent {
            component: "projection",
        })?;

        self.levels = (0..=self.top_level).map(|_| None).collect();
        for lev in self.base_level..=self.top_level {
            let gl_ghost = GridLevel::level_with_ghosts(lev);
            let gl_patch = GridLevel::level(lev);
            let n_ghost = self.space.num_indices(gl_ghost);
            let n_patch = self.space.num_indices(gl_patch);
            let ghost_layout = self.space.parallel_layout(gl_ghost);
            let patch_layout = self.space.parallel_layout(gl_patch);

            let mut c = LevelVector::new(n_ghost, ghost_layout.clone());
            c.set_storage(StorageMask::CONSISTENT);
            let mut d = LevelVector::new(n_ghost, ghost_layout.clone());
            d.set_storage(StorageMask::ADDITIVE);
            let t = LevelVector::new(n_ghost, ghost_layout);

            let mut sc = LevelVector::new(n_patch, patch_layout.clone());
            sc.set_storage(StorageMask::CONSISTENT);
            let mut sd = LevelVector::new(n_patch, patch_layout.clone());
            sd.set_storage(StorageMask::ADDITIVE);
            let st = LevelVector::new(n_patch, patch_layout);

            let patch_to_ghost = build_patch_to_ghost_map(self.space.as_ref(), lev)?;
            let shadowed_patch = self.space.shadowed_patch_indices(lev);

            self.levels[lev] = Some(LevelData {
                c,
                d,
                t,
                sc,
                sd,
                st,
                matrix: CsrMatrix::default(),
                coarse_contribution: CsrMatrix::default(),
                pre_smoother: pre(),
                post_smoother: self.post_smoother.as_ref().map(|f| f()),
                projection: projection(),
                prolongation: prolongation(),
                restriction: self.restriction.as_ref().map(|f| f()),
                prolongation_post: self.prolongation_post.iter().map(|f| f()).collect(),
                restriction_post: self.restriction_post.iter().map(|f| f()).collect(),
                patch_to_ghost,
                shadowed_patch,
            });
        }
        Ok(())
    }

    fn init_surface_to_level(&mut self) -> Result<()> {
        let map = SurfaceToLevelMap::build(self.space.as_ref())?;
        if let Some(min) = map.min_level() {
            if min < self.base_level {
                return Err(GmgError::EntityBelowBaseLevel {
                    level: min,
                    base: self.base_level,
                });
            }
        }
        self.surf_to_level = map;
        Ok(())
    }

    /// Project the surface solution down the hierarchy as linearization
    /// point, assemble the level operators and the coarse-grid coupling.
    fn init_level_operator(&mut self, surface_solution: Option<&Array1<f64>>) -> Result<()> {
        if let Some(sol) = surface_solution {
            self.init_projection()?;

            for (i, li) in self.surf_to_level.iter() {
                let ld = level_mut(&mut self.levels, li.level);
                ld.t.data_mut()[li.index] = sol[i];
            }
            for lev in self.base_level..=self.top_level {
                level_mut(&mut self.levels, lev)
                    .t
                    .set_storage(StorageMask::CONSISTENT);
            }

            for lev in ((self.base_level + 1)..=self.top_level).rev() {
                copy_to_vertical_masters(
                    &mut level_mut(&mut self.levels, lev).t,
                    self.comm.as_mut(),
                )?;
                let (lc, lf) = level_pair(&mut self.levels, lev);
                lf.projection.do_restrict(lc.t.data_mut(), lf.t.data())?;
                lc.t.set_storage(StorageMask::CONSISTENT);
            }
            if self.base_level != self.top_level {
                copy_to_vertical_masters(
                    &mut level_mut(&mut self.levels, self.base_level).t,
                    self.comm.as_mut(),
                )?;
            }
        }

        let n_surf = self.space.num_indices(GridLevel::surface());
        for lev in self.base_level..=self.top_level {
            // with full refinement the top level operator is the surface
            // operator in level numbering
            let copy_from_surface = !self.adaptive
                && lev == self.top_level
                && self.space.num_indices(GridLevel::level(lev)) == n_surf;

            if copy_from_surface {
                let mut triplets = Vec::with_capacity(self.surface_matrix.nnz());
                for (i, li) in self.surf_to_level.iter() {
                    for (j, v) in self.surface_matrix.row_entries(i) {
                        triplets.push((li.index, self.surf_to_level.get(j).index, v));
                    }
                }
                let ld = level_mut(&mut self.levels, lev);
                ld.matrix = CsrMatrix::from_triplets(n_surf, n_surf, triplets);
            } else {
                let ld = level_mut(&mut self.levels, lev);
                {
                    let LevelData {
                        st,
                        t,
                        patch_to_ghost,
                        ..
                    } = &mut *ld;
                    copy_ghost_to_noghost(st, t, patch_to_ghost);
                }
                let linearization = surface_solution.is_some().then(|| ld.st.data());
                ld.matrix =
                    self.assembly
                        .assemble_jacobian(GridLevel::level(lev), linearization, None)?;
            }
        }

        // the gathered base solve works on the whole base grid including
        // the ghost overlap
        self.base_matrix = None;
        if !self.parallel_base {
            let ld = level_mut(&mut self.levels, self.base_level);
            let linearization = surface_solution.is_some().then(|| ld.t.data());
            self.base_matrix = Some(self.assembly.assemble_jacobian(
                GridLevel::level_with_ghosts(self.base_level),
                linearization,
                None,
            )?);
        }

        let contributions = rebuild_contributions(
            self.space.as_ref(),
            self.assembly.as_ref(),
            surface_solution,
            self.adaptive,
            self.top_level + 1,
        )?;
        for (lev, contribution) in contributions.into_iter().enumerate() {
            if let Some(ld) = self.levels[lev].as_mut() {
                ld.coarse_contribution = contribution;
            }
        }
        Ok(())
    }

    fn init_projection(&mut self) -> Result<()> {
        for lev in (self.base_level + 1)..=self.top_level {
            let coarse = GridLevel::level_with_ghosts(lev - 1);
            let fine = GridLevel::level_with_ghosts(lev);
            let ld = level_mut(&mut self.levels, lev);
            ld.projection.set_levels(coarse, fine);
            ld.projection.init(self.assembly.as_ref())?;
        }
        Ok(())
    }

    fn init_smoother(&mut self) -> Result<()> {
        for lev in (self.base_level + 1)..=self.top_level {
            let ld = level_mut(&mut self.levels, lev);
            ld.pre_smoother.init(&ld.matrix, ld.st.data())?;
            if let Some(post) = ld.post_smoother.as_mut() {
                post.init(&ld.matrix, ld.st.data())?;
            }
        }
        Ok(())
    }

    fn init_base_solver(&mut self) -> Result<()> {
        let ld = level_mut(&mut self.levels, self.base_level);
        if ld.d.is_empty() {
            return Ok(());
        }
        let solver = self.base_solver.as_mut().ok_or(GmgError::MissingComponent {
            component: "base solver",
        })?;

        if !self.parallel_base {
            let layout = ld.d.layout().clone();
            if layout.vertical_slave.is_empty() {
                // a distributed base level without vertical interfaces can
                // never be gathered; this depends only on the partitioning
                if !can_gather(&layout) {
                    return Err(GmgError::GatheringImpossible {
                        level: self.base_level,
                    });
                }
                let matrix = self.base_matrix.as_ref().ok_or(GmgError::MissingComponent {
                    component: "gathered base operator",
                })?;
                solver.init(matrix, ld.t.data())?;
            }
            // processes holding only vertical slaves ship their defect away
            // and stay idle during the base solve
        } else {
            solver.init(&ld.matrix, ld.st.data())?;
        }
        Ok(())
    }

    fn init_transfer(&mut self) -> Result<()> {
        let constraints = self.assembly.constraints();
        for lev in (self.base_level + 1)..=self.top_level {
            let coarse = GridLevel::level_with_ghosts(lev - 1);
            let fine = GridLevel::level_with_ghosts(lev);
            let ld = level_mut(&mut self.levels, lev);

            ld.prolongation.set_levels(coarse, fine);
            ld.prolongation.clear_constraints();
            for constraint in &constraints {
                ld.prolongation.add_constraint(constraint.clone());
            }
            ld.prolongation.init(self.assembly.as_ref())?;

            if let Some(restriction) = ld.restriction.as_mut() {
                restriction.set_levels(coarse, fine);
                restriction.clear_constraints();
                for constraint in &constraints {
                    restriction.add_constraint(constraint.clone());
                }
                restriction.init(self.assembly.as_ref())?;
            }

            for pp in ld.prolongation_post.iter_mut() {
                pp.set_levels(fine);
                pp.init()?;
            }
            for pp in ld.restriction_post.iter_mut() {
                pp.set_levels(coarse);
                pp.init()?;
            }
        }
        Ok(())
    }

    /// One multigrid cycle on `lev`, recursing towards the base level.
    fn level_cycle(&mut self, lev: usize, defect: &Array1<f64>) -> Result<()> {
        if lev > self.base_level {
            for _ in 0..self.cycle_type.repeats() {
                level_mut(&mut self.levels, lev).c.set_zero();
                self.presmooth(lev)
                    .map_err(|e| e.at_stage(CycleStage::PreSmooth, lev))?;
                self.restrict_defect(lev, defect)
                    .map_err(|e| e.at_stage(CycleStage::Restrict, lev))?;
                self.level_cycle(lev - 1, defect)?;
                self.prolongate(lev)
                    .map_err(|e| e.at_stage(CycleStage::Prolongate, lev))?;
                self.postsmooth(lev)
                    .map_err(|e| e.at_stage(CycleStage::PostSmooth, lev))?;
            }
            Ok(())
        } else if lev == self.base_level {
            self.base_solve(lev)
                .map_err(|e| e.at_stage(CycleStage::BaseSolve, lev))
        } else {
            unreachable!("cycle scheduled below the base level")
        }
    }

    fn presmooth(&mut self, lev: usize) -> Result<()> {
        log::trace!(target: "gmg", "presmooth on level {lev}");
        let adaptive = self.adaptive;
        let nu = self.num_presmooth;
        let ld = level_mut(&mut self.levels, lev);

        ld.sc.set_zero();
        {
            let LevelData {
                sd,
                d,
                patch_to_ghost,
                ..
            } = &mut *ld;
            copy_ghost_to_noghost(sd, d, patch_to_ghost);
        }

        smooth_level(ld, false, adaptive, nu)?;

        // restriction acts on the whole ghosted vector; merging the patch
        // defect back through a zeroed vector clears the ghost-only entries
        {
            let LevelData {
                d,
                sd,
                patch_to_ghost,
                ..
            } = &mut *ld;
            d.set_zero();
            copy_noghost_to_ghost(d, sd, patch_to_ghost);
        }
        Ok(())
    }

    fn restrict_defect(&mut self, lev: usize, defect: &Array1<f64>) -> Result<()> {
        log::trace!(target: "gmg", "restrict defect from level {lev} to {}", lev - 1);

        // the defect must be additive-unique across vertical interfaces:
        // masters take the gathered sum, slaves are spent
        {
            let ld = level_mut(&mut self.levels, lev);
            if !ld.d.is_empty() {
                gather_vertical(&mut ld.d, self.comm.as_mut())?;
                let layout = ld.d.layout().clone();
                set_layout_values(&mut ld.d, &layout.vertical_slave, 0.0);
            }
        }

        let (lc, lf) = level_pair(&mut self.levels, lev);
        if !lc.d.is_empty() {
            if !lf.d.is_empty() {
                let op: &dyn TransferOperator = match lf.restriction.as_ref() {
                    Some(r) => r.as_ref(),
                    None => lf.prolongation.as_ref(),
                };
                op.do_restrict(lc.d.data_mut(), lf.d.data())?;
            } else {
                lc.d.set_zero();
            }
            lc.d.set_storage(StorageMask::ADDITIVE);
            for pp in &lf.restriction_post {
                pp.post_process(&mut lc.d)?;
            }
        }

        // surface indices resolved on the coarse level keep their own defect
        // on top of the restricted fine contribution
        for (i, li) in self.surf_to_level.iter() {
            if li.level == lev - 1 {
                level_mut(&mut self.levels, lev - 1).d.data_mut()[li.index] += defect[i];
            }
        }
        Ok(())
    }

    fn prolongate(&mut self, lev: usize) -> Result<()> {
        log::trace!(target: "gmg", "prolongate correction from level {} to {lev}", lev - 1);

        // undo the gather so the defect is additive again on the way up
        {
            let ld = level_mut(&mut self.levels, lev);
            if !ld.d.is_empty() {
                broadcast_vertical_add(&mut ld.d, self.comm.as_mut())?;
                let layout = ld.d.layout().clone();
                set_layout_values(&mut ld.d, &layout.vertical_master, 0.0);
            }
        }

        // couplings the level assembly missed update the defect wherever a
        // shadow owns a copy on a finer level
        if self.adaptive {
            let contribution = {
                let lc = level_mut(&mut self.levels, lev - 1);
                lc.t.set_zero();
                if !lc.c.is_empty() && !lc.coarse_contribution.is_empty() {
                    let update = lc.coarse_contribution.matvec(lc.c.data());
                    lc.t.data_mut().assign(&update);
                }
                lc.t.set_storage(StorageMask::ADDITIVE);
                lc.t.data().clone()
            };
            project_shadow_defect(
                &mut self.levels,
                self.surf_to_level.shadow_links(),
                lev - 1,
                &contribution,
                -1.0,
            );
        }

        let (lc, lf) = level_pair(&mut self.levels, lev);
        {
            let LevelData {
                sd,
                d,
                patch_to_ghost,
                ..
            } = &mut *lf;
            copy_ghost_to_noghost(sd, d, patch_to_ghost);
        }

        lf.prolongation.prolongate(lf.t.data_mut(), lc.c.data())?;
        for pp in &lf.prolongation_post {
            pp.post_process(&mut lf.t)?;
        }
        broadcast_vertical(&mut lf.t, self.comm.as_mut())?;

        {
            let LevelData {
                st,
                t,
                sc,
                sd,
                matrix,
                patch_to_ghost,
                ..
            } = &mut *lf;
            copy_ghost_to_noghost(st, t, patch_to_ghost);
            if !sc.is_empty() {
                sc.add_assign(st);
            }
            // the correction changed, keep the patch defect in sync
            if !sd.is_empty() {
                matrix.apply_sub(sd.data_mut(), st.data());
            }
        }
        Ok(())
    }

    fn postsmooth(&mut self, lev: usize) -> Result<()> {
        log::trace!(target: "gmg", "postsmooth on level {lev}");
        let adaptive = self.adaptive;
        let nu = self.num_postsmooth;
        let ld = level_mut(&mut self.levels, lev);

        smooth_level(ld, true, adaptive, nu)?;

        let LevelData {
            c,
            d,
            sc,
            sd,
            patch_to_ghost,
            ..
        } = &mut *ld;
        copy_noghost_to_ghost(d, sd, patch_to_ghost);
        copy_noghost_to_ghost(c, sc, patch_to_ghost);
        Ok(())
    }

    fn base_solve(&mut self, lev: usize) -> Result<()> {
        log::trace!(target: "gmg", "base solve on level {lev}");
        let update_defect = self.base_level == self.top_level || self.adaptive;
        let ld = level_mut(&mut self.levels, lev);
        let layout = ld.d.layout().clone();
        let solver = self.base_solver.as_mut().ok_or(GmgError::MissingComponent {
            component: "base solver",
        })?;

        let distributed = self.parallel_base || !layout.has_vertical();
        if distributed {
            if ld.d.is_empty() {
                return Ok(());
            }
            {
                let LevelData {
                    sd,
                    d,
                    patch_to_ghost,
                    ..
                } = &mut *ld;
                copy_ghost_to_noghost(sd, d, patch_to_ghost);
            }
            ld.sc.set_zero();
            solver.apply(ld.sc.data_mut(), ld.sd.data())?;

            // above the base level only the correction travels on; the
            // defect matters again when the base is the surface or the grid
            // is adaptive
            if update_defect {
                {
                    let LevelData { matrix, sd, sc, .. } = &mut *ld;
                    matrix.apply_sub(sd.data_mut(), sc.data());
                }
                let LevelData {
                    d,
                    sd,
                    patch_to_ghost,
                    ..
                } = &mut *ld;
                d.set_zero();
                copy_noghost_to_ghost(d, sd, patch_to_ghost);
            }
            {
                let LevelData {
                    c,
                    sc,
                    patch_to_ghost,
                    ..
                } = &mut *ld;
                c.set_zero();
                copy_noghost_to_ghost(c, sc, patch_to_ghost);
            }
        } else {
            gather_vertical(&mut ld.d, self.comm.as_mut())?;
            ld.c.set_zero();

            if layout.vertical_slave.is_empty() {
                solver.apply(ld.c.data_mut(), ld.d.data())?;
                if self.base_level == self.top_level {
                    if let Some(base_matrix) = self.base_matrix.as_ref() {
                        base_matrix.apply_sub(ld.d.data_mut(), ld.c.data());
                    }
                }
            }
            // pure-slave processes stay idle with a zero correction

            broadcast_vertical(&mut ld.c, self.comm.as_mut())?;
            ld.c.set_storage(StorageMask::CONSISTENT);

            if self.base_level == self.top_level {
                ld.d.set_storage(StorageMask::CONSISTENT);
                broadcast_vertical(&mut ld.d, self.comm.as_mut())?;
                consistent_to_additive(&mut ld.d);
            }
        }
        Ok(())
    }
}

impl fmt::Display for GeometricMultigrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GeometricMultigrid ({})", self.cycle_type)?;
        writeln!(
            f,
            "  Smoother ({}x pre, {}x post)",
            self.num_presmooth, self.num_postsmooth
        )?;
        write!(
            f,
            "  Basesolver (Baselevel = {}, parallel = {})",
            self.base_level, self.parallel_base
        )
    }
}
