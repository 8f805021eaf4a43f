//! Synthetic 1-D chain hierarchies implementing the collaborator contracts.
//!
//! The fixture discretizes `-u'' = f` on the unit interval with homogeneous
//! Dirichlet ends using linear finite elements, which keeps every matrix and
//! transfer stencil small enough to verify by hand. Three shapes are
//! available: a fully refined hierarchy, the same hierarchy with a ghost-only
//! padding dof on the top level (engaging the adaptive code path without any
//! hanging nodes), and a genuinely adaptive two-level chain where only the
//! rightmost element is refined.

use crate::error::{GmgError, Result};
use crate::grid_level::{GridLevel, GridLevelKind};
use crate::parallel::layout::ParallelLayout;
use crate::sparse::{CsrBuilder, CsrMatrix};
use crate::traits::{
    ApproximationSpace, Assembly, ElementId, ElementMarker, EntityId, PatchEntity, SurfaceEntity,
    TransferKind,
};
use ndarray::Array1;
use std::sync::Arc;

/// Synthetic 1-D chain hierarchy.
#[derive(Debug, Clone)]
pub struct ChainHierarchy {
    /// Interior unknowns per level, coarse to fine.
    level_unknowns: Vec<usize>,
    /// Whether the rightmost-element-only refinement shape is active.
    adaptive: bool,
    /// Extra ghost-only dofs appended to the top level's ghosted distribution.
    top_ghost_pad: usize,
    /// Deliberately report a wrong per-entity index count (for error tests).
    corrupt_entity: bool,
    serial_layout: Arc<ParallelLayout>,
}

impl ChainHierarchy {
    /// Fully refined hierarchy: `num_levels` levels, `m` interior unknowns on
    /// the coarsest; each refinement halves the mesh width.
    pub fn full_refinement(num_levels: usize, m: usize) -> Self {
        let level_unknowns = (0..num_levels)
            .map(|l| (1usize << l) * (m + 1) - 1)
            .collect();
        Self {
            level_unknowns,
            adaptive: false,
            top_ghost_pad: 0,
            corrupt_entity: false,
            serial_layout: ParallelLayout::serial(),
        }
    }

    /// Two-level chain with `m` coarse interior unknowns where only the
    /// rightmost element is refined. The coarse node shared with the refined
    /// element is a shadow with a copy on the fine level.
    pub fn adaptive(m: usize) -> Self {
        assert!(m >= 2, "adaptive chain needs at least two coarse unknowns");
        Self {
            // fine level holds the shadow-copy and the new midpoint
            level_unknowns: vec![m, 2],
            adaptive: true,
            top_ghost_pad: 0,
            corrupt_entity: false,
            serial_layout: ParallelLayout::serial(),
        }
    }

    /// Append one ghost-only dof to the top level's ghosted distribution.
    ///
    /// The dof belongs to no surface entity and no patch entity, so the
    /// surface and top-level counts diverge and the engine takes the
    /// adaptive path even though there are no hanging nodes.
    pub fn with_top_ghost_pad(mut self) -> Self {
        self.top_ghost_pad = 1;
        self
    }

    /// Make one surface entity report a wrong level index count.
    pub fn corrupt_surface_entity(&mut self) {
        self.corrupt_entity = true;
    }

    /// Interior unknowns of a level's patch distribution.
    pub fn unknowns_on_level(&self, level: usize) -> usize {
        self.level_unknowns[level]
    }

    fn top(&self) -> usize {
        self.level_unknowns.len() - 1
    }

    /// Mesh width on a level of the fully refined shape.
    fn spacing(&self, level: usize) -> f64 {
        1.0 / (self.level_unknowns[level] as f64 + 1.0)
    }

    fn num_surface_dofs(&self) -> usize {
        if self.adaptive {
            // coarse-only unknowns + shadow node + midpoint
            self.level_unknowns[0] + 1
        } else {
            self.level_unknowns[self.top()]
        }
    }

    /// Tridiagonal stiffness matrix of an `n`-unknown uniform chain with mesh
    /// width `h`.
    fn chain_matrix(n: usize, h: f64, pad: usize) -> CsrMatrix {
        let total = n + pad;
        let mut b = CsrBuilder::new(total, total);
        for i in 0..n {
            let mut row = Vec::new();
            if i > 0 {
                row.push((i - 1, -1.0 / h));
            }
            row.push((i, 2.0 / h));
            if i + 1 < n {
                row.push((i + 1, -1.0 / h));
            }
            b.add_row_entries(row.into_iter());
        }
        for i in n..total {
            b.add_row_entries([(i, 1.0)].into_iter());
        }
        b.finish()
    }

    /// Surface elements of the adaptive shape: unrefined coarse intervals
    /// `0..m` (element `j` spans coarse nodes `j..j+1`), then the two
    /// children of the refined rightmost interval.
    fn adaptive_surface_elements(&self) -> Vec<(ElementId, [Option<usize>; 2], f64)> {
        let m = self.level_unknowns[0];
        let h = 1.0 / (m as f64 + 1.0);
        let mut elements = Vec::new();
        // unrefined intervals; surface dof of coarse node j is j-1
        for j in 0..m {
            let left = j.checked_sub(1);
            let right = Some(j);
            elements.push((j, [left, right], h));
        }
        // children of the refined interval [m, m+1]; surface dofs: shadow
        // node is m-1, midpoint is m, right end is the Dirichlet boundary
        elements.push((m, [Some(m - 1), Some(m)], h / 2.0));
        elements.push((m + 1, [Some(m), None], h / 2.0));
        elements
    }

    /// Surface elements of the fully refined shape: the `n+1` intervals of
    /// the finest level.
    fn full_surface_elements(&self) -> Vec<(ElementId, [Option<usize>; 2], f64)> {
        let n = self.level_unknowns[self.top()];
        let h = self.spacing(self.top());
        (0..n + 1)
            .map(|j| {
                let left = j.checked_sub(1);
                let right = if j < n { Some(j) } else { None };
                (j, [left, right], h)
            })
            .collect()
    }

    fn surface_elements(&self) -> Vec<(ElementId, [Option<usize>; 2], f64)> {
        if self.adaptive {
            self.adaptive_surface_elements()
        } else {
            self.full_surface_elements()
        }
    }

    fn assemble_surface(&self, marker: Option<&ElementMarker>) -> CsrMatrix {
        let n = self.num_surface_dofs();
        let mut triplets = Vec::new();
        for (id, dofs, len) in self.surface_elements() {
            if let Some(marker) = marker {
                if !marker.is_marked(id) {
                    continue;
                }
            }
            let k = 1.0 / len;
            if let Some(l) = dofs[0] {
                triplets.push((l, l, k));
            }
            if let Some(r) = dofs[1] {
                triplets.push((r, r, k));
            }
            if let (Some(l), Some(r)) = (dofs[0], dofs[1]) {
                triplets.push((l, r, -k));
                triplets.push((r, l, -k));
            }
        }
        CsrMatrix::from_triplets(n, n, triplets)
    }
}

impl ApproximationSpace for ChainHierarchy {
    fn num_levels(&self) -> usize {
        self.level_unknowns.len()
    }

    fn num_indices(&self, gl: GridLevel) -> usize {
        match gl.kind() {
            GridLevelKind::Surface => self.num_surface_dofs(),
            GridLevelKind::Top => self.level_unknowns[self.top()] + self.top_ghost_pad,
            GridLevelKind::Level(lev) => {
                let pad = if gl.ghosts() && lev == self.top() {
                    self.top_ghost_pad
                } else {
                    0
                };
                self.level_unknowns[lev] + pad
            }
        }
    }

    fn parallel_layout(&self, _gl: GridLevel) -> Arc<ParallelLayout> {
        self.serial_layout.clone()
    }

    fn surface_entities(&self) -> Vec<SurfaceEntity> {
        let mut entities = Vec::new();
        if self.adaptive {
            let m = self.level_unknowns[0];
            // coarse-only nodes
            for j in 0..m - 1 {
                entities.push(SurfaceEntity {
                    surface_indices: vec![j],
                    level_representations: vec![(0, vec![j])],
                });
            }
            // the shadow node exists on both levels; the fine copy wins
            entities.push(SurfaceEntity {
                surface_indices: vec![m - 1],
                level_representations: vec![(0, vec![m - 1]), (1, vec![0])],
            });
            // the new midpoint
            entities.push(SurfaceEntity {
                surface_indices: vec![m],
                level_representations: vec![(1, vec![1])],
            });
        } else {
            let top = self.top();
            for i in 0..self.level_unknowns[top] {
                entities.push(SurfaceEntity {
                    surface_indices: vec![i],
                    level_representations: vec![(top, vec![i])],
                });
            }
        }
        if self.corrupt_entity {
            if let Some(entity) = entities.last_mut() {
                entity.level_representations[0].1.push(usize::MAX);
            }
        }
        entities
    }

    fn patch_entities(&self, level: usize) -> Vec<PatchEntity> {
        (0..self.level_unknowns[level])
            .map(|i| PatchEntity {
                patch_indices: vec![i],
                ghost_indices: vec![i],
            })
            .collect()
    }

    fn shadowed_patch_indices(&self, level: usize) -> Vec<usize> {
        if self.adaptive && level == 1 {
            // the shadow-copy of the coarse boundary node
            vec![0]
        } else {
            Vec::new()
        }
    }

    fn shadow_entities(&self, level: usize) -> Vec<EntityId> {
        if self.adaptive && level == 0 {
            vec![self.level_unknowns[0] - 1]
        } else {
            Vec::new()
        }
    }

    fn adjacent_surface_elements(&self, entity: EntityId) -> Vec<ElementId> {
        if !self.adaptive {
            return Vec::new();
        }
        let m = self.level_unknowns[0];
        if entity == m - 1 {
            // the unrefined interval to its left and the first child
            vec![m - 1, m]
        } else {
            Vec::new()
        }
    }

    fn is_shadow_descendant(&self, elem: ElementId) -> bool {
        if !self.adaptive {
            return false;
        }
        let m = self.level_unknowns[0];
        elem >= m
    }

    fn num_surface_elements(&self) -> usize {
        self.surface_elements().len()
    }
}

impl Assembly for ChainHierarchy {
    fn assemble_jacobian(
        &self,
        gl: GridLevel,
        _solution: Option<&Array1<f64>>,
        marker: Option<&ElementMarker>,
    ) -> Result<CsrMatrix> {
        match gl.kind() {
            GridLevelKind::Surface => Ok(self.assemble_surface(marker)),
            kind => {
                let lev = match kind {
                    GridLevelKind::Level(lev) => lev,
                    _ => self.top(),
                };
                let n = self.level_unknowns[lev];
                let pad = if gl.ghosts() && lev == self.top() {
                    self.top_ghost_pad
                } else {
                    0
                };
                if self.adaptive && lev == 1 {
                    // level-local assembly over the two children only: the
                    // coupling of the shadow-copy to its left coarse
                    // neighbor is deliberately absent
                    let h = self.spacing(0) / 2.0;
                    let k = 1.0 / h;
                    Ok(CsrMatrix::from_triplets(
                        2,
                        2,
                        vec![(0, 0, k), (0, 1, -k), (1, 0, -k), (1, 1, 2.0 * k)],
                    ))
                } else {
                    Ok(Self::chain_matrix(n, self.spacing(lev), pad))
                }
            }
        }
    }

    fn assemble_transfer(
        &self,
        coarse: GridLevel,
        fine: GridLevel,
        kind: TransferKind,
    ) -> Result<CsrMatrix> {
        let (cl, fl) = match (coarse.kind(), fine.kind()) {
            (GridLevelKind::Level(c), GridLevelKind::Level(f)) => (c, f),
            _ => {
                return Err(GmgError::MissingComponent {
                    component: "transfer level pair",
                })
            }
        };
        let n_coarse = self.level_unknowns[cl];
        let n_fine = self.level_unknowns[fl];
        let fine_pad = if fl == self.top() { self.top_ghost_pad } else { 0 };

        let mut triplets = Vec::new();
        if self.adaptive {
            // fine dof 0 coincides with coarse node m; fine dof 1 is the
            // midpoint between coarse node m and the Dirichlet end
            triplets.push((0, n_coarse - 1, 1.0));
            if kind == TransferKind::Interpolation {
                triplets.push((1, n_coarse - 1, 0.5));
            }
        } else {
            for c in 0..n_coarse {
                // coincident node
                triplets.push((2 * c + 1, c, 1.0));
                if kind == TransferKind::Interpolation {
                    // midpoints to either side
                    triplets.push((2 * c, c, 0.5));
                    triplets.push((2 * c + 2, c, 0.5));
                }
            }
        }
        Ok(CsrMatrix::from_triplets(
            n_fine + fine_pad,
            n_coarse,
            triplets,
        ))
    }
}
