//! Adaptive coupling repair.
//!
//! On adaptively refined grids, level-local assembly omits the stiffness
//! coupling between shadow degrees of freedom and adjacent non-shadow
//! degrees of freedom on the same level. This module selects the affected
//! elements, assembles a surface Jacobian restricted to them, projects it
//! into per-level coordinates, and applies the resulting contribution to the
//! defect during prolongation.

use crate::error::Result;
use crate::grid_level::GridLevel;
use crate::index_map::{per_level_surface_maps, ShadowLink};
use crate::level_data::LevelData;
use crate::sparse::CsrMatrix;
use crate::traits::{ApproximationSpace, Assembly, ElementMarker};
use ndarray::Array1;

/// Mark every surface element that touches a shadow entity on `level` but is
/// not itself a descendant of one.
pub fn select_coupling_elements(space: &dyn ApproximationSpace, level: usize) -> ElementMarker {
    let mut marker = ElementMarker::new(space.num_surface_elements());
    for shadow in space.shadow_entities(level) {
        for elem in space.adjacent_surface_elements(shadow) {
            if !space.is_shadow_descendant(elem) {
                marker.mark(elem);
            }
        }
    }
    marker
}

/// Project a surface-assembled matrix into level coordinates.
///
/// Couplings where either endpoint has no representation on the level are
/// dropped; they are carried by the inter-level transfer instead.
pub fn surface_matrix_to_level(
    surf: &CsrMatrix,
    surf_to_level: &[Option<usize>],
    num_level_indices: usize,
) -> CsrMatrix {
    let mut triplets = Vec::new();
    for i in 0..surf.num_rows {
        let Some(li) = surf_to_level[i] else { continue };
        for (j, v) in surf.row_entries(i) {
            if let Some(lj) = surf_to_level[j] {
                triplets.push((li, lj, v));
            }
        }
    }
    CsrMatrix::from_triplets(num_level_indices, num_level_indices, triplets)
}

/// Rebuild the per-level coarse-grid contribution matrices.
///
/// On a fully refined grid all contributions are cleared to `0 x 0`; the
/// correction is then a no-op, not merely small.
pub fn rebuild_contributions(
    space: &dyn ApproximationSpace,
    assembly: &dyn Assembly,
    solution: Option<&Array1<f64>>,
    adaptive: bool,
    num_levels: usize,
) -> Result<Vec<CsrMatrix>> {
    if !adaptive {
        log::debug!(target: "gmg", "coarse-grid coupling: grid fully refined, contributions cleared");
        return Ok(vec![CsrMatrix::default(); num_levels]);
    }

    let surf_maps = per_level_surface_maps(space, num_levels)?;
    let mut contributions = Vec::with_capacity(num_levels);

    for lev in 0..num_levels {
        let marker = select_coupling_elements(space, lev);
        log::debug!(target: "gmg",
            "coarse-grid coupling on level {lev}: {} elements selected", marker.count());

        let surf_mat = assembly.assemble_jacobian(GridLevel::surface(), solution, Some(&marker))?;
        let n_level = space.num_indices(GridLevel::level_with_ghosts(lev));
        contributions.push(surface_matrix_to_level(&surf_mat, &surf_maps[lev], n_level));
    }

    Ok(contributions)
}

/// Add `scale * src` into the shadowing copies on finer levels.
///
/// For every shadow on `src_level`, the value of `src` at the shadow is
/// scattered into the ghosted defect of the level holding its shadow-copy.
pub fn project_shadow_defect(
    levels: &mut [Option<LevelData>],
    links: &[ShadowLink],
    src_level: usize,
    src: &Array1<f64>,
    scale: f64,
) {
    for link in links {
        if link.coarse_level != src_level {
            continue;
        }
        if let Some(ld) = levels[link.fine_level].as_mut() {
            ld.d.data_mut()[link.fine_index] += scale * src[link.coarse_index];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ChainHierarchy;
    use approx::assert_relative_eq;

    #[test]
    fn test_selection_marks_neighbors_not_descendants() {
        let space = ChainHierarchy::adaptive(3);
        let marker = select_coupling_elements(&space, 0);
        // only the unrefined interval left of the shadow node qualifies
        assert_eq!(marker.count(), 1);
        assert!(marker.is_marked(2));

        // no shadows live on the fine level
        let marker = select_coupling_elements(&space, 1);
        assert_eq!(marker.count(), 0);
    }

    #[test]
    fn test_contribution_carries_missing_coupling() {
        let space = ChainHierarchy::adaptive(3);
        let contributions = rebuild_contributions(&space, &space, None, true, 2).unwrap();

        // on the coarse level the selected element couples the shadow node
        // (level index 2) to its left neighbor (level index 1) with the
        // coarse mesh width
        let h = 1.0 / 4.0;
        let c0 = &contributions[0];
        assert_eq!(c0.num_rows, 3);
        let row: Vec<_> = c0.row_entries(2).collect();
        assert_eq!(row, vec![(1, -1.0 / h), (2, 1.0 / h)]);

        // nothing selected on the fine level
        assert_eq!(contributions[1].nnz(), 0);
    }

    #[test]
    fn test_full_refinement_clears_contributions() {
        let space = ChainHierarchy::full_refinement(2, 3);
        let contributions = rebuild_contributions(&space, &space, None, false, 2).unwrap();
        assert!(contributions.iter().all(|c| c.is_empty()));
    }

    #[test]
    fn test_surface_matrix_projection_drops_unrepresented() {
        let surf = CsrMatrix::from_triplets(
            3,
            3,
            vec![(0, 0, 2.0), (0, 1, -1.0), (1, 1, 2.0), (2, 2, 2.0)],
        );
        let map = vec![Some(1), None, Some(0)];
        let level = surface_matrix_to_level(&surf, &map, 2);
        assert_relative_eq!(level.row_entries(1).next().unwrap().1, 2.0);
        // the coupling (0,1) vanished with its unrepresented endpoint
        assert_eq!(level.nnz(), 2);
    }
}
