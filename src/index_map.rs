//! Index translation between the surface grid, the level hierarchy and the
//! per-level smoothing patches.
//!
//! Both maps are rebuilt from scratch on every engine `init`; a topology
//! change invalidates them entirely and there is no incremental update path.

use crate::error::{GmgError, Result};
use crate::grid_level::GridLevel;
use crate::traits::ApproximationSpace;
use crate::vector::LevelVector;

/// Resolution of one surface index: the level it is represented on and its
/// index within that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelIndex {
    /// Level of the representation.
    pub level: usize,
    /// Index within the level's ghost-inclusive distribution.
    pub index: usize,
}

/// A shadow degree of freedom and its copy on the next finer level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowLink {
    /// Level holding the shadow.
    pub coarse_level: usize,
    /// Index of the shadow within its level.
    pub coarse_index: usize,
    /// Level holding the shadow-copy.
    pub fine_level: usize,
    /// Index of the shadow-copy within its level.
    pub fine_index: usize,
}

/// Surface-index to (level, level-index) translation table.
///
/// One entry per surface degree of freedom. When an entity is represented on
/// more than one level, the finest representation wins: entities are walked
/// in base-to-top order and later writes overwrite earlier ones. The links
/// between consecutive representations are kept as [`ShadowLink`]s for the
/// adaptive defect projection.
#[derive(Debug, Clone, Default)]
pub struct SurfaceToLevelMap {
    entries: Vec<LevelIndex>,
    shadow_links: Vec<ShadowLink>,
}

impl SurfaceToLevelMap {
    /// Build the map from the space's surface entity view.
    ///
    /// Fails when an entity's surface and level index counts disagree, or
    /// when a surface index ends up without any level representation.
    pub fn build(space: &dyn ApproximationSpace) -> Result<Self> {
        let num_surface = space.num_indices(GridLevel::surface());
        let mut entries: Vec<Option<LevelIndex>> = vec![None; num_surface];
        let mut shadow_links = Vec::new();

        for entity in space.surface_entities() {
            let surf = &entity.surface_indices;
            for (level, level_indices) in &entity.level_representations {
                if level_indices.len() != surf.len() {
                    return Err(GmgError::SurfaceIndexMismatch {
                        level: *level,
                        surface_len: surf.len(),
                        level_len: level_indices.len(),
                    });
                }
                for (&s, &l) in surf.iter().zip(level_indices) {
                    entries[s] = Some(LevelIndex {
                        level: *level,
                        index: l,
                    });
                }
            }

            for pair in entity.level_representations.windows(2) {
                let (coarse_level, ref coarse_indices) = pair[0];
                let (fine_level, ref fine_indices) = pair[1];
                for (&ci, &fi) in coarse_indices.iter().zip(fine_indices) {
                    shadow_links.push(ShadowLink {
                        coarse_level,
                        coarse_index: ci,
                        fine_level,
                        fine_index: fi,
                    });
                }
            }
        }

        let entries = entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| e.ok_or(GmgError::UnmappedSurfaceIndex { index: i }))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            entries,
            shadow_links,
        })
    }

    /// Number of surface degrees of freedom covered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolution of surface index `i`.
    pub fn get(&self, i: usize) -> LevelIndex {
        self.entries[i]
    }

    /// Iterate over `(surface_index, LevelIndex)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, LevelIndex)> + '_ {
        self.entries.iter().copied().enumerate()
    }

    /// The shadow/shadow-copy links between consecutive representations.
    pub fn shadow_links(&self) -> &[ShadowLink] {
        &self.shadow_links
    }

    /// The coarsest level any surface index resolves to.
    pub fn min_level(&self) -> Option<usize> {
        self.entries.iter().map(|e| e.level).min()
    }
}

/// Build the patch-to-ghost map of a level: for every index of the no-ghost
/// (smoothing patch) distribution, its index in the ghost-inclusive
/// distribution of the same level.
///
/// Fails when per-entity counts mismatch (the two distributions disagree
/// about which entities they cover) or when a patch index is left uncovered.
pub fn build_patch_to_ghost_map(
    space: &dyn ApproximationSpace,
    level: usize,
) -> Result<Vec<usize>> {
    let num_patch = space.num_indices(GridLevel::level(level));
    let mut map: Vec<Option<usize>> = vec![None; num_patch];

    for entity in space.patch_entities(level) {
        if entity.ghost_indices.len() != entity.patch_indices.len() {
            return Err(GmgError::PatchIndexMismatch {
                level,
                patch_len: entity.patch_indices.len(),
                ghost_len: entity.ghost_indices.len(),
            });
        }
        for (&p, &g) in entity.patch_indices.iter().zip(&entity.ghost_indices) {
            map[p] = Some(g);
        }
    }

    map.into_iter()
        .enumerate()
        .map(|(i, g)| g.ok_or(GmgError::UnmappedPatchIndex { level, index: i }))
        .collect()
}

/// Copy ghosted values onto the patch: `dst[i] = src[map[i]]`.
///
/// The storage state travels with the values.
pub fn copy_ghost_to_noghost(dst: &mut LevelVector, src: &LevelVector, map: &[usize]) {
    debug_assert_eq!(map.len(), dst.len());
    let storage = src.storage();
    let data = dst.data_mut();
    for (i, &g) in map.iter().enumerate() {
        data[i] = src.data()[g];
    }
    dst.set_storage(storage);
}

/// Scatter patch values back into the ghosted vector: `dst[map[i]] = src[i]`.
///
/// Entries of `dst` outside the map keep their current values; callers zero
/// the vector first when ghost-only entries must vanish.
pub fn copy_noghost_to_ghost(dst: &mut LevelVector, src: &LevelVector, map: &[usize]) {
    debug_assert_eq!(map.len(), src.len());
    let storage = src.storage();
    let data = dst.data_mut();
    for (i, &g) in map.iter().enumerate() {
        data[g] = src.data()[i];
    }
    dst.set_storage(storage);
}

/// Per-level surface maps used for projecting surface-assembled matrices:
/// for each level, `map[surface_index] = Some(level_index)` wherever the
/// surface entity has a representation on that level.
pub fn per_level_surface_maps(
    space: &dyn ApproximationSpace,
    num_levels: usize,
) -> Result<Vec<Vec<Option<usize>>>> {
    let num_surface = space.num_indices(GridLevel::surface());
    let mut maps = vec![vec![None; num_surface]; num_levels];

    for entity in space.surface_entities() {
        let surf = &entity.surface_indices;
        for (level, level_indices) in &entity.level_representations {
            if level_indices.len() != surf.len() {
                return Err(GmgError::SurfaceIndexMismatch {
                    level: *level,
                    surface_len: surf.len(),
                    level_len: level_indices.len(),
                });
            }
            for (&s, &l) in surf.iter().zip(level_indices) {
                maps[*level][s] = Some(l);
            }
        }
    }

    Ok(maps)
}
