//! Grid-level identifiers used as lookup keys towards the discretization.

use std::fmt;

/// Which representation of the mesh a [`GridLevel`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridLevelKind {
    /// One regular refinement level of the hierarchy (0 = coarsest).
    Level(usize),
    /// The surface grid composed of the finest existing elements.
    Surface,
    /// The topmost regular level, whatever its index currently is.
    Top,
}

/// Identifies a grid level together with its ghost-inclusion flag.
///
/// Immutable value; used as a key when asking the discretization for
/// degree-of-freedom counts, matrices and parallel layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridLevel {
    kind: GridLevelKind,
    ghosts: bool,
}

impl GridLevel {
    /// A regular level without ghost overlap (the smoothing patch).
    pub fn level(level: usize) -> Self {
        Self {
            kind: GridLevelKind::Level(level),
            ghosts: false,
        }
    }

    /// A regular level including the ghost overlap.
    pub fn level_with_ghosts(level: usize) -> Self {
        Self {
            kind: GridLevelKind::Level(level),
            ghosts: true,
        }
    }

    /// The surface grid.
    pub fn surface() -> Self {
        Self {
            kind: GridLevelKind::Surface,
            ghosts: false,
        }
    }

    /// The topmost regular level (ghost-inclusive).
    pub fn top() -> Self {
        Self {
            kind: GridLevelKind::Top,
            ghosts: true,
        }
    }

    /// The kind of grid this level refers to.
    pub fn kind(&self) -> GridLevelKind {
        self.kind
    }

    /// The level index, if this refers to a regular level.
    pub fn index(&self) -> Option<usize> {
        match self.kind {
            GridLevelKind::Level(lev) => Some(lev),
            _ => None,
        }
    }

    /// Whether the ghost overlap is included.
    pub fn ghosts(&self) -> bool {
        self.ghosts
    }

    /// Whether this refers to the surface grid.
    pub fn is_surface(&self) -> bool {
        matches!(self.kind, GridLevelKind::Surface)
    }
}

impl fmt::Display for GridLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            GridLevelKind::Level(lev) if self.ghosts => write!(f, "gl{lev}"),
            GridLevelKind::Level(lev) => write!(f, "l{lev}"),
            GridLevelKind::Surface => f.write_str("surf"),
            GridLevelKind::Top => f.write_str("top"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_accessors() {
        let gl = GridLevel::level_with_ghosts(3);
        assert_eq!(gl.index(), Some(3));
        assert!(gl.ghosts());
        assert!(!gl.is_surface());

        let surf = GridLevel::surface();
        assert_eq!(surf.index(), None);
        assert!(surf.is_surface());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(GridLevel::level(2).to_string(), "l2");
        assert_eq!(GridLevel::level_with_ghosts(2).to_string(), "gl2");
        assert_eq!(GridLevel::surface().to_string(), "surf");
    }
}
