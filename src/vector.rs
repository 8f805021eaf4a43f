//! Level vectors with an explicit parallel storage state.

use crate::parallel::layout::ParallelLayout;
use ndarray::Array1;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

/// Parallel storage state of a vector's shared-interface values.
///
/// `ADDITIVE` means values at shared degrees of freedom are partial sums that
/// still need combination; `CONSISTENT` means every copy already holds the
/// agreed-upon value. A zeroed vector is both at once. The default is
/// undefined (no bits set).
///
/// Every communication primitive has a precondition on the input state and a
/// postcondition on the output state; violating one is a programming error,
/// not a recoverable runtime condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageMask(u8);

impl StorageMask {
    /// No storage state established yet.
    pub const UNDEFINED: StorageMask = StorageMask(0);
    /// Shared values are the single agreed-upon value.
    pub const CONSISTENT: StorageMask = StorageMask(1);
    /// Shared values are partial sums.
    pub const ADDITIVE: StorageMask = StorageMask(2);

    /// Whether all bits of `other` are contained in this mask.
    pub fn contains(&self, other: StorageMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no state has been established.
    pub fn is_undefined(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for StorageMask {
    type Output = StorageMask;
    fn bitor(self, rhs: StorageMask) -> StorageMask {
        StorageMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for StorageMask {
    fn bitor_assign(&mut self, rhs: StorageMask) {
        self.0 |= rhs.0;
    }
}

/// A per-level vector: payload, storage state and the parallel layout of the
/// DoF distribution it lives on.
#[derive(Debug, Clone)]
pub struct LevelVector {
    data: Array1<f64>,
    storage: StorageMask,
    layout: Arc<ParallelLayout>,
}

impl LevelVector {
    /// Allocate a zeroed vector of length `len` on the given layout.
    pub fn new(len: usize, layout: Arc<ParallelLayout>) -> Self {
        Self {
            data: Array1::zeros(len),
            storage: StorageMask::UNDEFINED,
            layout,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the vector has no entries (a void level on this process).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The payload.
    pub fn data(&self) -> &Array1<f64> {
        &self.data
    }

    /// Mutable payload access. The storage state is the caller's business.
    pub fn data_mut(&mut self) -> &mut Array1<f64> {
        &mut self.data
    }

    /// The parallel layout of the underlying distribution.
    pub fn layout(&self) -> &Arc<ParallelLayout> {
        &self.layout
    }

    /// Current storage state.
    pub fn storage(&self) -> StorageMask {
        self.storage
    }

    /// Overwrite the storage state.
    pub fn set_storage(&mut self, mask: StorageMask) {
        self.storage = mask;
    }

    /// Set every entry to zero. A zero vector is simultaneously additive and
    /// consistent.
    pub fn set_zero(&mut self) {
        self.data.fill(0.0);
        self.storage = StorageMask::ADDITIVE | StorageMask::CONSISTENT;
    }

    /// Add another vector's payload entry-wise.
    pub fn add_assign(&mut self, other: &LevelVector) {
        debug_assert_eq!(self.len(), other.len());
        self.data += &other.data;
    }
}
