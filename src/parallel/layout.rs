//! Interface sets describing how local indices overlap with other processes.
//!
//! Each layout is a set of directional interfaces; an interface lists the
//! local indices shared with one peer process, in the order both sides agreed
//! on. Vertical interfaces connect copies of the same degree of freedom
//! between the gathering process and its sources; horizontal interfaces
//! connect partition-boundary copies on the same level.

use std::sync::Arc;

/// The indices shared with a single peer process.
#[derive(Debug, Clone, Default)]
pub struct IndexInterface {
    /// Rank of the peer process.
    pub peer: usize,
    /// Local indices, in interface order.
    pub indices: Vec<usize>,
}

/// A set of interfaces of one direction (e.g. all vertical-slave interfaces).
#[derive(Debug, Clone, Default)]
pub struct IndexLayout {
    /// One entry per peer process.
    pub interfaces: Vec<IndexInterface>,
}

impl IndexLayout {
    /// Whether this layout has no interfaces at all.
    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Number of interfaces (peer processes).
    pub fn num_interfaces(&self) -> usize {
        self.interfaces.len()
    }

    /// Count how often each local index occurs across the interfaces.
    ///
    /// Returns `None` when no index occurs more than once; otherwise the
    /// per-index occurrence counts, sized `len`.
    pub fn occurrence_counts(&self, len: usize) -> Option<Vec<f64>> {
        if self.num_interfaces() <= 1 {
            return None;
        }
        let mut occurrence = vec![0.0f64; len];
        let mut multi = false;
        for itfc in &self.interfaces {
            for &i in &itfc.indices {
                occurrence[i] += 1.0;
                if occurrence[i] > 1.0 {
                    multi = true;
                }
            }
        }
        multi.then_some(occurrence)
    }
}

/// The full set of directional interface layouts of one DoF distribution.
#[derive(Debug, Clone, Default)]
pub struct ParallelLayout {
    /// Vertical masters: authoritative copies gathered onto this process.
    pub vertical_master: IndexLayout,
    /// Vertical slaves: copies whose authoritative value lives elsewhere.
    pub vertical_slave: IndexLayout,
    /// Horizontal masters on partition boundaries.
    pub horizontal_master: IndexLayout,
    /// Horizontal slaves on partition boundaries.
    pub horizontal_slave: IndexLayout,
}

impl ParallelLayout {
    /// The empty layout of a serial (single-partition) run.
    pub fn serial() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether this distribution has any vertical interfaces.
    pub fn has_vertical(&self) -> bool {
        !self.vertical_master.is_empty() || !self.vertical_slave.is_empty()
    }

    /// Whether this distribution has any horizontal interfaces.
    pub fn has_horizontal(&self) -> bool {
        !self.horizontal_master.is_empty() || !self.horizontal_slave.is_empty()
    }
}

/// Decide whether a gathered base solve is possible on a distribution.
///
/// Gathering pulls all vertical-slave data onto the processes holding the
/// vertical masters. A distribution that is split across processes (it has
/// horizontal interfaces) but exposes no vertical interfaces cannot be
/// gathered; this only depends on the static partitioning.
pub fn can_gather(layout: &ParallelLayout) -> bool {
    !(layout.has_horizontal() && !layout.has_vertical())
}
