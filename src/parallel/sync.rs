//! Vertical gather/broadcast primitives keeping level vectors coherent
//! across partitions.
//!
//! All primitives are collective and blocking; ranks without matching
//! interfaces participate with empty send/receive sets, so the same call
//! sites work unchanged in serial runs.

use crate::error::{GmgError, Result};
use crate::parallel::comm::Communicator;
use crate::parallel::layout::IndexLayout;
use crate::vector::{LevelVector, StorageMask};
use std::collections::HashMap;
use std::collections::VecDeque;

/// Set the entries of all interfaces in `layout` to `value`.
pub fn set_layout_values(v: &mut LevelVector, layout: &IndexLayout, value: f64) {
    let data = v.data_mut();
    for itfc in &layout.interfaces {
        for &i in &itfc.indices {
            data[i] = value;
        }
    }
}

/// Build one outgoing block per interface, scaling each entry by the inverse
/// of its occurrence count when an index is claimed by several peers.
fn outgoing_blocks(
    v: &LevelVector,
    layout: &IndexLayout,
    occurrence: Option<&Vec<f64>>,
) -> Vec<(usize, Vec<f64>)> {
    layout
        .interfaces
        .iter()
        .map(|itfc| {
            let block = itfc
                .indices
                .iter()
                .map(|&i| match occurrence {
                    Some(occ) if occ[i] > 1.0 => v.data()[i] / occ[i],
                    _ => v.data()[i],
                })
                .collect();
            (itfc.peer, block)
        })
        .collect()
}

/// Distribute received blocks back onto interface entries.
///
/// `add` selects accumulate vs overwrite semantics. Blocks are matched to
/// interfaces per peer in FIFO order.
fn scatter_blocks(
    v: &mut LevelVector,
    layout: &IndexLayout,
    received: Vec<(usize, Vec<f64>)>,
    add: bool,
) -> Result<()> {
    let mut per_peer: HashMap<usize, VecDeque<Vec<f64>>> = HashMap::new();
    for (peer, block) in received {
        per_peer.entry(peer).or_default().push_back(block);
    }

    for itfc in &layout.interfaces {
        let block = per_peer
            .get_mut(&itfc.peer)
            .and_then(|q| q.pop_front())
            .ok_or_else(|| GmgError::CommFailure {
                detail: format!("missing interface block from peer {}", itfc.peer),
            })?;
        if block.len() != itfc.indices.len() {
            return Err(GmgError::DimensionMismatch {
                expected: itfc.indices.len(),
                got: block.len(),
            });
        }
        let data = v.data_mut();
        for (&i, &val) in itfc.indices.iter().zip(&block) {
            if add {
                data[i] += val;
            } else {
                data[i] = val;
            }
        }
    }
    Ok(())
}

fn recv_peers(layout: &IndexLayout) -> Vec<usize> {
    layout.interfaces.iter().map(|itfc| itfc.peer).collect()
}

/// Gather vertical-slave values onto the vertical masters, additively.
///
/// A slave claimed by several masters sends only the matching fraction to
/// each, so the sum across masters reconstructs the original additive total.
/// Precondition: `v` is additive. Postcondition: masters hold the gathered
/// sum; the caller zeroes the slave entries to make the state additive-unique.
pub fn gather_vertical(v: &mut LevelVector, comm: &mut dyn Communicator) -> Result<()> {
    let layout = v.layout().clone();
    log::trace!(target: "gmg", "gather_vertical: {} slave / {} master interfaces",
        layout.vertical_slave.num_interfaces(), layout.vertical_master.num_interfaces());

    let occurrence = layout.vertical_slave.occurrence_counts(v.len());
    let sends = outgoing_blocks(v, &layout.vertical_slave, occurrence.as_ref());
    let received = comm.exchange(sends, &recv_peers(&layout.vertical_master))?;
    scatter_blocks(v, &layout.vertical_master, received, true)
}

/// Broadcast vertical-master values to the vertical slaves (overwrite).
///
/// Used to distribute a consistent value such as a correction.
pub fn broadcast_vertical(v: &mut LevelVector, comm: &mut dyn Communicator) -> Result<()> {
    let layout = v.layout().clone();
    log::trace!(target: "gmg", "broadcast_vertical: {} master / {} slave interfaces",
        layout.vertical_master.num_interfaces(), layout.vertical_slave.num_interfaces());

    let sends = outgoing_blocks(v, &layout.vertical_master, None);
    let received = comm.exchange(sends, &recv_peers(&layout.vertical_slave))?;
    scatter_blocks(v, &layout.vertical_slave, received, false)
}

/// Broadcast vertical-master values to the vertical slaves, accumulating.
///
/// Undoes a prior gather: masters fan their value back out with the same
/// occurrence compensation as [`gather_vertical`], slaves add. The caller
/// zeroes the master entries afterwards to make the defect additive again.
pub fn broadcast_vertical_add(v: &mut LevelVector, comm: &mut dyn Communicator) -> Result<()> {
    let layout = v.layout().clone();
    let occurrence = layout.vertical_master.occurrence_counts(v.len());
    let sends = outgoing_blocks(v, &layout.vertical_master, occurrence.as_ref());
    let received = comm.exchange(sends, &recv_peers(&layout.vertical_slave))?;
    scatter_blocks(v, &layout.vertical_slave, received, true)
}

/// One-directional slave-to-master copy (overwrite), used for solution
/// projection down the hierarchy.
pub fn copy_to_vertical_masters(v: &mut LevelVector, comm: &mut dyn Communicator) -> Result<()> {
    let layout = v.layout().clone();
    let sends = outgoing_blocks(v, &layout.vertical_slave, None);
    let received = comm.exchange(sends, &recv_peers(&layout.vertical_master))?;
    scatter_blocks(v, &layout.vertical_master, received, false)
}

/// Turn a consistent vector into an additive one by zeroing the horizontal
/// slave copies, leaving the master copy as the sole carrier of each value.
pub fn consistent_to_additive(v: &mut LevelVector) {
    debug_assert!(v.storage().contains(StorageMask::CONSISTENT));
    let layout = v.layout().clone();
    set_layout_values(v, &layout.horizontal_slave, 0.0);
    v.set_storage(StorageMask::ADDITIVE);
}
