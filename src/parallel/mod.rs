//! Distributed-memory consistency layer.
//!
//! Partitioned runs keep per-level vectors coherent through explicit
//! gather/broadcast points; everything here is built on an
//! interface-addressed [`Communicator`] rather than point-to-point sockets.

pub mod comm;
pub mod layout;
pub mod sync;

pub use comm::{Communicator, LoopbackCommunicator, NullCommunicator};
pub use layout::{can_gather, IndexInterface, IndexLayout, ParallelLayout};
pub use sync::{
    broadcast_vertical, broadcast_vertical_add, consistent_to_additive, copy_to_vertical_masters,
    gather_vertical, set_layout_values,
};
