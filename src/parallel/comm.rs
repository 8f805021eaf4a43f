//! Communication transports for interface-addressed data exchange.
//!
//! The engine never talks to sockets directly; it posts per-interface value
//! blocks and blocks until the matching blocks of its peers arrive. The
//! [`NullCommunicator`] serves serial runs, the [`LoopbackCommunicator`]
//! connects in-process ranks over channels for multi-partition tests.

use crate::error::{GmgError, Result};
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

/// Blocking, interface-addressed communication between mesh partitions.
///
/// All operations are collective with respect to the calling point of the
/// cycle: every participating rank reaches the same call before any of them
/// proceeds. There is no overlap of communication with computation.
pub trait Communicator: Send {
    /// Post one outgoing block per peer, then block until one block from each
    /// peer in `recv_from` has arrived. Blocks are matched per peer in FIFO
    /// order, which both sides derive from their interface sets.
    fn exchange(
        &mut self,
        sends: Vec<(usize, Vec<f64>)>,
        recv_from: &[usize],
    ) -> Result<Vec<(usize, Vec<f64>)>>;

    /// Global logical-or over all participating ranks.
    fn any_true(&mut self, flag: bool) -> Result<bool>;
}

/// Transport for a single-partition run. Exchanging actual data through it is
/// a protocol violation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCommunicator;

impl Communicator for NullCommunicator {
    fn exchange(
        &mut self,
        sends: Vec<(usize, Vec<f64>)>,
        recv_from: &[usize],
    ) -> Result<Vec<(usize, Vec<f64>)>> {
        if !sends.is_empty() || !recv_from.is_empty() {
            return Err(GmgError::CommFailure {
                detail: "serial communicator asked to exchange interface data".into(),
            });
        }
        Ok(Vec::new())
    }

    fn any_true(&mut self, flag: bool) -> Result<bool> {
        Ok(flag)
    }
}

/// How long a loopback receive waits before reporting a stuck peer.
const RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// In-process transport connecting `n` ranks over channels.
///
/// Intended for tests and single-machine experiments; each rank runs on its
/// own thread and the mesh of channels stands in for the network.
pub struct LoopbackCommunicator {
    rank: usize,
    num_ranks: usize,
    senders: HashMap<usize, Sender<Vec<f64>>>,
    receivers: HashMap<usize, Receiver<Vec<f64>>>,
}

impl LoopbackCommunicator {
    /// Build a fully connected mesh of `n` ranks.
    pub fn mesh(n: usize) -> Vec<LoopbackCommunicator> {
        let mut senders: Vec<HashMap<usize, Sender<Vec<f64>>>> =
            (0..n).map(|_| HashMap::new()).collect();
        let mut receivers: Vec<HashMap<usize, Receiver<Vec<f64>>>> =
            (0..n).map(|_| HashMap::new()).collect();

        for from in 0..n {
            for to in 0..n {
                if from == to {
                    continue;
                }
                let (tx, rx) = std::sync::mpsc::channel();
                senders[from].insert(to, tx);
                receivers[to].insert(from, rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| LoopbackCommunicator {
                rank,
                num_ranks: n,
                senders,
                receivers,
            })
            .collect()
    }

    /// This rank's id within the mesh.
    pub fn rank(&self) -> usize {
        self.rank
    }

    fn recv_block(&self, peer: usize) -> Result<Vec<f64>> {
        let rx = self.receivers.get(&peer).ok_or_else(|| GmgError::CommFailure {
            detail: format!("rank {} has no channel from peer {}", self.rank, peer),
        })?;
        rx.recv_timeout(RECV_TIMEOUT).map_err(|e| GmgError::CommFailure {
            detail: format!("rank {} receiving from peer {}: {}", self.rank, peer, e),
        })
    }
}

impl Communicator for LoopbackCommunicator {
    fn exchange(
        &mut self,
        sends: Vec<(usize, Vec<f64>)>,
        recv_from: &[usize],
    ) -> Result<Vec<(usize, Vec<f64>)>> {
        for (peer, block) in sends {
            let tx = self.senders.get(&peer).ok_or_else(|| GmgError::CommFailure {
                detail: format!("rank {} has no channel to peer {}", self.rank, peer),
            })?;
            tx.send(block).map_err(|e| GmgError::CommFailure {
                detail: format!("rank {} sending to peer {}: {}", self.rank, peer, e),
            })?;
        }

        let mut received = Vec::with_capacity(recv_from.len());
        for &peer in recv_from {
            received.push((peer, self.recv_block(peer)?));
        }
        Ok(received)
    }

    fn any_true(&mut self, flag: bool) -> Result<bool> {
        let encoded = if flag { 1.0 } else { 0.0 };
        let sends: Vec<_> = (0..self.num_ranks)
            .filter(|&p| p != self.rank)
            .map(|p| (p, vec![encoded]))
            .collect();
        let peers: Vec<usize> = (0..self.num_ranks).filter(|&p| p != self.rank).collect();
        let received = self.exchange(sends, &peers)?;
        Ok(flag || received.iter().any(|(_, block)| block[0] != 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_communicator_noop() {
        let mut comm = NullCommunicator;
        assert!(comm.exchange(Vec::new(), &[]).unwrap().is_empty());
        assert!(comm.any_true(true).unwrap());
        assert!(!comm.any_true(false).unwrap());
        assert!(comm.exchange(vec![(1, vec![1.0])], &[]).is_err());
    }

    #[test]
    fn test_loopback_exchange_two_ranks() {
        let mut comms = LoopbackCommunicator::mesh(2);
        let mut c1 = comms.pop().unwrap();
        let mut c0 = comms.pop().unwrap();

        let h = std::thread::spawn(move || {
            let got = c1.exchange(vec![(0, vec![3.0])], &[0]).unwrap();
            (c1, got)
        });
        let got0 = c0.exchange(vec![(1, vec![7.0])], &[1]).unwrap();
        let (_c1, got1) = h.join().unwrap();

        assert_eq!(got0, vec![(1, vec![3.0])]);
        assert_eq!(got1, vec![(0, vec![7.0])]);
    }

    #[test]
    fn test_loopback_any_true() {
        let mut comms = LoopbackCommunicator::mesh(3);
        let handles: Vec<_> = comms
            .drain(..)
            .enumerate()
            .map(|(rank, mut c)| {
                std::thread::spawn(move || c.any_true(rank == 1).unwrap())
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
    }
}
