//! Per-peer fragment reassembly.
//!
//! Fragments carry no sequence number, so they are concatenated in arrival
//! order. This is only correct on a transport that neither loses nor reorders
//! datagrams (e.g. loopback); a lost fragment leaves the message pending until
//! the peer declares a new upload or is dropped.

use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;

/// An upload in progress for one peer.
#[derive(Debug)]
struct Pending<M> {
    expected: usize,
    fragments: Vec<Vec<u8>>,
    meta: M,
}

impl<M> Pending<M> {
    fn is_complete(&self) -> bool {
        self.fragments.len() >= self.expected
    }
    fn into_completed(self) -> Completed<M> {
        Completed {
            payload: self.fragments.concat(),
            meta: self.meta,
        }
    }
}

/// A fully reassembled message together with the metadata declared in its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed<M> {
    pub payload: Vec<u8>,
    pub meta: M,
}

impl<M> Completed<M> {
    /// Decodes the payload as UTF-8, replacing invalid sequences with `U+FFFD`.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
    pub fn is_valid_utf8(&self) -> bool {
        std::str::from_utf8(&self.payload).is_ok()
    }
}

/// The outcome of offering a datagram to the buffer as a fragment.
#[derive(Debug, PartialEq, Eq)]
pub enum Appended<M> {
    /// No upload is in progress for this peer, the datagram is not a fragment.
    NotExpected,
    /// The fragment was stored, more are needed.
    Pending { received: usize, expected: usize },
    /// The last fragment arrived, the upload state has been removed.
    Complete(Completed<M>),
}

/// Reassembly state for every peer, at most one upload per peer.
#[derive(Debug)]
pub struct Reassembly<M> {
    pending: HashMap<SocketAddr, Pending<M>>,
}

impl<M> Default for Reassembly<M> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<M> Reassembly<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new upload of `expected` fragments from `peer`.
    ///
    /// An unfinished upload from the same peer is dropped and replaced; the number
    /// of fragments it had collected is returned. A count of zero starts nothing.
    pub fn begin(&mut self, peer: SocketAddr, expected: usize, meta: M) -> Option<usize> {
        let abandoned = self.pending.remove(&peer).map(|p| {
            log::warn!(
                "upload from {peer} replaced before completion ({}/{} fragments received)",
                p.fragments.len(),
                p.expected
            );
            p.fragments.len()
        });
        if expected == 0 {
            log::debug!("ignoring empty upload from {peer}");
            return abandoned;
        }
        log::trace!("expecting {expected} fragments from {peer}");
        self.pending.insert(
            peer,
            Pending {
                expected,
                fragments: Vec::with_capacity(expected),
                meta,
            },
        );
        abandoned
    }

    /// Returns true if the next datagram from `peer` will be treated as a fragment.
    pub fn is_expecting(&self, peer: &SocketAddr) -> bool {
        self.pending
            .get(peer)
            .is_some_and(|p| p.fragments.len() < p.expected)
    }

    pub fn append(&mut self, peer: SocketAddr, fragment: &[u8]) -> Appended<M> {
        let Entry::Occupied(mut entry) = self.pending.entry(peer) else {
            return Appended::NotExpected;
        };
        let pending = entry.get_mut();
        if pending.is_complete() {
            return Appended::NotExpected;
        }
        pending.fragments.push(fragment.to_vec());
        if pending.is_complete() {
            log::trace!("all {} fragments from {peer} received", pending.expected);
            return Appended::Complete(entry.remove().into_completed());
        }
        Appended::Pending {
            received: pending.fragments.len(),
            expected: pending.expected,
        }
    }

    /// Drops any unfinished upload from `peer`, returning whether one existed.
    pub fn cancel(&mut self, peer: &SocketAddr) -> bool {
        self.pending.remove(peer).is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
