// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Acknowledgment tokens tying frames in flight to the packets that
//! carried them.
//!
//! A frame producer holds the strong [`AckToken`]; the sent-packet record
//! holds the [`PacketWaiter`] weak half. When the packet is acknowledged
//! or declared lost, the recovery manager flips the shared state and the
//! producer observes it on its next sweep. If the producer disappears
//! first (its stream was reset), the waiter upgrade fails and the outcome
//! is simply discarded. If the packet's space is discarded, the token
//! stays [`Pending`](AckOutcome::Pending) forever; producers in
//! discarded spaces are torn down with the space.

use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    Pending,
    Acked,
    Lost,
}

const PENDING: u8 = 0;
const ACKED: u8 = 1;
const LOST: u8 = 2;

/// The producer half: owned by whoever queued the frame
#[derive(Debug)]
pub struct AckToken {
    state: Arc<AtomicU8>,
}

impl AckToken {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    /// Creates the weak half to attach to the sent-packet record
    pub fn waiter(&self) -> PacketWaiter {
        PacketWaiter {
            state: Arc::downgrade(&self.state),
        }
    }

    pub fn outcome(&self) -> AckOutcome {
        match self.state.load(Ordering::Acquire) {
            ACKED => AckOutcome::Acked,
            LOST => AckOutcome::Lost,
            _ => AckOutcome::Pending,
        }
    }
}

/// The packet half: stored in the sent-packet record
#[derive(Debug)]
pub struct PacketWaiter {
    state: Weak<AtomicU8>,
}

impl PacketWaiter {
    pub fn mark_acked(&self) {
        if let Some(state) = self.state.upgrade() {
            state.store(ACKED, Ordering::Release);
        }
    }

    pub fn mark_lost(&self) {
        if let Some(state) = self.state.upgrade() {
            state.store(LOST, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_is_observed_once_set() {
        let token = AckToken::new();
        let waiter = token.waiter();
        assert_eq!(token.outcome(), AckOutcome::Pending);

        waiter.mark_acked();
        assert_eq!(token.outcome(), AckOutcome::Acked);
    }

    #[test]
    fn dropped_producer_is_ignored() {
        let token = AckToken::new();
        let waiter = token.waiter();
        drop(token);
        // no panic, no effect
        waiter.mark_lost();
    }

    #[test]
    fn lost_then_retransmitted() {
        let token = AckToken::new();
        token.waiter().mark_lost();
        assert_eq!(token.outcome(), AckOutcome::Lost);

        // the producer requeues with a fresh token
        let token = AckToken::new();
        token.waiter().mark_acked();
        assert_eq!(token.outcome(), AckOutcome::Acked);
    }
}
