// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Path tracking: validation challenges, anti-amplification accounting,
//! and switching between network paths.

use fjord_quic_core::{
    path::{ValidationState, AMPLIFICATION_MULTIPLIER, CHALLENGE_LEN, MINIMUM_MTU},
    random,
    time::Timestamp,
};
use smallvec::SmallVec;

pub use fjord_quic_core::path::Id;

/// An outstanding PATH_CHALLENGE
#[derive(Clone, Copy, Debug)]
struct Challenge {
    data: [u8; CHALLENGE_LEN],
    deadline: Timestamp,
    needs_transmission: bool,
}

#[derive(Debug)]
pub struct Path {
    pub id: Id,
    state: ValidationState,
    challenge: Option<Challenge>,
    /// PATH_RESPONSE data owed to the peer on this path
    pub response: Option<[u8; CHALLENGE_LEN]>,
    rx_bytes: u64,
    tx_bytes: u64,
    pub mtu: u16,
}

impl Path {
    fn new(id: Id, validated: bool) -> Self {
        Self {
            id,
            state: if validated {
                ValidationState::Validated
            } else {
                ValidationState::Unvalidated
            },
            challenge: None,
            response: None,
            rx_bytes: 0,
            tx_bytes: 0,
            mtu: MINIMUM_MTU,
        }
    }

    #[inline]
    pub fn is_validated(&self) -> bool {
        self.state.is_validated()
    }

    /// Bytes this path may still transmit under the amplification limit
    ///
    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
    //# Prior to validating the client address, servers MUST NOT send more
    //# than three times as many bytes as the number of bytes they have
    //# received.
    pub fn transmission_allowance(&self) -> u64 {
        if self.is_validated() {
            return u64::MAX;
        }
        (self.rx_bytes * AMPLIFICATION_MULTIPLIER).saturating_sub(self.tx_bytes)
    }

    pub fn on_bytes_received(&mut self, bytes: usize) {
        self.rx_bytes += bytes as u64;
    }

    /// Marks the path validated out-of-band, e.g. after processing a
    /// Handshake packet from it
    pub fn on_validated(&mut self) {
        self.state = ValidationState::Validated;
        self.challenge = None;
    }

    pub fn on_bytes_transmitted(&mut self, bytes: usize) {
        self.tx_bytes += bytes as u64;
    }
}

/// All paths of one connection. The active path carries application data;
/// other paths exist while a migration or probe is in progress.
#[derive(Debug)]
pub struct Manager {
    paths: SmallVec<[Path; 2]>,
    active: Id,
}

impl Manager {
    /// Creates the manager with the handshake path. Clients count the
    /// server's address as validated from the start; servers must
    /// validate the client's.
    pub fn new(initial_validated: bool) -> Self {
        Self {
            paths: SmallVec::from_iter([Path::new(Id::ORIGINAL, initial_validated)]),
            active: Id::ORIGINAL,
        }
    }

    #[inline]
    pub fn active_id(&self) -> Id {
        self.active
    }

    pub fn active(&mut self) -> &mut Path {
        let active = self.active;
        self.get_mut(active).expect("active path always exists")
    }

    pub fn get_mut(&mut self, id: Id) -> Option<&mut Path> {
        self.paths.iter_mut().find(|path| path.id == id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Path> {
        self.paths.iter_mut()
    }

    /// Registers an inbound datagram, creating and challenging the path
    /// on first contact
    pub fn on_datagram_received<R: random::Generator + ?Sized>(
        &mut self,
        id: Id,
        bytes: usize,
        now: Timestamp,
        probe_timeout: core::time::Duration,
        random: &mut R,
    ) -> &mut Path {
        if self.get_mut(id).is_none() {
            let mut path = Path::new(id, false);

            //= https://www.rfc-editor.org/rfc/rfc9000#section-9.3
            //# An endpoint MUST perform path validation (Section 8.2) if it
            //# detects any change to a peer's address
            let mut data = [0u8; CHALLENGE_LEN];
            random.fill(random::Usage::PathChallenge, &mut data);
            path.challenge = Some(Challenge {
                data,
                deadline: now + probe_timeout,
                needs_transmission: true,
            });
            path.state = ValidationState::Challenged;
            self.paths.push(path);
        }

        let path = self.get_mut(id).expect("just inserted");
        path.on_bytes_received(bytes);
        path
    }

    /// The next challenge to transmit, if any path has one pending
    pub fn pending_challenge(&mut self, now: Timestamp) -> Option<(Id, [u8; CHALLENGE_LEN])> {
        for path in self.paths.iter_mut() {
            if let Some(challenge) = path.challenge.as_mut() {
                if challenge.needs_transmission && !now.has_elapsed(challenge.deadline) {
                    challenge.needs_transmission = false;
                    return Some((path.id, challenge.data));
                }
            }
        }
        None
    }

    /// Matches a PATH_RESPONSE against all outstanding challenges
    ///
    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.3
    //# Path validation succeeds when a PATH_RESPONSE frame is received that
    //# contains the data that was sent in a previous PATH_CHALLENGE frame.
    pub fn on_path_response(&mut self, data: &[u8; CHALLENGE_LEN]) {
        for path in self.paths.iter_mut() {
            if let Some(challenge) = path.challenge {
                if &challenge.data == data {
                    path.challenge = None;
                    path.state = ValidationState::Validated;
                    tracing::debug!(path = ?path.id, "path validated");
                }
            }
        }
    }

    /// Expires challenges whose deadline passed; the path stays
    /// unvalidated
    pub fn on_timeout(&mut self, now: Timestamp) {
        for path in self.paths.iter_mut() {
            if let Some(challenge) = path.challenge {
                if now.has_elapsed(challenge.deadline) {
                    path.challenge = None;
                    path.state = ValidationState::Unvalidated;
                }
            }
        }
    }

    /// The earliest challenge deadline, for the connection timer
    pub fn earliest_deadline(&self) -> Option<Timestamp> {
        self.paths
            .iter()
            .filter_map(|path| path.challenge.map(|c| c.deadline))
            .min()
    }

    /// Switches the active path once the peer has moved its traffic to a
    /// validated path
    pub fn on_non_probing_packet(&mut self, id: Id) {
        if id != self.active && self.get_mut(id).map_or(false, |p| p.is_validated()) {
            tracing::debug!(path = ?id, "migrating active path");
            self.active = id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use fjord_quic_core::random::testing::Generator;

    fn now(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    const PTO3: Duration = Duration::from_millis(900);

    #[test]
    fn amplification_limit() {
        let mut manager = Manager::new(false);
        let path = manager.active();
        assert_eq!(path.transmission_allowance(), 0);

        path.on_bytes_received(1200);
        assert_eq!(path.transmission_allowance(), 3600);
        path.on_bytes_transmitted(3000);
        assert_eq!(path.transmission_allowance(), 600);
    }

    #[test]
    fn new_path_is_challenged_and_validated() {
        let mut random = Generator::default();
        let mut manager = Manager::new(true);

        manager.on_datagram_received(Id::new(1), 1200, now(10), PTO3, &mut random);
        let (id, data) = manager.pending_challenge(now(10)).unwrap();
        assert_eq!(id, Id::new(1));
        // only transmitted once
        assert!(manager.pending_challenge(now(10)).is_none());

        manager.on_path_response(&data);
        assert!(manager.get_mut(Id::new(1)).unwrap().is_validated());
        assert_eq!(manager.earliest_deadline(), None);

        // peer traffic moves over
        manager.on_non_probing_packet(Id::new(1));
        assert_eq!(manager.active_id(), Id::new(1));
    }

    #[test]
    fn mismatched_response_is_ignored() {
        let mut random = Generator::default();
        let mut manager = Manager::new(true);
        manager.on_datagram_received(Id::new(1), 100, now(10), PTO3, &mut random);
        let (_, data) = manager.pending_challenge(now(10)).unwrap();

        let mut wrong = data;
        wrong[0] ^= 0xff;
        manager.on_path_response(&wrong);
        assert!(!manager.get_mut(Id::new(1)).unwrap().is_validated());
    }

    #[test]
    fn challenge_expires_at_deadline() {
        let mut random = Generator::default();
        let mut manager = Manager::new(true);
        manager.on_datagram_received(Id::new(1), 100, now(10), PTO3, &mut random);

        let deadline = manager.earliest_deadline().unwrap();
        manager.on_timeout(deadline);
        assert!(!manager.get_mut(Id::new(1)).unwrap().is_validated());
        assert_eq!(manager.earliest_deadline(), None);

        // an unvalidated path never becomes active
        manager.on_non_probing_packet(Id::new(1));
        assert_eq!(manager.active_id(), Id::ORIGINAL);
    }
}
