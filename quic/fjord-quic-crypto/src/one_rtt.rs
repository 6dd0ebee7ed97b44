// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! 1-RTT keys with the three-epoch window required for key updates

use crate::key::{expand_label, HeaderProtectionKey, PacketKey, Secret};
use fjord_quic_core::crypto::{packet_protection::Error, tls::CipherSuite};

//= https://www.rfc-editor.org/rfc/rfc9001#section-6
//# Once the handshake is confirmed (see Section 4.1.2), an endpoint MAY
//# initiate a key update.
//
//= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
//# Endpoints maintain separate read and write secrets for packet
//# protection.

/// 1-RTT packet protection for one direction.
///
/// Three packet keys are live at once: the previous epoch (to open
/// reordered packets from before an update), the current epoch, and the
/// next epoch (pre-derived so an update never stalls on key derivation).
/// The header protection key never rotates.
pub struct OneRttKey {
    header: HeaderProtectionKey,
    previous: Option<PacketKey>,
    current: PacketKey,
    next: PacketKey,
    next_secret: Secret,
    /// Number of completed key updates
    generation: u64,
}

fn next_secret(secret: &Secret) -> Result<Secret, Error> {
    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
    //# The endpoint creates a new write secret from the existing write
    //# secret as performed in Section 7.2 of [TLS13].  This uses the KDF
    //# function provided by TLS with a label of "quic ku".
    let mut bytes = vec![0u8; secret.bytes.len()];
    expand_label(&secret.prk(), b"quic ku", &mut bytes)?;
    Ok(Secret {
        suite: secret.suite,
        bytes,
    })
}

impl OneRttKey {
    /// Builds the key schedule from the TLS application traffic secret
    pub fn new(suite: CipherSuite, secret_bytes: &[u8]) -> Result<Self, Error> {
        let secret = Secret::new(suite, secret_bytes);
        let second = next_secret(&secret)?;
        let third = next_secret(&second)?;

        Ok(Self {
            header: HeaderProtectionKey::from_secret(&secret)?,
            previous: None,
            current: PacketKey::from_secret(&secret)?,
            next: PacketKey::from_secret(&second)?,
            next_secret: third,
            generation: 0,
        })
    }

    #[inline]
    pub fn header_key(&self) -> &HeaderProtectionKey {
        &self.header
    }

    #[inline]
    pub fn current(&self) -> &PacketKey {
        &self.current
    }

    /// The key of the epoch before the last update, while packets from it
    /// may still arrive
    #[inline]
    pub fn previous(&self) -> Option<&PacketKey> {
        self.previous.as_ref()
    }

    /// The key of the epoch after the next update
    #[inline]
    pub fn next(&self) -> &PacketKey {
        &self.next
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Completes a key update: next becomes current, current becomes
    /// previous, and a fresh next epoch is derived.
    pub fn promote(&mut self) -> Result<(), Error> {
        let fresh_secret = next_secret(&self.next_secret)?;
        let fresh = PacketKey::from_secret(&self.next_secret)?;

        let old_current = core::mem::replace(&mut self.current, core::mem::replace(&mut self.next, fresh));
        self.previous = Some(old_current);
        self.next_secret = fresh_secret;
        self.generation += 1;
        Ok(())
    }

    /// Drops the previous epoch once packets from it can no longer arrive
    pub fn discard_previous(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjord_quic_core::crypto::Key as _;

    const TAG_LEN: usize = 16;

    fn seal(key: &PacketKey, pn: u64, data: &[u8]) -> Vec<u8> {
        let mut payload = data.to_vec();
        payload.extend_from_slice(&[0u8; TAG_LEN]);
        key.encrypt(pn, &[], &mut payload).unwrap();
        payload
    }

    fn open(key: &PacketKey, pn: u64, sealed: &[u8]) -> Option<Vec<u8>> {
        let mut payload = sealed.to_vec();
        let len = key.decrypt(pn, &[], &mut payload).ok()?;
        Some(payload[..len].to_vec())
    }

    #[test]
    fn promote_rotates_epochs() {
        let secret = [7u8; 32];
        let mut local = OneRttKey::new(CipherSuite::Aes128Gcm, &secret).unwrap();
        let mut peer = OneRttKey::new(CipherSuite::Aes128Gcm, &secret).unwrap();

        // current epochs interoperate
        let sealed = seal(local.current(), 1, b"epoch zero");
        assert_eq!(open(peer.current(), 1, &sealed).unwrap(), b"epoch zero");

        // the local side updates; its current now matches the peer's next
        local.promote().unwrap();
        assert_eq!(local.generation(), 1);
        let sealed = seal(local.current(), 2, b"epoch one");
        assert!(open(peer.current(), 2, &sealed).is_none());
        assert_eq!(open(peer.next(), 2, &sealed).unwrap(), b"epoch one");

        // after the peer promotes too, current keys line up again
        peer.promote().unwrap();
        let sealed = seal(peer.current(), 3, b"aligned");
        assert_eq!(open(local.current(), 3, &sealed).unwrap(), b"aligned");

        // the pre-update epoch remains available for reordered packets
        assert!(local.previous().is_some());
        let sealed = seal(peer.previous().unwrap(), 0, b"old epoch");
        assert_eq!(open(local.previous().unwrap(), 0, &sealed).unwrap(), b"old epoch");

        local.discard_previous();
        assert!(local.previous().is_none());
    }

    #[test]
    fn epochs_chain_identically_across_multiple_updates() {
        let secret = [9u8; 32];
        let mut a = OneRttKey::new(CipherSuite::ChaCha20Poly1305, &secret).unwrap();
        let mut b = OneRttKey::new(CipherSuite::ChaCha20Poly1305, &secret).unwrap();

        for generation in 0..4u64 {
            let sealed = seal(a.current(), generation, b"ping");
            assert_eq!(open(b.current(), generation, &sealed).unwrap(), b"ping");
            a.promote().unwrap();
            b.promote().unwrap();
        }
    }
}
