// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! AEAD packet keys and header protection keys derived from traffic
//! secrets

use fjord_quic_core::crypto::{
    label, packet_protection::Error, tls::CipherSuite, HeaderProtectionMask,
};
use ring::{aead, hkdf};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub(crate) const NONCE_LEN: usize = 12;
pub(crate) const TAG_LEN: usize = 16;

/// A traffic secret plus the suite it belongs to
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct Secret {
    #[zeroize(skip)]
    pub suite: CipherSuite,
    pub bytes: Vec<u8>,
}

impl Secret {
    pub fn new(suite: CipherSuite, bytes: &[u8]) -> Self {
        Self {
            suite,
            bytes: bytes.to_vec(),
        }
    }

    pub(crate) fn prk(&self) -> hkdf::Prk {
        hkdf::Prk::new_less_safe(hkdf_algorithm(self.suite), &self.bytes)
    }
}

pub(crate) fn hkdf_algorithm(suite: CipherSuite) -> hkdf::Algorithm {
    match suite {
        CipherSuite::Aes128Gcm | CipherSuite::ChaCha20Poly1305 => hkdf::HKDF_SHA256,
        CipherSuite::Aes256Gcm => hkdf::HKDF_SHA384,
    }
}

fn aead_algorithm(suite: CipherSuite) -> &'static aead::Algorithm {
    match suite {
        CipherSuite::Aes128Gcm => &aead::AES_128_GCM,
        CipherSuite::Aes256Gcm => &aead::AES_256_GCM,
        CipherSuite::ChaCha20Poly1305 => &aead::CHACHA20_POLY1305,
    }
}

fn header_protection_algorithm(suite: CipherSuite) -> &'static aead::quic::Algorithm {
    match suite {
        CipherSuite::Aes128Gcm => &aead::quic::AES_128,
        CipherSuite::Aes256Gcm => &aead::quic::AES_256,
        CipherSuite::ChaCha20Poly1305 => &aead::quic::CHACHA20,
    }
}

struct OutLen(usize);

impl hkdf::KeyType for OutLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-Expand-Label with a precomputed `HkdfLabel` body
pub(crate) fn expand_into(prk: &hkdf::Prk, hkdf_label: &[u8], out: &mut [u8]) -> Result<(), Error> {
    prk.expand(&[hkdf_label], OutLen(out.len()))
        .and_then(|okm| okm.fill(out))
        .map_err(|_| Error::KEY_DERIVATION_FAILURE)
}

pub(crate) fn expand_label(prk: &hkdf::Prk, tls_label: &[u8], out: &mut [u8]) -> Result<(), Error> {
    let mut hkdf_label = Vec::with_capacity(32);
    label::compute_label(out.len(), tls_label, &mut hkdf_label);
    expand_into(prk, &hkdf_label, out)
}

/// An AEAD key for one direction of one encryption level
pub struct PacketKey {
    key: aead::LessSafeKey,
    iv: Iv,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct Iv([u8; NONCE_LEN]);

impl PacketKey {
    pub(crate) fn new(suite: CipherSuite, key_bytes: &[u8], iv: [u8; NONCE_LEN]) -> Result<Self, Error> {
        let key = aead::UnboundKey::new(aead_algorithm(suite), key_bytes)
            .map_err(|_| Error::KEY_DERIVATION_FAILURE)?;
        Ok(Self {
            key: aead::LessSafeKey::new(key),
            iv: Iv(iv),
        })
    }

    /// Derives a key for the secret, using the labels of RFC 9001 §5.1
    pub(crate) fn from_secret(secret: &Secret) -> Result<Self, Error> {
        let prk = secret.prk();

        let mut key_bytes = [0u8; 32];
        let key_bytes = &mut key_bytes[..secret.suite.key_len()];
        match secret.suite.key_len() {
            16 => expand_into(&prk, &label::QUIC_KEY_16, key_bytes)?,
            _ => expand_into(&prk, &label::QUIC_KEY_32, key_bytes)?,
        }

        let mut iv = [0u8; NONCE_LEN];
        expand_into(&prk, &label::QUIC_IV_12, &mut iv)?;

        let key = Self::new(secret.suite, key_bytes, iv);
        key_bytes.zeroize();
        key
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.3
    //# The nonce, N, is formed by combining the packet protection IV with
    //# the packet number.  The 62 bits of the reconstructed QUIC packet
    //# number in network byte order are left-padded with zeros to the size
    //# of the IV.  The exclusive OR of the padded packet number and the IV
    //# forms the AEAD nonce.
    fn nonce(&self, packet_number: u64) -> aead::Nonce {
        let mut nonce = self.iv.0;
        for (nonce_byte, pn_byte) in nonce[NONCE_LEN - 8..]
            .iter_mut()
            .zip(packet_number.to_be_bytes())
        {
            *nonce_byte ^= pn_byte;
        }
        aead::Nonce::assume_unique_for_key(nonce)
    }
}

impl fjord_quic_core::crypto::Key for PacketKey {
    fn decrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<usize, Error> {
        let plaintext = self
            .key
            .open_in_place(
                self.nonce(packet_number),
                aead::Aad::from(header),
                payload,
            )
            .map_err(|_| Error::DECRYPT_ERROR)?;
        Ok(plaintext.len())
    }

    fn encrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<(), Error> {
        let body_len = payload
            .len()
            .checked_sub(TAG_LEN)
            .ok_or(Error::INTERNAL_ERROR)?;
        let (body, tag_storage) = payload.split_at_mut(body_len);
        let tag = self
            .key
            .seal_in_place_separate_tag(self.nonce(packet_number), aead::Aad::from(header), body)
            .map_err(|_| Error::INTERNAL_ERROR)?;
        tag_storage.copy_from_slice(tag.as_ref());
        Ok(())
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }
}

/// A header protection key for one direction of one encryption level
pub struct HeaderProtectionKey {
    key: aead::quic::HeaderProtectionKey,
}

impl HeaderProtectionKey {
    pub(crate) fn new(suite: CipherSuite, key_bytes: &[u8]) -> Result<Self, Error> {
        let key = aead::quic::HeaderProtectionKey::new(header_protection_algorithm(suite), key_bytes)
            .map_err(|_| Error::KEY_DERIVATION_FAILURE)?;
        Ok(Self { key })
    }

    pub(crate) fn from_secret(secret: &Secret) -> Result<Self, Error> {
        let prk = secret.prk();
        let mut hp = [0u8; 32];
        let hp = &mut hp[..secret.suite.key_len()];
        match secret.suite.key_len() {
            16 => expand_into(&prk, &label::QUIC_HP_16, hp)?,
            _ => expand_into(&prk, &label::QUIC_HP_32, hp)?,
        }
        let key = Self::new(secret.suite, hp);
        hp.zeroize();
        key
    }
}

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.3
//# This algorithm samples 16 bytes from the packet ciphertext.
const SAMPLE_LEN: usize = 16;

impl fjord_quic_core::crypto::HeaderKey for HeaderProtectionKey {
    fn header_protection_mask(&self, ciphertext_sample: &[u8]) -> HeaderProtectionMask {
        // the caller samples exactly `sample_len` bytes
        self.key
            .new_mask(ciphertext_sample)
            .expect("sample length is enforced by the caller")
    }

    fn sample_len(&self) -> usize {
        SAMPLE_LEN
    }
}

/// The packet and header keys for one direction of one encryption level
pub struct PacketProtectionKeys {
    pub packet: PacketKey,
    pub header: HeaderProtectionKey,
}

impl PacketProtectionKeys {
    /// Derives both keys for `secret`, as installed by the TLS engine
    pub fn from_secret(suite: CipherSuite, secret: &[u8]) -> Result<Self, Error> {
        let secret = Secret::new(suite, secret);
        Ok(Self {
            packet: PacketKey::from_secret(&secret)?,
            header: HeaderProtectionKey::from_secret(&secret)?,
        })
    }
}

/// Seal and open keys for one encryption level
pub struct KeyPair {
    /// Protects outbound packets
    pub sealer: PacketProtectionKeys,
    /// Opens inbound packets
    pub opener: PacketProtectionKeys,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjord_quic_core::crypto::Key as _;

    #[test]
    fn seal_open_round_trip() {
        let secret = [0x42u8; 32];
        let sealer = PacketProtectionKeys::from_secret(CipherSuite::Aes128Gcm, &secret).unwrap();
        let opener = PacketProtectionKeys::from_secret(CipherSuite::Aes128Gcm, &secret).unwrap();

        let header = [0x40u8, 0x00, 0x01];
        let mut payload = Vec::new();
        payload.extend_from_slice(b"protected payload");
        payload.extend_from_slice(&[0u8; TAG_LEN]);

        sealer.packet.encrypt(7, &header, &mut payload).unwrap();
        assert_ne!(&payload[..17], &b"protected payload"[..]);

        let len = opener.packet.decrypt(7, &header, &mut payload).unwrap();
        assert_eq!(&payload[..len], b"protected payload");
    }

    #[test]
    fn wrong_packet_number_fails_authentication() {
        let secret = [0x42u8; 32];
        let sealer = PacketProtectionKeys::from_secret(CipherSuite::Aes128Gcm, &secret).unwrap();
        let opener = PacketProtectionKeys::from_secret(CipherSuite::Aes128Gcm, &secret).unwrap();

        let mut payload = vec![0u8; 8 + TAG_LEN];
        sealer.packet.encrypt(7, &[], &mut payload).unwrap();
        assert!(opener.packet.decrypt(8, &[], &mut payload).is_err());
    }

    #[test]
    fn suites_derive_distinct_keys() {
        let secret = [0x42u8; 32];
        for suite in [
            CipherSuite::Aes128Gcm,
            CipherSuite::Aes256Gcm,
            CipherSuite::ChaCha20Poly1305,
        ] {
            let keys = PacketProtectionKeys::from_secret(suite, &secret).unwrap();
            let mut payload = vec![1u8; 4 + TAG_LEN];
            keys.packet.encrypt(0, &[], &mut payload).unwrap();
        }
    }
}
