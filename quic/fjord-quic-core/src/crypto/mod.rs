// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cryptographic traits and the packet protection envelope.
//!
//! Concrete AEAD and header protection implementations live in
//! `fjord-quic-crypto`; this module defines the traits they implement and
//! the protection steps that are independent of the cipher.

use crate::packet::number::TruncatedPacketNumber;
use fjord_codec::DecoderBuffer;

pub mod initial;
pub mod label;
pub mod packet_protection;
pub mod retry;
pub mod tls;

pub use packet_protection::Error as PacketProtectionError;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
//# The output of this algorithm is a 5-byte mask that is applied to the
//# protected header fields using exclusive OR.

pub const HEADER_PROTECTION_MASK_LEN: usize = 5;
pub type HeaderProtectionMask = [u8; HEADER_PROTECTION_MASK_LEN];

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
//# in sampling packet ciphertext for header protection, the Packet Number
//# field is assumed to be 4 bytes long
const SAMPLE_OFFSET_FROM_PN: usize = 4;

/// An AEAD packet protection key for one direction of one encryption level
pub trait Key: Send {
    /// Opens `payload` (ciphertext plus trailing tag) in place, returning
    /// the plaintext length
    fn decrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<usize, packet_protection::Error>;

    /// Seals `payload` in place; the final `tag_len` bytes of `payload` are
    /// reserved for the authentication tag
    fn encrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<(), packet_protection::Error>;

    /// Length of the appended authentication tag
    fn tag_len(&self) -> usize;
}

/// A header protection key for one direction of one encryption level
pub trait HeaderKey: Send {
    /// Derives the 5-byte mask from a ciphertext sample
    fn header_protection_mask(&self, ciphertext_sample: &[u8]) -> HeaderProtectionMask;

    /// The sample length the mask derivation requires
    fn sample_len(&self) -> usize;
}

const LONG_HEADER_FORM: u8 = 0x80;
const LONG_HEADER_MASK: u8 = 0x0f;
const SHORT_HEADER_MASK: u8 = 0x1f;

#[inline]
fn first_byte_mask(first: u8) -> u8 {
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
    //# mask = header_protection(hp_key, sample)
    //#
    //# pn_length = (packet[0] & 0x03) + 1
    //# if (packet[0] & 0x80) == 0x80:
    //#    # Long header: 4 bits masked
    //#    packet[0] ^= mask[0] & 0x0f
    //# else:
    //#    # Short header: 5 bits masked
    //#    packet[0] ^= mask[0] & 0x1f
    if first & LONG_HEADER_FORM == LONG_HEADER_FORM {
        LONG_HEADER_MASK
    } else {
        SHORT_HEADER_MASK
    }
}

#[inline]
fn sample<'a, K: HeaderKey>(
    key: &K,
    packet: &'a [u8],
    header_len: usize,
) -> Result<&'a [u8], packet_protection::Error> {
    let start = header_len + SAMPLE_OFFSET_FROM_PN;
    packet
        .get(start..start + key.sample_len())
        .ok_or(packet_protection::Error::DECRYPT_ERROR)
}

/// Removes header protection in place and returns the still-truncated
/// packet number.
///
/// `header_len` is the offset of the packet number field.
pub fn remove_header_protection<K: HeaderKey>(
    key: &K,
    packet: &mut [u8],
    header_len: usize,
) -> Result<TruncatedPacketNumber, packet_protection::Error> {
    let mask = key.header_protection_mask(sample(key, packet, header_len)?);

    packet[0] ^= mask[0] & first_byte_mask(packet[0]);
    let pn_len = (packet[0] & 0x03) as usize + 1;

    for (byte, mask) in packet[header_len..header_len + pn_len]
        .iter_mut()
        .zip(&mask[1..])
    {
        *byte ^= mask;
    }

    let buffer = DecoderBuffer::new(&packet[header_len..header_len + pn_len]);
    let (packet_number, _) = TruncatedPacketNumber::decode(buffer, pn_len as u8)
        .map_err(|_| packet_protection::Error::DECRYPT_ERROR)?;

    Ok(packet_number)
}

/// Applies header protection in place after the payload has been sealed
pub fn apply_header_protection<K: HeaderKey>(
    key: &K,
    packet: &mut [u8],
    header_len: usize,
    pn_len: usize,
) -> Result<(), packet_protection::Error> {
    let mask = key.header_protection_mask(sample(key, packet, header_len)?);

    packet[0] ^= mask[0] & first_byte_mask(packet[0]);
    for (byte, mask) in packet[header_len..header_len + pn_len]
        .iter_mut()
        .zip(&mask[1..])
    {
        *byte ^= mask;
    }

    Ok(())
}

/// Opens a packet in place. `protected_len` is the offset of the payload
/// (header plus packet number bytes). Returns the plaintext payload range.
pub fn decrypt_in_place<'a, K: Key>(
    key: &K,
    packet_number: u64,
    packet: &'a mut [u8],
    protected_len: usize,
) -> Result<&'a mut [u8], packet_protection::Error> {
    let (header, payload) = packet.split_at_mut(protected_len);
    let payload_len = key.decrypt(packet_number, header, payload)?;
    Ok(&mut packet[protected_len..protected_len + payload_len])
}

/// Seals a packet in place; the final `tag_len` bytes of `packet` must be
/// reserved for the tag
pub fn encrypt_in_place<K: Key>(
    key: &K,
    packet_number: u64,
    packet: &mut [u8],
    protected_len: usize,
) -> Result<(), packet_protection::Error> {
    let (header, payload) = packet.split_at_mut(protected_len);
    key.encrypt(packet_number, header, payload)
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;

    /// A key that performs no encryption and appends no tag
    #[derive(Clone, Debug, Default)]
    pub struct NullKey;

    impl Key for NullKey {
        fn decrypt(
            &self,
            _packet_number: u64,
            _header: &[u8],
            payload: &mut [u8],
        ) -> Result<usize, packet_protection::Error> {
            Ok(payload.len())
        }

        fn encrypt(
            &self,
            _packet_number: u64,
            _header: &[u8],
            _payload: &mut [u8],
        ) -> Result<(), packet_protection::Error> {
            Ok(())
        }

        fn tag_len(&self) -> usize {
            0
        }
    }

    /// A header key with an all-zero mask
    #[derive(Clone, Debug, Default)]
    pub struct NullHeaderKey;

    impl HeaderKey for NullHeaderKey {
        fn header_protection_mask(&self, _sample: &[u8]) -> HeaderProtectionMask {
            [0; HEADER_PROTECTION_MASK_LEN]
        }

        fn sample_len(&self) -> usize {
            0
        }
    }
}
