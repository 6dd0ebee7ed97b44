// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use hex_literal::hex;

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
//# The Retry Integrity Tag is a 128-bit field that is computed as the
//# output of AEAD_AES_128_GCM [AEAD] used with the following inputs:
//#
//# *  The secret key, K, is 128 bits equal to
//#    0xbe0c690b9f66575a1d766b54e368c84e.
//#
//# *  The nonce, N, is 96 bits equal to 0x461599d35d632bf2239825bb.

pub const RETRY_KEY: [u8; 16] = hex!("be0c690b9f66575a1d766b54e368c84e");
pub const RETRY_NONCE: [u8; 12] = hex!("461599d35d632bf2239825bb");

pub const INTEGRITY_TAG_LEN: usize = 16;
pub type IntegrityTag = [u8; INTEGRITY_TAG_LEN];

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
//# *  The associated data, A, is the contents of the Retry Pseudo-Packet.
//#
//# Retry Pseudo-Packet {
//#   ODCID Length (8),
//#   Original Destination Connection ID (0..160),
//#   Longer Header Bytes (..),
//# }

/// Builds the pseudo-packet the integrity tag authenticates:
/// the original destination connection ID (length-prefixed) followed by
/// the Retry packet without its trailing tag.
#[cfg(feature = "alloc")]
pub fn pseudo_packet(odcid: &[u8], retry_packet_without_tag: &[u8]) -> Vec<u8> {
    debug_assert!(odcid.len() <= crate::connection::id::MAX_LEN);

    let mut bytes = Vec::with_capacity(1 + odcid.len() + retry_packet_without_tag.len());
    bytes.push(odcid.len() as u8);
    bytes.extend_from_slice(odcid);
    bytes.extend_from_slice(retry_packet_without_tag);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_packet_layout() {
        let bytes = pseudo_packet(&[1, 2, 3], &[0xf0, 0xff]);
        assert_eq!(bytes, vec![3, 1, 2, 3, 0xf0, 0xff]);
    }
}
