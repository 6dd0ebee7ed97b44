// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Retry packet integrity protection

use fjord_quic_core::crypto::{
    packet_protection::Error,
    retry::{IntegrityTag, INTEGRITY_TAG_LEN, RETRY_KEY, RETRY_NONCE},
};
use ring::aead;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
//# The Retry Integrity Tag is a 128-bit field that is computed as the
//# output of AEAD_AES_128_GCM [AEAD] used with the following inputs:
//#
//# *  The secret key, K, is 128 bits equal to
//#    0xbe0c690b9f66575a1d766b54e368c84e.
//#
//# *  The nonce, N, is 96 bits equal to 0x461599d35d632bf2239825bb.
//#
//# *  The plaintext, P, is empty.
//#
//# *  The associated data, A, is the contents of the Retry Pseudo-Packet

fn retry_key() -> Result<aead::LessSafeKey, Error> {
    let key = aead::UnboundKey::new(&aead::AES_128_GCM, &RETRY_KEY)
        .map_err(|_| Error::KEY_DERIVATION_FAILURE)?;
    Ok(aead::LessSafeKey::new(key))
}

/// Computes the integrity tag over a Retry pseudo-packet
pub fn generate_tag(pseudo_packet: &[u8]) -> Result<IntegrityTag, Error> {
    let key = retry_key()?;
    let nonce = aead::Nonce::assume_unique_for_key(RETRY_NONCE);
    let tag = key
        .seal_in_place_separate_tag(nonce, aead::Aad::from(pseudo_packet), &mut [])
        .map_err(|_| Error::INTERNAL_ERROR)?;

    let mut out = [0u8; INTEGRITY_TAG_LEN];
    out.copy_from_slice(tag.as_ref());
    Ok(out)
}

/// Verifies the tag trailing a Retry packet.
///
//= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
//# Clients MUST discard Retry packets that have a Retry Integrity Tag
//# that cannot be validated
pub fn validate_tag(pseudo_packet: &[u8], tag: &[u8]) -> Result<(), Error> {
    let expected = generate_tag(pseudo_packet)?;
    ring::constant_time::verify_slices_are_equal(&expected, tag)
        .map_err(|_| Error::DECRYPT_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjord_quic_core::crypto::retry::pseudo_packet;
    use hex_literal::hex;

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.4
    //= type=test
    //# This shows a Retry packet that might be sent in response to the
    //# Initial packet in Appendix A.2.  The integrity check includes the
    //# client-chosen connection ID value of 0x8394c8f03e515708, but that
    //# value is not included in the final Retry packet:
    //#
    //# ff000000010008f067a5502a4262b574 6f6b656e04a265ba2eff4d829058fb3f
    //# 0f2496ba
    #[test]
    fn rfc_appendix_a_retry() {
        let odcid = hex!("8394c8f03e515708");
        let packet = hex!(
            "
            ff000000010008f067a5502a4262b574 6f6b656e04a265ba2eff4d829058fb3f
            0f2496ba
            "
        );
        let (body, tag) = packet.split_at(packet.len() - INTEGRITY_TAG_LEN);

        let pseudo = pseudo_packet(&odcid, body);
        assert_eq!(&generate_tag(&pseudo).unwrap()[..], tag);
        assert!(validate_tag(&pseudo, tag).is_ok());

        // flipping any bit invalidates the tag
        let mut bad_tag = [0u8; INTEGRITY_TAG_LEN];
        bad_tag.copy_from_slice(tag);
        bad_tag[0] ^= 1;
        assert!(validate_tag(&pseudo, &bad_tag).is_err());
    }
}
