// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Initial secret derivation from the client's destination connection ID

use crate::key::{HeaderProtectionKey, KeyPair, PacketKey, PacketProtectionKeys, Secret};
use fjord_quic_core::{
    crypto::{initial, packet_protection::Error, tls::CipherSuite},
    endpoint,
};
use ring::hkdf;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# initial_secret = HKDF-Extract(initial_salt,
//#                               client_dst_connection_id)
//#
//# client_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "client in", "",
//#                                           Hash.length)
//# server_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "server in", "",
//#                                           Hash.length)

fn initial_secret(dcid: &[u8], label: &[u8]) -> Result<Secret, Error> {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &initial::INITIAL_SALT);
    let prk = salt.extract(dcid);

    let mut secret = [0u8; 32];
    let mut hkdf_label = Vec::with_capacity(32);
    fjord_quic_core::crypto::label::compute_label(secret.len(), label, &mut hkdf_label);
    prk.expand(&[&hkdf_label], hkdf::HKDF_SHA256)
        .and_then(|okm| okm.fill(&mut secret))
        .map_err(|_| Error::KEY_DERIVATION_FAILURE)?;

    Ok(Secret::new(CipherSuite::Aes128Gcm, &secret))
}

fn keys_for(secret: &Secret) -> Result<PacketProtectionKeys, Error> {
    Ok(PacketProtectionKeys {
        packet: PacketKey::from_secret(secret)?,
        header: HeaderProtectionKey::from_secret(secret)?,
    })
}

/// Derives both directions of Initial keys for `endpoint` from the
/// client-chosen destination connection ID.
///
/// Re-invoked with the server's Retry SCID after a Retry.
pub fn initial_keys(dcid: &[u8], endpoint: endpoint::Type) -> Result<KeyPair, Error> {
    let client = initial_secret(dcid, initial::INITIAL_CLIENT_LABEL)?;
    let server = initial_secret(dcid, initial::INITIAL_SERVER_LABEL)?;

    let (sealer, opener) = match endpoint {
        endpoint::Type::Client => (keys_for(&client)?, keys_for(&server)?),
        endpoint::Type::Server => (keys_for(&server)?, keys_for(&client)?),
    };

    Ok(KeyPair { sealer, opener })
}

/// Exposes the raw client/server initial secrets for known-answer tests
#[cfg(test)]
fn initial_secret_bytes(dcid: &[u8], label: &[u8]) -> Vec<u8> {
    initial_secret(dcid, label).unwrap().bytes.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::expand_label;
    use fjord_quic_core::crypto::{
        apply_header_protection, remove_header_protection, Key as _,
    };
    use hex_literal::hex;

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //= type=test
    //# client_initial_secret
    //#     = HKDF-Expand-Label(initial_secret, "client in", "", 32)
    //#     = c00cf151ca5be075ed0ebfb5c80323c4
    //#       2d6b7db67881289af4008f1f6c357aea
    #[test]
    fn rfc_appendix_a_secrets() {
        assert_eq!(
            initial_secret_bytes(&initial::EXAMPLE_DCID, initial::INITIAL_CLIENT_LABEL),
            initial::EXAMPLE_CLIENT_INITIAL_SECRET.to_vec()
        );
        assert_eq!(
            initial_secret_bytes(&initial::EXAMPLE_DCID, initial::INITIAL_SERVER_LABEL),
            initial::EXAMPLE_SERVER_INITIAL_SECRET.to_vec()
        );
    }

    #[test]
    fn rfc_appendix_a_client_keys() {
        let secret = Secret::new(
            CipherSuite::Aes128Gcm,
            &initial::EXAMPLE_CLIENT_INITIAL_SECRET,
        );

        let prk = secret.prk();
        let mut key = [0u8; 16];
        expand_label(&prk, b"quic key", &mut key).unwrap();
        assert_eq!(key, initial::EXAMPLE_CLIENT_KEY);

        let mut iv = [0u8; 12];
        expand_label(&prk, b"quic iv", &mut iv).unwrap();
        assert_eq!(iv, initial::EXAMPLE_CLIENT_IV);

        let mut hp = [0u8; 16];
        expand_label(&prk, b"quic hp", &mut hp).unwrap();
        assert_eq!(hp, initial::EXAMPLE_CLIENT_HP);
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.2
    //= type=test
    //# The unprotected header indicates a length of 1182 bytes: the 4-byte
    //# packet number, 1162 bytes of frames, and the 16-byte authentication
    //# tag.  The header includes the connection ID and a 4-byte packet
    //# number encoding for a packet number of 2:
    //#
    //# c300000001088394c8f03e5157080000449e00000002
    #[test]
    fn rfc_appendix_a_client_initial_protection() {
        let header = hex!("c300000001088394c8f03e5157080000449e00000002");
        let keys = initial_keys(&initial::EXAMPLE_DCID, fjord_quic_core::endpoint::Type::Client)
            .unwrap();

        // payload: the CRYPTO frame from A.2 padded to 1162 bytes, plus tag
        let mut packet = header.to_vec();
        let mut payload = hex!(
            "
            060040f1010000ed0303ebf8fa56f129 39b9584a3896472ec40bb863cfd3e868
            04fe3a47f06a2b69484c000004130113 02010000c000000010000e00000b6578
            616d706c652e636f6dff01000100000a 00080006001d00170018001000070005
            04616c706e0005000501000000000033 00260024001d00209370b2c9caa47fba
            baf4559fedba753de171fa71f50f1ce1 5d43e994ec74d748002b000302030400
            0d0010000e0403050306030203080408 050806002d00020101001c0002400100
            3900320408ffffffffffffffff050480 00ffff07048000ffff08011001048000
            75300901100f088394c8f03e51570806 048000ffff
            "
        )
        .to_vec();
        payload.resize(1162, 0);
        packet.extend_from_slice(&payload);
        packet.extend_from_slice(&[0u8; 16]);

        let header_len = header.len() - 4;
        let protected_len = header.len();
        {
            let (aad, body) = packet.split_at_mut(protected_len);
            keys.sealer.packet.encrypt(2, aad, body).unwrap();
        }
        apply_header_protection(&keys.sealer.header, &mut packet, header_len, 4).unwrap();

        //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.2
        //= type=test
        //# The resulting protected packet is:
        //# c000000001088394c8f03e5157080000 449e7b9aec34...
        assert_eq!(&packet[..6], &hex!("c00000000108")[..]);
        assert_eq!(&packet[16..22], &hex!("449e7b9aec34")[..]);

        // the server can reverse the protection
        let server_keys =
            initial_keys(&initial::EXAMPLE_DCID, fjord_quic_core::endpoint::Type::Server).unwrap();
        let pn = remove_header_protection(&server_keys.opener.header, &mut packet, header_len)
            .unwrap();
        assert_eq!(pn.bytesize(), 4);
        assert_eq!(pn.into_u64(), 2);

        let (aad, body) = packet.split_at_mut(protected_len);
        let len = server_keys.opener.packet.decrypt(2, aad, body).unwrap();
        assert_eq!(&body[..4], &hex!("060040f1")[..]);
        assert_eq!(len, 1162);
    }
}
