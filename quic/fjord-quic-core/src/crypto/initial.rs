// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use hex_literal::hex;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# initial_salt = 0x38762cf7f55934b34d179ae6a4c80cadccbb7f0a

pub const INITIAL_SALT: [u8; 20] = hex!("38762cf7f55934b34d179ae6a4c80cadccbb7f0a");

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# client_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "client in", "",
//#                                           Hash.length)

pub const INITIAL_CLIENT_LABEL: &[u8] = b"client in";

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# server_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "server in", "",
//#                                           Hash.length)

pub const INITIAL_SERVER_LABEL: &[u8] = b"server in";

// Appendix A test vectors, consumed by the key derivation tests in
// fjord-quic-crypto

//= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
//# These packets use an 8-byte client-chosen Destination Connection ID of
//# 0x8394c8f03e515708.

pub const EXAMPLE_DCID: [u8; 8] = hex!("8394c8f03e515708");

//= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
//# client_initial_secret
//#     = HKDF-Expand-Label(initial_secret, "client in", "", 32)
//#     = c00cf151ca5be075ed0ebfb5c80323c4
//#       2d6b7db67881289af4008f1f6c357aea

pub const EXAMPLE_CLIENT_INITIAL_SECRET: [u8; 32] = hex!(
    "
    c00cf151ca5be075ed0ebfb5c80323c4
    2d6b7db67881289af4008f1f6c357aea
    "
);

//= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
//# server_initial_secret
//#     = HKDF-Expand-Label(initial_secret, "server in", "", 32)
//#     = 3c199828fd139efd216c155ad844cc81
//#       fb82fa8d7446fa7d78be803acdda951b

pub const EXAMPLE_SERVER_INITIAL_SECRET: [u8; 32] = hex!(
    "
    3c199828fd139efd216c155ad844cc81
    fb82fa8d7446fa7d78be803acdda951b
    "
);

//= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
//# key = HKDF-Expand-Label(client_initial_secret, "quic key", "", 16)
//#     = 1f369613dd76d5467730efcbe3b1a22d

pub const EXAMPLE_CLIENT_KEY: [u8; 16] = hex!("1f369613dd76d5467730efcbe3b1a22d");

//= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
//# iv  = HKDF-Expand-Label(client_initial_secret, "quic iv", "", 12)
//#     = fa044b2f42a3fd3b46fb255c

pub const EXAMPLE_CLIENT_IV: [u8; 12] = hex!("fa044b2f42a3fd3b46fb255c");

//= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
//# hp  = HKDF-Expand-Label(client_initial_secret, "quic hp", "", 16)
//#     = 9f50449e04a0e810283a1e9933adedd2

pub const EXAMPLE_CLIENT_HP: [u8; 16] = hex!("9f50449e04a0e810283a1e9933adedd2");
