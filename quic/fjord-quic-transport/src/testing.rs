// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Test plumbing: a scripted TLS engine, a shared manual clock, and
//! config builders, so two connections can be driven against each other
//! entirely in memory.

use crate::connection::{Config, Connection};
use bytes::Bytes;
use fjord_quic_core::{
    connection::Limits,
    crypto::tls::{CipherSuite, Context, Level, Session},
    endpoint, random,
    time::{self, Timestamp},
    transport,
};
use std::sync::{Arc, Mutex};

/// A manually advanced clock shared between both test endpoints
#[derive(Clone, Debug)]
pub struct Clock {
    now: Arc<Mutex<Timestamp>>,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            now: Arc::new(Mutex::new(Timestamp::from_duration(
                core::time::Duration::from_millis(1),
            ))),
        }
    }
}

impl Clock {
    pub fn advance(&self, duration: core::time::Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + duration;
    }
}

impl time::Clock for Clock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

const SUITE: CipherSuite = CipherSuite::Aes128Gcm;
const SEED: [u8; 32] = [0x42; 32];

// toy handshake message types
const CLIENT_HELLO: u8 = 1;
const SERVER_HELLO: u8 = 2;
const ENCRYPTED_EXTENSIONS: u8 = 3;
const SERVER_FINISHED: u8 = 4;
const CLIENT_FINISHED: u8 = 5;

fn secret(label: u8) -> [u8; 32] {
    let mut secret = SEED;
    for byte in &mut secret {
        *byte ^= label;
    }
    secret
}

fn message(kind: u8, body: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(3 + body.len());
    bytes.push(kind);
    bytes.extend_from_slice(&(body.len() as u16).to_be_bytes());
    bytes.extend_from_slice(body);
    bytes
}

#[derive(Debug, Default)]
struct MessageBuffer {
    bytes: Vec<u8>,
}

impl MessageBuffer {
    fn push(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    fn pop(&mut self) -> Option<(u8, Vec<u8>)> {
        if self.bytes.len() < 3 {
            return None;
        }
        let kind = self.bytes[0];
        let len = u16::from_be_bytes([self.bytes[1], self.bytes[2]]) as usize;
        if self.bytes.len() < 3 + len {
            return None;
        }
        let body = self.bytes[3..3 + len].to_vec();
        self.bytes.drain(..3 + len);
        Some((kind, body))
    }
}

/// A deterministic stand-in for a TLS 1.3 engine.
///
/// It performs no cryptography of its own: both sides derive identical
/// traffic secrets from a fixed seed, which is all the transport needs
/// to exercise real packet protection end to end.
#[derive(Debug)]
pub struct ToyTls {
    endpoint: endpoint::Type,
    local_params: Vec<u8>,
    peer_params: Option<Bytes>,
    initial_rx: MessageBuffer,
    handshake_rx: MessageBuffer,
    hello_sent: bool,
    handshake_keys_installed: bool,
    app_keys_installed: bool,
    finished_sent: bool,
    peer_finished: bool,
    complete_reported: bool,
}

impl ToyTls {
    pub fn new(endpoint: endpoint::Type) -> Self {
        Self {
            endpoint,
            local_params: Vec::new(),
            peer_params: None,
            initial_rx: MessageBuffer::default(),
            handshake_rx: MessageBuffer::default(),
            hello_sent: false,
            handshake_keys_installed: false,
            app_keys_installed: false,
            finished_sent: false,
            peer_finished: false,
            complete_reported: false,
        }
    }

    fn install_handshake_keys<C: Context>(
        &mut self,
        context: &mut C,
    ) -> Result<(), transport::Error> {
        if self.handshake_keys_installed {
            return Ok(());
        }
        self.handshake_keys_installed = true;
        let (write, read) = match self.endpoint {
            endpoint::Type::Client => (secret(0xc1), secret(0x5e)),
            endpoint::Type::Server => (secret(0x5e), secret(0xc1)),
        };
        context.on_write_secret(Level::Handshake, SUITE, &write)?;
        context.on_read_secret(Level::Handshake, SUITE, &read)?;
        Ok(())
    }

    fn install_app_keys<C: Context>(&mut self, context: &mut C) -> Result<(), transport::Error> {
        if self.app_keys_installed {
            return Ok(());
        }
        self.app_keys_installed = true;
        let (write, read) = match self.endpoint {
            endpoint::Type::Client => (secret(0xa1), secret(0xa2)),
            endpoint::Type::Server => (secret(0xa2), secret(0xa1)),
        };
        context.on_write_secret(Level::Application, SUITE, &write)?;
        context.on_read_secret(Level::Application, SUITE, &read)?;
        Ok(())
    }
}

impl Session for ToyTls {
    fn set_transport_parameters(&mut self, params: &[u8]) -> Result<(), transport::Error> {
        self.local_params = params.to_vec();
        Ok(())
    }

    fn peer_transport_parameters(&mut self) -> Option<Bytes> {
        self.peer_params.clone()
    }

    fn provide_data(&mut self, level: Level, data: &[u8]) -> Result<(), transport::Error> {
        match level {
            Level::Initial => self.initial_rx.push(data),
            Level::Handshake => self.handshake_rx.push(data),
            Level::Application => {}
            Level::EarlyData => {
                return Err(transport::Error::INTERNAL_ERROR
                    .with_reason("unexpected early data in the toy handshake"))
            }
        }
        Ok(())
    }

    fn progress<C: Context>(&mut self, context: &mut C) -> Result<(), transport::Error> {
        // the client speaks first
        if self.endpoint.is_client() && !self.hello_sent {
            self.hello_sent = true;
            let hello = message(CLIENT_HELLO, &self.local_params);
            context.on_handshake_data(Level::Initial, &hello)?;
        }

        while let Some((kind, body)) = self.initial_rx.pop() {
            match (self.endpoint, kind) {
                (endpoint::Type::Server, CLIENT_HELLO) => {
                    self.peer_params = Some(Bytes::from(body));
                    if !self.hello_sent {
                        self.hello_sent = true;
                        let hello = message(SERVER_HELLO, &SEED);
                        context.on_handshake_data(Level::Initial, &hello)?;
                        self.install_handshake_keys(context)?;

                        let extensions =
                            message(ENCRYPTED_EXTENSIONS, &self.local_params.clone());
                        context.on_handshake_data(Level::Handshake, &extensions)?;
                        let finished = message(SERVER_FINISHED, &[]);
                        context.on_handshake_data(Level::Handshake, &finished)?;
                        self.finished_sent = true;
                        self.install_app_keys(context)?;
                    }
                }
                (endpoint::Type::Client, SERVER_HELLO) => {
                    self.install_handshake_keys(context)?;
                }
                _ => {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("unexpected toy handshake message"))
                }
            }
        }

        while let Some((kind, body)) = self.handshake_rx.pop() {
            match (self.endpoint, kind) {
                (endpoint::Type::Client, ENCRYPTED_EXTENSIONS) => {
                    self.peer_params = Some(Bytes::from(body));
                }
                (endpoint::Type::Client, SERVER_FINISHED) => {
                    self.peer_finished = true;
                    self.install_app_keys(context)?;
                    if !self.finished_sent {
                        self.finished_sent = true;
                        let finished = message(CLIENT_FINISHED, &[]);
                        context.on_handshake_data(Level::Handshake, &finished)?;
                    }
                }
                (endpoint::Type::Server, CLIENT_FINISHED) => {
                    self.peer_finished = true;
                }
                _ => {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("unexpected toy handshake message"))
                }
            }
        }

        if self.finished_sent && self.peer_finished && !self.complete_reported {
            self.complete_reported = true;
            context.on_handshake_complete()?;
        }

        Ok(())
    }
}

/// Builds a connection config with testing collaborators
pub fn config(
    endpoint: endpoint::Type,
    limits: Limits,
    clock: &Clock,
) -> Config<ToyTls> {
    Config {
        endpoint,
        limits,
        tls: ToyTls::new(endpoint),
        clock: Box::new(clock.clone()),
        random: Box::new(random::testing::Generator::default()),
        token: None,
        new_token: None,
        session_store: None,
        original_dcid: None,
        retry_scid: None,
    }
}

/// A connected pair of endpoints plus their shared clock
pub struct Pair {
    pub client: Connection<ToyTls>,
    pub server: Connection<ToyTls>,
    pub clock: Clock,
}

impl Pair {
    pub fn new(limits: Limits) -> Self {
        let clock = Clock::default();
        let client = Connection::new(config(endpoint::Type::Client, limits, &clock))
            .expect("client construction");
        let server = Connection::new(config(endpoint::Type::Server, limits, &clock))
            .expect("server construction");
        Self {
            client,
            server,
            clock,
        }
    }

    /// Shuttles datagrams both ways until neither side has anything left
    /// to send. Returns the number of datagrams delivered.
    pub fn drive(&mut self) -> usize {
        self.drive_with_loss(&mut |_, _| false)
    }

    /// Like [`drive`](Self::drive), but `lose(sender_is_client, count)`
    /// may steal datagrams in transit.
    pub fn drive_with_loss(&mut self, lose: &mut dyn FnMut(bool, usize) -> bool) -> usize {
        let mut delivered = 0;
        let mut buffer = [0u8; 1500];
        let mut count = 0;

        for _ in 0..64 {
            let mut progressed = false;

            loop {
                let transmission = self.client.create_udp_payload(&mut buffer);
                if transmission.len == 0 {
                    break;
                }
                progressed = true;
                count += 1;
                if lose(true, count) {
                    continue;
                }
                delivered += 1;
                let _ = self
                    .server
                    .parse_udp_payload(&mut buffer[..transmission.len], transmission.path);
            }

            loop {
                let transmission = self.server.create_udp_payload(&mut buffer);
                if transmission.len == 0 {
                    break;
                }
                progressed = true;
                count += 1;
                if lose(false, count) {
                    continue;
                }
                delivered += 1;
                let _ = self
                    .client
                    .parse_udp_payload(&mut buffer[..transmission.len], transmission.path);
            }

            if !progressed {
                break;
            }
        }

        delivered
    }
}
