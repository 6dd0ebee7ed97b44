// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Half-stream state machines

use crate::state::{event, is};

//= https://www.rfc-editor.org/rfc/rfc9000#section-3.1
//#        o
//#       | Create Stream (Sending)
//#       | Peer Creates Bidirectional Stream
//#       v
//#   +-------+
//#   | Ready | Send RESET_STREAM
//#   |       |-----------------------.
//#   +-------+                       |
//#       |                           |
//#       | Send STREAM /             |
//#       |      STREAM_DATA_BLOCKED  |
//#       v                           |
//#   +-------+                       |
//#   | Send  | Send RESET_STREAM     |
//#   |       |---------------------->|
//#   +-------+                       |
//#       |                           |
//#       | Send STREAM + FIN         |
//#       v                           v
//#   +-------+                   +-------+
//#   | Data  | Send RESET_STREAM | Reset |
//#   | Sent  |------------------>| Sent  |
//#   +-------+                   +-------+
//#       |                           |
//#       | Recv All ACKs             | Recv ACK
//#       v                           v
//#   +-------+                   +-------+
//#   | Data  |                   | Reset |
//#   | Recvd |                   | Recvd |
//#   +-------+                   +-------+

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Sender {
    #[default]
    Ready,
    Send,
    DataSent,
    DataRecvd,
    ResetSent,
    ResetRecvd,
}

impl Sender {
    is!(is_ready, Ready);
    is!(is_sending, Send);
    is!(is_data_sent, DataSent);
    is!(is_reset_sent, ResetSent | ResetRecvd);
    is!(
        /// No further state changes can occur
        is_terminal,
        DataRecvd | ResetRecvd
    );

    event! {
        on_send(Ready | Send => Send);
        /// The fin offset is fixed once all queued data has been handed to
        /// the packet layer
        on_send_fin(Ready | Send => DataSent);
        on_all_data_acked(DataSent => DataRecvd);
        on_reset(Ready | Send | DataSent => ResetSent);
        on_reset_acked(ResetSent => ResetRecvd);
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-3.2
//#        o
//#       | Recv STREAM / STREAM_DATA_BLOCKED / RESET_STREAM
//#       | Create Bidirectional Stream (Sending)
//#       | Recv MAX_STREAM_DATA / STOP_SENDING (Bidirectional)
//#       | Create Higher-Numbered Stream
//#       v
//#   +-------+
//#   | Recv  | Recv RESET_STREAM
//#   |       |-----------------------.
//#   +-------+                       |
//#       |                           |
//#       | Recv STREAM + FIN         |
//#       v                           |
//#   +-------+                       |
//#   | Size  | Recv RESET_STREAM     |
//#   | Known |---------------------->|
//#   +-------+                       |
//#       |                           |
//#       | Recv All Data             |
//#       v                           v
//#   +-------+ Recv RESET_STREAM +-------+
//#   | Data  |--- (optional) --->| Reset |
//#   | Recvd |  Recv All Data    | Recvd |
//#   +-------+ <-- (optional) ---+-------+
//#       |                           |
//#       | App Read All Data         | App Read Reset
//#       v                           v
//#   +-------+                   +-------+
//#   | Data  |                   | Reset |
//#   | Read  |                   | Read  |
//#   +-------+                   +-------+

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Receiver {
    /// Created but no bytes received yet
    #[default]
    Idle,
    Recv,
    SizeKnown,
    DataRecvd,
    DataRead,
    ResetRecvd,
    ResetRead,
}

impl Receiver {
    is!(is_idle, Idle);
    is!(is_receiving, Recv | SizeKnown);
    is!(is_size_known, SizeKnown | DataRecvd | DataRead);
    is!(is_data_received, DataRecvd);
    is!(
        /// A RESET_STREAM took effect and was not superseded by a full read
        is_reset,
        ResetRecvd | ResetRead
    );
    is!(is_terminal, DataRead | ResetRead);

    event! {
        on_bytes(Idle | Recv => Recv);
        on_fin_offset_known(Idle | Recv => SizeKnown);
        on_all_bytes_received(SizeKnown => DataRecvd);
        on_app_read_all(DataRecvd => DataRead);
        on_reset(Idle | Recv | SizeKnown | DataRecvd => ResetRecvd);
        on_app_read_reset(ResetRecvd => ResetRead);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_happy_path() {
        let mut state = Sender::default();
        assert!(state.is_ready());
        state.on_send().unwrap();
        state.on_send().unwrap();
        state.on_send_fin().unwrap();
        assert!(state.is_data_sent());
        state.on_all_data_acked().unwrap();
        assert!(state.is_terminal());

        // no events are valid in a terminal state
        assert!(state.on_send().is_err());
        assert!(state.on_reset().is_err());
    }

    #[test]
    fn sender_reset_path() {
        let mut state = Sender::default();
        state.on_send().unwrap();
        state.on_reset().unwrap();
        assert!(state.is_reset_sent());
        assert!(state.on_send().is_err());
        state.on_reset_acked().unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn receiver_happy_path() {
        let mut state = Receiver::default();
        state.on_bytes().unwrap();
        state.on_fin_offset_known().unwrap();
        assert!(state.is_size_known());
        state.on_all_bytes_received().unwrap();
        state.on_app_read_all().unwrap();
        assert!(state.is_terminal());
        assert!(state.on_reset().is_err());
    }

    #[test]
    fn receiver_reset_path() {
        let mut state = Receiver::default();
        state.on_bytes().unwrap();
        state.on_reset().unwrap();
        assert!(state.is_reset());
        state.on_app_read_reset().unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn fin_with_first_bytes() {
        // a single STREAM frame can carry both the first bytes and the fin
        let mut state = Receiver::default();
        state.on_fin_offset_known().unwrap();
        assert!(state.is_size_known());
    }
}
