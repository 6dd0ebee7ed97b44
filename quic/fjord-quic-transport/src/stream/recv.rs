// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The receiving half of a stream

use crate::{
    buffer::Reassembler,
    stream::{flow::RxLimiter, StreamError},
};
use fjord_quic_core::{stream::state::Receiver, transport, varint::VarInt};

#[derive(Debug)]
pub struct RecvStream {
    state: Receiver,
    assembler: Reassembler,
    pub flow: RxLimiter,
    /// Highest offset seen, for connection-level flow accounting
    highest_received: u64,
    final_size: Option<u64>,
    reset_code: Option<VarInt>,
    /// A STOP_SENDING frame the application asked for
    pub stop_sending: Option<VarInt>,
}

impl RecvStream {
    pub fn new(window: VarInt) -> Self {
        Self {
            state: Receiver::default(),
            assembler: Reassembler::new(window.as_u64().min(usize::MAX as u64) as usize),
            flow: RxLimiter::new(window),
            highest_received: 0,
            final_size: None,
            reset_code: None,
            stop_sending: None,
        }
    }

    #[inline]
    pub fn state(&self) -> &Receiver {
        &self.state
    }

    #[inline]
    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    /// Handles a STREAM frame. Returns the number of bytes by which the
    /// highest received offset grew, which the caller charges against
    /// connection-level flow control.
    pub fn on_stream_frame(
        &mut self,
        offset: VarInt,
        data: &[u8],
        fin: bool,
    ) -> Result<u64, transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-3.2
        //# After receiving a RESET_STREAM, the receiver discards any data
        //# that it already received on that stream.
        if self.state.is_reset() || self.state.is_terminal() {
            return Ok(0);
        }

        let end = offset
            .checked_add_usize(data.len())
            .ok_or(transport::Error::FLOW_CONTROL_ERROR.with_reason("stream offset overflow"))?
            .as_u64();

        if let Some(final_size) = self.final_size {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-4.5
            //# Once a final size for a stream is known, it cannot change.  If a
            //# RESET_STREAM or STREAM frame is received indicating a change in
            //# the final size for the stream, an endpoint SHOULD respond with an
            //# error of type FINAL_SIZE_ERROR
            if end > final_size || (fin && end != final_size) {
                return Err(transport::Error::FINAL_SIZE_ERROR);
            }
        }
        if fin && end < self.highest_received {
            return Err(transport::Error::FINAL_SIZE_ERROR);
        }

        self.flow.on_data_received(VarInt::new(end).expect("checked above"))?;

        let growth = end.saturating_sub(self.highest_received);
        self.highest_received = self.highest_received.max(end);

        self.assembler
            .insert(offset.as_u64(), data)
            .map_err(|_| transport::Error::FLOW_CONTROL_ERROR.with_reason("receive buffer overrun"))?;

        if fin {
            self.final_size = Some(end);
            if !self.state.is_size_known() {
                let _ = self.state.on_fin_offset_known();
            }
        } else if self.state.is_idle() {
            let _ = self.state.on_bytes();
        }

        if let Some(final_size) = self.final_size {
            if self.state.is_size_known()
                && !self.state.is_data_received()
                && self.assembler.is_complete_up_to(final_size)
            {
                let _ = self.state.on_all_bytes_received();
            }
        }

        Ok(growth)
    }

    /// Handles a RESET_STREAM frame. Returns the flow-control growth, as
    /// for [`on_stream_frame`](Self::on_stream_frame).
    pub fn on_reset(
        &mut self,
        code: VarInt,
        final_size: VarInt,
    ) -> Result<u64, transport::Error> {
        let final_size = final_size.as_u64();

        if let Some(known) = self.final_size {
            if known != final_size {
                return Err(transport::Error::FINAL_SIZE_ERROR);
            }
        }
        if final_size < self.highest_received {
            return Err(transport::Error::FINAL_SIZE_ERROR);
        }

        // the reset still consumes flow credit up to its final size
        self.flow
            .on_data_received(VarInt::new(final_size).map_err(|_| {
                transport::Error::FRAME_ENCODING_ERROR.with_reason("final size overflow")
            })?)?;
        let growth = final_size.saturating_sub(self.highest_received);
        self.highest_received = self.highest_received.max(final_size);

        //= https://www.rfc-editor.org/rfc/rfc9000#section-3.2
        //# An implementation MAY interrupt delivery of stream data, discard
        //# any data that was not consumed, and signal the receipt of the
        //# RESET_STREAM.
        if self.state.on_reset().is_ok() {
            self.final_size = Some(final_size);
            self.reset_code = Some(code);
            self.assembler.clear();
        }

        Ok(growth)
    }

    /// Application read. Returns the bytes copied and whether the stream
    /// finished cleanly.
    pub fn read(&mut self, out: &mut [u8]) -> Result<(usize, bool), StreamError> {
        if let Some(code) = self.reset_code {
            let _ = self.state.on_app_read_reset();
            return Err(StreamError::StreamReset(code));
        }

        let copied = self.assembler.read(out);
        self.flow.on_data_consumed(copied);

        let finished = match self.final_size {
            Some(final_size) => self.assembler.read_offset() >= final_size,
            None => false,
        };
        if finished && self.state.is_data_received() {
            let _ = self.state.on_app_read_all();
        }

        Ok((copied, finished))
    }

    /// Asks the peer to stop sending; the actual frame is queued by the
    /// stream manager
    pub fn stop_sending(&mut self, code: VarInt) {
        if !self.state.is_terminal() && !self.state.is_reset() {
            self.stop_sending = Some(code);
        }
    }

    /// True if the application consumed everything there was
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recv() -> RecvStream {
        RecvStream::new(VarInt::from_u16(1000))
    }

    #[test]
    fn ordered_delivery_with_fin() {
        let mut stream = recv();
        assert_eq!(
            stream.on_stream_frame(VarInt::ZERO, b"abc", false).unwrap(),
            3
        );
        assert_eq!(
            stream.on_stream_frame(VarInt::from_u8(3), b"def", true).unwrap(),
            3
        );
        assert!(stream.state().is_data_received());

        let mut out = [0u8; 16];
        let (n, finished) = stream.read(&mut out).unwrap();
        assert_eq!(&out[..n], b"abcdef");
        assert!(finished);
        assert!(stream.is_finished());
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let mut stream = recv();
        stream.on_stream_frame(VarInt::ZERO, b"abc", false).unwrap();
        // retransmission with overlap: no growth, no duplicate bytes
        assert_eq!(
            stream.on_stream_frame(VarInt::ZERO, b"abc", false).unwrap(),
            0
        );

        let mut out = [0u8; 16];
        let (n, _) = stream.read(&mut out).unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn flow_control_violation() {
        let mut stream = RecvStream::new(VarInt::from_u8(10));
        let error = stream
            .on_stream_frame(VarInt::from_u8(8), b"abc", false)
            .unwrap_err();
        assert_eq!(error.code, transport::Error::FLOW_CONTROL_ERROR.code);
    }

    #[test]
    fn final_size_must_not_change() {
        let mut stream = recv();
        stream.on_stream_frame(VarInt::ZERO, b"abc", true).unwrap();

        // data beyond the final size
        assert!(stream
            .on_stream_frame(VarInt::from_u8(3), b"d", false)
            .is_err());
        // a different fin offset
        assert!(stream.on_stream_frame(VarInt::ZERO, b"abcd", true).is_err());
        // reset with a contradicting final size
        assert!(stream.on_reset(VarInt::ZERO, VarInt::from_u8(9)).is_err());
    }

    #[test]
    fn reset_discards_data_and_surfaces_code() {
        let mut stream = recv();
        stream.on_stream_frame(VarInt::ZERO, b"abc", false).unwrap();
        let growth = stream.on_reset(VarInt::from_u8(7), VarInt::from_u8(10)).unwrap();
        assert_eq!(growth, 7);

        // further stream frames are ignored
        assert_eq!(
            stream.on_stream_frame(VarInt::from_u8(3), b"xyz", false).unwrap(),
            0
        );

        let mut out = [0u8; 4];
        assert!(matches!(
            stream.read(&mut out),
            Err(StreamError::StreamReset(code)) if code == VarInt::from_u8(7)
        ));
        assert!(stream.is_finished());
    }

    #[test]
    fn fin_below_received_data_is_an_error() {
        let mut stream = recv();
        stream.on_stream_frame(VarInt::from_u8(4), b"ef", false).unwrap();
        assert!(stream.on_stream_frame(VarInt::ZERO, b"ab", true).is_err());
    }
}
