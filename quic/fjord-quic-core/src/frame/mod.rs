// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Codecs for every QUIC frame type.
//!
//! Each frame lives in its own module with a decode implementation
//! parameterized by the frame's tag byte and an [`EncoderValue`] for the
//! sending side. The [`Frame`] enum ties them together for the receive path.

use crate::{endpoint, packet, varint::VarInt};
use fjord_codec::{
    decoder_invariant, decoder_value, DecoderBuffer, DecoderError, Encoder, EncoderValue,
};

pub type Tag = u8;

/// Implements the codec for a frame that is a fixed tag followed by plain
/// encodable fields
macro_rules! simple_frame_codec {
    ($name:ident { $($field:ident),* $(,)? }, $tag:expr) => {
        fjord_codec::decoder_parameterized_value!(
            impl<'a> $name {
                fn decode(_tag: crate::frame::Tag, buffer: Buffer) -> Result<Self> {
                    $(
                        let ($field, buffer) = buffer.decode()?;
                    )*
                    Ok(($name { $($field),* }, buffer))
                }
            }
        );

        impl fjord_codec::EncoderValue for $name {
            #[inline]
            fn encode<E: fjord_codec::Encoder>(&self, buffer: &mut E) {
                buffer.encode(&$tag);
                $(
                    buffer.encode(&self.$field);
                )*
            }
        }
    };
}

pub mod ack;
pub mod connection_close;
pub mod crypto;
pub mod data_blocked;
pub mod datagram;
pub mod handshake_done;
pub mod max_data;
pub mod max_stream_data;
pub mod max_streams;
pub mod new_connection_id;
pub mod new_token;
pub mod padding;
pub mod path_challenge;
pub mod path_response;
pub mod ping;
pub mod reset_stream;
pub mod retire_connection_id;
pub mod stop_sending;
pub mod stream;
pub mod stream_data_blocked;
pub mod streams_blocked;

pub use ack::Ack;
pub use connection_close::ConnectionClose;
pub use crypto::Crypto;
pub use data_blocked::DataBlocked;
pub use datagram::Datagram;
pub use handshake_done::HandshakeDone;
pub use max_data::MaxData;
pub use max_stream_data::MaxStreamData;
pub use max_streams::MaxStreams;
pub use new_connection_id::NewConnectionId;
pub use new_token::NewToken;
pub use padding::Padding;
pub use path_challenge::PathChallenge;
pub use path_response::PathResponse;
pub use ping::Ping;
pub use reset_stream::ResetStream;
pub use retire_connection_id::RetireConnectionId;
pub use stop_sending::StopSending;
pub use stream::Stream;
pub use stream_data_blocked::StreamDataBlocked;
pub use streams_blocked::StreamsBlocked;

/// A decoded frame borrowing its data from the packet payload
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Padding(Padding),
    Ping(Ping),
    Ack(Ack<ack::AckRangesDecoder<'a>>),
    ResetStream(ResetStream),
    StopSending(StopSending),
    Crypto(Crypto<'a>),
    NewToken(NewToken<'a>),
    Stream(Stream<'a>),
    MaxData(MaxData),
    MaxStreamData(MaxStreamData),
    MaxStreams(MaxStreams),
    DataBlocked(DataBlocked),
    StreamDataBlocked(StreamDataBlocked),
    StreamsBlocked(StreamsBlocked),
    NewConnectionId(NewConnectionId<'a>),
    RetireConnectionId(RetireConnectionId),
    PathChallenge(PathChallenge),
    PathResponse(PathResponse),
    ConnectionClose(ConnectionClose<'a>),
    HandshakeDone(HandshakeDone),
    Datagram(Datagram<'a>),
}

decoder_value!(
    impl<'a> Frame<'a> {
        fn decode(buffer: Buffer) -> Result<Self> {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
            //# The Frame Type field uses a variable-length integer encoding
            //# (see Section 16), with one exception.  To ensure simple and
            //# efficient implementations of frame parsing, a frame type MUST
            //# use the shortest possible encoding.
            let first = buffer.peek_byte(0)?;
            let tag_len = 1usize << (first >> 6);
            let (tag, buffer) = buffer.decode::<VarInt>()?;
            decoder_invariant!(
                tag.encoding_len() == tag_len,
                "frame type must use the shortest possible encoding"
            );

            let tag_byte = match u8::try_from(tag.as_u64()) {
                Ok(tag_byte) => tag_byte,
                Err(_) => return Err(unknown_frame_type()),
            };

            macro_rules! parameterized {
                ($variant:ident) => {{
                    let (frame, buffer) = buffer.decode_parameterized(tag_byte)?;
                    (Frame::$variant(frame), buffer)
                }};
            }

            Ok(match tag_byte {
                padding::TAG => parameterized!(Padding),
                ping::TAG => parameterized!(Ping),
                ack::TAG..=ack::TAG_W_ECN => parameterized!(Ack),
                reset_stream::TAG => parameterized!(ResetStream),
                stop_sending::TAG => parameterized!(StopSending),
                crypto::TAG => parameterized!(Crypto),
                new_token::TAG => parameterized!(NewToken),
                0x08..=0x0f => parameterized!(Stream),
                max_data::TAG => parameterized!(MaxData),
                max_stream_data::TAG => parameterized!(MaxStreamData),
                max_streams::BIDI_TAG | max_streams::UNI_TAG => parameterized!(MaxStreams),
                data_blocked::TAG => parameterized!(DataBlocked),
                stream_data_blocked::TAG => parameterized!(StreamDataBlocked),
                streams_blocked::BIDI_TAG | streams_blocked::UNI_TAG => {
                    parameterized!(StreamsBlocked)
                }
                new_connection_id::TAG => parameterized!(NewConnectionId),
                retire_connection_id::TAG => parameterized!(RetireConnectionId),
                path_challenge::TAG => parameterized!(PathChallenge),
                path_response::TAG => parameterized!(PathResponse),
                connection_close::TRANSPORT_TAG | connection_close::APPLICATION_TAG => {
                    parameterized!(ConnectionClose)
                }
                handshake_done::TAG => parameterized!(HandshakeDone),
                datagram::TAG | datagram::TAG_W_LEN => parameterized!(Datagram),
                _ => return Err(unknown_frame_type()),
            })
        }
    }
);

#[inline]
fn unknown_frame_type() -> DecoderError {
    //= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
    //# An endpoint MUST treat the receipt of a frame of unknown type as a
    //# connection error of type FRAME_ENCODING_ERROR.
    DecoderError::InvariantViolation("unknown frame type")
}

impl<'a> Frame<'a> {
    pub fn tag(&self) -> Tag {
        match self {
            Frame::Padding(frame) => frame.tag(),
            Frame::Ping(frame) => frame.tag(),
            Frame::Ack(frame) => frame.tag(),
            Frame::ResetStream(frame) => frame.tag(),
            Frame::StopSending(frame) => frame.tag(),
            Frame::Crypto(frame) => frame.tag(),
            Frame::NewToken(frame) => frame.tag(),
            Frame::Stream(frame) => frame.tag(),
            Frame::MaxData(frame) => frame.tag(),
            Frame::MaxStreamData(frame) => frame.tag(),
            Frame::MaxStreams(frame) => frame.tag(),
            Frame::DataBlocked(frame) => frame.tag(),
            Frame::StreamDataBlocked(frame) => frame.tag(),
            Frame::StreamsBlocked(frame) => frame.tag(),
            Frame::NewConnectionId(frame) => frame.tag(),
            Frame::RetireConnectionId(frame) => frame.tag(),
            Frame::PathChallenge(frame) => frame.tag(),
            Frame::PathResponse(frame) => frame.tag(),
            Frame::ConnectionClose(frame) => frame.tag(),
            Frame::HandshakeDone(frame) => frame.tag(),
            Frame::Datagram(frame) => frame.tag(),
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-2
    //# Packets that contain ack-eliciting frames elicit an ACK from the
    //# receiver within the maximum acknowledgment delay and are called
    //# ack-eliciting packets.
    #[inline]
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(
            self,
            Frame::Padding(_) | Frame::Ack(_) | Frame::ConnectionClose(_)
        )
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#appendix-A.1.1
    //# Packets are considered in flight when they are ack-eliciting or
    //# contain a PADDING frame, and they have been sent but are not
    //# acknowledged, declared lost, or discarded along with old keys.
    #[inline]
    pub fn counts_in_flight(&self) -> bool {
        !matches!(self, Frame::Ack(_) | Frame::ConnectionClose(_))
    }

    /// Validates that this frame may appear in the given packet type when
    /// sent by `sender`.
    ///
    //= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
    //# The format and semantics of each frame type are explained in more
    //# detail in Section 19.  Table 3 also lists the packet types on which
    //# each frame type may appear.
    pub fn validate_placement(
        &self,
        packet_type: packet::Type,
        sender: endpoint::Type,
    ) -> Result<(), crate::transport::Error> {
        use crate::packet::Type::*;
        use crate::transport::Error;

        let allowed = match self {
            // "IH01"
            Frame::Padding(_) | Frame::Ping(_) => true,
            // "IH_1"
            Frame::Ack(_) => !matches!(packet_type, ZeroRtt),
            Frame::Crypto(_) => !matches!(packet_type, ZeroRtt),
            Frame::ConnectionClose(frame) if !frame.is_application_close() => {
                !matches!(packet_type, ZeroRtt)
            }
            // "__1" and server-only
            Frame::NewToken(_) => {
                matches!(packet_type, OneRtt) && sender.is_server()
            }
            Frame::HandshakeDone(_) => {
                matches!(packet_type, OneRtt) && sender.is_server()
            }
            Frame::PathResponse(_) => matches!(packet_type, OneRtt),
            // "__01"
            _ => matches!(packet_type, ZeroRtt | OneRtt),
        };

        if allowed {
            Ok(())
        } else {
            Err(Error::PROTOCOL_VIOLATION
                .with_reason("frame is not allowed in this packet type")
                .with_frame_type(VarInt::from_u8(self.tag())))
        }
    }
}

impl<'a> EncoderValue for Frame<'a> {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        match self {
            Frame::Padding(frame) => buffer.encode(frame),
            Frame::Ping(frame) => buffer.encode(frame),
            Frame::Ack(frame) => buffer.encode(frame),
            Frame::ResetStream(frame) => buffer.encode(frame),
            Frame::StopSending(frame) => buffer.encode(frame),
            Frame::Crypto(frame) => buffer.encode(frame),
            Frame::NewToken(frame) => buffer.encode(frame),
            Frame::Stream(frame) => buffer.encode(frame),
            Frame::MaxData(frame) => buffer.encode(frame),
            Frame::MaxStreamData(frame) => buffer.encode(frame),
            Frame::MaxStreams(frame) => buffer.encode(frame),
            Frame::DataBlocked(frame) => buffer.encode(frame),
            Frame::StreamDataBlocked(frame) => buffer.encode(frame),
            Frame::StreamsBlocked(frame) => buffer.encode(frame),
            Frame::NewConnectionId(frame) => buffer.encode(frame),
            Frame::RetireConnectionId(frame) => buffer.encode(frame),
            Frame::PathChallenge(frame) => buffer.encode(frame),
            Frame::PathResponse(frame) => buffer.encode(frame),
            Frame::ConnectionClose(frame) => buffer.encode(frame),
            Frame::HandshakeDone(frame) => buffer.encode(frame),
            Frame::Datagram(frame) => buffer.encode(frame),
        }
    }
}

/// Iterates over every frame in a packet payload
pub struct FrameIter<'a> {
    buffer: DecoderBuffer<'a>,
}

impl<'a> FrameIter<'a> {
    #[inline]
    pub fn new(buffer: DecoderBuffer<'a>) -> Self {
        Self { buffer }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<Frame<'a>, DecoderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            return None;
        }
        match self.buffer.decode::<Frame>() {
            Ok((frame, remaining)) => {
                self.buffer = remaining;
                Some(Ok(frame))
            }
            Err(error) => {
                self.buffer = DecoderBuffer::new(&[]);
                Some(Err(error))
            }
        }
    }
}

#[cfg(test)]
mod tests;
