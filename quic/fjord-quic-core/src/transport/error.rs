// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::varint::{VarInt, VarIntError};
use core::fmt;
use fjord_codec::DecoderError;

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.1
//# QUIC transport error codes and application error codes are 62-bit
//# unsigned integers.

/// A connection-terminating error at the QUIC layer, as carried in a
/// CONNECTION_CLOSE frame of type 0x1c.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Error {
    pub code: VarInt,
    /// The frame type that triggered the error, when known
    pub frame_type: Option<VarInt>,
    pub reason: &'static str,
}

impl Error {
    pub const fn new(code: VarInt) -> Self {
        Self {
            code,
            frame_type: None,
            reason: "",
        }
    }

    #[must_use]
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }

    #[must_use]
    pub const fn with_frame_type(mut self, frame_type: VarInt) -> Self {
        self.frame_type = Some(frame_type);
        self
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-4.8
    //# The alert level of all TLS alerts is "fatal"; a TLS stack MUST NOT
    //# generate alerts at the "warning" level.
    /// Creates an error in the CRYPTO_ERROR range from a TLS alert code
    #[inline]
    pub const fn crypto_error(alert: u8) -> Self {
        Self::new(VarInt::from_u16(0x100 | alert as u16))
    }

    /// True if the code lies in the CRYPTO_ERROR range (0x100-0x1ff)
    #[inline]
    pub fn is_crypto_error(&self) -> bool {
        (0x100..=0x1ff).contains(&self.code.as_u64())
    }
}

macro_rules! transport_errors {
    ($($(#[doc = $doc:literal])* $name:ident = $code:expr;)*) => {
        impl Error {
            $(
                $(#[doc = $doc])*
                pub const $name: Self = Self::new(VarInt::from_u8($code));
            )*

            /// A human-readable description of the error code
            pub fn description(&self) -> Option<&'static str> {
                match self.code.as_u64() {
                    $(
                        $code => Some(stringify!($name)),
                    )*
                    _ => None,
                }
            }
        }
    };
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.1
//# NO_ERROR (0x00):  An endpoint uses this with CONNECTION_CLOSE to
//#    signal that the connection is being closed abruptly in the absence
//#    of any error.
transport_errors! {
    /// The connection is being closed abruptly in the absence of any error
    NO_ERROR = 0x0;
    /// The endpoint encountered an internal error and cannot continue
    INTERNAL_ERROR = 0x1;
    /// The server refused to accept a new connection
    CONNECTION_REFUSED = 0x2;
    /// Received more data than permitted in advertised data limits
    FLOW_CONTROL_ERROR = 0x3;
    /// Received a frame for a stream identifier that exceeded the
    /// advertised stream limit for the corresponding stream type
    STREAM_LIMIT_ERROR = 0x4;
    /// Received a frame for a stream that was not in a state that
    /// permitted that frame
    STREAM_STATE_ERROR = 0x5;
    /// Received a STREAM frame or RESET_STREAM frame contradicting an
    /// established final size
    FINAL_SIZE_ERROR = 0x6;
    /// Received a badly formatted frame
    FRAME_ENCODING_ERROR = 0x7;
    /// Received transport parameters that were badly formatted, invalid,
    /// absent though mandatory, or present though forbidden
    TRANSPORT_PARAMETER_ERROR = 0x8;
    /// The number of connection IDs provided by the peer exceeds the
    /// advertised active_connection_id_limit
    CONNECTION_ID_LIMIT_ERROR = 0x9;
    /// Detected an error with protocol compliance not covered by more
    /// specific error codes
    PROTOCOL_VIOLATION = 0xa;
    /// Received an invalid Retry Token in a client Initial
    INVALID_TOKEN = 0xb;
    /// The application or application protocol caused the connection to be
    /// closed
    APPLICATION_ERROR = 0xc;
    /// Received more data in CRYPTO frames than can be buffered
    CRYPTO_BUFFER_EXCEEDED = 0xd;
    /// Key update error
    KEY_UPDATE_ERROR = 0xe;
    /// The endpoint has reached the confidentiality or integrity limit for
    /// the AEAD algorithm
    AEAD_LIMIT_REACHED = 0xf;
    /// No viable network path exists
    NO_VIABLE_PATH = 0x10;
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.reason.is_empty() {
            f.write_str(self.reason)
        } else if let Some(description) = self.description() {
            f.write_str(description)
        } else {
            write!(f, "transport error {}", self.code)
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<DecoderError> for Error {
    fn from(error: DecoderError) -> Self {
        match error {
            DecoderError::InvariantViolation(reason) => {
                Self::PROTOCOL_VIOLATION.with_reason(reason)
            }
            _ => Self::PROTOCOL_VIOLATION.with_reason("malformed value"),
        }
    }
}

impl From<VarIntError> for Error {
    fn from(_: VarIntError) -> Self {
        Self::INTERNAL_ERROR.with_reason("varint range exceeded")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_error_range() {
        let error = Error::crypto_error(40);
        assert_eq!(error.code.as_u64(), 0x128);
        assert!(error.is_crypto_error());
        assert!(!Error::PROTOCOL_VIOLATION.is_crypto_error());
    }

    #[test]
    fn display() {
        assert_eq!(
            Error::FLOW_CONTROL_ERROR.to_string(),
            "FLOW_CONTROL_ERROR"
        );
        assert_eq!(
            Error::PROTOCOL_VIOLATION.with_reason("bad frame").to_string(),
            "bad frame"
        );
    }
}
