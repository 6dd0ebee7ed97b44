// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Loss-recovery arithmetic shared by every packet number space

use core::time::Duration;

pub mod congestion;
pub mod pacing;
pub mod rtt;

pub use congestion::{CongestionController, NewReno};
pub use pacing::Pacer;
pub use rtt::RttEstimator;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2
//# When no previous RTT is available, the initial RTT SHOULD be set to
//# 333 milliseconds.
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(333);

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
//# The RECOMMENDED value of the timer granularity (kGranularity) is 1
//# millisecond.
pub const K_GRANULARITY: Duration = Duration::from_millis(1);

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
//# The RECOMMENDED initial value for the packet reordering threshold
//# (kPacketThreshold) is 3, based on best practices for TCP loss
//# detection
pub const K_PACKET_THRESHOLD: u64 = 3;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.1
//# The RECOMMENDED value for kPersistentCongestionThreshold is 3
pub const K_PERSISTENT_CONGESTION_THRESHOLD: u32 = 3;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
//# When a PTO timer expires, a sender MUST send at least one ack-
//# eliciting packet in the packet number space as a probe.  An endpoint
//# MAY send up to two full-sized datagrams containing ack-eliciting
//# packets
pub const MAX_PTO_PROBES: u8 = 2;
