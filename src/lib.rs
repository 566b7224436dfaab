//! Send-side bandwidth estimation for real-time media transports.
//!
//! This is a PCC-Vivace style estimator driven by transport-wide feedback:
//! instead of filtering packet arrival times, it runs continuous
//! micro-experiments. Two consecutive monitor intervals (the probing pair)
//! carry slightly different target bitrates; each interval is scored with a
//! utility function rewarding throughput and penalizing loss and delay
//! growth, and the finite-difference utility gradient between the pair
//! steers the next estimate.
//!
//! The estimator is sans-IO: the transport reports sent packets and
//! feedback messages with externally sourced microsecond timestamps, and a
//! [`TargetBitrateListener`] receives the loss-adjusted rate whenever an
//! estimation step publishes.
//!
//! ```
//! use std::collections::BTreeMap;
//! use vivace::{DataSize, PacketStats, SendSideBandwidthEstimator};
//!
//! let mut bwe = SendSideBandwidthEstimator::new();
//!
//! bwe.on_sent_packet(&PacketStats {
//!     seq: 0,
//!     sent_time: 1_000,
//!     size: DataSize::bytes(1200),
//!     marker: false,
//!     rtx: false,
//!     probing: false,
//! });
//!
//! // Later, transport-wide feedback arrives: seq -> receive time (0 = lost).
//! let feedback = BTreeMap::from([(0, 21_000)]);
//! bwe.on_received_feedback(0, &feedback, 40_000);
//! ```

#[macro_use]
extern crate tracing;

mod bandwidth;
mod dump;
mod estimator;
mod interval;
mod seq;
mod stats;

pub use bandwidth::{Bitrate, DataSize};
pub use dump::DumpError;
pub use estimator::{SendSideBandwidthEstimator, TargetBitrateListener};
pub use seq::SeqNo;
pub use stats::PacketStats;
