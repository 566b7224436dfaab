use std::fmt;
use std::time::Duration;

use crate::bandwidth::{Bitrate, DataSize};

// Utility function parameters. These three constants are part of the
// estimator contract, not tunables.
const THROUGHPUT_POWER: f64 = 0.9;
const DELAY_GRADIENT_COEFFICIENT: f64 = 0.005;
const LOSS_COEFFICIENT: f64 = 10.0;

/// A bounded time window with a single target sending bitrate.
///
/// Each interval is a micro-experiment: the transport is asked to send at
/// `target` for the window and the interval accumulates what was actually
/// sent and what the remote acknowledged. Once feedback collection is done
/// the interval is scored via [`MonitorInterval::utility`].
///
/// All times are relative microseconds against the estimator's first sent
/// packet.
pub(crate) struct MonitorInterval {
    target: Bitrate,
    start: u64,
    duration: Duration,

    first_sent: Option<u64>,
    last_sent: Option<u64>,
    first_recv: Option<u64>,
    last_recv: Option<u64>,

    sent_size: DataSize,
    received_size: DataSize,

    total_sent_packets: u64,
    total_feedbacked_packets: u64,
    lost_packets: u64,

    /// Per-packet (send time, delay delta) samples in feedback-arrival order.
    deltas: Vec<(u64, i64)>,

    feedback_collection_done: bool,
}

impl MonitorInterval {
    pub fn new(target: Bitrate, start: u64, duration: Duration) -> Self {
        MonitorInterval {
            target,
            start,
            duration,
            first_sent: None,
            last_sent: None,
            first_recv: None,
            last_recv: None,
            sent_size: DataSize::ZERO,
            received_size: DataSize::ZERO,
            total_sent_packets: 0,
            total_feedbacked_packets: 0,
            lost_packets: 0,
            deltas: Vec::new(),
            feedback_collection_done: false,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.start + self.duration.as_micros() as u64
    }

    pub fn target_bitrate(&self) -> Bitrate {
        self.target
    }

    pub fn is_feedback_collection_done(&self) -> bool {
        self.feedback_collection_done
    }

    /// Record a packet sent at `sent`. Returns whether the packet belongs to
    /// this interval's window.
    pub fn sent_packet(&mut self, sent: u64, size: DataSize) -> bool {
        if sent < self.start || sent > self.end() {
            return false;
        }

        self.first_sent.get_or_insert(sent);
        self.last_sent = Some(sent);
        self.sent_size += size;
        self.total_sent_packets += 1;

        true
    }

    /// Record feedback for a packet sent at `sent`. `recv` is the relative
    /// receive time, or `None` when the packet was reported lost.
    ///
    /// Returns whether the feedback was accounted to this interval.
    pub fn feedback(&mut self, sent: u64, recv: Option<u64>, size: DataSize, delta: i64) -> bool {
        if sent < self.start {
            return false;
        }

        // A packet sent after the window closing means feedback has caught up
        // with the interval. Packets reordered past this point are treated as
        // lost; waiting longer for stragglers would leave the window open
        // indefinitely.
        if sent > self.end() {
            self.feedback_collection_done = true;
            return false;
        }

        self.total_feedbacked_packets += 1;

        match recv {
            Some(recv) => {
                self.first_recv.get_or_insert(recv);
                self.last_recv = Some(recv);
                self.received_size += size;
                self.deltas.push((sent, delta));
            }
            None => {
                self.lost_packets += 1;
            }
        }

        true
    }

    pub fn sent_bitrate(&self) -> Bitrate {
        rate_over(self.sent_size, self.first_sent, self.last_sent)
    }

    pub fn received_bitrate(&self) -> Bitrate {
        rate_over(self.received_size, self.first_recv, self.last_recv)
    }

    /// Fraction of feedbacked packets that were reported lost.
    pub fn loss_rate(&self) -> f64 {
        if self.total_feedbacked_packets == 0 {
            return 0.0;
        }

        self.lost_packets as f64 / self.total_feedbacked_packets as f64
    }

    /// Least squares slope of delay delta against send time.
    ///
    /// Uses the numerically compact centred form: with the time values mean
    /// centred, the uncentred delay values produce the same slope.
    pub fn delay_gradient(&self) -> f64 {
        if self.deltas.is_empty() {
            return 0.0;
        }

        let time_mean =
            self.deltas.iter().map(|(t, _)| *t as f64).sum::<f64>() / self.deltas.len() as f64;

        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for (time, delay) in &self.deltas {
            let centred = *time as f64 - time_mean;
            numerator += centred * *delay as f64;
            denominator += centred * centred;
        }

        if denominator == 0.0 {
            return 0.0;
        }

        numerator / denominator
    }

    /// The PCC-Vivace utility of this interval. Higher is better.
    ///
    /// Rewards throughput and penalizes delay growth and loss:
    /// `U = rate^0.9 - 0.005 * gradient * rate - 10 * loss * rate`.
    pub fn utility(&self) -> f64 {
        let bitrate = self.sent_bitrate().as_f64();
        let loss_rate = self.loss_rate();
        let delay_gradient = self.delay_gradient();

        bitrate.powf(THROUGHPUT_POWER)
            - (DELAY_GRADIENT_COEFFICIENT * delay_gradient * bitrate)
            - (LOSS_COEFFICIENT * loss_rate * bitrate)
    }
}

fn rate_over(size: DataSize, first: Option<u64>, last: Option<u64>) -> Bitrate {
    let (Some(first), Some(last)) = (first, last) else {
        return Bitrate::ZERO;
    };

    // A single sample spans no time; a backwards span can only come from
    // receiver-clock reordering across feedback batches. Both yield zero.
    if last <= first {
        return Bitrate::ZERO;
    }

    size / Duration::from_micros(last - first)
}

impl fmt::Debug for MonitorInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MonitorInterval {{ from: {}, to: {}, target: {}, sent: {}, recv: {}, \
             total_sent: {}, feedbacked: {}, lost: {}, done: {} }}",
            self.start,
            self.end(),
            self.target,
            self.sent_bitrate(),
            self.received_bitrate(),
            self.total_sent_packets,
            self.total_feedbacked_packets,
            self.lost_packets,
            self.feedback_collection_done,
        )
    }
}
