use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::bandwidth::Bitrate;
use crate::dump::{DumpError, DumpRecord, FeedbackDump};
use crate::interval::MonitorInterval;
use crate::seq::{extend_seq, SeqNo};
use crate::stats::PacketStats;

/// Duration of the initial interval measuring the uncongested receive rate.
const STARTUP_DURATION: Duration = Duration::from_millis(1500);
/// Duration of each probing interval.
const MONITOR_DURATION: Duration = Duration::from_millis(250);
/// How long past the last interval end (plus RTT) we wait for feedback
/// before concluding it is not coming.
const MONITOR_TIMEOUT: Duration = Duration::from_millis(750);

const MIN_RATE: Bitrate = Bitrate::kbps(128);
const MAX_RATE: Bitrate = Bitrate::mbps(100);

/// Smallest step between the two probing targets.
const MIN_RATE_CHANGE: Bitrate = Bitrate::bps(4000);
/// Fraction of the current estimate used as the probing step.
const RATE_CHANGE_FRACTION: f64 = 0.1;
/// Conversion from utility gradient to bitrate change.
const CONVERSION_FACTOR: f64 = 2.0;

/// Receiver of new rate targets.
///
/// Invoked synchronously from inside [`SendSideBandwidthEstimator::on_sent_packet`]
/// and [`SendSideBandwidthEstimator::on_received_feedback`] whenever an
/// estimation step publishes. The listener must not call back into the
/// estimator.
pub trait TargetBitrateListener {
    /// A new loss-adjusted rate is available for the rate controller.
    fn on_target_bitrate_requested(&mut self, bitrate: Bitrate);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Increase,
    Decrease,
    Overshoot,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Increase => write!(f, "increase"),
            State::Decrease => write!(f, "decrease"),
            State::Overshoot => write!(f, "overshoot"),
        }
    }
}

/// Send-side bandwidth estimator.
///
/// A PCC-Vivace style congestion controller: instead of filtering arrival
/// times, it runs back-to-back micro-experiments. Two consecutive
/// [`MonitorInterval`]s (the probing pair) are sent at slightly different
/// target bitrates; once feedback for both has been collected each interval
/// is scored with a utility function combining throughput, loss and delay
/// gradient, and the utility difference steers the next estimate.
///
/// The estimator is driven entirely by the transport: [`on_sent_packet`] at
/// send time and [`on_received_feedback`] when transport-wide feedback
/// arrives. It never fails and always carries a best-effort estimate.
///
/// All operations must be serialized by the caller; there is no internal
/// locking.
///
/// [`on_sent_packet`]: SendSideBandwidthEstimator::on_sent_packet
/// [`on_received_feedback`]: SendSideBandwidthEstimator::on_received_feedback
pub struct SendSideBandwidthEstimator {
    /// Zero, one (startup) or two (probing pair) active intervals.
    intervals: Vec<MonitorInterval>,

    /// Packets awaiting feedback, keyed by extended sequence number.
    in_flight: BTreeMap<SeqNo, PacketStats>,

    /// Extension anchor: the last registered sequence number.
    last_seq: Option<SeqNo>,

    /// Zero-points used to normalise timestamps to small relative values.
    /// Set on the first sent packet / first acknowledged feedback, then
    /// immutable.
    first_sent: Option<u64>,
    first_recv: Option<u64>,

    /// Relative send/receive times of the previous acknowledged packet,
    /// used to derive per-packet delay deltas.
    prev_sent_rel: u64,
    prev_recv_rel: u64,

    bandwidth_estimation: Bitrate,
    available_rate: Bitrate,

    /// Externally supplied smoothed RTT.
    rtt: Duration,

    state: State,
    /// Same-state streak length, amplifying confidence in the direction.
    consecutive_changes: u32,

    listener: Option<Box<dyn TargetBitrateListener>>,
    dump: Option<FeedbackDump>,

    rng: Box<dyn RngCore>,
}

impl SendSideBandwidthEstimator {
    pub fn new() -> Self {
        Self::with_rng(Box::new(StdRng::from_entropy()))
    }

    /// Create an estimator with a caller-provided randomness source.
    ///
    /// The only use of randomness is the coin deciding which of the two
    /// probing intervals gets the higher target. Injecting a deterministic
    /// source makes probing reproducible.
    pub fn with_rng(rng: Box<dyn RngCore>) -> Self {
        SendSideBandwidthEstimator {
            intervals: Vec::new(),
            in_flight: BTreeMap::new(),
            last_seq: None,
            first_sent: None,
            first_recv: None,
            prev_sent_rel: 0,
            prev_recv_rel: 0,
            bandwidth_estimation: Bitrate::ZERO,
            available_rate: Bitrate::ZERO,
            rtt: Duration::ZERO,
            state: State::Increase,
            consecutive_changes: 0,
            listener: None,
            dump: None,
            rng,
        }
    }

    /// Install or remove the listener receiving published rates.
    pub fn set_listener(&mut self, listener: Option<Box<dyn TargetBitrateListener>>) {
        self.listener = listener;
    }

    /// Start dumping one diagnostics line per feedbacked packet to `path`.
    ///
    /// Failure here never affects estimation.
    pub fn dump_to_file(&mut self, path: impl AsRef<Path>) -> Result<(), DumpError> {
        if self.dump.is_some() {
            return Err(DumpError::AlreadyActive);
        }

        self.dump = Some(FeedbackDump::create(path.as_ref())?);

        Ok(())
    }

    /// Record a locally sent packet.
    ///
    /// Sends must be reported in nondecreasing `sent_time` order, each
    /// exactly once. The first call pins the time zero-point and opens the
    /// startup interval.
    pub fn on_sent_packet(&mut self, stats: &PacketStats) {
        let first_sent = match self.first_sent {
            Some(v) => v,
            None => {
                self.first_sent = Some(stats.sent_time);
                self.intervals.push(MonitorInterval::new(
                    Bitrate::ZERO,
                    0,
                    STARTUP_DURATION,
                ));
                trace!("First packet sent, starting startup interval");
                stats.sent_time
            }
        };

        let sent_rel = stats.sent_time.saturating_sub(first_sent);

        for interval in &mut self.intervals {
            interval.sent_packet(sent_rel, stats.size);
        }

        // The last interval expiring without feedback for this long means
        // the probing pair is stale. Score what we have and re-probe.
        if let Some(last) = self.intervals.last() {
            let deadline =
                last.end() + self.rtt.as_micros() as u64 + MONITOR_TIMEOUT.as_micros() as u64;
            if sent_rel > deadline {
                debug!("Feedback timed out for current intervals, re-probing");
                self.estimate_bandwidth_rate();
                self.create_intervals(sent_rel);
            }
        }

        let seq: SeqNo = extend_seq(self.last_seq.map(|s| *s), stats.seq).into();
        self.last_seq = Some(seq);
        self.in_flight.insert(seq, *stats);

        // Drop in-flight packets older than the active windows. Their
        // feedback can no longer be attributed to any interval.
        if let Some(front_start) = self.intervals.first().map(MonitorInterval::start) {
            while let Some(entry) = self.in_flight.first_entry() {
                if entry.get().sent_time.saturating_sub(first_sent) < front_start {
                    entry.remove();
                } else {
                    break;
                }
            }
        }
    }

    /// Apply a transport-wide feedback message.
    ///
    /// `packets` maps each reported sequence number to its absolute receive
    /// time in microseconds, with `0` marking a lost packet. `arrival_time`
    /// is the local time the feedback message arrived. Unknown sequence
    /// numbers are skipped silently.
    pub fn on_received_feedback(
        &mut self,
        feedback_num: u8,
        packets: &BTreeMap<u16, u64>,
        arrival_time: u64,
    ) {
        if packets.is_empty() {
            return;
        }

        let Some(first_sent) = self.first_sent else {
            // Feedback before any send can not match anything.
            return;
        };

        // Process in ascending extended order so batches spanning a wrap of
        // the 16 bit sequence number keep their send order.
        let anchor = self.last_seq.map(|s| *s);
        let mut ordered: Vec<(SeqNo, u64)> = packets
            .iter()
            .map(|(&seq, &recv)| (SeqNo::from(extend_seq(anchor, seq)), recv))
            .collect();
        ordered.sort_unstable_by_key(|(seq, _)| *seq);

        for (seq, recv_time) in ordered {
            let Some(packet) = self.in_flight.get(&seq).copied() else {
                continue;
            };

            let received = recv_time != 0;

            // Only acknowledged packets participate in the receive
            // zero-point.
            if self.first_recv.is_none() && received {
                self.first_recv = Some(recv_time);
                self.prev_sent_rel = packet.sent_time.saturating_sub(first_sent);
                self.prev_recv_rel = 0;
            }

            let sent_rel = packet.sent_time.saturating_sub(first_sent);
            let recv_rel = match (received, self.first_recv) {
                (true, Some(first_recv)) => Some(recv_time.saturating_sub(first_recv)),
                _ => None,
            };

            let delta_sent = sent_rel as i64 - self.prev_sent_rel as i64;
            let (delta_recv, delta) = match recv_rel {
                Some(recv_rel) => {
                    let delta_recv = recv_rel as i64 - self.prev_recv_rel as i64;
                    (delta_recv, delta_recv - delta_sent)
                }
                None => (0, 0),
            };

            let mut completed = true;
            for interval in &mut self.intervals {
                interval.feedback(sent_rel, recv_rel, packet.size, delta);
                completed &= interval.is_feedback_collection_done();
            }

            if completed {
                self.estimate_bandwidth_rate();
                self.create_intervals(sent_rel);
            }

            if let Some(dump) = &mut self.dump {
                dump.record(&DumpRecord {
                    fb_time: arrival_time.saturating_sub(first_sent),
                    seq,
                    feedback_num,
                    size: packet.size.as_bytes_u64(),
                    sent: sent_rel,
                    recv: recv_rel.unwrap_or(0),
                    delta_sent,
                    delta_recv,
                    delta,
                    estimate: self.bandwidth_estimation.as_u64(),
                    rtt: self.rtt.as_micros() as u64,
                    marker: packet.marker,
                    rtx: packet.rtx,
                    probing: packet.probing,
                });
            }

            if let Some(recv_rel) = recv_rel {
                self.prev_sent_rel = sent_rel;
                self.prev_recv_rel = recv_rel;
            }

            self.in_flight.remove(&seq);
        }
    }

    /// Store the externally smoothed RTT. No smoothing happens here.
    pub fn update_rtt(&mut self, rtt: Duration) {
        self.rtt = rtt;
    }

    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    /// The current headline bandwidth estimate.
    pub fn estimated_bitrate(&self) -> Bitrate {
        self.bandwidth_estimation
    }

    /// The estimate discounted by observed loss. This is the value surfaced
    /// to the listener.
    pub fn available_bitrate(&self) -> Bitrate {
        self.available_rate
    }

    /// The target rate the transport should currently send at: the target
    /// of the earliest interval still collecting feedback, or the headline
    /// estimate when none is.
    pub fn target_bitrate(&self) -> Bitrate {
        self.intervals
            .iter()
            .find(|i| !i.is_feedback_collection_done())
            .map(|i| i.target_bitrate())
            .unwrap_or(self.bandwidth_estimation)
    }

    /// Replace the active intervals with a fresh probing pair around the
    /// current estimate.
    fn create_intervals(&mut self, now: u64) {
        self.intervals.clear();

        // A fair coin decides whether we probe up or down first.
        let sign = if self.rng.gen::<bool>() { 1.0 } else { -1.0 };

        let estimate = self.bandwidth_estimation.as_f64();
        let step = (estimate * RATE_CHANGE_FRACTION).max(MIN_RATE_CHANGE.as_f64());

        let targets = [
            Bitrate::from(estimate + sign * step).clamp(MIN_RATE, MAX_RATE),
            Bitrate::from(estimate - sign * step).clamp(MIN_RATE, MAX_RATE),
        ];

        trace!(
            "New probing pair at {}: {} then {}",
            now,
            targets[0],
            targets[1]
        );

        let monitor = MONITOR_DURATION.as_micros() as u64;
        for (index, target) in targets.into_iter().enumerate() {
            self.intervals.push(MonitorInterval::new(
                target,
                now + index as u64 * monitor,
                MONITOR_DURATION,
            ));
        }

        // Seed the sent-side counters with packets still awaiting feedback.
        let Some(first_sent) = self.first_sent else {
            return;
        };
        for packet in self.in_flight.values() {
            let sent_rel = packet.sent_time.saturating_sub(first_sent);
            for interval in &mut self.intervals {
                interval.sent_packet(sent_rel, packet.size);
            }
        }
    }

    /// Score the active intervals and publish a new estimate.
    fn estimate_bandwidth_rate(&mut self) {
        if self.intervals.is_empty() {
            return;
        }

        // End of startup: the uncongested receive rate is the initial
        // estimate.
        if self.intervals.len() == 1 {
            let received = self.intervals[0].received_bitrate();
            self.bandwidth_estimation = received;
            self.available_rate = received;
            debug!("Initial bandwidth estimate: {}", received);
            self.notify_listener();
            return;
        }

        trace!(
            "Scoring probing pair: {:?} {:?}",
            self.intervals[0],
            self.intervals[1]
        );

        let utility0 = self.intervals[0].utility();
        let utility1 = self.intervals[1].utility();
        let rate0 = self.intervals[0].sent_bitrate().as_f64();
        let rate1 = self.intervals[1].sent_bitrate().as_f64();

        // One side may be all-lost; then the sum is the better proxy.
        let target_sent = if rate0 != 0.0 && rate1 != 0.0 {
            (rate0 + rate1) / 2.0
        } else {
            rate0 + rate1
        };

        let gradient = if rate0 == rate1 {
            0.0
        } else {
            (utility0 - utility1) / (rate0 - rate1)
        };

        let prev_state = self.state;

        let ceiling = self.intervals[0]
            .target_bitrate()
            .max(self.intervals[1].received_bitrate())
            .as_f64();

        if target_sent > ceiling {
            // The transport sent far more than the probing targets; we are
            // pushing the link past its capacity.
            self.state = State::Overshoot;
        } else {
            // Note: this keeps the truthiness rule of the original design,
            // not `gradient > 0`.
            self.state = if gradient != 0.0 {
                State::Increase
            } else {
                State::Decrease
            };
        }

        if prev_state == self.state {
            self.consecutive_changes += 1;
        } else {
            self.consecutive_changes = 0;
        }

        let estimate = if self.state != State::Overshoot {
            let confidence_amplifier = f64::from(self.consecutive_changes + 1).ln();
            let rate_change = gradient * confidence_amplifier * CONVERSION_FACTOR;
            target_sent + rate_change
        } else {
            // Fall back to what the path demonstrably delivered.
            self.intervals[0]
                .received_bitrate()
                .min(self.intervals[1].received_bitrate())
                .as_f64()
        };

        self.bandwidth_estimation = Bitrate::from(estimate).clamp(MIN_RATE, MAX_RATE);

        let loss_rate = self.intervals[0]
            .loss_rate()
            .max(self.intervals[1].loss_rate());
        self.available_rate = self.bandwidth_estimation * (1.0 - loss_rate);

        debug!(
            "Estimated bandwidth: {} available: {} ({}, gradient: {:.6}, loss: {:.3})",
            self.bandwidth_estimation, self.available_rate, self.state, gradient, loss_rate
        );

        self.notify_listener();
    }

    fn notify_listener(&mut self) {
        if let Some(listener) = &mut self.listener {
            listener.on_target_bitrate_requested(self.available_rate);
        }
    }
}

impl Default for SendSideBandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}
