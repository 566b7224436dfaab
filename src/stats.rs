use crate::bandwidth::DataSize;

/// Per-packet send record handed to the estimator by the transport.
///
/// The transport owns the canonical record; the estimator keeps an immutable
/// copy by value for packets awaiting feedback. Timestamps come from an
/// external clock and are absolute microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketStats {
    /// Transport-wide sequence number. Monotonically increasing and wrapping;
    /// the estimator extends it to 64 bits internally.
    pub seq: u16,

    /// Absolute send time in microseconds.
    pub sent_time: u64,

    /// Size of the packet on the wire.
    pub size: DataSize,

    /// RTP marker bit. Carried through to diagnostics only.
    pub marker: bool,

    /// Whether this was a retransmission. Carried through to diagnostics only.
    pub rtx: bool,

    /// Whether this was a probing packet. Carried through to diagnostics only.
    pub probing: bool,
}
