use std::fmt;
use std::ops::Deref;

/// A transport-wide sequence number extended to 64 bits.
///
/// The wire format is 16 bits and wraps frequently; all internal bookkeeping
/// uses the extended form so ordering and map lookups survive the wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqNo(u64);

impl Deref for SeqNo {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u64> for SeqNo {
    fn from(v: u64) -> Self {
        SeqNo(v)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// "extend" a 16 bit sequence number into a 64 bit by using the knowledge
/// of the previous such sequence number.
pub(crate) fn extend_seq(prev_ext_seq: Option<u64>, seq: u16) -> u64 {
    const MAX: u64 = u16::MAX as u64 + 1;
    const HALF: u64 = MAX / 2;
    const BITS: usize = 16;
    const ROC_MASK: i64 = (u64::MAX >> BITS) as i64;

    let seq = seq as u64;

    let Some(prev_index) = prev_ext_seq else {
        // No wrap-around so far.
        return seq;
    };

    let roc = (prev_index >> BITS) as i64; // how many wrap-arounds.
    let prev_seq = prev_index & (MAX - 1);

    let v = if prev_seq < HALF {
        if seq > HALF + prev_seq {
            (roc - 1) & ROC_MASK
        } else {
            roc
        }
    } else if prev_seq > seq + HALF {
        (roc + 1) & ROC_MASK
    } else {
        roc
    };

    (v as u64) * MAX + seq
}
