use std::fs::File;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::seq::SeqNo;

/// Errors from setting up the diagnostics dump.
///
/// These are the only fallible operations in the crate. Estimation itself
/// carries on regardless of dump state.
#[derive(Debug, Error)]
pub enum DumpError {
    /// A dump file is already being written.
    #[error("dump already active")]
    AlreadyActive,

    /// The dump file could not be created.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// One diagnostics line per feedbacked packet.
///
/// All times are relative microseconds, deltas are signed microseconds.
pub(crate) struct DumpRecord {
    pub fb_time: u64,
    pub seq: SeqNo,
    pub feedback_num: u8,
    pub size: u64,
    pub sent: u64,
    pub recv: u64,
    pub delta_sent: i64,
    pub delta_recv: i64,
    pub delta: i64,
    pub estimate: u64,
    pub rtt: u64,
    pub marker: bool,
    pub rtx: bool,
    pub probing: bool,
}

/// Writer for the pipe-delimited feedback dump.
///
/// Write failures after open are logged once and silence the writer; they
/// never disturb estimation.
pub(crate) struct FeedbackDump {
    file: File,
    failed: bool,
}

impl FeedbackDump {
    pub fn create(path: &Path) -> Result<Self, DumpError> {
        let file = File::create(path)?;

        Ok(FeedbackDump {
            file,
            failed: false,
        })
    }

    pub fn record(&mut self, r: &DumpRecord) {
        if self.failed {
            return;
        }

        let line = format!(
            "{:08}|{}|{}|{}|{:08}|{:08}|{:06}|{:06}|{}|{}|{}|{}|{}|{}\n",
            r.fb_time,
            r.seq,
            r.feedback_num,
            r.size,
            r.sent,
            r.recv,
            r.delta_sent,
            r.delta_recv,
            r.delta,
            r.estimate,
            r.rtt,
            r.marker as u8,
            r.rtx as u8,
            r.probing as u8,
        );

        if let Err(e) = self.file.write_all(line.as_bytes()) {
            debug!("Feedback dump write failed, disabling: {}", e);
            self.failed = true;
        }
    }
}
