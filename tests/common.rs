#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use vivace::{Bitrate, DataSize, PacketStats, TargetBitrateListener};

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}

/// Listener capturing every published rate.
pub struct Recording(pub Rc<RefCell<Vec<Bitrate>>>);

impl Recording {
    pub fn new() -> (Self, Rc<RefCell<Vec<Bitrate>>>) {
        let published = Rc::new(RefCell::new(Vec::new()));
        (Recording(published.clone()), published)
    }
}

impl TargetBitrateListener for Recording {
    fn on_target_bitrate_requested(&mut self, bitrate: Bitrate) {
        self.0.borrow_mut().push(bitrate);
    }
}

pub fn packet(seq: u16, sent_time: u64, size: u64) -> PacketStats {
    PacketStats {
        seq,
        sent_time,
        size: DataSize::bytes(size),
        marker: false,
        rtx: false,
        probing: false,
    }
}

pub fn approx(actual: Bitrate, expected: f64, tolerance: f64) -> bool {
    (actual.as_f64() - expected).abs() <= tolerance
}
