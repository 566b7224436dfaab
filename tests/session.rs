//! End-to-end session against the public API: startup measurement, stable
//! probing rounds, a lossy round and an overshoot round.

use std::collections::BTreeMap;

use vivace::SendSideBandwidthEstimator;

mod common;
use common::{approx, init_log, packet, Recording};

/// Send 25 packets into each probing window of the pair starting at
/// `pair_start`, then one packet past the pair, and ack everything in one
/// feedback batch. Per-packet one-way delay starts at `delay` and moves by
/// `delta_per_packet`; `lost` marks in-window packets reported lost.
///
/// Returns the start of the next pair (the time of the pair-closing packet).
#[allow(clippy::too_many_arguments)]
fn run_round(
    bwe: &mut SendSideBandwidthEstimator,
    seq: &mut u16,
    pair_start: u64,
    size: u64,
    delta_per_packet: i64,
    delay: &mut i64,
    feedback_num: u8,
    lost: impl Fn(usize) -> bool,
) -> u64 {
    let first_seq = *seq;
    let mut times = Vec::new();

    for k in 0..50u64 {
        let (w, j) = (k / 25, k % 25);
        let t = pair_start + w * 250_000 + 5_000 + 10_000 * j;
        bwe.on_sent_packet(&packet(*seq, t, size));
        *seq = seq.wrapping_add(1);
        times.push(t);
    }

    let closer = pair_start + 510_000;
    bwe.on_sent_packet(&packet(*seq, closer, size));
    *seq = seq.wrapping_add(1);
    times.push(closer);

    let mut acks = BTreeMap::new();
    for (k, t) in times.iter().enumerate() {
        *delay += delta_per_packet;
        let recv = if k < 50 && lost(k) {
            0
        } else {
            (*t as i64 + *delay) as u64
        };
        acks.insert(first_seq.wrapping_add(k as u16), recv);
    }
    bwe.on_received_feedback(feedback_num, &acks, closer + 40_000);

    closer
}

#[test]
fn session_adapts_to_link_conditions() {
    init_log();

    let mut bwe = SendSideBandwidthEstimator::new();
    let (listener, published) = Recording::new();
    bwe.set_listener(Some(Box::new(listener)));

    let mut seq: u16 = 0;
    let mut delay: i64 = 20_000;

    // Startup: 100 packets of 990 bytes every 8 ms, all acked 20 ms later,
    // measuring exactly 1 Mbit/s of receive rate.
    for i in 0..100u64 {
        bwe.on_sent_packet(&packet(seq, i * 8_000, 990));
        seq = seq.wrapping_add(1);
    }
    let acks: BTreeMap<u16, u64> = (0..100u64)
        .map(|i| (i as u16, i * 8_000 + 20_000))
        .collect();
    bwe.on_received_feedback(0, &acks, 900_000);

    // One acked packet past the startup window triggers the first estimate
    // and the first probing pair.
    bwe.on_sent_packet(&packet(seq, 1_700_000, 990));
    bwe.on_received_feedback(1, &BTreeMap::from([(seq, 1_720_000)]), 1_750_000);
    seq = seq.wrapping_add(1);

    assert!(approx(bwe.estimated_bitrate(), 1_000_000.0, 1.0));
    assert_eq!(published.borrow().len(), 1);

    // The probing target is one of the two rates around the estimate.
    let target = bwe.target_bitrate().as_f64();
    assert!(
        (target - 1_100_000.0).abs() < 1.0 || (target - 900_000.0).abs() < 1.0,
        "unexpected probing target {target}"
    );

    let mut pair_start = 1_700_000;

    // Three clean rounds at 1 Mbit/s. The estimate stays pinned to the
    // measured send rate (slightly above 1 Mbit/s because each pair-closing
    // packet seeds the next window) no matter which direction the pair
    // probed first.
    for round in 0..3u8 {
        pair_start = run_round(
            &mut bwe,
            &mut seq,
            pair_start,
            1200,
            0,
            &mut delay,
            round + 2,
            |_| false,
        );

        let estimate = bwe.estimated_bitrate().as_f64();
        assert!(
            (999_999.0..=1_025_001.0).contains(&estimate),
            "estimate drifted to {estimate}"
        );
        assert!(approx(bwe.available_bitrate(), estimate, 1.0));
    }

    // A round with every fifth packet lost: the published available rate is
    // the headline estimate discounted by the 20% loss.
    pair_start = run_round(
        &mut bwe,
        &mut seq,
        pair_start,
        1200,
        0,
        &mut delay,
        5,
        |k| k % 5 == 0,
    );

    let estimate = bwe.estimated_bitrate().as_f64();
    assert!(approx(bwe.available_bitrate(), estimate * 0.8, 1.0));
    assert!(approx(*published.borrow().last().unwrap(), estimate * 0.8, 1.0));

    // Overshoot: the transport blasts 8 Mbit/s into ~1 Mbit/s probing
    // targets while the queue grows and the path delivers only half.
    run_round(
        &mut bwe,
        &mut seq,
        pair_start,
        9600,
        10_000,
        &mut delay,
        6,
        |_| false,
    );

    assert!(approx(bwe.estimated_bitrate(), 4_000_000.0, 1_000.0));

    // One publish per estimation step, all inside the clamp range.
    assert_eq!(published.borrow().len(), 6);
    for rate in published.borrow().iter() {
        assert!(rate.as_f64() <= 100_000_000.0);
    }
}
