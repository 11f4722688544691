// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 smtl contributors
//
// Ping-pong demo: two transport instances bounce a small message and
// report the average round-trip latency. Run with RUST_LOG=debug to watch
// mechanism selection and fast-box installation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use smtl::{SingleCopyMechanism, Transport, TransportConfig};

const TAG: u8 = 1;
const ROUNDS: usize = 10_000;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let session = format!("pingpong_{}", std::process::id());
    let mk = |rank| {
        Transport::new(TransportConfig {
            session_id: session.clone(),
            local_rank: rank,
            num_local_peers: 1,
            single_copy_mechanism: SingleCopyMechanism::Auto,
            ..TransportConfig::default()
        })
        .expect("transport init")
    };

    let pinger = Arc::new(mk(0));
    let ponger = Arc::new(mk(1));
    pinger.add_peer(&ponger.modex().unwrap()).unwrap();
    ponger.add_peer(&pinger.modex().unwrap()).unwrap();
    println!("single-copy mechanism: {}", pinger.mechanism());

    // Rank 1 bounces every ping straight back from inside the upcall.
    let replier = Arc::clone(&ponger);
    ponger.register_callback(TAG, Arc::new(()), move |d| {
        replier.send(d.src_rank, TAG, d.segments[0]).unwrap();
    });

    let pongs = Arc::new(AtomicUsize::new(0));
    let pong_count = Arc::clone(&pongs);
    pinger.register_callback(TAG, Arc::new(()), move |_| {
        pong_count.fetch_add(1, Ordering::Relaxed);
    });

    let start = Instant::now();
    for round in 0..ROUNDS {
        pinger.send(1, TAG, b"ping").unwrap();
        while pongs.load(Ordering::Relaxed) <= round {
            ponger.progress();
            pinger.progress();
        }
    }
    let elapsed = start.elapsed();

    println!(
        "{ROUNDS} round trips in {elapsed:?} ({:.0} ns avg, fast box {})",
        elapsed.as_nanos() as f64 / ROUNDS as f64,
        if pinger.fbox_active(1) { "warm" } else { "cold" },
    );
}
