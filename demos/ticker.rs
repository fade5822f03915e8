//! Scheduling tour: a drift-free fixed-rate ticker plus a time-sharing task
//! that polls until a result appears or its budget runs out.
//!
//! Run with: `cargo run --example ticker`

use std::time::Duration;

use ringloop::{Cadence, EventLoop, LoopConfig};

fn main() {
    let lp = EventLoop::new(LoopConfig::default());

    let ticker = lp
        .schedule_fixed_rate(
            || println!("tick"),
            Duration::ZERO,
            Duration::from_millis(100),
        )
        .expect("loop accepts work before shutdown");

    // polls every 50ms; "finds" its result on the fourth attempt
    let mut attempts = 0;
    let probe = lp
        .time_shared(
            move || {
                attempts += 1;
                println!("probe attempt {attempts}");
                (attempts == 4).then(|| format!("ready after {attempts} attempts"))
            },
            Duration::ZERO,
            Cadence::FixedDelay(Duration::from_millis(50)),
            Duration::from_secs(2),
        )
        .expect("loop accepts work before shutdown");

    probe.cell().wait_for(Duration::from_secs(5));
    match probe.cell().try_get() {
        Some(Ok(text)) => println!("{text}"),
        Some(Err(e)) => eprintln!("probe failed: {e}"),
        None => unreachable!("wait_for returned"),
    }

    ticker.cancel();
    lp.shutdown();
    lp.await_termination(Duration::from_secs(5));
}
