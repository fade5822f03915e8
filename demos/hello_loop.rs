//! Minimal tour: immediate tasks, a result-bearing submit with chained
//! continuations, and a clean shutdown.
//!
//! Run with: `cargo run --example hello_loop`

use std::time::Duration;

use ringloop::{EventLoop, LoopConfig};

fn main() {
    let mut cfg = LoopConfig::default();
    cfg.name = "hello-loop".into();
    let lp = EventLoop::new(cfg);

    lp.execute(|| println!("fire-and-forget ran on the consumer thread"))
        .expect("loop accepts work before shutdown");

    let answer = lp
        .submit(|| 6 * 7)
        .expect("loop accepts work before shutdown")
        .map(|v| format!("the answer is {v}"));

    answer.on_settled(|outcome| match outcome {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed: {e}"),
    });
    answer.wait_for(Duration::from_secs(5));

    lp.shutdown();
    lp.await_termination(Duration::from_secs(5));
}
