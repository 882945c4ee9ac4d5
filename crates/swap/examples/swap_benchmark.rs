//! Load driver for the swap engine.
//!
//! Spawns a fleet of byte-buffer cowns, registers them with the engine and
//! fires behaviours whose cown picks follow a normal distribution, so a hot
//! core of the fleet stays resident while the cold tail gets evicted.
//! Reports latency, throughput and the engine's average memory usage.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::Rng;

use boc_swap::{when_all, Cown, Runtime, SwapConfig, SwapEngine, SwapPolicy};

#[derive(Parser, Debug)]
#[command(about = "Swap engine load driver")]
struct Args {
    #[arg(long, default_value_t = 1000)]
    cown_number: usize,
    #[arg(long, default_value_t = 100_000)]
    cown_data_size: usize,
    #[arg(long, default_value_t = 2)]
    cowns_per_behaviour: usize,
    #[arg(long, default_value_t = 1)]
    behaviour_runtime_ms: u64,
    #[arg(long, default_value_t = 256)]
    memory_limit_mb: u64,
    #[arg(long, default_value_t = 60)]
    multiplier: u64,
    /// Standard deviation of the access distribution; defaults to a sixth
    /// of the fleet.
    #[arg(long)]
    standard_deviation: Option<f64>,
    #[arg(long, default_value_t = 25)]
    monitor_tick_ms: u64,
    #[arg(long, default_value_t = 4)]
    thread_number: usize,
    #[arg(long, default_value_t = 10_000)]
    total_behaviours: usize,
    #[arg(long, default_value_t = 200)]
    inter_arrival_micros: u64,
    #[arg(long, default_value = "LRU")]
    policy: SwapPolicy,
}

/// Index into the fleet drawn from a normal distribution centred on its
/// middle (Box-Muller over uniform samples).
fn normal_index(rng: &mut impl Rng, count: usize, stddev: f64) -> usize {
    loop {
        let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
        let u2: f64 = rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        let index = (count as f64 / 2.0 + z * stddev).round();
        if index >= 0.0 && (index as usize) < count {
            return index as usize;
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let stddev = args
        .standard_deviation
        .unwrap_or(args.cown_number as f64 / 6.0);

    let rt = Runtime::new(args.thread_number);
    let engine = SwapEngine::start(
        rt.handle(),
        SwapConfig::new(args.memory_limit_mb, args.multiplier, args.policy)
            .with_tick_period(Duration::from_millis(args.monitor_tick_ms)),
    )
    .expect("failed to start the swap engine");

    println!(
        "spawning {} cowns of {} bytes ({} policy)",
        args.cown_number, args.cown_data_size, args.policy
    );
    let bodies: Vec<Cown<Vec<u8>>> = (0..args.cown_number)
        .map(|_| Cown::new(vec![0u8; args.cown_data_size]))
        .collect();
    assert!(engine.register(&bodies));

    println!("waiting for the engine to reach steady state");
    engine.wait();
    println!("steady state reached, benchmark starting");

    let latency_micros = Arc::new(AtomicI64::new(0));
    let completed = Arc::new(AtomicU64::new(0));
    let handle = rt.handle();
    let mut rng = rand::thread_rng();
    let global_start = Instant::now();

    for _ in 0..args.total_behaviours {
        let mut picks: Vec<Cown<Vec<u8>>> = Vec::with_capacity(args.cowns_per_behaviour);
        while picks.len() < args.cowns_per_behaviour {
            let candidate = &bodies[normal_index(&mut rng, args.cown_number, stddev)];
            if !picks.iter().any(|picked| picked.id() == candidate.id()) {
                picks.push(candidate.clone());
            }
        }

        let spawn_time = Instant::now();
        let latency = Arc::clone(&latency_micros);
        let completed = Arc::clone(&completed);
        let runtime_ms = args.behaviour_runtime_ms;
        when_all(&handle, &picks, move |_payloads| {
            std::thread::sleep(Duration::from_millis(runtime_ms));
            latency.fetch_add(spawn_time.elapsed().as_micros() as i64, Ordering::Relaxed);
            completed.fetch_add(1, Ordering::Relaxed);
        });

        std::thread::sleep(Duration::from_micros(args.inter_arrival_micros));
    }

    // The engine's external event source keeps the runtime from quiescing,
    // so drain the user work by count before stopping it.
    while completed.load(Ordering::Relaxed) < args.total_behaviours as u64 {
        std::thread::sleep(Duration::from_millis(10));
    }
    let total_runtime = global_start.elapsed();
    let average_mb = engine.stop();
    rt.wait_for_quiescence();

    let done = completed.load(Ordering::Relaxed).max(1);
    println!("benchmark runtime: {:.3} seconds", total_runtime.as_secs_f64());
    println!(
        "average latency: {:.3} microseconds",
        latency_micros.load(Ordering::Relaxed) as f64 / done as f64
    );
    println!(
        "throughput: {:.3} behaviours per second",
        done as f64 / total_runtime.as_secs_f64()
    );
    println!("average memory usage: {average_mb} MB");
}
