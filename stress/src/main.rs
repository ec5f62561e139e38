use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::bail;
use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use notifier::{Listener, ListenerStorage, Notifier};

pub mod cli;

use cli::Args;

const STOP: u64 = u64::MAX;
const LISTENERS: usize = 4;

#[derive(Debug, Default, Clone, Copy)]
struct Received {
    capacity: usize,
    count: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let exit_signal = Arc::new(AtomicBool::new(false));
    let e = exit_signal.clone();
    ctrlc::set_handler(move || {
        if e.swap(true, Ordering::Relaxed) {
            eprintln!("Killing");
            std::process::exit(1);
        } else {
            eprintln!("CTRL-C received, finishing early (press again to kill)");
        }
    })?;

    let seed: u64 = args.seed.unwrap_or_else(|| rand::thread_rng().gen());
    println!("Seed: {seed}");

    let mut tiny = ListenerStorage::<u64, 2>::new()?;
    let mut small = ListenerStorage::<u64, 8>::new()?;
    let mut medium = ListenerStorage::<u64, 32>::new()?;
    let mut large = ListenerStorage::<u64, 128>::new()?;
    let notifier = Notifier::new()?;
    let tiny = Listener::new(&notifier, &mut tiny);
    let small = Listener::new(&notifier, &mut small);
    let medium = Listener::new(&notifier, &mut medium);
    let large = Listener::new(&notifier, &mut large);

    let stopped = AtomicUsize::new(0);
    let max_delay = args.max_delay_us;
    let start = Instant::now();

    let (published, skipped, received) = thread::scope(|s| {
        let consumers = [
            s.spawn(|| consume(&tiny, StdRng::seed_from_u64(seed), max_delay, &stopped)),
            s.spawn(|| consume(&small, StdRng::seed_from_u64(seed ^ 1), max_delay, &stopped)),
            s.spawn(|| consume(&medium, StdRng::seed_from_u64(seed ^ 2), max_delay, &stopped)),
            s.spawn(|| consume(&large, StdRng::seed_from_u64(seed ^ 3), max_delay, &stopped)),
        ];

        let mut published = 0u64;
        let mut skipped = 0u64;
        for seq in 0..args.messages {
            if exit_signal.load(Ordering::Relaxed) {
                break;
            }
            match notifier.allocate() {
                Some(mut msg) => {
                    *msg = seq;
                    notifier.broadcast(msg);
                    published += 1;
                }
                None => {
                    skipped += 1;
                    thread::yield_now();
                }
            }
        }

        while stopped.load(Ordering::Acquire) < LISTENERS {
            if let Some(mut msg) = notifier.allocate() {
                *msg = STOP;
                notifier.broadcast(msg);
            }
            thread::sleep(Duration::from_millis(1));
        }

        let mut received = [Received::default(); LISTENERS];
        for (slot, consumer) in received.iter_mut().zip(consumers) {
            match consumer.join() {
                Ok(r) => *slot = r?,
                Err(_) => bail!("listener thread panicked"),
            }
        }
        anyhow::Ok((published, skipped, received))
    })?;

    let elapsed = start.elapsed();
    info!(published, skipped, ?elapsed, "Producer finished");
    for r in &received {
        let dropped = published - r.count;
        println!(
            "listener of {:>3}: received {:>8}, dropped {:>8} ({:.1}%)",
            r.capacity,
            r.count,
            dropped,
            100.0 * dropped as f64 / published.max(1) as f64,
        );
    }

    // Stop markers left behind in queues nobody reads anymore
    drain(&tiny);
    drain(&small);
    drain(&medium);
    drain(&large);

    let (free, capacity) = (notifier.free(), notifier.capacity());
    if free != capacity {
        bail!("{} of {capacity} blocks leaked", capacity - free);
    }
    println!("All {capacity} blocks returned to the pool");
    Ok(())
}

fn consume<const N: usize>(
    listener: &Listener<'_, u64, N>,
    mut rng: StdRng,
    max_delay_us: u64,
    stopped: &AtomicUsize,
) -> anyhow::Result<Received> {
    let mut received = Received {
        capacity: listener.size(),
        count: 0,
    };
    let mut last = None;

    let result = loop {
        let msg = listener.get();
        let seq = *msg;
        if seq == STOP {
            listener.release(msg);
            break Ok(received);
        }

        if let Some(last) = last {
            if seq <= last {
                listener.release(msg);
                break Err(anyhow::anyhow!("listener of {N}: {seq} after {last}"));
            }
        }
        last = Some(seq);
        received.count += 1;

        if max_delay_us > 0 {
            thread::sleep(Duration::from_micros(rng.gen_range(0..=max_delay_us)));
        }
        listener.release(msg);
    };

    stopped.fetch_add(1, Ordering::Release);
    result
}

fn drain<const N: usize>(listener: &Listener<'_, u64, N>) {
    let mut left = 0;
    while let Some(msg) = listener.try_get() {
        listener.release(msg);
        left += 1;
    }
    if left > 0 {
        debug!(capacity = N, left, "unread messages after stop");
    }
}
