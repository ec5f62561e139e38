use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use notifier::{Listener, ListenerStorage, Notifier};

pub mod cli;
pub mod led;

use cli::Args;
use led::{serial_line, LedData, PinBank, PATTERN};

const LISTENERS: usize = 2;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut pins = ListenerStorage::<LedData, 5>::new()?;
    let mut serial = ListenerStorage::<LedData, 2>::new()?;
    let notifier = Notifier::new()?;
    let pins = Listener::new(&notifier, &mut pins);
    let serial = Listener::new(&notifier, &mut serial);

    let exit_signal = Arc::new(AtomicBool::new(false));
    let e = exit_signal.clone();
    ctrlc::set_handler(move || {
        if e.swap(true, Ordering::Relaxed) {
            eprintln!("Killing");
            std::process::exit(1);
        } else {
            eprintln!("CTRL-C received, stopping (press again to kill)");
        }
    })?;

    info!(
        listeners = notifier.listeners(),
        blocks = notifier.capacity(),
        "Blinker is ready"
    );

    let stopped = AtomicUsize::new(0);
    thread::scope(|s| {
        s.spawn(|| blink(&pins, &stopped));
        s.spawn(|| echo(&serial, Duration::from_millis(args.serial_delay_ms), &stopped));

        let published = produce(&notifier, &args, &exit_signal);
        info!(published, "Producer finished");
        shutdown(&notifier, &stopped);
    });

    // Extra stop commands stay queued once their listener has left
    drain(&pins);
    drain(&serial);
    info!(free = notifier.free(), "Blinker stopped");
    Ok(())
}

/// Publishes the pattern until `args.count` commands went out or the exit
/// signal is raised. Returns the number of commands actually broadcast.
fn produce(notifier: &Notifier<'_, LedData>, args: &Args, exit_signal: &AtomicBool) -> usize {
    let period = Duration::from_millis(args.period_ms);
    let mut published = 0;

    for (pin, set, label) in PATTERN.iter().cycle() {
        if exit_signal.load(Ordering::Relaxed) || (args.count > 0 && published == args.count) {
            break;
        }

        match notifier.allocate() {
            Some(mut msg) => {
                msg.command(*pin, *set, label);
                let accepted = notifier.broadcast(msg);
                if accepted < LISTENERS {
                    debug!(accepted, label, "command dropped by a busy listener");
                }
                published += 1;
            }
            None => warn!(label, "pool exhausted, skipping command"),
        }

        thread::sleep(period);
    }
    published
}

/// Keeps offering stop commands until every listener has left its loop. A
/// single one could be dropped by a full queue.
fn shutdown(notifier: &Notifier<'_, LedData>, stopped: &AtomicUsize) {
    while stopped.load(Ordering::Acquire) < LISTENERS {
        if let Some(mut msg) = notifier.allocate() {
            msg.stop();
            notifier.broadcast(msg);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn blink<const N: usize>(listener: &Listener<'_, LedData, N>, stopped: &AtomicUsize) {
    let mut bank = PinBank::default();
    loop {
        let data = listener.get();
        if data.stop {
            listener.release(data);
            break;
        }

        bank.apply(&data);
        info!(label = data.label.as_str(), "{bank}");
        listener.release(data);
    }
    stopped.fetch_add(1, Ordering::Release);
}

fn echo<const N: usize>(
    listener: &Listener<'_, LedData, N>,
    delay: Duration,
    stopped: &AtomicUsize,
) {
    loop {
        let data = listener.get();
        if data.stop {
            listener.release(data);
            break;
        }

        println!("{}", serial_line(&data));
        listener.release(data);
        thread::sleep(delay);
    }
    stopped.fetch_add(1, Ordering::Release);
}

fn drain<const N: usize>(listener: &Listener<'_, LedData, N>) {
    while let Some(data) = listener.try_get() {
        listener.release(data);
    }
}
