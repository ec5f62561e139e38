use clap::Parser;

/// Notifier stress test: one producer, four listeners of different sizes
#[derive(Debug, Parser)]
pub struct Args {
    /// Number of messages to publish
    #[arg(default_value_t = 100_000)]
    pub messages: u64,

    /// Upper bound for the random time a listener spends on one message
    #[arg(long, default_value_t = 20)]
    pub max_delay_us: u64,

    /// Seed for the listeners' random delays
    #[arg(long)]
    pub seed: Option<u64>,
}
