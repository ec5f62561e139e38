use clap::Parser;

/// LED blinker: one producer, a pin bank and a serial echo listening to it
#[derive(Debug, Clone, Parser)]
pub struct Args {
    /// Milliseconds between two published LED commands
    #[arg(short, long, default_value_t = 500)]
    pub period_ms: u64,
    /// Number of commands to publish
    ///
    /// Set to 0 to run until CTRL-C
    #[arg(short = 'n', long, default_value_t = 0)]
    pub count: usize,
    /// Extra delay the serial echo spends on every message
    #[arg(short, long, default_value_t = 0)]
    pub serial_delay_ms: u64,
}
