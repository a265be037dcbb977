use alloy::primitives::Bytes;
use clap::Parser;

use crate::bencher::BenchTime;
use crate::sampler::MeasurementMode;

pub const VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "evm-overhead-bench", version = VERSION_STRING, about = "Measures EVM bytecode execution cost with the fixed setup overhead subtracted", long_about = None)]
pub struct Options {
    #[arg(
        long,
        env = "BENCH_BYTECODE",
        default_value = "",
        value_parser = parse_bytecode,
        help = "EVM bytecode to execute and measure, hex encoded"
    )]
    pub bytecode: Bytes,
    #[arg(
        long = "sampleSize",
        env = "BENCH_SAMPLE_SIZE",
        default_value_t = 1,
        help = "Size of the sample - number of measured repetitions of execution"
    )]
    pub sample_size: usize,
    #[arg(
        long,
        env = "BENCH_TIME",
        default_value_t = BenchTime::default(),
        help = "Target duration of each calibrated run (e.g. 1s, 500ms) or a fixed count (e.g. 100x)"
    )]
    pub benchtime: BenchTime,
    #[arg(long, env = "BENCH_MODE", value_enum, default_value_t = MeasurementMode::default())]
    pub mode: MeasurementMode,
    #[arg(
        long = "log-level",
        default_value = "info",
        help = "Default log filter, overridden by RUST_LOG"
    )]
    pub log_level: String,
}

/// Hex without separators. A leading `0x` is accepted.
pub fn parse_bytecode(s: &str) -> Result<Bytes, hex::FromHexError> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map(Bytes::from)
}
