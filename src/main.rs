use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use evm_overhead_bench::alloc::TrackingAllocator;
use evm_overhead_bench::cli::Options;
use evm_overhead_bench::config::{Environment, set_defaults};
use evm_overhead_bench::engine::RevmEngine;
use evm_overhead_bench::report::run_overhead_benchmark;
use evm_overhead_bench::sampler::PairedSampler;
use tracing::level_filters::LevelFilter;
use tracing::{Subscriber, error};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber, filter::Directive};

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

/// Color codes only when `ansi` is set, so redirected output stays plain text.
fn log_subscriber<W>(log_level: &str, writer: W, ansi: bool) -> impl Subscriber + Send + Sync + use<W>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let directive = Directive::from_str(log_level)
        .unwrap_or_else(|_| LevelFilter::INFO.into());
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(directive)
                .from_env_lossy(),
        )
        .with_writer(writer)
        .with_ansi(ansi)
        .finish()
}

fn init_tracing(log_level: &str) {
    let subscriber = log_subscriber(log_level, io::stderr, io::stderr().is_terminal());
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}

fn main() -> ExitCode {
    // A missing .env file is fine.
    dotenv::dotenv().ok();

    let opts = Options::parse();
    init_tracing(&opts.log_level);

    let mut environment = Environment::default();
    set_defaults(&mut environment);

    let sampler = PairedSampler::new(RevmEngine, environment, opts.benchtime, opts.mode);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match run_overhead_benchmark(&sampler, &opts.bytecode, opts.sample_size, &mut out) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "failed to write results");
            ExitCode::FAILURE
        }
    }
}
