//! Calibrating timing facility.
//!
//! A benchmark function receives a [`Bencher`], performs its own setup and then
//! hands the measured body to [`Bencher::iter`]. Only the `iter` loop is timed,
//! so everything before it is excluded from the result. [`run_benchmark`] calls
//! the function repeatedly with a growing iteration count until one run lasts
//! at least the configured [`BenchTime`].

use std::fmt;
use std::hint::black_box;
use std::str::FromStr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::alloc::allocation_totals;

pub const DEFAULT_BENCH_TIME: Duration = Duration::from_secs(1);
pub const MAX_ITERATIONS: u64 = 1_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BenchTimeError {
    #[error("empty benchtime")]
    Empty,
    #[error("invalid benchtime number: {0}")]
    InvalidNumber(String),
    #[error("unknown benchtime unit: {0}")]
    UnknownUnit(String),
    #[error("benchtime iteration count must be positive")]
    ZeroIterations,
}

/// How long a single calibrated run should take, or a fixed iteration count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchTime {
    Duration(Duration),
    Iterations(u64),
}

impl Default for BenchTime {
    fn default() -> Self {
        BenchTime::Duration(DEFAULT_BENCH_TIME)
    }
}

impl fmt::Display for BenchTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchTime::Duration(d) => write!(f, "{d:?}"),
            BenchTime::Iterations(n) => write!(f, "{n}x"),
        }
    }
}

impl FromStr for BenchTime {
    type Err = BenchTimeError;

    /// Accepts `100x` for a fixed count, or a number with one of the units
    /// `ns`, `us`, `ms`, `s`, `m`. A bare number means seconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BenchTimeError::Empty);
        }

        if let Some(count) = s.strip_suffix('x') {
            let n: u64 = count
                .trim()
                .parse()
                .map_err(|_| BenchTimeError::InvalidNumber(count.to_string()))?;
            if n == 0 {
                return Err(BenchTimeError::ZeroIterations);
            }
            return Ok(BenchTime::Iterations(n));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| BenchTimeError::InvalidNumber(num_part.to_string()))?;
        if !value.is_finite() || value < 0.0 {
            return Err(BenchTimeError::InvalidNumber(num_part.to_string()));
        }

        let multiplier: f64 = match unit_part {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60_000_000_000.0,
            _ => return Err(BenchTimeError::UnknownUnit(unit_part.to_string())),
        };

        Ok(BenchTime::Duration(Duration::from_nanos(
            (value * multiplier) as u64,
        )))
    }
}

/// Outcome of one calibrated benchmark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BenchmarkResult {
    /// Iterations of the final run.
    pub n: u64,
    /// Time spent in the final run's timed loop.
    pub elapsed: Duration,
    /// Allocations observed during the final run's timed loop.
    pub mem_allocs: u64,
    /// Bytes allocated during the final run's timed loop.
    pub mem_bytes: u64,
}

impl BenchmarkResult {
    pub fn ns_per_op(&self) -> u64 {
        if self.n == 0 {
            return 0;
        }
        u64::try_from(self.elapsed.as_nanos() / u128::from(self.n)).unwrap_or(u64::MAX)
    }

    pub fn allocs_per_op(&self) -> u64 {
        if self.n == 0 {
            return 0;
        }
        self.mem_allocs / self.n
    }

    pub fn alloced_bytes_per_op(&self) -> u64 {
        if self.n == 0 {
            return 0;
        }
        self.mem_bytes / self.n
    }
}

/// Iteration control handed to a benchmark function.
#[derive(Debug)]
pub struct Bencher {
    n: u64,
    elapsed: Duration,
    mem_allocs: u64,
    mem_bytes: u64,
}

impl Bencher {
    fn new(n: u64) -> Self {
        Self {
            n,
            elapsed: Duration::ZERO,
            mem_allocs: 0,
            mem_bytes: 0,
        }
    }

    pub fn iterations(&self) -> u64 {
        self.n
    }

    /// Runs `f` exactly [`Self::iterations`] times under the timer and returns
    /// the output of the last call.
    #[inline(never)]
    pub fn iter<T, F>(&mut self, mut f: F) -> Option<T>
    where
        F: FnMut() -> T,
    {
        let mut last = None;
        let (allocs_start, bytes_start) = allocation_totals();
        let start = Instant::now();

        for _ in 0..self.n {
            last = Some(black_box(f()));
        }

        self.elapsed = start.elapsed();
        let (allocs_end, bytes_end) = allocation_totals();
        self.mem_allocs = allocs_end.saturating_sub(allocs_start);
        self.mem_bytes = bytes_end.saturating_sub(bytes_start);
        last
    }

    fn result(&self) -> BenchmarkResult {
        BenchmarkResult {
            n: self.n,
            elapsed: self.elapsed,
            mem_allocs: self.mem_allocs,
            mem_bytes: self.mem_bytes,
        }
    }
}

/// Final result of [`run_benchmark`] plus whatever the last run returned.
#[derive(Debug)]
pub struct Run<T> {
    pub result: BenchmarkResult,
    pub output: T,
}

/// Calibrates and runs `f`. The first run always uses a single iteration.
/// An error from any run aborts the benchmark and is returned unchanged.
pub fn run_benchmark<T, E, F>(bench_time: BenchTime, mut f: F) -> Result<Run<T>, E>
where
    F: FnMut(&mut Bencher) -> Result<T, E>,
{
    let mut bencher = Bencher::new(1);
    let mut output = f(&mut bencher)?;

    match bench_time {
        BenchTime::Iterations(n) => {
            if n > 1 {
                bencher = Bencher::new(n);
                output = f(&mut bencher)?;
            }
        }
        BenchTime::Duration(goal) => {
            while bencher.elapsed < goal && bencher.n < MAX_ITERATIONS {
                let n = predict_iterations(goal, bencher.n, bencher.elapsed);
                debug!(n, previous_ns = bencher.elapsed.as_nanos() as u64, "calibrating");
                bencher = Bencher::new(n);
                output = f(&mut bencher)?;
            }
        }
    }

    Ok(Run {
        result: bencher.result(),
        output,
    })
}

/// Predicts the iteration count that reaches `goal`, with 20% headroom,
/// growing at least by one and at most 100x over `last`.
fn predict_iterations(goal: Duration, last: u64, elapsed: Duration) -> u64 {
    let prev_ns = elapsed.as_nanos().max(1);
    let predicted = goal.as_nanos().saturating_mul(u128::from(last)) / prev_ns;
    let mut n = u64::try_from(predicted).unwrap_or(u64::MAX);
    n = n.saturating_add(n / 5);
    n = n.min(last.saturating_mul(100));
    n = n.max(last + 1);
    n.min(MAX_ITERATIONS)
}
