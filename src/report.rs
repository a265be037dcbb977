//! Overhead records and the sample loop.

use std::hint::black_box;
use std::io::{self, Write};

use alloy::primitives::Bytes;
use tracing::info;

use crate::bencher::BenchmarkResult;
use crate::engine::Engine;
use crate::sampler::{MeasurementMode, PairedSampler};

/// One output line: the actual run with the empty-run baseline split off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverheadRecord {
    pub sample: usize,
    pub iterations: u64,
    pub overhead_ns: u64,
    /// Never negative: noise can make the actual run look cheaper than the
    /// empty one, and that is reported as zero.
    pub execution_loop_ns: u64,
    pub total_ns: u64,
    pub allocs_per_op: u64,
    pub bytes_per_op: u64,
}

impl OverheadRecord {
    pub fn from_pair(sample: usize, empty: &BenchmarkResult, actual: &BenchmarkResult) -> Self {
        let overhead_ns = empty.ns_per_op();
        let actual_ns = actual.ns_per_op();
        Self {
            sample,
            iterations: actual.n,
            overhead_ns,
            execution_loop_ns: actual_ns.saturating_sub(overhead_ns),
            total_ns: overhead_ns.max(actual_ns),
            allocs_per_op: actual.allocs_per_op(),
            bytes_per_op: actual.alloced_bytes_per_op(),
        }
    }

    pub fn write_csv<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(
            out,
            "{},{},{},{},{},{},{}",
            self.sample,
            self.iterations,
            self.overhead_ns,
            self.execution_loop_ns,
            self.total_ns,
            self.allocs_per_op,
            self.bytes_per_op
        )?;
        out.flush()
    }
}

/// Runs `sample_size` paired samples of `actual` in order and writes one CSV
/// line per sample. Sample indices start at 1.
pub fn run_overhead_benchmark<E, W>(
    sampler: &PairedSampler<E>,
    actual: &Bytes,
    sample_size: usize,
    out: &mut W,
) -> io::Result<()>
where
    E: Engine,
    W: Write,
{
    info!(
        sample_size,
        code_len = actual.len(),
        mode = ?sampler.mode(),
        "starting overhead benchmark"
    );

    if sampler.mode() == MeasurementMode::SerialSharedWarmup {
        sampler.shared_warm_up(actual);
    }

    for sample in 1..=sample_size {
        let pair = sampler.sample(actual);
        OverheadRecord::from_pair(sample, &pair.empty.result, &pair.actual.result)
            .write_csv(out)?;
        black_box(pair.into_sinks());
    }
    Ok(())
}
