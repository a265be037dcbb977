//! Paired "empty vs. actual" measurements.

use std::hint::black_box;

use alloy::primitives::Bytes;
use clap::ValueEnum;
use tracing::{debug, error};

use crate::bencher::{BenchTime, BenchmarkResult, Run, run_benchmark};
use crate::config::{ConfigError, Environment, ExecutionConfig};
use crate::engine::Engine;

/// 128 KiB: any offset below 2^16 plus any length up to 2^16 stays in bounds,
/// so memory-copying opcodes can take PUSH3 arguments without running off
/// the end.
pub const CALLDATA_SIZE: usize = 1 << 17;
pub const CALLDATA_FILLER: u8 = b'{';

const STOP: u8 = 0x00;

pub fn calldata() -> Bytes {
    Bytes::from(vec![CALLDATA_FILLER; CALLDATA_SIZE])
}

/// The baseline variant of `code`: a `STOP` in front, so execution halts on
/// the first instruction while the installed code keeps the same shape.
pub fn halt_prefixed(code: &Bytes) -> Bytes {
    let mut empty = Vec::with_capacity(code.len() + 1);
    empty.push(STOP);
    empty.extend_from_slice(code);
    Bytes::from(empty)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum MeasurementMode {
    /// Warm both variants once before the first sample, then measure without
    /// further warm-up.
    SerialSharedWarmup,
    /// One untimed engine call right before every timed loop.
    PerIterationWarmup,
    /// No warm-up at all.
    #[default]
    PerIteration,
}

#[derive(Debug)]
pub struct Measurement {
    pub result: BenchmarkResult,
    /// Output of the last engine call. Only kept alive so the calls cannot be
    /// optimized away.
    pub sink: Bytes,
}

#[derive(Debug)]
pub struct PairedMeasurement {
    pub empty: Measurement,
    pub actual: Measurement,
}

impl PairedMeasurement {
    pub fn into_sinks(self) -> (Bytes, Bytes) {
        (self.empty.sink, self.actual.sink)
    }
}

pub struct PairedSampler<E> {
    engine: E,
    environment: Environment,
    bench_time: BenchTime,
    mode: MeasurementMode,
}

impl<E: Engine> PairedSampler<E> {
    pub fn new(
        engine: E,
        environment: Environment,
        bench_time: BenchTime,
        mode: MeasurementMode,
    ) -> Self {
        Self {
            engine,
            environment,
            bench_time,
            mode,
        }
    }

    pub fn mode(&self) -> MeasurementMode {
        self.mode
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Fresh execution config with instrumentation switched off.
    fn prepare(&self) -> Result<ExecutionConfig, ConfigError> {
        let mut config = self.environment.finalize()?;
        config.debug = false;
        Ok(config)
    }

    /// Measures the halt-prefixed baseline, then `actual`.
    pub fn sample(&self, actual: &Bytes) -> PairedMeasurement {
        let empty = self.measure(&halt_prefixed(actual));
        let actual = self.measure(actual);
        PairedMeasurement { empty, actual }
    }

    /// Measures `code` on its own environment. A setup failure is logged and
    /// yields a zero result.
    pub fn measure(&self, code: &Bytes) -> Measurement {
        let warm_up = self.mode == MeasurementMode::PerIterationWarmup;

        let run = run_benchmark(self.bench_time, |b| {
            let mut config = self.prepare()?;
            let calldata = calldata();

            if warm_up {
                black_box(self.execute(code, &calldata, &mut config));
            }

            let sink = b.iter(|| self.execute(code, &calldata, &mut config));
            Ok::<_, ConfigError>(sink.unwrap_or_default())
        });

        match run {
            Ok(Run { result, output }) => {
                debug!(
                    n = result.n,
                    ns_per_op = result.ns_per_op(),
                    "measurement finished"
                );
                Measurement {
                    result,
                    sink: output,
                }
            }
            Err(err) => {
                error!(%err, "measurement setup failed");
                Measurement {
                    result: BenchmarkResult::default(),
                    sink: Bytes::new(),
                }
            }
        }
    }

    /// Runs both variants once, untimed, on a throwaway environment.
    pub fn shared_warm_up(&self, actual: &Bytes) {
        let mut config = match self.prepare() {
            Ok(config) => config,
            Err(err) => {
                error!(%err, "warm-up setup failed");
                return;
            }
        };
        let calldata = calldata();
        for code in [halt_prefixed(actual), actual.clone()] {
            black_box(self.execute(&code, &calldata, &mut config));
        }
    }

    /// One engine call. A failure is logged and leaves empty output.
    fn execute(&self, code: &Bytes, calldata: &Bytes, config: &mut ExecutionConfig) -> Bytes {
        self.engine
            .execute(code, calldata, config)
            .unwrap_or_else(|err| {
                error!("{err}");
                Bytes::new()
            })
    }
}
