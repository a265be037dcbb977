use std::cell::RefCell;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes};
use evm_overhead_bench::alloc::TrackingAllocator;
use evm_overhead_bench::bencher::BenchTime;
use evm_overhead_bench::config::{Defaults, Environment, ExecutionConfig};
use evm_overhead_bench::engine::{Engine, EngineError, RevmEngine};
use evm_overhead_bench::report::run_overhead_benchmark;
use evm_overhead_bench::sampler::{CALLDATA_SIZE, MeasurementMode, PairedSampler};
use revm::state::AccountInfo;

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

fn assemble(code: &str) -> Bytes {
    let mut bytecode = Vec::new();
    let mut parts = code.split_whitespace();
    while let Some(part) = parts.next() {
        match part.to_uppercase().as_str() {
            "STOP" => bytecode.push(0x00),
            "ADD" => bytecode.push(0x01),
            "MUL" => bytecode.push(0x02),
            "CALLDATASIZE" => bytecode.push(0x36),
            "CALLDATACOPY" => bytecode.push(0x37),
            "POP" => bytecode.push(0x50),
            "MSTORE" => bytecode.push(0x52),
            "RETURN" => bytecode.push(0xf3),
            "INVALID" => bytecode.push(0xfe),
            upper if upper.starts_with("PUSH") => {
                let num_bytes: usize = upper[4..].parse().unwrap();
                bytecode.push(0x60 + num_bytes as u8 - 1);
                let data = parts.next().expect("PUSH instruction is missing data");
                let hex_val = data.trim_start_matches("0x");
                let padded = format!("{:0>width$}", hex_val, width = num_bytes * 2);
                bytecode.extend(hex::decode(padded).unwrap());
            }
            _ => panic!("Unknown assembly instruction: {}", part),
        }
    }
    Bytes::from(bytecode)
}

fn environment() -> Environment {
    Environment::default().with_defaults(&Defaults::at_timestamp(1_700_000_000))
}

fn revm_sampler(mode: MeasurementMode) -> PairedSampler<RevmEngine> {
    PairedSampler::new(RevmEngine, environment(), BenchTime::Iterations(3), mode)
}

fn run_to_lines<E: Engine>(sampler: &PairedSampler<E>, code: &Bytes, samples: usize) -> Vec<Vec<u64>> {
    let mut out = Vec::new();
    run_overhead_benchmark(sampler, code, samples, &mut out).unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| line.split(',').map(|f| f.parse().unwrap()).collect())
        .collect()
}

/// Records every call and fails on demand. Like a real engine it leaves an
/// account behind in the state store.
#[derive(Default)]
struct RecordingEngine {
    calls: RefCell<Vec<Bytes>>,
    calldata_lens: RefCell<Vec<usize>>,
    /// Whether the state store was untouched when the call started.
    fresh_state: RefCell<Vec<bool>>,
    fail: bool,
}

impl Engine for RecordingEngine {
    fn execute(
        &self,
        code: &Bytes,
        calldata: &Bytes,
        config: &mut ExecutionConfig,
    ) -> Result<Bytes, EngineError> {
        assert!(!config.debug, "instrumentation must be off while measuring");
        self.fresh_state
            .borrow_mut()
            .push(config.state.cache.accounts.is_empty());
        config
            .state
            .insert_account_info(Address::repeat_byte(0xaa), AccountInfo::default());
        self.calls.borrow_mut().push(code.clone());
        self.calldata_lens.borrow_mut().push(calldata.len());
        if self.fail {
            Err(EngineError::Halted("InvalidFEOpcode".to_string()))
        } else {
            Ok(code.clone())
        }
    }
}

#[test]
fn test_sample_size_three_emits_three_lines() {
    let code = assemble("PUSH1 0x05 PUSH1 0x0a ADD POP STOP");
    let lines = run_to_lines(&revm_sampler(MeasurementMode::PerIteration), &code, 3);

    assert_eq!(lines.len(), 3);
    for (i, fields) in lines.iter().enumerate() {
        assert_eq!(fields.len(), 7);
        assert_eq!(fields[0], i as u64 + 1);
        assert_eq!(fields[1], 3);
        // total = overhead + execution loop
        assert_eq!(fields[4], fields[2] + fields[3]);
    }
}

#[test]
fn test_halt_against_itself() {
    let sampler = PairedSampler::new(
        RevmEngine,
        environment(),
        BenchTime::Duration(Duration::from_millis(50)),
        MeasurementMode::PerIterationWarmup,
    );
    let code = assemble("STOP");
    let lines = run_to_lines(&sampler, &code, 3);

    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|fields| fields[2] > 0), "overhead should be measurable");
    // `00` and `0000` both stop on the first byte: whatever is left after
    // subtracting the baseline is noise, well below the overhead itself.
    let quietest = lines
        .iter()
        .min_by_key(|fields| fields[3])
        .unwrap();
    assert!(
        quietest[3] * 2 < quietest[2],
        "execution loop {} ns not small next to overhead {} ns",
        quietest[3],
        quietest[2]
    );
}

#[test]
fn test_failing_bytecode_still_reports() {
    let code = assemble("PUSH1 0x01 INVALID");
    let lines = run_to_lines(&revm_sampler(MeasurementMode::PerIteration), &code, 2);

    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|fields| fields.len() == 7 && fields[1] == 3));
}

#[test]
fn test_allocations_are_counted() {
    let code = assemble("PUSH2 0x0100 PUSH1 0x00 PUSH1 0x00 CALLDATACOPY STOP");
    let lines = run_to_lines(&revm_sampler(MeasurementMode::PerIterationWarmup), &code, 1);

    assert!(lines[0][5] > 0, "engine calls allocate");
    assert!(lines[0][6] > 0);
}

#[test]
fn test_empty_measured_before_actual() {
    let engine = RecordingEngine::default();
    let sampler = PairedSampler::new(
        engine,
        environment(),
        BenchTime::Iterations(2),
        MeasurementMode::PerIteration,
    );
    let code = assemble("PUSH1 0x01 PUSH1 0x02 MUL");
    run_to_lines(&sampler, &code, 2);

    let mut empty = vec![0x00];
    empty.extend_from_slice(&code);
    let empty = Bytes::from(empty);

    // Per measurement: one calibration call, then the two timed iterations.
    let expected: Vec<Bytes> = [&empty, &code, &empty, &code]
        .into_iter()
        .flat_map(|c| std::iter::repeat_n(c.clone(), 3))
        .collect();
    assert_eq!(*sampler.engine().calls.borrow(), expected);
    // Every run of the timed loop starts from an untouched state store.
    assert_eq!(
        *sampler.engine().fresh_state.borrow(),
        [true, true, false].repeat(4)
    );
    assert!(sampler
        .engine()
        .calldata_lens
        .borrow()
        .iter()
        .all(|len| *len == CALLDATA_SIZE));
}

#[test]
fn test_shared_warm_up_runs_once() {
    let sampler = PairedSampler::new(
        RecordingEngine::default(),
        environment(),
        BenchTime::Iterations(1),
        MeasurementMode::SerialSharedWarmup,
    );
    let code = assemble("PUSH1 0x01");
    let lines = run_to_lines(&sampler, &code, 3);

    assert_eq!(lines.len(), 3);
    // Two warm-up calls, then one call per measurement.
    assert_eq!(sampler.engine().calls.borrow().len(), 2 + 3 * 2);
    // The warm-up shares one store; nothing it leaves behind reaches a sample.
    let mut expected = vec![true, false];
    expected.extend([true; 6]);
    assert_eq!(*sampler.engine().fresh_state.borrow(), expected);
}

#[test]
fn test_revm_measurements_start_from_empty_state() {
    /// Sees the store before handing over to revm, which installs the code.
    struct Observed {
        fresh_state: RefCell<Vec<bool>>,
    }

    impl Engine for Observed {
        fn execute(
            &self,
            code: &Bytes,
            calldata: &Bytes,
            config: &mut ExecutionConfig,
        ) -> Result<Bytes, EngineError> {
            self.fresh_state
                .borrow_mut()
                .push(config.state.cache.accounts.is_empty());
            RevmEngine.execute(code, calldata, config)
        }
    }

    let sampler = PairedSampler::new(
        Observed {
            fresh_state: RefCell::new(Vec::new()),
        },
        environment(),
        BenchTime::Iterations(1),
        MeasurementMode::PerIterationWarmup,
    );
    let code = assemble("PUSH1 0x05 PUSH1 0x0a ADD");
    run_to_lines(&sampler, &code, 2);

    // Per measurement: the warm-up sees a fresh store, the timed call sees the
    // code the warm-up installed.
    assert_eq!(
        *sampler.engine().fresh_state.borrow(),
        [true, false].repeat(4)
    );
}

#[test]
fn test_per_iteration_warm_up_adds_untimed_call() {
    let sampler = PairedSampler::new(
        RecordingEngine::default(),
        environment(),
        BenchTime::Iterations(1),
        MeasurementMode::PerIterationWarmup,
    );
    let code = assemble("PUSH1 0x01");
    run_to_lines(&sampler, &code, 1);

    assert_eq!(sampler.engine().calls.borrow().len(), 2 * 2);
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_warm_up_failures_are_logged() {
    let sampler = PairedSampler::new(
        RecordingEngine {
            fail: true,
            ..Default::default()
        },
        environment(),
        BenchTime::Iterations(1),
        MeasurementMode::PerIterationWarmup,
    );
    let code = assemble("INVALID");

    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, || run_to_lines(&sampler, &code, 1));

    let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
    let failures = logs
        .lines()
        .filter(|line| line.contains("ERROR") && line.contains("InvalidFEOpcode"))
        .count();
    // Warm-up plus timed call, for both the empty and the actual measurement.
    assert_eq!(sampler.engine().calls.borrow().len(), 4);
    assert_eq!(failures, 4);
}

#[test]
fn test_engine_errors_do_not_abort() {
    let sampler = PairedSampler::new(
        RecordingEngine {
            fail: true,
            ..Default::default()
        },
        environment(),
        BenchTime::Iterations(4),
        MeasurementMode::PerIteration,
    );
    let code = assemble("INVALID");
    let lines = run_to_lines(&sampler, &code, 1);

    assert_eq!(lines[0][1], 4);
    assert_eq!(sampler.engine().calls.borrow().len(), 2 * (1 + 4));
}

#[test]
fn test_setup_failure_yields_zero_record() {
    // Nothing filled in: finalize fails before the engine is ever reached.
    let sampler = PairedSampler::new(
        RecordingEngine::default(),
        Environment::default(),
        BenchTime::Iterations(10),
        MeasurementMode::PerIteration,
    );
    let code = assemble("STOP");
    let lines = run_to_lines(&sampler, &code, 2);

    assert_eq!(lines, vec![vec![1, 0, 0, 0, 0, 0, 0], vec![2, 0, 0, 0, 0, 0, 0]]);
    assert!(sampler.engine().calls.borrow().is_empty());
}
