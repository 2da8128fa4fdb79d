//! Blackbox tests through the public crate API: flood lifecycle, live
//! sampling of real workers, and the shared log on real files.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nicetop::config::FloodConfig;
use nicetop::flood::{FloodController, FloodError};
use nicetop::sampler::StatSampler;
use nicetop::sched::{weight_for_nice, Nice, SchedPolicy};
use nicetop::sink::{session_tag, LogRecord, MemorySink, RecordSink, SharedLog};
use serial_test::serial;

fn sched_accounting_available() -> bool {
    std::path::Path::new("/proc/self/sched").exists()
}

fn relaxed_cfg() -> FloodConfig {
    FloodConfig {
        max_threads_per_core: 1024,
        monitor_interval: Duration::from_millis(50),
    }
}

fn nice(value: i8) -> Nice {
    Nice::new(value).expect("valid niceness")
}

#[test]
#[serial]
fn test_flood_spawns_exact_count_and_stops_clean() {
    let controller = FloodController::new(relaxed_cfg());

    for count in [1, 4] {
        let session = controller
            .start(count, nice(19), Arc::new(MemorySink::new()))
            .expect("start flood");

        assert_eq!(session.worker_tids().len(), count);

        // stop() returns only once every worker joined.
        session.stop();
    }
}

#[test]
fn test_excessive_thread_count_refused_without_partial_spawn() {
    let controller = FloodController::new(FloodConfig {
        max_threads_per_core: 1,
        monitor_interval: Duration::from_millis(50),
    });

    let err = controller
        .start(100_000, nice(19), Arc::new(MemorySink::new()))
        .expect_err("far above any safety bound");

    match err {
        FloodError::ExcessiveLoad { requested, max, .. } => {
            assert_eq!(requested, 100_000);
            assert!(max < 100_000);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
#[serial]
fn test_flood_workers_carry_requested_niceness_end_to_end() {
    if !sched_accounting_available() {
        eprintln!("skipping: kernel does not expose /proc/<pid>/sched");
        return;
    }

    let controller = FloodController::new(relaxed_cfg());
    let sink = Arc::new(MemorySink::new());
    let session = controller
        .start(4, nice(10), Arc::clone(&sink) as Arc<dyn RecordSink>)
        .expect("start flood");

    // Sampling any worker immediately reflects the requested niceness and
    // the matching kernel weight.
    let mut sampler = StatSampler::new();
    for tid in session.worker_tids() {
        let snap = sampler.poll(tid).expect("sample worker");
        assert_eq!(snap.nice, nice(10));
        assert_eq!(snap.weight, weight_for_nice(nice(10)));
        assert_eq!(snap.policy, SchedPolicy::Other);
    }

    // A deprioritized worker weighs less than a nice-0 task would.
    assert!(weight_for_nice(nice(10)) < weight_for_nice(nice(0)));

    // The session's monitor writes records at its own cadence.
    thread::sleep(Duration::from_millis(300));
    session.stop();

    let records = sink.records();
    assert!(!records.is_empty(), "monitor should have sampled workers");
    assert!(records.iter().all(|r| r.nice == nice(10)));

    // Per-target timestamps in the log are strictly increasing.
    for tid in records.iter().map(|r| r.target).collect::<std::collections::HashSet<_>>() {
        let stream: Vec<u64> = records
            .iter()
            .filter(|r| r.target == tid)
            .map(|r| r.timestamp_ns)
            .collect();
        assert!(stream.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn test_shared_log_interleaves_whole_records_across_writers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = Arc::new(SharedLog::new(dir.path().join("nicetop.log")));

    let writers = 4;
    let per_writer = 50;

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for i in 0..per_writer {
                    let record = LogRecord {
                        session: format!("writer-{w}"),
                        target: w,
                        timestamp_ns: i,
                        vruntime_ns: Some(u64::from(i as u32) * 1_000),
                        nr_switches: i,
                        weight: 1024,
                        policy: SchedPolicy::Other,
                        nice: Nice::new(0).expect("valid"),
                    };
                    log.append(&record).expect("append");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread");
    }

    // Every line parses: records interleave, none are torn.
    let records = log.read_records().expect("read back");
    assert_eq!(records.len() as i32, writers * per_writer as i32);

    // Within one writer the causal order survives.
    for w in 0..writers {
        let session = format!("writer-{w}");
        let stream: Vec<u64> = records
            .iter()
            .filter(|r| r.session == session)
            .map(|r| r.timestamp_ns)
            .collect();
        assert_eq!(stream.len(), per_writer as usize);
        assert!(stream.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

#[test]
#[serial]
fn test_flood_records_round_trip_through_shared_log_file() {
    if !sched_accounting_available() {
        eprintln!("skipping: kernel does not expose /proc/<pid>/sched");
        return;
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let log = Arc::new(SharedLog::new(dir.path().join("nicetop.log")));

    let controller = FloodController::new(relaxed_cfg());
    let session = controller
        .start(2, nice(5), Arc::clone(&log) as Arc<dyn RecordSink>)
        .expect("start flood");

    thread::sleep(Duration::from_millis(300));
    session.stop();

    let records = log.read_records().expect("read back");
    assert!(!records.is_empty());

    let expected_tag = session_tag();
    for record in &records {
        // Same process, same tag prefix (the writing pid).
        assert_eq!(
            record.session.split('-').next(),
            expected_tag.split('-').next(),
        );
        assert_eq!(record.nice, nice(5));
        assert_eq!(record.weight, weight_for_nice(nice(5)));

        // Round-trip: re-encoding reproduces the parsed record exactly.
        let line = record.to_line().expect("encode");
        assert_eq!(LogRecord::from_line(&line).expect("decode"), *record);
    }
}
