//! Footprint accounting: byte-milliseconds integrals, death-notification
//! timing, and single-finalization guarantees.
//!
//! These tests sleep for real wall-clock intervals, so they run serially
//! and assert with generous scheduling tolerance.

use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use borroso::{Runtime, RuntimeConfig, Tracked};
use serial_test::serial;

static TRACING: Once = Once::new();

/// Capture runtime diagnostics with the test writer so late-death and
/// force-finalization logging shows up in failing test output.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("borroso=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

fn headless_runtime() -> Runtime {
    init_tracing();
    Runtime::with_config(RuntimeConfig {
        report_path: None,
        strategy: None,
    })
}

#[test]
#[serial]
fn test_collected_object_contributes_duration_and_byte_integral() {
    let rt = headless_runtime();
    let started = Instant::now();

    let obj = Tracked::new(&rt, [0u8; 32], true, 10, 20);
    thread::sleep(Duration::from_millis(100));
    drop(obj); // death notification

    // Shutdown drains the channel, so the death is processed by now.
    let report = rt.shutdown_quiet();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let objects = report.footprint.get("heap-objects").copied().unwrap();
    let bytes = report.footprint.get("heap-bytes").copied().unwrap();
    let duration = objects[1];

    // Alive for at least the sleep, at most the whole test.
    assert!(duration >= 100, "duration {duration} below sleep interval");
    assert!(
        duration <= elapsed_ms + 1,
        "duration {duration} > {elapsed_ms}"
    );

    // The byte integrals are exact multiples of the recorded duration.
    assert_eq!(bytes[0], 10 * duration);
    assert_eq!(bytes[1], 20 * duration);

    // Nothing stack-allocated was involved.
    assert!(report.footprint.get("stack-objects").is_none());
}

#[test]
#[serial]
fn test_each_object_is_finalized_exactly_once() {
    let rt = headless_runtime();

    // Dies early; the shutdown sweep must not fold it a second time.
    let early = Tracked::new(&rt, (), true, 0, 1000);
    thread::sleep(Duration::from_millis(50));
    drop(early);
    thread::sleep(Duration::from_millis(100));

    let report = rt.shutdown_quiet();
    let bytes = report.footprint.get("heap-bytes").copied().unwrap();

    // Correct accounting is ~1000 * 50ms. Double-folding at shutdown would
    // roughly quadruple that.
    assert!(bytes[1] >= 1000 * 50, "approx bytes {} too small", bytes[1]);
    assert!(
        bytes[1] < 1000 * 120,
        "approx bytes {} suggest double finalization",
        bytes[1]
    );
}

#[test]
#[serial]
fn test_stack_slots_fold_into_stack_buckets() {
    let rt = headless_runtime();
    let started = Instant::now();

    let slot = borroso::LocalSlot::new(&rt, 3.5f64, true, 0, 8);
    thread::sleep(Duration::from_millis(60));
    drop(slot);

    let report = rt.shutdown_quiet();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let objects = report.footprint.get("stack-objects").copied().unwrap();
    let bytes = report.footprint.get("stack-bytes").copied().unwrap();
    assert!(objects[1] >= 60 && objects[1] <= elapsed_ms + 1);
    assert_eq!(bytes[1], 8 * objects[1]);
    assert_eq!(bytes[0], 0);
}

#[test]
#[serial]
fn test_objects_alive_at_shutdown_keep_their_footprint() {
    let rt = headless_runtime();
    let started = Instant::now();

    let survivor = Tracked::new(&rt, vec![0u64; 4], true, 16, 16);
    thread::sleep(Duration::from_millis(80));

    // Never dropped before shutdown; the forced sweep accounts it.
    let report = rt.shutdown_quiet();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let objects = report.footprint.get("heap-objects").copied().unwrap();
    assert!(objects[1] >= 80 && objects[1] <= elapsed_ms + 1);

    drop(survivor);
}

#[test]
#[serial]
fn test_death_after_shutdown_is_ignored() {
    let rt = headless_runtime();
    let obj = Tracked::new(&rt, 1u32, true, 4, 0);

    let before = rt.shutdown_quiet();
    drop(obj); // late notification, channel already closed
    let after = rt.shutdown_quiet();

    assert_eq!(before, after);
}
