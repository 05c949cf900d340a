#![allow(dead_code)]

use std::time::{Duration, Instant};

use corvus_machine::{Machine, MachineConfig};

/// A small machine for CPU-level scenarios: 1 MiB, no framebuffer window.
pub fn small_machine() -> Machine {
    Machine::new(MachineConfig {
        ram_size_bytes: 0x100000,
        enable_monitor: false,
        ..MachineConfig::default()
    })
    .expect("config is valid")
}

/// Polls `cond` until it holds or the deadline passes. Device workers tick on
/// their own threads, so firmware-style tests wait instead of assuming
/// immediate visibility.
pub fn wait_for(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}
