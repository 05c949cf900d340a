use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use corvus_mem::PhysMemory;

use crate::DeviceRecord;

/// A device driven by polling its mapped window in shared memory.
///
/// `reset` runs once on the machine thread before any worker starts; `tick`
/// runs repeatedly on the device's own thread. Ticks race with the CPU: a
/// tick must tolerate observing a window mid-update and may only rely on the
/// polling conventions of its protocol.
pub trait MmioDevice: Send {
    fn name(&self) -> &'static str;

    /// The record published through the enumeration port, if this device is
    /// enumerable.
    fn record(&self) -> Option<DeviceRecord>;

    /// Writes the device's power-on register values.
    fn reset(&mut self, mem: &PhysMemory);

    /// One poll of the mapped window.
    fn tick(&mut self, mem: &PhysMemory);

    /// How long the worker sleeps between ticks.
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(1)
    }
}

/// Runs `dev` on its own thread until `stop` is set.
pub fn spawn_device(
    mut dev: Box<dyn MmioDevice>,
    mem: Arc<PhysMemory>,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    let period = dev.poll_interval();
    thread::Builder::new()
        .name(format!("corvus-{}", dev.name()))
        .spawn(move || {
            while !stop.load(Ordering::Acquire) {
                dev.tick(&mem);
                thread::sleep(period);
            }
        })
}
