use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

/// How a device asks for an interrupt. Implementations must be callable from
/// any device thread.
pub trait IrqLine: Send + Sync {
    fn raise(&self, line: u8);
}

/// Pending-interrupt latch shared between device threads and the CPU run
/// loop.
///
/// One bit per line; raising an already-pending line coalesces. There is no
/// queue: the run loop takes the whole pending set after each instruction,
/// and lines observed while the CPU has interrupts disabled are lost.
#[derive(Clone, Default)]
pub struct IrqLatch {
    pending: Arc<AtomicU16>,
}

impl IrqLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically drains the pending set.
    pub fn take(&self) -> u16 {
        self.pending.swap(0, Ordering::AcqRel)
    }
}

impl IrqLine for IrqLatch {
    fn raise(&self, line: u8) {
        debug_assert!(line < 16);
        self.pending.fetch_or(1 << line, Ordering::AcqRel);
    }
}
