use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use corvus_mem::PhysMemory;

use crate::{DeviceClass, DeviceRecord, IrqLine, MmioDevice};

/// Firmware writes this at `base_0` to acknowledge a scan code.
pub const KEY_ACK: u8 = 0x01;
/// The device writes this at `base_0` after latching a new scan code.
pub const KEY_PENDING: u8 = 0x02;

const WINDOW_LEN: u32 = 4;

/// Host-side handle for feeding scan codes to a [`Keyboard`].
#[derive(Clone)]
pub struct ScanCodeInjector {
    tx: Sender<u16>,
}

impl ScanCodeInjector {
    /// Queues a scan code. Codes arriving while one is already latched are
    /// held until firmware acknowledges.
    pub fn inject(&self, code: u16) {
        // The worker owning the receiver may already be gone at shutdown.
        let _ = self.tx.send(code);
    }
}

/// Builds a keyboard device plus the injector feeding it.
pub fn keyboard_pair(
    id: u8,
    base: u32,
    line: u8,
    irq: Arc<dyn IrqLine>,
) -> (Keyboard, ScanCodeInjector) {
    let (tx, rx) = channel();
    (
        Keyboard {
            record: DeviceRecord {
                id,
                class: DeviceClass::Keyboard,
                interrupt_line: line,
                base_0: base,
                limit_0: WINDOW_LEN,
                base_1: 0,
                limit_1: 0,
            },
            irq,
            rx,
            waiting: false,
        },
        ScanCodeInjector { tx },
    )
}

/// Keyboard: a 4-byte window at `base_0`.
///
/// Byte 0 is the handshake register (`KEY_PENDING` after a latch; firmware
/// writes `KEY_ACK` to consume), bytes 2–3 hold the latched scan code. Each
/// latch raises the configured interrupt line once.
pub struct Keyboard {
    record: DeviceRecord,
    irq: Arc<dyn IrqLine>,
    rx: Receiver<u16>,
    waiting: bool,
}

impl MmioDevice for Keyboard {
    fn name(&self) -> &'static str {
        "keyboard"
    }

    fn record(&self) -> Option<DeviceRecord> {
        Some(self.record)
    }

    fn reset(&mut self, mem: &PhysMemory) {
        let _ = mem.write_u8(self.record.base_0, KEY_ACK);
    }

    fn tick(&mut self, mem: &PhysMemory) {
        let base = self.record.base_0;

        if self.waiting {
            match mem.read_u8(base) {
                Ok(KEY_ACK) => self.waiting = false,
                _ => return,
            }
        }

        if let Ok(code) = self.rx.try_recv() {
            if mem.write_u16(base + 2, code).is_err() {
                return;
            }
            if mem.write_u8(base, KEY_PENDING).is_ok() {
                self.waiting = true;
                self.irq.raise(self.record.interrupt_line);
            }
        }
    }
}
