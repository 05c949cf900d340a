use std::sync::{Arc, Mutex};
use std::time::Duration;

use corvus_mem::PhysMemory;

use crate::{DeviceClass, DeviceRecord, MmioDevice};

/// One presented frame. Pixels are packed `u32` in little-endian RGBA byte
/// order: `value = R | (G << 8) | (B << 16) | (A << 24)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

/// Where the monitor delivers frames. Implementations run on the monitor's
/// worker thread and should not block for long.
pub trait FrameSink: Send {
    fn present(&mut self, frame: Frame);
}

/// Discards every frame.
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _frame: Frame) {}
}

/// Keeps only the most recent frame; clone the handle to read it from
/// another thread.
#[derive(Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<Frame>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Frame> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

impl FrameSink for LatestFrame {
    fn present(&mut self, frame: Frame) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(frame);
        }
    }
}

/// Monitor: a raw framebuffer window at `base_1` plus a one-byte control
/// window just past it. The worker snapshots the framebuffer at roughly
/// display cadence and hands it to the sink.
pub struct Monitor {
    record: DeviceRecord,
    width: u32,
    height: u32,
    sink: Box<dyn FrameSink>,
}

impl Monitor {
    pub const DEFAULT_WIDTH: u32 = 640;
    pub const DEFAULT_HEIGHT: u32 = 360;

    pub fn new(id: u8, fb_base: u32, width: u32, height: u32, sink: Box<dyn FrameSink>) -> Self {
        let fb_len = width * height * 4;
        Self {
            record: DeviceRecord {
                id,
                class: DeviceClass::Monitor,
                interrupt_line: 0,
                base_0: fb_base + fb_len,
                limit_0: 1,
                base_1: fb_base,
                limit_1: fb_len,
            },
            width,
            height,
            sink,
        }
    }
}

impl MmioDevice for Monitor {
    fn name(&self) -> &'static str {
        "monitor"
    }

    fn record(&self) -> Option<DeviceRecord> {
        Some(self.record)
    }

    fn reset(&mut self, mem: &PhysMemory) {
        let _ = mem.write_u8(self.record.base_0, 0x01);
    }

    fn tick(&mut self, mem: &PhysMemory) {
        let count = (self.width * self.height) as usize;
        let mut pixels = Vec::with_capacity(count);
        for i in 0..count {
            match mem.read_u32(self.record.base_1 + i as u32 * 4) {
                Ok(px) => pixels.push(px),
                Err(_) => return,
            }
        }
        self.sink.present(Frame {
            width: self.width,
            height: self.height,
            pixels,
        });
    }

    fn poll_interval(&self) -> Duration {
        // Roughly 60 Hz.
        Duration::from_micros(16_666)
    }
}
