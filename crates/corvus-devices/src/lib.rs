//! Memory-mapped device models.
//!
//! Every device owns a [`DeviceRecord`] describing up to two mapped windows
//! in physical memory and runs on its own worker thread (see [`worker`]),
//! communicating with firmware only through those windows and by raising
//! interrupt lines through an [`IrqLine`].

#![forbid(unsafe_code)]

mod disk;
mod enumerator;
mod intc;
mod irq;
mod keyboard;
mod monitor;
mod worker;

pub use disk::{
    DiskController, CMD_GET_COUNT, CMD_READ_SECTOR, CMD_SELECT_DISK, CMD_WRITE_SECTOR,
    DISK_SLOTS, ERR_BAD_SECTOR, ERR_NO_DISK, SECTOR_SIZE, STATUS_ERROR, STATUS_IDLE,
};
pub use enumerator::{
    EnumPort, CMD_QUERY, ENUM_WINDOW_LEN, STATUS_ABSENT, STATUS_BUSY, STATUS_PRESENT,
};
pub use intc::{InterruptController, INTC_WINDOW_LEN};
pub use irq::{IrqLatch, IrqLine};
pub use keyboard::{keyboard_pair, Keyboard, ScanCodeInjector, KEY_ACK, KEY_PENDING};
pub use monitor::{Frame, FrameSink, LatestFrame, Monitor, NullSink};
pub use worker::{spawn_device, MmioDevice};

/// Device classes as they appear in byte 1 of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceClass {
    Memory = 0x1,
    DiskController = 0x2,
    InterruptController = 0x3,
    Timer = 0x4,
    PowerManager = 0x5,
    Mouse = 0x10,
    Keyboard = 0x11,
    Monitor = 0x20,
}

impl DeviceClass {
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0x1 => Self::Memory,
            0x2 => Self::DiskController,
            0x3 => Self::InterruptController,
            0x4 => Self::Timer,
            0x5 => Self::PowerManager,
            0x10 => Self::Mouse,
            0x11 => Self::Keyboard,
            0x20 => Self::Monitor,
            _ => return None,
        })
    }
}

/// Packed wire size of a [`DeviceRecord`].
pub const RECORD_LEN: usize = 19;

/// A device descriptor as firmware sees it through the enumeration port.
///
/// Each `limit` is the byte length of the window starting at the matching
/// `base`; a zero limit means the window is unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: u8,
    pub class: DeviceClass,
    pub interrupt_line: u8,
    pub base_0: u32,
    pub limit_0: u32,
    pub base_1: u32,
    pub limit_1: u32,
}

impl DeviceRecord {
    /// Packed little-endian wire form, no padding.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[0] = self.id;
        bytes[1] = self.class as u8;
        bytes[2] = self.interrupt_line;
        bytes[3..7].copy_from_slice(&self.base_0.to_le_bytes());
        bytes[7..11].copy_from_slice(&self.limit_0.to_le_bytes());
        bytes[11..15].copy_from_slice(&self.base_1.to_le_bytes());
        bytes[15..19].copy_from_slice(&self.limit_1.to_le_bytes());
        bytes
    }

    /// Inverse of [`encode`](Self::encode); `None` on an unknown class byte.
    pub fn decode(bytes: &[u8; RECORD_LEN]) -> Option<Self> {
        let word = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Some(Self {
            id: bytes[0],
            class: DeviceClass::from_u8(bytes[1])?,
            interrupt_line: bytes[2],
            base_0: word(3),
            limit_0: word(7),
            base_1: word(11),
            limit_1: word(15),
        })
    }
}
