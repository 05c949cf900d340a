use corvus_mem::PhysMemory;
use tracing::warn;

use crate::{DeviceClass, DeviceRecord, MmioDevice};

pub const SECTOR_SIZE: usize = 512;
pub const DISK_SLOTS: usize = 8;

/// Copy the addressed sector into the buffer window.
pub const CMD_READ_SECTOR: u8 = 0x01;
/// Copy the buffer window into the addressed sector.
pub const CMD_WRITE_SECTOR: u8 = 0x02;
/// Select the disk named by input byte 0.
pub const CMD_SELECT_DISK: u8 = 0x04;
/// Publish the selected disk's sector count at `base_0 + 3`.
pub const CMD_GET_COUNT: u8 = 0x08;

/// Command byte after successful completion. Distinct from every command so
/// a finished command is never re-serviced.
pub const STATUS_IDLE: u8 = 0x00;
/// Command byte after a failed command; the reason is at `base_0 + 2`.
pub const STATUS_ERROR: u8 = 0x80;

pub const ERR_NO_DISK: u8 = 0x01;
pub const ERR_BAD_SECTOR: u8 = 0x02;

const CMD_WINDOW_LEN: u32 = 7;

/// Disk controller: a command window at `base_0` and a one-sector buffer at
/// `base_1`.
///
/// Command window layout: byte 0 command/status, bytes 1–4 input (sector
/// number little-endian, or disk index in byte 1), byte 2 doubles as the
/// error register, bytes 3–6 as the sector-count result. Firmware writes the
/// input bytes, then the command, then polls byte 0 until it leaves the
/// command value. The present-disk bitmap appears at `base_0 + 1` at reset.
pub struct DiskController {
    record: DeviceRecord,
    disks: [Option<Vec<u8>>; DISK_SLOTS],
    selected: usize,
}

impl DiskController {
    pub fn new(id: u8, cmd_base: u32, buf_base: u32) -> Self {
        Self {
            record: DeviceRecord {
                id,
                class: DeviceClass::DiskController,
                interrupt_line: 0,
                base_0: cmd_base,
                limit_0: CMD_WINDOW_LEN,
                base_1: buf_base,
                limit_1: SECTOR_SIZE as u32,
            },
            disks: Default::default(),
            selected: 0,
        }
    }

    /// Attaches (or detaches) a disk image before the machine starts. Image
    /// length should be a multiple of [`SECTOR_SIZE`]; a ragged tail is
    /// unaddressable.
    pub fn set_disk(&mut self, slot: usize, image: Option<Vec<u8>>) {
        if image.as_ref().is_some_and(|i| i.len() % SECTOR_SIZE != 0) {
            warn!(slot, "disk image length is not a multiple of the sector size");
        }
        self.disks[slot] = image;
    }

    fn present_bitmap(&self) -> u8 {
        self.disks
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .fold(0, |acc, (i, _)| acc | 1 << i)
    }

    fn fail(mem: &PhysMemory, cmd_base: u32, reason: u8) {
        let _ = mem.write_u8(cmd_base + 2, reason);
        let _ = mem.write_u8(cmd_base, STATUS_ERROR);
    }

    fn finish(mem: &PhysMemory, cmd_base: u32) {
        let _ = mem.write_u8(cmd_base, STATUS_IDLE);
    }

    /// Byte range of `sector` on the selected disk; reports the failure and
    /// returns `None` if there is no disk or the sector is out of range.
    fn addressed_range(&self, mem: &PhysMemory, sector: u32) -> Option<std::ops::Range<usize>> {
        let Some(disk) = &self.disks[self.selected] else {
            Self::fail(mem, self.record.base_0, ERR_NO_DISK);
            return None;
        };
        let start = sector as u64 * SECTOR_SIZE as u64;
        let end = start + SECTOR_SIZE as u64;
        if end > disk.len() as u64 {
            Self::fail(mem, self.record.base_0, ERR_BAD_SECTOR);
            return None;
        }
        Some(start as usize..end as usize)
    }
}

impl MmioDevice for DiskController {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn record(&self) -> Option<DeviceRecord> {
        Some(self.record)
    }

    fn reset(&mut self, mem: &PhysMemory) {
        let _ = mem.write_u8(self.record.base_0, STATUS_IDLE);
        let _ = mem.write_u8(self.record.base_0 + 1, self.present_bitmap());
    }

    fn tick(&mut self, mem: &PhysMemory) {
        let cmd_base = self.record.base_0;
        let buf_base = self.record.base_1;

        let Ok(cmd) = mem.read_u8(cmd_base) else {
            return;
        };
        if !matches!(
            cmd,
            CMD_READ_SECTOR | CMD_WRITE_SECTOR | CMD_SELECT_DISK | CMD_GET_COUNT
        ) {
            return;
        }

        let mut input = [0u8; 4];
        if mem.read_into(cmd_base + 1, &mut input).is_err() {
            return;
        }

        match cmd {
            CMD_SELECT_DISK => {
                let slot = input[0] as usize;
                match self.disks.get(slot) {
                    Some(Some(_)) => {
                        self.selected = slot;
                        Self::finish(mem, cmd_base);
                    }
                    _ => Self::fail(mem, cmd_base, ERR_NO_DISK),
                }
            }
            CMD_READ_SECTOR => {
                let sector = u32::from_le_bytes(input);
                let Some(range) = self.addressed_range(mem, sector) else {
                    return;
                };
                if let Some(disk) = &self.disks[self.selected] {
                    if mem.write_from(buf_base, &disk[range]).is_ok() {
                        Self::finish(mem, cmd_base);
                    }
                }
            }
            CMD_WRITE_SECTOR => {
                let sector = u32::from_le_bytes(input);
                let Some(range) = self.addressed_range(mem, sector) else {
                    return;
                };
                let mut buf = [0u8; SECTOR_SIZE];
                if mem.read_into(buf_base, &mut buf).is_err() {
                    return;
                }
                if let Some(disk) = self.disks[self.selected].as_mut() {
                    disk[range].copy_from_slice(&buf);
                }
                Self::finish(mem, cmd_base);
            }
            CMD_GET_COUNT => match &self.disks[self.selected] {
                Some(disk) => {
                    let sectors = (disk.len() / SECTOR_SIZE) as u32;
                    let _ = mem.write_u32(cmd_base + 3, sectors);
                    Self::finish(mem, cmd_base);
                }
                None => Self::fail(mem, cmd_base, ERR_NO_DISK),
            },
            _ => {}
        }
    }
}
