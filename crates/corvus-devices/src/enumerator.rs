use corvus_mem::PhysMemory;
use tracing::warn;

use crate::{DeviceRecord, MmioDevice, RECORD_LEN};

/// Byte length of the port: the command/status byte plus the record window.
pub const ENUM_WINDOW_LEN: u32 = 1 + RECORD_LEN as u32;

/// Command firmware writes to query the device id currently at `base + 1`.
pub const CMD_QUERY: u8 = 0x01;

pub const STATUS_ABSENT: u8 = 0x00;
pub const STATUS_PRESENT: u8 = 0x01;
pub const STATUS_BUSY: u8 = 0x02;

/// The device-enumeration port.
///
/// Firmware writes a device id at `base + 1`, then [`CMD_QUERY`] at `base`,
/// and polls `base` until it leaves [`STATUS_BUSY`]. On success the record
/// window holds the 19-byte descriptor and the status reads
/// [`STATUS_PRESENT`].
///
/// [`STATUS_PRESENT`] has the same value as [`CMD_QUERY`], so a present
/// answer stays latched: the port re-arms only when the command byte changes
/// or a different id shows up in the window. Re-querying the id that is
/// already answered is a no-op with the answer still in place.
pub struct EnumPort {
    base: u32,
    records: Vec<DeviceRecord>,
    answered: Option<u8>,
}

impl EnumPort {
    pub fn new(base: u32, records: Vec<DeviceRecord>) -> Self {
        Self {
            base,
            records,
            answered: None,
        }
    }
}

impl MmioDevice for EnumPort {
    fn name(&self) -> &'static str {
        "enum-port"
    }

    fn record(&self) -> Option<DeviceRecord> {
        None
    }

    fn reset(&mut self, mem: &PhysMemory) {
        if mem.write_u8(self.base, STATUS_ABSENT).is_err() {
            warn!(base = self.base, "enumeration port window not in memory");
        }
    }

    fn tick(&mut self, mem: &PhysMemory) {
        let Ok(cmd) = mem.read_u8(self.base) else {
            return;
        };
        if cmd != CMD_QUERY {
            if cmd != STATUS_BUSY {
                self.answered = None;
            }
            return;
        }

        let Ok(id) = mem.read_u8(self.base + 1) else {
            return;
        };
        if self.answered == Some(id) {
            return;
        }

        let _ = mem.write_u8(self.base, STATUS_BUSY);
        match self.records.iter().find(|r| r.id == id) {
            Some(record) => {
                let _ = mem.write_from(self.base + 1, &record.encode());
                let _ = mem.write_u8(self.base, STATUS_PRESENT);
                self.answered = Some(id);
            }
            None => {
                let _ = mem.write_u8(self.base, STATUS_ABSENT);
                self.answered = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::DeviceClass;

    fn sample_record(id: u8) -> DeviceRecord {
        DeviceRecord {
            id,
            class: DeviceClass::Keyboard,
            interrupt_line: 1,
            base_0: 0xF3000,
            limit_0: 4,
            base_1: 0,
            limit_1: 0,
        }
    }

    fn port_at(base: u32, records: Vec<DeviceRecord>) -> (EnumPort, Arc<PhysMemory>) {
        let mem = Arc::new(PhysMemory::new(0x100000));
        let mut port = EnumPort::new(base, records);
        port.reset(&mem);
        (port, mem)
    }

    #[test]
    fn query_of_a_known_id_publishes_its_record() {
        let (mut port, mem) = port_at(0xF0000, vec![sample_record(3)]);

        mem.write_u8(0xF0001, 3).unwrap();
        mem.write_u8(0xF0000, CMD_QUERY).unwrap();
        port.tick(&mem);

        assert_eq!(mem.read_u8(0xF0000).unwrap(), STATUS_PRESENT);
        let mut bytes = [0u8; RECORD_LEN];
        mem.read_into(0xF0001, &mut bytes).unwrap();
        assert_eq!(DeviceRecord::decode(&bytes), Some(sample_record(3)));
    }

    #[test]
    fn query_of_an_unknown_id_reports_absent() {
        let (mut port, mem) = port_at(0xF0000, vec![sample_record(3)]);

        mem.write_u8(0xF0001, 9).unwrap();
        mem.write_u8(0xF0000, CMD_QUERY).unwrap();
        port.tick(&mem);

        assert_eq!(mem.read_u8(0xF0000).unwrap(), STATUS_ABSENT);
    }

    #[test]
    fn a_present_answer_stays_latched_across_ticks() {
        let (mut port, mem) = port_at(0xF0000, vec![sample_record(3)]);

        mem.write_u8(0xF0001, 3).unwrap();
        mem.write_u8(0xF0000, CMD_QUERY).unwrap();
        port.tick(&mem);
        port.tick(&mem);
        port.tick(&mem);

        // Status must not flap back to busy once answered.
        assert_eq!(mem.read_u8(0xF0000).unwrap(), STATUS_PRESENT);
    }

    #[test]
    fn querying_another_id_rearms_the_port() {
        let (mut port, mem) = port_at(0xF0000, vec![sample_record(3), sample_record(4)]);

        mem.write_u8(0xF0001, 3).unwrap();
        mem.write_u8(0xF0000, CMD_QUERY).unwrap();
        port.tick(&mem);

        mem.write_u8(0xF0001, 4).unwrap();
        mem.write_u8(0xF0000, CMD_QUERY).unwrap();
        port.tick(&mem);

        assert_eq!(mem.read_u8(0xF0000).unwrap(), STATUS_PRESENT);
        assert_eq!(mem.read_u8(0xF0001).unwrap(), 4);
    }
}
