use std::sync::Arc;

use corvus_mem::{MemError, PhysMemory};
use tracing::{debug, trace};

use crate::op;
use crate::{CpuFlags, Exception, IVT_BASE, IVT_ENTRIES, SYSCALL_LINE};

/// Low word of a multiplication result / remainder of a division.
pub const REG_MUL_LO: usize = 13;
/// High word of a multiplication result / quotient of a division.
pub const REG_MUL_HI: usize = 14;
/// Stack pointer. The stack grows down; pushes pre-decrement by 4.
pub const REG_SP: usize = 15;

/// CPU state plus a handle to the shared physical memory.
///
/// `r0` is a hard-wired zero: it is reset at the end of every instruction, so
/// writes to it are observable only within the instruction that made them.
pub struct Cpu {
    pub regs: [u32; 16],
    pub ip: u32,
    pub flags: CpuFlags,
    mem: Arc<PhysMemory>,
}

impl Cpu {
    pub fn new(mem: Arc<PhysMemory>) -> Self {
        Self {
            regs: [0; 16],
            ip: corvus_mem::BOOT_BASE,
            flags: CpuFlags::empty(),
            mem,
        }
    }

    pub fn mem(&self) -> &Arc<PhysMemory> {
        &self.mem
    }

    /// Executes exactly one instruction.
    ///
    /// On `Err` nothing has been committed: registers, `ip`, flags, and
    /// memory are unchanged from before the call.
    pub fn step(&mut self) -> Result<(), Exception> {
        let opcode = self.fetch_u8(self.ip)?;
        let advance = self.exec(opcode)?;
        self.ip = self.ip.wrapping_add(advance);
        self.regs[0] = 0;
        Ok(())
    }

    /// Delivers interrupt `line` (must be below [`IVT_ENTRIES`]).
    ///
    /// Silently dropped while the interrupt flag is clear. Otherwise pushes
    /// the return frame, masks interrupts, leaves user mode, and jumps to the
    /// handler installed in the IVT.
    pub fn interrupt(&mut self, line: u8, error_code: u8) -> Result<(), Exception> {
        self.deliver(line, error_code, self.ip)
    }

    fn deliver(&mut self, line: u8, error_code: u8, return_ip: u32) -> Result<(), Exception> {
        debug_assert!(line < IVT_ENTRIES);
        if !self.flags.contains(CpuFlags::INTERRUPT) {
            trace!(line, "interrupt dropped: delivery disabled");
            return Ok(());
        }

        let handler = self.read_u32_data(IVT_BASE + u32::from(line) * 4)?;

        // Frame layout, from the new stack top up: return ip, saved sp,
        // saved flags, error code. IRET consumes the first three.
        let sp = self.regs[REG_SP];
        let new_sp = sp.wrapping_sub(16);
        let mut frame = [0u8; 16];
        frame[0..4].copy_from_slice(&return_ip.to_le_bytes());
        frame[4..8].copy_from_slice(&sp.to_le_bytes());
        frame[8..12].copy_from_slice(&u32::from(self.flags.bits()).to_le_bytes());
        frame[12..16].copy_from_slice(&u32::from(error_code).to_le_bytes());
        self.write_frame(new_sp, &frame)?;

        self.regs[REG_SP] = new_sp;
        self.flags.remove(CpuFlags::USER_MODE | CpuFlags::INTERRUPT);
        self.ip = handler;
        Ok(())
    }

    fn exec(&mut self, opcode: u8) -> Result<u32, Exception> {
        let advance = match opcode {
            op::NOP => 1,

            op::ADD => self.binary_rr(|b, a| b.wrapping_add(a))?,
            op::SUB => self.binary_rr(|b, a| b.wrapping_sub(a))?,
            op::AND => self.binary_rr(|b, a| b & a)?,
            op::OR => self.binary_rr(|b, a| b | a)?,
            op::XOR => self.binary_rr(|b, a| b ^ a)?,
            op::SHL => self.binary_rr(|b, a| b.checked_shl(a).unwrap_or(0))?,
            op::SHR => self.binary_rr(|b, a| b.checked_shr(a).unwrap_or(0))?,

            op::MUL => {
                let (a, b) = self.mode_regs()?;
                let product = u64::from(self.regs[b]) * u64::from(self.regs[a]);
                self.regs[REG_MUL_HI] = (product >> 32) as u32;
                self.regs[REG_MUL_LO] = product as u32;
                2
            }
            op::DIV => {
                let (a, b) = self.mode_regs()?;
                let divisor = self.regs[a];
                if divisor == 0 {
                    return Err(Exception::DivideByZero { ip: self.ip });
                }
                self.regs[REG_MUL_HI] = self.regs[b] / divisor;
                self.regs[REG_MUL_LO] = self.regs[b] % divisor;
                2
            }

            op::STB => {
                let (a, b) = self.mode_regs()?;
                self.write_u8_data(self.regs[b], self.regs[a] as u8)?;
                2
            }
            op::STW => {
                let (a, b) = self.mode_regs()?;
                self.write_u16_data(self.regs[b], self.regs[a] as u16)?;
                2
            }
            op::STD => {
                let (a, b) = self.mode_regs()?;
                self.write_u32_data(self.regs[b], self.regs[a])?;
                2
            }
            op::LDB => {
                let (a, b) = self.mode_regs()?;
                self.regs[b] = u32::from(self.read_u8_data(self.regs[a])?);
                2
            }
            op::LDW => {
                let (a, b) = self.mode_regs()?;
                self.regs[b] = u32::from(self.read_u16_data(self.regs[a])?);
                2
            }
            op::LDD => {
                let (a, b) = self.mode_regs()?;
                self.regs[b] = self.read_u32_data(self.regs[a])?;
                2
            }

            op::RI_GROUP => {
                let (sub, a) = self.mode_sub_reg()?;
                let imm = self.fetch_u32(self.ip.wrapping_add(2))?;
                match sub {
                    op::ri::ADDI => self.regs[a] = self.regs[a].wrapping_add(imm),
                    op::ri::SUBI => self.regs[a] = self.regs[a].wrapping_sub(imm),
                    op::ri::MULI => {
                        let product = u64::from(self.regs[a]) * u64::from(imm);
                        self.regs[REG_MUL_HI] = (product >> 32) as u32;
                        self.regs[REG_MUL_LO] = product as u32;
                    }
                    op::ri::DIVI => {
                        if imm == 0 {
                            return Err(Exception::DivideByZero { ip: self.ip });
                        }
                        self.regs[REG_MUL_HI] = self.regs[a] / imm;
                        self.regs[REG_MUL_LO] = self.regs[a] % imm;
                    }
                    op::ri::ANDI => self.regs[a] &= imm,
                    op::ri::ORI => self.regs[a] |= imm,
                    op::ri::XORI => self.regs[a] ^= imm,
                    op::ri::SHLI => self.regs[a] = self.regs[a].checked_shl(imm).unwrap_or(0),
                    op::ri::SHRI => self.regs[a] = self.regs[a].checked_shr(imm).unwrap_or(0),
                    op::ri::STBI => self.write_u8_data(imm, self.regs[a] as u8)?,
                    op::ri::STWI => self.write_u16_data(imm, self.regs[a] as u16)?,
                    op::ri::STDI => self.write_u32_data(imm, self.regs[a])?,
                    op::ri::LDBI => self.regs[a] = u32::from(self.read_u8_data(imm)?),
                    op::ri::LDWI => self.regs[a] = u32::from(self.read_u16_data(imm)?),
                    op::ri::LDDI => self.regs[a] = self.read_u32_data(imm)?,
                    _ => return Err(self.invalid()),
                }
                6
            }

            op::REG_GROUP => {
                let (sub, a) = self.mode_sub_reg()?;
                match sub {
                    op::reg::PUSH => {
                        let new_sp = self.regs[REG_SP].wrapping_sub(4);
                        self.write_u32_data(new_sp, self.regs[a])?;
                        self.regs[REG_SP] = new_sp;
                        2
                    }
                    op::reg::POP => {
                        let value = self.read_u32_data(self.regs[REG_SP])?;
                        self.regs[a] = value;
                        self.regs[REG_SP] = self.regs[REG_SP].wrapping_add(4);
                        2
                    }
                    op::reg::J => {
                        self.ip = self.regs[a];
                        0
                    }
                    op::reg::JT => {
                        if self.compare() {
                            self.ip = self.regs[a];
                            0
                        } else {
                            2
                        }
                    }
                    op::reg::JF => {
                        if !self.compare() {
                            self.ip = self.regs[a];
                            0
                        } else {
                            2
                        }
                    }
                    op::reg::B => {
                        self.ip = self.ip.wrapping_add(self.regs[a]);
                        0
                    }
                    op::reg::BT => {
                        if self.compare() {
                            self.ip = self.ip.wrapping_add(self.regs[a]);
                            0
                        } else {
                            2
                        }
                    }
                    op::reg::BF => {
                        if !self.compare() {
                            self.ip = self.ip.wrapping_add(self.regs[a]);
                            0
                        } else {
                            2
                        }
                    }
                    op::reg::CALL => {
                        let new_sp = self.regs[REG_SP].wrapping_sub(4);
                        self.write_u32_data(new_sp, self.ip.wrapping_add(2))?;
                        self.regs[REG_SP] = new_sp;
                        self.ip = self.regs[a];
                        0
                    }
                    _ => return Err(self.invalid()),
                }
            }

            op::PUSHI => {
                let imm = self.fetch_u32(self.ip.wrapping_add(1))?;
                let new_sp = self.regs[REG_SP].wrapping_sub(4);
                self.write_u32_data(new_sp, imm)?;
                self.regs[REG_SP] = new_sp;
                5
            }
            op::JI => {
                self.ip = self.fetch_u32(self.ip.wrapping_add(1))?;
                0
            }
            op::JTI => {
                let target = self.fetch_u32(self.ip.wrapping_add(1))?;
                if self.compare() {
                    self.ip = target;
                    0
                } else {
                    5
                }
            }
            op::JFI => {
                let target = self.fetch_u32(self.ip.wrapping_add(1))?;
                if !self.compare() {
                    self.ip = target;
                    0
                } else {
                    5
                }
            }
            op::BI => {
                let disp = self.fetch_u32(self.ip.wrapping_add(1))?;
                self.ip = self.ip.wrapping_add(disp);
                0
            }
            op::BTI => {
                let disp = self.fetch_u32(self.ip.wrapping_add(1))?;
                if self.compare() {
                    self.ip = self.ip.wrapping_add(disp);
                    0
                } else {
                    5
                }
            }
            op::BFI => {
                let disp = self.fetch_u32(self.ip.wrapping_add(1))?;
                if !self.compare() {
                    self.ip = self.ip.wrapping_add(disp);
                    0
                } else {
                    5
                }
            }
            op::CALLI => {
                let target = self.fetch_u32(self.ip.wrapping_add(1))?;
                let new_sp = self.regs[REG_SP].wrapping_sub(4);
                self.write_u32_data(new_sp, self.ip.wrapping_add(5))?;
                self.regs[REG_SP] = new_sp;
                self.ip = target;
                0
            }
            op::BALI => {
                let disp = self.fetch_u32(self.ip.wrapping_add(1))?;
                let new_sp = self.regs[REG_SP].wrapping_sub(4);
                self.write_u32_data(new_sp, self.ip.wrapping_add(5))?;
                self.regs[REG_SP] = new_sp;
                self.ip = self.ip.wrapping_add(disp);
                0
            }

            op::CGTQ => self.compare_rr(|a, b| a >= b)?,
            op::CLTQ => self.compare_rr(|a, b| a <= b)?,
            op::CEQ => self.compare_rr(|a, b| a == b)?,
            op::CNQ => self.compare_rr(|a, b| a != b)?,
            op::CGT => self.compare_rr(|a, b| a > b)?,
            op::CLT => self.compare_rr(|a, b| a < b)?,

            op::MI_GROUP => {
                let (sub, a) = self.mode_sub_reg()?;
                let imm = self.fetch_u32(self.ip.wrapping_add(2))?;
                match sub {
                    op::mi::MOVI => self.regs[a] = imm,
                    op::mi::CGTQI => self.set_compare(self.regs[a] >= imm),
                    op::mi::CLTQI => self.set_compare(self.regs[a] <= imm),
                    op::mi::CEQI => self.set_compare(self.regs[a] == imm),
                    op::mi::CNQI => self.set_compare(self.regs[a] != imm),
                    op::mi::CGTI => self.set_compare(self.regs[a] > imm),
                    op::mi::CLTI => self.set_compare(self.regs[a] < imm),
                    _ => return Err(self.invalid()),
                }
                6
            }

            op::MOV => {
                let (a, b) = self.mode_regs()?;
                self.regs[b] = self.regs[a];
                2
            }

            op::STBII => {
                let (value, addr) = self.fetch_imm_pair()?;
                self.write_u8_data(addr, value as u8)?;
                9
            }
            op::STWII => {
                let (value, addr) = self.fetch_imm_pair()?;
                self.write_u16_data(addr, value as u16)?;
                9
            }
            op::STDII => {
                let (value, addr) = self.fetch_imm_pair()?;
                self.write_u32_data(addr, value)?;
                9
            }

            op::RET => {
                let target = self.read_u32_data(self.regs[REG_SP])?;
                self.ip = target;
                self.regs[REG_SP] = self.regs[REG_SP].wrapping_add(4);
                0
            }

            op::SYSCALL => {
                if self.flags.contains(CpuFlags::INTERRUPT) {
                    // The frame's return ip points past the SYSCALL so IRET
                    // resumes at the next instruction.
                    let return_ip = self.ip.wrapping_add(1);
                    self.deliver(SYSCALL_LINE, 0, return_ip)?;
                    0
                } else {
                    1
                }
            }
            op::IRET => {
                let sp = self.regs[REG_SP];
                let target = self.read_u32_data(sp)?;
                let saved_sp = self.read_u32_data(sp.wrapping_add(4))?;
                let saved_flags = self.read_u32_data(sp.wrapping_add(8))?;
                self.ip = target;
                self.regs[REG_SP] = saved_sp;
                self.flags = CpuFlags::from_bits_retain(saved_flags as u8);
                0
            }
            op::CLI => {
                self.flags.remove(CpuFlags::INTERRUPT);
                1
            }
            op::STI => {
                self.flags.insert(CpuFlags::INTERRUPT);
                1
            }

            _ => return Err(self.invalid()),
        };
        Ok(advance)
    }

    fn binary_rr(&mut self, f: impl FnOnce(u32, u32) -> u32) -> Result<u32, Exception> {
        let (a, b) = self.mode_regs()?;
        self.regs[b] = f(self.regs[b], self.regs[a]);
        Ok(2)
    }

    fn compare_rr(&mut self, f: impl FnOnce(u32, u32) -> bool) -> Result<u32, Exception> {
        let (a, b) = self.mode_regs()?;
        self.set_compare(f(self.regs[a], self.regs[b]));
        Ok(2)
    }

    fn compare(&self) -> bool {
        self.flags.contains(CpuFlags::COMPARE)
    }

    fn set_compare(&mut self, value: bool) {
        self.flags.set(CpuFlags::COMPARE, value);
    }

    /// Mode byte of a two-register form: `a` in the high nibble, `b` low.
    fn mode_regs(&self) -> Result<(usize, usize), Exception> {
        let mode = self.fetch_u8(self.ip.wrapping_add(1))?;
        Ok(((mode >> 4) as usize, (mode & 0xF) as usize))
    }

    /// Mode byte of a grouped form: sub-opcode high, register low.
    fn mode_sub_reg(&self) -> Result<(u8, usize), Exception> {
        let mode = self.fetch_u8(self.ip.wrapping_add(1))?;
        Ok((mode >> 4, (mode & 0xF) as usize))
    }

    /// The two immediates of an II form, in encoding order.
    fn fetch_imm_pair(&self) -> Result<(u32, u32), Exception> {
        let first = self.fetch_u32(self.ip.wrapping_add(1))?;
        let second = self.fetch_u32(self.ip.wrapping_add(5))?;
        Ok((first, second))
    }

    fn invalid(&self) -> Exception {
        debug!(ip = self.ip, "invalid opcode");
        Exception::InvalidOpcode { ip: self.ip }
    }

    fn data_fault(&self, err: MemError) -> Exception {
        let MemError::OutOfRange { addr, .. } = err;
        Exception::ProtectionFault { addr, ip: self.ip }
    }

    fn fetch_u8(&self, addr: u32) -> Result<u8, Exception> {
        self.mem
            .read_u8(addr)
            .map_err(|_| Exception::InvalidOpcode { ip: self.ip })
    }

    fn fetch_u32(&self, addr: u32) -> Result<u32, Exception> {
        self.mem
            .read_u32(addr)
            .map_err(|_| Exception::InvalidOpcode { ip: self.ip })
    }

    fn read_u8_data(&self, addr: u32) -> Result<u8, Exception> {
        self.mem.read_u8(addr).map_err(|e| self.data_fault(e))
    }

    fn read_u16_data(&self, addr: u32) -> Result<u16, Exception> {
        self.mem.read_u16(addr).map_err(|e| self.data_fault(e))
    }

    fn read_u32_data(&self, addr: u32) -> Result<u32, Exception> {
        self.mem.read_u32(addr).map_err(|e| self.data_fault(e))
    }

    fn write_u8_data(&self, addr: u32, value: u8) -> Result<(), Exception> {
        self.mem.write_u8(addr, value).map_err(|e| self.data_fault(e))
    }

    fn write_u16_data(&self, addr: u32, value: u16) -> Result<(), Exception> {
        self.mem
            .write_u16(addr, value)
            .map_err(|e| self.data_fault(e))
    }

    fn write_u32_data(&self, addr: u32, value: u32) -> Result<(), Exception> {
        self.mem
            .write_u32(addr, value)
            .map_err(|e| self.data_fault(e))
    }

    fn write_frame(&self, addr: u32, frame: &[u8; 16]) -> Result<(), Exception> {
        self.mem
            .write_from(addr, frame)
            .map_err(|e| self.data_fault(e))
    }
}
