//! Shared helpers for the interpreter tests: a bare machine setup plus tiny
//! byte-level encoders so programs read as mnemonics instead of hex soup.

#![allow(dead_code)]

use std::sync::Arc;

use corvus_cpu::{op, Cpu};
use corvus_mem::PhysMemory;

/// Large enough to cover the IVT window.
pub const MEM_SIZE: u32 = 0x100000;

pub fn boot(program: &[u8]) -> Cpu {
    boot_with_mem(MEM_SIZE, program)
}

pub fn boot_with_mem(size: u32, program: &[u8]) -> Cpu {
    let mem = Arc::new(PhysMemory::new(size));
    mem.load_boot(program).unwrap();
    Cpu::new(mem)
}

pub fn step_n(cpu: &mut Cpu, n: usize) {
    for _ in 0..n {
        cpu.step().unwrap();
    }
}

pub fn prog(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.concat()
}

/// Two-register form: `a` in the high nibble, `b` in the low nibble.
pub fn rr(opcode: u8, a: u8, b: u8) -> Vec<u8> {
    vec![opcode, (a << 4) | b]
}

/// Register + immediate form of the 0x10 group.
pub fn ri(sub: u8, r: u8, imm: u32) -> Vec<u8> {
    let mut bytes = vec![op::RI_GROUP, (sub << 4) | r];
    bytes.extend(imm.to_le_bytes());
    bytes
}

/// Register + immediate form of the 0x30 group.
pub fn mi(sub: u8, r: u8, imm: u32) -> Vec<u8> {
    let mut bytes = vec![op::MI_GROUP, (sub << 4) | r];
    bytes.extend(imm.to_le_bytes());
    bytes
}

pub fn movi(r: u8, imm: u32) -> Vec<u8> {
    mi(op::mi::MOVI, r, imm)
}

/// Single-register form of the 0x20 group.
pub fn reg_op(sub: u8, r: u8) -> Vec<u8> {
    vec![op::REG_GROUP, (sub << 4) | r]
}

/// Opcode followed by one 32-bit immediate.
pub fn imm_op(opcode: u8, imm: u32) -> Vec<u8> {
    let mut bytes = vec![opcode];
    bytes.extend(imm.to_le_bytes());
    bytes
}

/// Opcode followed by two 32-bit immediates.
pub fn imm2_op(opcode: u8, first: u32, second: u32) -> Vec<u8> {
    let mut bytes = vec![opcode];
    bytes.extend(first.to_le_bytes());
    bytes.extend(second.to_le_bytes());
    bytes
}
