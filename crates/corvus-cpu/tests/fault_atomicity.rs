//! A faulting instruction must commit nothing: registers, ip, flags, and
//! memory all keep their pre-step values.

mod common;

use common::*;
use corvus_cpu::{op, Exception};
use corvus_mem::BOOT_BASE;
use pretty_assertions::assert_eq;

#[test]
fn faulting_load_leaves_registers_untouched() {
    let program = prog(&[movi(1, 0x1111_1111), ri(op::ri::LDDI, 1, 0xFFFF_FFFC)]);
    let mut cpu = boot(&program);
    cpu.step().unwrap();

    let regs_before = cpu.regs;
    let ip_before = cpu.ip;
    let err = cpu.step().unwrap_err();

    assert_eq!(
        err,
        Exception::ProtectionFault {
            addr: 0xFFFF_FFFC,
            ip: ip_before,
        }
    );
    assert_eq!(cpu.regs, regs_before);
    assert_eq!(cpu.ip, ip_before);
}

#[test]
fn faulting_store_leaves_ip_at_the_instruction() {
    let mut cpu = boot(&imm2_op(op::STDII, 0xDEAD_BEEF, 0xFFFF_FFF0));
    assert!(matches!(
        cpu.step(),
        Err(Exception::ProtectionFault { .. })
    ));
    assert_eq!(cpu.ip, BOOT_BASE);
}

#[test]
fn word_store_straddling_the_end_of_memory_writes_nothing() {
    let size = 0x1000;
    let mut cpu = boot_with_mem(size, &imm2_op(op::STDII, 0xAABB_CCDD, size - 2));
    assert!(cpu.step().is_err());

    // The in-range prefix bytes must not have been written either.
    assert_eq!(cpu.mem().read_u8(size - 2).unwrap(), 0);
    assert_eq!(cpu.mem().read_u8(size - 1).unwrap(), 0);
}

#[test]
fn truncated_immediate_is_an_invalid_opcode() {
    // MOVI cut off after the mode byte, at the very end of memory.
    let size = BOOT_BASE + 2;
    let mut cpu = boot_with_mem(size, &[op::MI_GROUP, 0x11]);
    let ip = cpu.ip;
    assert_eq!(cpu.step(), Err(Exception::InvalidOpcode { ip }));
}

#[test]
fn opcode_fetch_off_the_end_is_an_invalid_opcode() {
    let mut cpu = boot_with_mem(BOOT_BASE, &[]);
    assert_eq!(
        cpu.step(),
        Err(Exception::InvalidOpcode { ip: BOOT_BASE })
    );
}

#[test]
fn failed_call_does_not_jump() {
    // Stack points nowhere; the push faults, so ip must not move to the
    // call target.
    let program = prog(&[movi(1, 0x3000), reg_op(op::reg::CALL, 1)]);
    let mut cpu = boot(&program);
    cpu.step().unwrap();
    cpu.regs[15] = 2; // push target wraps below zero

    let ip_before = cpu.ip;
    assert!(cpu.step().is_err());
    assert_eq!(cpu.ip, ip_before);
    assert_eq!(cpu.regs[15], 2);
}
