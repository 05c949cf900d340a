mod common;

use common::*;
use corvus_cpu::{op, Exception, REG_SP};
use pretty_assertions::assert_eq;

#[test]
fn register_stores_truncate_to_their_width() {
    let program = prog(&[
        movi(1, 0xAABB_CCDD),
        movi(2, 0x8000),
        rr(op::STB, 1, 2),
        movi(2, 0x8010),
        rr(op::STW, 1, 2),
        movi(2, 0x8020),
        rr(op::STD, 1, 2),
    ]);
    let mut cpu = boot(&program);
    step_n(&mut cpu, 7);

    assert_eq!(cpu.mem().read_u32(0x8000).unwrap(), 0xDD);
    assert_eq!(cpu.mem().read_u32(0x8010).unwrap(), 0xCCDD);
    assert_eq!(cpu.mem().read_u32(0x8020).unwrap(), 0xAABB_CCDD);
}

#[test]
fn register_loads_zero_extend() {
    let mut cpu = boot(&prog(&[
        movi(1, 0x8000),
        rr(op::LDB, 1, 2),
        rr(op::LDW, 1, 3),
        rr(op::LDD, 1, 4),
    ]));
    cpu.mem().write_u32(0x8000, 0xFFEE_DDCC).unwrap();
    step_n(&mut cpu, 4);

    assert_eq!(cpu.regs[2], 0xCC);
    assert_eq!(cpu.regs[3], 0xDDCC);
    assert_eq!(cpu.regs[4], 0xFFEE_DDCC);
}

#[test]
fn immediate_address_stores_and_loads() {
    let program = prog(&[
        movi(1, 0x1122_3344),
        ri(op::ri::STBI, 1, 0x9000),
        ri(op::ri::STWI, 1, 0x9010),
        ri(op::ri::STDI, 1, 0x9020),
        ri(op::ri::LDBI, 2, 0x9020),
        ri(op::ri::LDWI, 3, 0x9020),
        ri(op::ri::LDDI, 4, 0x9020),
    ]);
    let mut cpu = boot(&program);
    step_n(&mut cpu, 7);

    assert_eq!(cpu.mem().read_u8(0x9000).unwrap(), 0x44);
    assert_eq!(cpu.mem().read_u16(0x9010).unwrap(), 0x3344);
    assert_eq!(cpu.regs[2], 0x44);
    assert_eq!(cpu.regs[3], 0x3344);
    assert_eq!(cpu.regs[4], 0x1122_3344);
}

#[test]
fn double_immediate_stores_write_value_to_address() {
    let program = prog(&[
        imm2_op(op::STBII, 0x1122_33AA, 0xA000),
        imm2_op(op::STWII, 0x1122_BBCC, 0xA010),
        imm2_op(op::STDII, 0xDEAD_BEEF, 0xA020),
    ]);
    let mut cpu = boot(&program);
    step_n(&mut cpu, 3);

    assert_eq!(cpu.mem().read_u8(0xA000).unwrap(), 0xAA);
    assert_eq!(cpu.mem().read_u16(0xA010).unwrap(), 0xBBCC);
    assert_eq!(cpu.mem().read_u32(0xA020).unwrap(), 0xDEAD_BEEF);
}

#[test]
fn push_pop_round_trip_restores_the_stack_pointer() {
    let program = prog(&[
        movi(15, 0x1000),
        movi(1, 7),
        reg_op(op::reg::PUSH, 1),
        reg_op(op::reg::POP, 2),
    ]);
    let mut cpu = boot(&program);
    step_n(&mut cpu, 4);

    assert_eq!(cpu.regs[2], 7);
    assert_eq!(cpu.regs[REG_SP], 0x1000);
}

#[test]
fn pushi_stores_the_immediate() {
    let program = prog(&[movi(15, 0x1000), imm_op(op::PUSHI, 0xCAFE_F00D)]);
    let mut cpu = boot(&program);
    step_n(&mut cpu, 2);

    assert_eq!(cpu.regs[REG_SP], 0xFFC);
    assert_eq!(cpu.mem().read_u32(0xFFC).unwrap(), 0xCAFE_F00D);
}

#[test]
fn push_at_sp_zero_wraps_and_faults_when_out_of_range() {
    // sp == 0 wraps to 0xFFFFFFFC, far outside a 1 MiB memory.
    let program = prog(&[movi(1, 7), reg_op(op::reg::PUSH, 1)]);
    let mut cpu = boot(&program);
    cpu.step().unwrap();

    let err = cpu.step().unwrap_err();
    assert_eq!(
        err,
        Exception::ProtectionFault {
            addr: 0xFFFF_FFFC,
            ip: cpu.ip,
        }
    );
    // The failed push must not move the stack pointer.
    assert_eq!(cpu.regs[REG_SP], 0);
}

#[test]
fn pop_into_sp_takes_the_popped_value_plus_four() {
    let program = prog(&[
        movi(15, 0x1000),
        imm_op(op::PUSHI, 0x2000),
        reg_op(op::reg::POP, 15),
    ]);
    let mut cpu = boot(&program);
    step_n(&mut cpu, 3);

    assert_eq!(cpu.regs[REG_SP], 0x2004);
}

#[test]
fn store_then_load_round_trips_through_memory() {
    let program = prog(&[
        movi(1, 0x5566_7788),
        movi(2, 0xB000),
        rr(op::STD, 1, 2),
        rr(op::LDD, 2, 3),
    ]);
    let mut cpu = boot(&program);
    step_n(&mut cpu, 4);

    assert_eq!(cpu.regs[3], cpu.regs[1]);
}
