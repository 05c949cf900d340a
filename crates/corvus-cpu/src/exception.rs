use thiserror::Error;

/// Faults that halt the CPU.
///
/// `InvalidOpcode` covers unrecognized primary or sub-opcodes and
/// out-of-range fetches of opcode bytes or immediate operands;
/// `ProtectionFault` covers out-of-range data-side accesses. Faulting
/// instructions commit nothing: registers, `ip`, flags, and memory are
/// exactly as they were before the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Exception {
    #[error("invalid opcode at ip={ip:#x}")]
    InvalidOpcode { ip: u32 },

    #[error("protection fault: data access at {addr:#x} out of range (ip={ip:#x})")]
    ProtectionFault { addr: u32, ip: u32 },

    #[error("division by zero at ip={ip:#x}")]
    DivideByZero { ip: u32 },
}
