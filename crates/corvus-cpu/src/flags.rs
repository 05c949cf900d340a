use bitflags::bitflags;

bitflags! {
    /// Packed CPU flag byte.
    ///
    /// The low four bits are architectural; the upper four are reserved but
    /// round-trip through interrupt frames untouched.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CpuFlags: u8 {
        /// Executing in user mode. Cleared on interrupt entry.
        const USER_MODE = 1 << 0;
        /// Interrupt delivery enabled (STI/CLI).
        const INTERRUPT = 1 << 1;
        /// Result of the last compare instruction.
        const COMPARE = 1 << 2;
        /// Reserved: paging is not implemented by this core.
        const PAGING = 1 << 3;
    }
}
