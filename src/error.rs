//! Error kinds per spec.md §7.
//!
//! Recoverable conditions (unmapped reads, ROM writes, cartridge load-address
//! collisions, interrupts serviced with the I flag set) are defined behavior
//! and never surface as one of these — only the four fatal/programmer-error
//! kinds described in §7 do.

use thiserror::Error;

/// §7.1 — configuration errors. Reported synchronously; the core stays
/// uninitialized.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ROM set is missing required image: {0}")]
    MissingRom(&'static str),

    #[error("cartridge image is empty")]
    EmptyCartridge,

    #[error("cartridge image is too large for available cartridge space ({0} bytes)")]
    CartridgeTooLarge(usize),

    #[error("invalid memory expansion model tag: {0}")]
    InvalidExpansionTag(String),
}

/// §7.2 / §7.3 — fatal execution errors. These halt the Machine.
#[derive(Debug, Error)]
pub enum CpuFault {
    #[error("undefined opcode {opcode:#04x} encountered at PC {pc:#06x}")]
    UndefinedOpcode { opcode: u8, pc: u16 },

    #[error("JAM/KIL instruction {opcode:#04x} halted the CPU at PC {pc:#06x}")]
    Jammed { opcode: u8, pc: u16 },

    #[error(
        "trap loop detected: expected to halt at {expected_pc:#06x} but PC is {actual_pc:#06x}"
    )]
    TrapLoop { expected_pc: u16, actual_pc: u16 },
}

/// §7.4 — programmer errors on debug interfaces.
#[derive(Debug, Error)]
pub enum DebugError {
    #[error("history capacity {0} is out of range")]
    InvalidHistoryCapacity(usize),

    #[error("memory page {0:#04x} is out of range")]
    InvalidPage(u16),

    #[error("breakpoint address {0:#06x} is out of range")]
    InvalidBreakpoint(u16),
}
