//! Device register-bit layout and fixed addresses.

/// `DBG_CTL` bits (`spec.md` §3).
pub mod dbgctl {
    /// Device is fully stopped, in debug mode.
    pub const DBG_MODE: u8 = 0x01;
    /// Breakpoints enabled.
    pub const BRK_EN: u8 = 0x02;
    /// Breakpoint acknowledge.
    pub const BRK_ACK: u8 = 0x04;
    /// Hardware PC-compare breakpoint armed.
    pub const BRK_PC: u8 = 0x08;
    /// Clock-cycle counter breakpoint armed.
    pub const BRK_CNTR: u8 = 0x10;
    /// Pulse to reset the chip.
    pub const RST: u8 = 0x20;
}

/// `DBG_STAT` bits (`spec.md` §3).
pub mod dbgstat {
    /// Device is stopped at a breakpoint.
    pub const STOPPED: u8 = 0x01;
    /// Memory read protect is enabled.
    pub const RD_PROTECT: u8 = 0x02;
}

/// Start of the peripheral/control-register window: always reachable even
/// while the device is read-protected, and never readback-verified on
/// write since peripherals may not read back what was written
/// (`spec.md` §3, §4.3).
pub const PERIPHERAL_WINDOW_START: u16 = 0x0f00;
/// End (exclusive) of the peripheral/control-register window.
pub const PERIPHERAL_WINDOW_END: u16 = 0x1000;

/// Register address of `IRQCTL`, the interrupt master-enable register used
/// by the rev-0x0100 step workaround.
pub const IRQCTL: u16 = 0xfc0;
/// `IRQCTL` master-enable bit.
pub const IRQCTL_MASTER_ENABLE: u8 = 0x80;

/// Opcode that disables interrupts; the rev-0x0100 step workaround skips
/// restoring `IRQCTL` when the stepped-over instruction is this one.
pub const DI_OPCODE: u8 = 0x8f;
/// Opcode that enables interrupts.
pub const EI_OPCODE: u8 = 0x9f;

/// `call da` — long (direct address) call; `next()` plants a breakpoint 3
/// bytes past the opcode.
pub const CALL_LONG_OPCODE: u8 = 0xd6;
/// `call irr` — indirect call; `next()` plants a breakpoint 2 bytes past
/// the opcode.
pub const CALL_INDIRECT_OPCODE: u8 = 0xd4;

/// Flash-control register range; writes into it invalidate the cached CRC
/// (`spec.md` §4.3). This models the magic unlock/lock sequence used by
/// `write_flash`.
pub const FLASH_CTL_BASE: u16 = 0xff0;
pub const FLASH_UNLOCK_SEQUENCE: [u8; 2] = [0x73, 0x8f];
pub const FLASH_LOCK_VALUE: u8 = 0x00;
/// Value that triggers a mass erase once the unlock sequence has primed
/// the flash controller.
pub const FLASH_ERASE_TRIGGER: u8 = 0x01;
