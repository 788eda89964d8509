//! The debug-session engine: the cached, precondition-checked view of a
//! single connected device that everything else in this crate is built
//! on (`spec.md` §4.3).
//!
//! `DebugSession` owns a [`Framer`], the host-side [`MemoryShadows`], the
//! [`BreakpointTable`], and a [`CacheValid`] bitset describing which of the
//! handful of device fields it has mirrored are still good. Every method
//! that can change device state invalidates exactly the bits the cache
//! table says it must — no more, no less — before doing anything else.

use std::thread;
use std::time::{Duration, Instant};

use crate::breakpoint::{self, BreakpointTable};
use crate::cache::CacheValid;
use crate::checksum::crc_ccitt;
use crate::error::{Error, Result};
use crate::framer::Framer;
use crate::memory::MemoryShadows;
use crate::regs::{self, dbgctl, dbgstat};
use crate::revision::RevisionProfile;
use crate::transport::Transport;

const RESET_POLL_INTERVAL: Duration = Duration::from_millis(5);
const RESET_TIMEOUT: Duration = Duration::from_secs(5);

/// Default max transport-layer payload in bytes per framed request
/// (`spec.md` §4.4's `mtu` option), used until a caller sets a different
/// value via [`DebugSession::set_mtu`].
pub const DEFAULT_MTU: usize = 256;

/// The device fields the session mirrors on the host, plus the one bit of
/// derived state (`sysclk`) that has no device-side counterpart.
#[derive(Default)]
struct DeviceShadow {
    dbg_rev: u16,
    dbg_ctl: u8,
    dbg_stat: u8,
    pc: u16,
    mem_size_code: u8,
    /// Clock rate in kHz, used only to translate `run_clks` durations;
    /// never read from the device.
    sysclk_khz: u32,
    valid: CacheValid,
}

/// A live debug session over one connected device.
pub struct DebugSession<T: Transport> {
    framer: Framer<T>,
    shadow: DeviceShadow,
    memory: MemoryShadows,
    breakpoints: BreakpointTable,
    /// Max bytes per framed register/data/memory request; larger buffers
    /// are split across multiple framer calls (`spec.md` §4.4).
    mtu: usize,
}

impl<T: Transport> DebugSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            framer: Framer::new(transport),
            shadow: DeviceShadow::default(),
            memory: MemoryShadows::new(),
            breakpoints: BreakpointTable::new(),
            mtu: DEFAULT_MTU,
        }
    }

    pub fn transport(&mut self) -> &mut T {
        self.framer.transport()
    }

    /// Sets the max transport-layer payload enforced by every register,
    /// data, and memory access below. A value of `0` is treated as `1`.
    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu;
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn cache_valid(&self) -> CacheValid {
        self.shadow.valid
    }

    pub fn set_sysclk_hz(&mut self, hz: u32) {
        self.shadow.sysclk_khz = hz / 1000;
    }

    pub fn sysclk_hz(&self) -> u32 {
        self.shadow.sysclk_khz * 1000
    }

    // -- cache helpers --------------------------------------------------

    fn cache_dbgrev(&mut self) -> Result<()> {
        if !self.shadow.valid.contains(CacheValid::DBGREV) {
            self.shadow.dbg_rev = self.framer.rd_dbgrev()?;
            self.shadow.valid.insert(CacheValid::DBGREV);
        }
        Ok(())
    }

    fn cache_dbgctl(&mut self) -> Result<()> {
        if !self.shadow.valid.contains(CacheValid::DBGCTL) {
            self.shadow.dbg_ctl = self.framer.rd_dbgctl()?;
            self.shadow.valid.insert(CacheValid::DBGCTL);
        }
        Ok(())
    }

    fn cache_dbgstat(&mut self) -> Result<()> {
        if !self.shadow.valid.contains(CacheValid::DBGSTAT) {
            self.shadow.dbg_stat = self.framer.rd_dbgstat()?;
            self.shadow.valid.insert(CacheValid::DBGSTAT);
        }
        Ok(())
    }

    fn cache_memsize(&mut self) -> Result<()> {
        if !self.shadow.valid.contains(CacheValid::MEMSIZE) {
            self.shadow.mem_size_code = self.framer.rd_memsize()?;
            self.shadow.valid.insert(CacheValid::MEMSIZE);
        }
        Ok(())
    }

    /// Lazily reads and caches the program counter. Every operation that
    /// may execute instructions invalidates `CacheValid::PC` first, so this
    /// only hits the wire when the cache genuinely doesn't know the answer.
    fn cache_pc(&mut self) -> Result<u16> {
        if !self.shadow.valid.contains(CacheValid::PC) {
            self.shadow.pc = self.framer.rd_pc()?;
            self.shadow.valid.insert(CacheValid::PC);
        }
        Ok(self.shadow.pc)
    }

    /// Splits a read of `len` bytes starting at `address` into `self.mtu`
    /// (or 1, whichever is larger)-sized framer calls and concatenates the
    /// results (`spec.md` §4.4).
    fn chunked_rd(
        &mut self,
        address: u16,
        len: usize,
        read: fn(&mut Framer<T>, u16, usize) -> Result<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let mtu = self.mtu.max(1);
        let mut out = Vec::with_capacity(len);
        let mut offset = 0usize;
        while offset < len {
            let chunk_len = mtu.min(len - offset);
            let chunk_addr = address as usize + offset;
            out.extend(read(&mut self.framer, chunk_addr as u16, chunk_len)?);
            offset += chunk_len;
        }
        Ok(out)
    }

    /// Splits a write of `data` starting at `address` into `self.mtu`
    /// (or 1, whichever is larger)-sized framer calls (`spec.md` §4.4).
    fn chunked_wr(
        &mut self,
        address: u16,
        data: &[u8],
        write: fn(&mut Framer<T>, u16, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mtu = self.mtu.max(1);
        let mut offset = 0usize;
        while offset < data.len() {
            let chunk_len = mtu.min(data.len() - offset);
            let chunk_addr = address as usize + offset;
            write(
                &mut self.framer,
                chunk_addr as u16,
                &data[offset..offset + chunk_len],
            )?;
            offset += chunk_len;
        }
        Ok(())
    }

    fn profile(&mut self) -> Result<RevisionProfile> {
        self.cache_dbgrev()?;
        Ok(RevisionProfile::for_revision(self.shadow.dbg_rev))
    }

    /// Size of program memory in bytes, decoded through the revision's
    /// memory-size table.
    pub fn mem_size(&mut self) -> Result<u32> {
        let profile = self.profile()?;
        self.cache_memsize()?;
        Ok(profile.decode_mem_size(self.shadow.mem_size_code))
    }

    fn is_stopped(&mut self) -> Result<bool> {
        self.cache_dbgctl()?;
        Ok(self.shadow.dbg_ctl & dbgctl::DBG_MODE != 0)
    }

    fn is_protected(&mut self) -> Result<bool> {
        self.cache_dbgstat()?;
        Ok(self.shadow.dbg_stat & dbgstat::RD_PROTECT != 0)
    }

    fn require_stopped(&mut self) -> Result<()> {
        if self.is_stopped()? {
            Ok(())
        } else {
            Err(Error::DeviceRunning)
        }
    }

    fn require_not_protected(&mut self) -> Result<()> {
        if self.is_protected()? {
            Err(Error::ReadProtected)
        } else {
            Ok(())
        }
    }

    /// Clears the temporary software breakpoint left behind by `run_to` or
    /// `next` on devices without a hardware PC-compare breakpoint, once
    /// the device is observed stopped.
    fn clear_temporary_breakpoint(&mut self) -> Result<()> {
        if let Some(addr) = self.breakpoints.take_temporary() {
            self.remove_breakpoint(addr)?;
        }
        Ok(())
    }

    // -- link and chip lifecycle ----------------------------------------

    /// Re-synchronizes the wire link (autobaud break) without touching the
    /// device's run state. Invalidates every cached field.
    pub fn reset_link(&mut self) -> Result<()> {
        self.framer.transport().reset()?;
        self.shadow.valid = CacheValid::empty();
        Ok(())
    }

    /// Pulses the device's reset line via `DBG_CTL.RST` and waits for it to
    /// self-clear, polling every 5 ms for up to 5 s (`spec.md` §4.3).
    pub fn reset_chip(&mut self) -> Result<()> {
        self.cache_dbgctl()?;
        let ctl = self.shadow.dbg_ctl | dbgctl::RST;
        self.framer.wr_dbgctl(ctl)?;
        self.shadow.valid = CacheValid::empty();

        let start = Instant::now();
        loop {
            thread::sleep(RESET_POLL_INTERVAL);
            self.shadow.valid.remove(CacheValid::DBGCTL);
            self.cache_dbgctl()?;
            if self.shadow.dbg_ctl & dbgctl::RST == 0 {
                break;
            }
            if start.elapsed() >= RESET_TIMEOUT {
                return Err(Error::ResetTimeout);
            }
        }
        self.breakpoints.take_temporary();
        Ok(())
    }

    /// Halts the device, entering debug mode. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        if self.is_stopped()? {
            return Ok(());
        }
        let ctl = dbgctl::DBG_MODE | dbgctl::BRK_EN;
        self.framer.wr_dbgctl(ctl)?;
        self.shadow.valid.remove(CacheValid::DBGCTL);
        self.cache_dbgctl()?;
        if self.shadow.dbg_ctl & dbgctl::DBG_MODE == 0 {
            return Err(Error::VerifyFailed {
                what: "DBG_CTL.DBG_MODE",
            });
        }
        self.clear_temporary_breakpoint()?;
        Ok(())
    }

    /// Resumes free execution. Idempotent if already running.
    pub fn run(&mut self) -> Result<()> {
        if !self.is_stopped()? {
            return Ok(());
        }
        let profile = self.profile()?;
        if !profile.can_run_protected && self.is_protected()? {
            return Err(Error::ReadProtected);
        }

        let pc = self.cache_pc()?;
        if self.breakpoints.is_set(pc) {
            self.step()?;
        }

        let ctl = dbgctl::BRK_EN | dbgctl::BRK_ACK;
        self.shadow.valid.remove(CacheValid::PC);
        self.framer.wr_dbgctl(ctl)?;
        self.shadow.dbg_ctl = ctl;
        self.shadow.valid.insert(CacheValid::DBGCTL);
        Ok(())
    }

    /// Runs until `address` is reached, using the hardware PC-compare
    /// breakpoint where available and a temporary software breakpoint
    /// otherwise.
    pub fn run_to(&mut self, address: u16) -> Result<()> {
        self.require_stopped()?;
        self.require_not_protected()?;

        let pc = self.cache_pc()?;
        if self.breakpoints.is_set(pc) {
            self.step()?;
        }

        let profile = self.profile()?;
        let mut ctl = dbgctl::BRK_EN | dbgctl::BRK_ACK;
        if profile.has_hw_breakpoint {
            self.framer.wr_cntr(address)?;
            ctl |= dbgctl::BRK_PC;
        } else {
            debug_assert!(
                self.breakpoints.temporary().is_none(),
                "a previous temporary breakpoint was never cleared"
            );
            if !self.breakpoints.is_set(address) {
                self.plant_breakpoint(address)?;
                self.breakpoints.set_temporary(address);
            }
        }

        self.shadow.valid.remove(CacheValid::PC);
        self.framer.wr_dbgctl(ctl)?;
        self.shadow.dbg_ctl = ctl;
        self.shadow.valid.insert(CacheValid::DBGCTL);
        Ok(())
    }

    /// Runs for exactly `clocks` clock cycles, using the free-running
    /// cycle-counter breakpoint. Unsupported on revisions without one.
    pub fn run_clks(&mut self, clocks: u16) -> Result<()> {
        self.require_stopped()?;
        self.require_not_protected()?;
        let profile = self.profile()?;
        if !profile.has_cntr_breakpoint {
            return Err(Error::UnsupportedByRevision {
                operation: "run_clks",
                revision: profile.revision,
            });
        }

        self.framer.wr_cntr(clocks)?;
        let readback = self.framer.rd_cntr()?;
        if readback != clocks {
            return Err(Error::VerifyFailed { what: "CNTR" });
        }

        let ctl = dbgctl::BRK_EN | dbgctl::BRK_ACK | dbgctl::BRK_CNTR;
        self.shadow.valid.remove(CacheValid::PC);
        self.framer.wr_dbgctl(ctl)?;
        self.shadow.dbg_ctl = ctl;
        self.shadow.valid.insert(CacheValid::DBGCTL);
        Ok(())
    }

    /// True if the device is still running. Clears the temporary
    /// breakpoint once the device is observed stopped, mirroring `stop()`.
    pub fn isrunning(&mut self) -> Result<bool> {
        if self.shadow.valid.contains(CacheValid::DBGCTL) {
            if self.shadow.dbg_ctl & dbgctl::DBG_MODE != 0 {
                return Ok(false);
            }
            if !self.framer.rd_ack()? {
                return Ok(true);
            }
        }
        self.shadow.valid.remove(CacheValid::DBGCTL);
        self.cache_dbgctl()?;
        if self.shadow.dbg_ctl & dbgctl::DBG_MODE != 0 {
            self.clear_temporary_breakpoint()?;
            Ok(false)
        } else {
            Ok(true)
        }
    }

    /// Executes exactly one instruction. On revision 0x0100, `IRQCTL`'s
    /// master-enable bit is cleared before the step and restored after,
    /// unless the stepped-over instruction was itself `di` (`spec.md`
    /// §4.3, grounded on `ez8dbg.cpp::step()`).
    pub fn step(&mut self) -> Result<()> {
        self.require_stopped()?;
        self.require_not_protected()?;
        let profile = self.profile()?;

        let pc = self.cache_pc()?;
        let patched_opcode = self.breakpoints.original_opcode(pc);

        if profile.needs_irqctl_dance {
            let irqctl = self.framer.rd_regs(regs::IRQCTL, 1)?[0];
            let master_was_set = irqctl & regs::IRQCTL_MASTER_ENABLE != 0;
            if master_was_set {
                self.framer
                    .wr_regs(regs::IRQCTL, &[irqctl & !regs::IRQCTL_MASTER_ENABLE])?;
            }

            let stepped_opcode = match patched_opcode {
                Some(original) => original,
                None => self.framer.rd_mem(pc, 1)?[0],
            };

            self.shadow.valid.remove(CacheValid::PC);
            match patched_opcode {
                Some(original) => self.framer.stuf_inst(original)?,
                None => self.framer.step_inst()?,
            }

            if master_was_set && stepped_opcode != regs::DI_OPCODE {
                self.framer.wr_regs(regs::IRQCTL, &[irqctl])?;
            }
        } else {
            self.shadow.valid.remove(CacheValid::PC);
            match patched_opcode {
                Some(original) => self.framer.stuf_inst(original)?,
                None => self.framer.step_inst()?,
            }
        }
        Ok(())
    }

    /// Steps over `call` instructions instead of into them, by planting a
    /// temporary breakpoint past the call and running to it.
    pub fn next(&mut self) -> Result<()> {
        self.require_stopped()?;
        self.require_not_protected()?;
        let pc = self.cache_pc()?;
        let opcode = self.framer.rd_mem(pc, 1)?[0];
        match opcode {
            regs::CALL_LONG_OPCODE => self.run_to(pc.wrapping_add(3)),
            regs::CALL_INDIRECT_OPCODE => self.run_to(pc.wrapping_add(2)),
            _ => self.step(),
        }
    }

    // -- program counter, registers, data, memory ------------------------

    /// Reads the program counter, consulting the cache first (`spec.md`
    /// §8's round-trip law: a `wr_pc` followed by `rd_pc` returns the
    /// written value without another wire round trip).
    pub fn rd_pc(&mut self) -> Result<u16> {
        self.require_stopped()?;
        self.require_not_protected()?;
        self.cache_pc()
    }

    pub fn wr_pc(&mut self, address: u16) -> Result<()> {
        self.require_stopped()?;
        self.require_not_protected()?;
        self.shadow.valid.remove(CacheValid::PC);
        self.framer.wr_pc(address)?;
        let readback = self.framer.rd_pc()?;
        if readback != address {
            return Err(Error::VerifyFailed { what: "PC" });
        }
        self.shadow.pc = readback;
        self.shadow.valid.insert(CacheValid::PC);
        Ok(())
    }

    /// Live read of the device-computed CRC-CCITT over program memory.
    /// There is no cache to bypass here (see `cache.rs`): `verify_repeat`
    /// reads this repeatedly expecting the device to recompute it fresh
    /// every time, so this crate never pretends the value is cacheable.
    pub fn rd_crc(&mut self) -> Result<u16> {
        self.require_stopped()?;
        self.framer.rd_crc()
    }

    pub fn rd_regs(&mut self, address: u16, len: usize) -> Result<Vec<u8>> {
        self.require_stopped()?;
        if address < regs::PERIPHERAL_WINDOW_START {
            self.require_not_protected()?;
        }
        self.check_reg_range(address, len)?;
        let data = self.chunked_rd(address, len, Framer::rd_regs)?;
        let start = address as usize;
        self.memory.regs[start..start + len].copy_from_slice(&data);
        Ok(data)
    }

    pub fn wr_regs(&mut self, address: u16, data: &[u8]) -> Result<()> {
        self.require_stopped()?;
        if address < regs::PERIPHERAL_WINDOW_START {
            self.require_not_protected()?;
        }
        self.check_reg_range(address, data.len())?;

        let end = address as u32 + data.len() as u32;

        self.chunked_wr(address, data, Framer::wr_regs)?;
        let start = address as usize;
        self.memory.regs[start..start + data.len()].copy_from_slice(data);

        let verify_len = if address >= regs::PERIPHERAL_WINDOW_START {
            0
        } else if end > regs::PERIPHERAL_WINDOW_START as u32 {
            (regs::PERIPHERAL_WINDOW_START - address) as usize
        } else {
            data.len()
        };
        if verify_len > 0 {
            let readback = self.chunked_rd(address, verify_len, Framer::rd_regs)?;
            if readback != data[..verify_len] {
                return Err(Error::VerifyFailed { what: "registers" });
            }
        }
        Ok(())
    }

    fn check_reg_range(&self, address: u16, len: usize) -> Result<()> {
        if address as usize + len > crate::memory::REG_MEM_SIZE {
            return Err(Error::InvalidAddressRange(format!(
                "register access [{address:#06x}, {:#06x}) exceeds register file",
                address as usize + len
            )));
        }
        Ok(())
    }

    /// Accesses the one-page info region (distinct from main program
    /// memory, which `rd_mem`/`wr_mem` address).
    pub fn rd_data(&mut self, address: u16, len: usize) -> Result<Vec<u8>> {
        self.require_stopped()?;
        self.require_not_protected()?;
        let data = self.chunked_rd(address, len, Framer::rd_data)?;
        let start = address as usize;
        self.memory.info[start..start + len].copy_from_slice(&data);
        Ok(data)
    }

    pub fn wr_data(&mut self, address: u16, data: &[u8]) -> Result<()> {
        self.require_stopped()?;
        self.require_not_protected()?;
        self.chunked_wr(address, data, Framer::wr_data)?;
        let start = address as usize;
        self.memory.info[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn rd_mem(&mut self, address: u16, len: usize) -> Result<Vec<u8>> {
        self.require_stopped()?;
        self.require_not_protected()?;
        let data = self.chunked_rd(address, len, Framer::rd_mem)?;
        let start = address as usize;
        self.memory.main[start..start + len].copy_from_slice(&data);
        Ok(data)
    }

    pub fn wr_mem(&mut self, address: u16, data: &[u8]) -> Result<()> {
        self.require_stopped()?;
        self.require_not_protected()?;
        self.chunked_wr(address, data, Framer::wr_mem)?;
        let start = address as usize;
        self.memory.main[start..start + data.len()].copy_from_slice(data);
        self.shadow.valid.remove(CacheValid::PC);
        self.shadow.valid.remove(CacheValid::MEMCRC);
        Ok(())
    }

    // -- breakpoints ------------------------------------------------------

    fn plant_breakpoint(&mut self, address: u16) -> Result<()> {
        let original = self.rd_mem(address, 1)?[0];
        self.wr_mem(address, &[breakpoint::BREAK_OPCODE])?;
        self.breakpoints.insert(address, original);
        Ok(())
    }

    pub fn set_breakpoint(&mut self, address: u16) -> Result<()> {
        if self.breakpoints.is_set(address) {
            return Err(Error::InvalidArgument(format!(
                "breakpoint already set at {address:#06x}"
            )));
        }
        self.plant_breakpoint(address)
    }

    pub fn remove_breakpoint(&mut self, address: u16) -> Result<()> {
        if let Some(original) = self.breakpoints.remove(address) {
            self.wr_mem(address, &[original])?;
        }
        Ok(())
    }

    pub fn breakpoint_set(&self, address: u16) -> bool {
        self.breakpoints.is_set(address)
    }

    pub fn get_num_breakpoints(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn get_breakpoint(&self, index: usize) -> Option<u16> {
        self.breakpoints.get(index)
    }

    // -- flash programming -------------------------------------------------

    /// Programs `data` at `address`, which must already be erased (every
    /// byte `0xFF`) on the host shadow. Unlocks the flash-control register,
    /// streams the bytes, locks it again, then verifies by comparing a
    /// host-computed CRC of the updated shadow against the device's own
    /// CRC over all of program memory (`spec.md` §4.3).
    pub fn write_flash(&mut self, address: u16, data: &[u8]) -> Result<()> {
        self.require_stopped()?;
        if !self.memory.main_is_erased(address, data.len()) {
            return Err(Error::InvalidArgument(format!(
                "flash at [{address:#06x}, {:#06x}) is not erased",
                address as usize + data.len()
            )));
        }

        self.framer
            .wr_regs(regs::FLASH_CTL_BASE, &regs::FLASH_UNLOCK_SEQUENCE)?;
        self.wr_mem(address, data)?;
        self.framer
            .wr_regs(regs::FLASH_CTL_BASE, &[regs::FLASH_LOCK_VALUE])?;

        let size = self.mem_size()? as usize;
        let host_crc = crc_ccitt(0, &self.memory.main[..size]);
        let device_crc = self.rd_crc()?;
        if host_crc != device_crc {
            return Err(Error::VerifyFailed { what: "flash" });
        }
        Ok(())
    }

    /// Erases all of program memory. If the device comes out of the erase
    /// still read-protected, a chip reset is required to clear it.
    pub fn flash_mass_erase(&mut self) -> Result<()> {
        self.require_stopped()?;
        self.framer
            .wr_regs(regs::FLASH_CTL_BASE, &regs::FLASH_UNLOCK_SEQUENCE)?;
        self.framer
            .wr_regs(regs::FLASH_CTL_BASE, &[regs::FLASH_ERASE_TRIGGER])?;
        self.framer
            .wr_regs(regs::FLASH_CTL_BASE, &[regs::FLASH_LOCK_VALUE])?;

        self.memory.main.fill(0xff);
        self.shadow.valid.remove(CacheValid::PC);
        self.shadow.valid.remove(CacheValid::MEMCRC);

        if self.is_protected()? {
            self.reset_chip()?;
        }
        Ok(())
    }
}

impl<T: Transport> Drop for DebugSession<T> {
    /// Restores `DBG_CTL` to 0 on teardown if the link is still up
    /// (`spec.md` §3).
    fn drop(&mut self) {
        let transport = self.framer.transport();
        if transport.is_open() && transport.is_up() {
            let _ = self.framer.wr_dbgctl(0x00);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use pretty_assertions::assert_eq;

    fn stopped_session() -> DebugSession<MockTransport> {
        let mut m = MockTransport::new();
        m.reset().unwrap();
        let mut session = DebugSession::new(m);
        session.transport().queue_response(&[dbgctl::DBG_MODE]);
        session.stop().unwrap();
        session.transport().queue_response(&[0x00]); // dbgstat: not protected
        session.is_protected().unwrap();
        session
    }

    #[test]
    fn stop_is_idempotent_once_cached() {
        let mut session = stopped_session();
        // No response queued: a second stop() must not touch the wire.
        session.stop().unwrap();
        assert!(session.cache_valid().contains(CacheValid::DBGCTL));
    }

    #[test]
    fn run_requires_stopped_device_to_be_a_noop_when_already_running() {
        let mut m = MockTransport::new();
        m.reset().unwrap();
        m.queue_response(&[0x00]); // rd_dbgctl: not stopped
        let mut session = DebugSession::new(m);
        session.run().unwrap();
        assert!(!session.cache_valid().contains(CacheValid::PC));
    }

    #[test]
    fn set_breakpoint_refuses_duplicate() {
        let mut session = stopped_session();
        session.transport().queue_response(&[0xab]); // rd_mem original opcode
        session.set_breakpoint(0x100).unwrap();
        let err = session.set_breakpoint(0x100).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn remove_breakpoint_is_idempotent() {
        let mut session = stopped_session();
        session.transport().queue_response(&[0xab]);
        session.set_breakpoint(0x100).unwrap();
        session.remove_breakpoint(0x100).unwrap();
        // second removal touches neither the table nor the wire
        session.remove_breakpoint(0x100).unwrap();
        assert!(!session.breakpoint_set(0x100));
    }

    #[test]
    fn write_flash_rejects_unerased_target() {
        let mut session = stopped_session();
        session.memory.main[0x200] = 0x01; // not erased
        let err = session.write_flash(0x200, &[0xaa]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn rd_regs_rejects_out_of_range_access() {
        let mut session = stopped_session();
        let err = session.rd_regs(0x0ffe, 4).unwrap_err();
        assert!(matches!(err, Error::InvalidAddressRange(_)));
    }

    #[test]
    fn rd_regs_mirrors_into_register_shadow() {
        let mut session = stopped_session();
        session.transport().queue_response(&[0x11, 0x22, 0x33]);
        session.rd_regs(0x10, 3).unwrap();
        assert_eq!(&session.memory.regs[0x10..0x13], &[0x11, 0x22, 0x33]);
    }

    #[test]
    fn wr_pc_then_rd_pc_hits_the_cache_not_the_wire() {
        let mut session = stopped_session();
        session.transport().queue_response(&[0x34, 0x12]); // wr_pc's own readback
        session.wr_pc(0x1234).unwrap();
        // No response queued: a cached rd_pc must not touch the wire.
        assert_eq!(session.rd_pc().unwrap(), 0x1234);
    }

    #[test]
    fn rd_mem_splits_across_mtu_sized_frames() {
        let mut session = stopped_session();
        session.set_mtu(2);
        session.transport().queue_response(&[0x01, 0x02]);
        session.transport().queue_response(&[0x03, 0x04]);
        session.transport().queue_response(&[0x05]);
        let data = session.rd_mem(0x100, 5).unwrap();
        assert_eq!(data, vec![0x01, 0x02, 0x03, 0x04, 0x05]);
    }
}
