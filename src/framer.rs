//! The OCD framer: maps named debug operations onto opcode-plus-payload
//! byte sequences over a [`Transport`], and parses the responses.
//!
//! Every method here is one atomic wire transaction (`spec.md` §5): the
//! transmit-echo check happens inside `Transport::write`, so a bus
//! collision surfaces as [`Error::BusCollision`] before we ever try to
//! parse a response. This layer does not retry and does not know about
//! caching, breakpoints, or preconditions — that is the session engine's
//! job (`session.rs`).
//!
//! Multi-byte register/counter/CRC values are big-endian on the wire;
//! addresses and the run counter are little-endian, matching the target's
//! own address bus (`spec.md` §4.2).

use scroll::{Pread, BE, LE};

use crate::error::Result;
use crate::transport::Transport;

/// Wire opcodes. Exact byte assignments are an internal protocol detail —
/// `spec.md` only names the operations, not their encodings — so this is
/// one self-consistent numbering, not a claim about a real device.
pub mod opcode {
    pub const RD_DBGREV: u8 = 0x00;
    pub const RD_DBGCTL: u8 = 0x01;
    pub const WR_DBGCTL: u8 = 0x02;
    pub const RD_DBGSTAT: u8 = 0x03;
    pub const RD_PC: u8 = 0x04;
    pub const WR_PC: u8 = 0x05;
    pub const RD_CNTR: u8 = 0x06;
    pub const WR_CNTR: u8 = 0x07;
    pub const RD_CRC: u8 = 0x08;
    pub const RD_MEMSIZE: u8 = 0x09;
    pub const RD_REGS: u8 = 0x0a;
    pub const WR_REGS: u8 = 0x0b;
    pub const RD_DATA: u8 = 0x0c;
    pub const WR_DATA: u8 = 0x0d;
    pub const RD_MEM: u8 = 0x0e;
    pub const WR_MEM: u8 = 0x0f;
    pub const STEP_INST: u8 = 0x10;
    pub const STUF_INST: u8 = 0x11;
    pub const RD_ACK: u8 = 0x12;
}

/// Byte-level debug protocol on top of a [`Transport`].
pub struct Framer<T: Transport> {
    transport: T,
}

impl<T: Transport> Framer<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.transport.read(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16_be(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.transport.read(&mut buf)?;
        Ok(buf
            .pread_with::<u16>(0, BE)
            .expect("a 2-byte buffer always has room for one u16"))
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.transport.read(&mut buf)?;
        Ok(buf
            .pread_with::<u16>(0, LE)
            .expect("a 2-byte buffer always has room for one u16"))
    }

    pub fn rd_dbgrev(&mut self) -> Result<u16> {
        self.transport.write(&[opcode::RD_DBGREV])?;
        self.read_u16_be()
    }

    pub fn rd_dbgctl(&mut self) -> Result<u8> {
        self.transport.write(&[opcode::RD_DBGCTL])?;
        self.read_u8()
    }

    pub fn wr_dbgctl(&mut self, value: u8) -> Result<()> {
        self.transport.write(&[opcode::WR_DBGCTL, value])
    }

    pub fn rd_dbgstat(&mut self) -> Result<u8> {
        self.transport.write(&[opcode::RD_DBGSTAT])?;
        self.read_u8()
    }

    pub fn rd_pc(&mut self) -> Result<u16> {
        self.transport.write(&[opcode::RD_PC])?;
        self.read_u16_le()
    }

    pub fn wr_pc(&mut self, pc: u16) -> Result<()> {
        let [lo, hi] = pc.to_le_bytes();
        self.transport.write(&[opcode::WR_PC, lo, hi])
    }

    pub fn rd_cntr(&mut self) -> Result<u16> {
        self.transport.write(&[opcode::RD_CNTR])?;
        self.read_u16_le()
    }

    pub fn wr_cntr(&mut self, value: u16) -> Result<()> {
        let [lo, hi] = value.to_le_bytes();
        self.transport.write(&[opcode::WR_CNTR, lo, hi])
    }

    /// Reads the device-computed CRC-CCITT over all of program memory.
    /// This may be slow on the device side; the transport's read timeout
    /// is the only bound on how long this call may block.
    pub fn rd_crc(&mut self) -> Result<u16> {
        self.transport.write(&[opcode::RD_CRC])?;
        self.read_u16_be()
    }

    pub fn rd_memsize(&mut self) -> Result<u8> {
        self.transport.write(&[opcode::RD_MEMSIZE])?;
        self.read_u8()
    }

    pub fn rd_regs(&mut self, addr: u16, n: usize) -> Result<Vec<u8>> {
        let [alo, ahi] = addr.to_le_bytes();
        let [nlo, nhi] = (n as u16).to_le_bytes();
        self.transport
            .write(&[opcode::RD_REGS, alo, ahi, nlo, nhi])?;
        let mut buf = vec![0u8; n];
        self.transport.read(&mut buf)?;
        Ok(buf)
    }

    pub fn wr_regs(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        let [alo, ahi] = addr.to_le_bytes();
        let [nlo, nhi] = (data.len() as u16).to_le_bytes();
        let mut frame = Vec::with_capacity(5 + data.len());
        frame.extend_from_slice(&[opcode::WR_REGS, alo, ahi, nlo, nhi]);
        frame.extend_from_slice(data);
        self.transport.write(&frame)
    }

    pub fn rd_data(&mut self, addr: u16, n: usize) -> Result<Vec<u8>> {
        let [alo, ahi] = addr.to_le_bytes();
        let [nlo, nhi] = (n as u16).to_le_bytes();
        self.transport
            .write(&[opcode::RD_DATA, alo, ahi, nlo, nhi])?;
        let mut buf = vec![0u8; n];
        self.transport.read(&mut buf)?;
        Ok(buf)
    }

    pub fn wr_data(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        let [alo, ahi] = addr.to_le_bytes();
        let [nlo, nhi] = (data.len() as u16).to_le_bytes();
        let mut frame = Vec::with_capacity(5 + data.len());
        frame.extend_from_slice(&[opcode::WR_DATA, alo, ahi, nlo, nhi]);
        frame.extend_from_slice(data);
        self.transport.write(&frame)
    }

    pub fn rd_mem(&mut self, addr: u16, n: usize) -> Result<Vec<u8>> {
        let [alo, ahi] = addr.to_le_bytes();
        let [nlo, nhi] = (n as u16).to_le_bytes();
        self.transport
            .write(&[opcode::RD_MEM, alo, ahi, nlo, nhi])?;
        let mut buf = vec![0u8; n];
        self.transport.read(&mut buf)?;
        Ok(buf)
    }

    pub fn wr_mem(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        let [alo, ahi] = addr.to_le_bytes();
        let [nlo, nhi] = (data.len() as u16).to_le_bytes();
        let mut frame = Vec::with_capacity(5 + data.len());
        frame.extend_from_slice(&[opcode::WR_MEM, alo, ahi, nlo, nhi]);
        frame.extend_from_slice(data);
        self.transport.write(&frame)
    }

    pub fn step_inst(&mut self) -> Result<()> {
        self.transport.write(&[opcode::STEP_INST])
    }

    pub fn stuf_inst(&mut self, opcode_byte: u8) -> Result<()> {
        self.transport.write(&[opcode::STUF_INST, opcode_byte])
    }

    /// Non-blocking probe: true if the device has acknowledged a pending
    /// breakpoint/stop condition.
    pub fn rd_ack(&mut self) -> Result<bool> {
        self.transport.write(&[opcode::RD_ACK])?;
        Ok(self.read_u8()? != 0)
    }
}
