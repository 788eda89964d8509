//! The raw byte transport: a duplex link with transmit/receive tied
//! together, so every transmitted byte echoes back.
//!
//! This is deliberately the thinnest layer in the crate (`spec.md` §2: ~5%
//! of the core). It owns line-level framing only — the break/autobaud
//! reset sequence and the read/write primitives the framer composes into
//! commands. It knows nothing about opcodes.

mod serial;

#[cfg(any(test, feature = "mock-transport"))]
pub mod mock;

pub use serial::SerialTransport;

use crate::error::{Error, Result};

/// Byte emitted after a line break so the target can time one bit cell.
pub const AUTOBAUD_CHARACTER: u8 = 0x80;

/// A duplex byte link to the target's on-chip debugger.
///
/// Implementors must track `open` (resource acquired) and `up` (handshake
/// completed) themselves; `write` must perform the transmit-echo check
/// described in `spec.md` §4.1, since higher layers rely on it to detect
/// bus collisions.
pub trait Transport {
    /// True once the underlying resource (serial port, socket, ...) has
    /// been acquired.
    fn is_open(&self) -> bool;

    /// True once `reset()` has completed a handshake with the target.
    fn is_up(&self) -> bool;

    /// Drives a line break longer than nine bit-times, flushes input, then
    /// transmits the autobaud character so the target can lock on.
    fn reset(&mut self) -> Result<()>;

    /// Blocks until `buf` is filled or the read timeout elapses.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Transmits `buf`, then reads back `buf.len()` bytes and compares them
    /// byte-by-byte against what was sent. A mismatch is a bus collision.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Non-blocking poll for readable bytes.
    fn available(&mut self) -> Result<usize>;
}

/// Shared write-then-verify-echo logic used by every `Transport`
/// implementation: send `buf` via `raw_write`, then read the echo back via
/// `raw_read` and compare.
///
/// `raw_write`/`raw_read` must not themselves perform the echo check —
/// they talk to the wire directly.
pub(crate) fn write_with_echo_check(
    buf: &[u8],
    mut raw_write: impl FnMut(&[u8]) -> Result<()>,
    mut raw_read: impl FnMut(&mut [u8]) -> Result<()>,
) -> Result<()> {
    raw_write(buf)?;

    let mut echo = vec![0u8; buf.len()];
    raw_read(&mut echo)?;

    if echo != buf {
        return Err(Error::BusCollision);
    }

    Ok(())
}
