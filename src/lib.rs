//! Debug-session core for an on-chip debugger targeting 8-bit
//! microcontrollers: wire framing, a cached session engine, flash
//! programming, Intel-HEX handling, and an endurance-test supervisor built
//! on top of it.
//!
//! The layering is bottom-up:
//!
//! - [`transport`] — the physical link (a real serial port, or a mock for
//!   tests), with transmit-echo collision detection shared by every impl.
//! - [`framer`] — maps named debug operations onto wire transactions.
//! - [`session`] — the cached, precondition-checked device view
//!   ([`session::DebugSession`]) almost everything else is built on.
//! - [`hexfile`] — Intel-HEX encode/decode for moving images in and out.
//! - [`endurance`] — a long-running program/erase cycle supervisor used
//!   for flash-wear testing.

pub mod breakpoint;
pub mod cache;
pub mod checksum;
pub mod endurance;
pub mod error;
pub mod framer;
pub mod hexfile;
pub mod memory;
pub mod regs;
pub mod revision;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use session::DebugSession;
