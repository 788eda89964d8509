//! CRC-CCITT helper, delegated to the `crc` crate.
//!
//! The wire protocol and the memory-shadow checksum both use CRC-CCITT
//! (poly `0x1021`) but seeded with an arbitrary running value rather than
//! always `0x0000`, so we cannot use the crate's algorithm constant as-is:
//! we copy it and override `init` per call.

use crc::{Algorithm, Crc, CRC_16_XMODEM};

/// Computes CRC-CCITT (poly 0x1021, no reflection) over `bytes`, starting
/// from `seed`.
pub fn crc_ccitt(seed: u16, bytes: &[u8]) -> u16 {
    let algorithm = Algorithm::<u16> {
        init: seed,
        ..CRC_16_XMODEM
    };
    let crc = Crc::<u16>::new(&algorithm);
    crc.checksum(bytes)
}
