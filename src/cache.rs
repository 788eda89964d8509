//! Cache-validity bitset for the device shadow (`spec.md` §3).
//!
//! Each field the session mirrors from the device has exactly one bit
//! here. A method that changes device state must invalidate every bit
//! `spec.md` §4.3's cache-discipline table says it must, no more and no
//! less — see `session.rs` for where each bit gets cleared.
//!
//! There is deliberately no `CRC` bit. `spec.md` §3 names `crc` alongside
//! `pc` in the device shadow, but the endurance supervisor's `verify_repeat`
//! loop depends on the device actually recomputing its checksum on every
//! one of up to a hundred consecutive reads — caching it would make that
//! loop read the same stale value instead of stress-testing the link.
//! `rd_crc()` in `session.rs` always issues a live `framer.rd_crc()`.

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CacheValid: u8 {
        const DBGREV  = 0b0000_0001;
        const DBGCTL  = 0b0000_0010;
        const DBGSTAT = 0b0000_0100;
        const PC      = 0b0000_1000;
        const MEMCRC  = 0b0010_0000;
        const MEMSIZE = 0b0100_0000;
        const FCTL    = 0b1000_0000;
    }
}

impl Default for CacheValid {
    fn default() -> Self {
        CacheValid::empty()
    }
}
