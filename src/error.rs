//! Error taxonomy for the OCD client core.
//!
//! One enum carries every failure tag from the protocol, the session
//! engine, and the endurance supervisor. Transport faults are not retried
//! here; retry policy belongs to callers (the endurance supervisor retries
//! a handful of high-level operations itself).

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("on-chip debugger link is not open")]
    LinkNotOpen,

    #[error("on-chip debugger link is down; call reset() first")]
    LinkDown,

    #[error("timed out waiting for a response from the on-chip debugger")]
    Timeout,

    #[error("short read from the on-chip debugger: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("bus collision detected: transmitted byte did not echo back unchanged")]
    BusCollision,

    #[error("operation requires the device to be stopped, but it is running")]
    DeviceRunning,

    #[error("operation requires the device to be running, but it is stopped")]
    DeviceStopped,

    #[error("operation is blocked while memory read protect is enabled")]
    ReadProtected,

    #[error("verify failed: {what} did not read back as written")]
    VerifyFailed { what: &'static str },

    #[error("{operation} is not supported on debugger revision {revision:#06x}")]
    UnsupportedByRevision {
        operation: &'static str,
        revision: u16,
    },

    #[error("chip reset did not complete within the timeout")]
    ResetTimeout,

    #[error("invalid address range: {0}")]
    InvalidAddressRange(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("corrupt Intel-HEX input: {0}")]
    HexCorrupt(String),

    #[error("overlapping Intel-HEX write at address {address:#06x}")]
    HexOverlap { address: u32 },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
