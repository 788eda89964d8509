//! The endurance-test supervisor: a crash-resumable loop that drives
//! continuous erase/program/verify cycles for device-reliability
//! characterization (`spec.md` §4.4).
//!
//! This module is a thin driver over [`DebugSession`]: every device
//! operation it performs goes through the session's own precondition
//! checks and cache discipline. What it owns itself is cycle bookkeeping,
//! pattern generation, state persistence, and mail notification.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::RngCore;

use crate::checksum::crc_ccitt;
use crate::error::{Error, Result};
use crate::session::DebugSession;
use crate::transport::{SerialTransport, Transport};

#[cfg(target_os = "solaris")]
const AUTOPROBE_CANDIDATES: &[&str] = &["/dev/ttya", "/dev/ttyb"];
#[cfg(all(unix, not(target_os = "solaris")))]
const AUTOPROBE_CANDIDATES: &[&str] = &["/dev/ttyS0", "/dev/ttyS1", "/dev/ttyS2", "/dev/ttyS3"];
#[cfg(windows)]
const AUTOPROBE_CANDIDATES: &[&str] = &["com1", "com2", "com3", "com4"];
#[cfg(not(any(unix, windows)))]
const AUTOPROBE_CANDIDATES: &[&str] = &[];

/// Default baud rate, platform-dependent (`spec.md` §4.4).
pub fn default_baud() -> u32 {
    if cfg!(windows) {
        57_600
    } else {
        115_200
    }
}

/// Endurance-supervisor configuration.
#[derive(Debug, Clone)]
pub struct EnduranceConfig {
    pub serial_port: String,
    pub baud: u32,
    pub mtu: usize,
    pub xtal_hz: u32,
    /// Stop after this many cycles; `<= 0` means unbounded.
    pub max_cycles: i64,
    pub verify_repeat: u32,
    pub mail_to: Option<String>,
    pub state_file: String,
}

impl Default for EnduranceConfig {
    fn default() -> Self {
        Self {
            serial_port: "auto".to_string(),
            baud: default_baud(),
            mtu: 256,
            xtal_hz: 20_000_000,
            max_cycles: 0,
            verify_repeat: 100,
            mail_to: None,
            state_file: "cycle".to_string(),
        }
    }
}

/// Parses a crystal-frequency argument: digits, an optional `k`/`K`/`M`
/// multiplier, an optional trailing `Hz`, range `[20_000, 65_000_000]`
/// (`spec.md` §4.4).
pub fn parse_xtal(raw: &str) -> Result<u32> {
    let trimmed = raw.trim();
    let without_hz = trimmed.strip_suffix("Hz").unwrap_or(trimmed);
    let (digits, multiplier) = match without_hz.chars().last() {
        Some('k' | 'K') => (&without_hz[..without_hz.len() - 1], 1_000f64),
        Some('M') => (&without_hz[..without_hz.len() - 1], 1_000_000f64),
        _ => (without_hz, 1f64),
    };
    let mantissa: f64 = digits
        .trim()
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("not a crystal frequency: {raw}")))?;
    if !mantissa.is_finite() || mantissa < 0.0 {
        return Err(Error::InvalidArgument(format!(
            "not a crystal frequency: {raw}"
        )));
    }
    let hz = mantissa * multiplier;
    if !(20_000.0..=65_000_000.0).contains(&hz) {
        return Err(Error::InvalidArgument(format!(
            "crystal frequency {hz} Hz out of range [20000, 65000000]"
        )));
    }
    Ok(hz as u32)
}

/// Cooperative cancellation shared with the SIGINT handler. The first
/// signal requests a graceful stop; a third forces immediate exit
/// (`spec.md` §5).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicUsize>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicUsize::new(0)))
    }

    pub fn signal(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> bool {
        self.count() >= 1
    }

    pub fn forced(&self) -> bool {
        self.count() >= 3
    }
}

/// Registers a SIGINT handler that escalates the given token and forces
/// process exit on the third signal. The handler body is kept to an
/// atomic increment and a conditional exit, same discipline as any
/// signal-safe handler: no allocation, no logging.
pub fn install_sigint_handler(token: CancelToken) -> Result<()> {
    // SAFETY: the closure only increments an atomic and may call
    // `process::exit`, neither of which allocates or takes locks.
    unsafe {
        signal_hook::low_level::register(signal_hook::consts::SIGINT, move || {
            if token.signal() >= 3 {
                std::process::exit(130);
            }
        })
    }
    .map_err(Error::Io)?;
    Ok(())
}

/// Pipes a status email to the local `sendmail` (`spec.md` §6).
pub fn send_mail(mail_to: &str, cycle: u64, tag: &str, detail: &str) -> Result<()> {
    let mut child = Command::new("sendmail")
        .args(["-t", "-i"])
        .stdin(Stdio::piped())
        .spawn()?;
    {
        let stdin = child.stdin.as_mut().expect("sendmail stdin was piped");
        writeln!(stdin, "To: {mail_to}")?;
        writeln!(stdin, "Subject: cycle {cycle} - {tag}")?;
        writeln!(stdin)?;
        writeln!(stdin, "cycle {cycle}")?;
        if !detail.is_empty() {
            writeln!(stdin, "{detail}")?;
        }
    }
    child.wait()?;
    Ok(())
}

/// The persisted cycle counter. Opened once for the supervisor's lifetime
/// and rewritten in place: seek to zero, write, truncate, fsync. Opening
/// read-write without truncating (unlike the historical `"w+"` open mode)
/// is what makes resume actually work.
pub struct StateFile {
    file: std::fs::File,
}

impl StateFile {
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Reads the persisted cycle count, or `0` for a fresh state file.
    pub fn load(&mut self) -> Result<u64> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut text = String::new();
        self.file.read_to_string(&mut text)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Ok(0)
        } else {
            trimmed
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("corrupt state file: {trimmed:?}")))
        }
    }

    pub fn save(&mut self, cycle: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let text = format!("{cycle}\n");
        self.file.write_all(text.as_bytes())?;
        self.file.set_len(text.len() as u64)?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Fills a buffer of `len` bytes with the pattern selected by `cycle % 4`
/// (`spec.md` §4.4). Byte 0 is always forced to `0xFF` so the reset vector
/// never lands on an illegal opcode.
fn fill_pattern(cycle: u64, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    match cycle % 4 {
        0 => {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = if i % 2 == 0 { 0xaa } else { 0x55 };
            }
        }
        1 => {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = if i % 2 == 0 { 0x55 } else { 0xaa };
            }
        }
        2 => {}
        _ => rand::thread_rng().fill_bytes(&mut buf),
    }
    if let Some(first) = buf.first_mut() {
        *first = 0xff;
    }
    buf
}

/// Tries each platform autoprobe candidate in turn; the first that both
/// connects and resynchronizes the link wins (`spec.md` §4.5).
fn autoconnect(baud: u32) -> Result<SerialTransport> {
    for candidate in AUTOPROBE_CANDIDATES {
        let mut transport = SerialTransport::new();
        if transport.connect(candidate, baud).is_err() {
            continue;
        }
        if transport.reset().is_err() {
            transport.disconnect();
            continue;
        }
        tracing::info!(port = candidate, "autoconnected");
        return Ok(transport);
    }
    Err(Error::LinkNotOpen)
}

/// Opens the configured serial port, probing the platform candidate list
/// if `serial_port` is `"auto"` (`spec.md` §4.5).
pub fn connect(config: &EnduranceConfig) -> Result<SerialTransport> {
    if config.serial_port == "auto" {
        autoconnect(config.baud)
    } else {
        let mut transport = SerialTransport::new();
        transport.connect(&config.serial_port, config.baud)?;
        transport.reset()?;
        Ok(transport)
    }
}

/// Distinguishes a transport-level fault (comms retry territory) from a
/// test-meaningful failure (counted, mailed, cycle retried next time).
enum CycleError {
    Comms(Error),
    Test(&'static str, Error),
}

fn classify(e: Error, tag: &'static str) -> CycleError {
    match e {
        Error::LinkNotOpen
        | Error::LinkDown
        | Error::Timeout
        | Error::ShortRead { .. }
        | Error::BusCollision => CycleError::Comms(e),
        other => CycleError::Test(tag, other),
    }
}

pub struct Supervisor<T: Transport> {
    session: DebugSession<T>,
    config: EnduranceConfig,
    state: StateFile,
    cancel: CancelToken,
}

impl<T: Transport> Supervisor<T> {
    pub fn new(
        mut session: DebugSession<T>,
        config: EnduranceConfig,
        state: StateFile,
        cancel: CancelToken,
    ) -> Self {
        session.set_mtu(config.mtu);
        Self {
            session,
            config,
            state,
            cancel,
        }
    }

    fn mail(&self, cycle: u64, tag: &str, detail: &str) {
        if let Some(addr) = &self.config.mail_to {
            if let Err(e) = send_mail(addr, cycle, tag, detail) {
                tracing::warn!(error = %e, "failed to send status mail");
            }
        }
    }

    fn try_recover_once(&mut self) -> Result<()> {
        self.session.reset_link()?;
        self.session.stop()?;
        self.session.reset_chip()?;
        Ok(())
    }

    /// Retries `reset_link → stop → reset_chip` up to three times
    /// (`spec.md` §4.4).
    fn recover_link(&mut self) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=3 {
            match self.try_recover_once() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "link recovery attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("loop always records at least one failure before exiting"))
    }

    fn run_cycle(&mut self, cycle: u64) -> std::result::Result<(), CycleError> {
        self.session
            .flash_mass_erase()
            .map_err(|e| classify(e, "mass-erase"))?;

        let size = self
            .session
            .mem_size()
            .map_err(|e| classify(e, "mem-size"))? as usize;

        let blank_crc = crc_ccitt(0, &vec![0xffu8; size]);
        for _ in 0..self.config.verify_repeat {
            let device_crc = self
                .session
                .rd_crc()
                .map_err(|e| classify(e, "blank-check"))?;
            if device_crc != blank_crc {
                return Err(CycleError::Test(
                    "blank-check",
                    Error::VerifyFailed {
                        what: "blank check",
                    },
                ));
            }
        }

        let pattern = fill_pattern(cycle, size);
        let host_crc = crc_ccitt(0, &pattern);

        self.session
            .write_flash(0, &pattern)
            .map_err(|e| classify(e, "program"))?;

        for _ in 0..self.config.verify_repeat {
            let device_crc = self.session.rd_crc().map_err(|e| classify(e, "verify"))?;
            if device_crc != host_crc {
                return Err(CycleError::Test(
                    "verify",
                    Error::VerifyFailed { what: "program" },
                ));
            }
        }

        Ok(())
    }

    fn teardown(&mut self, cycle: u64) {
        if let Err(e) = self.session.flash_mass_erase() {
            tracing::warn!(error = %e, "final mass-erase failed during teardown");
        }
        if let Err(e) = self.state.save(cycle) {
            tracing::warn!(error = %e, "failed to persist final cycle count");
        }
        self.mail(cycle, "finished", "");
    }

    /// Runs the endurance loop until `max_cycles` is reached, three
    /// consecutive cycles fail, or cancellation is requested. Returns the
    /// final cycle count reached.
    pub fn run(&mut self) -> Result<u64> {
        let mut cycle = self.state.load()?;
        let mut consecutive_errors = 0u32;
        let mut needs_recovery = false;

        let result: Result<()> = 'cycles: loop {
            if self.cancel.requested() {
                tracing::info!(cycle, "stop requested, exiting endurance loop");
                break Ok(());
            }
            if self.config.max_cycles > 0 && cycle as i64 >= self.config.max_cycles {
                tracing::info!(cycle, "reached configured max_cycles");
                break Ok(());
            }

            if cycle % 10 == 0 {
                if let Err(e) = self.state.save(cycle) {
                    break 'cycles Err(e);
                }
            }
            if cycle > 0 && cycle % 10_000 == 0 {
                self.mail(cycle, "running", "");
            }

            if needs_recovery {
                if let Err(e) = self.recover_link() {
                    tracing::error!(cycle, error = %e, "link recovery exhausted retries");
                    break Err(e);
                }
                needs_recovery = false;
            }

            match self.run_cycle(cycle) {
                Ok(()) => {
                    consecutive_errors = 0;
                    cycle += 1;
                }
                Err(CycleError::Comms(e)) => {
                    tracing::warn!(cycle, error = %e, "cycle failed: transport error");
                    self.mail(cycle, "comms-error", &e.to_string());
                    needs_recovery = true;
                    consecutive_errors += 1;
                }
                Err(CycleError::Test(tag, e)) => {
                    tracing::warn!(cycle, tag, error = %e, "cycle failed");
                    self.mail(cycle, tag, &e.to_string());
                    consecutive_errors += 1;
                }
            }

            if consecutive_errors >= 3 {
                tracing::error!(cycle, "three consecutive cycle failures, stopping");
                break Err(Error::InvalidArgument(
                    "three consecutive cycle failures".to_string(),
                ));
            }
        };

        self.teardown(cycle);
        result.map(|()| cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_xtal_accepts_plain_hz() {
        assert_eq!(parse_xtal("20000").unwrap(), 20_000);
    }

    #[test]
    fn parse_xtal_accepts_suffixes() {
        assert_eq!(parse_xtal("20k").unwrap(), 20_000);
        assert_eq!(parse_xtal("20K").unwrap(), 20_000);
        assert_eq!(parse_xtal("20MHz").unwrap(), 20_000_000);
        assert_eq!(parse_xtal("32.768kHz").unwrap(), 32_768);
    }

    #[test]
    fn parse_xtal_accepts_decimal_mantissa() {
        assert_eq!(parse_xtal("18.432M").unwrap(), 18_432_000);
    }

    #[test]
    fn parse_xtal_rejects_out_of_range() {
        assert!(parse_xtal("1").is_err());
        assert!(parse_xtal("100M").is_err());
    }

    #[test]
    fn fill_pattern_forces_first_byte_and_alternates_by_cycle() {
        let even = fill_pattern(0, 4);
        assert_eq!(even, vec![0xff, 0x55, 0xaa, 0x55]);
        let odd = fill_pattern(1, 4);
        assert_eq!(odd, vec![0xff, 0xaa, 0x55, 0xaa]);
        let zeros = fill_pattern(2, 4);
        assert_eq!(zeros, vec![0xff, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn state_file_round_trips_and_does_not_truncate_on_reopen() {
        let path = std::env::temp_dir().join(format!("ocd-endurance-test-{}", std::process::id()));
        let path_str = path.to_str().unwrap().to_string();

        {
            let mut state = StateFile::open(&path_str).unwrap();
            assert_eq!(state.load().unwrap(), 0);
            state.save(42).unwrap();
        }
        {
            let mut state = StateFile::open(&path_str).unwrap();
            assert_eq!(state.load().unwrap(), 42);
        }

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn cancel_token_escalates_after_third_signal() {
        let token = CancelToken::new();
        assert!(!token.requested());
        token.signal();
        assert!(token.requested());
        assert!(!token.forced());
        token.signal();
        token.signal();
        assert!(token.forced());
    }
}
