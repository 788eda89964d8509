//! Real transport backed by a host serial port.

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{write_with_echo_check, Transport, AUTOBAUD_CHARACTER};

/// Minimum duration of the line break, expressed as whole bit-times at the
/// configured baud rate. A break held for more than nine bit-times resets
/// the on-chip debugger's line state.
const BREAK_BIT_TIMES: u32 = 10;

pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    up: bool,
    read_timeout: Duration,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self {
            port: None,
            up: false,
            read_timeout: Duration::from_millis(100),
        }
    }

    /// Opens and configures `device` at `baud`: 8-N-1, no flow control, a
    /// read timeout derived from the baud rate per `spec.md` §4.1.
    pub fn connect(&mut self, device: &str, baud: u32) -> Result<()> {
        let timeout_ms = read_timeout_ms(baud);
        self.read_timeout = Duration::from_millis(timeout_ms as u64);

        let port = serialport::new(device, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        self.port = Some(port);
        self.up = false;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.port = None;
        self.up = false;
    }

    fn raw_write(&mut self, buf: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::LinkNotOpen)?;
        port.write_all(buf).map_err(|e| Error::Io(e))?;
        Ok(())
    }

    fn raw_read(&mut self, buf: &mut [u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::LinkNotOpen)?;
        let mut filled = 0;
        while filled < buf.len() {
            match port.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(if filled == 0 {
                        Error::Timeout
                    } else {
                        Error::ShortRead {
                            expected: buf.len(),
                            got: filled,
                        }
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(if filled == 0 {
                        Error::Timeout
                    } else {
                        Error::ShortRead {
                            expected: buf.len(),
                            got: filled,
                        }
                    })
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SerialTransport {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn is_up(&self) -> bool {
        self.up
    }

    fn reset(&mut self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::LinkNotOpen);
        }

        self.up = false;

        {
            let port = self.port.as_mut().ok_or(Error::LinkNotOpen)?;
            port.clear(serialport::ClearBuffer::Input)
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
            port.set_break().map_err(|e| Error::Io(std::io::Error::other(e)))?;
            std::thread::sleep(break_duration(port.baud_rate().unwrap_or(9600)));
            port.clear_break().map_err(|e| Error::Io(std::io::Error::other(e)))?;
            port.clear(serialport::ClearBuffer::Input)
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        }

        self.up = true;

        self.write(&[AUTOBAUD_CHARACTER])
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        if !self.is_open() {
            return Err(Error::LinkNotOpen);
        }
        if !self.is_up() {
            return Err(Error::LinkDown);
        }

        match self.raw_read(buf) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.up = false;
                Err(e)
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(Error::LinkNotOpen);
        }
        if !self.is_up() {
            return Err(Error::LinkDown);
        }

        let up = &mut self.up;
        let port = self.port.as_mut().ok_or(Error::LinkNotOpen)?;

        let result = write_with_echo_check(
            buf,
            |b| port.write_all(b).map_err(Error::Io),
            |b| {
                let mut filled = 0;
                while filled < b.len() {
                    match port.read(&mut b[filled..]) {
                        Ok(0) => {
                            return Err(if filled == 0 {
                                Error::Timeout
                            } else {
                                Error::ShortRead {
                                    expected: b.len(),
                                    got: filled,
                                }
                            })
                        }
                        Ok(n) => filled += n,
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                            return Err(if filled == 0 {
                                Error::Timeout
                            } else {
                                Error::ShortRead {
                                    expected: b.len(),
                                    got: filled,
                                }
                            })
                        }
                        Err(e) => return Err(Error::Io(e)),
                    }
                }
                Ok(())
            },
        );

        if result.is_err() {
            *up = false;
        }
        result
    }

    fn available(&mut self) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::LinkNotOpen);
        }
        if !self.is_up() {
            return Err(Error::LinkDown);
        }
        let port = self.port.as_mut().ok_or(Error::LinkNotOpen)?;
        Ok(port
            .bytes_to_read()
            .map_err(|e| Error::Io(std::io::Error::other(e)))? as usize)
    }
}

/// `65536 * 1000 / baud / 4 + 100`, rounded up, per `spec.md` §4.1.
fn read_timeout_ms(baud: u32) -> u32 {
    let numerator: u64 = 65536 * 1000;
    let denominator: u64 = baud as u64 * 4;
    let quotient = numerator.div_ceil(denominator);
    quotient as u32 + 100
}

fn break_duration(baud: u32) -> Duration {
    let bit_time_us = 1_000_000u64 / baud.max(1) as u64;
    Duration::from_micros(bit_time_us * BREAK_BIT_TIMES as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_formula_matches_spec_example() {
        // ceil(65536*1000/(115200*4)) + 100 = ceil(142.222) + 100 = 243
        assert_eq!(read_timeout_ms(115_200), 243);
    }

    #[test]
    fn timeout_formula_rounds_up_not_truncates() {
        // A baud that truncates differently than it ceils proves rounding.
        let truncated = 65536u64 * 1000 / (57_600 * 4);
        let got = read_timeout_ms(57_600) - 100;
        assert!(u64::from(got) >= truncated);
    }
}
