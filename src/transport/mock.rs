//! A deterministic in-memory transport for tests: a scripted duplex link
//! that can inject echo corruption, short reads, and canned responses.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// What the mock should do the next time it is written to.
#[derive(Clone, Debug)]
pub enum EchoBehavior {
    /// Echo back exactly what was written (the normal case).
    Faithful,
    /// Echo back `bytes` instead of what was written — a bus collision.
    Corrupt(Vec<u8>),
    /// Echo back fewer bytes than were written, then time out.
    Short(usize),
}

pub struct MockTransport {
    open: bool,
    up: bool,
    /// Bytes enqueued to be returned by `read()` calls that are not part of
    /// an echo check (i.e. real protocol responses).
    responses: VecDeque<u8>,
    echo_behavior: EchoBehavior,
    /// Every byte ever written, for assertions in tests.
    pub written: Vec<u8>,
    reset_count: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            open: true,
            up: false,
            responses: VecDeque::new(),
            echo_behavior: EchoBehavior::Faithful,
            written: Vec::new(),
            reset_count: 0,
        }
    }

    pub fn closed() -> Self {
        let mut t = Self::new();
        t.open = false;
        t
    }

    pub fn queue_response(&mut self, bytes: &[u8]) {
        self.responses.extend(bytes.iter().copied());
    }

    pub fn set_echo_behavior(&mut self, behavior: EchoBehavior) {
        self.echo_behavior = behavior;
    }

    pub fn reset_count(&self) -> usize {
        self.reset_count
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn is_open(&self) -> bool {
        self.open
    }

    fn is_up(&self) -> bool {
        self.up
    }

    fn reset(&mut self) -> Result<()> {
        if !self.open {
            return Err(Error::LinkNotOpen);
        }
        self.responses.clear();
        self.up = true;
        self.reset_count += 1;
        self.write(&[super::AUTOBAUD_CHARACTER])
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        if !self.open {
            return Err(Error::LinkNotOpen);
        }
        if !self.up {
            return Err(Error::LinkDown);
        }

        for (i, slot) in buf.iter_mut().enumerate() {
            match self.responses.pop_front() {
                Some(b) => *slot = b,
                None => {
                    self.up = false;
                    return Err(if i == 0 {
                        Error::Timeout
                    } else {
                        Error::ShortRead {
                            expected: buf.len(),
                            got: i,
                        }
                    });
                }
            }
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        if !self.open {
            return Err(Error::LinkNotOpen);
        }
        if !self.up {
            return Err(Error::LinkDown);
        }

        self.written.extend_from_slice(buf);

        let echo: Vec<u8> = match &self.echo_behavior {
            EchoBehavior::Faithful => buf.to_vec(),
            EchoBehavior::Corrupt(bytes) => bytes.clone(),
            EchoBehavior::Short(n) => {
                self.up = false;
                return Err(Error::ShortRead {
                    expected: buf.len(),
                    got: (*n).min(buf.len()),
                });
            }
        };

        if echo != buf {
            self.up = false;
            return Err(Error::BusCollision);
        }

        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        if !self.open {
            return Err(Error::LinkNotOpen);
        }
        if !self.up {
            return Err(Error::LinkDown);
        }
        Ok(self.responses.len())
    }
}
