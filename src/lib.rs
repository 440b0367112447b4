//! Serial EEPROM programmer.
//!
//! Host side driver for a simple ACK based EEPROM programmer. The device
//! announces its capacity on connection and acknowledges every 4-byte command
//! with an `ACK` line.

use core::convert::TryFrom;
use core::fmt::Debug;
use core::ops::Deref;

#[macro_use]
extern crate log;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod parse;
pub mod protocol;
pub mod transport;

pub use parse::{parse_address, parse_byte, parse_int, ArgumentError};
pub use transport::Transport;

use protocol::{Command, ACK, MAX_CAPACITY};

/// Serial port with modem control lines, used to reset the programmer
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {
    fn set_rts(&mut self, level: bool) -> Result<(), E>;
    fn set_dtr(&mut self, level: bool) -> Result<(), E>;
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    Disconnected,
    Connecting,
    Ready,
    Failed,
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError: Debug> {
    #[error("could not open serial port: {0}")]
    Connection(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("expected '{expected}' from programmer, received '{actual}'")]
    Protocol { expected: String, actual: String },

    #[error("short read: expected {expected} bytes, received {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("invalid reply line: {0:02x?}")]
    Decode(Vec<u8>),

    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ArgumentError),

    #[error("address 0x{address:04x} is outside the {capacity} byte EEPROM")]
    AddressOutOfRange { address: u16, capacity: usize },

    #[error("file of {size} bytes does not fit the {capacity} byte EEPROM")]
    FileTooLarge { size: usize, capacity: usize },

    #[error("verification failed: {0}")]
    Verification(Mismatch),

    #[error("serial port error: {0:?}")]
    Serial(SerialError),

    #[error("write failed after {written} of {total} bytes: {reason}")]
    Write {
        written: usize,
        total: usize,
        reason: String,
    },

    #[error("serial port is closed")]
    Closed,

    #[error("session failed on an earlier error")]
    SessionFailed,
}

/// First difference between EEPROM contents and the expected data
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
#[error("offset 0x{offset:04x} holds 0x{actual:02x}, expected 0x{expected:02x} ({mismatches} bytes differ)")]
pub struct Mismatch {
    pub offset: usize,
    pub expected: u8,
    pub actual: u8,
    pub mismatches: usize,
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Reset the device via DTR/RTS before the handshake
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub reset: bool,

    /// Timeout to wait for each byte of a programmer response
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "2000"))]
    pub response_timeout_ms: u32,

    /// Period to poll for programmer responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Period to wait for the programmer to boot after a reset
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "2000"))]
    pub init_delay_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            reset: false,
            response_timeout_ms: 2000,
            poll_delay_ms: 1,
            init_delay_ms: 2000,
        }
    }
}

/// Full copy of the EEPROM contents
#[derive(Clone, PartialEq, Debug)]
pub struct Snapshot(Vec<u8>);

impl Snapshot {
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for Snapshot {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Snapshot {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Check every byte of `data` equals `fill`
pub fn verify_fill(data: &[u8], fill: u8) -> Result<(), Mismatch> {
    let mut first = None;
    let mut mismatches = 0;

    for (offset, &actual) in data.iter().enumerate() {
        if actual != fill {
            first.get_or_insert((offset, actual));
            mismatches += 1;
        }
    }

    match first {
        None => Ok(()),
        Some((offset, actual)) => Err(Mismatch {
            offset,
            expected: fill,
            actual,
            mismatches,
        }),
    }
}

/// Check `data` starts with `expected`
pub fn verify_image(data: &[u8], expected: &[u8]) -> Result<(), Mismatch> {
    let mut first = None;
    let mut mismatches = 0;

    for (offset, &want) in expected.iter().enumerate() {
        // Missing bytes count as mismatches, reported with the inverted value
        let actual = data.get(offset).copied().unwrap_or(!want);
        if actual != want {
            first.get_or_insert((offset, want, actual));
            mismatches += 1;
        }
    }

    match first {
        None => Ok(()),
        Some((offset, expected, actual)) => Err(Mismatch {
            offset,
            expected,
            actual,
            mismatches,
        }),
    }
}

pub struct Programmer<P, D, E> {
    state: State,
    capacity: usize,
    transport: Transport<P, D, E>,
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: Debug,
{
    /// Perform the connection handshake over an open transport.
    ///
    /// The device sends an `ACK` line followed by its capacity as a decimal
    /// line. The transport is closed if the handshake fails.
    pub fn connect(transport: Transport<P, D, E>) -> Result<Self, Error<E>> {
        let mut p = Self {
            state: State::Connecting,
            capacity: 0,
            transport,
        };

        if let Err(e) = p.handshake() {
            p.fail(&e);
            return Err(e);
        }

        p.state = State::Ready;
        Ok(p)
    }

    /// Fetch the programmer state
    pub fn state(&self) -> State {
        self.state
    }

    /// EEPROM capacity in bytes, as reported at connection time
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Close the session, releasing the serial port
    pub fn close(&mut self) {
        self.transport.close();
        if self.state != State::Failed {
            self.state = State::Disconnected;
        }
    }

    fn handshake(&mut self) -> Result<(), Error<E>> {
        if self.transport.options().reset {
            self.transport.reset()?;
        }

        debug!("Awaiting handshake ack");
        let ack = self.transport.read_line_ascii().map_err(handshake_error)?;
        if ack != ACK {
            return Err(Error::Handshake(format!(
                "expected '{}', received '{}'",
                ACK, ack
            )));
        }

        debug!("Awaiting capacity line");
        let line = self.transport.read_line_ascii().map_err(handshake_error)?;
        if line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Handshake(format!("invalid capacity line '{}'", line)));
        }

        let capacity = match line.parse::<usize>() {
            Ok(c) if c > 0 && c <= MAX_CAPACITY => c,
            _ => {
                return Err(Error::Handshake(format!(
                    "unsupported capacity {} (expected 1..={})",
                    line, MAX_CAPACITY
                )))
            }
        };

        info!("Programmer connected, capacity {} bytes", capacity);
        self.capacity = capacity;

        Ok(())
    }

    /// Read back the full EEPROM contents
    pub fn dump(&mut self) -> Result<Snapshot, Error<E>> {
        self.dump_with_progress(|_| ())
    }

    /// Read back the full EEPROM contents, reporting the number of bytes received
    pub fn dump_with_progress<F>(&mut self, progress: F) -> Result<Snapshot, Error<E>>
    where
        F: FnMut(usize),
    {
        self.run(|p| {
            let cmd = Command::Dump;
            p.command(&cmd)?;

            let data = p
                .transport
                .read_exact_with(cmd.reply_len(p.capacity), progress)?;

            p.ensure_ack()?;
            Ok(Snapshot(data))
        })
    }

    /// Fill every EEPROM cell with `fill`
    pub fn erase(&mut self, fill: u8) -> Result<(), Error<E>> {
        self.run(|p| p.command(&Command::Erase { fill }))
    }

    /// Erase, then reconnect with a fresh transport and check the contents.
    ///
    /// The device is given a full connection reset between the erase and the
    /// verification dump. Returns the new session on success.
    pub fn erase_verified<F>(mut self, fill: u8, reconnect: F) -> Result<Self, Error<E>>
    where
        F: FnOnce() -> Result<Transport<P, D, E>, Error<E>>,
    {
        self.erase(fill)?;
        self.close();

        debug!("Reconnecting to verify erase");
        let mut fresh = Self::connect(reconnect()?)?;

        let snapshot = fresh.dump()?;
        verify_fill(&snapshot, fill).map_err(Error::Verification)?;

        Ok(fresh)
    }

    /// Write a single byte
    pub fn write_byte(&mut self, address: u16, value: u8) -> Result<(), Error<E>> {
        self.run(|p| {
            p.check_address(address)?;
            p.command(&Command::WriteByte { address, value })
        })
    }

    /// Read a single byte
    pub fn read_byte(&mut self, address: u16) -> Result<u8, Error<E>> {
        self.run(|p| {
            p.check_address(address)?;

            let cmd = Command::ReadByte { address };
            p.command(&cmd)?;

            let data = p.transport.read_exact(cmd.reply_len(p.capacity))?;

            p.ensure_ack()?;
            Ok(data[0])
        })
    }

    /// Write a file image starting at address zero
    pub fn write_file(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        self.write_file_with_progress(data, |_| ())
    }

    /// Write a file image, reporting the number of bytes sent
    pub fn write_file_with_progress<F>(&mut self, data: &[u8], progress: F) -> Result<(), Error<E>>
    where
        F: FnMut(usize),
    {
        self.run(|p| {
            // The length field is 16 bits wide, whatever the capacity
            let len = match u16::try_from(data.len()) {
                Ok(len) if data.len() <= p.capacity => len,
                _ => {
                    return Err(Error::FileTooLarge {
                        size: data.len(),
                        capacity: p.capacity,
                    })
                }
            };

            p.command(&Command::WriteFile { len })?;

            debug!("Sending {} byte image", data.len());
            p.transport.write_with(data, progress)?;

            p.ensure_ack()
        })
    }

    /// Dump the EEPROM and compare it against `expected`
    pub fn verify_contents(&mut self, expected: &[u8]) -> Result<(), Error<E>> {
        let snapshot = self.dump()?;

        if let Err(m) = verify_image(&snapshot, expected) {
            let e = Error::Verification(m);
            self.fail(&e);
            return Err(e);
        }

        Ok(())
    }

    fn check_address(&self, address: u16) -> Result<(), Error<E>> {
        if usize::from(address) >= self.capacity {
            return Err(Error::AddressOutOfRange {
                address,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Run an operation on a ready session, failing the session on error.
    ///
    /// Operand checks run inside `f` ahead of any I/O, so a rejected operand
    /// closes the session without touching the wire.
    fn run<T, F>(&mut self, f: F) -> Result<T, Error<E>>
    where
        F: FnOnce(&mut Self) -> Result<T, Error<E>>,
    {
        match self.state {
            State::Ready => (),
            State::Failed => return Err(Error::SessionFailed),
            State::Disconnected | State::Connecting => return Err(Error::Closed),
        }

        match f(self) {
            Ok(v) => Ok(v),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn fail(&mut self, e: &Error<E>) {
        error!("Programmer session failed: {}", e);
        self.state = State::Failed;
        self.transport.close();
    }

    fn command(&mut self, cmd: &Command) -> Result<(), Error<E>> {
        debug!("Sending command {:?}", cmd);
        self.transport.write(&cmd.encode())?;

        self.ensure_ack()
    }

    fn ensure_ack(&mut self) -> Result<(), Error<E>> {
        let protocol = |actual: String| Error::Protocol {
            expected: ACK.to_string(),
            actual,
        };

        let line = match self.transport.read_line_ascii() {
            Ok(l) => l,
            Err(Error::ShortRead { .. }) => return Err(protocol("<no reply>".to_string())),
            Err(Error::Decode(raw)) => return Err(protocol(format!("{:02x?}", raw))),
            Err(e) => return Err(e),
        };

        if line != ACK {
            debug!("Received unexpected reply: '{}'", line);
            return Err(protocol(line));
        }

        debug!("Received programmer ack");
        Ok(())
    }
}

fn handshake_error<E: Debug>(e: Error<E>) -> Error<E> {
    match e {
        Error::ShortRead { .. } | Error::Decode(_) => Error::Handshake(e.to_string()),
        e => e,
    }
}
