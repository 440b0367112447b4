//! Byte and line level access to the programmer serial port.
//!
//! No protocol knowledge lives here; reads are bounded by the inactivity
//! timeout in [`Options`] so a silent device surfaces as a short read.

use core::fmt::Debug;
use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::MAX_LINE;
use crate::{Error, Options, SerialPort};

/// Chunk size used when reporting write progress
const WRITE_CHUNK: usize = 64;

pub struct Transport<P, D, E> {
    port: Option<P>,
    delay: D,
    options: Options,
    _err: PhantomData<E>,
}

impl<P, D, E> Transport<P, D, E> {
    /// Whether the serial port is still held
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Release the serial port, subsequent I/O fails with [`Error::Closed`]
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial port closed");
        }
    }
}

impl<P, D, E> Drop for Transport<P, D, E> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<P, D, E> Transport<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: Debug,
{
    /// Create a transport over an already opened port
    pub fn open(port: P, delay: D, options: Options) -> Self {
        Self {
            port: Some(port),
            delay,
            options,
            _err: PhantomData,
        }
    }

    /// Pulse DTR/RTS to reset the device, then wait for it to boot
    pub fn reset(&mut self) -> Result<(), Error<E>> {
        let port = self.port.as_mut().ok_or(Error::Closed)?;

        debug!("Resetting device");

        port.set_dtr(true).map_err(Error::Serial)?;
        port.set_rts(true).map_err(Error::Serial)?;

        self.delay.delay_ms(100u32);

        port.set_dtr(false).map_err(Error::Serial)?;
        port.set_rts(false).map_err(Error::Serial)?;

        self.delay.delay_ms(self.options.init_delay_ms);

        Ok(())
    }

    /// Read exactly `n` bytes
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, Error<E>> {
        self.read_exact_with(n, |_| ())
    }

    /// Read exactly `n` bytes, reporting the running count after each byte
    pub fn read_exact_with<F>(&mut self, n: usize, mut progress: F) -> Result<Vec<u8>, Error<E>>
    where
        F: FnMut(usize),
    {
        let mut data = Vec::with_capacity(n);

        while data.len() < n {
            match self.poll_read()? {
                Some(v) => data.push(v),
                None => {
                    error!("Receive timeout after {} of {} bytes", data.len(), n);
                    return Err(Error::ShortRead {
                        expected: n,
                        actual: data.len(),
                    });
                }
            }

            progress(data.len());
        }

        Ok(data)
    }

    /// Read one line, returned without surrounding whitespace
    pub fn read_line_ascii(&mut self) -> Result<String, Error<E>> {
        let mut line = Vec::new();

        loop {
            match self.poll_read()? {
                Some(b'\n') => break,
                Some(v) => line.push(v),
                None => {
                    return Err(Error::ShortRead {
                        expected: line.len() + 1,
                        actual: line.len(),
                    })
                }
            }

            if line.len() >= MAX_LINE {
                return Err(Error::Decode(line));
            }
        }

        if !line.is_ascii() {
            return Err(Error::Decode(line));
        }

        let text: String = line.iter().map(|&b| b as char).collect();
        Ok(text.trim().to_string())
    }

    /// Write all of `data`
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        self.write_with(data, |_| ())
    }

    /// Write all of `data`, reporting the running count after each chunk
    pub fn write_with<F>(&mut self, data: &[u8], mut progress: F) -> Result<(), Error<E>>
    where
        F: FnMut(usize),
    {
        if !self.is_open() {
            return Err(Error::Closed);
        }

        let mut written = 0;

        for chunk in data.chunks(WRITE_CHUNK) {
            for &v in chunk {
                self.poll_write(v)
                    .map_err(|reason| write_error(written, data.len(), reason))?;
                written += 1;
            }

            progress(written);
        }

        self.poll_flush()
            .map_err(|reason| write_error(written, data.len(), reason))
    }

    /// Poll for a single byte, `None` on timeout
    fn poll_read(&mut self) -> Result<Option<u8>, Error<E>> {
        let port = self.port.as_mut().ok_or(Error::Closed)?;
        let poll = self.options.poll_delay_ms.max(1);
        let mut t = 0;

        loop {
            match port.read() {
                Ok(v) => return Ok(Some(v)),
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(Error::Serial(e)),
            }

            self.delay.delay_ms(poll);
            t += poll;

            if t > self.options.response_timeout_ms {
                return Ok(None);
            }
        }
    }

    fn poll_write(&mut self, v: u8) -> Result<(), String> {
        let port = self.port.as_mut().ok_or_else(|| "port closed".to_string())?;
        let poll = self.options.poll_delay_ms.max(1);
        let mut t = 0;

        loop {
            match port.write(v) {
                Ok(()) => return Ok(()),
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(format!("{:?}", e)),
            }

            self.delay.delay_ms(poll);
            t += poll;

            if t > self.options.response_timeout_ms {
                return Err("write timeout".to_string());
            }
        }
    }

    fn poll_flush(&mut self) -> Result<(), String> {
        let port = self.port.as_mut().ok_or_else(|| "port closed".to_string())?;
        let poll = self.options.poll_delay_ms.max(1);
        let mut t = 0;

        loop {
            match port.flush() {
                Ok(()) => return Ok(()),
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(format!("{:?}", e)),
            }

            self.delay.delay_ms(poll);
            t += poll;

            if t > self.options.response_timeout_ms {
                return Err("flush timeout".to_string());
            }
        }
    }
}

fn write_error<E: Debug>(written: usize, total: usize, reason: String) -> Error<E> {
    error!("Write failed after {} of {} bytes: {}", written, total, reason);
    Error::Write {
        written,
        total,
        reason,
    }
}
