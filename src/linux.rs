use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use linux_embedded_hal::{Delay, Serial};
use serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};

use crate::{Error, Options, SerialPort, Transport};

impl SerialPort<IoErrorKind> for Serial {
    fn set_rts(&mut self, level: bool) -> Result<(), IoErrorKind> {
        self.0.set_rts(level).map_err(error_kind)
    }
    fn set_dtr(&mut self, level: bool) -> Result<(), IoErrorKind> {
        self.0.set_dtr(level).map_err(error_kind)
    }
}

fn error_kind(e: SerialError) -> IoErrorKind {
    std::io::Error::from(e).kind()
}

impl Transport<Serial, Delay, IoErrorKind> {
    /// Open a linux serial port transport
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, Error<IoErrorKind>> {
        let path = port.as_ref();
        let connection = |e: SerialError| Error::Connection(format!("{}: {}", path.display(), e));

        // Open port
        let mut port = Serial::open(path).map_err(connection)?;

        // Apply settings
        let mut settings = port.0.read_settings().map_err(connection)?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud)).map_err(connection)?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityNone);

        port.0.write_settings(&settings).map_err(connection)?;

        // Reads return immediately, timeouts are paced by the transport delay
        port.0.set_timeout(Duration::from_millis(0)).map_err(connection)?;

        info!("Opened {} at {} baud", path.display(), baud);

        // Return instance
        Ok(Self::open(port, Delay {}, options))
    }
}
