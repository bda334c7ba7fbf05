use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};
use linux_embedded_hal::sysfs_gpio;
use linux_embedded_hal::{Delay, Pin, Serial};

use crate::bus::{BusDriver, DataLine, Direction};
use crate::{HostPort, Options, Programmer};

impl HostPort<IoErrorKind> for Serial {
    /// The host asserts DTR while its terminal is open, which we see as DSR
    fn is_connected(&mut self) -> Result<bool, IoErrorKind> {
        self.0
            .read_dsr()
            .map_err(|e| std::io::Error::from(e).kind())
    }
}

impl DataLine for Pin {
    type Error = sysfs_gpio::Error;

    fn set_direction(&mut self, dir: Direction) -> Result<(), Self::Error> {
        let d = match dir {
            Direction::Output => sysfs_gpio::Direction::Out,
            Direction::Input => sysfs_gpio::Direction::In,
        };
        self.0.set_direction(d)
    }

    fn set_level(&mut self, high: bool) -> Result<(), Self::Error> {
        self.0.set_value(high as u8)
    }

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.get_value()? != 0)
    }
}

/// Export a sysfs GPIO line and configure it as an output at `level`
pub fn output_pin(num: u64, level: bool) -> Result<Pin, sysfs_gpio::Error> {
    let pin = Pin::new(num);
    pin.0.export()?;
    pin.0.set_direction(if level {
        sysfs_gpio::Direction::High
    } else {
        sysfs_gpio::Direction::Low
    })?;
    Ok(pin)
}

/// Export a sysfs GPIO line for use on the data bus, direction is left to the bus
pub fn data_pin(num: u64) -> Result<Pin, sysfs_gpio::Error> {
    let pin = Pin::new(num);
    pin.0.export()?;
    Ok(pin)
}

impl<B> Programmer<Serial, B, Delay, IoErrorKind>
where
    B: BusDriver,
    B::Error: core::fmt::Debug,
{
    /// Create a new linux serial port programmer instance
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        bus: B,
        options: Options,
    ) -> Result<Self, SerialError> {
        // Open port
        let mut port = Serial::open(port.as_ref())?;

        // Apply settings
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityNone);

        port.0.write_settings(&settings)?;

        // Return instance
        Ok(Self::new(port, bus, Delay {}, options))
    }
}
