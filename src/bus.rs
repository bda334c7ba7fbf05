//! Parallel bus line control.

use bit_field::BitField;
use embedded_hal::digital::v2::OutputPin;

/// Number of address lines wired to the chip
pub const ADDRESS_LINES: usize = 15;
/// Number of data lines wired to the chip
pub const DATA_LINES: usize = 8;

/// Data line direction, as seen from the programmer
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Direction {
    /// Programmer drives the data lines (write, idle)
    Output,
    /// Chip drives the data lines (read)
    Input,
}

/// Line level access to an EEPROM's address, data and control lines.
///
/// Control lines are expressed logically, `true` meaning asserted, whatever
/// the electrical polarity.
pub trait BusDriver {
    type Error;

    /// Drive the address lines from the low bits of `addr`
    fn set_address(&mut self, addr: u16) -> Result<(), Self::Error>;

    /// Switch the data lines between driving and sampling
    fn set_data_direction(&mut self, dir: Direction) -> Result<(), Self::Error>;

    /// Drive the data lines, requires `Direction::Output`
    fn set_data_out(&mut self, data: u8) -> Result<(), Self::Error>;

    /// Sample the data lines, requires `Direction::Input`
    fn read_data_in(&mut self) -> Result<u8, Self::Error>;

    fn set_write_enable(&mut self, asserted: bool) -> Result<(), Self::Error>;

    fn set_output_enable(&mut self, asserted: bool) -> Result<(), Self::Error>;
}

/// A GPIO line whose direction can be switched at runtime
pub trait DataLine {
    type Error;

    fn set_direction(&mut self, dir: Direction) -> Result<(), Self::Error>;

    fn set_level(&mut self, high: bool) -> Result<(), Self::Error>;

    fn is_high(&mut self) -> Result<bool, Self::Error>;
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum BusError<E> {
    #[error("GPIO error: {0:?}")]
    Pin(E),

    #[error("data lines are not configured for {0:?}")]
    Direction(Direction),
}

/// Bus driver over individual GPIO lines.
///
/// Line arrays are indexed by bit position, `address[0]` being A0.
pub struct ParallelBus<A, D, C> {
    address: [A; ADDRESS_LINES],
    data: [D; DATA_LINES],
    write_enable: C,
    output_enable: C,
    direction: Direction,
}

impl<A, D, C, E> ParallelBus<A, D, C>
where
    A: OutputPin<Error = E>,
    D: DataLine<Error = E>,
    C: OutputPin<Error = E>,
{
    /// Take ownership of the lines and put the bus in its idle state: control
    /// lines deasserted, data lines driven
    pub fn new(
        address: [A; ADDRESS_LINES],
        data: [D; DATA_LINES],
        write_enable: C,
        output_enable: C,
    ) -> Result<Self, BusError<E>> {
        let mut bus = Self {
            address,
            data,
            write_enable,
            output_enable,
            direction: Direction::Output,
        };

        bus.set_write_enable(false)?;
        bus.set_output_enable(false)?;
        bus.set_data_direction(Direction::Output)?;

        Ok(bus)
    }

    /// Current data line direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Release the underlying lines
    pub fn release(self) -> ([A; ADDRESS_LINES], [D; DATA_LINES], C, C) {
        (self.address, self.data, self.write_enable, self.output_enable)
    }
}

// Active low: asserted drives the line low
fn drive_low<P: OutputPin>(pin: &mut P, asserted: bool) -> Result<(), P::Error> {
    if asserted {
        pin.set_low()
    } else {
        pin.set_high()
    }
}

impl<A, D, C, E> BusDriver for ParallelBus<A, D, C>
where
    A: OutputPin<Error = E>,
    D: DataLine<Error = E>,
    C: OutputPin<Error = E>,
{
    type Error = BusError<E>;

    fn set_address(&mut self, addr: u16) -> Result<(), Self::Error> {
        for (i, pin) in self.address.iter_mut().enumerate() {
            let r = if addr.get_bit(i) { pin.set_high() } else { pin.set_low() };
            r.map_err(BusError::Pin)?;
        }
        Ok(())
    }

    fn set_data_direction(&mut self, dir: Direction) -> Result<(), Self::Error> {
        for pin in self.data.iter_mut() {
            pin.set_direction(dir).map_err(BusError::Pin)?;
        }
        self.direction = dir;
        Ok(())
    }

    fn set_data_out(&mut self, data: u8) -> Result<(), Self::Error> {
        if self.direction != Direction::Output {
            return Err(BusError::Direction(Direction::Output));
        }

        for (i, pin) in self.data.iter_mut().enumerate() {
            pin.set_level(data.get_bit(i)).map_err(BusError::Pin)?;
        }
        Ok(())
    }

    fn read_data_in(&mut self) -> Result<u8, Self::Error> {
        if self.direction != Direction::Input {
            return Err(BusError::Direction(Direction::Input));
        }

        let mut v = 0u8;
        for (i, pin) in self.data.iter_mut().enumerate() {
            v.set_bit(i, pin.is_high().map_err(BusError::Pin)?);
        }
        Ok(v)
    }

    fn set_write_enable(&mut self, asserted: bool) -> Result<(), Self::Error> {
        drive_low(&mut self.write_enable, asserted).map_err(BusError::Pin)
    }

    fn set_output_enable(&mut self, asserted: bool) -> Result<(), Self::Error> {
        drive_low(&mut self.output_enable, asserted).map_err(BusError::Pin)
    }
}
