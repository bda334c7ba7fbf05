//! Byte level EEPROM operations composed from bus line control.

use core::ops::RangeInclusive;

use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use crate::bus::{BusDriver, Direction};

/// Address setup, write pulse and data hold time. The chip needs 100ns/50ns,
/// a microsecond is the finest delay we get.
const EDGE_US: u32 = 1;

/// Chip timing parameters
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Timing {
    /// Internal write cycle, after which the chip accepts new commands
    pub write_cycle_ms: u32,
    /// Output enable to valid data
    pub settle_us: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            write_cycle_ms: 10,
            settle_us: 1,
        }
    }
}

/// EEPROM attached to a bus
pub struct Eeprom<B, D> {
    bus: B,
    delay: D,
    timing: Timing,
}

impl<B, D> Eeprom<B, D>
where
    B: BusDriver,
    D: DelayUs<u32> + DelayMs<u32>,
{
    pub fn new(bus: B, delay: D, timing: Timing) -> Self {
        Self { bus, delay, timing }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Latch `data` into the chip at `addr`.
    ///
    /// This does not wait for the internal write cycle so a page of bytes can
    /// be programmed back to back; call [`Eeprom::await_write_cycle`] once done.
    pub fn program_byte(&mut self, data: u8, addr: u16) -> Result<(), B::Error> {
        self.bus.set_address(addr)?;
        self.bus.set_data_direction(Direction::Output)?;
        self.bus.set_data_out(data)?;

        // Address setup
        self.delay.delay_us(EDGE_US);

        self.bus.set_write_enable(true)?;
        self.delay.delay_us(EDGE_US);
        self.bus.set_write_enable(false)?;

        // Data hold
        self.delay.delay_us(EDGE_US);

        Ok(())
    }

    /// Program `data` at sequential addresses from `start`
    pub fn program(&mut self, start: u16, data: &[u8]) -> Result<(), B::Error> {
        let mut addr = start;
        for v in data {
            self.program_byte(*v, addr)?;
            addr = addr.wrapping_add(1);
        }
        Ok(())
    }

    /// Read the byte stored at `addr`
    pub fn read_byte(&mut self, addr: u16) -> Result<u8, B::Error> {
        self.bus.set_data_direction(Direction::Input)?;
        self.bus.set_address(addr)?;
        self.bus.set_output_enable(true)?;

        self.await_output_settle();
        let v = self.bus.read_data_in();

        // Back to idle even if sampling or either restore fails
        let released = self.bus.set_output_enable(false);
        let idle = self.bus.set_data_direction(Direction::Output);

        let v = v?;
        released?;
        idle?;

        Ok(v)
    }

    /// Read the inclusive range `start..=end`, one byte per iteration.
    ///
    /// Output enable stays asserted while the reader is alive; dropping it
    /// returns the bus to idle. An empty range (`start > end`) leaves the bus
    /// untouched.
    pub fn read_range(&mut self, start: u16, end: u16) -> Result<RangeRead<'_, B, D>, B::Error> {
        let addrs = start..=end;
        let armed = !addrs.is_empty();

        if armed {
            self.bus.set_data_direction(Direction::Input)?;
            self.bus.set_output_enable(true)?;
        }

        Ok(RangeRead { eeprom: self, addrs, armed })
    }

    /// Wait out the chip's internal write cycle
    pub fn await_write_cycle(&mut self) {
        self.delay.delay_ms(self.timing.write_cycle_ms);
    }

    /// Wait for the chip to drive valid data after an address or OE change
    pub fn await_output_settle(&mut self) {
        self.delay.delay_us(self.timing.settle_us);
    }

    pub(crate) fn pause_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}

/// Lazy reader over an address range, see [`Eeprom::read_range`]
pub struct RangeRead<'a, B, D>
where
    B: BusDriver,
    D: DelayUs<u32> + DelayMs<u32>,
{
    eeprom: &'a mut Eeprom<B, D>,
    addrs: RangeInclusive<u16>,
    armed: bool,
}

impl<'a, B, D> Iterator for RangeRead<'a, B, D>
where
    B: BusDriver,
    D: DelayUs<u32> + DelayMs<u32>,
{
    type Item = Result<u8, B::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let addr = self.addrs.next()?;

        let e = &mut *self.eeprom;
        if let Err(err) = e.bus.set_address(addr) {
            return Some(Err(err));
        }
        e.await_output_settle();

        Some(e.bus.read_data_in())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.addrs.size_hint()
    }
}

impl<'a, B, D> Drop for RangeRead<'a, B, D>
where
    B: BusDriver,
    D: DelayUs<u32> + DelayMs<u32>,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let bus = &mut self.eeprom.bus;
        if bus.set_output_enable(false).is_err() || bus.set_data_direction(Direction::Output).is_err() {
            warn!("Failed to return bus to idle after range read");
        }
    }
}
