//! Simulated EEPROM and clock, for running the programmer without hardware.

use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use crate::bus::{BusDriver, Direction, ADDRESS_LINES};

/// Cell count addressable through the bus
pub const SIM_SIZE: usize = 1 << ADDRESS_LINES;

const ADDRESS_MASK: u16 = (SIM_SIZE - 1) as u16;

#[derive(Copy, Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum SimError {
    /// Programmer and chip both driving the data lines
    #[error("bus contention: output enable asserted while data lines are driven")]
    Contention,

    /// Data lines sampled while nothing drives them
    #[error("data lines sampled while not driven by the chip")]
    NotDriven,

    /// Data lines driven while configured as inputs
    #[error("data lines written while configured as inputs")]
    Direction,
}

/// In-memory model of a parallel EEPROM behind a [`BusDriver`].
///
/// Like the real part, the address only decodes the wired lines, and data is
/// latched on the rising edge of write enable.
#[derive(Clone, Debug)]
pub struct SimBus {
    cells: Vec<u8>,
    addr: u16,
    latch: u8,
    direction: Direction,
    write_enable: bool,
    output_enable: bool,
    writes: Vec<(u16, u8)>,
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    /// Create a blank (erased, 0xFF) chip
    pub fn new() -> Self {
        Self {
            cells: vec![0xFF; SIM_SIZE],
            addr: 0,
            latch: 0,
            direction: Direction::Output,
            write_enable: false,
            output_enable: false,
            writes: vec![],
        }
    }

    /// Preload cells starting at `addr`
    pub fn load(&mut self, addr: u16, data: &[u8]) {
        for (i, v) in data.iter().enumerate() {
            let a = (addr as usize + i) & ADDRESS_MASK as usize;
            self.cells[a] = *v;
        }
    }

    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Every completed write, as (decoded address, data), in order
    pub fn writes(&self) -> &[(u16, u8)] {
        &self.writes
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn output_enabled(&self) -> bool {
        self.output_enable
    }

    fn check_contention(&self) -> Result<(), SimError> {
        if self.output_enable && self.direction == Direction::Output {
            Err(SimError::Contention)
        } else {
            Ok(())
        }
    }
}

impl BusDriver for SimBus {
    type Error = SimError;

    fn set_address(&mut self, addr: u16) -> Result<(), SimError> {
        self.addr = addr & ADDRESS_MASK;
        Ok(())
    }

    fn set_data_direction(&mut self, dir: Direction) -> Result<(), SimError> {
        self.direction = dir;
        self.check_contention()
    }

    fn set_data_out(&mut self, data: u8) -> Result<(), SimError> {
        if self.direction != Direction::Output {
            return Err(SimError::Direction);
        }
        self.latch = data;
        Ok(())
    }

    fn read_data_in(&mut self) -> Result<u8, SimError> {
        if self.direction != Direction::Input || !self.output_enable {
            return Err(SimError::NotDriven);
        }
        Ok(self.cells[self.addr as usize])
    }

    fn set_write_enable(&mut self, asserted: bool) -> Result<(), SimError> {
        if self.write_enable && !asserted && !self.output_enable {
            self.cells[self.addr as usize] = self.latch;
            self.writes.push((self.addr, self.latch));
        }
        self.write_enable = asserted;
        Ok(())
    }

    fn set_output_enable(&mut self, asserted: bool) -> Result<(), SimError> {
        self.output_enable = asserted;
        self.check_contention()
    }
}

/// Clock that records requested delays instead of sleeping
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct SimClock {
    /// Total simulated time
    pub elapsed_us: u64,
    /// Count of millisecond-scale waits
    pub ms_waits: u32,
}

impl DelayUs<u32> for SimClock {
    fn delay_us(&mut self, us: u32) {
        self.elapsed_us += us as u64;
    }
}

impl DelayMs<u32> for SimClock {
    fn delay_ms(&mut self, ms: u32) {
        self.elapsed_us += ms as u64 * 1000;
        self.ms_waits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latches_on_write_enable_release() {
        let mut b = SimBus::new();
        b.set_address(0x0010).unwrap();
        b.set_data_out(0x41).unwrap();
        b.set_write_enable(true).unwrap();
        assert_eq!(b.cells()[0x10], 0xFF);

        b.set_write_enable(false).unwrap();
        assert_eq!(b.cells()[0x10], 0x41);
        assert_eq!(b.writes(), &[(0x0010, 0x41)]);
    }

    #[test]
    fn upper_address_bit_aliases() {
        let mut b = SimBus::new();
        b.set_address(0x8010).unwrap();
        b.set_data_out(0x5a).unwrap();
        b.set_write_enable(true).unwrap();
        b.set_write_enable(false).unwrap();

        assert_eq!(b.cells()[0x10], 0x5a);
        assert_eq!(b.writes(), &[(0x0010, 0x5a)]);
    }

    #[test]
    fn read_requires_input_and_output_enable() {
        let mut b = SimBus::new();
        b.load(0x7fff, &[0x12, 0x34]);
        assert_eq!(b.cells()[0x7fff], 0x12);
        assert_eq!(b.cells()[0x0000], 0x34);

        b.set_address(0x7fff).unwrap();
        assert_eq!(b.read_data_in(), Err(SimError::NotDriven));

        b.set_data_direction(Direction::Input).unwrap();
        assert_eq!(b.read_data_in(), Err(SimError::NotDriven));

        b.set_output_enable(true).unwrap();
        assert_eq!(b.read_data_in(), Ok(0x12));
    }

    #[test]
    fn data_out_requires_output_direction() {
        let mut b = SimBus::new();
        b.set_data_direction(Direction::Input).unwrap();
        assert_eq!(b.set_data_out(0x42), Err(SimError::Direction));

        b.set_data_direction(Direction::Output).unwrap();
        assert_eq!(b.set_data_out(0x42), Ok(()));
    }

    #[test]
    fn driving_against_chip_is_contention() {
        let mut b = SimBus::new();
        assert_eq!(b.set_output_enable(true), Err(SimError::Contention));
    }

    #[test]
    fn clock_accumulates() {
        let mut c = SimClock::default();
        c.delay_us(3);
        c.delay_ms(10);
        assert_eq!(c.elapsed_us, 10_003);
        assert_eq!(c.ms_waits, 1);
    }
}
