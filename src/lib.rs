//! Parallel EEPROM programmer.
//!
//! Receives a positional byte protocol over a serial link and drives the
//! address, data and control lines of an AT28C-style parallel EEPROM.
//!
//! | Command | Follow-on bytes                       | Response            |
//! |---------|---------------------------------------|---------------------|
//! | `0x01`  | addr hi, addr lo, data                | ACK                 |
//! | `0x02`  | addr hi, addr lo, data*, `0xFF`, !`0xFF` | ACK              |
//! | `0x03`  | addr hi, addr lo                      | data                |
//! | `0x04`  | start hi, start lo, end hi, end lo    | end - start + 1 bytes |
//! | `0xAA`  |                                       | ACK                 |
//! | `0xFF`  |                                       | ACK                 |
//! | other   |                                       | NAK                 |

use core::convert::Infallible;
use core::marker::PhantomData;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

pub mod bus;
pub mod eeprom;
pub mod gate;
pub mod protocol;
pub mod sim;

#[cfg(feature = "linux")]
pub mod linux;

use bus::BusDriver;
use eeprom::{Eeprom, Timing};
use protocol::{Effect, Session, Step};

pub use gate::NoIndicator;
pub use protocol::{ACK, CMD_CANCEL, CMD_HANDSHAKE, NAK};

/// Serial link to the host
pub trait HostPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {
    /// Whether a host currently holds the link open
    fn is_connected(&mut self) -> Result<bool, E>;
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError, BusError> {
    #[error("serial error: {0:?}")]
    Serial(SerialError),

    #[error("bus error: {0:?}")]
    Bus(BusError),

    #[error("failed to drive the indicator")]
    Indicator,
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Stream write buffer size, one EEPROM page
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "64"))]
    pub page_size: usize,

    /// EEPROM internal write cycle time
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "10"))]
    pub write_cycle_ms: u32,

    /// Time from output enable to valid data on reads
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub settle_us: u32,

    /// Indicator half period while waiting for the host
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "200"))]
    pub blink_ms: u32,

    /// Do not wait for a host connection before serving commands
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub no_wait: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            page_size: protocol::DEFAULT_PAGE_SIZE,
            write_cycle_ms: 10,
            settle_us: 1,
            blink_ms: 200,
            no_wait: false,
        }
    }
}

impl Options {
    pub fn timing(&self) -> Timing {
        Timing {
            write_cycle_ms: self.write_cycle_ms,
            settle_us: self.settle_us,
        }
    }
}

pub struct Programmer<P, B, D, E> {
    session: Session,
    options: Options,
    port: P,
    eeprom: Eeprom<B, D>,
    _err: PhantomData<E>,
}

impl<P, B, D, E> Programmer<P, B, D, E>
where
    P: HostPort<E>,
    B: BusDriver,
    B::Error: core::fmt::Debug,
    D: DelayUs<u32> + DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new programmer instance
    pub fn new(port: P, bus: B, delay: D, options: Options) -> Self {
        let eeprom = Eeprom::new(bus, delay, options.timing());
        let session = Session::new(options.page_size);

        Self { session, options, port, eeprom, _err: PhantomData }
    }

    /// Fetch the protocol session
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn eeprom(&self) -> &Eeprom<B, D> {
        &self.eeprom
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Serve commands forever.
    ///
    /// Bus failures abort the command in progress and the programmer keeps
    /// serving; only a serial failure ends the loop.
    pub fn run(&mut self) -> Result<Infallible, Error<E, B::Error>> {
        info!("Serving commands");

        loop {
            match self.step() {
                Ok(()) => (),
                Err(Error::Bus(e)) => {
                    error!("Bus error, command aborted: {:?}", e);
                    self.session.reset();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Block for one byte from the host and process it to completion
    pub fn step(&mut self) -> Result<(), Error<E, B::Error>> {
        let byte = block!(self.port.read()).map_err(Error::Serial)?;

        let step = self.session.feed(byte);
        self.execute(step)?;

        while let Some(step) = self.session.resume() {
            self.execute(step)?;
        }

        Ok(())
    }

    fn execute(&mut self, step: Step) -> Result<(), Error<E, B::Error>> {
        if let Some(effect) = step.effect {
            self.apply(effect)?;
        }

        if let Some(v) = step.reply {
            self.send(v)?;
        }

        Ok(())
    }

    fn apply(&mut self, effect: Effect) -> Result<(), Error<E, B::Error>> {
        debug!("Executing {:?}", effect);

        match effect {
            Effect::Program { addr, data } => {
                self.eeprom.program_byte(data, addr).map_err(Error::Bus)?;
                self.eeprom.await_write_cycle();
            }
            Effect::Flush { start, data } => {
                if !data.is_empty() {
                    self.eeprom.program(start, &data).map_err(Error::Bus)?;
                    self.eeprom.await_write_cycle();
                }
            }
            Effect::ReadByte(addr) => {
                let v = self.eeprom.read_byte(addr).map_err(Error::Bus)?;
                self.send(v)?;
            }
            Effect::ReadRange { start, end } => {
                let port = &mut self.port;
                for v in self.eeprom.read_range(start, end).map_err(Error::Bus)? {
                    let v = v.map_err(Error::Bus)?;
                    block!(port.write(v)).map_err(Error::Serial)?;
                }
            }
        }

        Ok(())
    }

    fn send(&mut self, v: u8) -> Result<(), Error<E, B::Error>> {
        trace!("-> 0x{:02x}", v);
        block!(self.port.write(v)).map_err(Error::Serial)
    }
}
