//! Connection gate, holds the programmer until a host is attached.

use core::convert::Infallible;

use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::digital::v2::OutputPin;

use crate::bus::BusDriver;
use crate::{Error, HostPort, Programmer};

/// Indicator for boards without one
#[derive(Copy, Clone, Debug, Default)]
pub struct NoIndicator;

impl OutputPin for NoIndicator {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

impl<P, B, D, E> Programmer<P, B, D, E>
where
    P: HostPort<E>,
    B: BusDriver,
    B::Error: core::fmt::Debug,
    D: DelayUs<u32> + DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Block until the host connects, blinking `indicator` meanwhile.
    ///
    /// Returns the number of blink periods spent waiting.
    pub fn wait_for_host<I>(&mut self, indicator: &mut I) -> Result<u32, Error<E, B::Error>>
    where
        I: OutputPin,
        I::Error: core::fmt::Debug,
    {
        let blink_ms = self.options.blink_ms;
        let mut blinks = 0;

        debug!("Waiting for host connection");

        while !self.port.is_connected().map_err(Error::Serial)? {
            indicator.set_high().map_err(indicator_error)?;
            self.eeprom.pause_ms(blink_ms);
            indicator.set_low().map_err(indicator_error)?;
            self.eeprom.pause_ms(blink_ms);

            blinks += 1;
        }

        info!("Host connected");

        Ok(blinks)
    }
}

fn indicator_error<P: core::fmt::Debug, E, B>(e: P) -> Error<E, B> {
    warn!("Indicator error: {:?}", e);
    Error::Indicator
}
