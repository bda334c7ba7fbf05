#[macro_use]
extern crate log;

use std::convert::TryInto;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use anyhow::{anyhow, Context};
use linux_embedded_hal::Pin;

use eeprom_programmer::bus::{BusDriver, ParallelBus, ADDRESS_LINES, DATA_LINES};
use eeprom_programmer::linux::{data_pin, output_pin};
use eeprom_programmer::sim::SimBus;
use eeprom_programmer::{NoIndicator, Options, Programmer};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to serve the host on
    #[structopt(long, default_value = "/dev/ttyGS0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    /// GPIO lines for A0..A14
    #[structopt(
        long,
        use_delimiter = true,
        default_value = "28,27,26,22,21,20,19,18,3,2,0,1,17,4,16"
    )]
    address_pins: Vec<u64>,

    /// GPIO lines for D0..D7
    #[structopt(long, use_delimiter = true, default_value = "14,13,12,11,10,9,8,7")]
    data_pins: Vec<u64>,

    /// GPIO line for the active-low write enable
    #[structopt(long, default_value = "15")]
    write_enable_pin: u64,

    /// GPIO line for the active-low output enable
    #[structopt(long, default_value = "5")]
    output_enable_pin: u64,

    /// GPIO line for the status LED
    #[structopt(long)]
    led_pin: Option<u64>,

    /// Serve from an in-memory EEPROM instead of the GPIO bus
    #[structopt(long)]
    simulate: bool,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    let r = if o.simulate {
        info!("Using simulated EEPROM");
        serve(&o, SimBus::new())
    } else {
        gpio_bus(&o).and_then(|bus| serve(&o, bus))
    };

    if let Err(e) = r {
        error!("{:?}", e);
        std::process::exit(1);
    }
}

fn gpio_bus(o: &Args) -> anyhow::Result<ParallelBus<Pin, Pin, Pin>> {
    if o.address_pins.len() != ADDRESS_LINES || o.data_pins.len() != DATA_LINES {
        return Err(anyhow!(
            "Expected {} address and {} data pins, got {} and {}",
            ADDRESS_LINES,
            DATA_LINES,
            o.address_pins.len(),
            o.data_pins.len()
        ));
    }

    info!("Exporting GPIO lines");

    let address = o
        .address_pins
        .iter()
        .map(|n| output_pin(*n, false))
        .collect::<Result<Vec<_>, _>>()
        .context("Error exporting address lines")?;
    let data = o
        .data_pins
        .iter()
        .map(|n| data_pin(*n))
        .collect::<Result<Vec<_>, _>>()
        .context("Error exporting data lines")?;

    // Control lines start deasserted (high)
    let we = output_pin(o.write_enable_pin, true).context("Error exporting write enable")?;
    let oe = output_pin(o.output_enable_pin, true).context("Error exporting output enable")?;

    let address: [Pin; ADDRESS_LINES] = address
        .try_into()
        .map_err(|_| anyhow!("Address line count mismatch"))?;
    let data: [Pin; DATA_LINES] = data
        .try_into()
        .map_err(|_| anyhow!("Data line count mismatch"))?;

    ParallelBus::new(address, data, we, oe).context("Error initialising bus")
}

fn serve<B>(o: &Args, bus: B) -> anyhow::Result<()>
where
    B: BusDriver,
    B::Error: core::fmt::Debug,
{
    info!("Opening serial port {}", o.port);

    let mut p = Programmer::linux(&o.port, o.baud, bus, o.options.clone())
        .with_context(|| format!("Error opening serial port {}", o.port))?;

    if !o.options.no_wait {
        let waited = match o.led_pin {
            Some(n) => {
                let mut led = output_pin(n, false).context("Error exporting LED")?;
                p.wait_for_host(&mut led)
            }
            None => p.wait_for_host(&mut NoIndicator),
        };
        waited.map_err(|e| anyhow!("Error waiting for host: {}", e))?;
    }

    match p.run() {
        Ok(never) => match never {},
        Err(e) => Err(anyhow!("Error serving host: {}", e)),
    }
}
