use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};

use crate::link::WordLink;

/// SPI link to an ADS79xx wired to the Pi's SPI header, chip-select driven from a GPIO.
pub type PiLink = WordLink<ExclusiveDevice<Spi, OutputPin, NoDelay>>;

fn bus(index: u8) -> anyhow::Result<Bus> {
    Ok(match index {
        0 => Bus::Spi0,
        1 => Bus::Spi1,
        2 => Bus::Spi2,
        3 => Bus::Spi3,
        4 => Bus::Spi4,
        5 => Bus::Spi5,
        6 => Bus::Spi6,
        _ => anyhow::bail!("no SPI bus {index}"),
    })
}

fn slave_select(index: u8) -> anyhow::Result<SlaveSelect> {
    Ok(match index {
        0 => SlaveSelect::Ss0,
        1 => SlaveSelect::Ss1,
        2 => SlaveSelect::Ss2,
        _ => anyhow::bail!("no slave select {index}"),
    })
}

/// Open `spi<bus>.<ss>` in SPI mode 0.
pub fn open(bus_index: u8, ss: u8, clock_speed: u32, cs_pin: u8) -> anyhow::Result<PiLink> {
    let gpio = Gpio::new()?;

    let spi = Spi::new(bus(bus_index)?, slave_select(ss)?, clock_speed, Mode::Mode0)?;

    let mut cs = gpio.get(cs_pin)?.into_output();
    cs.set_high();

    log::debug!("opened spi{bus_index}.{ss} at {clock_speed} Hz, chip-select on GPIO {cs_pin}");

    Ok(WordLink::new(ExclusiveDevice::new_no_delay(spi, cs)))
}
