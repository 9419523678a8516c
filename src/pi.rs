//! Stream an ADS79xx wired to the Raspberry Pi SPI header.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adscan::driver::{Ads79xxDriver, VREF_SUPPLY};
use adscan::raspberry_pi;
use anyhow::Context;
use clap::Parser;
use iio::{ChanInfo, FixedRegulator, Iio, Regulators};

#[derive(Parser)]
#[command(about = "Stream an ADS79xx on the Raspberry Pi SPI header")]
struct Args {
    /// Device id of the attached part.
    #[arg(long, default_value = "ti-ads7953")]
    chip: String,

    #[arg(long, default_value_t = 0)]
    bus: u8,

    #[arg(long, default_value_t = 0)]
    ss: u8,

    /// SPI clock in Hz.
    #[arg(long, default_value_t = 1_000_000)]
    clock: u32,

    /// GPIO driving chip-select.
    #[arg(long, default_value_t = 24)]
    cs_pin: u8,

    /// Reference voltage in microvolts.
    #[arg(long, default_value_t = 2_500_000)]
    vref: i32,

    /// Inputs to capture.
    #[arg(long, value_delimiter = ',', default_value = "0")]
    channels: Vec<u32>,

    /// Trigger frequency in Hz.
    #[arg(long, default_value_t = 100)]
    frequency: u32,
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let link = raspberry_pi::open(args.bus, args.ss, args.clock, args.cs_pin)?;

    let iio = Iio::new();
    let regulators = Regulators::default();
    regulators.add(VREF_SUPPLY, FixedRegulator::new(args.vref));

    let bus_name = format!("spi{}.{}", args.bus, args.ss);
    let driver = Ads79xxDriver::probe(link, &args.chip, &bus_name, &iio, &regulators)
        .map_err(|e| e.error)
        .with_context(|| format!("failed to bind {} on {bus_name}", args.chip))?;

    println!("scale: {} mV", driver.read(0, ChanInfo::Scale)?);

    driver.trigger().set_sampling_frequency(args.frequency)?;
    driver.enable_buffer(&args.channels, true)?;

    let running = Arc::new(AtomicBool::new(true));

    // Spawn a thread to drain the buffer
    let reader = {
        let running = Arc::clone(&running);
        let dev = Arc::clone(driver.dev());
        std::thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                if let Some(scan) = dev.buffer().read_scan_timeout(Duration::from_millis(100)) {
                    println!("{:?} @ {:?}", scan.samples, scan.timestamp);
                }
            }
        })
    };

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    running.store(false, Ordering::Relaxed);
    if reader.join().is_err() {
        log::warn!("reader thread panicked");
    }

    driver.disable_buffer()?;
    driver.remove(&iio);

    Ok(())
}
