//! Run the driver against a simulated ADS79xx.

use std::time::Duration;

use adscan::driver::{Ads79xxDriver, VREF_SUPPLY};
use adscan::sim::{Inputs, SimAds79xx};
use ads79xx::ChipId;
use anyhow::Context;
use clap::Parser;
use iio::{ChanInfo, FixedRegulator, Iio, Regulators};

#[derive(Parser)]
#[command(about = "Sample a simulated ADS79xx through the IIO driver")]
struct Args {
    /// Device id of the simulated part.
    #[arg(long, default_value = "ti-ads7950")]
    chip: String,

    /// Inputs to capture in buffered mode. Defaults to all of them.
    #[arg(long, value_delimiter = ',')]
    channels: Vec<u32>,

    /// Trigger frequency in Hz.
    #[arg(long, default_value_t = 100)]
    frequency: u32,

    /// Number of buffered scans to print.
    #[arg(long, default_value_t = 10)]
    scans: usize,

    /// Reference voltage in microvolts.
    #[arg(long, default_value_t = 2_500_000)]
    vref: i32,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let id = ChipId::from_device_id(&args.chip)
        .with_context(|| format!("unknown chip {}", args.chip))?;
    let chip = id.info();

    // Spread the inputs evenly over the 2 x Vref range.
    let inputs = Inputs::new(chip.num_channels as usize);
    for channel in 0..chip.num_channels as usize {
        let step = args.vref as i64 * 2 / (chip.num_channels as i64 + 1);
        inputs.set(channel, (step * (channel as i64 + 1)) as i32);
    }

    let iio = Iio::new();
    let regulators = Regulators::default();
    regulators.add(VREF_SUPPLY, FixedRegulator::new(args.vref));

    let sim = SimAds79xx::new(id, inputs, args.vref);
    let driver = Ads79xxDriver::probe(sim, id.device_id(), "spi0.0", &iio, &regulators)
        .map_err(|e| e.error)?;

    let scale = driver.read(0, ChanInfo::Scale)?;
    println!("{} ({}), scale {scale} mV", chip.name, driver.dev().dev_name().unwrap_or_default());

    for chan in driver.dev().channels() {
        if chan.chan_type != iio::ChanType::Voltage {
            continue;
        }

        let raw = driver.read(chan.channel, ChanInfo::Raw)?;
        println!("{chan}_raw ({}): {raw}", chan.datasheet_name);
    }

    // Samples arrive in ascending channel order.
    let mut channels: Vec<u32> = if args.channels.is_empty() {
        (0..chip.num_channels as u32).collect()
    } else {
        args.channels
    };
    channels.sort_unstable();
    channels.dedup();

    if let Some(&channel) = channels.iter().find(|&&ch| ch >= chip.num_channels as u32) {
        anyhow::bail!("{} has no input {channel}", chip.name);
    }

    driver.trigger().set_sampling_frequency(args.frequency)?;
    driver.enable_buffer(&channels, true)?;

    let specs = driver.dev().channels().to_vec();
    let timeout = Duration::from_secs(1) + Duration::from_nanos(1_000_000_000 / args.frequency as u64);

    for _ in 0..args.scans {
        let scan = driver
            .dev()
            .buffer()
            .read_scan_timeout(timeout)
            .context("timed out waiting for a scan")?;

        let millivolts: Vec<String> = channels
            .iter()
            .zip(&scan.samples)
            .map(|(&channel, &sample)| {
                let code = specs[channel as usize].scan_type.decode(sample);
                format!("{:.1}", code as f64 * scale.as_f64())
            })
            .collect();

        println!("{:>14} ns: {}", scan.timestamp.unwrap_or_default(), millivolts.join(" "));
    }

    driver.disable_buffer()?;

    let trigger = driver.trigger().trigger();
    log::info!(
        "{} scans completed, {} edges missed, {} overruns",
        trigger.completed(),
        trigger.missed(),
        driver.dev().buffer().overruns()
    );

    driver.remove(&iio);
    Ok(())
}
