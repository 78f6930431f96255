use std::env;
use std::path::PathBuf;
use std::time::Duration;
use clap::Parser;
use log::{info, warn};
use tokio::signal::ctrl_c;

use crate::config::io::{default_config_path, load_config};
use crate::config::types::Config;
use crate::device::btle::BtleTransport;
use crate::device::monitor::{spawn_monitor, MonitorHandle, MonitorSettings};
use crate::device::types::{ConnectionState, Device, MonitorEvent};
use crate::error::AppRunError;

pub mod config;
pub mod device;
pub mod error;

/// Watch a Bluetooth LE heart rate sensor from the terminal.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Config file to read instead of the one in the user config directory
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// How long each scan runs, e.g. "5s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub scan_duration: Option<Duration>,

    /// How long a connect may take, e.g. "20s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub connect_timeout: Option<Duration>,

    /// Address of the sensor to connect to
    #[arg(long)]
    pub device: Option<String>,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

async fn resolve_config(args: &Args) -> Result<Config, AppRunError> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let mut config = load_config(&path).await?;

    if let Some(duration) = args.scan_duration {
        config.scan_duration = duration;
    }
    if let Some(timeout) = args.connect_timeout {
        config.connect_timeout = timeout;
    }
    if let Some(device) = &args.device {
        config.preferred_device = Some(device.clone());
    }
    Ok(config)
}

/// The configured device if it was seen, else the first heart rate sensor.
pub fn pick_device<'a>(devices: &'a [Device], preferred: Option<&str>) -> Option<&'a Device> {
    if let Some(preferred) = preferred {
        if let Some(device) = devices.iter().find(|d| d.address.eq_ignore_ascii_case(preferred)) {
            return Some(device);
        }
    }
    devices.iter().find(|d| d.is_hrs_candidate())
}

fn on_event(monitor: &MonitorHandle, config: &Config, latest_bpm: &mut Option<u16>, event: MonitorEvent) {
    match event {
        MonitorEvent::ScanCompleted { devices, cancelled } => {
            for device in &devices {
                info!("Found {}", device);
            }
            if cancelled {
                return;
            }

            match pick_device(&devices, config.preferred_device.as_deref()) {
                Some(device) => monitor.connect(&device.address),
                None => match &config.preferred_device {
                    // the sensor may not advertise while another central is connected to it
                    Some(address) => monitor.connect(address),
                    None => {
                        warn!("No heart rate sensor found, scanning again");
                        monitor.scan();
                    },
                },
            }
        },
        MonitorEvent::ScanFailed { reason } => {
            warn!("Scan failed: {}", reason);
        },
        MonitorEvent::StatusChanged { text, state, .. } => {
            if !state.is_healthy() {
                *latest_bpm = None;
            }
            let bpm = latest_bpm.map(|v| v.to_string()).unwrap_or("--".to_string());
            println!("{} (heart rate: {} bpm)", text, bpm);

            if let ConnectionState::Failed(_) = state {
                monitor.scan();
            }
        },
        MonitorEvent::SampleReceived(sample) => {
            *latest_bpm = Some(sample.beats_per_minute);
            println!("{} bpm ({:?}, from {})", sample.beats_per_minute, sample.origin, sample.source_address);
        },
    }
}

pub async fn run(args: Args) -> Result<(), AppRunError> {
    let config = resolve_config(&args).await?;
    info!("Using {:?}", config);

    let transport = BtleTransport::first_adapter().await?;
    let (monitor, mut events, worker) = spawn_monitor(transport, MonitorSettings::from(&config));
    // no reading yet; kept apart from a reported zero
    let mut latest_bpm: Option<u16> = None;

    monitor.scan();

    let interrupted = ctrl_c();
    tokio::pin!(interrupted);

    'mainloop: loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("Interrupted, disconnecting");
                monitor.disconnect();
                monitor.shutdown();
                break 'mainloop;
            },
            event = events.next_event() => match event {
                None => break 'mainloop,
                Some(event) => on_event(&monitor, &config, &mut latest_bpm, event),
            },
        }
    }

    if let Err(err) = worker.await {
        warn!("Monitor task failed: {}", err);
    }
    Ok(())
}
