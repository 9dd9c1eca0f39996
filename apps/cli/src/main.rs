use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::Parser;
use harmony_core::archive::replace_firmware;
use harmony_core::classify;
use harmony_core::events::{FlashEvent, FlashObserver, FlashPhase, TracingObserver};
use harmony_core::release::ReleaseClient;
use harmony_core::session::{FlashSession, SessionConfig, load_firmware};
use harmony_core::transport::SerialPortTransport;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "harmony.toml";

#[derive(Parser, Debug)]
#[command(author, version, about = "Mudita Harmony custom OS flasher", long_about = None)]
struct Args {
    /// Path to the replacement OS image (os.bin)
    os_bin: PathBuf,

    /// Session configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port of the device; discovered by USB ID when omitted
    #[arg(long)]
    port: Option<String>,

    /// Directory for the downloaded vendor bundle
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Draws a progress bar per phase and logs everything else.
struct ProgressObserver {
    bar: Mutex<Option<(FlashPhase, ProgressBar)>>,
}

impl ProgressObserver {
    fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn finish(&self) {
        if let Ok(mut bar) = self.bar.lock() {
            if let Some((_, pb)) = bar.take() {
                pb.finish();
            }
        }
    }
}

impl FlashObserver for ProgressObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::Progress {
                phase,
                current,
                total,
            } => {
                let Ok(mut slot) = self.bar.lock() else {
                    return;
                };
                if slot.as_ref().is_some_and(|(p, _)| p != phase) {
                    if let Some((_, pb)) = slot.take() {
                        pb.finish();
                    }
                }
                let (_, pb) = slot.get_or_insert_with(|| {
                    let pb = ProgressBar::new(*total);
                    pb.set_style(
                        ProgressStyle::with_template(
                            "{msg:>10} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
                        )
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                    );
                    pb.set_message(phase.to_string());
                    (*phase, pb)
                });
                if *total > 0 {
                    pb.set_length(*total);
                }
                pb.set_position(*current);
            }
            FlashEvent::PhaseChanged { .. } | FlashEvent::Error { .. } | FlashEvent::Complete => {
                self.finish();
                TracingObserver.on_event(event);
            }
            _ => TracingObserver.on_event(event),
        }
    }
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) if path.exists() => SessionConfig::load_from_file(path)
            .with_context(|| format!("Could not load config {}", path.display()))?,
        Some(path) if !args.save_config => {
            bail!("Config file {} does not exist", path.display())
        }
        _ => SessionConfig::default(),
    };

    if let Some(port) = &args.port {
        config.port = Some(port.clone());
    }
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }

    if args.save_config {
        let path = args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
        config
            .save_to_file(&path)
            .with_context(|| format!("Could not save config {}", path.display()))?;
        info!(path = %path.display(), "Saved configuration");
    }

    Ok(config)
}

fn run(args: &Args) -> Result<()> {
    let config = load_config(args)?;
    let firmware = load_firmware(&args.os_bin)?;

    let transport = match &config.port {
        Some(port) => SerialPortTransport::open_path(port, config.baud_rate)?,
        None => SerialPortTransport::open(config.baud_rate)?,
    };

    let observer = Arc::new(ProgressObserver::new());
    let mut session = FlashSession::with_observer(transport, &config, Arc::clone(&observer));

    let device = session.device_information()?;
    println!("Device information:");
    println!("  Serial number:   {}", device.serial_number);
    println!("  OS version:      {}", device.version);
    println!("  Git revision:    {}", device.git_revision);
    println!("  Battery level:   {}%", device.battery_level);
    println!("  Onboarding:      {}", device.onboarding_state);
    println!("  Update file:     {}", device.update_file_path);

    let client = ReleaseClient::new(config.release_url.as_str());
    let release = client.latest()?;
    println!("Latest release: {} ({})", release.version, release.date);

    let bundle_path = client.fetch_bundle(&release, &config.cache_dir, observer.as_ref())?;
    observer.finish();
    let bundle = std::fs::read(&bundle_path)
        .with_context(|| format!("Could not read update file {}", bundle_path.display()))?;

    let patched = replace_firmware(&bundle, &firmware)?;
    patched
        .report
        .ensure_complete()
        .with_context(|| format!("Refusing to upload {}", bundle_path.display()))?;
    info!(md5 = %patched.report.firmware_md5, "Patched update bundle");
    let image = patched.into_image();

    let report = session.flash(&device, &image)?;
    observer.finish();
    info!(
        bytes = report.bytes,
        chunks = report.chunks,
        crc32 = %format!("{:08x}", report.crc32),
        "Upload committed"
    );
    println!("Update accepted. The device is rebooting.");
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting harmony-flash...");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let kind = classify(&e);
            error!("{}: {:#}", kind, e);
            ExitCode::from(kind.exit_code())
        }
    }
}
