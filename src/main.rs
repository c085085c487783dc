use arpguard::cli::{Cli, Command, DetectionArgs, MonitorArgs, OutputFormat};
use arpguard::monitor::{Monitor, MonitorState};
use arpguard::server;
use clap::Parser;
use std::error::Error;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { bind, autostart, monitor } => serve(bind, autostart, &monitor),
        Command::Watch { csv, monitor } => watch(csv, &monitor),
        Command::Replay { file, format, detection } => replay(&file, format, &detection),
    }
}

#[cfg(feature = "capture")]
fn build_monitor(args: &MonitorArgs) -> Result<Monitor, Box<dyn Error>> {
    Ok(Monitor::with_pcap(args.to_config()?)?)
}

#[cfg(not(feature = "capture"))]
fn build_monitor(_args: &MonitorArgs) -> Result<Monitor, Box<dyn Error>> {
    Err("built without the `capture` feature; no frame source available".into())
}

fn serve(bind: SocketAddr, autostart: bool, args: &MonitorArgs) -> Result<(), Box<dyn Error>> {
    let monitor = Arc::new(build_monitor(args)?);
    if autostart {
        if let Err(e) = monitor.start() {
            error!(error = %e, "autostart failed");
        }
    }

    actix_web::rt::System::new().block_on(server::serve(monitor.clone(), bind))?;

    if monitor.is_running() {
        monitor.stop()?;
    }
    Ok(())
}

fn watch(csv: Option<PathBuf>, args: &MonitorArgs) -> Result<(), Box<dyn Error>> {
    let monitor = build_monitor(args)?;
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || running_clone.store(false, Ordering::SeqCst))?;

    monitor.start()?;
    let mut last_seen = None;
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_secs(1));
        for event in monitor.events(last_seen) {
            info!(
                victim = %event.ip,
                old_mac = %event.old_mac,
                new_mac = %event.new_mac,
                attacker = ?event.attacker_ip,
                "spoof event #{}",
                event.sequence
            );
            last_seen = Some(event.sequence);
        }
        if monitor.state() == MonitorState::Stopped {
            let reason = monitor.status().last_failure.unwrap_or_default();
            warn!(%reason, "monitor stopped on its own");
            break;
        }
    }

    if monitor.is_running() {
        monitor.stop()?;
    }
    if let Some(path) = csv {
        std::fs::write(&path, monitor.events_csv())?;
        info!(path = %path.display(), "event log written");
    }
    Ok(())
}

#[cfg(feature = "capture")]
fn replay(file: &Path, format: OutputFormat, args: &DetectionArgs) -> Result<(), Box<dyn Error>> {
    use arpguard::detection::Detector;
    use arpguard::error::MonitorError;
    use arpguard::models::dto::{DeviceDTO, SpoofEventDTO};
    use arpguard::registry;
    use arpguard::sniff::PcapSource;

    let mut detector = Detector::new(args.to_config()?);
    let mut source = PcapSource::file(file.to_path_buf(), Duration::from_millis(10))?;
    let mut malformed = 0u64;

    for frame in source.drain() {
        let outcome = frame.and_then(|frame| detector.process(&frame));
        match outcome {
            Ok(_) => {}
            Err(MonitorError::MalformedFrame(_)) => malformed += 1,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => warn!(error = %e, "frame dropped"),
        }
    }
    info!(frames = detector.stats().frames, malformed, "replay finished");

    match format {
        OutputFormat::Csv => print!("{}", detector.log().to_csv()),
        OutputFormat::Json => {
            let devices: Vec<DeviceDTO> = registry::snapshot(&detector).into_iter().map(DeviceDTO::from).collect();
            let events: Vec<SpoofEventDTO> = detector.log().list(None).iter().map(SpoofEventDTO::from).collect();
            let report = serde_json::json!({ "devices": devices, "events": events });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

#[cfg(not(feature = "capture"))]
fn replay(_file: &Path, _format: OutputFormat, _args: &DetectionArgs) -> Result<(), Box<dyn Error>> {
    Err("built without the `capture` feature; cannot read capture files".into())
}
