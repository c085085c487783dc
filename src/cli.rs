use crate::config::{CaptureTarget, DetectionConfig, MonitorConfig, OverflowPolicy, StaticBinding};
use crate::error::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "arpguard", version, about = "Passive ARP spoofing monitor")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the dashboard API.
    Serve {
        #[arg(long, env = "ARPGUARD_BIND", default_value = "127.0.0.1:5000")]
        bind: SocketAddr,

        /// Start monitoring immediately instead of waiting for POST /api/start.
        #[arg(long, env = "ARPGUARD_AUTOSTART")]
        autostart: bool,

        #[command(flatten)]
        monitor: MonitorArgs,
    },
    /// Monitor in the foreground and log detections until Ctrl-C.
    Watch {
        /// Write the event log here on exit.
        #[arg(long)]
        csv: Option<PathBuf>,

        #[command(flatten)]
        monitor: MonitorArgs,
    },
    /// Analyse a capture file and print the results.
    Replay {
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[command(flatten)]
        detection: DetectionArgs,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
}

#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    /// Interface to capture on; the default device when omitted.
    #[arg(short, long, env = "ARPGUARD_INTERFACE")]
    pub interface: Option<String>,

    /// Read frames from a capture file instead of an interface.
    #[arg(long, env = "ARPGUARD_PCAP_FILE", conflicts_with = "interface")]
    pub pcap_file: Option<PathBuf>,

    #[arg(long, env = "ARPGUARD_SNAPLEN", default_value_t = 2048)]
    pub snaplen: i32,

    #[arg(long, env = "ARPGUARD_PROMISC")]
    pub promisc: bool,

    #[arg(long, env = "ARPGUARD_READ_TIMEOUT_MS", default_value_t = 500)]
    pub read_timeout_ms: u64,

    /// Trusted binding loaded at start, as IP=MAC. Repeatable.
    #[arg(long = "trust", value_name = "IP=MAC")]
    pub trust: Vec<String>,

    #[command(flatten)]
    pub detection: DetectionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct DetectionArgs {
    /// Gateway IP; inferred from resolution traffic when omitted.
    #[arg(long, env = "ARPGUARD_GATEWAY")]
    pub gateway: Option<Ipv4Addr>,

    #[arg(long, env = "ARPGUARD_CROSS_CLAIM_WINDOW_SECS", default_value_t = 60)]
    pub cross_claim_window_secs: u64,

    /// Quiet seconds before a conflict settles; 0 keeps alerts until stop.
    #[arg(long, env = "ARPGUARD_SETTLE_SECS", default_value_t = 300)]
    pub settle_secs: u64,

    /// Maximum events kept; unbounded when omitted.
    #[arg(long, env = "ARPGUARD_LOG_CAPACITY")]
    pub log_capacity: Option<usize>,

    #[arg(long, env = "ARPGUARD_OVERFLOW", default_value = "evict")]
    pub overflow: String,
}

impl DetectionArgs {
    pub fn to_config(&self) -> Result<DetectionConfig> {
        let config = DetectionConfig {
            cross_claim_window: Duration::from_secs(self.cross_claim_window_secs),
            settle_after: (self.settle_secs > 0).then(|| Duration::from_secs(self.settle_secs)),
            gateway: self.gateway,
            log_capacity: self.log_capacity,
            overflow: self.overflow.parse::<OverflowPolicy>()?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl MonitorArgs {
    pub fn to_config(&self) -> Result<MonitorConfig> {
        let target = match &self.pcap_file {
            Some(path) => CaptureTarget::File(path.clone()),
            None => CaptureTarget::Live(self.interface.clone()),
        };
        let static_bindings = self
            .trust
            .iter()
            .map(|raw| raw.parse::<StaticBinding>())
            .collect::<Result<Vec<_>>>()?;

        let config = MonitorConfig {
            target,
            snaplen: self.snaplen,
            promisc: self.promisc,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            static_bindings,
            detection: self.detection.to_config()?,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;

    #[test]
    fn test_serve_args() {
        let cli = Cli::try_parse_from([
            "arpguard",
            "serve",
            "--bind",
            "0.0.0.0:8080",
            "-i",
            "eth0",
            "--trust",
            "192.168.1.1=aa:bb:cc:dd:ee:01",
            "--settle-secs",
            "0",
            "--overflow",
            "reject",
            "--log-capacity",
            "100",
        ])
        .unwrap();

        let Command::Serve { bind, autostart, monitor } = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(bind, "0.0.0.0:8080".parse().unwrap());
        assert!(!autostart);

        let config = monitor.to_config().unwrap();
        assert_eq!(config.target, CaptureTarget::Live(Some("eth0".into())));
        assert_eq!(config.static_bindings.len(), 1);
        assert_eq!(config.detection.settle_after, None);
        assert_eq!(config.detection.overflow, OverflowPolicy::Reject);
        assert_eq!(config.detection.log_capacity, Some(100));
    }

    #[test]
    fn test_bad_trust_entry() {
        let cli = Cli::try_parse_from(["arpguard", "watch", "--trust", "10.0.0.1"]).unwrap();
        let Command::Watch { monitor, .. } = cli.command else {
            panic!("expected watch");
        };
        assert!(matches!(monitor.to_config(), Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_replay_args() {
        let cli = Cli::try_parse_from(["arpguard", "replay", "dump.pcap", "--format", "csv"]).unwrap();
        let Command::Replay { file, format, detection } = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(file, PathBuf::from("dump.pcap"));
        assert_eq!(format, OutputFormat::Csv);
        assert_eq!(detection.to_config().unwrap().cross_claim_window, Duration::from_secs(60));
    }
}
