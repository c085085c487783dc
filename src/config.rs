use crate::error::{MonitorError, Result};
use crate::models::domain::MacAddr;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What the event log does once `log_capacity` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    #[default]
    Evict,
    Reject,
}

impl FromStr for OverflowPolicy {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "evict" => Ok(OverflowPolicy::Evict),
            "reject" => Ok(OverflowPolicy::Reject),
            other => Err(MonitorError::Config(format!("unknown overflow policy '{}'", other))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// How far back a MAC's claim on another IP counts as a cross-claim.
    pub cross_claim_window: Duration,
    /// Quiet period after which a conflicted IP settles; `None` keeps alerts until stop.
    pub settle_after: Option<Duration>,
    /// Configured gateway; inferred from resolution traffic when absent.
    pub gateway: Option<Ipv4Addr>,
    /// `None` means unbounded.
    pub log_capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            cross_claim_window: Duration::from_secs(60),
            settle_after: Some(Duration::from_secs(300)),
            gateway: None,
            log_capacity: None,
            overflow: OverflowPolicy::Evict,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.log_capacity == Some(0) {
            return Err(MonitorError::Config("log capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureTarget {
    Live(Option<String>),
    File(PathBuf),
}

impl Default for CaptureTarget {
    fn default() -> Self {
        CaptureTarget::Live(None)
    }
}

/// A trusted IP/MAC pair loaded into the binding table at session start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticBinding {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

impl FromStr for StaticBinding {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        let (ip, mac) = s
            .split_once('=')
            .ok_or_else(|| MonitorError::Config(format!("expected IP=MAC, got '{}'", s)))?;
        let ip = ip
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| MonitorError::Config(format!("invalid IPv4 address '{}'", ip)))?;
        let mac = mac
            .trim()
            .parse::<MacAddr>()
            .map_err(|e| MonitorError::Config(e.to_string()))?;
        Ok(StaticBinding { ip, mac })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub target: CaptureTarget,
    pub snaplen: i32,
    pub promisc: bool,
    /// Upper bound on how long a stop request waits for the capture read.
    pub read_timeout: Duration,
    pub static_bindings: Vec<StaticBinding>,
    pub detection: DetectionConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            target: CaptureTarget::default(),
            snaplen: 2048,
            promisc: false,
            read_timeout: Duration::from_millis(500),
            static_bindings: Vec::new(),
            detection: DetectionConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.read_timeout.is_zero() {
            return Err(MonitorError::Config("read timeout must be non-zero".into()));
        }
        if self.snaplen < 42 {
            return Err(MonitorError::Config(format!(
                "snaplen {} is too short for an ARP frame",
                self.snaplen
            )));
        }
        self.detection.validate()
    }
}
