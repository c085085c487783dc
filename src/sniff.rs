//! Frame sources feeding the capture worker.
//!
//! A [`FrameSource`] yields decoded ARP frames one at a time and must return
//! within its read timeout even when the wire is quiet, so a stop request is
//! noticed promptly. A [`SourceOpener`] makes a fresh source for every
//! monitoring session.

use crate::config::StaticBinding;
use crate::error::{MonitorError, Result};
use crate::models::domain::ArpFrame;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

pub trait FrameSource: Send {
    /// Next ARP frame, or `None` when the read timed out with nothing to report.
    ///
    /// `MalformedFrame` is recoverable; `CaptureFailure` ends the session.
    fn next_frame(&mut self) -> Result<Option<ArpFrame>>;

    fn describe(&self) -> String;

    /// IPv4 and MAC of the capturing interface, when known.
    fn local_binding(&self) -> Option<StaticBinding> {
        None
    }
}

pub trait SourceOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>>;
}

pub struct ChannelSource {
    rx: Receiver<ArpFrame>,
    timeout: Duration,
    local: Option<StaticBinding>,
}

impl FrameSource for ChannelSource {
    fn next_frame(&mut self) -> Result<Option<ArpFrame>> {
        match self.rx.recv_timeout(self.timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(MonitorError::CaptureFailure("frame channel closed".into()))
            }
        }
    }

    fn describe(&self) -> String {
        "channel".into()
    }

    fn local_binding(&self) -> Option<StaticBinding> {
        self.local
    }
}

#[derive(Clone)]
pub struct ChannelOpener {
    rx: Receiver<ArpFrame>,
    timeout: Duration,
    local: Option<StaticBinding>,
}

impl ChannelOpener {
    /// Sources report `binding` as the capturing host.
    pub fn with_local_binding(mut self, binding: StaticBinding) -> Self {
        self.local = Some(binding);
        self
    }
}

impl SourceOpener for ChannelOpener {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(ChannelSource {
            rx: self.rx.clone(),
            timeout: self.timeout,
            local: self.local,
        }))
    }
}

pub fn channel(timeout: Duration) -> (Sender<ArpFrame>, ChannelOpener) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (tx, ChannelOpener { rx, timeout, local: None })
}

#[cfg(feature = "capture")]
pub use self::pcap_source::{PcapOpener, PcapSource};

#[cfg(feature = "capture")]
mod pcap_source {
    use super::{FrameSource, SourceOpener};
    use crate::config::{CaptureTarget, MonitorConfig, StaticBinding};
    use crate::error::{MonitorError, Result};
    use crate::models::domain::{ArpFrame, MacAddr};
    use crate::parser::parse_ethernet;
    use chrono::{DateTime, TimeZone, Utc};
    use pcap::{Active, Activated, Capture, Device, Linktype, Offline};
    use std::fs;
    use std::net::IpAddr;
    use std::path::PathBuf;
    use std::thread;
    use std::time::Duration;
    use tracing::{debug, info};

    const ARP_FILTER: &str = "arp";

    enum Handle {
        Live(Capture<Active>),
        File { cap: Capture<Offline>, exhausted: bool },
    }

    enum Read {
        Frame(ArpFrame),
        Quiet,
        End,
    }

    pub struct PcapSource {
        handle: Handle,
        label: String,
        read_timeout: Duration,
        local: Option<StaticBinding>,
    }

    #[derive(Clone, Debug)]
    pub struct PcapOpener {
        target: CaptureTarget,
        snaplen: i32,
        promisc: bool,
        read_timeout: Duration,
    }

    impl PcapOpener {
        pub fn new(config: &MonitorConfig) -> Self {
            Self {
                target: config.target.clone(),
                snaplen: config.snaplen,
                promisc: config.promisc,
                read_timeout: config.read_timeout,
            }
        }
    }

    impl SourceOpener for PcapOpener {
        fn open(&self) -> Result<Box<dyn FrameSource>> {
            let source = match &self.target {
                CaptureTarget::Live(interface) => {
                    PcapSource::live(interface.as_deref(), self.snaplen, self.promisc, self.read_timeout)?
                }
                CaptureTarget::File(path) => PcapSource::file(path.clone(), self.read_timeout)?,
            };
            Ok(Box::new(source))
        }
    }

    impl PcapSource {
        pub fn live(interface: Option<&str>, snaplen: i32, promisc: bool, read_timeout: Duration) -> Result<Self> {
            let device = match interface {
                // Listed devices carry their addresses; a bare name does not.
                Some(name) => Device::list()?
                    .into_iter()
                    .find(|device| device.name == name)
                    .unwrap_or_else(|| Device::from(name)),
                None => Device::lookup()?
                    .ok_or_else(|| MonitorError::CaptureFailure("no capture device available".into()))?,
            };
            let label = device.name.clone();
            let local = interface_binding(&device);
            let timeout_ms = i32::try_from(read_timeout.as_millis()).unwrap_or(i32::MAX).max(1);

            let mut cap = Capture::from_device(device)?
                .promisc(promisc)
                .snaplen(snaplen)
                .timeout(timeout_ms)
                .immediate_mode(true)
                .open()?;
            require_ethernet(cap.get_datalink(), &label)?;
            cap.filter(ARP_FILTER, true)?;

            info!(interface = %label, snaplen, promisc, "live capture opened");
            Ok(Self {
                handle: Handle::Live(cap),
                label,
                read_timeout,
                local,
            })
        }

        pub fn file(path: PathBuf, read_timeout: Duration) -> Result<Self> {
            let mut cap = Capture::from_file(&path)?;
            let label = path.display().to_string();
            require_ethernet(cap.get_datalink(), &label)?;
            cap.filter(ARP_FILTER, true)?;
            info!(file = %label, "capture file opened");
            Ok(Self {
                handle: Handle::File { cap, exhausted: false },
                label,
                read_timeout,
                local: None,
            })
        }

        /// Reads the whole file, or until the live capture stops yielding frames.
        pub fn drain(&mut self) -> Vec<Result<ArpFrame>> {
            let mut out = Vec::new();
            loop {
                match self.next_frame() {
                    Ok(Some(frame)) => out.push(Ok(frame)),
                    Ok(None) => break,
                    Err(e) if e.is_fatal() => {
                        out.push(Err(e));
                        break;
                    }
                    Err(e) => out.push(Err(e)),
                }
            }
            out
        }
    }

    impl FrameSource for PcapSource {
        fn next_frame(&mut self) -> Result<Option<ArpFrame>> {
            match &mut self.handle {
                Handle::Live(cap) => match read_arp(cap)? {
                    Read::Frame(frame) => Ok(Some(frame)),
                    Read::Quiet | Read::End => Ok(None),
                },
                Handle::File { exhausted: true, .. } => {
                    // Replay finished; idle until stopped.
                    thread::sleep(self.read_timeout);
                    Ok(None)
                }
                Handle::File { cap, exhausted } => match read_arp(cap)? {
                    Read::Frame(frame) => Ok(Some(frame)),
                    Read::Quiet => Ok(None),
                    Read::End => {
                        info!(file = %self.label, "capture file exhausted");
                        *exhausted = true;
                        Ok(None)
                    }
                },
            }
        }

        fn describe(&self) -> String {
            self.label.clone()
        }

        fn local_binding(&self) -> Option<StaticBinding> {
            self.local
        }
    }

    fn require_ethernet(linktype: Linktype, label: &str) -> Result<()> {
        if linktype == Linktype::ETHERNET {
            return Ok(());
        }
        let name = linktype.get_name().unwrap_or_else(|_| linktype.0.to_string());
        Err(MonitorError::CaptureFailure(format!(
            "{} uses link type {}, only Ethernet is supported",
            label, name
        )))
    }

    /// Skips packets that are not ARP; the filter is not guaranteed on every platform.
    fn read_arp<T: Activated + ?Sized>(cap: &mut Capture<T>) -> Result<Read> {
        loop {
            let packet = match cap.next_packet() {
                Ok(packet) => packet,
                Err(pcap::Error::TimeoutExpired) => return Ok(Read::Quiet),
                Err(pcap::Error::NoMorePackets) => return Ok(Read::End),
                Err(e) => return Err(e.into()),
            };
            let observed_at = timestamp(packet.header.ts.tv_sec as i64, packet.header.ts.tv_usec as i64);
            if let Some(frame) = parse_ethernet(packet.data, observed_at)? {
                return Ok(Read::Frame(frame));
            }
        }
    }

    fn interface_binding(device: &Device) -> Option<StaticBinding> {
        let ip = device.addresses.iter().find_map(|address| match address.addr {
            IpAddr::V4(ip) if !ip.is_loopback() => Some(ip),
            _ => None,
        })?;
        let mac = fs::read_to_string(format!("/sys/class/net/{}/address", device.name))
            .ok()?
            .trim()
            .parse::<MacAddr>()
            .ok()
            .filter(MacAddr::is_unicast_host)?;
        debug!(interface = %device.name, ip = %ip, mac = %mac, "capturing interface address");
        Some(StaticBinding { ip, mac })
    }

    fn timestamp(secs: i64, micros: i64) -> DateTime<Utc> {
        let nanos = (micros.clamp(0, 999_999) * 1_000) as u32;
        Utc.timestamp_opt(secs, nanos).single().unwrap_or_else(Utc::now)
    }

}
