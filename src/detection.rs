//! ARP spoofing detection.
//!
//! The [`Detector`] owns the binding table, resolution statistics used for
//! gateway inference, the event log, and the per-session state: recent MAC
//! claims and the live alert set. Stopping a session only drops the latter.
//!
//! Each IP moves through `Unknown -> Bound -> Conflicted -> Bound`. A conflict
//! is a frame binding a known IP to a MAC other than its current one. The
//! detector names an attacker when the new MAC recently claimed some other IP
//! that is still bound to that MAC as its original address.

use crate::binding::{BindingTable, UpdateResult};
use crate::claims::{within, ClaimIndex};
use crate::config::{DetectionConfig, StaticBinding};
use crate::error::{MonitorError, Result};
use crate::event_log::{EventDraft, EventLog};
use crate::models::domain::{ArpFrame, ArpOperation, MacAddr, SpoofEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Unknown,
    Bound,
    Conflicted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConflict {
    pub victim: Ipv4Addr,
    pub old_mac: MacAddr,
    pub new_mac: MacAddr,
    pub attacker_ip: Option<Ipv4Addr>,
    pub since: DateTime<Utc>,
    pub last_conflict: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectorStats {
    pub frames: u64,
    pub probes: u64,
    pub conflicts: u64,
    pub settled: u64,
}

#[derive(Debug)]
pub struct Detector {
    config: DetectionConfig,
    bindings: BindingTable,
    claims: ClaimIndex,
    alerts: HashMap<Ipv4Addr, ActiveConflict>,
    /// Responder IP -> distinct IPs it resolved for.
    resolvers: HashMap<Ipv4Addr, HashSet<Ipv4Addr>>,
    log: EventLog,
    stats: DetectorStats,
}

impl Detector {
    pub fn new(config: DetectionConfig) -> Self {
        let log = EventLog::with_capacity(config.log_capacity, config.overflow);
        Self {
            config,
            bindings: BindingTable::new(),
            claims: ClaimIndex::new(),
            alerts: HashMap::new(),
            resolvers: HashMap::new(),
            log,
            stats: DetectorStats::default(),
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Runs one frame through the engine.
    ///
    /// Returns the logged event when the frame rebinds a known IP. A frame is
    /// committed whole or not at all: when the log refuses the event nothing
    /// is changed and `LogFull` is returned.
    pub fn process(&mut self, frame: &ArpFrame) -> Result<Option<SpoofEvent>> {
        if !frame.sender_mac.is_unicast_host() {
            return Err(MonitorError::MalformedFrame(format!(
                "sender MAC {} is not a host address",
                frame.sender_mac
            )));
        }

        let ip = frame.sender_ip;
        let mac = frame.sender_mac;
        let now = frame.observed_at;

        let rebinds = self
            .bindings
            .lookup(ip)
            .is_some_and(|binding| binding.current_mac != mac);
        if rebinds && self.log.would_reject() {
            return Err(MonitorError::LogFull {
                capacity: self.config.log_capacity.unwrap_or_default(),
            });
        }

        self.stats.frames += 1;
        self.settle(now);

        if let Some(link) = frame.link_source {
            if link != mac {
                warn!(
                    sender_ip = %ip,
                    sender_mac = %mac,
                    link_source = %link,
                    "ARP sender differs from Ethernet source"
                );
            }
        }

        self.record_resolution(frame);

        if ip.is_unspecified() {
            // Address probe: no binding is asserted.
            self.stats.probes += 1;
            return Ok(None);
        }

        self.claims.add(mac, ip, now, self.config.cross_claim_window);

        match self.bindings.update(ip, mac, now) {
            UpdateResult::Accepted => {
                self.attribute_late_claim(ip, mac);
                Ok(None)
            }
            UpdateResult::Conflict(old_mac) => self.on_conflict(frame, old_mac).map(Some),
        }
    }

    fn on_conflict(&mut self, frame: &ArpFrame, old_mac: MacAddr) -> Result<SpoofEvent> {
        let victim = frame.sender_ip;
        let new_mac = frame.sender_mac;
        let now = frame.observed_at;
        self.stats.conflicts += 1;

        let attacker_ip = self.find_attacker(victim, new_mac, now);
        let event = self.log.append(EventDraft {
            ip: victim,
            old_mac,
            new_mac,
            attacker_ip,
            timestamp: now,
        })?;

        let alert = self.alerts.entry(victim).or_insert_with(|| ActiveConflict {
            victim,
            old_mac,
            new_mac,
            attacker_ip,
            since: now,
            last_conflict: now,
        });
        let carried = if alert.new_mac == new_mac { alert.attacker_ip } else { None };
        alert.old_mac = old_mac;
        alert.new_mac = new_mac;
        alert.attacker_ip = attacker_ip.or(carried);
        alert.last_conflict = now;

        match attacker_ip {
            Some(attacker) => warn!(
                sequence = event.sequence,
                victim = %victim,
                old_mac = %old_mac,
                new_mac = %new_mac,
                attacker = %attacker,
                operation = ?frame.operation,
                "ARP spoofing detected"
            ),
            None => warn!(
                sequence = event.sequence,
                victim = %victim,
                old_mac = %old_mac,
                new_mac = %new_mac,
                operation = ?frame.operation,
                "conflicting ARP binding, attacker unknown"
            ),
        }

        Ok(event)
    }

    /// The IP whose original MAC is `mac` and which `mac` claimed within the window.
    fn find_attacker(&self, victim: Ipv4Addr, mac: MacAddr, now: DateTime<Utc>) -> Option<Ipv4Addr> {
        self.claims
            .recent_claims(mac, victim, now, self.config.cross_claim_window)
            .into_iter()
            .find(|claim| {
                self.bindings
                    .lookup(claim.ip)
                    .is_some_and(|binding| binding.is_unchanged() && binding.current_mac == mac)
            })
            .map(|claim| claim.ip)
    }

    /// A MAC behind an active conflict shows up as the original owner of another IP.
    fn attribute_late_claim(&mut self, ip: Ipv4Addr, mac: MacAddr) {
        let owns_ip = self
            .bindings
            .lookup(ip)
            .is_some_and(|binding| binding.is_unchanged() && binding.current_mac == mac);
        if !owns_ip {
            return;
        }
        for alert in self.alerts.values_mut() {
            if alert.attacker_ip.is_none() && alert.new_mac == mac && alert.victim != ip {
                info!(victim = %alert.victim, attacker = %ip, mac = %mac, "attacker identified");
                alert.attacker_ip = Some(ip);
            }
        }
    }

    fn record_resolution(&mut self, frame: &ArpFrame) {
        if frame.is_gratuitous() {
            return;
        }
        let (responder, requester) = match frame.operation {
            ArpOperation::Request => (frame.target_ip, frame.sender_ip),
            ArpOperation::Reply => (frame.sender_ip, frame.target_ip),
        };
        if responder.is_unspecified() || requester.is_unspecified() {
            return;
        }
        self.resolvers.entry(responder).or_default().insert(requester);
    }

    fn settle(&mut self, now: DateTime<Utc>) {
        let Some(quiet) = self.config.settle_after else {
            return;
        };
        let before = self.alerts.len();
        self.alerts.retain(|victim, alert| {
            let active = within(now, alert.last_conflict, quiet);
            if !active {
                info!(victim = %victim, mac = %alert.new_mac, "conflict settled");
            }
            active
        });
        self.stats.settled += (before - self.alerts.len()) as u64;
    }

    pub fn seed(&mut self, bindings: &[StaticBinding], at: DateTime<Utc>) {
        for binding in bindings {
            debug!(ip = %binding.ip, mac = %binding.mac, "seeding static binding");
            self.bindings.seed(binding.ip, binding.mac, at);
        }
    }

    pub fn state_of(&self, ip: Ipv4Addr) -> HostState {
        if self.alerts.contains_key(&ip) {
            HostState::Conflicted
        } else if self.bindings.contains(ip) {
            HostState::Bound
        } else {
            HostState::Unknown
        }
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn alerts(&self) -> impl Iterator<Item = &ActiveConflict> {
        self.alerts.values()
    }

    pub fn is_victim(&self, ip: Ipv4Addr) -> bool {
        self.alerts.contains_key(&ip)
    }

    pub fn is_attacker(&self, ip: Ipv4Addr) -> bool {
        self.alerts.values().any(|alert| alert.attacker_ip == Some(ip))
    }

    pub fn resolution_counts(&self) -> impl Iterator<Item = (Ipv4Addr, usize)> + '_ {
        self.resolvers.iter().map(|(ip, peers)| (*ip, peers.len()))
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    /// Ends a session: drops active alerts and recent claims. Known bindings
    /// and the event log are kept.
    pub fn clear_alerts(&mut self) {
        self.claims.clear();
        self.alerts.clear();
    }

    /// Forgets everything: bindings, resolution stats and the event log.
    pub fn reset_all(&mut self) {
        self.clear_alerts();
        self.bindings.reset();
        self.resolvers.clear();
        self.log.clear();
        self.stats = DetectorStats::default();
    }
}
