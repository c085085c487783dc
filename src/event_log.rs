use crate::config::OverflowPolicy;
use crate::error::{MonitorError, Result};
use crate::models::domain::{MacAddr, SpoofEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use tracing::warn;

pub const CSV_HEADER: [&str; 5] = ["Victim IP", "Old MAC", "New MAC", "Attacker IP", "Timestamp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub ip: Ipv4Addr,
    pub old_mac: MacAddr,
    pub new_mac: MacAddr,
    pub attacker_ip: Option<Ipv4Addr>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<SpoofEvent>,
    next_sequence: u64,
    capacity: Option<usize>,
    policy: OverflowPolicy,
    evicted: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl EventLog {
    pub fn unbounded() -> Self {
        Self::with_capacity(None, OverflowPolicy::Evict)
    }

    pub fn with_capacity(capacity: Option<usize>, policy: OverflowPolicy) -> Self {
        Self {
            events: VecDeque::new(),
            next_sequence: 1,
            capacity,
            policy,
            evicted: 0,
        }
    }

    /// True when the next append would fail with `LogFull`.
    pub fn would_reject(&self) -> bool {
        matches!(
            (self.capacity, self.policy),
            (Some(cap), OverflowPolicy::Reject) if self.events.len() >= cap
        )
    }

    pub fn append(&mut self, draft: EventDraft) -> Result<SpoofEvent> {
        if let Some(capacity) = self.capacity {
            if self.events.len() >= capacity {
                match self.policy {
                    OverflowPolicy::Reject => return Err(MonitorError::LogFull { capacity }),
                    OverflowPolicy::Evict => {
                        if let Some(oldest) = self.events.pop_front() {
                            self.evicted += 1;
                            warn!(
                                sequence = oldest.sequence,
                                victim = %oldest.ip,
                                capacity,
                                "event log full, evicted oldest event"
                            );
                        }
                    }
                }
            }
        }

        let event = SpoofEvent {
            sequence: self.next_sequence,
            ip: draft.ip,
            old_mac: draft.old_mac,
            new_mac: draft.new_mac,
            attacker_ip: draft.attacker_ip,
            timestamp: draft.timestamp,
        };
        self.next_sequence += 1;
        self.events.push_back(event.clone());
        Ok(event)
    }

    /// Events with a sequence greater than `since`, oldest first.
    pub fn list(&self, since: Option<u64>) -> Vec<SpoofEvent> {
        let floor = since.unwrap_or(0);
        // Sequences are ascending, so everything past the partition point qualifies.
        let start = self.events.partition_point(|event| event.sequence <= floor);
        self.events.range(start..).cloned().collect()
    }

    /// Drops all events. Sequence numbers keep counting up.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.events.back().map(|event| event.sequence)
    }

    pub fn to_csv(&self) -> String {
        render_csv(self.events.iter())
    }
}

pub fn render_csv<'a>(events: impl IntoIterator<Item = &'a SpoofEvent>) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push('\n');
    for event in events {
        let attacker = event.attacker_ip.map(|ip| ip.to_string()).unwrap_or_default();
        let fields = [
            event.ip.to_string(),
            event.old_mac.to_string(),
            event.new_mac.to_string(),
            attacker,
            event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        ];
        let row: Vec<String> = fields.iter().map(|field| quote(field)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
