//! Recent MAC -> IP claims, for tying a spoofed MAC back to its owner's IP.

use crate::models::domain::MacAddr;
use chrono::{DateTime, Utc};
use multimap::MultiMap;
use std::net::Ipv4Addr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub ip: Ipv4Addr,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ClaimIndex {
    entries: MultiMap<MacAddr, Claim>,
    last_sweep: Option<DateTime<Utc>>,
}

/// `then` is within `window` of `now`. Frames stamped out of order count as recent.
pub fn within(now: DateTime<Utc>, then: DateTime<Utc>, window: Duration) -> bool {
    match (now - then).to_std() {
        Ok(elapsed) => elapsed <= window,
        Err(_) => true,
    }
}

impl ClaimIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `mac` asserted ownership of `ip`, dropping its claims older than `window`.
    pub fn add(&mut self, mac: MacAddr, ip: Ipv4Addr, at: DateTime<Utc>, window: Duration) {
        self.sweep(at, window);
        if let Some(claims) = self.entries.get_vec_mut(&mac) {
            claims.retain(|claim| within(at, claim.at, window));
            if let Some(existing) = claims.iter_mut().find(|claim| claim.ip == ip) {
                if existing.at < at {
                    existing.at = at;
                }
                return;
            }
        }
        self.entries.insert(mac, Claim { ip, at });
    }

    /// Drops stale claims of every MAC, at most once per window.
    fn sweep(&mut self, now: DateTime<Utc>, window: Duration) {
        if self.last_sweep.is_some_and(|last| within(now, last, window)) {
            return;
        }
        self.entries.retain(|_, claim| within(now, claim.at, window));
        self.last_sweep = Some(now);
    }

    /// Claims by `mac` on IPs other than `exclude` seen within `window` of `now`, newest first.
    pub fn recent_claims(&self, mac: MacAddr, exclude: Ipv4Addr, now: DateTime<Utc>, window: Duration) -> Vec<Claim> {
        let mut claims: Vec<Claim> = self
            .entries
            .get_vec(&mac)
            .map(|claims| {
                claims
                    .iter()
                    .filter(|claim| claim.ip != exclude && within(now, claim.at, window))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        claims.sort_by(|a, b| b.at.cmp(&a.at));
        claims
    }

    pub fn macs(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_sweep = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const WINDOW: Duration = Duration::from_secs(60);

    fn mac() -> MacAddr {
        MacAddr([0x02, 0, 0, 0, 0, 0xcc])
    }

    #[test]
    fn test_recent_claims_excludes_victim_and_stale() {
        let mut index = ClaimIndex::new();
        let t0 = Utc::now();
        let victim = Ipv4Addr::new(10, 0, 0, 5);
        let own = Ipv4Addr::new(10, 0, 0, 66);
        let stale = Ipv4Addr::new(10, 0, 0, 77);

        index.add(mac(), stale, t0, WINDOW);
        index.add(mac(), own, t0 + ChronoDuration::seconds(90), WINDOW);
        index.add(mac(), victim, t0 + ChronoDuration::seconds(100), WINDOW);

        let now = t0 + ChronoDuration::seconds(100);
        let claims = index.recent_claims(mac(), victim, now, WINDOW);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].ip, own);
    }

    #[test]
    fn test_repeat_claim_refreshes_timestamp() {
        let mut index = ClaimIndex::new();
        let t0 = Utc::now();
        let ip = Ipv4Addr::new(10, 0, 0, 66);

        index.add(mac(), ip, t0, WINDOW);
        index.add(mac(), ip, t0 + ChronoDuration::seconds(30), WINDOW);

        let later = t0 + ChronoDuration::seconds(80);
        let claims = index.recent_claims(mac(), Ipv4Addr::UNSPECIFIED, later, WINDOW);
        assert_eq!(claims, vec![Claim { ip, at: t0 + ChronoDuration::seconds(30) }]);
        assert_eq!(index.macs(), 1);
    }

    #[test]
    fn test_macs_that_go_quiet_are_dropped() {
        let mut index = ClaimIndex::new();
        let t0 = Utc::now();
        for i in 0..10_000u32 {
            let [_, a, b, c] = i.to_be_bytes();
            let at = t0 + ChronoDuration::hours(i as i64);
            index.add(MacAddr([0x02, 0, 0, a, b, c]), Ipv4Addr::from(0x0a00_0000 + i), at, WINDOW);
        }
        assert_eq!(index.macs(), 1);
    }

    #[test]
    fn test_sweep_keeps_claims_inside_window() {
        let mut index = ClaimIndex::new();
        let t0 = Utc::now();
        let quiet = MacAddr([0x02, 0, 0, 0, 0, 0x01]);

        index.add(quiet, Ipv4Addr::new(10, 0, 0, 1), t0, WINDOW);
        index.add(mac(), Ipv4Addr::new(10, 0, 0, 2), t0 + ChronoDuration::seconds(61), WINDOW);
        index.add(mac(), Ipv4Addr::new(10, 0, 0, 3), t0 + ChronoDuration::seconds(90), WINDOW);
        assert_eq!(index.macs(), 1);

        let now = t0 + ChronoDuration::seconds(90);
        assert_eq!(index.recent_claims(mac(), Ipv4Addr::UNSPECIFIED, now, WINDOW).len(), 2);
    }

    #[test]
    fn test_within_handles_reordered_frames() {
        let t0 = Utc::now();
        assert!(within(t0, t0 + ChronoDuration::seconds(5), WINDOW));
        assert!(within(t0 + ChronoDuration::seconds(60), t0, WINDOW));
        assert!(!within(t0 + ChronoDuration::seconds(61), t0, WINDOW));
    }
}
