use crate::models::domain::{Binding, MacAddr};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    Accepted,
    /// The IP moved to a new MAC; carries the MAC it was bound to before.
    Conflict(MacAddr),
}

#[derive(Debug, Default)]
pub struct BindingTable {
    entries: Vec<Binding>,
    index: HashMap<Ipv4Addr, usize>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, ip: Ipv4Addr, mac: MacAddr, at: DateTime<Utc>) -> UpdateResult {
        let Some(&slot) = self.index.get(&ip) else {
            self.insert(ip, mac, at);
            return UpdateResult::Accepted;
        };

        let binding = &mut self.entries[slot];
        if binding.last_seen < at {
            binding.last_seen = at;
        }
        if binding.current_mac == mac {
            return UpdateResult::Accepted;
        }

        let previous = binding.current_mac;
        binding.current_mac = mac;
        binding.mac_history.push((mac, at));
        UpdateResult::Conflict(previous)
    }

    /// Loads a trusted binding; a no-op when the IP is already known.
    pub fn seed(&mut self, ip: Ipv4Addr, mac: MacAddr, at: DateTime<Utc>) {
        if !self.index.contains_key(&ip) {
            self.insert(ip, mac, at);
        }
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<&Binding> {
        self.index.get(&ip).map(|&slot| &self.entries[slot])
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.index.contains_key(&ip)
    }

    pub fn snapshot(&self) -> Vec<Binding> {
        self.entries.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    fn insert(&mut self, ip: Ipv4Addr, mac: MacAddr, at: DateTime<Utc>) {
        self.index.insert(ip, self.entries.len());
        self.entries.push(Binding {
            ip,
            current_mac: mac,
            first_seen: at,
            last_seen: at,
            mac_history: vec![(mac, at)],
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0x02, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_first_observation_and_refresh() {
        let mut table = BindingTable::new();
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        let t0 = Utc::now();

        assert_eq!(table.update(ip, mac(1), t0), UpdateResult::Accepted);
        for i in 1..50 {
            let at = t0 + Duration::seconds(i);
            assert_eq!(table.update(ip, mac(1), at), UpdateResult::Accepted);
        }

        let binding = table.lookup(ip).unwrap();
        assert_eq!(binding.current_mac, mac(1));
        assert_eq!(binding.first_seen, t0);
        assert_eq!(binding.last_seen, t0 + Duration::seconds(49));
        assert_eq!(binding.mac_history.len(), 1);
    }

    #[test]
    fn test_conflict_records_history() {
        let mut table = BindingTable::new();
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(1);

        table.update(ip, mac(1), t0);
        assert_eq!(table.update(ip, mac(2), t1), UpdateResult::Conflict(mac(1)));

        let binding = table.lookup(ip).unwrap();
        assert_eq!(binding.current_mac, mac(2));
        assert_eq!(binding.mac_history, vec![(mac(1), t0), (mac(2), t1)]);
        assert_eq!(binding.mac_history.last().unwrap().0, binding.current_mac);
        assert_eq!(binding.original_mac(), mac(1));
        assert!(!binding.is_unchanged());
    }

    #[test]
    fn test_snapshot_keeps_insertion_order() {
        let mut table = BindingTable::new();
        let now = Utc::now();
        for last in [9u8, 3, 7, 1] {
            table.update(Ipv4Addr::new(10, 0, 0, last), mac(last), now);
        }
        table.update(Ipv4Addr::new(10, 0, 0, 3), mac(42), now);

        let ips: Vec<_> = table.snapshot().iter().map(|b| b.ip.octets()[3]).collect();
        assert_eq!(ips, vec![9, 3, 7, 1]);
    }

    #[test]
    fn test_seed_and_reset() {
        let mut table = BindingTable::new();
        let ip = Ipv4Addr::new(192, 168, 1, 1);
        let now = Utc::now();

        table.seed(ip, mac(1), now);
        table.seed(ip, mac(2), now);
        assert_eq!(table.lookup(ip).unwrap().current_mac, mac(1));
        assert_eq!(table.update(ip, mac(3), now), UpdateResult::Conflict(mac(1)));

        table.reset();
        assert!(table.is_empty());
        assert!(table.lookup(ip).is_none());
        assert_eq!(table.update(ip, mac(3), now), UpdateResult::Accepted);
    }
}
