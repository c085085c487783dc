use crate::detection::Detector;
use crate::models::domain::Device;
use std::cmp::Reverse;
use std::net::Ipv4Addr;

pub fn snapshot(detector: &Detector) -> Vec<Device> {
    let gateway = gateway_ip(detector);
    detector
        .bindings()
        .iter()
        .map(|binding| Device {
            ip: binding.ip,
            mac: binding.current_mac,
            is_gateway: Some(binding.ip) == gateway,
            attacked: detector.is_victim(binding.ip),
            is_attacker: detector.is_attacker(binding.ip),
        })
        .collect()
}

/// The configured gateway when it has been seen, otherwise the inferred one.
pub fn gateway_ip(detector: &Detector) -> Option<Ipv4Addr> {
    match detector.config().gateway {
        Some(configured) => detector.bindings().contains(configured).then_some(configured),
        None => infer_gateway(detector),
    }
}

/// The bound IP resolving for the most distinct peers; ties go to the lowest address.
pub fn infer_gateway(detector: &Detector) -> Option<Ipv4Addr> {
    detector
        .resolution_counts()
        .filter(|(ip, peers)| *peers > 0 && detector.bindings().contains(*ip))
        .max_by_key(|(ip, peers)| (*peers, Reverse(u32::from(*ip))))
        .map(|(ip, _)| ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::models::domain::{ArpFrame, MacAddr};
    use chrono::{Duration, TimeZone, Utc};

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, last)
    }

    fn mac(byte: u8) -> MacAddr {
        MacAddr([0x02, 0, 0, 0, 0, byte])
    }

    fn feed(detector: &mut Detector, frames: &[(u8, u8, u8)]) {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        for (i, (sender, sender_mac, target)) in frames.iter().enumerate() {
            let at = t0 + Duration::seconds(i as i64);
            let frame = ArpFrame::request(ip(*sender), mac(*sender_mac), ip(*target), at);
            detector.process(&frame).unwrap();
        }
    }

    #[test]
    fn test_busiest_responder_is_gateway() {
        let mut detector = Detector::new(DetectionConfig::default());
        feed(
            &mut detector,
            &[(10, 10, 1), (11, 11, 1), (12, 12, 1), (10, 10, 2), (1, 1, 10), (2, 2, 10)],
        );
        let devices = snapshot(&detector);
        let gateways: Vec<_> = devices.iter().filter(|d| d.is_gateway).map(|d| d.ip).collect();
        assert_eq!(gateways, vec![ip(1)]);
    }

    #[test]
    fn test_gateway_tie_breaks_to_lowest_ip() {
        let mut detector = Detector::new(DetectionConfig::default());
        feed(&mut detector, &[(10, 10, 3), (11, 11, 2), (3, 3, 10), (2, 2, 11)]);
        assert_eq!(infer_gateway(&detector), Some(ip(2)));
    }

    #[test]
    fn test_unbound_responder_not_flagged() {
        let mut detector = Detector::new(DetectionConfig::default());
        feed(&mut detector, &[(10, 10, 1), (11, 11, 1)]);
        assert_eq!(gateway_ip(&detector), None);
        assert!(snapshot(&detector).iter().all(|d| !d.is_gateway));
    }

    #[test]
    fn test_configured_gateway_wins() {
        let config = DetectionConfig {
            gateway: Some(ip(11)),
            ..DetectionConfig::default()
        };
        let mut detector = Detector::new(config);
        feed(&mut detector, &[(10, 10, 1), (11, 11, 1), (1, 1, 10)]);
        assert_eq!(gateway_ip(&detector), Some(ip(11)));
    }

    #[test]
    fn test_snapshot_is_stable() {
        let mut detector = Detector::new(DetectionConfig::default());
        feed(&mut detector, &[(10, 10, 1), (11, 11, 1), (12, 12, 1), (1, 1, 12), (10, 99, 1)]);
        let first = serde_json::to_string(&snapshot(&detector)).unwrap();
        let second = serde_json::to_string(&snapshot(&detector)).unwrap();
        assert_eq!(first, second);

        let devices = snapshot(&detector);
        assert_eq!(devices.len(), 4);
        assert!(devices[0].attacked);
        assert_eq!(devices[0].mac, mac(99));
    }
}
