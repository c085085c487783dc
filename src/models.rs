pub mod domain {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct MacAddr(pub [u8; 6]);

    impl MacAddr {
        pub const ZERO: MacAddr = MacAddr([0; 6]);
        pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

        pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
            let octets: [u8; 6] = bytes.try_into().ok()?;
            Some(MacAddr(octets))
        }

        pub fn is_zero(&self) -> bool {
            *self == Self::ZERO
        }

        /// Group bit set; covers broadcast as well.
        pub fn is_multicast(&self) -> bool {
            self.0[0] & 0x01 != 0
        }

        /// True when the address can be the hardware address of a single host.
        pub fn is_unicast_host(&self) -> bool {
            !self.is_zero() && !self.is_multicast()
        }
    }

    impl fmt::Display for MacAddr {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let m = &self.0;
            write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                m[0], m[1], m[2], m[3], m[4], m[5]
            )
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ParseMacError(pub String);

    impl fmt::Display for ParseMacError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "invalid MAC address: {}", self.0)
        }
    }

    impl std::error::Error for ParseMacError {}

    impl FromStr for MacAddr {
        type Err = ParseMacError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let parts: Vec<&str> = s.split(|c| c == ':' || c == '-').collect();
            if parts.len() != 6 {
                return Err(ParseMacError(s.to_string()));
            }
            let mut octets = [0u8; 6];
            for (slot, part) in octets.iter_mut().zip(parts) {
                if part.is_empty() || part.len() > 2 {
                    return Err(ParseMacError(s.to_string()));
                }
                *slot = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
            }
            Ok(MacAddr(octets))
        }
    }

    impl Serialize for MacAddr {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(self)
        }
    }

    impl<'de> Deserialize<'de> for MacAddr {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let raw = String::deserialize(deserializer)?;
            raw.parse().map_err(serde::de::Error::custom)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ArpOperation {
        Request,
        Reply,
    }

    impl ArpOperation {
        pub fn from_code(code: u16) -> Option<Self> {
            match code {
                1 => Some(ArpOperation::Request),
                2 => Some(ArpOperation::Reply),
                _ => None,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ArpFrame {
        pub operation: ArpOperation,
        pub sender_ip: Ipv4Addr,
        pub sender_mac: MacAddr,
        pub target_ip: Ipv4Addr,
        pub target_mac: MacAddr,
        pub observed_at: DateTime<Utc>,
        /// Ethernet source address, when the frame came off the wire.
        pub link_source: Option<MacAddr>,
    }

    impl ArpFrame {
        pub fn request(sender_ip: Ipv4Addr, sender_mac: MacAddr, target_ip: Ipv4Addr, observed_at: DateTime<Utc>) -> Self {
            ArpFrame {
                operation: ArpOperation::Request,
                sender_ip,
                sender_mac,
                target_ip,
                target_mac: MacAddr::ZERO,
                observed_at,
                link_source: None,
            }
        }

        pub fn reply(
            sender_ip: Ipv4Addr,
            sender_mac: MacAddr,
            target_ip: Ipv4Addr,
            target_mac: MacAddr,
            observed_at: DateTime<Utc>,
        ) -> Self {
            ArpFrame {
                operation: ArpOperation::Reply,
                sender_ip,
                sender_mac,
                target_ip,
                target_mac,
                observed_at,
                link_source: None,
            }
        }

        pub fn is_gratuitous(&self) -> bool {
            self.sender_ip == self.target_ip
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct Binding {
        pub ip: Ipv4Addr,
        pub current_mac: MacAddr,
        pub first_seen: DateTime<Utc>,
        pub last_seen: DateTime<Utc>,
        /// Oldest first; the last entry is always `current_mac`.
        pub mac_history: Vec<(MacAddr, DateTime<Utc>)>,
    }

    impl Binding {
        pub fn original_mac(&self) -> MacAddr {
            self.mac_history.first().map(|(mac, _)| *mac).unwrap_or(self.current_mac)
        }

        /// Bound to the MAC it was first seen with, never changed since.
        pub fn is_unchanged(&self) -> bool {
            self.mac_history.len() == 1
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Device {
        pub ip: Ipv4Addr,
        pub mac: MacAddr,
        pub is_gateway: bool,
        pub attacked: bool,
        pub is_attacker: bool,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SpoofEvent {
        pub sequence: u64,
        pub ip: Ipv4Addr,
        pub old_mac: MacAddr,
        pub new_mac: MacAddr,
        pub attacker_ip: Option<Ipv4Addr>,
        pub timestamp: DateTime<Utc>,
    }
}

pub mod dto {
    use super::domain::{Device, MacAddr, SpoofEvent};
    use chrono::SecondsFormat;
    use serde::{Deserialize, Serialize};
    use std::net::Ipv4Addr;

    /// Version of the record layouts below, sent as `X-Schema-Version`.
    pub const SCHEMA_VERSION: u32 = 1;

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
    pub struct DeviceDTO {
        pub ip: Ipv4Addr,
        pub mac: MacAddr,
        pub is_gateway: bool,
        pub attacked: bool,
        pub is_attacker: bool,
    }

    impl From<Device> for DeviceDTO {
        fn from(device: Device) -> Self {
            DeviceDTO {
                ip: device.ip,
                mac: device.mac,
                is_gateway: device.is_gateway,
                attacked: device.attacked,
                is_attacker: device.is_attacker,
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
    pub struct SpoofEventDTO {
        pub ip: Ipv4Addr,
        pub old_mac: MacAddr,
        pub new_mac: MacAddr,
        pub attacker_ip: Option<Ipv4Addr>,
        pub timestamp: String,
    }

    impl From<&SpoofEvent> for SpoofEventDTO {
        fn from(event: &SpoofEvent) -> Self {
            SpoofEventDTO {
                ip: event.ip,
                old_mac: event.old_mac,
                new_mac: event.new_mac,
                attacker_ip: event.attacker_ip,
                timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            }
        }
    }
}
