use crate::error::{MonitorError, Result};
use crate::models::domain::{ArpFrame, ArpOperation, MacAddr};
use chrono::{DateTime, Utc};
use etherparse::{ArpHardwareId, ArpPacket, ArpPacketSlice, EtherType, Ethernet2Header, PacketBuilder};
use std::net::Ipv4Addr;

/// Decodes an Ethernet II frame. `Ok(None)` for anything that is not ARP.
pub fn parse_ethernet(data: &[u8], observed_at: DateTime<Utc>) -> Result<Option<ArpFrame>> {
    let (eth, payload) = Ethernet2Header::from_slice(data)
        .map_err(|e| MonitorError::MalformedFrame(format!("ethernet header: {}", e)))?;

    if eth.ether_type != EtherType::ARP {
        return Ok(None);
    }

    let mut frame = parse_arp(payload, observed_at)?;
    frame.link_source = Some(MacAddr(eth.source));
    Ok(Some(frame))
}

/// Decodes an IPv4-over-Ethernet ARP payload.
pub fn parse_arp(payload: &[u8], observed_at: DateTime<Utc>) -> Result<ArpFrame> {
    let arp = ArpPacketSlice::from_slice(payload)
        .map_err(|e| MonitorError::MalformedFrame(format!("ARP header: {}", e)))?;

    if arp.hw_addr_type() != ArpHardwareId::ETHERNET || arp.proto_addr_type() != EtherType::IPV4 {
        return Err(MonitorError::MalformedFrame(format!(
            "unsupported ARP format hardware={:?} protocol={:?}",
            arp.hw_addr_type(),
            arp.proto_addr_type()
        )));
    }

    let code = arp.operation().0;
    let operation = ArpOperation::from_code(code)
        .ok_or_else(|| MonitorError::MalformedFrame(format!("unknown ARP operation {}", code)))?;

    Ok(ArpFrame {
        operation,
        sender_mac: hardware_addr(arp.sender_hw_addr())?,
        sender_ip: protocol_addr(arp.sender_protocol_addr())?,
        target_mac: hardware_addr(arp.target_hw_addr())?,
        target_ip: protocol_addr(arp.target_protocol_addr())?,
        observed_at,
        link_source: None,
    })
}

fn hardware_addr(bytes: &[u8]) -> Result<MacAddr> {
    MacAddr::from_bytes(bytes)
        .ok_or_else(|| MonitorError::MalformedFrame(format!("hardware address of {} bytes", bytes.len())))
}

fn protocol_addr(bytes: &[u8]) -> Result<Ipv4Addr> {
    <[u8; 4]>::try_from(bytes)
        .map(Ipv4Addr::from)
        .map_err(|_| MonitorError::MalformedFrame(format!("protocol address of {} bytes", bytes.len())))
}

/// Builds an Ethernet II ARP frame. Used by replay fixtures and tests.
pub fn encode_ethernet(frame: &ArpFrame) -> Result<Vec<u8>> {
    let destination = match frame.operation {
        ArpOperation::Request => MacAddr::BROADCAST,
        ArpOperation::Reply => frame.target_mac,
    };
    let source = frame.link_source.unwrap_or(frame.sender_mac);
    let operation = match frame.operation {
        ArpOperation::Request => etherparse::ArpOperation::REQUEST,
        ArpOperation::Reply => etherparse::ArpOperation::REPLY,
    };

    let arp = ArpPacket::new(
        ArpHardwareId::ETHERNET,
        EtherType::IPV4,
        operation,
        &frame.sender_mac.0,
        &frame.sender_ip.octets(),
        &frame.target_mac.0,
        &frame.target_ip.octets(),
    )
    .map_err(|e| MonitorError::MalformedFrame(format!("ARP packet: {:?}", e)))?;

    let builder = PacketBuilder::ethernet2(source.0, destination.0).arp(arp);
    let mut out = Vec::with_capacity(builder.size());
    builder
        .write(&mut out)
        .map_err(|e| MonitorError::MalformedFrame(format!("write frame: {:?}", e)))?;
    Ok(out)
}
