//! Local IPv4 interface enumeration

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use serde::Serialize;
use std::net::Ipv4Addr;

/// IPv4 interface a scan can be bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub ip: Ipv4Addr,
    pub prefix_len: u8,
}

/// Interfaces with an IPv4 address, excluding loopback and container bridges
pub fn list_interfaces() -> anyhow::Result<Vec<InterfaceInfo>> {
    let interfaces = NetworkInterface::show()?
        .into_iter()
        .flat_map(|iface| {
            let name = iface.name;
            iface
                .addr
                .into_iter()
                .filter_map(move |addr| match addr {
                    Addr::V4(v4) => Some(InterfaceInfo {
                        name: name.clone(),
                        ip: v4.ip,
                        prefix_len: v4.netmask.map(prefix_len).unwrap_or(24),
                    }),
                    Addr::V6(_) => None,
                })
        })
        .filter(is_scannable)
        .collect();
    Ok(interfaces)
}

fn prefix_len(netmask: Ipv4Addr) -> u8 {
    u32::from(netmask).count_ones() as u8
}

fn is_scannable(iface: &InterfaceInfo) -> bool {
    !iface.ip.is_loopback()
        && !iface.name.starts_with("docker")
        && !iface.name.starts_with("br-")
        && !iface.name.starts_with("veth")
}
