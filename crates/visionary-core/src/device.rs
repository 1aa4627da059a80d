//! Device types for sensors answering an AutoIP scan

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

use crate::visionary_type::VisionaryType;

/// Protocol family of a device, selected by the format of its scan reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolGeneration {
    /// CoLa-1 devices, answering with XML reports
    Generation1,
    /// CoLa-2 devices, answering with binary reports
    Generation2,
}

impl fmt::Display for ProtocolGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generation1 => write!(f, "CoLa-1"),
            Self::Generation2 => write!(f, "CoLa-2"),
        }
    }
}

/// Session authentication scheme a device expects on its control channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthGeneration {
    #[default]
    Legacy,
    Secure,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacParseError {
    #[error("expected 6 colon-separated octets, got {0}")]
    OctetCount(usize),
    #[error("invalid octet '{0}'")]
    InvalidOctet(String),
}

/// 48-bit hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// All-ones address, used as the target of discovery telegrams
    pub const BROADCAST: Self = Self([0xFF; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(MacParseError::OctetCount(parts.len()));
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(&parts) {
            if part.is_empty() || part.len() > 2 {
                return Err(MacParseError::InvalidOctet(part.to_string()));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| MacParseError::InvalidOctet(part.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Information a device reported in answer to a scan
///
/// Only produced by a successful decode, so the MAC address is always valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Protocol family (also selects the AutoIP configuration format)
    pub protocol: ProtocolGeneration,
    /// Authentication scheme of the control channel
    pub auth: AuthGeneration,
    /// Device type name, e.g. "Visionary-T Mini CX"
    pub device_ident: String,
    pub serial_number: String,
    pub order_number: String,
    pub mac_address: MacAddress,
    /// Control channel port
    pub control_port: u16,
    pub ip_address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dhcp_enabled: bool,
    /// Time the device needs after an IP change before it is reachable again
    pub reconfiguration_time_ms: u32,
}

impl DeviceInfo {
    /// Create a record with only protocol and MAC address set
    pub fn new(protocol: ProtocolGeneration, mac_address: MacAddress) -> Self {
        Self {
            protocol,
            auth: AuthGeneration::Legacy,
            device_ident: String::new(),
            serial_number: String::new(),
            order_number: String::new(),
            mac_address,
            control_port: 0,
            ip_address: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            dhcp_enabled: false,
            reconfiguration_time_ms: 0,
        }
    }

    /// Canonical colon-separated form of the MAC address
    pub fn mac_string(&self) -> String {
        self.mac_address.to_string()
    }

    /// Product type derived from the reported device identifier
    pub fn visionary_type(&self) -> Option<VisionaryType> {
        VisionaryType::from_device_ident(&self.device_ident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_display_is_lowercase_colon_separated() {
        let mac = MacAddress([0x00, 0x06, 0x77, 0xAB, 0x0C, 0xFF]);
        assert_eq!(mac.to_string(), "00:06:77:ab:0c:ff");
    }

    #[test]
    fn test_mac_parse_accepts_uppercase() {
        let mac: MacAddress = "00:06:77:AB:0C:FF".parse().unwrap();
        assert_eq!(mac.octets(), [0x00, 0x06, 0x77, 0xAB, 0x0C, 0xFF]);
    }

    #[test]
    fn test_mac_parse_rejects_bad_input() {
        assert_eq!(
            "00:06:77:ab:0c".parse::<MacAddress>(),
            Err(MacParseError::OctetCount(5))
        );
        assert!("00:06:77:ab:0c:zz".parse::<MacAddress>().is_err());
        assert!("00:06:77:ab:0c:123".parse::<MacAddress>().is_err());
        assert!("00:06::ab:0c:12".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_device_info_defaults() {
        let info = DeviceInfo::new(ProtocolGeneration::Generation2, MacAddress::BROADCAST);
        assert_eq!(info.auth, AuthGeneration::Legacy);
        assert_eq!(AuthGeneration::default(), AuthGeneration::Legacy);
        assert_eq!(info.mac_string(), "ff:ff:ff:ff:ff:ff");
        assert_eq!(info.ip_address, Ipv4Addr::UNSPECIFIED);
        assert!(!info.dhcp_enabled);
    }
}
