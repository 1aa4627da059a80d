//! XML (CoLa-1) device report and IP configuration documents
//!
//! CoLa-1 devices answer a scan with a `NetScanResult` document and accept an
//! `IPconfig` document to change their network settings. Both carry the MAC
//! address as an attribute of the root element and a flat list of
//! `<Item key=".." value=".."/>` children.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;
use tracing::debug;

use crate::device::{AuthGeneration, DeviceInfo, MacAddress, ProtocolGeneration};
use crate::reader::CodecError;
use crate::telegram::{self, RPL_SCAN_XML};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Item {
    #[serde(rename = "@key")]
    key: String,
    #[serde(rename = "@value")]
    value: String,
}

impl Item {
    fn new(key: &str, value: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Scan reply document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "NetScanResult")]
struct NetScanResult {
    #[serde(rename = "@MACAddr")]
    mac: String,
    #[serde(rename = "Item", default)]
    items: Vec<Item>,
}

/// IP configuration request document
#[derive(Debug, Clone, Serialize)]
#[serde(rename = "IPconfig")]
struct IpConfigDocument {
    #[serde(rename = "@MACAddr")]
    mac: String,
    #[serde(rename = "Item")]
    items: Vec<Item>,
}

fn bool_literal(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, CodecError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| CodecError::InvalidField {
            field,
            reason: format!("'{value}': {e}"),
        })
}

/// Address item of a report; an unparsable value is left unspecified
fn parse_address(field: &'static str, value: &str) -> Ipv4Addr {
    value.trim().parse::<Ipv4Addr>().unwrap_or_else(|e| {
        debug!(field, value, error = %e, "Ignoring unparsable address in XML report");
        Ipv4Addr::UNSPECIFIED
    })
}

/// Decode a `NetScanResult` document
///
/// Fails on a malformed document, a bad MAC address, port or duration.
/// Address items that do not parse are reported as `0.0.0.0`.
pub fn decode_xml_report(document: &[u8]) -> Result<DeviceInfo, CodecError> {
    let text = std::str::from_utf8(document).map_err(|e| CodecError::Xml(e.to_string()))?;
    let result: NetScanResult =
        from_str(text.trim_end_matches('\0')).map_err(|e| CodecError::Xml(e.to_string()))?;

    let mac: MacAddress = parse_field("MACAddr", &result.mac)?;
    let mut info = DeviceInfo::new(ProtocolGeneration::Generation1, mac);
    info.auth = AuthGeneration::Legacy;

    for item in result.items {
        let value = item.value.as_str();
        match item.key.as_str() {
            "IPAddress" => info.ip_address = parse_address("IPAddress", value),
            "IPMask" => info.netmask = parse_address("IPMask", value),
            "IPGateway" => info.gateway = parse_address("IPGateway", value),
            "HostPortNo" => info.control_port = parse_field("HostPortNo", value)?,
            "DeviceType" => info.device_ident = value.to_string(),
            "SerialNumber" => info.serial_number = value.to_string(),
            "OrderNumber" => info.order_number = value.to_string(),
            "DHCPClientEnabled" => info.dhcp_enabled = value == "TRUE",
            "IPConfigDuration" => {
                info.reconfiguration_time_ms = parse_field("IPConfigDuration", value)?
            }
            _ => {}
        }
    }

    Ok(info)
}

/// Encode the `IPconfig` payload for a CoLa-1 device
pub fn encode_xml_ip_config(
    target: MacAddress,
    ip: Ipv4Addr,
    netmask: Ipv4Addr,
    gateway: Ipv4Addr,
    dhcp: bool,
) -> Result<String, CodecError> {
    let document = IpConfigDocument {
        mac: target.to_string(),
        items: vec![
            Item::new("IPAddress", ip),
            Item::new("IPMask", netmask),
            Item::new("IPGateway", gateway),
            Item::new("DHCPClientEnabled", bool_literal(dhcp)),
        ],
    };
    let xml = to_string(&document).map_err(|e| CodecError::Xml(e.to_string()))?;
    Ok(format!("{XML_DECLARATION}{xml}"))
}

/// Encode a `NetScanResult` document the way a CoLa-1 device answers a scan
///
/// Device side of the protocol, for simulating sensors.
pub fn encode_xml_report(info: &DeviceInfo) -> Result<String, CodecError> {
    let result = NetScanResult {
        mac: info.mac_address.to_string(),
        items: vec![
            Item::new("DeviceType", &info.device_ident),
            Item::new("SerialNumber", &info.serial_number),
            Item::new("OrderNumber", &info.order_number),
            Item::new("IPAddress", info.ip_address),
            Item::new("IPMask", info.netmask),
            Item::new("IPGateway", info.gateway),
            Item::new("HostPortNo", info.control_port),
            Item::new("DHCPClientEnabled", bool_literal(info.dhcp_enabled)),
            Item::new("IPConfigDuration", info.reconfiguration_time_ms),
        ],
    };
    let xml = to_string(&result).map_err(|e| CodecError::Xml(e.to_string()))?;
    Ok(format!("{XML_DECLARATION}{xml}"))
}

/// Full XML scan reply datagram, header included
///
/// Device side of the protocol, for simulating sensors.
pub fn encode_xml_reply(telegram_id: u32, info: &DeviceInfo) -> Result<Vec<u8>, CodecError> {
    let document = encode_xml_report(info)?;
    Ok(telegram::encode_reply(
        RPL_SCAN_XML,
        info.mac_address,
        telegram_id,
        document.as_bytes(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN_RESULT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<NetScanResult MACAddr="00:06:77:0A:0B:0C">
    <Item key="DeviceType" value="Visionary-T Mini CX"/>
    <Item key="SerialNumber" value="19230004"/>
    <Item key="OrderNumber" value="1112649"/>
    <Item key="IPAddress" value="192.168.1.10"/>
    <Item key="IPMask" value="255.255.255.0"/>
    <Item key="IPGateway" value="0.0.0.0"/>
    <Item key="HostPortNo" value="2112"/>
    <Item key="DHCPClientEnabled" value="FALSE"/>
    <Item key="IPConfigDuration" value="3000"/>
    <Item key="FirmwareVersion" value="2.1.0"/>
</NetScanResult>"#;

    #[test]
    fn test_decode_scan_result() {
        let info = decode_xml_report(SCAN_RESULT.as_bytes()).unwrap();
        assert_eq!(info.protocol, ProtocolGeneration::Generation1);
        assert_eq!(info.auth, AuthGeneration::Legacy);
        assert_eq!(info.mac_string(), "00:06:77:0a:0b:0c");
        assert_eq!(info.device_ident, "Visionary-T Mini CX");
        assert_eq!(info.serial_number, "19230004");
        assert_eq!(info.order_number, "1112649");
        assert_eq!(info.ip_address, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(info.netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(info.gateway, Ipv4Addr::UNSPECIFIED);
        assert_eq!(info.control_port, 2112);
        assert!(!info.dhcp_enabled);
        assert_eq!(info.reconfiguration_time_ms, 3000);
    }

    #[test]
    fn test_malformed_document_is_decode_failure() {
        let result = decode_xml_report(b"<NetScanResult MACAddr=\"00:06:77:0A:0B:0C\"><Item");
        assert!(matches!(result, Err(CodecError::Xml(_))));

        let result = decode_xml_report(&[0xFF, 0xFE, 0x00]);
        assert!(matches!(result, Err(CodecError::Xml(_))));
    }

    #[test]
    fn test_bad_values_are_decode_failures() {
        let xml = r#"<NetScanResult MACAddr="not-a-mac"/>"#;
        assert!(matches!(
            decode_xml_report(xml.as_bytes()),
            Err(CodecError::InvalidField { field: "MACAddr", .. })
        ));

        let xml = r#"<NetScanResult MACAddr="00:06:77:0A:0B:0C"><Item key="HostPortNo" value="port"/></NetScanResult>"#;
        assert!(matches!(
            decode_xml_report(xml.as_bytes()),
            Err(CodecError::InvalidField { field: "HostPortNo", .. })
        ));
    }

    #[test]
    fn test_unparsable_address_keeps_device() {
        let xml = r#"<NetScanResult MACAddr="00:06:77:0A:0B:0C">
    <Item key="IPAddress" value="192.168.1.10"/>
    <Item key="IPMask" value="255.255.255"/>
    <Item key="IPGateway" value=""/>
    <Item key="HostPortNo" value="2112"/>
</NetScanResult>"#;
        let info = decode_xml_report(xml.as_bytes()).unwrap();
        assert_eq!(info.ip_address, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(info.netmask, Ipv4Addr::UNSPECIFIED);
        assert_eq!(info.gateway, Ipv4Addr::UNSPECIFIED);
        assert_eq!(info.control_port, 2112);
    }

    #[test]
    fn test_items_interleaved_with_other_elements() {
        let xml = r#"<NetScanResult MACAddr="00:06:77:0A:0B:0C">
    <Item key="IPAddress" value="10.0.0.7"/>
    <Info text="unrelated"/>
    <Item key="HostPortNo" value="2122"/>
</NetScanResult>"#;
        let info = decode_xml_report(xml.as_bytes()).unwrap();
        assert_eq!(info.ip_address, Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(info.control_port, 2122);
    }

    #[test]
    fn test_dhcp_survives_config_and_report() {
        let mac: MacAddress = "00:06:77:0a:0b:0c".parse().unwrap();
        let request = encode_xml_ip_config(
            mac,
            Ipv4Addr::new(10, 1, 2, 3),
            Ipv4Addr::new(255, 0, 0, 0),
            Ipv4Addr::new(10, 0, 0, 1),
            true,
        )
        .unwrap();
        assert!(request.starts_with(XML_DECLARATION));
        assert!(request.contains(r#"<IPconfig MACAddr="00:06:77:0a:0b:0c">"#));
        assert!(request.contains(r#"key="DHCPClientEnabled" value="TRUE""#));

        // A device echoing the requested settings in its next scan reply
        let report = r#"<NetScanResult MACAddr="00:06:77:0a:0b:0c"><Item key="IPAddress" value="10.1.2.3"/><Item key="DHCPClientEnabled" value="TRUE"/></NetScanResult>"#;
        let info = decode_xml_report(report.as_bytes()).unwrap();
        assert!(info.dhcp_enabled);
        assert_eq!(info.ip_address, Ipv4Addr::new(10, 1, 2, 3));

        // The request document shares the item layout of a scan result
        let echoed = decode_xml_report(request.as_bytes()).unwrap();
        assert!(echoed.dhcp_enabled);
        assert_eq!(echoed.gateway, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn test_report_encoding_decodes_back() {
        let mut info = DeviceInfo::new(
            ProtocolGeneration::Generation1,
            MacAddress([0x00, 0x06, 0x77, 0x01, 0x02, 0x03]),
        );
        info.device_ident = "Visionary-S CX".to_string();
        info.control_port = 2112;
        info.ip_address = Ipv4Addr::new(192, 168, 0, 42);
        info.dhcp_enabled = true;

        let datagram = encode_xml_reply(7, &info).unwrap();
        assert_eq!(datagram[0], RPL_SCAN_XML);
        let len = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
        assert_eq!(datagram.len(), 16 + len);
        assert_eq!(decode_xml_report(&datagram[16..]).unwrap(), info);
    }

    #[test]
    fn test_trailing_nul_is_ignored() {
        let mut document = SCAN_RESULT.as_bytes().to_vec();
        document.push(0);
        assert!(decode_xml_report(&document).is_ok());
    }
}
