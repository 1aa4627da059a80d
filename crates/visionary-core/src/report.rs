//! Binary (CoLa-2) device report codec
//!
//! The report body follows the 16-byte telegram header. It is a sequence of
//! fixed fields, length-prefixed strings and four keyed arrays:
//!
//! ```text
//! version:2  cid_name:str  cid_version:11  state:3
//! device_name:str  app_name:str  project_name:str  serial_number:str
//! type_code:str  firmware_version:str  order_number:str  flags:1
//! aux[]        { key:4 len:2 value }
//! scan_ifs[]   { index:2 len:2 name }
//! com_settings[] { key:4 len:2 value }
//! endpoints[]  { protocol:1 settings[] { key:4 len:2 value } }
//! ```
//!
//! Strings and arrays are prefixed with a 16-bit length or element count.

use std::net::Ipv4Addr;

use crate::device::{AuthGeneration, DeviceInfo, MacAddress, ProtocolGeneration};
use crate::reader::{ByteReader, CodecError};
use crate::telegram::{self, RPL_NETSCAN};

const KEY_AUTH_VERSION: [u8; 4] = *b"AutV";
const KEY_MAC: [u8; 4] = *b"EMAC";
const KEY_IP: [u8; 4] = *b"EIPa";
const KEY_NETMASK: [u8; 4] = *b"ENMa";
const KEY_GATEWAY: [u8; 4] = *b"EDGa";
const KEY_DHCP: [u8; 4] = *b"EDhc";
const KEY_CONFIG_DURATION: [u8; 4] = *b"ECDu";
const KEY_PORT: [u8; 4] = *b"DPNo";

/// Auth version reported by devices using secure user level authentication
pub const SECURE_AUTH_VERSION: &str = "1.0.0.0R";

/// Endpoint protocol tag written by [`encode_binary_report`]
const ENDPOINT_COLA2: u8 = 2;

/// Read one `{ key:4 len:2 value }` entry
fn read_keyed<'a>(reader: &mut ByteReader<'a>) -> Result<([u8; 4], &'a [u8]), CodecError> {
    let key = reader.read_array::<4>()?;
    let value = reader.read_prefixed()?;
    Ok((key, value))
}

/// Leading `N` bytes of a keyed value
fn fixed<const N: usize>(field: &'static str, value: &[u8]) -> Result<[u8; N], CodecError> {
    value
        .get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| CodecError::InvalidField {
            field,
            reason: format!("expected {N} bytes, got {}", value.len()),
        })
}

fn ipv4(field: &'static str, value: &[u8]) -> Result<Ipv4Addr, CodecError> {
    fixed::<4>(field, value).map(Ipv4Addr::from)
}

#[derive(Debug, Default)]
struct ComSettings {
    mac: Option<MacAddress>,
    ip: Option<Ipv4Addr>,
    netmask: Option<Ipv4Addr>,
    gateway: Option<Ipv4Addr>,
    dhcp: bool,
    config_duration_ms: u32,
}

impl ComSettings {
    fn apply(&mut self, key: [u8; 4], value: &[u8]) -> Result<(), CodecError> {
        match key {
            KEY_MAC => self.mac = Some(MacAddress(fixed("EMAC", value)?)),
            KEY_IP => self.ip = Some(ipv4("EIPa", value)?),
            KEY_NETMASK => self.netmask = Some(ipv4("ENMa", value)?),
            KEY_GATEWAY => self.gateway = Some(ipv4("EDGa", value)?),
            KEY_DHCP => self.dhcp = fixed::<1>("EDhc", value)?[0] != 0,
            KEY_CONFIG_DURATION => {
                let secs = u32::from_be_bytes(fixed("ECDu", value)?);
                self.config_duration_ms = secs.saturating_mul(1000);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Decode the body of a binary device report
///
/// Fails with [`CodecError::Truncated`] as soon as a field would extend past
/// the end of `body`, and with [`CodecError::MissingField`] when the report
/// carries no MAC address or no control port.
pub fn decode_binary_report(body: &[u8]) -> Result<DeviceInfo, CodecError> {
    let mut reader = ByteReader::new(body);

    reader.skip(2)?; // report format version
    let device_ident = reader.read_prefixed_string()?;
    reader.skip(2 + 2 + 2 + 4 + 1)?; // CID major, minor, patch, build, classifier
    reader.skip(1 + 2)?; // device state, required user action
    reader.skip_prefixed()?; // device name
    reader.skip_prefixed()?; // application name
    reader.skip_prefixed()?; // project name
    let serial_number = reader.read_prefixed_string()?;
    reader.skip_prefixed()?; // type code
    reader.skip_prefixed()?; // firmware version
    let order_number = reader.read_prefixed_string()?;
    reader.skip(1)?; // flags

    let mut auth = AuthGeneration::Legacy;
    for _ in 0..reader.read_u16()? {
        let (key, value) = read_keyed(&mut reader)?;
        if key == KEY_AUTH_VERSION && value == SECURE_AUTH_VERSION.as_bytes() {
            auth = AuthGeneration::Secure;
        }
    }

    for _ in 0..reader.read_u16()? {
        reader.skip(2)?; // interface index
        reader.skip_prefixed()?; // interface name
    }

    let mut settings = ComSettings::default();
    for _ in 0..reader.read_u16()? {
        let (key, value) = read_keyed(&mut reader)?;
        settings.apply(key, value)?;
    }

    let mut ports = Vec::new();
    for _ in 0..reader.read_u16()? {
        reader.skip(1)?; // protocol tag
        for _ in 0..reader.read_u16()? {
            let (key, value) = read_keyed(&mut reader)?;
            if key == KEY_PORT {
                ports.push(u16::from_be_bytes(fixed("DPNo", value)?));
            }
        }
    }

    let mac_address = settings.mac.ok_or(CodecError::MissingField("EMAC"))?;
    let control_port = *ports.first().ok_or(CodecError::MissingField("DPNo"))?;

    Ok(DeviceInfo {
        protocol: ProtocolGeneration::Generation2,
        auth,
        device_ident,
        serial_number,
        order_number,
        mac_address,
        control_port,
        ip_address: settings.ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
        netmask: settings.netmask.unwrap_or(Ipv4Addr::UNSPECIFIED),
        gateway: settings.gateway.unwrap_or(Ipv4Addr::UNSPECIFIED),
        dhcp_enabled: settings.dhcp,
        reconfiguration_time_ms: settings.config_duration_ms,
    })
}

fn put_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    let len = bytes.len().min(u16::MAX as usize);
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(&bytes[..len]);
}

fn put_keyed(buf: &mut Vec<u8>, key: [u8; 4], value: &[u8]) {
    buf.extend_from_slice(&key);
    put_prefixed(buf, value);
}

/// Encode a binary report body the way a CoLa-2 device answers a scan
///
/// Device side of the protocol, for simulating sensors. Fields the decoder
/// skips are written empty or zeroed.
pub fn encode_binary_report(info: &DeviceInfo) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);

    buf.extend_from_slice(&1u16.to_be_bytes());
    put_prefixed(&mut buf, info.device_ident.as_bytes());
    buf.extend_from_slice(&[0u8; 11]); // CID version
    buf.extend_from_slice(&[0u8; 3]); // state, user action
    for _ in 0..3 {
        put_prefixed(&mut buf, &[]); // device, app, project name
    }
    put_prefixed(&mut buf, info.serial_number.as_bytes());
    put_prefixed(&mut buf, &[]); // type code
    put_prefixed(&mut buf, &[]); // firmware version
    put_prefixed(&mut buf, info.order_number.as_bytes());
    buf.push(0); // flags

    if info.auth == AuthGeneration::Secure {
        buf.extend_from_slice(&1u16.to_be_bytes());
        put_keyed(&mut buf, KEY_AUTH_VERSION, SECURE_AUTH_VERSION.as_bytes());
    } else {
        buf.extend_from_slice(&0u16.to_be_bytes());
    }

    buf.extend_from_slice(&0u16.to_be_bytes()); // scan interfaces

    buf.extend_from_slice(&6u16.to_be_bytes());
    put_keyed(&mut buf, KEY_MAC, &info.mac_address.octets());
    put_keyed(&mut buf, KEY_IP, &info.ip_address.octets());
    put_keyed(&mut buf, KEY_NETMASK, &info.netmask.octets());
    put_keyed(&mut buf, KEY_GATEWAY, &info.gateway.octets());
    put_keyed(&mut buf, KEY_DHCP, &[info.dhcp_enabled as u8]);
    put_keyed(
        &mut buf,
        KEY_CONFIG_DURATION,
        &(info.reconfiguration_time_ms / 1000).to_be_bytes(),
    );

    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.push(ENDPOINT_COLA2);
    buf.extend_from_slice(&1u16.to_be_bytes());
    put_keyed(&mut buf, KEY_PORT, &info.control_port.to_be_bytes());

    buf
}

/// Full binary scan reply datagram, header included
///
/// Device side of the protocol, for simulating sensors.
pub fn encode_binary_reply(telegram_id: u32, info: &DeviceInfo) -> Vec<u8> {
    let body = encode_binary_report(info);
    telegram::encode_reply(RPL_NETSCAN, info.mac_address, telegram_id, &body)
}
