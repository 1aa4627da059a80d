//! AutoIP telegram framing
//!
//! Every AutoIP telegram starts with a 16-byte header:
//! ```text
//! [cmd:1][reserved:1][payload_len:2][mac:6][telegram_id:4][scan_marker:1][reserved:1][payload:N]
//! ```
//! All multi-byte integers are big-endian.

use std::net::Ipv4Addr;

use crate::device::MacAddress;
use crate::reader::{ByteReader, CodecError};

/// UDP port used by sensors for AutoIP
pub const AUTOIP_PORT: u16 = 30718;

/// Size of the telegram header preceding any payload
pub const HEADER_LEN: usize = 16;

/// Replies of this length or shorter carry no payload and are ignored
pub const MIN_REPLY_LEN: usize = HEADER_LEN + 1;

/// Network scan request
pub const CMD_NETSCAN: u8 = 0x10;
/// IP configuration request
pub const CMD_IPCONFIG: u8 = 0x11;

/// Scan reply with an XML payload (CoLa-1 devices)
pub const RPL_SCAN_XML: u8 = 0x90;
/// Confirmation of an IP configuration request
pub const RPL_IPCONFIG: u8 = 0x91;
/// Scan reply with a binary payload (CoLa-2 devices)
pub const RPL_NETSCAN: u8 = 0x95;

/// Marks the telegram as a CoLa scan telegram
const SCAN_MARKER: u8 = 0x01;

fn encode_header(buf: &mut Vec<u8>, cmd: u8, payload_len: u16, mac: MacAddress, telegram_id: u32) {
    buf.push(cmd);
    buf.push(0x00); // reserved
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&mac.octets());
    buf.extend_from_slice(&telegram_id.to_be_bytes());
    buf.push(SCAN_MARKER);
    buf.push(0x00); // reserved
}

/// Encode the broadcast discovery request
///
/// The payload tells devices which interface and subnet the scan originates
/// from, so they can answer even while misconfigured.
pub fn encode_discovery(telegram_id: u32, local: Ipv4Addr, netmask: Ipv4Addr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + 8);
    encode_header(&mut buf, CMD_NETSCAN, 8, MacAddress::BROADCAST, telegram_id);
    buf.extend_from_slice(&local.octets());
    buf.extend_from_slice(&netmask.octets());
    buf
}

/// Wrap an IP configuration payload addressed to `target`
pub fn encode_ip_config(
    target: MacAddress,
    telegram_id: u32,
    payload: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let payload_len = u16::try_from(payload.len()).map_err(|_| CodecError::InvalidField {
        field: "payload",
        reason: format!("{} bytes exceed the telegram length field", payload.len()),
    })?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    encode_header(&mut buf, CMD_IPCONFIG, payload_len, target, telegram_id);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Binary IP configuration payload for CoLa-2 devices
pub fn encode_binary_ip_config(
    ip: Ipv4Addr,
    netmask: Ipv4Addr,
    gateway: Ipv4Addr,
    dhcp: bool,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(13);
    buf.extend_from_slice(&ip.octets());
    buf.extend_from_slice(&netmask.octets());
    buf.extend_from_slice(&gateway.octets());
    buf.push(dhcp as u8);
    buf
}

/// Encode a reply datagram as sent by a device
///
/// Device side of the protocol, for simulating sensors.
pub fn encode_reply(kind: u8, mac: MacAddress, telegram_id: u32, payload: &[u8]) -> Vec<u8> {
    let payload_len = payload.len().min(u16::MAX as usize) as u16;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    encode_header(&mut buf, kind, payload_len, mac, telegram_id);
    buf.extend_from_slice(payload);
    buf
}

/// A classified AutoIP reply datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<'a> {
    /// Binary device report; `body` starts right after the header
    BinaryReport { telegram_id: u32, body: &'a [u8] },
    /// XML device report
    XmlReport {
        telegram_id: u32,
        declared_len: u16,
        payload: &'a [u8],
    },
    /// IP configuration confirmation
    IpConfigAck,
}

impl<'a> Reply<'a> {
    /// Classify a datagram by its leading byte and split off the header
    pub fn parse(datagram: &'a [u8]) -> Result<Self, CodecError> {
        if datagram.len() < MIN_REPLY_LEN {
            return Err(CodecError::TooShort {
                len: datagram.len(),
            });
        }

        let mut reader = ByteReader::new(datagram);
        let kind = reader.read_u8()?;
        reader.skip(1)?; // reserved
        let declared_len = reader.read_u16()?;
        reader.skip(6)?; // MAC, repeated in the payload
        let telegram_id = reader.read_u32()?;
        reader.skip(2)?;
        let rest = reader.take(reader.remaining())?;

        match kind {
            RPL_NETSCAN => Ok(Self::BinaryReport {
                telegram_id,
                body: rest,
            }),
            RPL_SCAN_XML => Ok(Self::XmlReport {
                telegram_id,
                declared_len,
                payload: rest,
            }),
            RPL_IPCONFIG => Ok(Self::IpConfigAck),
            other => Err(CodecError::UnknownReply(other)),
        }
    }

    /// Telegram id echoed by the device, if the reply carries one
    pub fn telegram_id(&self) -> Option<u32> {
        match self {
            Self::BinaryReport { telegram_id, .. } | Self::XmlReport { telegram_id, .. } => {
                Some(*telegram_id)
            }
            Self::IpConfigAck => None,
        }
    }
}

/// XML document of a report, bounded by its declared length
pub fn xml_document(declared_len: u16, payload: &[u8]) -> Result<&[u8], CodecError> {
    payload
        .get(..declared_len as usize)
        .ok_or(CodecError::Truncated {
            offset: HEADER_LEN,
            needed: declared_len as usize,
            available: payload.len(),
        })
}
