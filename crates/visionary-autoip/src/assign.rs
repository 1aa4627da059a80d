//! IP configuration of a single device

use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use visionary_core::telegram::{encode_binary_ip_config, encode_ip_config};
use visionary_core::xml::encode_xml_ip_config;
use visionary_core::{CodecError, MacAddress, ProtocolGeneration, Reply};
use visionary_transport::{UdpTransport, MAX_DATAGRAM_LEN};

/// Network settings to apply to a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpConfig {
    pub ip_address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dhcp: bool,
    /// Wait after the device confirmed, while it restarts its network stack
    pub settle: Duration,
}

impl Default for IpConfig {
    fn default() -> Self {
        Self {
            ip_address: Ipv4Addr::new(192, 168, 1, 10),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::UNSPECIFIED,
            dhcp: false,
            settle: Duration::from_millis(5000),
        }
    }
}

/// One IP configuration request
#[derive(Debug, Clone)]
pub struct AssignRequest<'a> {
    target: MacAddress,
    generation: ProtocolGeneration,
    config: &'a IpConfig,
}

impl<'a> AssignRequest<'a> {
    pub fn new(target: MacAddress, generation: ProtocolGeneration, config: &'a IpConfig) -> Self {
        Self {
            target,
            generation,
            config,
        }
    }

    /// Payload in the format the device generation expects
    pub fn payload(&self) -> Result<Vec<u8>, CodecError> {
        let config = self.config;
        match self.generation {
            ProtocolGeneration::Generation1 => encode_xml_ip_config(
                self.target,
                config.ip_address,
                config.netmask,
                config.gateway,
                config.dhcp,
            )
            .map(String::into_bytes),
            ProtocolGeneration::Generation2 => Ok(encode_binary_ip_config(
                config.ip_address,
                config.netmask,
                config.gateway,
                config.dhcp,
            )),
        }
    }

    pub fn frame(&self, telegram_id: u32) -> Result<Vec<u8>, CodecError> {
        encode_ip_config(self.target, telegram_id, &self.payload()?)
    }

    /// Send the request, wait for the confirmation and let the device settle
    ///
    /// Returns `false` if no confirmation arrives within `timeout` or the
    /// request cannot be sent.
    pub fn run(
        &self,
        transport: &UdpTransport,
        telegram_id: u32,
        timeout: Duration,
        retry_delay: Duration,
    ) -> bool {
        let frame = match self.frame(telegram_id) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode IP configuration request");
                return false;
            }
        };

        info!(
            mac = %self.target,
            protocol = %self.generation,
            ip = %self.config.ip_address,
            netmask = %self.config.netmask,
            gateway = %self.config.gateway,
            dhcp = self.config.dhcp,
            "Sending IP configuration"
        );

        if let Err(e) = transport.write(&frame) {
            warn!(error = %e, "Failed to send IP configuration request");
            return false;
        }

        if !await_confirmation(transport, timeout, retry_delay) {
            warn!(mac = %self.target, "No IP configuration confirmation before timeout");
            return false;
        }

        info!(
            mac = %self.target,
            settle_ms = self.config.settle.as_millis() as u64,
            "IP configuration confirmed, waiting for device to settle"
        );
        thread::sleep(self.config.settle);
        true
    }
}

/// Wait for any configuration confirmation
///
/// Confirmations are not matched against the request's telegram id.
fn await_confirmation(transport: &UdpTransport, timeout: Duration, retry_delay: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut buf = Vec::with_capacity(MAX_DATAGRAM_LEN);

    while Instant::now() < deadline {
        match transport.read(&mut buf) {
            Ok(_) => match Reply::parse(&buf) {
                Ok(Reply::IpConfigAck) => return true,
                Ok(other) => debug!(telegram_id = ?other.telegram_id(), "Ignoring device report"),
                Err(e) => debug!(error = %e, "Ignoring datagram"),
            },
            Err(e) if e.is_timeout() => {}
            Err(e) => {
                debug!(error = %e, "Receive failed");
                thread::sleep(retry_delay);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use visionary_core::telegram::CMD_IPCONFIG;
    use visionary_core::xml::decode_xml_report;

    fn target() -> MacAddress {
        "00:06:77:aa:bb:cc".parse().unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = IpConfig::default();
        assert_eq!(config.ip_address, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(config.netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(config.gateway, Ipv4Addr::UNSPECIFIED);
        assert!(!config.dhcp);
        assert_eq!(config.settle, Duration::from_secs(5));
    }

    #[test]
    fn test_binary_request_frame() {
        let config = IpConfig {
            ip_address: Ipv4Addr::new(10, 0, 0, 5),
            netmask: Ipv4Addr::new(255, 255, 0, 0),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            dhcp: false,
            ..IpConfig::default()
        };
        let request = AssignRequest::new(target(), ProtocolGeneration::Generation2, &config);
        let frame = request.frame(0x01020304).unwrap();

        assert_eq!(frame[0], CMD_IPCONFIG);
        assert_eq!(&frame[2..4], &[0, 13]);
        assert_eq!(&frame[4..10], &target().octets());
        assert_eq!(&frame[10..14], &[1, 2, 3, 4]);
        assert_eq!(&frame[16..], &[10, 0, 0, 5, 255, 255, 0, 0, 10, 0, 0, 1, 0]);
    }

    #[test]
    fn test_xml_request_frame_with_dhcp() {
        let config = IpConfig {
            dhcp: true,
            ..IpConfig::default()
        };
        let request = AssignRequest::new(target(), ProtocolGeneration::Generation1, &config);
        let frame = request.frame(7).unwrap();

        let len = u16::from_be_bytes([frame[2], frame[3]]) as usize;
        assert_eq!(frame.len(), 16 + len);

        let document = std::str::from_utf8(&frame[16..]).unwrap();
        assert!(document.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><IPconfig"#));
        assert!(document.contains(r#"key="IPAddress" value="192.168.1.10""#));

        let echoed = decode_xml_report(&frame[16..]).unwrap();
        assert!(echoed.dhcp_enabled);
        assert_eq!(echoed.mac_address, target());
    }
}
