//! Visionary AutoIP - command line entry point
//!
//! Finds Visionary sensors on the local networks and assigns their IP
//! configuration.

mod config;
mod interfaces;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use visionary_autoip::{AutoIpConfig, IpConfig, VisionaryAutoIp};
use visionary_core::{DeviceInfo, MacAddress, ProtocolGeneration};

use crate::interfaces::{list_interfaces, InterfaceInfo};

#[derive(Parser, Debug)]
#[command(name = "visionary-autoip")]
#[command(about = "Discover Visionary sensors and assign their IP configuration")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "visionary-autoip.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Overall time to wait for replies, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan for devices
    Scan {
        #[command(flatten)]
        interface: InterfaceArgs,

        /// Scan every IPv4 interface concurrently
        #[arg(long, conflicts_with = "interface")]
        all: bool,
    },
    /// Assign a new IP configuration to one device
    Assign {
        #[command(flatten)]
        interface: InterfaceArgs,

        /// MAC address of the device (e.g. 00:06:77:0a:0b:0c)
        #[arg(long)]
        mac: MacAddress,

        /// Protocol generation reported by the scan
        #[arg(long, value_enum)]
        protocol: GenerationArg,

        #[arg(long, default_value = "192.168.1.10")]
        ip: Ipv4Addr,

        #[arg(long, default_value = "255.255.255.0")]
        netmask: Ipv4Addr,

        #[arg(long, default_value = "0.0.0.0")]
        gateway: Ipv4Addr,

        /// Enable the device's DHCP client
        #[arg(long)]
        dhcp: bool,

        /// Time to wait after the device confirmed, in milliseconds
        #[arg(long, default_value_t = 5000)]
        settle_ms: u64,
    },
    /// List IPv4 interfaces available for scanning
    Interfaces,
}

#[derive(ClapArgs, Debug)]
struct InterfaceArgs {
    /// Local interface address to bind
    #[arg(short, long)]
    interface: Option<Ipv4Addr>,

    /// Subnet prefix length of the interface
    #[arg(short, long, default_value_t = 24)]
    prefix: u8,
}

impl InterfaceArgs {
    fn require(&self) -> Result<Ipv4Addr> {
        match self.interface {
            Some(ip) => Ok(ip),
            None => bail!("--interface is required (see the 'interfaces' command)"),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum GenerationArg {
    /// XML based devices
    Cola1,
    /// Binary devices
    Cola2,
}

impl From<GenerationArg> for ProtocolGeneration {
    fn from(arg: GenerationArg) -> Self {
        match arg {
            GenerationArg::Cola1 => ProtocolGeneration::Generation1,
            GenerationArg::Cola2 => ProtocolGeneration::Generation2,
        }
    }
}

/// Scan result of one interface
#[derive(Debug, Serialize)]
struct InterfaceScan {
    interface: String,
    ip: Ipv4Addr,
    devices: Vec<DeviceInfo>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Visionary AutoIP v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;
    if let Some(timeout_ms) = args.timeout_ms {
        config.autoip.timeout_ms = timeout_ms;
    }
    let json = args.json || config.output.json;

    match args.command {
        Command::Scan { interface, all } => {
            let scans = if all {
                scan_all(&config.autoip).await?
            } else {
                let ip = interface.require()?;
                let devices = scan_interface(ip, interface.prefix, config.autoip.clone()).await?;
                vec![InterfaceScan {
                    interface: ip.to_string(),
                    ip,
                    devices,
                }]
            };
            print_scans(&scans, json)?;
        }
        Command::Assign {
            interface,
            mac,
            protocol,
            ip,
            netmask,
            gateway,
            dhcp,
            settle_ms,
        } => {
            let local = interface.require()?;
            let ip_config = IpConfig {
                ip_address: ip,
                netmask,
                gateway,
                dhcp,
                settle: Duration::from_millis(settle_ms),
            };
            let prefix = interface.prefix;
            let autoip = config.autoip.clone();
            let confirmed = tokio::task::spawn_blocking(move || -> Result<bool> {
                let mut client =
                    VisionaryAutoIp::with_config(&local.to_string(), prefix, &autoip)?;
                Ok(client.assign(mac, protocol.into(), &ip_config))
            })
            .await??;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "mac": mac,
                        "confirmed": confirmed,
                    }))?
                );
            } else if confirmed {
                println!("{mac}: configuration applied");
            }
            if !confirmed {
                bail!("{mac}: no confirmation received");
            }
        }
        Command::Interfaces => {
            let interfaces = list_interfaces()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&interfaces)?);
            } else {
                for iface in interfaces {
                    println!("{:<16} {}/{}", iface.name, iface.ip, iface.prefix_len);
                }
            }
        }
    }

    Ok(())
}

/// Run one blocking scan off the async runtime
async fn scan_interface(ip: Ipv4Addr, prefix: u8, config: AutoIpConfig) -> Result<Vec<DeviceInfo>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<DeviceInfo>> {
        let mut client = VisionaryAutoIp::with_config(&ip.to_string(), prefix, &config)
            .with_context(|| format!("failed to open AutoIP client on {ip}/{prefix}"))?;
        Ok(client.scan())
    })
    .await?
}

/// Scan every interface concurrently, one client per interface
async fn scan_all(config: &AutoIpConfig) -> Result<Vec<InterfaceScan>> {
    let interfaces = list_interfaces()?;
    if interfaces.is_empty() {
        warn!("No IPv4 interface available for scanning");
    }

    let mut tasks = JoinSet::new();
    for InterfaceInfo {
        name,
        ip,
        prefix_len,
    } in interfaces
    {
        let config = config.clone();
        tasks.spawn(async move {
            let result = scan_interface(ip, prefix_len, config).await;
            (name, ip, result)
        });
    }

    let mut scans = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            (interface, ip, Ok(devices)) => scans.push(InterfaceScan {
                interface,
                ip,
                devices,
            }),
            (interface, ip, Err(e)) => {
                warn!(interface = %interface, ip = %ip, error = %e, "Interface scan failed")
            }
        }
    }
    scans.sort_by(|a, b| a.interface.cmp(&b.interface));
    Ok(scans)
}

fn print_scans(scans: &[InterfaceScan], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(scans)?);
        return Ok(());
    }

    for scan in scans {
        println!(
            "{} ({}): {} device(s)",
            scan.interface,
            scan.ip,
            scan.devices.len()
        );
        for device in &scan.devices {
            println!(
                "  - {} {} [{}] at {}:{}",
                device.mac_address,
                device.device_ident,
                device.protocol,
                device.ip_address,
                device.control_port
            );
            let product = device
                .visionary_type()
                .map_or_else(|| "unknown".to_string(), |t| t.to_string());
            println!(
                "    Type: {}  Serial: {}  Netmask: {}  Gateway: {}  DHCP: {}",
                product, device.serial_number, device.netmask, device.gateway, device.dhcp_enabled
            );
        }
    }
    Ok(())
}
