/*!
SSDP search for Sony IRCC devices.

The client only sends M-SEARCH and reads the unicast `HTTP/1.1 200`
answers, so it binds an ephemeral port and never 1900.
*/

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::{DiscoveryConfig, DriverConfig};
use crate::device::SonyDevice;
use crate::errors::SonyError;

pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_PORT: u16 = 1900;

/// One answer to an M-SEARCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpResponse {
    pub location: String,
    pub usn: Option<String>,
    pub st: Option<String>,
    pub cache_control: Option<String>,
}

pub struct SsdpDiscovery {
    socket: UdpSocket,
    config: DiscoveryConfig,
}

impl SsdpDiscovery {
    pub fn new(config: &DiscoveryConfig) -> Result<Self, SonyError> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        socket2.set_multicast_ttl_v4(2)?;

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        socket2.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket2.into();
        socket.set_read_timeout(Some(Duration::from_millis(config.read_timeout_ms.max(1))))?;

        for iface in get_if_addrs::get_if_addrs()? {
            if let IpAddr::V4(ipv4) = iface.ip() {
                if !ipv4.is_loopback() {
                    if let Err(e) = socket.join_multicast_v4(&SSDP_MULTICAST_ADDR, &ipv4) {
                        warn!("SSDP: failed to join {} on {}: {}", SSDP_MULTICAST_ADDR, ipv4, e);
                    }
                }
            }
        }

        Ok(Self {
            socket,
            config: config.clone(),
        })
    }

    fn send_msearch(&self) -> Result<(), SonyError> {
        let msg = msearch_message(&self.config.search_target, self.config.mx);
        let addr = SocketAddr::new(IpAddr::V4(SSDP_MULTICAST_ADDR), SSDP_PORT);
        self.socket.send_to(msg.as_bytes(), addr)?;
        debug!(st = %self.config.search_target, "M-SEARCH sent");
        Ok(())
    }

    /// Sends the search `retries` times and collects the answers until the
    /// read timeout, one entry per `LOCATION`.
    pub fn search(&self) -> Result<Vec<SsdpResponse>, SonyError> {
        let mut responses: BTreeMap<String, SsdpResponse> = BTreeMap::new();
        let mut buf = [0u8; 2048];

        for _ in 0..self.config.retries.max(1) {
            self.send_msearch()?;
            loop {
                match self.socket.recv_from(&mut buf) {
                    Ok((n, from)) => {
                        let data = String::from_utf8_lossy(&buf[..n]);
                        match parse_search_response(&data) {
                            Some(response) => {
                                trace!(%from, location = %response.location, usn = ?response.usn, "SSDP answer");
                                responses.insert(response.location.clone(), response);
                            }
                            None => trace!(%from, "Ignoring SSDP message"),
                        }
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                        ) =>
                    {
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        info!(count = responses.len(), "SSDP search done");
        Ok(responses.into_values().collect())
    }
}

fn msearch_message(st: &str, mx: u32) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}:{}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         ST: {}\r\n\
         MX: {}\r\n\
         \r\n",
        SSDP_MULTICAST_ADDR,
        SSDP_PORT,
        st,
        mx.max(1)
    )
}

fn parse_search_response(data: &str) -> Option<SsdpResponse> {
    let mut lines = data.lines();
    let first_line = lines.next()?.trim().to_ascii_uppercase();
    if !(first_line.starts_with("HTTP/") && first_line.contains(" 200")) {
        return None;
    }

    let mut headers = parse_headers(lines);
    Some(SsdpResponse {
        location: headers.remove("LOCATION")?,
        usn: headers.remove("USN"),
        st: headers.remove("ST"),
        cache_control: headers.remove("CACHE-CONTROL"),
    })
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        // values may contain ':'
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_ascii_uppercase();
            let value = value.trim().to_string();
            if !name.is_empty() && !value.is_empty() {
                headers.insert(name, value);
            }
        }
    }
    headers
}

/// A device for a discovered location: its host is the location host,
/// the location string serves as nickname and client id.
pub fn device_from_location(location: &str, config: &DriverConfig) -> Result<SonyDevice, SonyError> {
    let url = Url::parse(location)?;
    let host = url
        .host_str()
        .ok_or_else(|| SonyError::parse(format!("location without host: {}", location)))?;
    Ok(SonyDevice::with_config(host, location, config))
}

/// Finds the Sony devices of the local network.
pub fn discover(config: &DriverConfig) -> Result<Vec<SonyDevice>, SonyError> {
    let discovery = SsdpDiscovery::new(&config.discovery)?;
    let mut devices = Vec::new();
    for response in discovery.search()? {
        match device_from_location(&response.location, config) {
            Ok(device) => devices.push(device),
            Err(err) => warn!(location = %response.location, "Ignoring SSDP answer: {}", err),
        }
    }
    Ok(devices)
}

impl SonyDevice {
    pub fn discover(config: &DriverConfig) -> Result<Vec<SonyDevice>, SonyError> {
        discover(config)
    }
}
