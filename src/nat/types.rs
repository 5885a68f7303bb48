//! Values shared by the discovery, mapping and lifecycle layers.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use tokio::time::Instant;

use super::error::NatError;

/// Transport protocol of a port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Value carried in `NewProtocol`
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = NatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            other => Err(NatError::Configuration(format!("unknown protocol: {}", other))),
        }
    }
}

/// Control URL of the WAN IP connection service on one gateway.
///
/// Only valid for the discovery cycle that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEndpoint {
    /// Absolute control URL
    pub control_url: String,

    /// Host of the description document
    pub host: String,

    /// Port of the description document
    pub port: u16,
}

/// One desired mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRequest {
    pub protocol: Protocol,
    pub external_port: u16,
    pub internal_port: u16,
    pub internal_ip: IpAddr,
    pub description: String,
    pub lease_duration: Duration,
}

impl MappingRequest {
    /// Request that forwards `port` to the same port on `internal_ip`.
    ///
    /// The description names the internal endpoint so the router's mapping
    /// table shows who owns the entry.
    pub fn same_port(
        prefix: &str,
        protocol: Protocol,
        port: u16,
        internal_ip: IpAddr,
        lease_duration: Duration,
    ) -> Self {
        Self {
            protocol,
            external_port: port,
            internal_port: port,
            internal_ip,
            description: format!("{} {}:{} {}", prefix, internal_ip, port, protocol),
            lease_duration,
        }
    }
}

/// Outcome of a successful AddPortMapping
#[derive(Debug, Clone)]
pub struct ActiveMapping {
    pub endpoint: ControlEndpoint,
    pub request: MappingRequest,

    /// The gateway drops the mapping after this instant unless renewed
    pub expires_at: Instant,

    /// Wall-clock form of `expires_at`, for display
    pub expires_at_utc: chrono::DateTime<chrono::Utc>,

    /// Public address reported by the gateway, if it answered
    pub external_ip: Option<IpAddr>,
}

impl ActiveMapping {
    pub fn new(endpoint: ControlEndpoint, request: MappingRequest, external_ip: Option<IpAddr>) -> Self {
        let lease = request.lease_duration;
        let wall_lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            endpoint,
            request,
            expires_at: Instant::now() + lease,
            expires_at_utc: chrono::Utc::now() + wall_lease,
            external_ip,
        }
    }

    /// Whether the lease is still running at `now`
    pub fn is_live_at(&self, now: Instant) -> bool {
        now <= self.expires_at
    }
}
