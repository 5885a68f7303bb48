use std::net::SocketAddr;
use std::time::Duration;

pub mod description;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod local_addr;
pub mod soap;
pub mod ssdp;
pub mod types;

pub use self::description::{ControlUrlResolver, DescriptionResolver, WAN_IP_CONNECTION};
pub use self::error::{NatError, NatResult, UpnpError, UpnpErrorCode};
pub use self::lifecycle::{CleanupOutcome, MapperState, MapperStats, PortMapper, PortMapperHandle};
pub use self::local_addr::{LocalAddressResolver, RouteProbe};
pub use self::soap::{PortMappingClient, SoapClient, SoapFault};
pub use self::ssdp::{GatewayDiscovery, SsdpDiscoverer};
pub use self::types::{ActiveMapping, ControlEndpoint, MappingRequest, Protocol};

/// Port mapping configuration
#[derive(Debug, Clone)]
pub struct PortMapConfig {
    /// Lease requested from the gateway
    pub lease_duration: Duration,

    /// Time between rediscovery/renewal cycles
    pub renew_interval: Duration,

    /// How long SSDP responses are collected
    pub discovery_window: Duration,

    /// Where the M-SEARCH is sent
    pub ssdp_target: SocketAddr,

    /// `ST` header of the M-SEARCH
    pub search_target: String,

    /// `MX` header of the M-SEARCH
    pub search_mx: u8,

    /// Bound on each HTTP exchange with a gateway
    pub http_timeout: Duration,

    /// Remote address used to pick the local source address
    pub probe_addr: SocketAddr,

    /// Leads the mapping description shown in the router UI
    pub description_prefix: String,
}

impl Default for PortMapConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(600),
            renew_interval: Duration::from_secs(600),
            discovery_window: Duration::from_millis(500),
            ssdp_target: ssdp::SSDP_MULTICAST,
            search_target: ssdp::ROOT_DEVICE_TARGET.to_string(),
            search_mx: 3,
            http_timeout: Duration::from_secs(5),
            probe_addr: SocketAddr::from(([8, 8, 8, 8], 80)),
            description_prefix: "portkeeper".to_string(),
        }
    }
}

impl PortMapConfig {
    /// Reject settings the renewal loop cannot work with
    pub fn validate(&self) -> NatResult<()> {
        if self.renew_interval.is_zero() {
            return Err(NatError::Configuration("renew interval must be positive".to_string()));
        }
        if self.discovery_window.is_zero() {
            return Err(NatError::Configuration("discovery window must be positive".to_string()));
        }
        if self.lease_duration.as_secs() > u64::from(u32::MAX) {
            return Err(NatError::Configuration(format!(
                "lease of {}s does not fit NewLeaseDuration",
                self.lease_duration.as_secs()
            )));
        }
        Ok(())
    }
}
