//! SSDP gateway discovery.
//!
//! One M-SEARCH goes out to the multicast group, then every datagram that
//! arrives within the collection window is kept. Only the `Location` header
//! of each response is used.

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::error::{IoErrorContext, NatResult};
use super::PortMapConfig;

/// SSDP multicast group and port
pub const SSDP_MULTICAST: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 1900);

/// Consecutive receive errors tolerated within one window
const MAX_RECV_ERRORS: usize = 8;

/// Search target matching every root device
pub const ROOT_DEVICE_TARGET: &str = "upnp:rootdevice";

/// Finds candidate gateway description URLs
#[async_trait]
pub trait GatewayDiscovery: Send + Sync {
    /// Description URLs in arrival order, possibly empty
    async fn discover(&self) -> NatResult<Vec<String>>;
}

/// Multicast M-SEARCH discoverer
#[derive(Debug, Clone)]
pub struct SsdpDiscoverer {
    target: SocketAddr,
    search_target: String,
    mx: u8,
    window: Duration,
}

impl SsdpDiscoverer {
    pub fn new(config: &PortMapConfig) -> Self {
        Self {
            target: config.ssdp_target,
            search_target: config.search_target.clone(),
            mx: config.search_mx,
            window: config.discovery_window,
        }
    }

    /// The M-SEARCH datagram payload
    pub fn search_request(&self) -> String {
        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             Host: {}\r\n\
             Man: \"ssdp:discover\"\r\n\
             ST: {}\r\n\
             MX: {}\r\n\
             \r\n",
            self.target, self.search_target, self.mx
        )
    }

    async fn collect_responses(&self, socket: &UdpSocket) -> Vec<String> {
        let deadline = Instant::now() + self.window;
        collect_until(deadline, || async move {
            let mut buf = vec![0u8; 2048];
            let (size, from) = socket.recv_from(&mut buf).await?;
            debug!("SSDP response from {} ({} bytes)", from, size);
            Ok(String::from_utf8_lossy(&buf[..size]).into_owned())
        })
        .await
    }
}

/// Run `recv` until `deadline`. Single receive errors (an ICMP-triggered
/// reset, say) are skipped; a run of them ends collection early.
async fn collect_until<F, Fut>(deadline: Instant, mut recv: F) -> Vec<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<String>>,
{
    let mut responses = Vec::new();
    let mut errors = 0;

    loop {
        match timeout_at(deadline, recv()).await {
            Ok(Ok(response)) => {
                errors = 0;
                responses.push(response);
            }
            Ok(Err(e)) => {
                errors += 1;
                debug!("SSDP receive failed: {}", e);
                if errors >= MAX_RECV_ERRORS {
                    warn!("Giving up on SSDP responses after {} receive errors", errors);
                    break;
                }
            }
            // Window closed, nothing more is coming
            Err(_) => break,
        }
    }

    responses
}

#[async_trait]
impl GatewayDiscovery for SsdpDiscoverer {
    async fn discover(&self) -> NatResult<Vec<String>> {
        let bind_addr: SocketAddr = if self.target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .nat_context("Failed to bind SSDP socket")?;

        if self.target.ip().is_multicast() {
            if let Err(e) = socket.set_multicast_ttl_v4(2) {
                debug!("Cannot set multicast TTL: {}", e);
            }
        }

        socket
            .send_to(self.search_request().as_bytes(), self.target)
            .await
            .nat_context("Failed to send M-SEARCH")?;

        let responses = self.collect_responses(&socket).await;
        let locations: Vec<String> = responses
            .iter()
            .filter_map(|r| parse_location(r))
            .collect();

        info!(
            "SSDP discovery finished: {} response(s), {} location(s)",
            responses.len(),
            locations.len()
        );

        Ok(locations)
    }
}

/// Value of the `Location` header of an SSDP response, if present
pub fn parse_location(response: &str) -> Option<String> {
    response.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("location") {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}
