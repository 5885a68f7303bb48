use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;

use super::error::{NatError, NatResult};

/// Determines the address other hosts on the LAN reach us at
#[async_trait]
pub trait LocalAddressResolver: Send + Sync {
    async fn local_address(&self) -> NatResult<IpAddr>;
}

/// Asks the OS which source address it would route `probe` through.
///
/// A UDP `connect` only selects a route, nothing is sent.
#[derive(Debug, Clone)]
pub struct RouteProbe {
    probe: SocketAddr,
}

impl RouteProbe {
    pub fn new(probe: SocketAddr) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl LocalAddressResolver for RouteProbe {
    async fn local_address(&self) -> NatResult<IpAddr> {
        let bind: SocketAddr = match self.probe {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| NatError::LocalAddress(format!("bind: {}", e)))?;
        socket
            .connect(self.probe)
            .await
            .map_err(|e| NatError::LocalAddress(format!("no route to {}: {}", self.probe, e)))?;

        let ip = socket
            .local_addr()
            .map_err(|e| NatError::LocalAddress(e.to_string()))?
            .ip();

        if ip.is_unspecified() {
            return Err(NatError::LocalAddress(format!(
                "OS picked no source address towards {}",
                self.probe
            )));
        }

        Ok(ip)
    }
}
