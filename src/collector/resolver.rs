//! Host name normalization for the `dbhost` meta column.
//!
//! A source configured as `localhost` is reported under the machine's
//! routable address, so rows from several collector hosts stay distinguishable.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// Host literal replaced by the routable address.
pub const LOCALHOST: &str = "localhost";

/// Resolves the address other machines would use to reach this one.
pub trait HostResolver: Send + Sync {
    fn routable_address(&self) -> io::Result<IpAddr>;
}

/// Resolver that asks the OS which local interface routes to a public address.
///
/// Connecting a UDP socket sends no packets; it only selects the route.
#[derive(Debug, Clone)]
pub struct RoutableAddressResolver {
    peer: SocketAddr,
}

impl RoutableAddressResolver {
    pub fn new(peer: SocketAddr) -> Self {
        Self { peer }
    }
}

impl Default for RoutableAddressResolver {
    fn default() -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53))
    }
}

impl HostResolver for RoutableAddressResolver {
    fn routable_address(&self) -> io::Result<IpAddr> {
        let bind = match self.peer {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(self.peer)?;
        Ok(socket.local_addr()?.ip())
    }
}

/// Resolver returning a fixed address.
#[derive(Debug, Clone, Copy)]
pub struct FixedResolver(pub IpAddr);

impl HostResolver for FixedResolver {
    fn routable_address(&self) -> io::Result<IpAddr> {
        Ok(self.0)
    }
}

/// Replace a `localhost` host with the resolver's address.
///
/// Any other host is returned unchanged. If resolution fails the original
/// host is kept and a warning is logged.
pub fn normalize_host(host: &str, resolver: &dyn HostResolver) -> String {
    if !host.eq_ignore_ascii_case(LOCALHOST) {
        return host.to_owned();
    }

    match resolver.routable_address() {
        Ok(addr) => addr.to_string(),
        Err(e) => {
            tracing::warn!(host = %host, error = %e, "Failed to resolve routable address");
            host.to_owned()
        }
    }
}
