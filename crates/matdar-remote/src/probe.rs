//! TCP reachability probe.

use matdar_core::source::Connectivity;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::trace;

/// Reports online when a TCP connection to `address` can be opened.
pub struct TcpConnectivity {
    address: String,
    timeout: Duration,
}

impl TcpConnectivity {
    /// `address` is `host:port`
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        TcpConnectivity {
            address: address.into(),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn resolve(&self) -> Vec<SocketAddr> {
        match self.address.to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                trace!(address = %self.address, error = %e, "Probe address did not resolve");
                Vec::new()
            }
        }
    }
}

impl Connectivity for TcpConnectivity {
    fn is_online(&self) -> bool {
        self.resolve().iter().any(|addr| {
            let reachable = TcpStream::connect_timeout(addr, self.timeout).is_ok();
            trace!(%addr, reachable, "Probed");
            reachable
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_listening_port_is_online() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let probe = TcpConnectivity::new(address, Duration::from_secs(2));
        assert!(probe.is_online());
    }

    #[test]
    fn test_closed_port_is_offline() {
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let probe = TcpConnectivity::new(address, Duration::from_millis(500));
        assert!(!probe.is_online());
    }

    #[test]
    fn test_unresolvable_is_offline() {
        let probe = TcpConnectivity::new("not an address", Duration::from_millis(200));
        assert!(!probe.is_online());
        assert_eq!(probe.address(), "not an address");
    }
}
