//! Network Interfaces
//!
//! Address lookup for the node's own IP on the cluster network.

use std::net::SocketAddrV4;

use crate::config::WolfKubeConfig;

/// Source of interface addresses
pub trait AddressSource: Send + Sync {
    /// IPv4 address of an interface, if it has one
    fn interface_ip(&self, iface: &str) -> Option<String>;

    /// First interface that is not the loopback
    fn first_interface(&self) -> Option<String>;
}

/// Reads addresses from the running system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAddresses;

impl AddressSource for SystemAddresses {
    fn interface_ip(&self, iface: &str) -> Option<String> {
        let addrs = match nix::ifaddrs::getifaddrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::warn!("Failed getting system interfaces: {}", e);
                return None;
            }
        };

        addrs
            .filter(|ifa| ifa.interface_name == iface)
            .filter_map(|ifa| ifa.address)
            .find_map(|addr| {
                addr.as_sockaddr_in()
                    .map(|sin| SocketAddrV4::from(*sin).ip().to_string())
            })
    }

    fn first_interface(&self) -> Option<String> {
        let addrs = nix::ifaddrs::getifaddrs().ok()?;
        addrs
            .map(|ifa| ifa.interface_name)
            .find(|name| name != "lo")
    }
}

/// Fixed interface table
#[derive(Debug, Clone, Default)]
pub struct StaticAddresses {
    interfaces: Vec<(String, Option<String>)>,
}

impl StaticAddresses {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interface with an address
    pub fn with(mut self, iface: &str, ip: &str) -> Self {
        self.interfaces.push((iface.to_string(), Some(ip.to_string())));
        self
    }

    /// Add an interface without an address
    pub fn without_ip(mut self, iface: &str) -> Self {
        self.interfaces.push((iface.to_string(), None));
        self
    }
}

impl AddressSource for StaticAddresses {
    fn interface_ip(&self, iface: &str) -> Option<String> {
        self.interfaces
            .iter()
            .find(|(i, _)| i == iface)
            .and_then(|(_, ip)| ip.clone())
    }

    fn first_interface(&self) -> Option<String> {
        self.interfaces
            .iter()
            .map(|(i, _)| i.clone())
            .find(|i| i != "lo")
    }
}

/// Address the node is reached at: the configured virtual IP, or the
/// address of the cluster network interface
pub fn resolve_self_ip(config: &WolfKubeConfig, src: &dyn AddressSource) -> Option<String> {
    if let Some(eip) = config.kubevip.eip.as_deref().filter(|s| !s.is_empty()) {
        return Some(eip.to_string());
    }
    src.interface_ip(&config.p2p.interface)
}

/// Interface Kubernetes should bind to when not using the cluster network
pub fn guess_interface(config: &WolfKubeConfig, src: &dyn AddressSource) -> Option<String> {
    if let Some(iface) = config.kubevip.interface.as_deref().filter(|s| !s.is_empty()) {
        return Some(iface.to_string());
    }
    src.first_interface()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_addresses() {
        let addrs = StaticAddresses::new()
            .with("lo", "127.0.0.1")
            .with("eth0", "192.168.1.10")
            .without_ip("edgevpn0");

        assert_eq!(addrs.interface_ip("eth0").as_deref(), Some("192.168.1.10"));
        assert_eq!(addrs.interface_ip("edgevpn0"), None);
        assert_eq!(addrs.first_interface().as_deref(), Some("eth0"));
    }

    #[test]
    fn test_resolve_self_ip() {
        let mut config = WolfKubeConfig::default();
        let addrs = StaticAddresses::new().with("edgevpn0", "10.1.0.5");
        assert_eq!(resolve_self_ip(&config, &addrs).as_deref(), Some("10.1.0.5"));
        assert_eq!(resolve_self_ip(&config, &StaticAddresses::new()), None);

        config.kubevip.eip = Some("192.168.1.100".into());
        assert_eq!(resolve_self_ip(&config, &addrs).as_deref(), Some("192.168.1.100"));
    }

    #[test]
    fn test_guess_interface() {
        let mut config = WolfKubeConfig::default();
        let addrs = StaticAddresses::new().with("lo", "127.0.0.1").with("ens3", "192.168.1.5");
        assert_eq!(guess_interface(&config, &addrs).as_deref(), Some("ens3"));

        config.kubevip.interface = Some("eth1".into());
        assert_eq!(guess_interface(&config, &addrs).as_deref(), Some("eth1"));
    }

    #[test]
    fn test_system_loopback_is_skipped() {
        if let Some(iface) = SystemAddresses.first_interface() {
            assert_ne!(iface, "lo");
        }
    }
}
