//! Network interfaces and their addresses
//!
//! Interfaces are enumerated on demand through an [`InterfaceSource`] and kept
//! in an [`InterfaceCache`] that the reconciler flushes after every general
//! settings update.

mod cache;
mod system;

pub use cache::InterfaceCache;
pub use system::SystemInterfaces;

use std::io;
use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::{Error, Result};

/// One network interface with every address assigned to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub index: u32,
    pub name: String,
    pub addrs: Vec<IpNet>,
}

impl Interface {
    pub fn new(index: u32, name: impl Into<String>, addrs: Vec<IpNet>) -> Self {
        Self {
            index,
            name: name.into(),
            addrs,
        }
    }

    pub fn pick_ipv4_addr(&self, destination: Option<IpAddr>) -> Result<IpNet> {
        self.pick_addr(destination, "IPv4", |net| matches!(net, IpNet::V4(_)))
    }

    pub fn pick_ipv6_addr(&self, destination: Option<IpAddr>) -> Result<IpNet> {
        self.pick_addr(destination, "IPv6", |net| matches!(net, IpNet::V6(_)))
    }

    /// The prefix containing `destination` wins; otherwise the first
    /// non-link-local address of the family.
    fn pick_addr(
        &self,
        destination: Option<IpAddr>,
        family: &'static str,
        accept: impl Fn(&IpNet) -> bool,
    ) -> Result<IpNet> {
        let mut fallback = None;

        for net in self.addrs.iter().filter(|net| accept(net)) {
            if fallback.is_none() && !is_link_local(net.addr()) {
                fallback = Some(*net);
                if destination.is_none() {
                    break;
                }
            }

            if let Some(dest) = destination {
                if net.contains(&dest) {
                    return Ok(*net);
                }
            }
        }

        fallback.ok_or_else(|| Error::AddressFamilyUnavailable {
            interface: self.name.clone(),
            family,
        })
    }
}

fn is_link_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// Where interface data comes from
pub trait InterfaceSource: Send + Sync {
    fn interfaces(&self) -> io::Result<Vec<Interface>>;
}

/// A fixed interface table, for hosts where enumeration is done elsewhere
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(pub Vec<Interface>);

impl InterfaceSource for StaticInterfaces {
    fn interfaces(&self) -> io::Result<Vec<Interface>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth0() -> Interface {
        Interface::new(
            2,
            "eth0",
            vec![
                "fe80::1/64".parse().unwrap(),
                "192.168.1.10/24".parse().unwrap(),
                "10.0.0.5/8".parse().unwrap(),
                "2001:db8::10/64".parse().unwrap(),
            ],
        )
    }

    #[test]
    fn test_pick_first_of_family_without_destination() {
        let iface = eth0();
        assert_eq!(
            iface.pick_ipv4_addr(None).unwrap(),
            "192.168.1.10/24".parse::<IpNet>().unwrap()
        );
        // link-local fe80::1 is skipped
        assert_eq!(
            iface.pick_ipv6_addr(None).unwrap(),
            "2001:db8::10/64".parse::<IpNet>().unwrap()
        );
    }

    #[test]
    fn test_pick_prefix_containing_destination() {
        let iface = eth0();
        let picked = iface.pick_ipv4_addr(Some("10.1.2.3".parse().unwrap())).unwrap();
        assert_eq!(picked, "10.0.0.5/8".parse::<IpNet>().unwrap());
    }

    #[test]
    fn test_pick_missing_family() {
        let iface = Interface::new(1, "lo4", vec!["127.0.0.1/8".parse().unwrap()]);
        let err = iface.pick_ipv6_addr(None).unwrap_err();
        assert!(matches!(err, Error::AddressFamilyUnavailable { family: "IPv6", .. }));
    }

    #[test]
    fn test_only_link_local_is_unavailable() {
        let iface = Interface::new(3, "wg0", vec!["169.254.0.2/16".parse().unwrap()]);
        assert!(iface.pick_ipv4_addr(None).is_err());
    }
}
