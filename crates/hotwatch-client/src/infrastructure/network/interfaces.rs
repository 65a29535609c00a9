//! Local IPv4 interface enumeration for discovery.
//!
//! Discovery probes go out on every interface that can carry a broadcast:
//! up, broadcast-capable, not loopback, with an IPv4 address.  The OS query
//! produces [`RawInterface`] records; [`filter_usable`] turns those into the
//! [`InterfaceAddress`] list the socket pool binds to.
//!
//! # Platform implementations
//!
//! | OS     | API used                    |
//! |--------|-----------------------------|
//! | Unix   | `getifaddrs(3)` via `nix`   |
//! | other  | none; yields an empty list  |
//!
//! An empty list is not an error: the pool falls back to a wildcard socket
//! and probes only the limited-broadcast address.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use tracing::debug;

/// One IPv4 address entry as reported by the OS, before filtering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawInterface {
    pub name: String,
    pub up: bool,
    pub broadcast_capable: bool,
    pub loopback: bool,
    pub address: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub broadcast: Option<Ipv4Addr>,
}

/// A usable local address with its subnet's directed-broadcast address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub name: String,
    pub address: Ipv4Addr,
    /// `None` when neither the OS nor the netmask yields one.
    pub broadcast: Option<Ipv4Addr>,
}

/// Lists the usable broadcast-capable IPv4 addresses of this host.
pub fn enumerate() -> Vec<InterfaceAddress> {
    let usable = filter_usable(system_interfaces());
    debug!("{} usable interface address(es)", usable.len());
    usable
}

/// Keeps the entries discovery can broadcast from.
///
/// Duplicate addresses are reported once.  A missing broadcast address is
/// derived from the netmask.
pub fn filter_usable(raw: impl IntoIterator<Item = RawInterface>) -> Vec<InterfaceAddress> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter(|i| i.up && i.broadcast_capable && !i.loopback)
        .filter_map(|i| {
            let address = i.address.filter(|a| !a.is_unspecified() && !a.is_loopback())?;
            if !seen.insert(address) {
                return None;
            }
            let broadcast = i
                .broadcast
                .filter(|b| !b.is_unspecified())
                .or_else(|| i.netmask.map(|mask| directed_broadcast(address, mask)));
            Some(InterfaceAddress {
                name: i.name,
                address,
                broadcast,
            })
        })
        .collect()
}

/// `address | !netmask`.
pub fn directed_broadcast(address: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(address) | !u32::from(netmask))
}

#[cfg(unix)]
fn system_interfaces() -> Vec<RawInterface> {
    use nix::ifaddrs::getifaddrs;
    use nix::net::if_::InterfaceFlags;
    use tracing::warn;

    let addrs = match getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!("getifaddrs failed: {e}");
            return Vec::new();
        }
    };

    let ipv4 = |s: Option<nix::sys::socket::SockaddrStorage>| {
        s.and_then(|s| s.as_sockaddr_in().map(|sin| sin.ip()))
    };

    addrs
        .map(|ifa| RawInterface {
            up: ifa.flags.contains(InterfaceFlags::IFF_UP),
            broadcast_capable: ifa.flags.contains(InterfaceFlags::IFF_BROADCAST),
            loopback: ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK),
            address: ipv4(ifa.address),
            netmask: ipv4(ifa.netmask),
            broadcast: ipv4(ifa.broadcast),
            name: ifa.interface_name,
        })
        .collect()
}

#[cfg(not(unix))]
fn system_interfaces() -> Vec<RawInterface> {
    debug!("interface enumeration is not available on this platform");
    Vec::new()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ethernet(address: [u8; 4]) -> RawInterface {
        RawInterface {
            name: "eth0".to_string(),
            up: true,
            broadcast_capable: true,
            loopback: false,
            address: Some(Ipv4Addr::from(address)),
            netmask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            broadcast: Some(Ipv4Addr::new(192, 168, 1, 255)),
        }
    }

    #[test]
    fn test_usable_interface_is_kept_with_its_broadcast() {
        let usable = filter_usable(vec![ethernet([192, 168, 1, 20])]);

        assert_eq!(
            usable,
            vec![InterfaceAddress {
                name: "eth0".to_string(),
                address: Ipv4Addr::new(192, 168, 1, 20),
                broadcast: Some(Ipv4Addr::new(192, 168, 1, 255)),
            }]
        );
    }

    #[test]
    fn test_down_loopback_and_non_broadcast_interfaces_are_skipped() {
        // Arrange
        let down = RawInterface {
            up: false,
            ..ethernet([192, 168, 1, 21])
        };
        let loopback = RawInterface {
            name: "lo".to_string(),
            loopback: true,
            address: Some(Ipv4Addr::LOCALHOST),
            ..ethernet([127, 0, 0, 1])
        };
        let point_to_point = RawInterface {
            broadcast_capable: false,
            ..ethernet([10, 8, 0, 2])
        };
        let ipv6_only = RawInterface {
            address: None,
            ..ethernet([0, 0, 0, 0])
        };

        // Act
        let usable = filter_usable(vec![down, loopback, point_to_point, ipv6_only]);

        // Assert
        assert!(usable.is_empty());
    }

    #[test]
    fn test_missing_broadcast_is_derived_from_netmask() {
        let raw = RawInterface {
            netmask: Some(Ipv4Addr::new(255, 255, 0, 0)),
            broadcast: None,
            ..ethernet([10, 1, 2, 3])
        };

        let usable = filter_usable(vec![raw]);

        assert_eq!(usable[0].broadcast, Some(Ipv4Addr::new(10, 1, 255, 255)));
    }

    #[test]
    fn test_no_broadcast_and_no_netmask_yields_none() {
        let raw = RawInterface {
            netmask: None,
            broadcast: None,
            ..ethernet([10, 1, 2, 3])
        };

        assert_eq!(filter_usable(vec![raw])[0].broadcast, None);
    }

    #[test]
    fn test_duplicate_addresses_are_reported_once() {
        let usable = filter_usable(vec![ethernet([192, 168, 1, 20]), ethernet([192, 168, 1, 20])]);
        assert_eq!(usable.len(), 1);
    }

    #[test]
    fn test_directed_broadcast() {
        assert_eq!(
            directed_broadcast(Ipv4Addr::new(172, 16, 5, 9), Ipv4Addr::new(255, 255, 240, 0)),
            Ipv4Addr::new(172, 16, 15, 255)
        );
    }

    #[test]
    fn test_enumerate_never_returns_loopback() {
        assert!(enumerate().iter().all(|i| !i.address.is_loopback()));
    }
}
