//! Host interface enumeration via `getifaddrs(3)`

use std::io;

use super::{Interface, InterfaceSource};

/// Reads the live interface table of the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> io::Result<Vec<Interface>> {
        enumerate()
    }
}

#[cfg(unix)]
fn enumerate() -> io::Result<Vec<Interface>> {
    use std::collections::BTreeMap;
    use std::ffi::{CStr, CString};
    use std::ptr;

    use ipnet::IpNet;

    let mut by_name: BTreeMap<String, Vec<IpNet>> = BTreeMap::new();

    // SAFETY: getifaddrs/freeifaddrs are standard POSIX functions. The list is
    // only traversed between the two calls and every pointer is null-checked.
    unsafe {
        let mut addrs: *mut libc::ifaddrs = ptr::null_mut();
        if libc::getifaddrs(&mut addrs) != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut cursor = addrs;
        while !cursor.is_null() {
            let ifa = &*cursor;
            if !ifa.ifa_name.is_null() {
                let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned();
                let entry = by_name.entry(name).or_default();
                if let Some(net) = sockaddr_to_net(ifa.ifa_addr, ifa.ifa_netmask) {
                    entry.push(net);
                }
            }
            cursor = ifa.ifa_next;
        }

        libc::freeifaddrs(addrs);
    }

    let interfaces = by_name
        .into_iter()
        .map(|(name, addrs)| {
            let index = CString::new(name.as_str())
                // SAFETY: the CString is valid and NUL-terminated for the call.
                .map(|c| unsafe { libc::if_nametoindex(c.as_ptr()) })
                .unwrap_or(0);
            Interface::new(index, name, addrs)
        })
        .collect();

    Ok(interfaces)
}

#[cfg(unix)]
unsafe fn sockaddr_to_net(
    addr: *const libc::sockaddr,
    mask: *const libc::sockaddr,
) -> Option<ipnet::IpNet> {
    use ipnet::IpNet;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    unsafe fn ip_of(sa: *const libc::sockaddr) -> Option<IpAddr> {
        if sa.is_null() {
            return None;
        }
        match (*sa).sa_family as i32 {
            libc::AF_INET => {
                let sin = &*(sa as *const libc::sockaddr_in);
                Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))))
            }
            libc::AF_INET6 => {
                let sin6 = &*(sa as *const libc::sockaddr_in6);
                Some(IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)))
            }
            _ => None,
        }
    }

    let ip = ip_of(addr)?;
    let prefix = match (ip, ip_of(mask)) {
        (IpAddr::V4(_), Some(IpAddr::V4(m))) => u32::from(m).count_ones() as u8,
        (IpAddr::V6(_), Some(IpAddr::V6(m))) => u128::from(m).count_ones() as u8,
        (IpAddr::V4(_), _) => 32,
        (IpAddr::V6(_), _) => 128,
    };

    IpNet::new(ip, prefix).ok()
}

#[cfg(not(unix))]
fn enumerate() -> io::Result<Vec<Interface>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "interface enumeration not supported on this platform",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_is_enumerated() {
        let interfaces = SystemInterfaces.interfaces().unwrap();
        assert!(interfaces
            .iter()
            .any(|iface| iface.addrs.iter().any(|net| net.addr().is_loopback())));
    }
}
