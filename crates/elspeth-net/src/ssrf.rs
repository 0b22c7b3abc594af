//! DNS-resolve-then-check SSRF boundary. Every hostname the client is
//! about to connect to — including each hop of a redirect chain — is
//! resolved and every candidate address checked before the connection is
//! opened. A host that resolves to any non-routable address is rejected
//! outright rather than having the client just skip that one address,
//! since a DNS response mixing public and private answers is itself a
//! signal of rebinding.

use crate::error::{NetError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Resolve `host` and confirm every candidate address is globally
/// routable. Returns the addresses on success so the caller can log or
/// pin them.
pub async fn check_host(host: &str, port: u16) -> Result<Vec<IpAddr>> {
    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|err| NetError::Dns {
            host: host.to_string(),
            detail: err.to_string(),
        })?
        .map(|socket_addr| socket_addr.ip())
        .collect();

    if addrs.is_empty() {
        return Err(NetError::Dns {
            host: host.to_string(),
            detail: "resolver returned no addresses".to_string(),
        });
    }

    for ip in &addrs {
        if !is_globally_routable(*ip) {
            return Err(NetError::Ssrf {
                host: host.to_string(),
                ip: ip.to_string(),
            });
        }
    }

    Ok(addrs)
}

/// Whether `ip` is safe to let an outbound plugin-initiated request reach:
/// not loopback, not link-local, not a private/ULA range, not a multicast
/// or otherwise reserved address.
pub fn is_globally_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_v4_globally_routable(v4),
        IpAddr::V6(v6) => is_v6_globally_routable(v6),
    }
}

fn is_v4_globally_routable(ip: Ipv4Addr) -> bool {
    !(ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified())
}

fn is_v6_globally_routable(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_multicast() || ip.is_unspecified() {
        return false;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_v4_globally_routable(v4);
    }
    let segments = ip.segments();
    // fe80::/10 link-local unicast.
    if segments[0] & 0xffc0 == 0xfe80 {
        return false;
    }
    // fc00::/7 unique local addresses.
    if segments[0] & 0xfe00 == 0xfc00 {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_loopback_and_private_v4() {
        assert!(!is_globally_routable("127.0.0.1".parse().unwrap()));
        assert!(!is_globally_routable("10.0.0.5".parse().unwrap()));
        assert!(!is_globally_routable("192.168.1.1".parse().unwrap()));
        assert!(!is_globally_routable("169.254.1.1".parse().unwrap()));
    }

    #[test]
    fn accepts_public_v4() {
        assert!(is_globally_routable("93.184.216.34".parse().unwrap()));
    }

    #[test]
    fn rejects_loopback_and_ula_v6() {
        assert!(!is_globally_routable("::1".parse().unwrap()));
        assert!(!is_globally_routable("fe80::1".parse().unwrap()));
        assert!(!is_globally_routable("fc00::1".parse().unwrap()));
        assert!(!is_globally_routable("fd12:3456:789a::1".parse().unwrap()));
    }

    #[test]
    fn accepts_public_v6() {
        assert!(is_globally_routable("2606:2800:220:1:248:1893:25c8:1946".parse().unwrap()));
    }

    #[test]
    fn rejects_v4_mapped_private_v6() {
        assert!(!is_globally_routable("::ffff:10.0.0.1".parse().unwrap()));
    }
}
