//! URL safety checks for remote image fetching.
//!
//! Every URL the image proxy might request, the initial `src` and each
//! redirect target, passes through [`check_url`]. The check is pure: it looks
//! only at the parsed URL, never at DNS. Hostnames that resolve into blocked
//! space are caught separately by the transport's resolver, which reuses
//! [`is_blocked_ip`].
//!
//! Numeric host spellings such as `2130706433` or `0x7f.1` are normalised to
//! dotted IPv4 by the WHATWG parser in the `url` crate before the address
//! tables are consulted.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "broadcasthost",
];

const BLOCKED_SUFFIXES: &[&str] = &[
    ".localhost",
    ".local",
    ".localdomain",
    ".internal",
    ".lan",
    ".home",
    ".home.arpa",
    ".corp",
    ".intranet",
    ".private",
];

/// (network, prefix length)
const BLOCKED_V4: &[([u8; 4], u8)] = &[
    ([0, 0, 0, 0], 8),
    ([10, 0, 0, 0], 8),
    ([100, 64, 0, 0], 10),
    ([127, 0, 0, 0], 8),
    ([169, 254, 0, 0], 16),
    ([172, 16, 0, 0], 12),
    ([192, 0, 0, 0], 24),
    ([192, 0, 2, 0], 24),
    ([192, 168, 0, 0], 16),
    ([198, 18, 0, 0], 15),
    ([198, 51, 100, 0], 24),
    ([203, 0, 113, 0], 24),
    ([224, 0, 0, 0], 4),
    ([240, 0, 0, 0], 4),
];

const BLOCKED_V6: &[(Ipv6Addr, u8)] = &[
    (Ipv6Addr::UNSPECIFIED, 128),
    (Ipv6Addr::LOCALHOST, 128),
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8),
    (Ipv6Addr::new(0x2001, 0x0db8, 0, 0, 0, 0, 0, 0), 32),
];

/// Why a URL was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlRejection {
    Unparseable,
    NotHttps,
    MissingHost,
    BlockedHostname,
    PrivateAddress,
}

impl UrlRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            UrlRejection::Unparseable => "unparseable",
            UrlRejection::NotHttps => "not_https",
            UrlRejection::MissingHost => "missing_host",
            UrlRejection::BlockedHostname => "blocked_hostname",
            UrlRejection::PrivateAddress => "private_address",
        }
    }
}

impl fmt::Display for UrlRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `true` if `url` may be fetched.
pub fn is_safe_url(url: &str) -> bool {
    check_url(url).is_ok()
}

/// Parse and vet a URL string, returning the parsed form on success.
pub fn check_url(url: &str) -> Result<Url, UrlRejection> {
    let parsed = Url::parse(url.trim()).map_err(|_| UrlRejection::Unparseable)?;
    check_parsed(&parsed)?;
    Ok(parsed)
}

/// Vet an already-parsed URL (used for redirect targets joined onto a base).
pub fn check_parsed(url: &Url) -> Result<(), UrlRejection> {
    if url.scheme() != "https" {
        return Err(UrlRejection::NotHttps);
    }

    match url.host() {
        None => Err(UrlRejection::MissingHost),
        Some(Host::Ipv4(v4)) => reject_ip(IpAddr::V4(v4)),
        Some(Host::Ipv6(v6)) => reject_ip(IpAddr::V6(v6)),
        Some(Host::Domain(domain)) => {
            let lowered = domain.to_ascii_lowercase();
            let host = lowered.strip_suffix('.').unwrap_or(&lowered);
            if host.is_empty() {
                return Err(UrlRejection::MissingHost);
            }
            if is_blocked_hostname(host) {
                return Err(UrlRejection::BlockedHostname);
            }
            // An IP literal left in domain form (e.g. after trailing-dot strip).
            if let Ok(ip) = host.parse::<IpAddr>() {
                return reject_ip(ip);
            }
            Ok(())
        }
    }
}

fn reject_ip(ip: IpAddr) -> Result<(), UrlRejection> {
    if is_blocked_ip(ip) {
        Err(UrlRejection::PrivateAddress)
    } else {
        Ok(())
    }
}

fn is_blocked_hostname(host: &str) -> bool {
    BLOCKED_HOSTNAMES.contains(&host) || BLOCKED_SUFFIXES.iter().any(|s| host.ends_with(s))
}

/// `true` if `ip` lies in loopback, private, link-local, shared, documentation,
/// benchmarking, multicast or reserved space.
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are checked against the IPv4
/// table. IPv4-compatible (`::a.b.c.d`) and NAT64 forms are not unwrapped.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_blocked_v4(v4);
            }
            BLOCKED_V6
                .iter()
                .any(|(net, prefix)| prefix_match(&v6.octets(), &net.octets(), *prefix))
        }
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    BLOCKED_V4
        .iter()
        .any(|(net, prefix)| prefix_match(&ip.octets(), net, *prefix))
}

fn prefix_match(ip: &[u8], net: &[u8], prefix: u8) -> bool {
    let full = (prefix / 8) as usize;
    let rem = prefix % 8;

    if ip[..full] != net[..full] {
        return false;
    }
    if rem == 0 {
        return true;
    }
    let mask = 0xFFu8 << (8 - rem);
    ip[full] & mask == net[full] & mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_public_https() {
        assert!(is_safe_url("https://example.com/a.png"));
        assert!(is_safe_url("https://93.184.216.34/a.png"));
        assert!(is_safe_url("https://[2606:4700::1111]/x.png"));
        assert!(is_safe_url("https://cdn.example.com./a.png"));
    }

    #[test]
    fn rejects_non_https() {
        assert_eq!(check_url("http://example.com/a.png").unwrap_err(), UrlRejection::NotHttps);
        assert_eq!(check_url("ftp://example.com/a.png").unwrap_err(), UrlRejection::NotHttps);
        assert_eq!(check_url("file:///etc/passwd").unwrap_err(), UrlRejection::NotHttps);
        assert_eq!(check_url("not a url").unwrap_err(), UrlRejection::Unparseable);
    }

    #[test]
    fn rejects_local_hostnames() {
        for url in [
            "https://localhost/x",
            "https://LOCALHOST./x",
            "https://ip6-loopback/x",
            "https://printer.local/x",
            "https://db.internal/x",
            "https://nas.home.arpa/x",
            "https://foo.localhost/x",
            "https://wiki.corp/x",
        ] {
            assert_eq!(check_url(url).unwrap_err(), UrlRejection::BlockedHostname, "{url}");
        }
    }

    #[test]
    fn rejects_private_ipv4() {
        for url in [
            "https://127.0.0.1/x",
            "https://10.1.2.3/x",
            "https://100.64.0.1/x",
            "https://169.254.169.254/latest/meta-data",
            "https://172.31.255.255/x",
            "https://192.168.1.1/x",
            "https://198.19.0.1/x",
            "https://224.0.0.1/x",
            "https://255.255.255.255/x",
            "https://0.0.0.0/x",
        ] {
            assert_eq!(check_url(url).unwrap_err(), UrlRejection::PrivateAddress, "{url}");
        }
        assert!(is_safe_url("https://172.32.0.1/x"));
        assert!(is_safe_url("https://100.128.0.1/x"));
    }

    #[test]
    fn numeric_spellings_are_normalised() {
        assert!(!is_safe_url("https://2130706433/x"));
        assert!(!is_safe_url("https://0x7f.1/x"));
        assert!(!is_safe_url("https://0177.0.0.1/x"));
    }

    #[test]
    fn rejects_private_ipv6() {
        for url in [
            "https://[::1]/x",
            "https://[::]/x",
            "https://[fd00::1]/x",
            "https://[fe80::1]/x",
            "https://[ff02::1]/x",
            "https://[2001:db8::1]/x",
            "https://[::ffff:127.0.0.1]/x",
            "https://[::ffff:a9fe:a9fe]/x",
        ] {
            assert_eq!(check_url(url).unwrap_err(), UrlRejection::PrivateAddress, "{url}");
        }
        assert!(is_safe_url("https://[::ffff:93.184.216.34]/x"));
    }

    #[test]
    fn blocked_ip_predicate() {
        assert!(is_blocked_ip("10.0.0.1".parse().unwrap()));
        assert!(!is_blocked_ip("8.8.8.8".parse().unwrap()));
        assert!(is_blocked_ip("fc00::1".parse().unwrap()));
        assert!(!is_blocked_ip("2606:4700::1111".parse().unwrap()));
    }
}
