//! Egress policy for plugin HTTP calls.
//!
//! Rejects non-http schemes, hosts outside the allowlist, and (unless allowed)
//! loopback, private and internal destinations. Hostnames are resolved so that
//! a public name pointing at a private address is caught too.

use std::net::{IpAddr, Ipv6Addr};
use tokio::net::lookup_host;

use super::HostPolicy;

pub(crate) async fn validate_egress(url: &str, policy: &HostPolicy) -> Result<reqwest::Url, String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("Invalid URL format: {}", e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(format!("scheme '{}' is not allowed", parsed.scheme()));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| "URL must have a host".to_string())?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_lowercase();

    if let Some(allowed_domains) = policy.http_allowlist.as_deref() {
        let is_allowed = allowed_domains.iter().any(|allowed| {
            let allowed = allowed.to_lowercase();
            host == allowed || host.ends_with(&format!(".{}", allowed))
        });
        if !is_allowed {
            return Err(format!("host '{}' is not in the allowlist", host));
        }
    }

    if policy.allow_private_ips {
        return Ok(parsed);
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err("private/internal IP addresses are not allowed".to_string());
        }
        return Ok(parsed);
    }

    if host == "localhost"
        || host.ends_with(".localhost")
        || host.ends_with(".local")
        || host.ends_with(".internal")
        || host.ends_with(".corp")
    {
        return Err(format!("internal hostname '{}' is not allowed", host));
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let resolved = lookup_host((host.as_str(), port)).await.map_err(|e| {
        tracing::warn!(host = %host, error = %e, "DNS resolution failed for egress check");
        format!("host '{}' could not be resolved: {}", host, e)
    })?;
    for addr in resolved {
        if is_private_ip(&addr.ip()) {
            return Err(format!("host '{}' resolves to private address {}", host, addr.ip()));
        }
    }

    Ok(parsed)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
                || (octets[0] == 100 && (64..=127).contains(&octets[1]))
                || octets[0] == 127
                || (octets[0] == 169 && octets[1] == 254)
                || (224..=239).contains(&octets[0])
                || octets[0] == 0
                || ipv4.is_broadcast()
        }
        IpAddr::V6(ipv6) => {
            // IPv4-mapped addresses would otherwise bypass the v4 checks.
            if let Some(ipv4) = ipv6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(ipv4));
            }
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                || ipv6.is_multicast()
                || is_ipv6_link_local(ipv6)
                || is_ipv6_unique_local(ipv6)
        }
    }
}

fn is_ipv6_link_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xffc0 == 0xfe80
}

fn is_ipv6_unique_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xfe00 == 0xfc00
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict() -> HostPolicy {
        HostPolicy::default()
    }

    #[tokio::test]
    async fn test_rejects_non_http_schemes() {
        for url in ["ftp://example.com", "file:///etc/passwd", "javascript:alert(1)", "not-a-url"] {
            assert!(validate_egress(url, &strict()).await.is_err(), "{url}");
        }
    }

    #[tokio::test]
    async fn test_rejects_loopback_and_private() {
        for url in [
            "http://localhost/",
            "http://127.0.0.1:3000/hook",
            "http://10.0.0.1/",
            "http://192.168.1.1/",
            "http://172.16.0.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/",
            "http://[::ffff:10.0.0.1]/",
            "http://api.internal/",
            "http://printer.local/",
        ] {
            assert!(validate_egress(url, &strict()).await.is_err(), "{url}");
        }
    }

    #[tokio::test]
    async fn test_public_ip_allowed() {
        assert!(validate_egress("https://8.8.8.8/dns", &strict()).await.is_ok());
    }

    #[tokio::test]
    async fn test_allowlist() {
        let policy = HostPolicy {
            http_allowlist: Some(vec!["googleapis.com".to_string(), "8.8.8.8".to_string()]),
            ..HostPolicy::default()
        };
        assert!(validate_egress("http://8.8.8.8/", &policy).await.is_ok());
        let err = validate_egress("http://evil.com/", &policy).await.unwrap_err();
        assert!(err.contains("allowlist"));
        // Suffix match needs a dot boundary.
        assert!(validate_egress("http://notgoogleapis.com/", &policy)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_private_allowed_when_configured() {
        let policy = HostPolicy {
            allow_private_ips: true,
            ..HostPolicy::default()
        };
        assert!(validate_egress("http://127.0.0.1:8080/", &policy).await.is_ok());
        assert!(validate_egress("ftp://127.0.0.1/", &policy).await.is_err());
    }
}
