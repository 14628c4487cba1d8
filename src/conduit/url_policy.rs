// SSRF prevention: validates a target URL against a configurable policy
// before the Conduit ever hands it to the Browser Layer. Blocks private
// IPs, loopback/local hostnames, and non-HTTP(S) schemes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};

use ipnet::IpNet;
use once_cell::sync::Lazy;
use url::Url;

use super::config::TargetUrlPolicyConfig;

static PRIVATE_NETWORKS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    [
        "127.0.0.0/8",
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "169.254.0.0/16",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .map(|s| s.parse().expect("static private network literal is valid"))
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlValidationResult {
    pub allowed: bool,
    pub reason: String,
}

impl UrlValidationResult {
    fn ok() -> Self {
        Self {
            allowed: true,
            reason: "OK".to_string(),
        }
    }

    fn blocked(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

fn is_private_ip(addr: IpAddr) -> Option<String> {
    PRIVATE_NETWORKS.iter().find(|net| net.contains(&addr)).map(|net| net.to_string())
}

/// Validates a URL against the SSRF prevention policy:
/// 1. Scheme must be in `policy.allowed_schemes`.
/// 2. Hostname must be present, and (if enabled) not `localhost`/`*.local`.
/// 3. The resolved IP (or the hostname itself, if it's an IP literal) must
///    not fall in a private/reserved range (if enabled).
pub fn validate_target_url(target_url: &str, policy: &TargetUrlPolicyConfig) -> UrlValidationResult {
    let parsed = match Url::parse(target_url) {
        Ok(url) => url,
        Err(err) => return UrlValidationResult::blocked(format!("could not parse URL: {err}")),
    };

    let scheme = parsed.scheme();
    if !policy.allowed_schemes.iter().any(|s| s == scheme) {
        return UrlValidationResult::blocked(format!("Scheme '{scheme}' not allowed"));
    }

    let hostname = match parsed.host_str() {
        Some(h) if !h.is_empty() => h,
        _ => return UrlValidationResult::blocked("No hostname in URL"),
    };

    if policy.block_local_hostnames && (hostname == "localhost" || hostname.ends_with(".local")) {
        return UrlValidationResult::blocked(format!("Hostname '{hostname}' is blocked"));
    }

    if !policy.block_private_ips {
        return UrlValidationResult::ok();
    }

    // A literal IP in the URL needs no DNS resolution.
    if let Ok(addr) = hostname.parse::<Ipv4Addr>() {
        return match is_private_ip(IpAddr::V4(addr)) {
            Some(net) => UrlValidationResult::blocked(format!("IP {addr} is in private range {net}")),
            None => UrlValidationResult::ok(),
        };
    }
    if let Ok(addr) = hostname.parse::<Ipv6Addr>() {
        return match is_private_ip(IpAddr::V6(addr)) {
            Some(net) => UrlValidationResult::blocked(format!("IP {addr} is in private range {net}")),
            None => UrlValidationResult::ok(),
        };
    }

    // Not an IP literal: resolve via DNS and check every candidate address.
    match (hostname, 0u16).to_socket_addrs() {
        Ok(addrs) => {
            for addr in addrs {
                if let Some(net) = is_private_ip(addr.ip()) {
                    return UrlValidationResult::blocked(format!("IP {} is in private range {net}", addr.ip()));
                }
            }
            UrlValidationResult::ok()
        }
        Err(_) => UrlValidationResult::blocked(format!("Cannot resolve hostname '{hostname}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TargetUrlPolicyConfig {
        TargetUrlPolicyConfig::default()
    }

    #[test]
    fn rejects_disallowed_scheme() {
        let result = validate_target_url("ftp://example.test/file", &policy());
        assert!(!result.allowed);
        assert!(result.reason.contains("Scheme"));
    }

    #[test]
    fn rejects_localhost_hostname() {
        let result = validate_target_url("http://localhost:8080/", &policy());
        assert!(!result.allowed);
        assert!(result.reason.contains("blocked"));
    }

    #[test]
    fn rejects_dot_local_hostname() {
        let result = validate_target_url("http://printer.local/", &policy());
        assert!(!result.allowed);
    }

    #[test]
    fn rejects_loopback_ip_literal() {
        let result = validate_target_url("http://127.0.0.1/admin", &policy());
        assert!(!result.allowed);
        assert!(result.reason.contains("private range"));
    }

    #[test]
    fn rejects_rfc1918_ip_literal() {
        let result = validate_target_url("http://10.1.2.3/", &policy());
        assert!(!result.allowed);
    }

    #[test]
    fn allows_public_ip_literal() {
        let result = validate_target_url("http://93.184.216.34/", &policy());
        assert!(result.allowed);
    }

    #[test]
    fn allows_ordinary_public_https_url() {
        let result = validate_target_url("https://example.test/page", &policy());
        assert!(result.allowed);
    }

    #[test]
    fn permissive_policy_skips_ip_check() {
        let mut p = policy();
        p.block_private_ips = false;
        let result = validate_target_url("http://127.0.0.1/", &p);
        assert!(result.allowed);
    }
}
