//! SSRF guard for user-supplied MCP server URLs.
//!
//! Purely syntactic: the host is checked as written. Hostnames that resolve
//! to private addresses are not caught here.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::errors::UrlRejection;

/// Accept `raw` only if it is an https URL whose host is publicly routable.
pub fn validate_mcp_url(raw: &str) -> Result<Url, UrlRejection> {
    let url = Url::parse(raw).map_err(|_| UrlRejection::Unparseable)?;
    if url.scheme() != "https" {
        return Err(UrlRejection::NotHttps);
    }
    match url.host() {
        None => Err(UrlRejection::MissingHost),
        Some(Host::Domain(domain)) => check_domain(&domain.to_ascii_lowercase()),
        Some(Host::Ipv4(ip)) => check_ipv4(ip),
        Some(Host::Ipv6(ip)) => check_ipv6(ip),
    }?;
    Ok(url)
}

fn check_domain(host: &str) -> Result<(), UrlRejection> {
    let host = host.trim_end_matches('.');
    if host == "localhost" || host.ends_with(".localhost") {
        return Err(UrlRejection::Localhost);
    }
    if host == "metadata"
        || host == "metadata.google.internal"
        || host.ends_with(".internal")
        || host.ends_with(".local")
    {
        return Err(UrlRejection::InternalHostname);
    }
    Ok(())
}

fn check_ipv4(ip: Ipv4Addr) -> Result<(), UrlRejection> {
    if ip.is_loopback() {
        Err(UrlRejection::Localhost)
    } else if ip.is_private() {
        Err(UrlRejection::PrivateAddress)
    } else if ip.is_link_local() {
        Err(UrlRejection::LinkLocal)
    } else if ip.is_broadcast() || ip.is_unspecified() || ip.octets()[0] == 255 {
        Err(UrlRejection::Unroutable)
    } else {
        Ok(())
    }
}

fn check_ipv6(ip: Ipv6Addr) -> Result<(), UrlRejection> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return check_ipv4(v4);
    }
    let first = ip.segments()[0];
    if ip.is_loopback() {
        Err(UrlRejection::Localhost)
    } else if ip.is_unspecified() {
        Err(UrlRejection::Unroutable)
    } else if first & 0xfe00 == 0xfc00 {
        // fc00::/7 unique local
        Err(UrlRejection::PrivateAddress)
    } else if first & 0xffc0 == 0xfe80 {
        Err(UrlRejection::LinkLocal)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection(url: &str) -> UrlRejection {
        validate_mcp_url(url).expect_err(url)
    }

    #[test]
    fn test_accepts_public_https() {
        for url in [
            "https://mcp.linear.app/sse",
            "https://api.example.com:8443/mcp",
            "https://8.8.8.8/mcp",
            "https://[2606:4700::1111]/mcp",
        ] {
            assert!(validate_mcp_url(url).is_ok(), "{url}");
        }
    }

    #[test]
    fn test_rejects_bad_format_and_scheme() {
        assert_eq!(rejection("not a url"), UrlRejection::Unparseable);
        assert_eq!(rejection("http://mcp.example.com"), UrlRejection::NotHttps);
        assert_eq!(rejection("ftp://mcp.example.com"), UrlRejection::NotHttps);
    }

    #[test]
    fn test_rejects_localhost_variants() {
        for url in [
            "https://localhost/mcp",
            "https://LOCALHOST:3000",
            "https://app.localhost",
            "https://127.0.0.1",
            "https://127.8.9.10",
            "https://[::1]/mcp",
        ] {
            assert_eq!(rejection(url), UrlRejection::Localhost, "{url}");
        }
    }

    #[test]
    fn test_rejects_internal_hostnames() {
        for url in [
            "https://metadata",
            "https://metadata.google.internal/computeMetadata",
            "https://db.internal",
            "https://printer.local",
        ] {
            assert_eq!(rejection(url), UrlRejection::InternalHostname, "{url}");
        }
    }

    #[test]
    fn test_rejects_private_and_link_local_ipv4() {
        assert_eq!(rejection("https://10.0.0.5"), UrlRejection::PrivateAddress);
        assert_eq!(rejection("https://172.16.0.1"), UrlRejection::PrivateAddress);
        assert_eq!(rejection("https://172.31.255.255"), UrlRejection::PrivateAddress);
        assert_eq!(rejection("https://192.168.1.1"), UrlRejection::PrivateAddress);
        assert_eq!(rejection("https://169.254.169.254/latest"), UrlRejection::LinkLocal);
        assert_eq!(rejection("https://255.255.255.255"), UrlRejection::Unroutable);
        assert_eq!(rejection("https://0.0.0.0"), UrlRejection::Unroutable);
        assert!(validate_mcp_url("https://172.32.0.1").is_ok());
    }

    #[test]
    fn test_rejects_private_ipv6() {
        assert_eq!(rejection("https://[fd12:3456::1]"), UrlRejection::PrivateAddress);
        assert_eq!(rejection("https://[fe80::1]"), UrlRejection::LinkLocal);
        assert_eq!(rejection("https://[::ffff:192.168.0.1]"), UrlRejection::PrivateAddress);
        assert_eq!(rejection("https://[::]"), UrlRejection::Unroutable);
    }

    #[test]
    fn test_rejects_numeric_host_spellings() {
        // the URL parser normalizes these to 127.0.0.1
        assert_eq!(rejection("https://2130706433"), UrlRejection::Localhost);
        assert_eq!(rejection("https://0x7f.0.0.1"), UrlRejection::Localhost);
    }
}
