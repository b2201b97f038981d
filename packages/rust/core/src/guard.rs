//! Outbound URL admission: scheme and private-network checks.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use reqwest::redirect::Policy;
use url::{Host, Url};

use pagebrief_shared::{GuardConfig, PageBriefError, Result};

/// Redirect hops followed before a fetch gives up.
const MAX_REDIRECTS: usize = 5;

/// Rejects URLs that target loopback, private or internal hosts.
///
/// Only literal addresses and well-known internal hostnames are checked;
/// names are not resolved.
#[derive(Debug, Clone, Default)]
pub struct SsrfGuard {
    allow_private_hosts: bool,
}

impl SsrfGuard {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            allow_private_hosts: config.allow_private_hosts,
        }
    }

    /// `Validation` for a non-http(s) scheme or missing host,
    /// `SsrfRejected` for a private target.
    pub fn check(&self, url: &Url) -> Result<()> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PageBriefError::validation(
                "Only HTTP and HTTPS URLs are supported",
            ));
        }

        let Some(host) = url.host() else {
            return Err(PageBriefError::validation("Invalid URL format"));
        };

        if !self.allow_private_hosts && is_private_host(&host) {
            return Err(PageBriefError::SsrfRejected);
        }
        Ok(())
    }

    /// Redirect policy that re-applies [`check`](Self::check) to every hop.
    pub fn redirect_policy(&self) -> Policy {
        let guard = self.clone();
        Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if guard.check(attempt.url()).is_err() {
                tracing::warn!(target_url = %attempt.url(), "redirect to disallowed host");
                attempt.error("redirect to a disallowed host")
            } else {
                attempt.follow()
            }
        })
    }
}

fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Ipv4(v4) => is_private_ipv4(*v4),
        Host::Ipv6(v6) => is_private_ipv6(*v6),
        Host::Domain(name) => {
            let name = name.trim_end_matches('.').to_ascii_lowercase();
            // Numeric forms the parser left as a domain.
            if let Ok(ip) = name.parse::<IpAddr>() {
                return is_private_ip(ip);
            }
            name == "localhost"
                || name == "0.0.0.0"
                || name.ends_with(".localhost")
                || name.ends_with(".local")
                || name.ends_with(".internal")
        }
    }
}

/// True for addresses that must never be fetched.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn is_private_ipv4(v4: Ipv4Addr) -> bool {
    let [a, b, ..] = v4.octets();
    v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
        || (a == 100 && (64..=127).contains(&b)) // CGNAT 100.64/10
}

fn is_private_ipv6(v6: Ipv6Addr) -> bool {
    if let Some(v4) = v6.to_ipv4_mapped() {
        return is_private_ipv4(v4);
    }
    let first = v6.segments()[0];
    v6.is_loopback()
        || v6.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local fc00::/7
        || (first & 0xffc0) == 0xfe80 // link local fe80::/10
}
