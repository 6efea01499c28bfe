//! Client identity extraction for rate limiting.
//!
//! The identity of a client is its connection (peer) address, taken from
//! Axum's `ConnectInfo<SocketAddr>` extension. When the service runs behind a
//! reverse proxy the peer is the proxy itself, so the first hop of
//! `X-Forwarded-For` (or `X-Real-IP`) is used instead, but only when the peer
//! falls inside one of the configured trusted proxy networks.
//!
//! # Security
//!
//! Forwarding headers are never trusted from arbitrary peers. A client talking
//! to the service directly cannot pick its own rate-limit key by sending a
//! spoofed `X-Forwarded-For`.
//!
//! # The "unknown" Fallback
//!
//! Requests that carry no connection info (only possible when the router is
//! served without `into_make_service_with_connect_info`) share the
//! [`UNKNOWN_IP`] key and are therefore limited collectively.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback identity when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    /// A bare address is treated as a single-host range.
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Networks whose forwarding headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// An empty configuration trusts no one.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// First hop of `X-Forwarded-For`, else `X-Real-IP`, if it parses as an address.
fn forwarded_client<B>(req: &Request<B>) -> Option<IpAddr> {
    let headers = req.headers();

    let from_xff = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);

    let candidate = from_xff.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    })?;

    candidate.parse().ok()
}

/// Determine the rate-limit identity of the client that sent `req`.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` when no peer address is available.
pub fn client_identity<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> Cow<'static, str> {
    let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>() else {
        return Cow::Borrowed(UNKNOWN_IP);
    };
    let peer_ip = peer.ip();

    if trusted.is_trusted(&peer_ip) {
        if let Some(client) = forwarded_client(req) {
            return Cow::Owned(client.to_string());
        }
        debug!(peer = %peer_ip, "Trusted proxy sent no usable forwarding header");
    }

    Cow::Owned(peer_ip.to_string())
}
