//! The anonymous-overlay contract.
//!
//! The overlay manager is an external collaborator; the core consumes
//! exactly two values from it: the local destination string (how peers
//! reach this node) and the outbound HTTP proxy endpoint. In developer
//! mode both collapse to plain loopback HTTP.

/// Default i2pd HTTP proxy endpoint.
pub const DEFAULT_HTTP_PROXY: &str = "127.0.0.1:4444";

/// The two overlay values the core reads at startup.
#[derive(Clone, Debug)]
pub struct OverlayInfo {
    /// This node's reachable address: a `.b32.i2p` destination, or
    /// `host:port` in developer mode.
    pub local_addr: String,
    /// Outbound HTTP proxy endpoint, absent in developer mode.
    pub proxy: Option<String>,
}

impl OverlayInfo {
    /// Overlay-backed info: a destination plus the proxy endpoint.
    pub fn proxied(local_addr: impl Into<String>, proxy: impl Into<String>) -> Self {
        Self {
            local_addr: local_addr.into(),
            proxy: Some(proxy.into()),
        }
    }

    /// Developer mode: plain loopback, no proxy.
    pub fn direct(local_addr: impl Into<String>) -> Self {
        Self {
            local_addr: local_addr.into(),
            proxy: None,
        }
    }

    /// Split the local address into (host, port); a bare destination
    /// implies port 80.
    pub fn host_port(&self) -> (String, u16) {
        split_host_port(&self.local_addr)
    }
}

/// Whether a host is an overlay destination.
pub fn is_overlay_host(host: &str) -> bool {
    host.to_ascii_lowercase().ends_with(".i2p")
}

/// Whether a host is local to this machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(
        host.to_ascii_lowercase().as_str(),
        "localhost" | "127.0.0.1" | "::1" | "0.0.0.0"
    )
}

/// The host part of a `host[:port]` address.
pub fn host_of(addr: &str) -> &str {
    match addr.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => addr,
    }
}

/// Split `host[:port]` into its parts; a missing port defaults to 80.
pub fn split_host_port(addr: &str) -> (String, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (addr.to_string(), 80),
        },
        None => (addr.to_string(), 80),
    }
}
