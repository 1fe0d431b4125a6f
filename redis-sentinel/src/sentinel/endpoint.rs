use std::net::IpAddr;

use crate::configuration::DEFAULT_SENTINEL_PORT;
use crate::configuration::EndpointPort;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// The trimmed host when it is an IP address or a valid hostname.
pub(crate) fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim();
    if host.is_empty() {
        return None;
    }
    if host.parse::<IpAddr>().is_ok() || is_hostname(host) {
        Some(host.to_string())
    } else {
        None
    }
}

/// The port, or the Sentinel default when unset. Out of range and
/// non-numeric ports are rejected.
pub(crate) fn normalize_port(port: Option<&EndpointPort>) -> Option<u16> {
    match port {
        None => Some(DEFAULT_SENTINEL_PORT),
        Some(port) => port
            .as_i64()
            .and_then(|port| u16::try_from(port).ok())
            .filter(|port| *port > 0),
    }
}

fn is_hostname(host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    !host.is_empty()
        && host.len() <= MAX_HOSTNAME_LEN
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= MAX_LABEL_LEN
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .bytes()
                    .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-')
        })
}
