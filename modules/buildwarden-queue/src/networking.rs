//! Address resolution for the queue transport.
//!
//! Container schedulers hand out hostnames, but the transport wants literal
//! IPs for stable binds. `tcp://` endpoints get their host resolved ahead of
//! time; every other scheme passes through untouched.

use std::net::{IpAddr, ToSocketAddrs};

use tracing::error;

/// Resolve the host of a `tcp://host:port` endpoint. On resolution failure
/// the address is returned as-is and the failure is logged.
pub fn resolve_zmq_address(address: &str) -> String {
    let Some((scheme, rest)) = address.split_once("://") else {
        return address.to_string();
    };
    if scheme != "tcp" {
        return address.to_string();
    }
    let Some((host, port)) = rest.rsplit_once(':') else {
        return address.to_string();
    };
    match resolve_hostname(host) {
        Some(ip) => format!("{scheme}://{ip}:{port}"),
        None => {
            error!(address, host, "Could not resolve hostname, using address as-is");
            address.to_string()
        }
    }
}

fn resolve_hostname(hostname: &str) -> Option<IpAddr> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Some(ip);
    }
    (hostname, 0)
        .to_socket_addrs()
        .ok()?
        .next()
        .map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_ips_pass_through() {
        assert_eq!(
            resolve_zmq_address("tcp://127.0.0.1:5555"),
            "tcp://127.0.0.1:5555"
        );
    }

    #[test]
    fn localhost_resolves_to_loopback() {
        assert_eq!(
            resolve_zmq_address("tcp://localhost:5555"),
            "tcp://127.0.0.1:5555"
        );
    }

    #[test]
    fn non_tcp_schemes_are_untouched() {
        assert_eq!(
            resolve_zmq_address("inproc://build-info"),
            "inproc://build-info"
        );
    }

    #[test]
    fn unresolvable_hostnames_fall_back_to_the_input() {
        let address = "tcp://no-such-host.invalid:5555";
        assert_eq!(resolve_zmq_address(address), address);
    }
}
