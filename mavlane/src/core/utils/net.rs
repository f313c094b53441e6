use std::net::{SocketAddr, ToSocketAddrs};

use crate::prelude::*;

/// Resolves `host:port` into the first matching socket address.
pub(crate) fn resolve_socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("can't resolve {host}:{port}"),
            ))
        })
}

/// Returns `true` for errors produced by a read timeout.
pub(crate) fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
