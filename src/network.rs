//! This module contains some help functions regarding sockets and addresses
//!
//! Functions
//! - [create_reusable_listener]: Binds a TCP listener that a restarted process can rebind at once.
//! - [local_ip]: The address other hosts can reach this dispatcher on.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;

use crate::print;

/// Creates a non blocking TCP listener with reusable address.
///
/// A promoted backup binds the same well-known port the dead primary used, so the
/// port must not be held back by sockets in `TIME_WAIT`.
///
/// ## Parameters
/// - `ip`: Address to bind, e.g. `"0.0.0.0"`
/// - `port`: Port to bind. `0` gives an ephemeral port.
pub fn create_reusable_listener(ip: &str, port: u16) -> io::Result<TcpListener> {
    let ip: IpAddr = ip
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("bad bind address {}: {}", ip, e)))?;
    let addr = SocketAddr::new(ip, port);
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    TcpListener::from_std(socket.into())
}

/// Returns the local IP address, falling back to loopback when it cannot be found.
pub fn local_ip() -> IpAddr {
    match local_ip_address::local_ip() {
        Ok(ip) => ip,
        Err(e) => {
            print::warn(format!("Failed to get local IP, showing loopback: {}", e));
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
