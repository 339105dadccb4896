//! Socket setup for the game listener and the client sockets it accepts.
//!
//! Clients send small movement packets that must not wait on Nagle, and
//! idle players are kept alive by the OS rather than by a protocol ping.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};

/// Interval between keepalive packets once the idle time has passed.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Options for the listener and every accepted client socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    /// Send each frame immediately. Default: true.
    pub tcp_nodelay: bool,
    /// Idle time before the OS starts sending keepalives, or `None` to leave
    /// keepalive off. Default: 60s.
    pub keepalive: Option<Duration>,
    /// Connections the listener queues before accepting. Default: 128.
    pub backlog: i32,
}

impl SocketConfig {
    /// Defaults with the nodelay setting from the network config.
    pub fn with_nodelay(tcp_nodelay: bool) -> Self {
        Self {
            tcp_nodelay,
            ..Self::default()
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive: Some(Duration::from_secs(60)),
            backlog: 128,
        }
    }
}

/// Applies the per-client options to an accepted socket.
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;
    if let Some(idle) = config.keepalive {
        let keepalive = TcpKeepalive::new()
            .with_time(idle)
            .with_interval(KEEPALIVE_INTERVAL);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}

/// Binds the game listener. An IPv6 address listens dual-stack.
pub fn create_listener(addr: SocketAddr, config: &SocketConfig) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    // Windows lets a second process steal the port with SO_REUSEADDR.
    #[cfg(not(target_os = "windows"))]
    socket.set_reuse_address(true)?;

    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(config.backlog)?;
    TcpListener::from_std(socket.into())
}

/// Resolves the configured bind host and port. An IPv6 host such as `::`
/// gives a dual-stack listener.
pub fn bind_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    let ip: IpAddr = host.trim_matches(['[', ']']).parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid bind address {host:?}: {e}"),
        )
    })?;
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Binds a loopback listener, connects to it and returns the server side
    /// of the connection.
    async fn accept_one(listen: SocketAddr, connect_ip: IpAddr) -> Option<TcpStream> {
        let listener = create_listener(listen, &SocketConfig::default()).ok()?;
        let port = listener.local_addr().unwrap().port();
        let _client = TcpStream::connect(SocketAddr::new(connect_ip, port))
            .await
            .unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        Some(accepted)
    }

    #[tokio::test]
    async fn test_accepted_client_gets_game_options() {
        let accepted = accept_one(bind_address("127.0.0.1", 0).unwrap(), [127, 0, 0, 1].into())
            .await
            .unwrap();
        configure_stream(&accepted, &SocketConfig::default()).unwrap();

        assert!(accepted.nodelay().unwrap());
        assert!(SockRef::from(&accepted).keepalive().unwrap());
    }

    #[tokio::test]
    async fn test_options_follow_network_config() {
        let accepted = accept_one(bind_address("127.0.0.1", 0).unwrap(), [127, 0, 0, 1].into())
            .await
            .unwrap();
        let config = SocketConfig {
            keepalive: None,
            ..SocketConfig::with_nodelay(false)
        };
        configure_stream(&accepted, &config).unwrap();

        assert!(!accepted.nodelay().unwrap());
        assert!(!SockRef::from(&accepted).keepalive().unwrap());
    }

    #[tokio::test]
    async fn test_ipv6_listener_takes_ipv4_clients() {
        // Hosts without IPv6 cannot bind `::` at all.
        let Some(accepted) =
            accept_one(bind_address("::", 0).unwrap(), [127, 0, 0, 1].into()).await
        else {
            return;
        };
        assert!(accepted.peer_addr().is_ok());
    }

    #[test]
    fn test_bind_address_parses_hosts() {
        let v4 = bind_address("0.0.0.0", 7172).unwrap();
        assert!(v4.is_ipv4());
        assert_eq!(v4.port(), 7172);

        assert!(bind_address("[::]", 7172).unwrap().is_ipv6());
        assert!(bind_address("localhost", 7172).is_err());
    }

    #[test]
    fn test_with_nodelay_keeps_other_defaults() {
        let config = SocketConfig::with_nodelay(false);
        assert!(!config.tcp_nodelay);
        assert_eq!(config.keepalive, Some(Duration::from_secs(60)));
        assert_eq!(config.backlog, 128);
    }
}
