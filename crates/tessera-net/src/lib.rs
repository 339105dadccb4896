//! TCP transport for world sync: checksummed framing, socket options, and the
//! accept loop that wires each connection to its worker lane.

pub mod framing;
pub mod platform;
pub mod tcp_server;

pub use framing::{FrameConfig, FrameError, adler32, read_frame, write_frame};
pub use platform::{SocketConfig, bind_address, configure_stream, create_listener};
pub use tcp_server::{
    ConnectionHandler, ConnectionId, ConnectionLimitReached, ConnectionMap, GameServer,
    IdGenerator, ServerConfig,
};
