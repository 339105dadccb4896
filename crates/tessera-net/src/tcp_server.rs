//! TCP server: accepts connections, frames their traffic, and feeds each one
//! into its own worker lane.
//!
//! Every connection gets a reader loop and a writer task. The reader decodes
//! frames into lane tasks; the writer drains the bytes the lane produces.
//! Neither touches session state. A fatal frame error or shutdown enqueues a
//! `Disconnect` so the lane tears the session down between tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tessera_sync::{
    Challenge, DEFAULT_TASK_EXPIRATION, LaneHandle, NonceSource, OutputMessage, RandomNonce,
    SessionTask, decode_packet,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::time::Instant;

use crate::framing::{FrameConfig, FrameError, read_frame, write_frame};
use crate::platform::{SocketConfig, configure_stream, create_listener};

/// Unique identifier for a TCP connection within a server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionId`].
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Error returned when the connection map is at capacity.
#[derive(Debug, thiserror::Error)]
#[error("connection limit reached")]
pub struct ConnectionLimitReached;

/// Lanes of the active connections keyed by [`ConnectionId`].
pub struct ConnectionMap {
    inner: RwLock<HashMap<ConnectionId, LaneHandle>>,
    max_connections: usize,
}

impl ConnectionMap {
    /// Create a new map with the given capacity limit.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Insert a connection. Returns `Err` if the map is at capacity.
    pub async fn insert(
        &self,
        id: ConnectionId,
        lane: LaneHandle,
    ) -> Result<(), ConnectionLimitReached> {
        let mut map = self.inner.write().await;
        if map.len() >= self.max_connections {
            return Err(ConnectionLimitReached);
        }
        map.insert(id, lane);
        Ok(())
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, id: &ConnectionId) -> Option<LaneHandle> {
        self.inner.write().await.remove(id)
    }

    /// Lane of a connection, if it is still active.
    pub async fn get(&self, id: &ConnectionId) -> Option<LaneHandle> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn is_full(&self) -> bool {
        self.inner.read().await.len() >= self.max_connections
    }

    /// Return the number of active connections.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Return whether the map is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Creates the session side of a connection.
///
/// `open` is called once per accepted connection. It builds the session,
/// spawns its lane writing into `outbound`, and returns the lane's handle;
/// `None` refuses the connection. `close` runs after the connection's reader
/// has stopped and its `Disconnect` has been queued.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn open(
        &self,
        id: ConnectionId,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Option<LaneHandle>;

    fn close(&self, _id: ConnectionId) {}
}

/// Configuration for [`GameServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to. Default: `0.0.0.0:7172`.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections. Default: 256.
    pub max_connections: usize,
    pub frame: FrameConfig,
    pub socket: SocketConfig,
    /// Lifetime of time-sensitive tasks decoded from client packets.
    pub task_expiration: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7172)),
            max_connections: 256,
            frame: FrameConfig::default(),
            socket: SocketConfig::default(),
            task_expiration: DEFAULT_TASK_EXPIRATION,
        }
    }
}

/// State every connection task shares.
struct Shared<H> {
    config: ServerConfig,
    connections: Arc<ConnectionMap>,
    handler: Arc<H>,
    nonces: Mutex<Box<dyn NonceSource>>,
}

/// TCP server that accepts connections and manages their lifecycle.
pub struct GameServer<H: ConnectionHandler> {
    shared: Arc<Shared<H>>,
    id_gen: IdGenerator,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<H: ConnectionHandler> GameServer<H> {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig, handler: Arc<H>) -> Self {
        Self::with_nonce_source(config, handler, Box::new(RandomNonce))
    }

    /// Create a server whose challenges draw nonces from `nonces`.
    pub fn with_nonce_source(
        config: ServerConfig,
        handler: Arc<H>,
        nonces: Box<dyn NonceSource>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                connections: Arc::new(ConnectionMap::new(config.max_connections)),
                config,
                handler,
                nonces: Mutex::new(nonces),
            }),
            id_gen: IdGenerator::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Active connections.
    pub fn connections(&self) -> &Arc<ConnectionMap> {
        &self.shared.connections
    }

    /// Bind to the configured address and run the accept loop.
    pub async fn run(&self) -> std::io::Result<()> {
        let bind_addr = self.shared.config.bind_addr;
        let listener = create_listener(bind_addr, &self.shared.config.socket)?;
        tracing::info!("Server listening on {}", bind_addr);
        self.run_with_listener(listener).await
    }

    /// Run the accept loop with a pre-bound listener (useful for tests).
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = result?;
                    if let Err(e) = configure_stream(&stream, &self.shared.config.socket) {
                        tracing::warn!("Failed to configure socket for {peer_addr}: {e}");
                    }

                    if self.shared.connections.is_full().await {
                        tracing::warn!("Connection limit reached, rejecting {peer_addr}");
                        continue;
                    }

                    let id = self.id_gen.next_id();
                    tracing::info!("Accepted connection {id:?} from {peer_addr}");

                    let shared = Arc::clone(&self.shared);
                    let task_shutdown = self.shutdown_rx.clone();
                    tokio::spawn(async move {
                        serve_connection(shared, id, stream, task_shutdown).await;
                        tracing::info!("Connection {id:?} closed");
                    });
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn unix_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32)
}

/// Runs one connection from challenge to teardown.
async fn serve_connection<H: ConnectionHandler>(
    shared: Arc<Shared<H>>,
    id: ConnectionId,
    stream: TcpStream,
    shutdown_rx: watch::Receiver<bool>,
) {
    let (reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    // The challenge is queued before the lane exists, so it is always the
    // first frame on the wire.
    let mut challenge = OutputMessage::new();
    {
        let mut nonces = shared.nonces.lock().await;
        Challenge::new(unix_timestamp(), &mut **nonces).write(&mut challenge);
    }
    let _ = outbound_tx.send(challenge.into_bytes());

    let writer_task = tokio::spawn(write_loop(
        id,
        writer,
        outbound_rx,
        shared.config.frame.clone(),
    ));

    let Some(lane) = shared.handler.open(id, outbound_tx) else {
        tracing::info!("Handler refused connection {id:?}");
        let _ = writer_task.await;
        return;
    };

    if shared.connections.insert(id, lane.clone()).await.is_err() {
        tracing::warn!("Connection limit reached, dropping {id:?}");
    } else {
        read_loop(&shared.config, id, reader, &lane, shutdown_rx).await;
        shared.connections.remove(&id).await;
    }

    let _ = lane.submit(SessionTask::Disconnect).await;
    shared.handler.close(id);
    let _ = writer_task.await;
}

/// Decodes frames into lane tasks until the peer leaves, a frame is
/// malformed, the lane stops, or the server shuts down.
async fn read_loop(
    config: &ServerConfig,
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    lane: &LaneHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = read_frame(&mut reader, &config.frame) => {
                let payload = match frame {
                    Ok(payload) => payload,
                    Err(FrameError::ConnectionClosed) => break,
                    Err(e) => {
                        tracing::warn!("Dropping connection {id:?}: {e}");
                        break;
                    }
                };
                if payload.is_empty() {
                    continue;
                }

                match decode_packet(&payload, Instant::now(), config.task_expiration) {
                    Ok(Some(task)) => {
                        let disconnect = matches!(task.kind, SessionTask::Disconnect);
                        if lane.submit(task).await.is_err() || disconnect {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!("Ignoring malformed packet from {id:?}: {e}"),
                }
            }
            () = lane.closed() => {
                tracing::debug!("Lane of {id:?} stopped, closing connection");
                break;
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// Frames whatever the lane produces until every sender is gone.
async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    frame: FrameConfig,
) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &bytes, &frame).await {
            tracing::debug!("Write to {id:?} failed: {e}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tessera_sync::wire::{client_opcode, opcode};
    use tessera_sync::{
        CreatureId, FixedNonce, MemoryWorld, MovementCommand, Position, SyncConfig, SyncSession,
        Viewer, lane, run_lane,
    };

    /// Opens a plain session per connection on a shared empty world.
    struct TestHandler {
        world: Arc<MemoryWorld>,
    }

    impl ConnectionHandler for TestHandler {
        fn open(
            &self,
            id: ConnectionId,
            outbound: mpsc::UnboundedSender<Vec<u8>>,
        ) -> Option<LaneHandle> {
            let viewer = Viewer::new(CreatureId(id.0 as u32), self.world.spawn());
            let session =
                SyncSession::new(Arc::clone(&self.world), viewer, SyncConfig::default());
            let (handle, tasks) = lane(64);
            tokio::spawn(run_lane(session, tasks, Vec::<MovementCommand>::new(), outbound));
            handle.try_submit(SessionTask::EnterWorld).ok()?;
            Some(handle)
        }
    }

    /// Helper: start a server on an ephemeral port and return the bound address.
    async fn start_test_server(max_connections: usize) -> (SocketAddr, Arc<GameServer<TestHandler>>) {
        let config = ServerConfig {
            max_connections,
            ..ServerConfig::default()
        };
        let handler = Arc::new(TestHandler {
            world: Arc::new(MemoryWorld::new(Position::new(100, 100, 7))),
        });
        let server = Arc::new(GameServer::with_nonce_source(
            config,
            handler,
            Box::new(FixedNonce::new(vec![0x5A])),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let srv = Arc::clone(&server);
        tokio::spawn(async move {
            srv.run_with_listener(listener).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        (addr, server)
    }

    async fn read(stream: &mut TcpStream) -> Result<Vec<u8>, FrameError> {
        tokio::time::timeout(
            Duration::from_secs(2),
            read_frame(stream, &FrameConfig::default()),
        )
        .await
        .expect("timed out waiting for a frame")
    }

    async fn send(stream: &mut TcpStream, payload: &[u8]) {
        write_frame(stream, payload, &FrameConfig::default())
            .await
            .unwrap();
    }

    /// Connects and consumes the challenge and the initial map.
    async fn connect(addr: SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let challenge = read(&mut stream).await.unwrap();
        assert_eq!(challenge[0], opcode::CHALLENGE);
        let entered = read(&mut stream).await.unwrap();
        assert_eq!(entered[0], opcode::AWARE_RANGE);
        stream
    }

    #[tokio::test]
    async fn test_challenge_is_first_frame() {
        let (addr, _server) = start_test_server(16).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let challenge = read(&mut stream).await.unwrap();
        assert_eq!(challenge.len(), 6);
        assert_eq!(challenge[0], opcode::CHALLENGE);
        assert_eq!(challenge[5], 0x5A);

        let entered = read(&mut stream).await.unwrap();
        assert_eq!(&entered[..3], &[opcode::AWARE_RANGE, 17, 13]);
        assert_eq!(entered[3], opcode::MAP_DESCRIPTION);
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let (addr, _server) = start_test_server(16).await;
        let mut stream = connect(addr).await;

        send(&mut stream, &[client_opcode::PING, 9, 0, 0, 0, 1, 0, 60, 0]).await;
        assert_eq!(read(&mut stream).await.unwrap(), vec![opcode::PING, 9, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_malformed_packet_keeps_connection() {
        let (addr, _server) = start_test_server(16).await;
        let mut stream = connect(addr).await;

        // Truncated ping, then an unknown opcode.
        send(&mut stream, &[client_opcode::PING, 1]).await;
        send(&mut stream, &[0xEE]).await;
        send(&mut stream, &[client_opcode::LEGACY_PING]).await;
        assert_eq!(read(&mut stream).await.unwrap(), vec![opcode::LEGACY_PING]);
    }

    #[tokio::test]
    async fn test_bad_checksum_closes_connection() {
        use tokio::io::AsyncWriteExt;

        let (addr, server) = start_test_server(16).await;
        let mut stream = connect(addr).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(server.connections().len().await, 1);

        stream.write_all(&1u32.to_le_bytes()).await.unwrap();
        stream.write_all(&0u32.to_le_bytes()).await.unwrap();
        stream.write_all(&[client_opcode::LEGACY_PING]).await.unwrap();
        stream.flush().await.unwrap();

        assert!(matches!(
            read(&mut stream).await,
            Err(FrameError::ConnectionClosed)
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(server.connections().is_empty().await);
    }

    #[tokio::test]
    async fn test_logout_closes_connection() {
        let (addr, _server) = start_test_server(16).await;
        let mut stream = connect(addr).await;

        send(&mut stream, &[client_opcode::LOGOUT]).await;
        assert!(matches!(
            read(&mut stream).await,
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_max_connections_enforced() {
        let (addr, server) = start_test_server(2).await;

        let _c1 = connect(addr).await;
        let _c2 = connect(addr).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(server.connections().len().await, 2);

        let mut c3 = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            read(&mut c3).await,
            Err(FrameError::ConnectionClosed)
        ));
        assert_eq!(server.connections().len().await, 2);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_closes_connections() {
        let (addr, server) = start_test_server(16).await;
        let mut stream = connect(addr).await;

        server.shutdown();
        assert!(matches!(
            read(&mut stream).await,
            Err(FrameError::ConnectionClosed)
        ));
    }

    /// Hands out lanes that have already stopped.
    struct StoppedLaneHandler;

    impl ConnectionHandler for StoppedLaneHandler {
        fn open(
            &self,
            _id: ConnectionId,
            _outbound: mpsc::UnboundedSender<Vec<u8>>,
        ) -> Option<LaneHandle> {
            let (handle, _tasks) = lane(1);
            Some(handle)
        }
    }

    #[tokio::test]
    async fn test_stopped_lane_closes_connection() {
        let server = Arc::new(GameServer::with_nonce_source(
            ServerConfig::default(),
            Arc::new(StoppedLaneHandler),
            Box::new(FixedNonce::new(vec![0x5A])),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let srv = Arc::clone(&server);
        tokio::spawn(async move {
            srv.run_with_listener(listener).await.unwrap();
        });

        // The client never sends anything; the server still lets go.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert_eq!(read(&mut stream).await.unwrap()[0], opcode::CHALLENGE);
        assert!(matches!(
            read(&mut stream).await,
            Err(FrameError::ConnectionClosed)
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(server.connections().is_empty().await);
    }

    #[tokio::test]
    async fn test_connection_id_uniqueness() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.next_id();
        let id2 = id_gen.next_id();
        let id3 = id_gen.next_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.0 + 1, id2.0);
        assert_eq!(id2.0 + 1, id3.0);
    }
}
