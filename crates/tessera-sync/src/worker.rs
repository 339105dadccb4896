//! The single worker lane that owns a connection's session.
//!
//! Network readers never touch session state. They decode packets into
//! [`Task`]s and queue them on the lane; the lane executes them one at a
//! time and hands the produced bytes to the writer. Disconnection is a task
//! like any other, so teardown never interleaves with a mutation.
//!
//! World events must reach the lane in full. A lane too far behind to take
//! one more is shut down rather than left running with a stale view.

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use crate::intent::MovementIntention;
use crate::position::Direction;
use crate::processor::MovementProcessor;
use crate::session::{SyncSession, WorldEvent};
use crate::wire::OutputMessage;
use crate::world::WorldView;

/// Default number of tasks a lane buffers before senders wait.
pub const DEFAULT_LANE_DEPTH: usize = 1024;

/// Work for a session lane.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionTask {
    EnterWorld,
    Intention(MovementIntention),
    Step(Direction),
    StopWalk,
    Turn(Direction),
    Resize { width: u8, height: u8 },
    Ping { ping_id: u32 },
    LegacyPing,
    World(Arc<WorldEvent>),
    Disconnect,
}

/// A task and the instant after which running it is pointless.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub kind: SessionTask,
    pub deadline: Option<Instant>,
}

impl Task {
    pub fn new(kind: SessionTask) -> Self {
        Self {
            kind,
            deadline: None,
        }
    }

    pub fn with_deadline(kind: SessionTask, deadline: Instant) -> Self {
        Self {
            kind,
            deadline: Some(deadline),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now > deadline)
    }
}

impl From<SessionTask> for Task {
    fn from(kind: SessionTask) -> Self {
        Self::new(kind)
    }
}

/// Errors returned when queueing work on a lane.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// The lane has shut down.
    #[error("worker lane closed")]
    LaneClosed,

    /// The lane's queue is full.
    #[error("worker lane full")]
    LaneFull,
}

/// Sending side of a lane. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LaneHandle {
    tx: mpsc::Sender<Task>,
    overflow: Arc<Notify>,
}

/// Receiving side of a lane, consumed by [`run_lane`].
#[derive(Debug)]
pub struct LaneTasks {
    rx: mpsc::Receiver<Task>,
    overflow: Arc<Notify>,
}

impl LaneHandle {
    /// Queues a task, waiting for room.
    pub async fn submit(&self, task: impl Into<Task>) -> Result<(), WorkerError> {
        self.tx
            .send(task.into())
            .await
            .map_err(|_| WorkerError::LaneClosed)
    }

    /// Queues a task without waiting.
    pub fn try_submit(&self, task: impl Into<Task>) -> Result<(), WorkerError> {
        self.tx.try_send(task.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkerError::LaneFull,
            mpsc::error::TrySendError::Closed(_) => WorkerError::LaneClosed,
        })
    }

    /// Queues a task that must not be lost. A full lane is told to shut
    /// down and [`WorkerError::LaneFull`] is returned.
    pub fn deliver(&self, task: impl Into<Task>) -> Result<(), WorkerError> {
        let result = self.try_submit(task);
        if result == Err(WorkerError::LaneFull) {
            self.overflow.notify_one();
        }
        result
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the lane has stopped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

/// Creates a lane with room for `depth` queued tasks.
pub fn lane(depth: usize) -> (LaneHandle, LaneTasks) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let overflow = Arc::new(Notify::new());
    (
        LaneHandle {
            tx,
            overflow: Arc::clone(&overflow),
        },
        LaneTasks { rx, overflow },
    )
}

/// Runs one task against the session and returns the bytes it produced.
pub fn execute<W: WorldView + ?Sized>(
    session: &mut SyncSession<W>,
    task: SessionTask,
    processor: &mut dyn MovementProcessor,
) -> OutputMessage {
    match task {
        SessionTask::EnterWorld => session.enter_world(),
        SessionTask::Intention(intent) => session.handle_intention(&intent, processor),
        SessionTask::Step(direction) => {
            session.step(direction, processor);
            OutputMessage::new()
        }
        SessionTask::StopWalk => {
            session.stop_walk(processor);
            OutputMessage::new()
        }
        SessionTask::Turn(direction) => {
            session.turn(direction, processor);
            OutputMessage::new()
        }
        SessionTask::Resize { width, height } => session.resize(width, height),
        SessionTask::Ping { ping_id } => session.ping(ping_id),
        SessionTask::LegacyPing => session.legacy_ping(),
        SessionTask::World(event) => session.apply_world_event(&event),
        SessionTask::Disconnect => OutputMessage::new(),
    }
}

/// Drains the lane until a `Disconnect` task arrives, every handle is
/// dropped, the writer goes away, or a task could not be delivered. Returns
/// the session for inspection.
pub async fn run_lane<W, P>(
    mut session: SyncSession<W>,
    mut tasks: LaneTasks,
    mut processor: P,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
) -> SyncSession<W>
where
    W: WorldView + ?Sized,
    P: MovementProcessor,
{
    loop {
        let task = tokio::select! {
            biased;
            () = tasks.overflow.notified() => {
                tracing::warn!(
                    "Lane for {:?} fell behind the world, closing",
                    session.viewer().id
                );
                break;
            }
            task = tasks.rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };
        if task.is_expired(Instant::now()) {
            tracing::debug!("Dropping expired task {:?}", task.kind);
            continue;
        }
        if matches!(task.kind, SessionTask::Disconnect) {
            tracing::debug!("Lane for {:?} disconnecting", session.viewer().id);
            break;
        }

        let msg = execute(&mut session, task.kind, &mut processor);
        if msg.is_empty() {
            continue;
        }
        if outbound.send(msg.into_bytes()).is_err() {
            tracing::debug!("Writer for {:?} is gone, stopping lane", session.viewer().id);
            break;
        }
    }
    tasks.rx.close();
    session
}
