//! The boundary to the authoritative simulation: validated movement requests
//! leave the connection lane through a [`MovementProcessor`].

use tokio::sync::mpsc;

use crate::intent::WalkFlags;
use crate::position::{Direction, Position};
use crate::world::CreatureId;

/// A movement request the simulation should carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovementCommand {
    /// Walk a validated path from `origin`.
    Walk {
        player: CreatureId,
        origin: Position,
        flags: WalkFlags,
        path: Vec<Direction>,
    },
    /// A single keyboard step.
    Step {
        player: CreatureId,
        direction: Direction,
    },
    /// Abort any queued walk.
    StopWalk { player: CreatureId },
    /// Face a direction without moving.
    Turn {
        player: CreatureId,
        direction: Direction,
    },
}

impl MovementCommand {
    pub fn player(&self) -> CreatureId {
        match self {
            Self::Walk { player, .. }
            | Self::Step { player, .. }
            | Self::StopWalk { player }
            | Self::Turn { player, .. } => *player,
        }
    }
}

/// Accepts validated movement. Implementations must not block.
pub trait MovementProcessor: Send {
    fn submit(&mut self, command: MovementCommand);
}

impl MovementProcessor for mpsc::UnboundedSender<MovementCommand> {
    fn submit(&mut self, command: MovementCommand) {
        if self.send(command).is_err() {
            tracing::warn!("Movement processor is gone, dropping command");
        }
    }
}

/// Collects commands in order. Used when the caller drains them itself.
impl MovementProcessor for Vec<MovementCommand> {
    fn submit(&mut self, command: MovementCommand) {
        self.push(command);
    }
}
