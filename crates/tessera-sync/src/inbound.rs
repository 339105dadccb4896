//! Decoding of inbound client packets into lane tasks.

use std::time::Duration;

use tokio::time::Instant;

use crate::intent::MovementIntention;
use crate::position::Direction;
use crate::wire::{PacketError, PacketReader, client_opcode};
use crate::worker::{SessionTask, Task};

/// Default lifetime of a time-sensitive task.
pub const DEFAULT_TASK_EXPIRATION: Duration = Duration::from_millis(2000);

fn step_direction(op: u8) -> Option<Direction> {
    match op {
        client_opcode::STEP_NORTH => Some(Direction::North),
        client_opcode::STEP_EAST => Some(Direction::East),
        client_opcode::STEP_SOUTH => Some(Direction::South),
        client_opcode::STEP_WEST => Some(Direction::West),
        client_opcode::STEP_NORTH_EAST => Some(Direction::NorthEast),
        client_opcode::STEP_SOUTH_EAST => Some(Direction::SouthEast),
        client_opcode::STEP_SOUTH_WEST => Some(Direction::SouthWest),
        client_opcode::STEP_NORTH_WEST => Some(Direction::NorthWest),
        _ => None,
    }
}

fn turn_direction(op: u8) -> Option<Direction> {
    match op {
        client_opcode::TURN_NORTH => Some(Direction::North),
        client_opcode::TURN_EAST => Some(Direction::East),
        client_opcode::TURN_SOUTH => Some(Direction::South),
        client_opcode::TURN_WEST => Some(Direction::West),
        _ => None,
    }
}

/// Decodes one packet. Unknown opcodes and dropped intentions yield
/// `Ok(None)`; turns expire `expiration` after `now`.
pub fn decode_packet(
    payload: &[u8],
    now: Instant,
    expiration: Duration,
) -> Result<Option<Task>, PacketError> {
    let mut reader = PacketReader::new(payload);
    let op = reader.get_u8().map_err(|_| PacketError::Empty)?;

    let kind = match op {
        client_opcode::LOGOUT => SessionTask::Disconnect,
        client_opcode::LEGACY_PING => SessionTask::LegacyPing,
        client_opcode::PING => {
            let ping_id = reader.get_u32()?;
            let local_ping = reader.get_u16()?;
            let fps = reader.get_u16()?;
            tracing::trace!("Ping {} (local {} ms, {} fps)", ping_id, local_ping, fps);
            SessionTask::Ping { ping_id }
        }
        client_opcode::RESIZE_VIEWPORT => {
            let width = reader.get_u8()?;
            let height = reader.get_u8()?;
            SessionTask::Resize { width, height }
        }
        client_opcode::WALK => match MovementIntention::decode(&mut reader)? {
            Some(intent) => SessionTask::Intention(intent),
            None => return Ok(None),
        },
        client_opcode::STOP_WALK => SessionTask::StopWalk,
        op => {
            if let Some(direction) = step_direction(op) {
                SessionTask::Step(direction)
            } else if let Some(direction) = turn_direction(op) {
                return Ok(Some(Task::with_deadline(
                    SessionTask::Turn(direction),
                    now + expiration,
                )));
            } else {
                tracing::trace!("Ignoring opcode {:#04x}", op);
                return Ok(None);
            }
        }
    };
    Ok(Some(Task::new(kind)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::WalkFlags;
    use crate::position::{PathStep, Position};
    use crate::wire::OutputMessage;

    fn decode(bytes: &[u8]) -> Result<Option<Task>, PacketError> {
        decode_packet(bytes, Instant::now(), DEFAULT_TASK_EXPIRATION)
    }

    #[test]
    fn test_empty_payload_is_error() {
        assert_eq!(decode(&[]), Err(PacketError::Empty));
    }

    #[test]
    fn test_unknown_opcode_is_ignored() {
        assert_eq!(decode(&[0x96, 1, 2, 3]), Ok(None));
    }

    #[test]
    fn test_logout_becomes_disconnect() {
        let task = decode(&[0x14]).unwrap().unwrap();
        assert_eq!(task.kind, SessionTask::Disconnect);
        assert_eq!(task.deadline, None);
    }

    #[test]
    fn test_ping_reads_all_fields() {
        let mut msg = OutputMessage::new();
        msg.add_u8(0x40);
        msg.add_u32(77);
        msg.add_u16(30);
        msg.add_u16(60);
        let task = decode(msg.as_bytes()).unwrap().unwrap();
        assert_eq!(task.kind, SessionTask::Ping { ping_id: 77 });

        assert!(matches!(
            decode(&[0x40, 1, 0]),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn test_steps_and_stop() {
        assert_eq!(
            decode(&[0x65]).unwrap().unwrap().kind,
            SessionTask::Step(Direction::North)
        );
        assert_eq!(
            decode(&[0x6C]).unwrap().unwrap().kind,
            SessionTask::Step(Direction::SouthWest)
        );
        assert_eq!(decode(&[0x69]).unwrap().unwrap().kind, SessionTask::StopWalk);
    }

    #[test]
    fn test_turn_carries_deadline() {
        let now = Instant::now();
        let task = decode_packet(&[0x71], now, Duration::from_millis(500))
            .unwrap()
            .unwrap();
        assert_eq!(task.kind, SessionTask::Turn(Direction::South));
        assert_eq!(task.deadline, Some(now + Duration::from_millis(500)));
    }

    #[test]
    fn test_resize_packet() {
        assert_eq!(
            decode(&[0x42, 21, 15]).unwrap().unwrap().kind,
            SessionTask::Resize {
                width: 21,
                height: 15
            }
        );
    }

    #[test]
    fn test_intention_packet() {
        let intent = MovementIntention {
            walk_sequence: 4,
            denial_token: 1,
            origin: Position::new(100, 100, 7),
            flags: WalkFlags::default(),
            path: vec![PathStep::Move(Direction::South)],
        };
        let mut msg = OutputMessage::new();
        intent.write(&mut msg);
        assert_eq!(
            decode(msg.as_bytes()).unwrap().unwrap().kind,
            SessionTask::Intention(intent)
        );
    }

    #[test]
    fn test_intention_with_no_steps_is_dropped() {
        let mut msg = OutputMessage::new();
        msg.add_u8(0x45);
        msg.add_u32(0);
        msg.add_i32(0);
        msg.add_position(Position::new(1, 1, 7));
        msg.add_u8(0);
        msg.add_u16(0);
        assert_eq!(decode(msg.as_bytes()), Ok(None));
    }
}
