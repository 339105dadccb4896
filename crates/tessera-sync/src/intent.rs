//! Client movement intentions: a predicted path plus the counters the client
//! assumed when it computed it.

use crate::position::{Direction, PathStep, Position};
use crate::wire::{OutputMessage, PacketError, PacketReader, client_opcode};

/// Longest path a client may submit.
pub const MAX_PATH_STEPS: u16 = 4096;

const FLAG_PREWALK: u8 = 0x01;
const FLAG_AUTOWALK: u8 = 0x02;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkFlags {
    /// The client already started animating the first step.
    pub prewalk: bool,
    /// The path came from the client's pathfinder rather than key input.
    pub autowalk: bool,
}

impl WalkFlags {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            prewalk: byte & FLAG_PREWALK != 0,
            autowalk: byte & FLAG_AUTOWALK != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = 0;
        if self.prewalk {
            byte |= FLAG_PREWALK;
        }
        if self.autowalk {
            byte |= FLAG_AUTOWALK;
        }
        byte
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementIntention {
    /// Client's view of the server walk sequence.
    pub walk_sequence: u32,
    /// Denial counter the client believed applied to the first destination.
    pub denial_token: i32,
    /// Where the client thinks the player stands, prewalk included.
    pub origin: Position,
    pub flags: WalkFlags,
    pub path: Vec<PathStep>,
}

impl MovementIntention {
    /// Decodes the packet body after the opcode. A step count of zero or
    /// above [`MAX_PATH_STEPS`] yields `Ok(None)`: the packet is dropped
    /// without closing the connection.
    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Option<Self>, PacketError> {
        let walk_sequence = reader.get_u32()?;
        let denial_token = reader.get_i32()?;
        let origin = reader.get_position()?;
        let flags = WalkFlags::from_byte(reader.get_u8()?);

        let steps = reader.get_u16()?;
        if steps == 0 || steps > MAX_PATH_STEPS {
            tracing::debug!("Dropping movement intention with {} steps", steps);
            return Ok(None);
        }

        let mut path = Vec::with_capacity(usize::from(steps));
        for _ in 0..steps {
            path.push(PathStep::from_code(reader.get_u8()?));
        }

        Ok(Some(Self {
            walk_sequence,
            denial_token,
            origin,
            flags,
            path,
        }))
    }

    /// Writes the full packet, opcode included, as a client would.
    pub fn write(&self, msg: &mut OutputMessage) {
        msg.add_u8(client_opcode::WALK);
        msg.add_u32(self.walk_sequence);
        msg.add_i32(self.denial_token);
        msg.add_position(self.origin);
        msg.add_u8(self.flags.to_byte());
        msg.add_u16(self.path.len().min(usize::from(u16::MAX)) as u16);
        for step in &self.path {
            msg.add_u8(match step {
                PathStep::Move(direction) => direction.path_code(),
                PathStep::Idle => 0,
            });
        }
    }

    /// Tile the first step leads to. An idle first step stays on the origin.
    pub fn first_destination(&self) -> Position {
        match self.path.first() {
            Some(PathStep::Move(direction)) => self.origin.step(*direction),
            _ => self.origin,
        }
    }

    /// The real moves in the path, idle steps removed.
    pub fn directions(&self) -> Vec<Direction> {
        self.path
            .iter()
            .filter_map(|step| match step {
                PathStep::Move(direction) => Some(*direction),
                PathStep::Idle => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(steps: u16, codes: &[u8]) -> Vec<u8> {
        let mut msg = OutputMessage::new();
        msg.add_u32(3);
        msg.add_i32(-1);
        msg.add_position(Position::new(100, 200, 7));
        msg.add_u8(0x03);
        msg.add_u16(steps);
        for code in codes {
            msg.add_u8(*code);
        }
        msg.into_bytes()
    }

    #[test]
    fn test_decode_fields_in_order() {
        let bytes = body(2, &[3, 8]);
        let intent = MovementIntention::decode(&mut PacketReader::new(&bytes))
            .unwrap()
            .unwrap();
        assert_eq!(intent.walk_sequence, 3);
        assert_eq!(intent.denial_token, -1);
        assert_eq!(intent.origin, Position::new(100, 200, 7));
        assert!(intent.flags.prewalk);
        assert!(intent.flags.autowalk);
        assert_eq!(intent.path, vec![
            PathStep::Move(Direction::North),
            PathStep::Move(Direction::SouthEast)
        ]);
        assert_eq!(intent.first_destination(), Position::new(100, 199, 7));
    }

    #[test]
    fn test_zero_and_oversized_step_counts_are_dropped() {
        let bytes = body(0, &[]);
        assert_eq!(
            MovementIntention::decode(&mut PacketReader::new(&bytes)).unwrap(),
            None
        );
        let bytes = body(4097, &[]);
        assert_eq!(
            MovementIntention::decode(&mut PacketReader::new(&bytes)).unwrap(),
            None
        );
    }

    #[test]
    fn test_max_step_count_is_accepted() {
        let codes = vec![1u8; 4096];
        let bytes = body(4096, &codes);
        let intent = MovementIntention::decode(&mut PacketReader::new(&bytes))
            .unwrap()
            .unwrap();
        assert_eq!(intent.path.len(), 4096);
    }

    #[test]
    fn test_unknown_codes_consume_a_byte() {
        let bytes = body(3, &[0, 9, 5]);
        let intent = MovementIntention::decode(&mut PacketReader::new(&bytes))
            .unwrap()
            .unwrap();
        assert_eq!(intent.path.len(), 3);
        assert_eq!(intent.directions(), vec![Direction::West]);
        assert_eq!(intent.first_destination(), intent.origin);
    }

    #[test]
    fn test_short_path_is_truncated_error() {
        let bytes = body(4, &[1, 1]);
        assert!(matches!(
            MovementIntention::decode(&mut PacketReader::new(&bytes)),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn test_write_matches_decode() {
        let intent = MovementIntention {
            walk_sequence: 9,
            denial_token: 2,
            origin: Position::new(5, 6, 8),
            flags: WalkFlags {
                prewalk: true,
                autowalk: false,
            },
            path: vec![PathStep::Move(Direction::East), PathStep::Idle],
        };
        let mut msg = OutputMessage::new();
        intent.write(&mut msg);
        let mut reader = PacketReader::new(msg.as_bytes());
        assert_eq!(reader.get_u8().unwrap(), client_opcode::WALK);
        assert_eq!(MovementIntention::decode(&mut reader).unwrap(), Some(intent));
    }
}
