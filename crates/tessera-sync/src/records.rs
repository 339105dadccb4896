//! Fixed-layout outbound records that carry no map stream.

use crate::position::{Direction, Position, STACK_POSITION_LIMIT};
use crate::viewport::Viewport;
use crate::wire::{OutputMessage, entity_tag, opcode};
use crate::world::CreatureId;

/// Removes the thing at `stack`. Nothing is written for stack positions the
/// client cannot address.
pub fn write_remove_thing(msg: &mut OutputMessage, position: Position, stack: u8) {
    if stack >= STACK_POSITION_LIMIT {
        return;
    }
    msg.add_u8(opcode::REMOVE_TILE_THING);
    msg.add_position(position);
    msg.add_u8(stack);
}

pub fn write_move_creature(
    msg: &mut OutputMessage,
    from: Position,
    from_stack: u8,
    to: Position,
) {
    msg.add_u8(opcode::MOVE_CREATURE);
    msg.add_position(from);
    msg.add_u8(from_stack);
    msg.add_position(to);
}

pub fn write_creature_turn(
    msg: &mut OutputMessage,
    position: Position,
    stack: u8,
    id: CreatureId,
    direction: Direction,
) {
    msg.add_u8(opcode::UPDATE_TILE_THING);
    msg.add_position(position);
    msg.add_u8(stack);
    msg.add_u16(entity_tag::CREATURE_TURN);
    msg.add_u32(id.0);
    msg.add_u8(direction as u8);
}

pub fn write_aware_range(msg: &mut OutputMessage, viewport: &Viewport) {
    msg.add_u8(opcode::AWARE_RANGE);
    msg.add_u8(viewport.width());
    msg.add_u8(viewport.height());
}

pub fn write_ping(msg: &mut OutputMessage, ping_id: u32) {
    msg.add_u8(opcode::PING);
    msg.add_u32(ping_id);
}

pub fn write_legacy_ping(msg: &mut OutputMessage) {
    msg.add_u8(opcode::LEGACY_PING);
}

pub fn write_walk_sequence(msg: &mut OutputMessage, walk_sequence: u32) {
    msg.add_u8(opcode::WALK_SEQUENCE);
    msg.add_u32(walk_sequence);
}

/// Cancels the client's current walk and announces the bumped sequence.
pub fn write_cancel_walk(msg: &mut OutputMessage, facing: Direction, walk_sequence: u32) {
    msg.add_u8(opcode::CANCEL_WALK);
    msg.add_u8(facing as u8);
    write_walk_sequence(msg, walk_sequence);
}

/// Tells the client the denial counter of a tile it may predict onto.
pub fn write_predictive_cancel(
    msg: &mut OutputMessage,
    position: Position,
    facing: Direction,
    counter: i32,
) {
    msg.add_u8(opcode::PREDICTIVE_CANCEL);
    msg.add_position(position);
    msg.add_u8(facing as u8);
    msg.add_i32(counter);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_thing_skips_unaddressable_stack() {
        let mut msg = OutputMessage::new();
        write_remove_thing(&mut msg, Position::new(1, 2, 7), 10);
        assert!(msg.is_empty());

        write_remove_thing(&mut msg, Position::new(1, 2, 7), 9);
        assert_eq!(msg.as_bytes(), &[0x6C, 1, 0, 2, 0, 7, 9]);
    }

    #[test]
    fn test_cancel_walk_is_followed_by_sequence() {
        let mut msg = OutputMessage::new();
        write_cancel_walk(&mut msg, Direction::West, 5);
        assert_eq!(msg.as_bytes(), &[0x45, 3, 0x47, 5, 0, 0, 0]);
    }

    #[test]
    fn test_predictive_cancel_carries_counter() {
        let mut msg = OutputMessage::new();
        write_predictive_cancel(&mut msg, Position::new(10, 20, 7), Direction::North, 2);
        assert_eq!(msg.as_bytes(), &[0x46, 10, 0, 20, 0, 7, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_turn_record_layout() {
        let mut msg = OutputMessage::new();
        write_creature_turn(&mut msg, Position::new(1, 1, 7), 1, CreatureId(0x10), Direction::East);
        assert_eq!(msg.as_bytes(), &[
            0x6B, 1, 0, 1, 0, 7, 1, 0x63, 0, 0x10, 0, 0, 0, 1
        ]);
    }
}
