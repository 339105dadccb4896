//! Byte-level codec: an append-only [`OutputMessage`] for outbound records
//! and a bounds-checked [`PacketReader`] for inbound packets.
//!
//! Every multi-byte integer is little-endian. Positions are written as
//! `u16 x, u16 y, u8 z`; strings as a `u16` length followed by the bytes.

use crate::position::Position;

/// Outbound record opcodes.
pub mod opcode {
    pub const CHALLENGE: u8 = 0x1F;
    pub const LEGACY_PING: u8 = 0x1E;
    pub const PING: u8 = 0x40;
    pub const AWARE_RANGE: u8 = 0x42;
    pub const CANCEL_WALK: u8 = 0x45;
    pub const PREDICTIVE_CANCEL: u8 = 0x46;
    pub const WALK_SEQUENCE: u8 = 0x47;
    pub const FLOOR_DESCRIPTION: u8 = 0x4B;
    pub const MAP_DESCRIPTION: u8 = 0x64;
    pub const BAND_NORTH: u8 = 0x65;
    pub const BAND_EAST: u8 = 0x66;
    pub const BAND_SOUTH: u8 = 0x67;
    pub const BAND_WEST: u8 = 0x68;
    pub const UPDATE_TILE: u8 = 0x69;
    pub const ADD_TILE_THING: u8 = 0x6A;
    pub const UPDATE_TILE_THING: u8 = 0x6B;
    pub const REMOVE_TILE_THING: u8 = 0x6C;
    pub const MOVE_CREATURE: u8 = 0x6D;
    pub const FLOOR_UP: u8 = 0xBE;
    pub const FLOOR_DOWN: u8 = 0xBF;
}

/// Inbound packet opcodes.
pub mod client_opcode {
    pub const LOGOUT: u8 = 0x14;
    pub const LEGACY_PING: u8 = 0x1E;
    pub const PING: u8 = 0x40;
    pub const RESIZE_VIEWPORT: u8 = 0x42;
    pub const WALK: u8 = 0x45;
    pub const STEP_NORTH: u8 = 0x65;
    pub const STEP_EAST: u8 = 0x66;
    pub const STEP_SOUTH: u8 = 0x67;
    pub const STEP_WEST: u8 = 0x68;
    pub const STOP_WALK: u8 = 0x69;
    pub const STEP_NORTH_EAST: u8 = 0x6A;
    pub const STEP_SOUTH_EAST: u8 = 0x6B;
    pub const STEP_SOUTH_WEST: u8 = 0x6C;
    pub const STEP_NORTH_WEST: u8 = 0x6D;
    pub const TURN_NORTH: u8 = 0x6F;
    pub const TURN_EAST: u8 = 0x70;
    pub const TURN_SOUTH: u8 = 0x71;
    pub const TURN_WEST: u8 = 0x72;
}

/// Entity tags inside a tile description.
pub mod entity_tag {
    pub const UNKNOWN_CREATURE: u16 = 0x61;
    pub const KNOWN_CREATURE: u16 = 0x62;
    pub const CREATURE_TURN: u16 = 0x63;
}

/// Leading `u16` of every tile description.
pub const ENVIRONMENT_MARKER: u16 = 0x0000;

/// Second byte of a skip marker. Read as a little-endian `u16`, a skip
/// marker is always `>= 0xFF00`.
pub const SKIP_TERMINATOR: u8 = 0xFF;

// ---------------------------------------------------------------------------
// OutputMessage
// ---------------------------------------------------------------------------

/// Growable outbound buffer. One message collects every record a single
/// task produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputMessage {
    buf: Vec<u8>,
}

impl OutputMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn add_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a length-prefixed string, truncated to at most `u16::MAX` bytes.
    pub fn add_string(&mut self, value: &str) {
        // Never split a UTF-8 character.
        let mut len = value.len().min(u16::MAX as usize);
        while !value.is_char_boundary(len) {
            len -= 1;
        }
        self.add_u16(len as u16);
        self.buf.extend_from_slice(&value.as_bytes()[..len]);
    }

    pub fn add_position(&mut self, position: Position) {
        self.add_u16(position.x);
        self.add_u16(position.y);
        self.add_u8(position.z);
    }

    /// Appends another message's bytes.
    pub fn append(&mut self, other: &OutputMessage) {
        self.buf.extend_from_slice(&other.buf);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// ---------------------------------------------------------------------------
// PacketReader
// ---------------------------------------------------------------------------

/// Errors raised while decoding a packet. The offending packet is dropped;
/// the connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// The packet ended before a field could be read.
    #[error("packet truncated: needed {needed} bytes at offset {offset}, {remaining} left")]
    Truncated {
        /// Bytes the field required.
        needed: usize,
        /// Read offset at the failure.
        offset: usize,
        /// Bytes left in the packet.
        remaining: usize,
    },

    /// A zero-length payload carried no opcode.
    #[error("empty packet")]
    Empty,

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidString,

    /// A byte field held a value outside its range.
    #[error("invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: u8 },
}

/// Cursor over an inbound packet.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(PacketError::Truncated {
                needed: n,
                offset: self.offset,
                remaining,
            });
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, PacketError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Reads a `u16` without advancing.
    pub fn peek_u16(&self) -> Result<u16, PacketError> {
        let remaining = self.remaining();
        if remaining < 2 {
            return Err(PacketError::Truncated {
                needed: 2,
                offset: self.offset,
                remaining,
            });
        }
        Ok(u16::from_le_bytes([
            self.data[self.offset],
            self.data[self.offset + 1],
        ]))
    }

    pub fn get_u32(&mut self) -> Result<u32, PacketError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_i32(&mut self) -> Result<i32, PacketError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_string(&mut self) -> Result<String, PacketError> {
        let len = self.get_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PacketError::InvalidString)
    }

    pub fn get_position(&mut self) -> Result<Position, PacketError> {
        let x = self.get_u16()?;
        let y = self.get_u16()?;
        let z = self.get_u8()?;
        Ok(Position::new(x, y, z))
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
