//! Client-side reading of the map stream.
//!
//! [`MapStreamDecoder`] walks a stream the way a client does: it tracks
//! positions through the same column order the encoder used and consumes
//! skip markers as it goes. Tests use it to check that what was written can
//! be read back into the tiles that were sampled.

use crate::encoder::CreatureDescriptor;
use crate::position::{Direction, Position};
use crate::sampler::Region;
use crate::wire::{PacketError, PacketReader, entity_tag};
use crate::world::{CreatureId, Item, Light, Outfit};

/// Any `u16` at or above this value is a skip marker, not an entity.
const MARKER_FLOOR: u16 = 0xFF00;

/// One entity read off a tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEntity {
    Item { id: u16, count: u8 },
    Known(CreatureId),
    New {
        id: CreatureId,
        evicted: Option<CreatureId>,
        descriptor: CreatureDescriptor,
    },
}

impl DecodedEntity {
    pub fn creature_id(&self) -> Option<CreatureId> {
        match self {
            Self::Item { .. } => None,
            Self::Known(id) | Self::New { id, .. } => Some(*id),
        }
    }
}

impl From<&Item> for DecodedEntity {
    fn from(item: &Item) -> Self {
        Self::Item {
            id: item.id,
            count: item.count,
        }
    }
}

/// A non-empty tile recovered from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTile {
    pub position: Position,
    pub entities: Vec<DecodedEntity>,
}

/// Reads floors out of a map stream. The pending skip count carries over
/// between floors, as it does on the writing side.
#[derive(Debug, Default)]
pub struct MapStreamDecoder {
    skip: u32,
}

impl MapStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty positions still owed by the last marker.
    pub fn pending_skip(&self) -> u32 {
        self.skip
    }

    /// Reads one floor of `region`, shifted by `offset`.
    pub fn read_floor(
        &mut self,
        reader: &mut PacketReader<'_>,
        region: Region,
        offset: i32,
    ) -> Result<Vec<DecodedTile>, PacketError> {
        let mut tiles = Vec::new();
        for nx in 0..region.width {
            for ny in 0..region.height {
                if self.skip > 0 {
                    self.skip -= 1;
                    continue;
                }
                let entities = self.read_position(reader)?;
                if entities.is_empty() {
                    continue;
                }
                let x = region.x + nx + offset;
                let y = region.y + ny + offset;
                if let Some(position) = Position::from_signed(x, y, region.z) {
                    tiles.push(DecodedTile { position, entities });
                }
            }
        }
        Ok(tiles)
    }

    /// Reads every floor a map description carries for a viewer on `z`.
    pub fn read_map(
        &mut self,
        reader: &mut PacketReader<'_>,
        region: Region,
        z: u8,
    ) -> Result<Vec<DecodedTile>, PacketError> {
        let mut tiles = Vec::new();
        for nz in crate::encoder::map_floors(z) {
            let offset = i32::from(z) - i32::from(nz);
            tiles.extend(self.read_floor(reader, region.on_floor(i32::from(nz)), offset)?);
        }
        Ok(tiles)
    }

    /// A position with no pending skip: either a bare marker or a tile
    /// followed by one.
    fn read_position(
        &mut self,
        reader: &mut PacketReader<'_>,
    ) -> Result<Vec<DecodedEntity>, PacketError> {
        let mut entities = Vec::new();
        if reader.peek_u16()? < MARKER_FLOOR {
            reader.get_u16()?;
            while reader.peek_u16()? < MARKER_FLOOR {
                entities.push(read_entity(reader)?);
            }
        }
        self.skip = u32::from(reader.get_u16()? & 0xFF);
        Ok(entities)
    }
}

/// Reads an item or creature entry.
pub fn read_entity(reader: &mut PacketReader<'_>) -> Result<DecodedEntity, PacketError> {
    let tag = reader.get_u16()?;
    match tag {
        entity_tag::KNOWN_CREATURE => Ok(DecodedEntity::Known(CreatureId(reader.get_u32()?))),
        entity_tag::UNKNOWN_CREATURE => {
            let evicted = reader.get_u32()?;
            let id = CreatureId(reader.get_u32()?);
            let descriptor = read_descriptor(reader)?;
            Ok(DecodedEntity::New {
                id,
                evicted: (evicted != 0).then_some(CreatureId(evicted)),
                descriptor,
            })
        }
        id => Ok(DecodedEntity::Item {
            id,
            count: reader.get_u8()?,
        }),
    }
}

fn read_descriptor(reader: &mut PacketReader<'_>) -> Result<CreatureDescriptor, PacketError> {
    let name = reader.get_string()?;
    let health_percent = reader.get_u8()?;
    let raw_direction = reader.get_u8()?;
    let direction = Direction::from_wire(raw_direction).ok_or(PacketError::InvalidValue {
        field: "direction",
        value: raw_direction,
    })?;

    let look_type = reader.get_u16()?;
    let outfit = if look_type != 0 {
        Outfit {
            look_type,
            head: reader.get_u8()?,
            body: reader.get_u8()?,
            legs: reader.get_u8()?,
            feet: reader.get_u8()?,
            look_item: 0,
        }
    } else {
        Outfit {
            look_item: reader.get_u16()?,
            ..Outfit::default()
        }
    };

    Ok(CreatureDescriptor {
        name,
        health_percent,
        direction,
        outfit,
        light: Light {
            level: reader.get_u8()?,
            color: reader.get_u8()?,
        },
        speed: reader.get_u16()?,
        skull: reader.get_u8()?,
        shield: reader.get_u8()?,
        emblem: reader.get_u8()?,
    })
}
