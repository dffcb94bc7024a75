//! Dense, index-addressed storage of server entries.

use crate::constants::RESERVED_SLOT_INDEX;
use crate::list::ServerEntry;
use crate::list::ServerId;
use crate::ServerListError;

/// Occupancy of one position in the server table.
///
/// `Reserved` models an id handed out by `generate_unique_id` whose `add`
/// has not arrived yet: the slot cannot be re-issued, but it holds no entry
/// and stays invisible to counts, reads, serialization and the updater
/// scan.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotState {
    Vacant,
    Reserved { id: ServerId },
    Occupied { entry: ServerEntry },
}

/// One position in the server table. The slot remembers the next
/// generation number even while empty, so re-issuance never collides with
/// a prior incarnation.
#[derive(Debug, Clone)]
pub struct ServerSlot {
    pub next_generation: u32,
    pub state: SlotState,
}

impl ServerSlot {
    fn vacant() -> Self {
        Self {
            next_generation: 0,
            state: SlotState::Vacant,
        }
    }

    pub fn entry(&self) -> Option<&ServerEntry> {
        match &self.state {
            SlotState::Occupied { entry } => Some(entry),
            _ => None,
        }
    }

    pub fn entry_mut(&mut self) -> Option<&mut ServerEntry> {
        match &mut self.state {
            SlotState::Occupied { entry } => Some(entry),
            _ => None,
        }
    }
}

/// The slot table: dense storage of entries plus allocation of fresh slots.
/// Index 0 is reserved and permanently vacant.
#[derive(Debug, Default)]
pub struct SlotTable {
    slots: Vec<ServerSlot>,
}

impl SlotTable {
    /// Number of valid indexes (not necessarily occupied).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(
        &self,
        index: usize,
    ) -> Option<&ServerSlot> {
        self.slots.get(index)
    }

    pub fn slot_mut(
        &mut self,
        index: usize,
    ) -> Option<&mut ServerSlot> {
        self.slots.get_mut(index)
    }

    /// Grow the table with vacant slots so that `index` is addressable,
    /// and hand the slot back.
    pub fn grow_for(
        &mut self,
        index: usize,
    ) -> &mut ServerSlot {
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, ServerSlot::vacant);
        }
        &mut self.slots[index]
    }

    /// The first vacant index, growing the table by one when full.
    /// Never returns the reserved index 0.
    pub fn first_free_index(&mut self) -> usize {
        // Naive scan, but the table stays small.
        let mut index = 1;
        while index < self.slots.len() {
            if matches!(self.slots[index].state, SlotState::Vacant) {
                break;
            }
            index += 1;
        }

        self.grow_for(index);

        debug_assert_ne!(index, RESERVED_SLOT_INDEX as usize);
        index
    }

    /// Destroy the occupied entry matching `id`, leaving the slot vacant
    /// with its generation counter intact, and hand the entry back.
    pub fn take_entry(
        &mut self,
        id: ServerId,
    ) -> Result<ServerEntry, ServerListError> {
        let slot = self
            .slots
            .get_mut(id.slot_index() as usize)
            .ok_or(ServerListError::UnknownServer(id))?;

        match &slot.state {
            SlotState::Occupied { entry } if entry.id == id => {}
            _ => return Err(ServerListError::UnknownServer(id)),
        }

        match std::mem::replace(&mut slot.state, SlotState::Vacant) {
            SlotState::Occupied { entry } => Ok(entry),
            _ => Err(ServerListError::UnknownServer(id)),
        }
    }

    /// The occupied entry matching `id` exactly (index and generation).
    pub fn get(
        &self,
        id: ServerId,
    ) -> Result<&ServerEntry, ServerListError> {
        self.slot(id.slot_index() as usize)
            .and_then(|slot| slot.entry())
            .filter(|entry| entry.id == id)
            .ok_or(ServerListError::UnknownServer(id))
    }

    pub fn get_mut(
        &mut self,
        id: ServerId,
    ) -> Result<&mut ServerEntry, ServerListError> {
        self.slots
            .get_mut(id.slot_index() as usize)
            .and_then(|slot| slot.entry_mut())
            .filter(|entry| entry.id == id)
            .ok_or(ServerListError::UnknownServer(id))
    }

    /// All occupied entries, in slot order.
    pub fn entries(&self) -> impl Iterator<Item = &ServerEntry> {
        self.slots.iter().filter_map(|slot| slot.entry())
    }
}
