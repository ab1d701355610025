//! Dense per-player storage indexed by [`PlayerId`] slot.
//!
//! A match has a small, fixed number of player slots (two in a duel), so
//! per-player state lives in a short array rather than a hash map. Profiles,
//! ping ledgers and action histories all use this one table type, which keeps
//! the three views of a player addressed the same way.

use smallvec::SmallVec;

use crate::PlayerId;

/// Inline capacity of a [`PlayerTable`]; a duel never spills to the heap.
const INLINE_PLAYERS: usize = 2;

/// Slot-indexed table of optional per-player values.
///
/// # Note
///
/// This type is re-exported in [`__internal`](crate::__internal) for testing.
/// It is not part of the stable public API.
#[derive(Debug, Clone)]
pub struct PlayerTable<T> {
    slots: SmallVec<[Option<T>; INLINE_PLAYERS]>,
}

impl<T> Default for PlayerTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PlayerTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: SmallVec::new(),
        }
    }

    /// Returns the value stored for `player`, if any.
    #[must_use]
    pub fn get(&self, player: PlayerId) -> Option<&T> {
        self.slots.get(player.as_usize()).and_then(Option::as_ref)
    }

    /// Returns the value stored for `player` mutably, if any.
    pub fn get_mut(&mut self, player: PlayerId) -> Option<&mut T> {
        self.slots
            .get_mut(player.as_usize())
            .and_then(Option::as_mut)
    }

    /// Returns the value for `player`, inserting `make()` first if the slot is empty.
    pub fn get_or_insert_with(&mut self, player: PlayerId, make: impl FnOnce() -> T) -> &mut T {
        self.grow_to(player);
        self.slots[player.as_usize()].get_or_insert_with(make)
    }

    /// Stores `value` for `player`, returning the previous value.
    pub fn insert(&mut self, player: PlayerId, value: T) -> Option<T> {
        self.grow_to(player);
        self.slots[player.as_usize()].replace(value)
    }

    /// Removes and returns the value for `player`.
    pub fn remove(&mut self, player: PlayerId) -> Option<T> {
        let removed = self
            .slots
            .get_mut(player.as_usize())
            .and_then(Option::take);
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        removed
    }

    /// Returns `true` if `player` has a value.
    #[must_use]
    pub fn contains(&self, player: PlayerId) -> bool {
        self.get(player).is_some()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns `true` if no slot is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Removes every value.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Iterates occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (PlayerId, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, value)| value.as_ref().map(|v| (PlayerId::new(slot), v)))
    }

    /// Iterates the ids of occupied slots in slot order.
    pub fn players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.iter().map(|(player, _)| player)
    }

    fn grow_to(&mut self, player: PlayerId) {
        let needed = player.as_usize() + 1;
        if self.slots.len() < needed {
            self.slots.resize_with(needed, || None);
        }
    }
}
