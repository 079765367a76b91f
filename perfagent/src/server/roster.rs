//! Fixed-capacity client table
//!
//! Slots are indexed by [`SlotId`] and tombstoned on disconnect, so an id
//! stays stable for the lifetime of its connection. The roster lock is held
//! only to insert, remove or snapshot; never across socket I/O.

use std::sync::Arc;

use crate::domain::{RosterError, SlotId};
use crate::net::NetworkClient;

#[derive(Debug)]
pub struct Roster {
    slots: Vec<Option<Arc<NetworkClient>>>,
}

impl Roster {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { slots: (0..capacity).map(|_| None).collect() }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lowest free slot
    ///
    /// # Errors
    /// Returns [`RosterError::Full`] when every slot is taken.
    pub fn vacant(&self) -> Result<SlotId, RosterError> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(SlotId)
            .ok_or(RosterError::Full { capacity: self.capacity() })
    }

    /// Place a client in the slot it was created for
    ///
    /// # Errors
    /// Returns an error if the slot is out of range or already occupied.
    pub fn insert(&mut self, client: NetworkClient) -> Result<Arc<NetworkClient>, RosterError> {
        let id = client.id();
        match self.slots.get_mut(id.0) {
            Some(slot @ None) => {
                let client = Arc::new(client);
                *slot = Some(Arc::clone(&client));
                Ok(client)
            }
            Some(Some(_)) => Err(RosterError::Full { capacity: self.capacity() }),
            None => Err(RosterError::UnknownSlot(id)),
        }
    }

    #[must_use]
    pub fn get(&self, id: SlotId) -> Option<&Arc<NetworkClient>> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Tombstone a slot
    ///
    /// # Errors
    /// Returns [`RosterError::UnknownSlot`] if the slot is empty.
    pub fn remove(&mut self, id: SlotId) -> Result<Arc<NetworkClient>, RosterError> {
        self.slots.get_mut(id.0).and_then(Option::take).ok_or(RosterError::UnknownSlot(id))
    }

    /// Remove every client that is no longer connected
    pub fn reap(&mut self) -> Vec<Arc<NetworkClient>> {
        let mut reaped = Vec::new();
        for slot in &mut self.slots {
            if matches!(slot, Some(client) if !client.is_connected()) {
                reaped.extend(slot.take());
            }
        }
        reaped
    }

    /// Connected clients, in slot order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<NetworkClient>> {
        self.slots.iter().flatten().filter(|client| client.is_connected()).cloned().collect()
    }

    /// Empty the roster
    pub fn drain(&mut self) -> Vec<Arc<NetworkClient>> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}
