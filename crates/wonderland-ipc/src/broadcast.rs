//! Broadcast event registry
//!
//! Producers publish opaque events into a slot list. Removed events leave a
//! tombstone that the next publish reuses, lowest index first, so the list
//! never shrinks. Every publish wakes all known channels.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::ChannelRegistry;

/// Slot list of published events, shared with producers through an `Arc`.
///
/// Events are matched by identity on removal (`Arc::ptr_eq`), never by value.
pub struct BroadcastRegistry<E> {
    slots: Mutex<Vec<Option<Arc<E>>>>,
    channels: Arc<ChannelRegistry>,
}

impl<E> BroadcastRegistry<E> {
    pub fn new(channels: Arc<ChannelRegistry>) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            channels,
        }
    }

    /// Store `event` in the first free slot (or a new one) and signal every
    /// channel once. Returns the slot index.
    pub fn publish(&self, event: Arc<E>) -> usize {
        let slot = {
            let mut slots = self.lock();
            match slots.iter().position(Option::is_none) {
                Some(index) => {
                    slots[index] = Some(event);
                    index
                }
                None => {
                    slots.push(Some(event));
                    slots.len() - 1
                }
            }
        };

        // Channels created after this snapshot pick the event up when they pull.
        let channels = self.channels.channels();
        for channel in &channels {
            channel.signal_send();
        }

        debug!(slot, notified = channels.len(), "Broadcast event published");
        slot
    }

    /// Tombstone every slot holding this exact event. Returns how many slots
    /// were cleared.
    pub fn remove(&self, event: &Arc<E>) -> usize {
        let mut slots = self.lock();
        let mut cleared = 0;

        for slot in slots.iter_mut() {
            if slot.as_ref().is_some_and(|held| Arc::ptr_eq(held, event)) {
                *slot = None;
                cleared += 1;
            }
        }

        if cleared > 0 {
            debug!(cleared, "Broadcast event removed");
        }
        cleared
    }

    /// Whether this exact event is currently published
    pub fn contains(&self, event: &Arc<E>) -> bool {
        self.lock()
            .iter()
            .flatten()
            .any(|held| Arc::ptr_eq(held, event))
    }

    /// Live events in slot order
    pub fn events(&self) -> Vec<Arc<E>> {
        self.lock().iter().flatten().cloned().collect()
    }

    /// Total slots, tombstones included
    pub fn slot_count(&self) -> usize {
        self.lock().len()
    }

    /// Slots currently holding an event
    pub fn occupied(&self) -> usize {
        self.lock().iter().filter(|slot| slot.is_some()).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<Arc<E>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> fmt::Debug for BroadcastRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastRegistry")
            .field("slots", &self.slot_count())
            .field("occupied", &self.occupied())
            .finish()
    }
}
