//! Generation-checked channel slots.
//!
//! Backends keep their voices in a fixed-capacity slot table. Every time a
//! slot is reused its generation is bumped, so a [`ChannelHandle`] held by a
//! stopped session no longer resolves. When all slots are occupied the least
//! important voice is stolen, provided it is strictly less important than
//! the request (larger priority value = less important).

use crate::engine::backend::ChannelHandle;
use crate::error::AudioError;

struct Occupied<T> {
    value: T,
    priority: u8,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Occupied<T>>,
}

pub struct ChannelSlots<T> {
    slots: Vec<Slot<T>>,
    limit: usize,
}

/// Result of a successful allocation.
pub struct Allocation<T> {
    pub handle: ChannelHandle,
    /// Voice evicted to make room, if any.
    pub evicted: Option<T>,
}

impl<T> ChannelSlots<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Vec::with_capacity(limit),
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn allocate(&mut self, value: T, priority: u8) -> Result<Allocation<T>, AudioError> {
        if let Some(index) = self.slots.iter().position(|slot| slot.entry.is_none()) {
            return Ok(self.occupy(index, value, priority, None));
        }

        if self.slots.len() < self.limit {
            self.slots.push(Slot {
                generation: 0,
                entry: None,
            });
            let index = self.slots.len() - 1;
            return Ok(self.occupy(index, value, priority, None));
        }

        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.entry.as_ref().map(|e| (index, e.priority)))
            .max_by_key(|&(_, existing)| existing)
            .filter(|&(_, existing)| existing > priority);

        match victim {
            Some((index, _)) => {
                let evicted = self.slots[index].entry.take().map(|e| e.value);
                Ok(self.occupy(index, value, priority, evicted))
            }
            None => Err(AudioError::ChannelsExhausted { limit: self.limit }),
        }
    }

    fn occupy(&mut self, index: usize, value: T, priority: u8, evicted: Option<T>) -> Allocation<T> {
        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        slot.entry = Some(Occupied { value, priority });
        Allocation {
            handle: ChannelHandle {
                slot: index as u32,
                generation: slot.generation,
            },
            evicted,
        }
    }

    fn resolve(&self, handle: ChannelHandle) -> Option<&Occupied<T>> {
        self.slots
            .get(handle.slot as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn resolve_mut(&mut self, handle: ChannelHandle) -> Option<&mut Occupied<T>> {
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    pub fn contains(&self, handle: ChannelHandle) -> bool {
        self.resolve(handle).is_some()
    }

    pub fn get(&self, handle: ChannelHandle) -> Result<&T, AudioError> {
        self.resolve(handle)
            .map(|entry| &entry.value)
            .ok_or_else(|| handle.stale_error())
    }

    pub fn get_mut(&mut self, handle: ChannelHandle) -> Result<&mut T, AudioError> {
        self.resolve_mut(handle)
            .map(|entry| &mut entry.value)
            .ok_or_else(|| handle.stale_error())
    }

    pub fn priority(&self, handle: ChannelHandle) -> Result<u8, AudioError> {
        self.resolve(handle)
            .map(|entry| entry.priority)
            .ok_or_else(|| handle.stale_error())
    }

    pub fn set_priority(&mut self, handle: ChannelHandle, priority: u8) -> Result<(), AudioError> {
        let entry = self
            .resolve_mut(handle)
            .ok_or_else(|| handle.stale_error())?;
        entry.priority = priority;
        Ok(())
    }

    pub fn release(&mut self, handle: ChannelHandle) -> Result<T, AudioError> {
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.take())
            .map(|entry| entry.value)
            .ok_or_else(|| handle.stale_error())
    }

    /// Drop every voice for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        for slot in &mut self.slots {
            if slot.entry.as_ref().is_some_and(|entry| !keep(&entry.value)) {
                slot.entry = None;
            }
        }
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.entry.as_mut().map(|entry| &mut entry.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_handle_becomes_stale() {
        let mut slots = ChannelSlots::new(2);
        let first = slots.allocate("music", 128).unwrap().handle;
        assert_eq!(*slots.get(first).unwrap(), "music");

        slots.release(first).unwrap();
        assert!(!slots.contains(first));

        let second = slots.allocate("sfx", 128).unwrap().handle;
        assert_eq!(second.slot, first.slot);
        assert_ne!(second.generation, first.generation);
        assert!(matches!(
            slots.get(first),
            Err(AudioError::StaleHandle { .. })
        ));
        assert!(slots.release(first).is_err());
    }

    #[test]
    fn full_table_steals_less_important_voice() {
        let mut slots = ChannelSlots::new(2);
        let music = slots.allocate("music", 0).unwrap().handle;
        let sfx = slots.allocate("sfx", 200).unwrap().handle;

        let allocation = slots.allocate("new", 128).unwrap();
        assert_eq!(allocation.evicted, Some("sfx"));
        assert!(!slots.contains(sfx));
        assert!(slots.contains(music));
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn full_table_of_equal_priority_is_exhausted() {
        let mut slots = ChannelSlots::new(1);
        let kept = slots.allocate(1, 128).unwrap().handle;

        match slots.allocate(2, 128) {
            Err(AudioError::ChannelsExhausted { limit }) => assert_eq!(limit, 1),
            other => panic!("Expected ChannelsExhausted, got {:?}", other.map(|a| a.handle)),
        }
        assert!(slots.contains(kept));
    }

    #[test]
    fn retain_drops_rejected_voices() {
        let mut slots = ChannelSlots::new(4);
        let keep = slots.allocate(1, 128).unwrap().handle;
        let drop = slots.allocate(2, 128).unwrap().handle;

        slots.retain(|value| *value != 2);
        assert!(slots.contains(keep));
        assert!(!slots.contains(drop));
        assert_eq!(slots.len(), 1);
    }
}
