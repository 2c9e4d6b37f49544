//! Generation-checked slot arena.
//!
//! Nodes are addressed by `(index, version)` pairs instead of pointers: a
//! stable integer index into a dense vector plus a per-slot generation
//! counter. Removing a slot bumps its generation, so a stale id held by the
//! embedder can never silently alias a later occupant; lookups against it
//! simply return `None`.

/// One slot in the arena. The generation is bumped on every removal, never
/// reset, so `(index, version)` pairs are unique over the arena's lifetime.
#[derive(Debug)]
struct Slot<T> {
  version: u32,
  data: Option<T>,
}

/// A dense arena with stable indices and generation-checked access.
#[derive(Debug, Default)]
pub struct SlotArena<T> {
  slots: Vec<Slot<T>>,
  free: Vec<u32>,
  live: usize,
}

impl<T> SlotArena<T> {
  pub fn new() -> Self {
    Self {
      slots: Vec::new(),
      free: Vec::new(),
      live: 0,
    }
  }

  /// Inserts a value, reusing a free slot when one exists.
  ///
  /// Returns the `(index, version)` pair that addresses the value.
  pub fn insert(&mut self, value: T) -> (u32, u32) {
    self.live += 1;
    if let Some(index) = self.free.pop() {
      let slot = &mut self.slots[index as usize];
      debug_assert!(slot.data.is_none());
      slot.data = Some(value);
      return (index, slot.version);
    }
    let index = self.slots.len() as u32;
    self.slots.push(Slot {
      version: 1,
      data: Some(value),
    });
    (index, 1)
  }

  /// Returns the value at `(index, version)`, or `None` when the slot is
  /// vacant or the generation does not match (stale id).
  pub fn get(&self, index: u32, version: u32) -> Option<&T> {
    let slot = self.slots.get(index as usize)?;
    if slot.version != version {
      return None;
    }
    slot.data.as_ref()
  }

  pub fn get_mut(&mut self, index: u32, version: u32) -> Option<&mut T> {
    let slot = self.slots.get_mut(index as usize)?;
    if slot.version != version {
      return None;
    }
    slot.data.as_mut()
  }

  /// Removes and returns the value, bumping the slot generation so the id
  /// becomes stale. Returns `None` for an already-stale id.
  pub fn remove(&mut self, index: u32, version: u32) -> Option<T> {
    let slot = self.slots.get_mut(index as usize)?;
    if slot.version != version {
      return None;
    }
    let value = slot.data.take()?;
    slot.version = slot.version.wrapping_add(1);
    self.free.push(index);
    self.live -= 1;
    Some(value)
  }

  /// Number of live values.
  pub fn len(&self) -> usize {
    self.live
  }

  pub fn is_empty(&self) -> bool {
    self.live == 0
  }
}
