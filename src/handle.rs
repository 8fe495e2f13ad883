//! Sound handles and their allocator.
//!
//! A [`SoundHandle`] identifies one playback instance across the facade
//! boundary. Handles are allocated proxy-side so callers get an id
//! immediately, and released with reference counting once every owner
//! (caller and engine) has let go.

use rand::Rng;
use std::collections::HashMap;
use std::num::NonZeroU32;

/// Opaque identifier for one playing sound. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SoundHandle(NonZeroU32);

impl SoundHandle {
    /// The largest raw id is reserved so the allocator always has a
    /// guaranteed-free probe escape.
    pub const MAX_RAW: u32 = u32::MAX;

    pub fn new(raw: u32) -> Option<Self> {
        if raw == Self::MAX_RAW {
            return None;
        }
        NonZeroU32::new(raw).map(Self)
    }

    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

/// Allocates and reference-counts sound handles.
///
/// Ids are found by random probing: the occupied set is always a strict
/// subset of the id space (zero and the maximum are excluded), so probing
/// terminates.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    occupied: HashMap<SoundHandle, u32>,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an unoccupied handle with the given initial owner count.
    pub fn allocate_id(&mut self, owner_count: u32) -> SoundHandle {
        debug_assert!(owner_count > 0);
        let mut rng = rand::thread_rng();
        loop {
            let raw = rng.gen_range(1..SoundHandle::MAX_RAW);
            let handle = SoundHandle::new(raw).expect("probe range excludes 0 and MAX");
            if !self.occupied.contains_key(&handle) {
                self.occupied.insert(handle, owner_count);
                return handle;
            }
        }
    }

    /// Decrements the owner count of `handle`. The id becomes eligible for
    /// reuse once all owners have released it.
    pub fn free_id(&mut self, handle: SoundHandle, owner_count: u32) {
        if let Some(owners) = self.occupied.get_mut(&handle) {
            *owners = owners.saturating_sub(owner_count);
            if *owners == 0 {
                self.occupied.remove(&handle);
            }
        }
    }

    pub fn is_occupied(&self, handle: SoundHandle) -> bool {
        self.occupied.contains_key(&handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_never_zero_or_max() {
        assert!(SoundHandle::new(0).is_none());
        assert!(SoundHandle::new(SoundHandle::MAX_RAW).is_none());
        assert!(SoundHandle::new(1).is_some());

        let mut alloc = HandleAllocator::new();
        for _ in 0..100 {
            let h = alloc.allocate_id(1);
            assert_ne!(h.raw(), 0);
            assert_ne!(h.raw(), SoundHandle::MAX_RAW);
        }
    }

    #[test]
    fn occupied_ids_are_not_reallocated() {
        let mut alloc = HandleAllocator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let h = alloc.allocate_id(1);
            assert!(seen.insert(h), "allocator returned an occupied id");
        }
    }

    #[test]
    fn free_id_is_reference_counted() {
        let mut alloc = HandleAllocator::new();
        let h = alloc.allocate_id(2);
        assert!(alloc.is_occupied(h));

        alloc.free_id(h, 1);
        assert!(alloc.is_occupied(h), "one owner still holds the id");

        alloc.free_id(h, 1);
        assert!(!alloc.is_occupied(h), "fully released id must be free");
    }

    #[test]
    fn free_id_accepts_multi_owner_decrement() {
        let mut alloc = HandleAllocator::new();
        let h = alloc.allocate_id(3);
        alloc.free_id(h, 3);
        assert!(!alloc.is_occupied(h));
    }
}
