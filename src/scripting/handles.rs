//! Handle store
//!
//! Pins script values so host code can hold on to them between calls. Slots
//! are reused after release; each reuse bumps the slot generation so a stale
//! handle is detected instead of aliasing the new occupant.

use std::fmt;

use rquickjs::{Ctx, Persistent, Value};

use crate::core::{BridgeError, BridgeResult};

/// Opaque reference to a pinned script value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Packs the handle into one integer: generation in the high half.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

struct Slot {
    generation: u32,
    value: Option<Persistent<Value<'static>>>,
}

#[derive(Default)]
pub(crate) struct HandleStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl HandleStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn pin<'js>(&mut self, ctx: &Ctx<'js>, value: Value<'js>) -> Handle {
        let saved = Persistent::save(ctx, value);
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(saved);
            return Handle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            value: Some(saved),
        });
        Handle {
            index,
            generation: 1,
        }
    }

    fn slot(&self, handle: Handle) -> Option<&Persistent<Value<'static>>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn contains(&self, handle: Handle) -> bool {
        self.slot(handle).is_some()
    }

    pub(crate) fn resolve<'js>(&self, ctx: &Ctx<'js>, handle: Handle) -> BridgeResult<Value<'js>> {
        let saved = self
            .slot(handle)
            .ok_or(BridgeError::HandleNotFound(handle))?;
        saved
            .clone()
            .restore(ctx)
            .map_err(|e| BridgeError::Binding(format!("cannot restore {handle}: {e}")))
    }

    pub(crate) fn release(&mut self, handle: Handle) -> BridgeResult<()> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
            .ok_or(BridgeError::HandleNotFound(handle))?;
        slot.value = None;
        // generation 0 is never handed out
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(handle.index);
        self.live -= 1;
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Drops every pinned value. Must run while the engine runtime is alive.
    pub(crate) fn clear(&mut self) {
        for slot in &mut self.slots {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1).max(1);
            }
        }
        self.free = (0..self.slots.len() as u32).rev().collect();
        self.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rquickjs::{Context, Runtime};

    #[test]
    fn test_pin_resolve_release() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let mut store = HandleStore::new();

        context.with(|ctx| {
            let handle = store.pin(&ctx, Value::new_int(ctx.clone(), 42));
            assert!(store.contains(handle));
            assert_eq!(store.len(), 1);

            let value = store.resolve(&ctx, handle).unwrap();
            assert_eq!(value.as_int(), Some(42));
            // resolving does not consume the pin
            assert!(store.resolve(&ctx, handle).is_ok());

            store.release(handle).unwrap();
            assert!(!store.contains(handle));
            assert!(matches!(
                store.resolve(&ctx, handle),
                Err(BridgeError::HandleNotFound(h)) if h == handle
            ));
            assert!(store.release(handle).is_err());
        });
    }

    #[test]
    fn test_reused_slot_detects_stale_handle() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let mut store = HandleStore::new();

        context.with(|ctx| {
            let first = store.pin(&ctx, Value::new_int(ctx.clone(), 1));
            store.release(first).unwrap();
            let second = store.pin(&ctx, Value::new_int(ctx.clone(), 2));

            assert_ne!(first, second);
            assert!(store.resolve(&ctx, first).is_err());
            assert_eq!(store.resolve(&ctx, second).unwrap().as_int(), Some(2));
        });
        store.clear();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_clear_invalidates_everything() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let mut store = HandleStore::new();

        let handles: Vec<Handle> = context.with(|ctx| {
            (0..3)
                .map(|i| store.pin(&ctx, Value::new_int(ctx.clone(), i)))
                .collect()
        });
        store.clear();
        assert!(handles.iter().all(|h| !store.contains(*h)));
    }

    #[test]
    fn test_zero_bits_never_live() {
        let store = HandleStore::new();
        assert!(!store.contains(Handle::from_bits(0)));
    }

    proptest! {
        #[test]
        fn prop_bits_round_trip(bits in any::<u64>()) {
            prop_assert_eq!(Handle::from_bits(bits).to_bits(), bits);
        }
    }
}
