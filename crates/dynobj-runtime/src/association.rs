//! Per-instance associated storage
//!
//! Any object can carry extra values keyed by an [`AssociationKey`], an
//! identity token that is unrelated to the object's class layout. Each key
//! maps to its own [`AssociatedSlot`], so unrelated keys on the same object
//! never share a lock.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::value::{Value, WeakId};

static NEXT_ASSOCIATION_KEY: AtomicU64 = AtomicU64::new(1);

/// Identity token for an associated storage slot
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AssociationKey(u64);

impl AssociationKey {
    /// Generate a new unique key
    pub fn new() -> Self {
        AssociationKey(NEXT_ASSOCIATION_KEY.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for AssociationKey {
    fn default() -> Self {
        Self::new()
    }
}

/// What a slot currently holds
#[derive(Debug, Clone, Default)]
pub enum SlotContents {
    /// Never written
    #[default]
    Empty,
    /// A value, holding whatever claims the value itself carries
    Value(Value),
    /// A non-owning object reference
    Weak(WeakId),
}

impl SlotContents {
    /// Resolve to a value; weak references to destroyed objects read as null
    pub fn to_value(&self) -> Option<Value> {
        match self {
            SlotContents::Empty => None,
            SlotContents::Value(value) => Some(value.clone()),
            SlotContents::Weak(weak) => Some(weak.upgrade().map(Value::Object).unwrap_or_default()),
        }
    }
}

/// One associated storage slot
#[derive(Debug, Default)]
pub struct AssociatedSlot {
    contents: Mutex<SlotContents>,
}

impl AssociatedSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current value (`None` if never written)
    pub fn load(&self) -> Option<Value> {
        self.contents.lock().to_value()
    }

    /// Replace the contents, returning the previous contents
    ///
    /// The caller drops the returned contents after the slot lock is gone, so
    /// releasing an old value never runs destructors under the lock.
    pub fn swap(&self, contents: SlotContents) -> SlotContents {
        std::mem::replace(&mut *self.contents.lock(), contents)
    }
}
