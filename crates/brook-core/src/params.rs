//! Deferred parameters addressed to pipeline components.
//!
//! A parameter is a one-shot mutator bound to a target component id. Sets of
//! parameters ride messages through the pipe and are drained by each stage
//! at buffer boundaries, so user-visible knobs change state only between
//! buffers, never mid-buffer.

use std::collections::HashMap;
use std::fmt;

use crate::component::ComponentId;

type Thunk = Box<dyn FnOnce() + Send>;

/// One deferred mutator for one component.
///
/// The thunk must not block and must not publish further parameters; it
/// mutates state shared with its target component (typically through an
/// `Arc` of atomics) and is dropped after the call.
pub struct Param {
    target: ComponentId,
    thunk: Thunk,
}

impl Param {
    pub fn new(target: ComponentId, thunk: impl FnOnce() + Send + 'static) -> Self {
        Self {
            target,
            thunk: Box::new(thunk),
        }
    }

    pub fn target(&self) -> ComponentId {
        self.target
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param").field("target", &self.target).finish_non_exhaustive()
    }
}

/// Ordered parameter lists keyed by target component.
///
/// Merging appends per key; application drains one key and invokes its
/// thunks in insertion order. Applying an already-drained key is a no-op.
#[derive(Default)]
pub struct Params {
    entries: HashMap<ComponentId, Vec<Thunk>>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, param: Param) {
        self.entries.entry(param.target).or_default().push(param.thunk);
    }

    /// Appends every entry of `other`, preserving per-target order.
    pub fn merge(&mut self, other: Params) {
        for (target, mut thunks) in other.entries {
            self.entries.entry(target).or_default().append(&mut thunks);
        }
    }

    /// Drains the entries addressed to `id` and invokes each in order.
    pub fn apply_to(&mut self, id: ComponentId) {
        if let Some(thunks) = self.entries.remove(&id) {
            for thunk in thunks {
                thunk();
            }
        }
    }

    /// Extracts the entries addressed to `id` without invoking them.
    pub fn split_off(&mut self, id: ComponentId) -> Params {
        let mut out = Params::new();
        if let Some(thunks) = self.entries.remove(&id) {
            out.entries.insert(id, thunks);
        }
        out
    }

    /// Drains the whole set, leaving this one empty.
    pub fn take(&mut self) -> Params {
        Params {
            entries: std::mem::take(&mut self.entries),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Param> for Params {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        let mut params = Params::new();
        for param in iter {
            params.push(param);
        }
        params
    }
}

impl Extend<Param> for Params {
    fn extend<I: IntoIterator<Item = Param>>(&mut self, iter: I) {
        for param in iter {
            self.push(param);
        }
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (target, thunks) in &self.entries {
            map.entry(target, &thunks.len());
        }
        map.finish()
    }
}
