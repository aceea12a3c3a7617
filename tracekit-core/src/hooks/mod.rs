//! Priority-ordered hook dispatch
//!
//! Analysis modules plug into the replay loop by registering hooks: a
//! callback, an opaque data handle bound to it, and a priority. A
//! [`HookRegistry`] keeps its entries sorted by priority and deduplicated by
//! `(callback, data)` identity; a [`HookTable`] maps small event type ids to
//! registries for per-type dispatch.
//!
//! ```rust
//! use tracekit_core::hooks::{Hook, HookData, HookRegistry, Priority};
//!
//! let mut registry: HookRegistry<u32> = HookRegistry::new();
//! let hook = Hook::new(|_data: &HookData, value: &u32| *value > 10);
//! registry.add(hook.clone(), HookData::none(), Priority::DEFAULT);
//!
//! assert!(registry.call(&42));
//! assert!(!registry.call(&3));
//! ```

mod registry;
mod table;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use registry::{HookEntry, HookRegistry, Removal};
pub use table::HookTable;

/// Ordering key of a hook; lower values run first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const HIGH: Priority = Priority(0);
    /// State reconstruction runs before the analyses that read it
    pub const STATE: Priority = Priority(25);
    pub const DEFAULT: Priority = Priority(50);
    pub const STATS: Priority = Priority(75);
    pub const LOW: Priority = Priority(100);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque data bound to a hook at registration time
///
/// Two handles are the same when they point at the same allocation (or are
/// both empty); the wrapped value itself is never compared.
#[derive(Clone, Default)]
pub struct HookData(Option<Arc<dyn Any + Send + Sync>>);

impl HookData {
    pub fn none() -> Self {
        HookData(None)
    }

    pub fn new<D: Any + Send + Sync>(value: D) -> Self {
        HookData(Some(Arc::new(value)))
    }

    pub fn from_arc(value: Arc<dyn Any + Send + Sync>) -> Self {
        HookData(Some(value))
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the bound value if it has type `D`
    pub fn get<D: Any>(&self) -> Option<&D> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<D>())
    }

    /// Identity comparison
    pub fn same(&self, other: &HookData) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for HookData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => f.write_str("HookData(none)"),
            Some(v) => write!(f, "HookData({:p})", Arc::as_ptr(v) as *const ()),
        }
    }
}

type HookFn<T> = dyn Fn(&HookData, &T) -> bool + Send + Sync;

/// A callback invoked with its bound [`HookData`] and the dispatched payload
///
/// The return value is a request to stop: `call_check` short-circuits on it
/// and the replay loop halts once any event hook returns `true`. Clones share
/// identity, so keep a clone around to remove the hook later.
pub struct Hook<T: ?Sized> {
    func: Arc<HookFn<T>>,
}

impl<T: ?Sized> Hook<T> {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&HookData, &T) -> bool + Send + Sync + 'static,
    {
        Self { func: Arc::new(func) }
    }

    #[inline]
    pub fn invoke(&self, data: &HookData, payload: &T) -> bool {
        (self.func)(data, payload)
    }

    /// Identity comparison
    pub fn same(&self, other: &Hook<T>) -> bool {
        Arc::as_ptr(&self.func) as *const () == Arc::as_ptr(&other.func) as *const ()
    }
}

impl<T: ?Sized> Clone for Hook<T> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Hook<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hook({:p})", Arc::as_ptr(&self.func) as *const ())
    }
}
