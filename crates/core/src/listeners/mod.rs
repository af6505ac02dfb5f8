//! Listener chains for intercepted calls
//!
//! Every interception hook owns a [`PriorityListenerRegistry`] of the
//! listener trait it fans out to. All listener kinds share one verdict
//! type so a chain can be cut short the same way everywhere.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ncz_core::listeners::{PriorityListenerRegistry, Verdict};
//!
//! let registry: PriorityListenerRegistry<dyn MyListener> = PriorityListenerRegistry::new();
//! let tester: Arc<dyn MyListener> = Arc::new(MyTester::default());
//!
//! // Lower priority runs first
//! let key = registry.add(&tester, 4, SlotStatus::PlayerInTests);
//!
//! for (node, listener) in registry.snapshot() {
//!     if listener.call() > Verdict::Continue {
//!         break;
//!     }
//! }
//!
//! registry.remove_key(key);
//! ```

pub mod registry;

pub use registry::{ListenerKey, ListenerNode, ListenerSnapshot, PriorityListenerRegistry};

/// What a listener wants done with the intercepted call
///
/// Totally ordered: `Continue < Neutralize < Block`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Verdict {
    /// Forward the call unchanged and keep asking other listeners
    #[default]
    Continue = 0,

    /// Scrub the sensitive fields, then forward
    Neutralize = 1,

    /// Drop the call entirely
    Block = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_order() {
        assert!(Verdict::Continue < Verdict::Neutralize);
        assert!(Verdict::Neutralize < Verdict::Block);
        assert_eq!(Verdict::default(), Verdict::Continue);
    }
}
