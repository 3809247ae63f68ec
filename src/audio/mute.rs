//! Shared mute flag

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Live mute cell shared between the controller and whoever toggles mute
///
/// Readers always see the current value at the moment they look, never a copy taken when
/// they were wired up
#[derive(Debug, Clone, Default)]
pub struct MuteFlag(Arc<AtomicBool>);

impl MuteFlag {
    /// Create an unmuted flag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Set the flag, returning the previous value
    pub fn set(&self, muted: bool) -> bool {
        self.0.swap(muted, Ordering::AcqRel)
    }
}
