//! Process-wide transport library lifecycle
//!
//! The first controller to start initializes the shared transport state and
//! the last one to stop tears it down. The count lives behind a mutex so
//! controllers on different threads agree on who is first and last.

use std::sync::Mutex;
use tracing::info;

/// Registry used by every controller in the process
pub static TRANSPORT_LIBRARY: LibraryRegistry = LibraryRegistry::new();

#[derive(Debug, Default)]
struct LibraryState {
    live: usize,
    generation: u64,
}

/// Reference-counted init/teardown bookkeeping
#[derive(Debug)]
pub struct LibraryRegistry {
    state: Mutex<LibraryState>,
}

impl LibraryRegistry {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(LibraryState {
                live: 0,
                generation: 0,
            }),
        }
    }

    /// Take a reference, initializing the library if this is the first one
    pub fn acquire(&'static self) -> LibraryGuard {
        let mut state = self.lock();
        if state.live == 0 {
            state.generation += 1;
            info!(
                generation = state.generation,
                "MQTT transport library initialized"
            );
        }
        state.live += 1;
        LibraryGuard { registry: self }
    }

    /// Number of live references
    pub fn live_instances(&self) -> usize {
        self.lock().live
    }

    /// How many times the library has been initialized
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn release(&self) {
        let mut state = self.lock();
        state.live = state.live.saturating_sub(1);
        if state.live == 0 {
            info!(
                generation = state.generation,
                "MQTT transport library cleaned up"
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LibraryState> {
        // The state is two counters; a panic elsewhere cannot leave it torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One live reference on a [`LibraryRegistry`]; released on drop
#[derive(Debug)]
pub struct LibraryGuard {
    registry: &'static LibraryRegistry,
}

impl Drop for LibraryGuard {
    fn drop(&mut self) {
        self.registry.release();
    }
}
