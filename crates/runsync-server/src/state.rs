use std::sync::Arc;

use crate::hub::RunHub;
use crate::runtime::{JobRuntime, LinearRuntime};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub hub: RunHub,
    pub runtime: Arc<dyn JobRuntime>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::with_runtime(Arc::new(LinearRuntime::new()))
    }

    /// Create with a specific job runtime (for testing).
    pub fn with_runtime(runtime: Arc<dyn JobRuntime>) -> Self {
        Self {
            hub: RunHub::new(),
            runtime,
        }
    }
}
