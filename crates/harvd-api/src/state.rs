use std::sync::Arc;

use harvd_runtime::{ContextHandle, ServiceContext};

#[derive(Clone)]
pub struct AppState {
    pub handle: Arc<ContextHandle>,
}

impl AppState {
    pub fn new(handle: Arc<ContextHandle>) -> Self {
        Self { handle }
    }

    /// The live service context; a reset swaps it out underneath.
    pub fn ctx(&self) -> Arc<ServiceContext> {
        self.handle.context()
    }
}
