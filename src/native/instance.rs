use std::sync::Arc;

use super::backend::Backend;
use super::context::{Context, ContextOptions};

/// Entry point to a backend. An error instance creates error contexts.
#[derive(Clone, Default)]
pub struct Instance {
    backend: Option<Arc<dyn Backend>>,
}

impl Instance {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend: Some(backend) }
    }

    pub fn error() -> Self {
        Self { backend: None }
    }

    pub fn is_error(&self) -> bool {
        self.backend.is_none()
    }

    pub fn create_context(&self, options: &ContextOptions) -> Context {
        match &self.backend {
            Some(backend) => Context::new(*options, backend.clone()),
            None => Context::error(*options),
        }
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .finish()
    }
}
