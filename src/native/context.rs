//! Native context: backend binding plus error scopes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::backend::Backend;
use super::error::{ErrorFilter, ErrorType, NativeError, NativeResult};

/// Receives errors no scope captured.
pub type ErrorCallback = Box<dyn FnMut(ErrorType, &str) + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum DevicePreference {
    #[default]
    Default = 0,
    Gpu = 1,
    Cpu = 2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum PowerPreference {
    #[default]
    Default = 0,
    HighPerformance = 1,
    LowPower = 2,
}

impl DevicePreference {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(DevicePreference::Default),
            1 => Some(DevicePreference::Gpu),
            2 => Some(DevicePreference::Cpu),
            _ => None,
        }
    }
}

impl PowerPreference {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(PowerPreference::Default),
            1 => Some(PowerPreference::HighPerformance),
            2 => Some(PowerPreference::LowPower),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextOptions {
    pub device_preference: DevicePreference,
    pub power_preference: PowerPreference,
}

struct ErrorScope {
    filter: ErrorFilter,
    captured: Option<(ErrorType, String)>,
}

#[derive(Default)]
struct ErrorState {
    scopes: Vec<ErrorScope>,
    uncaptured: Option<ErrorCallback>,
}

struct ContextInner {
    options: ContextOptions,
    backend: Option<Arc<dyn Backend>>,
    errors: Mutex<ErrorState>,
}

/// A context. Clones share the same error state; graph builders and graphs
/// keep a clone to report into.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new(options: ContextOptions, backend: Arc<dyn Backend>) -> Self {
        Self::with_backend(options, Some(backend))
    }

    /// An error context: everything created from it is an error object.
    pub fn error(options: ContextOptions) -> Self {
        Self::with_backend(options, None)
    }

    fn with_backend(options: ContextOptions, backend: Option<Arc<dyn Backend>>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                options,
                backend,
                errors: Mutex::new(ErrorState::default()),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.inner.backend.is_none()
    }

    pub fn options(&self) -> ContextOptions {
        self.inner.options
    }

    pub(crate) fn backend(&self) -> NativeResult<&Arc<dyn Backend>> {
        self.inner
            .backend
            .as_ref()
            .ok_or_else(|| NativeError::validation("context is an error"))
    }

    fn errors(&self) -> MutexGuard<'_, ErrorState> {
        self.inner.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_error_scope(&self, filter: ErrorFilter) {
        self.errors().scopes.push(ErrorScope {
            filter,
            captured: None,
        });
    }

    /// Pop the innermost scope. `None` when no scope is open.
    ///
    /// A scope that captured nothing reports `ErrorType::NoError`.
    pub fn pop_error_scope(&self) -> Option<(ErrorType, String)> {
        let scope = self.errors().scopes.pop()?;
        Some(scope.captured.unwrap_or((ErrorType::NoError, String::new())))
    }

    pub fn error_scope_depth(&self) -> usize {
        self.errors().scopes.len()
    }

    pub fn set_uncaptured_error_callback(&self, callback: Option<ErrorCallback>) {
        self.errors().uncaptured = callback;
    }

    pub fn inject_error(&self, ty: ErrorType, message: &str) {
        self.handle_error(NativeError::new(ty.into(), message));
    }

    /// Route an error to the innermost scope whose filter captures it, or to
    /// the uncaptured callback. A scope keeps only its first error.
    pub fn handle_error(&self, error: NativeError) {
        let ty = error.error_type();
        let mut state = self.errors();
        if let Some(scope) = state.scopes.iter_mut().rev().find(|s| s.filter.captures(ty)) {
            if scope.captured.is_none() {
                scope.captured = Some((ty, error.message));
            }
            return;
        }

        let Some(mut callback) = state.uncaptured.take() else {
            tracing::debug!("uncaptured {:?} error dropped: {}", ty, error.message);
            return;
        };
        drop(state);
        callback(ty, &error.message);

        let mut state = self.errors();
        if state.uncaptured.is_none() {
            state.uncaptured = Some(callback);
        }
    }

    /// Report the error, if any, and hand back the success value.
    pub fn consumed<T>(&self, result: NativeResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.handle_error(error);
                None
            }
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("options", &self.inner.options)
            .field("is_error", &self.is_error())
            .finish()
    }
}
