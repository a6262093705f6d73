//! Typed proxy handles and the per-object client state behind them.

use std::collections::BTreeMap;

use crate::native::ErrorType;
use crate::object::{ObjectHandle, ObjectId, ObjectType};

/// Resolves an asynchronous call. Called exactly once.
pub type Callback = Box<dyn FnOnce(ErrorType, &str) + Send>;

/// Receives errors reported outside any pending callback.
pub type UncapturedErrorCallback = Box<dyn FnMut(ErrorType, &str) + Send>;

/// A typed client-side handle to a server object.
pub trait Proxy: Copy {
    const TYPE: ObjectType;

    fn handle(&self) -> ObjectHandle;

    fn from_handle(handle: ObjectHandle) -> Self;

    fn id(&self) -> ObjectId {
        self.handle().id
    }
}

macro_rules! proxies {
    ($($(#[$meta:meta])* $name:ident,)+) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(ObjectHandle);

            impl Proxy for $name {
                const TYPE: ObjectType = ObjectType::$name;

                fn handle(&self) -> ObjectHandle {
                    self.0
                }

                fn from_handle(handle: ObjectHandle) -> Self {
                    Self(handle)
                }
            }
        )+
    };
}

proxies! {
    Instance,
    Context,
    GraphBuilder,
    Operand,
    /// Outputs of a multi-output operation.
    OperandArray,
    Graph,
    NamedInputs,
    NamedOperands,
    NamedOutputs,
}

/// Result of [`Client::graph_builder_operation`](super::Client::graph_builder_operation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Operand(Operand),
    Array(OperandArray),
}

#[derive(Default)]
pub(crate) struct ContextState {
    pub(crate) error_scope_depth: usize,
    pub(crate) next_pop_serial: u64,
    pub(crate) pop_callbacks: BTreeMap<u64, Callback>,
    pub(crate) next_compute_serial: u64,
    pub(crate) compute_callbacks: BTreeMap<u64, Callback>,
}

pub(crate) enum ProxyState {
    Plain,
    Context(ContextState),
    OperandArray { size: usize },
    NamedOutputs { results: BTreeMap<String, Vec<u8>> },
}

pub(crate) struct ProxyObject {
    /// External reference count; the object is destroyed when it hits 0.
    pub(crate) refcount: u32,
    pub(crate) state: ProxyState,
}

impl ProxyObject {
    pub(crate) fn new(ty: ObjectType) -> Self {
        let state = match ty {
            ObjectType::Context => ProxyState::Context(ContextState::default()),
            ObjectType::NamedOutputs => ProxyState::NamedOutputs {
                results: BTreeMap::new(),
            },
            _ => ProxyState::Plain,
        };
        Self { refcount: 1, state }
    }

    pub(crate) fn context_mut(&mut self) -> Option<&mut ContextState> {
        match &mut self.state {
            ProxyState::Context(state) => Some(state),
            _ => None,
        }
    }

    /// Resolve every pending callback with `error_type`. Returns how many
    /// were resolved.
    pub(crate) fn cancel_callbacks(&mut self, error_type: ErrorType, message: &str) -> usize {
        let Some(state) = self.context_mut() else {
            return 0;
        };
        let pending: Vec<Callback> = std::mem::take(&mut state.pop_callbacks)
            .into_values()
            .chain(std::mem::take(&mut state.compute_callbacks).into_values())
            .collect();
        let count = pending.len();
        for callback in pending {
            callback(error_type, message);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_cancel_callbacks_runs_each_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut object = ProxyObject::new(ObjectType::Context);
        for serial in 0..2 {
            let calls = calls.clone();
            object.context_mut().unwrap().compute_callbacks.insert(
                serial,
                Box::new(move |ty, msg| calls.lock().unwrap().push((ty, msg.to_string()))),
            );
        }

        assert_eq!(object.cancel_callbacks(ErrorType::DeviceLost, "gone"), 2);
        assert_eq!(object.cancel_callbacks(ErrorType::DeviceLost, "gone"), 0);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_plain_object_has_no_context_state() {
        let mut object = ProxyObject::new(ObjectType::Graph);
        assert_eq!(object.refcount, 1);
        assert!(object.context_mut().is_none());
        assert_eq!(object.cancel_callbacks(ErrorType::Unknown, ""), 0);
    }

    #[test]
    fn test_proxy_type_table() {
        let graph = Graph::from_handle(ObjectHandle::new(7, 1));
        assert_eq!(Graph::TYPE, ObjectType::Graph);
        assert_eq!(graph.id(), 7);
        assert_eq!(graph.handle().generation, 1);
    }
}
