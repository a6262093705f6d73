//! The proc table: one entry per native API call.
//!
//! The wire server never calls native objects directly; it goes through a
//! [`Procs`] so a host can swap a real backend for [`NullProcs`] at runtime.
//! A process-wide table is set with [`set_procs`]; a thread may override it
//! with [`set_thread_procs`].

use std::cell::RefCell;
use std::sync::{Arc, PoisonError, RwLock};

use super::backend::Backend;
use super::context::{Context, ContextOptions, ErrorCallback};
use super::descriptor::OperandDescriptor;
use super::error::{ErrorFilter, ErrorType, NativeError, NativeResult};
use super::graph::Graph;
use super::graph_builder::{GraphBuilder, Operand, OperandArray, OperationOutput};
use super::instance::Instance;
use super::named::{Input, NamedInputs, NamedOperands, NamedOutputs};
use super::null::NullBackend;
use super::ops::Operation;

/// Completion of an asynchronous compute. Called exactly once.
pub type ComputeCallback = Box<dyn FnOnce(ErrorType, &str) + Send>;

pub trait Procs: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_instance(&self) -> Instance;

    fn instance_create_context(&self, instance: &Instance, options: &ContextOptions) -> Context {
        instance.create_context(options)
    }

    fn context_create_graph_builder(&self, context: &Context) -> GraphBuilder {
        GraphBuilder::new(context.clone())
    }

    fn context_push_error_scope(&self, context: &Context, filter: ErrorFilter) {
        context.push_error_scope(filter);
    }

    fn context_pop_error_scope(&self, context: &Context) -> Option<(ErrorType, String)> {
        context.pop_error_scope()
    }

    fn context_set_uncaptured_error_callback(&self, context: &Context, callback: Option<ErrorCallback>) {
        context.set_uncaptured_error_callback(callback);
    }

    /// Synchronous compute; failures are reported to `context`.
    fn context_compute(&self, context: &Context, graph: &Graph, inputs: &NamedInputs, outputs: &mut NamedOutputs) {
        context.consumed(graph.compute(inputs, outputs));
    }

    /// Asynchronous compute; failures go to `callback` only.
    fn context_compute_async(
        &self,
        _context: &Context,
        graph: &Graph,
        inputs: &NamedInputs,
        outputs: &mut NamedOutputs,
        callback: ComputeCallback,
    ) {
        match graph.compute(inputs, outputs) {
            Ok(()) => callback(ErrorType::NoError, ""),
            Err(error) => callback(error.error_type(), &error.message),
        }
    }

    fn graph_builder_input(&self, builder: &GraphBuilder, name: &str, desc: &OperandDescriptor) -> Operand {
        builder.input(name, desc)
    }

    fn graph_builder_constant(&self, builder: &GraphBuilder, desc: &OperandDescriptor, data: &[u8]) -> Operand {
        builder.constant(desc, data)
    }

    fn graph_builder_operation(
        &self,
        builder: &GraphBuilder,
        operation: &Operation,
        inputs: &[Operand],
    ) -> OperationOutput {
        builder.operation(operation, inputs)
    }

    fn graph_builder_build(&self, builder: &GraphBuilder, named: &NamedOperands) -> Graph {
        builder.build(named)
    }

    fn operand_array_size(&self, array: &OperandArray) -> usize {
        array.size()
    }

    fn operand_array_get(&self, array: &OperandArray, index: usize) -> NativeResult<Operand> {
        array.get(index)
    }

    fn create_named_inputs(&self) -> NamedInputs {
        NamedInputs::new()
    }

    fn create_named_operands(&self) -> NamedOperands {
        NamedOperands::new()
    }

    fn create_named_outputs(&self) -> NamedOutputs {
        NamedOutputs::new()
    }

    fn named_inputs_set(&self, named: &mut NamedInputs, name: &str, input: Input) {
        named.set(name, input);
    }

    fn named_operands_set(&self, named: &mut NamedOperands, name: &str, operand: Operand) {
        named.set(name, operand);
    }

    fn named_outputs_set_output(&self, named: &mut NamedOutputs, name: &str, byte_length: usize) {
        named.set_output(name, byte_length);
    }
}

/// Frontend validation over a real backend.
#[derive(Clone)]
pub struct NativeProcs {
    backend: Arc<dyn Backend>,
}

impl NativeProcs {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn null() -> Self {
        Self::new(Arc::new(NullBackend))
    }
}

impl Procs for NativeProcs {
    fn name(&self) -> &'static str {
        self.backend.name()
    }

    fn create_instance(&self) -> Instance {
        Instance::new(self.backend.clone())
    }
}

/// No backend at all: every creation yields an error object.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProcs;

impl Procs for NullProcs {
    fn name(&self) -> &'static str {
        "none"
    }

    fn create_instance(&self) -> Instance {
        Instance::error()
    }

    fn context_compute(&self, context: &Context, _graph: &Graph, _inputs: &NamedInputs, _outputs: &mut NamedOutputs) {
        context.handle_error(NativeError::device_lost("no backend"));
    }

    fn context_compute_async(
        &self,
        _context: &Context,
        _graph: &Graph,
        _inputs: &NamedInputs,
        _outputs: &mut NamedOutputs,
        callback: ComputeCallback,
    ) {
        callback(ErrorType::DeviceLost, "no backend");
    }
}

static PROCS: RwLock<Option<Arc<dyn Procs>>> = RwLock::new(None);

thread_local! {
    static THREAD_PROCS: RefCell<Option<Arc<dyn Procs>>> = const { RefCell::new(None) };
}

/// Replace the process-wide table. `None` restores [`NullProcs`].
pub fn set_procs(procs: Option<Arc<dyn Procs>>) {
    *PROCS.write().unwrap_or_else(PoisonError::into_inner) = procs;
}

/// Override the table for the calling thread only.
pub fn set_thread_procs(procs: Arc<dyn Procs>) {
    THREAD_PROCS.with(|slot| *slot.borrow_mut() = Some(procs));
}

pub fn clear_thread_procs() {
    THREAD_PROCS.with(|slot| *slot.borrow_mut() = None);
}

/// Thread override, then the process-wide table, then [`NullProcs`].
pub fn current_procs() -> Arc<dyn Procs> {
    if let Some(procs) = THREAD_PROCS.with(|slot| slot.borrow().clone()) {
        return procs;
    }
    PROCS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .unwrap_or_else(|| Arc::new(NullProcs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::descriptor::OperandType;
    use std::sync::mpsc;

    #[test]
    fn test_thread_override() {
        // The process-wide table is shared by parallel tests; only the
        // thread-local slot is exercised here.
        set_thread_procs(Arc::new(NativeProcs::null()));
        assert_eq!(current_procs().name(), "null");
        clear_thread_procs();

        let other = std::thread::spawn(|| {
            set_thread_procs(Arc::new(NullProcs));
            current_procs().name()
        });
        assert_eq!(other.join().unwrap(), "none");
    }

    #[test]
    fn test_null_procs_yield_error_objects() {
        let procs = NullProcs;
        let instance = procs.create_instance();
        assert!(instance.is_error());
        let context = procs.instance_create_context(&instance, &ContextOptions::default());
        assert!(context.is_error());
        let builder = procs.context_create_graph_builder(&context);

        context.push_error_scope(ErrorFilter::Validation);
        let x = procs.graph_builder_input(&builder, "x", &OperandDescriptor::new(OperandType::Float32, vec![1]));
        assert!(x.is_error());
        assert_eq!(context.pop_error_scope().unwrap().0, ErrorType::Validation);

        let (tx, rx) = mpsc::channel();
        procs.context_compute_async(
            &context,
            &Graph::error(context.clone()),
            &NamedInputs::new(),
            &mut NamedOutputs::new(),
            Box::new(move |ty, _| tx.send(ty).unwrap()),
        );
        assert_eq!(rx.try_recv().unwrap(), ErrorType::DeviceLost);
    }

    #[test]
    fn test_async_compute_error_graph() {
        let procs = NativeProcs::null();
        let context = procs.instance_create_context(&procs.create_instance(), &ContextOptions::default());
        let (tx, rx) = mpsc::channel();
        procs.context_compute_async(
            &context,
            &Graph::error(context.clone()),
            &NamedInputs::new(),
            &mut NamedOutputs::new(),
            Box::new(move |ty, msg| tx.send((ty, msg.to_string())).unwrap()),
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            (ErrorType::DeviceLost, "fail to build graph!".to_string())
        );
    }
}
