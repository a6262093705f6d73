//! Client side of the wire.
//!
//! Every call on a proxy is encoded into a [`Command`] and written through
//! a [`ChunkedSerializer`]; nothing reaches the peer until [`Client::flush`].
//! Ids for new objects are allocated here and travel inside the creation
//! command, so creating an object never waits for the server.
//!
//! Return commands are fed back through the [`CommandHandler`] impl and
//! resolve pending callbacks.
//!
//! # Example
//!
//! ```ignore
//! let (serializer, to_server) = memory_pipe(64 * 1024);
//! let mut client = Client::new(Box::new(serializer), WireConfig::default());
//!
//! let instance = client.reserve_instance()?;
//! let context = client.instance_create_context(instance, ContextOptions::default())?;
//! let builder = client.context_create_graph_builder(context)?;
//! client.flush()?;
//! ```

mod proxy;

use std::collections::BTreeMap;

pub use proxy::{
    Callback, Context, Graph, GraphBuilder, Instance, NamedInputs, NamedOperands, NamedOutputs, Operand,
    OperandArray, OperationResult, Proxy, UncapturedErrorCallback,
};

use crate::config::WireConfig;
use crate::error::{Result, WireError};
use crate::native::{ContextOptions, ErrorFilter, ErrorType, OperandDescriptor, Operation};
use crate::object::{ObjectAllocator, ObjectHandle, ObjectType, PerObjectType};
use crate::protocol::{ChunkedCommandHandler, ChunkedSerializer, Command, ReturnCommand};
use crate::transport::{CommandHandler, CommandSerializer, NoopSerializer};

use proxy::{ContextState, ProxyObject, ProxyState};

const POP_DISCONNECTED: &str = "GPU device disconnected";
const CONTEXT_DISCONNECTED: &str = "WebNN context disconnected";
const CONTEXT_RELEASED: &str = "context released before the call completed";

pub struct Client {
    config: WireConfig,
    serializer: ChunkedSerializer,
    chunks: ChunkedCommandHandler,
    objects: PerObjectType<ObjectAllocator<ProxyObject>>,
    uncaptured: Option<UncapturedErrorCallback>,
    disconnected: bool,
}

impl Client {
    pub fn new(serializer: Box<dyn CommandSerializer>, config: WireConfig) -> Self {
        Self {
            config,
            serializer: ChunkedSerializer::new(serializer),
            chunks: ChunkedCommandHandler::new(config.max_command_size),
            objects: PerObjectType::default(),
            uncaptured: None,
            disconnected: false,
        }
    }

    pub fn config(&self) -> &WireConfig {
        &self.config
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Number of live proxies of `ty`.
    pub fn object_count(&self, ty: ObjectType) -> usize {
        self.objects[ty].len()
    }

    /// Whether `proxy` still names a live object.
    pub fn is_live<P: Proxy>(&self, proxy: P) -> bool {
        self.objects[P::TYPE].contains(proxy.handle())
    }

    // ---- Reservation ----------------------------------------------------

    /// Allocate an instance id without telling the server. The host binds
    /// a native instance to it with `Server::inject_instance`.
    pub fn reserve_instance(&mut self) -> Result<Instance> {
        self.reserve()
    }

    pub fn reserve_context(&mut self) -> Result<Context> {
        self.reserve()
    }

    pub fn reserve_named_inputs(&mut self) -> Result<NamedInputs> {
        self.reserve()
    }

    pub fn reserve_named_operands(&mut self) -> Result<NamedOperands> {
        self.reserve()
    }

    pub fn reserve_named_outputs(&mut self) -> Result<NamedOutputs> {
        self.reserve()
    }

    fn reserve<P: Proxy>(&mut self) -> Result<P> {
        self.ensure_connected()?;
        Ok(self.allocate(ProxyObject::new(P::TYPE)))
    }

    // ---- Instance / context ---------------------------------------------

    pub fn instance_create_context(&mut self, instance: Instance, options: ContextOptions) -> Result<Context> {
        self.ensure_connected()?;
        let instance = self.check(instance)?;
        let context: Context = self.allocate(ProxyObject::new(ObjectType::Context));
        self.send(&Command::InstanceCreateContext {
            instance,
            options,
            result: context.handle(),
        })?;
        Ok(context)
    }

    pub fn context_create_graph_builder(&mut self, context: Context) -> Result<GraphBuilder> {
        self.ensure_connected()?;
        let context = self.check(context)?;
        let builder: GraphBuilder = self.allocate(ProxyObject::new(ObjectType::GraphBuilder));
        self.send(&Command::ContextCreateGraphBuilder {
            context,
            result: builder.handle(),
        })?;
        Ok(builder)
    }

    pub fn context_push_error_scope(&mut self, context: Context, filter: ErrorFilter) -> Result<()> {
        self.ensure_connected()?;
        self.context_state(context)?.error_scope_depth += 1;
        self.send(&Command::ContextPushErrorScope {
            context: context.id(),
            filter,
        })
    }

    /// Pop the innermost error scope; `callback` receives what it captured.
    ///
    /// Returns `Ok(false)` without sending anything when no scope is open.
    /// After a disconnect the callback runs immediately with `DeviceLost`.
    pub fn context_pop_error_scope(
        &mut self,
        context: Context,
        callback: impl FnOnce(ErrorType, &str) + Send + 'static,
    ) -> Result<bool> {
        if self.disconnected {
            callback(ErrorType::DeviceLost, POP_DISCONNECTED);
            return Ok(true);
        }
        let state = self.context_state(context)?;
        if state.error_scope_depth == 0 {
            return Ok(false);
        }
        state.error_scope_depth -= 1;
        let serial = state.next_pop_serial;
        state.next_pop_serial += 1;
        state.pop_callbacks.insert(serial, Box::new(callback));

        self.send(&Command::ContextPopErrorScope {
            context: context.id(),
            serial,
        })?;
        Ok(true)
    }

    /// Receive errors no scope captured, and commands the server rejected.
    pub fn set_uncaptured_error_callback(&mut self, callback: Option<UncapturedErrorCallback>) {
        self.uncaptured = callback;
    }

    /// Compute `graph` asynchronously.
    ///
    /// On success the results are in `outputs` (see
    /// [`named_outputs_result`](Self::named_outputs_result)) by the time
    /// `callback` runs with `NoError`. A stale argument is rejected before
    /// the callback is registered, so it never runs.
    pub fn context_compute(
        &mut self,
        context: Context,
        graph: Graph,
        inputs: NamedInputs,
        outputs: NamedOutputs,
        callback: impl FnOnce(ErrorType, &str) + Send + 'static,
    ) -> Result<()> {
        if self.disconnected {
            callback(ErrorType::DeviceLost, CONTEXT_DISCONNECTED);
            return Ok(());
        }
        let graph = self.check(graph)?;
        let inputs = self.check(inputs)?;
        self.clear_results(outputs)?;

        let state = self.context_state(context)?;
        let serial = state.next_compute_serial;
        state.next_compute_serial += 1;
        state.compute_callbacks.insert(serial, Box::new(callback));

        self.send(&Command::ContextCompute {
            context: context.id(),
            graph,
            inputs,
            outputs: outputs.id(),
            serial,
        })
    }

    /// Compute without a callback. Failures go to the context's error scopes.
    pub fn context_compute_sync(
        &mut self,
        context: Context,
        graph: Graph,
        inputs: NamedInputs,
        outputs: NamedOutputs,
    ) -> Result<()> {
        self.ensure_connected()?;
        let context = self.check(context)?;
        let graph = self.check(graph)?;
        let inputs = self.check(inputs)?;
        self.clear_results(outputs)?;
        self.send(&Command::ContextComputeSync {
            context,
            graph,
            inputs,
            outputs: outputs.id(),
        })
    }

    // ---- Named collections ----------------------------------------------

    pub fn create_named_inputs(&mut self) -> Result<NamedInputs> {
        self.ensure_connected()?;
        let named: NamedInputs = self.allocate(ProxyObject::new(ObjectType::NamedInputs));
        self.send(&Command::CreateNamedInputs { result: named.handle() })?;
        Ok(named)
    }

    pub fn create_named_operands(&mut self) -> Result<NamedOperands> {
        self.ensure_connected()?;
        let named: NamedOperands = self.allocate(ProxyObject::new(ObjectType::NamedOperands));
        self.send(&Command::CreateNamedOperands { result: named.handle() })?;
        Ok(named)
    }

    pub fn create_named_outputs(&mut self) -> Result<NamedOutputs> {
        self.ensure_connected()?;
        let named: NamedOutputs = self.allocate(ProxyObject::new(ObjectType::NamedOutputs));
        self.send(&Command::CreateNamedOutputs { result: named.handle() })?;
        Ok(named)
    }

    pub fn named_operands_set(&mut self, named: NamedOperands, name: &str, operand: Operand) -> Result<()> {
        self.ensure_connected()?;
        let named_operands = self.check(named)?;
        let operand = self.check(operand)?;
        self.send(&Command::NamedOperandsSet {
            named_operands,
            name: name.to_string(),
            operand,
        })
    }

    /// Bind input `name`. Empty `dimensions` keeps the graph's declared shape.
    pub fn named_inputs_set(&mut self, named: NamedInputs, name: &str, dimensions: &[i32], data: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        let named_inputs = self.check(named)?;
        self.send(&Command::NamedInputsSet {
            named_inputs,
            name: name.to_string(),
            dimensions: dimensions.to_vec(),
            data: data.to_vec(),
        })
    }

    /// Register output `name` with a buffer of `byte_length` bytes.
    pub fn named_outputs_set_output(&mut self, named: NamedOutputs, name: &str, byte_length: usize) -> Result<()> {
        self.ensure_connected()?;
        let named_outputs = self.check(named)?;
        self.send(&Command::NamedOutputsSetOutput {
            named_outputs,
            name: name.to_string(),
            byte_length: byte_length as u64,
        })
    }

    /// Bytes the last computation produced for output `name`.
    pub fn named_outputs_result(&self, named: NamedOutputs, name: &str) -> Result<Option<&[u8]>> {
        let object = self.objects[ObjectType::NamedOutputs]
            .get_handle(named.handle())
            .ok_or_else(|| stale(named))?;
        match &object.state {
            ProxyState::NamedOutputs { results } => Ok(results.get(name).map(Vec::as_slice)),
            _ => Ok(None),
        }
    }

    fn clear_results(&mut self, named: NamedOutputs) -> Result<()> {
        let object = self.objects[ObjectType::NamedOutputs]
            .get_handle_mut(named.handle())
            .ok_or_else(|| stale(named))?;
        if let ProxyState::NamedOutputs { results } = &mut object.state {
            results.clear();
        }
        Ok(())
    }

    // ---- Graph building -------------------------------------------------

    pub fn graph_builder_input(&mut self, builder: GraphBuilder, name: &str, desc: &OperandDescriptor) -> Result<Operand> {
        self.ensure_connected()?;
        let builder = self.check(builder)?;
        let operand: Operand = self.allocate(ProxyObject::new(ObjectType::Operand));
        self.send(&Command::GraphBuilderInput {
            builder,
            name: name.to_string(),
            desc: desc.clone(),
            result: operand.handle(),
        })?;
        Ok(operand)
    }

    pub fn graph_builder_constant(
        &mut self,
        builder: GraphBuilder,
        desc: &OperandDescriptor,
        data: &[u8],
    ) -> Result<Operand> {
        self.ensure_connected()?;
        let builder = self.check(builder)?;
        let operand: Operand = self.allocate(ProxyObject::new(ObjectType::Operand));
        self.send(&Command::GraphBuilderConstant {
            builder,
            desc: desc.clone(),
            data: data.to_vec(),
            result: operand.handle(),
        })?;
        Ok(operand)
    }

    /// Add an operator. Multi-output operators yield an operand array.
    pub fn graph_builder_operation(
        &mut self,
        builder: GraphBuilder,
        operation: Operation,
        inputs: &[Operand],
    ) -> Result<OperationResult> {
        self.ensure_connected()?;
        let builder = self.check(builder)?;
        let inputs = inputs
            .iter()
            .map(|operand| self.check(*operand))
            .collect::<Result<Vec<_>>>()?;

        let result = if operation.has_multiple_outputs() {
            let size = operation.output_count();
            OperationResult::Array(self.allocate(ProxyObject {
                refcount: 1,
                state: ProxyState::OperandArray { size },
            }))
        } else {
            OperationResult::Operand(self.allocate(ProxyObject::new(ObjectType::Operand)))
        };
        let handle = match result {
            OperationResult::Operand(operand) => operand.handle(),
            OperationResult::Array(array) => array.handle(),
        };
        self.send(&Command::GraphBuilderOperation {
            builder,
            operation,
            inputs,
            result: handle,
        })?;
        Ok(result)
    }

    pub fn graph_builder_build(&mut self, builder: GraphBuilder, named: NamedOperands) -> Result<Graph> {
        self.ensure_connected()?;
        let builder = self.check(builder)?;
        let named_operands = self.check(named)?;
        let graph: Graph = self.allocate(ProxyObject::new(ObjectType::Graph));
        self.send(&Command::GraphBuilderBuild {
            builder,
            named_operands,
            result: graph.handle(),
        })?;
        Ok(graph)
    }

    /// Number of outputs, known locally from the operation.
    pub fn operand_array_size(&self, array: OperandArray) -> Result<usize> {
        let object = self.objects[ObjectType::OperandArray]
            .get_handle(array.handle())
            .ok_or_else(|| stale(array))?;
        match object.state {
            ProxyState::OperandArray { size } => Ok(size),
            _ => Ok(0),
        }
    }

    pub fn operand_array_get(&mut self, array: OperandArray, index: usize) -> Result<Operand> {
        self.ensure_connected()?;
        let id = self.check(array)?;
        let index = u32::try_from(index).map_err(|_| WireError::validation(format!("index {} out of range", index)))?;
        let operand: Operand = self.allocate(ProxyObject::new(ObjectType::Operand));
        self.send(&Command::OperandArrayGet {
            array: id,
            index,
            result: operand.handle(),
        })?;
        Ok(operand)
    }

    // ---- Lifetime -------------------------------------------------------

    /// Take another external reference.
    pub fn reference<P: Proxy>(&mut self, proxy: P) -> Result<()> {
        self.ensure_connected()?;
        let object = self.objects[P::TYPE]
            .get_handle_mut(proxy.handle())
            .ok_or_else(|| stale(proxy))?;
        object.refcount += 1;
        Ok(())
    }

    /// Drop an external reference; the last one destroys the object on
    /// both sides. After a disconnect this does nothing.
    pub fn release<P: Proxy>(&mut self, proxy: P) -> Result<()> {
        if self.disconnected {
            return Ok(());
        }
        let object = self.objects[P::TYPE]
            .get_handle_mut(proxy.handle())
            .ok_or_else(|| stale(proxy))?;
        object.refcount -= 1;
        if object.refcount > 0 {
            return Ok(());
        }

        let mut object = self.objects[P::TYPE].free(proxy.id())?;
        object.cancel_callbacks(ErrorType::Unknown, CONTEXT_RELEASED);
        self.send(&Command::DestroyObject {
            ty: P::TYPE,
            id: proxy.id(),
        })
    }

    /// Hand buffered commands to the transport.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_connected()?;
        if let Err(e) = self.serializer.flush() {
            self.teardown(&e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Tell the server to close the connection, then tear down locally.
    ///
    /// Every live proxy is freed and every pending callback resolves with
    /// `DeviceLost`. Calling this again has no effect.
    pub fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        let sent = Command::Disconnect
            .encode()
            .and_then(|record| self.serializer.serialize(&record))
            .and_then(|()| self.serializer.flush());
        if let Err(e) = sent {
            tracing::debug!("disconnect not delivered: {}", e);
        }
        self.teardown("client disconnect");
    }

    /// Local teardown only; used when the transport is already gone.
    fn teardown(&mut self, reason: &str) {
        if self.disconnected {
            return;
        }
        tracing::debug!("client connection closed: {}", reason);
        self.disconnected = true;
        self.serializer.replace(Box::new(NoopSerializer));

        let mut released = 0usize;
        let mut cancelled = 0usize;
        for (_, allocator) in self.objects.iter_mut() {
            for handle in allocator.handles() {
                if let Ok(mut object) = allocator.free(handle.id) {
                    cancelled += object.cancel_callbacks(ErrorType::DeviceLost, CONTEXT_DISCONNECTED);
                    released += 1;
                }
            }
        }
        tracing::debug!(released, cancelled, "client objects released");
    }

    // ---- Helpers --------------------------------------------------------

    fn allocate<P: Proxy>(&mut self, object: ProxyObject) -> P {
        P::from_handle(self.objects[P::TYPE].allocate(|_| object))
    }

    /// The id of a live proxy, or `StaleHandle`.
    fn check<P: Proxy>(&self, proxy: P) -> Result<u32> {
        if self.objects[P::TYPE].contains(proxy.handle()) {
            Ok(proxy.id())
        } else {
            Err(stale(proxy))
        }
    }

    fn context_state(&mut self, context: Context) -> Result<&mut ContextState> {
        self.objects[ObjectType::Context]
            .get_handle_mut(context.handle())
            .and_then(ProxyObject::context_mut)
            .ok_or_else(|| stale(context))
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.disconnected {
            Err(WireError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        self.ensure_connected()?;
        let record = command.encode()?;
        if let Err(e) = self.serializer.serialize(&record) {
            self.teardown(&e.to_string());
            return Err(e);
        }
        Ok(())
    }

    fn report_uncaptured(&mut self, error_type: ErrorType, message: &str) {
        match self.uncaptured.as_mut() {
            Some(callback) => callback(error_type, message),
            None => tracing::debug!(?error_type, "uncaptured error: {}", message),
        }
    }

    fn live_context(&mut self, handle: ObjectHandle) -> Option<&mut ContextState> {
        self.objects[ObjectType::Context]
            .get_handle_mut(handle)
            .and_then(ProxyObject::context_mut)
    }

    fn handle_return(&mut self, command: ReturnCommand) -> Result<()> {
        match command {
            ReturnCommand::ContextPopErrorScopeCallback {
                context,
                serial,
                error_type,
                message,
            } => {
                let Some(state) = self.live_context(context) else {
                    tracing::debug!(id = context.id, "pop callback for a released context");
                    return Ok(());
                };
                let callback = take_callback(&mut state.pop_callbacks, serial, "pop error scope")?;
                callback(error_type, &message);
            }
            ReturnCommand::ContextComputeCallback {
                context,
                serial,
                error_type,
                message,
            } => {
                let Some(state) = self.live_context(context) else {
                    tracing::debug!(id = context.id, "compute callback for a released context");
                    return Ok(());
                };
                let callback = take_callback(&mut state.compute_callbacks, serial, "compute")?;
                callback(error_type, &message);
            }
            ReturnCommand::ContextComputeResult {
                named_outputs,
                name,
                data,
            } => match self.objects[ObjectType::NamedOutputs].get_handle_mut(named_outputs) {
                Some(ProxyObject {
                    state: ProxyState::NamedOutputs { results },
                    ..
                }) => {
                    results.insert(name, data);
                }
                _ => tracing::debug!(id = named_outputs.id, "result for released named outputs"),
            },
            ReturnCommand::ContextUncapturedError {
                context,
                error_type,
                message,
            } => {
                if self.live_context(context).is_some() {
                    self.report_uncaptured(error_type, &message);
                }
            }
            ReturnCommand::CommandError { kind, target, message } => {
                tracing::warn!(kind, target, "server rejected command: {}", message);
                self.report_uncaptured(ErrorType::Validation, &message);
            }
        }
        Ok(())
    }

    fn handle_stream(&mut self, data: &mut &[u8]) -> Result<()> {
        while !self.disconnected {
            let Some(record) = self.chunks.next_command(data)? else {
                break;
            };
            let command = ReturnCommand::decode(&record)?;
            self.handle_return(command)?;
        }
        Ok(())
    }
}

fn stale<P: Proxy>(proxy: P) -> WireError {
    let handle = proxy.handle();
    WireError::StaleHandle {
        ty: P::TYPE,
        id: handle.id,
        generation: handle.generation,
    }
}

fn take_callback(pending: &mut BTreeMap<u64, Callback>, serial: u64, what: &str) -> Result<Callback> {
    pending
        .remove(&serial)
        .ok_or_else(|| WireError::decode(format!("no pending {} request {}", what, serial)))
}

impl CommandHandler for Client {
    fn handle_commands<'a>(&mut self, commands: &'a [u8]) -> Result<&'a [u8]> {
        self.ensure_connected()?;
        let mut data = commands;
        if let Err(e) = self.handle_stream(&mut data) {
            tracing::error!("client connection lost: {}", e);
            self.teardown(&e.to_string());
            return Err(e);
        }
        Ok(data)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.disconnected {
            return;
        }
        let mut destroyed = 0usize;
        for ty in ObjectType::ALL {
            for handle in self.objects[ty].handles() {
                let Ok(mut object) = self.objects[ty].free(handle.id) else {
                    continue;
                };
                object.cancel_callbacks(ErrorType::DeviceLost, CONTEXT_DISCONNECTED);
                let sent = Command::DestroyObject { ty, id: handle.id }
                    .encode()
                    .and_then(|record| self.serializer.serialize(&record));
                if sent.is_err() {
                    self.teardown("transport closed while dropping");
                    return;
                }
                destroyed += 1;
            }
        }
        if let Err(e) = self.serializer.flush() {
            tracing::debug!("final flush failed: {}", e);
        }
        self.disconnected = true;
        tracing::debug!(destroyed, "client dropped");
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("disconnected", &self.disconnected)
            .finish()
    }
}
