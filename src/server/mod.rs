//! Server side of the wire.
//!
//! The [`Server`] consumes records from one connection, resolves the ids
//! they carry against its [`KnownObjects`](objects::KnownObjects) table and
//! calls the native API through a [`Procs`] table. Return commands are
//! written through a [`ChunkedSerializer`].
//!
//! Per connection:
//! ```text
//! Active --fatal decode/allocator error--> Disconnected(Error)
//! Active --Disconnect command / disconnect()--> Disconnected(Clean)
//! ```
//! Nothing is dispatched once disconnected.

mod dispatch;
mod objects;

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::config::{ErrorPolicy, WireConfig};
use crate::error::{Result, WireError};
use crate::native::{Context, ErrorType, Instance, NamedInputs, NamedOperands, NamedOutputs, Procs};
use crate::object::{ObjectHandle, ObjectId, ObjectType};
use crate::protocol::{ChunkedCommandHandler, ChunkedSerializer, Command, RecordHeader, ReturnCommand};
use crate::transport::{CommandHandler, CommandSerializer, NoopSerializer};

use objects::{KnownObjects, NativeObject};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer asked, or the host called [`Server::disconnect`].
    Clean,
    /// A fatal error; the message is for logs only.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Disconnected(DisconnectReason),
}

/// Work finished outside the dispatch loop, waiting to be serialized.
enum Completion {
    Compute {
        context: ObjectHandle,
        serial: u64,
        outputs: ObjectId,
        error_type: ErrorType,
        message: String,
    },
    Uncaptured {
        context: ObjectHandle,
        error_type: ErrorType,
        message: String,
    },
}

/// Queues completions and wakes whoever serves the connection.
#[derive(Clone)]
struct CompletionSender {
    tx: mpsc::UnboundedSender<Completion>,
    ready: Arc<Notify>,
}

impl CompletionSender {
    fn send(&self, completion: Completion) {
        // The server may be gone; then there is nobody to tell.
        if self.tx.send(completion).is_ok() {
            self.ready.notify_one();
        }
    }
}

pub struct Server {
    procs: Arc<dyn Procs>,
    config: WireConfig,
    serializer: ChunkedSerializer,
    chunks: ChunkedCommandHandler,
    objects: KnownObjects,
    completions_tx: CompletionSender,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    state: ConnectionState,
}

impl Server {
    pub fn new(procs: Arc<dyn Procs>, serializer: Box<dyn CommandSerializer>, config: WireConfig) -> Self {
        let (tx, completions_rx) = mpsc::unbounded_channel();
        let completions_tx = CompletionSender {
            tx,
            ready: Arc::new(Notify::new()),
        };
        Self {
            procs,
            config,
            serializer: ChunkedSerializer::new(serializer),
            chunks: ChunkedCommandHandler::new(config.max_command_size),
            objects: KnownObjects::new(),
            completions_tx,
            completions_rx,
            state: ConnectionState::Active,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.state, ConnectionState::Disconnected(_))
    }

    /// Number of live objects of `ty`.
    pub fn object_count(&self, ty: ObjectType) -> usize {
        self.objects.len(ty)
    }

    pub fn has_object(&self, ty: ObjectType, id: ObjectId) -> bool {
        self.objects.contains(ty, id)
    }

    /// Bytes written by a compute into a registered output.
    pub fn named_outputs_data(&self, id: ObjectId, name: &str) -> Option<Vec<u8>> {
        let outputs = self.objects.named_outputs(id).ok()?;
        outputs.output(name).map(<[u8]>::to_vec)
    }

    pub fn inject_instance(&mut self, handle: ObjectHandle, instance: Instance) -> Result<()> {
        self.objects.bind(handle, NativeObject::Instance(instance))
    }

    /// Bind an externally created context and forward its uncaptured
    /// errors to the client.
    pub fn inject_context(&mut self, handle: ObjectHandle, context: Context) -> Result<()> {
        self.forward_uncaptured_errors(handle, &context);
        self.objects.bind(handle, NativeObject::Context(context))
    }

    pub fn inject_named_inputs(&mut self, handle: ObjectHandle, named: NamedInputs) -> Result<()> {
        self.objects.bind(handle, NativeObject::NamedInputs(named))
    }

    pub fn inject_named_operands(&mut self, handle: ObjectHandle, named: NamedOperands) -> Result<()> {
        self.objects.bind(handle, NativeObject::NamedOperands(named))
    }

    pub fn inject_named_outputs(&mut self, handle: ObjectHandle, named: NamedOutputs) -> Result<()> {
        self.objects.bind(handle, NativeObject::NamedOutputs(named))
    }

    fn forward_uncaptured_errors(&self, handle: ObjectHandle, context: &Context) {
        let tx = self.completions_tx.clone();
        self.procs.context_set_uncaptured_error_callback(
            context,
            Some(Box::new(move |error_type, message| {
                tx.send(Completion::Uncaptured {
                    context: handle,
                    error_type,
                    message: message.to_string(),
                });
            })),
        );
    }

    /// Notified whenever a completion is queued from outside the dispatch
    /// loop; follow with [`Server::flush_completions`] and [`Server::flush`].
    pub fn completion_ready(&self) -> Arc<Notify> {
        self.completions_tx.ready.clone()
    }

    /// Serialize completions that arrived since the last call, in order.
    pub fn flush_completions(&mut self) -> Result<()> {
        while let Ok(completion) = self.completions_rx.try_recv() {
            if self.is_disconnected() {
                continue;
            }
            match completion {
                Completion::Compute {
                    context,
                    serial,
                    outputs,
                    error_type,
                    message,
                } => {
                    if error_type == ErrorType::NoError {
                        self.serialize_compute_results(outputs)?;
                    }
                    self.send(&ReturnCommand::ContextComputeCallback {
                        context,
                        serial,
                        error_type,
                        message,
                    })?;
                }
                Completion::Uncaptured {
                    context,
                    error_type,
                    message,
                } => {
                    self.send(&ReturnCommand::ContextUncapturedError {
                        context,
                        error_type,
                        message,
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Stream every registered output of `outputs` back to the client.
    fn serialize_compute_results(&mut self, outputs: ObjectId) -> Result<()> {
        let Ok(handle) = self.objects.handle(ObjectType::NamedOutputs, outputs) else {
            tracing::debug!(outputs, "named outputs destroyed before results were sent");
            return Ok(());
        };
        let results: Vec<ReturnCommand> = self
            .objects
            .named_outputs(outputs)?
            .iter()
            .map(|(name, data)| ReturnCommand::ContextComputeResult {
                named_outputs: handle,
                name: name.to_string(),
                data: data.to_vec(),
            })
            .collect();
        for result in &results {
            self.send(result)?;
        }
        Ok(())
    }

    pub(crate) fn send(&mut self, command: &ReturnCommand) -> Result<()> {
        let record = command.encode()?;
        self.serializer.serialize(&record)
    }

    /// Flush buffered return commands to the transport.
    pub fn flush(&mut self) -> Result<()> {
        self.serializer.flush()
    }

    /// Tear the connection down and release every object.
    ///
    /// Calling this again has no effect.
    pub fn disconnect(&mut self) {
        self.teardown(DisconnectReason::Clean);
    }

    /// Tear down after a transport failure the server did not see itself.
    pub(crate) fn fail(&mut self, message: String) {
        self.teardown(DisconnectReason::Error(message));
    }

    fn teardown(&mut self, reason: DisconnectReason) {
        if self.is_disconnected() {
            return;
        }
        match &reason {
            DisconnectReason::Clean => tracing::debug!("server connection closed"),
            DisconnectReason::Error(message) => tracing::error!("server connection lost: {}", message),
        }
        // Whatever was already answered still goes out.
        if let Err(e) = self.serializer.flush() {
            tracing::debug!("final flush failed: {}", e);
        }
        self.serializer.replace(Box::new(NoopSerializer));
        self.state = ConnectionState::Disconnected(reason);

        let mut released = 0usize;
        for ty in ObjectType::ALL {
            if ty != ObjectType::Context {
                released += self.objects.drain(ty).len();
            }
        }
        for (_, entry) in self.objects.drain(ObjectType::Context) {
            if let NativeObject::Context(context) = &entry.object {
                self.procs.context_set_uncaptured_error_callback(context, None);
            }
            released += 1;
        }
        while self.completions_rx.try_recv().is_ok() {}
        tracing::debug!(released, "server objects released");
    }

    fn handle_record(&mut self, record: &[u8]) -> Result<()> {
        let command = match Command::decode(record) {
            Ok(command) => command,
            Err(e) if !e.is_fatal() => {
                // The client already holds a proxy for the result.
                if let Some((ty, result)) = Command::creation_result(record) {
                    self.objects.bind(result, NativeObject::error(ty))?;
                }
                let header = RecordHeader::decode(record).unwrap_or(RecordHeader::new(0, 0, 0));
                self.report(header.kind, header.target, e)?;
                return self.flush_completions();
            }
            Err(e) => return Err(e),
        };
        tracing::trace!(kind = command.kind().name(), target = command.target(), "dispatch");

        let kind = command.kind() as u32;
        let target = command.target();
        if let Err(e) = self.dispatch(command) {
            if e.is_fatal() {
                return Err(e);
            }
            self.report(kind, target, e)?;
        }
        self.flush_completions()
    }

    /// Answer a failed command with `CommandError`.
    fn report(&mut self, kind: u32, target: ObjectId, error: WireError) -> Result<()> {
        tracing::warn!(kind, target, "command failed: {}", error);
        let message = error.to_string();
        self.send(&ReturnCommand::CommandError {
            kind,
            target,
            message: message.clone(),
        })?;
        match self.config.error_policy {
            ErrorPolicy::Report => Ok(()),
            ErrorPolicy::Disconnect => Err(WireError::decode(format!("escalated: {}", message))),
        }
    }

    fn handle_stream<'a>(&mut self, data: &mut &'a [u8]) -> Result<()> {
        while !self.is_disconnected() {
            let Some(record) = self.chunks.next_command(data)? else {
                break;
            };
            self.handle_record(&record)?;
        }
        Ok(())
    }
}

impl CommandHandler for Server {
    fn handle_commands<'a>(&mut self, commands: &'a [u8]) -> Result<&'a [u8]> {
        if self.is_disconnected() {
            return Err(WireError::Disconnected);
        }
        let mut data = commands;
        let result = self.handle_stream(&mut data).and_then(|()| self.serializer.flush());
        if let Err(e) = result {
            self.teardown(DisconnectReason::Error(e.to_string()));
            return Err(e);
        }
        if self.is_disconnected() {
            // A clean Disconnect; the rest of the stream is not ours to read.
            return Ok(&[]);
        }
        Ok(data)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.teardown(DisconnectReason::Clean);
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("procs", &self.procs.name())
            .field("state", &self.state)
            .finish()
    }
}
