use crate::error::{Result, WireError};
use crate::native::{ErrorType, Input, OperationOutput};
use crate::object::{ObjectHandle, ObjectId, ObjectType, NULL_OBJECT_ID};
use crate::protocol::{Command, ReturnCommand, RECORD_HEADER_SIZE};

use super::objects::NativeObject;
use super::{Completion, DisconnectReason, Server};

impl Server {
    pub(super) fn dispatch(&mut self, command: Command) -> Result<()> {
        // Creation commands bind an error object when validation fails, so
        // the client's proxy always has a counterpart to destroy.
        if let Some((ty, result)) = command.result() {
            return match self.create(command) {
                Ok(object) => self.objects.bind(result, object),
                Err(e) if !e.is_fatal() => {
                    self.objects.bind(result, NativeObject::error(ty))?;
                    Err(e)
                }
                Err(e) => Err(e),
            };
        }

        match command {
            Command::DestroyObject { ty, id } => {
                let entry = self.objects.release(ty, id)?;
                if let NativeObject::Context(context) = &entry.object {
                    self.procs.context_set_uncaptured_error_callback(context, None);
                }
                Ok(())
            }
            Command::ContextPushErrorScope { context, filter } => {
                let context = self.objects.context(context)?;
                self.procs.context_push_error_scope(context, filter);
                Ok(())
            }
            Command::ContextPopErrorScope { context, serial } => {
                let handle = self.objects.handle(ObjectType::Context, context)?;
                let popped = self.procs.context_pop_error_scope(self.objects.context(context)?);
                let (error_type, message) =
                    popped.unwrap_or((ErrorType::Unknown, "no error scope to pop".to_string()));
                self.send(&ReturnCommand::ContextPopErrorScopeCallback {
                    context: handle,
                    serial,
                    error_type,
                    message,
                })
            }
            Command::ContextCompute {
                context,
                graph,
                inputs,
                outputs,
                serial,
            } => {
                let handle = self.objects.handle(ObjectType::Context, context)?;
                let result = self.compute(context, graph, inputs, outputs, Some(serial));
                if let Err(e) = &result {
                    if !e.is_fatal() {
                        // Resolve the client's pending callback as well.
                        self.send(&ReturnCommand::ContextComputeCallback {
                            context: handle,
                            serial,
                            error_type: ErrorType::Validation,
                            message: e.to_string(),
                        })?;
                    }
                }
                result
            }
            Command::ContextComputeSync {
                context,
                graph,
                inputs,
                outputs,
            } => {
                self.compute(context, graph, inputs, outputs, None)?;
                self.serialize_compute_results(outputs)
            }
            Command::NamedOperandsSet {
                named_operands,
                name,
                operand,
            } => {
                let operand = self.objects.operand(operand)?.clone();
                let named = self.objects.named_operands_mut(named_operands)?;
                self.procs.named_operands_set(named, &name, operand);
                Ok(())
            }
            Command::NamedInputsSet {
                named_inputs,
                name,
                dimensions,
                data,
            } => {
                let named = self.objects.named_inputs_mut(named_inputs)?;
                self.procs.named_inputs_set(named, &name, Input { dimensions, data });
                Ok(())
            }
            Command::NamedOutputsSetOutput {
                named_outputs,
                name,
                byte_length,
            } => {
                // Each result travels back as one command: header, generation,
                // name and data length prefixes.
                let overhead = (RECORD_HEADER_SIZE + 12 + name.len()) as u64;
                let limit = (self.config.max_command_size as u64).saturating_sub(overhead);
                if byte_length > limit {
                    return Err(WireError::validation(format!(
                        "output {} of {} bytes exceeds the {} byte limit",
                        name, byte_length, limit
                    )));
                }
                let named = self.objects.named_outputs_mut(named_outputs)?;
                self.procs.named_outputs_set_output(named, &name, byte_length as usize);
                Ok(())
            }
            Command::Disconnect => {
                self.teardown(DisconnectReason::Clean);
                Ok(())
            }
            other => Err(WireError::decode(format!(
                "{} was not dispatched",
                other.kind().name()
            ))),
        }
    }

    /// Run a creation command and return the object to bind.
    fn create(&mut self, command: Command) -> Result<NativeObject> {
        let procs = self.procs.clone();
        let object = match command {
            Command::InstanceCreateContext {
                instance,
                options,
                result,
            } => {
                let context = procs.instance_create_context(self.objects.instance(instance)?, &options);
                self.forward_uncaptured_errors(result, &context);
                NativeObject::Context(context)
            }
            Command::ContextCreateGraphBuilder { context, .. } => {
                NativeObject::GraphBuilder(procs.context_create_graph_builder(self.objects.context(context)?))
            }
            Command::CreateNamedInputs { .. } => NativeObject::NamedInputs(procs.create_named_inputs()),
            Command::CreateNamedOperands { .. } => NativeObject::NamedOperands(procs.create_named_operands()),
            Command::CreateNamedOutputs { .. } => NativeObject::NamedOutputs(procs.create_named_outputs()),
            Command::GraphBuilderInput { builder, name, desc, .. } => {
                NativeObject::Operand(procs.graph_builder_input(self.objects.graph_builder(builder)?, &name, &desc))
            }
            Command::GraphBuilderConstant { builder, desc, data, .. } => NativeObject::Operand(
                procs.graph_builder_constant(self.objects.graph_builder(builder)?, &desc, &data),
            ),
            Command::GraphBuilderOperation {
                builder,
                operation,
                mut inputs,
                ..
            } => {
                let builder = self.objects.graph_builder(builder)?;
                // Trailing nulls stand for omitted optional inputs.
                while inputs.last() == Some(&NULL_OBJECT_ID) {
                    inputs.pop();
                }
                let operands = inputs
                    .iter()
                    .map(|&id| self.objects.operand(id).cloned())
                    .collect::<Result<Vec<_>>>()?;
                match procs.graph_builder_operation(builder, &operation, &operands) {
                    OperationOutput::Operand(operand) => NativeObject::Operand(operand),
                    OperationOutput::Array(array) => NativeObject::OperandArray(array),
                }
            }
            Command::GraphBuilderBuild {
                builder,
                named_operands,
                ..
            } => NativeObject::Graph(procs.graph_builder_build(
                self.objects.graph_builder(builder)?,
                self.objects.named_operands(named_operands)?,
            )),
            Command::OperandArrayGet { array, index, .. } => {
                let array = self.objects.operand_array(array)?;
                let operand = procs
                    .operand_array_get(array, index as usize)
                    .map_err(|e| WireError::validation(e.message))?;
                NativeObject::Operand(operand)
            }
            other => {
                return Err(WireError::decode(format!(
                    "{} does not create an object",
                    other.kind().name()
                )))
            }
        };
        Ok(object)
    }

    /// Compute with `outputs` taken out of the table for the duration, so it
    /// can be borrowed mutably next to the other arguments.
    fn compute(
        &mut self,
        context: ObjectId,
        graph: ObjectId,
        inputs: ObjectId,
        outputs: ObjectId,
        serial: Option<u64>,
    ) -> Result<()> {
        let mut entry = self.objects.release(ObjectType::NamedOutputs, outputs)?;
        let result = (|| {
            let NativeObject::NamedOutputs(named_outputs) = &mut entry.object else {
                return Err(WireError::Allocator("named outputs table is corrupt".into()));
            };
            let native_context = self.objects.context(context)?;
            let native_graph = self.objects.graph(graph)?;
            let named_inputs = self.objects.named_inputs(inputs)?;

            match serial {
                None => {
                    self.procs
                        .context_compute(native_context, native_graph, named_inputs, named_outputs);
                }
                Some(serial) => {
                    let handle = self.objects.handle(ObjectType::Context, context)?;
                    let tx = self.completions_tx.clone();
                    self.procs.context_compute_async(
                        native_context,
                        native_graph,
                        named_inputs,
                        named_outputs,
                        Box::new(move |error_type, message| {
                            tx.send(Completion::Compute {
                                context: handle,
                                serial,
                                outputs,
                                error_type,
                                message: message.to_string(),
                            });
                        }),
                    );
                }
            }
            Ok(())
        })();
        self.objects.restore(outputs, entry);
        result
    }
}
