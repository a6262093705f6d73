//! Commands: client -> server calls and server -> client returns.
//!
//! Every command is one record (see [`wire_format`](super::wire_format)).
//! The header's target field carries the object the call is made on, or
//! the object a return command is addressed to; `0` when there is none.
//! Objects created by a command are named by the client with a full
//! [`ObjectHandle`]; every other object argument is a plain id.

use bytes::Bytes;

use super::wire_format::{RecordHeader, WireReader, WireWriter, RECORD_HEADER_SIZE};
use crate::codec::MsgPackCodec;
use crate::error::{Result, WireError};
use crate::native::{
    ContextOptions, DevicePreference, ErrorFilter, ErrorType, OperandDescriptor, OperandType, Operation,
    PowerPreference,
};
use crate::object::{ObjectHandle, ObjectId, ObjectType, NULL_OBJECT_ID};

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            $($variant = $value,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant),)+
                }
            }
        }
    };
}

wire_enum! {
    /// Client -> server command kinds.
    CommandKind {
        DestroyObject = 1,
        InstanceCreateContext = 2,
        ContextCreateGraphBuilder = 3,
        ContextPushErrorScope = 4,
        ContextPopErrorScope = 5,
        ContextCompute = 6,
        ContextComputeSync = 7,
        CreateNamedInputs = 8,
        CreateNamedOperands = 9,
        CreateNamedOutputs = 10,
        GraphBuilderInput = 11,
        GraphBuilderConstant = 12,
        GraphBuilderOperation = 13,
        GraphBuilderBuild = 14,
        OperandArrayGet = 15,
        NamedOperandsSet = 16,
        NamedInputsSet = 17,
        NamedOutputsSetOutput = 18,
        Disconnect = 19,
    }
}

wire_enum! {
    /// Server -> client command kinds.
    ReturnCommandKind {
        ContextPopErrorScopeCallback = 101,
        ContextComputeCallback = 102,
        ContextComputeResult = 103,
        ContextUncapturedError = 104,
        CommandError = 105,
    }
}

/// One client -> server call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    DestroyObject {
        ty: ObjectType,
        id: ObjectId,
    },
    InstanceCreateContext {
        instance: ObjectId,
        options: ContextOptions,
        result: ObjectHandle,
    },
    ContextCreateGraphBuilder {
        context: ObjectId,
        result: ObjectHandle,
    },
    ContextPushErrorScope {
        context: ObjectId,
        filter: ErrorFilter,
    },
    ContextPopErrorScope {
        context: ObjectId,
        serial: u64,
    },
    ContextCompute {
        context: ObjectId,
        graph: ObjectId,
        inputs: ObjectId,
        outputs: ObjectId,
        serial: u64,
    },
    ContextComputeSync {
        context: ObjectId,
        graph: ObjectId,
        inputs: ObjectId,
        outputs: ObjectId,
    },
    CreateNamedInputs {
        result: ObjectHandle,
    },
    CreateNamedOperands {
        result: ObjectHandle,
    },
    CreateNamedOutputs {
        result: ObjectHandle,
    },
    GraphBuilderInput {
        builder: ObjectId,
        name: String,
        desc: OperandDescriptor,
        result: ObjectHandle,
    },
    GraphBuilderConstant {
        builder: ObjectId,
        desc: OperandDescriptor,
        data: Vec<u8>,
        result: ObjectHandle,
    },
    /// `result` names an Operand, or an OperandArray when the operation has
    /// multiple outputs.
    GraphBuilderOperation {
        builder: ObjectId,
        operation: Operation,
        inputs: Vec<ObjectId>,
        result: ObjectHandle,
    },
    GraphBuilderBuild {
        builder: ObjectId,
        named_operands: ObjectId,
        result: ObjectHandle,
    },
    OperandArrayGet {
        array: ObjectId,
        index: u32,
        result: ObjectHandle,
    },
    NamedOperandsSet {
        named_operands: ObjectId,
        name: String,
        operand: ObjectId,
    },
    NamedInputsSet {
        named_inputs: ObjectId,
        name: String,
        dimensions: Vec<i32>,
        data: Vec<u8>,
    },
    NamedOutputsSetOutput {
        named_outputs: ObjectId,
        name: String,
        byte_length: u64,
    },
    Disconnect,
}

/// One server -> client return.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnCommand {
    ContextPopErrorScopeCallback {
        context: ObjectHandle,
        serial: u64,
        error_type: ErrorType,
        message: String,
    },
    ContextComputeCallback {
        context: ObjectHandle,
        serial: u64,
        error_type: ErrorType,
        message: String,
    },
    ContextComputeResult {
        named_outputs: ObjectHandle,
        name: String,
        data: Vec<u8>,
    },
    ContextUncapturedError {
        context: ObjectHandle,
        error_type: ErrorType,
        message: String,
    },
    /// A command failed validation and produced no result.
    CommandError {
        kind: u32,
        target: ObjectId,
        message: String,
    },
}

fn put_descriptor(w: &mut WireWriter, desc: &OperandDescriptor) {
    w.put_u32(desc.ty as u32).put_i32s(&desc.dimensions);
}

fn read_error_type(r: &mut WireReader<'_>) -> Result<ErrorType> {
    let raw = r.read_u32()?;
    ErrorType::from_u32(raw).ok_or_else(|| WireError::decode(format!("unknown error type {}", raw)))
}

/// Split one complete record into its header and body.
fn split_record(record: &[u8]) -> Result<(RecordHeader, &[u8])> {
    let header = RecordHeader::decode(record)
        .ok_or_else(|| WireError::decode(format!("record of {} bytes has no header", record.len())))?;
    let body = &record[RECORD_HEADER_SIZE..];
    if body.len() != header.body_len as usize {
        return Err(WireError::decode(format!(
            "record declares {} body bytes, holds {}",
            header.body_len,
            body.len()
        )));
    }
    Ok((header, body))
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::DestroyObject { .. } => CommandKind::DestroyObject,
            Command::InstanceCreateContext { .. } => CommandKind::InstanceCreateContext,
            Command::ContextCreateGraphBuilder { .. } => CommandKind::ContextCreateGraphBuilder,
            Command::ContextPushErrorScope { .. } => CommandKind::ContextPushErrorScope,
            Command::ContextPopErrorScope { .. } => CommandKind::ContextPopErrorScope,
            Command::ContextCompute { .. } => CommandKind::ContextCompute,
            Command::ContextComputeSync { .. } => CommandKind::ContextComputeSync,
            Command::CreateNamedInputs { .. } => CommandKind::CreateNamedInputs,
            Command::CreateNamedOperands { .. } => CommandKind::CreateNamedOperands,
            Command::CreateNamedOutputs { .. } => CommandKind::CreateNamedOutputs,
            Command::GraphBuilderInput { .. } => CommandKind::GraphBuilderInput,
            Command::GraphBuilderConstant { .. } => CommandKind::GraphBuilderConstant,
            Command::GraphBuilderOperation { .. } => CommandKind::GraphBuilderOperation,
            Command::GraphBuilderBuild { .. } => CommandKind::GraphBuilderBuild,
            Command::OperandArrayGet { .. } => CommandKind::OperandArrayGet,
            Command::NamedOperandsSet { .. } => CommandKind::NamedOperandsSet,
            Command::NamedInputsSet { .. } => CommandKind::NamedInputsSet,
            Command::NamedOutputsSetOutput { .. } => CommandKind::NamedOutputsSetOutput,
            Command::Disconnect => CommandKind::Disconnect,
        }
    }

    /// The object the call is made on.
    pub fn target(&self) -> ObjectId {
        match self {
            Command::DestroyObject { id, .. } => *id,
            Command::InstanceCreateContext { instance, .. } => *instance,
            Command::ContextCreateGraphBuilder { context, .. }
            | Command::ContextPushErrorScope { context, .. }
            | Command::ContextPopErrorScope { context, .. }
            | Command::ContextCompute { context, .. }
            | Command::ContextComputeSync { context, .. } => *context,
            Command::GraphBuilderInput { builder, .. }
            | Command::GraphBuilderConstant { builder, .. }
            | Command::GraphBuilderOperation { builder, .. }
            | Command::GraphBuilderBuild { builder, .. } => *builder,
            Command::OperandArrayGet { array, .. } => *array,
            Command::NamedOperandsSet { named_operands, .. } => *named_operands,
            Command::NamedInputsSet { named_inputs, .. } => *named_inputs,
            Command::NamedOutputsSetOutput { named_outputs, .. } => *named_outputs,
            Command::CreateNamedInputs { .. }
            | Command::CreateNamedOperands { .. }
            | Command::CreateNamedOutputs { .. }
            | Command::Disconnect => NULL_OBJECT_ID,
        }
    }

    /// The type and handle of the object this command creates, if any.
    pub fn result(&self) -> Option<(ObjectType, ObjectHandle)> {
        match self {
            Command::InstanceCreateContext { result, .. } => Some((ObjectType::Context, *result)),
            Command::ContextCreateGraphBuilder { result, .. } => Some((ObjectType::GraphBuilder, *result)),
            Command::CreateNamedInputs { result } => Some((ObjectType::NamedInputs, *result)),
            Command::CreateNamedOperands { result } => Some((ObjectType::NamedOperands, *result)),
            Command::CreateNamedOutputs { result } => Some((ObjectType::NamedOutputs, *result)),
            Command::GraphBuilderInput { result, .. }
            | Command::GraphBuilderConstant { result, .. }
            | Command::OperandArrayGet { result, .. } => Some((ObjectType::Operand, *result)),
            Command::GraphBuilderOperation { operation, result, .. } => {
                Some((operation_result_type_of(operation), *result))
            }
            Command::GraphBuilderBuild { result, .. } => Some((ObjectType::Graph, *result)),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut w = WireWriter::new(self.kind() as u32, self.target());
        match self {
            Command::DestroyObject { ty, .. } => {
                w.put_u32(ty.as_u32());
            }
            Command::InstanceCreateContext { options, result, .. } => {
                w.put_u32(options.device_preference as u32)
                    .put_u32(options.power_preference as u32)
                    .put_handle(*result);
            }
            Command::ContextCreateGraphBuilder { result, .. } => {
                w.put_handle(*result);
            }
            Command::ContextPushErrorScope { filter, .. } => {
                w.put_u32(*filter as u32);
            }
            Command::ContextPopErrorScope { serial, .. } => {
                w.put_u64(*serial);
            }
            Command::ContextCompute {
                graph,
                inputs,
                outputs,
                serial,
                ..
            } => {
                w.put_u32(*graph).put_u32(*inputs).put_u32(*outputs).put_u64(*serial);
            }
            Command::ContextComputeSync {
                graph, inputs, outputs, ..
            } => {
                w.put_u32(*graph).put_u32(*inputs).put_u32(*outputs);
            }
            Command::CreateNamedInputs { result }
            | Command::CreateNamedOperands { result }
            | Command::CreateNamedOutputs { result } => {
                w.put_handle(*result);
            }
            Command::GraphBuilderInput { name, desc, result, .. } => {
                w.put_str(name);
                put_descriptor(&mut w, desc);
                w.put_handle(*result);
            }
            Command::GraphBuilderConstant { desc, data, result, .. } => {
                put_descriptor(&mut w, desc);
                w.put_bytes(data).put_handle(*result);
            }
            Command::GraphBuilderOperation {
                operation,
                inputs,
                result,
                ..
            } => {
                let blob = MsgPackCodec::encode(operation)?;
                w.put_bytes(&blob)
                    .put_ids(inputs)
                    .put_u32(operation_result_type_of(operation).as_u32())
                    .put_handle(*result);
            }
            Command::GraphBuilderBuild {
                named_operands, result, ..
            } => {
                w.put_u32(*named_operands).put_handle(*result);
            }
            Command::OperandArrayGet { index, result, .. } => {
                w.put_u32(*index).put_handle(*result);
            }
            Command::NamedOperandsSet { name, operand, .. } => {
                w.put_str(name).put_u32(*operand);
            }
            Command::NamedInputsSet {
                name, dimensions, data, ..
            } => {
                w.put_str(name).put_i32s(dimensions).put_bytes(data);
            }
            Command::NamedOutputsSetOutput { name, byte_length, .. } => {
                w.put_str(name).put_u64(*byte_length);
            }
            Command::Disconnect => {}
        }
        w.finish()
    }

    /// Decode one complete record.
    ///
    /// Malformed records are [`WireError::Decode`]; a well-formed record
    /// whose arguments fall outside their declared range is
    /// [`WireError::Validation`]. Range checks run only after the whole
    /// body has been read, so a validation error always comes from a
    /// structurally complete record.
    pub fn decode(record: &[u8]) -> Result<Command> {
        let (header, body) = split_record(record)?;
        let kind = CommandKind::from_u32(header.kind)
            .ok_or_else(|| WireError::decode(format!("unknown command kind {}", header.kind)))?;
        let target = header.target;
        let mut r = WireReader::new(body);

        let command = match kind {
            CommandKind::DestroyObject => {
                let raw = r.read_u32()?;
                r.finish()?;
                Command::DestroyObject {
                    ty: checked(raw, "object type", ObjectType::from_u32)?,
                    id: target,
                }
            }
            CommandKind::InstanceCreateContext => {
                let device = r.read_u32()?;
                let power = r.read_u32()?;
                let result = r.read_handle()?;
                r.finish()?;
                Command::InstanceCreateContext {
                    instance: target,
                    options: ContextOptions {
                        device_preference: checked(device, "device preference", DevicePreference::from_u32)?,
                        power_preference: checked(power, "power preference", PowerPreference::from_u32)?,
                    },
                    result,
                }
            }
            CommandKind::ContextCreateGraphBuilder => {
                let result = r.read_handle()?;
                r.finish()?;
                Command::ContextCreateGraphBuilder { context: target, result }
            }
            CommandKind::ContextPushErrorScope => {
                let raw = r.read_u32()?;
                r.finish()?;
                Command::ContextPushErrorScope {
                    context: target,
                    filter: checked(raw, "error filter", ErrorFilter::from_u32)?,
                }
            }
            CommandKind::ContextPopErrorScope => {
                let serial = r.read_u64()?;
                r.finish()?;
                Command::ContextPopErrorScope { context: target, serial }
            }
            CommandKind::ContextCompute => {
                let graph = r.read_u32()?;
                let inputs = r.read_u32()?;
                let outputs = r.read_u32()?;
                let serial = r.read_u64()?;
                r.finish()?;
                Command::ContextCompute {
                    context: target,
                    graph,
                    inputs,
                    outputs,
                    serial,
                }
            }
            CommandKind::ContextComputeSync => {
                let graph = r.read_u32()?;
                let inputs = r.read_u32()?;
                let outputs = r.read_u32()?;
                r.finish()?;
                Command::ContextComputeSync {
                    context: target,
                    graph,
                    inputs,
                    outputs,
                }
            }
            CommandKind::CreateNamedInputs | CommandKind::CreateNamedOperands | CommandKind::CreateNamedOutputs => {
                let result = r.read_handle()?;
                r.finish()?;
                match kind {
                    CommandKind::CreateNamedInputs => Command::CreateNamedInputs { result },
                    CommandKind::CreateNamedOperands => Command::CreateNamedOperands { result },
                    _ => Command::CreateNamedOutputs { result },
                }
            }
            CommandKind::GraphBuilderInput => {
                let name = r.read_str()?.to_string();
                let desc = RawDescriptor::read(&mut r)?;
                let result = r.read_handle()?;
                r.finish()?;
                Command::GraphBuilderInput {
                    builder: target,
                    name,
                    desc: desc.check()?,
                    result,
                }
            }
            CommandKind::GraphBuilderConstant => {
                let desc = RawDescriptor::read(&mut r)?;
                let data = r.read_bytes()?.to_vec();
                let result = r.read_handle()?;
                r.finish()?;
                Command::GraphBuilderConstant {
                    builder: target,
                    desc: desc.check()?,
                    data,
                    result,
                }
            }
            CommandKind::GraphBuilderOperation => {
                let blob = r.read_bytes()?;
                let inputs = r.read_ids()?;
                let result_type = r.read_u32()?;
                let result = r.read_handle()?;
                r.finish()?;
                let result_type = checked(result_type, "operation result type", operation_result_type)?;
                let operation: Operation = MsgPackCodec::decode_argument(blob)?;
                if operation_result_type_of(&operation) != result_type {
                    return Err(WireError::validation(format!(
                        "{} does not produce {}",
                        operation.name(),
                        result_type.name()
                    )));
                }
                Command::GraphBuilderOperation {
                    builder: target,
                    operation,
                    inputs,
                    result,
                }
            }
            CommandKind::GraphBuilderBuild => {
                let named_operands = r.read_u32()?;
                let result = r.read_handle()?;
                r.finish()?;
                Command::GraphBuilderBuild {
                    builder: target,
                    named_operands,
                    result,
                }
            }
            CommandKind::OperandArrayGet => {
                let index = r.read_u32()?;
                let result = r.read_handle()?;
                r.finish()?;
                Command::OperandArrayGet {
                    array: target,
                    index,
                    result,
                }
            }
            CommandKind::NamedOperandsSet => {
                let name = r.read_str()?.to_string();
                let operand = r.read_u32()?;
                r.finish()?;
                Command::NamedOperandsSet {
                    named_operands: target,
                    name,
                    operand,
                }
            }
            CommandKind::NamedInputsSet => {
                let name = r.read_str()?.to_string();
                let dimensions = r.read_i32s()?;
                let data = r.read_bytes()?.to_vec();
                r.finish()?;
                Command::NamedInputsSet {
                    named_inputs: target,
                    name,
                    dimensions,
                    data,
                }
            }
            CommandKind::NamedOutputsSetOutput => {
                let name = r.read_str()?.to_string();
                let byte_length = r.read_u64()?;
                r.finish()?;
                Command::NamedOutputsSetOutput {
                    named_outputs: target,
                    name,
                    byte_length,
                }
            }
            CommandKind::Disconnect => {
                r.finish()?;
                Command::Disconnect
            }
        };
        Ok(command)
    }

    /// Type and handle of the object a creation record names, read
    /// without validating its arguments.
    ///
    /// Every creation command ends with its result handle, preceded for
    /// `GraphBuilderOperation` by the result type. Only meaningful for a
    /// record whose structure [`Command::decode`] accepted.
    pub fn creation_result(record: &[u8]) -> Option<(ObjectType, ObjectHandle)> {
        let (header, body) = split_record(record).ok()?;
        let ty = match CommandKind::from_u32(header.kind)? {
            CommandKind::InstanceCreateContext => ObjectType::Context,
            CommandKind::ContextCreateGraphBuilder => ObjectType::GraphBuilder,
            CommandKind::CreateNamedInputs => ObjectType::NamedInputs,
            CommandKind::CreateNamedOperands => ObjectType::NamedOperands,
            CommandKind::CreateNamedOutputs => ObjectType::NamedOutputs,
            CommandKind::GraphBuilderInput | CommandKind::GraphBuilderConstant | CommandKind::OperandArrayGet => {
                ObjectType::Operand
            }
            CommandKind::GraphBuilderBuild => ObjectType::Graph,
            CommandKind::GraphBuilderOperation => {
                let start = body.len().checked_sub(12)?;
                let mut r = WireReader::new(&body[start..start + 4]);
                operation_result_type(r.read_u32().ok()?)?
            }
            _ => return None,
        };
        let start = body.len().checked_sub(8)?;
        let handle = WireReader::new(&body[start..]).read_handle().ok()?;
        Some((ty, handle))
    }
}

/// A descriptor as read from the wire, before its type is range checked.
struct RawDescriptor {
    ty: u32,
    dimensions: Vec<i32>,
}

impl RawDescriptor {
    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        let ty = r.read_u32()?;
        let dimensions = r.read_i32s()?;
        Ok(Self { ty, dimensions })
    }

    fn check(self) -> Result<OperandDescriptor> {
        let ty = checked(self.ty, "operand type", OperandType::from_u32)?;
        Ok(OperandDescriptor::new(ty, self.dimensions))
    }
}

fn checked<T>(raw: u32, what: &str, from: impl FnOnce(u32) -> Option<T>) -> Result<T> {
    from(raw).ok_or_else(|| WireError::validation(format!("unknown {} {}", what, raw)))
}

fn operation_result_type(raw: u32) -> Option<ObjectType> {
    match ObjectType::from_u32(raw)? {
        ty @ (ObjectType::Operand | ObjectType::OperandArray) => Some(ty),
        _ => None,
    }
}

fn operation_result_type_of(operation: &Operation) -> ObjectType {
    if operation.has_multiple_outputs() {
        ObjectType::OperandArray
    } else {
        ObjectType::Operand
    }
}

impl ReturnCommand {
    pub fn kind(&self) -> ReturnCommandKind {
        match self {
            ReturnCommand::ContextPopErrorScopeCallback { .. } => ReturnCommandKind::ContextPopErrorScopeCallback,
            ReturnCommand::ContextComputeCallback { .. } => ReturnCommandKind::ContextComputeCallback,
            ReturnCommand::ContextComputeResult { .. } => ReturnCommandKind::ContextComputeResult,
            ReturnCommand::ContextUncapturedError { .. } => ReturnCommandKind::ContextUncapturedError,
            ReturnCommand::CommandError { .. } => ReturnCommandKind::CommandError,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let bytes = match self {
            ReturnCommand::ContextPopErrorScopeCallback {
                context,
                serial,
                error_type,
                message,
            }
            | ReturnCommand::ContextComputeCallback {
                context,
                serial,
                error_type,
                message,
            } => {
                let mut w = WireWriter::new(self.kind() as u32, context.id);
                w.put_u32(context.generation)
                    .put_u64(*serial)
                    .put_u32(*error_type as u32)
                    .put_str(message);
                w.finish()?
            }
            ReturnCommand::ContextComputeResult {
                named_outputs,
                name,
                data,
            } => {
                let mut w = WireWriter::new(self.kind() as u32, named_outputs.id);
                w.put_u32(named_outputs.generation).put_str(name).put_bytes(data);
                w.finish()?
            }
            ReturnCommand::ContextUncapturedError {
                context,
                error_type,
                message,
            } => {
                let mut w = WireWriter::new(self.kind() as u32, context.id);
                w.put_u32(context.generation)
                    .put_u32(*error_type as u32)
                    .put_str(message);
                w.finish()?
            }
            ReturnCommand::CommandError { kind, target, message } => {
                let mut w = WireWriter::new(self.kind() as u32, *target);
                w.put_u32(*kind).put_str(message);
                w.finish()?
            }
        };
        Ok(bytes)
    }

    pub fn decode(record: &[u8]) -> Result<ReturnCommand> {
        let (header, body) = split_record(record)?;
        let kind = ReturnCommandKind::from_u32(header.kind)
            .ok_or_else(|| WireError::decode(format!("unknown return command kind {}", header.kind)))?;
        let mut r = WireReader::new(body);

        let command = match kind {
            ReturnCommandKind::ContextPopErrorScopeCallback | ReturnCommandKind::ContextComputeCallback => {
                let context = ObjectHandle::new(header.target, r.read_u32()?);
                let serial = r.read_u64()?;
                let error_type = read_error_type(&mut r)?;
                let message = r.read_str()?.to_string();
                if kind == ReturnCommandKind::ContextPopErrorScopeCallback {
                    ReturnCommand::ContextPopErrorScopeCallback {
                        context,
                        serial,
                        error_type,
                        message,
                    }
                } else {
                    ReturnCommand::ContextComputeCallback {
                        context,
                        serial,
                        error_type,
                        message,
                    }
                }
            }
            ReturnCommandKind::ContextComputeResult => ReturnCommand::ContextComputeResult {
                named_outputs: ObjectHandle::new(header.target, r.read_u32()?),
                name: r.read_str()?.to_string(),
                data: r.read_bytes()?.to_vec(),
            },
            ReturnCommandKind::ContextUncapturedError => ReturnCommand::ContextUncapturedError {
                context: ObjectHandle::new(header.target, r.read_u32()?),
                error_type: read_error_type(&mut r)?,
                message: r.read_str()?.to_string(),
            },
            ReturnCommandKind::CommandError => ReturnCommand::CommandError {
                target: header.target,
                kind: r.read_u32()?,
                message: r.read_str()?.to_string(),
            },
        };
        r.finish()?;
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::ops::{GemmOptions, UnaryKind};
    use crate::protocol::wire_format::RecordHeader;

    fn handle(id: u32) -> ObjectHandle {
        ObjectHandle::new(id, 3)
    }

    fn desc() -> OperandDescriptor {
        OperandDescriptor::new(OperandType::Float16, vec![1, 3, 224, 224])
    }

    fn roundtrip(command: Command) {
        let encoded = command.encode().unwrap();
        let header = RecordHeader::decode(&encoded).unwrap();
        assert_eq!(header.kind, command.kind() as u32);
        assert_eq!(header.target, command.target());
        assert_eq!(Command::decode(&encoded).unwrap(), command);
    }

    #[test]
    fn test_every_command_kind_roundtrips() {
        let commands = vec![
            Command::DestroyObject {
                ty: ObjectType::Graph,
                id: 7,
            },
            Command::InstanceCreateContext {
                instance: 1,
                options: ContextOptions {
                    device_preference: DevicePreference::Gpu,
                    power_preference: PowerPreference::LowPower,
                },
                result: handle(2),
            },
            Command::ContextCreateGraphBuilder {
                context: 2,
                result: handle(1),
            },
            Command::ContextPushErrorScope {
                context: 2,
                filter: ErrorFilter::OutOfMemory,
            },
            Command::ContextPopErrorScope {
                context: 2,
                serial: u64::MAX,
            },
            Command::ContextCompute {
                context: 1,
                graph: 2,
                inputs: 3,
                outputs: 4,
                serial: 5,
            },
            Command::ContextComputeSync {
                context: 1,
                graph: 2,
                inputs: 3,
                outputs: 4,
            },
            Command::CreateNamedInputs { result: handle(1) },
            Command::CreateNamedOperands { result: handle(1) },
            Command::CreateNamedOutputs { result: handle(1) },
            Command::GraphBuilderInput {
                builder: 1,
                name: "input".to_string(),
                desc: desc(),
                result: handle(4),
            },
            Command::GraphBuilderConstant {
                builder: 1,
                desc: OperandDescriptor::new(OperandType::Uint8, vec![3]),
                data: vec![1, 2, 3],
                result: handle(5),
            },
            Command::GraphBuilderOperation {
                builder: 1,
                operation: Operation::Gemm(GemmOptions::default()),
                inputs: vec![4, 5, NULL_OBJECT_ID],
                result: handle(6),
            },
            Command::GraphBuilderBuild {
                builder: 1,
                named_operands: 1,
                result: handle(7),
            },
            Command::OperandArrayGet {
                array: 1,
                index: 2,
                result: handle(8),
            },
            Command::NamedOperandsSet {
                named_operands: 1,
                name: "out".to_string(),
                operand: 6,
            },
            Command::NamedInputsSet {
                named_inputs: 1,
                name: "input".to_string(),
                dimensions: vec![],
                data: vec![0; 16],
            },
            Command::NamedOutputsSetOutput {
                named_outputs: 1,
                name: "out".to_string(),
                byte_length: 1 << 40,
            },
            Command::Disconnect,
        ];
        assert_eq!(commands.len(), CommandKind::ALL.len());
        for command in commands {
            roundtrip(command);
        }
    }

    #[test]
    fn test_return_commands_roundtrip() {
        let commands = vec![
            ReturnCommand::ContextPopErrorScopeCallback {
                context: handle(1),
                serial: 9,
                error_type: ErrorType::Validation,
                message: "bad".to_string(),
            },
            ReturnCommand::ContextComputeCallback {
                context: handle(1),
                serial: 10,
                error_type: ErrorType::NoError,
                message: String::new(),
            },
            ReturnCommand::ContextComputeResult {
                named_outputs: handle(2),
                name: "out".to_string(),
                data: vec![1, 2, 3, 4],
            },
            ReturnCommand::ContextUncapturedError {
                context: handle(1),
                error_type: ErrorType::DeviceLost,
                message: "lost".to_string(),
            },
            ReturnCommand::CommandError {
                kind: CommandKind::ContextCompute as u32,
                target: 42,
                message: "Unknown Graph object id 42".to_string(),
            },
        ];
        for command in commands {
            let encoded = command.encode().unwrap();
            assert_eq!(ReturnCommand::decode(&encoded).unwrap(), command);
        }
    }

    #[test]
    fn test_unknown_kind_is_decode_error() {
        let record = RecordHeader::new(999, 0, 0).encode();
        let err = Command::decode(&record).unwrap_err();
        assert!(matches!(err, WireError::Decode(_)));
        assert!(err.is_fatal());

        // Return kinds are not valid client commands.
        let record = RecordHeader::new(ReturnCommandKind::CommandError as u32, 0, 0).encode();
        assert!(Command::decode(&record).is_err());
    }

    #[test]
    fn test_overlong_payload_length_rejected() {
        let command = Command::GraphBuilderConstant {
            builder: 1,
            desc: OperandDescriptor::new(OperandType::Uint8, vec![4]),
            data: vec![9; 4],
            result: handle(2),
        };
        let mut encoded = command.encode().unwrap().to_vec();
        // Constant length prefix follows [type][count][dim].
        let offset = RECORD_HEADER_SIZE + 12;
        encoded[offset..offset + 4].copy_from_slice(&1000u32.to_be_bytes());

        let err = Command::decode(&encoded).unwrap_err();
        assert!(matches!(err, WireError::Decode(_)), "{err}");
    }

    #[test]
    fn test_truncated_and_trailing_bodies_rejected() {
        let encoded = Command::ContextPopErrorScope { context: 1, serial: 1 }
            .encode()
            .unwrap();
        assert!(Command::decode(&encoded[..encoded.len() - 1]).is_err());

        let mut padded = encoded.to_vec();
        padded.push(0);
        let body_len = (padded.len() - RECORD_HEADER_SIZE) as u32;
        padded[8..12].copy_from_slice(&body_len.to_be_bytes());
        assert!(matches!(Command::decode(&padded), Err(WireError::Decode(_))));
    }

    #[test]
    fn test_out_of_range_enum_is_validation_error() {
        let mut w = WireWriter::new(CommandKind::ContextPushErrorScope as u32, 1);
        w.put_u32(77);
        let err = Command::decode(&w.finish().unwrap()).unwrap_err();
        assert!(matches!(err, WireError::Validation(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_operation_result_type() {
        let single = Command::GraphBuilderOperation {
            builder: 1,
            operation: Operation::Unary(UnaryKind::Relu),
            inputs: vec![2],
            result: handle(3),
        };
        assert_eq!(single.result(), Some((ObjectType::Operand, handle(3))));

        let split = Command::GraphBuilderOperation {
            builder: 1,
            operation: Operation::Split { splits: vec![2], axis: 0 },
            inputs: vec![2],
            result: handle(1),
        };
        assert_eq!(split.result(), Some((ObjectType::OperandArray, handle(1))));
        assert_eq!(Command::Disconnect.result(), None);
    }

    #[test]
    fn test_creation_result_read_from_the_record_tail() {
        let input = Command::GraphBuilderInput {
            builder: 1,
            name: "x".to_string(),
            desc: desc(),
            result: handle(4),
        };
        let encoded = input.encode().unwrap();
        assert_eq!(Command::creation_result(&encoded), input.result());

        let split = Command::GraphBuilderOperation {
            builder: 1,
            operation: Operation::Split { splits: vec![2], axis: 0 },
            inputs: vec![2],
            result: handle(6),
        };
        let encoded = split.encode().unwrap();
        assert_eq!(
            Command::creation_result(&encoded),
            Some((ObjectType::OperandArray, handle(6)))
        );

        let push = Command::ContextPushErrorScope {
            context: 1,
            filter: ErrorFilter::Validation,
        };
        assert_eq!(Command::creation_result(&push.encode().unwrap()), None);
    }

    #[test]
    fn test_bad_operation_blob_keeps_its_result() {
        let mut w = WireWriter::new(CommandKind::GraphBuilderOperation as u32, 1);
        w.put_bytes(b"not msgpack")
            .put_ids(&[2])
            .put_u32(ObjectType::Operand.as_u32())
            .put_handle(handle(9));
        let record = w.finish().unwrap();

        let err = Command::decode(&record).unwrap_err();
        assert!(matches!(err, WireError::Validation(_)));
        assert_eq!(
            Command::creation_result(&record),
            Some((ObjectType::Operand, handle(9)))
        );
    }

    #[test]
    fn test_operation_result_type_must_match() {
        let blob = MsgPackCodec::encode(&Operation::Unary(UnaryKind::Relu)).unwrap();
        let mut w = WireWriter::new(CommandKind::GraphBuilderOperation as u32, 1);
        w.put_bytes(&blob)
            .put_ids(&[2])
            .put_u32(ObjectType::OperandArray.as_u32())
            .put_handle(handle(9));
        let err = Command::decode(&w.finish().unwrap()).unwrap_err();
        assert!(matches!(err, WireError::Validation(_)));
    }

    #[test]
    fn test_range_checked_only_after_the_whole_body() {
        let mut w = WireWriter::new(CommandKind::ContextPushErrorScope as u32, 1);
        w.put_u32(77).put_u32(0);
        let err = Command::decode(&w.finish().unwrap()).unwrap_err();
        assert!(matches!(err, WireError::Decode(_)));
    }
}
