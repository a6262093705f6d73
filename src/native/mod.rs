//! Native graph-building API served over the wire.
//!
//! Everything here runs in the server process. Failed creations yield
//! error objects rather than `Err`, and errors are routed through the
//! owning [`Context`]'s error scopes.

pub mod backend;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod graph_builder;
pub mod instance;
pub mod named;
pub mod null;
pub mod ops;
pub mod procs;

pub use backend::{Backend, BackendGraph, NodeId};
pub use context::{Context, ContextOptions, DevicePreference, ErrorCallback, PowerPreference};
pub use descriptor::{OperandDescriptor, OperandType};
pub use error::{ErrorFilter, ErrorType, InternalErrorType, NativeError, NativeResult};
pub use graph::Graph;
pub use graph_builder::{GraphBuilder, Operand, OperandArray, OperationOutput};
pub use instance::Instance;
pub use named::{Input, NamedInputs, NamedOperands, NamedOutputs};
pub use null::NullBackend;
pub use ops::Operation;
pub use procs::{
    clear_thread_procs, current_procs, set_procs, set_thread_procs, ComputeCallback, NativeProcs, NullProcs, Procs,
};
