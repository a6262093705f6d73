//! Backend contract.
//!
//! The frontend validates and topologically orders a graph, then drives a
//! [`BackendGraph`] through `add_*`, `finish` and `compile`. Nodes are
//! addressed by dense [`NodeId`]s assigned in that order.

use super::descriptor::OperandDescriptor;
use super::error::NativeResult;
use super::named::{NamedInputs, NamedOutputs};
use super::ops::Operation;

/// Index of an operand node within one graph.
pub type NodeId = usize;

pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_graph(&self) -> NativeResult<Box<dyn BackendGraph>>;
}

pub trait BackendGraph: Send {
    fn add_input(&mut self, node: NodeId, name: &str, desc: &OperandDescriptor) -> NativeResult<()>;

    fn add_constant(&mut self, node: NodeId, desc: &OperandDescriptor, data: &[u8]) -> NativeResult<()>;

    fn add_operator(
        &mut self,
        operation: &Operation,
        inputs: &[NodeId],
        outputs: &[(NodeId, OperandDescriptor)],
    ) -> NativeResult<()>;

    fn add_output(&mut self, name: &str, node: NodeId, desc: &OperandDescriptor) -> NativeResult<()>;

    fn finish(&mut self) -> NativeResult<()>;

    fn compile(&mut self) -> NativeResult<()>;

    /// Inputs and outputs have been checked against the graph's declared
    /// names and sizes before this is called.
    fn compute(&self, inputs: &NamedInputs, outputs: &mut NamedOutputs) -> NativeResult<()>;
}
