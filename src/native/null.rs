//! Backend that checks bindings and produces zero-filled outputs.

use std::collections::BTreeMap;

use super::backend::{Backend, BackendGraph, NodeId};
use super::descriptor::OperandDescriptor;
use super::error::{ensure_valid, NativeError, NativeResult};
use super::named::{NamedInputs, NamedOutputs};
use super::ops::Operation;

#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn create_graph(&self) -> NativeResult<Box<dyn BackendGraph>> {
        Ok(Box::new(NullGraph::default()))
    }
}

#[derive(Debug, Default)]
struct NullGraph {
    nodes: BTreeMap<NodeId, OperandDescriptor>,
    inputs: BTreeMap<String, NodeId>,
    outputs: BTreeMap<String, NodeId>,
    finished: bool,
    compiled: bool,
}

impl NullGraph {
    fn define(&mut self, node: NodeId, desc: &OperandDescriptor) -> NativeResult<()> {
        if self.finished {
            return Err(NativeError::internal("graph already finished"));
        }
        if self.nodes.insert(node, desc.clone()).is_some() {
            return Err(NativeError::internal(format!("node {} defined twice", node)));
        }
        Ok(())
    }
}

impl BackendGraph for NullGraph {
    fn add_input(&mut self, node: NodeId, name: &str, desc: &OperandDescriptor) -> NativeResult<()> {
        self.define(node, desc)?;
        self.inputs.insert(name.to_string(), node);
        Ok(())
    }

    fn add_constant(&mut self, node: NodeId, desc: &OperandDescriptor, _data: &[u8]) -> NativeResult<()> {
        self.define(node, desc)
    }

    fn add_operator(
        &mut self,
        operation: &Operation,
        inputs: &[NodeId],
        outputs: &[(NodeId, OperandDescriptor)],
    ) -> NativeResult<()> {
        for input in inputs {
            if !self.nodes.contains_key(input) {
                return Err(NativeError::internal(format!(
                    "{} uses undefined node {}",
                    operation.name(),
                    input
                )));
            }
        }
        for (node, desc) in outputs {
            self.define(*node, desc)?;
        }
        Ok(())
    }

    fn add_output(&mut self, name: &str, node: NodeId, _desc: &OperandDescriptor) -> NativeResult<()> {
        if !self.nodes.contains_key(&node) {
            return Err(NativeError::internal(format!("output {} uses undefined node {}", name, node)));
        }
        self.outputs.insert(name.to_string(), node);
        Ok(())
    }

    fn finish(&mut self) -> NativeResult<()> {
        ensure_valid!(!self.outputs.is_empty(), "graph has no outputs");
        self.finished = true;
        Ok(())
    }

    fn compile(&mut self) -> NativeResult<()> {
        if !self.finished {
            return Err(NativeError::internal("compile before finish"));
        }
        self.compiled = true;
        Ok(())
    }

    fn compute(&self, inputs: &NamedInputs, outputs: &mut NamedOutputs) -> NativeResult<()> {
        if !self.compiled {
            return Err(NativeError::internal("compute before compile"));
        }
        for name in self.inputs.keys() {
            ensure_valid!(inputs.get(name).is_some(), "input {} is not bound", name);
        }
        let names: Vec<String> = outputs.iter().map(|(name, _)| name.to_string()).collect();
        for name in names {
            ensure_valid!(self.outputs.contains_key(&name), "unknown output {}", name);
            if let Some(buffer) = outputs.output_mut(&name) {
                buffer.fill(0);
            }
        }
        Ok(())
    }
}
