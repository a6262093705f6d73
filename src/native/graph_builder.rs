//! Graph builder and the operand DAG.
//!
//! Operands are reference-counted DAG nodes. An operator node owns its
//! input edges; every operand it produces points back at it. A failed
//! creation yields an error operand, and any operator consuming one yields
//! error outputs in turn, so a broken subgraph only surfaces once at build.

use std::collections::HashMap;
use std::sync::Arc;

use super::backend::{BackendGraph, NodeId};
use super::context::Context;
use super::descriptor::OperandDescriptor;
use super::error::{ensure_valid, NativeError, NativeResult};
use super::graph::Graph;
use super::named::NamedOperands;
use super::ops::Operation;

#[derive(Debug)]
enum Source {
    Input { name: String },
    Constant { data: Vec<u8> },
    Operator { node: Arc<OperatorNode>, index: usize },
}

#[derive(Debug)]
struct OperandNode {
    desc: OperandDescriptor,
    source: Source,
}

#[derive(Debug)]
struct OperatorNode {
    operation: Operation,
    inputs: Vec<Arc<OperandNode>>,
    outputs: Vec<OperandDescriptor>,
}

impl Drop for OperatorNode {
    /// Unlinks the input chain iteratively; a long chain would otherwise
    /// drop one nested frame per operator.
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.inputs);
        while let Some(input) = pending.pop() {
            let Ok(operand) = Arc::try_unwrap(input) else {
                continue;
            };
            if let Source::Operator { node, .. } = operand.source {
                if let Ok(mut operator) = Arc::try_unwrap(node) {
                    pending.append(&mut operator.inputs);
                }
            }
        }
    }
}

/// An operand, or the error sentinel.
#[derive(Debug, Clone, Default)]
pub struct Operand {
    node: Option<Arc<OperandNode>>,
}

impl Operand {
    pub fn error() -> Self {
        Self { node: None }
    }

    fn from_node(node: OperandNode) -> Self {
        Self {
            node: Some(Arc::new(node)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.node.is_none()
    }

    pub fn descriptor(&self) -> Option<&OperandDescriptor> {
        self.node.as_ref().map(|n| &n.desc)
    }
}

/// Outputs of a multi-output operator.
#[derive(Debug, Clone, Default)]
pub struct OperandArray {
    operands: Option<Vec<Operand>>,
}

impl OperandArray {
    pub fn error() -> Self {
        Self { operands: None }
    }

    pub fn is_error(&self) -> bool {
        self.operands.is_none()
    }

    pub fn size(&self) -> usize {
        self.operands.as_ref().map_or(0, Vec::len)
    }

    pub fn get(&self, index: usize) -> NativeResult<Operand> {
        let operands = self
            .operands
            .as_ref()
            .ok_or_else(|| NativeError::validation("operand array is an error"))?;
        operands.get(index).cloned().ok_or_else(|| {
            NativeError::validation(format!("index {} out of range for {} operands", index, operands.len()))
        })
    }
}

/// Result of [`GraphBuilder::operation`].
#[derive(Debug, Clone)]
pub enum OperationOutput {
    Operand(Operand),
    Array(OperandArray),
}

#[derive(Debug, Clone)]
pub struct GraphBuilder {
    context: Context,
}

impl GraphBuilder {
    pub fn new(context: Context) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn is_error(&self) -> bool {
        self.context.is_error()
    }

    pub fn input(&self, name: &str, desc: &OperandDescriptor) -> Operand {
        let result = (|| {
            ensure_valid!(!self.is_error(), "graph builder is an error");
            ensure_valid!(!name.is_empty(), "input name must not be empty");
            desc.validate()?;
            Ok(OperandNode {
                desc: desc.clone(),
                source: Source::Input { name: name.to_string() },
            })
        })();
        self.context.consumed(result).map_or_else(Operand::error, Operand::from_node)
    }

    pub fn constant(&self, desc: &OperandDescriptor, data: &[u8]) -> Operand {
        let result = (|| {
            ensure_valid!(!self.is_error(), "graph builder is an error");
            desc.validate()?;
            let expected = desc.byte_length().unwrap_or(0);
            ensure_valid!(
                data.len() == expected,
                "constant holds {} bytes, descriptor needs {}",
                data.len(),
                expected
            );
            Ok(OperandNode {
                desc: desc.clone(),
                source: Source::Constant { data: data.to_vec() },
            })
        })();
        self.context.consumed(result).map_or_else(Operand::error, Operand::from_node)
    }

    /// Apply `operation` to `inputs`.
    pub fn operation(&self, operation: &Operation, inputs: &[Operand]) -> OperationOutput {
        let result = self.make_operator(operation, inputs);
        let node = self.context.consumed(result);

        if operation.has_multiple_outputs() {
            let array = match node {
                Some(node) => OperandArray {
                    operands: Some(
                        (0..node.outputs.len())
                            .map(|index| Self::output_of(&node, index))
                            .collect(),
                    ),
                },
                None => OperandArray::error(),
            };
            OperationOutput::Array(array)
        } else {
            let operand = match node {
                Some(node) => Self::output_of(&node, 0),
                None => Operand::error(),
            };
            OperationOutput::Operand(operand)
        }
    }

    fn make_operator(&self, operation: &Operation, inputs: &[Operand]) -> NativeResult<Arc<OperatorNode>> {
        ensure_valid!(!self.is_error(), "graph builder is an error");
        let mut nodes = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            match &input.node {
                Some(node) => nodes.push(node.clone()),
                None => {
                    return Err(NativeError::validation(format!(
                        "{} input {} is an error",
                        operation.name(),
                        i
                    )))
                }
            }
        }
        let descs: Vec<&OperandDescriptor> = nodes.iter().map(|n| &n.desc).collect();
        let outputs = operation.infer(&descs)?;
        Ok(Arc::new(OperatorNode {
            operation: operation.clone(),
            inputs: nodes,
            outputs,
        }))
    }

    fn output_of(node: &Arc<OperatorNode>, index: usize) -> Operand {
        Operand::from_node(OperandNode {
            desc: node.outputs[index].clone(),
            source: Source::Operator {
                node: node.clone(),
                index,
            },
        })
    }

    /// Build a graph whose outputs are `named_operands`.
    ///
    /// Any failure is reported to the context and yields an error graph.
    pub fn build(&self, named_operands: &NamedOperands) -> Graph {
        let result = self.build_impl(named_operands);
        match self.context.consumed(result) {
            Some(graph) => graph,
            None => Graph::error(self.context.clone()),
        }
    }

    fn build_impl(&self, named_operands: &NamedOperands) -> NativeResult<Graph> {
        ensure_valid!(!self.is_error(), "graph builder is an error");
        ensure_valid!(!named_operands.is_empty(), "named operands is empty");

        let mut outputs = Vec::with_capacity(named_operands.len());
        for (name, operand) in named_operands.iter() {
            let node = operand
                .node
                .clone()
                .ok_or_else(|| NativeError::validation(format!("output {} is an error", name)))?;
            outputs.push((name.to_string(), node));
        }

        let mut backend_graph = self.context.backend()?.create_graph()?;
        let mut lowering = Lowering::default();
        for (_, node) in &outputs {
            lowering.visit(node, backend_graph.as_mut())?;
        }

        let mut output_descs = Vec::with_capacity(outputs.len());
        for (name, node) in &outputs {
            let id = lowering.node_id(node)?;
            backend_graph.add_output(name, id, &node.desc)?;
            output_descs.push((name.clone(), node.desc.clone()));
        }
        backend_graph.finish()?;
        backend_graph.compile()?;

        tracing::debug!(
            inputs = lowering.inputs.len(),
            outputs = output_descs.len(),
            nodes = lowering.next_id,
            "graph compiled"
        );
        Ok(Graph::new(self.context.clone(), backend_graph, lowering.inputs, output_descs))
    }
}

fn key<T>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as usize
}

/// Topological lowering into a backend graph.
#[derive(Default)]
struct Lowering {
    next_id: NodeId,
    leaves: HashMap<usize, NodeId>,
    operators: HashMap<usize, Vec<NodeId>>,
    inputs: Vec<(String, OperandDescriptor)>,
}

impl Lowering {
    fn node_id(&self, node: &Arc<OperandNode>) -> NativeResult<NodeId> {
        let id = match &node.source {
            Source::Operator { node: op, index } => self.operators.get(&key(op)).and_then(|ids| ids.get(*index)),
            _ => self.leaves.get(&key(node)),
        };
        id.copied()
            .ok_or_else(|| NativeError::internal("operand lowered out of order"))
    }

    fn is_lowered(&self, node: &Arc<OperandNode>) -> bool {
        self.node_id(node).is_ok()
    }

    /// Post-order walk with an explicit stack; deep graphs must not
    /// overflow the native stack.
    fn visit(&mut self, root: &Arc<OperandNode>, graph: &mut dyn BackendGraph) -> NativeResult<()> {
        let mut stack: Vec<(Arc<OperandNode>, bool)> = vec![(root.clone(), false)];
        while let Some((node, expanded)) = stack.pop() {
            if self.is_lowered(&node) {
                continue;
            }
            match &node.source {
                Source::Input { name } => {
                    let id = self.allocate();
                    graph.add_input(id, name, &node.desc)?;
                    self.leaves.insert(key(&node), id);
                    self.inputs.push((name.clone(), node.desc.clone()));
                }
                Source::Constant { data } => {
                    let id = self.allocate();
                    graph.add_constant(id, &node.desc, data)?;
                    self.leaves.insert(key(&node), id);
                }
                Source::Operator { node: op, .. } if !expanded => {
                    let op = op.clone();
                    stack.push((node, true));
                    for input in op.inputs.iter().rev() {
                        if !self.is_lowered(input) {
                            stack.push((input.clone(), false));
                        }
                    }
                }
                Source::Operator { node: op, .. } => {
                    let input_ids = op
                        .inputs
                        .iter()
                        .map(|input| self.node_id(input))
                        .collect::<NativeResult<Vec<_>>>()?;
                    let outputs: Vec<(NodeId, OperandDescriptor)> = op
                        .outputs
                        .iter()
                        .map(|desc| (self.allocate(), desc.clone()))
                        .collect();
                    graph.add_operator(&op.operation, &input_ids, &outputs)?;
                    self.operators
                        .insert(key(op), outputs.into_iter().map(|(id, _)| id).collect());
                }
            }
        }
        Ok(())
    }

    fn allocate(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
