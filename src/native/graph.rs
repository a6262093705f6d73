//! Compiled graphs.

use super::backend::BackendGraph;
use super::context::Context;
use super::descriptor::OperandDescriptor;
use super::error::{ensure_valid, NativeError, NativeResult};
use super::named::{NamedInputs, NamedOutputs};

pub struct Graph {
    context: Context,
    /// `None` for an error graph.
    compiled: Option<Box<dyn BackendGraph>>,
    inputs: Vec<(String, OperandDescriptor)>,
    outputs: Vec<(String, OperandDescriptor)>,
}

impl Graph {
    pub(crate) fn new(
        context: Context,
        compiled: Box<dyn BackendGraph>,
        inputs: Vec<(String, OperandDescriptor)>,
        outputs: Vec<(String, OperandDescriptor)>,
    ) -> Self {
        Self {
            context,
            compiled: Some(compiled),
            inputs,
            outputs,
        }
    }

    pub fn error(context: Context) -> Self {
        Self {
            context,
            compiled: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.compiled.is_none()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn inputs(&self) -> &[(String, OperandDescriptor)] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[(String, OperandDescriptor)] {
        &self.outputs
    }

    /// Run the graph. Every declared input must be bound with matching byte
    /// length; every requested output must be declared and sized to match.
    pub fn compute(&self, inputs: &NamedInputs, outputs: &mut NamedOutputs) -> NativeResult<()> {
        let compiled = self
            .compiled
            .as_ref()
            .ok_or_else(|| NativeError::internal("fail to build graph!"))?;

        for (name, desc) in &self.inputs {
            let input = inputs
                .get(name)
                .ok_or_else(|| NativeError::validation(format!("input {} is not bound", name)))?;
            let desc = if input.dimensions.is_empty() {
                desc.clone()
            } else {
                desc.with_dimensions(input.dimensions.clone())
            };
            let expected = desc.byte_length().unwrap_or(0);
            ensure_valid!(
                input.data.len() == expected,
                "input {} holds {} bytes, expected {}",
                name,
                input.data.len(),
                expected
            );
        }

        ensure_valid!(!outputs.is_empty(), "no outputs requested");
        for (name, buffer) in outputs.iter() {
            let desc = self
                .outputs
                .iter()
                .find(|(declared, _)| declared == name)
                .map(|(_, desc)| desc)
                .ok_or_else(|| NativeError::validation(format!("output {} is not in the graph", name)))?;
            let expected = desc.byte_length().unwrap_or(0);
            ensure_valid!(
                buffer.len() == expected,
                "output {} buffer holds {} bytes, expected {}",
                name,
                buffer.len(),
                expected
            );
        }

        compiled.compute(inputs, outputs)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("is_error", &self.is_error())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::context::ContextOptions;
    use crate::native::descriptor::OperandType;
    use crate::native::graph_builder::{GraphBuilder, OperationOutput};
    use crate::native::named::{Input, NamedOperands};
    use crate::native::null::NullBackend;
    use crate::native::ops::{Operation, UnaryKind};
    use crate::native::InternalErrorType;
    use std::sync::Arc;

    fn relu_graph() -> Graph {
        let builder = GraphBuilder::new(Context::new(ContextOptions::default(), Arc::new(NullBackend)));
        let x = builder.input("x", &OperandDescriptor::new(OperandType::Float32, vec![2]));
        let OperationOutput::Operand(y) = builder.operation(&Operation::Unary(UnaryKind::Relu), &[x]) else {
            panic!("relu yields one operand");
        };
        let mut named = NamedOperands::new();
        named.set("y", y);
        builder.build(&named)
    }

    #[test]
    fn test_compute_checks_bindings() {
        let graph = relu_graph();
        let mut outputs = NamedOutputs::new();
        outputs.set_output("y", 8);

        let mut inputs = NamedInputs::new();
        assert!(graph.compute(&inputs, &mut outputs).is_err());

        inputs.set("x", Input { dimensions: vec![], data: vec![1; 8] });
        graph.compute(&inputs, &mut outputs).unwrap();
        assert_eq!(outputs.output("y"), Some(&[0u8; 8][..]));

        let mut wrong = NamedOutputs::new();
        wrong.set_output("y", 4);
        assert!(graph.compute(&inputs, &mut wrong).is_err());
    }

    #[test]
    fn test_error_graph_compute() {
        let graph = Graph::error(Context::error(ContextOptions::default()));
        let err = graph
            .compute(&NamedInputs::new(), &mut NamedOutputs::new())
            .unwrap_err();
        assert_eq!(err.kind, InternalErrorType::Internal);
        assert_eq!(err.message, "fail to build graph!");
    }
}
