//! Named collections passed to build and compute.

use std::collections::BTreeMap;

use super::graph_builder::Operand;

/// One bound compute input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Input {
    /// Overrides the graph's declared dimensions when non-empty.
    pub dimensions: Vec<i32>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct NamedInputs {
    inputs: BTreeMap<String, Input>,
}

impl NamedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, input: Input) {
        self.inputs.insert(name.to_string(), input);
    }

    pub fn get(&self, name: &str) -> Option<&Input> {
        self.inputs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Input)> {
        self.inputs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NamedOperands {
    operands: BTreeMap<String, Operand>,
}

impl NamedOperands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, operand: Operand) {
        self.operands.insert(name.to_string(), operand);
    }

    pub fn get(&self, name: &str) -> Option<&Operand> {
        self.operands.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Operand)> {
        self.operands.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }
}

/// Output buffers, allocated when the output is registered.
#[derive(Debug, Clone, Default)]
pub struct NamedOutputs {
    outputs: BTreeMap<String, Vec<u8>>,
}

impl NamedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an output and allocate a zeroed buffer of `byte_length`.
    pub fn set_output(&mut self, name: &str, byte_length: usize) {
        self.outputs.insert(name.to_string(), vec![0u8; byte_length]);
    }

    pub fn output(&self, name: &str) -> Option<&[u8]> {
        self.outputs.get(name).map(Vec::as_slice)
    }

    pub fn output_mut(&mut self, name: &str) -> Option<&mut Vec<u8>> {
        self.outputs.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.outputs.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
