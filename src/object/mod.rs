//! Object identity - ids, handles, the closed type table and the allocator.
//!
//! Every object that crosses the wire is addressed by `(type, id)`. Each
//! [`ObjectType`] owns a separate id space, and id `0` means "null object"
//! in every space. A [`ObjectHandle`] adds the generation of the slot so a
//! reference captured before the id was freed and reused is detectable.

mod allocator;

use std::ops::{Index, IndexMut};

use serde::Serialize;

pub use allocator::ObjectAllocator;

/// Protocol-visible object id, scoped per object type.
pub type ObjectId = u32;

/// The reserved "null object" id.
pub const NULL_OBJECT_ID: ObjectId = 0;

/// An id plus the generation of the slot it was allocated from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub id: ObjectId,
    pub generation: u32,
}

impl ObjectHandle {
    pub const NULL: ObjectHandle = ObjectHandle {
        id: NULL_OBJECT_ID,
        generation: 0,
    };

    pub fn new(id: ObjectId, generation: u32) -> Self {
        Self { id, generation }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.id == NULL_OBJECT_ID
    }
}

/// Closed set of object types known to the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(u32)]
pub enum ObjectType {
    Instance = 0,
    Context = 1,
    GraphBuilder = 2,
    Operand = 3,
    OperandArray = 4,
    Graph = 5,
    NamedInputs = 6,
    NamedOperands = 7,
    NamedOutputs = 8,
}

impl ObjectType {
    /// Number of object types.
    pub const COUNT: usize = 9;

    /// All object types, in wire order.
    pub const ALL: [ObjectType; Self::COUNT] = [
        ObjectType::Instance,
        ObjectType::Context,
        ObjectType::GraphBuilder,
        ObjectType::Operand,
        ObjectType::OperandArray,
        ObjectType::Graph,
        ObjectType::NamedInputs,
        ObjectType::NamedOperands,
        ObjectType::NamedOutputs,
    ];

    /// Decode a wire value. Returns `None` for values outside the table.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Instance => "Instance",
            ObjectType::Context => "Context",
            ObjectType::GraphBuilder => "GraphBuilder",
            ObjectType::Operand => "Operand",
            ObjectType::OperandArray => "OperandArray",
            ObjectType::Graph => "Graph",
            ObjectType::NamedInputs => "NamedInputs",
            ObjectType::NamedOperands => "NamedOperands",
            ObjectType::NamedOutputs => "NamedOutputs",
        }
    }
}

/// One value per object type, indexed by [`ObjectType`].
#[derive(Debug, Default)]
pub struct PerObjectType<T>([T; ObjectType::COUNT]);

impl<T> PerObjectType<T> {
    pub fn iter(&self) -> impl Iterator<Item = (ObjectType, &T)> {
        ObjectType::ALL.into_iter().zip(self.0.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ObjectType, &mut T)> {
        ObjectType::ALL.into_iter().zip(self.0.iter_mut())
    }
}

impl<T> Index<ObjectType> for PerObjectType<T> {
    type Output = T;

    fn index(&self, ty: ObjectType) -> &T {
        &self.0[ty as usize]
    }
}

impl<T> IndexMut<ObjectType> for PerObjectType<T> {
    fn index_mut(&mut self, ty: ObjectType) -> &mut T {
        &mut self.0[ty as usize]
    }
}
