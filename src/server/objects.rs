//! Server-side object table.
//!
//! Ids are chosen by the client. The server binds the id it is told to a
//! freshly created native object; an id that is already bound means the
//! two sides disagree about object lifetimes and is fatal.

use std::collections::BTreeMap;

use crate::error::{Result, WireError};
use crate::native::{
    Context, ContextOptions, Graph, GraphBuilder, Instance, NamedInputs, NamedOperands, NamedOutputs, Operand,
    OperandArray,
};
use crate::object::{ObjectHandle, ObjectId, ObjectType, PerObjectType, NULL_OBJECT_ID};

macro_rules! native_objects {
    ($($variant:ident($ty:ty) => $get:ident;)+) => {
        /// A native object bound to a wire id.
        pub(crate) enum NativeObject {
            $($variant($ty),)+
        }

        impl NativeObject {
            pub(crate) fn object_type(&self) -> ObjectType {
                match self {
                    $(NativeObject::$variant(_) => ObjectType::$variant,)+
                }
            }
        }

        impl KnownObjects {
            $(
                pub(crate) fn $get(&self, id: ObjectId) -> Result<&$ty> {
                    match self.get(ObjectType::$variant, id)? {
                        NativeObject::$variant(object) => Ok(object),
                        other => Err(Self::misfiled(ObjectType::$variant, other)),
                    }
                }
            )+
        }
    };
}

native_objects! {
    Instance(Instance) => instance;
    Context(Context) => context;
    GraphBuilder(GraphBuilder) => graph_builder;
    Operand(Operand) => operand;
    OperandArray(OperandArray) => operand_array;
    Graph(Graph) => graph;
    NamedInputs(NamedInputs) => named_inputs;
    NamedOperands(NamedOperands) => named_operands;
    NamedOutputs(NamedOutputs) => named_outputs;
}

impl NativeObject {
    /// The error sentinel of type `ty`, bound when a creation command fails
    /// validation so the client's later destroy still finds an object.
    pub(crate) fn error(ty: ObjectType) -> Self {
        let context = || Context::error(ContextOptions::default());
        match ty {
            ObjectType::Instance => NativeObject::Instance(Instance::error()),
            ObjectType::Context => NativeObject::Context(context()),
            ObjectType::GraphBuilder => NativeObject::GraphBuilder(GraphBuilder::new(context())),
            ObjectType::Operand => NativeObject::Operand(Operand::error()),
            ObjectType::OperandArray => NativeObject::OperandArray(OperandArray::error()),
            ObjectType::Graph => NativeObject::Graph(Graph::error(context())),
            ObjectType::NamedInputs => NativeObject::NamedInputs(NamedInputs::new()),
            ObjectType::NamedOperands => NativeObject::NamedOperands(NamedOperands::new()),
            ObjectType::NamedOutputs => NativeObject::NamedOutputs(NamedOutputs::new()),
        }
    }
}

pub(crate) struct Entry {
    pub(crate) generation: u32,
    pub(crate) object: NativeObject,
}

#[derive(Default)]
pub(crate) struct KnownObjects {
    tables: PerObjectType<BTreeMap<ObjectId, Entry>>,
}

impl KnownObjects {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` to `object`.
    pub(crate) fn bind(&mut self, handle: ObjectHandle, object: NativeObject) -> Result<()> {
        let ty = object.object_type();
        if handle.is_null() {
            return Err(WireError::Allocator(format!("cannot bind {} to the null id", ty.name())));
        }
        let table = &mut self.tables[ty];
        if table.contains_key(&handle.id) {
            return Err(WireError::Allocator(format!(
                "{} id {} is already bound",
                ty.name(),
                handle.id
            )));
        }
        table.insert(
            handle.id,
            Entry {
                generation: handle.generation,
                object,
            },
        );
        Ok(())
    }

    pub(crate) fn get(&self, ty: ObjectType, id: ObjectId) -> Result<&NativeObject> {
        self.tables[ty]
            .get(&id)
            .map(|entry| &entry.object)
            .ok_or(WireError::UnknownObject { ty, id })
    }

    pub(crate) fn handle(&self, ty: ObjectType, id: ObjectId) -> Result<ObjectHandle> {
        self.tables[ty]
            .get(&id)
            .map(|entry| ObjectHandle::new(id, entry.generation))
            .ok_or(WireError::UnknownObject { ty, id })
    }

    pub(crate) fn contains(&self, ty: ObjectType, id: ObjectId) -> bool {
        id != NULL_OBJECT_ID && self.tables[ty].contains_key(&id)
    }

    pub(crate) fn named_operands_mut(&mut self, id: ObjectId) -> Result<&mut NamedOperands> {
        match self.entry_mut(ObjectType::NamedOperands, id)? {
            NativeObject::NamedOperands(object) => Ok(object),
            other => Err(Self::misfiled(ObjectType::NamedOperands, other)),
        }
    }

    pub(crate) fn named_inputs_mut(&mut self, id: ObjectId) -> Result<&mut NamedInputs> {
        match self.entry_mut(ObjectType::NamedInputs, id)? {
            NativeObject::NamedInputs(object) => Ok(object),
            other => Err(Self::misfiled(ObjectType::NamedInputs, other)),
        }
    }

    pub(crate) fn named_outputs_mut(&mut self, id: ObjectId) -> Result<&mut NamedOutputs> {
        match self.entry_mut(ObjectType::NamedOutputs, id)? {
            NativeObject::NamedOutputs(object) => Ok(object),
            other => Err(Self::misfiled(ObjectType::NamedOutputs, other)),
        }
    }

    fn entry_mut(&mut self, ty: ObjectType, id: ObjectId) -> Result<&mut NativeObject> {
        self.tables[ty]
            .get_mut(&id)
            .map(|entry| &mut entry.object)
            .ok_or(WireError::UnknownObject { ty, id })
    }

    /// Unbind and return an object.
    pub(crate) fn release(&mut self, ty: ObjectType, id: ObjectId) -> Result<Entry> {
        self.tables[ty]
            .remove(&id)
            .ok_or(WireError::UnknownObject { ty, id })
    }

    /// Put back an entry taken with [`release`](Self::release).
    pub(crate) fn restore(&mut self, id: ObjectId, entry: Entry) {
        let ty = entry.object.object_type();
        self.tables[ty].insert(id, entry);
    }

    pub(crate) fn len(&self, ty: ObjectType) -> usize {
        self.tables[ty].len()
    }

    /// Remove every object of `ty`.
    pub(crate) fn drain(&mut self, ty: ObjectType) -> Vec<(ObjectId, Entry)> {
        std::mem::take(&mut self.tables[ty]).into_iter().collect()
    }

    fn misfiled(expected: ObjectType, found: &NativeObject) -> WireError {
        WireError::Allocator(format!(
            "{} table holds a {}",
            expected.name(),
            found.object_type().name()
        ))
    }
}
