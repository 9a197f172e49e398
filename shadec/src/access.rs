//! Values and variable access chains.
//!
//! Two kinds of handles flow on the generator's stack: immutable values with
//! a concrete id, and rooted access paths into composite storage that only
//! resolve to a load or store when consumed.
use shadec_core::emit::{InstrBuilder, ModuleBuilder, WordHole};
use shadec_core::error::Result;
use shadec_core::ty::{PointerType, ScalarType, StorageClass, Type};
use spirv::Op;

/// An immutable result: a SPIR-V id together with its type.
#[derive(Clone, Debug)]
pub struct ValueId {
    pub id: u32,
    pub ty: Type,
}

/// Usage-resolved words of a texture resource, shared with its OpTypeImage.
#[derive(Clone)]
pub struct ImageInfo {
    pub sample_ty: ScalarType,
    /// Id of the OpTypeImage declaration.
    pub ty_id: u32,
    /// Sampled word: 1 once sampled, 2 once read or written.
    pub sampled: WordHole,
    /// Depth word: settles to 0 on first use.
    pub depth: WordHole,
}

/// A rooted variable plus a chain of indices into it.
#[derive(Clone)]
pub struct VarAccess {
    pub var_id: u32,
    pub store_cls: StorageClass,
    /// Type of the storage this chain currently points at.
    pub ty: Type,
    /// Index value ids accumulated so far.
    pub indices: Vec<u32>,
    pub image: Option<ImageInfo>,
}

impl VarAccess {
    pub fn new(var_id: u32, store_cls: StorageClass, ty: Type) -> Self {
        VarAccess {
            var_id,
            store_cls,
            ty,
            indices: Vec::new(),
            image: None,
        }
    }

    /// A child access one index deeper.
    pub fn index(&self, index_id: u32, child_ty: Type) -> VarAccess {
        let mut out = self.clone();
        out.indices.push(index_id);
        out.ty = child_ty;
        out
    }

    /// Id of the pointee type this chain resolves at.
    fn pointee_ty_id(&self, b: &mut ModuleBuilder) -> Result<u32> {
        match &self.image {
            Some(info) => Ok(info.ty_id),
            None => b.type_id(&self.ty),
        }
    }

    /// Resolve the chain to a pointer: the variable itself, or one
    /// OpAccessChain over all accumulated indices.
    fn pointer_id(&self, b: &mut ModuleBuilder) -> Result<u32> {
        if self.indices.is_empty() {
            return Ok(self.var_id);
        }
        let ptr_ty = Type::Pointer(PointerType {
            pointee_ty: Box::new(self.ty.clone()),
            store_cls: self.store_cls,
        });
        let ptr_ty_id = b.type_id(&ptr_ty)?;
        let ptr_id = b.alloc_id();
        b.push_func(
            InstrBuilder::new(Op::AccessChain)
                .push(ptr_ty_id)
                .push(ptr_id)
                .push(self.var_id)
                .push_list(&self.indices)
                .build(),
        );
        Ok(ptr_id)
    }

    /// Resolve to a load at the use site.
    pub fn load(&self, b: &mut ModuleBuilder) -> Result<ValueId> {
        let ty_id = self.pointee_ty_id(b)?;
        let ptr_id = self.pointer_id(b)?;
        let id = b.alloc_id();
        b.push_func(
            InstrBuilder::new(Op::Load)
                .push(ty_id)
                .push(id)
                .push(ptr_id)
                .build(),
        );
        Ok(ValueId {
            id,
            ty: self.ty.clone(),
        })
    }

    /// Resolve to a store of `value`.
    pub fn store(&self, b: &mut ModuleBuilder, value: &ValueId) -> Result<()> {
        let ptr_id = self.pointer_id(b)?;
        b.push_func(
            InstrBuilder::new(Op::Store)
                .push(ptr_id)
                .push(value.id)
                .build(),
        );
        Ok(())
    }
}
