//! SPIR-V word emitter.
//!
//! Instructions accumulate into the ordered sections of a module and are
//! flattened to words at the very end. Forward references (merge labels,
//! image usage flags) are [`WordHole`]s: shared mutable cells resolved
//! before serialization, so no patch pass over a byte buffer is needed.
use std::cell::Cell;
use std::rc::Rc;

use fnv::FnvHashMap as HashMap;
use fnv::FnvHashSet as HashSet;
use spirv::{
    AddressingModel, Capability, Decoration, ExecutionModel, MemoryModel, Op, StorageClass,
};

use crate::bin::{SpirvBinary, SpirvHeader};
use crate::constant::ConstantValue;
use crate::error::{Result, ShaderError};
use crate::ty::{Type, TypeRegistry};

/// A mutable cell embedded in an instruction word list. Cloning shares the
/// cell, so any holder can resolve the word later.
#[derive(Clone, Debug, Default)]
pub struct WordHole(Rc<Cell<u32>>);
impl WordHole {
    pub fn new(value: u32) -> Self {
        WordHole(Rc::new(Cell::new(value)))
    }
    pub fn set(&self, value: u32) {
        self.0.set(value);
    }
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

#[derive(Clone, Debug)]
pub enum SpvWord {
    Lit(u32),
    Hole(WordHole),
}
impl SpvWord {
    fn resolve(&self) -> u32 {
        match self {
            SpvWord::Lit(x) => *x,
            SpvWord::Hole(h) => h.get(),
        }
    }
}

/// One instruction; the first word carries `(length, opcode)`.
#[derive(Clone, Debug)]
pub struct SpvInstr {
    words: Vec<SpvWord>,
}
impl SpvInstr {
    pub fn flatten_into(&self, out: &mut Vec<u32>) {
        out.extend(self.words.iter().map(SpvWord::resolve));
    }
}

pub struct InstrBuilder {
    words: Vec<SpvWord>,
}
impl InstrBuilder {
    pub fn new(op: Op) -> InstrBuilder {
        InstrBuilder {
            words: vec![SpvWord::Lit((op as u32) & 0xFFFF)],
        }
    }
    pub fn push(mut self, x: u32) -> Self {
        self.words.push(SpvWord::Lit(x));
        self
    }
    pub fn push_list(mut self, x: &[u32]) -> Self {
        self.words.extend(x.iter().map(|x| SpvWord::Lit(*x)));
        self
    }
    pub fn push_hole(mut self, hole: &WordHole) -> Self {
        self.words.push(SpvWord::Hole(hole.clone()));
        self
    }
    /// Push a nul-terminated string, packed little-endian into words.
    pub fn push_str(mut self, x: &str) -> Self {
        let mut bytes = x.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        for chunk in bytes.chunks_exact(4) {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.words.push(SpvWord::Lit(word));
        }
        self
    }
    pub fn build(mut self) -> SpvInstr {
        let len = self.words.len() as u32;
        match &mut self.words[0] {
            SpvWord::Lit(first) => *first |= len << 16,
            SpvWord::Hole(_) => unreachable!("first word is always literal"),
        }
        SpvInstr { words: self.words }
    }
}

struct EntryPoint {
    execution_model: ExecutionModel,
    func_id: u32,
    name: String,
}

/// Accumulates a module's instructions into ordered sections, owns the id
/// pool, and interns types and constants.
pub struct ModuleBuilder {
    next_id: u32,
    capabilities: Vec<Capability>,
    ext_imports: Vec<(String, u32)>,
    entry_point: Option<EntryPoint>,
    execution_modes: Vec<SpvInstr>,
    debug: Vec<SpvInstr>,
    annotations: Vec<SpvInstr>,
    /// Types, constants and module-scope variables, in definition order.
    types_consts: Vec<SpvInstr>,
    /// OpFunction and the entry block's OpLabel.
    func_head: Vec<SpvInstr>,
    /// Function-storage variables; they must open the entry block.
    func_vars: Vec<SpvInstr>,
    func_body: Vec<SpvInstr>,
    /// Input/Output variables referenced by the entry point.
    interface: Vec<u32>,
    types: TypeRegistry,
    consts: HashMap<(u32, ConstantValue), u32>,
    strided_arrays: HashSet<u32>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        let mut out = ModuleBuilder {
            next_id: 0,
            capabilities: Vec::new(),
            ext_imports: Vec::new(),
            entry_point: None,
            execution_modes: Vec::new(),
            debug: Vec::new(),
            annotations: Vec::new(),
            types_consts: Vec::new(),
            func_head: Vec::new(),
            func_vars: Vec::new(),
            func_body: Vec::new(),
            interface: Vec::new(),
            types: TypeRegistry::default(),
            consts: HashMap::default(),
            strided_arrays: HashSet::default(),
        };
        out.require_capability(Capability::Shader);
        out
    }

    pub fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn require_capability(&mut self, cap: Capability) {
        if !self.capabilities.contains(&cap) {
            self.capabilities.push(cap);
        }
    }

    /// Id of the extended instruction set `name`, importing it on first use.
    pub fn ext_inst_import(&mut self, name: &str) -> u32 {
        if let Some((_, id)) = self.ext_imports.iter().find(|(n, _)| n == name) {
            return *id;
        }
        let id = self.alloc_id();
        self.ext_imports.push((name.to_owned(), id));
        id
    }

    pub fn set_entry_point(&mut self, execution_model: ExecutionModel, func_id: u32, name: &str) {
        self.entry_point = Some(EntryPoint {
            execution_model,
            func_id,
            name: name.to_owned(),
        });
    }

    pub fn push_execution_mode(&mut self, instr: SpvInstr) {
        self.execution_modes.push(instr);
    }
    pub fn push_debug(&mut self, instr: SpvInstr) {
        self.debug.push(instr);
    }
    pub fn push_annotation(&mut self, instr: SpvInstr) {
        self.annotations.push(instr);
    }
    pub fn push_ty(&mut self, instr: SpvInstr) {
        self.types_consts.push(instr);
    }
    pub fn push_func_head(&mut self, instr: SpvInstr) {
        self.func_head.push(instr);
    }
    pub fn push_func(&mut self, instr: SpvInstr) {
        self.func_body.push(instr);
    }

    pub fn decorate(&mut self, target: u32, deco: Decoration, args: &[u32]) {
        let instr = InstrBuilder::new(Op::Decorate)
            .push(target)
            .push(deco as u32)
            .push_list(args)
            .build();
        self.annotations.push(instr);
    }
    pub fn decorate_member(&mut self, target: u32, member: u32, deco: Decoration, args: &[u32]) {
        let instr = InstrBuilder::new(Op::MemberDecorate)
            .push(target)
            .push(member)
            .push(deco as u32)
            .push_list(args)
            .build();
        self.annotations.push(instr);
    }
    pub fn name_id(&mut self, target: u32, name: &str) {
        let instr = InstrBuilder::new(Op::Name)
            .push(target)
            .push_str(name)
            .build();
        self.debug.push(instr);
    }

    /// Id of `ty`, interning and emitting its definition on first use.
    pub fn type_id(&mut self, ty: &Type) -> Result<u32> {
        if let Some(id) = self.types.get(ty) {
            return Ok(id);
        }
        let id = match ty {
            Type::Void => {
                let id = self.alloc_id();
                self.push_ty(InstrBuilder::new(Op::TypeVoid).push(id).build());
                id
            }
            Type::Scalar(scalar) => {
                use crate::ty::ScalarType;
                let id = self.alloc_id();
                let instr = match scalar {
                    ScalarType::Bool => InstrBuilder::new(Op::TypeBool).push(id).build(),
                    ScalarType::Int { bits, signed } => InstrBuilder::new(Op::TypeInt)
                        .push(id)
                        .push(*bits)
                        .push(*signed as u32)
                        .build(),
                    ScalarType::Float { bits } => InstrBuilder::new(Op::TypeFloat)
                        .push(id)
                        .push(*bits)
                        .build(),
                };
                self.push_ty(instr);
                id
            }
            Type::Vector(vector) => {
                let scalar_id = self.type_id(&Type::Scalar(vector.scalar_ty.clone()))?;
                let id = self.alloc_id();
                self.push_ty(
                    InstrBuilder::new(Op::TypeVector)
                        .push(id)
                        .push(scalar_id)
                        .push(vector.scalar_count)
                        .build(),
                );
                id
            }
            Type::Matrix(matrix) => {
                let column_id = self.type_id(&Type::Vector(matrix.column_ty()))?;
                let id = self.alloc_id();
                self.push_ty(
                    InstrBuilder::new(Op::TypeMatrix)
                        .push(id)
                        .push(column_id)
                        .push(matrix.cols)
                        .build(),
                );
                id
            }
            Type::Array(array) => {
                let element_id = self.type_id(&array.element_ty)?;
                match array.element_count {
                    Some(n) => {
                        let length_id = self.constant(ConstantValue::from(n))?;
                        let id = self.alloc_id();
                        self.push_ty(
                            InstrBuilder::new(Op::TypeArray)
                                .push(id)
                                .push(element_id)
                                .push(length_id)
                                .build(),
                        );
                        id
                    }
                    None => {
                        let id = self.alloc_id();
                        self.push_ty(
                            InstrBuilder::new(Op::TypeRuntimeArray)
                                .push(id)
                                .push(element_id)
                                .build(),
                        );
                        id
                    }
                }
            }
            Type::Struct(st) => {
                let member_ids = st
                    .members
                    .iter()
                    .map(|m| self.type_id(&m.ty))
                    .collect::<Result<Vec<_>>>()?;
                let id = self.alloc_id();
                self.push_ty(
                    InstrBuilder::new(Op::TypeStruct)
                        .push(id)
                        .push_list(&member_ids)
                        .build(),
                );
                for (i, member) in st.members.iter().enumerate() {
                    let instr = InstrBuilder::new(Op::MemberName)
                        .push(id)
                        .push(i as u32)
                        .push_str(&member.name)
                        .build();
                    self.debug.push(instr);
                }
                id
            }
            Type::Sampler => {
                let id = self.alloc_id();
                self.push_ty(InstrBuilder::new(Op::TypeSampler).push(id).build());
                id
            }
            Type::Pointer(ptr) => {
                let pointee_id = self.type_id(&ptr.pointee_ty)?;
                let id = self.alloc_id();
                self.push_ty(
                    InstrBuilder::new(Op::TypePointer)
                        .push(id)
                        .push(ptr.store_cls as u32)
                        .push(pointee_id)
                        .build(),
                );
                id
            }
            Type::Function(func) => {
                let return_id = self.type_id(&func.return_ty)?;
                let arg_ids = func
                    .arg_tys
                    .iter()
                    .map(|a| self.type_id(a))
                    .collect::<Result<Vec<_>>>()?;
                let id = self.alloc_id();
                self.push_ty(
                    InstrBuilder::new(Op::TypeFunction)
                        .push(id)
                        .push(return_id)
                        .push_list(&arg_ids)
                        .build(),
                );
                id
            }
            Type::Image(_) | Type::SampledImage(_) => {
                // Image words depend on usage; each resource declares its own.
                return Err(ShaderError::structural(
                    "image types are declared per resource, not interned".to_owned(),
                ));
            }
        };
        self.types.insert(ty.clone(), id);
        Ok(id)
    }

    /// Id of the constant `value`, interned per (type, value).
    pub fn constant(&mut self, value: ConstantValue) -> Result<u32> {
        let ty = Type::Scalar(value.scalar_ty());
        let ty_id = self.type_id(&ty)?;
        if let Some(id) = self.consts.get(&(ty_id, value.clone())) {
            return Ok(*id);
        }
        let id = self.alloc_id();
        let instr = match value {
            ConstantValue::Bool(true) => {
                InstrBuilder::new(Op::ConstantTrue).push(ty_id).push(id).build()
            }
            ConstantValue::Bool(false) => {
                InstrBuilder::new(Op::ConstantFalse).push(ty_id).push(id).build()
            }
            ref v => InstrBuilder::new(Op::Constant)
                .push(ty_id)
                .push(id)
                .push_list(&v.words())
                .build(),
        };
        self.push_ty(instr);
        self.consts.insert((ty_id, value), id);
        Ok(id)
    }

    /// Declare a variable of an interned type. Returns (variable id, pointer
    /// type id).
    pub fn variable(
        &mut self,
        ty: &Type,
        store_cls: StorageClass,
        name: Option<&str>,
    ) -> Result<(u32, u32)> {
        let ptr_ty = Type::Pointer(crate::ty::PointerType {
            pointee_ty: Box::new(ty.clone()),
            store_cls,
        });
        let ptr_ty_id = self.type_id(&ptr_ty)?;
        let var_id = self.emit_variable(ptr_ty_id, store_cls, name);
        Ok((var_id, ptr_ty_id))
    }

    /// Declare a variable over a raw pointee type id. Used for image types,
    /// whose words carry usage holes and thus never intern.
    pub fn variable_raw(
        &mut self,
        pointee_ty_id: u32,
        store_cls: StorageClass,
        name: Option<&str>,
    ) -> (u32, u32) {
        let ptr_ty_id = self.alloc_id();
        self.push_ty(
            InstrBuilder::new(Op::TypePointer)
                .push(ptr_ty_id)
                .push(store_cls as u32)
                .push(pointee_ty_id)
                .build(),
        );
        let var_id = self.emit_variable(ptr_ty_id, store_cls, name);
        (var_id, ptr_ty_id)
    }

    fn emit_variable(&mut self, ptr_ty_id: u32, store_cls: StorageClass, name: Option<&str>) -> u32 {
        let var_id = self.alloc_id();
        let instr = InstrBuilder::new(Op::Variable)
            .push(ptr_ty_id)
            .push(var_id)
            .push(store_cls as u32)
            .build();
        if store_cls == StorageClass::Function {
            self.func_vars.push(instr);
        } else {
            self.types_consts.push(instr);
        }
        if let Some(name) = name {
            self.name_id(var_id, name);
        }
        if store_cls == StorageClass::Input || store_cls == StorageClass::Output {
            self.interface.push(var_id);
        }
        var_id
    }

    /// Decorate an array type with its stride, once.
    pub fn array_stride(&mut self, array_ty_id: u32, stride: u32) {
        if self.strided_arrays.insert(array_ty_id) {
            self.decorate(array_ty_id, Decoration::ArrayStride, &[stride]);
        }
    }

    /// Flatten all sections into the final little-endian module.
    pub fn assemble(self) -> Result<SpirvBinary> {
        let entry = self
            .entry_point
            .as_ref()
            .ok_or_else(|| ShaderError::structural("module has no entry point".to_owned()))?;

        let header = SpirvHeader::with_bound(self.next_id + 1);
        let mut words = header.words().to_vec();

        let mut instrs: Vec<SpvInstr> = Vec::new();
        for cap in &self.capabilities {
            instrs.push(InstrBuilder::new(Op::Capability).push(*cap as u32).build());
        }
        for (name, id) in &self.ext_imports {
            instrs.push(
                InstrBuilder::new(Op::ExtInstImport)
                    .push(*id)
                    .push_str(name)
                    .build(),
            );
        }
        instrs.push(
            InstrBuilder::new(Op::MemoryModel)
                .push(AddressingModel::Logical as u32)
                .push(MemoryModel::GLSL450 as u32)
                .build(),
        );
        instrs.push(
            InstrBuilder::new(Op::EntryPoint)
                .push(entry.execution_model as u32)
                .push(entry.func_id)
                .push_str(&entry.name)
                .push_list(&self.interface)
                .build(),
        );
        for section in [
            &self.execution_modes,
            &self.debug,
            &self.annotations,
            &self.types_consts,
            &self.func_head,
            &self.func_vars,
            &self.func_body,
        ]
        .iter()
        {
            instrs.extend(section.iter().cloned());
        }

        for instr in &instrs {
            instr.flatten_into(&mut words);
        }
        log::debug!(
            "assembled module: {} instructions, {} words, bound {}",
            instrs.len(),
            words.len(),
            header.bound
        );
        Ok(SpirvBinary::from(words))
    }
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::ScalarType;

    #[test]
    fn interning_is_stable() {
        let mut b = ModuleBuilder::new();
        let a = b.type_id(&Type::Scalar(ScalarType::f32())).unwrap();
        let c = b.type_id(&Type::Scalar(ScalarType::f32())).unwrap();
        assert_eq!(a, c);
        let k1 = b.constant(ConstantValue::from(1.0f32)).unwrap();
        let k2 = b.constant(ConstantValue::from(1.0f32)).unwrap();
        let k3 = b.constant(ConstantValue::from(2.0f32)).unwrap();
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn holes_resolve_at_assembly() {
        let hole = WordHole::new(0);
        let instr = InstrBuilder::new(Op::Branch).push_hole(&hole).build();
        hole.set(42);
        let mut out = Vec::new();
        instr.flatten_into(&mut out);
        assert_eq!(out, vec![(2 << 16) | (Op::Branch as u32), 42]);
    }
}
