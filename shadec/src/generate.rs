//! Back-end code generator: normalized shader bytecode in, SPIR-V out.
//!
//! The value stack doubles as the type-inference device. A first pass
//! decides which names need a function-local variable (stored in two or more
//! blocks and loaded in yet another); everything else stays in SSA form by
//! reusing the last value id.
use std::collections::BTreeSet;
use std::convert::TryFrom;

use fnv::FnvHashMap as HashMap;
use log::debug;
use spirv::{
    Capability, Decoration, Dim, ExecutionMode, ImageFormat, ImageOperands, LoopControl,
    Op as SpvOp, SelectionControl, StorageClass,
};

use shadec_core::bin::SpirvBinary;
use shadec_core::constant::ConstantValue;
use shadec_core::emit::{InstrBuilder, ModuleBuilder, WordHole};
use shadec_core::error::{Result, ShaderError};
use shadec_core::nsb::{BinOp, CmpOp, ConstVal, Op, ResourceKind, Slot, Stage, UnOp};
use shadec_core::ty::{
    parse, ArrayType, ImageType, ScalarType, StructMember, StructType, Type, VectorType,
};

use crate::access::{ImageInfo, ValueId, VarAccess};
use crate::branch::{BranchTracker, LabelIds};
use crate::builtins;

/// Image formats every implementation understands; anything else needs the
/// extended-formats capability.
const BASE_IMAGE_FORMATS: &[ImageFormat] = &[
    ImageFormat::Rgba32f,
    ImageFormat::Rgba16f,
    ImageFormat::Rgba32i,
    ImageFormat::Rgba32ui,
    ImageFormat::Rgba16i,
    ImageFormat::Rgba16ui,
    ImageFormat::Rgba8,
    ImageFormat::Rgba8i,
    ImageFormat::Rgba8ui,
    ImageFormat::Rgba8Snorm,
    ImageFormat::R32f,
    ImageFormat::R32i,
    ImageFormat::R32ui,
];

/// A run-time handle on the generator's stack.
#[derive(Clone)]
pub(crate) enum Operand {
    /// An immutable result id.
    Value(ValueId),
    /// A lazy access path into a variable.
    Access(VarAccess),
    /// The non-result of a call such as a texture write.
    Void,
}
impl Operand {
    fn ty(&self) -> Option<&Type> {
        match self {
            Operand::Value(v) => Some(&v.ty),
            Operand::Access(a) => Some(&a.ty),
            Operand::Void => None,
        }
    }
}

struct LoopFrame {
    header: String,
    iter: String,
    cont: String,
    merge: String,
}

pub(crate) struct Generator {
    pub(crate) b: ModuleBuilder,
    stage: Stage,
    stack: Vec<Operand>,
    io: HashMap<String, (ResourceKind, VarAccess)>,
    slotmap: HashMap<(String, String), String>,
    texture_samplers: HashMap<(u32, u32), ValueId>,
    name_ids: HashMap<String, Operand>,
    name_vars: HashMap<String, VarAccess>,
    labels: LabelIds,
    branches: BranchTracker,
    need_save: HashMap<String, BTreeSet<String>>,
    need_load: HashMap<String, BTreeSet<String>>,
    loop_frames: Vec<LoopFrame>,
    terminated: bool,
    resources_open: bool,
}

/// Generate a SPIR-V module from a normalized shader bytecode program.
pub fn generate(nsb: &[Op]) -> Result<SpirvBinary> {
    let mut g = Generator {
        b: ModuleBuilder::new(),
        stage: Stage::Compute,
        stack: Vec::new(),
        io: HashMap::default(),
        slotmap: HashMap::default(),
        texture_samplers: HashMap::default(),
        name_ids: HashMap::default(),
        name_vars: HashMap::default(),
        labels: LabelIds::default(),
        branches: BranchTracker::new(),
        need_save: HashMap::default(),
        need_load: HashMap::default(),
        loop_frames: Vec::new(),
        terminated: false,
        resources_open: false,
    };
    g.scan_variable_storage(nsb);
    for op in nsb {
        g.dispatch(op)?;
    }
    g.b.assemble()
}

impl Generator {
    /// Decide, per block, which names must round-trip through a
    /// function-local variable instead of staying in SSA form. The store map
    /// is collected up front: in a loop, the store feeding a load can sit
    /// after it in program order.
    fn scan_variable_storage(&mut self, nsb: &[Op]) {
        let mut saved_in: HashMap<String, BTreeSet<String>> = HashMap::default();
        let mut cur_block = String::new();
        for op in nsb {
            match op {
                Op::Label(label) => cur_block = label.clone(),
                Op::StoreName(name) => {
                    saved_in
                        .entry(name.clone())
                        .or_insert_with(BTreeSet::new)
                        .insert(cur_block.clone());
                }
                _ => {}
            }
        }

        // A load backed by a store earlier in its own block reuses that SSA
        // id; any other load of a name stored in two or more blocks goes
        // through a variable.
        let mut cur_block = String::new();
        let mut stored_here: BTreeSet<&str> = BTreeSet::new();
        for op in nsb {
            match op {
                Op::Label(label) => {
                    cur_block = label.clone();
                    stored_here.clear();
                }
                Op::StoreName(name) => {
                    stored_here.insert(name.as_str());
                }
                Op::LoadName(name) => {
                    if stored_here.contains(name.as_str()) {
                        continue;
                    }
                    if let Some(blocks) = saved_in.get(name) {
                        if blocks.len() > 1 {
                            self.need_load
                                .entry(cur_block.clone())
                                .or_insert_with(BTreeSet::new)
                                .insert(name.clone());
                            for block in blocks {
                                self.need_save
                                    .entry(block.clone())
                                    .or_insert_with(BTreeSet::new)
                                    .insert(name.clone());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        debug!(
            "variable promotion: {} blocks save, {} blocks load",
            self.need_save.len(),
            self.need_load.len()
        );
    }

    fn dispatch(&mut self, op: &Op) -> Result<()> {
        match op {
            Op::Entrypoint { name, stage, modes } => {
                self.resources_open = true;
                return self.op_entrypoint(name, *stage, modes);
            }
            Op::Resource {
                name,
                kind,
                slot,
                typename,
            } => {
                if !self.resources_open {
                    return Err(ShaderError::declaration(
                        "resources must be declared before any code",
                    ));
                }
                return self.op_resource(name, *kind, slot, typename);
            }
            _ => self.resources_open = false,
        }
        match op {
            Op::Entrypoint { .. } | Op::Resource { .. } => unreachable!(),
            Op::FuncEnd => self.op_func_end(),
            Op::PopTop => {
                self.pop()?;
                Ok(())
            }
            Op::DupTop => {
                let top = self.pop()?;
                self.stack.push(top.clone());
                self.stack.push(top);
                Ok(())
            }
            Op::RotTwo => {
                let n = self.stack.len();
                if n < 2 {
                    return Err(ShaderError::structural("stack underflow in rot_two"));
                }
                self.stack.swap(n - 1, n - 2);
                Ok(())
            }
            Op::LoadName(name) => self.op_load_name(name),
            Op::StoreName(name) => self.op_store_name(name),
            Op::LoadConstant(value) => self.op_load_constant(value),
            Op::LoadAttr(name) => self.op_load_attr(name),
            Op::LoadIndex => self.op_load_index(),
            Op::StoreIndex => self.op_store_index(),
            Op::LoadArray(n) => {
                let args = self.popn(*n as usize)?;
                let packed = self.array_packing(args)?;
                self.stack.push(Operand::Value(packed));
                Ok(())
            }
            Op::BinaryOp(op) => self.op_binary(*op),
            Op::UnaryOp(op) => self.op_unary(*op),
            Op::Compare(cmp) => self.op_compare(*cmp),
            Op::Call { func, nargs } => self.op_call(func, *nargs as usize),
            Op::Label(label) => self.op_label(label),
            Op::Branch(label) => self.op_branch(label),
            Op::BranchConditional {
                true_label,
                false_label,
            } => self.op_branch_conditional(true_label, false_label),
            Op::BranchLoop { iter, cont, merge } => self.op_branch_loop(iter, cont, merge),
            Op::Return => self.op_return(),
        }
    }

    // %% Stack helpers

    fn pop(&mut self) -> Result<Operand> {
        self.stack
            .pop()
            .ok_or_else(|| ShaderError::structural("value stack underflow"))
    }
    fn popn(&mut self, n: usize) -> Result<Vec<Operand>> {
        if self.stack.len() < n {
            return Err(ShaderError::structural("value stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    /// Resolve an operand to a concrete value, loading through its access
    /// chain if necessary.
    pub(crate) fn as_value(&mut self, operand: Operand) -> Result<ValueId> {
        match operand {
            Operand::Value(v) => Ok(v),
            Operand::Access(a) => a.load(&mut self.b),
            Operand::Void => Err(ShaderError::ty("expression has no value")),
        }
    }

    // %% Module structure

    fn op_entrypoint(
        &mut self,
        name: &str,
        stage: Stage,
        modes: &std::collections::BTreeMap<String, Vec<u32>>,
    ) -> Result<()> {
        self.stage = stage;
        let func_id = self.b.alloc_id();
        self.b.set_entry_point(stage.execution_model(), func_id, name);
        self.b.name_id(func_id, name);

        let mut modes = modes.clone();
        if stage == Stage::Fragment
            && !modes.contains_key("OriginLowerLeft")
            && !modes.contains_key("OriginUpperLeft")
        {
            modes.insert("OriginLowerLeft".to_owned(), Vec::new());
        }
        if stage == Stage::Compute && !modes.contains_key("LocalSize") {
            modes.insert("LocalSize".to_owned(), vec![1, 1, 1]);
        }
        for (mode_name, args) in &modes {
            let mode = execution_mode_from_name(mode_name)?;
            self.b.push_execution_mode(
                InstrBuilder::new(SpvOp::ExecutionMode)
                    .push(func_id)
                    .push(mode as u32)
                    .push_list(args)
                    .build(),
            );
        }

        let return_ty_id = self.b.type_id(&Type::Void)?;
        let func_ty_id = self.b.type_id(&Type::Function(shadec_core::ty::FunctionType {
            return_ty: Box::new(Type::Void),
            arg_tys: Vec::new(),
        }))?;
        self.b.push_func_head(
            InstrBuilder::new(SpvOp::Function)
                .push(return_ty_id)
                .push(func_id)
                .push(0) // no function control
                .push(func_ty_id)
                .build(),
        );
        let entry_label = self.b.alloc_id();
        self.b
            .push_func_head(InstrBuilder::new(SpvOp::Label).push(entry_label).build());
        Ok(())
    }

    fn op_func_end(&mut self) -> Result<()> {
        if !self.branches.at_root() {
            return Err(ShaderError::structural(
                "function ends with unresolved open branches",
            ));
        }
        self.b
            .push_func(InstrBuilder::new(SpvOp::Return).build());
        self.b
            .push_func(InstrBuilder::new(SpvOp::FunctionEnd).build());
        Ok(())
    }

    // %% Resources

    fn op_resource(
        &mut self,
        name: &str,
        kind: ResourceKind,
        slot: &Slot,
        typename: &str,
    ) -> Result<()> {
        let (bindgroup, binding, builtin) = match slot {
            Slot::Index(i) => (0, Some(*i), None),
            Slot::Pair(group, binding) => (*group, Some(*binding), None),
            Slot::Name(s) => (0, None, Some(s.clone())),
        };

        // Locations are unique per kind; bindings within their bind group.
        let namespace = match kind {
            ResourceKind::Input | ResourceKind::Output => kind.as_str().to_owned(),
            _ => format!("bindgroup-{}", bindgroup),
        };
        let slot_repr = match (&binding, &builtin) {
            (Some(i), _) => i.to_string(),
            (_, Some(s)) => s.clone(),
            _ => unreachable!(),
        };
        let slot_key = (namespace.clone(), slot_repr.clone());
        if let Some(other) = self.slotmap.get(&slot_key) {
            return Err(ShaderError::declaration(format!(
                "the {} slot {} for {} is already taken by {}",
                namespace, slot_repr, name, other
            )));
        }
        self.slotmap.insert(slot_key, name.to_owned());
        if self.io.contains_key(name) {
            return Err(ShaderError::declaration(format!(
                "{} {} already exists",
                kind, name
            )));
        }

        let var_name = format!("var-{}", name);
        match kind {
            ResourceKind::Input | ResourceKind::Output => {
                let store_cls = match kind {
                    ResourceKind::Input => StorageClass::Input,
                    _ => StorageClass::Output,
                };
                let ty = parse::parse_typename(typename)?;
                let (var_id, _) = self.b.variable(&ty, store_cls, Some(&var_name))?;
                match (&binding, &builtin) {
                    (Some(location), _) => {
                        if matches!(slot, Slot::Pair(..)) {
                            return Err(ShaderError::declaration(format!(
                                "{} {} takes a location index or built-in name, not a bind group pair",
                                kind, name
                            )));
                        }
                        self.b.decorate(var_id, Decoration::Location, &[*location]);
                    }
                    (_, Some(builtin_name)) => {
                        let builtin = builtins::from_name(builtin_name).ok_or_else(|| {
                            ShaderError::declaration(format!(
                                "not a known built-in io variable: {}",
                                builtin_name
                            ))
                        })?;
                        self.b
                            .decorate(var_id, Decoration::BuiltIn, &[builtin as u32]);
                    }
                    _ => unreachable!(),
                }
                let access = VarAccess::new(var_id, store_cls, ty);
                self.io.insert(name.to_owned(), (kind, access));
            }
            ResourceKind::Uniform | ResourceKind::Buffer => {
                // Blocks are structs; wrap lone types into one.
                let declared_ty = parse::parse_typename(typename)?;
                let (block_ty, wrapped) = match declared_ty {
                    Type::Struct(_) => (declared_ty, false),
                    other => {
                        let member_name = name.rsplit('.').next().unwrap_or(name).to_owned();
                        (
                            Type::Struct(StructType {
                                name: None,
                                members: vec![StructMember {
                                    name: member_name,
                                    ty: other,
                                }],
                            }),
                            true,
                        )
                    }
                };
                let binding = binding.ok_or_else(|| {
                    ShaderError::declaration(format!(
                        "{} {} takes a binding index, not a built-in name",
                        kind, name
                    ))
                })?;
                let block_ty_id = self.b.type_id(&block_ty)?;
                self.annotate_block_members(block_ty_id, &block_ty, name)?;
                let deco = match kind {
                    ResourceKind::Uniform => Decoration::Block,
                    _ => Decoration::BufferBlock,
                };
                self.b.decorate(block_ty_id, deco, &[]);

                let (var_id, _) =
                    self.b
                        .variable(&block_ty, StorageClass::Uniform, Some(&var_name))?;
                self.b
                    .decorate(var_id, Decoration::DescriptorSet, &[bindgroup]);
                self.b.decorate(var_id, Decoration::Binding, &[binding]);

                let access = VarAccess::new(var_id, StorageClass::Uniform, block_ty.clone());
                let access = if wrapped {
                    let member_ty = block_ty.as_struct().unwrap().members[0].ty.clone();
                    let index_id = self.b.constant(ConstantValue::from(0i32))?;
                    access.index(index_id, member_ty)
                } else {
                    access
                };
                self.io.insert(name.to_owned(), (kind, access));
            }
            ResourceKind::Sampler => {
                let binding = binding.ok_or_else(|| {
                    ShaderError::declaration(format!("sampler {} takes a binding index", name))
                })?;
                let (var_id, _) =
                    self.b
                        .variable(&Type::Sampler, StorageClass::UniformConstant, Some(&var_name))?;
                self.b
                    .decorate(var_id, Decoration::DescriptorSet, &[bindgroup]);
                self.b.decorate(var_id, Decoration::Binding, &[binding]);
                let access = VarAccess::new(var_id, StorageClass::UniformConstant, Type::Sampler);
                self.io.insert(name.to_owned(), (kind, access));
            }
            ResourceKind::Texture => {
                let binding = binding.ok_or_else(|| {
                    ShaderError::declaration(format!("texture {} takes a binding index", name))
                })?;
                self.declare_texture(name, typename, &var_name, bindgroup, binding)?;
            }
        }
        Ok(())
    }

    /// Packed member offsets plus the matrix and array layout words a block
    /// needs.
    fn annotate_block_members(
        &mut self,
        block_ty_id: u32,
        block_ty: &Type,
        name: &str,
    ) -> Result<()> {
        let st = block_ty.as_struct().expect("blocks are structs");
        let mut offset = 0u32;
        for (i, member) in st.members.iter().enumerate() {
            if let Type::Matrix(m) = &member.ty {
                let stride = m.stride().ok_or_else(|| {
                    ShaderError::declaration(format!("unsized matrix member in {}", name))
                })?;
                self.b
                    .decorate_member(block_ty_id, i as u32, Decoration::ColMajor, &[]);
                self.b
                    .decorate_member(block_ty_id, i as u32, Decoration::MatrixStride, &[stride]);
            }
            if let Type::Array(a) = &member.ty {
                let elem_size = a.element_ty.byte_size().ok_or_else(|| {
                    ShaderError::declaration(format!("unsized array element in {}", name))
                })?;
                let member_ty_id = self.b.type_id(&member.ty)?;
                self.b.array_stride(member_ty_id, elem_size);
            }
            self.b
                .decorate_member(block_ty_id, i as u32, Decoration::Offset, &[offset]);
            match member.ty.byte_size() {
                Some(size) => offset += size,
                None if i + 1 == st.members.len() => {}
                None => {
                    return Err(ShaderError::declaration(format!(
                        "runtime-sized member must come last in {}",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    fn declare_texture(
        &mut self,
        name: &str,
        typename: &str,
        var_name: &str,
        bindgroup: u32,
        binding: u32,
    ) -> Result<()> {
        let info_text = typename.to_lowercase().replace(',', " ");
        let tokens: Vec<&str> = info_text.split_whitespace().collect();

        let mut dim = None;
        let mut arrayed = false;
        for (token, d, a) in [
            ("1d", Dim::Dim1D, false),
            ("1d-array", Dim::Dim1D, true),
            ("2d", Dim::Dim2D, false),
            ("2d-array", Dim::Dim2D, true),
            ("3d", Dim::Dim3D, false),
            ("3d-array", Dim::Dim3D, true),
            ("cube", Dim::DimCube, false),
            ("cube-array", Dim::DimCube, true),
        ]
        .iter()
        {
            if tokens.contains(token) {
                dim = Some(*d);
                arrayed = *a;
            }
        }
        let dim = dim.ok_or_else(|| {
            ShaderError::declaration(format!(
                "texture type of {} does not specify dimensionality",
                name
            ))
        })?;
        if dim == Dim::Dim1D {
            self.b.require_capability(Capability::Image1D);
        }

        let mut fmt = ImageFormat::Unknown;
        let mut sample_ty: Option<ScalarType> = None;
        for token in &tokens {
            if let Some((parsed_fmt, fmt_sample_ty)) = image_format_from_token(token) {
                fmt = parsed_fmt;
                sample_ty = Some(fmt_sample_ty);
                break;
            }
        }
        if fmt != ImageFormat::Unknown && !BASE_IMAGE_FORMATS.contains(&fmt) {
            self.b
                .require_capability(Capability::StorageImageExtendedFormats);
        }
        if tokens.contains(&"i32") {
            sample_ty = Some(ScalarType::i32());
        } else if tokens.contains(&"f32") {
            sample_ty = Some(ScalarType::f32());
        }
        let sample_ty = sample_ty.ok_or_else(|| {
            ShaderError::declaration(format!(
                "texture type of {} specifies neither format nor sample type",
                name
            ))
        })?;

        let multisampled = tokens.contains(&"ms");
        // Sampled and depth depend on how the texture is used later.
        let sampled = WordHole::new(0);
        let depth = WordHole::new(2);

        let sample_ty_id = self.b.type_id(&Type::Scalar(sample_ty.clone()))?;
        let img_ty_id = self.b.alloc_id();
        self.b.push_ty(
            InstrBuilder::new(SpvOp::TypeImage)
                .push(img_ty_id)
                .push(sample_ty_id)
                .push(dim as u32)
                .push_hole(&depth)
                .push(arrayed as u32)
                .push(multisampled as u32)
                .push_hole(&sampled)
                .push(fmt as u32)
                .build(),
        );
        let (var_id, _) = self
            .b
            .variable_raw(img_ty_id, StorageClass::UniformConstant, Some(var_name));
        self.b
            .decorate(var_id, Decoration::DescriptorSet, &[bindgroup]);
        self.b.decorate(var_id, Decoration::Binding, &[binding]);

        let ty = Type::Image(ImageType {
            scalar_ty: sample_ty.clone(),
            dim,
            is_array: arrayed,
            is_multisampled: multisampled,
            fmt,
        });
        let mut access = VarAccess::new(var_id, StorageClass::UniformConstant, ty);
        access.image = Some(ImageInfo {
            sample_ty,
            ty_id: img_ty_id,
            sampled,
            depth,
        });
        self.io
            .insert(name.to_owned(), (ResourceKind::Texture, access));
        Ok(())
    }

    // %% Names

    fn op_load_name(&mut self, name: &str) -> Result<()> {
        if self.name_ids.contains_key(name) {
            // Load from the promoted variable on first use in this block;
            // later uses in the block reuse the loaded id.
            let block = self.branches.current_label().to_owned();
            let needs_load = self
                .need_load
                .get(&block)
                .map_or(false, |names| names.contains(name));
            if needs_load {
                let var = self.name_vars.get(name).cloned().ok_or_else(|| {
                    ShaderError::structural(format!("name '{}' loaded before any store", name))
                })?;
                let value = var.load(&mut self.b)?;
                self.name_ids
                    .insert(name.to_owned(), Operand::Value(value));
                self.need_load.get_mut(&block).unwrap().remove(name);
            }
            self.stack.push(self.name_ids[name].clone());
        } else if let Some((_, access)) = self.io.get(name) {
            self.stack.push(Operand::Access(access.clone()));
        } else {
            return Err(ShaderError::declaration(format!(
                "using undeclared name '{}'",
                name
            )));
        }
        Ok(())
    }

    fn op_store_name(&mut self, name: &str) -> Result<()> {
        let ob = self.pop()?;
        if let Some((kind, access)) = self.io.get(name).cloned() {
            match kind {
                ResourceKind::Output | ResourceKind::Buffer => {
                    let value = self.as_value(ob.clone())?;
                    if value.ty != access.ty {
                        return Err(ShaderError::ty(format!(
                            "cannot store {} into {} of type {}",
                            value.ty, name, access.ty
                        )));
                    }
                    access.store(&mut self.b, &value)?;
                }
                ResourceKind::Input => {
                    return Err(ShaderError::ty("cannot store to an input"));
                }
                ResourceKind::Uniform => {
                    return Err(ShaderError::ty("cannot store to a uniform"));
                }
                ResourceKind::Sampler | ResourceKind::Texture => {}
            }
        }
        // The name now answers loads within this block.
        self.name_ids.insert(name.to_owned(), ob);
        Ok(())
    }

    fn op_load_constant(&mut self, value: &ConstVal) -> Result<()> {
        let constant = match value {
            ConstVal::Bool(x) => ConstantValue::from(*x),
            ConstVal::Int(x) => {
                let x = i32::try_from(*x).map_err(|_| {
                    ShaderError::ty(format!("integer constant {} does not fit in 32 bits", x))
                })?;
                ConstantValue::from(x)
            }
            ConstVal::Float(x) => ConstantValue::from(*x as f32),
            ConstVal::None => {
                return Err(ShaderError::dialect("a bare None cannot be loaded"));
            }
        };
        let ty = Type::Scalar(constant.scalar_ty());
        let id = self.b.constant(constant)?;
        self.stack.push(Operand::Value(ValueId { id, ty }));
        Ok(())
    }

    // %% Attribute and index access

    fn op_load_attr(&mut self, name: &str) -> Result<()> {
        let ob = self.pop()?;
        let ty = ob.ty().cloned();
        match ty {
            Some(Type::Struct(st)) => {
                let access = match ob {
                    Operand::Access(access) => access,
                    _ => {
                        return Err(ShaderError::ty(format!(
                            "unsupported attribute access '{}'",
                            name
                        )));
                    }
                };
                let index = st.member_index(name).ok_or_else(|| {
                    ShaderError::ty(format!("attribute {} invalid for {}", name, st))
                })?;
                let member_ty = st.members[index].ty.clone();
                let index_id = self.b.constant(ConstantValue::from(index as i32))?;
                self.stack
                    .push(Operand::Access(access.index(index_id, member_ty)));
            }
            Some(Type::Vector(vec_ty)) => {
                let indices = swizzle_indices(name)?;
                let scalar = Type::Scalar(vec_ty.scalar_ty.clone());
                if indices.len() == 1 {
                    match ob {
                        Operand::Access(access) => {
                            let index_id =
                                self.b.constant(ConstantValue::from(indices[0] as i32))?;
                            self.stack
                                .push(Operand::Access(access.index(index_id, scalar)));
                        }
                        other => {
                            let value = self.as_value(other)?;
                            let ty_id = self.b.type_id(&scalar)?;
                            let id = self.b.alloc_id();
                            self.b.push_func(
                                InstrBuilder::new(SpvOp::CompositeExtract)
                                    .push(ty_id)
                                    .push(id)
                                    .push(value.id)
                                    .push(indices[0])
                                    .build(),
                            );
                            self.stack.push(Operand::Value(ValueId { id, ty: scalar }));
                        }
                    }
                } else {
                    let value = self.as_value(ob)?;
                    let result_ty = Type::vec(vec_ty.scalar_ty.clone(), indices.len() as u32);
                    let ty_id = self.b.type_id(&result_ty)?;
                    let id = self.b.alloc_id();
                    self.b.push_func(
                        InstrBuilder::new(SpvOp::VectorShuffle)
                            .push(ty_id)
                            .push(id)
                            .push(value.id)
                            .push(value.id)
                            .push_list(&indices)
                            .build(),
                    );
                    self.stack.push(Operand::Value(ValueId { id, ty: result_ty }));
                }
            }
            _ => {
                return Err(ShaderError::ty(format!(
                    "unsupported attribute access '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    fn op_load_index(&mut self) -> Result<()> {
        let index = self.pop()?;
        let container = self.pop()?;
        match container {
            Operand::Access(access) => {
                let child_ty = access.ty.subtype().ok_or_else(|| {
                    ShaderError::ty(format!("cannot index into {}", access.ty))
                })?;
                let index_val = self.as_value(index)?;
                self.stack
                    .push(Operand::Access(access.index(index_val.id, child_ty)));
            }
            Operand::Value(value) if value.ty.is_array() => {
                // An r-value array has no storage; give it some.
                let element_ty = value.ty.subtype().expect("arrays have elements");
                let (var_id, _) = self.b.variable(&value.ty, StorageClass::Function, None)?;
                let temp = VarAccess::new(var_id, StorageClass::Function, value.ty.clone());
                temp.store(&mut self.b, &value)?;

                let index_val = self.as_value(index)?;
                let ptr_ty = Type::Pointer(shadec_core::ty::PointerType {
                    pointee_ty: Box::new(element_ty.clone()),
                    store_cls: StorageClass::Function,
                });
                let ptr_ty_id = self.b.type_id(&ptr_ty)?;
                let ptr_id = self.b.alloc_id();
                self.b.push_func(
                    InstrBuilder::new(SpvOp::InBoundsAccessChain)
                        .push(ptr_ty_id)
                        .push(ptr_id)
                        .push(var_id)
                        .push(index_val.id)
                        .build(),
                );
                let elem_ty_id = self.b.type_id(&element_ty)?;
                let id = self.b.alloc_id();
                self.b.push_func(
                    InstrBuilder::new(SpvOp::Load)
                        .push(elem_ty_id)
                        .push(id)
                        .push(ptr_id)
                        .build(),
                );
                self.stack.push(Operand::Value(ValueId {
                    id,
                    ty: element_ty,
                }));
            }
            _ => {
                return Err(ShaderError::ty("can only index arrays"));
            }
        }
        Ok(())
    }

    fn op_store_index(&mut self) -> Result<()> {
        let index = self.pop()?;
        let ob = self.pop()?;
        let value = self.pop()?;
        match ob {
            Operand::Access(access) => {
                let child_ty = access.ty.subtype().ok_or_else(|| {
                    ShaderError::ty(format!("cannot index into {}", access.ty))
                })?;
                let index_val = self.as_value(index)?;
                let child = access.index(index_val.id, child_ty);
                let value = self.as_value(value)?;
                if value.ty != child.ty {
                    return Err(ShaderError::ty(format!(
                        "cannot store {} into an element of type {}",
                        value.ty, child.ty
                    )));
                }
                child.store(&mut self.b, &value)
            }
            _ => Err(ShaderError::ty("cannot assign by index here")),
        }
    }

    // %% Math

    fn op_unary(&mut self, op: UnOp) -> Result<()> {
        let value = {
            let operand = self.pop()?;
            self.as_value(operand)?
        };
        let elem = value
            .ty
            .element_scalar()
            .cloned()
            .ok_or_else(|| ShaderError::ty(format!("cannot {} a {}", op.as_str(), value.ty)))?;
        let opcode = match op {
            UnOp::Neg if elem.is_float() => SpvOp::FNegate,
            UnOp::Neg if elem.is_int() => SpvOp::SNegate,
            UnOp::Not if elem.is_bool() => SpvOp::LogicalNot,
            _ => {
                return Err(ShaderError::ty(format!(
                    "cannot {} a value of type {}",
                    op.as_str(),
                    value.ty
                )));
            }
        };
        let ty_id = self.b.type_id(&value.ty)?;
        let id = self.b.alloc_id();
        self.b.push_func(
            InstrBuilder::new(opcode)
                .push(ty_id)
                .push(id)
                .push(value.id)
                .build(),
        );
        self.stack.push(Operand::Value(ValueId {
            id,
            ty: value.ty,
        }));
        Ok(())
    }

    fn op_binary(&mut self, op: BinOp) -> Result<()> {
        let val2 = {
            let operand = self.pop()?;
            self.as_value(operand)?
        };
        let val1 = {
            let operand = self.pop()?;
            self.as_value(operand)?
        };
        let t1 = val1.ty.clone();
        let t2 = val2.ty.clone();
        let mismatch = || {
            ShaderError::ty(format!(
                "cannot {} values of type {} and {}",
                op.as_str(),
                t1,
                t2
            ))
        };

        let e1 = t1.element_scalar().cloned().ok_or_else(mismatch)?;
        let e2 = t2.element_scalar().cloned().ok_or_else(mismatch)?;
        if e1 != e2 {
            return Err(ShaderError::ty(format!(
                "cannot {} two values with different element types: {} and {}",
                op.as_str(),
                t1,
                t2
            )));
        }
        let elem = e1;

        let (opcode, result_ty, id1, id2) = if t1 == t2 && (t1.is_scalar() || t1.is_vector()) {
            let opcode = elementwise_opcode(op, &elem).ok_or_else(mismatch)?;
            (opcode, t1.clone(), val1.id, val2.id)
        } else if t1.is_scalar() && t2.is_vector() {
            if !elem.is_float() {
                return Err(ShaderError::ty(format!(
                    "scalar {} vector is only supported for float element types",
                    op.as_str()
                )));
            }
            let vec_ty = t2.as_vector().unwrap().clone();
            if op == BinOp::Mul {
                (SpvOp::VectorTimesScalar, t2.clone(), val2.id, val1.id)
            } else if matches!(op, BinOp::Add | BinOp::Sub | BinOp::Div) {
                let opcode = elementwise_opcode(op, &elem).ok_or_else(mismatch)?;
                let n = vec_ty.scalar_count as usize;
                let spread = self.vector_packing(&vec_ty, vec![val1.clone(); n])?;
                (opcode, t2.clone(), spread.id, val2.id)
            } else {
                return Err(mismatch());
            }
        } else if t1.is_vector() && t2.is_scalar() {
            if !elem.is_float() {
                return Err(ShaderError::ty(format!(
                    "vector {} scalar is only supported for float element types",
                    op.as_str()
                )));
            }
            let vec_ty = t1.as_vector().unwrap().clone();
            if op == BinOp::Mul {
                (SpvOp::VectorTimesScalar, t1.clone(), val1.id, val2.id)
            } else if matches!(op, BinOp::Add | BinOp::Sub | BinOp::Div) {
                let opcode = elementwise_opcode(op, &elem).ok_or_else(mismatch)?;
                let n = vec_ty.scalar_count as usize;
                let spread = self.vector_packing(&vec_ty, vec![val2.clone(); n])?;
                (opcode, t1.clone(), val1.id, spread.id)
            } else {
                return Err(mismatch());
            }
        } else if op != BinOp::Mul {
            // Everything mixing matrices in is multiplication only.
            return Err(ShaderError::ty(format!(
                "cannot {} {} and {}, multiply only",
                op.as_str(),
                t1,
                t2
            )));
        } else if !elem.is_float() {
            return Err(ShaderError::ty(format!(
                "cannot {} {} and {}, float only",
                op.as_str(),
                t1,
                t2
            )));
        } else if t1.is_matrix() && t2.is_matrix() {
            let m1 = t1.as_matrix().unwrap();
            let m2 = t2.as_matrix().unwrap();
            if m1.cols != m2.rows {
                return Err(ShaderError::ty(format!(
                    "cannot multiply matrices with incompatible shapes {} and {}",
                    t1, t2
                )));
            }
            let result_ty = Type::Matrix(shadec_core::ty::MatrixType {
                cols: m2.cols,
                rows: m1.rows,
                scalar_ty: elem.clone(),
            });
            (SpvOp::MatrixTimesMatrix, result_ty, val1.id, val2.id)
        } else if t1.is_matrix() && t2.is_scalar() {
            (SpvOp::MatrixTimesScalar, t1.clone(), val1.id, val2.id)
        } else if t1.is_scalar() && t2.is_matrix() {
            (SpvOp::MatrixTimesScalar, t2.clone(), val2.id, val1.id)
        } else if t1.is_matrix() && t2.is_vector() {
            let m1 = t1.as_matrix().unwrap();
            let v2 = t2.as_vector().unwrap();
            if v2.scalar_count != m1.cols {
                return Err(ShaderError::ty(format!(
                    "incompatible shapes for {} x {}",
                    t1, t2
                )));
            }
            (
                SpvOp::MatrixTimesVector,
                Type::vec(elem.clone(), m1.rows),
                val1.id,
                val2.id,
            )
        } else if t1.is_vector() && t2.is_matrix() {
            let v1 = t1.as_vector().unwrap();
            let m2 = t2.as_matrix().unwrap();
            if v1.scalar_count != m2.rows {
                return Err(ShaderError::ty(format!(
                    "incompatible shapes for {} x {}",
                    t1, t2
                )));
            }
            (
                SpvOp::VectorTimesMatrix,
                Type::vec(elem.clone(), m2.cols),
                val1.id,
                val2.id,
            )
        } else {
            return Err(mismatch());
        };

        let ty_id = self.b.type_id(&result_ty)?;
        let id = self.b.alloc_id();
        self.b.push_func(
            InstrBuilder::new(opcode)
                .push(ty_id)
                .push(id)
                .push(id1)
                .push(id2)
                .build(),
        );
        self.stack.push(Operand::Value(ValueId { id, ty: result_ty }));
        Ok(())
    }

    fn op_compare(&mut self, cmp: CmpOp) -> Result<()> {
        let val2 = {
            let operand = self.pop()?;
            self.as_value(operand)?
        };
        let val1 = {
            let operand = self.pop()?;
            self.as_value(operand)?
        };
        if val1.ty != val2.ty {
            return Err(ShaderError::ty(format!(
                "cannot compare values of different types {} and {}",
                val1.ty, val2.ty
            )));
        }
        let (elem, result_ty) = match &val1.ty {
            Type::Vector(v) => (
                v.scalar_ty.clone(),
                Type::vec(ScalarType::Bool, v.scalar_count),
            ),
            Type::Scalar(s) => (s.clone(), Type::Scalar(ScalarType::Bool)),
            other => {
                return Err(ShaderError::ty(format!(
                    "cannot compare values of type {}",
                    other
                )));
            }
        };
        let opcode = match (&elem, cmp) {
            (ScalarType::Float { .. }, CmpOp::Lt) => SpvOp::FOrdLessThan,
            (ScalarType::Float { .. }, CmpOp::Le) => SpvOp::FOrdLessThanEqual,
            (ScalarType::Float { .. }, CmpOp::Eq) => SpvOp::FOrdEqual,
            (ScalarType::Float { .. }, CmpOp::Ne) => SpvOp::FOrdNotEqual,
            (ScalarType::Float { .. }, CmpOp::Gt) => SpvOp::FOrdGreaterThan,
            (ScalarType::Float { .. }, CmpOp::Ge) => SpvOp::FOrdGreaterThanEqual,
            (ScalarType::Int { signed: true, .. }, CmpOp::Lt) => SpvOp::SLessThan,
            (ScalarType::Int { signed: true, .. }, CmpOp::Le) => SpvOp::SLessThanEqual,
            (ScalarType::Int { signed: true, .. }, CmpOp::Gt) => SpvOp::SGreaterThan,
            (ScalarType::Int { signed: true, .. }, CmpOp::Ge) => SpvOp::SGreaterThanEqual,
            (ScalarType::Int { signed: false, .. }, CmpOp::Lt) => SpvOp::ULessThan,
            (ScalarType::Int { signed: false, .. }, CmpOp::Le) => SpvOp::ULessThanEqual,
            (ScalarType::Int { signed: false, .. }, CmpOp::Gt) => SpvOp::UGreaterThan,
            (ScalarType::Int { signed: false, .. }, CmpOp::Ge) => SpvOp::UGreaterThanEqual,
            (ScalarType::Int { .. }, CmpOp::Eq) => SpvOp::IEqual,
            (ScalarType::Int { .. }, CmpOp::Ne) => SpvOp::INotEqual,
            _ => {
                return Err(ShaderError::ty(format!(
                    "cannot compare values of type {}",
                    val1.ty
                )));
            }
        };
        let ty_id = self.b.type_id(&result_ty)?;
        let id = self.b.alloc_id();
        self.b.push_func(
            InstrBuilder::new(opcode)
                .push(ty_id)
                .push(id)
                .push(val1.id)
                .push(val2.id)
                .build(),
        );
        self.stack.push(Operand::Value(ValueId { id, ty: result_ty }));
        Ok(())
    }

    // %% Control flow

    /// Persist the names the pre-pass marked for this block, right before
    /// its terminator.
    fn store_vars_for_block(&mut self) -> Result<()> {
        let block = self.branches.current_label().to_owned();
        let names: Vec<String> = match self.need_save.get(&block) {
            Some(names) => names.iter().cloned().collect(),
            None => return Ok(()),
        };
        for name in names {
            let ob = self.name_ids.get(&name).cloned().ok_or_else(|| {
                ShaderError::structural(format!("name '{}' saved before any store", name))
            })?;
            let value = self.as_value(ob)?;
            if !self.name_vars.contains_key(&name) {
                let (var_id, _) =
                    self.b
                        .variable(&value.ty, StorageClass::Function, Some(&name))?;
                self.name_vars.insert(
                    name.clone(),
                    VarAccess::new(var_id, StorageClass::Function, value.ty.clone()),
                );
            }
            let var = self.name_vars[&name].clone();
            if var.ty != value.ty {
                return Err(ShaderError::ty(format!(
                    "name '{}' used for different types {} and {}",
                    name, var.ty, value.ty
                )));
            }
            var.store(&mut self.b, &value)?;
        }
        Ok(())
    }

    fn op_label(&mut self, label: &str) -> Result<()> {
        self.terminated = false;
        self.branches.on_label(label, &mut self.b, &mut self.labels)?;
        if self
            .loop_frames
            .last()
            .map_or(false, |frame| frame.merge == label)
        {
            self.loop_frames.pop();
        }
        Ok(())
    }

    fn op_branch(&mut self, label: &str) -> Result<()> {
        if self.terminated {
            // The block already ended with a return; only the tracking
            // advances.
            self.terminated = false;
            self.branches.set_current_label(label);
            return Ok(());
        }
        self.store_vars_for_block()?;
        let label_id = self.labels.id(&mut self.b, label);
        let back_edge = self
            .loop_frames
            .last()
            .map_or(false, |frame| frame.header == label);
        if back_edge {
            // Jump back to the loop header; in program order the merge
            // block is what comes next.
            self.b
                .push_func(InstrBuilder::new(SpvOp::Branch).push(label_id).build());
            let merge = self.loop_frames.last().unwrap().merge.clone();
            self.branches.set_current_label(&merge);
        } else {
            let hole = WordHole::new(label_id);
            self.branches.set_current_label(label);
            self.branches.set_current_branch_hole(hole.clone());
            self.b
                .push_func(InstrBuilder::new(SpvOp::Branch).push_hole(&hole).build());
        }
        Ok(())
    }

    fn op_branch_conditional(&mut self, true_label: &str, false_label: &str) -> Result<()> {
        let condition = {
            let operand = self.pop()?;
            self.as_value(operand)?
        };
        if !condition.ty.is_bool() {
            return Err(ShaderError::ty(format!(
                "branch condition must be a bool, got {}",
                condition.ty
            )));
        }
        self.store_vars_for_block()?;

        // A conditional aimed at the innermost loop's merge or continue
        // block is the loop condition or a break/continue; those may not
        // declare a selection merge of their own.
        let loop_exit = self.loop_frames.last().and_then(|frame| {
            let exits = |l: &str| l == frame.merge || l == frame.cont;
            if exits(true_label) {
                Some(false_label.to_owned())
            } else if exits(false_label) {
                Some(true_label.to_owned())
            } else {
                None
            }
        });

        let true_id = self.labels.id(&mut self.b, true_label);
        let false_id = self.labels.id(&mut self.b, false_label);
        match loop_exit {
            Some(continue_at) => {
                self.b.push_func(
                    InstrBuilder::new(SpvOp::BranchConditional)
                        .push(condition.id)
                        .push(true_id)
                        .push(false_id)
                        .build(),
                );
                self.branches.set_current_label(&continue_at);
            }
            None => {
                let merge_hole = WordHole::new(0);
                let true_hole = WordHole::new(true_id);
                let false_hole = WordHole::new(false_id);
                self.b.push_func(
                    InstrBuilder::new(SpvOp::SelectionMerge)
                        .push_hole(&merge_hole)
                        .push(SelectionControl::NONE.bits())
                        .build(),
                );
                self.b.push_func(
                    InstrBuilder::new(SpvOp::BranchConditional)
                        .push(condition.id)
                        .push_hole(&true_hole)
                        .push_hole(&false_hole)
                        .build(),
                );
                self.branches
                    .split(true_label, false_label, true_hole, false_hole, merge_hole);
            }
        }
        Ok(())
    }

    fn op_branch_loop(&mut self, iter: &str, cont: &str, merge: &str) -> Result<()> {
        self.store_vars_for_block()?;
        let header = self.branches.current_label().to_owned();
        let iter_id = self.labels.id(&mut self.b, iter);
        let cont_id = self.labels.id(&mut self.b, cont);
        let merge_id = self.labels.id(&mut self.b, merge);
        self.b.push_func(
            InstrBuilder::new(SpvOp::LoopMerge)
                .push(merge_id)
                .push(cont_id)
                .push(LoopControl::NONE.bits())
                .build(),
        );
        self.b
            .push_func(InstrBuilder::new(SpvOp::Branch).push(iter_id).build());
        self.branches.set_current_label(iter);
        self.loop_frames.push(LoopFrame {
            header,
            iter: iter.to_owned(),
            cont: cont.to_owned(),
            merge: merge.to_owned(),
        });
        Ok(())
    }

    fn op_return(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.store_vars_for_block()?;
        // An early return in a fragment shader is a discard.
        let opcode = match self.stage {
            Stage::Fragment => SpvOp::Kill,
            _ => SpvOp::Return,
        };
        self.b.push_func(InstrBuilder::new(opcode).build());
        self.terminated = true;
        Ok(())
    }

    // %% Calls

    fn op_call(&mut self, func: &str, nargs: usize) -> Result<()> {
        let args = self.popn(nargs)?;

        if let Ok(ty) = parse::parse_typename(func) {
            let result = self.call_type_constructor(ty, args)?;
            self.stack.push(Operand::Value(result));
            return Ok(());
        }

        let (family, name) = match func.split_once('.') {
            Some((family, name)) => (family, name),
            None => ("", func),
        };
        match family {
            "texture" => self.call_texture(name, args),
            "" | "stdlib" | "math" => {
                if name == "fmod" {
                    let result = self.call_frem(args)?;
                    self.stack.push(Operand::Value(result));
                    return Ok(());
                }
                match self.call_stdlib(name, args)? {
                    Some(result) => {
                        self.stack.push(Operand::Value(result));
                        Ok(())
                    }
                    None => Err(ShaderError::dialect(format!(
                        "unknown function '{}'",
                        func
                    ))),
                }
            }
            _ => Err(ShaderError::dialect(format!(
                "unknown function '{}'",
                func
            ))),
        }
    }

    fn call_type_constructor(&mut self, ty: Type, args: Vec<Operand>) -> Result<ValueId> {
        match ty {
            Type::Scalar(scalar) => {
                if args.len() != 1 {
                    return Err(ShaderError::ty(
                        "scalar conversion needs exactly one argument",
                    ));
                }
                let arg = {
                    let operand = args.into_iter().next().unwrap();
                    self.as_value(operand)?
                };
                self.convert_scalar(&scalar, arg)
            }
            Type::Vector(vec_ty) => {
                let mut vals = Vec::with_capacity(args.len());
                for arg in args {
                    vals.push(self.as_value(arg)?);
                }
                self.vector_packing(&vec_ty, vals)
            }
            Type::Array(_) => self.array_packing(args),
            other => Err(ShaderError::ty(format!("cannot construct a {}", other))),
        }
    }

    /// Convert a scalar value to `out`, choosing the conversion instruction
    /// from the (in-kind, out-kind) pair.
    fn convert_scalar(&mut self, out: &ScalarType, arg: ValueId) -> Result<ValueId> {
        self.convert_scalar_or_vector(Type::Scalar(out.clone()), out.clone(), arg)
    }

    fn convert_scalar_or_vector(
        &mut self,
        out_ty: Type,
        out_el: ScalarType,
        arg: ValueId,
    ) -> Result<ValueId> {
        if arg.ty == out_ty {
            return Ok(arg);
        }
        let arg_el = arg
            .ty
            .element_scalar()
            .cloned()
            .ok_or_else(|| ShaderError::ty(format!("cannot convert {} to {}", arg.ty, out_ty)))?;

        let ty_id = self.b.type_id(&out_ty)?;
        let id = self.b.alloc_id();
        let simple = |b: &mut ModuleBuilder, opcode: SpvOp| {
            b.push_func(
                InstrBuilder::new(opcode)
                    .push(ty_id)
                    .push(id)
                    .push(arg.id)
                    .build(),
            );
        };

        match (&arg_el, &out_el) {
            (ScalarType::Float { .. }, ScalarType::Float { .. }) => {
                simple(&mut self.b, SpvOp::FConvert);
            }
            (ScalarType::Int { signed, .. }, ScalarType::Float { .. }) => {
                let opcode = if *signed {
                    SpvOp::ConvertSToF
                } else {
                    SpvOp::ConvertUToF
                };
                simple(&mut self.b, opcode);
            }
            (ScalarType::Float { .. }, ScalarType::Int { signed, .. }) => {
                let opcode = if *signed {
                    SpvOp::ConvertFToS
                } else {
                    SpvOp::ConvertFToU
                };
                simple(&mut self.b, opcode);
            }
            (
                ScalarType::Int { bits: from, .. },
                ScalarType::Int {
                    bits: to,
                    signed: out_signed,
                },
            ) => {
                let opcode = if from == to {
                    // Same width, different signedness: a plain
                    // reinterpretation.
                    SpvOp::Bitcast
                } else if *out_signed {
                    SpvOp::SConvert
                } else {
                    SpvOp::UConvert
                };
                simple(&mut self.b, opcode);
            }
            (ScalarType::Bool, ScalarType::Float { .. })
            | (ScalarType::Bool, ScalarType::Int { .. }) => {
                if !out_ty.is_scalar() {
                    return Err(ShaderError::ty("cannot convert boolean vectors"));
                }
                let one = self.b.constant(ConstantValue::one_of(&out_el)?)?;
                let zero = self.b.constant(ConstantValue::zero_of(&out_el)?)?;
                self.b.push_func(
                    InstrBuilder::new(SpvOp::Select)
                        .push(ty_id)
                        .push(id)
                        .push(arg.id)
                        .push(one)
                        .push(zero)
                        .build(),
                );
            }
            (ScalarType::Float { .. }, ScalarType::Bool)
            | (ScalarType::Int { .. }, ScalarType::Bool) => {
                if !out_ty.is_scalar() {
                    return Err(ShaderError::ty("cannot convert boolean vectors"));
                }
                let zero = self.b.constant(ConstantValue::zero_of(&arg_el)?)?;
                let opcode = if arg_el.is_float() {
                    SpvOp::FOrdNotEqual
                } else {
                    SpvOp::INotEqual
                };
                self.b.push_func(
                    InstrBuilder::new(opcode)
                        .push(ty_id)
                        .push(id)
                        .push(arg.id)
                        .push(zero)
                        .build(),
                );
            }
            _ => {
                return Err(ShaderError::ty(format!(
                    "cannot convert {} to {}",
                    arg.ty, out_ty
                )));
            }
        }
        Ok(ValueId { id, ty: out_ty })
    }

    /// Compose a vector from scalars and vectors, converting every
    /// constituent to the target element type.
    pub(crate) fn vector_packing(
        &mut self,
        vec_ty: &VectorType,
        args: Vec<ValueId>,
    ) -> Result<ValueId> {
        let out_ty = Type::Vector(vec_ty.clone());
        let target_el = vec_ty.scalar_ty.clone();

        // One same-length numeric vector converts elementwise.
        if args.len() == 1 && !target_el.is_bool() {
            if let Type::Vector(src) = &args[0].ty {
                if !src.scalar_ty.is_bool() {
                    if src.scalar_count != vec_ty.scalar_count {
                        return Err(ShaderError::ty(
                            "vector conversion needs vectors of equal length",
                        ));
                    }
                    let arg = args.into_iter().next().unwrap();
                    return self.convert_scalar_or_vector(out_ty, target_el, arg);
                }
            }
        }

        let mut composites = Vec::new();
        for arg in args {
            match arg.ty.clone() {
                Type::Scalar(s) => {
                    let converted = if s == target_el {
                        arg
                    } else {
                        self.convert_scalar(&target_el, arg)?
                    };
                    composites.push(converted);
                }
                Type::Vector(v) => {
                    for i in 0..v.scalar_count {
                        let comp_ty = Type::Scalar(v.scalar_ty.clone());
                        let comp_ty_id = self.b.type_id(&comp_ty)?;
                        let comp_id = self.b.alloc_id();
                        self.b.push_func(
                            InstrBuilder::new(SpvOp::CompositeExtract)
                                .push(comp_ty_id)
                                .push(comp_id)
                                .push(arg.id)
                                .push(i)
                                .build(),
                        );
                        let comp = ValueId {
                            id: comp_id,
                            ty: comp_ty,
                        };
                        let converted = if v.scalar_ty == target_el {
                            comp
                        } else {
                            self.convert_scalar(&target_el, comp)?
                        };
                        composites.push(converted);
                    }
                }
                other => {
                    return Err(ShaderError::ty(format!(
                        "invalid type to compose a vector: {}",
                        other
                    )));
                }
            }
        }

        if composites.len() != vec_ty.scalar_count as usize {
            return Err(ShaderError::ty(format!(
                "{} did not expect {} elements",
                out_ty,
                composites.len()
            )));
        }
        if composites.len() < 2 {
            return Err(ShaderError::ty(
                "vector construction needs at least two constituents",
            ));
        }

        let ty_id = self.b.type_id(&out_ty)?;
        let id = self.b.alloc_id();
        let mut instr = InstrBuilder::new(SpvOp::CompositeConstruct).push(ty_id).push(id);
        for comp in &composites {
            instr = instr.push(comp.id);
        }
        self.b.push_func(instr.build());
        Ok(ValueId { id, ty: out_ty })
    }

    fn array_packing(&mut self, args: Vec<Operand>) -> Result<ValueId> {
        if args.is_empty() {
            return Err(ShaderError::ty("no support for zero-sized arrays"));
        }
        let mut vals = Vec::with_capacity(args.len());
        for arg in args {
            vals.push(self.as_value(arg)?);
        }
        let element_ty = vals[0].ty.clone();
        for val in &vals {
            if val.ty != element_ty {
                return Err(ShaderError::ty(format!(
                    "array elements must share one type, got {} and {}",
                    element_ty, val.ty
                )));
            }
        }
        let array_ty = Type::Array(ArrayType {
            element_ty: Box::new(element_ty),
            element_count: Some(vals.len() as u32),
        });
        let ty_id = self.b.type_id(&array_ty)?;
        let id = self.b.alloc_id();
        let mut instr = InstrBuilder::new(SpvOp::CompositeConstruct).push(ty_id).push(id);
        for val in &vals {
            instr = instr.push(val.id);
        }
        self.b.push_func(instr.build());
        Ok(ValueId { id, ty: array_ty })
    }

    /// `math.fmod`: remainder taking the sign of the dividend, unlike the
    /// `%` operator which follows the divisor.
    fn call_frem(&mut self, args: Vec<Operand>) -> Result<ValueId> {
        if args.len() != 2 {
            return Err(ShaderError::ty("fmod() takes 2 arguments"));
        }
        let mut vals = Vec::with_capacity(2);
        for arg in args {
            vals.push(self.as_value(arg)?);
        }
        if vals[0].ty != vals[1].ty
            || !vals[0].ty.element_scalar().map_or(false, ScalarType::is_float)
        {
            return Err(ShaderError::ty(format!(
                "fmod() needs two equal float operands, got {} and {}",
                vals[0].ty, vals[1].ty
            )));
        }
        let ty = vals[0].ty.clone();
        let ty_id = self.b.type_id(&ty)?;
        let id = self.b.alloc_id();
        self.b.push_func(
            InstrBuilder::new(SpvOp::FRem)
                .push(ty_id)
                .push(id)
                .push(vals[0].id)
                .push(vals[1].id)
                .build(),
        );
        Ok(ValueId { id, ty })
    }

    // %% Textures

    fn expect_texture(&self, operand: &Operand) -> Result<(VarAccess, ImageInfo)> {
        match operand {
            Operand::Access(access) => match &access.image {
                Some(info) => Ok((access.clone(), info.clone())),
                None => Err(ShaderError::ty("expected a texture")),
            },
            _ => Err(ShaderError::ty("expected a texture")),
        }
    }

    fn check_storage_coord(&self, coord: &ValueId) -> Result<()> {
        let ok = match &coord.ty {
            Type::Scalar(s) => *s == ScalarType::i32(),
            Type::Vector(v) => {
                v.scalar_ty == ScalarType::i32() && (v.scalar_count == 2 || v.scalar_count == 3)
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(ShaderError::ty(format!(
                "expected texture coords to be i32, ivec2 or ivec3, got {}",
                coord.ty
            )))
        }
    }

    fn call_texture(&mut self, name: &str, mut args: Vec<Operand>) -> Result<()> {
        match name {
            "read" | "imageLoad" => {
                if args.len() != 2 {
                    return Err(ShaderError::ty("texture read takes (texture, coord)"));
                }
                let coord_op = args.pop().unwrap();
                let (tex, info) = self.expect_texture(&args[0])?;
                self.b
                    .require_capability(Capability::StorageImageReadWithoutFormat);
                info.depth.set(0);
                info.sampled.set(2);
                let coord = self.as_value(coord_op)?;
                self.check_storage_coord(&coord)?;
                let result_ty = Type::vec(info.sample_ty.clone(), 4);
                let ty_id = self.b.type_id(&result_ty)?;
                let tex_val = tex.load(&mut self.b)?;
                let id = self.b.alloc_id();
                self.b.push_func(
                    InstrBuilder::new(SpvOp::ImageRead)
                        .push(ty_id)
                        .push(id)
                        .push(tex_val.id)
                        .push(coord.id)
                        .build(),
                );
                self.stack.push(Operand::Value(ValueId { id, ty: result_ty }));
            }
            "write" | "imageStore" => {
                if args.len() != 3 {
                    return Err(ShaderError::ty(
                        "texture write takes (texture, coord, color)",
                    ));
                }
                let color_op = args.pop().unwrap();
                let coord_op = args.pop().unwrap();
                let (tex, info) = self.expect_texture(&args[0])?;
                self.b
                    .require_capability(Capability::StorageImageWriteWithoutFormat);
                info.depth.set(0);
                info.sampled.set(2);
                let coord = self.as_value(coord_op)?;
                self.check_storage_coord(&coord)?;
                let color = self.as_value(color_op)?;
                let expected = Type::vec(info.sample_ty.clone(), 4);
                if color.ty != expected {
                    return Err(ShaderError::ty(format!(
                        "expected texture value to be {}, not {}",
                        expected, color.ty
                    )));
                }
                let tex_val = tex.load(&mut self.b)?;
                self.b.push_func(
                    InstrBuilder::new(SpvOp::ImageWrite)
                        .push(tex_val.id)
                        .push(coord.id)
                        .push(color.id)
                        .build(),
                );
                self.stack.push(Operand::Void);
            }
            "sample" => {
                if args.len() != 3 {
                    return Err(ShaderError::ty(
                        "texture sample takes (texture, sampler, coord)",
                    ));
                }
                let coord_op = args.pop().unwrap();
                let sampler_op = args.pop().unwrap();
                let (tex, info) = self.expect_texture(&args[0])?;
                let sampler = match &sampler_op {
                    Operand::Access(access) if access.ty == Type::Sampler => access.clone(),
                    _ => return Err(ShaderError::ty("expected a sampler")),
                };
                info.depth.set(0);
                info.sampled.set(1);
                let coord = self.as_value(coord_op)?;
                let sampled_image = self.texture_sampler(&tex, &sampler)?;
                let result_ty = Type::vec(info.sample_ty.clone(), 4);
                let ty_id = self.b.type_id(&result_ty)?;
                let lod = self.b.constant(ConstantValue::from(0.0f32))?;
                let id = self.b.alloc_id();
                self.b.push_func(
                    InstrBuilder::new(SpvOp::ImageSampleExplicitLod)
                        .push(ty_id)
                        .push(id)
                        .push(sampled_image.id)
                        .push(coord.id)
                        .push(ImageOperands::LOD.bits())
                        .push(lod)
                        .build(),
                );
                self.stack.push(Operand::Value(ValueId { id, ty: result_ty }));
            }
            _ => {
                return Err(ShaderError::dialect(format!(
                    "unknown texture function '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    /// One combined image per (texture, sampler) pair.
    fn texture_sampler(&mut self, tex: &VarAccess, sampler: &VarAccess) -> Result<ValueId> {
        let key = (tex.var_id, sampler.var_id);
        if let Some(cached) = self.texture_samplers.get(&key) {
            return Ok(cached.clone());
        }
        let info = tex.image.clone().expect("texture access carries image info");
        let tex_val = tex.load(&mut self.b)?;
        let sampler_val = sampler.load(&mut self.b)?;
        let si_ty_id = self.b.alloc_id();
        self.b.push_ty(
            InstrBuilder::new(SpvOp::TypeSampledImage)
                .push(si_ty_id)
                .push(info.ty_id)
                .build(),
        );
        let id = self.b.alloc_id();
        self.b.push_func(
            InstrBuilder::new(SpvOp::SampledImage)
                .push(si_ty_id)
                .push(id)
                .push(tex_val.id)
                .push(sampler_val.id)
                .build(),
        );
        let ty = match &tex.ty {
            Type::Image(img) => Type::SampledImage(img.clone()),
            _ => unreachable!("texture access has image type"),
        };
        let value = ValueId { id, ty };
        self.texture_samplers.insert(key, value.clone());
        Ok(value)
    }
}

fn elementwise_opcode(op: BinOp, elem: &ScalarType) -> Option<SpvOp> {
    let opcode = match (op, elem) {
        (BinOp::Add, ScalarType::Float { .. }) => SpvOp::FAdd,
        (BinOp::Sub, ScalarType::Float { .. }) => SpvOp::FSub,
        (BinOp::Mul, ScalarType::Float { .. }) => SpvOp::FMul,
        (BinOp::Div, ScalarType::Float { .. }) => SpvOp::FDiv,
        (BinOp::Mod, ScalarType::Float { .. }) => SpvOp::FMod,
        (BinOp::Add, ScalarType::Int { .. }) => SpvOp::IAdd,
        (BinOp::Sub, ScalarType::Int { .. }) => SpvOp::ISub,
        (BinOp::Mul, ScalarType::Int { .. }) => SpvOp::IMul,
        (BinOp::Div, ScalarType::Int { signed: true, .. }) => SpvOp::SDiv,
        (BinOp::Div, ScalarType::Int { signed: false, .. }) => SpvOp::UDiv,
        (BinOp::Mod, ScalarType::Int { signed: true, .. }) => SpvOp::SMod,
        (BinOp::Mod, ScalarType::Int { signed: false, .. }) => SpvOp::UMod,
        (BinOp::And, ScalarType::Bool) => SpvOp::LogicalAnd,
        (BinOp::Or, ScalarType::Bool) => SpvOp::LogicalOr,
        _ => return None,
    };
    Some(opcode)
}

fn execution_mode_from_name(name: &str) -> Result<ExecutionMode> {
    let mode = match name {
        "LocalSize" => ExecutionMode::LocalSize,
        "OriginLowerLeft" => ExecutionMode::OriginLowerLeft,
        "OriginUpperLeft" => ExecutionMode::OriginUpperLeft,
        "DepthReplacing" => ExecutionMode::DepthReplacing,
        "EarlyFragmentTests" => ExecutionMode::EarlyFragmentTests,
        _ => {
            return Err(ShaderError::declaration(format!(
                "unknown execution mode '{}'",
                name
            )));
        }
    };
    Ok(mode)
}

fn swizzle_indices(name: &str) -> Result<Vec<u32>> {
    if name.is_empty() || name.len() > 4 {
        return Err(ShaderError::ty(format!(
            "invalid vector attribute '{}'",
            name
        )));
    }
    let mut indices = Vec::with_capacity(name.len());
    for c in name.chars() {
        let index = match c {
            'x' | 'r' => 0,
            'y' | 'g' => 1,
            'z' | 'b' => 2,
            'w' | 'a' => 3,
            _ => {
                return Err(ShaderError::ty(format!(
                    "invalid vector attribute '{}'",
                    name
                )));
            }
        };
        indices.push(index);
    }
    Ok(indices)
}

/// Recognize a texel-format token such as `rgba32f` or `r32sint`, yielding
/// the format and the sample type it implies. Suffixes spell out the
/// component interpretation: `f`/`norm` sample as floats, the rest as
/// integers.
fn image_format_from_token(token: &str) -> Option<(ImageFormat, ScalarType)> {
    if !token.starts_with('r') {
        return None;
    }
    let normalized = token
        .replace("uint", "ui")
        .replace("sint", "i")
        .replace("int", "i")
        .replace("float", "f");
    let fmt = match normalized.as_str() {
        "rgba32f" => ImageFormat::Rgba32f,
        "rgba16f" => ImageFormat::Rgba16f,
        "rgba8" => ImageFormat::Rgba8,
        "rgba8snorm" => ImageFormat::Rgba8Snorm,
        "rg32f" => ImageFormat::Rg32f,
        "rg16f" => ImageFormat::Rg16f,
        "r32f" => ImageFormat::R32f,
        "r16f" => ImageFormat::R16f,
        "rgba32i" => ImageFormat::Rgba32i,
        "rgba16i" => ImageFormat::Rgba16i,
        "rgba8i" => ImageFormat::Rgba8i,
        "rg32i" => ImageFormat::Rg32i,
        "r32i" => ImageFormat::R32i,
        "rgba32ui" => ImageFormat::Rgba32ui,
        "rgba16ui" => ImageFormat::Rgba16ui,
        "rgba8ui" => ImageFormat::Rgba8ui,
        "rg32ui" => ImageFormat::Rg32ui,
        "r32ui" => ImageFormat::R32ui,
        _ => return None,
    };
    let sample_ty = if normalized.ends_with('f') || normalized.ends_with("norm") {
        ScalarType::f32()
    } else {
        ScalarType::i32()
    };
    Some((fmt, sample_ty))
}
