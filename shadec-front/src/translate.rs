//! Front-end translator.
//!
//! Walks the source stream in address order, weaving in the loop scaffolding
//! prepared by the pre-scanner, and emits normalized shader bytecode. The
//! value stack here tracks name tags only; concrete types are the back end's
//! business.
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::Ordering;

use fnv::FnvHashMap as HashMap;
use fnv::FnvHashSet as HashSet;
use log::debug;

use shadec_core::error::{Result, ShaderError};
use shadec_core::nsb::{BinOp, ConstVal, Op, ResourceKind, Stage, UnOp};
use shadec_core::nsb::CmpOp;
use shadec_core::ty::parse::{resolve_name, TypeName};

use crate::code::{FuncCode, SourceOp, CMP_TABLE};
use crate::fix;
use crate::loops::{self, LoopInfo, LoopKind};
use crate::OPT_CONVERT_TERNARY_TO_SELECT;

/// Constants reachable as `math.<name>` in shader code.
const MATH_CONSTANTS: &[(&str, f64)] = &[
    ("pi", std::f64::consts::PI),
    ("e", std::f64::consts::E),
];

/// Derive the shader stage from the function name, which must contain
/// exactly one of `vertex`, `fragment` or `compute`.
pub fn detect_stage(name: &str) -> Result<Stage> {
    let lower = name.to_lowercase();
    let mut found = Vec::new();
    for (needle, stage) in [
        ("vertex", Stage::Vertex),
        ("fragment", Stage::Fragment),
        ("compute", Stage::Compute),
    ]
    .iter()
    {
        if lower.contains(needle) {
            found.push(*stage);
        }
    }
    match found.as_slice() {
        [stage] => Ok(*stage),
        [] => Err(ShaderError::declaration(
            "entry point name must contain 'vertex', 'fragment' or 'compute' to name its stage",
        )),
        _ => Err(ShaderError::declaration(format!(
            "ambiguous entry point name '{}': more than one stage named",
            name
        ))),
    }
}

/// What a stack slot held, as far as the front end can tell.
#[derive(Clone, PartialEq, Debug)]
enum Tag {
    /// A local name, or a kind-qualified resource name such as `input.x`.
    Name(String),
    /// A dotted global such as `.abs` or `.math.fmod`.
    Global(String),
    /// A type name or constructed type descriptor.
    TypeName(String),
    /// A texture method token such as `texture.sample`.
    TexFunc(String),
    /// The `range` marker feeding a for-loop.
    Range,
    Const(ConstVal),
    /// A computed value.
    Value,
}

struct Translator<'a> {
    func: &'a FuncCode,
    ops: Vec<Op>,
    stack: Vec<Tag>,
    labels: HashMap<usize, String>,
    protected_addrs: HashSet<usize>,
    protected_names: HashSet<String>,
    pending_loops: VecDeque<LoopInfo>,
    loop_stack: Vec<LoopInfo>,
    pointer: usize,
    resource_kinds: HashMap<String, ResourceKind>,
}

/// Translate a source function to normalized shader bytecode.
pub fn translate(func: &FuncCode) -> Result<(Stage, Vec<Op>)> {
    let stage = detect_stage(&func.name)?;

    // The select lowering this flag once chose between was removed; the flag
    // is read so hosts that toggle it keep working.
    let convert_ternary = OPT_CONVERT_TERNARY_TO_SELECT.load(Ordering::Relaxed);
    debug!(
        "translating '{}' as {} shader (ternary-to-select: {})",
        func.name, stage, convert_ternary
    );

    let scan = loops::scan(&func.code);
    let mut t = Translator {
        func,
        ops: Vec::new(),
        stack: Vec::new(),
        labels: scan.labels,
        protected_addrs: scan.protected_addrs,
        protected_names: scan.protected_names,
        pending_loops: scan.loops.into(),
        loop_stack: Vec::new(),
        pointer: 0,
        resource_kinds: HashMap::default(),
    };

    t.emit(Op::Entrypoint {
        name: "main".to_owned(),
        stage,
        modes: BTreeMap::new(),
    });
    for (name, decl) in &func.args {
        t.emit(Op::Resource {
            name: format!("{}.{}", decl.kind, name),
            kind: decl.kind,
            slot: decl.slot.clone(),
            typename: decl.typename.clone(),
        });
        t.resource_kinds.insert(name.clone(), decl.kind);
    }

    t.run()?;
    t.emit(Op::FuncEnd);

    let mut ops = t.ops;
    let protected = t.protected_names;
    fix::empty_blocks(&mut ops, &protected);
    fix::or_control_flow(&mut ops);
    fix::consistent_labels(&mut ops);
    debug!("emitted {} bytecode ops", ops.len());
    Ok((stage, ops))
}

impl<'a> Translator<'a> {
    fn run(&mut self) -> Result<()> {
        while self.pointer < self.func.code.len() {
            if self
                .pending_loops
                .front()
                .map_or(false, |info| info.start == self.pointer)
            {
                let info = self.pending_loops.pop_front().unwrap();
                self.start_loop(info)?;
            } else if self
                .loop_stack
                .last()
                .map_or(false, |info| info.end == self.pointer)
            {
                self.end_loop();
            } else if self.labels.contains_key(&self.pointer)
                && !self.protected_addrs.contains(&self.pointer)
            {
                let label = self.labels[&self.pointer].clone();
                if !self.last_is_branch() {
                    self.emit(Op::Branch(label.clone()));
                }
                self.emit(Op::Label(label));
            }
            let byte = self.next();
            let op = SourceOp::from_u8(byte).ok_or_else(|| {
                ShaderError::dialect(format!("unsupported opcode {} in source stream", byte))
            })?;
            self.dispatch(op)?;
        }
        Ok(())
    }

    fn emit(&mut self, op: Op) {
        if matches!(op, Op::Branch(_)) {
            debug_assert!(
                !self.last_is_branch(),
                "branch emitted into a closed block"
            );
        }
        self.ops.push(op);
    }

    fn last_is_branch(&self) -> bool {
        self.ops.last().map_or(false, Op::is_branch)
    }

    fn next(&mut self) -> u8 {
        let byte = self.func.code[self.pointer];
        self.pointer += 1;
        byte
    }
    fn peek_at(&self, pos: usize) -> Option<u8> {
        self.func.code.get(pos).copied()
    }

    fn pop(&mut self) -> Result<Tag> {
        self.stack
            .pop()
            .ok_or_else(|| ShaderError::dialect("value stack underflow in source stream"))
    }
    fn popn(&mut self, n: usize) -> Result<Vec<Tag>> {
        if self.stack.len() < n {
            return Err(ShaderError::dialect(
                "value stack underflow in source stream",
            ));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn varname(&self, idx: u8) -> Result<&'a str> {
        self.func
            .varnames
            .get(idx as usize)
            .map(|s| s.as_str())
            .ok_or_else(|| ShaderError::dialect("variable name index out of range"))
    }
    fn name(&self, idx: u8) -> Result<&'a str> {
        self.func
            .names
            .get(idx as usize)
            .map(|s| s.as_str())
            .ok_or_else(|| ShaderError::dialect("name index out of range"))
    }

    /// Label for a source address: the current loop's remapping first, then
    /// the plain address label, created on demand.
    fn get_label(&mut self, pos: usize) -> String {
        if let Some(info) = self.loop_stack.last() {
            if let Some(label) = info.labelmap.get(&pos) {
                return label.clone();
            }
        }
        self.labels
            .entry(pos)
            .or_insert_with(|| pos.to_string())
            .clone()
    }

    fn dispatch(&mut self, op: SourceOp) -> Result<()> {
        match op {
            SourceOp::PopTop => {
                self.next();
                self.pop()?;
                self.emit(Op::PopTop);
            }
            SourceOp::RotTwo => {
                self.next();
                let n = self.stack.len();
                if n < 2 {
                    return Err(ShaderError::dialect("value stack underflow"));
                }
                self.stack.swap(n - 1, n - 2);
                self.emit(Op::RotTwo);
            }
            SourceOp::DupTop => {
                self.next();
                let top = self.pop()?;
                self.stack.push(top.clone());
                self.stack.push(top);
                self.emit(Op::DupTop);
            }
            SourceOp::UnaryNegative => {
                self.next();
                self.pop()?;
                self.stack.push(Tag::Value);
                self.emit(Op::UnaryOp(UnOp::Neg));
            }
            SourceOp::UnaryNot => {
                self.next();
                self.pop()?;
                self.stack.push(Tag::Value);
                self.emit(Op::UnaryOp(UnOp::Not));
            }
            SourceOp::BinaryAdd => self.binary(BinOp::Add)?,
            SourceOp::BinarySubtract => self.binary(BinOp::Sub)?,
            SourceOp::BinaryMultiply => self.binary(BinOp::Mul)?,
            SourceOp::BinaryTrueDivide | SourceOp::BinaryFloorDivide => self.binary(BinOp::Div)?,
            SourceOp::BinaryModulo => self.binary(BinOp::Mod)?,
            SourceOp::BinaryPower => {
                self.next();
                let exp = self.pop()?;
                self.pop()?;
                self.stack.push(Tag::Value);
                let is_square = matches!(exp, Tag::Const(ConstVal::Int(2)))
                    || matches!(exp, Tag::Const(ConstVal::Float(x)) if x == 2.0);
                let is_sqrt = matches!(exp, Tag::Const(ConstVal::Float(x)) if x == 0.5);
                if is_square {
                    self.emit(Op::PopTop);
                    self.emit(Op::DupTop);
                    self.emit(Op::BinaryOp(BinOp::Mul));
                } else if is_sqrt {
                    self.emit(Op::PopTop);
                    self.emit(Op::Call {
                        func: "sqrt".to_owned(),
                        nargs: 1,
                    });
                } else {
                    self.emit(Op::Call {
                        func: "pow".to_owned(),
                        nargs: 2,
                    });
                }
            }
            SourceOp::CompareOp => {
                let idx = self.next() as usize;
                let cmp = *CMP_TABLE.get(idx).ok_or_else(|| {
                    ShaderError::dialect("comparison not supported in shaders")
                })?;
                self.pop()?;
                self.pop()?;
                self.stack.push(Tag::Value);
                self.emit(Op::Compare(cmp));
            }
            SourceOp::BinarySubscr => {
                self.next();
                self.pop()?;
                self.pop()?;
                self.stack.push(Tag::Value);
                self.emit(Op::LoadIndex);
            }
            SourceOp::StoreSubscr => {
                self.next();
                self.pop()?;
                self.pop()?;
                self.pop()?;
                self.emit(Op::StoreIndex);
            }
            SourceOp::BuildTuple => {
                return Err(ShaderError::dialect("tuples are not supported in shaders"));
            }
            SourceOp::BuildList => {
                let n = self.next();
                self.popn(n as usize)?;
                self.stack.push(Tag::Value);
                self.emit(Op::LoadArray(n as u32));
            }
            SourceOp::BuildMap => {
                return Err(ShaderError::dialect("dicts are not supported in shaders"));
            }
            SourceOp::LoadConst => {
                let idx = self.next() as usize;
                let value = self
                    .func
                    .consts
                    .get(idx)
                    .ok_or_else(|| ShaderError::dialect("constant index out of range"))?
                    .clone();
                match value {
                    ConstVal::None => self.stack.push(Tag::Const(ConstVal::None)),
                    v => {
                        self.emit(Op::LoadConstant(v.clone()));
                        self.stack.push(Tag::Const(v));
                    }
                }
            }
            SourceOp::LoadFast => {
                let idx = self.next();
                let name = self.varname(idx)?;
                let qualified = self.qualify(name);
                self.emit(Op::LoadName(qualified.clone()));
                self.stack.push(Tag::Name(qualified));
            }
            SourceOp::StoreFast => {
                let idx = self.next();
                let name = self.varname(idx)?;
                self.pop()?;
                let qualified = self.qualify(name);
                self.emit(Op::StoreName(qualified));
            }
            SourceOp::LoadGlobal => {
                let idx = self.next();
                let name = self.name(idx)?;
                if resolve_name(name).is_some() {
                    self.stack.push(Tag::TypeName(name.to_owned()));
                } else {
                    // The dot marks a global; it resolves at attribute access
                    // or call time.
                    self.stack.push(Tag::Global(format!(".{}", name)));
                }
            }
            SourceOp::LoadAttr => self.load_attr()?,
            SourceOp::LoadMethod => {
                let top = self.pop()?;
                self.stack.push(top.clone());
                self.stack.push(top);
                self.load_attr()?;
            }
            SourceOp::StoreAttr => {
                let idx = self.next();
                let name = self.name(idx)?;
                return Err(ShaderError::dialect(format!(
                    "cannot store attribute '{}'",
                    name
                )));
            }
            SourceOp::LoadDeref => {
                return Err(ShaderError::dialect(
                    "shaders cannot capture enclosing scopes",
                ));
            }
            SourceOp::CallFunction => {
                let nargs = self.next() as usize;
                let args = self.popn(nargs)?;
                let func = self.pop()?;
                self.call_function(func, args)?;
            }
            SourceOp::CallMethod => {
                let nargs = self.next() as usize;
                let args = self.popn(nargs)?;
                let func = self.pop()?;
                self.pop()?;
                if !matches!(func, Tag::TexFunc(_) | Tag::Global(_)) {
                    return Err(ShaderError::dialect("method call on a non-method"));
                }
                self.call_function(func, args)?;
            }
            SourceOp::ReturnValue => {
                self.next();
                let value = self.pop()?;
                if value != Tag::Const(ConstVal::None) {
                    return Err(ShaderError::dialect("shaders cannot return a value"));
                }
                if self.pointer != self.func.code.len() {
                    self.emit(Op::Return);
                }
            }
            SourceOp::JumpAbsolute => {
                let target = self.next() as usize;
                let label = self.get_label(target);
                if label.starts_with("Lm") && self.ops.last() == Some(&Op::PopTop) {
                    // A break also pops the exhausted iterator; the iterator
                    // never exists here, so neither does the pop.
                    self.ops.pop();
                }
                self.emit(Op::Branch(label));
            }
            SourceOp::JumpForward => {
                let delta = self.next() as usize;
                let target = self.pointer + delta;
                if self.last_is_branch() {
                    // Fall-through jump after a terminator; nothing can
                    // reach it.
                    return Ok(());
                }
                let label = self.get_label(target);
                self.emit(Op::Branch(label));
            }
            SourceOp::PopJumpIfFalse => {
                let target = self.next() as usize;
                self.pop()?;
                let true_label = self.get_label(self.pointer);
                let false_label = self.get_label(target);
                self.emit(Op::BranchConditional {
                    true_label,
                    false_label,
                });
            }
            SourceOp::PopJumpIfTrue => {
                let target = self.next() as usize;
                self.pop()?;
                let true_label = self.get_label(target);
                let false_label = self.get_label(self.pointer);
                self.emit(Op::BranchConditional {
                    true_label,
                    false_label,
                });
            }
            SourceOp::JumpIfTrueOrPop | SourceOp::JumpIfFalseOrPop => {
                return Err(ShaderError::dialect(
                    "implicit truth-value conversion is not supported; use `x if y else z`",
                ));
            }
            SourceOp::GetIter => {
                self.next();
                let func = self.pop()?;
                if func != Tag::Range {
                    return Err(ShaderError::dialect("can only loop over range()"));
                }
                self.stack.push(Tag::Range);
            }
            SourceOp::ForIter => {
                let delta = self.next() as usize;
                let target = self.pointer + delta;
                let here = self.pointer - 2;
                let info = self
                    .loop_stack
                    .last()
                    .ok_or_else(|| ShaderError::dialect("for-iter outside of a loop"))?;
                if here != info.start || (target != info.end && target + 2 != info.end) {
                    return Err(ShaderError::dialect("inconsistent for-loop layout"));
                }
                let iter_name = info.iter_name.clone();
                let next_op = self.next();
                let next_val = self.next();
                if SourceOp::from_u8(next_op) != Some(SourceOp::StoreFast)
                    || Some(self.varname(next_val)?) != iter_name.as_deref()
                {
                    return Err(ShaderError::dialect("inconsistent for-loop layout"));
                }
            }
            SourceOp::SetupLoop => {
                self.next();
                if self.pending_loops.is_empty() {
                    return Err(ShaderError::dialect("loop setup without a loop"));
                }
            }
            SourceOp::PopBlock => {
                // Covered by the loop bookkeeping.
                self.next();
            }
            SourceOp::BreakLoop => {
                self.next();
                let merge = self
                    .loop_stack
                    .last()
                    .ok_or_else(|| ShaderError::dialect("break outside of a loop"))?
                    .merge
                    .clone();
                self.emit(Op::Branch(merge));
            }
        }
        Ok(())
    }

    fn qualify(&self, name: &str) -> String {
        match self.resource_kinds.get(name) {
            Some(kind) => format!("{}.{}", kind, name),
            None => name.to_owned(),
        }
    }

    fn binary(&mut self, op: BinOp) -> Result<()> {
        self.next();
        self.pop()?;
        self.pop()?;
        self.stack.push(Tag::Value);
        self.emit(Op::BinaryOp(op));
        Ok(())
    }

    fn load_attr(&mut self) -> Result<()> {
        let idx = self.next();
        let name = self.name(idx)?.to_owned();
        let ob = self.pop()?;
        match ob {
            Tag::Global(g) => {
                if g == ".math" {
                    if let Some((_, value)) =
                        MATH_CONSTANTS.iter().find(|(n, _)| *n == name.as_str())
                    {
                        self.emit(Op::LoadConstant(ConstVal::Float(*value)));
                        self.stack.push(Tag::Value);
                        return Ok(());
                    }
                }
                self.stack.push(Tag::Global(format!("{}.{}", g, name)));
            }
            Tag::Name(n) if n.starts_with("texture.") => {
                self.stack.push(Tag::Name(n));
                self.stack.push(Tag::TexFunc(format!("texture.{}", name)));
            }
            _ => {
                self.emit(Op::LoadAttr(name));
                self.stack.push(Tag::Value);
            }
        }
        Ok(())
    }

    fn call_function(&mut self, func: Tag, args: Vec<Tag>) -> Result<()> {
        let nargs = args.len() as u32;
        match func {
            Tag::TexFunc(f) => {
                // Method-call sugar: the texture itself is the leading
                // argument.
                let ob = self.pop()?;
                if !matches!(&ob, Tag::Name(n) if n.starts_with("texture.")) {
                    return Err(ShaderError::dialect("texture method call on a non-texture"));
                }
                self.emit(Op::Call {
                    func: f,
                    nargs: nargs + 1,
                });
                self.stack.push(Tag::Value);
            }
            Tag::TypeName(t) => {
                let head = t.split('(').next().unwrap_or("");
                let is_bare_abstract =
                    !t.contains('(') && matches!(resolve_name(head), Some(TypeName::Abstract(_)));
                if is_bare_abstract {
                    // Building a type descriptor, not calling anything; the
                    // arguments live on the translator's stack only.
                    let rendered = args
                        .iter()
                        .map(|arg| match arg {
                            Tag::TypeName(s) => Ok(s.clone()),
                            Tag::Const(ConstVal::Int(i)) => Ok(i.to_string()),
                            _ => Err(ShaderError::dialect(format!(
                                "type constructor {} takes types and integer constants",
                                t
                            ))),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    self.stack
                        .push(Tag::TypeName(format!("{}({})", t, rendered.join(","))));
                } else {
                    self.emit(Op::Call { func: t, nargs });
                    self.stack.push(Tag::Value);
                }
            }
            Tag::Global(g) => {
                if g == ".range" {
                    self.call_range(args)?;
                } else {
                    let rest = &g[1..];
                    let dots = rest.matches('.').count();
                    let known_family = rest.starts_with("stdlib.")
                        || rest.starts_with("math.")
                        || rest.starts_with("texture.");
                    if dots == 0 || known_family {
                        self.emit(Op::Call {
                            func: rest.to_owned(),
                            nargs,
                        });
                        self.stack.push(Tag::Value);
                    } else {
                        return Err(ShaderError::dialect(format!(
                            "unknown external function {}",
                            g
                        )));
                    }
                }
            }
            _ => {
                return Err(ShaderError::dialect(
                    "only functions and type constructors can be called in shaders",
                ));
            }
        }
        Ok(())
    }

    fn call_range(&mut self, args: Vec<Tag>) -> Result<()> {
        let next_is_iter = self
            .peek_at(self.pointer)
            .and_then(SourceOp::from_u8)
            == Some(SourceOp::GetIter)
            && self
                .peek_at(self.pointer + 2)
                .and_then(SourceOp::from_u8)
                == Some(SourceOp::ForIter);
        if !next_is_iter {
            return Err(ShaderError::dialect(
                "range() can only be used as a for-loop iterator",
            ));
        }
        let info = self
            .pending_loops
            .front_mut()
            .ok_or_else(|| ShaderError::dialect("range() without a loop"))?;
        debug_assert_eq!(info.start, self.pointer + 2);
        info.range_is_set = true;
        match args.len() {
            1 => {
                self.emit(Op::LoadConstant(ConstVal::Int(0)));
                self.emit(Op::RotTwo);
                self.emit(Op::LoadConstant(ConstVal::Int(1)));
            }
            2 => {
                self.emit(Op::LoadConstant(ConstVal::Int(1)));
            }
            3 => match args[2] {
                Tag::Const(ConstVal::Int(step)) if step > 0 => {}
                _ => {
                    return Err(ShaderError::dialect(
                        "range() step must be a constant integer > 0",
                    ));
                }
            },
            _ => {
                return Err(ShaderError::dialect("range() takes 1, 2 or 3 arguments"));
            }
        }
        self.stack.push(Tag::Range);
        Ok(())
    }

    /// Emit the scaffolding that opens a loop, right before its first source
    /// instruction is processed.
    fn start_loop(&mut self, mut info: LoopInfo) -> Result<()> {
        match info.kind {
            LoopKind::For => {
                if !info.range_is_set {
                    return Err(ShaderError::dialect("shader for-loops must use range()"));
                }
                // The iterator variable name sits behind the for-iter op.
                let store_idx = self
                    .peek_at(self.pointer + 3)
                    .ok_or_else(|| ShaderError::dialect("truncated for-loop"))?;
                let iter_name = self.varname(store_idx)?.to_owned();
                info.iter_name = Some(iter_name.clone());

                // Block zero: persist the three range values and seed the
                // iteration variable.
                self.emit(Op::StoreName(format!("{}-step", iter_name)));
                self.emit(Op::StoreName(format!("{}-stop", iter_name)));
                self.emit(Op::StoreName(format!("{}-start", iter_name)));
                self.emit(Op::LoadName(format!("{}-start", iter_name)));
                self.emit(Op::StoreName(iter_name.clone()));
                self.emit(Op::Branch(info.header.clone()));
                // Header block carries the loop merge declaration.
                self.emit(Op::Label(info.header.clone()));
                self.emit(Op::BranchLoop {
                    iter: info.iter.clone(),
                    cont: info.cont.clone(),
                    merge: info.merge.clone(),
                });
                // Iter block decides whether another round runs.
                self.emit(Op::Label(info.iter.clone()));
                self.emit(Op::LoadName(iter_name.clone()));
                self.emit(Op::LoadName(format!("{}-stop", iter_name)));
                self.emit(Op::Compare(CmpOp::Lt));
                self.emit(Op::BranchConditional {
                    true_label: info.body.clone(),
                    false_label: info.merge.clone(),
                });
                self.emit(Op::Label(info.body.clone()));
            }
            LoopKind::While => {
                self.emit(Op::Branch(info.header.clone()));
                self.emit(Op::Label(info.header.clone()));
                self.emit(Op::BranchLoop {
                    iter: info.iter.clone(),
                    cont: info.cont.clone(),
                    merge: info.merge.clone(),
                });
                self.emit(Op::Label(info.iter.clone()));
                if info.first_jump_is_to_end {
                    // The loop's own condition already exits to the merge
                    // block; its conditional jump ends the iter block and the
                    // pre-registered body label opens the body.
                } else {
                    self.emit(Op::LoadConstant(ConstVal::Bool(true)));
                    self.emit(Op::BranchConditional {
                        true_label: info.body.clone(),
                        false_label: info.merge.clone(),
                    });
                    self.emit(Op::Label(info.body.clone()));
                }
            }
        }
        self.loop_stack.push(info);
        Ok(())
    }

    /// Emit the blocks that close the innermost loop, right before the first
    /// instruction after it.
    fn end_loop(&mut self) {
        let info = self.loop_stack.pop().expect("loop end without a loop");
        match info.kind {
            LoopKind::For => {
                let iter_name = info.iter_name.clone().expect("for-loop without iterator");
                self.emit(Op::Label(info.cont.clone()));
                self.emit(Op::LoadName(iter_name.clone()));
                self.emit(Op::LoadName(format!("{}-step", iter_name)));
                self.emit(Op::BinaryOp(BinOp::Add));
                self.emit(Op::StoreName(iter_name));
                self.emit(Op::Branch(info.header.clone()));
                self.emit(Op::Label(info.merge));
            }
            LoopKind::While => {
                self.emit(Op::Label(info.cont.clone()));
                self.emit(Op::Branch(info.header.clone()));
                self.emit(Op::Label(info.merge));
            }
        }
    }
}
