//! The source stack-machine dialect.
//!
//! A shader description reaches the compiler as a [`FuncCode`]: a flat byte
//! stream of `(opcode, arg)` pairs with side tables for constants and names,
//! plus one resource annotation per function argument. Jump targets are byte
//! addresses, which is what lets the loop pre-scanner recognize loops from
//! backward jumps alone.
use fnv::FnvHashMap as HashMap;

use shadec_core::nsb::{CmpOp, ConstVal, ResourceKind, Slot};

macro_rules! declr_source_ops {
    ($($name:ident = $val:expr,)+) => {
        /// Closed alphabet of source instructions.
        #[repr(u8)]
        #[derive(Clone, Copy, PartialEq, Eq, Debug)]
        pub enum SourceOp {
            $($name = $val,)+
        }
        impl SourceOp {
            pub fn from_u8(x: u8) -> Option<SourceOp> {
                match x {
                    $($val => Some(SourceOp::$name),)+
                    _ => None,
                }
            }
        }
    }
}

declr_source_ops! {
    PopTop = 1,
    RotTwo = 2,
    DupTop = 3,
    UnaryNegative = 4,
    UnaryNot = 5,
    BinaryAdd = 6,
    BinarySubtract = 7,
    BinaryMultiply = 8,
    BinaryTrueDivide = 9,
    BinaryFloorDivide = 10,
    BinaryModulo = 11,
    BinaryPower = 12,
    CompareOp = 13,
    BinarySubscr = 14,
    StoreSubscr = 15,
    BuildTuple = 16,
    BuildList = 17,
    BuildMap = 18,
    LoadConst = 19,
    LoadFast = 20,
    StoreFast = 21,
    LoadGlobal = 22,
    LoadAttr = 23,
    LoadMethod = 24,
    StoreAttr = 25,
    LoadDeref = 26,
    CallFunction = 27,
    CallMethod = 28,
    ReturnValue = 29,
    JumpAbsolute = 30,
    JumpForward = 31,
    PopJumpIfFalse = 32,
    PopJumpIfTrue = 33,
    JumpIfTrueOrPop = 34,
    JumpIfFalseOrPop = 35,
    GetIter = 36,
    ForIter = 37,
    SetupLoop = 38,
    PopBlock = 39,
    BreakLoop = 40,
}

/// Comparison selectors in the order `CompareOp`'s argument indexes them.
pub const CMP_TABLE: [CmpOp; 6] = [
    CmpOp::Lt,
    CmpOp::Le,
    CmpOp::Eq,
    CmpOp::Ne,
    CmpOp::Gt,
    CmpOp::Ge,
];

/// Resource annotation of one function argument.
#[derive(Clone, PartialEq, Debug)]
pub struct ResourceDecl {
    pub kind: ResourceKind,
    pub slot: Slot,
    pub typename: String,
}

/// A source function: instruction stream plus side tables.
#[derive(Clone, PartialEq, Debug)]
pub struct FuncCode {
    /// Function name; its lowercased form names the shader stage.
    pub name: String,
    /// `(opcode, arg)` byte pairs.
    pub code: Vec<u8>,
    pub consts: Vec<ConstVal>,
    /// Local variable names; arguments come first.
    pub varnames: Vec<String>,
    /// Global and attribute names.
    pub names: Vec<String>,
    /// Annotated arguments, in order.
    pub args: Vec<(String, ResourceDecl)>,
}

/// Assembles a [`FuncCode`] with named labels and forward patching.
///
/// This is how hosts (and the test suite) author programs; misuse such as an
/// unplaced label is a caller bug and panics in `build`.
pub struct CodeBuilder {
    name: String,
    code: Vec<u8>,
    consts: Vec<ConstVal>,
    varnames: Vec<String>,
    names: Vec<String>,
    args: Vec<(String, ResourceDecl)>,
    placed: HashMap<usize, usize>,
    fixups: Vec<Fixup>,
    next_label: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Label(usize);

struct Fixup {
    /// Byte position of the argument to patch.
    arg_pos: usize,
    label: Label,
    relative: bool,
}

impl CodeBuilder {
    pub fn new(name: &str) -> Self {
        CodeBuilder {
            name: name.to_owned(),
            code: Vec::new(),
            consts: Vec::new(),
            varnames: Vec::new(),
            names: Vec::new(),
            args: Vec::new(),
            placed: HashMap::default(),
            fixups: Vec::new(),
            next_label: 0,
        }
    }

    /// Declare the next function argument with its resource annotation.
    pub fn arg(&mut self, name: &str, kind: ResourceKind, slot: Slot, typename: &str) -> &mut Self {
        assert_eq!(
            self.args.len(),
            self.varnames.len(),
            "declare arguments before emitting code"
        );
        self.varnames.push(name.to_owned());
        self.args.push((
            name.to_owned(),
            ResourceDecl {
                kind,
                slot,
                typename: typename.to_owned(),
            },
        ));
        self
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind `label` to the current address.
    pub fn place(&mut self, label: Label) -> &mut Self {
        let old = self.placed.insert(label.0, self.code.len());
        assert!(old.is_none(), "label placed twice");
        self
    }

    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn op(&mut self, op: SourceOp) -> &mut Self {
        self.op_arg(op, 0)
    }
    pub fn op_arg(&mut self, op: SourceOp, arg: u8) -> &mut Self {
        self.code.push(op as u8);
        self.code.push(arg);
        self
    }

    /// Emit any jump op with an absolute target; the named helpers below
    /// cover the common ones.
    pub fn op_jump(&mut self, op: SourceOp, label: Label) -> &mut Self {
        self.jump(op, label, false)
    }

    fn jump(&mut self, op: SourceOp, label: Label, relative: bool) -> &mut Self {
        self.code.push(op as u8);
        self.fixups.push(Fixup {
            arg_pos: self.code.len(),
            label,
            relative,
        });
        self.code.push(0);
        self
    }

    pub fn jump_absolute(&mut self, label: Label) -> &mut Self {
        self.jump(SourceOp::JumpAbsolute, label, false)
    }
    pub fn jump_forward(&mut self, label: Label) -> &mut Self {
        self.jump(SourceOp::JumpForward, label, true)
    }
    pub fn pop_jump_if_false(&mut self, label: Label) -> &mut Self {
        self.jump(SourceOp::PopJumpIfFalse, label, false)
    }
    pub fn pop_jump_if_true(&mut self, label: Label) -> &mut Self {
        self.jump(SourceOp::PopJumpIfTrue, label, false)
    }
    pub fn for_iter(&mut self, label: Label) -> &mut Self {
        self.jump(SourceOp::ForIter, label, true)
    }

    fn const_index(&mut self, v: ConstVal) -> u8 {
        let idx = match self.consts.iter().position(|x| *x == v) {
            Some(idx) => idx,
            None => {
                self.consts.push(v);
                self.consts.len() - 1
            }
        };
        idx as u8
    }
    fn varname_index(&mut self, name: &str) -> u8 {
        index_of(&mut self.varnames, name)
    }
    fn name_index(&mut self, name: &str) -> u8 {
        index_of(&mut self.names, name)
    }

    pub fn load_const(&mut self, v: impl Into<ConstVal>) -> &mut Self {
        let idx = self.const_index(v.into());
        self.op_arg(SourceOp::LoadConst, idx)
    }
    pub fn load_none(&mut self) -> &mut Self {
        let idx = self.const_index(ConstVal::None);
        self.op_arg(SourceOp::LoadConst, idx)
    }
    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let idx = self.varname_index(name);
        self.op_arg(SourceOp::LoadFast, idx)
    }
    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        let idx = self.varname_index(name);
        self.op_arg(SourceOp::StoreFast, idx)
    }
    pub fn load_global(&mut self, name: &str) -> &mut Self {
        let idx = self.name_index(name);
        self.op_arg(SourceOp::LoadGlobal, idx)
    }
    pub fn load_attr(&mut self, name: &str) -> &mut Self {
        let idx = self.name_index(name);
        self.op_arg(SourceOp::LoadAttr, idx)
    }
    pub fn load_method(&mut self, name: &str) -> &mut Self {
        let idx = self.name_index(name);
        self.op_arg(SourceOp::LoadMethod, idx)
    }
    pub fn compare(&mut self, cmp: CmpOp) -> &mut Self {
        let idx = CMP_TABLE.iter().position(|x| *x == cmp).unwrap();
        self.op_arg(SourceOp::CompareOp, idx as u8)
    }
    pub fn call_function(&mut self, nargs: u8) -> &mut Self {
        self.op_arg(SourceOp::CallFunction, nargs)
    }
    pub fn call_method(&mut self, nargs: u8) -> &mut Self {
        self.op_arg(SourceOp::CallMethod, nargs)
    }
    pub fn build_list(&mut self, n: u8) -> &mut Self {
        self.op_arg(SourceOp::BuildList, n)
    }

    /// The closing `LOAD_CONST None; RETURN_VALUE` every function ends with.
    pub fn return_none(&mut self) -> &mut Self {
        self.load_none();
        self.op(SourceOp::ReturnValue)
    }

    pub fn build(mut self) -> FuncCode {
        for fixup in &self.fixups {
            let target = *self
                .placed
                .get(&fixup.label.0)
                .expect("jump to a label that was never placed");
            let value = if fixup.relative {
                target
                    .checked_sub(fixup.arg_pos + 1)
                    .expect("forward jump to an earlier address")
            } else {
                target
            };
            assert!(value < 256, "function too large for one-byte jump targets");
            self.code[fixup.arg_pos] = value as u8;
        }
        FuncCode {
            name: self.name,
            code: self.code,
            consts: self.consts,
            varnames: self.varnames,
            names: self.names,
            args: self.args,
        }
    }
}

fn index_of(table: &mut Vec<String>, name: &str) -> u8 {
    let idx = match table.iter().position(|x| x == name) {
        Some(idx) => idx,
        None => {
            table.push(name.to_owned());
            table.len() - 1
        }
    };
    idx as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_patches_jumps() {
        let mut b = CodeBuilder::new("fragment_noop");
        let skip = b.new_label();
        b.load_const(true);
        b.pop_jump_if_false(skip);
        b.load_const(1.0).op(SourceOp::PopTop);
        b.place(skip);
        b.return_none();
        let code = b.build();
        // PopJumpIfFalse at byte 2 targets the address bound to `skip`.
        assert_eq!(code.code[2], SourceOp::PopJumpIfFalse as u8);
        assert_eq!(code.code[3], 8);
        assert_eq!(code.consts.len(), 3);
    }
}
