//! Control-flow scenarios: if/elif chains, short-circuit conditions, loops
//! with break and continue. The compiler does not execute shaders, so each
//! scenario pins the emitted structure that carries the documented runtime
//! behavior.
use pretty_assertions::assert_eq;
use spirv::Op as S;

use shadec::nsb::{CmpOp, ResourceKind, Slot};
use shadec::{compile, CodeBuilder, FuncCode, SourceOp};

mod util;
use util::{assert_structured, count, instrs, nsb_labels};

fn compute_args(b: &mut CodeBuilder) {
    b.arg(
        "index",
        ResourceKind::Input,
        Slot::Name("GlobalInvocationId".to_owned()),
        "i32",
    );
    b.arg("data2", ResourceKind::Buffer, Slot::Index(1), "Array(f32)");
}

/// `data2[index] = <value>`
fn store_value(b: &mut CodeBuilder, value: f64) {
    b.load_const(value)
        .load_fast("data2")
        .load_fast("index")
        .op(SourceOp::StoreSubscr);
}

/// Writes 40/41/42/43 into buckets: i<2, i<4, i<8, else. Running it over
/// i in [0,10) yields [40,40,41,41,42,42,42,42,43,43].
fn if_elif_chain() -> FuncCode {
    let mut b = CodeBuilder::new("compute_buckets");
    compute_args(&mut b);
    let (elif1, elif2, els, end) = (b.new_label(), b.new_label(), b.new_label(), b.new_label());

    b.load_fast("index").load_const(2i64).compare(CmpOp::Lt);
    b.pop_jump_if_false(elif1);
    store_value(&mut b, 40.0);
    b.jump_forward(end);

    b.place(elif1);
    b.load_fast("index").load_const(4i64).compare(CmpOp::Lt);
    b.pop_jump_if_false(elif2);
    store_value(&mut b, 41.0);
    b.jump_forward(end);

    b.place(elif2);
    b.load_fast("index").load_const(8i64).compare(CmpOp::Lt);
    b.pop_jump_if_false(els);
    store_value(&mut b, 42.0);
    b.jump_forward(end);

    b.place(els);
    store_value(&mut b, 43.0);

    b.place(end);
    b.return_none();
    b.build()
}

/// `if i<2 or i>7 or i==4: 40 elif i>3 and i<6: 41 else: 43`, which over
/// [0,10) yields [40,40,43,43,40,41,43,43,40,40].
fn or_and_chain() -> FuncCode {
    let mut b = CodeBuilder::new("compute_or_and");
    compute_args(&mut b);
    let (body1, elif, els, end) = (b.new_label(), b.new_label(), b.new_label(), b.new_label());

    b.load_fast("index").load_const(2i64).compare(CmpOp::Lt);
    b.pop_jump_if_true(body1);
    b.load_fast("index").load_const(7i64).compare(CmpOp::Gt);
    b.pop_jump_if_true(body1);
    b.load_fast("index").load_const(4i64).compare(CmpOp::Eq);
    b.pop_jump_if_false(elif);

    b.place(body1);
    store_value(&mut b, 40.0);
    b.jump_forward(end);

    b.place(elif);
    b.load_fast("index").load_const(3i64).compare(CmpOp::Gt);
    b.pop_jump_if_false(els);
    b.load_fast("index").load_const(6i64).compare(CmpOp::Lt);
    b.pop_jump_if_false(els);
    store_value(&mut b, 41.0);
    b.jump_forward(end);

    b.place(els);
    store_value(&mut b, 43.0);

    b.place(end);
    b.return_none();
    b.build()
}

/// `v=0; for i in range(index): if i==7: break; v+=1` then `data2[index]=v`,
/// yielding [0,1,2,3,4,5,6,7,7,7].
fn for_range_with_break() -> FuncCode {
    let mut b = CodeBuilder::new("compute_count_to_seven");
    compute_args(&mut b);
    let (loop_start, loop_end, after_if) = (b.new_label(), b.new_label(), b.new_label());

    b.load_const(0.0).store_fast("v");
    b.load_global("range").load_fast("index").call_function(1);
    b.op(SourceOp::GetIter);
    b.place(loop_start);
    b.for_iter(loop_end);
    b.store_fast("i");

    b.load_fast("i").load_const(7i64).compare(CmpOp::Eq);
    b.pop_jump_if_false(after_if);
    b.jump_absolute(loop_end); // break

    b.place(after_if);
    b.load_fast("v").load_const(1.0).op(SourceOp::BinaryAdd);
    b.store_fast("v");
    b.jump_absolute(loop_start);

    b.place(loop_end);
    b.load_fast("v")
        .load_fast("data2")
        .load_fast("index")
        .op(SourceOp::StoreSubscr);
    b.return_none();
    b.build()
}

/// `v=0; i=0; while i<index: if index==4: continue; elif i==7: break;
/// v+=1; i+=1` then `data2[index]=v`, yielding [0,1,2,3,0,5,6,7,7,7].
fn while_with_continue_and_break() -> FuncCode {
    let mut b = CodeBuilder::new("compute_guarded_count");
    compute_args(&mut b);
    let (loop_start, loop_end, elif, after) =
        (b.new_label(), b.new_label(), b.new_label(), b.new_label());

    b.load_const(0.0).store_fast("v");
    b.load_const(0i64).store_fast("i");

    b.place(loop_start);
    b.load_fast("i").load_fast("index").compare(CmpOp::Lt);
    b.pop_jump_if_false(loop_end);

    b.load_fast("index").load_const(4i64).compare(CmpOp::Eq);
    b.pop_jump_if_false(elif);
    b.jump_absolute(loop_start); // continue

    b.place(elif);
    b.load_fast("i").load_const(7i64).compare(CmpOp::Eq);
    b.pop_jump_if_false(after);
    b.jump_absolute(loop_end); // break

    b.place(after);
    b.load_fast("v").load_const(1.0).op(SourceOp::BinaryAdd);
    b.store_fast("v");
    b.load_fast("i").load_const(1i64).op(SourceOp::BinaryAdd);
    b.store_fast("i");
    b.jump_absolute(loop_start);

    b.place(loop_end);
    b.load_fast("v")
        .load_fast("data2")
        .load_fast("index")
        .op(SourceOp::StoreSubscr);
    b.return_none();
    b.build()
}

#[test]
fn compilation_is_deterministic() {
    for func in [
        if_elif_chain(),
        or_and_chain(),
        for_range_with_break(),
        while_with_continue_and_break(),
    ]
    .iter()
    {
        let first = compile(func).unwrap();
        let second = compile(func).unwrap();
        assert_eq!(first.nsb, second.nsb);
        assert_eq!(first.binary, second.binary);
    }
}

#[test]
fn labels_are_canonical() {
    for func in [if_elif_chain(), for_range_with_break()].iter() {
        let module = compile(func).unwrap();
        let plain: Vec<String> = nsb_labels(&module.nsb)
            .into_iter()
            .filter(|l| l[1..].chars().all(|c| c.is_ascii_digit()))
            .collect();
        let expected: Vec<String> = (1..=plain.len()).map(|i| format!("L{}", i)).collect();
        assert_eq!(plain, expected);
    }
}

#[test]
fn if_elif_chain_structure() {
    let module = compile(&if_elif_chain()).unwrap();
    let instrs = instrs(&module.binary);
    assert_structured(&instrs);

    // Three selections, one per conditional; four arms each store once.
    assert_eq!(count(&instrs, S::SelectionMerge), 3);
    assert_eq!(count(&instrs, S::Store), 4);
    // Entry block, seven source blocks, two hop blocks linearizing the
    // three-way reconvergence at the end.
    assert_eq!(count(&instrs, S::Label), 10);
    assert_eq!(count(&instrs, S::SLessThan), 3);
    assert_eq!(count(&instrs, S::Return), 1);
}

#[test]
fn or_and_conditions_normalize() {
    let module = compile(&or_and_chain()).unwrap();

    // The five source conditionals fold into two.
    let conditionals = module
        .nsb
        .iter()
        .filter(|op| matches!(op, shadec::Op::BranchConditional { .. }))
        .count();
    assert_eq!(conditionals, 2);

    let instrs = instrs(&module.binary);
    assert_structured(&instrs);
    assert_eq!(count(&instrs, S::SelectionMerge), 2);
    assert_eq!(count(&instrs, S::LogicalOr), 2);
    assert_eq!(count(&instrs, S::LogicalAnd), 1);
    assert_eq!(count(&instrs, S::LogicalNot), 1);
    assert_eq!(count(&instrs, S::Store), 3);
}

#[test]
fn for_range_with_break_structure() {
    let module = compile(&for_range_with_break()).unwrap();
    let instrs = instrs(&module.binary);
    assert_structured(&instrs);

    assert_eq!(count(&instrs, S::LoopMerge), 1);
    // Both conditionals exit the loop (the iteration bound and the break),
    // so neither opens a selection.
    assert_eq!(count(&instrs, S::SelectionMerge), 0);
    // The counter and the accumulator live in function-local variables.
    let function_vars = util::find_all(&instrs, S::Variable)
        .into_iter()
        .filter(|operands| operands[2] == spirv::StorageClass::Function as u32)
        .count();
    assert_eq!(function_vars, 2);
}

#[test]
fn while_with_continue_and_break_structure() {
    let module = compile(&while_with_continue_and_break()).unwrap();
    let instrs = instrs(&module.binary);
    assert_structured(&instrs);

    assert_eq!(count(&instrs, S::LoopMerge), 1);
    // Condition, continue check and break check all leave the loop
    // construct; no selection merges at all.
    assert_eq!(count(&instrs, S::SelectionMerge), 0);
    assert_eq!(count(&instrs, S::BranchConditional), 3);
}

#[test]
fn loop_scaffolding_shape() {
    // The merge declaration sits in its own header block, and the back
    // edge is the only branch targeting it.
    let module = compile(&for_range_with_break()).unwrap();
    let instrs = instrs(&module.binary);
    let merges = util::find_all(&instrs, S::LoopMerge);
    assert_eq!(merges.len(), 1);

    let header_label = {
        // The label right before the loop merge is the header.
        let pos = instrs
            .iter()
            .position(|(code, _)| *code == S::LoopMerge as u32)
            .unwrap();
        assert_eq!(instrs[pos - 1].0, S::Label as u32);
        instrs[pos - 1].1[0]
    };
    let back_edges = util::find_all(&instrs, S::Branch)
        .into_iter()
        .filter(|operands| operands[0] == header_label)
        .count();
    // One branch enters the header, one jumps back to it.
    assert_eq!(back_edges, 2);
}
