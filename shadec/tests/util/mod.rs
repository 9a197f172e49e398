//! Shared helpers for inspecting compiled modules.
#![allow(dead_code)]
use shadec::SpirvBinary;
use spirv::Op;

/// All instructions as (opcode, operand words).
pub fn instrs(binary: &SpirvBinary) -> Vec<(u32, Vec<u32>)> {
    let mut out = Vec::new();
    let mut walker = binary.instrs().unwrap();
    while let Some(instr) = walker.next().unwrap() {
        out.push((instr.opcode(), instr.operands().to_vec()));
    }
    out
}

pub fn count(instrs: &[(u32, Vec<u32>)], op: Op) -> usize {
    instrs.iter().filter(|(code, _)| *code == op as u32).count()
}

pub fn find_all<'a>(instrs: &'a [(u32, Vec<u32>)], op: Op) -> Vec<&'a Vec<u32>> {
    instrs
        .iter()
        .filter(|(code, _)| *code == op as u32)
        .map(|(_, operands)| operands)
        .collect()
}

/// Check the structured-CFG contract: every conditional branch either sits
/// in a selection (preceded by OpSelectionMerge) or exits the innermost
/// loop (targets its merge block or continue target), and every loop merge
/// declaration is followed by a branch.
pub fn assert_structured(instrs: &[(u32, Vec<u32>)]) {
    let mut loop_targets = Vec::new();
    for operands in find_all(instrs, Op::LoopMerge) {
        loop_targets.push(operands[0]);
        loop_targets.push(operands[1]);
    }
    for (i, (code, operands)) in instrs.iter().enumerate() {
        if *code == Op::BranchConditional as u32 {
            let preceded = i > 0 && instrs[i - 1].0 == Op::SelectionMerge as u32;
            let exits_loop =
                loop_targets.contains(&operands[1]) || loop_targets.contains(&operands[2]);
            assert!(
                preceded || exits_loop,
                "conditional branch at {} has no merge declaration",
                i
            );
        }
        if *code == Op::LoopMerge as u32 {
            let next = instrs.get(i + 1).map(|(code, _)| *code);
            assert!(
                next == Some(Op::Branch as u32) || next == Some(Op::BranchConditional as u32),
                "loop merge at {} is not followed by a branch",
                i
            );
        }
    }
}

/// Ids of f32 OpConstants holding `value`.
pub fn f32_const_ids(instrs: &[(u32, Vec<u32>)], value: f32) -> Vec<u32> {
    let float_tys: Vec<u32> = find_all(instrs, Op::TypeFloat)
        .into_iter()
        .filter(|operands| operands[1] == 32)
        .map(|operands| operands[0])
        .collect();
    find_all(instrs, Op::Constant)
        .into_iter()
        .filter(|operands| float_tys.contains(&operands[0]) && operands[2] == value.to_bits())
        .map(|operands| operands[1])
        .collect()
}

/// Labels of the emitted bytecode, in order.
pub fn nsb_labels(nsb: &[shadec::Op]) -> Vec<String> {
    nsb.iter()
        .filter_map(|op| match op {
            shadec::Op::Label(l) => Some(l.clone()),
            _ => None,
        })
        .collect()
}
