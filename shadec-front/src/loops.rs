//! Loop pre-scanner.
//!
//! Loops show up in the source stream as backward jumps. One pass over the
//! stream finds every loop start, sizes each loop, and fixes the label plan
//! the translator will weave the loop scaffolding around.
use std::collections::BTreeMap;

use fnv::FnvHashMap as HashMap;
use fnv::FnvHashSet as HashSet;

use crate::code::SourceOp;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LoopKind {
    For,
    While,
}

#[derive(Clone, Debug)]
pub struct LoopInfo {
    pub kind: LoopKind,
    /// Source range `[start, end)` of the loop in bytes.
    pub start: usize,
    pub end: usize,
    /// Whether the first forward conditional after `start` exits the loop.
    /// When it does, the condition doubles as the iter block and the body
    /// label is attached to the jump's fall-through address.
    pub first_jump_is_to_end: bool,
    pub header: String,
    pub iter: String,
    pub cont: String,
    pub body: String,
    pub merge: String,
    /// Source jump targets that must reroute to loop labels.
    pub labelmap: HashMap<usize, String>,
    /// Fall-through address of the first exiting jump, where the body starts.
    pub body_target: Option<usize>,
    /// Set once the `range` call feeding a for-loop has been seen.
    pub range_is_set: bool,
    pub iter_name: Option<String>,
}

/// Everything the pre-scan hands to the translator.
#[derive(Default, Debug)]
pub struct LoopScan {
    /// Loop records in the order their starts are encountered.
    pub loops: Vec<LoopInfo>,
    /// Addresses that never auto-emit a label.
    pub protected_addrs: HashSet<usize>,
    /// Labels the empty-block collapser must not eliminate.
    pub protected_names: HashSet<String>,
    /// Pre-registered labels (while-loop body entries).
    pub labels: HashMap<usize, String>,
}

/// Collect every jump in the stream, keyed by instruction address.
fn collect_jumps(code: &[u8]) -> BTreeMap<usize, usize> {
    let mut jumps = BTreeMap::new();
    let mut i = 0;
    while i + 1 < code.len() {
        match SourceOp::from_u8(code[i]) {
            Some(SourceOp::JumpForward) => {
                jumps.insert(i, i + 2 + code[i + 1] as usize);
            }
            Some(SourceOp::JumpAbsolute)
            | Some(SourceOp::PopJumpIfFalse)
            | Some(SourceOp::PopJumpIfTrue) => {
                jumps.insert(i, code[i + 1] as usize);
            }
            _ => {}
        }
        i += 2;
    }
    jumps
}

pub fn scan(code: &[u8]) -> LoopScan {
    let jumps = collect_jumps(code);

    // A jump whose target is before its own address marks a loop start.
    let mut starts: Vec<usize> = Vec::new();
    for (&i, &target) in &jumps {
        if target < i && !starts.contains(&target) {
            starts.push(target);
        }
    }
    // Process starts in source order; that is the order the translator will
    // encounter them.
    starts.sort_unstable();

    let mut out = LoopScan::default();
    for &start in &starts {
        let info = scan_loop(code, &jumps, &out, start);
        out.protected_addrs.insert(start);
        for end in info.labelmap.keys() {
            if *end != start {
                out.protected_addrs.insert(*end);
            }
        }
        for name in [&info.iter, &info.cont, &info.merge, &info.body].iter() {
            out.protected_names.insert((*name).clone());
        }
        // A while loop whose condition doubles as the iter block gets its
        // body label attached to the fall-through address so the label is
        // auto-emitted; for loops synthesize their body label themselves.
        if info.kind == LoopKind::While && info.first_jump_is_to_end {
            if let Some(body_target) = info.body_target {
                out.labels.insert(body_target, info.body.clone());
            }
        }
        out.loops.push(info);
    }
    out
}

fn scan_loop(
    code: &[u8],
    jumps: &BTreeMap<usize, usize>,
    prev: &LoopScan,
    start: usize,
) -> LoopInfo {
    // Back edges into this start size the loop: the end is two bytes past the
    // last of them, plus two more if a block-pop marker sits there.
    let back_edges: Vec<usize> = jumps
        .iter()
        .filter(|&(&i, &target)| target == start && target < i)
        .map(|(&i, _)| i)
        .collect();
    debug_assert!(!back_edges.is_empty());
    let mut our_ends = vec![back_edges[back_edges.len() - 1] + 2];
    if code.get(our_ends[0]).copied() == Some(SourceOp::PopBlock as u8) {
        our_ends.push(our_ends[0] + 2);
    }
    let mut ends = our_ends.clone();
    for prev_loop in &prev.loops {
        ends.push(prev_loop.start);
        ends.push(prev_loop.end);
    }

    // Decide whether the loop's own first forward jump already exits it.
    let mut first_jump_is_to_end = false;
    let mut body_target = None;
    for (&i, &target) in jumps.iter() {
        if i > start {
            if ends.contains(&target) {
                first_jump_is_to_end = true;
                body_target = Some(i + 2);
            } else if code.get(target).copied() == Some(SourceOp::BreakLoop as u8) {
                first_jump_is_to_end = true;
                body_target = Some(i + 2);
            }
            break;
        }
    }

    let kind = if code.get(start).copied() == Some(SourceOp::ForIter as u8) {
        LoopKind::For
    } else {
        LoopKind::While
    };

    let idx = prev.loops.len() + 1;
    let mut info = LoopInfo {
        kind,
        start,
        end: *our_ends.last().unwrap(),
        first_jump_is_to_end,
        header: format!("Lh{}", idx),
        iter: format!("Li{}", idx),
        cont: format!("Lc{}", idx),
        body: format!("Lb{}", idx),
        merge: format!("Lm{}", idx),
        labelmap: HashMap::default(),
        body_target,
        range_is_set: false,
        iter_name: None,
    };

    // Source jumps to the start become branches to the continue label, and
    // jumps to any end address become branches to the merge label.
    info.labelmap.insert(start, info.cont.clone());
    for &end in &our_ends {
        info.labelmap.insert(end, info.merge.clone());
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{CodeBuilder, SourceOp};
    use shadec_core::nsb::CmpOp;

    #[test]
    fn finds_a_while_loop() {
        // while i < n: i = i + 1
        let mut b = CodeBuilder::new("compute_x");
        let (start, end) = (b.new_label(), b.new_label());
        b.load_const(0i64).store_fast("i");
        b.place(start);
        b.load_fast("i").load_fast("n").compare(CmpOp::Lt);
        b.pop_jump_if_false(end);
        b.load_fast("i").load_const(1i64).op(SourceOp::BinaryAdd);
        b.store_fast("i");
        b.jump_absolute(start);
        b.place(end);
        b.return_none();
        let code = b.build();

        let scan = scan(&code.code);
        assert_eq!(scan.loops.len(), 1);
        let info = &scan.loops[0];
        assert_eq!(info.kind, LoopKind::While);
        assert_eq!(info.start, 4);
        assert!(info.first_jump_is_to_end);
        assert_eq!(info.labelmap.get(&info.start), Some(&"Lc1".to_owned()));
        assert_eq!(info.labelmap.get(&info.end), Some(&"Lm1".to_owned()));
    }
}
