//! Post-passes over freshly translated bytecode.
//!
//! Order matters: empty blocks collapse first, then short-circuit `or`
//! control flow is normalized, then labels are renumbered for deterministic
//! output.
use fnv::FnvHashMap as HashMap;
use fnv::FnvHashSet as HashSet;

use shadec_core::nsb::{BinOp, Op, UnOp};

/// Follow `map` chains from `label` and map the chain's end to `new_label`.
fn set_new_label(map: &mut HashMap<String, String>, label: &str, new_label: String) {
    let mut label = label.to_owned();
    for _ in 0..=map.len() {
        match map.get(&label) {
            Some(next) => label = next.clone(),
            None => break,
        }
    }
    map.insert(label, new_label);
}

/// Rewrite every label reference through `map`, transitively.
fn replace_labels(ops: &mut [Op], mut map: HashMap<String, String>) {
    // Resolve chains up front so each reference rewrites once.
    let keys: Vec<String> = map.keys().cloned().collect();
    for key in keys {
        let mut value = map[&key].clone();
        for _ in 0..=map.len() {
            match map.get(&value) {
                Some(next) => value = next.clone(),
                None => break,
            }
        }
        map.insert(key, value);
    }

    let fix = |label: &mut String| {
        if let Some(new) = map.get(label) {
            *label = new.clone();
        }
    };
    for op in ops.iter_mut() {
        match op {
            Op::Label(l) | Op::Branch(l) => fix(l),
            Op::BranchConditional {
                true_label,
                false_label,
            } => {
                fix(true_label);
                fix(false_label);
            }
            Op::BranchLoop { iter, cont, merge } => {
                fix(iter);
                fix(cont);
                fix(merge);
            }
            _ => {}
        }
    }
}

/// Remove blocks that only branch elsewhere, rerouting references to them.
///
/// The source compiler likes to emit blocks that jump on immediately; some
/// branches go through them and some skip them, which the structured
/// reconstruction downstream cannot merge. Protected labels stay, they are
/// part of loop scaffolding.
pub fn empty_blocks(ops: &mut Vec<Op>, protected: &HashSet<String>) {
    let mut map: HashMap<String, String> = HashMap::default();
    let mut i = ops.len().saturating_sub(1);
    while i > 0 {
        i -= 1;
        let pair = match (&ops[i], &ops[i + 1]) {
            (Op::Label(label), Op::Branch(target)) if !protected.contains(label) => {
                Some((label.clone(), target.clone()))
            }
            _ => None,
        };
        if let Some((label, target)) = pair {
            set_new_label(&mut map, &label, target);
            ops.drain(i..i + 2);
            i = i.min(ops.len().saturating_sub(1));
        }
    }
    replace_labels(ops, map);
}

/// Normalize short-circuit `or` control flow.
///
/// `a or b` in condition position arrives as two conditional branches that
/// share a label, with a single block between them. The target cannot
/// express a block entered along two edges of one selection, so the pair is
/// rewritten into one conditional over the combined condition. Four cases,
/// by which labels coincide.
pub fn or_control_flow(ops: &mut Vec<Op>) {
    while let Some((i_ins, i_label, i_cond)) = find_shared_conditional(ops) {
        let (t1, f1) = conditional_targets(&ops[i_ins]);
        let (t2, f2) = conditional_targets(&ops[i_cond]);

        // The block computing the second condition, without its label and
        // conditional.
        let mut selection: Vec<Op> = ops[i_label + 1..i_cond].to_vec();
        ops.drain(i_label..=i_cond);

        if t1 == t2 {
            // Either true: reaches the shared block.
            selection.push(Op::BinaryOp(BinOp::Or));
            selection.push(Op::BranchConditional {
                true_label: t1,
                false_label: f2,
            });
        } else if t1 == f2 {
            selection.push(Op::UnaryOp(UnOp::Not));
            selection.push(Op::BinaryOp(BinOp::Or));
            selection.push(Op::BranchConditional {
                true_label: t1,
                false_label: t2,
            });
        } else if f1 == t2 {
            selection.insert(0, Op::UnaryOp(UnOp::Not));
            selection.push(Op::BinaryOp(BinOp::Or));
            selection.push(Op::BranchConditional {
                true_label: f1,
                false_label: f2,
            });
        } else if f1 == f2 {
            // Both false: the block is reached when both conditions hold.
            selection.push(Op::BinaryOp(BinOp::And));
            selection.push(Op::UnaryOp(UnOp::Not));
            selection.push(Op::BranchConditional {
                true_label: f1,
                false_label: t2,
            });
        }

        ops.splice(i_ins..i_ins + 1, selection);
    }
}

fn conditional_targets(op: &Op) -> (String, String) {
    match op {
        Op::BranchConditional {
            true_label,
            false_label,
        } => (true_label.clone(), false_label.clone()),
        _ => unreachable!("expected a conditional branch"),
    }
}

/// Find a conditional pair sharing a label with a single block between them.
/// Returns (first conditional, shared block label, second conditional).
fn find_shared_conditional(ops: &[Op]) -> Option<(usize, usize, usize)> {
    let mut conditionals: HashMap<String, (String, usize)> = HashMap::default();
    let mut cur_block = String::new();
    let mut cur_block_i = 0usize;
    for (i, op) in ops.iter().enumerate() {
        match op {
            Op::Label(label) => {
                cur_block = label.clone();
                cur_block_i = i;
            }
            Op::BranchConditional {
                true_label,
                false_label,
            } => {
                for target in [true_label, false_label].iter() {
                    if let Some((other, first_i)) = conditionals.get(*target) {
                        if *other == cur_block {
                            return Some((*first_i, cur_block_i, i));
                        }
                    }
                }
                // Registration may overwrite earlier keys, which is fine:
                // the nearest pair wins.
                conditionals.insert(true_label.clone(), (false_label.clone(), i));
                conditionals.insert(false_label.clone(), (true_label.clone(), i));
            }
            _ => {}
        }
    }
    None
}

/// Renumber auto-generated labels to `L1, L2, ...` in order of first
/// appearance, making the output independent of source addresses.
pub fn consistent_labels(ops: &mut [Op]) {
    let mut map: HashMap<String, String> = HashMap::default();
    let mut count = 0u32;
    for op in ops.iter() {
        if let Op::Label(label) = op {
            if !label.starts_with('L') && !map.contains_key(label) {
                count += 1;
                map.insert(label.clone(), format!("L{}", count));
            }
        }
    }
    replace_labels(ops, map);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cond(t: &str, f: &str) -> Op {
        Op::BranchConditional {
            true_label: t.to_owned(),
            false_label: f.to_owned(),
        }
    }

    #[test]
    fn collapses_empty_blocks_transitively() {
        let mut ops = vec![
            Op::Branch("a".to_owned()),
            Op::Label("a".to_owned()),
            Op::Branch("b".to_owned()),
            Op::Label("b".to_owned()),
            Op::Branch("c".to_owned()),
            Op::Label("c".to_owned()),
            Op::Return,
        ];
        empty_blocks(&mut ops, &HashSet::default());
        assert_eq!(
            ops,
            vec![
                Op::Branch("c".to_owned()),
                Op::Label("c".to_owned()),
                Op::Return,
            ]
        );
    }

    #[test]
    fn protected_blocks_stay() {
        let mut protected = HashSet::default();
        protected.insert("Lc1".to_owned());
        let mut ops = vec![
            Op::Label("Lc1".to_owned()),
            Op::Branch("Lh1".to_owned()),
            Op::Label("Lm1".to_owned()),
        ];
        let before = ops.clone();
        empty_blocks(&mut ops, &protected);
        assert_eq!(ops, before);
    }

    #[test]
    fn or_rewrite_is_idempotent() {
        // `if a or b` shape: both conditionals share their true label.
        let mut ops = vec![
            Op::Compare(shadec_core::nsb::CmpOp::Lt),
            cond("T", "mid"),
            Op::Label("mid".to_owned()),
            Op::Compare(shadec_core::nsb::CmpOp::Gt),
            cond("T", "F"),
            Op::Label("T".to_owned()),
        ];
        or_control_flow(&mut ops);
        let expected = vec![
            Op::Compare(shadec_core::nsb::CmpOp::Lt),
            Op::Compare(shadec_core::nsb::CmpOp::Gt),
            Op::BinaryOp(BinOp::Or),
            cond("T", "F"),
            Op::Label("T".to_owned()),
        ];
        assert_eq!(ops, expected);
        let mut again = ops.clone();
        or_control_flow(&mut again);
        assert_eq!(again, ops);
    }

    #[test]
    fn labels_renumber_in_order_of_appearance() {
        let mut ops = vec![
            Op::Branch("14".to_owned()),
            Op::Label("14".to_owned()),
            Op::Branch("Lm1".to_owned()),
            Op::Label("22".to_owned()),
            Op::Label("Lm1".to_owned()),
        ];
        consistent_labels(&mut ops);
        assert_eq!(
            ops,
            vec![
                Op::Branch("L1".to_owned()),
                Op::Label("L1".to_owned()),
                Op::Branch("Lm1".to_owned()),
                Op::Label("L2".to_owned()),
                Op::Label("Lm1".to_owned()),
            ]
        );
    }
}
