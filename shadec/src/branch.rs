//! Structured-CFG reconstruction.
//!
//! The target requires every selection to declare, at its point of
//! divergence, the block where its two sides reconverge. Divergence points
//! are only known to reconverge when both sides reach the same label, so the
//! tracker keeps a binary tree of open branches and patches the merge words
//! retroactively through [`WordHole`]s. An N-way convergence is linearized
//! into a chain of binary merges through freshly inserted hop blocks.
use fnv::FnvHashMap as HashMap;
use spirv::Op;

use shadec_core::emit::{InstrBuilder, ModuleBuilder, WordHole};
use shadec_core::error::{Result, ShaderError};

/// Label-name to label-id mapping, allocating on first use.
#[derive(Default)]
pub struct LabelIds {
    map: HashMap<String, u32>,
}
impl LabelIds {
    pub fn id(&mut self, b: &mut ModuleBuilder, label: &str) -> u32 {
        if let Some(id) = self.map.get(label) {
            return *id;
        }
        let id = b.alloc_id();
        self.map.insert(label.to_owned(), id);
        id
    }
}

struct Node {
    parent: Option<usize>,
    depth: u32,
    label: String,
    children: Option<(usize, usize)>,
    /// Target word of the last branch this node emitted.
    branch_hole: Option<WordHole>,
    /// Merge word of the selection this node opened.
    merge_hole: Option<WordHole>,
}

pub struct BranchTracker {
    nodes: Vec<Node>,
    current: usize,
}

impl BranchTracker {
    pub fn new() -> Self {
        BranchTracker {
            nodes: vec![Node {
                parent: None,
                depth: 0,
                label: String::new(),
                children: None,
                branch_hole: None,
                merge_hole: None,
            }],
            current: 0,
        }
    }

    pub fn at_root(&self) -> bool {
        self.current == 0
    }

    pub fn current_label(&self) -> &str {
        &self.nodes[self.current].label
    }
    pub fn set_current_label(&mut self, label: &str) {
        self.nodes[self.current].label = label.to_owned();
    }
    pub fn set_current_branch_hole(&mut self, hole: WordHole) {
        self.nodes[self.current].branch_hole = Some(hole);
    }

    /// Open a selection: the current node becomes the parent of two fresh
    /// leaves and owns the selection's merge word.
    pub fn split(
        &mut self,
        true_label: &str,
        false_label: &str,
        true_hole: WordHole,
        false_hole: WordHole,
        merge_hole: WordHole,
    ) {
        let parent = self.current;
        let depth = self.nodes[parent].depth + 1;
        let c1 = self.push_node(parent, depth, true_label, true_hole);
        let c2 = self.push_node(parent, depth, false_label, false_hole);
        self.nodes[parent].children = Some((c1, c2));
        self.nodes[parent].merge_hole = Some(merge_hole);
    }

    fn push_node(&mut self, parent: usize, depth: u32, label: &str, hole: WordHole) -> usize {
        self.nodes.push(Node {
            parent: Some(parent),
            depth,
            label: label.to_owned(),
            children: None,
            branch_hole: Some(hole),
            merge_hole: None,
        });
        self.nodes.len() - 1
    }

    /// Live leaves currently standing at `label`.
    fn leaves_with_label(&self, label: &str) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            match self.nodes[idx].children {
                Some((c1, c2)) => {
                    // Collect left before right.
                    stack.push(c2);
                    stack.push(c1);
                }
                None => {
                    if self.nodes[idx].label == label {
                        out.push(idx);
                    }
                }
            }
        }
        out
    }

    /// Enter the block `label`, merging every branch pair that converged on
    /// it. Multiple pairs merge through a chain of hop blocks, deepest
    /// first, so each selection keeps a merge block of its own.
    pub fn on_label(
        &mut self,
        label: &str,
        b: &mut ModuleBuilder,
        labels: &mut LabelIds,
    ) -> Result<()> {
        let mut leaves = self.leaves_with_label(label);
        let mut merged: Vec<usize> = Vec::new();
        loop {
            leaves.sort_by_key(|&idx| std::cmp::Reverse(self.nodes[idx].depth));
            let candidate = leaves.iter().find_map(|&leaf| {
                let parent = self.nodes[leaf].parent?;
                let (c1, c2) = self.nodes[parent].children?;
                if self.nodes[c1].label == self.nodes[c2].label {
                    Some((parent, c1, c2))
                } else {
                    None
                }
            });
            let (parent, c1, c2) = match candidate {
                Some(x) => x,
                None => break,
            };
            let merged_label = self.nodes[c1].label.clone();
            self.nodes[parent].label = merged_label;
            leaves.retain(|&x| x != c1 && x != c2);
            leaves.push(parent);
            merged.push(parent);
        }

        if leaves.len() != 1 {
            return Err(ShaderError::structural(format!(
                "block '{}' should start with exactly one open branch, found {}",
                label,
                leaves.len()
            )));
        }
        self.current = leaves[0];

        // One hop label per extra merge, chained into the real label.
        let main_id = labels.id(b, label);
        let mut hop_ids = vec![main_id];
        while hop_ids.len() < merged.len() {
            let hop = labels.id(b, &format!("{}-hop-{}", label, hop_ids.len()));
            let last = hop_ids.len() - 1;
            hop_ids.insert(last, hop);
        }

        for (i, &parent) in merged.iter().enumerate() {
            let label_id = hop_ids[i];
            if i + 1 < hop_ids.len() {
                let hole = WordHole::new(hop_ids[i + 1]);
                self.nodes[parent].branch_hole = Some(hole.clone());
                b.push_func(InstrBuilder::new(Op::Label).push(label_id).build());
                b.push_func(InstrBuilder::new(Op::Branch).push_hole(&hole).build());
            }
            let (c1, c2) = self.nodes[parent].children.expect("merged node has children");
            for &child in [c1, c2].iter() {
                if let Some(hole) = &self.nodes[child].branch_hole {
                    hole.set(label_id);
                }
            }
            if let Some(hole) = &self.nodes[parent].merge_hole {
                hole.set(label_id);
            }
        }

        b.push_func(InstrBuilder::new(Op::Label).push(main_id).build());

        for &parent in &merged {
            self.nodes[parent].children = None;
        }
        Ok(())
    }
}
