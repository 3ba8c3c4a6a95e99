// Per-node enumeration of isolated SNP bubbles.
//
// A bubble is seeded by mutating the last base of a node to a strictly
// greater letter, then expanded k-1 steps by joint successors. Seeding from
// both orientations of every node covers both strands; the orientation check
// at the end keeps exactly one of the two mirror discoveries. One finder per
// worker: the only shared state it touches is the output.

use anyhow::Result;

use crate::filter::low_complexity_score;
use crate::graph::{Graph, Node, NT_LOWER};
use crate::output::{Sequence, SharedOutput};
use crate::traverse::{self, BranchingTerminator, Direction, Traversal, TraversalKind};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BranchingPolicy {
    /// Reject while either path sits on a branching node.
    Strict,
    /// Reject only when the two paths branch at the same position, in both
    /// orientations.
    NoSymmetric,
    /// Accept everything.
    All,
}

impl BranchingPolicy {
    /// Map the command-line level (0, 1, 2) to a policy.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Strict),
            1 => Some(Self::NoSymmetric),
            2 => Some(Self::All),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FinderConfig {
    pub branching: BranchingPolicy,
    pub traversal: TraversalKind,
    pub threshold: u64,
    /// Also emit bubbles scoring at or above the threshold.
    pub keep_low_complexity: bool,
}

/// Work record for one candidate bubble; owned by a single worker and reused
/// across attempts. Extension codes are 2-bit bases; closures are present
/// only when the corresponding neighbor is unique.
#[derive(Default)]
pub struct Bubble {
    pub begin: [Node; 2],
    pub end: [Node; 2],
    pub extension_left: Vec<u8>,
    pub extension_right: Vec<u8>,
    pub closure_left: Option<u8>,
    pub closure_right: Option<u8>,
    pub divergence_left: usize,
    pub divergence_right: usize,
    /// Bit 0: left closure present. Bit 1: right closure present.
    pub closure_flags: u8,
    pub score: u64,
    pub index: u64,
}

pub struct BubbleFinder<'a> {
    graph: &'a Graph,
    cfg: FinderConfig,
    out: &'a SharedOutput,
    k: usize,
    terminator: BranchingTerminator,
    traversal: Box<dyn Traversal>,
    bubble: Bubble,
}

impl<'a> BubbleFinder<'a> {
    pub fn new(graph: &'a Graph, cfg: FinderConfig, out: &'a SharedOutput) -> Self {
        Self {
            graph,
            cfg,
            out,
            k: graph.kmer_size(),
            terminator: BranchingTerminator::new(),
            traversal: traverse::create(cfg.traversal),
            bubble: Bubble::default(),
        }
    }

    /// Search for bubbles seeded at `node`, on both strands.
    pub fn process(&mut self, node: Node) -> Result<()> {
        self.start(node)?;
        self.start(self.graph.reverse(node))?;
        Ok(())
    }

    /// Seed bubbles whose second path replaces the root's last base with a
    /// strictly greater letter; smaller letters were already tried when the
    /// corresponding mutant was itself the root.
    fn start(&mut self, root: Node) -> Result<()> {
        let mutations = self.graph.mutate(root, self.k - 1, true);
        self.bubble.begin[0] = root;
        for m in mutations {
            self.bubble.begin[1] = m;
            self.expand(1, root, m, None, None)?;
        }
        Ok(())
    }

    fn expand(
        &mut self,
        pos: usize,
        node1: Node,
        node2: Node,
        prev1: Option<Node>,
        prev2: Option<Node>,
    ) -> Result<()> {
        debug_assert!(pos <= self.k - 1);

        if !self.branching_allowed(node1, node2) {
            return Ok(());
        }

        let pairs = self.graph.joint_successors(node1, node2);
        for &(next1, next2) in pairs.iter() {
            // both paths must move to a fresh node
            if !nodes_distinct(prev1, node1, next1) || !nodes_distinct(prev2, node2, next2) {
                continue;
            }

            if pos < self.k - 1 {
                self.expand(pos + 1, next1, next2, Some(node1), Some(node2))?;

                // under the restricted policies the paths cannot branch, so
                // the first surviving pair is the only one worth following
                if self.cfg.branching != BranchingPolicy::All {
                    break;
                }
            } else {
                if !self.branching_allowed(next1, next2) {
                    return Ok(());
                }

                self.bubble.end = [next1, next2];

                if self.canonical_orientation() && self.passes_complexity() && self.extend() {
                    self.emit()?;
                }
            }
        }
        Ok(())
    }

    fn path_branches(&self, n: Node) -> bool {
        self.graph.indegree(n) >= 2 || self.graph.outdegree(n) >= 2
    }

    fn pair_branches(&self, a: Node, b: Node) -> bool {
        self.graph.joint_successors(a, b).len() >= 2
            && self
                .graph
                .joint_successors(self.graph.reverse(a), self.graph.reverse(b))
                .len()
                >= 2
    }

    fn branching_allowed(&self, a: Node, b: Node) -> bool {
        match self.cfg.branching {
            BranchingPolicy::Strict => !(self.path_branches(a) || self.path_branches(b)),
            BranchingPolicy::NoSymmetric => !self.pair_branches(a, b),
            BranchingPolicy::All => true,
        }
    }

    /// Keep only the orientation whose first k-mer sorts below the reverse
    /// complement of its last; the mirror discovery fails this and the
    /// bubble is emitted exactly once.
    fn canonical_orientation(&self) -> bool {
        self.graph.render(self.bubble.begin[0])
            < self.graph.render(self.graph.reverse(self.bubble.end[0]))
    }

    fn passes_complexity(&mut self) -> bool {
        let path1 = self.path_string(0);
        let path2 = self.path_string(1);
        self.bubble.score = low_complexity_score(path1.as_bytes(), path2.as_bytes());
        self.bubble.score < self.cfg.threshold || self.cfg.keep_low_complexity
    }

    /// The 2k-1 characters of path `i`: k-1 from its begin node, k from its
    /// end node.
    fn path_string(&self, i: usize) -> String {
        let begin = self.graph.render(self.bubble.begin[i]);
        let end = self.graph.render(self.bubble.end[i]);
        let mut s = String::with_capacity(2 * self.k - 1);
        s.push_str(&begin[..self.k - 1]);
        s.push_str(&end);
        s
    }

    /// Compute closures and flank extensions. Each side is considered only
    /// when its immediate neighbor is unique; the walker is then launched
    /// from that neighbor outward. Always true; the result is kept for the
    /// caller's gate.
    fn extend(&mut self) -> bool {
        self.bubble.extension_left.clear();
        self.bubble.extension_right.clear();
        self.bubble.closure_left = None;
        self.bubble.closure_right = None;
        self.bubble.divergence_left = 0;
        self.bubble.divergence_right = 0;

        if self.cfg.traversal != TraversalKind::None {
            let predecessors = self.graph.predecessors(self.bubble.begin[0]);
            let successors = self.graph.successors(self.bubble.end[0]);

            // marks survive from the right walk into the left walk so
            // overlapping extensions stop instead of duplicating
            self.terminator.reset();

            if successors.len() == 1 {
                self.bubble.closure_right = Some(self.graph.nt_at(successors[0], self.k - 1));
                self.traversal.traverse(
                    self.graph,
                    &mut self.terminator,
                    successors[0],
                    Direction::Outgoing,
                    &mut self.bubble.extension_right,
                );
                self.bubble.divergence_right = match self.traversal.bubbles().first() {
                    Some(&(at, _)) => at,
                    None => self.bubble.extension_right.len(),
                };
            }

            if predecessors.len() == 1 {
                self.bubble.closure_left = Some(self.graph.nt_at(predecessors[0], 0));
                let from = self.graph.reverse(predecessors[0]);
                self.traversal.traverse(
                    self.graph,
                    &mut self.terminator,
                    from,
                    Direction::Outgoing,
                    &mut self.bubble.extension_left,
                );
                self.bubble.divergence_left = match self.traversal.bubbles().first() {
                    Some(&(at, _)) => at,
                    None => self.bubble.extension_left.len(),
                };
            }
        }

        self.bubble.closure_flags = self.bubble.closure_left.is_some() as u8
            | (self.bubble.closure_right.is_some() as u8) << 1;

        true
    }

    /// Issue the bubble index, render both allele paths, and hand them to
    /// the shared output. The index comes from an atomic counter outside the
    /// sink lock, so file order need not follow index order.
    fn emit(&mut self) -> Result<()> {
        self.bubble.index = self.out.next_index();
        let high = self.bubble.score < self.cfg.threshold;
        let seq1 = self.render_path(0, "higher");
        let seq2 = self.render_path(1, "lower");
        self.out
            .push_pair(&seq1, &seq2, self.bubble.closure_flags, high)
    }

    /// Lay out one allele path: reversed-complemented left extension, left
    /// closure, the uppercase 2k-1 core, right closure, right extension.
    /// Extensions and closures are lowercase.
    fn render_path(&self, path: usize, label: &str) -> Sequence {
        let b = &self.bubble;
        let quality = if b.score < self.cfg.threshold {
            "high"
        } else {
            "low"
        };

        let mut comment = format!("SNP_{}_path_{}|{}", label, b.index, quality);
        // a closed side counts its closure base; an open side reports 0
        let flank_len = |present: bool, len: usize| if present { len + 1 } else { 0 };
        match self.cfg.traversal {
            TraversalKind::None => {}
            TraversalKind::Unitig => {
                comment.push_str(&format!(
                    "|left_unitig_length_{}|right_unitig_length_{}",
                    flank_len(b.closure_left.is_some(), b.extension_left.len()),
                    flank_len(b.closure_right.is_some(), b.extension_right.len()),
                ));
            }
            TraversalKind::Contig => {
                comment.push_str(&format!(
                    "|left_unitig_length_{}|right_unitig_length_{}",
                    flank_len(b.closure_left.is_some(), b.divergence_left),
                    flank_len(b.closure_right.is_some(), b.divergence_right),
                ));
                comment.push_str(&format!(
                    "|left_contig_length_{}|right_contig_length_{}",
                    flank_len(b.closure_left.is_some(), b.extension_left.len()),
                    flank_len(b.closure_right.is_some(), b.extension_right.len()),
                ));
            }
        }

        let len = (2 * self.k - 1)
            + b.extension_left.len()
            + b.extension_right.len()
            + b.closure_left.is_some() as usize
            + b.closure_right.is_some() as usize;
        let mut data = Vec::with_capacity(len);

        // the left walk ran on the reverse strand: flip order and complement
        for &c in b.extension_left.iter().rev() {
            data.push(NT_LOWER[(3 - c) as usize]);
        }
        if let Some(c) = b.closure_left {
            data.push(NT_LOWER[c as usize]);
        }
        data.extend_from_slice(self.path_string(path).as_bytes());
        if let Some(c) = b.closure_right {
            data.push(NT_LOWER[c as usize]);
        }
        for &c in b.extension_right.iter() {
            data.push(NT_LOWER[c as usize]);
        }
        debug_assert_eq!(data.len(), len);

        Sequence { comment, data }
    }
}

#[inline]
fn nodes_distinct(prev: Option<Node>, current: Node, next: Node) -> bool {
    next != current && prev.map_or(true, |p| next != p)
}
