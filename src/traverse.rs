// Unitig/contig walkers used to extend bubbles beyond their merge points.
//
// A walker appends 2-bit base codes to the caller's buffer and reports the
// bubbles it crossed as (start, end) offsets into that buffer. Walks stop at
// branching nodes, at nodes already claimed by the terminator, and at the
// depth cap.

use ahash::RandomState;
use clap::ValueEnum;
use hashbrown::HashSet;

use crate::graph::{Graph, Node, NodeVec};

/// Walks are capped at this many appended bases.
pub const MAX_EXTENSION: usize = 500;

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub enum TraversalKind {
    /// No extension beyond the bubble.
    None,
    /// Extend along maximal non-branching paths.
    Unitig,
    /// Extend along unitigs, crossing simple bubbles.
    Contig,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    #[inline]
    fn flip(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
        }
    }
}

/// Marks nodes consumed by previous walks so overlapping extensions stop
/// instead of re-walking them. Thread-private; reset between bubbles.
pub struct BranchingTerminator {
    marked: HashSet<Node, RandomState>,
}

impl BranchingTerminator {
    pub fn new() -> Self {
        Self {
            marked: HashSet::with_hasher(RandomState::new()),
        }
    }

    #[inline]
    pub fn mark(&mut self, n: Node) {
        self.marked.insert(n);
    }

    #[inline]
    pub fn is_marked(&self, n: Node) -> bool {
        self.marked.contains(&n)
    }

    pub fn reset(&mut self) {
        self.marked.clear();
    }
}

impl Default for BranchingTerminator {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Traversal {
    /// Walk from `start` in `dir`, appending the 2-bit code of every node
    /// passed to `out`. `start` itself contributes nothing.
    fn traverse(
        &mut self,
        graph: &Graph,
        term: &mut BranchingTerminator,
        start: Node,
        dir: Direction,
        out: &mut Vec<u8>,
    );

    /// Bubbles crossed during the last walk, as (start, end) offsets into
    /// the appended output. Empty for walkers that never cross bubbles.
    fn bubbles(&self) -> &[(usize, usize)];
}

/// Instantiate the walker matching the configured kind.
pub fn create(kind: TraversalKind) -> Box<dyn Traversal> {
    match kind {
        TraversalKind::None => Box::new(NullTraversal),
        TraversalKind::Unitig => Box::new(UnitigTraversal),
        TraversalKind::Contig => Box::new(ContigTraversal::new()),
    }
}

#[inline]
fn neighbors(graph: &Graph, n: Node, dir: Direction) -> NodeVec {
    match dir {
        Direction::Outgoing => graph.successors(n),
        Direction::Incoming => graph.predecessors(n),
    }
}

/// Code contributed by entering `n` while walking in `dir`: the freshly
/// shifted-in base.
#[inline]
fn entry_code(graph: &Graph, n: Node, dir: Direction) -> u8 {
    match dir {
        Direction::Outgoing => graph.nt_at(n, graph.kmer_size() - 1),
        Direction::Incoming => graph.nt_at(n, 0),
    }
}

pub struct NullTraversal;

impl Traversal for NullTraversal {
    fn traverse(
        &mut self,
        _graph: &Graph,
        _term: &mut BranchingTerminator,
        _start: Node,
        _dir: Direction,
        _out: &mut Vec<u8>,
    ) {
    }

    fn bubbles(&self) -> &[(usize, usize)] {
        &[]
    }
}

pub struct UnitigTraversal;

impl Traversal for UnitigTraversal {
    fn traverse(
        &mut self,
        graph: &Graph,
        term: &mut BranchingTerminator,
        start: Node,
        dir: Direction,
        out: &mut Vec<u8>,
    ) {
        let mut cur = start;
        term.mark(cur);
        while out.len() < MAX_EXTENSION {
            match simple_step(graph, term, cur, dir) {
                Some(next) => {
                    term.mark(next);
                    out.push(entry_code(graph, next, dir));
                    cur = next;
                }
                None => break,
            }
        }
    }

    fn bubbles(&self) -> &[(usize, usize)] {
        &[]
    }
}

/// One unitig step: unique unmarked neighbor whose back-neighborhood is also
/// unique.
fn simple_step(
    graph: &Graph,
    term: &BranchingTerminator,
    cur: Node,
    dir: Direction,
) -> Option<Node> {
    let nexts = neighbors(graph, cur, dir);
    if nexts.len() != 1 {
        return None;
    }
    let next = nexts[0];
    if neighbors(graph, next, dir.flip()).len() != 1 {
        return None;
    }
    if term.is_marked(next) {
        return None;
    }
    Some(next)
}

pub struct ContigTraversal {
    crossed: Vec<(usize, usize)>,
}

impl ContigTraversal {
    pub fn new() -> Self {
        Self {
            crossed: Vec::new(),
        }
    }

    /// Lock-step advance of a two-way fork until both branches reach the
    /// same node. Returns the merge node and the base codes of the chosen
    /// branch (the fork arm with the smaller k-mer), start arms included.
    fn cross_bubble(graph: &Graph, a: Node, b: Node, dir: Direction) -> Option<(Node, Vec<u8>)> {
        let (mut pa, mut pb) = if a.kmer <= b.kmer { (a, b) } else { (b, a) };
        let mut consensus = vec![entry_code(graph, pa, dir)];

        for _ in 0..=graph.kmer_size() {
            if pa == pb {
                return Some((pa, consensus));
            }
            let na = neighbors(graph, pa, dir);
            let nb = neighbors(graph, pb, dir);
            if na.len() != 1 || nb.len() != 1 {
                return None;
            }
            pa = na[0];
            pb = nb[0];
            if entry_code(graph, pa, dir) != entry_code(graph, pb, dir) {
                return None;
            }
            consensus.push(entry_code(graph, pa, dir));
        }
        None
    }
}

impl Default for ContigTraversal {
    fn default() -> Self {
        Self::new()
    }
}

impl Traversal for ContigTraversal {
    fn traverse(
        &mut self,
        graph: &Graph,
        term: &mut BranchingTerminator,
        start: Node,
        dir: Direction,
        out: &mut Vec<u8>,
    ) {
        self.crossed.clear();
        let walk_base = out.len();
        let mut cur = start;
        term.mark(cur);
        while out.len() < MAX_EXTENSION {
            if let Some(next) = simple_step(graph, term, cur, dir) {
                term.mark(next);
                out.push(entry_code(graph, next, dir));
                cur = next;
                continue;
            }

            // blocked: try to cross a simple two-way bubble
            let forks = neighbors(graph, cur, dir);
            if forks.len() != 2 {
                break;
            }
            let Some((merged, codes)) = Self::cross_bubble(graph, forks[0], forks[1], dir) else {
                break;
            };
            if term.is_marked(merged) {
                break;
            }
            let div_start = out.len() - walk_base;
            out.extend_from_slice(&codes);
            let div_end = out.len() - walk_base;
            self.crossed.push((div_start, div_end));
            term.mark(merged);
            cur = merged;
        }
    }

    fn bubbles(&self) -> &[(usize, usize)] {
        &self.crossed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{encode, Graph};

    fn node(s: &str) -> Node {
        Node::new(encode(s.as_bytes()).unwrap())
    }

    /// All k-windows of `seq`, forward strand only.
    fn windows(seq: &str, k: usize) -> Vec<String> {
        (0..=seq.len() - k).map(|i| seq[i..i + k].to_string()).collect()
    }

    fn graph_of(seqs: &[&str], k: usize) -> Graph {
        let mut kmers = Vec::new();
        for s in seqs {
            for w in windows(s, k) {
                kmers.push(encode(w.as_bytes()).unwrap());
            }
        }
        Graph::new(k, kmers)
    }

    #[test]
    fn unitig_walks_simple_path() {
        let g = graph_of(&["ACGTACGGA"], 5);
        let mut term = BranchingTerminator::new();
        let mut walker = UnitigTraversal;
        let mut out = Vec::new();
        walker.traverse(&g, &mut term, node("ACGTA"), Direction::Outgoing, &mut out);
        // ACGTA -> CGTAC -> GTACG -> TACGG -> ACGGA
        assert_eq!(out, vec![1, 2, 2, 0]);
        assert!(walker.bubbles().is_empty());
    }

    #[test]
    fn unitig_stops_at_branch() {
        // GTACG has two successors (TACGG and TACGC)
        let g = graph_of(&["ACGTACGGA", "GTACGC"], 5);
        let mut term = BranchingTerminator::new();
        let mut walker = UnitigTraversal;
        let mut out = Vec::new();
        walker.traverse(&g, &mut term, node("ACGTA"), Direction::Outgoing, &mut out);
        assert_eq!(out, vec![1, 2]); // stops before the fork resolves
    }

    #[test]
    fn unitig_walks_incoming() {
        let g = graph_of(&["ACGTACGGA"], 5);
        let mut term = BranchingTerminator::new();
        let mut walker = UnitigTraversal;
        let mut out = Vec::new();
        walker.traverse(&g, &mut term, node("ACGGA"), Direction::Incoming, &mut out);
        // ACGGA <- TACGG <- GTACG <- CGTAC <- ACGTA
        assert_eq!(out, vec![3, 2, 1, 0]);
    }

    #[test]
    fn terminator_blocks_rewalk() {
        let g = graph_of(&["ACGTACGGA"], 5);
        let mut term = BranchingTerminator::new();
        let mut walker = UnitigTraversal;
        let mut out = Vec::new();
        walker.traverse(&g, &mut term, node("ACGTA"), Direction::Outgoing, &mut out);
        let mut again = Vec::new();
        walker.traverse(&g, &mut term, node("ACGTA"), Direction::Outgoing, &mut again);
        assert!(again.is_empty());
        term.reset();
        walker.traverse(&g, &mut term, node("ACGTA"), Direction::Outgoing, &mut again);
        assert_eq!(again, out);
    }

    #[test]
    fn contig_crosses_simple_bubble() {
        // Two alleles of TTAAC[C/T]GGATCA merging back after the variant,
        // then a clean tail.
        let g = graph_of(&["TTAACCGGATCA", "TTAACTGGATCA"], 5);
        let mut term = BranchingTerminator::new();
        let mut walker = ContigTraversal::new();
        let mut out = Vec::new();
        walker.traverse(&g, &mut term, node("TTAAC"), Direction::Outgoing, &mut out);
        // crossed one bubble and continued to the end of the tail
        assert_eq!(walker.bubbles().len(), 1);
        assert_eq!(walker.bubbles()[0].0, 0);
        let rendered: Vec<u8> = out
            .iter()
            .map(|&c| crate::graph::NT_UPPER[c as usize])
            .collect();
        // smaller fork arm carries C at the variant site
        assert_eq!(&rendered, b"CGGATCA");
    }

    #[test]
    fn null_traversal_appends_nothing() {
        let g = graph_of(&["ACGTACGGA"], 5);
        let mut term = BranchingTerminator::new();
        let mut walker = NullTraversal;
        let mut out = Vec::new();
        walker.traverse(&g, &mut term, node("ACGTA"), Direction::Outgoing, &mut out);
        assert!(out.is_empty());
        assert!(walker.bubbles().is_empty());
    }
}
