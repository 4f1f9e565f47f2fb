//! DFA intermediate representation
//!
//! ## Overview
//! A [`Graph`] is an acceptor over the binary alphabet: every vertex has
//! exactly two outgoing edges, selected by the current input bit. Alphabets of
//! `2^k` symbols are handled by feeding the `k` atomic-proposition bits of a
//! symbol consecutively, least-significant proposition first.
//!
//! Construction paths:
//! - [`Graph::from_spec`] / [`Graph::parse`] — the textual spec format
//!   (`|V| q0 #finals`, final IDs, then one `v c0 c1` line per vertex);
//! - [`Graph::from_ltl`] — delegates to the external LTL→DFA translator and
//!   parses its output.
//!
//! Derived forms ([`Graph::reversed`], [`Graph::minimized`],
//! [`Graph::negated`]) return new graphs; the original is never mutated.
//! [`Graph::reserve_states_at_depth`] precomputes the reachable-at-depth
//! table used by the offline evaluator once the input length is known.
//!
//! ## Invariants
//! - `|V| ≥ 1`, the initial vertex is in range, and the transition function is
//!   total on `{0, 1}` — enforced at every construction site.
//! - Vertex indices are contiguous from 0. Minimization uses Hopcroft block
//!   indices as the new vertex indices.
#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io::{self, Write};
use std::path::Path;
use std::sync::OnceLock;

use crate::{Error, VertexId};

/// A deterministic binary acceptor with one initial vertex and a final set.
#[derive(Clone, Debug)]
pub struct Graph {
    /// `children[v] = [child0, child1]`, both in range.
    children: Vec<[VertexId; 2]>,
    init: VertexId,
    finals: Vec<bool>,
    /// `reachable_at_depth[d]`, present once [`Graph::reserve_states_at_depth`]
    /// has run. Sorted, deduplicated.
    levels: Option<Vec<Vec<VertexId>>>,
    /// Shortest path length from each vertex to any final vertex, `None` when
    /// no final is reachable. Computed on demand.
    final_distance: OnceLock<Vec<Option<usize>>>,
}

impl Graph {
    /// Build a graph from raw parts, validating the structural invariants.
    pub fn new(
        children: Vec<[VertexId; 2]>,
        init: VertexId,
        finals: &BTreeSet<VertexId>,
    ) -> Result<Self, Error> {
        let n = children.len();
        if n == 0 {
            return Err(Error::BadSpec("graph must have at least one vertex".into()));
        }
        if init >= n {
            return Err(Error::BadSpec(format!(
                "initial vertex {init} out of range 0..{n}"
            )));
        }
        for (v, cs) in children.iter().enumerate() {
            for &c in cs {
                if c >= n {
                    return Err(Error::BadSpec(format!(
                        "vertex {v} has out-of-range child {c} (|V| = {n})"
                    )));
                }
            }
        }
        let mut final_flags = vec![false; n];
        for &f in finals {
            if f >= n {
                return Err(Error::BadSpec(format!(
                    "final vertex {f} out of range 0..{n}"
                )));
            }
            final_flags[f] = true;
        }
        Ok(Self {
            children,
            init,
            finals: final_flags,
            levels: None,
            final_distance: OnceLock::new(),
        })
    }

    /// Number of vertices.
    pub fn size(&self) -> usize {
        self.children.len()
    }

    /// The initial vertex `q0`.
    pub fn initial(&self) -> VertexId {
        self.init
    }

    /// Whether `v` is in the final set.
    pub fn is_final(&self, v: VertexId) -> bool {
        self.finals[v]
    }

    /// The successor of `v` on input bit `b`.
    pub fn child(&self, v: VertexId, b: bool) -> VertexId {
        self.children[v][usize::from(b)]
    }

    /// Plaintext run: does the automaton accept `word`?
    pub fn accept(&self, word: &[bool]) -> bool {
        let end = word.iter().fold(self.init, |v, &b| self.child(v, b));
        self.finals[end]
    }

    // ------------------------------------------------------------------
    // Construction from text
    // ------------------------------------------------------------------

    /// Load a graph from a spec file. See [`Graph::parse`] for the format.
    pub fn from_spec(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::BadSpec(format!("read {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// Parse the textual spec format.
    ///
    /// ```text
    /// |V| q0 #finals
    /// f_1 … f_#finals
    /// v c0 c1        (one line per vertex, any order, each exactly once)
    /// ```
    ///
    /// Tokens are whitespace-separated; line breaks carry no meaning. Fails
    /// with [`Error::BadSpec`] on an inconsistent header, duplicate or missing
    /// vertex rows, out-of-range children or finals, or trailing tokens.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut tokens = text.split_whitespace().map(|t| {
            t.parse::<usize>()
                .map_err(|_| Error::BadSpec(format!("expected a number, got `{t}`")))
        });
        let mut next = |what: &str| {
            tokens
                .next()
                .unwrap_or_else(|| Err(Error::BadSpec(format!("missing {what}"))))
        };

        let n = next("vertex count")?;
        if n == 0 {
            return Err(Error::BadSpec("vertex count must be positive".into()));
        }
        let init = next("initial vertex")?;
        let n_finals = next("final count")?;
        if n_finals > n {
            return Err(Error::BadSpec(format!(
                "final count {n_finals} exceeds vertex count {n}"
            )));
        }
        let mut finals = BTreeSet::new();
        for _ in 0..n_finals {
            finals.insert(next("final vertex")?);
        }

        let mut children: Vec<Option<[VertexId; 2]>> = vec![None; n];
        for _ in 0..n {
            let v = next("vertex row")?;
            let c0 = next("child 0")?;
            let c1 = next("child 1")?;
            if v >= n {
                return Err(Error::BadSpec(format!("vertex {v} out of range 0..{n}")));
            }
            if children[v].is_some() {
                return Err(Error::BadSpec(format!("duplicate row for vertex {v}")));
            }
            children[v] = Some([c0, c1]);
        }
        if tokens.next().is_some() {
            return Err(Error::BadSpec("trailing tokens after last vertex row".into()));
        }
        let children = children
            .into_iter()
            .enumerate()
            .map(|(v, cs)| cs.ok_or_else(|| Error::BadSpec(format!("missing row for vertex {v}"))))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(children, init, &finals)
    }

    /// Build a graph from an LTL formula over `num_ap` atomic propositions by
    /// invoking the external translator and parsing its spec output.
    pub fn from_ltl(formula: &str, num_ap: usize) -> Result<Self, Error> {
        if num_ap == 0 {
            return Err(Error::BadLtl(
                "formula must range over at least one atomic proposition".into(),
            ));
        }
        let text = crate::ltl::translate(formula, num_ap)?;
        Self::parse(&text).map_err(|e| match e {
            Error::BadSpec(msg) => Error::BadLtl(format!("translator output unparsable: {msg}")),
            other => other,
        })
    }

    // ------------------------------------------------------------------
    // Derived graphs
    // ------------------------------------------------------------------

    /// The reversal: a deterministic acceptor of the mirror language,
    /// obtained by subset construction over the edge-reversed graph. The
    /// subset containing the original `q0` is final; the start vertex is the
    /// (single, fresh) subset of all original finals.
    pub fn reversed(&self) -> Self {
        let n = self.size();
        let mut pre = [vec![Vec::new(); n], vec![Vec::new(); n]];
        for v in 0..n {
            for b in 0..2 {
                pre[b][self.children[v][b]].push(v);
            }
        }

        let start: BTreeSet<VertexId> = (0..n).filter(|&v| self.finals[v]).collect();
        let mut index: HashMap<BTreeSet<VertexId>, VertexId> = HashMap::new();
        let mut subsets: Vec<BTreeSet<VertexId>> = Vec::new();
        let mut children: Vec<[VertexId; 2]> = Vec::new();
        let mut queue = VecDeque::new();

        index.insert(start.clone(), 0);
        subsets.push(start);
        children.push([0, 0]);
        queue.push_back(0);

        while let Some(s) = queue.pop_front() {
            for b in 0..2 {
                let succ: BTreeSet<VertexId> = subsets[s]
                    .iter()
                    .flat_map(|&v| pre[b][v].iter().copied())
                    .collect();
                let t = match index.get(&succ) {
                    Some(&t) => t,
                    None => {
                        let t = subsets.len();
                        index.insert(succ.clone(), t);
                        subsets.push(succ);
                        children.push([0, 0]);
                        queue.push_back(t);
                        t
                    }
                };
                children[s][b] = t;
            }
        }

        let finals: BTreeSet<VertexId> = subsets
            .iter()
            .enumerate()
            .filter(|(_, s)| s.contains(&self.init))
            .map(|(i, _)| i)
            .collect();
        // Structurally valid by construction.
        Self::new(children, 0, &finals).expect("subset construction yields a valid graph")
    }

    /// Hopcroft minimization. Unreachable vertices are dropped first; the
    /// result's vertex indices are the partition block indices and the
    /// language is preserved.
    pub fn minimized(&self) -> Self {
        // Restrict to the reachable sub-graph.
        let mut order = Vec::new();
        let mut seen = vec![false; self.size()];
        let mut queue = VecDeque::from([self.init]);
        seen[self.init] = true;
        while let Some(v) = queue.pop_front() {
            order.push(v);
            for b in 0..2 {
                let c = self.children[v][b];
                if !seen[c] {
                    seen[c] = true;
                    queue.push_back(c);
                }
            }
        }
        let mut renum = vec![usize::MAX; self.size()];
        for (new, &old) in order.iter().enumerate() {
            renum[old] = new;
        }
        let children: Vec<[VertexId; 2]> = order
            .iter()
            .map(|&old| [renum[self.children[old][0]], renum[self.children[old][1]]])
            .collect();
        let finals: Vec<bool> = order.iter().map(|&old| self.finals[old]).collect();
        let init = renum[self.init];

        let block_of = hopcroft(&children, &finals);
        let n_blocks = block_of.iter().copied().max().unwrap_or(0) + 1;

        let mut new_children = vec![[0, 0]; n_blocks];
        let mut new_finals = BTreeSet::new();
        for v in 0..children.len() {
            let b = block_of[v];
            new_children[b] = [block_of[children[v][0]], block_of[children[v][1]]];
            if finals[v] {
                new_finals.insert(b);
            }
        }
        Self::new(new_children, block_of[init], &new_finals)
            .expect("partition refinement yields a valid graph")
    }

    /// Same structure, final set replaced by its complement.
    pub fn negated(&self) -> Self {
        let finals: BTreeSet<VertexId> = (0..self.size()).filter(|&v| !self.finals[v]).collect();
        Self::new(self.children.clone(), self.init, &finals)
            .expect("complementing finals preserves validity")
    }

    // ------------------------------------------------------------------
    // Derived attributes
    // ------------------------------------------------------------------

    /// Precompute `R_0 … R_n` where `R_0 = {q0}` and `R_{d+1}` is the image
    /// of `R_d` under both input bits. O(n·|V|); only worthwhile when the
    /// input length is known up front.
    pub fn reserve_states_at_depth(&mut self, n: usize) {
        let mut levels = Vec::with_capacity(n + 1);
        let mut cur: Vec<VertexId> = vec![self.init];
        levels.push(cur.clone());
        for _ in 0..n {
            let next: BTreeSet<VertexId> = cur
                .iter()
                .flat_map(|&v| self.children[v].iter().copied())
                .collect();
            cur = next.into_iter().collect();
            levels.push(cur.clone());
        }
        self.levels = Some(levels);
    }

    /// The set of vertices reachable after exactly `depth` inputs, if
    /// [`Graph::reserve_states_at_depth`] covered that depth.
    pub fn states_at_depth(&self, depth: usize) -> Option<&[VertexId]> {
        self.levels.as_ref()?.get(depth).map(|v| v.as_slice())
    }

    /// Shortest distance from each vertex to any final vertex (`None` when no
    /// final is reachable). Computed once, cached.
    pub fn final_distance(&self) -> &[Option<usize>] {
        self.final_distance.get_or_init(|| {
            let n = self.size();
            let mut pre = [vec![Vec::new(); n], vec![Vec::new(); n]];
            for v in 0..n {
                for b in 0..2 {
                    pre[b][self.children[v][b]].push(v);
                }
            }
            let mut dist = vec![None; n];
            let mut queue = VecDeque::new();
            for v in 0..n {
                if self.finals[v] {
                    dist[v] = Some(0);
                    queue.push_back(v);
                }
            }
            while let Some(v) = queue.pop_front() {
                let d = dist[v].unwrap_or(0) + 1;
                for b in 0..2 {
                    for &u in &pre[b][v] {
                        if dist[u].is_none() {
                            dist[u] = Some(d);
                            queue.push_back(u);
                        }
                    }
                }
            }
            dist
        })
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Write the graph back out in the textual spec format.
    pub fn dump(&self, out: &mut impl Write) -> io::Result<()> {
        let finals: Vec<VertexId> = (0..self.size()).filter(|&v| self.finals[v]).collect();
        writeln!(out, "{} {} {}", self.size(), self.init, finals.len())?;
        for f in finals {
            writeln!(out, "{f}")?;
        }
        for (v, cs) in self.children.iter().enumerate() {
            writeln!(out, "{v} {} {}", cs[0], cs[1])?;
        }
        Ok(())
    }

    /// Write a Graphviz DOT rendering. Final vertices are double circles;
    /// vertices from which no final is reachable are grayed out.
    pub fn dump_dot(&self, out: &mut impl Write) -> io::Result<()> {
        let dead = self.final_distance();
        writeln!(out, "digraph dfa {{")?;
        writeln!(out, "  rankdir=LR;")?;
        writeln!(out, "  start [shape=point];")?;
        writeln!(out, "  start -> v{};", self.init)?;
        for v in 0..self.size() {
            let shape = if self.finals[v] { "doublecircle" } else { "circle" };
            let style = if dead[v].is_none() { ", style=filled, fillcolor=gray" } else { "" };
            writeln!(out, "  v{v} [shape={shape}{style}, label=\"{v}\"];")?;
            for b in 0..2 {
                writeln!(out, "  v{v} -> v{} [label=\"{b}\"];", self.children[v][b])?;
            }
        }
        writeln!(out, "}}")
    }
}

/// Hopcroft partition refinement over `(F, V∖F)` with the two alphabet bits
/// as splitters. Returns the block index of each vertex.
///
/// Splits keep the larger half in place and enqueue both halves for both
/// bits; over-enqueueing costs time, never correctness, and the block count
/// is strictly increasing so the worklist drains.
fn hopcroft(children: &[[VertexId; 2]], finals: &[bool]) -> Vec<usize> {
    let n = children.len();
    let mut pre = [vec![Vec::new(); n], vec![Vec::new(); n]];
    for v in 0..n {
        for b in 0..2 {
            pre[b][children[v][b]].push(v);
        }
    }

    let f: BTreeSet<usize> = (0..n).filter(|&v| finals[v]).collect();
    let nf: BTreeSet<usize> = (0..n).filter(|&v| !finals[v]).collect();

    let mut blocks: Vec<BTreeSet<usize>> = Vec::new();
    let mut block_of = vec![0usize; n];
    for part in [f, nf] {
        if part.is_empty() {
            continue;
        }
        let idx = blocks.len();
        for &v in &part {
            block_of[v] = idx;
        }
        blocks.push(part);
    }

    let mut work: VecDeque<(usize, usize)> = (0..blocks.len())
        .flat_map(|i| [(i, 0), (i, 1)])
        .collect();

    while let Some((a, bit)) = work.pop_front() {
        // X = δ⁻¹(blocks[a], bit). Each vertex appears at most once because
        // the transition on `bit` is a function.
        let mut touched: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for &v in &blocks[a].clone() {
            for &u in &pre[bit][v] {
                touched.entry(block_of[u]).or_default().insert(u);
            }
        }
        for (y, hit) in touched {
            if hit.len() == blocks[y].len() {
                continue;
            }
            let rest: BTreeSet<usize> = blocks[y].difference(&hit).copied().collect();
            let (stay, moved) = if hit.len() <= rest.len() { (rest, hit) } else { (hit, rest) };
            let new_idx = blocks.len();
            blocks[y] = stay;
            for &q in &moved {
                block_of[q] = new_idx;
            }
            blocks.push(moved);
            for b in 0..2 {
                work.push_back((y, b));
                work.push_back((new_idx, b));
            }
        }
    }

    block_of
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    /// `accepts strings with an even number of 1s` (2 vertices).
    pub(crate) const EVEN_ONES: &str = "2 0 1\n0\n0 0 1\n1 1 0\n";

    /// `accepts strings ending in 01` (3 vertices).
    pub(crate) const ENDS_IN_01: &str = "3 0 1\n2\n0 1 0\n1 1 2\n2 1 0\n";

    fn random_word(rng: &mut impl Rng, len: usize) -> Vec<bool> {
        (0..len).map(|_| rng.gen()).collect()
    }

    /// Canonical renumbering by BFS from the initial vertex, for structural
    /// comparison up to vertex renaming.
    fn canonical(g: &Graph) -> (Vec<[usize; 2]>, usize, Vec<bool>) {
        let mut renum = vec![usize::MAX; g.size()];
        let mut order = Vec::new();
        let mut queue = VecDeque::from([g.initial()]);
        renum[g.initial()] = 0;
        order.push(g.initial());
        while let Some(v) = queue.pop_front() {
            for b in [false, true] {
                let c = g.child(v, b);
                if renum[c] == usize::MAX {
                    renum[c] = order.len();
                    order.push(c);
                    queue.push_back(c);
                }
            }
        }
        let children = order
            .iter()
            .map(|&v| [renum[g.child(v, false)], renum[g.child(v, true)]])
            .collect();
        let finals = order.iter().map(|&v| g.is_final(v)).collect();
        (children, 0, finals)
    }

    #[test]
    fn parse_and_dump_roundtrip() {
        let g = Graph::parse(ENDS_IN_01).unwrap();
        assert_eq!(g.size(), 3);
        assert_eq!(g.initial(), 0);
        assert!(g.is_final(2));
        let mut out = Vec::new();
        g.dump(&mut out).unwrap();
        let g2 = Graph::parse(std::str::from_utf8(&out).unwrap()).unwrap();
        assert_eq!(canonical(&g), canonical(&g2));
    }

    #[test]
    fn parse_rejects_malformed_specs() {
        for bad in [
            "",                          // empty
            "0 0 0\n",                   // no vertices
            "2 5 0\n0 0 1\n1 1 0\n",     // q0 out of range
            "2 0 1\n7\n0 0 1\n1 1 0\n",  // final out of range
            "2 0 0\n0 0 9\n1 1 0\n",     // child out of range
            "2 0 0\n0 0 1\n0 1 0\n",     // duplicate vertex row
            "2 0 0\n0 0 1\n",            // missing vertex row
            "1 0 0\n0 0 0\n3\n",         // trailing tokens
            "2 0 0\n0 0 x\n1 1 0\n",     // non-numeric token
        ] {
            assert!(
                matches!(Graph::parse(bad), Err(Error::BadSpec(_))),
                "spec should be rejected: {bad:?}"
            );
        }
    }

    #[test]
    fn accept_runs_the_automaton() {
        let g = Graph::parse(EVEN_ONES).unwrap();
        assert!(g.accept(&[]));
        assert!(!g.accept(&[true]));
        assert!(g.accept(&[true, false, true]));
        let g = Graph::parse(ENDS_IN_01).unwrap();
        assert!(g.accept(&[true, true, false, true]));
        assert!(!g.accept(&[true, true, false]));
    }

    #[test]
    fn minimization_preserves_language() {
        let mut rng = rand::thread_rng();
        for spec in [EVEN_ONES, ENDS_IN_01] {
            let g = Graph::parse(spec).unwrap();
            let m = g.minimized();
            assert!(m.size() <= g.size());
            for len in 0..12 {
                let w = random_word(&mut rng, len);
                assert_eq!(g.accept(&w), m.accept(&w), "word {w:?}");
            }
        }
    }

    #[test]
    fn minimization_collapses_equivalent_accept_states() {
        // Five vertices; 3 and 4 are equivalent accept states (both loop to
        // the rejecting sink 2 on either bit).
        let spec = "5 0 2\n3\n4\n0 1 3\n1 2 4\n2 2 2\n3 2 2\n4 2 2\n";
        let g = Graph::parse(spec).unwrap();
        let m = g.minimized();
        assert_eq!(m.size(), 4);
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let w = random_word(&mut rng, rng.gen_range(0..10));
            assert_eq!(g.accept(&w), m.accept(&w), "word {w:?}");
        }
    }

    #[test]
    fn minimization_is_idempotent() {
        for spec in [EVEN_ONES, ENDS_IN_01, "5 0 2\n3\n4\n0 1 3\n1 2 4\n2 2 2\n3 2 2\n4 2 2\n"] {
            let m = Graph::parse(spec).unwrap().minimized();
            let mm = m.minimized();
            assert_eq!(canonical(&m), canonical(&mm));
        }
    }

    #[test]
    fn double_reversal_preserves_language() {
        let mut rng = rand::thread_rng();
        for spec in [EVEN_ONES, ENDS_IN_01] {
            let g = Graph::parse(spec).unwrap();
            let rr = g.reversed().reversed();
            for len in 0..12 {
                let w = random_word(&mut rng, len);
                assert_eq!(g.accept(&w), rr.accept(&w), "word {w:?}");
            }
        }
    }

    #[test]
    fn reversal_accepts_the_mirror_language() {
        let g = Graph::parse(ENDS_IN_01).unwrap();
        let r = g.reversed();
        for len in 0..10 {
            let mut rng = rand::thread_rng();
            let w = random_word(&mut rng, len);
            let mirrored: Vec<bool> = w.iter().rev().copied().collect();
            assert_eq!(g.accept(&w), r.accept(&mirrored), "word {w:?}");
        }
    }

    #[test]
    fn negation_complements_the_language() {
        let mut rng = rand::thread_rng();
        let g = Graph::parse(EVEN_ONES).unwrap();
        let n = g.negated();
        for len in 0..12 {
            let w = random_word(&mut rng, len);
            assert_eq!(g.accept(&w), !n.accept(&w), "word {w:?}");
        }
    }

    #[test]
    fn reachable_at_depth_is_bounded_and_rooted() {
        let mut g = Graph::parse(ENDS_IN_01).unwrap();
        g.reserve_states_at_depth(16);
        assert_eq!(g.states_at_depth(0).unwrap(), &[g.initial()]);
        for d in 0..=16 {
            let r = g.states_at_depth(d).unwrap();
            assert!(!r.is_empty());
            assert!(r.len() <= g.size());
            assert!(r.windows(2).all(|w| w[0] < w[1]), "sorted, deduplicated");
        }
        assert!(g.states_at_depth(17).is_none());
    }

    #[test]
    fn final_distance_marks_dead_vertices() {
        // Vertex 2 is a rejecting sink: no final reachable from it.
        let spec = "3 0 1\n1\n0 1 2\n1 1 1\n2 2 2\n";
        let g = Graph::parse(spec).unwrap();
        let dist = g.final_distance();
        assert_eq!(dist[0], Some(1));
        assert_eq!(dist[1], Some(0));
        assert_eq!(dist[2], None);
        let mut dot = Vec::new();
        g.dump_dot(&mut dot).unwrap();
        let dot = String::from_utf8(dot).unwrap();
        assert!(dot.contains("v2 [shape=circle, style=filled, fillcolor=gray"));
    }
}
