// ============================================================================
// MAX-FLOW / MIN-CUT (Dinic)
// ============================================================================
//
// Compact s-t flow network for the segmentation energy.  Adjacency is an
// intrusive linked list (head/next) and every edge is stored next to its
// reverse, so `e ^ 1` is the residual partner.  The blocking-flow search is
// iterative; grid graphs for full photos are far too deep for recursion.
// ============================================================================

use std::collections::VecDeque;

const NONE: u32 = u32::MAX;
/// Residual capacities at or below this count as saturated.
const FLOW_EPS: f64 = 1e-9;

pub struct FlowGraph {
    head: Vec<u32>,
    next: Vec<u32>,
    to: Vec<u32>,
    cap: Vec<f64>,
    source: usize,
    sink: usize,
}

impl FlowGraph {
    /// Graph with `nodes` inner nodes plus a source and a sink.
    /// `edge_hint` is the expected number of `add_edge` calls.
    pub fn new(nodes: usize, edge_hint: usize) -> Self {
        let total = nodes + 2;
        Self {
            head: vec![NONE; total],
            next: Vec::with_capacity(edge_hint * 2),
            to: Vec::with_capacity(edge_hint * 2),
            cap: Vec::with_capacity(edge_hint * 2),
            source: nodes,
            sink: nodes + 1,
        }
    }

    pub fn source(&self) -> usize {
        self.source
    }

    pub fn sink(&self) -> usize {
        self.sink
    }

    pub fn node_count(&self) -> usize {
        self.head.len()
    }

    /// Add `u -> v` with capacity `cap_uv` and `v -> u` with `cap_vu`.
    pub fn add_edge(&mut self, u: usize, v: usize, cap_uv: f64, cap_vu: f64) {
        self.push_half(u, v, cap_uv.max(0.0));
        self.push_half(v, u, cap_vu.max(0.0));
    }

    /// Terminal links for `v`.  Only the difference matters for the cut, so a
    /// single edge carries `from_source - to_sink` on whichever side is positive.
    pub fn add_terminal_weights(&mut self, v: usize, from_source: f64, to_sink: f64) {
        let d = from_source - to_sink;
        if d > 0.0 {
            self.add_edge(self.source, v, d, 0.0);
        } else if d < 0.0 {
            self.add_edge(v, self.sink, -d, 0.0);
        }
    }

    fn push_half(&mut self, u: usize, v: usize, cap: f64) {
        let e = self.to.len() as u32;
        self.to.push(v as u32);
        self.cap.push(cap);
        self.next.push(self.head[u]);
        self.head[u] = e;
    }

    /// Run Dinic to completion and return the total flow.
    pub fn max_flow(&mut self) -> f64 {
        let n = self.node_count();
        let mut level = vec![-1i32; n];
        let mut current = vec![NONE; n];
        let mut path: Vec<u32> = Vec::new();
        let mut total = 0.0;

        while self.build_levels(&mut level) {
            current.copy_from_slice(&self.head);
            total += self.blocking_flow(&mut level, &mut current, &mut path);
        }
        total
    }

    /// BFS levels over the residual graph; false once the sink is unreachable.
    fn build_levels(&self, level: &mut [i32]) -> bool {
        level.fill(-1);
        level[self.source] = 0;
        let mut queue = VecDeque::new();
        queue.push_back(self.source);
        while let Some(u) = queue.pop_front() {
            let mut e = self.head[u];
            while e != NONE {
                let ei = e as usize;
                let v = self.to[ei] as usize;
                if level[v] < 0 && self.cap[ei] > FLOW_EPS {
                    level[v] = level[u] + 1;
                    queue.push_back(v);
                }
                e = self.next[ei];
            }
        }
        level[self.sink] >= 0
    }

    fn blocking_flow(&mut self, level: &mut [i32], current: &mut [u32], path: &mut Vec<u32>) -> f64 {
        let (s, t) = (self.source, self.sink);
        let mut pushed = 0.0;
        loop {
            path.clear();
            let mut u = s;
            while u != t {
                let mut advanced = false;
                while current[u] != NONE {
                    let ei = current[u] as usize;
                    let v = self.to[ei] as usize;
                    if self.cap[ei] > FLOW_EPS && level[v] == level[u] + 1 {
                        path.push(current[u]);
                        u = v;
                        advanced = true;
                        break;
                    }
                    current[u] = self.next[ei];
                }
                if !advanced {
                    if u == s {
                        return pushed;
                    }
                    // Dead end: drop the node from this phase and back up.
                    level[u] = -1;
                    let Some(e) = path.pop() else {
                        return pushed;
                    };
                    let ei = e as usize;
                    u = self.to[ei ^ 1] as usize;
                    current[u] = self.next[ei];
                }
            }

            let bottleneck = path
                .iter()
                .map(|&e| self.cap[e as usize])
                .fold(f64::INFINITY, f64::min);
            for &e in path.iter() {
                let ei = e as usize;
                self.cap[ei] -= bottleneck;
                self.cap[ei ^ 1] += bottleneck;
            }
            pushed += bottleneck;
        }
    }

    /// Nodes still reachable from the source in the residual graph, i.e. the
    /// source side of the minimum cut.  Call after [`max_flow`](Self::max_flow).
    pub fn source_side(&self) -> Vec<bool> {
        let mut seen = vec![false; self.node_count()];
        seen[self.source] = true;
        let mut queue = VecDeque::new();
        queue.push_back(self.source);
        while let Some(u) = queue.pop_front() {
            let mut e = self.head[u];
            while e != NONE {
                let ei = e as usize;
                let v = self.to[ei] as usize;
                if !seen[v] && self.cap[ei] > FLOW_EPS {
                    seen[v] = true;
                    queue.push_back(v);
                }
                e = self.next[ei];
            }
        }
        seen
    }
}
