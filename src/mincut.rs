use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::errors::{Result, SegError};
use crate::graph::FlowNetwork;
use crate::traits::MinCutSolver;
use crate::ClassId;

/// Source side of one class's minimum cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutResult {
    pub class_id: ClassId,
    /// Maximum flow value, equal to the capacity of the cut.
    pub flow: u64,
    /// `source_side[i]` is true when superpixel `i` is assigned to the class.
    pub source_side: Vec<bool>,
}

impl CutResult {
    pub fn is_assigned(&self, superpixel: usize) -> bool {
        self.source_side.get(superpixel).copied().unwrap_or(false)
    }

    pub fn assigned(&self) -> impl Iterator<Item = usize> + '_ {
        self.source_side
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i))
    }

    pub fn assigned_count(&self) -> usize {
        self.source_side.iter().filter(|&&on| on).count()
    }
}

const UNREACHED: u32 = u32::MAX;

/// Dinic's algorithm on exact integer capacities.
#[derive(Debug, Clone, Default)]
pub struct DinicSolver {
    timeout: Option<Duration>,
}

impl DinicSolver {
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Abandons a solve that runs longer than `timeout`.
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn check_deadline(&self, class_id: ClassId, started: Instant) -> Result<()> {
        match self.timeout {
            Some(limit) if started.elapsed() >= limit => Err(SegError::SolverTimeout {
                class_id,
                elapsed: started.elapsed(),
            }),
            _ => Ok(()),
        }
    }
}

impl MinCutSolver for DinicSolver {
    fn min_cut(&self, network: &FlowNetwork) -> Result<CutResult> {
        let started = Instant::now();
        let class_id = network.class_id();
        let mut residual: Vec<u64> = network.edges().iter().map(|e| e.capacity).collect();
        let mut level = vec![UNREACHED; network.node_count()];
        let mut next_arc = vec![0usize; network.node_count()];
        let mut flow: u64 = 0;
        let mut phases = 0usize;

        while build_levels(network, &residual, &mut level) {
            self.check_deadline(class_id, started)?;
            phases += 1;
            next_arc.fill(0);
            loop {
                let pushed = augment(network, &mut residual, &level, &mut next_arc);
                if pushed == 0 {
                    break;
                }
                flow = flow.checked_add(pushed).ok_or_else(|| SegError::Solver {
                    class_id,
                    reason: "flow value overflowed".to_string(),
                })?;
                self.check_deadline(class_id, started)?;
            }
        }

        let reachable = residual_reachable(network, &residual);
        let source_side = reachable[..network.superpixel_count()].to_vec();
        debug!(
            "Class {}: max flow {} after {} phases, {} superpixels on the source side",
            class_id,
            flow,
            phases,
            source_side.iter().filter(|&&on| on).count()
        );

        Ok(CutResult {
            class_id,
            flow,
            source_side,
        })
    }
}

/// BFS levels over edges with residual capacity. Returns whether the sink was reached.
fn build_levels(network: &FlowNetwork, residual: &[u64], level: &mut [u32]) -> bool {
    level.fill(UNREACHED);
    let source = network.source();
    level[source] = 0;
    let mut queue = VecDeque::from([source]);
    while let Some(node) = queue.pop_front() {
        for &e in network.adjacency(node) {
            let to = network.edges()[e].to;
            if residual[e] > 0 && level[to] == UNREACHED {
                level[to] = level[node] + 1;
                queue.push_back(to);
            }
        }
    }
    level[network.sink()] != UNREACHED
}

/// Finds one augmenting path in the level graph and saturates its bottleneck.
///
/// `next_arc` keeps, per node, the first arc not yet proven useless in this phase.
fn augment(
    network: &FlowNetwork,
    residual: &mut [u64],
    level: &[u32],
    next_arc: &mut [usize],
) -> u64 {
    let (source, sink) = (network.source(), network.sink());
    let edges = network.edges();
    let mut path: Vec<usize> = Vec::new();
    let mut node = source;

    loop {
        if node == sink {
            let bottleneck = path.iter().map(|&e| residual[e]).min().unwrap_or(0);
            for &e in &path {
                residual[e] -= bottleneck;
                residual[e ^ 1] += bottleneck;
            }
            return bottleneck;
        }

        let arcs = network.adjacency(node);
        let mut advanced = false;
        while next_arc[node] < arcs.len() {
            let e = arcs[next_arc[node]];
            let to = edges[e].to;
            if residual[e] > 0 && level[to] == level[node] + 1 {
                path.push(e);
                node = to;
                advanced = true;
                break;
            }
            next_arc[node] += 1;
        }

        if !advanced {
            match path.pop() {
                Some(e) => {
                    node = edges[e].from;
                    next_arc[node] += 1;
                }
                None => return 0,
            }
        }
    }
}

fn residual_reachable(network: &FlowNetwork, residual: &[u64]) -> Vec<bool> {
    let mut seen = vec![false; network.node_count()];
    let source = network.source();
    seen[source] = true;
    let mut stack = vec![source];
    while let Some(node) = stack.pop() {
        for &e in network.adjacency(node) {
            let to = network.edges()[e].to;
            if residual[e] > 0 && !seen[to] {
                seen[to] = true;
                stack.push(to);
            }
        }
    }
    seen
}
