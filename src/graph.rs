use crate::config::SegmentationConfig;
use crate::errors::{Result, SegError};
use crate::seeds::ClassSeedSet;
use crate::superpixel::SuperpixelSet;
use crate::ClassId;

/// Maps color dissimilarity between neighbouring superpixels to an edge capacity.
///
/// `capacity = max(1, round(scale * exp(-d² / 2σ²)))`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityModel {
    pub sigma: f64,
    pub scale: u32,
}

impl Default for CapacityModel {
    fn default() -> Self {
        Self::from(&SegmentationConfig::default())
    }
}

impl From<&SegmentationConfig> for CapacityModel {
    fn from(config: &SegmentationConfig) -> Self {
        Self {
            sigma: config.similarity_sigma,
            scale: config.capacity_scale,
        }
    }
}

impl CapacityModel {
    /// `None` when the value cannot be represented as an integer capacity.
    pub fn capacity(&self, distance: f64) -> Option<u64> {
        let similarity = (-(distance * distance) / (2.0 * self.sigma * self.sigma)).exp();
        let value = (self.scale as f64 * similarity).round().max(1.0);
        num_traits::cast::<f64, u64>(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEdge {
    pub from: usize,
    pub to: usize,
    pub capacity: u64,
}

/// Two-terminal flow network for one class over the superpixel graph.
///
/// Nodes `0..n` are superpixels, `n` is the source and `n + 1` the sink. Edges live in one
/// arena in pairs: index `2k` is a real edge and `2k + 1` its zero-capacity residual twin,
/// so `e ^ 1` always finds the partner.
#[derive(Debug, Clone)]
pub struct FlowNetwork {
    class_id: ClassId,
    superpixel_count: usize,
    edges: Vec<FlowEdge>,
    adjacency: Vec<Vec<usize>>,
    infinite: u64,
}

impl FlowNetwork {
    /// Builds the network separating `class_id` from every other seeded class.
    ///
    /// Seeds of `class_id` hang off the source and seeds of any other class feed the sink,
    /// both with a capacity exceeding the sum of all finite capacities.
    pub fn build(
        superpixels: &SuperpixelSet,
        seeds: &ClassSeedSet,
        class_id: ClassId,
        model: &CapacityModel,
    ) -> Result<Self> {
        let n = superpixels.len();
        let overflow = || SegError::CapacityOverflow { class_id };

        let mut finite = Vec::with_capacity(superpixels.edge_count() * 2);
        let mut total: u64 = 0;
        for sp in superpixels.iter() {
            for &other in sp.neighbors.iter().filter(|&&other| other > sp.id) {
                let neighbor = superpixels.get(other).ok_or_else(|| SegError::Solver {
                    class_id,
                    reason: format!("superpixel {} lists unknown neighbor {}", sp.id, other),
                })?;
                let capacity = model
                    .capacity(sp.color_distance(neighbor))
                    .ok_or_else(overflow)?;
                total = total
                    .checked_add(capacity)
                    .and_then(|t| t.checked_add(capacity))
                    .ok_or_else(overflow)?;
                finite.push((sp.id, other, capacity));
            }
        }
        let infinite = total.checked_add(1).ok_or_else(overflow)?;

        let mut network = Self {
            class_id,
            superpixel_count: n,
            edges: Vec::with_capacity((finite.len() * 2 + n) * 2),
            adjacency: vec![Vec::new(); n + 2],
            infinite,
        };

        let (source, sink) = (network.source(), network.sink());
        for sp in 0..n {
            match seeds.owner(sp) {
                Some(owner) if owner == class_id => network.add_edge(source, sp, infinite),
                Some(_) => network.add_edge(sp, sink, infinite),
                None => {}
            }
        }
        for (u, v, capacity) in finite {
            network.add_edge(u, v, capacity);
            network.add_edge(v, u, capacity);
        }
        Ok(network)
    }

    fn add_edge(&mut self, from: usize, to: usize, capacity: u64) {
        let index = self.edges.len();
        self.edges.push(FlowEdge { from, to, capacity });
        self.edges.push(FlowEdge {
            from: to,
            to: from,
            capacity: 0,
        });
        self.adjacency[from].push(index);
        self.adjacency[to].push(index + 1);
    }

    pub const fn class_id(&self) -> ClassId {
        self.class_id
    }

    pub const fn superpixel_count(&self) -> usize {
        self.superpixel_count
    }

    pub const fn node_count(&self) -> usize {
        self.superpixel_count + 2
    }

    pub const fn source(&self) -> usize {
        self.superpixel_count
    }

    pub const fn sink(&self) -> usize {
        self.superpixel_count + 1
    }

    /// Capacity given to terminal edges.
    pub const fn infinite(&self) -> u64 {
        self.infinite
    }

    /// Edge arena including residual twins.
    pub fn edges(&self) -> &[FlowEdge] {
        &self.edges
    }

    /// Arena indices of the edges leaving `node`, residual twins included.
    pub fn adjacency(&self, node: usize) -> &[usize] {
        &self.adjacency[node]
    }

    /// Real (non-twin) edges.
    pub fn forward_edges(&self) -> impl Iterator<Item = &FlowEdge> {
        self.edges.iter().step_by(2)
    }

    /// Total capacity of real edges leaving the source side.
    ///
    /// `source_side[i]` places superpixel `i`; the source and sink sit on their own sides.
    pub fn cut_capacity(&self, source_side: &[bool]) -> u64 {
        let side = |node: usize| {
            if node == self.source() {
                true
            } else if node == self.sink() {
                false
            } else {
                source_side.get(node).copied().unwrap_or(false)
            }
        };
        self.forward_edges()
            .filter(|e| side(e.from) && !side(e.to))
            .fold(0u64, |acc, e| acc.saturating_add(e.capacity))
    }
}
