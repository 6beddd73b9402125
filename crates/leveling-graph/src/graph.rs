//! Observation graph - the shape of a leveling network
//!
//! Nodes are the points referenced by included observations, edges are the
//! observations themselves. Edges keep their measured direction; traversal
//! against it flips the sign of the height difference.

use std::collections::{BTreeMap, HashMap, VecDeque};

use leveling_core::{
    AdjustError, AdjustResult, FixedPoints, NetworkDefect, Observation, PointId,
};

/// Edge in the observation graph
#[derive(Debug, Clone)]
pub struct GraphEdge {
    /// Index of the observation in the slice the graph was built from
    pub observation: usize,
    /// Node index of the backsight end
    pub from: usize,
    /// Node index of the foresight end
    pub to: usize,
    /// Observed height difference, m
    pub height_diff: f64,
    pub distance_km: f64,
}

impl GraphEdge {
    /// Least-squares weight (1 / km)
    #[inline]
    pub fn weight(&self) -> f64 {
        1.0 / self.distance_km
    }

    /// The endpoint opposite to `node`
    #[inline]
    pub fn other(&self, node: usize) -> usize {
        if self.from == node {
            self.to
        } else {
            self.from
        }
    }
}

/// Direction in which a loop or path crosses an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Along the measured direction
    Forward,
    /// Against it
    Backward,
}

impl Traversal {
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Traversal::Forward => 1.0,
            Traversal::Backward => -1.0,
        }
    }
}

/// One signed edge of a loop or tree path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopStep {
    /// Position of the edge in [`ObservationGraph::edges`]
    pub edge: usize,
    /// Index of the underlying observation
    pub observation: usize,
    pub traversal: Traversal,
}

impl LoopStep {
    #[inline]
    pub fn sign(&self) -> f64 {
        self.traversal.sign()
    }
}

/// A closed, signed sequence of observations
#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    pub steps: Vec<LoopStep>,
    /// Visited points; the first and the last are the same
    pub points: Vec<PointId>,
    /// Σ sign·dH, m
    pub misclosure_m: f64,
    /// Σ distance, km
    pub perimeter_km: f64,
}

impl Loop {
    #[inline]
    pub fn misclosure_mm(&self) -> f64 {
        self.misclosure_m * leveling_core::MM_PER_M
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Does the loop use the observation at `index`?
    pub fn contains_observation(&self, index: usize) -> bool {
        self.steps.iter().any(|s| s.observation == index)
    }
}

/// Depth-first spanning forest
#[derive(Debug, Clone, Default)]
struct SpanningForest {
    parent_edge: Vec<Option<usize>>,
    depth: Vec<usize>,
    component: Vec<usize>,
    tree_edge: Vec<bool>,
    components: usize,
}

/// Leveling network as a graph
#[derive(Debug, Clone)]
pub struct ObservationGraph {
    /// Points in id order
    points: Vec<PointId>,
    /// Point id -> node index
    index: HashMap<PointId, usize>,
    edges: Vec<GraphEdge>,
    /// Node -> incident edge positions, in observation order
    adjacency: Vec<Vec<usize>>,
    forest: SpanningForest,
}

impl ObservationGraph {
    /// Build the graph from the included observations.
    ///
    /// Fails on a non-positive or non-finite distance, or when no observation
    /// is included.
    pub fn build(observations: &[Observation]) -> AdjustResult<Self> {
        let mut included = Vec::new();
        for (i, obs) in observations.iter().enumerate() {
            if !obs.included {
                continue;
            }
            if !(obs.distance.is_finite() && obs.distance > 0.0) {
                return Err(AdjustError::WeightMatrix {
                    index: i,
                    from: obs.from.clone(),
                    to: obs.to.clone(),
                    distance: obs.distance,
                });
            }
            included.push((i, obs));
        }

        if included.is_empty() {
            return Err(AdjustError::InvalidNetwork {
                defect: NetworkDefect::Empty,
                partition: Vec::new(),
            });
        }

        let mut points: Vec<PointId> = included
            .iter()
            .flat_map(|(_, o)| [o.from.clone(), o.to.clone()])
            .collect();
        points.sort();
        points.dedup();

        let index: HashMap<PointId, usize> = points
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), i))
            .collect();

        let mut adjacency = vec![Vec::new(); points.len()];
        let mut edges = Vec::with_capacity(included.len());

        for (i, obs) in included {
            let from = index[&obs.from];
            let to = index[&obs.to];
            let pos = edges.len();
            edges.push(GraphEdge {
                observation: i,
                from,
                to,
                height_diff: obs.height_diff,
                distance_km: obs.distance_km(),
            });
            adjacency[from].push(pos);
            if to != from {
                adjacency[to].push(pos);
            }
        }

        let mut graph = ObservationGraph {
            points,
            index,
            edges,
            adjacency,
            forest: SpanningForest::default(),
        };
        graph.forest = graph.depth_first_forest();

        tracing::debug!(
            points = graph.node_count(),
            edges = graph.edge_count(),
            components = graph.component_count(),
            "observation graph built"
        );

        Ok(graph)
    }

    /// Spanning forest by iterative depth-first traversal
    fn depth_first_forest(&self) -> SpanningForest {
        let n = self.points.len();
        let mut forest = SpanningForest {
            parent_edge: vec![None; n],
            depth: vec![0; n],
            component: vec![usize::MAX; n],
            tree_edge: vec![false; self.edges.len()],
            components: 0,
        };

        for root in 0..n {
            if forest.component[root] != usize::MAX {
                continue;
            }
            let comp = forest.components;
            forest.components += 1;
            forest.component[root] = comp;

            // (node, next adjacency cursor)
            let mut stack = vec![(root, 0usize)];
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                if top.1 >= self.adjacency[node].len() {
                    stack.pop();
                    continue;
                }
                let e = self.adjacency[node][top.1];
                top.1 += 1;

                let next = self.edges[e].other(node);
                if forest.component[next] == usize::MAX {
                    forest.component[next] = comp;
                    forest.parent_edge[next] = Some(e);
                    forest.depth[next] = forest.depth[node] + 1;
                    forest.tree_edge[e] = true;
                    stack.push((next, 0));
                }
            }
        }

        forest
    }

    /// Points in id order
    pub fn points(&self) -> &[PointId] {
        &self.points
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn point(&self, node: usize) -> &PointId {
        &self.points[node]
    }

    pub fn has_point(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.points.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of incident edge ends; a self-loop counts twice
    pub fn degree(&self, id: &str) -> usize {
        self.node_index(id)
            .map(|n| {
                self.adjacency[n]
                    .iter()
                    .map(|&e| if self.edges[e].from == self.edges[e].to { 2 } else { 1 })
                    .sum::<usize>()
            })
            .unwrap_or(0)
    }

    /// Points sharing an observation with `id`
    pub fn neighbors(&self, id: &str) -> Vec<PointId> {
        let Some(n) = self.node_index(id) else {
            return Vec::new();
        };
        let mut out: Vec<PointId> = self.adjacency[n]
            .iter()
            .map(|&e| self.points[self.edges[e].other(n)].clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn component_count(&self) -> usize {
        self.forest.components
    }

    /// Independent loop count: |E| - |V| + |C|
    pub fn cyclomatic_number(&self) -> usize {
        self.edges.len() + self.forest.components - self.points.len()
    }

    /// Connected components, each sorted by point id
    pub fn components(&self) -> Vec<Vec<PointId>> {
        let mut partition = vec![Vec::new(); self.forest.components];
        for (node, point) in self.points.iter().enumerate() {
            partition[self.forest.component[node]].push(point.clone());
        }
        partition
    }

    /// Component number of a point
    pub fn component_of(&self, id: &str) -> Option<usize> {
        self.node_index(id).map(|n| self.forest.component[n])
    }

    /// Verify that the fixed points give every point an absolute datum.
    ///
    /// The network must be one component holding at least one fixed point.
    pub fn check_datum(&self, fixed: &FixedPoints) -> AdjustResult<()> {
        let mut per_component = vec![0usize; self.forest.components];
        for (id, _) in fixed.iter() {
            if let Some(comp) = self.component_of(id.as_str()) {
                per_component[comp] += 1;
            }
        }

        if per_component.iter().any(|&count| count == 0) {
            return Err(AdjustError::InvalidNetwork {
                defect: NetworkDefect::MissingDatum,
                partition: self.components(),
            });
        }

        if self.forest.components > 1 {
            return Err(AdjustError::InvalidNetwork {
                defect: NetworkDefect::Disconnected,
                partition: self.components(),
            });
        }

        Ok(())
    }

    /// Require at least one fixed point anywhere in the graph
    pub fn require_datum(&self, fixed: &FixedPoints) -> AdjustResult<()> {
        if fixed.iter().any(|(id, _)| self.has_point(id.as_str())) {
            Ok(())
        } else {
            Err(AdjustError::InvalidNetwork {
                defect: NetworkDefect::MissingDatum,
                partition: self.components(),
            })
        }
    }

    /// Fixed points that are part of the network, in id order
    pub fn fixed_in_graph<'f>(&self, fixed: &'f FixedPoints) -> Vec<(&'f PointId, f64)> {
        fixed
            .iter()
            .filter(|(id, _)| self.has_point(id.as_str()))
            .collect()
    }

    #[inline]
    fn step(&self, edge: usize, leaving: usize) -> LoopStep {
        let e = &self.edges[edge];
        LoopStep {
            edge,
            observation: e.observation,
            traversal: if e.from == leaving {
                Traversal::Forward
            } else {
                Traversal::Backward
            },
        }
    }

    /// Edge positions of the spanning forest
    pub fn spanning_tree(&self) -> Vec<usize> {
        (0..self.edges.len())
            .filter(|&e| self.forest.tree_edge[e])
            .collect()
    }

    /// Signed path through the spanning tree from node `a` to node `b`
    fn tree_path_nodes(&self, a: usize, b: usize) -> Option<Vec<LoopStep>> {
        let f = &self.forest;
        if f.component[a] != f.component[b] {
            return None;
        }

        let mut up: Vec<LoopStep> = Vec::new();
        let mut down: Vec<LoopStep> = Vec::new();
        let (mut x, mut y) = (a, b);

        while x != y {
            if f.depth[x] >= f.depth[y] {
                let e = f.parent_edge[x]?;
                up.push(self.step(e, x));
                x = self.edges[e].other(x);
            } else {
                let e = f.parent_edge[y]?;
                let parent = self.edges[e].other(y);
                down.push(self.step(e, parent));
                y = parent;
            }
        }

        down.reverse();
        up.extend(down);
        Some(up)
    }

    /// Signed tree path between two points, `None` if they are not connected
    pub fn tree_path(&self, from: &str, to: &str) -> Option<Vec<LoopStep>> {
        let a = self.node_index(from)?;
        let b = self.node_index(to)?;
        self.tree_path_nodes(a, b)
    }

    /// Σ sign·dH along a sequence of steps, m
    pub fn signed_height_diff(&self, steps: &[LoopStep]) -> f64 {
        steps
            .iter()
            .map(|s| s.sign() * self.edges[s.edge].height_diff)
            .sum()
    }

    /// Σ distance along a sequence of steps, km
    pub fn length_km(&self, steps: &[LoopStep]) -> f64 {
        steps.iter().map(|s| self.edges[s.edge].distance_km).sum()
    }

    /// Fundamental cycle basis.
    ///
    /// Every edge outside the depth-first spanning forest closes exactly one
    /// loop with the tree path between its endpoints. The closing edge is
    /// crossed in its measured direction.
    pub fn find_loops(&self) -> Vec<Loop> {
        let mut loops = Vec::with_capacity(self.cyclomatic_number());

        for (pos, edge) in self.edges.iter().enumerate() {
            if self.forest.tree_edge[pos] {
                continue;
            }

            let mut steps = vec![self.step(pos, edge.from)];
            // Both ends share a component, so a tree path always exists
            if let Some(back) = self.tree_path_nodes(edge.to, edge.from) {
                steps.extend(back);
            }

            let mut points = Vec::with_capacity(steps.len() + 1);
            let mut at = edge.from;
            points.push(self.points[at].clone());
            for s in &steps {
                at = self.edges[s.edge].other(at);
                points.push(self.points[at].clone());
            }

            loops.push(Loop {
                misclosure_m: self.signed_height_diff(&steps),
                perimeter_km: self.length_km(&steps),
                steps,
                points,
            });
        }

        tracing::debug!(loops = loops.len(), "fundamental loops found");
        loops
    }

    /// Propagate heights breadth-first from every fixed point in the graph.
    ///
    /// `height_diff(edge)` supplies the dH used for each edge position
    /// (observed or adjusted). Points not reachable from a fixed point are
    /// absent from the map.
    pub fn propagate_heights<F>(&self, fixed: &FixedPoints, height_diff: F) -> BTreeMap<PointId, f64>
    where
        F: Fn(usize) -> f64,
    {
        let mut heights: Vec<Option<f64>> = vec![None; self.points.len()];
        let mut queue = VecDeque::new();

        for (id, h) in fixed.iter() {
            if let Some(n) = self.node_index(id.as_str()) {
                heights[n] = Some(h);
                queue.push_back(n);
            }
        }

        while let Some(node) = queue.pop_front() {
            let Some(h) = heights[node] else { continue };
            for &e in &self.adjacency[node] {
                let edge = &self.edges[e];
                let next = edge.other(node);
                if heights[next].is_some() {
                    continue;
                }
                let dh = height_diff(e);
                heights[next] = Some(if edge.from == node { h + dh } else { h - dh });
                queue.push_back(next);
            }
        }

        heights
            .into_iter()
            .enumerate()
            .filter_map(|(n, h)| h.map(|h| (self.points[n].clone(), h)))
            .collect()
    }
}
