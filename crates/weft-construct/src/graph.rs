//! The resource graph
//!
//! Resources live in a stable arena (petgraph indices) with an id→index map
//! kept in sync by [`ResourceGraph::update_id`]. Property values hold
//! [`ResourceId`]s rather than owning links, so cycles among resources are
//! fine; resolution happens on use.

use indexmap::IndexMap;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use tracing::trace;

use crate::error::{Error, Result};
use crate::id::{ResourceId, SimpleEdge};
use crate::resource::Resource;

/// Data carried on a solution-graph edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeData {
    pub weight: i64,
}

/// Control value for [`ResourceGraph::walk_down`]/[`ResourceGraph::walk_up`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    /// Stop extending the current path, keep exploring siblings.
    SkipPath,
    Stop,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    graph: StableDiGraph<Resource, EdgeData>,
    ids: IndexMap<ResourceId, NodeIndex>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.ids.contains_key(id)
    }

    pub fn add_resource(&mut self, resource: Resource) -> Result<()> {
        if self.ids.contains_key(&resource.id) {
            return Err(Error::ResourceAlreadyExists(resource.id));
        }
        trace!(id = %resource.id, "adding resource");
        let id = resource.id.clone();
        let idx = self.graph.add_node(resource);
        self.ids.insert(id, idx);
        Ok(())
    }

    /// Remove a resource and its incident edges.
    pub fn remove_resource(&mut self, id: &ResourceId) -> Option<Resource> {
        let idx = self.ids.shift_remove(id)?;
        trace!(id = %id, "removing resource");
        self.graph.remove_node(idx)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.ids.get(id).map(|idx| &self.graph[*idx])
    }

    pub fn get_mut(&mut self, id: &ResourceId) -> Option<&mut Resource> {
        let idx = *self.ids.get(id)?;
        Some(&mut self.graph[idx])
    }

    pub fn require(&self, id: &ResourceId) -> Result<&Resource> {
        self.get(id).ok_or_else(|| Error::ResourceNotFound(id.clone()))
    }

    pub fn require_mut(&mut self, id: &ResourceId) -> Result<&mut Resource> {
        if !self.contains(id) {
            return Err(Error::ResourceNotFound(id.clone()));
        }
        Ok(self.get_mut(id).unwrap())
    }

    /// All resource ids in insertion order.
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.ids.keys().cloned().collect()
    }

    /// Add a directed edge with default data. Returns false if it already
    /// existed; errors if either endpoint is missing.
    pub fn add_edge(&mut self, source: &ResourceId, target: &ResourceId) -> Result<bool> {
        self.add_edge_with(source, target, EdgeData::default())
    }

    pub fn add_edge_with(
        &mut self,
        source: &ResourceId,
        target: &ResourceId,
        data: EdgeData,
    ) -> Result<bool> {
        let src = *self
            .ids
            .get(source)
            .ok_or_else(|| Error::ResourceNotFound(source.clone()))?;
        let tgt = *self
            .ids
            .get(target)
            .ok_or_else(|| Error::ResourceNotFound(target.clone()))?;
        if self.graph.find_edge(src, tgt).is_some() {
            return Ok(false);
        }
        trace!(source = %source, target = %target, "adding edge");
        self.graph.add_edge(src, tgt, data);
        Ok(true)
    }

    pub fn has_edge(&self, source: &ResourceId, target: &ResourceId) -> bool {
        match (self.ids.get(source), self.ids.get(target)) {
            (Some(src), Some(tgt)) => self.graph.find_edge(*src, *tgt).is_some(),
            _ => false,
        }
    }

    /// Remove the edge; returns false when it did not exist.
    pub fn remove_edge(&mut self, source: &ResourceId, target: &ResourceId) -> bool {
        if let (Some(src), Some(tgt)) = (self.ids.get(source), self.ids.get(target)) {
            if let Some(edge) = self.graph.find_edge(*src, *tgt) {
                trace!(source = %source, target = %target, "removing edge");
                self.graph.remove_edge(edge);
                return true;
            }
        }
        false
    }

    /// All edges, sorted by (source, target) for deterministic iteration.
    pub fn edges(&self) -> Vec<SimpleEdge> {
        let mut out: Vec<SimpleEdge> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (src, tgt) = self.graph.edge_endpoints(e)?;
                Some(SimpleEdge::new(
                    self.graph[src].id.clone(),
                    self.graph[tgt].id.clone(),
                ))
            })
            .collect();
        out.sort();
        out
    }

    /// Direct successors, sorted by id.
    pub fn downstream(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Direct predecessors, sorted by id.
    pub fn upstream(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &ResourceId, dir: Direction) -> Vec<ResourceId> {
        let Some(idx) = self.ids.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<ResourceId> = self
            .graph
            .neighbors_directed(*idx, dir)
            .map(|n| self.graph[n].id.clone())
            .collect();
        out.sort();
        out
    }

    /// Deterministic topological order (Kahn's algorithm, ties broken by id).
    pub fn topological_sort(&self) -> Result<Vec<ResourceId>> {
        let mut in_degree: IndexMap<ResourceId, usize> = self
            .ids
            .keys()
            .map(|id| (id.clone(), 0))
            .collect();
        for edge in self.edges() {
            *in_degree.get_mut(&edge.target).unwrap() += 1;
        }
        let mut ready: Vec<ResourceId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ready.sort();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(next) = ready.first().cloned() {
            ready.remove(0);
            for succ in self.downstream(&next) {
                let d = in_degree.get_mut(&succ).unwrap();
                *d -= 1;
                if *d == 0 {
                    let pos = ready.binary_search(&succ).unwrap_or_else(|p| p);
                    ready.insert(pos, succ);
                }
            }
            order.push(next);
        }
        if order.len() != in_degree.len() {
            let stuck = in_degree
                .into_iter()
                .filter(|(id, _)| !order.contains(id))
                .map(|(id, _)| id)
                .collect();
            return Err(Error::Cycle(stuck));
        }
        Ok(order)
    }

    /// Walk paths downstream from `start`, calling `f` with each path
    /// (`path[0] == start`). Neighbor order is sorted by id.
    pub fn walk_down<F>(&self, start: &ResourceId, f: F)
    where
        F: FnMut(&[ResourceId]) -> WalkControl,
    {
        self.walk(start, Direction::Outgoing, f);
    }

    /// Walk paths upstream from `start`; `path` grows toward predecessors.
    pub fn walk_up<F>(&self, start: &ResourceId, f: F)
    where
        F: FnMut(&[ResourceId]) -> WalkControl,
    {
        self.walk(start, Direction::Incoming, f);
    }

    fn walk<F>(&self, start: &ResourceId, dir: Direction, mut f: F)
    where
        F: FnMut(&[ResourceId]) -> WalkControl,
    {
        let mut path = vec![start.clone()];
        let mut visited = vec![start.clone()];
        self.walk_inner(dir, &mut path, &mut visited, &mut f);
    }

    fn walk_inner<F>(
        &self,
        dir: Direction,
        path: &mut Vec<ResourceId>,
        visited: &mut Vec<ResourceId>,
        f: &mut F,
    ) -> bool
    where
        F: FnMut(&[ResourceId]) -> WalkControl,
    {
        let last = path.last().cloned().expect("walk path is never empty");
        for next in self.neighbors(&last, dir) {
            if visited.contains(&next) {
                continue;
            }
            visited.push(next.clone());
            path.push(next);
            match f(path) {
                WalkControl::Stop => {
                    path.pop();
                    return false;
                }
                WalkControl::SkipPath => {}
                WalkControl::Continue => {
                    if !self.walk_inner(dir, path, visited, f) {
                        path.pop();
                        return false;
                    }
                }
            }
            path.pop();
        }
        true
    }

    /// Shortest path by hop count with deterministic lexicographic
    /// tie-breaking; `None` when the target is unreachable.
    pub fn shortest_path(&self, source: &ResourceId, target: &ResourceId) -> Option<Vec<ResourceId>> {
        if !self.contains(source) || !self.contains(target) {
            return None;
        }
        if source == target {
            return Some(vec![source.clone()]);
        }
        let mut prev: IndexMap<ResourceId, ResourceId> = IndexMap::new();
        let mut frontier = vec![source.clone()];
        while !frontier.is_empty() {
            frontier.sort();
            let mut next_frontier = Vec::new();
            for node in frontier {
                for succ in self.downstream(&node) {
                    if succ == *source || prev.contains_key(&succ) {
                        continue;
                    }
                    prev.insert(succ.clone(), node.clone());
                    if succ == *target {
                        let mut rev = vec![succ.clone()];
                        let mut cur = succ;
                        while let Some(p) = prev.get(&cur) {
                            rev.push(p.clone());
                            cur = p.clone();
                        }
                        rev.reverse();
                        return Some(rev);
                    }
                    next_frontier.push(succ);
                }
            }
            frontier = next_frontier;
        }
        None
    }

    /// Rewrite a resource's identity across the graph: the node itself, the
    /// id map, and any property values (on every resource) that reference
    /// the old id. Edges follow automatically since they attach to the
    /// arena index.
    pub fn update_id(&mut self, old: &ResourceId, new: &ResourceId) -> Result<()> {
        if old == new {
            return Ok(());
        }
        if self.ids.contains_key(new) {
            return Err(Error::ResourceAlreadyExists(new.clone()));
        }
        let idx = self
            .ids
            .shift_remove(old)
            .ok_or_else(|| Error::ResourceNotFound(old.clone()))?;
        trace!(old = %old, new = %new, "updating resource id");
        self.graph[idx].id = new.clone();
        self.ids.insert(new.clone(), idx);
        for node in self.graph.node_weights_mut() {
            node.rewrite_ids(old, new);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn graph(ids: &[&str], edges: &[(&str, &str)]) -> ResourceGraph {
        let mut g = ResourceGraph::new();
        for i in ids {
            g.add_resource(Resource::new(id(i))).unwrap();
        }
        for (s, t) in edges {
            g.add_edge(&id(s), &id(t)).unwrap();
        }
        g
    }

    #[test]
    fn test_add_edge_idempotent() {
        let mut g = graph(&["p:t:a", "p:t:b"], &[("p:t:a", "p:t:b")]);
        assert!(!g.add_edge(&id("p:t:a"), &id("p:t:b")).unwrap());
        assert_eq!(g.edges().len(), 1);
    }

    #[test]
    fn test_topological_sort_deterministic() {
        let g = graph(
            &["p:t:c", "p:t:a", "p:t:b"],
            &[("p:t:a", "p:t:c"), ("p:t:b", "p:t:c")],
        );
        let order = g.topological_sort().unwrap();
        assert_eq!(
            order,
            vec![id("p:t:a"), id("p:t:b"), id("p:t:c")]
        );
    }

    #[test]
    fn test_topological_sort_cycle() {
        let g = graph(&["p:t:a", "p:t:b"], &[("p:t:a", "p:t:b"), ("p:t:b", "p:t:a")]);
        assert!(matches!(g.topological_sort(), Err(Error::Cycle(_))));
    }

    #[test]
    fn test_walk_down_skip_path() {
        let g = graph(
            &["p:t:a", "p:t:b", "p:t:c"],
            &[("p:t:a", "p:t:b"), ("p:t:b", "p:t:c")],
        );
        let mut seen = Vec::new();
        g.walk_down(&id("p:t:a"), |path| {
            seen.push(path.last().unwrap().clone());
            WalkControl::SkipPath
        });
        // SkipPath stops after the first hop
        assert_eq!(seen, vec![id("p:t:b")]);
    }

    #[test]
    fn test_shortest_path_stable() {
        // two equal-length paths a->b->d and a->c->d; b sorts before c
        let g = graph(
            &["p:t:a", "p:t:b", "p:t:c", "p:t:d"],
            &[
                ("p:t:a", "p:t:c"),
                ("p:t:a", "p:t:b"),
                ("p:t:b", "p:t:d"),
                ("p:t:c", "p:t:d"),
            ],
        );
        let path = g.shortest_path(&id("p:t:a"), &id("p:t:d")).unwrap();
        assert_eq!(path, vec![id("p:t:a"), id("p:t:b"), id("p:t:d")]);
    }

    #[test]
    fn test_update_id_rewrites_references() {
        let mut g = graph(&["p:t:a", "p:t:b"], &[("p:t:a", "p:t:b")]);
        g.get_mut(&id("p:t:b"))
            .unwrap()
            .properties
            .insert("peer".into(), Value::Id(id("p:t:a")));

        g.update_id(&id("p:t:a"), &id("p:t:ns:a")).unwrap();

        assert!(g.contains(&id("p:t:ns:a")));
        assert!(!g.contains(&id("p:t:a")));
        assert!(g.has_edge(&id("p:t:ns:a"), &id("p:t:b")));
        assert_eq!(
            g.get(&id("p:t:b")).unwrap().properties["peer"],
            Value::Id(id("p:t:ns:a"))
        );
    }
}
