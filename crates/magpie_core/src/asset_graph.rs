use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::Direction;

use crate::types::Asset;
use crate::types::Dependency;

/// Resolution state of a dependency, set by the resolver stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DependencyState {
  New,
  /// Resolution was postponed (e.g. a weak import with no used symbols). The
  /// bundler skips these silently.
  Deferred,
  /// The module is external to the build and left for the packager.
  Excluded,
  Resolved,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AssetGraphNode {
  Root,
  Asset(Arc<Asset>),
  Dependency(Arc<Dependency>),
}

pub type NodeId = usize;

/// Mutable controls handed to traversal visitors.
#[derive(Debug, Default)]
pub struct TraversalActions {
  skip_children: bool,
}

impl TraversalActions {
  pub fn skip_children(&mut self) {
    self.skip_children = true;
  }
}

/// The input graph of the bundler: assets and the dependencies connecting
/// them, produced by the resolver/transformer stage.
///
/// Edges express "asset has dependency" and "dependency resolves to asset".
/// Nodes live in an arena indexed by [`NodeId`]; the petgraph structure only
/// carries those ids, mirroring how the rest of the pipeline addresses nodes
/// by content key.
#[derive(Clone, Debug)]
pub struct AssetGraph {
  graph: StableDiGraph<NodeId, ()>,
  nodes: Vec<AssetGraphNode>,
  dependency_states: HashMap<NodeId, DependencyState>,
  content_key_to_node_id: HashMap<String, NodeId>,
  node_id_to_node_index: HashMap<NodeId, NodeIndex>,
  root_node_id: NodeId,
}

impl Default for AssetGraph {
  fn default() -> Self {
    Self::new()
  }
}

impl AssetGraph {
  pub fn new() -> Self {
    let mut graph = StableDiGraph::new();
    let mut node_id_to_node_index = HashMap::new();
    let nodes = vec![AssetGraphNode::Root];
    let root_node_id = 0;
    node_id_to_node_index.insert(root_node_id, graph.add_node(root_node_id));

    AssetGraph {
      graph,
      nodes,
      dependency_states: HashMap::new(),
      content_key_to_node_id: HashMap::new(),
      node_id_to_node_index,
      root_node_id,
    }
  }

  pub fn root_node(&self) -> NodeId {
    self.root_node_id
  }

  pub fn nodes(&self) -> impl Iterator<Item = &AssetGraphNode> {
    self.nodes.iter()
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn get_node(&self, idx: &NodeId) -> Option<&AssetGraphNode> {
    self.nodes.get(*idx)
  }

  pub fn get_node_id_by_content_key(&self, content_key: &str) -> Option<&NodeId> {
    self.content_key_to_node_id.get(content_key)
  }

  fn add_node(&mut self, content_key: String, node: AssetGraphNode) -> NodeId {
    let node_id = if let Some(existing_node_id) = self.content_key_to_node_id.get(&content_key) {
      self.nodes[*existing_node_id] = node;
      *existing_node_id
    } else {
      let node_id = self.nodes.len();
      self.nodes.push(node);
      self.content_key_to_node_id.insert(content_key, node_id);
      node_id
    };

    let node_index = self.graph.add_node(node_id);
    self.node_id_to_node_index.insert(node_id, node_index);
    node_id
  }

  pub fn add_asset(&mut self, asset: Arc<Asset>) -> NodeId {
    self.add_node(asset.id.clone(), AssetGraphNode::Asset(asset))
  }

  pub fn add_dependency(&mut self, dependency: Dependency) -> NodeId {
    let node_id = self.add_node(dependency.id(), AssetGraphNode::Dependency(Arc::new(dependency)));
    self.dependency_states.insert(node_id, DependencyState::New);
    node_id
  }

  /// Adds a dependency connected to the graph root. Entry dependencies are
  /// the traversal starting points of the bundler.
  pub fn add_entry_dependency(&mut self, dependency: Dependency) -> NodeId {
    let dependency_idx = self.add_dependency(dependency);
    let root = self.root_node_id;
    self.add_edge(&root, &dependency_idx);
    dependency_idx
  }

  pub fn get_asset_node(&self, idx: &NodeId) -> Option<&Arc<Asset>> {
    match self.get_node(idx)? {
      AssetGraphNode::Asset(asset) => Some(asset),
      _ => None,
    }
  }

  pub fn get_dependency_node(&self, idx: &NodeId) -> Option<&Arc<Dependency>> {
    match self.get_node(idx)? {
      AssetGraphNode::Dependency(dependency) => Some(dependency),
      _ => None,
    }
  }

  pub fn get_assets(&self) -> impl Iterator<Item = &Arc<Asset>> {
    self.nodes.iter().filter_map(|node| match node {
      AssetGraphNode::Asset(asset) => Some(asset),
      _ => None,
    })
  }

  pub fn get_dependencies(&self) -> impl Iterator<Item = &Arc<Dependency>> {
    self.nodes.iter().filter_map(|node| match node {
      AssetGraphNode::Dependency(dependency) => Some(dependency),
      _ => None,
    })
  }

  pub fn dependency_state(&self, node_id: &NodeId) -> DependencyState {
    self
      .dependency_states
      .get(node_id)
      .copied()
      .unwrap_or(DependencyState::New)
  }

  pub fn set_dependency_state(&mut self, node_id: &NodeId, state: DependencyState) {
    self.dependency_states.insert(*node_id, state);
  }

  pub fn dependency_states(&self) -> &HashMap<NodeId, DependencyState> {
    &self.dependency_states
  }

  pub fn has_edge(&self, from_idx: &NodeId, to_idx: &NodeId) -> bool {
    self
      .graph
      .find_edge(
        self.node_id_to_node_index[from_idx],
        self.node_id_to_node_index[to_idx],
      )
      .is_some()
  }

  pub fn add_edge(&mut self, from_idx: &NodeId, to_idx: &NodeId) {
    self.graph.add_edge(
      self.node_id_to_node_index[from_idx],
      self.node_id_to_node_index[to_idx],
      (),
    );
  }

  pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
    use petgraph::visit::EdgeRef;
    use petgraph::visit::IntoEdgeReferences;

    self
      .graph
      .edge_references()
      .filter_map(|edge| {
        let from = *self.graph.node_weight(edge.source())?;
        let to = *self.graph.node_weight(edge.target())?;
        Some((from, to))
      })
      .collect()
  }

  /// Children of a node in the order their edges were added. Petgraph
  /// iterates adjacency newest-first, so the collected list is reversed.
  pub fn get_outgoing_neighbors(&self, node_id: &NodeId) -> Vec<NodeId> {
    let mut neighbors: Vec<NodeId> = self
      .graph
      .neighbors_directed(self.node_id_to_node_index[node_id], Direction::Outgoing)
      .filter_map(|node_index| self.graph.node_weight(node_index).copied())
      .collect();
    neighbors.reverse();
    neighbors
  }

  pub fn get_incoming_neighbors(&self, node_id: &NodeId) -> Vec<NodeId> {
    let mut neighbors: Vec<NodeId> = self
      .graph
      .neighbors_directed(self.node_id_to_node_index[node_id], Direction::Incoming)
      .filter_map(|node_index| self.graph.node_weight(node_index).copied())
      .collect();
    neighbors.reverse();
    neighbors
  }

  /// Depth-first traversal with a visitor-carried context.
  ///
  /// `enter` is invoked on descent and returns the context passed to the
  /// node's children; this is the only way children see inherited state.
  /// `exit` is invoked on ascent with the context the node produced.
  /// Visitors may request `actions.skip_children()`. Every node is visited at
  /// most once per traversal; DAG-shared subtrees are re-entered at the
  /// dependency level, since each incoming dependency is a distinct node.
  pub fn traverse<Ctx, Enter, Exit>(
    &self,
    root: NodeId,
    initial: Ctx,
    enter: &mut Enter,
    exit: &mut Exit,
  ) -> anyhow::Result<()>
  where
    Ctx: Clone,
    Enter: FnMut(NodeId, &Ctx, &mut TraversalActions) -> anyhow::Result<Ctx>,
    Exit: FnMut(NodeId, &Ctx) -> anyhow::Result<()>,
  {
    let mut visited = HashSet::new();
    self.traverse_inner(root, &initial, &mut visited, enter, exit)
  }

  fn traverse_inner<Ctx, Enter, Exit>(
    &self,
    node: NodeId,
    ctx: &Ctx,
    visited: &mut HashSet<NodeId>,
    enter: &mut Enter,
    exit: &mut Exit,
  ) -> anyhow::Result<()>
  where
    Ctx: Clone,
    Enter: FnMut(NodeId, &Ctx, &mut TraversalActions) -> anyhow::Result<Ctx>,
    Exit: FnMut(NodeId, &Ctx) -> anyhow::Result<()>,
  {
    if !visited.insert(node) {
      return Ok(());
    }

    let mut actions = TraversalActions::default();
    let child_ctx = enter(node, ctx, &mut actions)?;

    if !actions.skip_children {
      for child in self.get_outgoing_neighbors(&node) {
        self.traverse_inner(child, &child_ctx, visited, enter, exit)?;
      }
    }

    exit(node, &child_ctx)
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::types::DependencyBuilder;
  use crate::types::Target;

  use super::*;

  fn asset(path: &str) -> Arc<Asset> {
    Arc::new(Asset {
      id: crate::hash::hash_string(path),
      file_path: path.into(),
      ..Asset::default()
    })
  }

  fn build_diamond() -> (AssetGraph, Vec<NodeId>) {
    // entry -> a -> (dep_b -> b, dep_c -> c), b and c both -> dep_d -> d
    let mut graph = AssetGraph::new();
    let entry = graph.add_entry_dependency(Dependency::entry(
      "a.js".to_string(),
      Arc::new(Target::default()),
    ));

    let a = graph.add_asset(asset("a.js"));
    graph.add_edge(&entry, &a);

    let mut order = vec![entry, a];
    let mut leaves = vec![];
    for name in ["b.js", "c.js"] {
      let dep = graph.add_dependency(
        DependencyBuilder::default()
          .specifier(format!("./{name}"))
          .source_asset_id(Some(graph.get_asset_node(&a).unwrap().id.clone()))
          .build(),
      );
      graph.add_edge(&a, &dep);
      let node = graph.add_asset(asset(name));
      graph.add_edge(&dep, &node);
      order.push(dep);
      order.push(node);
      leaves.push(node);
    }

    let d = graph.add_asset(asset("d.js"));
    for (i, leaf) in leaves.iter().enumerate() {
      let dep = graph.add_dependency(
        DependencyBuilder::default()
          .specifier("./d.js".to_string())
          .source_asset_id(Some(format!("leaf{i}")))
          .build(),
      );
      graph.add_edge(leaf, &dep);
      graph.add_edge(&dep, &d);
    }

    (graph, order)
  }

  #[test]
  fn traversal_visits_children_in_insertion_order() {
    let (graph, order) = build_diamond();

    let mut entered = vec![];
    graph
      .traverse(
        graph.root_node(),
        (),
        &mut |node, _, _| {
          entered.push(node);
          Ok(())
        },
        &mut |_, _| Ok(()),
      )
      .unwrap();

    // The diamond's shared asset is entered exactly once, via the first leaf.
    assert_eq!(entered[0], graph.root_node());
    assert_eq!(entered[1..3], order[0..2]);
    let d = *graph.get_node_id_by_content_key(&asset("d.js").id).unwrap();
    assert_eq!(entered.iter().filter(|n| **n == d).count(), 1);
  }

  #[test]
  fn traversal_propagates_context_depth() {
    let (graph, _) = build_diamond();

    let mut max_depth = 0;
    graph
      .traverse(
        graph.root_node(),
        0usize,
        &mut |_, depth, _| {
          max_depth = max_depth.max(*depth);
          Ok(depth + 1)
        },
        &mut |_, _| Ok(()),
      )
      .unwrap();

    // root -> entry -> a -> dep -> b -> dep -> d
    assert_eq!(max_depth, 6);
  }

  #[test]
  fn skip_children_prunes_the_subtree() {
    let (graph, _) = build_diamond();

    let mut entered = vec![];
    graph
      .traverse(
        graph.root_node(),
        (),
        &mut |node, _, actions| {
          entered.push(node);
          if graph.get_asset_node(&node).is_some() {
            actions.skip_children();
          }
          Ok(())
        },
        &mut |_, _| Ok(()),
      )
      .unwrap();

    // Pruned at the first asset: root, entry dependency, a.js.
    assert_eq!(entered.len(), 3);
  }

  #[test]
  fn exit_runs_after_children() {
    let (graph, _) = build_diamond();

    let mut exited = vec![];
    graph
      .traverse(
        graph.root_node(),
        (),
        &mut |_, _, _| Ok(()),
        &mut |node, _| {
          exited.push(node);
          Ok(())
        },
      )
      .unwrap();

    assert_eq!(*exited.last().unwrap(), graph.root_node());
  }
}
