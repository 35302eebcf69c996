use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use thiserror::Error;

use crate::asset_graph::AssetGraph;
use crate::asset_graph::AssetGraphNode;
use crate::asset_graph::DependencyState;
use crate::asset_graph::TraversalActions;
use crate::hash::hash_string;
use crate::types::Asset;
use crate::types::Bundle;
use crate::types::BundleGroup;
use crate::types::Dependency;
use crate::types::Environment;
use crate::types::FileType;
use crate::types::MaybeBundleBehavior;
use crate::types::Target;

pub type NodeId = usize;

/// Violations of the bundle graph's structural invariants. These indicate a
/// bug in the calling pass, not a property of the input, and abort bundling.
#[derive(Debug, Error)]
pub enum BundleGraphError {
  #[error("expected {expected} node at {node}")]
  UnexpectedNodeKind { expected: &'static str, node: NodeId },

  #[error("bundle must be created with an entry asset or a unique key")]
  MissingBundleSource,

  #[error("bundle created from a unique key is missing its {0}")]
  IncompleteBundle(&'static str),
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BundleGraphEdgeType {
  /// Asset graph structure, copied verbatim from the input.
  Null,
  /// Bundle to the asset and dependency nodes it contains.
  Contains,
  /// Group membership, dependency-to-group attachment, bundle-to-group
  /// loads, and root-to-group registration.
  Bundle,
  /// Bundle-to-bundle references and dependency-to-asset references.
  References,
  /// Async dependency satisfied inside the bundle; the code generator elides
  /// the loader call.
  InternalAsync,
}

#[derive(Clone, Debug)]
pub enum BundleGraphNode {
  Root,
  Asset(Arc<Asset>),
  Dependency(Arc<Dependency>),
  Bundle(Bundle),
  BundleGroup(BundleGroup),
}

/// Options for [`BundleGraph::create_bundle`]. Fields left as `None` are
/// derived from the entry asset.
#[derive(Clone, Debug)]
pub struct InitialBundle {
  pub entry_asset: Option<NodeId>,
  pub unique_key: Option<String>,
  pub file_type: Option<FileType>,
  pub env: Option<Arc<Environment>>,
  pub target: Arc<Target>,
  pub is_entry: bool,
  pub is_splittable: Option<bool>,
  pub bundle_behavior: MaybeBundleBehavior,
}

impl Default for InitialBundle {
  fn default() -> Self {
    Self {
      entry_asset: None,
      unique_key: None,
      file_type: None,
      env: None,
      target: Arc::new(Target::default()),
      is_entry: false,
      is_splittable: None,
      bundle_behavior: None,
    }
  }
}

/// How a dependency that crosses a bundle boundary resolves.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExternalResolution {
  /// The dependency loads a bundle group at runtime.
  BundleGroup(NodeId),
  /// The dependency is satisfied by an asset in another bundle.
  Asset(NodeId),
}

/// The mutable output structure of the bundler: the input asset graph's
/// nodes and edges, overlaid with bundle and bundle-group nodes and the
/// typed edges connecting them.
///
/// The copied structure keeps the asset graph's node ids, so traversal state
/// computed over the (immutable) asset graph addresses this graph directly.
/// The copied `Null` edges are only ever removed when a dependency is
/// rewritten into an asset reference; everything else the bundler does is
/// expressed with overlay edges, which keeps resolution queries answerable
/// at every intermediate state.
#[derive(Clone, Debug)]
pub struct BundleGraph {
  graph: StableDiGraph<NodeId, BundleGraphEdgeType>,
  nodes: Vec<BundleGraphNode>,
  node_id_to_node_index: HashMap<NodeId, NodeIndex>,
  content_key_to_node_id: HashMap<String, NodeId>,
  dependency_states: HashMap<NodeId, DependencyState>,
  root_node_id: NodeId,
}

impl BundleGraph {
  pub fn from_asset_graph(asset_graph: &AssetGraph) -> Self {
    let mut graph = StableDiGraph::new();
    let mut nodes = Vec::with_capacity(asset_graph.node_count());
    let mut node_id_to_node_index = HashMap::new();
    let mut content_key_to_node_id = HashMap::new();

    for (node_id, node) in asset_graph.nodes().enumerate() {
      let copied = match node {
        AssetGraphNode::Root => BundleGraphNode::Root,
        AssetGraphNode::Asset(asset) => {
          content_key_to_node_id.insert(asset.id.clone(), node_id);
          BundleGraphNode::Asset(asset.clone())
        }
        AssetGraphNode::Dependency(dependency) => {
          content_key_to_node_id.insert(dependency.id(), node_id);
          BundleGraphNode::Dependency(dependency.clone())
        }
      };
      nodes.push(copied);
      node_id_to_node_index.insert(node_id, graph.add_node(node_id));
    }

    let mut bundle_graph = Self {
      graph,
      nodes,
      node_id_to_node_index,
      content_key_to_node_id,
      dependency_states: asset_graph.dependency_states().clone(),
      root_node_id: asset_graph.root_node(),
    };

    for (from, to) in asset_graph.edges() {
      bundle_graph.add_edge_once(from, to, BundleGraphEdgeType::Null);
    }

    bundle_graph
  }

  pub fn root_node(&self) -> NodeId {
    self.root_node_id
  }

  fn is_live(&self, node: NodeId) -> bool {
    self.node_id_to_node_index.contains_key(&node)
  }

  pub fn get_node(&self, node: NodeId) -> Option<&BundleGraphNode> {
    if !self.is_live(node) {
      return None;
    }
    self.nodes.get(node)
  }

  pub fn get_node_id_by_content_key(&self, content_key: &str) -> Option<NodeId> {
    self.content_key_to_node_id.get(content_key).copied()
  }

  pub fn get_asset(&self, node: NodeId) -> Option<&Arc<Asset>> {
    match self.get_node(node)? {
      BundleGraphNode::Asset(asset) => Some(asset),
      _ => None,
    }
  }

  pub fn get_dependency(&self, node: NodeId) -> Option<&Arc<Dependency>> {
    match self.get_node(node)? {
      BundleGraphNode::Dependency(dependency) => Some(dependency),
      _ => None,
    }
  }

  pub fn get_bundle(&self, node: NodeId) -> Option<&Bundle> {
    match self.get_node(node)? {
      BundleGraphNode::Bundle(bundle) => Some(bundle),
      _ => None,
    }
  }

  fn get_bundle_mut(&mut self, node: NodeId) -> Option<&mut Bundle> {
    if !self.is_live(node) {
      return None;
    }
    match self.nodes.get_mut(node)? {
      BundleGraphNode::Bundle(bundle) => Some(bundle),
      _ => None,
    }
  }

  pub fn get_bundle_group(&self, node: NodeId) -> Option<&BundleGroup> {
    match self.get_node(node)? {
      BundleGraphNode::BundleGroup(group) => Some(group),
      _ => None,
    }
  }

  /// All live bundle nodes in creation order.
  pub fn bundles(&self) -> Vec<NodeId> {
    (0..self.nodes.len())
      .filter(|node| self.is_live(*node) && matches!(self.nodes[*node], BundleGraphNode::Bundle(_)))
      .collect()
  }

  /// All live bundle group nodes in creation order.
  pub fn bundle_groups(&self) -> Vec<NodeId> {
    (0..self.nodes.len())
      .filter(|node| {
        self.is_live(*node) && matches!(self.nodes[*node], BundleGraphNode::BundleGroup(_))
      })
      .collect()
  }

  pub fn dependency_state(&self, node: NodeId) -> DependencyState {
    self
      .dependency_states
      .get(&node)
      .copied()
      .unwrap_or(DependencyState::New)
  }

  // ----------------------------
  // Edge plumbing
  // ----------------------------

  /// Neighbors over edges of one type, in edge insertion order. Petgraph
  /// iterates adjacency newest-first, so the collected list is reversed.
  fn outgoing(&self, node: NodeId, edge_type: BundleGraphEdgeType) -> Vec<NodeId> {
    let Some(&node_index) = self.node_id_to_node_index.get(&node) else {
      return Vec::new();
    };
    let mut neighbors: Vec<NodeId> = self
      .graph
      .edges_directed(node_index, Direction::Outgoing)
      .filter(|edge| *edge.weight() == edge_type)
      .filter_map(|edge| self.graph.node_weight(edge.target()).copied())
      .collect();
    neighbors.reverse();
    neighbors
  }

  fn incoming(&self, node: NodeId, edge_type: BundleGraphEdgeType) -> Vec<NodeId> {
    let Some(&node_index) = self.node_id_to_node_index.get(&node) else {
      return Vec::new();
    };
    let mut neighbors: Vec<NodeId> = self
      .graph
      .edges_directed(node_index, Direction::Incoming)
      .filter(|edge| *edge.weight() == edge_type)
      .filter_map(|edge| self.graph.node_weight(edge.source()).copied())
      .collect();
    neighbors.reverse();
    neighbors
  }

  pub fn has_edge(&self, from: NodeId, to: NodeId, edge_type: BundleGraphEdgeType) -> bool {
    let (Some(&from_index), Some(&to_index)) = (
      self.node_id_to_node_index.get(&from),
      self.node_id_to_node_index.get(&to),
    ) else {
      return false;
    };
    self
      .graph
      .edges_directed(from_index, Direction::Outgoing)
      .any(|edge| edge.target() == to_index && *edge.weight() == edge_type)
  }

  fn add_edge_once(&mut self, from: NodeId, to: NodeId, edge_type: BundleGraphEdgeType) {
    let (Some(&from_index), Some(&to_index)) = (
      self.node_id_to_node_index.get(&from),
      self.node_id_to_node_index.get(&to),
    ) else {
      return;
    };
    if !self.has_edge(from, to, edge_type) {
      self.graph.add_edge(from_index, to_index, edge_type);
    }
  }

  fn remove_edge(&mut self, from: NodeId, to: NodeId, edge_type: BundleGraphEdgeType) {
    let (Some(&from_index), Some(&to_index)) = (
      self.node_id_to_node_index.get(&from),
      self.node_id_to_node_index.get(&to),
    ) else {
      return;
    };
    let edge = self
      .graph
      .edges_directed(from_index, Direction::Outgoing)
      .find(|edge| edge.target() == to_index && *edge.weight() == edge_type)
      .map(|edge| edge.id());
    if let Some(edge) = edge {
      self.graph.remove_edge(edge);
    }
  }

  fn remove_node(&mut self, node: NodeId) {
    let content_key = match self.nodes.get(node) {
      Some(BundleGraphNode::Bundle(bundle)) => Some(bundle.id.clone()),
      Some(BundleGraphNode::BundleGroup(group)) => Some(format!("bundle_group:{}", group.id)),
      Some(BundleGraphNode::Asset(asset)) => Some(asset.id.clone()),
      Some(BundleGraphNode::Dependency(dependency)) => Some(dependency.id()),
      _ => None,
    };
    if let Some(key) = content_key {
      self.content_key_to_node_id.remove(&key);
    }
    if let Some(node_index) = self.node_id_to_node_index.remove(&node) {
      self.graph.remove_node(node_index);
    }
  }

  fn add_node(&mut self, content_key: String, node: BundleGraphNode) -> NodeId {
    let node_id = if let Some(existing_node_id) = self.content_key_to_node_id.get(&content_key) {
      *existing_node_id
    } else {
      let node_id = self.nodes.len();
      self.nodes.push(node);
      self.content_key_to_node_id.insert(content_key, node_id);
      self
        .node_id_to_node_index
        .insert(node_id, self.graph.add_node(node_id));
      node_id
    };
    node_id
  }

  // ----------------------------
  // Construction operations
  // ----------------------------

  pub fn create_bundle_group(
    &mut self,
    dependency: NodeId,
    target: Arc<Target>,
  ) -> Result<NodeId, BundleGraphError> {
    let dependency_id = self
      .get_dependency(dependency)
      .ok_or(BundleGraphError::UnexpectedNodeKind {
        expected: "dependency",
        node: dependency,
      })?
      .id();

    let id = hash_string(format!("{}:{}", dependency_id, target.name));
    let group = BundleGroup {
      id: id.clone(),
      dependency_id,
      target,
    };
    let node = self.add_node(
      format!("bundle_group:{id}"),
      BundleGraphNode::BundleGroup(group),
    );
    self.add_edge_once(dependency, node, BundleGraphEdgeType::Bundle);
    let root = self.root_node_id;
    self.add_edge_once(root, node, BundleGraphEdgeType::Bundle);
    Ok(node)
  }

  pub fn create_bundle(&mut self, init: InitialBundle) -> Result<NodeId, BundleGraphError> {
    let InitialBundle {
      entry_asset,
      unique_key,
      file_type,
      env,
      target,
      is_entry,
      is_splittable,
      bundle_behavior,
    } = init;

    let (source_key, file_type, env, is_splittable, bundle_behavior, entry_asset_ids) =
      match entry_asset {
        Some(asset_node) => {
          let asset = self
            .get_asset(asset_node)
            .ok_or(BundleGraphError::UnexpectedNodeKind {
              expected: "asset",
              node: asset_node,
            })?
            .clone();
          (
            asset.id.clone(),
            file_type.unwrap_or_else(|| asset.file_type.clone()),
            env.unwrap_or_else(|| asset.env.clone()),
            is_splittable.unwrap_or(asset.is_bundle_splittable),
            bundle_behavior.or(asset.bundle_behavior),
            vec![asset.id.clone()],
          )
        }
        None => {
          let key = unique_key
            .clone()
            .ok_or(BundleGraphError::MissingBundleSource)?;
          (
            key,
            file_type.ok_or(BundleGraphError::IncompleteBundle("file type"))?,
            env.ok_or(BundleGraphError::IncompleteBundle("environment"))?,
            is_splittable.unwrap_or(true),
            bundle_behavior,
            Vec::new(),
          )
        }
      };

    let id = hash_string(format!(
      "{}:{}:{}",
      source_key,
      target.name,
      target.dist_dir.display()
    ));
    let bundle = Bundle {
      id: id.clone(),
      file_type,
      env,
      target,
      is_entry,
      is_splittable,
      bundle_behavior,
      entry_asset_ids,
      unique_key,
    };
    Ok(self.add_node(id, BundleGraphNode::Bundle(bundle)))
  }

  /// Idempotent; membership order within the group is first-add order.
  pub fn add_bundle_to_bundle_group(&mut self, bundle: NodeId, group: NodeId) {
    self.add_edge_once(group, bundle, BundleGraphEdgeType::Bundle);
  }

  /// Records an additional root asset on an existing bundle.
  pub fn add_bundle_entry_asset(&mut self, bundle: NodeId, asset: NodeId) {
    let Some(asset_id) = self.get_asset(asset).map(|a| a.id.clone()) else {
      return;
    };
    if let Some(bundle) = self.get_bundle_mut(bundle) {
      if !bundle.entry_asset_ids.contains(&asset_id) {
        bundle.entry_asset_ids.push(asset_id);
      }
    }
  }

  /// Attaches `asset` and everything transitively reachable from it via
  /// dependencies that do not cross a split point. Split-point dependencies
  /// (those attached to a bundle group) are still contained, and contribute
  /// a load edge from the bundle to their group. Idempotent.
  pub fn add_asset_graph_to_bundle(&mut self, asset: NodeId, bundle: NodeId) {
    let mut visited = HashSet::new();
    let mut stack = vec![asset];
    while let Some(node) = stack.pop() {
      if !visited.insert(node) {
        continue;
      }
      match self.nodes.get(node) {
        Some(BundleGraphNode::Asset(_)) => {
          self.add_edge_once(bundle, node, BundleGraphEdgeType::Contains);
          stack.extend(self.outgoing(node, BundleGraphEdgeType::Null));
        }
        Some(BundleGraphNode::Dependency(_)) => {
          self.add_edge_once(bundle, node, BundleGraphEdgeType::Contains);
          let groups = self.outgoing(node, BundleGraphEdgeType::Bundle);
          if groups.is_empty() {
            stack.extend(self.outgoing(node, BundleGraphEdgeType::Null));
          } else {
            for group in groups {
              self.add_edge_once(bundle, group, BundleGraphEdgeType::Bundle);
            }
          }
        }
        _ => {}
      }
    }
  }

  /// Nodes of the asset subgraph rooted at `start`, restricted to nodes the
  /// bundle currently contains. `excluding` cuts one node out of the walk,
  /// which answers "what would remain reachable without it".
  fn reachable_within_bundle(
    &self,
    start: NodeId,
    bundle: NodeId,
    excluding: Option<NodeId>,
  ) -> Vec<NodeId> {
    let mut reachable = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
      if Some(node) == excluding {
        continue;
      }
      if !visited.insert(node) {
        continue;
      }
      if !self.has_edge(bundle, node, BundleGraphEdgeType::Contains) {
        continue;
      }
      reachable.push(node);
      match self.nodes.get(node) {
        Some(BundleGraphNode::Asset(_)) => {
          stack.extend(self.outgoing(node, BundleGraphEdgeType::Null));
        }
        Some(BundleGraphNode::Dependency(_)) => {
          if self.outgoing(node, BundleGraphEdgeType::Bundle).is_empty() {
            stack.extend(self.outgoing(node, BundleGraphEdgeType::Null));
          }
        }
        _ => {}
      }
    }
    reachable
  }

  /// Inverse of [`Self::add_asset_graph_to_bundle`]: detaches the subgraph
  /// rooted at `asset`, keeping any node the bundle's other entries would
  /// still reach once `asset` is gone.
  pub fn remove_asset_graph_from_bundle(&mut self, asset: NodeId, bundle: NodeId) {
    let removable = self.reachable_within_bundle(asset, bundle, None);

    let mut keep: HashSet<NodeId> = HashSet::new();
    let other_entries: Vec<NodeId> = self
      .get_bundle(bundle)
      .map(|b| b.entry_asset_ids.clone())
      .unwrap_or_default()
      .iter()
      .filter_map(|id| self.get_node_id_by_content_key(id))
      .filter(|&entry| entry != asset)
      .collect();
    for entry in other_entries {
      keep.extend(self.reachable_within_bundle(entry, bundle, Some(asset)));
    }

    for node in removable {
      if keep.contains(&node) {
        continue;
      }
      self.remove_edge(bundle, node, BundleGraphEdgeType::Contains);
      if self.get_dependency(node).is_some() {
        for group in self.outgoing(node, BundleGraphEdgeType::Bundle) {
          self.detach_group_if_unused(bundle, group);
        }
      }
    }

    let removed_id = self.get_asset(asset).map(|a| a.id.clone());
    if let (Some(removed_id), Some(bundle)) = (removed_id, self.get_bundle_mut(bundle)) {
      bundle.entry_asset_ids.retain(|id| *id != removed_id);
    }
  }

  /// Rewrites a dependency to resolve to an asset in another bundle. The
  /// structural edge is replaced so containment traversals stop here; the
  /// packager uses the reference to rewrite the import.
  pub fn create_asset_reference(&mut self, dependency: NodeId, asset: NodeId) {
    self.add_edge_once(dependency, asset, BundleGraphEdgeType::References);
    self.remove_edge(dependency, asset, BundleGraphEdgeType::Null);
  }

  pub fn create_bundle_reference(&mut self, from: NodeId, to: NodeId) {
    self.add_edge_once(from, to, BundleGraphEdgeType::References);
  }

  /// Marks an async dependency as satisfied inside `bundle`, releasing the
  /// bundle's hold on the dependency's group.
  pub fn internalize_async_dependency(&mut self, bundle: NodeId, dependency: NodeId) {
    self.add_edge_once(bundle, dependency, BundleGraphEdgeType::InternalAsync);
    for group in self.outgoing(dependency, BundleGraphEdgeType::Bundle) {
      self.detach_group_if_unused(bundle, group);
    }
  }

  fn detach_group_if_unused(&mut self, bundle: NodeId, group: NodeId) {
    let still_required = self.bundle_dependencies(bundle).into_iter().any(|dep| {
      self.has_edge(dep, group, BundleGraphEdgeType::Bundle)
        && !self.has_edge(bundle, dep, BundleGraphEdgeType::InternalAsync)
    });
    if !still_required {
      self.remove_edge(bundle, group, BundleGraphEdgeType::Bundle);
    }
  }

  /// Removes a bundle group, along with any member bundle left in no other
  /// group.
  pub fn remove_bundle_group(&mut self, group: NodeId) {
    let members = self.get_bundles_in_bundle_group(group);
    self.remove_node(group);
    for bundle in members {
      if self.get_bundle_groups_containing_bundle(bundle).is_empty() {
        self.remove_node(bundle);
      }
    }
  }

  // ----------------------------
  // Queries
  // ----------------------------

  /// Assets the dependency resolves to: structural targets plus rewritten
  /// asset references.
  pub fn get_dependency_assets(&self, dependency: NodeId) -> Vec<NodeId> {
    let mut assets: Vec<NodeId> = self
      .outgoing(dependency, BundleGraphEdgeType::Null)
      .into_iter()
      .filter(|node| self.get_asset(*node).is_some())
      .collect();
    for node in self.outgoing(dependency, BundleGraphEdgeType::References) {
      if self.get_asset(node).is_some() && !assets.contains(&node) {
        assets.push(node);
      }
    }
    assets
  }

  /// The unique resolution of a dependency, when it has one.
  pub fn get_dependency_resolution(&self, dependency: NodeId) -> Option<NodeId> {
    self.get_dependency_assets(dependency).into_iter().next()
  }

  pub fn get_dependencies(&self, asset: NodeId) -> Vec<NodeId> {
    self
      .outgoing(asset, BundleGraphEdgeType::Null)
      .into_iter()
      .filter(|node| self.get_dependency(*node).is_some())
      .collect()
  }

  pub fn bundle_has_asset(&self, bundle: NodeId, asset: NodeId) -> bool {
    self.has_edge(bundle, asset, BundleGraphEdgeType::Contains)
  }

  pub fn bundle_has_dependency(&self, bundle: NodeId, dependency: NodeId) -> bool {
    self.has_edge(bundle, dependency, BundleGraphEdgeType::Contains)
  }

  pub fn bundle_assets(&self, bundle: NodeId) -> Vec<NodeId> {
    self
      .outgoing(bundle, BundleGraphEdgeType::Contains)
      .into_iter()
      .filter(|node| self.get_asset(*node).is_some())
      .collect()
  }

  pub fn bundle_dependencies(&self, bundle: NodeId) -> Vec<NodeId> {
    self
      .outgoing(bundle, BundleGraphEdgeType::Contains)
      .into_iter()
      .filter(|node| self.get_dependency(*node).is_some())
      .collect()
  }

  pub fn find_bundles_with_asset(&self, asset: NodeId) -> Vec<NodeId> {
    self
      .incoming(asset, BundleGraphEdgeType::Contains)
      .into_iter()
      .filter(|node| self.get_bundle(*node).is_some())
      .collect()
  }

  pub fn find_bundles_with_dependency(&self, dependency: NodeId) -> Vec<NodeId> {
    self
      .incoming(dependency, BundleGraphEdgeType::Contains)
      .into_iter()
      .filter(|node| self.get_bundle(*node).is_some())
      .collect()
  }

  pub fn get_bundle_groups_containing_bundle(&self, bundle: NodeId) -> Vec<NodeId> {
    self
      .incoming(bundle, BundleGraphEdgeType::Bundle)
      .into_iter()
      .filter(|node| self.get_bundle_group(*node).is_some())
      .collect()
  }

  pub fn get_bundles_in_bundle_group(&self, group: NodeId) -> Vec<NodeId> {
    self
      .outgoing(group, BundleGraphEdgeType::Bundle)
      .into_iter()
      .filter(|node| self.get_bundle(*node).is_some())
      .collect()
  }

  /// Bundles that load `group`: they contain the dependency that opened it
  /// and have not internalized that dependency.
  pub fn get_parent_bundles_of_bundle_group(&self, group: NodeId) -> Vec<NodeId> {
    self
      .incoming(group, BundleGraphEdgeType::Bundle)
      .into_iter()
      .filter(|node| self.get_bundle(*node).is_some())
      .collect()
  }

  /// Groups a bundle loads (via split-point dependencies it contains).
  pub fn get_loaded_bundle_groups(&self, bundle: NodeId) -> Vec<NodeId> {
    self
      .outgoing(bundle, BundleGraphEdgeType::Bundle)
      .into_iter()
      .filter(|node| self.get_bundle_group(*node).is_some())
      .collect()
  }

  pub fn get_referenced_bundles(&self, bundle: NodeId) -> Vec<NodeId> {
    self
      .outgoing(bundle, BundleGraphEdgeType::References)
      .into_iter()
      .filter(|node| self.get_bundle(*node).is_some())
      .collect()
  }

  /// Bundles sharing a group with `bundle`, in group membership order.
  pub fn get_sibling_bundles(&self, bundle: NodeId) -> Vec<NodeId> {
    let mut siblings = Vec::new();
    for group in self.get_bundle_groups_containing_bundle(bundle) {
      for member in self.get_bundles_in_bundle_group(group) {
        if member != bundle && !siblings.contains(&member) {
          siblings.push(member);
        }
      }
    }
    siblings
  }

  /// True when some dependency outside `bundle` references `asset`.
  pub fn is_asset_referenced_by_dependant(&self, bundle: NodeId, asset: NodeId) -> bool {
    self
      .incoming(asset, BundleGraphEdgeType::References)
      .into_iter()
      .filter(|node| self.get_dependency(*node).is_some())
      .any(|dependency| !self.bundle_has_dependency(bundle, dependency))
  }

  pub fn internalized_dependencies(&self, bundle: NodeId) -> Vec<NodeId> {
    self
      .outgoing(bundle, BundleGraphEdgeType::InternalAsync)
      .into_iter()
      .filter(|node| self.get_dependency(*node).is_some())
      .collect()
  }

  pub fn resolve_external_dependency(&self, dependency: NodeId) -> Option<ExternalResolution> {
    if let Some(group) = self
      .outgoing(dependency, BundleGraphEdgeType::Bundle)
      .into_iter()
      .next()
    {
      return Some(ExternalResolution::BundleGroup(group));
    }
    self
      .outgoing(dependency, BundleGraphEdgeType::References)
      .into_iter()
      .find(|node| self.get_asset(*node).is_some())
      .map(ExternalResolution::Asset)
  }

  /// Total size in bytes of the asset subgraph rooted at `asset`, stopping
  /// at split points. O(subgraph).
  pub fn get_total_size(&self, asset: NodeId) -> u64 {
    let mut size = 0;
    let mut visited = HashSet::new();
    let mut stack = vec![asset];
    while let Some(node) = stack.pop() {
      if !visited.insert(node) {
        continue;
      }
      match self.nodes.get(node) {
        Some(BundleGraphNode::Asset(asset)) => {
          size += asset.size;
          stack.extend(self.outgoing(node, BundleGraphEdgeType::Null));
        }
        Some(BundleGraphNode::Dependency(_)) => {
          if self.outgoing(node, BundleGraphEdgeType::Bundle).is_empty() {
            stack.extend(self.outgoing(node, BundleGraphEdgeType::Null));
          }
        }
        _ => {}
      }
    }
    size
  }

  /// True iff, through every bundle group containing `bundle`, some other
  /// bundle that is guaranteed to be loaded first contains `asset`.
  ///
  /// "Loaded first" covers co-members of the group at an earlier position,
  /// bundles referencing `bundle`, parent bundles of the group, and
  /// (recursively) their own ancestors.
  pub fn is_asset_in_ancestor_bundles(&self, bundle: NodeId, asset: NodeId) -> bool {
    let groups = self.get_bundle_groups_containing_bundle(bundle);
    if groups.is_empty() {
      return false;
    }
    groups.into_iter().all(|group| {
      self
        .ancestor_bundles_via_group(bundle, group)
        .into_iter()
        .any(|ancestor| ancestor != bundle && self.bundle_has_asset(ancestor, asset))
    })
  }

  fn ancestor_bundles_via_group(&self, bundle: NodeId, group: NodeId) -> Vec<NodeId> {
    let mut frontier: Vec<NodeId> = Vec::new();

    for member in self.get_bundles_in_bundle_group(group) {
      if member == bundle {
        break;
      }
      frontier.push(member);
    }
    frontier.extend(
      self
        .incoming(bundle, BundleGraphEdgeType::References)
        .into_iter()
        .filter(|node| self.get_bundle(*node).is_some()),
    );
    frontier.extend(self.get_parent_bundles_of_bundle_group(group));

    let mut ancestors = Vec::new();
    let mut seen = HashSet::new();
    while let Some(current) = frontier.pop() {
      if !seen.insert(current) {
        continue;
      }
      ancestors.push(current);
      frontier.extend(
        self
          .incoming(current, BundleGraphEdgeType::References)
          .into_iter()
          .filter(|node| self.get_bundle(*node).is_some()),
      );
      for containing_group in self.get_bundle_groups_containing_bundle(current) {
        frontier.extend(self.get_parent_bundles_of_bundle_group(containing_group));
      }
    }
    ancestors
  }

  // ----------------------------
  // Traversals
  // ----------------------------

  /// Depth-first visit of every asset and dependency reachable from the
  /// root, following structural edges and asset references. Visitors may
  /// prune with `actions.skip_children()`.
  pub fn traverse_contents<F>(&self, visit: &mut F)
  where
    F: FnMut(NodeId, &mut TraversalActions),
  {
    let mut visited = HashSet::new();
    let root = self.root_node_id;
    self.traverse_contents_inner(root, &mut visited, visit);
  }

  fn traverse_contents_inner<F>(&self, node: NodeId, visited: &mut HashSet<NodeId>, visit: &mut F)
  where
    F: FnMut(NodeId, &mut TraversalActions),
  {
    if !visited.insert(node) {
      return;
    }

    let mut actions = TraversalActions::default();
    match self.nodes.get(node) {
      Some(BundleGraphNode::Asset(_)) | Some(BundleGraphNode::Dependency(_)) => {
        visit(node, &mut actions);
      }
      Some(BundleGraphNode::Root) => {}
      _ => return,
    }

    let mut children = self.outgoing(node, BundleGraphEdgeType::Null);
    children.extend(self.outgoing(node, BundleGraphEdgeType::References));
    for child in children {
      let is_content = matches!(
        self.nodes.get(child),
        Some(BundleGraphNode::Asset(_)) | Some(BundleGraphNode::Dependency(_))
      );
      if is_content {
        self.traverse_contents_inner(child, visited, visit);
      }
    }
  }

  /// Post-order visit of every bundle: a bundle is visited after the groups
  /// it loads, so deeper bundles come first.
  pub fn traverse_bundles<F>(&self, exit: &mut F)
  where
    F: FnMut(NodeId),
  {
    let mut visited = HashSet::new();
    for group in self.outgoing(self.root_node_id, BundleGraphEdgeType::Bundle) {
      self.traverse_bundles_group(group, &mut visited, exit);
    }
  }

  fn traverse_bundles_group<F>(&self, group: NodeId, visited: &mut HashSet<NodeId>, exit: &mut F)
  where
    F: FnMut(NodeId),
  {
    if !visited.insert(group) {
      return;
    }
    for bundle in self.get_bundles_in_bundle_group(group) {
      self.traverse_bundles_bundle(bundle, visited, exit);
    }
  }

  fn traverse_bundles_bundle<F>(&self, bundle: NodeId, visited: &mut HashSet<NodeId>, exit: &mut F)
  where
    F: FnMut(NodeId),
  {
    if !visited.insert(bundle) {
      return;
    }
    for group in self.get_loaded_bundle_groups(bundle) {
      self.traverse_bundles_group(group, visited, exit);
    }
    exit(bundle);
  }

  /// Graphviz rendering of bundles and their assets, for debugging.
  pub fn to_dot(&self) -> String {
    let mut output = String::from("digraph bundle_graph {\n");
    for (index, bundle_node) in self.bundles().into_iter().enumerate() {
      let Some(bundle) = self.get_bundle(bundle_node) else {
        continue;
      };
      output += &format!("    subgraph cluster_bundle_{index} {{\n");
      output += &format!(
        "        label = \"{} ({})\";\n",
        bundle.id,
        bundle.file_type.extension()
      );
      for asset_node in self.bundle_assets(bundle_node) {
        if let Some(asset) = self.get_asset(asset_node) {
          output += &format!(
            "        bundle_{index}_asset_{asset_node} [label=\"{}\"];\n",
            asset.file_path.display()
          );
        }
      }
      output += "    }\n";
    }
    for bundle_node in self.bundles() {
      for group in self.get_loaded_bundle_groups(bundle_node) {
        for member in self.get_bundles_in_bundle_group(group) {
          output += &format!("    bundle_{bundle_node} -> bundle_{member};\n");
        }
      }
    }
    output += "}";
    output
  }
}
