use anyhow::Context;
use std::collections::HashMap;
use tracing::debug;
use tracing::instrument;

use magpie_core::asset_graph::AssetGraph;
use magpie_core::asset_graph::AssetGraphNode;
use magpie_core::asset_graph::DependencyState;
use magpie_core::asset_graph::NodeId;
use magpie_core::bundle_graph::BundleGraph;
use magpie_core::bundle_graph::InitialBundle;
use magpie_core::types::Dependency;
use magpie_core::types::FileType;

/// Traversal context of the initial bundling pass. Passed by value to child
/// nodes; all mutable bundling state lives on [`Bundler`] or in the bundle
/// graph.
#[derive(Clone, Debug, Default)]
struct BundleCtx {
  bundle_group: Option<NodeId>,
  bundle_group_dependency: Option<NodeId>,
  parent_bundle: Option<NodeId>,
  parent_asset: Option<NodeId>,
}

/// Pass 1: materializes bundles from code-split points.
///
/// A depth-first traversal of the asset graph opens a bundle group whenever
/// a dependency is an entry, a dynamic import, or resolves to an isolated or
/// inline asset. Within a group, a resolved asset whose type differs from
/// its parent starts a parallel bundle of that type. Assets shared between
/// subtrees keep a record of the sibling bundles their subtree produced, so
/// a later group reaching the same asset attaches those siblings as well.
#[derive(Debug, Default)]
pub struct Bundler {
  /// Root assets per bundle, in discovery order. Contents are attached from
  /// these after the traversal.
  bundle_roots: HashMap<NodeId, Vec<NodeId>>,
  bundles_by_entry_asset: HashMap<NodeId, NodeId>,
  /// Sibling lists are shared between assets: a same-type child inherits its
  /// parent's list, so additions through either are seen by both.
  sibling_list_by_asset: HashMap<NodeId, usize>,
  sibling_lists: Vec<Vec<NodeId>>,
  /// type -> bundle, per bundle group.
  bundle_by_type: HashMap<NodeId, HashMap<FileType, NodeId>>,
}

impl Bundler {
  #[instrument(level = "debug", skip_all)]
  pub fn run(
    mut self,
    asset_graph: &AssetGraph,
    bundle_graph: &mut BundleGraph,
  ) -> anyhow::Result<()> {
    asset_graph.traverse(
      asset_graph.root_node(),
      BundleCtx::default(),
      &mut |node, ctx, _actions| self.enter(node, ctx, asset_graph, bundle_graph),
      &mut |_, _| Ok(()),
    )?;

    let bundles = bundle_graph.bundles();
    for bundle in &bundles {
      if let Some(roots) = self.bundle_roots.get(bundle) {
        for root in roots {
          bundle_graph.add_asset_graph_to_bundle(*root, *bundle);
        }
      }
    }

    debug!(
      bundles = bundles.len(),
      bundle_groups = bundle_graph.bundle_groups().len(),
      "initial bundling complete"
    );
    Ok(())
  }

  fn enter(
    &mut self,
    node: NodeId,
    ctx: &BundleCtx,
    asset_graph: &AssetGraph,
    bundle_graph: &mut BundleGraph,
  ) -> anyhow::Result<BundleCtx> {
    match asset_graph.get_node(&node) {
      Some(AssetGraphNode::Root) => Ok(ctx.clone()),
      Some(AssetGraphNode::Asset(_)) => {
        let mut next = ctx.clone();
        next.parent_asset = Some(node);
        if let Some(&bundle) = self.bundles_by_entry_asset.get(&node) {
          next.parent_bundle = Some(bundle);
        }
        Ok(next)
      }
      Some(AssetGraphNode::Dependency(dependency)) => {
        let dependency = dependency.clone();
        self.enter_dependency(node, &dependency, ctx, bundle_graph)
      }
      None => anyhow::bail!("traversal reached unknown node {node}"),
    }
  }

  fn enter_dependency(
    &mut self,
    node: NodeId,
    dependency: &Dependency,
    ctx: &BundleCtx,
    bundle_graph: &mut BundleGraph,
  ) -> anyhow::Result<BundleCtx> {
    match bundle_graph.dependency_state(node) {
      DependencyState::Deferred | DependencyState::Excluded => return Ok(ctx.clone()),
      DependencyState::New | DependencyState::Resolved => {}
    }

    let assets = bundle_graph.get_dependency_assets(node);
    if assets.is_empty() {
      anyhow::ensure!(
        dependency.is_optional,
        "dependency {} (from {:?}) did not resolve to any asset",
        dependency.specifier,
        dependency.source_asset_id
      );
      return Ok(ctx.clone());
    }

    let resolution = bundle_graph
      .get_asset(assets[0])
      .cloned()
      .with_context(|| format!("dependency {} resolved to a non-asset node", dependency.specifier))?;

    if dependency.is_entry
      || dependency.is_async()
      || resolution.is_isolated()
      || resolution.is_inline()
    {
      self.enter_split_dependency(node, dependency, &assets, ctx, bundle_graph)
    } else {
      self.enter_sync_dependency(node, dependency, &assets, ctx, bundle_graph)
    }
  }

  /// Rule 1: the dependency opens a new bundle group, with one bundle per
  /// resolved asset.
  fn enter_split_dependency(
    &mut self,
    node: NodeId,
    dependency: &Dependency,
    assets: &[NodeId],
    ctx: &BundleCtx,
    bundle_graph: &mut BundleGraph,
  ) -> anyhow::Result<BundleCtx> {
    let target = dependency
      .target
      .clone()
      .or_else(|| {
        ctx
          .bundle_group
          .and_then(|group| bundle_graph.get_bundle_group(group))
          .map(|group| group.target.clone())
      })
      .with_context(|| {
        format!(
          "dependency {} opens a bundle group but no target is in scope",
          dependency.specifier
        )
      })?;

    let group = bundle_graph.create_bundle_group(node, target.clone())?;
    debug!(
      dependency = %dependency.specifier,
      parent_group_dependency = ?ctx.bundle_group_dependency,
      assets = assets.len(),
      "opened bundle group"
    );

    for &asset_node in assets {
      let asset = bundle_graph
        .get_asset(asset_node)
        .cloned()
        .with_context(|| format!("dependency {} resolved to a non-asset node", dependency.specifier))?;

      if let Some(&existing) = self.bundles_by_entry_asset.get(&asset_node) {
        // A second split point resolving to an already-bundled asset: the
        // bundle and the siblings its subtree produced join this group too.
        let file_type = bundle_graph
          .get_bundle(existing)
          .map(|bundle| bundle.file_type.clone())
          .context("recorded entry bundle is gone")?;
        self
          .bundle_by_type
          .entry(group)
          .or_default()
          .insert(file_type, existing);
        bundle_graph.add_bundle_to_bundle_group(existing, group);
        for sibling in self.siblings_of(asset_node) {
          bundle_graph.add_bundle_to_bundle_group(sibling, group);
        }
        continue;
      }

      let bundle = bundle_graph.create_bundle(InitialBundle {
        entry_asset: Some(asset_node),
        target: target.clone(),
        is_entry: if asset.is_isolated() {
          false
        } else {
          dependency.is_entry
        },
        ..InitialBundle::default()
      })?;
      let file_type = bundle_graph
        .get_bundle(bundle)
        .map(|bundle| bundle.file_type.clone())
        .context("bundle vanished right after creation")?;

      self
        .bundle_by_type
        .entry(group)
        .or_default()
        .insert(file_type, bundle);
      self.bundle_roots.insert(bundle, vec![asset_node]);
      self.bundles_by_entry_asset.insert(asset_node, bundle);
      self.ensure_sibling_list(asset_node);
      bundle_graph.add_bundle_to_bundle_group(bundle, group);
    }

    Ok(BundleCtx {
      bundle_group: Some(group),
      bundle_group_dependency: Some(node),
      parent_bundle: ctx.parent_bundle,
      parent_asset: ctx.parent_asset,
    })
  }

  /// Rule 2: the dependency stays in the current group. Same-type assets
  /// flow into the current bundle (sibling records propagate); an asset of
  /// a different type lands in the group's bundle for that type.
  fn enter_sync_dependency(
    &mut self,
    node: NodeId,
    dependency: &Dependency,
    assets: &[NodeId],
    ctx: &BundleCtx,
    bundle_graph: &mut BundleGraph,
  ) -> anyhow::Result<BundleCtx> {
    let parent_asset_node = ctx
      .parent_asset
      .with_context(|| format!("dependency {} has no parent asset", dependency.specifier))?;
    let parent_asset = bundle_graph
      .get_asset(parent_asset_node)
      .cloned()
      .context("parent node is not an asset")?;
    let group = ctx.bundle_group.with_context(|| {
      format!(
        "dependency {} encountered outside of any bundle group",
        dependency.specifier
      )
    })?;

    let all_same_type = assets.iter().all(|&asset_node| {
      bundle_graph
        .get_asset(asset_node)
        .map_or(false, |asset| asset.file_type == parent_asset.file_type)
    });

    for &asset_node in assets {
      let asset = bundle_graph
        .get_asset(asset_node)
        .cloned()
        .with_context(|| format!("dependency {} resolved to a non-asset node", dependency.specifier))?;

      if asset.file_type == parent_asset.file_type {
        if all_same_type && self.sibling_list_by_asset.contains_key(&asset_node) {
          // Re-entry of a DAG-shared asset through a new group: the sibling
          // bundles generated for its subtree must load here as well.
          for sibling in self.siblings_of(asset_node) {
            bundle_graph.add_bundle_to_bundle_group(sibling, group);
          }
        } else if !self.sibling_list_by_asset.contains_key(&asset_node) {
          let list = if all_same_type {
            *self
              .sibling_list_by_asset
              .get(&parent_asset_node)
              .context("parent asset has no sibling record")?
          } else {
            self.new_sibling_list()
          };
          self.sibling_list_by_asset.insert(asset_node, list);
        }
        continue;
      }

      let existing_of_type = self
        .bundle_by_type
        .get(&group)
        .and_then(|by_type| by_type.get(&asset.file_type))
        .copied();
      if let Some(existing) = existing_of_type {
        // A bundle of this type already exists in the group; the subgraph
        // becomes an additional root of it.
        self
          .bundle_roots
          .get_mut(&existing)
          .context("typed bundle has no recorded roots")?
          .push(asset_node);
        bundle_graph.add_bundle_entry_asset(existing, asset_node);
        bundle_graph.create_asset_reference(node, asset_node);
        continue;
      }

      if let Some(&existing) = self.bundles_by_entry_asset.get(&asset_node) {
        // DAG-shared subtree reached from a new group: reuse its bundle and
        // attach it, with its own siblings, to this group.
        self
          .bundle_by_type
          .entry(group)
          .or_default()
          .insert(asset.file_type.clone(), existing);
        let parent_list = self.ensure_sibling_list(parent_asset_node);
        self.sibling_lists[parent_list].push(existing);
        bundle_graph.create_asset_reference(node, asset_node);
        if let Some(parent_bundle) = ctx.parent_bundle {
          bundle_graph.create_bundle_reference(parent_bundle, existing);
        }
        bundle_graph.add_bundle_to_bundle_group(existing, group);
        for sibling in self.siblings_of(asset_node) {
          bundle_graph.add_bundle_to_bundle_group(sibling, group);
        }
        continue;
      }

      let target = bundle_graph
        .get_bundle_group(group)
        .map(|group| group.target.clone())
        .context("bundle group disappeared mid-traversal")?;
      let bundle = bundle_graph.create_bundle(InitialBundle {
        entry_asset: Some(asset_node),
        target,
        is_entry: dependency.is_entry,
        ..InitialBundle::default()
      })?;

      self
        .bundle_by_type
        .entry(group)
        .or_default()
        .insert(asset.file_type.clone(), bundle);
      let parent_list = self.ensure_sibling_list(parent_asset_node);
      self.sibling_lists[parent_list].push(bundle);
      self.bundle_roots.insert(bundle, vec![asset_node]);
      self.bundles_by_entry_asset.insert(asset_node, bundle);
      self.ensure_sibling_list(asset_node);
      bundle_graph.create_asset_reference(node, asset_node);
      if let Some(parent_bundle) = ctx.parent_bundle {
        bundle_graph.create_bundle_reference(parent_bundle, bundle);
      }
      bundle_graph.add_bundle_to_bundle_group(bundle, group);
    }

    Ok(ctx.clone())
  }

  fn new_sibling_list(&mut self) -> usize {
    self.sibling_lists.push(Vec::new());
    self.sibling_lists.len() - 1
  }

  fn ensure_sibling_list(&mut self, asset: NodeId) -> usize {
    if let Some(&list) = self.sibling_list_by_asset.get(&asset) {
      return list;
    }
    let list = self.new_sibling_list();
    self.sibling_list_by_asset.insert(asset, list);
    list
  }

  fn siblings_of(&self, asset: NodeId) -> Vec<NodeId> {
    self
      .sibling_list_by_asset
      .get(&asset)
      .map(|&list| self.sibling_lists[list].clone())
      .unwrap_or_default()
  }
}
