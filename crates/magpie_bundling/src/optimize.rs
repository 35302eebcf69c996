use std::collections::BTreeMap;

use anyhow::Context;
use tracing::debug;
use tracing::instrument;

use magpie_core::bundle_graph::BundleGraph;
use magpie_core::bundle_graph::ExternalResolution;
use magpie_core::bundle_graph::InitialBundle;
use magpie_core::bundle_graph::NodeId;
use magpie_core::hash::hash_string;
use magpie_core::types::Bundle;

use crate::BundlerConfig;

/// Passes 2-5: reshapes the bundle graph produced by the initial bundling
/// pass without losing reachability for any asset.
///
/// Running the optimizer a second time over its own output is a no-op.
#[derive(Debug)]
pub struct Optimizer {
  config: BundlerConfig,
}

impl Optimizer {
  pub fn new(config: BundlerConfig) -> Self {
    Self { config }
  }

  pub fn run(&self, bundle_graph: &mut BundleGraph) -> anyhow::Result<()> {
    self.reparent_bundle_entries(bundle_graph)?;
    self.dedup_ancestor_assets(bundle_graph)?;
    self.extract_shared_bundles(bundle_graph)?;
    self.internalize_async_dependencies(bundle_graph)?;
    Ok(())
  }

  /// Pass 2: when a bundle's entry asset is duplicated inside another
  /// splittable bundle, drop the duplicate subgraph and load the existing
  /// bundle from that bundle's groups instead. Declined when a group lacks
  /// room for the bundle and its referenced siblings.
  #[instrument(level = "debug", skip_all)]
  fn reparent_bundle_entries(&self, bundle_graph: &mut BundleGraph) -> anyhow::Result<()> {
    let mut reparented = 0;
    for bundle_node in bundle_graph.bundles() {
      let Some(bundle) = bundle_graph.get_bundle(bundle_node) else {
        continue;
      };
      if bundle.is_inline() || !bundle.is_splittable {
        continue;
      }
      let Some(entry_node) = bundle
        .main_entry_id()
        .and_then(|id| bundle_graph.get_node_id_by_content_key(id))
      else {
        continue;
      };

      let siblings: Vec<NodeId> = bundle_graph
        .get_referenced_bundles(bundle_node)
        .into_iter()
        .filter(|&sibling| {
          bundle_graph
            .get_bundle(sibling)
            .map_or(false, |bundle| !bundle.is_inline())
        })
        .collect();

      let candidates: Vec<NodeId> = bundle_graph
        .find_bundles_with_asset(entry_node)
        .into_iter()
        .filter(|&containing| {
          containing != bundle_node
            && bundle_graph.get_bundle(containing).map_or(false, |bundle| {
              !bundle.is_entry && !bundle.is_inline() && bundle.is_splittable
            })
        })
        .collect();

      for containing in candidates {
        let groups = bundle_graph.get_bundle_groups_containing_bundle(containing);
        let fits = groups.iter().all(|&group| {
          let members = bundle_graph.get_bundles_in_bundle_group(group);
          let mut needed = usize::from(!members.contains(&bundle_node));
          needed += siblings
            .iter()
            .filter(|sibling| !members.contains(sibling))
            .count();
          members.len() + needed <= self.config.max_parallel_requests
        });
        if !fits {
          continue;
        }

        bundle_graph.remove_asset_graph_from_bundle(entry_node, containing);
        for group in groups {
          bundle_graph.add_bundle_to_bundle_group(bundle_node, group);
          for &sibling in &siblings {
            bundle_graph.add_bundle_to_bundle_group(sibling, group);
          }
        }
        reparented += 1;
      }
    }
    debug!(reparented, "reparented duplicated bundle entries");
    Ok(())
  }

  /// Pass 3: removes asset subgraphs that every load path already provides
  /// through an ancestor bundle. Bundles are visited deepest-first.
  #[instrument(level = "debug", skip_all)]
  fn dedup_ancestor_assets(&self, bundle_graph: &mut BundleGraph) -> anyhow::Result<()> {
    let mut order = Vec::new();
    bundle_graph.traverse_bundles(&mut |bundle| order.push(bundle));
    for bundle in order {
      self.dedup_bundle(bundle_graph, bundle)?;
    }
    Ok(())
  }

  fn dedup_bundle(&self, bundle_graph: &mut BundleGraph, bundle_node: NodeId) -> anyhow::Result<()> {
    let Some(bundle) = bundle_graph.get_bundle(bundle_node) else {
      return Ok(());
    };
    if bundle.env.is_isolated() || !bundle.is_splittable {
      return Ok(());
    }

    for dependency in bundle_graph.bundle_dependencies(bundle_node) {
      if !bundle_graph.bundle_has_dependency(bundle_node, dependency) {
        // already removed along with an earlier duplicate subgraph
        continue;
      }
      for asset in bundle_graph.get_dependency_assets(dependency) {
        if bundle_graph.bundle_has_asset(bundle_node, asset)
          && bundle_graph.is_asset_in_ancestor_bundles(bundle_node, asset)
        {
          bundle_graph.remove_asset_graph_from_bundle(asset, bundle_node);
        }
      }
    }
    Ok(())
  }

  /// Pass 4: assets duplicated across more than `min_bundles` splittable
  /// bundles are factored into a shared bundle per co-occurring bundle set,
  /// largest candidates first, while every affected group stays under the
  /// parallel request limit.
  #[instrument(level = "debug", skip_all)]
  fn extract_shared_bundles(&self, bundle_graph: &mut BundleGraph) -> anyhow::Result<()> {
    #[derive(Default)]
    struct Candidate {
      assets: Vec<NodeId>,
      source_bundles: Vec<NodeId>,
      size: u64,
    }

    // BTreeMap keyed by the sorted bundle-id set: iteration and tie-breaks
    // are deterministic.
    let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();

    bundle_graph.traverse_contents(&mut |node, actions| {
      let Some(asset) = bundle_graph.get_asset(node) else {
        return;
      };
      let asset_id = asset.id.clone();

      let containing: Vec<NodeId> = bundle_graph
        .find_bundles_with_asset(node)
        .into_iter()
        .filter(|&bundle_node| {
          bundle_graph.get_bundle(bundle_node).map_or(false, |bundle| {
            bundle.is_splittable
              && !bundle.is_inline()
              && !bundle.env.is_isolated()
              && bundle.main_entry_id() != Some(&asset_id)
          })
        })
        .collect();

      if containing.len() <= self.config.min_bundles {
        return;
      }

      let mut bundle_ids: Vec<String> = containing
        .iter()
        .filter_map(|&bundle_node| bundle_graph.get_bundle(bundle_node))
        .map(|bundle| bundle.id.clone())
        .collect();
      bundle_ids.sort();
      let key = bundle_ids.join(":");

      let candidate = candidates.entry(key).or_default();
      if candidate.source_bundles.is_empty() {
        candidate.source_bundles = containing;
      }
      candidate.assets.push(node);
      candidate.size += bundle_graph.get_total_size(node);

      // the parent accounts for the whole subtree
      actions.skip_children();
    });

    let mut sorted: Vec<(String, Candidate)> = candidates
      .into_iter()
      .filter(|(_, candidate)| candidate.size >= self.config.min_bundle_size)
      .collect();
    sorted.sort_by(|(key_a, a), (key_b, b)| b.size.cmp(&a.size).then(key_a.cmp(key_b)));

    for (key, candidate) in sorted {
      let mut groups: Vec<NodeId> = Vec::new();
      for &source in &candidate.source_bundles {
        for group in bundle_graph.get_bundle_groups_containing_bundle(source) {
          if !groups.contains(&group) {
            groups.push(group);
          }
        }
      }

      // declined, not an error: the shared bundle would push a group over
      // the parallel request limit
      if groups.iter().any(|&group| {
        bundle_graph.get_bundles_in_bundle_group(group).len() >= self.config.max_parallel_requests
      }) {
        debug!(candidate = %key, "skipping shared bundle: a group is at capacity");
        continue;
      }

      let first_source = candidate
        .source_bundles
        .first()
        .copied()
        .context("shared bundle candidate has no source bundles")?;
      let template: Bundle = bundle_graph
        .get_bundle(first_source)
        .context("source bundle disappeared before extraction")?
        .clone();
      anyhow::ensure!(
        candidate.source_bundles.iter().all(|&source| {
          bundle_graph
            .get_bundle(source)
            .map_or(false, |bundle| bundle.file_type == template.file_type)
        }),
        "shared bundle sources disagree on type"
      );

      let shared = bundle_graph.create_bundle(InitialBundle {
        entry_asset: None,
        unique_key: Some(hash_string(&key)),
        file_type: Some(template.file_type.clone()),
        env: Some(template.env.clone()),
        target: template.target.clone(),
        is_entry: false,
        is_splittable: Some(true),
        bundle_behavior: None,
      })?;

      for &asset in &candidate.assets {
        bundle_graph.add_asset_graph_to_bundle(asset, shared);
        for &source in &candidate.source_bundles {
          bundle_graph.remove_asset_graph_from_bundle(asset, source);
        }
      }
      for group in groups {
        bundle_graph.add_bundle_to_bundle_group(shared, group);
      }

      self.dedup_bundle(bundle_graph, shared)?;
      debug!(
        candidate = %key,
        assets = candidate.assets.len(),
        size = candidate.size,
        "extracted shared bundle"
      );
    }
    Ok(())
  }

  /// Pass 5: async dependencies whose resolution is already present in (or
  /// guaranteed loaded before) the requesting bundle are marked internal,
  /// and async groups left without parents are removed.
  #[instrument(level = "debug", skip_all)]
  fn internalize_async_dependencies(&self, bundle_graph: &mut BundleGraph) -> anyhow::Result<()> {
    let mut async_groups: Vec<NodeId> = Vec::new();
    let mut internalized: Vec<(NodeId, NodeId)> = Vec::new();

    bundle_graph.traverse_contents(&mut |node, _actions| {
      let Some(dependency) = bundle_graph.get_dependency(node) else {
        return;
      };
      if dependency.is_entry || !dependency.is_async() {
        return;
      }
      let Some(resolution) = bundle_graph.get_dependency_resolution(node) else {
        return;
      };

      if let Some(ExternalResolution::BundleGroup(group)) =
        bundle_graph.resolve_external_dependency(node)
      {
        if !async_groups.contains(&group) {
          async_groups.push(group);
        }
      }

      for bundle in bundle_graph.find_bundles_with_dependency(node) {
        if bundle_graph.bundle_has_asset(bundle, resolution)
          || bundle_graph.is_asset_in_ancestor_bundles(bundle, resolution)
        {
          internalized.push((bundle, node));
        }
      }
    });

    for (bundle, dependency) in internalized {
      bundle_graph.internalize_async_dependency(bundle, dependency);
    }

    let mut removed = 0;
    for group in async_groups {
      if bundle_graph.get_parent_bundles_of_bundle_group(group).is_empty() {
        bundle_graph.remove_bundle_group(group);
        removed += 1;
      }
    }
    debug!(removed, "removed parentless async bundle groups");
    Ok(())
  }
}
