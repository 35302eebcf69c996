//! Bundling algorithm: turns a resolved asset graph into a bundle graph.
//!
//! The algorithm is a fixed pipeline of five passes over one mutable
//! [`BundleGraph`]:
//!
//! 1. [`Bundler`] materializes bundles and bundle groups at code-split
//!    points (entries, dynamic imports, isolated and inline assets, type
//!    changes).
//! 2. Entries that are duplicated into other bundles are reparented so the
//!    existing bundle is loaded instead.
//! 3. Assets guaranteed to be loaded by an ancestor bundle are removed.
//! 4. Assets duplicated across enough bundles are factored into shared
//!    bundles, subject to size and parallel-request limits.
//! 5. Async dependencies already satisfied by the loading bundle are
//!    internalized, and bundle groups left without parents are dropped.
//!
//! The input asset graph is read-only; no pass suspends, and the bundle
//! graph is never observed in an intermediate state from outside a pass.

use anyhow::Context;
use serde::Deserialize;

use magpie_core::asset_graph::AssetGraph;
use magpie_core::bundle_graph::BundleGraph;

pub mod bundler;
pub mod optimize;

pub use bundler::Bundler;
pub use optimize::Optimizer;

/// Tunables of the bundling algorithm. The defaults match the behavior
/// described in the module docs; they can be overridden from a JSON config
/// block.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BundlerConfig {
  /// An asset must appear in strictly more than this many bundles to become
  /// a shared bundle candidate.
  pub min_bundles: usize,

  /// Minimum total size of a shared bundle, in bytes.
  pub min_bundle_size: u64,

  /// Maximum number of bundles loaded in parallel in one bundle group.
  pub max_parallel_requests: usize,
}

impl Default for BundlerConfig {
  fn default() -> Self {
    Self {
      min_bundles: 1,
      min_bundle_size: 30_000,
      max_parallel_requests: 5,
    }
  }
}

/// Runs the full bundling pipeline over `asset_graph`.
pub fn bundle(asset_graph: &AssetGraph, config: &BundlerConfig) -> anyhow::Result<BundleGraph> {
  let mut bundle_graph = BundleGraph::from_asset_graph(asset_graph);

  Bundler::default()
    .run(asset_graph, &mut bundle_graph)
    .context("initial bundling failed")?;

  Optimizer::new(config.clone())
    .run(&mut bundle_graph)
    .context("bundle optimization failed")?;

  Ok(bundle_graph)
}
