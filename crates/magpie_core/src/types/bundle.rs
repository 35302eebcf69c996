use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;

use super::environment::Environment;
use super::file_type::FileType;
use super::target::Target;
use super::AssetId;

/// Controls the placement of an asset's bundle relative to its use site
#[derive(Clone, Copy, Debug, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[repr(u8)]
pub enum BundleBehavior {
  /// The bundle is embedded where it is used instead of being emitted as a
  /// separate file
  Inline = 0,
  /// The bundle may not share any context with its parent
  Isolated = 1,
}

pub type MaybeBundleBehavior = Option<BundleBehavior>;

/// An emittable artifact grouping assets of a single type
///
/// Bundles are created by the bundler from the entry assets of code-split
/// points, or synthesized by the optimizer to hold shared code. The assets a
/// bundle contains are tracked by the bundle graph; the bundle itself only
/// records its roots.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
  /// Stable identity hash, derived from the main entry asset (or unique key)
  /// and the target
  pub id: String,

  /// The file type of all assets in the bundle
  #[serde(rename = "type")]
  pub file_type: FileType,

  pub env: Arc<Environment>,

  pub target: Arc<Target>,

  /// Whether the bundle is the result of a user-declared entry point
  pub is_entry: bool,

  /// Whether the optimizer may move assets in or out of this bundle
  pub is_splittable: bool,

  pub bundle_behavior: MaybeBundleBehavior,

  /// Root assets whose reachable subgraphs comprise the bundle, in the order
  /// they were discovered
  pub entry_asset_ids: Vec<AssetId>,

  /// Distinguishes bundles that have no single entry asset (shared bundles)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unique_key: Option<String>,
}

impl Bundle {
  /// The asset the bundle is executed from. Shared bundles have none.
  pub fn main_entry_id(&self) -> Option<&AssetId> {
    self.entry_asset_ids.first()
  }

  pub fn is_inline(&self) -> bool {
    self.bundle_behavior == Some(BundleBehavior::Inline)
  }
}

/// An atomic loadable unit: the set of bundles requested together for one
/// HTML page or one async import site
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleGroup {
  pub id: String,

  /// The dependency that opened this group
  pub dependency_id: String,

  pub target: Arc<Target>,
}
