use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::hash::IdentifierHasher;

use super::bundle::BundleBehavior;
use super::bundle::MaybeBundleBehavior;
use super::environment::Environment;
use super::file_type::FileType;

pub type AssetId = String;

#[derive(Debug)]
pub struct CreateAssetIdParams<'a> {
  pub environment_id: &'a str,
  /// Should be normalized to a project relative string so the hash is
  /// consistent between machines.
  pub file_path: &'a str,
  pub file_type: &'a FileType,
  pub unique_key: Option<&'a str>,
}

pub fn create_asset_id(params: CreateAssetIdParams) -> String {
  use std::hash::Hash;
  use std::hash::Hasher;

  tracing::debug!(?params, "creating asset id");

  let CreateAssetIdParams {
    environment_id,
    file_path,
    file_type,
    unique_key,
  } = params;

  let mut hasher = IdentifierHasher::default();
  environment_id.hash(&mut hasher);
  file_path.hash(&mut hasher);
  file_type.extension().hash(&mut hasher);
  unique_key.hash(&mut hasher);
  format!("{:016x}", hasher.finish())
}

/// An asset is a file or part of a file that may represent any data type
/// including source code, binary data, etc.
///
/// Assets are produced by the transformer stage and are opaque to the
/// bundler: it only reads their type, size, behavior and environment.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
  /// The main identity hash for the asset. It is consistent for the entire
  /// build and between builds.
  pub id: AssetId,

  /// The file path to the asset
  pub file_path: PathBuf,

  /// The file type of the asset, which may change during transformation
  #[serde(rename = "type")]
  pub file_type: FileType,

  /// Controls which bundle the asset is placed into
  pub bundle_behavior: MaybeBundleBehavior,

  /// The environment of the asset
  pub env: Arc<Environment>,

  /// The transformed size of the asset in bytes
  pub size: u64,

  /// Whether this asset can be omitted if none of its exports are being used
  pub side_effects: bool,

  /// Indicates if a bundle created from this asset may be split by the
  /// optimizer
  ///
  /// When false, all of the dependencies must be placed in a single bundle.
  pub is_bundle_splittable: bool,

  /// A unique key that identifies an asset when a transformer returns
  /// multiple assets for one file
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unique_key: Option<String>,
}

impl Default for Asset {
  fn default() -> Self {
    Self {
      id: AssetId::default(),
      file_path: PathBuf::default(),
      file_type: FileType::default(),
      bundle_behavior: None,
      env: Arc::new(Environment::default()),
      size: 0,
      side_effects: true,
      is_bundle_splittable: true,
      unique_key: None,
    }
  }
}

impl Asset {
  /// Asset embedded at its use site rather than emitted standalone.
  pub fn is_inline(&self) -> bool {
    self.bundle_behavior == Some(BundleBehavior::Inline)
  }

  /// Asset that may not share the parent bundle's context.
  pub fn is_isolated(&self) -> bool {
    self.bundle_behavior == Some(BundleBehavior::Isolated)
  }
}
