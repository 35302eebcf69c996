use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use derive_builder::Builder;
use serde::Deserialize;
use serde::Serialize;
use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;

use crate::hash::IdentifierHasher;

use super::bundle::MaybeBundleBehavior;
use super::environment::Environment;
use super::target::Target;
use super::AssetId;

pub fn create_dependency_id(
  source_asset_id: Option<&AssetId>,
  specifier: &str,
  environment_id: &str,
  target: Option<&Target>,
  bundle_behavior: &MaybeBundleBehavior,
  priority: &Priority,
) -> String {
  let mut hasher = IdentifierHasher::new();

  source_asset_id.hash(&mut hasher);
  specifier.hash(&mut hasher);
  environment_id.hash(&mut hasher);
  target.map(|t| &t.name).hash(&mut hasher);
  bundle_behavior.hash(&mut hasher);
  priority.hash(&mut hasher);

  format!("{:016x}", hasher.finish())
}

/// A dependency denotes a connection between two assets
#[derive(Builder, Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[builder(build_fn(skip))]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
  /// The import or export specifier that connects two assets together
  pub specifier: String,

  /// The environment of the dependency
  pub env: Arc<Environment>,

  /// Determines when the dependency should be loaded
  pub priority: Priority,

  /// Controls the behavior of the bundle the resolved asset is placed into
  ///
  /// This option is used in combination with priority to determine when the
  /// bundle is loaded.
  pub bundle_behavior: MaybeBundleBehavior,

  /// The id of the asset with this dependency
  pub source_asset_id: Option<AssetId>,

  /// The target associated with an entry, if any
  #[serde(default)]
  pub target: Option<Arc<Target>>,

  /// Whether the dependency is an entry
  pub is_entry: bool,

  /// Whether the dependency is optional
  ///
  /// If an optional dependency cannot be resolved, it will not fail the
  /// build.
  pub is_optional: bool,

  /// Indicates that the name should be stable over time, even when the
  /// content of the bundle changes
  pub needs_stable_name: bool,
}

impl Dependency {
  pub fn id(&self) -> String {
    create_dependency_id(
      self.source_asset_id.as_ref(),
      &self.specifier,
      &self.env.id(),
      self.target.as_deref(),
      &self.bundle_behavior,
      &self.priority,
    )
  }

  pub fn entry(specifier: String, target: Arc<Target>) -> Dependency {
    Dependency {
      env: target.env.clone(),
      is_entry: true,
      needs_stable_name: true,
      specifier,
      target: Some(target),
      ..Dependency::default()
    }
  }

  pub fn new(specifier: String, env: Arc<Environment>) -> Dependency {
    Dependency {
      env,
      specifier,
      ..Dependency::default()
    }
  }

  /// Dynamic import: resolves to a separate bundle loaded later.
  pub fn is_async(&self) -> bool {
    self.priority == Priority::Lazy
  }
}

impl DependencyBuilder {
  /// Infallible counterpart to the generated `build`: every field has a
  /// default.
  pub fn build(&self) -> Dependency {
    Dependency {
      specifier: self.specifier.clone().unwrap_or_default(),
      env: self.env.clone().unwrap_or_default(),
      priority: self.priority.unwrap_or_default(),
      bundle_behavior: self.bundle_behavior.unwrap_or_default(),
      source_asset_id: self.source_asset_id.clone().unwrap_or_default(),
      target: self.target.clone().unwrap_or_default(),
      is_entry: self.is_entry.unwrap_or_default(),
      is_optional: self.is_optional.unwrap_or_default(),
      needs_stable_name: self.needs_stable_name.unwrap_or_default(),
    }
  }
}

/// Determines when a dependency should load
#[derive(Clone, Copy, Debug, Default, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[repr(u8)]
pub enum Priority {
  /// Resolves the dependency synchronously, placing the resolved asset in
  /// the same bundle as the parent or another bundle that is already on the
  /// page
  #[default]
  Sync = 0,
  /// Places the dependency in a separate bundle loaded in parallel with the
  /// current bundle
  Parallel = 1,
  /// The dependency should be placed in a separate bundle that is loaded
  /// later
  Lazy = 2,
}
