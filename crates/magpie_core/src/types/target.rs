use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use super::environment::Environment;

/// A target represents how and where output bundles are emitted
///
/// For example, a multi-page application has one browser target, while a
/// library may have separate "main" and "module" targets.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
  /// The output folder for compiled bundles
  pub dist_dir: PathBuf,

  /// The output filename of the entry
  pub dist_entry: Option<PathBuf>,

  /// The environment the code will run in
  pub env: Arc<Environment>,

  /// The name of the target
  pub name: String,

  /// The URL bundles will be loaded with at runtime
  pub public_url: String,
}

impl Default for Target {
  fn default() -> Self {
    Self {
      dist_dir: PathBuf::from("dist"),
      dist_entry: None,
      env: Arc::new(Environment::default()),
      name: String::from("default"),
      public_url: String::from("/"),
    }
  }
}
