use std::hash::Hash;
use std::hash::Hasher;

use serde::Deserialize;
use serde::Serialize;

use crate::hash::IdentifierHasher;

/// The environment the built code will run in
///
/// This influences how bundles may share code: bundles whose environment is
/// isolated cannot reach code loaded by an ancestor page.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
  /// The environment the output should run in
  pub context: EnvironmentContext,

  /// Determines what type of module to output
  pub output_format: OutputFormat,

  /// Whether this is a library build
  ///
  /// Treats the target as a library that would be published and consumed by
  /// another tool, rather than used directly in a browser or other target
  /// environment.
  pub is_library: bool,

  pub source_type: SourceType,
}

impl Environment {
  /// Stable identifier derived from the environment's fields.
  pub fn id(&self) -> String {
    let mut hasher = IdentifierHasher::new();
    self.context.hash(&mut hasher);
    self.output_format.hash(&mut hasher);
    self.is_library.hash(&mut hasher);
    self.source_type.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
  }

  /// True when code running in this environment cannot access assets loaded
  /// by an ancestor bundle (workers run in their own global scope).
  pub fn is_isolated(&self) -> bool {
    self.context.is_worker() || self.context.is_worklet()
  }
}

/// The environment the output should run in
///
/// This informs the bundler what environment-specific APIs are available.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentContext {
  #[default]
  Browser,
  Node,
  ServiceWorker,
  WebWorker,
  Worklet,
}

impl EnvironmentContext {
  pub fn is_node(&self) -> bool {
    matches!(self, EnvironmentContext::Node)
  }

  pub fn is_browser(&self) -> bool {
    use EnvironmentContext::*;
    matches!(self, Browser | WebWorker | ServiceWorker | Worklet)
  }

  pub fn is_worker(&self) -> bool {
    use EnvironmentContext::*;
    matches!(self, WebWorker | ServiceWorker)
  }

  pub fn is_worklet(&self) -> bool {
    matches!(self, EnvironmentContext::Worklet)
  }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
  #[default]
  #[serde(rename = "esmodule")]
  EsModule,
  #[serde(rename = "commonjs")]
  CommonJS,
  Global,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum SourceType {
  #[default]
  #[serde(rename = "module")]
  Module,
  #[serde(rename = "script")]
  Script,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn environment_ids_are_stable_and_distinct() {
    let default_env = Environment::default();
    assert_eq!(default_env.id(), Environment::default().id());
    assert_eq!(default_env.id().len(), 16);

    let node_env = Environment {
      context: EnvironmentContext::Node,
      output_format: OutputFormat::CommonJS,
      ..Environment::default()
    };
    assert_ne!(default_env.id(), node_env.id());
  }

  #[test]
  fn worker_contexts_are_isolated() {
    let worker = Environment {
      context: EnvironmentContext::WebWorker,
      ..Environment::default()
    };
    assert!(worker.is_isolated());
    assert!(!Environment::default().is_isolated());
  }
}
