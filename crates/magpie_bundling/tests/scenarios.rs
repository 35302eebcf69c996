//! End-to-end scenarios over the full five-pass pipeline, plus the
//! invariants every output bundle graph must satisfy.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use magpie_bundling::bundle;
use magpie_bundling::BundlerConfig;
use magpie_core::asset_graph::AssetGraph;
use magpie_core::asset_graph::NodeId;
use magpie_core::bundle_graph::BundleGraph;
use magpie_core::hash::hash_string;
use magpie_core::types::Asset;
use magpie_core::types::Dependency;
use magpie_core::types::DependencyBuilder;
use magpie_core::types::FileType;
use magpie_core::types::Priority;
use magpie_core::types::Target;

fn asset(path: &str, size: u64) -> Arc<Asset> {
  Arc::new(Asset {
    id: hash_string(path),
    file_path: path.into(),
    file_type: FileType::from_extension(
      std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or(""),
    ),
    size,
    ..Asset::default()
  })
}

fn add_entry(graph: &mut AssetGraph, path: &str, size: u64, target: &Arc<Target>) -> NodeId {
  let entry = graph.add_entry_dependency(Dependency::entry(path.to_string(), target.clone()));
  let node = graph.add_asset(asset(path, size));
  graph.add_edge(&entry, &node);
  node
}

fn import(graph: &mut AssetGraph, from: NodeId, to: NodeId, priority: Priority) -> NodeId {
  let source_id = graph.get_asset_node(&from).unwrap().id.clone();
  let specifier = graph
    .get_asset_node(&to)
    .unwrap()
    .file_path
    .display()
    .to_string();
  let dep = graph.add_dependency(
    DependencyBuilder::default()
      .specifier(format!("./{specifier}"))
      .source_asset_id(Some(source_id))
      .priority(priority)
      .build(),
  );
  graph.add_edge(&from, &dep);
  graph.add_edge(&dep, &to);
  dep
}

/// The invariants of §8 that must hold on every final bundle graph.
fn assert_invariants(graph: &AssetGraph, bundle_graph: &BundleGraph, config: &BundlerConfig) {
  // Coverage: every asset reachable from an entry is in at least one bundle.
  let mut reachable_assets = vec![];
  graph
    .traverse(
      graph.root_node(),
      (),
      &mut |node, _, _| {
        if graph.get_asset_node(&node).is_some() {
          reachable_assets.push(node);
        }
        Ok(())
      },
      &mut |_, _| Ok(()),
    )
    .unwrap();
  for asset_node in reachable_assets {
    assert!(
      !bundle_graph.find_bundles_with_asset(asset_node).is_empty(),
      "asset {:?} is in no bundle",
      graph.get_asset_node(&asset_node).unwrap().file_path
    );
  }

  for bundle_node in bundle_graph.bundles() {
    let bundle = bundle_graph.get_bundle(bundle_node).unwrap();

    // Type homogeneity.
    for asset_node in bundle_graph.bundle_assets(bundle_node) {
      let asset = bundle_graph.get_asset(asset_node).unwrap();
      assert_eq!(
        asset.file_type, bundle.file_type,
        "asset {:?} sits in a {} bundle",
        asset.file_path,
        bundle.file_type.extension()
      );
    }

    // Ancestor-dedup correctness.
    if bundle.is_splittable && !bundle.env.is_isolated() {
      for asset_node in bundle_graph.bundle_assets(bundle_node) {
        let is_root = bundle
          .entry_asset_ids
          .contains(&bundle_graph.get_asset(asset_node).unwrap().id);
        assert!(
          is_root || !bundle_graph.is_asset_in_ancestor_bundles(bundle_node, asset_node),
          "bundle still duplicates an ancestor-provided asset"
        );
      }
    }

    // Shared-bundle lower bound.
    if bundle.unique_key.is_some() {
      let total: u64 = bundle_graph
        .bundle_assets(bundle_node)
        .iter()
        .map(|asset_node| bundle_graph.get_asset(*asset_node).unwrap().size)
        .sum();
      assert!(total >= config.min_bundle_size);
      assert!(bundle_graph.get_bundle_groups_containing_bundle(bundle_node).len() > config.min_bundles);
    }
  }

  for group_node in bundle_graph.bundle_groups() {
    // Group capacity.
    let members = bundle_graph.get_bundles_in_bundle_group(group_node);
    assert!(members.len() <= config.max_parallel_requests);

    // No orphan groups.
    let group = bundle_graph.get_bundle_group(group_node).unwrap();
    let opened_by_entry = bundle_graph
      .get_node_id_by_content_key(&group.dependency_id)
      .and_then(|dep| bundle_graph.get_dependency(dep).cloned())
      .map_or(false, |dep| dep.is_entry);
    assert!(
      opened_by_entry
        || !bundle_graph
          .get_parent_bundles_of_bundle_group(group_node)
          .is_empty(),
      "bundle group has no parent bundles and is not an entry group"
    );
  }
}

#[test]
fn s1_html_entry_with_script() {
  let mut graph = AssetGraph::new();
  let target = Arc::new(Target::default());
  let html = add_entry(&mut graph, "a.html", 100, &target);
  let js = graph.add_asset(asset("a.js", 1000));
  import(&mut graph, html, js, Priority::Sync);

  let config = BundlerConfig::default();
  let bundle_graph = bundle(&graph, &config).unwrap();
  assert_invariants(&graph, &bundle_graph, &config);

  let groups = bundle_graph.bundle_groups();
  assert_eq!(groups.len(), 1);
  let bundles = bundle_graph.get_bundles_in_bundle_group(groups[0]);
  assert_eq!(bundles.len(), 2);

  let html_bundle = bundles[0];
  let js_bundle = bundles[1];
  assert_eq!(
    bundle_graph.get_bundle(html_bundle).unwrap().file_type,
    FileType::Html
  );
  assert_eq!(
    bundle_graph.get_bundle(js_bundle).unwrap().file_type,
    FileType::Js
  );

  // The js bundle is referenced from the html bundle and shares its group's
  // target.
  assert_eq!(bundle_graph.get_referenced_bundles(html_bundle), vec![js_bundle]);
  let group_target = bundle_graph.get_bundle_group(groups[0]).unwrap().target.clone();
  assert_eq!(bundle_graph.get_bundle(js_bundle).unwrap().target, group_target);
}

#[test]
fn s2_dynamic_import_opens_its_own_group() {
  let mut graph = AssetGraph::new();
  let target = Arc::new(Target::default());
  let a = add_entry(&mut graph, "a.js", 1000, &target);
  let b = graph.add_asset(asset("b.js", 10_000));
  import(&mut graph, a, b, Priority::Lazy);

  let config = BundlerConfig::default();
  let bundle_graph = bundle(&graph, &config).unwrap();
  assert_invariants(&graph, &bundle_graph, &config);

  let groups = bundle_graph.bundle_groups();
  assert_eq!(groups.len(), 2);
  assert_eq!(bundle_graph.bundles().len(), 2);

  let async_members = bundle_graph.get_bundles_in_bundle_group(groups[1]);
  assert_eq!(async_members.len(), 1);
  assert!(bundle_graph.bundle_has_asset(async_members[0], b));
  assert!(!bundle_graph.bundle_has_asset(async_members[0], a));
}

#[test]
fn s3_large_shared_code_is_extracted() {
  let mut graph = AssetGraph::new();
  let target = Arc::new(Target::default());
  let shared = graph.add_asset(asset("shared.js", 40_000));
  let a = add_entry(&mut graph, "a.js", 1000, &target);
  import(&mut graph, a, shared, Priority::Sync);
  let c = add_entry(&mut graph, "c.js", 1000, &target);
  import(&mut graph, c, shared, Priority::Sync);

  let config = BundlerConfig::default();
  let bundle_graph = bundle(&graph, &config).unwrap();
  assert_invariants(&graph, &bundle_graph, &config);

  let bundles = bundle_graph.bundles();
  assert_eq!(bundles.len(), 3);

  let shared_bundles = bundle_graph.find_bundles_with_asset(shared);
  assert_eq!(shared_bundles.len(), 1);
  let shared_bundle = shared_bundles[0];
  assert!(bundle_graph.get_bundle(shared_bundle).unwrap().unique_key.is_some());

  // Both entry groups load {entry bundle, shared bundle}.
  for group in bundle_graph.bundle_groups() {
    let members = bundle_graph.get_bundles_in_bundle_group(group);
    assert_eq!(members.len(), 2);
    assert!(members.contains(&shared_bundle));
  }
  // The entries no longer carry the shared code themselves.
  assert!(!bundle_graph.bundle_has_asset(bundle_graph.bundles()[0], shared));
}

#[test]
fn s4_small_shared_code_is_duplicated() {
  let mut graph = AssetGraph::new();
  let target = Arc::new(Target::default());
  let shared = graph.add_asset(asset("s.js", 20_000));
  let a = add_entry(&mut graph, "a.js", 1000, &target);
  import(&mut graph, a, shared, Priority::Sync);
  let c = add_entry(&mut graph, "c.js", 1000, &target);
  import(&mut graph, c, shared, Priority::Sync);

  let config = BundlerConfig::default();
  let bundle_graph = bundle(&graph, &config).unwrap();
  assert_invariants(&graph, &bundle_graph, &config);

  // Below the size threshold: no shared bundle, the asset is duplicated.
  let bundles = bundle_graph.bundles();
  assert_eq!(bundles.len(), 2);
  assert_eq!(bundle_graph.find_bundles_with_asset(shared).len(), 2);
  for bundle in bundles {
    assert!(bundle_graph.get_bundle(bundle).unwrap().unique_key.is_none());
  }
}

#[test]
fn s5_async_import_of_static_code_is_internalized() {
  let mut graph = AssetGraph::new();
  let target = Arc::new(Target::default());
  let a = add_entry(&mut graph, "a.js", 1000, &target);
  let b = graph.add_asset(asset("b.js", 5000));
  import(&mut graph, a, b, Priority::Sync);
  let async_dep = import(&mut graph, a, b, Priority::Lazy);

  let config = BundlerConfig::default();
  let bundle_graph = bundle(&graph, &config).unwrap();
  assert_invariants(&graph, &bundle_graph, &config);

  // One group remains; the async group was internalized away.
  assert_eq!(bundle_graph.bundle_groups().len(), 1);
  let bundles = bundle_graph.bundles();
  assert_eq!(bundles.len(), 1);
  assert!(bundle_graph.bundle_has_asset(bundles[0], b));
  assert_eq!(
    bundle_graph.internalized_dependencies(bundles[0]),
    vec![async_dep]
  );
}

#[test]
fn s6_mixed_type_page_loads_parallel_bundles() {
  let mut graph = AssetGraph::new();
  let target = Arc::new(Target::default());
  let html = add_entry(&mut graph, "a.html", 100, &target);
  let js = graph.add_asset(asset("a.js", 1000));
  import(&mut graph, html, js, Priority::Sync);
  let css = graph.add_asset(asset("a.css", 500));
  import(&mut graph, html, css, Priority::Sync);

  let config = BundlerConfig::default();
  let bundle_graph = bundle(&graph, &config).unwrap();
  assert_invariants(&graph, &bundle_graph, &config);

  let groups = bundle_graph.bundle_groups();
  assert_eq!(groups.len(), 1);
  let members = bundle_graph.get_bundles_in_bundle_group(groups[0]);
  let types: Vec<FileType> = members
    .iter()
    .map(|bundle| bundle_graph.get_bundle(*bundle).unwrap().file_type.clone())
    .collect();
  assert_eq!(types, vec![FileType::Html, FileType::Js, FileType::Css]);

  // The typed bundles are siblings of the page bundle, and their entry
  // assets are referenced from dependencies that live in the html bundle.
  let html_bundle = members[0];
  let js_bundle = members[1];
  assert_eq!(
    bundle_graph.get_sibling_bundles(html_bundle),
    vec![js_bundle, members[2]]
  );
  assert!(bundle_graph.is_asset_referenced_by_dependant(js_bundle, js));
  assert!(!bundle_graph.is_asset_referenced_by_dependant(html_bundle, js));
}

#[test]
fn inline_assets_form_inline_bundles_in_the_parent_group() {
  use magpie_core::types::BundleBehavior;

  let mut graph = AssetGraph::new();
  let target = Arc::new(Target::default());
  let a = add_entry(&mut graph, "a.js", 1000, &target);
  let inline = graph.add_asset(Arc::new(Asset {
    id: hash_string("inline.js"),
    file_path: "inline.js".into(),
    size: 200,
    bundle_behavior: Some(BundleBehavior::Inline),
    ..Asset::default()
  }));
  import(&mut graph, a, inline, Priority::Sync);

  let config = BundlerConfig::default();
  let bundle_graph = bundle(&graph, &config).unwrap();
  assert_invariants(&graph, &bundle_graph, &config);

  let bundles = bundle_graph.bundles();
  assert_eq!(bundles.len(), 2);
  let inline_bundle = bundles[1];
  let bundle = bundle_graph.get_bundle(inline_bundle).unwrap();
  assert!(bundle.is_inline());
  assert!(!bundle.is_entry);
  assert!(bundle_graph.bundle_has_asset(inline_bundle, inline));
}

#[test]
fn worker_entries_duplicate_instead_of_sharing() {
  use magpie_core::types::Environment;
  use magpie_core::types::EnvironmentContext;

  let worker_env = Arc::new(Environment {
    context: EnvironmentContext::WebWorker,
    ..Environment::default()
  });
  let worker_asset = |path: &str| {
    Arc::new(Asset {
      id: hash_string(path),
      file_path: path.into(),
      size: 40_000,
      env: worker_env.clone(),
      ..Asset::default()
    })
  };

  let mut graph = AssetGraph::new();
  let target = Arc::new(Target::default());
  let a = add_entry(&mut graph, "a.js", 1000, &target);
  let util = graph.add_asset(asset("util.js", 40_000));
  import(&mut graph, a, util, Priority::Sync);

  // A worker whose code also pulls in util.js.
  let worker = graph.add_asset(worker_asset("worker.js"));
  import(&mut graph, a, worker, Priority::Lazy);
  import(&mut graph, worker, util, Priority::Sync);

  let config = BundlerConfig::default();
  let bundle_graph = bundle(&graph, &config).unwrap();
  assert_invariants(&graph, &bundle_graph, &config);

  // util.js is large and appears twice, but the worker bundle may not share
  // with the page, so no shared bundle is created.
  let util_bundles = bundle_graph.find_bundles_with_asset(util);
  assert_eq!(util_bundles.len(), 2);
  for bundle in bundle_graph.bundles() {
    assert!(bundle_graph.get_bundle(bundle).unwrap().unique_key.is_none());
  }
}

#[test]
fn deterministic_output_for_identical_inputs() {
  let build = || {
    let mut graph = AssetGraph::new();
    let target = Arc::new(Target::default());
    let shared = graph.add_asset(asset("shared.js", 40_000));
    let a = add_entry(&mut graph, "a.js", 1000, &target);
    import(&mut graph, a, shared, Priority::Sync);
    let c = add_entry(&mut graph, "c.js", 1000, &target);
    import(&mut graph, c, shared, Priority::Sync);
    let b = graph.add_asset(asset("b.js", 10_000));
    import(&mut graph, a, b, Priority::Lazy);
    bundle(&graph, &BundlerConfig::default()).unwrap()
  };

  let first = build();
  let second = build();

  let ids = |bundle_graph: &BundleGraph| -> Vec<String> {
    bundle_graph
      .bundles()
      .iter()
      .map(|bundle| bundle_graph.get_bundle(*bundle).unwrap().id.clone())
      .collect()
  };
  assert_eq!(ids(&first), ids(&second));

  let group_members = |bundle_graph: &BundleGraph| -> Vec<Vec<String>> {
    bundle_graph
      .bundle_groups()
      .iter()
      .map(|group| {
        bundle_graph
          .get_bundles_in_bundle_group(*group)
          .iter()
          .map(|bundle| bundle_graph.get_bundle(*bundle).unwrap().id.clone())
          .collect()
      })
      .collect()
  };
  assert_eq!(group_members(&first), group_members(&second));
}
