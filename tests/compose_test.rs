//! Compose topology across several manifests

use stackup::compose::{EdgeKind, ImageSource, TopologyResolver};
use stackup::env::EnvironmentMap;
use stackup::DiagnosticKind;
use std::path::Path;
use tempfile::tempdir;

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[test]
fn test_three_file_cycle_terminates() {
    let temp = tempdir().unwrap();
    write(
        &temp.path().join("a.yaml"),
        "include: [b.yaml]\nservices:\n  a:\n    image: a:1\n",
    );
    write(
        &temp.path().join("b.yaml"),
        "include:\n  - path: sub/c.yaml\nservices:\n  b:\n    image: b:1\n",
    );
    write(
        &temp.path().join("sub/c.yaml"),
        "include: [../a.yaml]\nservices:\n  c:\n    image: c:1\n",
    );

    let resolver = TopologyResolver::new(EnvironmentMap::new().finalize());
    let outcome = resolver.resolve(&temp.path().join("a.yaml")).unwrap();

    assert_eq!(
        outcome.diagnostics.count_kind(DiagnosticKind::CycleDetected),
        1
    );
    let names: Vec<&str> = outcome
        .value
        .entries
        .iter()
        .map(|e| e.service.as_str())
        .collect();
    assert_eq!(names, vec!["c", "b", "a"]);
    assert_eq!(outcome.value.edges[0].kind, EdgeKind::Include);
}

#[test]
fn test_templated_paths_and_overrides() {
    let temp = tempdir().unwrap();
    write(
        &temp.path().join("compose.yaml"),
        r#"
include:
  - ${STACK_DIR:-stacks}/llm.yaml
services:
  proxy:
    image: ${PROXY_IMAGE:-nginx}:${PROXY_TAG:-latest}
    container_name: ${PROJECT}-proxy
    ports: ["80:80"]
"#,
    );
    write(
        &temp.path().join("stacks/llm.yaml"),
        r#"
services:
  ollama:
    extends:
      file: base.yaml
      service: gpu
  ollama-pinned:
    image: ollama/ollama:0.3
    extends:
      file: base.yaml
      service: gpu
"#,
    );
    write(
        &temp.path().join("stacks/base.yaml"),
        "services:\n  gpu:\n    image: ollama/ollama:latest\n    container_name: llm\n",
    );

    let env = EnvironmentMap::from_pairs([("PROJECT", "demo"), ("PROXY_TAG", "1.27")])
        .resolve(false)
        .unwrap()
        .value;
    let resolver = TopologyResolver::new(env);
    let outcome = resolver.resolve(temp.path()).unwrap();
    assert!(outcome.diagnostics.is_empty());

    let node = outcome.value;
    let proxy = node.entry("proxy").unwrap();
    assert_eq!(proxy.source, ImageSource::Image("nginx:1.27".to_string()));
    assert_eq!(proxy.container_name.as_deref(), Some("demo-proxy"));

    let inherited = node.entry("ollama").unwrap();
    assert_eq!(
        inherited.source,
        ImageSource::Image("ollama/ollama:latest".to_string())
    );
    assert_eq!(inherited.container_name.as_deref(), Some("llm"));

    let pinned = node.entry("ollama-pinned").unwrap();
    assert_eq!(
        pinned.source,
        ImageSource::Image("ollama/ollama:0.3".to_string())
    );

    // compose.yaml, llm.yaml and base.yaml
    assert_eq!(resolver.cache().len(), 3);
}

#[test]
fn test_concurrent_resolutions_share_the_cache() {
    let temp = tempdir().unwrap();
    write(
        &temp.path().join("shared.yaml"),
        "services:\n  db:\n    image: postgres:16\n",
    );
    for name in ["one", "two", "three", "four"] {
        write(
            &temp.path().join(format!("{}.yaml", name)),
            &format!(
                "include: [shared.yaml]\nservices:\n  {}:\n    image: {}:1\n",
                name, name
            ),
        );
    }

    let resolver = TopologyResolver::new(EnvironmentMap::new().finalize());
    std::thread::scope(|scope| {
        for name in ["one", "two", "three", "four"] {
            let resolver = resolver.clone();
            let path = temp.path().join(format!("{}.yaml", name));
            scope.spawn(move || {
                let outcome = resolver.resolve(&path).unwrap();
                assert!(outcome.diagnostics.is_empty());
                assert_eq!(outcome.value.entries.len(), 2);
            });
        }
    });

    assert_eq!(resolver.cache().len(), 5);
}

#[test]
fn test_probe_tolerates_missing_manifest() {
    let temp = tempdir().unwrap();
    let resolver = TopologyResolver::new(EnvironmentMap::new().finalize());

    assert!(resolver.resolve(&temp.path().join("missing.yaml")).is_err());

    let outcome = resolver.probe(&temp.path().join("missing.yaml"));
    assert!(outcome.value.entries.is_empty());
    assert!(!outcome.diagnostics.has_failures());
}
