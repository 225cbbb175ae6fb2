//! Tests for stackup-core: identities, descriptor store, resolver, declarations

use stackup_core::resolver::{resolve, resolve_subset, resolve_targets, teardown_order};
use stackup_core::*;

fn id(address: &str) -> ResourceId {
    ResourceId::parse(address).unwrap()
}

fn index_of(order: &[ResourceId], address: &str) -> usize {
    order.iter().position(|r| r.address() == address).unwrap()
}

/// The five-resource stack: registry, lifecycle policy on it, two roles, and a
/// service depending on the registry and both roles.
fn five_resource_store() -> DescriptorStore {
    DescriptorStore::from_descriptors(vec![
        ResourceDescriptor::new("registry", "app"),
        ResourceDescriptor::new("lifecycle_policy", "keep_ten").depends_on(id("registry.app")),
        ResourceDescriptor::new("access_role", "build"),
        ResourceDescriptor::new("access_role", "instance"),
        ResourceDescriptor::new("hosted_service", "web")
            .depends_on(id("registry.app"))
            .depends_on(id("access_role.build"))
            .depends_on(id("access_role.instance")),
    ])
    .unwrap()
}

fn assert_topological(store: &DescriptorStore, order: &[ResourceId]) {
    for d in store.iter() {
        let Some(pos) = order.iter().position(|r| r == &d.id) else {
            continue;
        };
        for dep in d.dependencies() {
            let dep_pos = order.iter().position(|r| r == &dep).expect("dependency emitted");
            assert!(dep_pos < pos, "{} must come after {}", d.id, dep);
        }
    }
}

// ===========================================================================
// ResourceId
// ===========================================================================

#[test]
fn resource_id_parse_and_display() {
    let r = id("access_role.build");
    assert_eq!(r.kind.as_str(), "access_role");
    assert_eq!(r.name, "build");
    assert_eq!(r.to_string(), "access_role.build");
}

#[test]
fn resource_id_name_may_contain_dots() {
    let r = id("registry.app.v2");
    assert_eq!(r.kind.as_str(), "registry");
    assert_eq!(r.name, "app.v2");
}

#[test]
fn resource_id_rejects_bad_address() {
    assert!(ResourceId::parse("registry").is_err());
    assert!(ResourceId::parse(".app").is_err());
    assert!(ResourceId::parse("registry.").is_err());
}

#[test]
fn resource_id_serde_as_string() {
    let json = serde_json::to_string(&id("registry.app")).unwrap();
    assert_eq!(json, r#""registry.app""#);
    let back: ResourceId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id("registry.app"));
}

// ===========================================================================
// HealthCheckSpec
// ===========================================================================

#[test]
fn health_check_defaults_and_budget() {
    let hc = HealthCheckSpec::default();
    assert_eq!(hc.interval_secs, 10);
    assert_eq!(hc.timeout_secs, 5);
    assert_eq!(hc.healthy_threshold, 1);
    assert_eq!(hc.unhealthy_threshold, 5);
    assert_eq!(hc.wait_budget().as_secs(), 75);
}

#[test]
fn health_check_validation() {
    let r = id("hosted_service.web");
    assert!(HealthCheckSpec::default().validate(&r).is_ok());
    let bad_path = HealthCheckSpec {
        path: "health".into(),
        ..Default::default()
    };
    assert!(bad_path.validate(&r).is_err());
    let zero = HealthCheckSpec {
        healthy_threshold: 0,
        ..Default::default()
    };
    assert!(zero.validate(&r).is_err());
}

// ===========================================================================
// Resolver
// ===========================================================================

#[test]
fn five_resource_example_order() {
    let store = five_resource_store();
    let order = resolve(&store).unwrap();
    assert_eq!(order.len(), 5);
    assert_topological(&store, &order);
    assert_eq!(order.last().unwrap().address(), "hosted_service.web");
    assert!(index_of(&order, "registry.app") < index_of(&order, "lifecycle_policy.keep_ten"));
}

#[test]
fn independent_resources_keep_declaration_order() {
    let store = DescriptorStore::from_descriptors(vec![
        ResourceDescriptor::new("access_role", "b"),
        ResourceDescriptor::new("access_role", "a"),
        ResourceDescriptor::new("access_role", "c"),
    ])
    .unwrap();
    let order: Vec<String> = resolve(&store).unwrap().iter().map(|r| r.address()).collect();
    assert_eq!(order, vec!["access_role.b", "access_role.a", "access_role.c"]);
}

#[test]
fn forward_dependency_is_hoisted() {
    let store = DescriptorStore::from_descriptors(vec![
        ResourceDescriptor::new("policy_attachment", "ecr").depends_on(id("access_role.build")),
        ResourceDescriptor::new("access_role", "build"),
    ])
    .unwrap();
    let order: Vec<String> = resolve(&store).unwrap().iter().map(|r| r.address()).collect();
    assert_eq!(order, vec!["access_role.build", "policy_attachment.ecr"]);
}

#[test]
fn reference_edges_count_as_dependencies() {
    let store = DescriptorStore::from_descriptors(vec![
        ResourceDescriptor::new("hosted_service", "web")
            .with_attr("access_role", "${access_role.build.arn}"),
        ResourceDescriptor::new("access_role", "build"),
    ])
    .unwrap();
    let order = resolve(&store).unwrap();
    assert_eq!(order[0].address(), "access_role.build");
}

#[test]
fn cycle_is_reported_with_participants() {
    let store = DescriptorStore::from_descriptors(vec![
        ResourceDescriptor::new("registry", "app"),
        ResourceDescriptor::new("access_role", "a").depends_on(id("access_role.b")),
        ResourceDescriptor::new("access_role", "b").depends_on(id("access_role.c")),
        ResourceDescriptor::new("access_role", "c").depends_on(id("access_role.a")),
    ])
    .unwrap();
    let err = resolve(&store).unwrap_err();
    let members = err.cycle_members().expect("cycle error");
    assert!(members.contains(&id("access_role.a")));
    assert!(members.contains(&id("access_role.b")));
    assert!(members.contains(&id("access_role.c")));
    assert!(!members.contains(&id("registry.app")));
    assert!(err.to_string().contains("->"));
}

#[test]
fn self_dependency_is_a_cycle() {
    let store = DescriptorStore::from_descriptors(vec![
        ResourceDescriptor::new("registry", "app").depends_on(id("registry.app")),
    ])
    .unwrap();
    assert!(matches!(
        resolve(&store),
        Err(Error::CyclicDependency { .. })
    ));
}

#[test]
fn cycle_outside_target_is_still_reported() {
    let store = DescriptorStore::from_descriptors(vec![
        ResourceDescriptor::new("registry", "app"),
        ResourceDescriptor::new("access_role", "a").depends_on(id("access_role.b")),
        ResourceDescriptor::new("access_role", "b").depends_on(id("access_role.a")),
    ])
    .unwrap();
    assert!(resolve_targets(&store, &[id("registry.app")]).is_err());
}

#[test]
fn target_subset_is_closure_only() {
    let store = five_resource_store();
    let order = resolve_targets(&store, &[id("lifecycle_policy.keep_ten")]).unwrap();
    let addrs: Vec<String> = order.iter().map(|r| r.address()).collect();
    assert_eq!(addrs, vec!["registry.app", "lifecycle_policy.keep_ten"]);
}

#[test]
fn target_subset_registry_alone() {
    let store = five_resource_store();
    let order = resolve_targets(&store, &[id("registry.app")]).unwrap();
    assert_eq!(order, vec![id("registry.app")]);
}

#[test]
fn target_subset_keeps_full_relative_order() {
    let store = five_resource_store();
    let full = resolve(&store).unwrap();
    let subset = resolve_targets(&store, &[id("hosted_service.web")]).unwrap();
    assert_eq!(subset.len(), 4);
    let filtered: Vec<ResourceId> = full.into_iter().filter(|r| subset.contains(r)).collect();
    assert_eq!(filtered, subset);
}

#[test]
fn unknown_target_is_error() {
    let store = five_resource_store();
    assert!(matches!(
        resolve_targets(&store, &[id("registry.nope")]),
        Err(Error::UnknownTarget(_))
    ));
}

#[test]
fn empty_subset_means_everything() {
    let store = five_resource_store();
    assert_eq!(resolve_subset(&store, Some(&[])).unwrap().len(), 5);
    assert_eq!(resolve_subset(&store, None).unwrap().len(), 5);
}

#[test]
fn teardown_is_reverse() {
    let store = five_resource_store();
    let mut forward = resolve(&store).unwrap();
    let back = teardown_order(&store).unwrap();
    forward.reverse();
    assert_eq!(forward, back);
    assert_eq!(back[0].address(), "hosted_service.web");
}

#[test]
fn generated_dags_always_resolve_topologically() {
    // Deterministic pseudo-random DAGs: edges only point to earlier-generated
    // nodes, declared in a shuffled order.
    let mut seed: u64 = 0x5eed;
    let mut next = || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        seed >> 33
    };

    for _ in 0..50 {
        let n = 2 + (next() % 12) as usize;
        let mut descriptors: Vec<ResourceDescriptor> = Vec::new();
        for i in 0..n {
            let mut d = ResourceDescriptor::new("access_role", format!("r{}", i));
            for j in 0..i {
                if next() % 3 == 0 {
                    d = d.depends_on(ResourceId::new("access_role", format!("r{}", j)));
                }
            }
            descriptors.push(d);
        }
        for i in (1..descriptors.len()).rev() {
            let j = (next() as usize) % (i + 1);
            descriptors.swap(i, j);
        }

        let store = DescriptorStore::from_descriptors(descriptors).unwrap();
        let order = resolve(&store).unwrap();
        assert_eq!(order.len(), n);
        assert_topological(&store, &order);
    }
}

// ===========================================================================
// Declarations
// ===========================================================================

#[test]
fn declaration_with_explicit_edges() {
    let stack = Stack::from_toml_str(
        r#"
[[resource]]
kind = "access_role"
name = "build"
[resource.attributes]
trust = "build.service"

[[resource]]
kind = "policy_attachment"
name = "build_pull"
depends_on = ["access_role.build"]
[resource.attributes]
role = "${access_role.build.name}"
policy = "registry-read"
"#,
    )
    .unwrap();
    let d = stack
        .store
        .get(&id("policy_attachment.build_pull"))
        .unwrap();
    assert_eq!(d.dependencies(), vec![id("access_role.build")]);
    assert!(stack.artifact.is_none());
}

#[test]
fn declaration_artifact_must_target_registry() {
    let err = Stack::from_toml_str(
        r#"
[artifact]
registry = "access_role.build"

[[resource]]
kind = "access_role"
name = "build"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidDescriptor { .. }));
}

#[test]
fn declaration_reference_to_missing_resource() {
    let err = Stack::from_toml_str(
        r#"
[[resource]]
kind = "hosted_service"
name = "web"
[resource.attributes]
role = "${access_role.ghost.arn}"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnknownDependency { .. }));
}

#[test]
fn declaration_bad_toml() {
    assert!(matches!(
        Stack::from_toml_str("[[resource]\nkind ="),
        Err(Error::Parse(_))
    ));
}
