//! Package install/upgrade/rollback/uninstall workflow tests.

use std::sync::Arc;

use semver::Version;
use serde_json::json;

use objectstack_kernel::package::{
    NamespaceResolver, PackageFailure, PackageManager, PackageManifest,
};
use objectstack_kernel::resolver::GraphNode;

fn manifest(value: serde_json::Value) -> PackageManifest {
    serde_json::from_value(value).expect("test manifest")
}

fn manager() -> PackageManager {
    PackageManager::new(Version::new(3, 0, 0), Arc::new(NamespaceResolver::new()))
}

#[tokio::test]
async fn install_registers_namespaces_and_lists_satisfied_dependencies() {
    let manager = manager();
    manager
        .install("base-pkg", "1.0.0", manifest(json!({})))
        .await
        .expect("install base");

    let report = manager
        .install(
            "crm",
            "1.0.0",
            manifest(json!({
                "dependencies": { "base-pkg": "^1.0.0" },
                "objects": { "task": {} },
                "views": { "task_list": {} }
            })),
        )
        .await
        .expect("install crm");

    assert_eq!(report.installed_dependencies, ["base-pkg"]);
    assert!(manager.is_installed("crm"));
    let resolver = manager.namespace_resolver();
    assert_eq!(resolver.owner_of("objects.task").as_deref(), Some("crm"));
    assert_eq!(resolver.owner_of("views.task_list").as_deref(), Some("crm"));
}

#[tokio::test]
async fn install_rejects_a_package_that_is_already_installed() {
    let manager = manager();
    manager
        .install("crm", "1.0.0", manifest(json!({})))
        .await
        .expect("first install");

    let err = manager
        .install("crm", "2.0.0", manifest(json!({})))
        .await
        .expect_err("must fail");
    assert_eq!(
        err,
        PackageFailure::AlreadyInstalled {
            package_id: "crm".to_owned()
        }
    );
}

#[tokio::test]
async fn install_rejects_a_platform_mismatch_before_anything_else() {
    let manager = manager();
    let err = manager
        .install(
            "crm",
            "1.0.0",
            manifest(json!({
                "engine": { "objectstack": "^4.0.0" },
                "objects": { "task": {} }
            })),
        )
        .await
        .expect_err("must fail");

    assert!(matches!(
        err,
        PackageFailure::PlatformIncompatible { required, .. } if required == "^4.0.0"
    ));
    // Nothing was mutated.
    assert!(!manager.is_installed("crm"));
    assert!(manager
        .namespace_resolver()
        .owner_of("objects.task")
        .is_none());
}

#[tokio::test]
async fn install_lists_every_missing_dependency() {
    let manager = manager();
    manager
        .install("present", "1.0.0", manifest(json!({})))
        .await
        .expect("install");

    let err = manager
        .install(
            "crm",
            "1.0.0",
            manifest(json!({
                "dependencies": {
                    "present": "*",
                    "zeta": "^1.0.0",
                    "alpha": "^2.0.0"
                }
            })),
        )
        .await
        .expect_err("must fail");

    assert_eq!(
        err,
        PackageFailure::MissingDependencies {
            package_id: "crm".to_owned(),
            missing: vec!["alpha".to_owned(), "zeta".to_owned()],
        }
    );
}

#[tokio::test]
async fn install_conflict_names_the_existing_owner() {
    let manager = manager();
    manager
        .install(
            "pkg-a",
            "1.0.0",
            manifest(json!({ "objects": { "task": {} } })),
        )
        .await
        .expect("install pkg-a");

    let err = manager
        .install(
            "pkg-b",
            "1.0.0",
            manifest(json!({ "objects": { "task": {} } })),
        )
        .await
        .expect_err("must conflict");

    let PackageFailure::NamespaceConflicts { conflicts, .. } = err else {
        panic!("expected namespace conflicts, got {err:?}");
    };
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].namespace, "objects.task");
    assert_eq!(conflicts[0].existing_package_id, "pkg-a");
    assert_eq!(conflicts[0].incoming_package_id, "pkg-b");

    // pkg-b left no trace.
    assert!(!manager.is_installed("pkg-b"));
    assert_eq!(
        manager.namespace_resolver().owner_of("objects.task").as_deref(),
        Some("pkg-a")
    );
}

#[tokio::test]
async fn uninstall_refuses_while_dependents_remain_then_succeeds_in_order() {
    let manager = manager();
    manager
        .install("pkg-a", "1.0.0", manifest(json!({})))
        .await
        .expect("install pkg-a");
    manager
        .install(
            "pkg-b",
            "1.0.0",
            manifest(json!({ "dependencies": { "pkg-a": "*" } })),
        )
        .await
        .expect("install pkg-b");

    let err = manager.uninstall("pkg-a").await.expect_err("must fail");
    assert_eq!(
        err,
        PackageFailure::DependentsExist {
            package_id: "pkg-a".to_owned(),
            dependents: vec!["pkg-b".to_owned()],
        }
    );

    manager.uninstall("pkg-b").await.expect("uninstall pkg-b");
    manager.uninstall("pkg-a").await.expect("uninstall pkg-a");
    assert!(manager.list_packages().is_empty());
}

#[tokio::test]
async fn uninstall_releases_namespaces() {
    let manager = manager();
    manager
        .install(
            "crm",
            "1.0.0",
            manifest(json!({ "objects": { "task": {} } })),
        )
        .await
        .expect("install");

    let report = manager.uninstall("crm").await.expect("uninstall");
    assert_eq!(report.removed_namespaces, ["objects.task"]);

    // The namespace is free for anyone again.
    let availability = manager
        .namespace_resolver()
        .check_availability("other", &["objects.task".to_owned()]);
    assert!(availability.available);
}

#[tokio::test]
async fn uninstalling_an_unknown_package_fails() {
    let manager = manager();
    let err = manager.uninstall("ghost").await.expect_err("must fail");
    assert_eq!(
        err,
        PackageFailure::NotInstalled {
            package_id: "ghost".to_owned()
        }
    );
}

#[tokio::test]
async fn upgrade_swaps_version_manifest_and_namespace_set() {
    let manager = manager();
    manager
        .install(
            "crm",
            "1.0.0",
            manifest(json!({ "objects": { "task": {} } })),
        )
        .await
        .expect("install");

    let report = manager
        .upgrade(
            "crm",
            "2.0.0",
            manifest(json!({ "objects": { "project": {} }, "views": { "board": {} } })),
        )
        .await
        .expect("upgrade");

    assert_eq!(report.previous_version, "1.0.0");
    assert_eq!(report.version, "2.0.0");

    let record = manager.get_package("crm").expect("record");
    assert_eq!(record.version, "2.0.0");

    let resolver = manager.namespace_resolver();
    assert!(resolver.owner_of("objects.task").is_none());
    assert_eq!(resolver.owner_of("objects.project").as_deref(), Some("crm"));
    assert_eq!(resolver.owner_of("views.board").as_deref(), Some("crm"));
}

#[tokio::test]
async fn upgrade_does_not_conflict_with_the_packages_own_namespaces() {
    let manager = manager();
    manager
        .install(
            "crm",
            "1.0.0",
            manifest(json!({ "objects": { "task": {} } })),
        )
        .await
        .expect("install");

    // Same namespace set, new version: must not self-conflict.
    manager
        .upgrade(
            "crm",
            "1.1.0",
            manifest(json!({ "objects": { "task": {} } })),
        )
        .await
        .expect("self-overlapping upgrade");
}

#[tokio::test]
async fn a_conflicting_upgrade_mutates_nothing() {
    let manager = manager();
    manager
        .install(
            "pkg-a",
            "1.0.0",
            manifest(json!({ "objects": { "task": {} } })),
        )
        .await
        .expect("install pkg-a");
    manager
        .install(
            "pkg-b",
            "1.0.0",
            manifest(json!({ "objects": { "project": {} } })),
        )
        .await
        .expect("install pkg-b");

    let err = manager
        .upgrade(
            "pkg-a",
            "2.0.0",
            manifest(json!({ "objects": { "task": {}, "project": {} } })),
        )
        .await
        .expect_err("must conflict");

    let PackageFailure::NamespaceConflicts { conflicts, .. } = err else {
        panic!("expected namespace conflicts, got {err:?}");
    };
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].existing_package_id, "pkg-b");

    // pkg-a is untouched: old version, old namespaces, no snapshot.
    let record = manager.get_package("pkg-a").expect("record");
    assert_eq!(record.version, "1.0.0");
    assert_eq!(
        manager.namespace_resolver().owner_of("objects.task").as_deref(),
        Some("pkg-a")
    );
    assert!(!manager.has_snapshot("pkg-a"));
}

#[tokio::test]
async fn upgrading_an_unknown_package_fails() {
    let manager = manager();
    let err = manager
        .upgrade("ghost", "2.0.0", manifest(json!({})))
        .await
        .expect_err("must fail");
    assert_eq!(
        err,
        PackageFailure::NotInstalled {
            package_id: "ghost".to_owned()
        }
    );
}

#[tokio::test]
async fn rollback_restores_the_exact_pre_upgrade_state_once() {
    let manager = manager();
    manager
        .install(
            "crm",
            "1.0.0",
            manifest(json!({ "objects": { "task": {} } })),
        )
        .await
        .expect("install");
    manager
        .upgrade(
            "crm",
            "2.0.0",
            manifest(json!({ "objects": { "task": {}, "project": {} } })),
        )
        .await
        .expect("upgrade");

    let report = manager.rollback("crm").await.expect("rollback");
    assert_eq!(report.restored_version, "1.0.0");

    let record = manager.get_package("crm").expect("record");
    assert_eq!(record.version, "1.0.0");
    let resolver = manager.namespace_resolver();
    assert_eq!(resolver.owner_of("objects.task").as_deref(), Some("crm"));
    assert!(resolver.owner_of("objects.project").is_none());

    // The snapshot is consumed; a second rollback has nothing to restore.
    let err = manager.rollback("crm").await.expect_err("must fail");
    assert_eq!(
        err,
        PackageFailure::NoUpgradeSnapshot {
            package_id: "crm".to_owned()
        }
    );
}

#[tokio::test]
async fn only_the_most_recent_upgrade_is_revertible() {
    let manager = manager();
    manager
        .install("crm", "1.0.0", manifest(json!({})))
        .await
        .expect("install");
    manager
        .upgrade("crm", "2.0.0", manifest(json!({})))
        .await
        .expect("upgrade to 2");
    manager
        .upgrade("crm", "3.0.0", manifest(json!({})))
        .await
        .expect("upgrade to 3");

    let report = manager.rollback("crm").await.expect("rollback");
    assert_eq!(report.restored_version, "2.0.0");
    assert!(!manager.has_snapshot("crm"));
}

#[tokio::test]
async fn rollback_without_an_upgrade_fails() {
    let manager = manager();
    manager
        .install("crm", "1.0.0", manifest(json!({})))
        .await
        .expect("install");

    let err = manager.rollback("crm").await.expect_err("must fail");
    assert_eq!(
        err,
        PackageFailure::NoUpgradeSnapshot {
            package_id: "crm".to_owned()
        }
    );
}

#[tokio::test]
async fn concurrent_operations_on_one_package_serialize() {
    let manager = Arc::new(manager());

    let first = {
        let manager = Arc::clone(&manager);
        async move { manager.install("crm", "1.0.0", manifest(json!({}))).await }
    };
    let second = {
        let manager = Arc::clone(&manager);
        async move { manager.install("crm", "1.0.0", manifest(json!({}))).await }
    };

    let (a, b) = tokio::join!(first, second);
    // Exactly one install wins; the other sees the completed state.
    assert!(a.is_ok() != b.is_ok());
    assert!(manager.is_installed("crm"));
}

#[tokio::test]
async fn resolve_dependencies_orders_a_package_batch() {
    let manager = manager();
    let order = manager
        .resolve_dependencies(&[
            GraphNode::new("app", ["ui", "core"]),
            GraphNode::new("ui", ["core"]),
            GraphNode::new("core", Vec::<String>::new()),
        ])
        .expect("acyclic batch");
    assert_eq!(order, ["core", "ui", "app"]);
}
