//! Planner behaviour against a stub framework and repository

use deploy_artifact::{ExportedPackage, ImportedPackage, MemoryEventLogger, LogEvent, Version};
use deploy_quasi::{
    BundleId, BundleState, FailureKind, FrameworkError, ModuleFramework, PackageImportWildcardExpander, QuasiError,
    QuasiFramework,
};
use deploy_test_utils::{manifest, StubFramework, StubRepository};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn planner(framework: &Arc<StubFramework>, repository: StubRepository) -> QuasiFramework {
    QuasiFramework::new(framework.clone(), Arc::new(repository))
}

#[test]
fn missing_import_is_classified_with_its_constraint() {
    let framework = Arc::new(StubFramework::new());
    let quasi = planner(&framework, StubRepository::new());
    let range = "[1.0,2.0)".parse().unwrap();
    quasi
        .install(
            "bundles/a.jar",
            manifest("a", &[], &[]).with_import(ImportedPackage::new("com.absent").with_version_range(range)),
        )
        .unwrap();

    let failures = quasi.resolve();
    assert_eq!(failures.len(), 1);
    match failures[0].kind() {
        FailureKind::MissingImport(constraint) => {
            assert_eq!(constraint.package, "com.absent");
            assert_eq!(constraint.version_range.to_string(), "[1.0.0, 2.0.0)");
        }
        other => panic!("expected a missing import, got {other:?}"),
    }
    assert_eq!(failures[0].bundle().symbolic_name(), "a");
    assert!(!failures[0].description().is_empty());
    assert!(quasi.dependencies().is_empty());
    assert!(framework.installs().is_empty());
}

#[test]
fn synthetic_ids_follow_the_highest_real_id() {
    let framework = Arc::new(
        StubFramework::new()
            .with_resident("resident/one.jar", manifest("one", &[], &[]), BundleState::Active)
            .with_resident("resident/two.jar", manifest("two", &[], &[]), BundleState::Resolved),
    );
    let quasi = planner(&framework, StubRepository::new());
    let a = quasi.install("bundles/a.jar", manifest("a", &[], &[])).unwrap();
    let b = quasi.install("bundles/b.jar", manifest("b", &[], &[])).unwrap();
    assert_eq!(a.bundle_id(), BundleId(3));
    assert_eq!(b.bundle_id(), BundleId(4));
    assert!(!a.is_resident());
    assert_eq!(quasi.bundles().len(), 4);
}

#[test]
fn install_requires_a_symbolic_name() {
    let quasi = planner(&Arc::new(StubFramework::new()), StubRepository::new());
    let err = quasi.install("bundles/none.jar", Default::default()).unwrap_err();
    assert!(matches!(err, QuasiError::MissingSymbolicName { .. }));
}

#[test]
fn resident_exports_satisfy_candidates() {
    let framework = Arc::new(StubFramework::new().with_resident(
        "resident/util.jar",
        manifest("util", &["com.util"], &[]),
        BundleState::Active,
    ));
    let repository = StubRepository::new();
    let quasi = planner(&framework, repository);
    let a = quasi.install("bundles/a.jar", manifest("a", &[], &["com.util"])).unwrap();

    assert!(quasi.resolve().is_empty());
    assert!(quasi.bundle(a.bundle_id()).unwrap().is_resolved());
    assert!(quasi.dependencies().is_empty());
}

#[test]
fn commit_installs_candidates_then_starts_dependencies() {
    let framework = Arc::new(StubFramework::new().with_location("repo/util.jar", manifest("util", &["com.util"], &[])));
    let repository = StubRepository::new().with_candidate("repo/util.jar", manifest("util", &["com.util"], &[]));
    let quasi = planner(&framework, repository);
    let a = quasi.install("bundles/a.jar", manifest("a", &[], &["com.util"])).unwrap();

    assert!(quasi.resolve().is_empty());
    let dependencies = quasi.dependencies();
    assert_eq!(dependencies.len(), 1);
    assert_eq!(dependencies[0].symbolic_name(), "util");

    quasi.commit().unwrap();
    assert_eq!(framework.installs(), vec!["bundles/a.jar", "repo/util.jar"]);

    let installed_a = framework.bundle_named("a").unwrap();
    assert_eq!(installed_a.manifest.imports()[0].name(), "com.util");
    assert_eq!(quasi.bundle(a.bundle_id()).unwrap().real_bundle_id(), Some(installed_a.id));

    let util = framework.bundle_named("util").unwrap();
    assert_eq!(framework.starts(), vec![util.id]);
    assert_eq!(framework.state(util.id), Some(BundleState::Active));
    assert_eq!(framework.state(installed_a.id), Some(BundleState::Resolved));
}

#[test]
fn repeated_resolve_keeps_the_dependency_closure() {
    let framework = Arc::new(StubFramework::new().with_location("repo/util.jar", manifest("util", &["com.util"], &[])));
    let repository = StubRepository::new().with_candidate("repo/util.jar", manifest("util", &["com.util"], &[]));
    let quasi = planner(&framework, repository);
    quasi.install("bundles/a.jar", manifest("a", &[], &["com.util"])).unwrap();

    assert!(quasi.resolve().is_empty());
    assert!(quasi.resolve().is_empty());
    assert_eq!(quasi.dependencies().len(), 1);
    assert_eq!(quasi.bundles().iter().filter(|b| b.symbolic_name() == "util").count(), 1);

    quasi.commit().unwrap();
    assert_eq!(framework.installs(), vec!["bundles/a.jar", "repo/util.jar"]);
}

#[test]
fn install_after_resolve_recomputes_the_closure_on_commit() {
    let framework = Arc::new(StubFramework::new().with_location("repo/util.jar", manifest("util", &["com.util"], &[])));
    let repository = StubRepository::new().with_candidate("repo/util.jar", manifest("util", &["com.util"], &[]));
    let quasi = planner(&framework, repository);
    quasi.install("bundles/a.jar", manifest("a", &[], &["com.util"])).unwrap();
    assert!(quasi.resolve().is_empty());
    quasi.install("bundles/b.jar", manifest("b", &[], &["com.util"])).unwrap();

    quasi.commit().unwrap();
    assert_eq!(framework.installs(), vec!["bundles/a.jar", "bundles/b.jar", "repo/util.jar"]);
    let util = framework.bundle_named("util").unwrap();
    assert_eq!(framework.starts(), vec![util.id]);
}

#[test]
fn failed_resolve_drops_pulled_dependencies() {
    let framework = Arc::new(StubFramework::new());
    let repository = StubRepository::new().with_candidate("repo/util.jar", manifest("util", &["com.util"], &[]));
    let quasi = planner(&framework, repository);
    quasi.install("bundles/a.jar", manifest("a", &[], &["com.util"])).unwrap();
    assert!(quasi.resolve().is_empty());

    quasi.install("bundles/b.jar", manifest("b", &[], &["com.absent"])).unwrap();
    assert_eq!(quasi.resolve().len(), 1);
    assert!(quasi.dependencies().is_empty());
    assert!(quasi.bundles().iter().all(|b| b.symbolic_name() != "util"));
}

#[test]
fn commit_does_not_start_lazy_or_fragment_dependencies() {
    let lazy = manifest("lazy", &["com.lazy"], &[]).with_activation_policy("lazy");
    let framework = Arc::new(StubFramework::new().with_location("repo/lazy.jar", lazy.clone()));
    let repository = StubRepository::new().with_candidate("repo/lazy.jar", lazy);
    let quasi = planner(&framework, repository);
    quasi.install("bundles/a.jar", manifest("a", &[], &["com.lazy"])).unwrap();

    quasi.commit().unwrap();
    assert_eq!(framework.installs().len(), 2);
    assert!(framework.starts().is_empty());
}

#[test]
fn commit_resolves_implicitly_and_reports_failures() {
    let framework = Arc::new(StubFramework::new());
    let quasi = planner(&framework, StubRepository::new());
    quasi.install("bundles/a.jar", manifest("a", &[], &["com.absent"])).unwrap();

    let err = quasi.commit().unwrap_err();
    match err {
        QuasiError::CommitResolution(failures) => assert_eq!(failures.len(), 1),
        other => panic!("expected a resolution failure, got {other:?}"),
    }
    assert!(framework.installs().is_empty());
}

#[test]
fn failed_dependency_install_rolls_back_every_install() {
    let framework = Arc::new(
        StubFramework::new()
            .with_location("repo/util.jar", manifest("util", &["com.util"], &[]))
            .failing_install_at("repo/util.jar"),
    );
    let repository = StubRepository::new().with_candidate("repo/util.jar", manifest("util", &["com.util"], &[]));
    let quasi = planner(&framework, repository);
    quasi.install("bundles/a.jar", manifest("a", &[], &["com.util"])).unwrap();
    quasi.install("bundles/b.jar", manifest("b", &[], &["com.util"])).unwrap();
    assert!(quasi.resolve().is_empty());

    let err = quasi.commit().unwrap_err();
    assert_eq!(
        err,
        QuasiError::Framework(FrameworkError::Install {
            location: "repo/util.jar".to_string(),
            reason: "install refused".to_string(),
        })
    );
    assert_eq!(framework.uninstalls().len(), 2);
    assert!(framework.bundles().is_empty());
    assert!(framework.starts().is_empty());
}

#[test]
fn failed_dependency_start_rolls_back_dependencies_too() {
    let framework = Arc::new(
        StubFramework::new()
            .with_location("repo/util.jar", manifest("util", &["com.util"], &[]))
            .failing_start_of("util"),
    );
    let repository = StubRepository::new().with_candidate("repo/util.jar", manifest("util", &["com.util"], &[]));
    let quasi = planner(&framework, repository);
    quasi.install("bundles/a.jar", manifest("a", &[], &["com.util"])).unwrap();

    let err = quasi.commit().unwrap_err();
    assert!(matches!(err, QuasiError::Framework(FrameworkError::Start { .. })));
    assert_eq!(framework.uninstalls().len(), 2);
    assert!(framework.bundles().is_empty());
}

#[test]
fn second_commit_is_rejected() {
    let framework = Arc::new(StubFramework::new());
    let quasi = planner(&framework, StubRepository::new());
    quasi.install("bundles/a.jar", manifest("a", &[], &[])).unwrap();
    quasi.commit().unwrap();
    assert_eq!(quasi.commit().unwrap_err(), QuasiError::AlreadyCommitted);
    assert_eq!(framework.installs().len(), 1);
}

#[test]
fn unavailable_repository_leaves_no_dependencies() {
    let framework = Arc::new(StubFramework::new());
    let repository = StubRepository::unavailable();
    let quasi = planner(&framework, repository);
    quasi.install("bundles/a.jar", manifest("a", &[], &["com.util"])).unwrap();

    let failures = quasi.resolve();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].kind(), FailureKind::MissingImport(_)));
    assert!(quasi.dependencies().is_empty());
}

#[test]
fn diagnose_explains_one_bundle() {
    let framework = Arc::new(StubFramework::new());
    let quasi = planner(&framework, StubRepository::new());
    let good = quasi.install("bundles/good.jar", manifest("good", &["com.good"], &[])).unwrap();
    let bad = quasi.install("bundles/bad.jar", manifest("bad", &[], &["com.absent"])).unwrap();

    assert!(quasi.diagnose(good.bundle_id()).unwrap().is_empty());
    let failures = quasi.diagnose(bad.bundle_id()).unwrap();
    assert_eq!(failures[0].constraint().unwrap().package, "com.absent");
    assert_eq!(quasi.diagnose(BundleId(99)).unwrap_err(), QuasiError::UnknownBundle(BundleId(99)));
}

#[test]
fn uses_conflict_is_classified() {
    let framework = Arc::new(StubFramework::new());
    let quasi = planner(&framework, StubRepository::new());
    let api = |name: &str, major: u64| {
        manifest(name, &[], &[]).with_export(ExportedPackage::new("com.api", Version::new(major, 0, 0)))
    };
    quasi.install("bundles/api1.jar", api("api1", 1)).unwrap();
    quasi.install("bundles/api2.jar", api("api2", 2)).unwrap();
    quasi
        .install(
            "bundles/lib.jar",
            manifest("lib", &[], &[])
                .with_export(ExportedPackage::new("com.lib", Version::new(1, 0, 0)).with_uses(["com.api"]))
                .with_import(ImportedPackage::new("com.api").with_version_range("[2.0,3.0)".parse().unwrap())),
        )
        .unwrap();
    quasi
        .install(
            "bundles/web.jar",
            manifest("web", &[], &["com.lib"])
                .with_import(ImportedPackage::new("com.api").with_version_range("[1.0,2.0)".parse().unwrap())),
        )
        .unwrap();

    let failures = quasi.resolve();
    assert!(!failures.is_empty());
    assert!(failures.iter().all(|f| f.bundle().symbolic_name() == "web"));
    assert!(failures.iter().any(|f| matches!(
        f.kind(),
        FailureKind::PackageUsesConflict(constraint) if constraint.package == "com.api"
    )));
}

#[test]
fn wildcard_expands_against_the_export_registry() {
    let framework = StubFramework::new()
        .with_resident(
            "resident/foo.jar",
            manifest("foo", &["com.foo", "com.foo.bar"], &[]),
            BundleState::Active,
        )
        .with_resident("resident/baz.jar", manifest("baz", &["com.baz"], &[]), BundleState::Resolved)
        .with_resident("resident/idle.jar", manifest("idle", &["com.foo.idle"], &[]), BundleState::Installed);
    let logger = Arc::new(MemoryEventLogger::new());
    let expander = PackageImportWildcardExpander::new(logger.clone());

    assert_eq!(expander.expand_with_framework("com.foo.*", &framework), "com.foo,com.foo.bar");
    assert!(logger.events().is_empty());

    assert_eq!(expander.expand_with_framework("zzz.*", &framework), "");
    assert_eq!(logger.count(LogEvent::RegionImportNoMatch), 1);
}
