//! Propagation of member lifecycle to atomic plans

use deploy_artifact::MemoryEventLogger;
use deploy_kernel::{
    add_artifact, artifact_tree, failure_cause, ArtifactKind, ArtifactState, ArtifactTree, AtomicLifecycleListener,
    Deployer, InstallArtifact, InstallArtifactLifecycleListener, Pipeline, StandardInstallEnvironmentFactory,
};
use deploy_test_utils::{
    bundle_artifact, container_failure, install_and_resolve, make_chain, plan_artifact, plan_identity,
    RecordingHandler, RecordingListener,
};
use proptest::prelude::*;
use std::sync::Arc;

fn plan_with_members() -> (Arc<ArtifactTree>, [Arc<InstallArtifact>; 3], [Arc<RecordingHandler>; 3]) {
    let handlers = [RecordingHandler::immediate(), RecordingHandler::immediate(), RecordingHandler::immediate()];
    let plan = plan_artifact("plan", true, Arc::clone(&handlers[0]));
    let x = bundle_artifact("x", Arc::clone(&handlers[1]));
    let y = bundle_artifact("y", Arc::clone(&handlers[2]));
    let tree = artifact_tree(Arc::clone(&plan));
    add_artifact(&tree, tree.root(), Arc::clone(&x)).unwrap();
    add_artifact(&tree, tree.root(), Arc::clone(&y)).unwrap();
    install_and_resolve(&tree).unwrap();
    for member in [&x, &y] {
        member.add_listener(Arc::new(AtomicLifecycleListener::new()));
    }
    (tree, [plan, x, y], handlers)
}

#[test]
fn member_start_starts_its_plan_once_and_leaves_siblings_alone() {
    let (_tree, [plan, x, y], [plan_handler, _, y_handler]) = plan_with_members();
    let y_listener = RecordingListener::new();
    y.add_listener(y_listener.clone());

    x.start(None).unwrap();

    assert_eq!(plan_handler.starts(), 1);
    assert_eq!(plan.state(), ArtifactState::Active);
    assert_eq!(x.state(), ArtifactState::Active);
    assert_eq!(y.state(), ArtifactState::Resolved);
    assert_eq!(y_handler.starts(), 0);
    assert!(y_listener.calls().is_empty());
}

#[test]
fn second_member_start_does_not_restart_the_plan() {
    let (_tree, [_plan, x, y], [plan_handler, _, _]) = plan_with_members();
    x.start(None).unwrap();
    y.start(None).unwrap();
    assert_eq!(plan_handler.starts(), 1);
}

#[test]
fn member_stop_stops_the_plan() {
    let (_tree, [plan, x, _y], [plan_handler, _, _]) = plan_with_members();
    x.start(None).unwrap();
    x.stop().unwrap();
    assert_eq!(plan_handler.stops(), 1);
    assert_eq!(plan.state(), ArtifactState::Resolved);
}

#[test]
fn member_uninstall_uninstalls_the_plan() {
    let (_tree, [plan, x, y], [plan_handler, _, y_handler]) = plan_with_members();
    x.uninstall().unwrap();
    assert_eq!(plan_handler.uninstalls(), 1);
    assert_eq!(plan.state(), ArtifactState::Uninstalled);
    assert_eq!(y_handler.uninstalls(), 0);
    assert_eq!(y.state(), ArtifactState::Resolved);
}

#[test]
fn failed_member_start_stops_the_plan() {
    let plan_handler = RecordingHandler::immediate();
    let member_handler = RecordingHandler::deferred();
    let plan = plan_artifact("plan", true, Arc::clone(&plan_handler));
    let member = bundle_artifact("member", Arc::clone(&member_handler));
    let tree = artifact_tree(Arc::clone(&plan));
    add_artifact(&tree, tree.root(), Arc::clone(&member)).unwrap();
    install_and_resolve(&tree).unwrap();
    member.add_listener(Arc::new(AtomicLifecycleListener::new()));

    member.start(None).unwrap();
    assert_eq!(plan.state(), ArtifactState::Active);
    assert_eq!(member.state(), ArtifactState::Starting);

    assert_eq!(member_handler.complete_pending(&container_failure()), 1);
    assert_eq!(member.state(), ArtifactState::StartFailed);
    assert_eq!(plan_handler.stops(), 1);
    assert_eq!(plan.state(), ArtifactState::Resolved);
}

#[test]
fn atomic_plan_deploys_and_undeploys_as_a_unit() {
    let x_handler = RecordingHandler::immediate();
    let y_handler = RecordingHandler::immediate();
    let plan = InstallArtifact::builder(plan_identity("shop"), ArtifactKind::plan(true, false)).build();
    let x = bundle_artifact("x", Arc::clone(&x_handler));
    let y = bundle_artifact("y", Arc::clone(&y_handler));
    let tree = artifact_tree(Arc::clone(&plan));
    add_artifact(&tree, tree.root(), Arc::clone(&x)).unwrap();
    add_artifact(&tree, tree.root(), Arc::clone(&y)).unwrap();

    let deployer = Deployer::new(
        Arc::new(Pipeline::new("empty")),
        Arc::new(StandardInstallEnvironmentFactory::new(Arc::new(MemoryEventLogger::new()))),
    );
    let (_environment, started) = deployer.deploy(&tree).unwrap();
    assert!(matches!(started.try_outcome(), Some(Ok(()))));
    assert_eq!(x_handler.starts(), 1);
    assert_eq!(y_handler.starts(), 1);
    for artifact in [&plan, &x, &y] {
        assert_eq!(artifact.state(), ArtifactState::Active);
    }

    deployer.undeploy(&tree).unwrap();
    assert_eq!(x_handler.stops(), 1);
    assert_eq!(y_handler.uninstalls(), 1);
    for artifact in [&plan, &x, &y] {
        assert_eq!(artifact.state(), ArtifactState::Uninstalled);
    }
}

#[derive(Debug, Clone, Copy)]
enum MemberEvent {
    StartFailed,
    Stopped,
    Uninstalled,
}

fn member_event() -> impl Strategy<Value = MemberEvent> {
    prop_oneof![
        Just(MemberEvent::StartFailed),
        Just(MemberEvent::Stopped),
        Just(MemberEvent::Uninstalled),
    ]
}

proptest! {
    #[test]
    fn prop_member_events_reach_only_the_nearest_atomic_plan(
        atomic in proptest::collection::vec(any::<bool>(), 0..6),
        event in member_event(),
    ) {
        let (tree, links) = make_chain(&atomic).unwrap();
        install_and_resolve(&tree).unwrap();
        for link in &links {
            link.artifact.start(None).unwrap();
        }
        let leaf = &links[links.len() - 1];
        let listener = Arc::new(AtomicLifecycleListener::new());
        leaf.artifact.add_listener(listener.clone());

        match event {
            MemberEvent::StartFailed => {
                let cause = failure_cause("late failure");
                listener.on_start_failed(&leaf.artifact, cause.as_ref()).unwrap();
            }
            MemberEvent::Stopped => leaf.artifact.stop().unwrap(),
            MemberEvent::Uninstalled => leaf.artifact.uninstall().unwrap(),
        }

        let nearest = atomic.iter().rposition(|is_atomic| *is_atomic);
        for (depth, link) in links[..atomic.len()].iter().enumerate() {
            let hit = usize::from(Some(depth) == nearest);
            prop_assert_eq!(link.handler.starts(), 1);
            prop_assert_eq!(link.handler.stops(), hit);
            let uninstalls = if matches!(event, MemberEvent::Uninstalled) { hit } else { 0 };
            prop_assert_eq!(link.handler.uninstalls(), uninstalls);
        }
    }

    #[test]
    fn prop_start_reaches_only_the_nearest_atomic_plan(atomic in proptest::collection::vec(any::<bool>(), 0..6)) {
        let (tree, links) = make_chain(&atomic).unwrap();
        install_and_resolve(&tree).unwrap();
        let leaf = &links[links.len() - 1];
        leaf.artifact.add_listener(Arc::new(AtomicLifecycleListener::new()));

        leaf.artifact.start(None).unwrap();

        let nearest = atomic.iter().rposition(|is_atomic| *is_atomic);
        for (depth, link) in links[..atomic.len()].iter().enumerate() {
            let expected = usize::from(Some(depth) == nearest);
            prop_assert_eq!(link.handler.starts(), expected);
        }
        prop_assert_eq!(leaf.handler.starts(), 1);
    }
}
