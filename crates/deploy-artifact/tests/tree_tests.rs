use deploy_artifact::{ArtifactIdentity, NodeId, Tree, Version, BUNDLE_TYPE, PLAN_TYPE};
use std::sync::Arc;
use std::thread;

fn identity(kind: &str, name: &str) -> ArtifactIdentity {
    ArtifactIdentity::new(kind, name, Version::new(1, 0, 0))
}

#[test]
fn test_plan_tree_of_identities() {
    let tree = Tree::new(identity(PLAN_TYPE, "shop"));
    let web = tree.add_child(tree.root(), identity(BUNDLE_TYPE, "shop.web")).unwrap();
    let inner = tree.add_child(tree.root(), identity(PLAN_TYPE, "inner")).unwrap();
    let core = tree.add_child(inner, identity(BUNDLE_TYPE, "shop.core")).unwrap();

    let names: Vec<String> = tree
        .values(tree.root())
        .iter()
        .map(|id| id.name().to_string())
        .collect();
    assert_eq!(names, vec!["shop", "shop.web", "inner", "shop.core"]);
    assert_eq!(tree.ancestors(core), vec![inner, tree.root()]);
    assert_eq!(tree.parent(web), Some(tree.root()));
}

#[test]
fn test_unknown_node_rejected() {
    let tree = Tree::new(1);
    let other = Tree::new(2);
    let far = other.add_child(other.root(), 3).unwrap();
    let far = other.add_child(far, 4).unwrap();
    assert!(tree.add_child(far, 5).is_err());
    assert_eq!(tree.value(far), None);
}

#[test]
fn test_concurrent_children_all_attached() {
    let tree = Arc::new(Tree::new(0usize));
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                (0..25)
                    .map(|i| tree.add_child(tree.root(), worker * 100 + i).unwrap())
                    .collect::<Vec<NodeId>>()
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.extend(handle.join().unwrap());
    }
    assert_eq!(ids.len(), 200);
    assert_eq!(tree.children(tree.root()).len(), 200);
    assert_eq!(tree.len(), 201);
}

#[test]
fn test_visitor_may_extend_tree() {
    let tree = Tree::new(0u32);
    tree.add_child(tree.root(), 1).unwrap();
    let mut visited = 0;
    tree.visit(tree.root(), |id, value| {
        visited += 1;
        if *value == 1 {
            tree.add_child(id, 2).unwrap();
        }
        true
    });
    assert_eq!(visited, 3);
}
