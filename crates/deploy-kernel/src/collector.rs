//! Plan member collection

use crate::artifact::InstallArtifact;
use std::sync::Arc;

/// Every artifact beneath `plan`, nested plans and their members included, in pre-order
///
/// The plan itself is not a member. An artifact outside any tree has no members.
#[must_use]
pub fn collect_plan_members(plan: &InstallArtifact) -> Vec<Arc<InstallArtifact>> {
    let Some((tree, node)) = plan.tree() else {
        return Vec::new();
    };
    let mut members = Vec::new();
    tree.visit(node, |id, artifact| {
        if id != node {
            members.push(Arc::clone(artifact));
        }
        true
    });
    members
}
