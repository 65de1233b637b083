//! Dependency closure calculation
//!
//! Starting from a set of bundles in a [`ResolverState`], the calculator repeatedly
//! resolves, collects missing mandatory imports, and asks the [`Repository`] for bundles
//! that provide them. The first candidate that provides a package is added to the state.
//! The loop ends when a pass adds nothing.
//!
//! The resulting closure holds only added bundles that resolved, ordered so that
//! providers precede their consumers.

use crate::framework::BundleId;
use crate::repository::{Repository, RepositoryError};
use crate::resolver::{BundleDescription, ResolverErrorKind, ResolverState};
use deploy_artifact::ImportedPackage;
use indexmap::IndexSet;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The closure could not be computed at all
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unable to satisfy dependencies of '{package}': {source}")]
pub struct UnsatisfiedDependencies {
    pub package: String,
    #[source]
    pub source: RepositoryError,
}

/// Computes the bundles needed to satisfy a candidate set
pub struct DependencyCalculator {
    repository: Arc<dyn Repository>,
    next_id: AtomicU64,
}

impl DependencyCalculator {
    /// Calculator handing out synthetic ids starting at `first_id`
    #[must_use]
    pub fn new(repository: Arc<dyn Repository>, first_id: BundleId) -> Self {
        Self {
            repository,
            next_id: AtomicU64::new(first_id.value()),
        }
    }

    /// Next synthetic bundle id; monotonic per calculator
    pub fn next_bundle_id(&self) -> BundleId {
        BundleId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Add to `state` every repository bundle needed by `bundles`
    ///
    /// Returns the added bundles that resolved, providers first. On failure every
    /// bundle added by this call is removed again.
    ///
    /// # Errors
    /// Returns [`UnsatisfiedDependencies`] if the repository cannot be queried
    pub fn calculate_dependencies(
        &self,
        state: &mut ResolverState,
        bundles: &[BundleId],
    ) -> Result<Vec<BundleId>, UnsatisfiedDependencies> {
        let mut added: Vec<BundleId> = Vec::new();
        let mut scope: IndexSet<BundleId> = bundles.iter().copied().collect();
        let mut queried: HashSet<String> = HashSet::new();

        loop {
            state.resolve();
            let missing: Vec<ImportedPackage> = scope
                .iter()
                .flat_map(|id| state.errors(*id))
                .filter(|e| e.kind() == ResolverErrorKind::MissingImportPackage)
                .filter_map(|e| e.constraint().cloned())
                .collect();

            let mut progressed = false;
            for import in missing {
                if !queried.insert(query_key(&import)) {
                    continue;
                }
                let candidates = match self.repository.find_candidates(&import) {
                    Ok(candidates) => candidates,
                    Err(source) => {
                        for id in &added {
                            state.remove_bundle(*id);
                        }
                        state.resolve();
                        tracing::debug!(package = import.name(), error = %source, "Dependency calculation aborted");
                        return Err(UnsatisfiedDependencies {
                            package: import.name().to_string(),
                            source,
                        });
                    }
                };

                let chosen = candidates.into_iter().find(|candidate| {
                    candidate.provides(&import)
                        && candidate.manifest().symbolic_name().is_some_and(|name| {
                            state.bundle_by_name(name, candidate.manifest().version()).is_none()
                        })
                });
                if let Some(candidate) = chosen {
                    let id = self.next_bundle_id();
                    tracing::debug!(
                        package = import.name(),
                        bundle = candidate.manifest().symbolic_name().unwrap_or_default(),
                        id = id.value(),
                        "Adding repository bundle to dependency closure"
                    );
                    state.add_bundle(BundleDescription::new(id, candidate.location(), candidate.manifest().clone()));
                    added.push(id);
                    scope.insert(id);
                    progressed = true;
                }
            }

            if !progressed {
                break;
            }
        }

        let closure: Vec<BundleId> = added.into_iter().filter(|id| state.is_resolved(*id)).collect();
        Ok(providers_first(state, closure))
    }
}

impl std::fmt::Debug for DependencyCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyCalculator")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn query_key(import: &ImportedPackage) -> String {
    format!(
        "{}|{}|{}|{}",
        import.name(),
        import.version_range(),
        import.bundle_symbolic_name().unwrap_or_default(),
        import.bundle_version_range()
    )
}

/// Topological order over the wiring between closure members; insertion order if cyclic
fn providers_first(state: &ResolverState, closure: Vec<BundleId>) -> Vec<BundleId> {
    let mut graph: DiGraphMap<BundleId, ()> = DiGraphMap::new();
    for id in &closure {
        graph.add_node(*id);
    }
    for id in &closure {
        for wire in state.wires(*id) {
            if wire.provider != *id && graph.contains_node(wire.provider) {
                graph.add_edge(wire.provider, *id, ());
            }
        }
    }
    toposort(&graph, None).unwrap_or(closure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::BundleCandidate;
    use deploy_artifact::{BundleManifest, ExportedPackage, Version};
    use parking_lot::Mutex;

    struct MapRepository {
        candidates: Vec<BundleCandidate>,
        queries: Mutex<Vec<String>>,
    }

    impl Repository for MapRepository {
        fn find_candidates(&self, import: &ImportedPackage) -> Result<Vec<BundleCandidate>, RepositoryError> {
            self.queries.lock().push(import.name().to_string());
            Ok(self.candidates.iter().filter(|c| c.provides(import)).cloned().collect())
        }
    }

    struct BrokenRepository;

    impl Repository for BrokenRepository {
        fn find_candidates(&self, import: &ImportedPackage) -> Result<Vec<BundleCandidate>, RepositoryError> {
            Err(RepositoryError::Query {
                package: import.name().to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    fn bundle(name: &str, exports: &[&str], imports: &[&str]) -> BundleManifest {
        let mut manifest = BundleManifest::new(name, Version::new(1, 0, 0));
        for e in exports {
            manifest = manifest.with_export(ExportedPackage::new(*e, Version::new(1, 0, 0)));
        }
        for i in imports {
            manifest = manifest.with_import(ImportedPackage::new(*i));
        }
        manifest
    }

    #[test]
    fn transitive_closure_is_ordered_providers_first() {
        let repository = Arc::new(MapRepository {
            candidates: vec![
                BundleCandidate::new("repo/web", bundle("web", &["com.web"], &["com.core"])),
                BundleCandidate::new("repo/core", bundle("core", &["com.core"], &[])),
            ],
            queries: Mutex::new(Vec::new()),
        });
        let calculator = DependencyCalculator::new(repository.clone(), BundleId(100));
        let mut state = ResolverState::new();
        let app = calculator.next_bundle_id();
        state.add_bundle(BundleDescription::new(app, "app", bundle("app", &[], &["com.web"])));

        let closure = calculator.calculate_dependencies(&mut state, &[app]).unwrap();
        let names: Vec<&str> = closure.iter().map(|id| state.bundle(*id).unwrap().symbolic_name()).collect();
        assert_eq!(names, vec!["core", "web"]);
        assert!(state.is_resolved(app));
        assert_eq!(*repository.queries.lock(), vec!["com.web", "com.core"]);
    }

    #[test]
    fn unknown_package_leaves_closure_empty() {
        let repository = Arc::new(MapRepository {
            candidates: Vec::new(),
            queries: Mutex::new(Vec::new()),
        });
        let calculator = DependencyCalculator::new(repository, BundleId(1));
        let mut state = ResolverState::new();
        state.add_bundle(BundleDescription::new(BundleId(1), "a", bundle("a", &[], &["com.none"])));
        assert!(calculator.calculate_dependencies(&mut state, &[BundleId(1)]).unwrap().is_empty());
        assert!(!state.is_resolved(BundleId(1)));
    }

    #[test]
    fn repository_failure_is_unsatisfied_dependencies() {
        let calculator = DependencyCalculator::new(Arc::new(BrokenRepository), BundleId(1));
        let mut state = ResolverState::new();
        state.add_bundle(BundleDescription::new(BundleId(1), "a", bundle("a", &[], &["com.none"])));
        let err = calculator.calculate_dependencies(&mut state, &[BundleId(1)]).unwrap_err();
        assert_eq!(err.package, "com.none");
        assert_eq!(state.bundles().count(), 1);
    }

    #[test]
    fn ids_are_monotonic() {
        let calculator = DependencyCalculator::new(Arc::new(crate::repository::EmptyRepository), BundleId(7));
        assert_eq!(calculator.next_bundle_id(), BundleId(7));
        assert_eq!(calculator.next_bundle_id(), BundleId(8));
    }
}
