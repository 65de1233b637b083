//! In-memory resolver state
//!
//! [`ResolverState`] holds bundle descriptions and computes which of them resolve. Bundles
//! already resident in the real framework are treated as resolved context; every other
//! bundle must have each mandatory import wired to a provider and, for fragments, a host.
//!
//! # Algorithm
//!
//! Resolution is iterative elimination:
//! 1. Assume every candidate resolves
//! 2. Wire each import to the best live provider (resident first, then highest version)
//! 3. Drop candidates with a missing import or host and record why
//! 4. Once nothing is missing, drop candidates whose wiring breaks a `uses` constraint
//! 5. Repeat until a pass removes nothing
//!
//! Cycles between candidates resolve naturally because elimination only removes bundles
//! that are provably unsatisfiable.

use crate::framework::BundleId;
use deploy_artifact::{BundleManifest, FragmentHost, ImportedPackage, Version};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::fmt;

/// A bundle known to the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleDescription {
    id: BundleId,
    location: String,
    manifest: BundleManifest,
    resident: bool,
}

impl BundleDescription {
    /// Description of a bundle that exists only in the overlay
    #[must_use]
    pub fn new(id: BundleId, location: impl Into<String>, manifest: BundleManifest) -> Self {
        Self {
            id,
            location: location.into(),
            manifest,
            resident: false,
        }
    }

    /// Description of a bundle already installed in the real framework
    #[must_use]
    pub fn resident(id: BundleId, location: impl Into<String>, manifest: BundleManifest) -> Self {
        Self {
            resident: true,
            ..Self::new(id, location, manifest)
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> BundleId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[inline]
    #[must_use]
    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    #[must_use]
    pub fn symbolic_name(&self) -> &str {
        self.manifest.symbolic_name().unwrap_or_default()
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> &Version {
        self.manifest.version()
    }

    #[inline]
    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.resident
    }

    #[inline]
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.manifest.is_fragment()
    }
}

impl fmt::Display for BundleDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.symbolic_name(), self.version())
    }
}

/// Why a bundle did not resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolverErrorKind {
    /// A mandatory import has no live provider
    MissingImportPackage,
    /// An import is wired inconsistently with a provider's `uses` constraint
    ImportPackageUsesConflict,
    /// A fragment's host is absent
    MissingFragmentHost,
}

/// One resolver complaint about one bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverError {
    kind: ResolverErrorKind,
    constraint: Option<ImportedPackage>,
    detail: String,
}

impl ResolverError {
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ResolverErrorKind {
        self.kind
    }

    /// The unsatisfied import, when the error concerns one
    #[inline]
    #[must_use]
    pub fn constraint(&self) -> Option<&ImportedPackage> {
        self.constraint.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for ResolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

/// An import bound to the bundle supplying it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wire {
    pub package: String,
    pub provider: BundleId,
}

/// Resolution overlay over a set of bundle descriptions
#[derive(Debug, Clone, Default)]
pub struct ResolverState {
    bundles: IndexMap<BundleId, BundleDescription>,
    resolved: IndexSet<BundleId>,
    wires: HashMap<BundleId, Vec<Wire>>,
    errors: HashMap<BundleId, Vec<ResolverError>>,
}

impl ResolverState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a description; resolution results are stale until [`Self::resolve`]
    pub fn add_bundle(&mut self, description: BundleDescription) {
        self.bundles.insert(description.id(), description);
    }

    pub fn remove_bundle(&mut self, id: BundleId) -> Option<BundleDescription> {
        self.resolved.shift_remove(&id);
        self.wires.remove(&id);
        self.errors.remove(&id);
        self.bundles.shift_remove(&id)
    }

    #[must_use]
    pub fn bundle(&self, id: BundleId) -> Option<&BundleDescription> {
        self.bundles.get(&id)
    }

    #[must_use]
    pub fn bundle_by_name(&self, symbolic_name: &str, version: &Version) -> Option<&BundleDescription> {
        self.bundles
            .values()
            .find(|b| b.symbolic_name() == symbolic_name && b.version() == version)
    }

    /// Descriptions in insertion order
    pub fn bundles(&self) -> impl Iterator<Item = &BundleDescription> {
        self.bundles.values()
    }

    #[must_use]
    pub fn highest_bundle_id(&self) -> Option<BundleId> {
        self.bundles.keys().copied().max()
    }

    #[must_use]
    pub fn is_resolved(&self, id: BundleId) -> bool {
        self.resolved.contains(&id)
    }

    /// Errors recorded for `id` by the last resolution
    #[must_use]
    pub fn errors(&self, id: BundleId) -> &[ResolverError] {
        self.errors.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Wires chosen for `id` by the last resolution
    #[must_use]
    pub fn wires(&self, id: BundleId) -> &[Wire] {
        self.wires.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Every bundle exporting a package that satisfies `import`, resolved or not
    #[must_use]
    pub fn providers(&self, import: &ImportedPackage) -> Vec<BundleId> {
        self.bundles
            .values()
            .filter(|b| export_version(b, import).is_some())
            .map(BundleDescription::id)
            .collect()
    }

    /// Recompute the resolved set, wiring and errors
    pub fn resolve(&mut self) {
        self.errors.clear();
        let mut alive: IndexSet<BundleId> = self
            .bundles
            .values()
            .filter(|b| !b.is_resident())
            .map(BundleDescription::id)
            .collect();

        let wiring = loop {
            let mut failed: Vec<(BundleId, Vec<ResolverError>)> = Vec::new();
            let mut wiring: IndexMap<BundleId, Vec<Wire>> = IndexMap::new();

            for id in &alive {
                let description = &self.bundles[id];
                let mut errors = Vec::new();
                let mut wires = Vec::new();

                if let Some(host) = description.manifest().fragment_host() {
                    if !self.host_available(host, &alive) {
                        errors.push(ResolverError {
                            kind: ResolverErrorKind::MissingFragmentHost,
                            constraint: None,
                            detail: format!(
                                "Missing host bundle '{}' version '{}' for fragment {description}",
                                host.symbolic_name(),
                                host.version_range()
                            ),
                        });
                    }
                }

                for import in description.manifest().imports() {
                    match self.select_provider(import, &alive) {
                        Some(provider) => wires.push(Wire {
                            package: import.name().to_string(),
                            provider,
                        }),
                        None if import.is_optional() => {}
                        None => errors.push(ResolverError {
                            kind: ResolverErrorKind::MissingImportPackage,
                            constraint: Some(import.clone()),
                            detail: format!(
                                "Missing constraint: <Import-Package: {}; version=\"{}\">",
                                import.name(),
                                import.version_range()
                            ),
                        }),
                    }
                }

                if errors.is_empty() {
                    wiring.insert(*id, wires);
                } else {
                    failed.push((*id, errors));
                }
            }

            if failed.is_empty() {
                failed = self.uses_conflicts(&wiring);
            }
            if failed.is_empty() {
                break wiring;
            }
            for (id, errors) in failed {
                alive.shift_remove(&id);
                self.errors.insert(id, errors);
            }
        };

        self.resolved = self
            .bundles
            .values()
            .filter(|b| b.is_resident())
            .map(BundleDescription::id)
            .chain(alive)
            .collect();
        self.wires = wiring.into_iter().collect();
    }

    fn is_live(&self, id: BundleId, alive: &IndexSet<BundleId>) -> bool {
        alive.contains(&id) || self.bundles.get(&id).is_some_and(BundleDescription::is_resident)
    }

    fn host_available(&self, host: &FragmentHost, alive: &IndexSet<BundleId>) -> bool {
        self.bundles.values().any(|b| {
            self.is_live(b.id(), alive)
                && !b.is_fragment()
                && b.symbolic_name() == host.symbolic_name()
                && host.version_range().includes(b.version())
        })
    }

    fn select_provider(&self, import: &ImportedPackage, alive: &IndexSet<BundleId>) -> Option<BundleId> {
        self.bundles
            .values()
            .filter(|b| self.is_live(b.id(), alive))
            .filter_map(|b| export_version(b, import).map(|version| (b, version)))
            .max_by(|(a, va), (b, vb)| {
                a.is_resident()
                    .cmp(&b.is_resident())
                    .then_with(|| va.cmp(vb))
                    .then_with(|| b.id().cmp(&a.id()))
            })
            .map(|(b, _)| b.id())
    }

    /// Package `package` as seen through `provider`: its own export or its own wire
    fn source_of(&self, provider: BundleId, package: &str, wiring: &IndexMap<BundleId, Vec<Wire>>) -> Option<BundleId> {
        let description = self.bundles.get(&provider)?;
        if description.manifest().exports().iter().any(|e| e.name() == package) {
            return Some(provider);
        }
        wiring
            .get(&provider)?
            .iter()
            .find(|w| w.package == package)
            .map(|w| w.provider)
    }

    fn uses_conflicts(&self, wiring: &IndexMap<BundleId, Vec<Wire>>) -> Vec<(BundleId, Vec<ResolverError>)> {
        let mut failed = Vec::new();
        for (id, wires) in wiring {
            let description = &self.bundles[id];
            let mut errors = Vec::new();
            for wire in wires {
                let Some(export) = self.bundles[&wire.provider]
                    .manifest()
                    .exports()
                    .iter()
                    .find(|e| e.name() == wire.package)
                else {
                    continue;
                };
                for used in export.uses() {
                    let Some(own) = wires.iter().find(|w| &w.package == used) else {
                        continue;
                    };
                    let Some(expected) = self.source_of(wire.provider, used, wiring) else {
                        continue;
                    };
                    if expected == own.provider {
                        continue;
                    }
                    let constraint = description
                        .manifest()
                        .imports()
                        .iter()
                        .find(|i| i.name() == used)
                        .cloned();
                    if errors
                        .iter()
                        .any(|e: &ResolverError| e.constraint.as_ref().map(ImportedPackage::name) == Some(used.as_str()))
                    {
                        continue;
                    }
                    errors.push(ResolverError {
                        kind: ResolverErrorKind::ImportPackageUsesConflict,
                        detail: format!(
                            "Package uses conflict: Import-Package: {used}; wired to bundle {} but package '{}' from bundle {} uses it from bundle {}",
                            own.provider, wire.package, wire.provider, expected
                        ),
                        constraint,
                    });
                }
            }
            if !errors.is_empty() {
                failed.push((*id, errors));
            }
        }
        failed
    }
}

/// Version of the export of `bundle` that satisfies `import`
fn export_version<'a>(bundle: &'a BundleDescription, import: &ImportedPackage) -> Option<&'a Version> {
    if let Some(required) = import.bundle_symbolic_name() {
        if bundle.symbolic_name() != required || !import.bundle_version_range().includes(bundle.version()) {
            return None;
        }
    }
    bundle
        .manifest()
        .exports()
        .iter()
        .filter(|e| e.name() == import.name() && import.version_range().includes(e.version()))
        .map(deploy_artifact::ExportedPackage::version)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_artifact::{ExportedPackage, Resolution, VersionRange};

    fn manifest(name: &str) -> BundleManifest {
        BundleManifest::new(name, Version::new(1, 0, 0))
    }

    fn export(name: &str, version: (u64, u64, u64)) -> ExportedPackage {
        ExportedPackage::new(name, Version::new(version.0, version.1, version.2))
    }

    #[test]
    fn resident_bundles_are_resolved_context() {
        let mut state = ResolverState::new();
        state.add_bundle(BundleDescription::resident(
            BundleId(1),
            "sys",
            manifest("sys").with_export(export("com.sys", (1, 0, 0))),
        ));
        state.add_bundle(BundleDescription::new(
            BundleId(2),
            "app",
            manifest("app").with_import(ImportedPackage::new("com.sys")),
        ));
        state.resolve();
        assert!(state.is_resolved(BundleId(1)));
        assert!(state.is_resolved(BundleId(2)));
        assert_eq!(state.wires(BundleId(2))[0].provider, BundleId(1));
    }

    #[test]
    fn missing_import_is_recorded() {
        let mut state = ResolverState::new();
        let range: VersionRange = "[1.0,2.0)".parse().unwrap();
        state.add_bundle(BundleDescription::new(
            BundleId(5),
            "a",
            manifest("a").with_import(ImportedPackage::new("com.missing").with_version_range(range.clone())),
        ));
        state.resolve();
        assert!(!state.is_resolved(BundleId(5)));
        let errors = state.errors(BundleId(5));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ResolverErrorKind::MissingImportPackage);
        assert_eq!(errors[0].constraint().unwrap().version_range(), &range);
    }

    #[test]
    fn optional_import_may_be_missing() {
        let mut state = ResolverState::new();
        state.add_bundle(BundleDescription::new(
            BundleId(1),
            "a",
            manifest("a").with_import(ImportedPackage::new("com.x").with_resolution(Resolution::Optional)),
        ));
        state.resolve();
        assert!(state.is_resolved(BundleId(1)));
    }

    #[test]
    fn failure_cascades_to_consumers() {
        let mut state = ResolverState::new();
        state.add_bundle(BundleDescription::new(
            BundleId(1),
            "provider",
            manifest("provider")
                .with_export(export("com.p", (1, 0, 0)))
                .with_import(ImportedPackage::new("com.missing")),
        ));
        state.add_bundle(BundleDescription::new(
            BundleId(2),
            "consumer",
            manifest("consumer").with_import(ImportedPackage::new("com.p")),
        ));
        state.resolve();
        assert!(!state.is_resolved(BundleId(1)));
        assert!(!state.is_resolved(BundleId(2)));
        assert_eq!(state.providers(&ImportedPackage::new("com.p")), vec![BundleId(1)]);
    }

    #[test]
    fn cycles_resolve() {
        let mut state = ResolverState::new();
        state.add_bundle(BundleDescription::new(
            BundleId(1),
            "a",
            manifest("a")
                .with_export(export("com.a", (1, 0, 0)))
                .with_import(ImportedPackage::new("com.b")),
        ));
        state.add_bundle(BundleDescription::new(
            BundleId(2),
            "b",
            manifest("b")
                .with_export(export("com.b", (1, 0, 0)))
                .with_import(ImportedPackage::new("com.a")),
        ));
        state.resolve();
        assert!(state.is_resolved(BundleId(1)));
        assert!(state.is_resolved(BundleId(2)));
    }

    #[test]
    fn highest_version_wins() {
        let mut state = ResolverState::new();
        state.add_bundle(BundleDescription::new(BundleId(1), "old", manifest("old").with_export(export("com.p", (1, 0, 0)))));
        state.add_bundle(BundleDescription::new(BundleId(2), "new", manifest("new").with_export(export("com.p", (1, 5, 0)))));
        state.add_bundle(BundleDescription::new(
            BundleId(3),
            "c",
            manifest("c").with_import(ImportedPackage::new("com.p")),
        ));
        state.resolve();
        assert_eq!(state.wires(BundleId(3))[0].provider, BundleId(2));
    }

    #[test]
    fn fragment_needs_host() {
        let mut state = ResolverState::new();
        state.add_bundle(BundleDescription::new(
            BundleId(1),
            "frag",
            manifest("frag").with_fragment_host(FragmentHost::new("host", VersionRange::unbounded())),
        ));
        state.resolve();
        assert_eq!(state.errors(BundleId(1))[0].kind(), ResolverErrorKind::MissingFragmentHost);

        state.add_bundle(BundleDescription::new(BundleId(2), "host", manifest("host")));
        state.resolve();
        assert!(state.is_resolved(BundleId(1)));
    }

    #[test]
    fn uses_conflict_detected() {
        let mut state = ResolverState::new();
        state.add_bundle(BundleDescription::new(BundleId(1), "api1", manifest("api1").with_export(export("com.api", (1, 0, 0)))));
        state.add_bundle(BundleDescription::new(BundleId(2), "api2", manifest("api2").with_export(export("com.api", (2, 0, 0)))));
        state.add_bundle(BundleDescription::new(
            BundleId(3),
            "lib",
            manifest("lib")
                .with_export(export("com.lib", (1, 0, 0)).with_uses(["com.api"]))
                .with_import(ImportedPackage::new("com.api").with_version_range("[2.0,3.0)".parse().unwrap())),
        ));
        state.add_bundle(BundleDescription::new(
            BundleId(4),
            "web",
            manifest("web")
                .with_import(ImportedPackage::new("com.lib"))
                .with_import(ImportedPackage::new("com.api").with_version_range("[1.0,2.0)".parse().unwrap())),
        ));
        state.resolve();
        assert!(state.is_resolved(BundleId(3)));
        assert!(!state.is_resolved(BundleId(4)));
        let error = &state.errors(BundleId(4))[0];
        assert_eq!(error.kind(), ResolverErrorKind::ImportPackageUsesConflict);
        assert_eq!(error.constraint().unwrap().name(), "com.api");
    }
}
