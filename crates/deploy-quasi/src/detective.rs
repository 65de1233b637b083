//! Resolution failure explanations
//!
//! Turns the resolver's per-bundle errors into the multi-line "Cannot resolve" report
//! shown to users. When a missing import has providers that are themselves unresolved,
//! the report names them so the reader can follow the chain to its root.

use crate::framework::BundleId;
use crate::resolver::{ResolverError, ResolverErrorKind, ResolverState};
use std::fmt::Write;

const INDENT: &str = "    ";

/// Produces failure descriptions for unresolved bundles
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolutionFailureDetective;

impl ResolutionFailureDetective {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Describe why `bundle` did not resolve in `state`
    ///
    /// Returns the description and the resolver errors it was built from. A resolved
    /// bundle yields an empty description and no errors.
    #[must_use]
    pub fn generate_failure_description(&self, state: &ResolverState, bundle: BundleId) -> (String, Vec<ResolverError>) {
        let Some(description) = state.bundle(bundle) else {
            return (format!("Cannot resolve: unknown bundle {bundle}"), Vec::new());
        };
        if state.is_resolved(bundle) {
            return (String::new(), Vec::new());
        }

        let errors = state.errors(bundle).to_vec();
        let mut report = format!("Cannot resolve: {}\n{INDENT}Resolver report:\n", description.symbolic_name());
        if errors.is_empty() {
            let _ = writeln!(report, "{INDENT}{INDENT}Bundle <{description}> has not been resolved.");
        }

        for error in &errors {
            match error.kind() {
                ResolverErrorKind::MissingImportPackage => {
                    let _ = writeln!(
                        report,
                        "{INDENT}{INDENT}An Import-Package could not be resolved. Caused by missing constraint in bundle <{description}>"
                    );
                    if let Some(import) = error.constraint() {
                        let _ = writeln!(
                            report,
                            "{INDENT}{INDENT}{INDENT} constraint: <Import-Package: {}; version=\"{}\">",
                            import.name(),
                            import.version_range()
                        );
                        for provider in state.providers(import) {
                            if let Some(unresolved) = state.bundle(provider).filter(|_| !state.is_resolved(provider)) {
                                let _ = writeln!(
                                    report,
                                    "{INDENT}{INDENT}{INDENT} candidate provider <{unresolved}> is itself unresolved"
                                );
                            }
                        }
                    }
                }
                ResolverErrorKind::ImportPackageUsesConflict => {
                    let _ = writeln!(
                        report,
                        "{INDENT}{INDENT}Uses violation in bundle <{description}>: {}",
                        error.detail()
                    );
                }
                ResolverErrorKind::MissingFragmentHost => {
                    let _ = writeln!(report, "{INDENT}{INDENT}{}", error.detail());
                }
            }
        }
        (report, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::BundleDescription;
    use deploy_artifact::{BundleManifest, ExportedPackage, ImportedPackage, Version};

    #[test]
    fn report_names_constraint_and_unresolved_provider() {
        let mut state = ResolverState::new();
        state.add_bundle(BundleDescription::new(
            BundleId(1),
            "p",
            BundleManifest::new("p", Version::new(1, 0, 0))
                .with_export(ExportedPackage::new("com.p", Version::new(1, 0, 0)))
                .with_import(ImportedPackage::new("com.gone")),
        ));
        state.add_bundle(BundleDescription::new(
            BundleId(2),
            "c",
            BundleManifest::new("c", Version::new(1, 0, 0)).with_import(ImportedPackage::new("com.p")),
        ));
        state.resolve();

        let (report, errors) = ResolutionFailureDetective::new().generate_failure_description(&state, BundleId(2));
        assert_eq!(errors.len(), 1);
        assert!(report.starts_with("Cannot resolve: c\n"));
        assert!(report.contains("constraint: <Import-Package: com.p; version=\"0.0.0\">"));
        assert!(report.contains("candidate provider <p_1.0.0> is itself unresolved"));
    }

    #[test]
    fn resolved_bundle_has_no_report() {
        let mut state = ResolverState::new();
        state.add_bundle(BundleDescription::new(BundleId(1), "a", BundleManifest::new("a", Version::new(1, 0, 0))));
        state.resolve();
        let (report, errors) = ResolutionFailureDetective::new().generate_failure_description(&state, BundleId(1));
        assert!(report.is_empty());
        assert!(errors.is_empty());
    }
}
