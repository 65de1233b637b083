//! Package import wildcard expansion
//!
//! Region import configuration lists packages as dynamic-import entries. An entry whose
//! package name ends in the wildcard marker expands to every exported package that shares
//! its prefix, in export registry order. `com.foo.*` matches `com.foo` itself as well as
//! every package below it. Expanded entries keep the attributes and directives of the
//! entry they came from.
//!
//! An entry matching nothing contributes nothing and is reported once through the event
//! logger. Parse failures are reported the same way and yield an empty expansion.

use crate::framework::ModuleFramework;
use deploy_artifact::manifest::DYNAMIC_IMPORT_PACKAGE;
use deploy_artifact::{BundleManifest, EventLogger, LogEvent};
use indexmap::IndexSet;
use std::sync::Arc;

/// Default wildcard marker
pub const WILDCARD: &str = "*";

/// Expands wildcarded package imports against an export registry
pub struct PackageImportWildcardExpander {
    wildcard: String,
    event_logger: Arc<dyn EventLogger>,
}

impl PackageImportWildcardExpander {
    #[must_use]
    pub fn new(event_logger: Arc<dyn EventLogger>) -> Self {
        Self {
            wildcard: WILDCARD.to_string(),
            event_logger,
        }
    }

    /// Use a different wildcard marker
    #[must_use]
    pub fn with_wildcard(mut self, wildcard: impl Into<String>) -> Self {
        self.wildcard = wildcard.into();
        self
    }

    /// Expand `imports` against the framework's export registry
    #[must_use]
    pub fn expand_with_framework(&self, imports: &str, framework: &dyn ModuleFramework) -> String {
        let names: IndexSet<String> = framework
            .exported_packages()
            .into_iter()
            .map(|export| export.name().to_string())
            .collect();
        let names: Vec<String> = names.into_iter().collect();
        self.expand(imports, &names)
    }

    /// Expand `imports` against `exported_package_names`, rendered back as a header value
    #[must_use]
    pub fn expand(&self, imports: &str, exported_package_names: &[String]) -> String {
        self.expand_entries(imports, exported_package_names).join(",")
    }

    /// Expand `imports` against `exported_package_names`, one header entry per item
    #[must_use]
    pub fn expand_entries(&self, imports: &str, exported_package_names: &[String]) -> Vec<String> {
        let manifest = match BundleManifest::from_headers([(DYNAMIC_IMPORT_PACKAGE, imports)]) {
            Ok(manifest) => manifest,
            Err(error) => {
                self.event_logger
                    .log(LogEvent::RegionImportsParseFailed, Some(&error), &[&imports]);
                return Vec::new();
            }
        };

        let mut expanded = Vec::new();
        for entry in manifest.dynamic_imports() {
            match entry.package_name().strip_suffix(self.wildcard.as_str()) {
                Some(prefix) => {
                    let matches = matching_packages(prefix, exported_package_names);
                    if matches.is_empty() {
                        self.event_logger
                            .info(LogEvent::RegionImportNoMatch, &[&entry.package_name()]);
                    }
                    expanded.extend(
                        matches
                            .into_iter()
                            .map(|name| entry.with_package_name(name).to_parse_string()),
                    );
                }
                None => expanded.push(entry.to_parse_string()),
            }
        }
        expanded
    }
}

impl std::fmt::Debug for PackageImportWildcardExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageImportWildcardExpander")
            .field("wildcard", &self.wildcard)
            .finish_non_exhaustive()
    }
}

fn matching_packages<'a>(prefix: &str, exported_package_names: &'a [String]) -> Vec<&'a str> {
    let parent = prefix.strip_suffix('.').filter(|p| !p.is_empty());
    let mut seen = IndexSet::new();
    for name in exported_package_names {
        if name.starts_with(prefix) || Some(name.as_str()) == parent {
            seen.insert(name.as_str());
        }
    }
    seen.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_artifact::MemoryEventLogger;
    use proptest::prelude::*;

    fn exported() -> Vec<String> {
        ["com.foo", "com.foo.bar", "com.baz"].iter().map(ToString::to_string).collect()
    }

    fn expander() -> (PackageImportWildcardExpander, Arc<MemoryEventLogger>) {
        let logger = Arc::new(MemoryEventLogger::new());
        (PackageImportWildcardExpander::new(logger.clone()), logger)
    }

    #[test]
    fn wildcard_matches_package_and_children() {
        let (expander, logger) = expander();
        assert_eq!(expander.expand_entries("com.foo.*", &exported()), vec!["com.foo", "com.foo.bar"]);
        assert!(logger.events().is_empty());
    }

    #[test]
    fn no_match_logs_once() {
        let (expander, logger) = expander();
        assert!(expander.expand_entries("zzz.*", &exported()).is_empty());
        assert_eq!(logger.count(LogEvent::RegionImportNoMatch), 1);
        assert_eq!(logger.events()[0].args, vec!["zzz.*"]);
    }

    #[test]
    fn plain_entries_pass_through_with_attributes() {
        let (expander, _) = expander();
        assert_eq!(
            expander.expand("com.plain;version=\"[1.0,2.0)\",com.baz*", &exported()),
            "com.plain;version=\"[1.0,2.0)\",com.baz"
        );
    }

    #[test]
    fn expansion_keeps_attributes() {
        let (expander, _) = expander();
        assert_eq!(
            expander.expand_entries("com.foo.*;resolution:=optional", &exported()),
            vec!["com.foo;resolution:=optional", "com.foo.bar;resolution:=optional"]
        );
    }

    #[test]
    fn parse_failure_is_logged() {
        let (expander, logger) = expander();
        assert!(expander.expand_entries("com.foo;version=\"1.0", &exported()).is_empty());
        assert_eq!(logger.count(LogEvent::RegionImportsParseFailed), 1);
    }

    #[test]
    fn custom_wildcard_marker() {
        let (expander, _) = expander();
        let expander = expander.with_wildcard("%");
        assert_eq!(expander.expand_entries("com.baz%", &exported()), vec!["com.baz"]);
    }

    proptest! {
        #[test]
        fn prop_expansions_share_prefix(prefix in "[a-c]{1,2}", names in proptest::collection::vec("[a-c]{1,3}(\\.[a-c]{1,2})?", 0..12)) {
            let (expander, logger) = expander();
            let expanded = expander.expand_entries(&format!("{prefix}*"), &names);
            for name in &expanded {
                prop_assert!(name.starts_with(&prefix));
                prop_assert!(names.contains(name));
            }
            prop_assert_eq!(expanded.is_empty(), logger.count(LogEvent::RegionImportNoMatch) == 1);
        }
    }
}
