//! Bundle manifest model
//!
//! [`BundleManifest`] is a typed view over manifest headers. Known headers are parsed
//! into structured values; every other header is preserved verbatim so that
//! [`BundleManifest::to_headers`] reproduces the full header set.
//!
//! Manifests come either from a header dictionary ([`BundleManifest::from_headers`]) or
//! from `Name: value` text with continuation lines ([`BundleManifest::from_text`]).

use crate::header::{self, Clause, HeaderError};
use crate::version::{Version, VersionError, VersionRange};
use indexmap::IndexMap;
use std::fmt;

pub const BUNDLE_SYMBOLIC_NAME: &str = "Bundle-SymbolicName";
pub const BUNDLE_VERSION: &str = "Bundle-Version";
pub const IMPORT_PACKAGE: &str = "Import-Package";
pub const EXPORT_PACKAGE: &str = "Export-Package";
pub const DYNAMIC_IMPORT_PACKAGE: &str = "DynamicImport-Package";
pub const FRAGMENT_HOST: &str = "Fragment-Host";
pub const BUNDLE_ACTIVATION_POLICY: &str = "Bundle-ActivationPolicy";

const VERSION_ATTRIBUTE: &str = "version";
const BUNDLE_SYMBOLIC_NAME_ATTRIBUTE: &str = "bundle-symbolic-name";
const BUNDLE_VERSION_ATTRIBUTE: &str = "bundle-version";
const RESOLUTION_DIRECTIVE: &str = "resolution";
const USES_DIRECTIVE: &str = "uses";

/// Errors raised while building a manifest
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    /// Header value has invalid clause syntax
    #[error("malformed header '{header}': {source}")]
    Header {
        header: String,
        #[source]
        source: HeaderError,
    },

    /// Header carries an invalid version or version range
    #[error("invalid version in header '{header}': {source}")]
    Version {
        header: String,
        #[source]
        source: VersionError,
    },

    /// Manifest text line is not of the form `Name: value`
    #[error("malformed manifest line '{0}'")]
    MalformedLine(String),
}

/// Import resolution mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Resolution {
    #[default]
    Mandatory,
    Optional,
}

/// An `Import-Package` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedPackage {
    name: String,
    version_range: VersionRange,
    resolution: Resolution,
    bundle_symbolic_name: Option<String>,
    bundle_version_range: VersionRange,
}

impl ImportedPackage {
    /// Mandatory import of any version
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_range: VersionRange::unbounded(),
            resolution: Resolution::Mandatory,
            bundle_symbolic_name: None,
            bundle_version_range: VersionRange::unbounded(),
        }
    }

    #[must_use]
    pub fn with_version_range(mut self, range: VersionRange) -> Self {
        self.version_range = range;
        self
    }

    #[must_use]
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Restrict the import to packages supplied by one bundle
    #[must_use]
    pub fn with_bundle(mut self, symbolic_name: impl Into<String>, range: VersionRange) -> Self {
        self.bundle_symbolic_name = Some(symbolic_name.into());
        self.bundle_version_range = range;
        self
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn version_range(&self) -> &VersionRange {
        &self.version_range
    }

    #[inline]
    #[must_use]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    #[inline]
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.resolution == Resolution::Optional
    }

    #[inline]
    #[must_use]
    pub fn bundle_symbolic_name(&self) -> Option<&str> {
        self.bundle_symbolic_name.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn bundle_version_range(&self) -> &VersionRange {
        &self.bundle_version_range
    }

    fn from_clause(clause: &Clause) -> Result<Vec<Self>, ManifestError> {
        let version_range = range_attribute(clause, VERSION_ATTRIBUTE, IMPORT_PACKAGE)?;
        let bundle_version_range = range_attribute(clause, BUNDLE_VERSION_ATTRIBUTE, IMPORT_PACKAGE)?;
        let resolution = match clause.directive(RESOLUTION_DIRECTIVE) {
            Some("optional") => Resolution::Optional,
            _ => Resolution::Mandatory,
        };
        Ok(clause
            .paths()
            .iter()
            .map(|path| Self {
                name: path.clone(),
                version_range: version_range.clone(),
                resolution,
                bundle_symbolic_name: clause
                    .attribute(BUNDLE_SYMBOLIC_NAME_ATTRIBUTE)
                    .map(str::to_string),
                bundle_version_range: bundle_version_range.clone(),
            })
            .collect())
    }

    fn to_clause(&self) -> Clause {
        let mut clause = Clause::new(&self.name);
        if !self.version_range.is_unbounded() {
            clause = clause.with_attribute(VERSION_ATTRIBUTE, self.version_range.to_string());
        }
        if let Some(bundle) = &self.bundle_symbolic_name {
            clause = clause.with_attribute(BUNDLE_SYMBOLIC_NAME_ATTRIBUTE, bundle);
            if !self.bundle_version_range.is_unbounded() {
                clause = clause
                    .with_attribute(BUNDLE_VERSION_ATTRIBUTE, self.bundle_version_range.to_string());
            }
        }
        if self.is_optional() {
            clause = clause.with_directive(RESOLUTION_DIRECTIVE, "optional");
        }
        clause
    }
}

/// An `Export-Package` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedPackage {
    name: String,
    version: Version,
    uses: Vec<String>,
}

impl ExportedPackage {
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            uses: Vec::new(),
        }
    }

    /// Declare packages whose wiring must agree with importers of this one
    #[must_use]
    pub fn with_uses<I, S>(mut self, uses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uses = uses.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    #[inline]
    #[must_use]
    pub fn uses(&self) -> &[String] {
        &self.uses
    }

    fn from_clause(clause: &Clause) -> Result<Vec<Self>, ManifestError> {
        let version = match clause.attribute(VERSION_ATTRIBUTE) {
            Some(raw) => raw.parse().map_err(|source| ManifestError::Version {
                header: EXPORT_PACKAGE.to_string(),
                source,
            })?,
            None => Version::empty(),
        };
        let uses: Vec<String> = clause
            .directive(USES_DIRECTIVE)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(clause
            .paths()
            .iter()
            .map(|path| Self::new(path.clone(), version.clone()).with_uses(uses.clone()))
            .collect())
    }

    fn to_clause(&self) -> Clause {
        let mut clause = Clause::new(&self.name).with_attribute(VERSION_ATTRIBUTE, self.version.to_string());
        if !self.uses.is_empty() {
            clause = clause.with_directive(USES_DIRECTIVE, self.uses.join(","));
        }
        clause
    }
}

/// The `Fragment-Host` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentHost {
    symbolic_name: String,
    version_range: VersionRange,
}

impl FragmentHost {
    #[must_use]
    pub fn new(symbolic_name: impl Into<String>, version_range: VersionRange) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version_range,
        }
    }

    #[inline]
    #[must_use]
    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    #[inline]
    #[must_use]
    pub fn version_range(&self) -> &VersionRange {
        &self.version_range
    }
}

/// One `DynamicImport-Package` entry
///
/// Attributes and directives of the declaring clause are kept so that renaming the
/// package preserves them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicImport {
    clause: Clause,
}

impl DynamicImport {
    #[must_use]
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            clause: Clause::new(package_name),
        }
    }

    /// Package name, possibly ending in a wildcard
    #[must_use]
    pub fn package_name(&self) -> &str {
        self.clause.paths().first().map_or("", String::as_str)
    }

    /// Same entry naming a different package
    #[must_use]
    pub fn with_package_name(&self, package_name: impl Into<String>) -> Self {
        Self {
            clause: self.clause.with_path(package_name),
        }
    }

    #[inline]
    #[must_use]
    pub fn clause(&self) -> &Clause {
        &self.clause
    }

    /// Header syntax of this entry
    #[must_use]
    pub fn to_parse_string(&self) -> String {
        self.clause.to_string()
    }
}

/// Typed view over a bundle's manifest headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleManifest {
    symbolic_name: Option<String>,
    version: Version,
    imports: Vec<ImportedPackage>,
    exports: Vec<ExportedPackage>,
    dynamic_imports: Vec<DynamicImport>,
    fragment_host: Option<FragmentHost>,
    activation_policy: Option<String>,
    other_headers: IndexMap<String, String>,
}

impl BundleManifest {
    /// Manifest for a bundle with the given name and version
    #[must_use]
    pub fn new(symbolic_name: impl Into<String>, version: Version) -> Self {
        Self {
            symbolic_name: Some(symbolic_name.into()),
            version,
            ..Self::default()
        }
    }

    /// Build a manifest from a header dictionary
    ///
    /// # Errors
    /// Returns error if a known header cannot be parsed
    pub fn from_headers<'a, I>(headers: I) -> Result<Self, ManifestError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut manifest = Self::default();
        for (name, value) in headers {
            manifest.set_header(name, value)?;
        }
        Ok(manifest)
    }

    /// Build a manifest from `Name: value` lines
    ///
    /// Lines starting with a single space continue the previous value.
    ///
    /// # Errors
    /// Returns error on malformed lines or unparseable headers
    pub fn from_text(text: &str) -> Result<Self, ManifestError> {
        let mut entries: Vec<(String, String)> = Vec::new();
        for line in text.lines() {
            if let Some(continuation) = line.strip_prefix(' ') {
                match entries.last_mut() {
                    Some((_, value)) => value.push_str(continuation),
                    None => return Err(ManifestError::MalformedLine(line.to_string())),
                }
            } else if !line.trim().is_empty() {
                let (name, value) = line
                    .split_once(':')
                    .ok_or_else(|| ManifestError::MalformedLine(line.to_string()))?;
                entries.push((name.trim().to_string(), value.trim().to_string()));
            }
        }
        Self::from_headers(entries.iter().map(|(n, v)| (n.as_str(), v.as_str())))
    }

    /// Replace one header, re-parsing it when it is a known one
    ///
    /// # Errors
    /// Returns error if the value cannot be parsed
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), ManifestError> {
        let clauses = || {
            header::parse_clauses(value).map_err(|source| ManifestError::Header {
                header: name.to_string(),
                source,
            })
        };
        match name {
            BUNDLE_SYMBOLIC_NAME => {
                self.symbolic_name = clauses()?.first().and_then(|c| c.paths().first().cloned());
            }
            BUNDLE_VERSION => {
                self.version = if value.trim().is_empty() {
                    Version::empty()
                } else {
                    value.parse().map_err(|source| ManifestError::Version {
                        header: name.to_string(),
                        source,
                    })?
                };
            }
            IMPORT_PACKAGE => {
                let mut imports = Vec::new();
                for clause in clauses()? {
                    imports.extend(ImportedPackage::from_clause(&clause)?);
                }
                self.imports = imports;
            }
            EXPORT_PACKAGE => {
                let mut exports = Vec::new();
                for clause in clauses()? {
                    exports.extend(ExportedPackage::from_clause(&clause)?);
                }
                self.exports = exports;
            }
            DYNAMIC_IMPORT_PACKAGE => {
                self.dynamic_imports = clauses()?
                    .iter()
                    .flat_map(|clause| {
                        clause.paths().iter().map(|path| DynamicImport {
                            clause: clause.with_path(path.clone()),
                        })
                    })
                    .collect();
            }
            FRAGMENT_HOST => {
                self.fragment_host = match clauses()?.first() {
                    Some(clause) => Some(FragmentHost::new(
                        clause.paths()[0].clone(),
                        range_attribute(clause, BUNDLE_VERSION_ATTRIBUTE, FRAGMENT_HOST)?,
                    )),
                    None => None,
                };
            }
            BUNDLE_ACTIVATION_POLICY => {
                self.activation_policy = clauses()?.first().map(|c| c.paths()[0].clone());
            }
            _ => {
                self.other_headers.insert(name.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    /// All headers in header syntax
    #[must_use]
    pub fn to_headers(&self) -> IndexMap<String, String> {
        let mut headers = IndexMap::new();
        if let Some(name) = &self.symbolic_name {
            headers.insert(BUNDLE_SYMBOLIC_NAME.to_string(), name.clone());
            headers.insert(BUNDLE_VERSION.to_string(), self.version.to_string());
        }
        if !self.imports.is_empty() {
            let clauses: Vec<Clause> = self.imports.iter().map(ImportedPackage::to_clause).collect();
            headers.insert(IMPORT_PACKAGE.to_string(), header::to_header_value(&clauses));
        }
        if !self.exports.is_empty() {
            let clauses: Vec<Clause> = self.exports.iter().map(ExportedPackage::to_clause).collect();
            headers.insert(EXPORT_PACKAGE.to_string(), header::to_header_value(&clauses));
        }
        if !self.dynamic_imports.is_empty() {
            let clauses: Vec<Clause> = self.dynamic_imports.iter().map(|d| d.clause.clone()).collect();
            headers.insert(DYNAMIC_IMPORT_PACKAGE.to_string(), header::to_header_value(&clauses));
        }
        if let Some(host) = &self.fragment_host {
            let mut clause = Clause::new(host.symbolic_name());
            if !host.version_range().is_unbounded() {
                clause = clause.with_attribute(BUNDLE_VERSION_ATTRIBUTE, host.version_range().to_string());
            }
            headers.insert(FRAGMENT_HOST.to_string(), clause.to_string());
        }
        if let Some(policy) = &self.activation_policy {
            headers.insert(BUNDLE_ACTIVATION_POLICY.to_string(), policy.clone());
        }
        for (name, value) in &self.other_headers {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    /// Value of any header in header syntax
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.to_headers().swap_remove(name)
    }

    #[must_use]
    pub fn with_import(mut self, import: ImportedPackage) -> Self {
        self.imports.push(import);
        self
    }

    #[must_use]
    pub fn with_export(mut self, export: ExportedPackage) -> Self {
        self.exports.push(export);
        self
    }

    #[must_use]
    pub fn with_dynamic_import(mut self, import: DynamicImport) -> Self {
        self.dynamic_imports.push(import);
        self
    }

    #[must_use]
    pub fn with_fragment_host(mut self, host: FragmentHost) -> Self {
        self.fragment_host = Some(host);
        self
    }

    #[must_use]
    pub fn with_activation_policy(mut self, policy: impl Into<String>) -> Self {
        self.activation_policy = Some(policy.into());
        self
    }

    /// Add or replace an unstructured header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.other_headers.insert(name.into(), value.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn symbolic_name(&self) -> Option<&str> {
        self.symbolic_name.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    #[inline]
    #[must_use]
    pub fn imports(&self) -> &[ImportedPackage] {
        &self.imports
    }

    #[inline]
    #[must_use]
    pub fn exports(&self) -> &[ExportedPackage] {
        &self.exports
    }

    #[inline]
    #[must_use]
    pub fn dynamic_imports(&self) -> &[DynamicImport] {
        &self.dynamic_imports
    }

    #[inline]
    #[must_use]
    pub fn fragment_host(&self) -> Option<&FragmentHost> {
        self.fragment_host.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.fragment_host.is_some()
    }

    #[inline]
    #[must_use]
    pub fn activation_policy(&self) -> Option<&str> {
        self.activation_policy.as_deref()
    }

    /// Mutable access to imports, used by manifest transformers
    pub fn imports_mut(&mut self) -> &mut Vec<ImportedPackage> {
        &mut self.imports
    }

    /// Mutable access to exports, used by manifest transformers
    pub fn exports_mut(&mut self) -> &mut Vec<ExportedPackage> {
        &mut self.exports
    }
}

impl fmt::Display for BundleManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.to_headers() {
            writeln!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}

/// Produces typed manifests from raw headers
///
/// The core never reads archives; embedders decide where headers come from.
pub trait ManifestProvider: Send + Sync {
    /// Build a manifest from a header dictionary
    ///
    /// # Errors
    /// Returns error if the headers cannot be parsed
    fn parse_headers(&self, headers: &IndexMap<String, String>) -> Result<BundleManifest, ManifestError>;

    /// Build a manifest from manifest text
    ///
    /// # Errors
    /// Returns error if the text cannot be parsed
    fn parse_text(&self, text: &str) -> Result<BundleManifest, ManifestError> {
        BundleManifest::from_text(text)
    }
}

/// [`ManifestProvider`] using the built-in header parser
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderManifestProvider;

impl ManifestProvider for HeaderManifestProvider {
    fn parse_headers(&self, headers: &IndexMap<String, String>) -> Result<BundleManifest, ManifestError> {
        BundleManifest::from_headers(headers.iter().map(|(n, v)| (n.as_str(), v.as_str())))
    }
}

fn range_attribute(clause: &Clause, attribute: &str, header: &str) -> Result<VersionRange, ManifestError> {
    match clause.attribute(attribute) {
        Some(raw) => raw.parse().map_err(|source| ManifestError::Version {
            header: header.to_string(),
            source,
        }),
        None => Ok(VersionRange::unbounded()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEXT: &str = "Bundle-SymbolicName: shop.web;singleton:=true
Bundle-Version: 1.2.0
Import-Package: shop.api;version=\"[1.0,2.0)\",
 shop.util;resolution:=optional;bundle-symbolic-name=shop.core
Export-Package: shop.web.ui;version=1.2.0;uses:=\"shop.api,shop.util\"
Bundle-ActivationPolicy: lazy
Bundle-Blueprint: OSGI-INF/app.xml
";

    #[test]
    fn parses_text_manifest() {
        let manifest = BundleManifest::from_text(TEXT).unwrap();
        assert_eq!(manifest.symbolic_name(), Some("shop.web"));
        assert_eq!(manifest.version(), &Version::new(1, 2, 0));
        assert_eq!(manifest.imports().len(), 2);

        let api = &manifest.imports()[0];
        assert_eq!(api.name(), "shop.api");
        assert!(api.version_range().includes(&Version::new(1, 5, 0)));
        assert!(!api.version_range().includes(&Version::new(2, 0, 0)));

        let util = &manifest.imports()[1];
        assert!(util.is_optional());
        assert_eq!(util.bundle_symbolic_name(), Some("shop.core"));

        assert_eq!(manifest.exports()[0].uses(), ["shop.api", "shop.util"]);
        assert_eq!(manifest.activation_policy(), Some("lazy"));
        assert_eq!(manifest.header("Bundle-Blueprint").as_deref(), Some("OSGI-INF/app.xml"));
    }

    #[test]
    fn fragment_host_marks_fragment() {
        let manifest = BundleManifest::from_headers([
            (BUNDLE_SYMBOLIC_NAME, "frag"),
            (FRAGMENT_HOST, "host;bundle-version=\"[1.0,2.0)\""),
        ])
        .unwrap();
        assert!(manifest.is_fragment());
        assert_eq!(manifest.fragment_host().unwrap().symbolic_name(), "host");
    }

    #[test]
    fn dynamic_imports_split_paths() {
        let manifest =
            BundleManifest::from_headers([(DYNAMIC_IMPORT_PACKAGE, "com.foo.*;com.bar;version=1.0")]).unwrap();
        let names: Vec<&str> = manifest.dynamic_imports().iter().map(DynamicImport::package_name).collect();
        assert_eq!(names, ["com.foo.*", "com.bar"]);
        assert_eq!(manifest.dynamic_imports()[1].to_parse_string(), "com.bar;version=1.0");
    }

    #[test]
    fn headers_survive_rebuild() {
        let manifest = BundleManifest::from_text(TEXT).unwrap();
        let rebuilt = HeaderManifestProvider.parse_headers(&manifest.to_headers()).unwrap();
        assert_eq!(rebuilt, manifest);
    }

    #[test]
    fn bad_version_is_reported() {
        let err = BundleManifest::from_headers([(BUNDLE_VERSION, "x.y")]).unwrap_err();
        assert!(matches!(err, ManifestError::Version { .. }));
        assert!(matches!(
            BundleManifest::from_text("no colon here"),
            Err(ManifestError::MalformedLine(_))
        ));
    }
}
