//! Manifest header clause parsing
//!
//! Header values such as `Import-Package` are comma-separated clauses. Each clause holds
//! one or more paths followed by parameters, all separated by `;`:
//!
//! ```text
//! com.foo;com.foo.api;version="[1.0,2.0)";resolution:=optional, com.bar
//! ```
//!
//! - `name=value` is an attribute
//! - `name:=value` is a directive
//! - values may be double-quoted to protect `,` `;` and `=`

use indexmap::IndexMap;
use std::fmt;

/// Errors raised while parsing header values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    /// A clause contains no path
    #[error("empty clause in header value '{0}'")]
    EmptyClause(String),

    /// A quoted value is missing its closing quote
    #[error("unterminated quote in header value '{0}'")]
    UnterminatedQuote(String),

    /// A path appears after a parameter
    #[error("path '{path}' follows parameters in clause '{clause}'")]
    MisplacedPath { clause: String, path: String },
}

/// One clause of a header value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clause {
    paths: Vec<String>,
    attributes: IndexMap<String, String>,
    directives: IndexMap<String, String>,
}

impl Clause {
    /// Clause with a single path and no parameters
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            paths: vec![path.into()],
            ..Self::default()
        }
    }

    /// Add an attribute
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Add a directive
    #[must_use]
    pub fn with_directive(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.directives.insert(name.into(), value.into());
        self
    }

    /// Copy of this clause carrying a single different path
    #[must_use]
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            paths: vec![path.into()],
            attributes: self.attributes.clone(),
            directives: self.directives.clone(),
        }
    }

    #[inline]
    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    #[inline]
    #[must_use]
    pub fn attributes(&self) -> &IndexMap<String, String> {
        &self.attributes
    }

    #[inline]
    #[must_use]
    pub fn directives(&self) -> &IndexMap<String, String> {
        &self.directives
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn directive(&self, name: &str) -> Option<&str> {
        self.directives.get(name).map(String::as_str)
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.paths.join(";"))?;
        for (name, value) in &self.attributes {
            write!(f, ";{name}={}", quote_if_needed(value))?;
        }
        for (name, value) in &self.directives {
            write!(f, ";{name}:={}", quote_if_needed(value))?;
        }
        Ok(())
    }
}

/// Parse a header value into clauses
///
/// An empty or whitespace-only value yields no clauses.
///
/// # Errors
/// Returns error on unbalanced quotes, empty clauses or paths after parameters
pub fn parse_clauses(value: &str) -> Result<Vec<Clause>, HeaderError> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }

    split_unquoted(value, ',', value)?
        .into_iter()
        .map(|raw| parse_clause(raw, value))
        .collect()
}

/// Render clauses back to a header value
#[must_use]
pub fn to_header_value(clauses: &[Clause]) -> String {
    clauses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_clause(raw: &str, whole: &str) -> Result<Clause, HeaderError> {
    let mut clause = Clause::default();
    for part in split_unquoted(raw, ';', whole)? {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((name, value)) = part.split_once(":=") {
            clause
                .directives
                .insert(name.trim().to_string(), unquote(value.trim()));
        } else if let Some((name, value)) = part.split_once('=') {
            clause
                .attributes
                .insert(name.trim().to_string(), unquote(value.trim()));
        } else if clause.attributes.is_empty() && clause.directives.is_empty() {
            clause.paths.push(part.to_string());
        } else {
            return Err(HeaderError::MisplacedPath {
                clause: raw.trim().to_string(),
                path: part.to_string(),
            });
        }
    }

    if clause.paths.is_empty() {
        return Err(HeaderError::EmptyClause(whole.to_string()));
    }
    Ok(clause)
}

fn split_unquoted<'a>(input: &'a str, separator: char, whole: &str) -> Result<Vec<&'a str>, HeaderError> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (index, ch) in input.char_indices() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == separator && !in_quotes {
            parts.push(&input[start..index]);
            start = index + ch.len_utf8();
        }
    }
    if in_quotes {
        return Err(HeaderError::UnterminatedQuote(whole.to_string()));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

fn quote_if_needed(value: &str) -> String {
    if value.contains([',', ';', '=', ' ', '[', '(']) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}
