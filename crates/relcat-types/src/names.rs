//! Domain-qualified names for catalog objects
//!
//! Components and applications are addressed as `domain.name;variant;version`
//! where the domain is a dotted path (`GLOBAL.Acme.Store`) and both variant and
//! version are optional. Parsing never fails: every input yields a name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Replace every `.` and `-` with `_`
pub fn clean(value: &str) -> String {
    value.replace(['.', '-'], "_")
}

/// Split `app;variant;version` into `(app;variant, version)` when no explicit
/// version was given. Any other shape is returned unchanged.
pub fn split_app_version(name: &str, version: &str) -> (String, String) {
    if version.trim().is_empty() {
        let parts: Vec<&str> = name.split(';').collect();
        if parts.len() == 3 {
            return (format!("{};{}", parts[0], parts[1]), parts[2].to_string());
        }
    }
    (name.to_string(), version.to_string())
}

/// A parsed catalog name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Dotted domain path, outermost first
    pub domain: Vec<String>,
    pub local_name: String,
    pub variant: String,
    pub version: String,
}

impl QualifiedName {
    /// Parse a raw name with no separately supplied version
    pub fn parse(raw: &str) -> Self {
        NameParser::parse(raw, "")
    }

    /// Domain path joined with `.`
    pub fn domain_path(&self) -> String {
        self.domain.join(".")
    }

    /// `domain.localName`
    pub fn full_name(&self) -> String {
        if self.domain.is_empty() {
            self.local_name.clone()
        } else {
            format!("{}.{}", self.domain_path(), self.local_name)
        }
    }

    /// `localName;variant;version` with trailing empty parts omitted.
    ///
    /// This is the form the catalog reports back in lookup results.
    pub fn short_name(&self) -> String {
        compose(&self.local_name, &self.variant, &self.version)
    }

    /// `domain.localName;variant;version` with trailing empty parts omitted
    pub fn canonical(&self) -> String {
        compose(&self.full_name(), &self.variant, &self.version)
    }

    /// Variant and version cleaned, and an empty variant replaced by the version
    pub fn cleaned(&self) -> Self {
        let mut variant = clean(&self.variant);
        let mut version = clean(&self.version);
        if variant.is_empty() && !version.is_empty() {
            variant = std::mem::take(&mut version);
        }
        Self {
            domain: self.domain.clone(),
            local_name: self.local_name.clone(),
            variant,
            version,
        }
    }

    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..self.clone()
        }
    }

    /// The same name with the version dropped
    pub fn without_version(&self) -> Self {
        self.with_version(String::new())
    }

    /// The base name: domain and local name only
    pub fn base(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            local_name: self.local_name.clone(),
            variant: String::new(),
            version: String::new(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn compose(name: &str, variant: &str, version: &str) -> String {
    if !version.is_empty() {
        format!("{name};{variant};{version}")
    } else if !variant.is_empty() {
        format!("{name};{variant}")
    } else {
        name.to_string()
    }
}

/// Turns raw name strings into [`QualifiedName`]s
pub struct NameParser;

impl NameParser {
    /// Parse `raw`, falling back to `version` when `raw` carries none.
    ///
    /// Variant and version are kept as written; call
    /// [`QualifiedName::cleaned`] before using them against the catalog.
    pub fn parse(raw: &str, version: &str) -> QualifiedName {
        let mut parts = raw.splitn(3, ';');
        let name = parts.next().unwrap_or_default();
        let mut variant = parts.next().unwrap_or_default().to_string();
        let mut version = match parts.next() {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => version.to_string(),
        };

        if variant.trim().is_empty() {
            variant.clear();
            if let Some((left, right)) = split_version_marker(&version) {
                variant = left;
                version = right;
            }
        }

        let (domain, local_name) = match name.rsplit_once('.') {
            Some((domain, local)) => (
                domain.split('.').map(str::to_string).collect(),
                local.to_string(),
            ),
            None => (Vec::new(), name.to_string()),
        };

        QualifiedName {
            domain,
            local_name,
            variant,
            version,
        }
    }
}

/// `main-v1.2` -> (`main`, `v1.2`); the marker is always written as `v`
fn split_version_marker(version: &str) -> Option<(String, String)> {
    let at = [version.find("-v"), version.find("-V")]
        .into_iter()
        .flatten()
        .min()?;
    let (left, right) = version.split_at(at);
    Some((left.to_string(), format!("v{}", &right[2..])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_full_name() {
        let name = QualifiedName::parse("a.b.c;var;ver");
        assert_eq!(name.domain, vec!["a", "b"]);
        assert_eq!(name.local_name, "c");
        assert_eq!(name.variant, "var");
        assert_eq!(name.version, "ver");
        assert_eq!(name.full_name(), "a.b.c");
        assert_eq!(name.short_name(), "c;var;ver");
    }

    #[test]
    fn test_version_marker_moves_into_variant() {
        let name = NameParser::parse("GLOBAL.store", "foo-v1.2");
        assert_eq!(name.variant, "foo");
        assert_eq!(name.version, "v1.2");

    }

    #[test]
    fn test_upper_case_version_marker_is_lowered() {
        let upper = NameParser::parse("GLOBAL.store", "main-V3");
        assert_eq!(upper.variant, "main");
        assert_eq!(upper.version, "v3");
        assert_eq!(upper.short_name(), "store;main;v3");
    }

    #[test]
    fn test_version_marker_ignored_when_variant_present() {
        let name = NameParser::parse("store;main", "foo-v1.2");
        assert_eq!(name.variant, "main");
        assert_eq!(name.version, "foo-v1.2");
    }

    #[test]
    fn test_raw_version_wins_over_argument() {
        let name = NameParser::parse("store;main;7", "9");
        assert_eq!(name.version, "7");
    }

    #[test]
    fn test_cleaned_collapses_empty_variant() {
        let name = NameParser::parse("GLOBAL.store", "1.2-rc").cleaned();
        assert_eq!(name.variant, "1_2_rc");
        assert_eq!(name.version, "");
        assert_eq!(name.canonical(), "GLOBAL.store;1_2_rc");
    }

    #[test]
    fn test_undotted_name_has_no_domain() {
        let name = QualifiedName::parse("store");
        assert!(name.domain.is_empty());
        assert_eq!(name.canonical(), "store");
    }

    #[test]
    fn test_empty_input() {
        let name = QualifiedName::parse("");
        assert_eq!(name, QualifiedName::default());
    }

    #[test]
    fn test_split_app_version() {
        assert_eq!(
            split_app_version("shop;main;4", ""),
            ("shop;main".to_string(), "4".to_string())
        );
        assert_eq!(
            split_app_version("shop;main;4", "5"),
            ("shop;main;4".to_string(), "5".to_string())
        );
        assert_eq!(
            split_app_version("shop;main", ""),
            ("shop;main".to_string(), String::new())
        );
    }

    proptest! {
        #[test]
        fn cleaned_parts_have_no_separators(raw in "[a-zA-Z0-9.;_-]{0,40}", version in "[a-zA-Z0-9._-]{0,12}") {
            let name = NameParser::parse(&raw, &version).cleaned();
            prop_assert!(!name.variant.contains(['.', '-']));
            prop_assert!(!name.version.contains(['.', '-']));
            prop_assert!(name.version.is_empty() || !name.variant.is_empty());
        }
    }
}
