//! Component kinds and file items

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// What a component version carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// A container image, described by `DockerRepo`/`DockerTag` attributes
    #[default]
    Docker,
    /// An ordered list of file items
    File,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::File => "file",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown component kind: {0}")]
pub struct ParseKindError(pub String);

impl FromStr for ComponentKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "docker" => Ok(Self::Docker),
            "file" => Ok(Self::File),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

/// One file item of a `file` component.
///
/// Deserializes from a flat table; the `name` key (any case) becomes the item
/// name, every other key is passed to the catalog as an item property.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct ComponentItem {
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

impl From<BTreeMap<String, String>> for ComponentItem {
    fn from(mut table: BTreeMap<String, String>) -> Self {
        let key = table.keys().find(|k| k.eq_ignore_ascii_case("name")).cloned();
        let name = key.and_then(|k| table.remove(&k)).unwrap_or_default();
        Self {
            name,
            properties: table,
        }
    }
}

impl From<ComponentItem> for BTreeMap<String, String> {
    fn from(item: ComponentItem) -> Self {
        let mut table = item.properties;
        table.insert("name".to_string(), item.name);
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Docker".parse::<ComponentKind>().unwrap(), ComponentKind::Docker);
        assert_eq!("file".parse::<ComponentKind>().unwrap(), ComponentKind::File);
        assert_eq!("".parse::<ComponentKind>().unwrap(), ComponentKind::Docker);
        assert!("database".parse::<ComponentKind>().is_err());
    }

    #[test]
    fn test_item_name_key_is_case_insensitive() {
        let item: ComponentItem =
            serde_json::from_str(r#"{"Name": "war", "repository": "nexus", "target": "/opt"}"#)
                .unwrap();
        assert_eq!(item.name, "war");
        assert_eq!(item.properties.len(), 2);
        assert_eq!(item.properties["repository"], "nexus");
    }
}
