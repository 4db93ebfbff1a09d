//! Component response file
//!
//! Describes the component a pipeline built: its name, the application it
//! belongs to, attributes and file items. TOML files may reference
//! `${Var}` placeholders, resolved from the file's own top-level strings
//! and the process environment. JSON files are read as is.

use crate::error::{CliError, CliResult};
use chrono::{DateTime, SecondsFormat, Utc};
use relcat_engine::CommandRunner;
use relcat_types::{ComponentItem, ComponentKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use toml::Value;
use tracing::debug;

/// Default response file name
pub const DEFAULT_RSP: &str = "component.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(rename = "Application", default)]
    pub application: String,
    #[serde(rename = "Application_Version", default)]
    pub application_version: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Variant", default)]
    pub variant: String,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "Kind", default)]
    pub kind: String,
    #[serde(rename = "Attributes", default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(rename = "Items", default)]
    pub items: Vec<ComponentItem>,
    /// Extra variables written by `envscript`
    #[serde(rename = "Export", default)]
    pub export: BTreeMap<String, String>,
}

impl ComponentConfig {
    /// Load from `path` using the process environment. A missing file
    /// yields an empty configuration.
    pub fn load(path: &Path) -> CliResult<Self> {
        Self::load_with_env(path, std::env::vars().collect(), Utc::now())
    }

    pub fn load_with_env(
        path: &Path,
        env: HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> CliResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No component response file");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml(&contents, env, now)
        } else {
            Ok(serde_json::from_str(&contents)?)
        }
    }

    /// Parse TOML and substitute `${Var}` placeholders
    pub fn from_toml(
        contents: &str,
        env: HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> CliResult<Self> {
        let mut table: toml::Table = toml::from_str(contents)?;
        let mut vars = variables(&table, env, now);
        resolve_table(&mut table, &mut vars);

        Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| CliError::Config(e.to_string()))
    }

    /// Name the component after the git checkout:
    /// `GLOBAL.<org>.<repo>`, variant the branch, version `v<commit count>`.
    /// `None` outside a git checkout with a remote.
    pub fn from_git(runner: &dyn CommandRunner) -> Option<Self> {
        let remote = runner.run("git config --get remote.origin.url")?;
        let (org, repo) = split_remote(&remote)?;
        let branch = runner
            .run("git rev-parse --abbrev-ref HEAD")
            .unwrap_or_default();
        let count = runner
            .run("git log --oneline | wc -l | tr -d ' '")
            .unwrap_or_default();

        Some(Self {
            name: format!("GLOBAL.{org}.{repo}"),
            variant: branch,
            version: format!("v{count}"),
            ..Self::default()
        })
    }

    pub fn kind(&self) -> CliResult<ComponentKind> {
        self.kind
            .parse()
            .map_err(|e: relcat_types::ParseKindError| CliError::InvalidInput(e.to_string()))
    }
}

/// Top-level strings of the file overlaid by the environment
fn variables(
    table: &toml::Table,
    env: HashMap<String, String>,
    now: DateTime<Utc>,
) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = table
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();
    vars.extend(env);

    let date = vars
        .get("BLDDATE")
        .map(|d| d.trim_matches('"').to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| now.to_rfc3339_opts(SecondsFormat::Secs, true));
    vars.insert("BLDDATE".to_string(), date);
    vars
}

fn resolve_table(table: &mut toml::Table, vars: &mut HashMap<String, String>) {
    for (key, value) in table.iter_mut() {
        match value {
            Value::String(s) => {
                *s = substitute(s, vars);
                vars.insert(key.clone(), s.clone());
            }
            other => resolve_value(other, vars),
        }
    }
}

fn resolve_value(value: &mut Value, vars: &mut HashMap<String, String>) {
    match value {
        Value::String(s) => *s = substitute(s, vars),
        Value::Table(table) => resolve_table(table, vars),
        Value::Array(items) => items.iter_mut().for_each(|item| resolve_value(item, vars)),
        _ => {}
    }
}

/// Replace each `${Var}` in `template`. Unknown variables become empty.
pub fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        if let Some(value) = vars.get(after[..end].trim()) {
            out.push_str(value);
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// `(org, repo)` from a git remote URL in ssh or https form
fn split_remote(remote: &str) -> Option<(String, String)> {
    let mut parts = remote
        .trim()
        .trim_end_matches('/')
        .rsplit(['@', ':', '/'])
        .filter(|p| !p.is_empty());
    let repo = parts.next()?;
    let org = parts.next()?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    Some((org.to_string(), repo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    struct Git;

    impl CommandRunner for Git {
        fn run(&self, command: &str) -> Option<String> {
            match command {
                "git config --get remote.origin.url" => {
                    Some("git@github.com:acme/cart-service.git".to_string())
                }
                "git rev-parse --abbrev-ref HEAD" => Some("feature-x".to_string()),
                "git log --oneline | wc -l | tr -d ' '" => Some("42".to_string()),
                _ => None,
            }
        }
    }

    #[test]
    fn test_substitution_from_file_and_env() {
        let contents = r#"
Application = "GLOBAL.Acme.store"
Application_Version = "${Branch}"
Branch = "main"
Name = "GLOBAL.Acme.cart"
Version = "v1.0.${BUILD_NUM}"

[Attributes]
DockerTag = "${Branch}-${BUILD_NUM}"
BuildDate = "${BLDDATE}"
Missing = "[${NOPE}]"
"#;
        let config =
            ComponentConfig::from_toml(contents, env(&[("BUILD_NUM", "17")]), now()).unwrap();

        assert_eq!(config.application, "GLOBAL.Acme.store");
        assert_eq!(config.application_version, "main");
        assert_eq!(config.version, "v1.0.17");
        assert_eq!(config.attributes["DockerTag"], "main-17");
        assert_eq!(config.attributes["BuildDate"], "2024-05-01T12:00:00Z");
        assert_eq!(config.attributes["Missing"], "[]");
    }

    #[test]
    fn test_blddate_from_env_is_unquoted() {
        let contents = "Name = \"x\"\n[Attributes]\nBuildDate = \"${BLDDATE}\"\n";
        let config =
            ComponentConfig::from_toml(contents, env(&[("BLDDATE", "\"2023-01-02\"")]), now())
                .unwrap();
        assert_eq!(config.attributes["BuildDate"], "2023-01-02");
    }

    #[test]
    fn test_file_items() {
        let contents = r#"
Name = "GLOBAL.Acme.scripts"
Kind = "file"

[[Items]]
Name = "install"
repository = "Git"
pattern = "install.sh"

[[Items]]
Name = "cleanup"
pattern = "cleanup.sh"
"#;
        let config = ComponentConfig::from_toml(contents, HashMap::new(), now()).unwrap();

        assert_eq!(config.kind().unwrap(), ComponentKind::File);
        assert_eq!(config.items.len(), 2);
        assert_eq!(config.items[0].name, "install");
        assert_eq!(config.items[0].properties["pattern"], "install.sh");
    }

    #[test]
    fn test_json_is_read_verbatim() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"Name": "GLOBAL.cart", "Version": "${{NOT_EXPANDED}}"}}"#).unwrap();

        let config =
            ComponentConfig::load_with_env(file.path(), env(&[("NOT_EXPANDED", "1")]), now())
                .unwrap();
        assert_eq!(config.name, "GLOBAL.cart");
        assert_eq!(config.version, "${NOT_EXPANDED}");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let config = ComponentConfig::load(Path::new("/nonexistent/component.toml")).unwrap();
        assert_eq!(config, ComponentConfig::default());
    }

    #[test]
    fn test_unknown_kind() {
        let config = ComponentConfig {
            kind: "helm".into(),
            ..Default::default()
        };
        assert!(matches!(config.kind(), Err(CliError::InvalidInput(_))));
    }

    #[test]
    fn test_name_from_git() {
        let config = ComponentConfig::from_git(&Git).unwrap();
        assert_eq!(config.name, "GLOBAL.acme.cart-service");
        assert_eq!(config.variant, "feature-x");
        assert_eq!(config.version, "v42");

        assert_eq!(
            split_remote("https://github.com/acme/cart"),
            Some(("acme".to_string(), "cart".to_string()))
        );
    }

    #[test]
    fn test_unterminated_placeholder_kept() {
        assert_eq!(substitute("a${b", &HashMap::new()), "a${b");
    }
}
