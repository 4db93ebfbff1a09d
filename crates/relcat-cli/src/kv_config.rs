//! Key/value configuration trees
//!
//! A directory of `.properties` and `.json` files is flattened into one
//! attribute map. Files are read in path order, so a later file overrides
//! keys of an earlier one. The directory may also live in a git repository,
//! written as `git@host:org/repo.git/path/in/repo#branch`.

use crate::error::{CliError, CliResult};
use relcat_engine::Attributes;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const DEFAULT_BRANCH: &str = "master";

/// A configuration directory inside a git repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    pub repository: String,
    /// Directory below the checkout root
    pub path: String,
    pub branch: String,
}

impl GitSource {
    /// `None` unless `spec` names an ssh git remote
    pub fn parse(spec: &str) -> Option<Self> {
        if !spec.contains("git@") {
            return None;
        }
        let (location, branch) = match spec.split_once('#') {
            Some((location, branch)) if !branch.is_empty() => (location, branch),
            Some((location, _)) => (location, DEFAULT_BRANCH),
            None => (spec, DEFAULT_BRANCH),
        };

        let mut parts = location.splitn(3, '/');
        let host = parts.next()?;
        let repo = parts.next()?;
        let path = parts.next().unwrap_or_default().trim_matches('/');

        Some(Self {
            repository: format!("{host}/{repo}"),
            path: path.to_string(),
            branch: branch.to_string(),
        })
    }

    /// Clone into `into`, check out the branch and return the configuration
    /// directory
    fn checkout(&self, into: &Path) -> CliResult<PathBuf> {
        let target = into.join("checkout");
        let target_arg = target.to_string_lossy().into_owned();
        git(&["clone", "-q", &self.repository, &target_arg], into)?;
        git(&["checkout", "-q", &self.branch], &target)?;
        info!(repository = %self.repository, branch = %self.branch, "Cloned configuration repository");
        Ok(target.join(&self.path))
    }
}

fn git(args: &[&str], dir: &Path) -> CliResult<()> {
    debug!(?args, dir = %dir.display(), "git");
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(CliError::Config(format!(
            "git {} failed with {status}",
            args.join(" ")
        )))
    }
}

/// Load the configuration named by `spec`, a directory or a git location
pub fn load(spec: &str) -> CliResult<Attributes> {
    match GitSource::parse(spec) {
        Some(source) => {
            let workdir = tempfile::tempdir()?;
            let dir = source.checkout(workdir.path())?;
            load_dir(&dir)
        }
        None => load_dir(Path::new(spec)),
    }
}

/// Flatten every `.properties` and `.json` file below `dir`
pub fn load_dir(dir: &Path) -> CliResult<Attributes> {
    if !dir.is_dir() {
        return Err(CliError::InvalidInput(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut attributes = Attributes::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("properties") => parse_properties(&std::fs::read_to_string(path)?),
            Some("json") => match parse_json(&std::fs::read_to_string(path)?) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable JSON file");
                    continue;
                }
            },
            _ => continue,
        };
        debug!(path = %path.display(), keys = parsed.len(), "Loaded configuration file");
        attributes.extend(parsed);
    }
    Ok(attributes)
}

/// `key=value` or `key: value` lines. Section headers are skipped and their
/// keys kept unqualified.
pub fn parse_properties(text: &str) -> Attributes {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with(['#', '!', ';']))
        .filter(|line| !(line.starts_with('[') && line.ends_with(']')))
        .filter_map(|line| {
            let at = line.find(['=', ':'])?;
            let (key, value) = (line[..at].trim(), line[at + 1..].trim());
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// A JSON object with nested objects flattened to dotted keys
pub fn parse_json(text: &str) -> CliResult<Attributes> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(object) = value else {
        return Err(CliError::InvalidInput("expected a JSON object".into()));
    };

    let mut attributes = Attributes::new();
    for (key, value) in object {
        flatten(key, value, &mut attributes);
    }
    Ok(attributes)
}

fn flatten(key: String, value: Value, into: &mut Attributes) {
    match value {
        Value::Object(object) => {
            for (child, value) in object {
                flatten(format!("{key}.{child}"), value, into);
            }
        }
        Value::String(s) => {
            into.insert(key, s);
        }
        Value::Null => {
            into.insert(key, String::new());
        }
        other => {
            into.insert(key, other.to_string());
        }
    }
}
