//! Envscript command
//!
//! Writes `export NAME="value"` lines for the derived build metadata, the
//! response file's attributes and its `Export` table, so later pipeline
//! steps can `source` them.

use crate::component_config::ComponentConfig;
use crate::error::CliResult;
use crate::output::{OutputFormat, Progress};
use crate::shell::ShellRunner;
use chrono::Utc;
use clap::Args;
use relcat_engine::{Attributes, BuildMetadata, CommandRunner};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

#[derive(Args, Debug, Clone, Default)]
pub struct EnvScriptArgs {
    /// Response file to read attributes and exports from (defaults to --rsp)
    #[arg(long = "envvars")]
    pub envvars: Option<PathBuf>,

    /// Script to append the exports to; stdout when absent
    #[arg(long = "envvars_sh")]
    pub envvars_sh: Option<PathBuf>,
}

pub fn execute(args: &EnvScriptArgs, rsp: &Path, format: OutputFormat) -> CliResult<()> {
    let source = args.envvars.as_deref().unwrap_or(rsp);
    let basename = std::env::current_dir()
        .ok()
        .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();

    let exports = collect_exports(
        source,
        &BuildMetadata::from_process(),
        &ShellRunner,
        std::env::vars().collect(),
        &basename,
    )?;
    let script = render_script(&exports);

    match &args.envvars_sh {
        Some(path) => {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            file.write_all(script.as_bytes())?;
            Progress::new(format).success(&format!(
                "Wrote {} variables to {}",
                exports.len(),
                path.display()
            ));
        }
        None => print!("{script}"),
    }
    Ok(())
}

/// Every variable to export, keyed by name
#[instrument(skip(metadata, runner, env))]
fn collect_exports(
    source: &Path,
    metadata: &BuildMetadata,
    runner: &dyn CommandRunner,
    env: HashMap<String, String>,
    basename: &str,
) -> CliResult<BTreeMap<String, String>> {
    let mut mapping = Attributes::new();
    metadata.derive(&mut mapping, runner);

    let mut vars = env;
    vars.extend(mapping.iter().map(|(k, v)| (k.clone(), v.clone())));
    let config = ComponentConfig::load_with_env(source, vars, Utc::now())?;

    mapping.extend(config.attributes.clone());
    contribution(&mut mapping);

    let lookup: HashMap<String, String> = mapping
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let mut exports: BTreeMap<String, String> = config
        .export
        .iter()
        .map(|(k, v)| (k.clone(), crate::component_config::substitute(v, &lookup)))
        .collect();
    for (key, value) in mapping {
        exports.entry(key).or_insert(value);
    }
    if !basename.is_empty() {
        exports.insert("BASENAME".to_string(), basename.to_string());
    }

    debug!(count = exports.len(), "Collected exports");
    Ok(exports)
}

/// Count committers from the author list and derive their share of all
/// committers as a whole percentage
fn contribution(mapping: &mut Attributes) {
    let empty = |m: &Attributes, key: &str| m.get(key).map_or(true, |v| v.trim().is_empty());

    if empty(mapping, "GitCommittersCnt") && !empty(mapping, "GitCommitAuthors") {
        let count = mapping["GitCommitAuthors"]
            .split(',')
            .filter(|a| !a.trim().is_empty())
            .count();
        mapping.insert("GitCommittersCnt".to_string(), count.to_string());
    }

    let number = |key: &str| mapping.get(key).and_then(|v| v.trim().parse::<u64>().ok());
    if let (Some(committers), Some(total)) = (number("GitCommittersCnt"), number("GitTotalCommittersCnt")) {
        if total > 0 {
            let percentage = committers * 100 / total;
            mapping.insert("GitContribPercentage".to_string(), percentage.to_string());
        }
    }
}

/// One `export` line per variable, in key order
pub fn render_script(exports: &BTreeMap<String, String>) -> String {
    exports
        .iter()
        .map(|(key, value)| {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            format!("export {key}=\"{escaped}\"\n")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct NoGit;

    impl CommandRunner for NoGit {
        fn run(&self, _command: &str) -> Option<String> {
            None
        }
    }

    fn metadata() -> BuildMetadata {
        let env = HashMap::from([
            ("GIT_COMMIT".to_string(), "4f2a9c1".to_string()),
            ("GIT_BRANCH".to_string(), "main".to_string()),
        ]);
        BuildMetadata::new(env, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_render_script_sorts_and_escapes() {
        let exports = BTreeMap::from([
            ("ZED".to_string(), "last".to_string()),
            ("ALPHA".to_string(), r#"say "hi" \o/"#.to_string()),
        ]);
        assert_eq!(
            render_script(&exports),
            "export ALPHA=\"say \\\"hi\\\" \\\\o/\"\nexport ZED=\"last\"\n"
        );
    }

    #[test]
    fn test_contribution_from_authors() {
        let mut mapping = Attributes::from([
            ("GitCommitAuthors".to_string(), "ann,bo,cy".to_string()),
            ("GitTotalCommittersCnt".to_string(), "12".to_string()),
        ]);
        contribution(&mut mapping);
        assert_eq!(mapping["GitCommittersCnt"], "3");
        assert_eq!(mapping["GitContribPercentage"], "25");

        let mut none = Attributes::from([("GitTotalCommittersCnt".to_string(), "0".to_string())]);
        contribution(&mut none);
        assert!(!none.contains_key("GitContribPercentage"));
    }

    #[test]
    fn test_exports_merge_response_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("component.toml");
        std::fs::write(
            &path,
            "Name = \"GLOBAL.cart\"\n\
             [Attributes]\n\
             DockerRepo = \"quay.io/acme/cart\"\n\
             [Export]\n\
             IMAGE = \"${DockerRepo}:${GitCommit}\"\n\
             GitBranch = \"release\"\n",
        )
        .unwrap();

        let exports = collect_exports(&path, &metadata(), &NoGit, HashMap::new(), "cart").unwrap();

        assert_eq!(exports["IMAGE"], "quay.io/acme/cart:4f2a9c1");
        assert_eq!(exports["GitCommit"], "4f2a9c1");
        assert_eq!(exports["GitBranch"], "release");
        assert_eq!(exports["DockerRepo"], "quay.io/acme/cart");
        assert_eq!(exports["BASENAME"], "cart");
    }

    #[test]
    fn test_exports_without_response_file() {
        let dir = tempfile::tempdir().unwrap();
        let exports = collect_exports(
            &dir.path().join("missing.toml"),
            &metadata(),
            &NoGit,
            HashMap::new(),
            "",
        )
        .unwrap();

        assert_eq!(exports["GitCommit"], "4f2a9c1");
        assert!(!exports.contains_key("BASENAME"));
    }
}
