//! Build metadata derivation
//!
//! Fills component attributes from the CI environment and the local git
//! checkout. Attributes that already have a value are never overwritten.
//! The git steps run in a fixed order; several of them build their command
//! from attributes found by earlier steps.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Component attributes by name
pub type Attributes = BTreeMap<String, String>;

/// Runs a shell command and returns its trimmed output
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str) -> Option<String>;
}

/// Attribute and the environment variables consulted for it, first match wins
const ENV_FALLBACKS: &[(&str, &[&str])] = &[
    ("BaseName", &["BASENAME"]),
    ("BuildDate", &["BLDDATE"]),
    (
        "BuildId",
        &["BUILD_ID", "BUILD_NUMBER", "BUILD_NUM", "BUILDNUM", "GITHUB_RUN_ID"],
    ),
    (
        "BuildNumber",
        &["BUILD_NUMBER", "BUILD_NUM", "BUILDNUM", "GITHUB_RUN_NUMBER"],
    ),
    ("BuildUrl", &["BUILD_URL"]),
    ("CompName", &["COMPNAME"]),
    ("DockerRepo", &["DOCKERREPO", "IMAGE_REPO"]),
    ("DockerSha", &["DOCKERSHA", "DIGEST"]),
    ("DockerTag", &["DOCKERTAG", "IMAGE_TAG"]),
    ("GitBranch", &["GIT_BRANCH"]),
    ("GitBranchCreateCommit", &["GIT_BRANCH_CREATE_COMMIT"]),
    ("GitBranchCreateTimestamp", &["GIT_BRANCH_CREATE_TIMESTAMP"]),
    ("GitBranchParent", &["GIT_BRANCH_PARENT"]),
    ("GitCommit", &["GIT_COMMIT", "SHORT_SHA"]),
    ("GitCommitAuthors", &["GIT_COMMIT_AUTHORS"]),
    ("GitCommittersCnt", &["GIT_COMMITTERS_CNT"]),
    ("GitCommitTimestamp", &["GIT_COMMIT_TIMESTAMP"]),
    ("GitContribPercentage", &["GIT_CONTRIB_PERCENTAGE"]),
    ("GitLinesAdded", &["GIT_LINES_ADDED"]),
    ("GitLinesDeleted", &["GIT_LINES_DELETED"]),
    ("GitLinesTotal", &["GIT_LINES_TOTAL"]),
    ("GitOrg", &["GIT_ORG"]),
    ("GitRepo", &["GIT_REPO", "GITHUB_REPOSITORY"]),
    ("GitRepoProject", &["GIT_REPO_PROJECT"]),
    ("GitServerUrl", &["GITHUB_SERVER_URL"]),
    ("GitSignedOffBy", &["GIT_SIGNED_OFF_BY"]),
    ("GitTotalCommittersCnt", &["GIT_TOTAL_COMMITTERS_CNT"]),
    ("GitTrigger", &["GIT_TRIGGER"]),
    ("GitUrl", &["GIT_URL"]),
    ("GitVerifyCommit", &["GIT_VERIFY_COMMIT"]),
];

enum Command {
    Fixed(&'static str),
    Derived(fn(&Attributes) -> String),
}

/// Git lookups in execution order
const GIT_STEPS: &[(&str, Command)] = &[
    ("GitCommit", Command::Fixed("git rev-parse HEAD")),
    ("BuildNumber", Command::Fixed("git log --oneline | wc -l | tr -d ' '")),
    (
        "GitRepo",
        Command::Fixed(
            "git config --get remote.origin.url | awk -F/ '{print $(NF-1)\"/\"$NF}' | sed 's/.git$//'",
        ),
    ),
    (
        "GitOrg",
        Command::Fixed("git config --get remote.origin.url | awk -F'[@:/]' '{print $(NF-1)}'"),
    ),
    (
        "GitRepoProject",
        Command::Fixed("git config --get remote.origin.url | awk -F/ '{print $NF}' | sed 's/.git$//'"),
    ),
    ("GitUrl", Command::Fixed("git config --get remote.origin.url")),
    ("GitBranch", Command::Fixed("git rev-parse --abbrev-ref HEAD")),
    ("GitVerifyCommit", Command::Derived(verify_commit)),
    ("GitSignedOffBy", Command::Derived(signed_off_by)),
    ("GitCommitTimestamp", Command::Derived(commit_timestamp)),
    (
        "GitBranchParent",
        Command::Fixed(
            "git show-branch -a 2>/dev/null | sed \"s/].*//\" | grep \"\\*\" | grep -v \"$(git rev-parse --abbrev-ref HEAD)\" | head -n1 | sed \"s/^.*\\[//\"",
        ),
    ),
    ("GitBranchCreateCommit", Command::Derived(branch_create_commit)),
    (
        "GitBranchCreateTimestamp",
        Command::Derived(branch_create_timestamp),
    ),
    ("GitCommitAuthors", Command::Derived(commit_authors)),
    (
        "GitLinesTotal",
        Command::Fixed("git ls-files | xargs wc -l 2>/dev/null | grep total | awk '{print $1}'"),
    ),
];

fn attr<'a>(attributes: &'a Attributes, key: &str) -> &'a str {
    attributes.get(key).map(String::as_str).unwrap_or_default()
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

fn verify_commit(a: &Attributes) -> String {
    format!(
        "git verify-commit {} 2>&1 | grep -i 'Signature made' | wc -l",
        attr(a, "GitCommit")
    )
}

fn signed_off_by(a: &Attributes) -> String {
    format!(
        "git log -1 {} | grep 'Signed-off-by:' | cut -d: -f2 | sed 's/^[ \\t]*//;s/[ \\t]*$//'",
        attr(a, "GitCommit")
    )
}

fn commit_timestamp(a: &Attributes) -> String {
    format!(
        "git log --pretty='format:%cd' {} | head -1",
        attr(a, "GitCommit")
    )
}

fn branch_create_commit(a: &Attributes) -> String {
    format!(
        "git log --oneline --reverse {}..{} | head -1 | awk -F' ' '{{print $1}}'",
        or_default(attr(a, "GitBranchParent"), "main"),
        attr(a, "GitBranch")
    )
}

fn branch_create_timestamp(a: &Attributes) -> String {
    format!(
        "git log --pretty='format:%cd' {} | head -1",
        or_default(attr(a, "GitBranchCreateCommit"), "HEAD")
    )
}

fn commit_authors(a: &Attributes) -> String {
    format!(
        "git rev-list --remotes --pretty --since='{}' --until='{}' | grep -i 'Author:' | grep -v dependabot | awk -F'[:<>]' '{{print $3}}' | sed 's/^ //' | sed 's/ $//' | sort -u | tr '\\n' ',' | sed 's/,$//'",
        attr(a, "GitBranchCreateTimestamp"),
        attr(a, "GitCommitTimestamp")
    )
}

/// `pkg:docker/<registry>/<repository>@<tag>` for an image reference.
/// Single-segment repositories are placed under `library/`.
pub fn docker_purl(reference: &str) -> Option<String> {
    if reference.is_empty() || reference == ":" {
        return None;
    }
    let reference = if reference.contains(':') {
        reference.to_string()
    } else {
        format!("{reference}:latest")
    };

    let parts: Vec<&str> = reference.split(':').collect();
    let [repository, tag] = parts.as_slice() else {
        return None;
    };
    let repository = if repository.contains('/') {
        repository.to_string()
    } else {
        format!("library/{repository}")
    };
    let (registry, path) = repository.split_once('/')?;

    Some(format!("pkg:docker/{registry}/{path}@{tag}"))
}

/// Derives build attributes from an environment snapshot and git
#[derive(Debug, Clone)]
pub struct BuildMetadata {
    env: HashMap<String, String>,
    now: DateTime<Utc>,
    base_name: Option<String>,
}

impl BuildMetadata {
    pub fn new(env: HashMap<String, String>, now: DateTime<Utc>) -> Self {
        Self {
            env,
            now,
            base_name: None,
        }
    }

    /// Snapshot the process environment and working directory
    pub fn from_process() -> Self {
        let base_name = std::env::current_dir()
            .ok()
            .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()));
        Self {
            env: std::env::vars().collect(),
            now: Utc::now(),
            base_name,
        }
    }

    /// Directory name used for `BaseName` when the environment has none
    pub fn with_base_name(mut self, name: impl Into<String>) -> Self {
        self.base_name = Some(name.into());
        self
    }

    /// Fill every empty attribute this metadata knows how to derive
    pub fn derive(&self, attributes: &mut Attributes, runner: &dyn CommandRunner) {
        for (key, vars) in ENV_FALLBACKS {
            let value = vars
                .iter()
                .filter_map(|var| self.env.get(*var))
                .find(|v| !v.is_empty());
            if let Some(value) = value {
                set_if_empty(attributes, key, value);
            }
        }

        runner.run("git fetch --unshallow");
        for (key, command) in GIT_STEPS {
            if !attr(attributes, key).is_empty() {
                continue;
            }
            let command = match command {
                Command::Fixed(command) => command.to_string(),
                Command::Derived(build) => build(attributes),
            };
            if let Some(output) = runner.run(&command).filter(|o| !o.is_empty()) {
                debug!(attribute = %key, "Derived from git");
                attributes.insert(key.to_string(), output);
            }
        }

        let now = self.now.to_rfc3339_opts(SecondsFormat::Secs, true);
        set_if_empty(attributes, "DockerBuildDate", &now);
        set_if_empty(attributes, "BuildDate", &now);
        let build_date = attr(attributes, "BuildDate").trim_matches('"').to_string();
        attributes.insert("BuildDate".to_string(), build_date);

        let run_url = format!(
            "{}/{}/actions/runs/{}",
            attr(attributes, "GitServerUrl"),
            attr(attributes, "GitRepo"),
            attr(attributes, "BuildId")
        );
        if run_url.contains("github") {
            set_if_empty(attributes, "BuildUrl", &run_url);
        }

        split_docker_repo(attributes);

        let verified = matches!(attr(attributes, "GitVerifyCommit"), "1" | "Y");
        attributes.insert(
            "GitVerifyCommit".to_string(),
            if verified { "Y" } else { "N" }.to_string(),
        );

        let git_url = attr(attributes, "GitUrl").to_string();
        if let Some((rest, repo)) = git_url.rsplit_once('/') {
            let org = rest.rsplit('/').next().unwrap_or_default();
            let repo = format!("{org}/{repo}").replace(".git", "");
            set_if_empty(attributes, "GitRepo", &repo);
        }

        let branch = attr(attributes, "GitBranch").to_string();
        if !branch.is_empty() {
            set_if_empty(attributes, "GitTag", &branch);
        }

        let trigger = attr(attributes, "GitTrigger");
        if !trigger.is_empty() && trigger != "workflow_dispatch" {
            set_if_empty(attributes, "JobTriggeredBy", "SCM");
        }

        if let Some(base) = &self.base_name {
            set_if_empty(attributes, "BaseName", base);
        }

        let project = attr(attributes, "GitRepoProject").to_string();
        if !project.is_empty() {
            set_if_empty(attributes, "CompName", &project);
        }
    }
}

fn split_docker_repo(attributes: &mut Attributes) {
    let repo = attr(attributes, "DockerRepo").to_string();
    if let Some((image, tag)) = repo.rsplit_once(':').filter(|(_, tag)| !tag.contains('/')) {
        attributes.insert("DockerRepo".to_string(), image.to_string());
        set_if_empty(attributes, "DockerTag", tag);
    }

    let repo = attr(attributes, "DockerRepo");
    let tag = attr(attributes, "DockerTag");
    if !repo.is_empty() && !tag.is_empty() {
        if let Some(purl) = docker_purl(&format!("{repo}:{tag}")) {
            set_if_empty(attributes, "Purl", &purl);
        }
    }
}

fn set_if_empty(attributes: &mut Attributes, key: &str, value: &str) {
    let slot = attributes.entry(key.to_string()).or_default();
    if slot.is_empty() {
        *slot = value.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Answers commands from a table and records what was asked
    #[derive(Default)]
    struct ScriptedRunner {
        answers: HashMap<String, String>,
        asked: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn answer(mut self, command: &str, output: &str) -> Self {
            self.answers.insert(command.to_string(), output.to_string());
            self
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, command: &str) -> Option<String> {
            self.asked.lock().unwrap().push(command.to_string());
            self.answers.get(command).cloned()
        }
    }

    fn metadata(vars: &[(&str, &str)]) -> BuildMetadata {
        let env = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        BuildMetadata::new(env, now)
    }

    #[test]
    fn test_docker_purl() {
        assert_eq!(
            docker_purl("quay.io/acme/cart:1.4").as_deref(),
            Some("pkg:docker/quay.io/acme/cart@1.4")
        );
        assert_eq!(
            docker_purl("nginx:1.25").as_deref(),
            Some("pkg:docker/library/nginx@1.25")
        );
        assert_eq!(
            docker_purl("acme/cart").as_deref(),
            Some("pkg:docker/acme/cart@latest")
        );
        assert_eq!(docker_purl(":"), None);
        assert_eq!(docker_purl("host:5000/cart:1"), None);
    }

    #[test]
    fn test_env_fallbacks_in_order() {
        let mut attrs = Attributes::new();
        metadata(&[("GITHUB_RUN_NUMBER", "77"), ("BUILD_NUM", "12"), ("BUILD_ID", "")])
            .derive(&mut attrs, &ScriptedRunner::default());

        assert_eq!(attrs["BuildNumber"], "12");
        assert_eq!(attrs["BuildId"], "12");
    }

    #[test]
    fn test_existing_values_are_kept() {
        let mut attrs = Attributes::from([("GitCommit".to_string(), "fixed".to_string())]);
        let runner = ScriptedRunner::default().answer("git rev-parse HEAD", "abc123");
        metadata(&[("GIT_COMMIT", "fromenv")]).derive(&mut attrs, &runner);

        assert_eq!(attrs["GitCommit"], "fixed");
        assert!(!runner
            .asked
            .lock()
            .unwrap()
            .contains(&"git rev-parse HEAD".to_string()));
    }

    #[test]
    fn test_git_steps_read_earlier_results() {
        let runner = ScriptedRunner::default()
            .answer("git rev-parse HEAD", "abc123")
            .answer("git log --pretty='format:%cd' abc123 | head -1", "Wed May 1 2024")
            .answer("git rev-parse --abbrev-ref HEAD", "feature")
            .answer("git config --get remote.origin.url", "https://github.com/acme/cart.git")
            .answer(
                "git config --get remote.origin.url | awk -F/ '{print $NF}' | sed 's/.git$//'",
                "cart",
            );

        let mut attrs = Attributes::new();
        metadata(&[]).derive(&mut attrs, &runner);

        assert_eq!(attrs["GitCommit"], "abc123");
        assert_eq!(attrs["GitCommitTimestamp"], "Wed May 1 2024");
        assert_eq!(attrs["GitTag"], "feature");
        assert_eq!(attrs["GitRepo"], "acme/cart");
        assert_eq!(attrs["CompName"], "cart");

        let asked = runner.asked.lock().unwrap();
        assert!(asked.contains(&"git log --oneline --reverse main..feature | head -1 | awk -F' ' '{print $1}'".to_string()));
    }

    #[test]
    fn test_docker_and_build_post_processing() {
        let mut attrs = Attributes::from([("BuildDate".to_string(), "\"2024-01-01\"".to_string())]);
        metadata(&[
            ("DOCKERREPO", "quay.io/acme/cart:1.4"),
            ("GITHUB_SERVER_URL", "https://github.com"),
            ("GITHUB_REPOSITORY", "acme/cart"),
            ("GITHUB_RUN_ID", "991"),
            ("GIT_VERIFY_COMMIT", "1"),
            ("GIT_TRIGGER", "push"),
        ])
        .derive(&mut attrs, &ScriptedRunner::default());

        assert_eq!(attrs["DockerRepo"], "quay.io/acme/cart");
        assert_eq!(attrs["DockerTag"], "1.4");
        assert_eq!(attrs["Purl"], "pkg:docker/quay.io/acme/cart@1.4");
        assert_eq!(attrs["BuildUrl"], "https://github.com/acme/cart/actions/runs/991");
        assert_eq!(attrs["BuildDate"], "2024-01-01");
        assert_eq!(attrs["DockerBuildDate"], "2024-05-01T12:00:00Z");
        assert_eq!(attrs["GitVerifyCommit"], "Y");
        assert_eq!(attrs["JobTriggeredBy"], "SCM");
    }

    #[test]
    fn test_unverified_commit_and_base_name() {
        let mut attrs = Attributes::new();
        metadata(&[])
            .with_base_name("checkout")
            .derive(&mut attrs, &ScriptedRunner::default());

        assert_eq!(attrs["GitVerifyCommit"], "N");
        assert_eq!(attrs["BaseName"], "checkout");
        assert!(!attrs.contains_key("Purl"));
    }
}
