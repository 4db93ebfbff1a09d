//! Updatecomp command
//!
//! Creates the component version a build produced, records its build
//! metadata and assigns it to a new application version.

use super::assign::describe;
use super::{
    component_name, or_config, required, run_deployment, ChainedComponent, DeploymentSummary,
};
use crate::deploy_data;
use crate::error::{CliError, CliResult};
use crate::kv_config;
use crate::output::{print_output, print_single, Progress};
use crate::shell::ShellRunner;
use crate::Session;
use clap::builder::BoolishValueParser;
use clap::Args;
use relcat_engine::{
    ApplicationResolver, AssignmentEngine, Attributes, BuildMetadata, ChangeRequests,
    CommandRunner, ComponentResolver,
};
use relcat_types::{split_app_version, ComponentId, ComponentKind, QualifiedName};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tabled::Tabled;
use tracing::{debug, info, instrument};

#[derive(Args, Debug, Clone, Default)]
pub struct UpdateCompArgs {
    /// Component name
    #[arg(long)]
    pub compname: Option<String>,

    /// Component variant
    #[arg(long)]
    pub compvariant: Option<String>,

    /// Component version
    #[arg(long)]
    pub compversion: Option<String>,

    /// Allocate a new component version when the requested one exists (Y/N, default Y)
    #[arg(long, value_parser = BoolishValueParser::new())]
    pub compautoinc: Option<bool>,

    /// Application name, optionally `name;variant;version`
    #[arg(long)]
    pub appname: Option<String>,

    /// Application version
    #[arg(long)]
    pub appversion: Option<String>,

    /// Allocate a new application version when the requested one exists (Y/N).
    /// Without an application name, every application whose latest version
    /// holds this component gets a new version.
    #[arg(long, value_parser = BoolishValueParser::new())]
    pub appautoinc: Option<bool>,

    /// JSON file collecting the application and component version names
    #[arg(long)]
    pub deploydatasave: Option<PathBuf>,

    /// Environment to deploy the new application version to
    #[arg(long)]
    pub deployenv: Option<String>,

    /// Component kind (docker, file)
    #[arg(long)]
    pub kind: Option<String>,

    /// Component attribute as `key:value`; `@file` reads the value from a file
    #[arg(long = "compattr", value_delimiter = ',')]
    pub compattrs: Vec<String>,

    /// Environments to associate with a newly created application
    #[arg(long, value_delimiter = ',')]
    pub envs: Vec<String>,

    /// Change request data source
    #[arg(long)]
    pub crdatasource: Option<String>,

    /// Change request ids
    #[arg(long, value_delimiter = ',')]
    pub changerequest: Vec<String>,

    /// Key/value configuration merged into the component attributes, see `kv`
    #[arg(long)]
    pub kvconfig: Option<String>,
}

/// One component version written by this command
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct UpdateRow {
    #[tabled(rename = "COMPONENT")]
    pub component: String,
    #[tabled(rename = "CREATED")]
    pub created: bool,
    #[tabled(rename = "APPLICATION")]
    pub application: String,
    #[tabled(rename = "ACTION")]
    pub action: String,
}

#[derive(Debug, Serialize)]
struct UpdateReport {
    components: Vec<UpdateRow>,
    deployments: Vec<DeploymentSummary>,
}

pub async fn execute(args: &UpdateCompArgs, session: &Session) -> CliResult<()> {
    let metadata = BuildMetadata::from_process();
    let report = update_chain(
        args,
        session,
        &Environment {
            metadata: &metadata,
            runner: &ShellRunner,
            workdir: Path::new("."),
        },
        ChainedComponent::from_env,
    )
    .await?;

    if session.output.is_human() {
        print_output(report.components.clone(), session.output)?;
    } else {
        print_single(&report, session.output)?;
    }
    report
        .deployments
        .iter()
        .try_for_each(DeploymentSummary::ensure_success)
}

/// Where build metadata comes from
pub(crate) struct Environment<'a> {
    pub metadata: &'a BuildMetadata,
    pub runner: &'a dyn CommandRunner,
    /// Directory searched for helm charts and `@file` attribute values
    pub workdir: &'a Path,
}

#[instrument(skip_all)]
async fn update_chain<F>(
    args: &UpdateCompArgs,
    session: &Session,
    env: &Environment<'_>,
    chained: F,
) -> CliResult<UpdateReport>
where
    F: Fn(usize) -> Option<ChainedComponent>,
{
    let progress = Progress::new(session.output);
    let components = ComponentResolver::new(session.catalog.clone(), session.engine.clone());
    let applications = ApplicationResolver::new(session.catalog.clone(), session.engine.clone());
    let assignments = AssignmentEngine::new(session.catalog.clone());

    let config = &session.component;
    let comp_autoinc = args.compautoinc.unwrap_or(true);
    let app_autoinc = args
        .appautoinc
        .unwrap_or(session.engine.application_auto_increment);
    let kind = match args.kind.as_deref() {
        Some(kind) => kind
            .parse::<ComponentKind>()
            .map_err(|e| CliError::InvalidInput(e.to_string()))?,
        None => config.kind()?,
    };
    let change_requests = ChangeRequests::new(
        args.crdatasource.clone().unwrap_or_default(),
        args.changerequest.clone(),
    );

    let mut compname = required(or_config(&args.compname, &config.name), "compname")?;
    let mut variant = or_config(&args.compvariant, &config.variant);
    let mut version = or_config(&args.compversion, &config.version);
    let mut appname = or_config(&args.appname, &config.application);
    let saved_appversion = or_config(&args.appversion, &config.application_version);

    let mut data = args
        .deploydatasave
        .as_deref()
        .map(deploy_data::load_or_default)
        .unwrap_or_default();
    let mut report = UpdateReport {
        components: Vec::new(),
        deployments: Vec::new(),
    };

    for index in 1.. {
        let name = component_name(&compname, &variant, &version);

        if !name.version.is_empty() && ensure_parent(&components, &name, kind).await? {
            progress.info(&format!("Created parent component {}", name.without_version()));
        }
        let resolved = components
            .resolve_or_create(&name, kind, comp_autoinc, &config.items)
            .await?;
        let full_component = components.component_name(resolved.id).await?;
        progress.success(&format!(
            "{} {full_component}",
            if resolved.created { "Created" } else { "Reusing" }
        ));
        data.push_component(full_component.clone());

        let mut attributes = config.attributes.clone();
        attributes.extend(parse_attributes(&args.compattrs, env.workdir));
        env.metadata.derive(&mut attributes, env.runner);
        attributes.extend(chart_attributes(env.workdir, &name.local_name));

        progress.info("Updating component attributes");
        for (key, value) in &attributes {
            progress.line(&format!("{key}: {value}"));
        }
        components
            .update_attributes(resolved.id, &attributes, Some(&change_requests))
            .await?;

        if let Some(kvconfig) = args.kvconfig.as_deref().filter(|k| !k.trim().is_empty()) {
            progress.info(&format!("Load config from {kvconfig}"));
            let loaded = kv_config::load(kvconfig)?;
            components
                .merge_attributes(resolved.id, &loaded, None)
                .await?;
        }

        let targets = if appname.is_empty() && app_autoinc {
            applications_holding(&components, &applications, resolved.id).await?
        } else if appname.is_empty() {
            Vec::new()
        } else {
            vec![appname.clone()]
        };
        if targets.is_empty() {
            report.components.push(UpdateRow {
                component: full_component.clone(),
                created: resolved.created,
                application: String::new(),
                action: String::new(),
            });
        }

        for target in targets {
            let (app, app_version) = split_app_version(&target, &saved_appversion);
            progress.info(&format!(
                "Application version definition: '{app}' '{app_version}' autoinc: {app_autoinc}"
            ));
            let app_version = applications
                .resolve_or_create(&app, &app_version, app_autoinc, &args.envs, Some(resolved.id))
                .await?;
            data.application = app_version.full_name.clone();

            progress.info(&format!(
                "Assigning {full_component} to {}",
                app_version.full_name
            ));
            let outcome = assignments.assign(app_version.id, resolved.id).await?;
            report.components.push(UpdateRow {
                component: full_component.clone(),
                created: resolved.created,
                application: app_version.full_name.clone(),
                action: describe(&outcome),
            });

            if let Some(deploy_env) = args.deployenv.as_deref().filter(|e| !e.is_empty()) {
                let summary =
                    run_deployment(session, app_version.id, &app_version.full_name, deploy_env)
                        .await?;
                let failed = !summary.success;
                report.deployments.push(summary);
                if failed {
                    break;
                }
            }
        }
        if report.deployments.iter().any(|d| !d.success) {
            break;
        }

        let Some(next) = chained(index) else {
            break;
        };
        compname = next.name;
        variant = String::new();
        version = next.version;
        appname = next.application;
    }

    if let Some(path) = &args.deploydatasave {
        deploy_data::save(path, &data)?;
    }
    Ok(report)
}

/// Create `name;variant` when neither it nor the bare name exists, so the
/// new version gets a parent to hang below. Returns whether it was created.
async fn ensure_parent(
    components: &ComponentResolver,
    name: &QualifiedName,
    kind: ComponentKind,
) -> CliResult<bool> {
    let parent = name.without_version();
    if components.exists(&name.base()).await? || components.exists(&parent).await? {
        return Ok(false);
    }
    components.resolve_or_create(&parent, kind, false, &[]).await?;
    Ok(true)
}

/// Applications whose latest version holds the base of `component`
async fn applications_holding(
    components: &ComponentResolver,
    applications: &ApplicationResolver,
    component: ComponentId,
) -> CliResult<Vec<String>> {
    let mut names = Vec::new();
    for app in components.applications_of(component).await? {
        let full_name = if app.domain.is_empty() {
            app.name.clone()
        } else {
            format!("{}.{}", app.domain, app.name)
        };
        let base = full_name.split(';').next().unwrap_or_default().to_string();
        let latest = applications.find_latest(&base).await?;
        if latest.is_some_and(|latest| latest.id == app.id) {
            names.push(base);
        }
    }
    debug!(count = names.len(), "Applications holding component");
    Ok(names)
}

/// `key:value` pairs. A value containing `@sha256:` is cut down to the
/// digest; a value starting with `@` names a file whose contents, with line
/// breaks removed, become the value.
fn parse_attributes(pairs: &[String], workdir: &Path) -> Attributes {
    let mut attributes = Attributes::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once(':') else {
            continue;
        };
        let value = match value.split_once("@sha256:") {
            Some((_, digest)) => digest.to_string(),
            None => value.to_string(),
        };
        let value = match value.strip_prefix('@') {
            Some(file) => std::fs::read_to_string(workdir.join(file))
                .map(|contents| contents.replace(['\n', '\r'], ""))
                .unwrap_or_default(),
            None => value,
        };
        attributes.insert(key.to_string(), value);
    }
    attributes
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    version: Option<String>,
}

/// `Chart` and `ChartVersion` for a helm chart named after the component
fn chart_attributes(workdir: &Path, local_name: &str) -> Attributes {
    let mut attributes = Attributes::new();
    let shortname = local_name.rsplit('.').next().unwrap_or(local_name);

    let found = ["helm", "chart", "charts"]
        .iter()
        .flat_map(|dir| {
            ["Chart.yaml", "Chart.yml"]
                .iter()
                .map(move |file| Path::new(dir).join(shortname).join(file))
        })
        .find(|relative| workdir.join(relative).is_file());

    if let Some(relative) = found {
        if let Some(dir) = relative.parent() {
            attributes.insert("Chart".to_string(), dir.display().to_string());
        }
        let version = std::fs::read_to_string(workdir.join(&relative))
            .ok()
            .and_then(|contents| serde_yaml::from_str::<Chart>(&contents).ok())
            .and_then(|chart| chart.version);
        if let Some(version) = version {
            attributes.insert("ChartVersion".to_string(), version);
        }
        info!(chart = %relative.display(), "Found helm chart");
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::session;
    use crate::component_config::ComponentConfig;
    use chrono::{TimeZone, Utc};
    use relcat_client::{CatalogApi, InMemoryCatalog, Lookup};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct NoGit;

    impl CommandRunner for NoGit {
        fn run(&self, _command: &str) -> Option<String> {
            None
        }
    }

    fn metadata() -> BuildMetadata {
        let env = HashMap::from([("DOCKERREPO".to_string(), "quay.io/acme/cart".to_string())]);
        BuildMetadata::new(env, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
            .with_base_name("cart")
    }

    async fn run(
        catalog: &Arc<InMemoryCatalog>,
        args: &UpdateCompArgs,
        workdir: &Path,
    ) -> CliResult<UpdateReport> {
        let metadata = metadata();
        let env = Environment {
            metadata: &metadata,
            runner: &NoGit,
            workdir,
        };
        update_chain(args, &session(catalog), &env, |_| None).await
    }

    fn args(compname: &str, version: &str, appname: &str) -> UpdateCompArgs {
        UpdateCompArgs {
            compname: Some(compname.into()),
            compversion: Some(version.into()),
            appname: Some(appname.into()),
            compautoinc: Some(false),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_creates_component_and_application_version() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let dir = tempfile::tempdir().unwrap();
        let mut args = args("GLOBAL.cart", "main-v1", "GLOBAL.shop;1");
        args.compattrs = vec!["DockerSha:quay.io/acme/cart@sha256:abc123".into()];
        args.crdatasource = Some("jira".into());
        args.changerequest = vec!["OPS-1".into()];

        let report = run(&catalog, &args, dir.path()).await.unwrap();

        assert_eq!(report.components.len(), 1);
        let row = &report.components[0];
        assert_eq!(row.component, "GLOBAL.cart;main;v1");
        assert!(row.created);
        assert_eq!(row.application, "GLOBAL.shop;1");

        let comp = catalog
            .find_component("GLOBAL.cart;main;v1", Lookup::exact())
            .await
            .unwrap();
        let attrs = catalog.component_attributes(comp.id);
        assert_eq!(attrs["DockerSha"], "abc123");
        assert_eq!(attrs["DockerRepo"], "quay.io/acme/cart");
        assert_eq!(attrs["BaseName"], "cart");
        assert_eq!(
            catalog.change_requests(comp.id),
            vec![("jira".to_string(), "OPS-1".to_string())]
        );

        assert!(catalog
            .find_component("GLOBAL.cart;main", Lookup::exact())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_kvconfig_merges_after_build_attributes() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config");
        std::fs::create_dir(&config).unwrap();
        std::fs::write(config.join("app.properties"), "DockerRepo=mirror/cart
region=eu
").unwrap();

        let mut args = args("GLOBAL.cart", "main-v1", "GLOBAL.shop;1");
        args.kvconfig = Some(config.to_string_lossy().into_owned());
        run(&catalog, &args, dir.path()).await.unwrap();

        let comp = catalog
            .find_component("GLOBAL.cart;main;v1", Lookup::exact())
            .await
            .unwrap();
        let attrs = catalog.component_attributes(comp.id);
        assert_eq!(attrs["DockerRepo"], "mirror/cart");
        assert_eq!(attrs["region"], "eu");
        assert_eq!(attrs["BaseName"], "cart");
        assert_eq!(catalog.calls("get_component_attributes"), 1);
    }

    #[tokio::test]
    async fn test_rerun_reuses_component_version() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let dir = tempfile::tempdir().unwrap();
        let args = args("GLOBAL.cart", "main-v1", "GLOBAL.shop;1");

        run(&catalog, &args, dir.path()).await.unwrap();
        let count = catalog.component_count();
        let report = run(&catalog, &args, dir.path()).await.unwrap();

        assert!(!report.components[0].created);
        assert_eq!(report.components[0].action, "unchanged");
        assert_eq!(catalog.component_count(), count);
    }

    #[tokio::test]
    async fn test_file_items_from_response_file() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let dir = tempfile::tempdir().unwrap();
        let component = ComponentConfig::from_toml(
            "Name = \"GLOBAL.scripts\"\nVersion = \"3\"\nVariant = \"main\"\nKind = \"file\"\n[[Items]]\nname = \"install\"\n[[Items]]\nname = \"cleanup\"\n",
            HashMap::new(),
            Utc::now(),
        )
        .unwrap();
        let metadata = metadata();
        let env = Environment {
            metadata: &metadata,
            runner: &NoGit,
            workdir: dir.path(),
        };
        let args = UpdateCompArgs {
            compautoinc: Some(false),
            ..Default::default()
        };

        let session = crate::commands::testing::session_with(&catalog, component);
        let report = update_chain(&args, &session, &env, |_| None).await.unwrap();

        assert_eq!(report.components[0].component, "GLOBAL.scripts;main;3");
        assert_eq!(report.components[0].application, "");
        let comp = catalog
            .find_component("GLOBAL.scripts;main;3", Lookup::exact())
            .await
            .unwrap();
        assert_eq!(catalog.component_kind(comp.id), Some(ComponentKind::File));
        assert_eq!(catalog.component_items(comp.id).len(), 2);
    }

    #[tokio::test]
    async fn test_deploys_new_application_version() {
        let catalog = Arc::new(InMemoryCatalog::new().with_deployment_outcome(0, 0));
        let dir = tempfile::tempdir().unwrap();
        let mut args = args("GLOBAL.cart", "main-v1", "GLOBAL.shop;1");
        args.deployenv = Some("dev".into());

        let report = run(&catalog, &args, dir.path()).await.unwrap();

        assert_eq!(report.deployments.len(), 1);
        assert!(report.deployments[0].success);
        assert_eq!(report.deployments[0].application, "GLOBAL.shop;1");
    }

    #[test]
    fn test_attribute_values_from_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("digest.txt"), "sha-1\nsha-2\n").unwrap();
        let pairs = vec![
            "Digest:@digest.txt".to_string(),
            "Missing:@nope.txt".to_string(),
            "Plain:value:with:colons".to_string(),
            "nocolon".to_string(),
        ];

        let attrs = parse_attributes(&pairs, dir.path());

        assert_eq!(attrs["Digest"], "sha-1sha-2");
        assert_eq!(attrs["Missing"], "");
        assert_eq!(attrs["Plain"], "value:with:colons");
        assert_eq!(attrs.len(), 3);
    }

    #[test]
    fn test_chart_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let chart = dir.path().join("charts").join("cart");
        std::fs::create_dir_all(&chart).unwrap();
        std::fs::write(chart.join("Chart.yaml"), "name: cart\nversion: 0.4.2\n").unwrap();

        let attrs = chart_attributes(dir.path(), "cart");
        assert_eq!(attrs["Chart"], "charts/cart");
        assert_eq!(attrs["ChartVersion"], "0.4.2");
        assert!(chart_attributes(dir.path(), "pay").is_empty());
    }
}
