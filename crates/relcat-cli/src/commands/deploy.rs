//! Deploy command

use super::{find_application, join_version, or_config, required, run_deployment};
use crate::deploy_data;
use crate::error::{CliError, CliResult};
use crate::output::{print_single, Progress};
use crate::shell::ShellRunner;
use crate::Session;
use clap::Args;
use relcat_engine::{CommandRunner, DeploymentWaiter};
use relcat_types::{clean, split_app_version, AppRef, DeploymentReceipt, DeploymentRecord};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

#[derive(Args, Debug, Clone, Default)]
pub struct DeployArgs {
    /// Application name, optionally `name;variant;version`
    #[arg(long)]
    pub appname: Option<String>,

    /// Application version, or `latest`
    #[arg(long)]
    pub appversion: Option<String>,

    /// Environment to deploy to
    #[arg(long)]
    pub deployenv: Option<String>,

    /// Deploy data JSON file describing the deployment
    #[arg(long)]
    pub deploydata: Option<PathBuf>,

    /// Kubernetes namespace whose running images are recorded as image tags
    #[arg(long)]
    pub namespace: Option<String>,

    /// Record the deployment in the catalog without running it
    #[arg(long)]
    pub logdeployment: bool,
}

#[derive(Debug, Serialize)]
struct LoggedDeployment<'a> {
    application: &'a str,
    environment: &'a str,
    receipt: &'a DeploymentReceipt,
}

pub async fn execute(args: &DeployArgs, session: &Session) -> CliResult<()> {
    let appname = or_config(&args.appname, &session.component.application);
    let appversion = or_config(&args.appversion, &session.component.application_version);

    match &args.deploydata {
        None => deploy_direct(session, appname, appversion, args.deployenv.clone()).await,
        Some(path) => {
            let images = match &args.namespace {
                Some(namespace) => namespace_images(&ShellRunner, namespace),
                None => Vec::new(),
            };
            deploy_from_data(session, args, path, appname, appversion, images).await
        }
    }
}

#[instrument(skip(session))]
async fn deploy_direct(
    session: &Session,
    appname: String,
    appversion: String,
    env: Option<String>,
) -> CliResult<()> {
    let appname = required(appname, "appname")?;
    let env = required(env.unwrap_or_default(), "deployenv")?;
    let (name, version) = split_app_version(&appname, &appversion);

    let app = find_application(session, &name, &version).await?;
    let summary = run_deployment(session, app.id, &app.full_name(), &env).await?;
    print_single(&summary, session.output)?;
    summary.ensure_success()
}

/// Log a deployment described by a deploy data file, then run it unless
/// only logging was asked for. The file is rewritten with the resolved
/// application name before anything is sent.
async fn deploy_from_data(
    session: &Session,
    args: &DeployArgs,
    path: &Path,
    appname: String,
    appversion: String,
    images: Vec<String>,
) -> CliResult<()> {
    if !path.exists() {
        return Err(CliError::InvalidInput(format!(
            "deploy data file {} not found",
            path.display()
        )));
    }
    let progress = Progress::new(session.output);
    let mut data = deploy_data::load(path)?;
    data.imagetags.extend(images);

    let appname = if appname.is_empty() {
        data.application.clone()
    } else {
        appname
    };
    let appversion = if appversion.is_empty() {
        data.appversion.clone().unwrap_or_default()
    } else {
        appversion
    };
    let full_name = join_version(&appname, &clean(&appversion));
    required(full_name.clone(), "appname")?;
    data.application = full_name;
    data.appversion = None;

    if let Some(env) = args.deployenv.as_ref().filter(|e| !e.is_empty()) {
        data.environment = Some(env.clone());
    }
    let env = required(data.environment.clone().unwrap_or_default(), "deployenv")?;

    if !args.logdeployment {
        data.skipdeploy = Some("Y".to_string());
    }
    deploy_data::save(path, &data)?;

    let mut record = DeploymentRecord::new(AppRef::Name(data.application.clone()), env.clone());
    record.rc = data.rc;
    record.compversion = data.compversion.clone();
    if let Some(skip) = &data.skipdeploy {
        record.skip_deploy = skip.clone();
    }

    let waiter = DeploymentWaiter::new(session.catalog.clone(), &session.engine);
    let receipt = waiter.record(&record).await?;
    let application = receipt
        .application
        .clone()
        .unwrap_or_else(|| data.application.clone());
    progress.info(&format!("Recorded deployment of {application} for {env}"));
    for component in &data.compversion {
        progress.line(&format!("  {component}"));
    }

    if args.logdeployment {
        progress.success(&format!("Logged deployment for {application} to {env}"));
        return print_single(
            &LoggedDeployment {
                application: &application,
                environment: &env,
                receipt: &receipt,
            },
            session.output,
        );
    }

    let app = receipt
        .application_id
        .ok_or_else(|| CliError::NotFound(format!("application {application}")))?;
    let summary = run_deployment(session, app, &application, &env).await?;
    print_single(&summary, session.output)?;
    summary.ensure_success()
}

#[derive(Debug, Default, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Default, Deserialize)]
struct Pod {
    #[serde(default)]
    metadata: PodMetadata,
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
struct PodMetadata {
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Default, Deserialize)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<PodContainer>,
}

#[derive(Debug, Default, Deserialize)]
struct PodContainer {
    #[serde(default)]
    image: String,
}

/// Images of every pod running in `namespace`
fn namespace_images(runner: &dyn CommandRunner, namespace: &str) -> Vec<String> {
    let Some(output) = runner.run("kubectl get pods -A -o json") else {
        warn!(namespace, "Could not list cluster pods");
        return Vec::new();
    };
    match serde_json::from_str::<PodList>(&output) {
        Ok(pods) => images_in(&pods, namespace),
        Err(e) => {
            warn!(error = %e, "Could not read pod list");
            Vec::new()
        }
    }
}

fn images_in(pods: &PodList, namespace: &str) -> Vec<String> {
    let images: Vec<String> = pods
        .items
        .iter()
        .filter(|pod| pod.metadata.namespace == namespace)
        .flat_map(|pod| pod.spec.containers.iter())
        .map(|c| c.image.clone())
        .filter(|image| !image.is_empty())
        .collect();
    debug!(namespace, count = images.len(), "Found namespace images");
    images
}
