//! Assign command

use super::{component_name, or_config, required, ChainedComponent};
use crate::deploy_data;
use crate::error::{CliError, CliResult};
use crate::output::{print_output, Progress};
use crate::Session;
use clap::builder::BoolishValueParser;
use clap::Args;
use relcat_engine::{ApplicationResolver, AssignOutcome, AssignmentEngine, ComponentResolver};
use relcat_types::split_app_version;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tabled::Tabled;
use tracing::instrument;

#[derive(Args, Debug, Clone, Default)]
pub struct AssignArgs {
    /// Component name
    #[arg(long)]
    pub compname: Option<String>,

    /// Component variant
    #[arg(long)]
    pub compvariant: Option<String>,

    /// Component version
    #[arg(long)]
    pub compversion: Option<String>,

    /// Application name, optionally `name;variant;version`
    #[arg(long)]
    pub appname: Option<String>,

    /// Application version
    #[arg(long)]
    pub appversion: Option<String>,

    /// Allocate a new application version when the requested one exists (Y/N)
    #[arg(long, value_parser = BoolishValueParser::new())]
    pub appautoinc: Option<bool>,

    /// JSON file collecting the application and component version names
    #[arg(long)]
    pub deploydatasave: Option<PathBuf>,

    /// Environments to associate with a newly created application
    #[arg(long, value_delimiter = ',')]
    pub envs: Vec<String>,
}

/// One component assigned by this command
#[derive(Debug, Serialize, Tabled)]
pub struct AssignmentRow {
    #[tabled(rename = "COMPONENT")]
    pub component: String,
    #[tabled(rename = "APPLICATION")]
    pub application: String,
    #[tabled(rename = "ACTION")]
    pub action: String,
}

pub(crate) fn describe(outcome: &AssignOutcome) -> String {
    match outcome {
        AssignOutcome::Added { position } => format!("added at {},{}", position.x, position.y),
        AssignOutcome::Replaced { previous } => format!("replaced {previous}"),
        AssignOutcome::Unchanged => "unchanged".to_string(),
    }
}

pub async fn execute(args: &AssignArgs, session: &Session) -> CliResult<()> {
    let rows = assign_chain(args, session, ChainedComponent::from_env).await?;
    print_output(rows, session.output)
}

/// Assign the component from the arguments, then every component chained
/// through `COMPONENT_*_<n>` variables
#[instrument(skip_all)]
pub(crate) async fn assign_chain<F>(
    args: &AssignArgs,
    session: &Session,
    chained: F,
) -> CliResult<Vec<AssignmentRow>>
where
    F: Fn(usize) -> Option<ChainedComponent>,
{
    let progress = Progress::new(session.output);
    let components = ComponentResolver::new(session.catalog.clone(), session.engine.clone());
    let applications = ApplicationResolver::new(session.catalog.clone(), session.engine.clone());
    let assignments = AssignmentEngine::new(session.catalog.clone());
    let auto_increment = args
        .appautoinc
        .unwrap_or(session.engine.application_auto_increment);

    let mut compname = required(
        or_config(&args.compname, &session.component.name),
        "compname",
    )?;
    let mut variant = or_config(&args.compvariant, &session.component.variant);
    let mut version = or_config(&args.compversion, &session.component.version);
    let mut appname = required(
        or_config(&args.appname, &session.component.application),
        "appname",
    )?;
    let mut appversion = or_config(&args.appversion, &session.component.application_version);

    let mut data = args
        .deploydatasave
        .as_deref()
        .map(deploy_data::load_or_default)
        .unwrap_or_default();
    let mut with_environments = HashSet::new();
    let mut rows = Vec::new();

    for index in 1.. {
        let name = component_name(&compname, &variant, &version);
        let component = components
            .find_exact(&name)
            .await?
            .ok_or_else(|| CliError::NotFound(format!("component {name}")))?;
        let full_component = components.component_name(component).await?;

        let (app, app_version) = split_app_version(&appname, &appversion);
        let resolved = applications
            .resolve_or_create(&app, &app_version, auto_increment, &[], Some(component))
            .await?;
        if !args.envs.is_empty() && with_environments.insert(app.clone()) {
            applications.assign_environments(&app, &args.envs).await?;
        }

        progress.info(&format!(
            "Assigning {full_component} to {}",
            resolved.full_name
        ));
        let outcome = assignments.assign(resolved.id, component).await?;

        data.application = resolved.full_name.clone();
        data.push_component(full_component.clone());
        rows.push(AssignmentRow {
            component: full_component,
            application: resolved.full_name,
            action: describe(&outcome),
        });

        let Some(next) = chained(index) else {
            break;
        };
        compname = next.name;
        variant = String::new();
        version = next.version;
        if !next.application.is_empty() {
            appname = next.application;
            appversion = next.application_version;
        }
    }

    if let Some(path) = &args.deploydatasave {
        deploy_data::save(path, &data)?;
    }
    Ok(rows)
}
