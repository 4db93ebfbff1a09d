//! CLI command implementations

pub mod approve;
pub mod assign;
pub mod cluster;
pub mod deploy;
pub mod envscript;
pub mod kv;
pub mod move_app;
pub mod updatecomp;

use crate::error::{CliError, CliResult};
use crate::output::{OutputFormat, Progress};
use crate::Session;
use indicatif::{ProgressBar, ProgressStyle};
use relcat_engine::{ApplicationResolver, DeploymentWaiter};
use relcat_types::{split_app_version, ApplicationId, ApplicationSummary, NameParser, QualifiedName};
use serde::Serialize;
use std::time::Duration;

/// The flag value, or the response file value when the flag is absent
pub(crate) fn or_config(flag: &Option<String>, config: &str) -> String {
    flag.as_deref()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(config)
        .to_string()
}

pub(crate) fn required(value: String, flag: &str) -> CliResult<String> {
    if value.trim().is_empty() {
        Err(CliError::missing_arg(flag))
    } else {
        Ok(value)
    }
}

/// Component name from separate name, variant and version arguments.
/// Slashes in the variant (branch names) become underscores.
pub(crate) fn component_name(name: &str, variant: &str, version: &str) -> QualifiedName {
    let variant = variant.trim().replace('/', "_");
    let parsed = if variant.is_empty() {
        NameParser::parse(name, version)
    } else {
        NameParser::parse(&format!("{name};{variant}"), version)
    };
    parsed.cleaned()
}

/// Look up `app;version`, failing when it does not exist
pub(crate) async fn find_application(
    session: &Session,
    name: &str,
    version: &str,
) -> CliResult<ApplicationSummary> {
    let (name, version) = split_app_version(name, version);
    ApplicationResolver::new(session.catalog.clone(), session.engine.clone())
        .find(&name, &version)
        .await?
        .ok_or_else(|| CliError::NotFound(format!("application {}", join_version(&name, &version))))
}

pub(crate) fn join_version(name: &str, version: &str) -> String {
    if version.is_empty() {
        name.to_string()
    } else {
        format!("{name};{version}")
    }
}

/// One component handed over through `COMPONENT_*_<n>` environment variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ChainedComponent {
    pub name: String,
    pub version: String,
    pub application: String,
    pub application_version: String,
}

impl ChainedComponent {
    /// The `index`th chained component, `None` once `COMPONENT_NAME_<index>`
    /// is unset or empty
    pub fn lookup<F>(index: usize, var: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |prefix: &str| var(&format!("{prefix}_{index}")).unwrap_or_default();
        let name = get("COMPONENT_NAME");
        if name.trim().is_empty() {
            return None;
        }
        Some(Self {
            name,
            version: get("COMPONENT_VERSION"),
            application: get("COMPONENT_APPLICATION"),
            application_version: get("COMPONENT_APPLICATION_VERSION"),
        })
    }

    pub fn from_env(index: usize) -> Option<Self> {
        Self::lookup(index, |key| std::env::var(key).ok())
    }
}

/// Result of a deployment run through the catalog
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSummary {
    pub application: String,
    pub environment: String,
    pub deployment: String,
    pub success: bool,
    pub log: Vec<String>,
}

impl DeploymentSummary {
    pub fn ensure_success(&self) -> CliResult<()> {
        if self.success {
            Ok(())
        } else {
            Err(CliError::DeploymentFailed(self.deployment.clone()))
        }
    }
}

fn spinner(format: OutputFormat, message: &str) -> Option<ProgressBar> {
    if !format.is_human() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Deploy an application version and wait for its log. Ctrl-C stops the
/// wait; the deployment keeps running on the catalog side.
pub(crate) async fn run_deployment(
    session: &Session,
    app: ApplicationId,
    name: &str,
    env: &str,
) -> CliResult<DeploymentSummary> {
    let progress = Progress::new(session.output);
    let waiter = DeploymentWaiter::new(session.catalog.clone(), &session.engine);

    progress.info(&format!("Deploying {name} to {env}"));
    let id = waiter.deploy(app, env).await?;

    let pb = spinner(session.output, &format!("Waiting for deployment {id}..."));
    let result = waiter.wait(id, crate::interrupted()).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let log = result?;

    for line in &log.lines {
        progress.line(line);
    }
    let success = log.succeeded();
    if success {
        progress.success("Successful");
    } else {
        crate::output::print_error(&format!("Deployment {id} failed with exit code {}", log.exit_code));
    }

    Ok(DeploymentSummary {
        application: name.to_string(),
        environment: env.to_string(),
        deployment: id.to_string(),
        success,
        log: log.lines,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::component_config::ComponentConfig;
    use relcat_client::InMemoryCatalog;
    use relcat_engine::EngineConfig;
    use std::sync::Arc;

    pub fn session(catalog: &Arc<InMemoryCatalog>) -> Session {
        session_with(catalog, ComponentConfig::default())
    }

    pub fn session_with(catalog: &Arc<InMemoryCatalog>, component: ComponentConfig) -> Session {
        let engine = EngineConfig {
            poll_interval: Duration::from_secs(1),
            deploy_timeout: Duration::from_secs(60),
            ..EngineConfig::default()
        };
        Session::new(catalog.clone(), engine, OutputFormat::Json, component)
    }
}
