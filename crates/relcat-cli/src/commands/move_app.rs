//! Move command

use super::{find_application, or_config, required};
use crate::error::{CliError, CliResult};
use crate::output::{print_error, Progress};
use crate::Session;
use clap::Args;
use relcat_types::split_app_version;
use std::io::IsTerminal;
use tracing::info;

#[derive(Args, Debug, Clone, Default)]
pub struct MoveArgs {
    /// Application name, optionally `name;variant;version`
    #[arg(long)]
    pub appname: Option<String>,

    /// Application version
    #[arg(long)]
    pub appversion: Option<String>,

    /// Domain the application version currently lives in
    #[arg(long = "from_domain")]
    pub from_domain: Option<String>,

    /// Name of the domain task that performs the move
    #[arg(long)]
    pub task: Option<String>,

    /// Skip confirmation
    #[arg(short, long)]
    pub yes: bool,
}

pub async fn execute(args: &MoveArgs, session: &Session) -> CliResult<()> {
    let progress = Progress::new(session.output);
    let appname = required(
        or_config(&args.appname, &session.component.application),
        "appname",
    )?;
    let appversion = or_config(&args.appversion, &session.component.application_version);
    let from_domain = required(args.from_domain.clone().unwrap_or_default(), "from_domain")?;
    let task_name = required(args.task.clone().unwrap_or_default(), "task")?;
    let (name, version) = split_app_version(&appname, &appversion);

    let app = find_application(session, &name, &version).await?;
    let domain = session.catalog.find_domain(&from_domain).await?;
    let task = session
        .catalog
        .list_tasks(domain)
        .await?
        .into_iter()
        .find(|t| t.name == task_name)
        .ok_or_else(|| CliError::NotFound(format!("task {task_name} in domain {from_domain}")))?;

    if !args.yes && session.output.is_human() && std::io::stdin().is_terminal() {
        let confirm = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Run task {task_name} on {} from {from_domain}?",
                app.full_name()
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            print_error("Aborted");
            return Ok(());
        }
    }

    progress.info(&format!(
        "Moving {} from {from_domain} using {task_name}",
        app.full_name()
    ));
    session.catalog.run_task(task.id, app.id, domain, "").await?;

    info!(application = %app.full_name(), task = %task.id, domain = %domain, "Ran domain task");
    progress.success(&format!("Moved {}", app.full_name()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::session;
    use relcat_client::{CatalogApi, InMemoryCatalog, Lookup};
    use relcat_types::ApplicationId;
    use std::sync::Arc;

    async fn catalog() -> (Arc<InMemoryCatalog>, ApplicationId) {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.create_application("shop", Some("GLOBAL.Dev")).await.unwrap();
        let base = catalog
            .find_application("GLOBAL.Dev.shop", Lookup::exact())
            .await
            .unwrap();
        let version = catalog
            .create_application_version(base.id, "shop;2", Some("GLOBAL.Dev"))
            .await
            .unwrap();
        (catalog, version)
    }

    fn args(task: &str) -> MoveArgs {
        MoveArgs {
            appname: Some("GLOBAL.Dev.shop".into()),
            appversion: Some("2".into()),
            from_domain: Some("GLOBAL.Dev".into()),
            task: Some(task.into()),
            yes: true,
        }
    }

    #[tokio::test]
    async fn test_runs_named_task() {
        let (catalog, app) = catalog().await;
        let domain = catalog.add_domain("GLOBAL.Dev", &["Move to QA", "Move to Prod"]);

        execute(&args("Move to QA"), &session(&catalog)).await.unwrap();

        let (task, ran_in) = catalog.task_run(app).unwrap();
        assert_eq!(ran_in, domain);
        let tasks = catalog.list_tasks(domain).await.unwrap();
        assert_eq!(task, tasks[0].id);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let (catalog, app) = catalog().await;
        catalog.add_domain("GLOBAL.Dev", &["Move to QA"]);

        let err = execute(&args("Move to Staging"), &session(&catalog))
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::NotFound(_)));
        assert!(catalog.task_run(app).is_none());
    }

    #[tokio::test]
    async fn test_requires_domain_and_task() {
        let (catalog, _) = catalog().await;
        let mut missing = args("Move to QA");
        missing.from_domain = None;

        let err = execute(&missing, &session(&catalog)).await.unwrap_err();
        assert!(matches!(err, CliError::InvalidInput(_)));
        assert_eq!(catalog.calls("find_domain"), 0);
    }
}
