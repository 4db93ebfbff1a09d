//! Approve command

use super::{find_application, or_config, required};
use crate::error::CliResult;
use crate::output::Progress;
use crate::Session;
use clap::Args;
use relcat_types::split_app_version;
use tracing::info;

#[derive(Args, Debug, Clone, Default)]
pub struct ApproveArgs {
    /// Application name, optionally `name;variant;version`
    #[arg(long)]
    pub appname: Option<String>,

    /// Application version
    #[arg(long)]
    pub appversion: Option<String>,
}

pub async fn execute(args: &ApproveArgs, session: &Session) -> CliResult<()> {
    let progress = Progress::new(session.output);
    let appname = required(
        or_config(&args.appname, &session.component.application),
        "appname",
    )?;
    let appversion = or_config(&args.appversion, &session.component.application_version);
    let (name, version) = split_app_version(&appname, &appversion);

    progress.info(&format!("Approving {name} {version}"));
    let app = find_application(session, &name, &version).await?;
    session.catalog.approve_application(app.id).await?;

    info!(application = %app.full_name(), id = %app.id, "Approved application version");
    progress.success("Approval Successful");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::session;
    use crate::error::CliError;
    use relcat_client::{CatalogApi, InMemoryCatalog, Lookup};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_approves_application_version() {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.create_application("shop", Some("GLOBAL")).await.unwrap();
        let base = catalog
            .find_application("GLOBAL.shop", Lookup::exact())
            .await
            .unwrap();
        let version = catalog
            .create_application_version(base.id, "shop;main;4", Some("GLOBAL"))
            .await
            .unwrap();

        let args = ApproveArgs {
            appname: Some("GLOBAL.shop;main;4".into()),
            ..Default::default()
        };
        execute(&args, &session(&catalog)).await.unwrap();

        assert!(catalog.is_approved(version));
        assert!(!catalog.is_approved(base.id));
    }

    #[tokio::test]
    async fn test_unknown_application() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let args = ApproveArgs {
            appname: Some("GLOBAL.shop".into()),
            appversion: Some("9".into()),
        };
        let err = execute(&args, &session(&catalog)).await.unwrap_err();
        assert!(matches!(err, CliError::NotFound(_)));
        assert_eq!(catalog.calls("approve_application"), 0);
    }
}
