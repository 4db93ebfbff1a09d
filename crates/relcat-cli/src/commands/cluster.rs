//! Cluster command

use super::{or_config, required};
use crate::error::{CliError, CliResult};
use crate::output::{print_output, print_single, Progress};
use crate::Session;
use clap::builder::BoolishValueParser;
use clap::Args;
use relcat_engine::{ChangeRequests, ClusterReconciler, EngineError, SyncOutcome, SyncReport, SyncTarget};
use relcat_types::{split_app_version, ClusterSnapshot};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::Tabled;
use tracing::instrument;

#[derive(Args, Debug, Clone, Default)]
pub struct ClusterArgs {
    /// Application name, optionally `name;variant;version`
    #[arg(long)]
    pub appname: Option<String>,

    /// Application version
    #[arg(long)]
    pub appversion: Option<String>,

    /// Allocate a new application version when the requested one exists (Y/N)
    #[arg(long, value_parser = BoolishValueParser::new())]
    pub appautoinc: Option<bool>,

    /// Output of `kubectl get deploy -o json`
    #[arg(long = "cluster_json")]
    pub cluster_json: Option<PathBuf>,

    /// Domain the cluster's components are recorded under
    #[arg(long)]
    pub todom: Option<String>,

    /// Container name of the microservice being deployed
    #[arg(long)]
    pub msname: Option<String>,

    /// Branch the deployed microservice was built from
    #[arg(long)]
    pub msbranch: Option<String>,

    /// Environment to record the deployment against
    #[arg(long)]
    pub deployenv: Option<String>,

    /// Change request data source
    #[arg(long)]
    pub crdatasource: Option<String>,

    /// Change request ids
    #[arg(long, value_delimiter = ',')]
    pub changerequest: Vec<String>,
}

#[derive(Debug, Serialize, Tabled)]
pub struct ClusterRow {
    #[tabled(rename = "COMPONENT")]
    pub component: String,
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "CREATED")]
    pub created: bool,
}

pub async fn execute(args: &ClusterArgs, session: &Session) -> CliResult<()> {
    let report = sync(args, session).await?;

    if !session.output.is_human() {
        return print_single(&report, session.output);
    }
    let rows = report
        .components
        .iter()
        .map(|c| ClusterRow {
            component: c.name.clone(),
            id: c.id.to_string(),
            created: c.created,
        })
        .collect();
    print_output(rows, session.output)
}

#[instrument(skip_all)]
async fn sync(args: &ClusterArgs, session: &Session) -> CliResult<SyncReport> {
    let progress = Progress::new(session.output);

    let appname = required(
        or_config(&args.appname, &session.component.application),
        "appname",
    )?;
    let appversion = or_config(&args.appversion, &session.component.application_version);
    let path = args
        .cluster_json
        .as_deref()
        .ok_or_else(|| CliError::missing_arg("cluster_json"))?;
    let domain = required(args.todom.clone().unwrap_or_default(), "todom")?;

    let (application, version) = split_app_version(&appname, &appversion);
    progress.info(&format!("Syncing cluster from {}", path.display()));
    let snapshot = read_snapshot(path)?;

    let target = SyncTarget {
        domain,
        application,
        version,
        auto_increment: args
            .appautoinc
            .unwrap_or(session.engine.application_auto_increment),
        environment: args.deployenv.clone().filter(|e| !e.is_empty()),
        microservice: args.msname.clone().unwrap_or_default(),
        branch: args.msbranch.clone().unwrap_or_default(),
        change_requests: Some(ChangeRequests::new(
            args.crdatasource.clone().unwrap_or_default(),
            args.changerequest.clone(),
        )),
    };

    let report = ClusterReconciler::new(session.catalog.clone(), session.engine.clone())
        .reconcile(&snapshot, &target)
        .await?;

    match &report.outcome {
        SyncOutcome::NoCandidates => progress.info("No release workloads found in cluster"),
        SyncOutcome::Unchanged { application } => {
            progress.success(&format!("Application version {application} already matches cluster"))
        }
        SyncOutcome::Updated { full_name, .. } => {
            progress.success(&format!("Recorded cluster as {full_name}"))
        }
    }
    if let Some(receipt) = &report.deployment {
        if let Some(error) = receipt.error.as_deref().filter(|e| !e.is_empty()) {
            crate::output::print_warning(&format!("Deployment record: {error}"));
        }
    }
    Ok(report)
}

fn read_snapshot(path: &Path) -> CliResult<ClusterSnapshot> {
    let bytes = std::fs::read(path)?;
    Ok(ClusterSnapshot::from_json(&bytes).map_err(EngineError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::session;
    use relcat_client::InMemoryCatalog;
    use std::sync::Arc;

    const SNAPSHOT: &str = r#"{
        "items": [
            {
                "metadata": {
                    "creationTimestamp": "2024-04-02T08:00:00Z",
                    "labels": {"git/branch": "main", "app.kubernetes.io/version": "1.4"}
                },
                "spec": {"template": {"spec": {"containers": [
                    {"name": "cart", "image": "quay.io/acme/cart:7f3c"}
                ]}}}
            },
            {
                "metadata": {
                    "creationTimestamp": "2024-04-01T08:00:00Z",
                    "labels": {"git/branch": "main", "app.kubernetes.io/version": "1.1"}
                },
                "spec": {"template": {"spec": {"containers": [
                    {"name": "pay", "image": "quay.io/acme/pay:19ab"}
                ]}}}
            }
        ]
    }"#;

    fn args(path: PathBuf) -> ClusterArgs {
        ClusterArgs {
            appname: Some("GLOBAL.shop".into()),
            appversion: Some("1".into()),
            cluster_json: Some(path),
            todom: Some("GLOBAL".into()),
            msname: Some("cart".into()),
            msbranch: Some("main".into()),
            deployenv: Some("prod".into()),
            ..Default::default()
        }
    }

    fn snapshot_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("cluster.json");
        std::fs::write(&path, SNAPSHOT).unwrap();
        path
    }

    #[tokio::test]
    async fn test_records_cluster_as_application_version() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let dir = tempfile::tempdir().unwrap();

        let report = sync(&args(snapshot_file(&dir)), &session(&catalog))
            .await
            .unwrap();

        let names: Vec<&str> = report.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["GLOBAL.cart;main;7f3c", "GLOBAL.pay;main;19ab"]);
        assert!(matches!(report.outcome, SyncOutcome::Updated { .. }));
        assert_eq!(catalog.recorded_deployments().len(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_cluster_creates_nothing() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let dir = tempfile::tempdir().unwrap();
        let args = args(snapshot_file(&dir));

        sync(&args, &session(&catalog)).await.unwrap();
        let report = sync(&args, &session(&catalog)).await.unwrap();

        assert!(matches!(report.outcome, SyncOutcome::Unchanged { .. }));
        assert_eq!(catalog.calls("create_application_version"), 1);
    }

    #[tokio::test]
    async fn test_requires_target_domain() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(snapshot_file(&dir));
        args.todom = None;

        let err = sync(&args, &session(&catalog)).await.unwrap_err();
        assert!(matches!(err, CliError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_invalid_snapshot() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(&path, "not json").unwrap();

        let err = sync(&args(path), &session(&catalog)).await.unwrap_err();
        assert!(matches!(err, CliError::Engine(EngineError::Snapshot(_))));
        assert_eq!(catalog.component_count(), 0);
    }
}
