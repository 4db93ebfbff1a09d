//! Kv command
//!
//! Loads a tree of `.properties` and `.json` files and merges the keys into
//! the attributes of the latest version of a component.

use super::{component_name, or_config};
use crate::deploy_data;
use crate::error::{CliError, CliResult};
use crate::kv_config;
use crate::output::{print_output, print_single, Progress};
use crate::Session;
use clap::Args;
use relcat_engine::{ChangeRequests, ComponentResolver};
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;
use tracing::{info, instrument};

#[derive(Args, Debug, Clone, Default)]
pub struct KvArgs {
    /// Directory of `.properties` and `.json` files, or
    /// `git@host:org/repo.git/path#branch`
    #[arg(long)]
    pub kvconfig: Option<String>,

    /// Deploy data file naming the config component and its environment
    #[arg(long)]
    pub deploydata: Option<PathBuf>,

    /// Component name
    #[arg(long)]
    pub compname: Option<String>,

    /// Component variant
    #[arg(long)]
    pub compvariant: Option<String>,

    /// Component version
    #[arg(long)]
    pub compversion: Option<String>,

    /// Change request data source
    #[arg(long)]
    pub crdatasource: Option<String>,

    /// Change request ids
    #[arg(long, value_delimiter = ',')]
    pub changerequest: Vec<String>,
}

#[derive(Debug, Serialize, Tabled)]
pub struct AttributeRow {
    #[tabled(rename = "KEY")]
    pub key: String,
    #[tabled(rename = "VALUE")]
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct KvReport {
    pub component: String,
    /// Keys read from the configuration files
    pub loaded: usize,
    pub attributes: Vec<AttributeRow>,
}

pub async fn execute(args: &KvArgs, session: &Session) -> CliResult<()> {
    let report = apply(args, session).await?;
    if session.output.is_human() {
        print_output(report.attributes, session.output)
    } else {
        print_single(&report, session.output)
    }
}

/// Where the configuration goes, after the deploy data file is applied
#[derive(Debug, Default, PartialEq, Eq)]
struct Target {
    kvconfig: String,
    compname: String,
    variant: String,
    version: String,
}

fn target(args: &KvArgs, session: &Session) -> CliResult<Target> {
    let mut target = Target {
        kvconfig: args.kvconfig.clone().unwrap_or_default(),
        compname: or_config(&args.compname, &session.component.name),
        variant: or_config(&args.compvariant, &session.component.variant),
        version: or_config(&args.compversion, &session.component.version),
    };

    if let Some(path) = &args.deploydata {
        let data = deploy_data::load(path)?;
        if let Some(component) = data.config_component.filter(|c| !c.trim().is_empty()) {
            target.compname = component;
        }
        target.variant = data.environment.unwrap_or_default();
        target.version.clear();
        if target.kvconfig.trim().is_empty() {
            target.kvconfig = data.kvconfig.unwrap_or_default();
        }
        Progress::new(session.output).info(&format!(
            "Config for {} to {}",
            data.application, target.variant
        ));
    }

    if target.kvconfig.trim().is_empty() {
        return Err(CliError::InvalidInput(
            "--kvconfig or --deploydata is required".into(),
        ));
    }
    if target.compname.trim().is_empty() {
        return Err(CliError::missing_arg("compname"));
    }
    // Environments arrive domain-qualified; the variant is the last segment
    if let Some((_, last)) = target.variant.rsplit_once('.') {
        target.variant = last.to_string();
    }
    Ok(target)
}

#[instrument(skip_all)]
async fn apply(args: &KvArgs, session: &Session) -> CliResult<KvReport> {
    let progress = Progress::new(session.output);
    let target = target(args, session)?;

    progress.info(&format!("Loading config from {}", target.kvconfig));
    let loaded = kv_config::load(&target.kvconfig)?;

    let components = ComponentResolver::new(session.catalog.clone(), session.engine.clone());
    let name = component_name(&target.compname, &target.variant, &target.version);
    progress.info("Getting latest component");
    let id = components
        .find_latest(&name)
        .await?
        .ok_or_else(|| CliError::NotFound(format!("component {}", name.canonical())))?;
    let full_name = components.component_name(id).await?;

    progress.info(&format!("Updating attributes of {full_name}"));
    let change_requests = ChangeRequests::new(
        args.crdatasource.clone().unwrap_or_default(),
        args.changerequest.clone(),
    );
    let merged = components
        .merge_attributes(id, &loaded, Some(&change_requests))
        .await?;

    info!(component = %full_name, loaded = loaded.len(), total = merged.len(), "Applied key/value config");
    progress.success("Attribute update done");

    Ok(KvReport {
        component: full_name,
        loaded: loaded.len(),
        attributes: merged
            .into_iter()
            .map(|(key, value)| AttributeRow { key, value })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::session;
    use relcat_client::InMemoryCatalog;
    use relcat_engine::EngineConfig;
    use relcat_types::{ComponentId, ComponentKind, QualifiedName};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    async fn component(catalog: &Arc<InMemoryCatalog>, name: &str) -> ComponentId {
        let resolver = ComponentResolver::new(catalog.clone(), EngineConfig::default());
        let resolved = resolver
            .resolve_or_create(&QualifiedName::parse(name), ComponentKind::Docker, false, &[])
            .await
            .unwrap();
        let existing = BTreeMap::from([
            ("DockerTag".to_string(), "abc".to_string()),
            ("replicas".to_string(), "1".to_string()),
        ]);
        resolver
            .update_attributes(resolved.id, &existing, None)
            .await
            .unwrap();
        resolved.id
    }

    fn config_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.properties"), "replicas=3\nregion=eu\n").unwrap();
        std::fs::write(dir.path().join("flags.json"), r#"{"search": {"enabled": true}}"#).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_merges_config_over_latest_version() {
        let catalog = Arc::new(InMemoryCatalog::new());
        component(&catalog, "GLOBAL.cart;main;1").await;
        let latest = component(&catalog, "GLOBAL.cart;main;2").await;
        let dir = config_dir();

        let args = KvArgs {
            kvconfig: Some(dir.path().to_string_lossy().into_owned()),
            compname: Some("GLOBAL.cart".into()),
            compvariant: Some("main".into()),
            crdatasource: Some("jira".into()),
            changerequest: vec!["OPS-7".into()],
            ..Default::default()
        };
        let report = apply(&args, &session(&catalog)).await.unwrap();

        assert_eq!(report.component, "GLOBAL.cart;main;2");
        assert_eq!(report.loaded, 3);
        let attributes = catalog.component_attributes(latest);
        assert_eq!(attributes["DockerTag"], "abc");
        assert_eq!(attributes["replicas"], "3");
        assert_eq!(attributes["region"], "eu");
        assert_eq!(attributes["search.enabled"], "true");
        assert_eq!(
            catalog.change_requests(latest),
            vec![("jira".to_string(), "OPS-7".to_string())]
        );
    }

    #[tokio::test]
    async fn test_deploy_data_names_config_component() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let id = component(&catalog, "GLOBAL.shop-config;prod;4").await;
        let dir = config_dir();
        let data_dir = tempfile::tempdir().unwrap();
        let data_path = data_dir.path().join("deploy.json");
        std::fs::write(
            &data_path,
            serde_json::json!({
                "application": "GLOBAL.shop;7",
                "compversion": [],
                "rc": 0,
                "environment": "GLOBAL.prod",
                "config_component": "GLOBAL.shop-config",
                "kvconfig": dir.path().to_string_lossy(),
            })
            .to_string(),
        )
        .unwrap();

        let args = KvArgs {
            deploydata: Some(data_path),
            compversion: Some("9".into()),
            ..Default::default()
        };
        let report = apply(&args, &session(&catalog)).await.unwrap();

        assert_eq!(report.component, "GLOBAL.shop-config;prod;4");
        assert_eq!(catalog.component_attributes(id)["region"], "eu");
    }

    #[tokio::test]
    async fn test_requires_config_location() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let args = KvArgs {
            compname: Some("GLOBAL.cart".into()),
            ..Default::default()
        };

        let err = apply(&args, &session(&catalog)).await.unwrap_err();
        assert!(matches!(err, CliError::InvalidInput(_)));
        assert_eq!(catalog.calls("find_component"), 0);
    }

    #[tokio::test]
    async fn test_unknown_component() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let dir = config_dir();
        let args = KvArgs {
            kvconfig: Some(dir.path().to_string_lossy().into_owned()),
            compname: Some("GLOBAL.pay".into()),
            ..Default::default()
        };

        let err = apply(&args, &session(&catalog)).await.unwrap_err();
        assert!(matches!(err, CliError::NotFound(_)));
        assert_eq!(catalog.calls("set_component_attributes"), 0);
    }
}
