//! Application resolution
//!
//! Applications are versioned as `domain.name;version` below a base
//! application `domain.name`. Environments are assigned once, to the base,
//! when it is first created.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::version::VersionAllocator;
use relcat_client::{CatalogApi, Lookup};
use relcat_types::{clean, ApplicationId, ApplicationSummary, ComponentId};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Version argument that selects the most recent application version
pub const LATEST: &str = "latest";

/// Outcome of [`ApplicationResolver::resolve_or_create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedApp {
    pub id: ApplicationId,
    /// `domain.name;version`
    pub full_name: String,
    pub created: bool,
}

pub struct ApplicationResolver {
    catalog: Arc<dyn CatalogApi>,
    config: EngineConfig,
}

impl ApplicationResolver {
    pub fn new(catalog: Arc<dyn CatalogApi>, config: EngineConfig) -> Self {
        Self { catalog, config }
    }

    /// Find an application version. `latest` (any case) selects the most
    /// recently created version, an empty version the base application.
    pub async fn find(&self, name: &str, version: &str) -> Result<Option<ApplicationSummary>> {
        let version = clean(version);
        if version.eq_ignore_ascii_case(LATEST) {
            return self.find_latest(name).await;
        }
        self.lookup(&with_version(name, &version), Lookup::exact())
            .await
    }

    /// The most recently created version at or below `name`
    pub async fn find_latest(&self, name: &str) -> Result<Option<ApplicationSummary>> {
        self.lookup(name, Lookup::latest()).await
    }

    /// Resolve `name;version` to an application version id, creating the
    /// base application and the version as needed.
    ///
    /// When `triggering` is already assigned to the latest version that
    /// version is returned unchanged.
    #[instrument(skip(self, environments), fields(application = %name, version = %version))]
    pub async fn resolve_or_create(
        &self,
        name: &str,
        version: &str,
        auto_increment: bool,
        environments: &[String],
        triggering: Option<ComponentId>,
    ) -> Result<ResolvedApp> {
        let (full, mut version) = split_version(name, version);
        let (domain, local) = split_domain(&full);

        let base = match self.lookup(&full, Lookup::exact()).await? {
            Some(base) => base.id,
            None => {
                self.catalog.create_application(local, domain).await?;
                let base = self
                    .lookup(&full, Lookup::exact())
                    .await?
                    .ok_or_else(|| EngineError::Missing(format!("application {full}")))?;
                info!(application = %full, id = %base.id, "Created base application");

                for env in environments {
                    self.catalog.assign_environment(local, domain, env).await?;
                    info!(application = %full, environment = %env, "Assigned environment");
                }
                base.id
            }
        };

        let latest = self.lookup(&full, Lookup::latest()).await?;
        let (latest_id, latest_name) = match &latest {
            Some(latest) => (latest.id, latest.full_name()),
            None => (base, full.clone()),
        };

        let mut exact = self
            .lookup(&with_version(&full, &version), Lookup::exact())
            .await?;

        if auto_increment && exact.is_some() {
            version = VersionAllocator::new(self.config.max_version_attempts)
                .allocate(&version, |candidate| {
                    let candidate = with_version(&full, &candidate);
                    async move {
                        Ok(self
                            .lookup(&candidate, Lookup::exact())
                            .await?
                            .is_some())
                    }
                })
                .await?;
            exact = None;
        }

        if let Some(component) = triggering {
            if self.catalog.is_component_assigned(latest_id, component).await? {
                debug!(id = %latest_id, component = %component, "Component already on latest version");
                return Ok(ResolvedApp {
                    id: latest_id,
                    full_name: latest_name,
                    created: false,
                });
            }
        }

        let full_name = with_version(&full, &version);
        if let Some(exact) = exact {
            debug!(id = %exact.id, "Application version exists");
            return Ok(ResolvedApp {
                id: exact.id,
                full_name,
                created: false,
            });
        }

        let id = self
            .catalog
            .create_application_version(latest_id, &format!("{local};{version}"), domain)
            .await?;
        info!(application = %full_name, id = %id, parent = %latest_id, "Created application version");

        Ok(ResolvedApp {
            id,
            full_name,
            created: true,
        })
    }

    /// Assign environments to a base application
    pub async fn assign_environments(&self, name: &str, environments: &[String]) -> Result<()> {
        let (domain, local) = split_domain(name);
        for env in environments {
            self.catalog.assign_environment(local, domain, env).await?;
            info!(application = %name, environment = %env, "Assigned environment");
        }
        Ok(())
    }

    /// `domain.name;version` of an application id
    pub async fn application_name(&self, id: ApplicationId) -> Result<String> {
        Ok(self.catalog.get_application(id).await?.full_name())
    }

    async fn lookup(&self, name: &str, lookup: Lookup) -> Result<Option<ApplicationSummary>> {
        match self.catalog.find_application(name, lookup).await {
            Ok(summary) => Ok(Some(summary)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Take the version from the last `;` part of the name when none was given
pub(crate) fn split_version(name: &str, version: &str) -> (String, String) {
    let version = clean(version);
    if version.trim().is_empty() {
        if let Some((name, version)) = name.rsplit_once(';') {
            return (name.to_string(), clean(version));
        }
    }
    (name.to_string(), version)
}

fn split_domain(full: &str) -> (Option<&str>, &str) {
    match full.rsplit_once('.') {
        Some((domain, local)) => (Some(domain), local),
        None => (None, full),
    }
}

pub(crate) fn with_version(name: &str, version: &str) -> String {
    if version.is_empty() {
        name.to_string()
    } else {
        format!("{name};{version}")
    }
}
