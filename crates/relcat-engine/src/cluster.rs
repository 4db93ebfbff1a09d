//! Cluster reconciliation
//!
//! Reads the workloads running in a cluster and records them in the catalog
//! as one application version. The component set is the container being
//! deployed plus the newest release build of every other microservice on
//! the main branch. A run that finds the catalog already matching the
//! cluster creates nothing.

use crate::application::{split_version, with_version, ApplicationResolver};
use crate::assignment::{AssignOutcome, AssignmentEngine};
use crate::component::{ChangeRequests, ComponentResolver};
use crate::config::EngineConfig;
use crate::error::Result;
use relcat_client::CatalogApi;
use relcat_types::{
    AppRef, ApplicationId, ClusterContainer, ClusterSnapshot, ComponentId, ComponentKind,
    DeploymentReceipt, DeploymentRecord, QualifiedName,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Where and how a cluster snapshot is recorded
#[derive(Debug, Clone, Default)]
pub struct SyncTarget {
    /// Domain prefixed to every component name
    pub domain: String,
    pub application: String,
    pub version: String,
    pub auto_increment: bool,
    /// Environment to record the deployment against
    pub environment: Option<String>,
    /// Container name of the microservice being deployed
    pub microservice: String,
    /// Branch the deployed microservice was built from
    pub branch: String,
    pub change_requests: Option<ChangeRequests>,
}

/// A candidate container mapped onto a component id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncedComponent {
    pub name: String,
    pub id: ComponentId,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Nothing in the snapshot qualified
    NoCandidates,
    /// The application version already holds exactly these components
    Unchanged { application: ApplicationId },
    Updated {
        application: ApplicationId,
        full_name: String,
        detached: Vec<ComponentId>,
        attached: Vec<(ComponentId, AssignOutcome)>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub candidates: Vec<ClusterContainer>,
    pub components: Vec<SyncedComponent>,
    pub outcome: SyncOutcome,
    pub deployment: Option<DeploymentReceipt>,
}

fn is_main_branch(branch: &str) -> bool {
    branch == "master" || branch == "main"
}

fn is_release(version: &str) -> bool {
    version.starts_with("1.") || version == "1"
}

/// Newest release container per microservice on the main branch.
///
/// Timestamps compare as RFC 3339 strings; on a tie the later container in
/// snapshot order wins.
pub fn build_master_table(containers: &[ClusterContainer]) -> BTreeMap<String, ClusterContainer> {
    let mut table: BTreeMap<String, ClusterContainer> = BTreeMap::new();

    for container in containers
        .iter()
        .filter(|c| is_main_branch(&c.branch) && is_release(&c.release_version))
    {
        let newer = table
            .get(&container.microservice_name)
            .map_or(true, |existing| existing.creation_timestamp <= container.creation_timestamp);
        if newer {
            table.insert(container.microservice_name.clone(), container.clone());
        }
    }

    table
}

/// The container being deployed; the last one named `microservice` wins
pub fn find_deploying<'a>(
    containers: &'a [ClusterContainer],
    microservice: &str,
) -> Option<&'a ClusterContainer> {
    containers
        .iter()
        .rev()
        .find(|c| c.full_microservice_name == microservice)
}

/// The deploying container followed by the master table entries for every
/// other microservice. A master entry for the deploying microservice is kept
/// only when both sit on the same branch and the target branch is not main.
pub fn select_candidates(
    containers: &[ClusterContainer],
    microservice: &str,
    branch: &str,
) -> Vec<ClusterContainer> {
    let deploying = find_deploying(containers, microservice);
    let mut candidates: Vec<ClusterContainer> = deploying.into_iter().cloned().collect();

    for entry in build_master_table(containers).into_values() {
        let keep = match deploying {
            None => true,
            Some(d) if d.microservice_name != entry.microservice_name => true,
            Some(d) => d.branch == entry.branch && !is_main_branch(branch),
        };
        if keep {
            candidates.push(entry);
        }
    }

    candidates
}

pub struct ClusterReconciler {
    catalog: Arc<dyn CatalogApi>,
    components: ComponentResolver,
    applications: ApplicationResolver,
    assignments: AssignmentEngine,
}

impl ClusterReconciler {
    pub fn new(catalog: Arc<dyn CatalogApi>, config: EngineConfig) -> Self {
        Self {
            components: ComponentResolver::new(catalog.clone(), config.clone()),
            applications: ApplicationResolver::new(catalog.clone(), config),
            assignments: AssignmentEngine::new(catalog.clone()),
            catalog,
        }
    }

    /// Record `snapshot` in the catalog as a version of the target application
    #[instrument(skip(self, snapshot, target), fields(application = %target.application, microservice = %target.microservice))]
    pub async fn reconcile(
        &self,
        snapshot: &ClusterSnapshot,
        target: &SyncTarget,
    ) -> Result<SyncReport> {
        let containers = snapshot.containers(&target.domain);
        let candidates = select_candidates(&containers, &target.microservice, &target.branch);
        info!(
            containers = containers.len(),
            candidates = candidates.len(),
            "Read cluster snapshot"
        );

        if candidates.is_empty() {
            return Ok(SyncReport {
                candidates,
                components: Vec::new(),
                outcome: SyncOutcome::NoCandidates,
                deployment: None,
            });
        }

        let mut components = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            components.push(self.sync_component(candidate, target).await?);
        }

        let (app_name, app_version) = split_version(&target.application, &target.version);
        let versioned = with_version(&app_name, &app_version);
        let current = self.applications.find_latest(&versioned).await?;

        let mut existing = match &current {
            Some(app) => self.assignments.assignment_set(app.id).await?,
            None => Vec::new(),
        };
        let mut desired: Vec<ComponentId> = components.iter().map(|c| c.id).collect();
        existing.sort();
        existing.dedup();
        desired.sort();
        desired.dedup();

        let outcome = match current {
            Some(app) if existing == desired => {
                info!(application = %app.full_name(), "Application version already matches cluster");
                SyncOutcome::Unchanged {
                    application: app.id,
                }
            }
            _ => {
                self.update_application(&app_name, &app_version, target.auto_increment, &components)
                    .await?
            }
        };

        let deployment = match (&target.environment, application_of(&outcome)) {
            (Some(env), Some(app)) => {
                let mut record = DeploymentRecord::new(AppRef::Id(app), env.clone());
                record.compversion = components.iter().map(|c| c.name.clone()).collect();
                let receipt = self.catalog.record_deployment(&record).await?;
                info!(environment = %env, deployment = ?receipt.deployment, "Recorded deployment");
                Some(receipt)
            }
            _ => None,
        };

        Ok(SyncReport {
            candidates,
            components,
            outcome,
            deployment,
        })
    }

    async fn sync_component(
        &self,
        container: &ClusterContainer,
        target: &SyncTarget,
    ) -> Result<SyncedComponent> {
        let name = QualifiedName::parse(&format!(
            "{};{};{}",
            container.component_name, container.variant, container.version
        ))
        .cleaned();

        if let Some(id) = self.components.find_exact(&name).await? {
            debug!(component = %name, id = %id, "Component exists");
            return Ok(SyncedComponent {
                name: name.canonical(),
                id,
                created: false,
            });
        }

        let resolved = self
            .components
            .resolve_or_create(&name, ComponentKind::Docker, false, &[])
            .await?;
        if resolved.created {
            let attributes = BTreeMap::from([
                ("DockerTag".to_string(), container.image_tag.clone()),
                ("DockerRepo".to_string(), container.image_repo.clone()),
            ]);
            self.components
                .update_attributes(resolved.id, &attributes, target.change_requests.as_ref())
                .await?;
        }

        Ok(SyncedComponent {
            name: resolved.name.canonical(),
            id: resolved.id,
            created: resolved.created,
        })
    }

    async fn update_application(
        &self,
        name: &str,
        version: &str,
        auto_increment: bool,
        components: &[SyncedComponent],
    ) -> Result<SyncOutcome> {
        let app = self
            .applications
            .resolve_or_create(name, version, auto_increment, &[], None)
            .await?;

        let detached = self.assignments.assignment_set(app.id).await?;
        for component in &detached {
            self.assignments.detach(app.id, *component).await?;
        }

        let mut attached = Vec::with_capacity(components.len());
        for component in components {
            let outcome = self.assignments.assign(app.id, component.id).await?;
            info!(component = %component.name, application = %app.full_name, "Assigned component version");
            attached.push((component.id, outcome));
        }

        Ok(SyncOutcome::Updated {
            application: app.id,
            full_name: app.full_name,
            detached,
            attached,
        })
    }
}

fn application_of(outcome: &SyncOutcome) -> Option<ApplicationId> {
    match outcome {
        SyncOutcome::NoCandidates => None,
        SyncOutcome::Unchanged { application } | SyncOutcome::Updated { application, .. } => {
            Some(*application)
        }
    }
}
