//! The catalog service API
//!
//! One method per catalog operation. Implementations decode every response
//! into a typed record at the boundary; a lookup that matches nothing is
//! reported as [`CatalogError::NotFound`](crate::CatalogError::NotFound).

use crate::error::Result;
use async_trait::async_trait;
use relcat_types::{
    ApplicationDetail, ApplicationId, ApplicationSummary, ComponentId, ComponentItem,
    ComponentKind, ComponentSummary, DeploymentId, DeploymentLog, DeploymentProgress,
    DeploymentReceipt, DeploymentRecord, DomainId, ItemId, Position, TaskId, TaskRef,
};
use std::collections::BTreeMap;

/// How a name lookup is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lookup {
    /// Return only the id and name instead of the full record
    pub id_only: bool,
    /// Return the most recently created version under the name
    pub latest: bool,
}

impl Lookup {
    /// Exact name match, id only
    pub const fn exact() -> Self {
        Self {
            id_only: true,
            latest: false,
        }
    }

    /// Latest version under the name, id only
    pub const fn latest() -> Self {
        Self {
            id_only: true,
            latest: true,
        }
    }
}

/// Where a new component is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentParent<'a> {
    /// A new root component with the given qualified name
    Root(&'a str),
    /// A new version below an existing component
    Child(ComponentId),
}

/// Catalog service operations
#[async_trait]
pub trait CatalogApi: Send + Sync {
    // ========== Components ==========

    /// Look up a component by qualified name
    async fn find_component(&self, name: &str, lookup: Lookup) -> Result<ComponentSummary>;

    async fn get_component(&self, id: ComponentId) -> Result<ComponentSummary>;

    async fn create_component(&self, parent: ComponentParent<'_>) -> Result<ComponentId>;

    /// Rename a component to its short name (`name;variant;version`)
    async fn rename_component(&self, id: ComponentId, short_name: &str) -> Result<()>;

    /// Remove every item of a component and leave a single placeholder of `kind`
    async fn reset_items(&self, id: ComponentId, kind: ComponentKind) -> Result<()>;

    async fn add_file_item(
        &self,
        id: ComponentId,
        item: &ComponentItem,
        position: Position,
        remove_existing: bool,
    ) -> Result<ItemId>;

    async fn link_items(&self, id: ComponentId, from: ItemId, to: ItemId) -> Result<()>;

    /// Current attributes of a component
    async fn get_component_attributes(&self, id: ComponentId) -> Result<BTreeMap<String, String>>;

    /// Replace the attribute set of a component
    async fn set_component_attributes(
        &self,
        id: ComponentId,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()>;

    async fn assign_change_request(
        &self,
        id: ComponentId,
        data_source: &str,
        change_request: &str,
    ) -> Result<()>;

    /// Root ancestor of a component version
    async fn base_component(&self, id: ComponentId) -> Result<ComponentId>;

    // ========== Applications ==========

    async fn find_application(&self, name: &str, lookup: Lookup) -> Result<ApplicationSummary>;

    async fn get_application(&self, id: ApplicationId) -> Result<ApplicationDetail>;

    /// Create a base application. The catalog does not return its id.
    async fn create_application(&self, name: &str, domain: Option<&str>) -> Result<()>;

    async fn create_application_version(
        &self,
        parent: ApplicationId,
        name: &str,
        domain: Option<&str>,
    ) -> Result<ApplicationId>;

    async fn assign_environment(&self, name: &str, domain: Option<&str>, env: &str) -> Result<()>;

    async fn is_component_assigned(
        &self,
        app: ApplicationId,
        component: ComponentId,
    ) -> Result<bool>;

    /// Add a component to an application version at `position`, optionally
    /// linked below `after` in the graph
    async fn add_component(
        &self,
        app: ApplicationId,
        component: ComponentId,
        position: Position,
        after: Option<ComponentId>,
    ) -> Result<()>;

    /// Swap `old` for `new`, keeping its position
    async fn replace_component(
        &self,
        app: ApplicationId,
        old: ComponentId,
        new: ComponentId,
    ) -> Result<()>;

    async fn remove_component(&self, app: ApplicationId, component: ComponentId) -> Result<()>;

    async fn approve_application(&self, app: ApplicationId) -> Result<()>;

    // ========== Domains ==========

    async fn find_domain(&self, name: &str) -> Result<DomainId>;

    async fn list_tasks(&self, domain: DomainId) -> Result<Vec<TaskRef>>;

    async fn run_task(
        &self,
        task: TaskId,
        app: ApplicationId,
        domain: DomainId,
        notes: &str,
    ) -> Result<()>;

    // ========== Deployments ==========

    /// Start a deployment without waiting for it
    async fn deploy(&self, app: ApplicationId, env: &str) -> Result<DeploymentId>;

    async fn deployment_progress(&self, id: DeploymentId) -> Result<DeploymentProgress>;

    async fn deployment_log(&self, id: DeploymentId) -> Result<DeploymentLog>;

    /// Record a deployment that happened outside the catalog
    async fn record_deployment(&self, record: &DeploymentRecord) -> Result<DeploymentReceipt>;
}
