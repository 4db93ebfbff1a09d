//! In-memory implementation of the catalog API
//!
//! Suitable for development and testing. It keeps the same naming rules as
//! the service: an exact lookup matches the qualified name, a latest lookup
//! returns the most recently created object at or below that name
//! (`shop` covers `shop;main` and `shop;main;3`). For applications a latest
//! lookup also follows version lineage, so `shop;1` resolves to `shop;2`
//! when that version was created from it. Every trait call is counted so
//! tests can assert that an operation did nothing.

use crate::api::{CatalogApi, ComponentParent, Lookup};
use crate::error::{CatalogError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use relcat_types::{
    AppRef, ApplicationDetail, ApplicationId, ApplicationSummary, AssignedComponent, ComponentId,
    ComponentItem, ComponentKind, ComponentSummary, DeploymentId, DeploymentLog,
    DeploymentProgress, DeploymentReceipt, DeploymentRecord, DomainId, ItemId, Position,
    QualifiedName, TaskId, TaskRef, VersionRef,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct ComponentRecord {
    domain: String,
    name: String,
    parent: Option<ComponentId>,
    kind: ComponentKind,
    attributes: BTreeMap<String, String>,
    items: Vec<(ItemId, ComponentItem, Position)>,
    links: Vec<(ItemId, ItemId)>,
    change_requests: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct ApplicationRecord {
    domain: String,
    name: String,
    parent: Option<ApplicationId>,
    environments: Vec<String>,
    components: Vec<AssignedComponent>,
    last_component: Option<ComponentId>,
    approved: bool,
}

#[derive(Debug, Clone)]
struct DeploymentState {
    polls_remaining: usize,
    log: DeploymentLog,
}

/// In-memory catalog
pub struct InMemoryCatalog {
    next_id: AtomicI64,
    components: DashMap<ComponentId, ComponentRecord>,
    applications: DashMap<ApplicationId, ApplicationRecord>,
    domains: DashMap<String, (DomainId, Vec<TaskRef>)>,
    deployments: DashMap<DeploymentId, DeploymentState>,
    records: DashMap<DeploymentId, DeploymentRecord>,
    task_runs: DashMap<ApplicationId, (TaskId, DomainId)>,
    calls: DashMap<&'static str, usize>,
    polls_until_complete: AtomicUsize,
    exit_code: AtomicI64,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            components: DashMap::new(),
            applications: DashMap::new(),
            domains: DashMap::new(),
            deployments: DashMap::new(),
            records: DashMap::new(),
            task_runs: DashMap::new(),
            calls: DashMap::new(),
            polls_until_complete: AtomicUsize::new(0),
            exit_code: AtomicI64::new(0),
        }
    }

    /// Make new deployments report "running" for `polls` progress checks
    /// before finishing with `exit_code`
    pub fn with_deployment_outcome(self, polls: usize, exit_code: i64) -> Self {
        self.polls_until_complete.store(polls, Ordering::SeqCst);
        self.exit_code.store(exit_code, Ordering::SeqCst);
        self
    }

    /// Register a domain and its tasks
    pub fn add_domain(&self, name: &str, tasks: &[&str]) -> DomainId {
        let domain = DomainId::new(self.allocate());
        let tasks = tasks
            .iter()
            .map(|task| TaskRef {
                id: TaskId::new(self.allocate()),
                name: task.to_string(),
            })
            .collect();
        self.domains.insert(name.to_string(), (domain, tasks));
        domain
    }

    /// Number of times a trait method was called, by method name
    pub fn calls(&self, operation: &str) -> usize {
        self.calls.get(operation).map(|c| *c).unwrap_or(0)
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn application_count(&self) -> usize {
        self.applications.len()
    }

    /// Qualified names of every component, in creation order
    pub fn component_names(&self) -> Vec<String> {
        let mut named: Vec<(ComponentId, String)> = self
            .components
            .iter()
            .map(|c| (*c.key(), qualify(&c.domain, &c.name)))
            .collect();
        named.sort();
        named.into_iter().map(|(_, name)| name).collect()
    }

    pub fn component_attributes(&self, id: ComponentId) -> BTreeMap<String, String> {
        self.components
            .get(&id)
            .map(|c| c.attributes.clone())
            .unwrap_or_default()
    }

    pub fn component_kind(&self, id: ComponentId) -> Option<ComponentKind> {
        self.components.get(&id).map(|c| c.kind)
    }

    /// File items of a component with their graph positions
    pub fn component_items(&self, id: ComponentId) -> Vec<(String, Position)> {
        self.components
            .get(&id)
            .map(|c| {
                c.items
                    .iter()
                    .map(|(_, item, position)| (item.name.clone(), *position))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn item_links(&self, id: ComponentId) -> Vec<(ItemId, ItemId)> {
        self.components
            .get(&id)
            .map(|c| c.links.clone())
            .unwrap_or_default()
    }

    pub fn change_requests(&self, id: ComponentId) -> Vec<(String, String)> {
        self.components
            .get(&id)
            .map(|c| c.change_requests.clone())
            .unwrap_or_default()
    }

    pub fn environments(&self, app: ApplicationId) -> Vec<String> {
        self.applications
            .get(&app)
            .map(|a| a.environments.clone())
            .unwrap_or_default()
    }

    pub fn is_approved(&self, app: ApplicationId) -> bool {
        self.applications.get(&app).is_some_and(|a| a.approved)
    }

    /// Task last run against an application, with the domain it ran in
    pub fn task_run(&self, app: ApplicationId) -> Option<(TaskId, DomainId)> {
        self.task_runs.get(&app).map(|r| *r)
    }

    pub fn recorded_deployments(&self) -> Vec<DeploymentRecord> {
        let mut records: Vec<(DeploymentId, DeploymentRecord)> = self
            .records
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect();
        records.sort_by_key(|(id, _)| *id);
        records.into_iter().map(|(_, r)| r).collect()
    }

    fn allocate(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn count(&self, operation: &'static str) {
        *self.calls.entry(operation).or_insert(0) += 1;
    }

    fn component_summary(&self, id: ComponentId) -> Result<ComponentSummary> {
        let record = self
            .components
            .get(&id)
            .map(|c| c.clone())
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;

        let mut versions: Vec<VersionRef<ComponentId>> = self
            .components
            .iter()
            .filter(|c| c.parent == Some(id))
            .map(|c| VersionRef {
                id: *c.key(),
                name: c.name.clone(),
                domain: c.domain.clone(),
            })
            .collect();
        versions.sort_by_key(|v| v.id);

        let mut applications: Vec<VersionRef<ApplicationId>> = self
            .applications
            .iter()
            .filter(|a| a.components.iter().any(|c| c.id == id))
            .map(|a| VersionRef {
                id: *a.key(),
                name: a.name.clone(),
                domain: a.domain.clone(),
            })
            .collect();
        applications.sort_by_key(|a| a.id);

        Ok(ComponentSummary {
            id,
            name: record.name,
            domain: record.domain,
            versions,
            applications,
        })
    }

    fn application_summary(&self, id: ApplicationId) -> Result<ApplicationSummary> {
        let record = self
            .applications
            .get(&id)
            .map(|a| a.clone())
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        Ok(ApplicationSummary {
            id,
            name: record.name,
            domain: record.domain,
            versions: Vec::new(),
        })
    }

    fn find_application_id(&self, full_name: &str) -> Option<ApplicationId> {
        self.applications
            .iter()
            .find(|a| qualify(&a.domain, &a.name) == full_name)
            .map(|a| *a.key())
    }

    /// Most recently created version in the lineage rooted at `root`
    fn newest_descendant(&self, root: ApplicationId) -> ApplicationId {
        let mut records: Vec<(ApplicationId, Option<ApplicationId>)> = self
            .applications
            .iter()
            .map(|a| (*a.key(), a.parent))
            .collect();
        records.sort();

        let mut lineage = vec![root];
        for (id, parent) in records {
            if parent.is_some_and(|p| lineage.contains(&p)) && !lineage.contains(&id) {
                lineage.push(id);
            }
        }
        lineage.into_iter().max().unwrap_or(root)
    }

    fn with_application<T>(
        &self,
        app: ApplicationId,
        f: impl FnOnce(&mut ApplicationRecord) -> T,
    ) -> Result<T> {
        let mut record = self
            .applications
            .get_mut(&app)
            .ok_or_else(|| CatalogError::NotFound(app.to_string()))?;
        Ok(f(&mut record))
    }

    fn with_component<T>(
        &self,
        id: ComponentId,
        f: impl FnOnce(&mut ComponentRecord) -> T,
    ) -> Result<T> {
        let mut record = self
            .components
            .get_mut(&id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        Ok(f(&mut record))
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn qualify(domain: &str, name: &str) -> String {
    if domain.is_empty() {
        name.to_string()
    } else {
        format!("{domain}.{name}")
    }
}

/// Pick the record matching `query` under the lookup rules
fn select<Id: Copy + Ord>(
    candidates: impl Iterator<Item = (Id, String)>,
    query: &str,
    lookup: Lookup,
) -> Option<Id> {
    let prefix = format!("{query};");
    candidates
        .filter(|(_, full)| {
            full == query || (lookup.latest && full.starts_with(&prefix))
        })
        .map(|(id, _)| id)
        .max()
}

#[async_trait]
impl CatalogApi for InMemoryCatalog {
    // ========== Components ==========

    async fn find_component(&self, name: &str, lookup: Lookup) -> Result<ComponentSummary> {
        self.count("find_component");
        let candidates = self
            .components
            .iter()
            .map(|c| (*c.key(), qualify(&c.domain, &c.name)))
            .collect::<Vec<_>>();
        let id = select(candidates.into_iter(), name, lookup)
            .ok_or_else(|| CatalogError::NotFound(format!("component {name}")))?;
        self.component_summary(id)
    }

    async fn get_component(&self, id: ComponentId) -> Result<ComponentSummary> {
        self.count("get_component");
        self.component_summary(id)
    }

    async fn create_component(&self, parent: ComponentParent<'_>) -> Result<ComponentId> {
        self.count("create_component");
        let record = match parent {
            ComponentParent::Root(name) => {
                let name = QualifiedName::parse(name);
                ComponentRecord {
                    domain: name.domain_path(),
                    name: name.short_name(),
                    parent: None,
                    kind: ComponentKind::default(),
                    attributes: BTreeMap::new(),
                    items: Vec::new(),
                    links: Vec::new(),
                    change_requests: Vec::new(),
                }
            }
            ComponentParent::Child(parent) => {
                let source = self
                    .components
                    .get(&parent)
                    .map(|c| c.clone())
                    .ok_or_else(|| CatalogError::Rejected(format!("no parent {parent}")))?;
                ComponentRecord {
                    parent: Some(parent),
                    items: Vec::new(),
                    links: Vec::new(),
                    change_requests: Vec::new(),
                    ..source
                }
            }
        };

        let id = ComponentId::new(self.allocate());
        self.components.insert(id, record);
        Ok(id)
    }

    async fn rename_component(&self, id: ComponentId, short_name: &str) -> Result<()> {
        self.count("rename_component");
        self.with_component(id, |c| c.name = short_name.to_string())
    }

    async fn reset_items(&self, id: ComponentId, kind: ComponentKind) -> Result<()> {
        self.count("reset_items");
        self.with_component(id, |c| {
            c.kind = kind;
            c.items.clear();
            c.links.clear();
        })
    }

    async fn add_file_item(
        &self,
        id: ComponentId,
        item: &ComponentItem,
        position: Position,
        remove_existing: bool,
    ) -> Result<ItemId> {
        self.count("add_file_item");
        let item_id = ItemId::new(self.allocate());
        self.with_component(id, |c| {
            if remove_existing {
                c.items.clear();
                c.links.clear();
            }
            c.kind = ComponentKind::File;
            c.items.push((item_id, item.clone(), position));
        })?;
        Ok(item_id)
    }

    async fn link_items(&self, id: ComponentId, from: ItemId, to: ItemId) -> Result<()> {
        self.count("link_items");
        self.with_component(id, |c| c.links.push((from, to)))
    }

    async fn get_component_attributes(&self, id: ComponentId) -> Result<BTreeMap<String, String>> {
        self.count("get_component_attributes");
        self.with_component(id, |c| c.attributes.clone())
    }

    async fn set_component_attributes(
        &self,
        id: ComponentId,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.count("set_component_attributes");
        self.with_component(id, |c| c.attributes = attributes.clone())
    }

    async fn assign_change_request(
        &self,
        id: ComponentId,
        data_source: &str,
        change_request: &str,
    ) -> Result<()> {
        self.count("assign_change_request");
        self.with_component(id, |c| {
            c.change_requests
                .push((data_source.to_string(), change_request.to_string()))
        })
    }

    async fn base_component(&self, id: ComponentId) -> Result<ComponentId> {
        self.count("base_component");
        let mut current = id;
        loop {
            let parent = self
                .components
                .get(&current)
                .map(|c| c.parent)
                .ok_or_else(|| CatalogError::NotFound(current.to_string()))?;
            match parent {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
    }

    // ========== Applications ==========

    async fn find_application(&self, name: &str, lookup: Lookup) -> Result<ApplicationSummary> {
        self.count("find_application");
        let candidates = self
            .applications
            .iter()
            .map(|a| (*a.key(), qualify(&a.domain, &a.name)))
            .collect::<Vec<_>>();
        let id = select(candidates.into_iter(), name, lookup)
            .ok_or_else(|| CatalogError::NotFound(format!("application {name}")))?;
        let id = if lookup.latest {
            self.newest_descendant(id)
        } else {
            id
        };
        self.application_summary(id)
    }

    async fn get_application(&self, id: ApplicationId) -> Result<ApplicationDetail> {
        self.count("get_application");
        let record = self
            .applications
            .get(&id)
            .map(|a| a.clone())
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        Ok(ApplicationDetail {
            id,
            name: record.name,
            domain: record.domain,
            components: record.components,
            last_component: record.last_component,
        })
    }

    async fn create_application(&self, name: &str, domain: Option<&str>) -> Result<()> {
        self.count("create_application");
        let domain = domain.unwrap_or_default().to_string();
        if self.find_application_id(&qualify(&domain, name)).is_some() {
            return Err(CatalogError::Rejected(format!("application {name} exists")));
        }
        let id = ApplicationId::new(self.allocate());
        self.applications.insert(
            id,
            ApplicationRecord {
                domain,
                name: name.to_string(),
                parent: None,
                environments: Vec::new(),
                components: Vec::new(),
                last_component: None,
                approved: false,
            },
        );
        Ok(())
    }

    async fn create_application_version(
        &self,
        parent: ApplicationId,
        name: &str,
        domain: Option<&str>,
    ) -> Result<ApplicationId> {
        self.count("create_application_version");
        let source = self
            .applications
            .get(&parent)
            .map(|a| a.clone())
            .ok_or_else(|| CatalogError::Rejected(format!("no parent {parent}")))?;

        let id = ApplicationId::new(self.allocate());
        self.applications.insert(
            id,
            ApplicationRecord {
                domain: domain.map(str::to_string).unwrap_or(source.domain),
                name: name.to_string(),
                parent: Some(parent),
                environments: Vec::new(),
                components: source.components,
                last_component: source.last_component,
                approved: false,
            },
        );
        Ok(id)
    }

    async fn assign_environment(&self, name: &str, domain: Option<&str>, env: &str) -> Result<()> {
        self.count("assign_environment");
        let full = qualify(domain.unwrap_or_default(), name);
        let app = self
            .find_application_id(&full)
            .ok_or_else(|| CatalogError::Rejected(format!("no application {full}")))?;
        self.with_application(app, |a| a.environments.push(env.to_string()))
    }

    async fn is_component_assigned(
        &self,
        app: ApplicationId,
        component: ComponentId,
    ) -> Result<bool> {
        self.count("is_component_assigned");
        self.with_application(app, |a| a.components.iter().any(|c| c.id == component))
    }

    async fn add_component(
        &self,
        app: ApplicationId,
        component: ComponentId,
        position: Position,
        _after: Option<ComponentId>,
    ) -> Result<()> {
        self.count("add_component");
        self.with_application(app, |a| {
            a.components.push(AssignedComponent {
                id: component,
                xpos: position.x,
                ypos: position.y,
            });
            a.last_component = Some(component);
        })
    }

    async fn replace_component(
        &self,
        app: ApplicationId,
        old: ComponentId,
        new: ComponentId,
    ) -> Result<()> {
        self.count("replace_component");
        self.with_application(app, |a| {
            for entry in a.components.iter_mut().filter(|c| c.id == old) {
                entry.id = new;
            }
            if a.last_component == Some(old) {
                a.last_component = Some(new);
            }
        })
    }

    async fn remove_component(&self, app: ApplicationId, component: ComponentId) -> Result<()> {
        self.count("remove_component");
        self.with_application(app, |a| {
            a.components.retain(|c| c.id != component);
            if a.last_component == Some(component) {
                a.last_component = None;
            }
        })
    }

    async fn approve_application(&self, app: ApplicationId) -> Result<()> {
        self.count("approve_application");
        self.with_application(app, |a| a.approved = true)
    }

    // ========== Domains ==========

    async fn find_domain(&self, name: &str) -> Result<DomainId> {
        self.count("find_domain");
        self.domains
            .get(name)
            .map(|d| d.0)
            .ok_or_else(|| CatalogError::NotFound(format!("domain {name}")))
    }

    async fn list_tasks(&self, domain: DomainId) -> Result<Vec<TaskRef>> {
        self.count("list_tasks");
        Ok(self
            .domains
            .iter()
            .find(|d| d.0 == domain)
            .map(|d| d.1.clone())
            .unwrap_or_default())
    }

    async fn run_task(
        &self,
        task: TaskId,
        app: ApplicationId,
        domain: DomainId,
        _notes: &str,
    ) -> Result<()> {
        self.count("run_task");
        let known = self
            .domains
            .iter()
            .any(|d| d.0 == domain && d.1.iter().any(|t| t.id == task));
        if !known || !self.applications.contains_key(&app) {
            return Err(CatalogError::Rejected(format!("task {task} cannot run")));
        }
        self.task_runs.insert(app, (task, domain));
        Ok(())
    }

    // ========== Deployments ==========

    async fn deploy(&self, app: ApplicationId, env: &str) -> Result<DeploymentId> {
        self.count("deploy");
        let name = self
            .applications
            .get(&app)
            .map(|a| qualify(&a.domain, &a.name))
            .ok_or_else(|| CatalogError::Rejected(format!("no application {app}")))?;

        let id = DeploymentId::new(self.allocate());
        self.deployments.insert(
            id,
            DeploymentState {
                polls_remaining: self.polls_until_complete.load(Ordering::SeqCst),
                log: DeploymentLog {
                    lines: vec![format!("Deploying {name} to {env}")],
                    exit_code: self.exit_code.load(Ordering::SeqCst),
                },
            },
        );
        Ok(id)
    }

    async fn deployment_progress(&self, id: DeploymentId) -> Result<DeploymentProgress> {
        self.count("deployment_progress");
        let mut state = self
            .deployments
            .get_mut(&id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;

        if state.polls_remaining > 0 {
            state.polls_remaining -= 1;
            return Ok(DeploymentProgress {
                success: true,
                complete: false,
                text: None,
            });
        }
        Ok(DeploymentProgress {
            success: state.log.succeeded(),
            complete: true,
            text: None,
        })
    }

    async fn deployment_log(&self, id: DeploymentId) -> Result<DeploymentLog> {
        self.count("deployment_log");
        self.deployments
            .get(&id)
            .map(|d| d.log.clone())
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    async fn record_deployment(&self, record: &DeploymentRecord) -> Result<DeploymentReceipt> {
        self.count("record_deployment");
        let application_id = match &record.application {
            AppRef::Id(id) => Some(*id),
            AppRef::Name(name) => self.find_application_id(name),
        };
        let Some(application_id) = application_id else {
            return Err(CatalogError::Rejected(format!(
                "unknown application {:?}",
                record.application
            )));
        };

        let id = DeploymentId::new(self.allocate());
        self.records.insert(id, record.clone());
        Ok(DeploymentReceipt {
            deployment: Some(id),
            application: None,
            application_id: Some(application_id),
            error: None,
        })
    }
}
