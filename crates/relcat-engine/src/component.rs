//! Component resolution
//!
//! Turns a component name into a catalog id, creating the version when the
//! catalog does not have it yet. New versions are created below the closest
//! existing ancestor, found by looking up the full name, then the name
//! without its version, then the bare name.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::version::{split_git_suffix, VersionAllocator};
use relcat_client::{CatalogApi, ComponentParent, Lookup};
use relcat_types::{
    ApplicationId, ComponentId, ComponentItem, ComponentKind, ItemId, Position, QualifiedName,
    VersionRef,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Outcome of [`ComponentResolver::resolve_or_create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub id: ComponentId,
    /// The name the id was resolved under, including an allocated version
    pub name: QualifiedName,
    pub created: bool,
}

/// Change requests to attach to a component, all from one data source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeRequests {
    pub data_source: String,
    pub ids: Vec<String>,
}

impl ChangeRequests {
    pub fn new(data_source: impl Into<String>, ids: Vec<String>) -> Self {
        Self {
            data_source: data_source.into(),
            ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data_source.is_empty() || self.ids.is_empty()
    }
}

pub struct ComponentResolver {
    catalog: Arc<dyn CatalogApi>,
    config: EngineConfig,
}

impl ComponentResolver {
    pub fn new(catalog: Arc<dyn CatalogApi>, config: EngineConfig) -> Self {
        Self { catalog, config }
    }

    /// Look up a component. When the catalog answers with a different
    /// object, its version list is searched for the requested name before
    /// the answer is accepted as is.
    pub async fn lookup(
        &self,
        name: &QualifiedName,
        lookup: Lookup,
    ) -> Result<Option<VersionRef<ComponentId>>> {
        let name = name.cleaned();
        let wanted = name.short_name();

        let summary = match self.catalog.find_component(&name.canonical(), lookup).await {
            Ok(summary) => summary,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if summary.name != wanted {
            if let Some(version) = summary.versions.iter().find(|v| v.name == wanted) {
                return Ok(Some(version.clone()));
            }
        }

        Ok(Some(VersionRef {
            id: summary.id,
            name: summary.name,
            domain: summary.domain,
        }))
    }

    /// Id of the component with exactly this name
    pub async fn find_exact(&self, name: &QualifiedName) -> Result<Option<ComponentId>> {
        let name = name.cleaned();
        Ok(self
            .lookup(&name, Lookup::exact())
            .await?
            .filter(|found| found.name == name.short_name())
            .map(|found| found.id))
    }

    pub async fn exists(&self, name: &QualifiedName) -> Result<bool> {
        Ok(self.find_exact(name).await?.is_some())
    }

    /// Resolve `name` to a component id, creating the version if needed.
    ///
    /// Without auto-increment an existing exact match is reused and only its
    /// items are refreshed. With auto-increment a new version is always
    /// allocated after the latest one found.
    #[instrument(skip(self, items), fields(component = %name))]
    pub async fn resolve_or_create(
        &self,
        name: &QualifiedName,
        kind: ComponentKind,
        auto_increment: bool,
        items: &[ComponentItem],
    ) -> Result<Resolved> {
        let name = name.cleaned();

        let Some(anchor) = self.find_anchor(&name).await? else {
            let id = self.create(None, &name, kind, items).await?;
            return Ok(Resolved {
                id,
                name,
                created: true,
            });
        };

        if !auto_increment {
            if anchor.name == name.short_name() {
                debug!(id = %anchor.id, "Component version exists");
                self.initialize_items(anchor.id, kind, items).await?;
                return Ok(Resolved {
                    id: anchor.id,
                    name,
                    created: false,
                });
            }

            let id = self.create(Some(anchor.id), &name, kind, items).await?;
            return Ok(Resolved {
                id,
                name,
                created: true,
            });
        }

        let seed = version_seed(&anchor.name, &name.variant);
        let version = self.allocate(&name, &seed).await?;
        let name = name.with_version(version).cleaned();
        let id = self.create(Some(anchor.id), &name, kind, items).await?;

        Ok(Resolved {
            id,
            name,
            created: true,
        })
    }

    /// Resolve with the configured component auto-increment policy
    pub async fn resolve(
        &self,
        name: &QualifiedName,
        kind: ComponentKind,
        items: &[ComponentItem],
    ) -> Result<Resolved> {
        self.resolve_or_create(name, kind, self.config.component_auto_increment, items)
            .await
    }

    /// `domain.name;variant;version` of a component id
    pub async fn component_name(&self, id: ComponentId) -> Result<String> {
        Ok(self.catalog.get_component(id).await?.full_name())
    }

    /// Applications the base of this component is assigned to
    pub async fn applications_of(&self, id: ComponentId) -> Result<Vec<VersionRef<ApplicationId>>> {
        let base = self.catalog.base_component(id).await?;
        Ok(self.catalog.get_component(base).await?.applications)
    }

    /// Replace the attributes of a component and attach change requests
    #[instrument(skip(self, attributes, change_requests), fields(component_id = %id))]
    pub async fn update_attributes(
        &self,
        id: ComponentId,
        attributes: &BTreeMap<String, String>,
        change_requests: Option<&ChangeRequests>,
    ) -> Result<()> {
        self.catalog.set_component_attributes(id, attributes).await?;
        info!(count = attributes.len(), "Updated component attributes");

        if let Some(requests) = change_requests.filter(|r| !r.is_empty()) {
            for request in &requests.ids {
                self.catalog
                    .assign_change_request(id, &requests.data_source, request)
                    .await?;
            }
            info!(count = requests.ids.len(), source = %requests.data_source, "Attached change requests");
        }
        Ok(())
    }

    /// Newest version under `name`, falling back to the newest version of
    /// the bare component when nothing matches
    pub async fn find_latest(&self, name: &QualifiedName) -> Result<Option<ComponentId>> {
        let name = name.cleaned();
        if let Some(found) = self.lookup(&name, Lookup::latest()).await? {
            return Ok(Some(found.id));
        }
        Ok(self
            .lookup(&name.base(), Lookup::latest())
            .await?
            .map(|found| found.id))
    }

    /// Overlay `attributes` on the current attributes of a component and
    /// write the result back. Returns the merged set.
    #[instrument(skip(self, attributes, change_requests), fields(component = %id))]
    pub async fn merge_attributes(
        &self,
        id: ComponentId,
        attributes: &BTreeMap<String, String>,
        change_requests: Option<&ChangeRequests>,
    ) -> Result<BTreeMap<String, String>> {
        let mut merged = self.catalog.get_component_attributes(id).await?;
        debug!(existing = merged.len(), incoming = attributes.len(), "Merging attributes");
        merged.extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.update_attributes(id, &merged, change_requests).await?;
        Ok(merged)
    }

    async fn find_anchor(&self, name: &QualifiedName) -> Result<Option<VersionRef<ComponentId>>> {
        let mut levels = vec![name.clone(), name.without_version(), name.base()];
        levels.dedup();

        for level in &levels {
            if let Some(found) = self.lookup(level, Lookup::latest()).await? {
                debug!(anchor = %found.name, id = %found.id, "Found closest existing component");
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn allocate(&self, name: &QualifiedName, seed: &str) -> Result<String> {
        VersionAllocator::new(self.config.max_version_attempts)
            .allocate(seed, |candidate| {
                let candidate = name.with_version(candidate);
                async move { self.exists(&candidate).await }
            })
            .await
    }

    async fn create(
        &self,
        parent: Option<ComponentId>,
        name: &QualifiedName,
        kind: ComponentKind,
        items: &[ComponentItem],
    ) -> Result<ComponentId> {
        let id = match parent {
            None => {
                let canonical = name.canonical();
                self.catalog
                    .create_component(ComponentParent::Root(&canonical))
                    .await?
            }
            Some(parent) => {
                let id = self
                    .catalog
                    .create_component(ComponentParent::Child(parent))
                    .await?;
                self.catalog.rename_component(id, &name.short_name()).await?;
                id
            }
        };

        self.initialize_items(id, kind, items).await?;
        info!(component = %name, id = %id, parent = ?parent, kind = %kind, "Created component version");
        Ok(id)
    }

    async fn initialize_items(
        &self,
        id: ComponentId,
        kind: ComponentKind,
        items: &[ComponentItem],
    ) -> Result<()> {
        if kind == ComponentKind::Docker || items.is_empty() {
            self.catalog.reset_items(id, kind).await?;
            return Ok(());
        }

        let mut position = Position::ORIGIN;
        let mut previous: Option<ItemId> = None;
        for (index, item) in items.iter().enumerate() {
            let item_id = self
                .catalog
                .add_file_item(id, item, position, index == 0)
                .await?;
            if let Some(previous) = previous {
                self.catalog.link_items(id, previous, item_id).await?;
            }
            previous = Some(item_id);
            position = position.below();
        }
        Ok(())
    }
}

/// Version to start allocating from, taken from the latest existing name.
/// A version equal to the requested variant means there is no version yet.
fn version_seed(found: &str, variant: &str) -> String {
    let parts: Vec<&str> = found.split(';').collect();
    let version = match parts.len() {
        n if n >= 3 => parts[2],
        2 => parts[1],
        _ => "",
    };
    let (schema, suffix) = split_git_suffix(version);
    if schema == variant {
        suffix.to_string()
    } else {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relcat_client::InMemoryCatalog;

    fn resolver(catalog: &Arc<InMemoryCatalog>) -> ComponentResolver {
        ComponentResolver::new(catalog.clone(), EngineConfig::default())
    }

    fn name(raw: &str) -> QualifiedName {
        QualifiedName::parse(raw)
    }

    #[test]
    fn test_version_seed() {
        assert_eq!(version_seed("cart;main;3", "main"), "3");
        assert_eq!(version_seed("cart;main", "main"), "");
        assert_eq!(version_seed("cart;7", ""), "7");
        assert_eq!(version_seed("cart;main;main_gabc", "main"), "_gabc");
        assert_eq!(version_seed("cart", "main"), "");
    }

    #[tokio::test]
    async fn test_unknown_name_creates_root() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let resolved = resolver(&catalog)
            .resolve_or_create(&name("GLOBAL.cart;main;1.0"), ComponentKind::Docker, false, &[])
            .await
            .unwrap();

        assert!(resolved.created);
        assert_eq!(catalog.component_names(), vec!["GLOBAL.cart;main;1_0"]);
        assert_eq!(catalog.base_component(resolved.id).await.unwrap(), resolved.id);
        assert_eq!(catalog.calls("reset_items"), 1);
    }

    #[tokio::test]
    async fn test_existing_version_is_reused() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let resolver = resolver(&catalog);
        let cart = name("GLOBAL.cart;main;1");

        let first = resolver
            .resolve_or_create(&cart, ComponentKind::Docker, false, &[])
            .await
            .unwrap();
        let second = resolver
            .resolve_or_create(&cart, ComponentKind::Docker, false, &[])
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(!second.created);
        assert_eq!(catalog.component_count(), 1);
        assert_eq!(catalog.calls("create_component"), 1);
    }

    #[tokio::test]
    async fn test_new_version_hangs_below_latest() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let resolver = resolver(&catalog);

        let v1 = resolver
            .resolve_or_create(&name("GLOBAL.cart;main;1"), ComponentKind::Docker, false, &[])
            .await
            .unwrap();
        let v2 = resolver
            .resolve_or_create(&name("GLOBAL.cart;main;2"), ComponentKind::Docker, false, &[])
            .await
            .unwrap();

        assert!(v2.created);
        assert_ne!(v1.id, v2.id);
        assert_eq!(catalog.base_component(v2.id).await.unwrap(), v1.id);
        assert_eq!(
            resolver.component_name(v2.id).await.unwrap(),
            "GLOBAL.cart;main;2"
        );
    }

    #[tokio::test]
    async fn test_auto_increment_allocates_next_version() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let resolver = resolver(&catalog);
        let cart = name("GLOBAL.cart;main;3");

        resolver
            .resolve_or_create(&cart, ComponentKind::Docker, false, &[])
            .await
            .unwrap();
        let next = resolver
            .resolve_or_create(&cart, ComponentKind::Docker, true, &[])
            .await
            .unwrap();
        let after = resolver
            .resolve_or_create(&cart, ComponentKind::Docker, true, &[])
            .await
            .unwrap();

        assert_eq!(next.name.version, "4");
        assert_eq!(after.name.version, "5");
        assert_eq!(
            catalog.component_names(),
            vec!["GLOBAL.cart;main;3", "GLOBAL.cart;main;4", "GLOBAL.cart;main;5"]
        );
    }

    #[tokio::test]
    async fn test_auto_increment_from_variant_only() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let resolver = resolver(&catalog);
        let cart = name("GLOBAL.cart;main");

        resolver
            .resolve_or_create(&cart, ComponentKind::Docker, false, &[])
            .await
            .unwrap();
        let first = resolver
            .resolve_or_create(&cart, ComponentKind::Docker, true, &[])
            .await
            .unwrap();

        assert_eq!(first.name.canonical(), "GLOBAL.cart;main;1");
    }

    #[tokio::test]
    async fn test_file_items_are_stacked_and_linked() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let items: Vec<ComponentItem> = ["war", "config", "scripts"]
            .iter()
            .map(|n| ComponentItem {
                name: n.to_string(),
                properties: BTreeMap::from([("repository".to_string(), "nexus".to_string())]),
            })
            .collect();

        let resolved = resolver(&catalog)
            .resolve_or_create(&name("GLOBAL.batch;1"), ComponentKind::File, false, &items)
            .await
            .unwrap();

        let placed = catalog.component_items(resolved.id);
        assert_eq!(placed.len(), 3);
        assert_eq!(placed[0], ("war".to_string(), Position { x: 100, y: 100 }));
        assert_eq!(placed[2].1, Position { x: 100, y: 300 });
        assert_eq!(catalog.item_links(resolved.id).len(), 2);
        assert_eq!(catalog.component_kind(resolved.id), Some(ComponentKind::File));
    }

    #[tokio::test]
    async fn test_update_attributes_with_change_requests() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let resolver = resolver(&catalog);
        let resolved = resolver
            .resolve_or_create(&name("GLOBAL.cart;main;1"), ComponentKind::Docker, false, &[])
            .await
            .unwrap();

        let attrs = BTreeMap::from([("DockerTag".to_string(), "abc".to_string())]);
        let requests = ChangeRequests::new("jira", vec!["OPS-1".into(), "OPS-2".into()]);
        resolver
            .update_attributes(resolved.id, &attrs, Some(&requests))
            .await
            .unwrap();

        assert_eq!(catalog.component_attributes(resolved.id), attrs);
        assert_eq!(catalog.change_requests(resolved.id).len(), 2);
    }

    #[tokio::test]
    async fn test_merge_attributes_keeps_existing_keys() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let resolver = resolver(&catalog);
        let resolved = resolver
            .resolve_or_create(&name("GLOBAL.cart;main;1"), ComponentKind::Docker, false, &[])
            .await
            .unwrap();
        let existing = BTreeMap::from([
            ("DockerTag".to_string(), "abc".to_string()),
            ("Replicas".to_string(), "2".to_string()),
        ]);
        resolver
            .update_attributes(resolved.id, &existing, None)
            .await
            .unwrap();

        let overlay = BTreeMap::from([
            ("Replicas".to_string(), "4".to_string()),
            ("db.url".to_string(), "jdbc:pg://db".to_string()),
        ]);
        let merged = resolver
            .merge_attributes(resolved.id, &overlay, None)
            .await
            .unwrap();

        assert_eq!(merged["DockerTag"], "abc");
        assert_eq!(merged["Replicas"], "4");
        assert_eq!(merged["db.url"], "jdbc:pg://db");
        assert_eq!(catalog.component_attributes(resolved.id), merged);
    }

    #[tokio::test]
    async fn test_find_latest_falls_back_to_base() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let resolver = resolver(&catalog);
        resolver
            .resolve_or_create(&name("GLOBAL.cart;main;1"), ComponentKind::Docker, false, &[])
            .await
            .unwrap();
        let v2 = resolver
            .resolve_or_create(&name("GLOBAL.cart;main;2"), ComponentKind::Docker, false, &[])
            .await
            .unwrap();

        let latest = resolver.find_latest(&name("GLOBAL.cart;main")).await.unwrap();
        assert_eq!(latest, Some(v2.id));

        let fallback = resolver.find_latest(&name("GLOBAL.cart;prod")).await.unwrap();
        assert_eq!(fallback, Some(v2.id));

        assert!(resolver
            .find_latest(&name("GLOBAL.pay;main"))
            .await
            .unwrap()
            .is_none());
    }
}
