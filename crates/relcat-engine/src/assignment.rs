//! Component to application assignment
//!
//! An application version holds at most one version of each base component.
//! Assigning a newer version of an already present component replaces the
//! link in place; anything else is appended below the last added entry.

use crate::error::Result;
use relcat_client::CatalogApi;
use relcat_types::{ApplicationId, ComponentId, Position};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What [`AssignmentEngine::assign`] did to the application version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AssignOutcome {
    /// Appended as a new graph entry
    Added { position: Position },
    /// Took the place of another version of the same base component
    Replaced { previous: ComponentId },
    /// Already assigned
    Unchanged,
}

pub struct AssignmentEngine {
    catalog: Arc<dyn CatalogApi>,
}

impl AssignmentEngine {
    pub fn new(catalog: Arc<dyn CatalogApi>) -> Self {
        Self { catalog }
    }

    #[instrument(skip(self), fields(app_id = %app, component_id = %component))]
    pub async fn assign(&self, app: ApplicationId, component: ComponentId) -> Result<AssignOutcome> {
        let detail = self.catalog.get_application(app).await?;
        if detail.components.iter().any(|c| c.id == component) {
            debug!("Component already assigned");
            return Ok(AssignOutcome::Unchanged);
        }

        let base = self.catalog.base_component(component).await?;
        let mut replace = None;
        for entry in &detail.components {
            if self.catalog.base_component(entry.id).await? == base {
                replace = Some(entry.id);
            }
        }

        if let Some(previous) = replace {
            self.catalog
                .replace_component(app, previous, component)
                .await?;
            info!(previous = %previous, "Replaced component version");
            return Ok(AssignOutcome::Replaced { previous });
        }

        let position = detail
            .last_component
            .and_then(|last| detail.components.iter().find(|c| c.id == last))
            .map(|last| {
                Position {
                    x: last.xpos,
                    y: last.ypos,
                }
                .below()
            })
            .unwrap_or(Position::ORIGIN);

        self.catalog
            .add_component(app, component, position, detail.last_component)
            .await?;
        info!(x = position.x, y = position.y, "Added component");
        Ok(AssignOutcome::Added { position })
    }

    /// Remove a component from an application version
    pub async fn detach(&self, app: ApplicationId, component: ComponentId) -> Result<()> {
        self.catalog.remove_component(app, component).await?;
        info!(app_id = %app, component_id = %component, "Detached component");
        Ok(())
    }

    /// Component ids currently assigned to an application version
    pub async fn assignment_set(&self, app: ApplicationId) -> Result<Vec<ComponentId>> {
        let detail = self.catalog.get_application(app).await?;
        Ok(detail.components.iter().map(|c| c.id).collect())
    }
}
