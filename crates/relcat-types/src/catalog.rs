//! Records exchanged with the catalog service
//!
//! Field names follow the service's JSON; Rust names are used where the wire
//! name is not a readable identifier.

use crate::ids::{ApplicationId, ComponentId, DeploymentId, TaskId};
use serde::{Deserialize, Serialize};

/// A named version pointer returned inside lookup results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRef<Id> {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub domain: String,
}

/// Component lookup result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSummary {
    pub id: ComponentId,
    /// Short name, `name;variant;version`
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub versions: Vec<VersionRef<ComponentId>>,
    /// Applications the component is assigned to
    #[serde(default)]
    pub applications: Vec<VersionRef<ApplicationId>>,
}

impl ComponentSummary {
    /// `domain.name;variant;version`
    pub fn full_name(&self) -> String {
        qualify(&self.domain, &self.name)
    }
}

/// Application lookup result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub id: ApplicationId,
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub versions: Vec<VersionRef<ApplicationId>>,
}

impl ApplicationSummary {
    pub fn full_name(&self) -> String {
        qualify(&self.domain, &self.name)
    }
}

/// A component linked into an application version, with its graph position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedComponent {
    pub id: ComponentId,
    #[serde(default)]
    pub xpos: i64,
    #[serde(default)]
    pub ypos: i64,
}

/// Full application record with its assignment set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDetail {
    pub id: ApplicationId,
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub components: Vec<AssignedComponent>,
    /// The component most recently added to the graph
    #[serde(rename = "lastcompver", default)]
    pub last_component: Option<ComponentId>,
}

impl ApplicationDetail {
    pub fn full_name(&self) -> String {
        qualify(&self.domain, &self.name)
    }
}

/// Coordinates on the catalog's component graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

impl Position {
    /// Where the first entry of a graph is placed
    pub const ORIGIN: Position = Position { x: 100, y: 100 };

    /// Vertical distance between consecutive entries
    pub const STEP: i64 = 100;

    pub const fn below(self) -> Position {
        Position {
            x: self.x,
            y: self.y + Self::STEP,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::ORIGIN
    }
}

/// Completion state of a running deployment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploymentProgress {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "iscomplete", default)]
    pub complete: bool,
    /// Present when the service could not read the log yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl DeploymentProgress {
    /// A deployment is finished once it failed or completed successfully
    pub fn is_terminal(&self) -> bool {
        self.text.is_none() && (!self.success || self.complete)
    }
}

/// Output of a finished deployment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploymentLog {
    #[serde(rename = "logoutput", default)]
    pub lines: Vec<String>,
    #[serde(rename = "exitcode", default)]
    pub exit_code: i64,
}

impl DeploymentLog {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Application reference in a deployment record: id or qualified name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AppRef {
    Id(ApplicationId),
    Name(String),
}

/// Deployment log entry posted to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub application: AppRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appversion: Option<String>,
    pub environment: String,
    #[serde(default)]
    pub rc: i32,
    #[serde(default)]
    pub compversion: Vec<String>,
    /// `Y` records the deployment without running it
    #[serde(rename = "skipdeploy")]
    pub skip_deploy: String,
}

impl DeploymentRecord {
    pub fn new(application: AppRef, environment: impl Into<String>) -> Self {
        Self {
            application,
            appversion: None,
            environment: environment.into(),
            rc: 0,
            compversion: Vec::new(),
            skip_deploy: "N".to_string(),
        }
    }
}

/// Response to a posted deployment record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploymentReceipt {
    #[serde(rename = "deployid", default)]
    pub deployment: Option<DeploymentId>,
    #[serde(default)]
    pub application: Option<String>,
    #[serde(rename = "appid", default)]
    pub application_id: Option<ApplicationId>,
    #[serde(rename = "errormsg", default)]
    pub error: Option<String>,
}

/// A domain task, as used to move applications between domains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: TaskId,
    pub name: String,
}

fn qualify(domain: &str, name: &str) -> String {
    if domain.is_empty() {
        name.to_string()
    } else {
        format!("{domain}.{name}")
    }
}
