//! relcat Types - Core types for the release catalog
//!
//! The catalog records build artifacts (components) and deployable bundles of
//! them (applications). Both are addressed by domain-qualified names and are
//! versioned as parent/child chains on the catalog service.
//!
//! ## Key Concepts
//!
//! - **QualifiedName**: `domain.name;variant;version`, parsed by [`NameParser`]
//! - **Component**: a build artifact, either a docker image or a set of files
//! - **Application**: an ordered set of component versions deployed together
//! - **ClusterContainer**: one running container read from a cluster snapshot
//! - **DeployData**: the JSON file carried between pipeline steps

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod catalog;
pub mod cluster;
pub mod component;
pub mod deploy_data;
pub mod ids;
pub mod names;

// Re-export main types
pub use catalog::{
    AppRef, ApplicationDetail, ApplicationSummary, AssignedComponent, ComponentSummary,
    DeploymentLog, DeploymentProgress, DeploymentReceipt, DeploymentRecord, Position, TaskRef,
    VersionRef,
};
pub use cluster::{ClusterContainer, ClusterSnapshot, SnapshotError};
pub use component::{ComponentItem, ComponentKind, ParseKindError};
pub use deploy_data::DeployData;
pub use ids::{ApplicationId, ComponentId, DeploymentId, DomainId, ItemId, TaskId};
pub use names::{clean, split_app_version, NameParser, QualifiedName};
