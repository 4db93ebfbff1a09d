//! relcat Engine - Identity resolution and version lifecycle
//!
//! Everything here talks to the catalog through [`relcat_client::CatalogApi`]
//! and holds no state of its own between calls. Settings arrive once through
//! [`EngineConfig`].
//!
//! ## Key Concepts
//!
//! - **ComponentResolver**: name to component id, creating versions below the
//!   closest existing ancestor
//! - **ApplicationResolver**: name and version to application id
//! - **VersionAllocator**: next free version string under auto-increment
//! - **AssignmentEngine**: one version per base component in an application
//! - **ClusterReconciler**: records a running cluster as an application version
//! - **DeploymentWaiter**: bounded, cancellable wait for a deployment
//! - **BuildMetadata**: component attributes from CI variables and git

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod application;
pub mod assignment;
pub mod cluster;
pub mod component;
pub mod config;
pub mod deploy;
pub mod error;
pub mod metadata;
pub mod version;

pub use application::{ApplicationResolver, ResolvedApp, LATEST};
pub use assignment::{AssignOutcome, AssignmentEngine};
pub use cluster::{
    build_master_table, find_deploying, select_candidates, ClusterReconciler, SyncOutcome,
    SyncReport, SyncTarget, SyncedComponent,
};
pub use component::{ChangeRequests, ComponentResolver, Resolved};
pub use config::EngineConfig;
pub use deploy::DeploymentWaiter;
pub use error::{EngineError, Result};
pub use metadata::{docker_purl, Attributes, BuildMetadata, CommandRunner};
pub use version::{next_version, VersionAllocator};
