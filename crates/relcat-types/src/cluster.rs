//! Cluster snapshot schema
//!
//! A snapshot is the JSON printed by `kubectl get deploy -o json`. Only the
//! fields needed to recover which image runs under which branch are modelled;
//! everything else is ignored on decode.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Label carrying the git branch a workload was built from
pub const BRANCH_LABEL: &str = "git/branch";

/// Label carrying the workload's release version
pub const VERSION_LABEL: &str = "app.kubernetes.io/version";

/// Branch assumed when a workload carries no branch label
pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Error)]
#[error("invalid cluster snapshot: {0}")]
pub struct SnapshotError(#[from] serde_json::Error);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub items: Vec<Workload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub metadata: Option<WorkloadMetadata>,
    #[serde(default)]
    pub spec: Option<WorkloadSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkloadMetadata {
    #[serde(rename = "creationTimestamp", default)]
    pub creation_timestamp: String,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkloadSpec {
    #[serde(default)]
    pub template: Option<PodTemplate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodTemplate {
    #[serde(default)]
    pub spec: Option<PodSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
}

/// One running container, mapped onto a component identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterContainer {
    /// `domain.<last repository path segment>`
    pub component_name: String,
    pub variant: String,
    pub version: String,
    /// Container name as it appears in the workload
    pub full_microservice_name: String,
    /// Last repository path segment
    pub microservice_name: String,
    pub branch: String,
    pub image_repo: String,
    pub image_tag: String,
    pub creation_timestamp: String,
    /// Value of the workload's version label, empty when absent
    pub release_version: String,
}

impl ClusterSnapshot {
    pub fn from_json(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Every container whose image splits into exactly `repo:tag`, in
    /// snapshot order. Workloads without labels or a pod template are skipped.
    pub fn containers(&self, domain: &str) -> Vec<ClusterContainer> {
        let mut found = Vec::new();

        for workload in &self.items {
            let Some(metadata) = &workload.metadata else {
                continue;
            };
            let Some(labels) = &metadata.labels else {
                continue;
            };
            let Some(pod) = workload
                .spec
                .as_ref()
                .and_then(|spec| spec.template.as_ref())
                .and_then(|template| template.spec.as_ref())
            else {
                continue;
            };

            let branch = labels
                .get(BRANCH_LABEL)
                .filter(|b| !b.is_empty())
                .cloned()
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
            let release_version = labels.get(VERSION_LABEL).cloned().unwrap_or_default();

            for container in &pod.containers {
                let parts: Vec<&str> = container.image.split(':').collect();
                let [repo, tag] = parts.as_slice() else {
                    continue;
                };
                let microservice = repo.rsplit('/').next().unwrap_or_default();

                found.push(ClusterContainer {
                    component_name: format!("{domain}.{microservice}"),
                    variant: branch.clone(),
                    version: tag.to_string(),
                    full_microservice_name: container.name.clone(),
                    microservice_name: microservice.to_string(),
                    branch: branch.clone(),
                    image_repo: repo.to_string(),
                    image_tag: tag.to_string(),
                    creation_timestamp: metadata.creation_timestamp.clone(),
                    release_version: release_version.clone(),
                });
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "apiVersion": "v1",
        "items": [
            {
                "metadata": {
                    "creationTimestamp": "2024-03-01T10:00:00Z",
                    "labels": {"git/branch": "feature-x", "app.kubernetes.io/version": "1.4"}
                },
                "spec": {"template": {"spec": {"containers": [
                    {"name": "cart-svc", "image": "ghcr.io/acme/cart:abc123"},
                    {"name": "sidecar", "image": "localhost:5000/acme/proxy:1.0"}
                ]}}}
            },
            {
                "metadata": {"creationTimestamp": "2024-03-02T10:00:00Z", "labels": {}},
                "spec": {"template": {"spec": {"containers": [
                    {"name": "web", "image": "acme/web:2.0"}
                ]}}}
            },
            {
                "metadata": {"creationTimestamp": "2024-03-02T10:00:00Z"},
                "spec": {"template": {"spec": {"containers": [
                    {"name": "orphan", "image": "acme/orphan:1"}
                ]}}}
            }
        ]
    }"#;

    #[test]
    fn test_containers_from_snapshot() {
        let snapshot = ClusterSnapshot::from_json(SNAPSHOT.as_bytes()).unwrap();
        let containers = snapshot.containers("GLOBAL.Acme");

        assert_eq!(containers.len(), 2);

        let cart = &containers[0];
        assert_eq!(cart.component_name, "GLOBAL.Acme.cart");
        assert_eq!(cart.variant, "feature-x");
        assert_eq!(cart.version, "abc123");
        assert_eq!(cart.image_repo, "ghcr.io/acme/cart");
        assert_eq!(cart.full_microservice_name, "cart-svc");
        assert_eq!(cart.release_version, "1.4");

        let web = &containers[1];
        assert_eq!(web.branch, DEFAULT_BRANCH);
        assert_eq!(web.release_version, "");
    }

    #[test]
    fn test_invalid_snapshot() {
        assert!(ClusterSnapshot::from_json(b"[1, 2").is_err());
    }
}
